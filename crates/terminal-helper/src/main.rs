mod cli;
mod config;
mod layers;
#[cfg(test)]
mod test_utils;

use crate::cli::Args;
use crate::config::Config;
use crate::layers::analysis::{AnalysisClient, SystemPrompt};
use crate::layers::service::events::UiEvent;
use crate::layers::service::flush::FlushPolicy;
use crate::layers::service::logging::init_tracing;
use crate::layers::service::orchestrator::RunOrchestrator;
use crate::layers::service::run_once;
use crate::layers::service::sink::{ChannelSink, DisplaySink};
use crate::layers::ui::{draw_ui, handle_key_event, restore_terminal, setup_terminal, AppState};
use anyhow::Context;
use clap::Parser;
use crossterm::event::{self, Event};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _file_guard = init_tracing(&args.log_dir, args.log_to_stderr)?;

    let mut config = Config::load(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    config.apply_env(|key| std::env::var(key).ok())?;
    args.apply_overrides(&mut config);
    config.validate()?;
    tracing::info!(
        event = "startup",
        host = %config.inference.host,
        model = %config.inference.model,
        verbose = config.inference.verbose,
        safe_mode = config.safe_mode,
    );

    let prompt = Arc::new(SystemPrompt::from_file(&config.system_prompt_path, config.safe_mode));
    let client = Arc::new(AnalysisClient::new(&config.inference, prompt)?);

    if let Some(command) = args.once.as_deref() {
        return run_once(&config, client, command).await;
    }

    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel::<UiEvent>();
    let sink: Arc<dyn DisplaySink> = Arc::new(ChannelSink::new(ui_tx));
    let mut orchestrator = RunOrchestrator::new(
        sink,
        client,
        config.shell.clone(),
        FlushPolicy::from(&config.analysis),
    );

    let mut terminal = setup_terminal()?;
    let mut app = AppState::new(config.inference.model.clone());

    let tick_rate = Duration::from_millis(50);
    let result: anyhow::Result<()> = async {
        loop {
            while let Ok(event) = ui_rx.try_recv() {
                app.handle_event(event);
            }
            app.busy = orchestrator.is_busy();
            app.runs = orchestrator.history().len();

            terminal.draw(|frame| draw_ui(frame, &mut app))?;

            if event::poll(tick_rate)? {
                if let Event::Key(key) = event::read()? {
                    if handle_key_event(key, &mut app, &mut orchestrator) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    restore_terminal(&mut terminal)?;
    orchestrator.shutdown().await;
    tracing::info!(event = "shutdown", runs = orchestrator.history().len());
    result
}
