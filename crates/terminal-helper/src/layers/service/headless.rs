use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::config::Config;
use crate::layers::analysis::AnalysisClient;

use super::flush::FlushPolicy;
use super::orchestrator::{RunOrchestrator, SubmitOutcome};
use super::sink::{ConsoleSink, DisplaySink};

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Runs a single command without the TUI. Output streams to stdout; the
/// analysis is printed once the run is over. Ctrl+C cancels the run.
pub(crate) async fn run_once(
    config: &Config,
    client: Arc<AnalysisClient>,
    command: &str,
) -> anyhow::Result<()> {
    let sink = Arc::new(ConsoleSink::default());
    let display: Arc<dyn DisplaySink> = sink.clone();
    let mut orchestrator = RunOrchestrator::new(
        display,
        client,
        config.shell.clone(),
        FlushPolicy::from(&config.analysis),
    );

    if orchestrator.submit(command) != SubmitOutcome::Started {
        anyhow::bail!("nothing to run");
    }

    let mut interrupted = false;
    while orchestrator.is_busy() {
        tokio::select! {
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("failed to listen for ctrl-c")?;
                interrupted = true;
                orchestrator.cancel_current();
            }
            _ = tokio::time::sleep(IDLE_POLL) => {}
        }
    }
    orchestrator.wait_idle().await;

    println!("\n=== AI analysis ===");
    print!("{}", sink.take_analysis());
    Ok(())
}
