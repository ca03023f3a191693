use std::sync::Arc;

use protocol::{AnalysisRequest, StreamKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::ShellConfig;
use crate::layers::analysis::{AnalysisClient, AnalysisStream};
use crate::layers::execution::{spawn_command, RunExit};
use crate::layers::extract::extract_summary;

use super::flush::{FlushBuffer, FlushPolicy};
use super::sink::DisplaySink;

const FRAGMENT_BUFFER: usize = 64;
const BUSY_NOTICE: &str = "A command is still running; press Ctrl+C to cancel it first.\n";
const CANCEL_NOTICE: &str = "\nCancelled current command.\n";
const ANALYZING_NOTICE: &str = "Analyzing...\n";
const NO_TOKENS_NOTICE: &str =
    "\n(no AI tokens received; check OLLAMA_HOST/OLLAMA_MODEL or set AI_DEBUG_VERBOSE=1)\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmitOutcome {
    Ignored,
    Busy,
    Started,
}

struct RunContext {
    sink: Arc<dyn DisplaySink>,
    client: Arc<AnalysisClient>,
    shell: ShellConfig,
    flush: FlushPolicy,
}

struct ActiveRun {
    command: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ActiveRun {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Runs one command at a time: execute, show live output, extract a scan
/// summary, then stream the model's analysis into the analysis pane.
pub(crate) struct RunOrchestrator {
    context: Arc<RunContext>,
    history: Vec<String>,
    current: Option<ActiveRun>,
}

impl RunOrchestrator {
    pub(crate) fn new(
        sink: Arc<dyn DisplaySink>,
        client: Arc<AnalysisClient>,
        shell: ShellConfig,
        flush: FlushPolicy,
    ) -> Self {
        Self {
            context: Arc::new(RunContext {
                sink,
                client,
                shell,
                flush,
            }),
            history: Vec::new(),
            current: None,
        }
    }

    pub(crate) fn submit(&mut self, input: &str) -> SubmitOutcome {
        let command = input.trim();
        if command.is_empty() {
            return SubmitOutcome::Ignored;
        }
        if let Some(active) = self.current.as_ref().filter(|active| active.is_running()) {
            tracing::info!(
                event = "submit_rejected",
                command = %command,
                running = %active.command,
            );
            self.context.sink.write_terminal(BUSY_NOTICE);
            return SubmitOutcome::Busy;
        }

        let command = command.to_string();
        self.history.push(command.clone());
        self.context.sink.write_terminal(&format!("\n> {command}\n"));
        self.context.sink.reset_analysis();
        self.context.sink.append_analysis(ANALYZING_NOTICE);

        let run_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let span = tracing::info_span!("run", run_id = %run_id);
        let handle = tokio::spawn(
            run_and_analyze(Arc::clone(&self.context), command.clone(), cancel.clone())
                .instrument(span),
        );
        self.current = Some(ActiveRun {
            command,
            cancel,
            handle,
        });
        SubmitOutcome::Started
    }

    /// Cancels the running command (or its analysis). Returns `false` when
    /// nothing was running.
    pub(crate) fn cancel_current(&mut self) -> bool {
        let Some(active) = self.current.as_ref().filter(|active| active.is_running()) else {
            return false;
        };
        if active.cancel.is_cancelled() {
            return true;
        }
        self.context.sink.write_terminal(CANCEL_NOTICE);
        active.cancel.cancel();
        true
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.current.as_ref().is_some_and(ActiveRun::is_running)
    }

    pub(crate) fn history(&self) -> &[String] {
        &self.history
    }

    /// Waits until the current run, if any, has fully finished.
    pub(crate) async fn wait_idle(&mut self) {
        if let Some(active) = self.current.take() {
            if let Err(err) = active.handle.await {
                tracing::warn!(error = %err, "run task failed");
            }
        }
    }

    /// Cancels whatever is running and waits for its cleanup.
    pub(crate) async fn shutdown(&mut self) {
        if let Some(active) = self.current.as_ref() {
            active.cancel.cancel();
        }
        self.wait_idle().await;
    }
}

async fn run_and_analyze(context: Arc<RunContext>, command: String, cancel: CancellationToken) {
    tracing::info!(event = "run_started", command = %command);
    let mut stream = match spawn_command(&command, &context.shell, cancel.clone()) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(event = "run_failed", error = %err);
            context
                .sink
                .write_terminal(&format!("failed to start command: {err:#}\n"));
            context.sink.reset_analysis();
            context
                .sink
                .append_analysis("(analysis skipped: command did not start)\n");
            return;
        }
    };

    let mut stdout = String::new();
    let mut stderr = String::new();
    while let Some(chunk) = stream.next_chunk().await {
        context.sink.write_terminal(&chunk.text);
        match chunk.stream {
            StreamKind::Stdout => stdout.push_str(&chunk.text),
            StreamKind::Stderr => stderr.push_str(&chunk.text),
        }
    }

    let exit = stream.finish().await;
    match exit {
        RunExit::Cancelled => {
            tracing::info!(event = "run_cancelled", phase = "execution");
            return;
        }
        RunExit::Completed { exit_code } => tracing::info!(
            event = "run_finished",
            exit_code = ?exit_code,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
        ),
    }
    if cancel.is_cancelled() {
        tracing::info!(event = "run_cancelled", phase = "execution");
        return;
    }

    let summary = extract_summary(&stdout, &command);
    let payload = AnalysisRequest::new(command, summary);
    tracing::info!(
        event = "analysis_request",
        model = %context.client.model(),
        hosts = payload.structured_output.hosts.len(),
    );
    analyze(&context, &payload, &cancel).await;
}

enum AnalysisEnd {
    Completed,
    Failed(anyhow::Error),
    Cancelled,
}

async fn analyze(context: &RunContext, payload: &AnalysisRequest, cancel: &CancellationToken) {
    let sink = context.sink.as_ref();
    sink.reset_analysis();

    let (tx, mut rx) = mpsc::channel(FRAGMENT_BUFFER);
    let end = match context.client.stream(payload) {
        Ok(stream) => {
            let pump = tokio::spawn(pump_fragments(stream, tx));
            let mut buffer = FlushBuffer::new(context.flush, Instant::now());
            let mut fragments = 0usize;
            let end = loop {
                let deadline = buffer.deadline();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break AnalysisEnd::Cancelled,
                    _ = sleep_until(deadline) => {
                        if let Some(text) = buffer.flush_due(Instant::now()) {
                            sink.append_analysis(&text);
                        }
                    }
                    item = rx.recv() => match item {
                        Some(Ok(fragment)) => {
                            fragments += 1;
                            if let Some(text) = buffer.push(&fragment, Instant::now()) {
                                sink.append_analysis(&text);
                            }
                        }
                        Some(Err(err)) => break AnalysisEnd::Failed(err),
                        None => break AnalysisEnd::Completed,
                    },
                }
            };
            pump.abort();
            if let Some(text) = buffer.finish() {
                sink.append_analysis(&text);
            }
            if fragments == 0 && !matches!(end, AnalysisEnd::Cancelled) {
                finish_without_tokens(end, sink)
            } else {
                report_failure(end, sink)
            }
        }
        Err(err) => finish_without_tokens(AnalysisEnd::Failed(err), sink),
    };

    match end {
        AnalysisEnd::Completed => tracing::info!(event = "analysis_finished"),
        AnalysisEnd::Failed(_) => {}
        AnalysisEnd::Cancelled => {
            tracing::info!(event = "run_cancelled", phase = "analysis");
            sink.append_analysis("\n(analysis cancelled)\n");
        }
    }
    sink.append_analysis("\n");
}

fn finish_without_tokens(end: AnalysisEnd, sink: &dyn DisplaySink) -> AnalysisEnd {
    let end = report_failure(end, sink);
    tracing::warn!(event = "analysis_empty");
    sink.append_analysis(NO_TOKENS_NOTICE);
    end
}

fn report_failure(end: AnalysisEnd, sink: &dyn DisplaySink) -> AnalysisEnd {
    if let AnalysisEnd::Failed(err) = &end {
        tracing::warn!(event = "analysis_failed", error = %format!("{err:#}"));
        sink.append_analysis(&format!("\nAI error: {err:#}\n"));
    }
    end
}

async fn pump_fragments(mut stream: AnalysisStream, tx: mpsc::Sender<anyhow::Result<String>>) {
    loop {
        match stream.next_fragment().await {
            Ok(Some(fragment)) => {
                if tx.send(Ok(fragment)).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
