use std::io::Write;
use std::sync::Mutex;

use tokio::sync::mpsc;

use super::events::UiEvent;

/// Where a run's output goes. Every call carries a complete string.
pub(crate) trait DisplaySink: Send + Sync {
    fn write_terminal(&self, text: &str);
    fn reset_analysis(&self);
    fn append_analysis(&self, text: &str);
}

/// Forwards every update to the TUI loop.
pub(crate) struct ChannelSink {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<UiEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("ui channel closed, dropping display update");
        }
    }
}

impl DisplaySink for ChannelSink {
    fn write_terminal(&self, text: &str) {
        self.send(UiEvent::TerminalOutput(text.to_string()));
    }

    fn reset_analysis(&self) {
        self.send(UiEvent::AnalysisReset);
    }

    fn append_analysis(&self, text: &str) {
        self.send(UiEvent::AnalysisAppend(text.to_string()));
    }
}

/// Headless sink: command output goes straight to stdout, the analysis is
/// kept until [`ConsoleSink::take_analysis`].
#[derive(Default)]
pub(crate) struct ConsoleSink {
    analysis: Mutex<String>,
}

impl ConsoleSink {
    pub(crate) fn take_analysis(&self) -> String {
        match self.analysis.lock() {
            Ok(mut analysis) => std::mem::take(&mut *analysis),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    fn with_analysis(&self, update: impl FnOnce(&mut String)) {
        match self.analysis.lock() {
            Ok(mut analysis) => update(&mut *analysis),
            Err(poisoned) => update(&mut *poisoned.into_inner()),
        }
    }
}

impl DisplaySink for ConsoleSink {
    fn write_terminal(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(err) = stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush()) {
            tracing::warn!(error = %err, "failed to write to stdout");
        }
    }

    fn reset_analysis(&self) {
        self.with_analysis(String::clear);
    }

    fn append_analysis(&self, text: &str) {
        self.with_analysis(|analysis| analysis.push_str(text));
    }
}
