/// Display updates produced by runs and applied by the UI loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum UiEvent {
    TerminalOutput(String),
    AnalysisReset,
    AnalysisAppend(String),
}
