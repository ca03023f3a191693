use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "terminal-helper",
    version,
    about = "Terminal with streamed AI analysis of each command's output"
)]
pub(crate) struct Args {
    #[arg(long, default_value = "config/config.toml")]
    pub(crate) config: PathBuf,
    #[arg(long, default_value = "logs")]
    pub(crate) log_dir: PathBuf,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
    /// Inference server base URL (overrides OLLAMA_HOST).
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Model name (overrides OLLAMA_MODEL).
    #[arg(long)]
    pub(crate) model: Option<String>,
    /// Show stream diagnostics in the analysis pane.
    #[arg(long, default_value_t = false)]
    pub(crate) verbose: bool,
    /// Run one command without the TUI, print the analysis and exit.
    #[arg(long, value_name = "COMMAND")]
    pub(crate) once: Option<String>,
}

impl Args {
    pub(crate) fn apply_overrides(&self, config: &mut crate::config::Config) {
        if let Some(host) = self.host.as_deref() {
            config.inference.host = host.trim().to_string();
        }
        if let Some(model) = self.model.as_deref() {
            config.inference.model = model.trim().to_string();
        }
        if self.verbose {
            config.inference.verbose = true;
        }
    }
}
