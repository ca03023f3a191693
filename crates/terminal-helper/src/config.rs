use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub(crate) const ENV_HOST: &str = "OLLAMA_HOST";
pub(crate) const ENV_MODEL: &str = "OLLAMA_MODEL";
pub(crate) const ENV_READ_TIMEOUT: &str = "READ_TIMEOUT_SECS";
pub(crate) const ENV_VERBOSE: &str = "AI_DEBUG_VERBOSE";
pub(crate) const ENV_SAFE_MODE: &str = "SAFE_MODE";

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Config {
    #[serde(default)]
    pub(crate) inference: InferenceConfig,
    #[serde(default)]
    pub(crate) shell: ShellConfig,
    #[serde(default)]
    pub(crate) analysis: FlushConfig,
    #[serde(default = "default_system_prompt_path")]
    pub(crate) system_prompt_path: PathBuf,
    /// Selects the built-in prompt variant that refuses exploit payloads.
    #[serde(default = "default_safe_mode")]
    pub(crate) safe_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inference: InferenceConfig::default(),
            shell: ShellConfig::default(),
            analysis: FlushConfig::default(),
            system_prompt_path: default_system_prompt_path(),
            safe_mode: default_safe_mode(),
        }
    }
}

impl Config {
    /// Reads `path` if it exists; a missing file means built-in defaults.
    pub(crate) fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Overlays the settings that may come from the environment.
    pub(crate) fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(host) = lookup(ENV_HOST).filter(|value| !value.trim().is_empty()) {
            self.inference.host = host.trim().to_string();
        }
        if let Some(model) = lookup(ENV_MODEL).filter(|value| !value.trim().is_empty()) {
            self.inference.model = model.trim().to_string();
        }
        if let Some(timeout) = lookup(ENV_READ_TIMEOUT) {
            self.inference.read_timeout_secs = timeout
                .trim()
                .parse()
                .with_context(|| format!("{ENV_READ_TIMEOUT} must be a whole number of seconds"))?;
        }
        if let Some(flag) = lookup(ENV_VERBOSE) {
            self.inference.verbose = parse_flag(&flag);
        }
        if let Some(flag) = lookup(ENV_SAFE_MODE) {
            // Only an explicit "off" disables it; unset or empty keeps it on.
            self.safe_mode = !matches!(flag.trim().to_ascii_lowercase().as_str(), "0" | "false");
        }
        Ok(())
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.inference.host.trim().is_empty() {
            anyhow::bail!("inference.host must not be empty");
        }
        if self.inference.model.trim().is_empty() {
            anyhow::bail!("inference.model must not be empty");
        }
        if self.inference.read_timeout_secs == 0 {
            anyhow::bail!("inference.read_timeout_secs must be greater than zero");
        }
        if self.shell.program.trim().is_empty() {
            anyhow::bail!("shell.program must not be empty");
        }
        if self.analysis.flush_chars == 0 {
            anyhow::bail!("analysis.flush_chars must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct InferenceConfig {
    #[serde(default = "default_host")]
    pub(crate) host: String,
    #[serde(default = "default_model")]
    pub(crate) model: String,
    #[serde(default = "default_read_timeout_secs")]
    pub(crate) read_timeout_secs: u64,
    #[serde(default)]
    pub(crate) verbose: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            model: default_model(),
            read_timeout_secs: default_read_timeout_secs(),
            verbose: false,
        }
    }
}

impl InferenceConfig {
    pub(crate) fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ShellConfig {
    #[serde(default = "default_shell_program")]
    pub(crate) program: String,
    #[serde(default = "default_shell_args")]
    pub(crate) args: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        let (program, args) = system_utils::process::default_shell();
        Self { program, args }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FlushConfig {
    #[serde(default = "default_flush_chars")]
    pub(crate) flush_chars: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub(crate) flush_interval_ms: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            flush_chars: default_flush_chars(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

fn default_host() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_model() -> String {
    "llama3.1".to_string()
}

fn default_read_timeout_secs() -> u64 {
    60
}

fn default_shell_program() -> String {
    system_utils::process::default_shell().0
}

fn default_shell_args() -> Vec<String> {
    system_utils::process::default_shell().1
}

fn default_flush_chars() -> usize {
    600
}

fn default_flush_interval_ms() -> u64 {
    80
}

fn default_system_prompt_path() -> PathBuf {
    PathBuf::from("prompts/system_prompt.txt")
}

fn default_safe_mode() -> bool {
    true
}
