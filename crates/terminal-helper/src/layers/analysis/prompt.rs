use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

const SAFE_FALLBACK_PROMPT: &str = "You are a security analysis assistant. Given a command and parsed output, \
identify device types and propose SAFE next-step enumeration commands. \
Refuse exploit payloads. Return concise, actionable text.";

const OPEN_FALLBACK_PROMPT: &str = "You are a security analysis assistant. Given a command and parsed output, \
identify device types and propose next-step enumeration commands. \
Return concise, actionable text.";

fn fallback_prompt(safe_mode: bool) -> &'static str {
    if safe_mode {
        SAFE_FALLBACK_PROMPT
    } else {
        OPEN_FALLBACK_PROMPT
    }
}

/// System instruction shared by every analysis request. Read from disk the
/// first time it is needed and kept for the life of the process.
///
/// An unreadable or empty file falls back to a built-in prompt whose wording
/// depends on `safe_mode`.
pub(crate) struct SystemPrompt {
    path: PathBuf,
    safe_mode: bool,
    text: OnceLock<Arc<str>>,
}

impl SystemPrompt {
    pub(crate) fn from_file(path: impl Into<PathBuf>, safe_mode: bool) -> Self {
        Self {
            path: path.into(),
            safe_mode,
            text: OnceLock::new(),
        }
    }

    pub(crate) fn text(&self) -> Arc<str> {
        Arc::clone(
            self.text
                .get_or_init(|| read_prompt(&self.path, fallback_prompt(self.safe_mode))),
        )
    }
}

#[cfg(test)]
impl SystemPrompt {
    pub(crate) fn fixed(text: impl Into<Arc<str>>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(text.into());
        Self {
            path: PathBuf::new(),
            safe_mode: true,
            text: cell,
        }
    }
}

fn read_prompt(path: &Path, fallback: &'static str) -> Arc<str> {
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => {
            tracing::debug!(path = %path.display(), "loaded system prompt");
            Arc::from(text)
        }
        Ok(_) => {
            tracing::warn!(path = %path.display(), "system prompt file is empty, using built-in prompt");
            Arc::from(fallback)
        }
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read system prompt, using built-in prompt"
            );
            Arc::from(fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::temp_dir;

    #[test]
    fn unreadable_file_falls_back_to_builtin_prompt() {
        let dir = temp_dir("prompt-missing");
        let prompt = SystemPrompt::from_file(dir.join("nope.txt"), true);
        assert_eq!(&*prompt.text(), SAFE_FALLBACK_PROMPT);
    }

    #[test]
    fn fallback_wording_follows_safe_mode() {
        let dir = temp_dir("prompt-open");
        let path = dir.join("system_prompt.txt");
        std::fs::write(&path, "  \n").expect("write prompt");
        let open = SystemPrompt::from_file(&path, false).text();
        assert_eq!(&*open, OPEN_FALLBACK_PROMPT);
        assert!(!open.contains("Refuse exploit payloads"));
        let safe = SystemPrompt::from_file(&path, true).text();
        assert!(safe.contains("Refuse exploit payloads"));
    }

    #[test]
    fn file_is_read_once() {
        let dir = temp_dir("prompt-once");
        let path = dir.join("system_prompt.txt");
        std::fs::write(&path, "first").expect("write prompt");
        let prompt = SystemPrompt::from_file(&path, true);
        assert_eq!(&*prompt.text(), "first");
        std::fs::write(&path, "second").expect("rewrite prompt");
        assert_eq!(&*prompt.text(), "first");
    }
}
