use std::time::Duration;

use tokio::time::Instant;

use crate::config::FlushConfig;

#[derive(Debug, Clone, Copy)]
pub(crate) struct FlushPolicy {
    pub(crate) max_chars: usize,
    pub(crate) interval: Duration,
}

impl From<&FlushConfig> for FlushPolicy {
    fn from(config: &FlushConfig) -> Self {
        Self {
            max_chars: config.flush_chars,
            interval: Duration::from_millis(config.flush_interval_ms),
        }
    }
}

/// Batches analysis fragments so the display is updated at most every
/// `interval`, or sooner once `max_chars` characters are waiting.
pub(crate) struct FlushBuffer {
    policy: FlushPolicy,
    pending: String,
    pending_chars: usize,
    last_flush: Instant,
}

impl FlushBuffer {
    pub(crate) fn new(policy: FlushPolicy, now: Instant) -> Self {
        Self {
            policy,
            pending: String::new(),
            pending_chars: 0,
            last_flush: now,
        }
    }

    pub(crate) fn push(&mut self, fragment: &str, now: Instant) -> Option<String> {
        self.pending.push_str(fragment);
        self.pending_chars += fragment.chars().count();
        let elapsed = now.saturating_duration_since(self.last_flush);
        if self.pending_chars >= self.policy.max_chars || elapsed >= self.policy.interval {
            return self.take(now);
        }
        None
    }

    /// Pending text whose interval has run out.
    pub(crate) fn flush_due(&mut self, now: Instant) -> Option<String> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.take(now),
            _ => None,
        }
    }

    /// When pending text must be shown; `None` while nothing is pending.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        if self.pending.is_empty() {
            return None;
        }
        Some(self.last_flush + self.policy.interval)
    }

    pub(crate) fn finish(&mut self) -> Option<String> {
        let now = self.last_flush;
        self.take(now)
    }

    fn take(&mut self, now: Instant) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        self.last_flush = now;
        self.pending_chars = 0;
        Some(std::mem::take(&mut self.pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FlushPolicy {
        FlushPolicy {
            max_chars: 10,
            interval: Duration::from_millis(80),
        }
    }

    #[test]
    fn holds_small_fragments_inside_interval() {
        let start = Instant::now();
        let mut buffer = FlushBuffer::new(policy(), start);
        assert_eq!(buffer.push("ab", start + Duration::from_millis(5)), None);
        assert_eq!(buffer.push("cd", start + Duration::from_millis(10)), None);
        assert_eq!(buffer.deadline(), Some(start + Duration::from_millis(80)));
        assert_eq!(buffer.finish().as_deref(), Some("abcd"));
        assert_eq!(buffer.deadline(), None);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn flushes_when_size_threshold_is_reached() {
        let start = Instant::now();
        let mut buffer = FlushBuffer::new(policy(), start);
        assert_eq!(buffer.push("12345", start), None);
        assert_eq!(buffer.push("67890", start).as_deref(), Some("1234567890"));
        assert_eq!(buffer.deadline(), None);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let start = Instant::now();
        let mut buffer = FlushBuffer::new(policy(), start);
        assert_eq!(buffer.push("ééééé", start), None);
        assert_eq!(buffer.push("éééé", start), None);
        assert_eq!(buffer.push("é", start).as_deref(), Some("éééééééééé"));
    }

    #[test]
    fn flushes_on_arrival_after_interval() {
        let start = Instant::now();
        let mut buffer = FlushBuffer::new(policy(), start);
        assert_eq!(buffer.push("a", start + Duration::from_millis(10)), None);
        assert_eq!(
            buffer
                .push("b", start + Duration::from_millis(90))
                .as_deref(),
            Some("ab")
        );
        assert_eq!(buffer.push("c", start + Duration::from_millis(100)), None);
        assert_eq!(buffer.deadline(), Some(start + Duration::from_millis(170)));
    }

    #[test]
    fn timer_flush_only_after_deadline() {
        let start = Instant::now();
        let mut buffer = FlushBuffer::new(policy(), start);
        assert_eq!(buffer.flush_due(start + Duration::from_secs(1)), None);
        buffer.push("x", start + Duration::from_millis(1));
        assert_eq!(buffer.flush_due(start + Duration::from_millis(79)), None);
        assert_eq!(
            buffer
                .flush_due(start + Duration::from_millis(80))
                .as_deref(),
            Some("x")
        );
    }
}
