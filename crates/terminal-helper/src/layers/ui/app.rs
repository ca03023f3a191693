use crate::layers::service::events::UiEvent;

use super::text::sanitize_text_for_tui;

/// Oldest text is dropped once a pane holds more than this many bytes.
pub(crate) const PANE_TEXT_LIMIT: usize = 512 * 1024;

/// Scrollable text pane that follows its tail until the user scrolls away.
#[derive(Default)]
pub(crate) struct PaneView {
    pub(crate) text: String,
    pub(crate) scroll: usize,
    pub(crate) max_scroll: usize,
    pub(crate) view_height: u16,
    detached: bool,
}

impl PaneView {
    pub(crate) fn append(&mut self, text: &str) {
        self.text.push_str(&sanitize_text_for_tui(text));
        if self.text.len() > PANE_TEXT_LIMIT {
            let mut cut = self.text.len() - PANE_TEXT_LIMIT;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.replace_range(..cut, "");
        }
    }

    pub(crate) fn clear(&mut self) {
        self.text.clear();
        self.scroll = 0;
        self.detached = false;
    }

    pub(crate) fn set_metrics(&mut self, total_lines: usize, view_height: u16) {
        let total_lines = total_lines.max(1);
        self.view_height = view_height;
        self.max_scroll = total_lines.saturating_sub(view_height as usize);
        if !self.detached || self.scroll > self.max_scroll {
            self.scroll = self.max_scroll;
        }
    }

    pub(crate) fn page_up(&mut self) {
        self.scroll = self.scroll.saturating_sub(self.page_size());
        self.detached = self.scroll < self.max_scroll;
    }

    pub(crate) fn page_down(&mut self) {
        self.scroll = (self.scroll + self.page_size()).min(self.max_scroll);
        self.detached = self.scroll < self.max_scroll;
    }

    pub(crate) fn follow_tail(&mut self) {
        self.detached = false;
        self.scroll = self.max_scroll;
    }

    fn page_size(&self) -> usize {
        let height = self.view_height.max(1) as usize;
        height.saturating_sub(1).max(1)
    }
}

#[derive(Default)]
pub(crate) struct AppState {
    pub(crate) terminal: PaneView,
    pub(crate) analysis: PaneView,
    pub(crate) input: String,
    pub(crate) model: String,
    pub(crate) busy: bool,
    pub(crate) runs: usize,
}

impl AppState {
    pub(crate) fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub(crate) fn handle_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::TerminalOutput(text) => self.terminal.append(&text),
            UiEvent::AnalysisReset => self.analysis.clear(),
            UiEvent::AnalysisAppend(text) => self.analysis.append(&text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_update_the_matching_pane() {
        let mut app = AppState::new("llama3.1");
        app.handle_event(UiEvent::TerminalOutput("\n> ls\n".to_string()));
        app.handle_event(UiEvent::AnalysisAppend("Analyzing...\n".to_string()));
        app.handle_event(UiEvent::AnalysisReset);
        app.handle_event(UiEvent::AnalysisAppend("ok".to_string()));
        assert_eq!(app.terminal.text, "\n> ls\n");
        assert_eq!(app.analysis.text, "ok");
    }

    #[test]
    fn pane_follows_tail_until_scrolled_back() {
        let mut pane = PaneView::default();
        pane.set_metrics(100, 10);
        assert_eq!(pane.scroll, 90);

        pane.page_up();
        assert_eq!(pane.scroll, 81);
        pane.set_metrics(120, 10);
        assert_eq!(pane.scroll, 81);

        for _ in 0..4 {
            pane.page_down();
        }
        assert_eq!(pane.scroll, 110);
        pane.set_metrics(130, 10);
        assert_eq!(pane.scroll, 120);

        pane.page_up();
        pane.follow_tail();
        pane.set_metrics(140, 10);
        assert_eq!(pane.scroll, 130);
    }

    #[test]
    fn pane_drops_oldest_text_past_limit() {
        let mut pane = PaneView::default();
        pane.append(&"é".repeat(PANE_TEXT_LIMIT));
        pane.append("tail");
        assert!(pane.text.len() <= PANE_TEXT_LIMIT);
        assert!(pane.text.ends_with("tail"));
    }
}
