use ratatui::layout::{Constraint, Direction, Layout, Position, Rect};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Clear, Paragraph};

use super::app::{AppState, PaneView};
use super::text::wrap_text_lines;
use super::theme::{Theme, ValueStyle};

const INPUT_PROMPT: &str = "> ";

pub(crate) fn draw_ui(frame: &mut ratatui::Frame, app: &mut AppState) {
    let theme = Theme::dark();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(6), Constraint::Length(3)])
        .split(frame.area());

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[0]);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)])
        .split(body[0]);

    draw_pane(frame, &theme, "Terminal", &mut app.terminal, left[0]);
    draw_input(frame, &theme, &app.input, left[1]);
    draw_pane(frame, &theme, "AI Analysis", &mut app.analysis, body[1]);

    let state = if app.busy { "running" } else { "idle" };
    let status_line = Line::from(vec![
        Span::styled("Model: ", theme.key_style()),
        Span::styled(app.model.as_str(), theme.value_style(ValueStyle::Important)),
        Span::styled("  State: ", theme.key_style()),
        Span::styled(state, theme.run_state_style(app.busy)),
        Span::styled("  Runs: ", theme.key_style()),
        Span::styled(app.runs.to_string(), theme.value_style(ValueStyle::Normal)),
        Span::styled(
            "   Enter=run  Ctrl+C=cancel  PgUp/PgDn=scroll  Shift+PgUp/PgDn=analysis  End=follow  Ctrl+Q=quit",
            theme.help_style(),
        ),
    ]);
    let status = Paragraph::new(status_line).block(theme.block("Status"));
    frame.render_widget(status, chunks[1]);
}

fn draw_pane(frame: &mut ratatui::Frame, theme: &Theme, title: &str, pane: &mut PaneView, area: Rect) {
    let block = theme.block(title);
    let inner = block.inner(area);
    let wrapped = wrap_text_lines(&pane.text, inner.width.max(1) as usize);
    pane.set_metrics(wrapped.len(), inner.height);
    let visible = wrapped
        .iter()
        .skip(pane.scroll)
        .take(inner.height as usize)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    let widget = Paragraph::new(visible)
        .block(block)
        .style(theme.value_style(ValueStyle::Normal));
    frame.render_widget(Clear, area);
    frame.render_widget(widget, area);
}

fn draw_input(frame: &mut ratatui::Frame, theme: &Theme, input: &str, area: Rect) {
    let block = theme.block("Command");
    let inner = block.inner(area);
    let prompt_width = INPUT_PROMPT.chars().count();
    let available = (inner.width as usize).saturating_sub(prompt_width + 1);
    let count = input.chars().count();
    let shown: String = input.chars().skip(count.saturating_sub(available)).collect();
    let cursor_offset = (prompt_width + shown.chars().count()) as u16;

    let line = Line::from(vec![
        Span::styled(INPUT_PROMPT, theme.prompt_style()),
        Span::styled(shown, theme.value_style(ValueStyle::Normal)),
    ]);
    frame.render_widget(Paragraph::new(line).block(block), area);
    if inner.width > 0 && inner.height > 0 {
        frame.set_cursor_position(Position::new(
            inner.x + cursor_offset.min(inner.width - 1),
            inner.y,
        ));
    }
}
