use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::layers::service::orchestrator::{RunOrchestrator, SubmitOutcome};

use super::app::AppState;

/// Applies one key press. Returns `true` when the user asked to quit.
pub(crate) fn handle_key_event(
    key: KeyEvent,
    app: &mut AppState,
    orchestrator: &mut RunOrchestrator,
) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let shift = key.modifiers.contains(KeyModifiers::SHIFT);

    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') if ctrl => return true,
        KeyCode::Char('c') | KeyCode::Char('C') if ctrl => {
            orchestrator.cancel_current();
        }
        KeyCode::Enter => {
            if orchestrator.submit(&app.input) != SubmitOutcome::Busy {
                app.input.clear();
            }
            app.terminal.follow_tail();
            app.analysis.follow_tail();
        }
        KeyCode::Backspace => {
            app.input.pop();
        }
        KeyCode::Esc => app.input.clear(),
        KeyCode::PageUp if shift => app.analysis.page_up(),
        KeyCode::PageDown if shift => app.analysis.page_down(),
        KeyCode::PageUp => app.terminal.page_up(),
        KeyCode::PageDown => app.terminal.page_down(),
        KeyCode::End => {
            app.terminal.follow_tail();
            app.analysis.follow_tail();
        }
        KeyCode::Tab => app.input.push(' '),
        KeyCode::Char(ch) if !ctrl => app.input.push(ch),
        _ => {}
    }
    false
}
