//! Keyboard input handling.
//!
//! Navigation keys mutate [`App`] directly.  Keys that need the feed or the
//! connectivity monitor are returned as an [`Action`] for the main loop to
//! carry out.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind};

use crate::app::App;

/// Work the main loop must do in response to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Ask the feed for an out-of-band refresh.
    Refresh,
    /// Flip the reported network link and signal the change.
    ToggleLink,
}

/// Process a single key event, updating app state accordingly.
///
/// Only reacts to key-press events (ignoring release / repeat) so that each
/// physical keypress triggers exactly one action.
pub fn handle_key_event(app: &mut App, key: KeyEvent) -> Option<Action> {
    if key.kind != KeyEventKind::Press {
        return None;
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => app.quit = true,
        KeyCode::Down | KeyCode::Char('j') => app.select_next(),
        KeyCode::Up | KeyCode::Char('k') => app.select_previous(),
        KeyCode::Home | KeyCode::Char('g') => app.select_first(),
        KeyCode::End | KeyCode::Char('G') => app.select_last(),
        KeyCode::Backspace => app.clear_selection(),
        KeyCode::Char('r') => return Some(Action::Refresh),
        KeyCode::Char('o') => return Some(Action::ToggleLink),
        _ => {}
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tests::positions_event;
    use crossterm::event::{KeyEventState, KeyModifiers};

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn quit_keys() {
        let mut app = App::new();
        assert_eq!(handle_key_event(&mut app, press(KeyCode::Char('q'))), None);
        assert!(app.quit);

        let mut app = App::new();
        handle_key_event(&mut app, press(KeyCode::Esc));
        assert!(app.quit);
    }

    #[test]
    fn action_keys() {
        let mut app = App::new();
        assert_eq!(handle_key_event(&mut app, press(KeyCode::Char('r'))), Some(Action::Refresh));
        assert_eq!(handle_key_event(&mut app, press(KeyCode::Char('o'))), Some(Action::ToggleLink));
        assert!(!app.quit);
    }

    #[test]
    fn navigation_keys_move_selection() {
        let mut app = App::new();
        app.apply(positions_event(&["a", "b", "c"]));

        handle_key_event(&mut app, press(KeyCode::Char('j')));
        assert_eq!(app.list_state.selected(), Some(0));
        handle_key_event(&mut app, press(KeyCode::End));
        assert_eq!(app.list_state.selected(), Some(2));
        handle_key_event(&mut app, press(KeyCode::Up));
        assert_eq!(app.list_state.selected(), Some(1));
        handle_key_event(&mut app, press(KeyCode::Backspace));
        assert_eq!(app.list_state.selected(), None);
    }

    #[test]
    fn release_events_are_ignored() {
        let mut app = App::new();
        let release = KeyEvent {
            code: KeyCode::Char('q'),
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Release,
            state: KeyEventState::NONE,
        };
        assert_eq!(handle_key_event(&mut app, release), None);
        assert!(!app.quit);
    }
}
