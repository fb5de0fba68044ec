use std::sync::Arc;

use chrono::{DateTime, Utc};
use ratatui::widgets::ListState;

use crate::feed::{ConnectionState, FeedEvent, Severity};
use crate::source::VehiclePosition;

/// Map centre used before any bus has reported (Gweru, Zimbabwe).
pub const DEFAULT_CENTER: (f64, f64) = (-19.455, 29.817);

pub struct App {
    /// Latest validated positions, in server order.
    pub positions: Arc<[VehiclePosition]>,
    /// Connection indicator.
    pub connection: ConnectionState,
    /// Time of the last successful fetch.
    pub last_updated: Option<DateTime<Utc>>,
    /// Attempt number of the running cycle, 0 when not retrying.
    pub retry_attempt: u32,
    /// Most recent transient notice.
    pub notice: Option<(String, Severity)>,
    /// List selection state for scrolling.
    pub list_state: ListState,
    /// Whether the host reports the network link as up (toggled with `o`).
    pub link_up: bool,
    /// Whether the user has requested to quit.
    pub quit: bool,
    /// Id of the selected bus, kept across refreshes.
    selected_id: Option<String>,
}

impl App {
    pub fn new() -> Self {
        Self {
            positions: Arc::from(Vec::new()),
            connection: ConnectionState::Connecting,
            last_updated: None,
            retry_attempt: 0,
            notice: None,
            list_state: ListState::default(),
            link_up: true,
            quit: false,
            selected_id: None,
        }
    }

    /// Fold one feed event into the view state.
    pub fn apply(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::ConnectionState(state) => self.connection = state,
            FeedEvent::Positions { positions, at } => {
                self.positions = positions;
                self.last_updated = Some(at);
                self.reselect();
            }
            FeedEvent::Notice { message, severity } => self.notice = Some((message, severity)),
        }
    }

    /// Show a notice that did not come from the feed.
    pub fn set_notice(&mut self, message: impl Into<String>, severity: Severity) {
        self.notice = Some((message.into(), severity));
    }

    pub fn selected(&self) -> Option<&VehiclePosition> {
        self.list_state.selected().and_then(|i| self.positions.get(i))
    }

    /// Where a map view should be centred: the selected bus, else the first
    /// bus, else the default centre.
    pub fn map_center(&self) -> (f64, f64) {
        self.selected()
            .or_else(|| self.positions.first())
            .map_or(DEFAULT_CENTER, |p| (p.latitude, p.longitude))
    }

    /// Keep the same bus selected after the set was replaced.  The selection
    /// is cleared when that bus is no longer reported.
    fn reselect(&mut self) {
        let index = self
            .selected_id
            .as_ref()
            .and_then(|id| self.positions.iter().position(|p| &p.id == id));
        if index.is_none() {
            self.selected_id = None;
        }
        self.list_state.select(index);
    }

    fn select(&mut self, index: usize) {
        self.selected_id = self.positions.get(index).map(|p| p.id.clone());
        self.list_state.select(Some(index));
    }

    // -- navigation ----------------------------------------------------------

    pub fn select_next(&mut self) {
        if self.positions.is_empty() {
            return;
        }
        let i = match self.list_state.selected() {
            Some(i) => (i + 1).min(self.positions.len() - 1),
            None => 0,
        };
        self.select(i);
    }

    pub fn select_previous(&mut self) {
        if self.positions.is_empty() {
            return;
        }
        let i = match self.list_state.selected() {
            Some(i) => i.saturating_sub(1),
            None => 0,
        };
        self.select(i);
    }

    pub fn select_first(&mut self) {
        if !self.positions.is_empty() {
            self.select(0);
        }
    }

    pub fn select_last(&mut self) {
        if !self.positions.is_empty() {
            self.select(self.positions.len() - 1);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected_id = None;
        self.list_state.select(None);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn make_position(id: &str, lat: f64, lng: f64) -> VehiclePosition {
        VehiclePosition {
            id: id.to_string(),
            latitude: lat,
            longitude: lng,
            speed: 0.0,
            heading: None,
            last_updated: Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
            bus_number: Some(format!("GW-{id}")),
            status: None,
        }
    }

    pub(crate) fn positions_event(ids: &[&str]) -> FeedEvent {
        let positions: Vec<VehiclePosition> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| make_position(id, -19.0 - i as f64, 29.0 + i as f64))
            .collect();
        FeedEvent::Positions {
            positions: positions.into(),
            at: Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 5).unwrap(),
        }
    }

    // -- construction --------------------------------------------------------

    #[test]
    fn new_app_starts_empty_and_connecting() {
        let app = App::new();
        assert!(app.positions.is_empty());
        assert_eq!(app.connection, ConnectionState::Connecting);
        assert!(app.link_up);
        assert!(!app.quit);
        assert!(app.list_state.selected().is_none());
        assert_eq!(app.map_center(), DEFAULT_CENTER);
    }

    // -- apply ---------------------------------------------------------------

    #[test]
    fn apply_replaces_positions_and_timestamp() {
        let mut app = App::new();
        app.apply(positions_event(&["1", "2", "3"]));
        app.apply(positions_event(&["4"]));

        assert_eq!(app.positions.len(), 1);
        assert_eq!(app.positions[0].id, "4");
        assert!(app.last_updated.is_some());
    }

    #[test]
    fn apply_tracks_state_and_notices() {
        let mut app = App::new();
        app.apply(FeedEvent::ConnectionState(ConnectionState::Offline));
        app.apply(FeedEvent::Notice {
            message: "You are currently offline. Reconnecting...".into(),
            severity: Severity::Warning,
        });

        assert_eq!(app.connection, ConnectionState::Offline);
        assert_eq!(
            app.notice,
            Some(("You are currently offline. Reconnecting...".to_string(), Severity::Warning))
        );
    }

    #[test]
    fn selection_follows_bus_across_refresh() {
        let mut app = App::new();
        app.apply(positions_event(&["a", "b", "c"]));
        app.select_last();
        assert_eq!(app.selected().unwrap().id, "c");

        app.apply(positions_event(&["c", "a"]));
        assert_eq!(app.list_state.selected(), Some(0));
        assert_eq!(app.selected().unwrap().id, "c");
    }

    #[test]
    fn selection_clears_when_bus_disappears() {
        let mut app = App::new();
        app.apply(positions_event(&["a", "b"]));
        app.select_last();

        app.apply(positions_event(&["a"]));
        assert!(app.selected().is_none());

        // Does not jump back to "b" if it reappears.
        app.apply(positions_event(&["a", "b"]));
        assert!(app.selected().is_none());
    }

    #[test]
    fn map_center_prefers_selected_then_first() {
        let mut app = App::new();
        app.apply(positions_event(&["a", "b"]));
        assert_eq!(app.map_center(), (-19.0, 29.0));

        app.select_last();
        assert_eq!(app.map_center(), (-20.0, 30.0));
    }

    // -- navigation ----------------------------------------------------------

    #[test]
    fn navigation_on_empty_is_noop() {
        let mut app = App::new();
        app.select_next();
        app.select_previous();
        app.select_first();
        app.select_last();
        assert!(app.list_state.selected().is_none());
    }

    #[test]
    fn select_next_starts_at_zero_then_advances_and_clamps() {
        let mut app = App::new();
        app.apply(positions_event(&["a", "b", "c"]));

        app.select_next();
        assert_eq!(app.list_state.selected(), Some(0));
        app.select_next();
        app.select_next();
        app.select_next();
        assert_eq!(app.list_state.selected(), Some(2));
    }

    #[test]
    fn select_previous_clamps_at_zero() {
        let mut app = App::new();
        app.apply(positions_event(&["a", "b", "c"]));

        app.select_last();
        app.select_previous();
        assert_eq!(app.list_state.selected(), Some(1));
        app.select_previous();
        app.select_previous();
        assert_eq!(app.list_state.selected(), Some(0));
    }

    #[test]
    fn clear_selection_resets() {
        let mut app = App::new();
        app.apply(positions_event(&["a"]));
        app.select_first();
        app.clear_selection();
        assert!(app.selected().is_none());
    }
}
