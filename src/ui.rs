//! Terminal UI rendering.
//!
//! All drawing logic lives here, separated from application state ([`App`])
//! and input handling ([`crate::input`]).
//!
//! ## Layout
//!
//! ```text
//! ┌ Live Buses ────────────────┐┌ Details ─────┐
//! │ ▸ GW-104  -19.45500 ...     ││ Bus: GW-104  │
//! │   GW-221  -19.46012 ...     ││ Status: ...  │
//! └────────────────────────────┘└──────────────┘
//!  ● Live  <notice>  Updated: 08:00:05  12 buses  q: quit ...
//! ```

use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};

use crate::app::App;
use crate::feed::{ConnectionState, Severity};
use crate::source::VehiclePosition;

/// Draw the complete UI for one frame.
pub fn draw(app: &mut App, frame: &mut Frame) {
    let [main_area, status_area] = Layout::vertical([
        Constraint::Min(1),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    let [list_area, detail_area] = Layout::horizontal([
        Constraint::Min(40),
        Constraint::Length(36),
    ])
    .areas(main_area);

    draw_bus_list(app, frame, list_area);
    draw_details(app, frame, detail_area);
    draw_status_bar(app, frame, status_area);
}

/// Render the scrollable list of buses.
fn draw_bus_list(app: &mut App, frame: &mut Frame, area: Rect) {
    let list_items: Vec<ListItem> = app
        .positions
        .iter()
        .map(|bus| {
            let line = Line::from(vec![
                Span::styled(
                    format!("{:<10}", bus.label()),
                    Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
                ),
                Span::raw(" "),
                Span::styled(
                    format!("{:>10.5} {:>10.5}", bus.latitude, bus.longitude),
                    Style::default().fg(Color::Cyan),
                ),
                Span::raw("  "),
                Span::styled(
                    format!("{:>6.1} km/h", bus.speed),
                    Style::default().fg(Color::Green),
                ),
                Span::raw("  "),
                Span::styled(
                    bus.last_updated.format("%H:%M:%S").to_string(),
                    Style::default().fg(Color::DarkGray),
                ),
            ]);

            ListItem::new(line)
        })
        .collect();

    let (lat, lng) = app.map_center();
    let title = format!(" Live Buses · centre {lat:.3}, {lng:.3} ");

    let list = List::new(list_items)
        .block(Block::default().title(title).borders(Borders::ALL))
        .highlight_style(
            Style::default()
                .add_modifier(Modifier::BOLD)
                .bg(Color::DarkGray),
        )
        .highlight_symbol("▸ ");

    frame.render_stateful_widget(list, area, &mut app.list_state);
}

/// Render the info panel for the selected bus.
fn draw_details(app: &App, frame: &mut Frame, area: Rect) {
    let lines = match app.selected() {
        Some(bus) => detail_lines(bus),
        None => vec![Line::styled(
            "Select a bus with ↑/↓",
            Style::default().fg(Color::DarkGray),
        )],
    };

    let details = Paragraph::new(lines)
        .block(Block::default().title(" Details ").borders(Borders::ALL));
    frame.render_widget(details, area);
}

fn detail_lines(bus: &VehiclePosition) -> Vec<Line<'_>> {
    let field = |name: &'static str, value: String| {
        Line::from(vec![
            Span::styled(format!("{name:<13}"), Style::default().fg(Color::DarkGray)),
            Span::raw(value),
        ])
    };

    let speed = if bus.speed > 0.0 {
        format!("{} km/h", bus.speed)
    } else {
        "N/A".to_string()
    };

    vec![
        field("Bus:", bus.bus_number.clone().unwrap_or_else(|| "N/A".into())),
        field("Status:", bus.status.clone().unwrap_or_else(|| "In Transit".into())),
        field("Speed:", speed),
        field(
            "Heading:",
            bus.heading.map_or_else(|| "N/A".into(), |h| format!("{h:.0}°")),
        ),
        field("Position:", format!("{:.5}, {:.5}", bus.latitude, bus.longitude)),
        field("Last Update:", bus.last_updated.format("%H:%M:%S").to_string()),
    ]
}

/// The connection indicator shown at the left of the status bar.
fn connection_indicator(state: ConnectionState) -> Span<'static> {
    match state {
        ConnectionState::Online => Span::styled("● Live", Style::default().fg(Color::Green)),
        ConnectionState::Connecting => {
            Span::styled("◌ Connecting...", Style::default().fg(Color::Yellow))
        }
        ConnectionState::Offline => Span::styled("✕ Offline", Style::default().fg(Color::Red)),
        ConnectionState::Error => Span::styled("! Error", Style::default().fg(Color::LightRed)),
    }
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Info => Color::Cyan,
        Severity::Warning => Color::Yellow,
        Severity::Error => Color::Red,
    }
}

/// Render the bottom status bar.
fn draw_status_bar(app: &App, frame: &mut Frame, area: Rect) {
    let mut spans = vec![Span::raw(" "), connection_indicator(app.connection), Span::raw("  ")];

    if app.retry_attempt > 0 {
        spans.push(Span::styled(
            format!("retry #{}", app.retry_attempt),
            Style::default().fg(Color::Yellow),
        ));
        spans.push(Span::raw("  "));
    }

    if let Some((message, severity)) = &app.notice {
        spans.push(Span::styled(
            message.as_str(),
            Style::default().fg(severity_color(*severity)),
        ));
        spans.push(Span::raw("  "));
    }

    if let Some(at) = app.last_updated {
        spans.push(Span::styled(
            format!("Updated: {}", at.with_timezone(&chrono::Local).format("%H:%M:%S")),
            Style::default().fg(Color::DarkGray),
        ));
        spans.push(Span::raw("  "));
    }

    spans.push(Span::styled(
        format!("{} buses", app.positions.len()),
        Style::default().fg(Color::Green),
    ));
    spans.push(Span::raw("  q: quit  ↑/↓: select  r: refresh  o: link"));

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
