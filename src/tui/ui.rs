use ratatui::{
    layout::{Constraint, Flex, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Cell, Clear, Paragraph, Row, Table, TableState, Wrap},
    Frame,
};

use super::app::{Alert, App, Mode};
use crate::view::{Counters, DeviceRow, PowerLabel};

const PRIMARY: Color = Color::Rgb(0x2c, 0x3e, 0x50);
const SECONDARY: Color = Color::Rgb(0x34, 0x98, 0xdb);
const SUCCESS: Color = Color::Rgb(0x27, 0xae, 0x60);
const DANGER: Color = Color::Rgb(0xe7, 0x4c, 0x3c);
const WARNING: Color = Color::Rgb(0xf3, 0x9c, 0x12);
const MUTED: Color = Color::Rgb(0x7f, 0x8c, 0x8d);

pub fn render(frame: &mut Frame, app: &App) {
    let [header, stats, table, status, hints] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(3),
        Constraint::Min(3),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    render_header(frame, app, header);
    render_counters(frame, app.counters(), stats);
    render_devices(frame, app, table);
    frame.render_widget(
        Paragraph::new(Line::from(vec![
            Span::raw(" 📶 "),
            Span::styled(app.status.as_str(), Style::default().fg(SECONDARY)),
        ])),
        status,
    );
    render_hints(frame, app.mode, hints);

    if let Some(alert) = &app.alert {
        render_alert(frame, alert);
    }
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let title = Span::styled(
        " ⚡ Kasa Smart Home ",
        Style::default().fg(WARNING).add_modifier(Modifier::BOLD),
    );
    let input = match app.mode {
        Mode::AddDevice => vec![
            Span::styled("  Add device IP: ", Style::default().fg(SECONDARY)),
            Span::raw(app.input.as_str()),
            Span::styled("▏", Style::default().fg(SECONDARY)),
        ],
        Mode::Search => vec![
            Span::styled("  🔎 ", Style::default().fg(SECONDARY)),
            Span::raw(app.query.as_str()),
            Span::styled("▏", Style::default().fg(SECONDARY)),
        ],
        Mode::Normal if !app.query.is_empty() => vec![
            Span::styled("  🔎 ", Style::default().fg(MUTED)),
            Span::styled(app.query.as_str(), Style::default().fg(MUTED)),
        ],
        Mode::Normal => Vec::new(),
    };

    let mut spans = vec![title];
    spans.extend(input);
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_counters(frame: &mut Frame, counters: Counters, area: Rect) {
    let online = if counters.assumed {
        format!("~{}", counters.online)
    } else {
        counters.online.to_string()
    };
    let cells = [
        ("Total", counters.total.to_string(), PRIMARY),
        ("Online", online, SUCCESS),
        ("Offline", counters.offline.to_string(), DANGER),
        ("Active", counters.active.to_string(), WARNING),
    ];

    let areas = Layout::horizontal([Constraint::Ratio(1, 4); 4]).split(area);
    for ((label, value, color), area) in cells.into_iter().zip(areas.iter()) {
        let block = Block::bordered()
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(color))
            .title(Span::styled(format!(" {} ", label), Style::default().fg(color)));
        let value = Paragraph::new(Span::styled(
            value,
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ))
        .centered()
        .block(block);
        frame.render_widget(value, *area);
    }
}

fn power_style(row: &DeviceRow) -> Style {
    match row.power {
        PowerLabel::On => Style::default().fg(SUCCESS).add_modifier(Modifier::BOLD),
        PowerLabel::Off => Style::default().fg(DANGER),
        PowerLabel::Unknown => Style::default().fg(MUTED),
    }
}

fn render_devices(frame: &mut Frame, app: &App, area: Rect) {
    let rows = app.visible_rows();

    let header = Row::new(["Device", "Address", "Status", "Type"])
        .style(Style::default().fg(PRIMARY).add_modifier(Modifier::BOLD));
    let body: Vec<Row> = rows
        .iter()
        .map(|row| {
            let [device, addr, status, kind] = row.cells();
            let name_style = if row.available == Some(false) {
                Style::default().fg(MUTED).add_modifier(Modifier::CROSSED_OUT)
            } else {
                Style::default()
            };
            Row::new([
                Cell::from(device).style(name_style),
                Cell::from(addr),
                Cell::from(status).style(power_style(row)),
                Cell::from(kind).style(Style::default().fg(MUTED)),
            ])
        })
        .collect();

    let title = format!(" 📋 Devices ({}/{}) ", rows.len(), app.store.len());
    let table = Table::new(
        body,
        [
            Constraint::Min(24),
            Constraint::Length(16),
            Constraint::Length(12),
            Constraint::Length(12),
        ],
    )
    .header(header)
    .block(
        Block::bordered()
            .border_type(BorderType::Rounded)
            .title(title),
    )
    .row_highlight_style(Style::default().bg(SECONDARY).fg(Color::White))
    .highlight_symbol("▸ ");

    let mut state = TableState::default().with_selected((!rows.is_empty()).then_some(app.selected));
    frame.render_stateful_widget(table, area, &mut state);
}

fn render_hints(frame: &mut Frame, mode: Mode, area: Rect) {
    let keys: &[(&str, &str)] = match mode {
        Mode::Normal => &[
            ("d", "discover"),
            ("a", "add"),
            ("o", "all on"),
            ("f", "all off"),
            ("r", "refresh"),
            ("⏎", "toggle"),
            ("/", "search"),
            ("q", "quit"),
        ],
        Mode::Search => &[("⏎", "keep filter"), ("esc", "clear")],
        Mode::AddDevice => &[("⏎", "connect"), ("esc", "cancel")],
    };

    let mut spans = Vec::with_capacity(keys.len() * 2);
    for (key, action) in keys {
        spans.push(Span::styled(
            format!(" {} ", key),
            Style::default().fg(WARNING).add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::styled(format!("{} ", action), Style::default().fg(MUTED)));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_alert(frame: &mut Frame, alert: &Alert) {
    let [area] = Layout::horizontal([Constraint::Percentage(60)])
        .flex(Flex::Center)
        .areas(frame.area());
    let [area] = Layout::vertical([Constraint::Length(7)])
        .flex(Flex::Center)
        .areas(area);

    let popup = Paragraph::new(alert.message.as_str())
        .wrap(Wrap { trim: true })
        .block(
            Block::bordered()
                .border_type(BorderType::Double)
                .border_style(Style::default().fg(DANGER))
                .title(format!(" {} ", alert.title))
                .title_bottom(Line::from(" enter to dismiss ").right_aligned()),
        );

    frame.render_widget(Clear, area);
    frame.render_widget(popup, area);
}
