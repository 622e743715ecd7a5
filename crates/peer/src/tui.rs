use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use netplay::HaltReason;

use crate::peer::PeerStats;
use crate::simulation::DemoState;

const LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Default)]
pub struct EventLog {
    entries: VecDeque<(LogLevel, String)>,
}

impl EventLog {
    pub fn push(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.entries.len() == LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((level, message.into()));
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message);
    }

    fn latest(&self, count: usize) -> impl Iterator<Item = &(LogLevel, String)> {
        self.entries.iter().skip(self.entries.len().saturating_sub(count))
    }
}

pub fn render(frame: &mut Frame, stats: &PeerStats, log: &EventLog) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Length(7),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], stats);
    render_states(frame, chunks[1], stats);
    render_network(frame, chunks[2], stats);
    render_log(frame, chunks[3], log);
    render_help(frame, chunks[4], " q/Esc quit  |  d send details ");
}

pub fn render_waiting(frame: &mut Frame, target: &str, log: &EventLog) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let block = Block::default()
        .title(" netplay ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    let text = Paragraph::new(format!("Waiting for opponent at {}...", target))
        .block(block)
        .style(Style::default().fg(Color::White));
    frame.render_widget(text, chunks[0]);

    render_log(frame, chunks[1], log);
    render_help(frame, chunks[2], " Esc cancel ");
}

/// Full-screen halt notice, shown until a key is pressed.
pub fn render_halt(frame: &mut Frame, reason: HaltReason) {
    let area = centered(frame.area(), 50, 5);
    let color = if reason.is_abnormal() {
        Color::Red
    } else {
        Color::Green
    };

    let block = Block::default()
        .title(format!(" Halt {} ", reason.code()))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color));

    let lines = vec![
        Line::from(Span::styled(
            reason.message(),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(Span::styled(
            "Press any key to exit",
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        )),
    ];

    let paragraph = Paragraph::new(lines)
        .block(block)
        .alignment(Alignment::Center);
    frame.render_widget(paragraph, area);
}

fn render_header(frame: &mut Frame, area: Rect, stats: &PeerStats) {
    let title = format!(" netplay - player {} vs {} ", stats.player, stats.opponent);

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Tick: {}  |  Delay: {}  |  {:?}",
        stats.tick, stats.delay, stats.state
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(paragraph, area);
}

fn state_line(label: &'static str, state: Option<&DemoState>) -> Line<'static> {
    let value = match state {
        Some(s) => format!(
            "tick {:>6}  pos ({:>3}, {:>3})  score {:>4}  buttons {:02b}",
            s.tick, s.x, s.y, s.score, s.buttons
        ),
        None => "-".to_string(),
    };
    Line::from(vec![
        Span::styled(label, Style::default().fg(Color::Gray)),
        Span::styled(value, Style::default().fg(Color::White)),
    ])
}

fn render_states(frame: &mut Frame, area: Rect, stats: &PeerStats) {
    let block = Block::default()
        .title(" States ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let lines = vec![
        state_line("Local:  ", Some(&stats.local)),
        state_line("Remote: ", stats.remote.as_ref()),
    ];

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_network(frame: &mut Frame, area: Rect, stats: &PeerStats) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let net = &stats.network_stats;
    let lines = vec![
        Line::from(vec![
            Span::styled("Packets: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} sent / {} recv", net.packets_sent, net.packets_received),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Bytes: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv",
                    format_bytes(net.bytes_sent),
                    format_bytes(net.bytes_received)
                ),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Retries: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} retransmitted / {} overflowed",
                    net.retransmissions, net.queue_overflows
                ),
                Style::default().fg(if net.queue_overflows > 0 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
        Line::from(vec![
            Span::styled("Recovery: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} rebuilt / {} requested / {} served",
                    net.reconstructions, net.resend_requests, net.resends_served
                ),
                Style::default().fg(Color::White),
            ),
        ]),
    ];

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_log(frame: &mut Frame, area: Rect, log: &EventLog) {
    let block = Block::default()
        .title(" Events ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = log
        .latest(visible)
        .map(|(level, message)| {
            let color = match level {
                LogLevel::Info => Color::White,
                LogLevel::Warn => Color::Yellow,
                LogLevel::Error => Color::Red,
            };
            Line::from(Span::styled(message.clone(), Style::default().fg(color)))
        })
        .collect();

    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, area);
}

fn render_help(frame: &mut Frame, area: Rect, keys: &str) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new(keys.to_string()).block(block).style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    );

    frame.render_widget(text, area);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
