//! Full-screen dashboard
//!
//! Alternate screen + raw mode for the lifetime of `TuiRenderer`. Keys are
//! read by a separate task (`spawn_key_listener`) so painting never waits on
//! input.

use super::{advice, bar, temperature_level, usage_level, Level};
use crate::models::{AggregateState, HostSnapshot, HostStatus};
use crate::scheduler::Renderer;
use anyhow::{Context, Result};
use crossterm::event::{Event, EventStream, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use futures::StreamExt;
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, Wrap};
use ratatui::{Frame, Terminal};
use std::io::{self, Stdout};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const BAR_WIDTH: usize = 8;

pub struct TuiRenderer<B: Backend> {
    terminal: Terminal<B>,
    owns_screen: bool,
}

impl TuiRenderer<CrosstermBackend<Stdout>> {
    /// Switch stdout to the alternate screen in raw mode
    pub fn stdout() -> Result<Self> {
        enable_raw_mode().context("Failed to enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen).context("Failed to enter alternate screen")?;
        let mut terminal =
            Terminal::new(CrosstermBackend::new(stdout)).context("Failed to create terminal")?;
        terminal.hide_cursor().context("Failed to hide cursor")?;
        Ok(Self {
            terminal,
            owns_screen: true,
        })
    }
}

impl<B: Backend> TuiRenderer<B> {
    /// Draw on an arbitrary backend without touching the real terminal
    pub fn with_backend(backend: B) -> Result<Self> {
        Ok(Self {
            terminal: Terminal::new(backend).context("Failed to create terminal")?,
            owns_screen: false,
        })
    }

    pub fn backend(&self) -> &B {
        self.terminal.backend()
    }
}

impl<B: Backend> Renderer for TuiRenderer<B> {
    fn render(&mut self, state: &AggregateState) -> Result<()> {
        self.terminal
            .draw(|frame| draw_dashboard(frame, state))
            .context("Failed to draw dashboard")?;
        Ok(())
    }
}

impl<B: Backend> Drop for TuiRenderer<B> {
    fn drop(&mut self) {
        if !self.owns_screen {
            return;
        }
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Cancel on `q`, `Esc` or Ctrl+C (raw mode swallows SIGINT)
pub fn spawn_key_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = EventStream::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.next() => match event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        let ctrl_c = key.code == KeyCode::Char('c')
                            && key.modifiers.contains(KeyModifiers::CONTROL);
                        let quit = ctrl_c || matches!(key.code, KeyCode::Char('q') | KeyCode::Esc);
                        if quit {
                            debug!("quit requested from keyboard");
                            cancel.cancel();
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("terminal event error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    })
}

fn level_color(level: Level) -> Color {
    match level {
        Level::Low => Color::Green,
        Level::Medium => Color::Yellow,
        Level::High => Color::Red,
    }
}

pub fn draw_dashboard(frame: &mut Frame, state: &AggregateState) {
    let area = frame.area();
    let [header, body] = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .areas(area);

    let summary = Line::from(vec![
        Span::styled(
            " gpuwatch ",
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            "  {}  {}/{} hosts OK  ",
            state.read_at.format("%H:%M:%S"),
            state.count_with_status(HostStatus::Ok),
            state.len()
        )),
        Span::styled("q to quit", Style::default().fg(Color::DarkGray)),
    ]);
    frame.render_widget(Paragraph::new(summary), header);

    let pairs: Vec<&[std::sync::Arc<HostSnapshot>]> = state.hosts.chunks(2).collect();
    let mut constraints: Vec<Constraint> = pairs
        .iter()
        .map(|pair| Constraint::Length(pair.iter().map(|s| panel_height(s)).max().unwrap_or(3)))
        .collect();
    constraints.push(Constraint::Min(0));

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(body);

    for (pair, row) in pairs.iter().zip(rows.iter()) {
        let [left, right] = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Ratio(1, 2), Constraint::Ratio(1, 2)])
            .areas(*row);
        draw_host(frame, &pair[0], left);
        if let Some(second) = pair.get(1) {
            draw_host(frame, second, right);
        }
    }
}

fn panel_height(snapshot: &HostSnapshot) -> u16 {
    match snapshot.status {
        HostStatus::Connecting => 4,
        HostStatus::Timeout | HostStatus::Failed => 6,
        // borders + header row + one line per GPU
        HostStatus::Ok => 3 + snapshot.gpus.len().max(1) as u16,
    }
}

fn draw_host(frame: &mut Frame, snapshot: &HostSnapshot, area: Rect) {
    match snapshot.status {
        HostStatus::Connecting => {
            let block = panel_block(format!(" {} ", snapshot.host), Color::Cyan);
            let text = Text::from(vec![
                Line::styled(
                    "Connecting...",
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                ),
                Line::styled(
                    "Establishing secure channel...",
                    Style::default().fg(Color::DarkGray),
                ),
            ]);
            frame.render_widget(Paragraph::new(text).block(block), area);
        }
        HostStatus::Timeout | HostStatus::Failed => {
            let block = panel_block(format!(" {} ", snapshot.host), Color::Red);
            let headline = match snapshot.status {
                HostStatus::Timeout => "TIMED OUT",
                _ => "CONNECTION FAILED",
            };
            let reason = snapshot.reason.as_deref().unwrap_or("Unknown Error");
            let mut lines = vec![
                Line::styled(
                    headline,
                    Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                ),
                Line::styled(reason.to_string(), Style::default().fg(Color::White)),
            ];
            if let Some(hint) = advice(reason) {
                lines.push(Line::styled(hint, Style::default().fg(Color::DarkGray)));
            }
            let paragraph = Paragraph::new(Text::from(lines))
                .block(block)
                .wrap(Wrap { trim: true });
            frame.render_widget(paragraph, area);
        }
        HostStatus::Ok => {
            let title = format!(" {} ({}) ", snapshot.host, snapshot.taken_at.format("%H:%M:%S"));
            let block = panel_block(title, Color::Green);
            let header = Row::new(vec!["ID", "Util %", "Mem %", "Temp"])
                .style(Style::default().fg(Color::White).add_modifier(Modifier::BOLD));

            let rows = snapshot.gpus.iter().map(|gpu| {
                let util = gpu.utilization as f64;
                let mem = gpu.memory_percent();
                let temp_style = match temperature_level(gpu.temperature_c) {
                    Level::High => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                    level => Style::default().fg(level_color(level)),
                };
                Row::new(vec![
                    Cell::from(gpu.index.to_string()),
                    Cell::from(Line::from(vec![
                        Span::styled(
                            bar(util, BAR_WIDTH),
                            Style::default().fg(level_color(usage_level(util))),
                        ),
                        Span::raw(format!(" {}%", gpu.utilization)),
                    ])),
                    Cell::from(Line::from(vec![
                        Span::styled(
                            bar(mem, BAR_WIDTH),
                            Style::default().fg(level_color(usage_level(mem))),
                        ),
                        Span::raw(format!(" {}%", mem as u64)),
                    ])),
                    Cell::from(Span::styled(format!("{}°C", gpu.temperature_c), temp_style)),
                ])
            });

            let widths = [
                Constraint::Length(3),
                Constraint::Fill(1),
                Constraint::Fill(1),
                Constraint::Length(6),
            ];
            let table = Table::new(rows, widths).header(header).block(block);
            frame.render_widget(table, area);
        }
    }
}

fn panel_block(title: String, color: Color) -> Block<'static> {
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
}
