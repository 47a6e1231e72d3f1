//! Terminal call window for the chatcall CLI

use anyhow::Result;
use chatcall_core::{CallSession, CallStatus, PartyId};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use std::{
    io::{self, Stdout},
    sync::Arc,
    time::{Duration, Instant},
};

/// How the remote party is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// ASCII avatar in the video area
    Ascii,
    /// Text summary of the remote stream
    Text,
    /// No video area
    None,
}

/// Format seconds as `mm:ss`; minutes keep growing past an hour
pub fn format_duration(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Everything one frame of the call window shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallView {
    /// Far end label
    pub party: String,
    /// `mm:ss`
    pub duration: String,
    /// Microphone muted
    pub muted: bool,
    /// Camera sending
    pub video_enabled: bool,
    /// Far end media arrived
    pub remote_stream: bool,
    /// Outgoing call still inside its ring window
    pub ringing: bool,
    /// Session still holds a call
    pub active: bool,
}

impl CallView {
    /// Build a view from a session snapshot
    pub fn from_status(status: &CallStatus<PartyId>, ringing: bool) -> Self {
        Self {
            party: status
                .remote_party
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            duration: format_duration(status.duration_secs),
            muted: status.muted,
            video_enabled: status.video_enabled,
            remote_stream: status.has_remote_stream,
            ringing: ringing && status.active && !status.has_remote_stream,
            active: status.active,
        }
    }
}

/// Whether the "calling" banner is still shown
pub fn ring_window_open(elapsed: Duration, ring_timeout: Duration) -> bool {
    elapsed < ring_timeout
}

fn draw_call_window(f: &mut Frame, view: &CallView, display_mode: DisplayMode) {
    let video_height = if display_mode == DisplayMode::None {
        Constraint::Length(0)
    } else {
        Constraint::Min(8)
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            video_height,
            Constraint::Length(3), // Status
            Constraint::Length(3), // Controls
        ])
        .split(f.size());

    draw_header(f, chunks[0], view);
    if display_mode != DisplayMode::None {
        draw_video_area(f, chunks[1], view, display_mode);
    }
    draw_status_area(f, chunks[2], view);
    draw_controls_area(f, chunks[3], view);
}

fn draw_header(f: &mut Frame, area: Rect, view: &CallView) {
    let line = if !view.active {
        Line::from(Span::styled("Call ended", Style::default().fg(Color::Red)))
    } else if view.ringing {
        Line::from(vec![
            Span::styled(
                "Calling ",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("{}…", view.party)),
        ])
    } else {
        Line::from(vec![
            Span::styled("In call with ", Style::default().fg(Color::Green)),
            Span::styled(
                view.party.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
        ])
    };

    let paragraph = Paragraph::new(line)
        .block(Block::default().title("📞 chatcall").borders(Borders::ALL))
        .alignment(Alignment::Center);
    f.render_widget(paragraph, area);
}

fn draw_video_area(f: &mut Frame, area: Rect, view: &CallView, display_mode: DisplayMode) {
    let block = Block::default()
        .title("🎥 Remote")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let content = if !view.remote_stream {
        vec![Line::from(Span::styled(
            "Waiting for remote media",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        match display_mode {
            DisplayMode::Ascii => vec![
                Line::from("   .-\"\"\"-.   "),
                Line::from("  /  o o  \\  "),
                Line::from(" |    ^    | "),
                Line::from("  \\  ---  /  "),
                Line::from("   '-----'   "),
                Line::from(view.party.clone()),
            ],
            DisplayMode::Text | DisplayMode::None => vec![Line::from(format!(
                "Receiving media from {}",
                view.party
            ))],
        }
    };

    let paragraph = Paragraph::new(content)
        .block(block)
        .alignment(Alignment::Center);
    f.render_widget(paragraph, area);
}

fn draw_status_area(f: &mut Frame, area: Rect, view: &CallView) {
    let block = Block::default().title("📊 Call").borders(Borders::ALL);

    let line = Line::from(vec![
        Span::raw(format!("Duration: {} | ", view.duration)),
        Span::styled(
            if view.muted { "Muted" } else { "Mic on" },
            Style::default().fg(if view.muted { Color::Red } else { Color::Green }),
        ),
        Span::raw(" | "),
        Span::styled(
            if view.video_enabled {
                "Camera on"
            } else {
                "Camera off"
            },
            Style::default().fg(if view.video_enabled {
                Color::Green
            } else {
                Color::Yellow
            }),
        ),
    ]);

    f.render_widget(Paragraph::new(line).block(block), area);
}

fn draw_controls_area(f: &mut Frame, area: Rect, view: &CallView) {
    let block = Block::default().title("🎮 Controls").borders(Borders::ALL);

    let controls = Line::from(vec![
        Span::styled(
            "(q/Esc)",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" Hang up | "),
        Span::styled(
            "(m)",
            Style::default().fg(if view.muted { Color::Red } else { Color::Green }),
        ),
        Span::raw(" Mute | "),
        Span::styled(
            "(v)",
            Style::default().fg(if view.video_enabled {
                Color::Green
            } else {
                Color::Yellow
            }),
        ),
        Span::raw(" Video"),
    ]);

    f.render_widget(Paragraph::new(controls).block(block), area);
}

/// Terminal UI state
pub struct TerminalUI {
    display_mode: DisplayMode,
    terminal: Terminal<CrosstermBackend<Stdout>>,
    ring_timeout: Duration,
}

impl TerminalUI {
    /// Take over the terminal
    pub fn new(display_mode: DisplayMode, ring_timeout: Duration) -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(Self {
            display_mode,
            terminal,
            ring_timeout,
        })
    }

    /// Render the call until the user hangs up or the call goes away
    pub async fn run(&mut self, session: Arc<CallSession>) -> Result<()> {
        let started = Instant::now();

        loop {
            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        match key.code {
                            KeyCode::Char('q') | KeyCode::Esc => break,
                            KeyCode::Char('m') => {
                                session.toggle_mute();
                            }
                            KeyCode::Char('v') => {
                                session.toggle_video();
                            }
                            _ => {}
                        }
                    }
                }
            }

            let view = CallView::from_status(
                &session.status(),
                ring_window_open(started.elapsed(), self.ring_timeout),
            );
            let display_mode = self.display_mode;
            self.terminal
                .draw(|f| draw_call_window(f, &view, display_mode))?;

            if !view.active {
                tokio::time::sleep(Duration::from_secs(1)).await;
                break;
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        Ok(())
    }
}

impl Drop for TerminalUI {
    fn drop(&mut self) {
        // Restore terminal state
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Display mode enum (re-exported for CLI)
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CliDisplayMode {
    /// ASCII avatar
    Ascii,
    /// Text summary
    Text,
    /// No video area
    None,
}

impl From<CliDisplayMode> for DisplayMode {
    fn from(mode: CliDisplayMode) -> Self {
        match mode {
            CliDisplayMode::Ascii => DisplayMode::Ascii,
            CliDisplayMode::Text => DisplayMode::Text,
            CliDisplayMode::None => DisplayMode::None,
        }
    }
}
