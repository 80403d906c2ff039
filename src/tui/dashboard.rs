//! Live dashboard for a validation run

use crate::proxy::models::{CheckEvent, CheckReport, Progress};
use crate::proxy::verdict::VerdictStatus;
use crate::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::collections::VecDeque;
use std::io;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::Duration;

/// Maximum number of recent proxies kept per list
const MAX_RECENT: usize = 100;

/// One row of a dashboard list
#[derive(Debug, Clone)]
struct Row {
    text: String,
    color: Color,
}

impl Row {
    fn from_report(report: &CheckReport) -> Self {
        let color = match report.verdict().map(|v| v.status) {
            Some(VerdictStatus::Good) => Color::Green,
            Some(VerdictStatus::Slow) => Color::Yellow,
            Some(VerdictStatus::Failed) | None => Color::Red,
        };
        let detail = match report {
            CheckReport::Malformed { error, .. } => error.to_string(),
            CheckReport::Checked { verdict, .. } => verdict.diagnostic.to_string(),
        };
        Self {
            text: format!("{} | {}", report.label(), detail),
            color,
        }
    }
}

/// Dashboard state: progress plus recent passes and failures
pub struct Dashboard {
    events: mpsc::UnboundedReceiver<CheckEvent>,
    progress: Progress,
    /// Passing proxies that made it into the output file
    recent_good: VecDeque<Row>,
    /// Everything else, including slow proxies
    recent_bad: VecDeque<Row>,
    /// Malformed lines; listed with the failures but never counted as checked
    malformed: usize,
    /// Selected list (0 = good, 1 = bad)
    selected_list: usize,
    list_state: ListState,
    status_message: String,
    is_complete: bool,
    should_quit: bool,
}

impl Dashboard {
    pub fn new(events: mpsc::UnboundedReceiver<CheckEvent>, total: usize) -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            events,
            progress: Progress {
                total,
                ..Default::default()
            },
            recent_good: VecDeque::new(),
            recent_bad: VecDeque::new(),
            malformed: 0,
            selected_list: 0,
            list_state,
            status_message: "Starting proxy check... Press 'q' to quit.".to_string(),
            is_complete: false,
            should_quit: false,
        }
    }

    /// Run until the user quits. Returns whether the run had drained.
    pub async fn run(mut self) -> Result<bool> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_app(&mut terminal).await;

        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        terminal.show_cursor()?;

        result.map(|_| self.is_complete)
    }

    async fn run_app<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        loop {
            terminal.draw(|f| self.ui(f))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_input(key.code);
                        if self.should_quit {
                            break;
                        }
                    }
                }
            }

            // Drain whatever arrived since the last frame.
            loop {
                match self.events.try_recv() {
                    Ok(event) => self.apply(event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if !self.is_complete {
                            self.is_complete = true;
                            self.status_message = format!(
                                "Complete! Checked: {}/{} | Good: {} | Press 'q' to quit",
                                self.progress.checked, self.progress.total, self.progress.good
                            );
                        }
                        break;
                    }
                }
            }

            tokio::task::yield_now().await;
        }

        Ok(())
    }

    fn apply(&mut self, event: CheckEvent) {
        self.progress = event.progress;
        if matches!(event.report, CheckReport::Malformed { .. }) {
            self.malformed += 1;
        }

        let row = Row::from_report(&event.report);
        let list = if event.report.is_persisted() {
            &mut self.recent_good
        } else {
            &mut self.recent_bad
        };
        list.push_back(row);
        if list.len() > MAX_RECENT {
            list.pop_front();
        }

        self.status_message = format!(
            "Checking... {}% ({}/{}) | Good: {}",
            self.progress.percent(),
            self.progress.checked,
            self.progress.total,
            self.progress.good
        );
    }

    fn handle_input(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            KeyCode::Tab => {
                self.selected_list = (self.selected_list + 1) % 2;
                self.list_state.select(Some(0));
            }
            KeyCode::Down => {
                let len = self.selected_len();
                let i = match self.list_state.selected() {
                    Some(i) if i + 1 < len => i + 1,
                    _ => 0,
                };
                self.list_state.select(Some(i));
            }
            KeyCode::Up => {
                let len = self.selected_len();
                let i = match self.list_state.selected() {
                    Some(0) | None => len.saturating_sub(1),
                    Some(i) => i - 1,
                };
                self.list_state.select(Some(i));
            }
            _ => {}
        }
    }

    /// Rows ever routed to the failure list
    fn failed_count(&self) -> usize {
        self.progress.checked.saturating_sub(self.progress.good) + self.malformed
    }

    fn selected_len(&self) -> usize {
        if self.selected_list == 0 {
            self.recent_good.len()
        } else {
            self.recent_bad.len()
        }
    }

    fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3), // Title
                Constraint::Length(3), // Progress bar
                Constraint::Min(0),    // Proxy lists
                Constraint::Length(3), // Status bar
            ])
            .split(f.size());

        let title = Paragraph::new("Proxy Checker")
            .style(Style::default().fg(Color::Cyan))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(title, chunks[0]);

        let percent = self.progress.percent().min(100);
        let progress_label = format!(
            "{}/{} ({}%)",
            self.progress.checked, self.progress.total, percent
        );
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Progress"))
            .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
            .percent(percent)
            .label(progress_label);
        f.render_widget(gauge, chunks[1]);

        let list_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(chunks[2]);

        let bad_count = self.failed_count();

        render_list(
            f,
            list_chunks[0],
            "Good",
            &self.recent_good,
            self.progress.good,
            self.selected_list == 0,
            if self.selected_list == 0 { Some(&mut self.list_state) } else { None },
        );
        render_list(
            f,
            list_chunks[1],
            "Failed / slow",
            &self.recent_bad,
            bad_count,
            self.selected_list == 1,
            if self.selected_list == 1 { Some(&mut self.list_state) } else { None },
        );

        let status = Paragraph::new(self.status_message.clone())
            .style(if self.is_complete {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Yellow)
            })
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(status, chunks[3]);
    }
}

fn render_list(
    f: &mut Frame,
    area: Rect,
    title: &str,
    rows: &VecDeque<Row>,
    count: usize,
    is_selected: bool,
    list_state: Option<&mut ListState>,
) {
    let items: Vec<ListItem> = rows
        .iter()
        .rev() // newest first
        .map(|row| ListItem::new(row.text.clone()).style(Style::default().fg(row.color)))
        .collect();

    let border_style = if is_selected {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("{} ({})", title, count))
                .border_style(border_style),
        )
        .highlight_style(Style::default().bg(Color::DarkGray))
        .highlight_symbol(">> ");

    match list_state {
        Some(state) => f.render_stateful_widget(list, area, state),
        None => f.render_widget(list, area),
    }
}
