//! TUI for a checking run with progress display and pause/cancel keys

use crate::checker::{RunControl, RunEvent, RunHandle, RunPhase, RunSummary};
use crate::models::{CheckOutcome, CheckStatus, RunTally};
use anyhow::Result;
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
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Maximum number of recent outcomes kept per list for display
const MAX_RECENT_OUTCOMES: usize = 100;

const LISTS: [(CheckStatus, &str, Color); 3] = [
    (CheckStatus::Valid, "✓ Valid", Color::Green),
    (CheckStatus::Invalid, "✗ Invalid", Color::Red),
    (CheckStatus::Error, "! Errors", Color::Yellow),
];

/// Run view application state
pub struct RunApp {
    control: RunControl,
    events: mpsc::UnboundedReceiver<RunEvent>,
    task: JoinHandle<RunSummary>,
    /// Proxy setting shown in the title
    proxy_label: String,
    tally: RunTally,
    phase: RunPhase,
    /// Recent outcomes per status, newest at the back
    recent: [VecDeque<CheckOutcome>; 3],
    /// Selected list (index into `LISTS`)
    selected_list: usize,
    list_state: ListState,
    status_message: String,
    should_quit: bool,
}

impl RunApp {
    pub fn new(handle: RunHandle, proxy_label: String) -> Self {
        let (control, events, task) = handle.into_parts();
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            control,
            events,
            task,
            proxy_label,
            tally: RunTally::default(),
            phase: RunPhase::Idle,
            recent: Default::default(),
            selected_list: 0,
            list_state,
            status_message: "Starting... 'p' pause/resume, 'c' cancel, 'q' quit".to_string(),
            should_quit: false,
        }
    }

    /// Run the TUI until the user quits, then wait for the run to end
    pub async fn run(mut self) -> Result<RunSummary> {
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

        // Quitting cancels the run; the join waits for the check in flight
        self.control.cancel();
        result?;
        Ok(self.task.await?)
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

            loop {
                match self.events.try_recv() {
                    Ok(event) => self.apply(event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if !self.phase.is_finished() {
                            self.phase = RunPhase::Completed;
                        }
                        break;
                    }
                }
            }

            // Let the run task make progress between frames
            tokio::task::yield_now().await;
        }

        Ok(())
    }

    fn apply(&mut self, event: RunEvent) {
        if let Some(tally) = event.tally() {
            self.tally = *tally;
        }

        match event {
            RunEvent::Started { total, .. } => {
                self.tally = RunTally::new(total);
                self.phase = RunPhase::Running;
            }
            RunEvent::Outcome { outcome, .. } => {
                let index = LISTS
                    .iter()
                    .position(|(status, _, _)| *status == outcome.status)
                    .unwrap_or(2);
                let list = &mut self.recent[index];
                list.push_back(outcome);
                if list.len() > MAX_RECENT_OUTCOMES {
                    list.pop_front();
                }
            }
            RunEvent::Paused { .. } => self.phase = RunPhase::Paused,
            RunEvent::Resumed { .. } => self.phase = RunPhase::Running,
            RunEvent::Cancelled { .. } => self.phase = RunPhase::Cancelled,
            RunEvent::Completed { .. } => self.phase = RunPhase::Completed,
        }

        self.status_message = match self.phase {
            RunPhase::Idle | RunPhase::Running => {
                format!("Checking... {}% ({})", self.tally.percent(), self.tally)
            }
            RunPhase::Paused => format!("Paused ({}) | Press 'p' to resume", self.tally),
            RunPhase::Cancelled => format!("Cancelled! {} | Press 'q' to quit", self.tally),
            RunPhase::Completed => format!("Complete! {} | Press 'q' to quit", self.tally),
        };
    }

    fn handle_input(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.control.cancel();
                self.should_quit = true;
            }
            KeyCode::Char('p') => {
                if !self.phase.is_finished() {
                    self.control.toggle_pause();
                    self.status_message = "Pause requested, waiting for the current check...".to_string();
                }
            }
            KeyCode::Char('c') => {
                if !self.phase.is_finished() {
                    self.control.cancel();
                    self.status_message = "Cancelling after the current check...".to_string();
                }
            }
            KeyCode::Tab => {
                self.selected_list = (self.selected_list + 1) % LISTS.len();
                self.list_state.select(Some(0));
            }
            KeyCode::Down => {
                let len = self.recent[self.selected_list].len();
                let i = match self.list_state.selected() {
                    Some(i) if i + 1 < len => i + 1,
                    _ => 0,
                };
                self.list_state.select(Some(i));
            }
            KeyCode::Up => {
                let len = self.recent[self.selected_list].len();
                let i = match self.list_state.selected() {
                    Some(0) | None => len.saturating_sub(1),
                    Some(i) => i - 1,
                };
                self.list_state.select(Some(i));
            }
            _ => {}
        }
    }

    fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3), // Title
                Constraint::Length(3), // Progress bar
                Constraint::Min(0),    // Outcome lists
                Constraint::Length(3), // Status bar
            ])
            .split(f.size());

        let title = Paragraph::new(format!("NullVad Checker | Proxy: {}", self.proxy_label))
            .style(Style::default().fg(Color::Cyan))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(title, chunks[0]);

        let progress = self.tally.percent().min(100);
        let progress_label = format!(
            "{}/{} ({}%) [{}]",
            self.tally.checked(),
            self.tally.total,
            progress,
            self.phase
        );
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Progress"))
            .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
            .percent(progress)
            .label(progress_label);
        f.render_widget(gauge, chunks[1]);

        let list_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(34),
                Constraint::Percentage(33),
                Constraint::Percentage(33),
            ])
            .split(chunks[2]);

        let counts = [self.tally.valid, self.tally.invalid, self.tally.error];
        for (index, (_, title, color)) in LISTS.iter().enumerate() {
            let selected = self.selected_list == index;
            Self::render_outcome_list(
                f,
                list_chunks[index],
                title,
                &self.recent[index],
                counts[index],
                selected,
                *color,
                if selected { Some(&mut self.list_state) } else { None },
            );
        }

        let status = Paragraph::new(self.status_message.clone())
            .style(if self.phase.is_finished() {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Yellow)
            })
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(status, chunks[3]);
    }

    #[allow(clippy::too_many_arguments)]
    fn render_outcome_list(
        f: &mut Frame,
        area: Rect,
        title: &str,
        outcomes: &VecDeque<CheckOutcome>,
        total_count: usize,
        is_selected: bool,
        color: Color,
        list_state: Option<&mut ListState>,
    ) {
        let items: Vec<ListItem> = outcomes
            .iter()
            .rev() // Show newest first
            .map(|outcome| {
                ListItem::new(format!("{} {}", outcome.account, outcome.detail))
                    .style(Style::default().fg(color))
            })
            .collect();

        let block_title = format!("{} ({})", title, total_count);
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
                    .title(block_title)
                    .border_style(border_style),
            )
            .highlight_style(Style::default().bg(Color::DarkGray))
            .highlight_symbol(">> ");

        if let Some(state) = list_state {
            f.render_stateful_widget(list, area, state);
        } else {
            f.render_widget(list, area);
        }
    }
}
