//! Terminal dashboard (A4): an optional `DashboardFacade` implementation
//! rendering a ratatui terminal UI in-process, grounded in the teacher's
//! `dashboard.rs` TUI — same raw-mode setup/teardown, same tick-rate
//! event loop — but fed directly by facade calls instead of polling an
//! HTTP API every 500ms.

use std::io;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
    Terminal,
};

use crate::dashboard::{DashboardFacade, ScatterPoint, StatusUpdate};
use crate::protocol::{BenchmarkStatus, HistoricalEntry, LiveMetrics, RunStatus};

/// Everything the render loop needs, refreshed directly by facade calls
/// rather than fetched over HTTP.
#[derive(Debug, Default, Clone)]
struct UiState {
    status: BenchmarkStatus,
    live: LiveMetrics,
    total_requests: u64,
    error_count: u64,
    log_lines: Vec<String>,
}

type SharedUiState = Arc<RwLock<UiState>>;

/// `DashboardFacade` implementation that updates `SharedUiState` in
/// place; the render loop reads it on its own tick, exactly as the
/// teacher's `run_loop` reads `SharedDashboardState` on its own tick.
pub struct TerminalDashboard {
    state: SharedUiState,
}

impl TerminalDashboard {
    pub fn new() -> Self {
        Self { state: Arc::new(RwLock::new(UiState::default())) }
    }

    /// Runs the blocking ratatui render loop. Intended to be spawned on
    /// a dedicated OS thread (`tokio::task::spawn_blocking`), mirroring
    /// the teacher's `run_dashboard`.
    pub fn run(&self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let tick_rate = Duration::from_millis(250);
        let res = run_loop(&mut terminal, tick_rate, Arc::clone(&self.state));

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
        terminal.show_cursor()?;

        res
    }
}

impl Default for TerminalDashboard {
    fn default() -> Self {
        Self::new()
    }
}

fn run_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    tick_rate: Duration,
    state: SharedUiState,
) -> Result<()>
where
    <B as Backend>::Error: std::error::Error + Send + Sync + 'static,
{
    let mut last_tick = Instant::now();

    loop {
        let snapshot = state.read().expect("ui state lock poisoned").clone();
        terminal.draw(|f| ui(f, &snapshot))?;

        let timeout = tick_rate.checked_sub(last_tick.elapsed()).unwrap_or(Duration::from_secs(0));
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                    _ => {}
                }
            }
        }
        last_tick = Instant::now();
    }
}

fn ui(f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Percentage(40), Constraint::Min(0)])
        .split(f.area());

    render_header(f, chunks[0], state);

    let metrics_table = create_metrics_table(state);
    f.render_widget(metrics_table, chunks[1]);

    let logs: Vec<ratatui::text::Line> =
        state.log_lines.iter().rev().take(20).map(|l| ratatui::text::Line::raw(l.clone())).collect();
    let logs_widget =
        Paragraph::new(logs).block(Block::default().borders(Borders::ALL).title("Logs"));
    f.render_widget(logs_widget, chunks[2]);
}

fn render_header(f: &mut ratatui::Frame, area: Rect, state: &UiState) {
    let status_style = match state.status.status {
        RunStatus::Running => Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        RunStatus::Failed => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        RunStatus::Completed => Style::default().fg(Color::Blue),
        _ => Style::default().fg(Color::Gray),
    };

    let title = format!(
        "genai-streambench | status={:?} | scenario={} | concurrency={} | requests={} errors={}",
        state.status.status,
        state.status.current_scenario.as_deref().unwrap_or("-"),
        state.status.current_concurrency.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
        state.total_requests,
        state.error_count,
    );

    let widget = Paragraph::new(title)
        .style(status_style)
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(widget, area);
}

fn create_metrics_table(state: &UiState) -> Table<'static> {
    let rows = vec![
        metric_row("ttft", &state.live.ttft),
        metric_row("output_latency", &state.live.output_latency),
        metric_row("e2e_latency", &state.live.e2e_latency),
        metric_row("input_throughput", &state.live.input_throughput),
        metric_row("output_throughput", &state.live.output_throughput),
    ];

    Table::new(
        rows,
        [
            Constraint::Length(20),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(10),
        ],
    )
    .header(Row::new(vec!["metric", "mean", "p50", "p95", "p99"]))
    .block(Block::default().borders(Borders::ALL).title("Live Metrics"))
}

fn metric_row(name: &str, stats: &crate::protocol::Stats) -> Row<'static> {
    Row::new(vec![
        Cell::from(name.to_string()),
        Cell::from(format!("{:.3}", stats.mean)),
        Cell::from(format!("{:.3}", stats.p50)),
        Cell::from(format!("{:.3}", stats.p95)),
        Cell::from(format!("{:.3}", stats.p99)),
    ])
}

impl DashboardFacade for TerminalDashboard {
    fn update_benchmark_status(&self, update: StatusUpdate) {
        let mut state = self.state.write().expect("ui state lock poisoned");
        if let Some(v) = update.status {
            state.status.status = v;
        }
        if update.current_scenario.is_some() {
            state.status.current_scenario = update.current_scenario;
        }
        if let Some(v) = update.current_iteration {
            state.status.current_iteration = v;
        }
        if update.current_concurrency.is_some() {
            state.status.current_concurrency = update.current_concurrency;
        }
        if let Some(v) = update.progress_percentage {
            state.status.progress_percentage = v;
        }
        if update.error_message.is_some() {
            state.status.error_message = update.error_message;
        }
    }

    fn update_metrics_panels(&self, live: &LiveMetrics) {
        self.state.write().expect("ui state lock poisoned").live = live.clone();
    }

    fn update_histogram_panel(&self, _ttft_samples: &[f64], _output_latency_samples: &[f64]) {}
    fn update_scatter_plot_panel(&self, _point: ScatterPoint) {}
    fn update_rps_vs_latency_plot(&self, _rps: f64, _latency: f64) {}
    fn update_iteration_rps_vs_latency(
        &self,
        _concurrency: usize,
        _live: &LiveMetrics,
        _run_time: f64,
        _total_requests: u64,
    ) {
    }
    fn update_benchmark_progress_bars(&self, progress_increment: f64) {
        let mut state = self.state.write().expect("ui state lock poisoned");
        state.status.progress_percentage += progress_increment;
    }
    fn start_run(&self, _run_time: f64, _start_time: f64, _max_requests: u64) {}

    fn handle_single_request(&self, live: &LiveMetrics, total_requests: u64, error_code: Option<i32>) {
        let mut state = self.state.write().expect("ui state lock poisoned");
        state.total_requests = total_requests;
        if error_code.is_some() {
            state.error_count += 1;
        } else {
            state.live = live.clone();
        }
    }

    fn reset_plot_metrics(&self) {
        self.state.write().expect("ui state lock poisoned").live = LiveMetrics::default();
    }
    fn reset_panels(&self) {}
    fn reset_run_tracking(&self) {
        let mut state = self.state.write().expect("ui state lock poisoned");
        state.total_requests = 0;
        state.error_count = 0;
    }

    fn add_log_message(&self, message: &str, level: &str) {
        match level {
            "ERROR" => tracing::error!("{message}"),
            "WARN" | "WARNING" => tracing::warn!("{message}"),
            _ => tracing::info!("{message}"),
        }
        let mut state = self.state.write().expect("ui state lock poisoned");
        state.log_lines.push(format!("[{level}] {message}"));
        if state.log_lines.len() > 1000 {
            state.log_lines.remove(0);
        }
    }

    fn add_historical_data(&self, _entry: HistoricalEntry) {}

    fn current_status(&self) -> BenchmarkStatus {
        self.state.read().expect("ui state lock poisoned").status.clone()
    }
}
