/// Signal Screener TUI
///
/// Live EMA crossover table for the watchlist. Periodic full snapshots and
/// push updates are merged by the shared reconciler; crossover alerts are
/// listed until they expire.
use std::{error::Error, fs::OpenOptions, io, path::Path, sync::Arc, time::Duration};

use chrono::{DateTime, Local, Utc};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, Wrap},
    Frame, Terminal,
};
use rustls::crypto::ring::default_provider;
use signal_screener::{
    shared::watchlist::{fetch_watchlist, parse_symbol, request_add, request_remove},
    ConnectionHandle, ConnectionManager, ConnectionState,
    CrossoverKind, CrossoverRecord, Dashboard, EncodingStrategy, HttpScreenerApi, Rgb,
    ScreenerApi, ScreenerConfig, ScreenerError, ScreenerSnapshot, Sequence, SettingsManager,
    SignalState, SnapshotRequest, Symbol, Timeframe, TrendStatus, WatchlistReply,
};
use tokio::sync::mpsc;
use tracing::info;

/// Results of network calls made off the event loop
enum AppEvent {
    Snapshot {
        sequence: Sequence,
        result: Result<ScreenerSnapshot, ScreenerError>,
    },
    Watchlist(WatchlistReply),
    Catalogue(Result<Vec<Symbol>, ScreenerError>),
    History {
        symbol: Symbol,
        timeframe: Timeframe,
        result: Result<Vec<CrossoverRecord>, ScreenerError>,
    },
}

enum InputMode {
    Normal,
    AddSymbol { input: String },
}

struct HistoryView {
    symbol: Symbol,
    timeframe: Timeframe,
    records: Vec<CrossoverRecord>,
}

struct App {
    dashboard: Dashboard,
    api: Arc<dyn ScreenerApi>,
    events: mpsc::UnboundedSender<AppEvent>,
    mode: InputMode,
    selected_row: usize,
    selected_column: usize,
    history: Option<HistoryView>,
    last_refresh: Option<DateTime<Utc>>,
}

impl App {
    fn spawn_snapshot(&self, request: Option<SnapshotRequest>) {
        let Some(request) = request else {
            return;
        };
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = request.fetch(api.as_ref()).await;
            let _ = events.send(AppEvent::Snapshot {
                sequence: request.sequence,
                result,
            });
        });
    }

    fn refresh(&mut self) {
        let request = self.dashboard.begin_snapshot();
        self.spawn_snapshot(request);
    }

    fn spawn_watchlist_refresh(&self) {
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        tokio::spawn(async move {
            let _ = events.send(AppEvent::Watchlist(fetch_watchlist(api.as_ref()).await));
        });
    }

    fn spawn_add(&self, symbol: Symbol) {
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        tokio::spawn(async move {
            let _ = events.send(AppEvent::Watchlist(request_add(api.as_ref(), &symbol).await));
        });
    }

    fn spawn_remove(&self, symbol: Symbol) {
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        tokio::spawn(async move {
            let _ = events.send(AppEvent::Watchlist(request_remove(api.as_ref(), &symbol).await));
        });
    }

    fn spawn_catalogue(&self) {
        if self
            .dashboard
            .watchlist_controller()
            .catalogue_is_fresh(tokio::time::Instant::now())
        {
            return;
        }
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        tokio::spawn(async move {
            let _ = events.send(AppEvent::Catalogue(api.all_symbols().await));
        });
    }

    fn spawn_history(&self, symbol: Symbol, timeframe: Timeframe) {
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = api.historical_crossovers(&symbol, timeframe).await;
            let _ = events.send(AppEvent::History {
                symbol,
                timeframe,
                result,
            });
        });
    }

    fn handle_app_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Snapshot { sequence, result } => {
                if self.dashboard.finish_snapshot(sequence, result).is_some() {
                    self.last_refresh = Some(Utc::now());
                }
            }
            AppEvent::Watchlist(reply) => {
                if self.dashboard.finish_watchlist(reply) {
                    self.clamp_selection();
                    self.refresh();
                }
            }
            AppEvent::Catalogue(Ok(symbols)) => {
                self.dashboard
                    .watchlist_controller_mut()
                    .set_catalogue(symbols, tokio::time::Instant::now());
            }
            AppEvent::History {
                symbol,
                timeframe,
                result: Ok(records),
            } => {
                self.history = Some(HistoryView {
                    symbol,
                    timeframe,
                    records,
                });
            }
            AppEvent::Catalogue(Err(error))
            | AppEvent::History {
                result: Err(error), ..
            } => self.dashboard.report(error),
        }
    }

    fn handle_connection(&mut self, state: ConnectionState) {
        let reconnected =
            state == ConnectionState::Connected && self.dashboard.connection() != state;
        self.dashboard.set_connection(state);
        if reconnected {
            // pushes missed while disconnected are recovered by a full snapshot
            self.refresh();
        }
    }

    fn selected_symbol(&self) -> Option<Symbol> {
        self.dashboard.watchlist().get(self.selected_row).cloned()
    }

    fn clamp_selection(&mut self) {
        let rows = self.dashboard.watchlist().len();
        self.selected_row = self.selected_row.min(rows.saturating_sub(1));
        let columns = self.dashboard.settings().visible().len();
        self.selected_column = self.selected_column.min(columns.saturating_sub(1));
    }

    fn apply_settings(&mut self, candidate: signal_screener::Settings) {
        let request = self.dashboard.update_settings(candidate);
        self.history = None;
        self.clamp_selection();
        self.spawn_snapshot(request);
    }

    /// Returns false when the user asked to quit
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return true;
        }

        if let InputMode::AddSymbol { input } = &mut self.mode {
            match key.code {
                KeyCode::Esc => self.mode = InputMode::Normal,
                KeyCode::Backspace => {
                    input.pop();
                }
                KeyCode::Tab => {
                    let suggestion = self
                        .dashboard
                        .watchlist_controller()
                        .suggest(input)
                        .into_iter()
                        .next();
                    if let Some(symbol) = suggestion {
                        *input = symbol.to_string();
                    }
                }
                KeyCode::Enter => {
                    let raw = std::mem::take(input);
                    self.mode = InputMode::Normal;
                    match parse_symbol(&raw) {
                        Ok(symbol) => self.spawn_add(symbol),
                        Err(error) => self.dashboard.report(error),
                    }
                }
                KeyCode::Char(c) => input.push(c),
                _ => {}
            }
            return true;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Char('r') => self.refresh(),
            KeyCode::Char('e') => {
                let strategy = self.dashboard.toggle_encoding();
                info!(?strategy, "encoding strategy switched");
            }
            KeyCode::Char('a') => {
                self.mode = InputMode::AddSymbol {
                    input: String::new(),
                };
                self.spawn_catalogue();
            }
            KeyCode::Char('x') => {
                if let Some(symbol) = self.selected_symbol() {
                    self.dashboard.begin_remove(&symbol);
                    self.clamp_selection();
                    if self
                        .history
                        .as_ref()
                        .is_some_and(|h| h.symbol == symbol)
                    {
                        self.history = None;
                    }
                    self.spawn_remove(symbol);
                }
            }
            KeyCode::Up => self.selected_row = self.selected_row.saturating_sub(1),
            KeyCode::Down => {
                self.selected_row += 1;
                self.clamp_selection();
            }
            KeyCode::Left => self.selected_column = self.selected_column.saturating_sub(1),
            KeyCode::Right => {
                self.selected_column += 1;
                self.clamp_selection();
            }
            KeyCode::Char('h') => {
                let timeframe = self
                    .dashboard
                    .settings()
                    .visible()
                    .get(self.selected_column)
                    .copied();
                if let (Some(symbol), Some(timeframe)) = (self.selected_symbol(), timeframe) {
                    self.spawn_history(symbol, timeframe);
                }
            }
            KeyCode::Char('[') => {
                let candidate = self.dashboard.settings_manager().with_short_period(-1);
                self.apply_settings(candidate);
            }
            KeyCode::Char(']') => {
                let candidate = self.dashboard.settings_manager().with_short_period(1);
                self.apply_settings(candidate);
            }
            KeyCode::Char('{') => {
                let candidate = self.dashboard.settings_manager().with_long_period(-1);
                self.apply_settings(candidate);
            }
            KeyCode::Char('}') => {
                let candidate = self.dashboard.settings_manager().with_long_period(1);
                self.apply_settings(candidate);
            }
            KeyCode::Char(c @ '1'..='5') => {
                let index = c as usize - '1' as usize;
                let candidate = self
                    .dashboard
                    .settings_manager()
                    .with_timeframe_toggled(Timeframe::ALL[index]);
                self.apply_settings(candidate);
            }
            _ => {}
        }
        true
    }
}

/// Log to a file; the terminal belongs to the TUI
fn init_logging(path: &Path) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init(),
        Err(_) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .init(),
    }
}

/// Forward key presses from a blocking reader thread
fn spawn_input_reader(keys: mpsc::UnboundedSender<KeyEvent>) {
    tokio::task::spawn_blocking(move || loop {
        if keys.is_closed() {
            break;
        }
        match event::poll(Duration::from_millis(250)) {
            Ok(true) => {
                if let Ok(Event::Key(key)) = event::read() {
                    if keys.send(key).is_err() {
                        break;
                    }
                }
            }
            Ok(false) => {}
            Err(_) => break,
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = default_provider().install_default();

    let config = ScreenerConfig::from_env();
    init_logging(&config.log_path);
    info!(api = %config.api_base_url, ws = %config.connection.url, "starting signal screener");

    let api: Arc<dyn ScreenerApi> = Arc::new(HttpScreenerApi::new(&config.api_base_url)?);
    let settings = SettingsManager::load(&config.settings_path);

    // Setup panic hook to restore terminal on crash
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (push_rx, status_rx, connection) =
        ConnectionManager::with_config(config.connection.clone()).start();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (keys_tx, keys_rx) = mpsc::unbounded_channel();
    spawn_input_reader(keys_tx);

    let mut app = App {
        dashboard: Dashboard::new(settings),
        api,
        events: events_tx,
        mode: InputMode::Normal,
        selected_row: 0,
        selected_column: 0,
        history: None,
        last_refresh: None,
    };
    app.spawn_watchlist_refresh();

    let result = run(
        &mut terminal,
        &mut app,
        config.refresh_interval,
        push_rx,
        status_rx,
        events_rx,
        keys_rx,
    )
    .await;

    teardown(&connection);
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    info!("signal screener stopped");
    result
}

fn teardown(connection: &ConnectionHandle) {
    // cancels any pending reconnect
    connection.shutdown();
}

async fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    refresh_interval: Duration,
    mut push_rx: mpsc::Receiver<signal_screener::PushMessage>,
    mut status_rx: mpsc::UnboundedReceiver<ConnectionState>,
    mut events_rx: mpsc::UnboundedReceiver<AppEvent>,
    mut keys_rx: mpsc::UnboundedReceiver<KeyEvent>,
) -> Result<(), Box<dyn Error>> {
    let mut refresh = tokio::time::interval(refresh_interval);
    // first snapshot is requested once the watchlist arrives
    refresh.reset();
    let mut redraw = tokio::time::interval(Duration::from_millis(250));

    loop {
        terminal.draw(|f| render_ui(f, app))?;

        tokio::select! {
            _ = refresh.tick() => app.refresh(),
            Some(message) = push_rx.recv() => app.dashboard.handle_push(message, Utc::now()),
            Some(state) = status_rx.recv() => app.handle_connection(state),
            Some(event) = events_rx.recv() => app.handle_app_event(event),
            Some(key) = keys_rx.recv() => {
                if !app.handle_key(key) {
                    break;
                }
            }
            _ = redraw.tick() => {}
        }
    }

    Ok(())
}

fn to_color(rgb: Rgb) -> Color {
    Color::Rgb(rgb.r, rgb.g, rgb.b)
}

fn render_ui(f: &mut Frame, app: &mut App) {
    let alerts = app.dashboard.alerts(Utc::now());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(9),
            Constraint::Length(3),
        ])
        .split(f.area());

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(if app.history.is_some() {
            [Constraint::Percentage(65), Constraint::Percentage(35)]
        } else {
            [Constraint::Percentage(100), Constraint::Percentage(0)]
        })
        .split(chunks[1]);

    render_status(f, app, chunks[0]);
    render_signal_table(f, app, middle[0]);
    if let Some(history) = &app.history {
        render_history(f, history, middle[1]);
    }
    render_alerts(f, &alerts, chunks[2]);
    render_footer(f, app, chunks[3]);
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let (label, color) = match app.dashboard.connection() {
        ConnectionState::Connected => ("LIVE", Color::Green),
        ConnectionState::Connecting => ("CONNECTING", Color::Yellow),
        ConnectionState::Closing => ("CLOSING", Color::Yellow),
        ConnectionState::Disconnected => ("OFFLINE", Color::Red),
        ConnectionState::Failed => ("FAILED", Color::Red),
    };
    let settings = app.dashboard.settings();
    let strategy = match app.dashboard.encoder().strategy() {
        EncodingStrategy::Continuous => "gradient",
        EncodingStrategy::Bucketed => "banded",
    };
    let refreshed = app
        .last_refresh
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());

    let mut spans = vec![
        Span::styled(format!(" {} ", label), Style::default().fg(color).add_modifier(Modifier::BOLD)),
        Span::raw(format!(
            " EMA {}/{} | encoding: {} | refreshed: {} ",
            settings.short_period, settings.long_period, strategy, refreshed
        )),
    ];
    if let Some(banner) = app.dashboard.banner() {
        spans.push(Span::styled(
            format!(" {} ", banner),
            Style::default().fg(Color::White).bg(Color::Red),
        ));
    }

    let block = Block::default()
        .title(" SIGNAL SCREENER ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White));
    f.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

fn cell_style(app: &App, state: &SignalState) -> Style {
    if state.status == TrendStatus::Unknown {
        return Style::default().fg(Color::DarkGray);
    }
    let (background, foreground) = app.dashboard.encode(state).colors();
    Style::default().bg(to_color(background)).fg(to_color(foreground))
}

fn render_signal_table(f: &mut Frame, app: &App, area: Rect) {
    let visible = app.dashboard.settings().visible();

    let header_cells = std::iter::once("Symbol".to_string())
        .chain(visible.iter().map(|tf| tf.to_string()))
        .enumerate()
        .map(|(j, text)| {
            let mut style = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
            if j > 0 && j - 1 == app.selected_column {
                style = style.add_modifier(Modifier::UNDERLINED);
            }
            Cell::from(text).style(style)
        });
    let header = Row::new(header_cells).height(1);

    let rows = app.dashboard.rows().into_iter().enumerate().map(|(i, row)| {
        let symbol_style = if i == app.selected_row {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::REVERSED)
        } else {
            Style::default().fg(Color::Yellow)
        };
        let cells = std::iter::once(Cell::from(row.symbol.to_string()).style(symbol_style)).chain(
            row.cells
                .values()
                .map(|state| Cell::from(state.label()).style(cell_style(app, state))),
        );
        Row::new(cells).height(1)
    });

    let widths = std::iter::once(Constraint::Length(14))
        .chain(visible.iter().map(|_| Constraint::Length(16)))
        .collect::<Vec<_>>();

    let table = Table::new(rows, widths).header(header).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" WATCHLIST ({}) ", app.dashboard.watchlist().len()))
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(table, area);
}

fn render_history(f: &mut Frame, history: &HistoryView, area: Rect) {
    let mut lines = Vec::new();
    if history.records.is_empty() {
        lines.push(Line::from(Span::styled(
            "No crossovers found",
            Style::default().fg(Color::DarkGray),
        )));
    }
    for record in history.records.iter().rev() {
        let (label, color) = match record.kind {
            CrossoverKind::Bullish => ("BULL", Color::Green),
            CrossoverKind::Bearish => ("BEAR", Color::Red),
        };
        let time = record
            .time()
            .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| record.timestamp.to_string());
        lines.push(Line::from(vec![
            Span::styled(format!("{:<5}", label), Style::default().fg(color)),
            Span::raw(format!("{}  {:.4}", time, record.close)),
        ]));
    }

    let block = Block::default()
        .title(format!(" HISTORY {} {} ", history.symbol, history.timeframe))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White));
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_alerts(f: &mut Frame, alerts: &[signal_screener::DisplayedAlert], area: Rect) {
    let lines: Vec<Line> = alerts
        .iter()
        .map(|displayed| {
            let color = match displayed.alert.status {
                TrendStatus::Bullish => Color::Green,
                TrendStatus::Bearish => Color::Red,
                _ => Color::White,
            };
            let mut style = Style::default().fg(color);
            if displayed.fading {
                style = style.add_modifier(Modifier::DIM);
            }
            Line::from(Span::styled(displayed.alert.message(), style))
        })
        .collect();

    let block = Block::default()
        .title(" CROSSOVER ALERTS ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White));
    f.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: true }), area);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let line = match &app.mode {
        InputMode::AddSymbol { input } => {
            let suggestions = app
                .dashboard
                .watchlist_controller()
                .suggest(input)
                .into_iter()
                .take(5)
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            Line::from(vec![
                Span::styled(" Add symbol: ", Style::default().fg(Color::Cyan)),
                Span::styled(format!("{}_", input), Style::default().fg(Color::White)),
                Span::styled(format!("  {}", suggestions), Style::default().fg(Color::DarkGray)),
            ])
        }
        InputMode::Normal => Line::from(Span::styled(
            " q quit | r refresh | e encoding | a add | x remove | h history | \u{2190}\u{2191}\u{2192}\u{2193} select | [ ] short | { } long | 1-5 timeframes ",
            Style::default().fg(Color::DarkGray),
        )),
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White));
    f.render_widget(Paragraph::new(line).block(block), area);
}
