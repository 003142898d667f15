use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use crossterm::event::{self, Event, KeyCode};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use envmon_core::{
    AlertLevel, ChartPayload, ConnectionManager, ConnectionPhase, ConnectivityState, DataSource, HttpTransport,
    LatestReadings, MonitorConfig, Presenter,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Axis, Block, Borders, Chart, Clear, Dataset, GraphType, Paragraph, Wrap};
use ratatui::Terminal;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

struct MetricSeries {
    label: &'static str,
    color: Color,
    points: VecDeque<(f64, f64)>,
}

impl MetricSeries {
    fn new(label: &'static str, color: Color) -> Self {
        Self {
            label,
            color,
            points: VecDeque::new(),
        }
    }

    fn push(&mut self, x: f64, y: f64, window_sec: f64) {
        self.points.push_back((x, y));
        while let Some((old_x, _)) = self.points.front() {
            if x - old_x > window_sec {
                self.points.pop_front();
            } else {
                break;
            }
        }
    }
}

fn bounds(values: impl Iterator<Item = f64>) -> [f64; 2] {
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    for y in values {
        min = min.min(y);
        max = max.max(y);
    }
    if min > max {
        return [0.0, 1.0];
    }
    if (max - min).abs() < f64::EPSILON {
        [min - 1.0, max + 1.0]
    } else {
        let pad = (max - min) * 0.12;
        [min - pad, max + pad]
    }
}

struct DashboardView {
    start: Instant,
    window_sec: f64,
    state: Option<ConnectivityState>,
    latest: Option<LatestReadings>,
    chart: Option<ChartPayload>,
    last_tick: Option<DateTime<Utc>>,
    status_line: Option<(AlertLevel, String)>,
    blocking: Option<String>,
    temperature: MetricSeries,
    humidity: MetricSeries,
}

impl DashboardView {
    fn new(window_sec: f64) -> Self {
        Self {
            start: Instant::now(),
            window_sec,
            state: None,
            latest: None,
            chart: None,
            last_tick: None,
            status_line: None,
            blocking: None,
            temperature: MetricSeries::new("Temperature (C)", Color::Red),
            humidity: MetricSeries::new("Humidity (%)", Color::Blue),
        }
    }
}

struct ViewerPresenter {
    view: Arc<Mutex<DashboardView>>,
}

impl ViewerPresenter {
    fn view(&self) -> MutexGuard<'_, DashboardView> {
        self.view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Presenter for ViewerPresenter {
    fn on_state_change(&self, state: &ConnectivityState) {
        self.view().state = Some(state.clone());
    }

    fn on_data_update(&self, readings: &LatestReadings) {
        let mut view = self.view();
        let t = view.start.elapsed().as_secs_f64();
        let window_sec = view.window_sec;
        if let Some(value) = readings.temperature() {
            view.temperature.push(t, value, window_sec);
        }
        if let Some(value) = readings.humidity() {
            view.humidity.push(t, value, window_sec);
        }
        view.latest = Some(readings.clone());
    }

    fn on_chart_data(&self, chart: &ChartPayload) {
        self.view().chart = Some(chart.clone());
    }

    fn on_tick(&self, at: DateTime<Utc>) {
        self.view().last_tick = Some(at);
    }

    fn notify(&self, level: AlertLevel, message: &str) {
        let mut view = self.view();
        if level == AlertLevel::Danger {
            view.blocking = Some(message.to_string());
        }
        view.status_line = Some((level, message.to_string()));
    }
}

enum SessionCommand {
    Refresh,
    ReloadChart,
}

pub async fn run_viewer(config: &MonitorConfig, transport: Arc<dyn HttpTransport>, window_sec: f64) -> Result<()> {
    let view = Arc::new(Mutex::new(DashboardView::new(window_sec)));
    let presenter = Arc::new(ViewerPresenter {
        view: Arc::clone(&view),
    });
    let mut manager = ConnectionManager::new(config, transport, presenter);

    let (commands, mut inbox) = mpsc::channel::<SessionCommand>(8);
    let (quit, quit_rx) = oneshot::channel::<()>();
    let session = tokio::spawn(async move {
        let quit_early = tokio::select! {
            _ = quit_rx => true,
            _ = manager.initialize() => false,
        };
        if quit_early {
            manager.shutdown().await;
            return;
        }
        while let Some(command) = inbox.recv().await {
            match command {
                SessionCommand::Refresh => {
                    if let Err(err) = manager.refresh().await {
                        warn!(error = %err, "manual refresh failed");
                    }
                }
                SessionCommand::ReloadChart => {
                    manager.chart_data().await;
                }
            }
        }
        manager.shutdown().await;
    });

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut command_buffer = String::new();

    let run_result = async {
        loop {
            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    let dismissed = {
                        let mut view = view.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                        view.blocking.take().is_some()
                    };
                    if dismissed {
                        continue;
                    }

                    match key.code {
                        KeyCode::Char('q') => break,
                        KeyCode::Char('r') => {
                            let _ = commands.try_send(SessionCommand::ReloadChart);
                        }
                        KeyCode::Char('u') => {
                            let _ = commands.try_send(SessionCommand::Refresh);
                        }
                        KeyCode::Char(c) => {
                            command_buffer.push(c.to_ascii_lowercase());
                            if command_buffer.len() > 8 {
                                let drain = command_buffer.len() - 8;
                                command_buffer.drain(0..drain);
                            }
                            if command_buffer.ends_with("exit") {
                                break;
                            }
                        }
                        KeyCode::Backspace => {
                            command_buffer.pop();
                        }
                        _ => {}
                    }
                }
            }

            let view = view.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            terminal.draw(|frame| draw_ui(frame.size(), frame, &view))?;
        }

        Ok::<(), anyhow::Error>(())
    }
    .await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    let _ = quit.send(());
    drop(commands);
    session.await?;

    run_result
}

fn draw_ui(area: Rect, frame: &mut ratatui::Frame<'_>, view: &DashboardView) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(6),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area);

    frame.render_widget(render_header(view), rows[0]);
    frame.render_widget(render_statistics(view), rows[1]);

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[2]);

    let live_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(cols[0]);

    let now_sec = view.start.elapsed().as_secs_f64();
    render_metric_chart(frame, live_rows[0], &view.temperature, now_sec, view.window_sec);
    render_metric_chart(frame, live_rows[1], &view.humidity, now_sec, view.window_sec);
    render_server_chart(frame, cols[1], view.chart.as_ref());

    frame.render_widget(render_footer(view), rows[3]);

    if let Some(message) = &view.blocking {
        let popup = centered(area, 60, 7);
        let body = Paragraph::new(vec![
            Line::from(message.clone()),
            Line::from(""),
            Line::from(Span::styled("press any key to continue", Style::default().fg(Color::Gray))),
        ])
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red))
                .title("Error"),
        );
        frame.render_widget(Clear, popup);
        frame.render_widget(body, popup);
    }
}

fn phase_badge(state: Option<&ConnectivityState>) -> Span<'static> {
    let (label, color) = match state.map(|s| s.phase) {
        Some(ConnectionPhase::Connected) => (" CONNECTED ", Color::Green),
        Some(ConnectionPhase::Connecting) => (" CONNECTING ", Color::Cyan),
        Some(ConnectionPhase::Degraded) => (" RETRYING ", Color::Yellow),
        Some(ConnectionPhase::Failed) => (" OFFLINE ", Color::Red),
        Some(ConnectionPhase::Disconnected) | None => (" DISCONNECTED ", Color::Gray),
    };
    Span::styled(
        label,
        Style::default()
            .fg(Color::Black)
            .bg(color)
            .add_modifier(Modifier::BOLD),
    )
}

fn local_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.with_timezone(&Local).format("%d/%m/%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| "n/a".to_string())
}

fn render_header(view: &DashboardView) -> Paragraph<'static> {
    let state = view.state.as_ref();
    let retries = state
        .map(|s| format!("retries={}/{}", s.retry_count, s.max_retries))
        .unwrap_or_default();

    let lines = vec![
        Line::from(vec![
            Span::styled(
                "Environmental Monitor  ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            phase_badge(state),
            Span::raw(format!("  {retries}")),
        ]),
        Line::from(format!(
            "last data={}  last refresh={}  window={}s",
            local_time(state.and_then(|s| s.last_update)),
            local_time(view.last_tick),
            view.window_sec as u64
        )),
    ];

    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Status"))
}

fn render_statistics(view: &DashboardView) -> Paragraph<'static> {
    let Some(latest) = &view.latest else {
        return Paragraph::new(Line::from("Waiting for first readings..."))
            .block(Block::default().borders(Borders::ALL).title("Statistics"));
    };

    let title = match latest.source {
        DataSource::Live => "Statistics".to_string(),
        DataSource::Mock => "Statistics (sample data)".to_string(),
    };

    let lines = latest
        .parameters
        .iter()
        .map(|(name, reading)| {
            let alert = reading.status.as_deref() == Some("alerta");
            let style = if alert {
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            let limit = reading
                .limit
                .map(|l| format!(" (limit {l:.1})"))
                .unwrap_or_default();
            Line::from(vec![
                Span::raw(format!("{name:<16}")),
                Span::styled(
                    format!("{:>9.1} {}", reading.value, reading.unit.as_deref().unwrap_or("")),
                    style,
                ),
                Span::raw(limit),
            ])
        })
        .collect::<Vec<_>>();

    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title))
}

fn render_footer(view: &DashboardView) -> Paragraph<'static> {
    let keys = "q quit  r reload chart  u refresh now";
    match &view.status_line {
        Some((level, message)) => {
            let color = match level {
                AlertLevel::Info => Color::Gray,
                AlertLevel::Success => Color::Green,
                AlertLevel::Warning => Color::Yellow,
                AlertLevel::Danger => Color::Red,
            };
            Paragraph::new(Line::from(vec![
                Span::styled(message.clone(), Style::default().fg(color)),
                Span::raw(format!("   |  {keys}")),
            ]))
        }
        None => Paragraph::new(Line::from(keys)),
    }
}

fn render_metric_chart(
    frame: &mut ratatui::Frame<'_>,
    area: Rect,
    series: &MetricSeries,
    now_sec: f64,
    window_sec: f64,
) {
    let points: Vec<(f64, f64)> = series.points.iter().copied().collect();

    let x_min = (now_sec - window_sec).max(0.0);
    let x_max = now_sec.max(window_sec);
    let y_bounds = bounds(points.iter().map(|(_, y)| *y));

    let dataset = Dataset::default()
        .name(series.label)
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(series.color))
        .data(&points);

    let x_mid = (x_min + x_max) / 2.0;

    let chart = Chart::new(vec![dataset])
        .block(Block::default().borders(Borders::ALL).title(series.label))
        .x_axis(
            Axis::default()
                .title("time (s)")
                .style(Style::default().fg(Color::Gray))
                .bounds([x_min, x_max])
                .labels(vec![
                    Span::raw(format!("{x_min:.0}")),
                    Span::raw(format!("{x_mid:.0}")),
                    Span::raw(format!("{x_max:.0}")),
                ]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds(y_bounds)
                .labels(vec![
                    Span::raw(format!("{:.1}", y_bounds[0])),
                    Span::raw(format!("{:.1}", (y_bounds[0] + y_bounds[1]) / 2.0)),
                    Span::raw(format!("{:.1}", y_bounds[1])),
                ]),
        );

    frame.render_widget(chart, area);
}

fn render_server_chart(frame: &mut ratatui::Frame<'_>, area: Rect, chart: Option<&ChartPayload>) {
    let Some(chart) = chart else {
        let waiting = Paragraph::new(Line::from("Loading chart..."))
            .block(Block::default().borders(Borders::ALL).title("Environmental Monitoring"));
        frame.render_widget(waiting, area);
        return;
    };

    let indexed = |values: &[f64]| -> Vec<(f64, f64)> {
        values
            .iter()
            .enumerate()
            .map(|(idx, v)| (idx as f64, *v))
            .collect()
    };
    let temperature = indexed(&chart.temperature);
    let humidity = indexed(&chart.humidity);

    let y_bounds = bounds(chart.temperature.iter().chain(chart.humidity.iter()).copied());
    let y_bounds = [y_bounds[0].min(0.0), y_bounds[1]];
    let x_max = (chart.labels.len().max(2) - 1) as f64;

    let first = chart.labels.first().cloned().unwrap_or_default();
    let last = chart.labels.last().cloned().unwrap_or_default();

    let datasets = vec![
        Dataset::default()
            .name("Temperature (C)")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Red))
            .data(&temperature),
        Dataset::default()
            .name("Humidity (%)")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Blue))
            .data(&humidity),
    ];

    let widget = Chart::new(datasets)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Environmental Monitoring"),
        )
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, x_max])
                .labels(vec![Span::raw(first), Span::raw(last)]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds(y_bounds)
                .labels(vec![
                    Span::raw(format!("{:.0}", y_bounds[0])),
                    Span::raw(format!("{:.0}", y_bounds[1])),
                ]),
        );

    frame.render_widget(widget, area);
}

fn centered(area: Rect, width_pct: u16, height: u16) -> Rect {
    let width = area.width * width_pct / 100;
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height,
    }
}
