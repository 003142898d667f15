use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::client::{ApiError, HttpRequest, HttpResponse, Method, MockHttpTransport};
use crate::config::{MonitorConfig, RetryConfig};
use crate::manager::{ConnectionManager, CycleOutcome, SubmitError};
use crate::presenter::{AlertLevel, Presenter};
use crate::reading::{ChartPayload, DataSource, HistoryQuery, LatestReadings, ReadingDraft};
use crate::state::{ConnectionPhase, ConnectivityState};

const LATEST_BODY: &str = r#"{"temperatura": {"valor": 22.0, "unidad": "°C"}, "humedad": 55.0}"#;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    State(ConnectivityState),
    Data(LatestReadings),
    Chart(ChartPayload),
    Tick,
    Alert(AlertLevel, String),
}

#[derive(Default)]
struct RecordingPresenter {
    events: Mutex<Vec<Event>>,
}

impl RecordingPresenter {
    fn push(&self, event: Event) {
        self.events.lock().expect("presenter lock").push(event);
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().expect("presenter lock").clone()
    }

    fn data_sources(&self) -> Vec<DataSource> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Data(readings) => Some(readings.source),
                _ => None,
            })
            .collect()
    }

    fn alerts(&self) -> Vec<(AlertLevel, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Alert(level, message) => Some((level, message)),
                _ => None,
            })
            .collect()
    }

    fn phases(&self) -> Vec<(ConnectionPhase, u32)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::State(state) => Some((state.phase, state.retry_count)),
                _ => None,
            })
            .collect()
    }
}

impl Presenter for RecordingPresenter {
    fn on_state_change(&self, state: &ConnectivityState) {
        self.push(Event::State(state.clone()));
    }

    fn on_data_update(&self, readings: &LatestReadings) {
        self.push(Event::Data(readings.clone()));
    }

    fn on_chart_data(&self, chart: &ChartPayload) {
        self.push(Event::Chart(chart.clone()));
    }

    fn on_tick(&self, _at: DateTime<Utc>) {
        self.push(Event::Tick);
    }

    fn notify(&self, level: AlertLevel, message: &str) {
        self.push(Event::Alert(level, message.to_string()));
    }
}

fn config(max_retries: u32) -> MonitorConfig {
    MonitorConfig {
        base_url: "http://monitor.test".to_string(),
        poll_interval: Duration::from_secs(30),
        request_timeout: Duration::from_secs(1),
        retry: RetryConfig {
            max_retries,
            ..RetryConfig::default()
        },
    }
}

fn manager_with(mock: MockHttpTransport, max_retries: u32) -> (ConnectionManager, Arc<RecordingPresenter>) {
    let presenter = Arc::new(RecordingPresenter::default());
    let manager = ConnectionManager::new(&config(max_retries), Arc::new(mock), presenter.clone());
    (manager, presenter)
}

fn ok(body: &str) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse {
        status: 200,
        body: body.to_string(),
    })
}

fn status(code: u16) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse {
        status: code,
        body: "error".to_string(),
    })
}

fn unreachable() -> Result<HttpResponse, ApiError> {
    Err(ApiError::Transport("connection refused".to_string()))
}

fn route<F>(mock: &mut MockHttpTransport, handler: F)
where
    F: Fn(&HttpRequest) -> Result<HttpResponse, ApiError> + Send + 'static,
{
    mock.expect_send().returning(move |req| {
        let result = handler(&req);
        Box::pin(async move { result })
    });
}

fn path(req: &HttpRequest) -> &str {
    req.url.trim_start_matches("http://monitor.test")
}

fn draft(temperature: f64, humidity: f64) -> ReadingDraft {
    ReadingDraft {
        temperature: Some(temperature),
        humidity: Some(humidity),
        ..ReadingDraft::default()
    }
}

#[tokio::test]
async fn out_of_range_temperature_is_rejected_without_network() {
    let mut mock = MockHttpTransport::new();
    mock.expect_send().never();
    let (manager, presenter) = manager_with(mock, 3);

    for temperature in [-60.0, 150.0] {
        let err = manager
            .submit(draft(temperature, 50.0))
            .await
            .expect_err("out of range");
        assert!(matches!(err, SubmitError::Invalid(ref v) if v.field == "temperature"));
    }

    assert_eq!(manager.state().await, ConnectivityState::new(3));
    let alerts = presenter.alerts();
    assert_eq!(alerts.len(), 2);
    assert!(alerts.iter().all(|(level, _)| *level == AlertLevel::Warning));
}

#[tokio::test]
async fn valid_reading_posts_once_with_timestamp() {
    let posted = Arc::new(Mutex::new(Vec::<String>::new()));
    let mut mock = MockHttpTransport::new();
    let sink = Arc::clone(&posted);
    route(&mut mock, move |req| match (req.method, path(req)) {
        (Method::Get, "/health") => ok(r#"{"status": "ok"}"#),
        (Method::Get, "/api/datos/recientes") => ok(LATEST_BODY),
        (Method::Post, "/api/monitoreo") => {
            sink.lock()
                .expect("sink lock")
                .push(req.body.clone().unwrap_or_default());
            ok(r#"{"success": true}"#)
        }
        _ => status(404),
    });
    let (manager, presenter) = manager_with(mock, 3);

    assert!(manager.check_connection().await);
    let response = manager.submit(draft(25.0, 50.0)).await.expect("saved");
    assert_eq!(response.data["success"], true);

    let posted = posted.lock().expect("sink lock").clone();
    assert_eq!(posted.len(), 1);
    let body: serde_json::Value = serde_json::from_str(&posted[0]).expect("json body");
    assert_eq!(body["temperatura"], 25.0);
    assert_eq!(body["humedad"], 50.0);
    assert_eq!(body["tipo_medicion"], "manual");
    let timestamp = body["timestamp"].as_str().expect("timestamp string");
    assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());

    assert!(presenter
        .alerts()
        .contains(&(AlertLevel::Success, "Reading saved".to_string())));
    assert_eq!(presenter.data_sources(), vec![DataSource::Live]);
}

#[tokio::test]
async fn submit_while_disconnected_is_rejected_locally() {
    let mut mock = MockHttpTransport::new();
    mock.expect_send().never();
    let (manager, presenter) = manager_with(mock, 3);

    let err = manager.submit(draft(25.0, 50.0)).await.expect_err("offline");
    assert!(matches!(err, SubmitError::Offline));
    assert_eq!(presenter.alerts()[0].0, AlertLevel::Warning);
}

#[tokio::test]
async fn failed_save_is_reported_without_touching_state() {
    let mut mock = MockHttpTransport::new();
    route(&mut mock, |req| match (req.method, path(req)) {
        (Method::Get, "/health") => ok("{}"),
        _ => status(500),
    });
    let (manager, presenter) = manager_with(mock, 3);

    assert!(manager.check_connection().await);
    let before = manager.state().await;

    let err = manager.submit(draft(20.0, 40.0)).await.expect_err("500");
    assert!(matches!(err, SubmitError::Api(ApiError::Http { status: 500, .. })));
    assert_eq!(manager.state().await, before);
    assert!(presenter
        .alerts()
        .iter()
        .any(|(level, _)| *level == AlertLevel::Danger));
}

#[tokio::test(start_paused = true)]
async fn retries_then_falls_back_to_mock_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut mock = MockHttpTransport::new();
    route(&mut mock, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        unreachable()
    });
    let (manager, presenter) = manager_with(mock, 3);

    let started = tokio::time::Instant::now();
    let outcome = manager.refresh().await.expect("no parse errors");

    assert_eq!(outcome, CycleOutcome::FellBack);
    assert_eq!(calls.load(Ordering::SeqCst), 4, "first attempt plus three retries");
    assert!(started.elapsed() >= Duration::from_secs(15));

    let state = manager.state().await;
    assert!(!state.is_connected);
    assert!(state.fallback_active);
    assert_eq!(state.retry_count, 3);
    assert_eq!(state.phase, ConnectionPhase::Failed);
    assert_eq!(presenter.data_sources(), vec![DataSource::Mock]);
    assert_eq!(presenter.alerts().len(), 1, "fallback is a single non-blocking warning");
    assert_eq!(presenter.alerts()[0].0, AlertLevel::Warning);

    let again = manager.refresh().await.expect("no parse errors");
    assert_eq!(again, CycleOutcome::Unavailable);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(presenter.data_sources(), vec![DataSource::Mock]);
}

#[tokio::test(start_paused = true)]
async fn recovers_during_retry_and_resets_count() {
    let health_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&health_calls);
    let mut mock = MockHttpTransport::new();
    route(&mut mock, move |req| match path(req) {
        "/health" if counter.fetch_add(1, Ordering::SeqCst) < 2 => unreachable(),
        "/health" => ok("{}"),
        "/api/datos/recientes" => ok(LATEST_BODY),
        _ => status(404),
    });
    let (manager, presenter) = manager_with(mock, 3);

    assert_eq!(manager.refresh().await.expect("refresh"), CycleOutcome::Updated);

    let state = manager.state().await;
    assert!(state.is_connected);
    assert_eq!(state.retry_count, 0);
    assert!(state.last_update.is_some());
    assert_eq!(state.phase, ConnectionPhase::Connected);

    let phases = presenter.phases();
    assert!(phases.contains(&(ConnectionPhase::Degraded, 2)));
    assert!(!phases.iter().any(|(phase, _)| *phase == ConnectionPhase::Failed));
    assert_eq!(presenter.data_sources(), vec![DataSource::Live]);
}

#[tokio::test(start_paused = true)]
async fn failure_after_connection_degrades_with_fresh_count() {
    let latest_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&latest_calls);
    let mut mock = MockHttpTransport::new();
    route(&mut mock, move |req| match path(req) {
        "/health" => ok("{}"),
        "/api/datos/recientes" if counter.fetch_add(1, Ordering::SeqCst) == 1 => status(502),
        "/api/datos/recientes" => ok(LATEST_BODY),
        _ => status(404),
    });
    let (manager, presenter) = manager_with(mock, 3);

    assert_eq!(manager.refresh().await.expect("first"), CycleOutcome::Updated);
    assert_eq!(manager.refresh().await.expect("second"), CycleOutcome::Updated);

    let phases = presenter.phases();
    assert!(phases.contains(&(ConnectionPhase::Degraded, 1)));
    assert_eq!(manager.state().await.retry_count, 0);
    assert_eq!(latest_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn stop_discards_in_flight_result() {
    let started = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let mut mock = MockHttpTransport::new();
    {
        let started = Arc::clone(&started);
        let gate = Arc::clone(&gate);
        mock.expect_send().returning(move |_| {
            let started = Arc::clone(&started);
            let gate = Arc::clone(&gate);
            Box::pin(async move {
                started.notify_one();
                gate.notified().await;
                ok(LATEST_BODY)
            })
        });
    }
    let (mut manager, presenter) = manager_with(mock, 3);

    manager.start(Duration::from_millis(10));
    started.notified().await;
    manager.stop().await;
    let at_stop = manager.state().await;

    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let after = manager.state().await;
    assert_eq!(after, at_stop);
    assert!(!after.is_connected);
    assert_eq!(after.last_update, None);
    assert!(presenter.data_sources().is_empty());
    assert!(!presenter.events().contains(&Event::Tick));
    assert!(!manager.is_polling());
}

#[tokio::test(start_paused = true)]
async fn tick_refreshes_marker_even_when_unavailable() {
    let mut mock = MockHttpTransport::new();
    route(&mut mock, |_| unreachable());
    let (mut manager, presenter) = manager_with(mock, 0);

    manager.start(Duration::from_millis(100));
    tokio::time::sleep(Duration::from_millis(250)).await;
    manager.stop().await;

    let ticks = presenter
        .events()
        .iter()
        .filter(|e| **e == Event::Tick)
        .count();
    assert_eq!(ticks, 2);
    assert_eq!(presenter.data_sources(), vec![DataSource::Mock]);
}

#[tokio::test(start_paused = true)]
async fn initialize_with_malformed_data_alerts_once_and_uses_mock() {
    let mut mock = MockHttpTransport::new();
    route(&mut mock, |req| match path(req) {
        "/health" => ok("{}"),
        "/api/datos/grafico" => ok(r#"{"labels": ["08:00"], "temperature": [21.0], "humidity": [60.0]}"#),
        "/api/datos/recientes" => ok("not json"),
        _ => status(404),
    });
    let (mut manager, presenter) = manager_with(mock, 3);

    manager.initialize().await;

    let alerts = presenter.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].0, AlertLevel::Danger);
    assert_eq!(presenter.data_sources(), vec![DataSource::Mock]);
    assert!(presenter.events().contains(&Event::Chart(ChartPayload {
        labels: vec!["08:00".to_string()],
        temperature: vec![21.0],
        humidity: vec![60.0],
    })));
    assert!(manager.is_polling());

    manager.shutdown().await;
    assert!(!manager.is_polling());
}

#[tokio::test]
async fn chart_uses_mock_when_disconnected() {
    let mut mock = MockHttpTransport::new();
    mock.expect_send().never();
    let (manager, presenter) = manager_with(mock, 3);

    assert_eq!(manager.chart_data().await, ChartPayload::mock());
    assert_eq!(presenter.events(), vec![Event::Chart(ChartPayload::mock())]);
}

#[tokio::test]
async fn chart_falls_back_when_request_fails() {
    let mut mock = MockHttpTransport::new();
    route(&mut mock, |req| match path(req) {
        "/health" => ok("{}"),
        _ => status(500),
    });
    let (manager, _presenter) = manager_with(mock, 3);

    assert!(manager.check_connection().await);
    assert_eq!(manager.chart_data().await, ChartPayload::mock());
}

#[tokio::test]
async fn history_failure_returns_empty_list() {
    let mut mock = MockHttpTransport::new();
    route(&mut mock, |_| unreachable());
    let (manager, presenter) = manager_with(mock, 3);

    let today = Utc::now().date_naive();
    let rows = manager.history(&HistoryQuery::last_week(today)).await;

    assert!(rows.is_empty());
    assert_eq!(presenter.alerts()[0].0, AlertLevel::Danger);
    assert_eq!(manager.state().await, ConnectivityState::new(3));
}

#[tokio::test(start_paused = true)]
async fn healthy_server_with_failing_data_still_falls_back() {
    let latest_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&latest_calls);
    let mut mock = MockHttpTransport::new();
    route(&mut mock, move |req| match path(req) {
        "/health" => ok("{}"),
        _ => {
            counter.fetch_add(1, Ordering::SeqCst);
            status(500)
        }
    });
    let (manager, presenter) = manager_with(mock, 3);

    let outcome = tokio::time::timeout(Duration::from_secs(600), manager.refresh())
        .await
        .expect("cycle ends")
        .expect("no parse errors");

    assert_eq!(outcome, CycleOutcome::FellBack);
    assert_eq!(latest_calls.load(Ordering::SeqCst), 4);

    let state = manager.state().await;
    assert_eq!(state.retry_count, 3);
    assert!(state.fallback_active);
    assert_eq!(state.phase, ConnectionPhase::Failed);
    assert_eq!(state.last_update, None);
    assert_eq!(presenter.data_sources(), vec![DataSource::Mock]);

    let retries: Vec<u32> = presenter
        .phases()
        .into_iter()
        .filter(|(phase, _)| *phase == ConnectionPhase::Degraded)
        .map(|(_, count)| count)
        .collect();
    assert_eq!(retries, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn initialize_returns_and_polls_when_data_endpoint_fails() {
    let mut mock = MockHttpTransport::new();
    route(&mut mock, |req| match path(req) {
        "/health" => ok("{}"),
        _ => status(500),
    });
    let (mut manager, presenter) = manager_with(mock, 2);

    tokio::time::timeout(Duration::from_secs(600), manager.initialize())
        .await
        .expect("initialize returns");

    assert!(manager.is_polling());
    assert_eq!(presenter.data_sources(), vec![DataSource::Mock]);
    assert_eq!(presenter.alerts(), vec![(
        AlertLevel::Warning,
        "Server unreachable, showing sample data".to_string()
    )]);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(presenter.events().contains(&Event::Tick));

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn recovers_after_fallback_and_retries_again() {
    const DOWN: usize = 0;
    const UP: usize = 1;
    const NO_DATA: usize = 2;

    let mode = Arc::new(AtomicUsize::new(DOWN));
    let server = Arc::clone(&mode);
    let mut mock = MockHttpTransport::new();
    route(&mut mock, move |req| match (server.load(Ordering::SeqCst), path(req)) {
        (DOWN, _) => unreachable(),
        (_, "/health") => ok("{}"),
        (UP, "/api/datos/recientes") => ok(LATEST_BODY),
        _ => status(500),
    });
    let (manager, presenter) = manager_with(mock, 1);

    assert_eq!(manager.refresh().await.expect("down"), CycleOutcome::FellBack);
    assert!(manager.state().await.fallback_active);

    mode.store(UP, Ordering::SeqCst);
    assert_eq!(manager.refresh().await.expect("up"), CycleOutcome::Updated);

    let state = manager.state().await;
    assert!(state.is_connected);
    assert!(!state.fallback_active);
    assert_eq!(state.retry_count, 0);
    assert_eq!(state.phase, ConnectionPhase::Connected);
    assert_eq!(presenter.data_sources(), vec![DataSource::Mock, DataSource::Live]);

    let seen = presenter.phases().len();
    mode.store(NO_DATA, Ordering::SeqCst);
    assert_eq!(manager.refresh().await.expect("no data"), CycleOutcome::FellBack);

    assert!(presenter.phases()[seen..].contains(&(ConnectionPhase::Degraded, 1)));
    assert_eq!(
        presenter.data_sources(),
        vec![DataSource::Mock, DataSource::Live, DataSource::Mock]
    );
    let warnings = presenter
        .alerts()
        .iter()
        .filter(|(level, _)| *level == AlertLevel::Warning)
        .count();
    assert_eq!(warnings, 2);
}

#[tokio::test]
async fn abandoned_manual_refresh_cannot_change_state_after_stop() {
    let started = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let mut mock = MockHttpTransport::new();
    {
        let started = Arc::clone(&started);
        let gate = Arc::clone(&gate);
        mock.expect_send().returning(move |_| {
            let started = Arc::clone(&started);
            let gate = Arc::clone(&gate);
            Box::pin(async move {
                started.notify_one();
                gate.notified().await;
                ok(LATEST_BODY)
            })
        });
    }
    let (mut manager, presenter) = manager_with(mock, 3);

    {
        let refresh = manager.refresh();
        tokio::pin!(refresh);
        tokio::select! {
            _ = &mut refresh => panic!("transport is gated"),
            _ = started.notified() => {}
        }
    }
    manager.stop().await;
    let at_stop = manager.state().await;

    gate.notify_waiters();
    tokio::task::yield_now().await;

    assert_eq!(manager.state().await, at_stop);
    assert!(!at_stop.is_connected);
    assert!(presenter.data_sources().is_empty());
}
