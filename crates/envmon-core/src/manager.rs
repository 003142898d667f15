use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{ApiClient, ApiError, ApiResponse, ErrorKind, HttpTransport};
use crate::config::MonitorConfig;
use crate::poller::Poller;
use crate::presenter::{AlertLevel, Presenter};
use crate::reading::{ChartPayload, HistoryQuery, LatestReadings, ReadingDraft, ValidationError};
use crate::retry::{RetryAction, RetryPolicy};
use crate::state::ConnectivityState;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("no connection to the monitoring server")]
    Offline,
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Updated,
    FellBack,
    Unavailable,
    Skipped,
    Cancelled,
}

enum Attempt {
    Fetched(LatestReadings),
    Failed(ApiError),
    Stopped,
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct ManagerCore {
    client: ApiClient,
    policy: RetryPolicy,
    state: RwLock<ConnectivityState>,
    presenter: Arc<dyn Presenter>,
    in_flight: AtomicBool,
}

impl ManagerCore {
    async fn apply<R>(
        &self,
        live: &CancellationToken,
        update: impl FnOnce(&mut ConnectivityState) -> R,
    ) -> Option<R> {
        let mut state = self.state.write().await;
        if live.is_cancelled() {
            debug!("discarding result of a stopped cycle");
            return None;
        }
        let out = update(&mut state);
        self.presenter.on_state_change(&state);
        Some(out)
    }

    async fn publish(&self, live: &CancellationToken, emit: impl FnOnce(&dyn Presenter)) -> bool {
        let _state = self.state.write().await;
        if live.is_cancelled() {
            return false;
        }
        emit(self.presenter.as_ref());
        true
    }

    async fn is_connected(&self) -> bool {
        self.state.read().await.is_connected
    }

    async fn check_connection(&self, live: &CancellationToken) -> bool {
        if self.apply(live, |state| state.begin_connect()).await.is_none() {
            return false;
        }

        let result = self.client.health().await;
        if let Err(err) = &result {
            warn!(error = %err, "server health check failed");
        }

        let connected = result.is_ok();
        let applied = self
            .apply(live, |state| {
                if connected {
                    state.mark_connected(Utc::now());
                } else {
                    state.mark_disconnected();
                }
            })
            .await
            .is_some();

        if applied && connected {
            info!(base_url = %self.client.base_url(), "connected to monitoring server");
        }
        applied && connected
    }

    async fn attempt(&self, live: &CancellationToken) -> Attempt {
        if !self.is_connected().await {
            if self.apply(live, |state| state.begin_connect()).await.is_none() {
                return Attempt::Stopped;
            }
            if let Err(err) = self.client.health().await {
                return Attempt::Failed(err);
            }
            if self.apply(live, |state| state.mark_reachable()).await.is_none() {
                return Attempt::Stopped;
            }
        }

        match self.client.latest().await {
            Ok(response) => Attempt::Fetched(response.data),
            Err(err) => Attempt::Failed(err),
        }
    }

    async fn refresh(&self, live: &CancellationToken) -> Result<CycleOutcome, ApiError> {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            debug!("fetch cycle already running, skipping");
            return Ok(CycleOutcome::Skipped);
        };

        loop {
            let err = match self.attempt(live).await {
                Attempt::Fetched(readings) => {
                    let applied = self
                        .apply(live, |state| {
                            state.mark_connected(Utc::now());
                            self.presenter.on_data_update(&readings);
                        })
                        .await;
                    return Ok(match applied {
                        Some(()) => CycleOutcome::Updated,
                        None => CycleOutcome::Cancelled,
                    });
                }
                Attempt::Stopped => return Ok(CycleOutcome::Cancelled),
                Attempt::Failed(err) if err.kind() == ErrorKind::Parse => return Err(err),
                Attempt::Failed(err) => err,
            };

            warn!(error = %err, "fetch cycle failed");
            let Some(action) = self.apply(live, |state| self.policy.on_failure(state)).await else {
                return Ok(CycleOutcome::Cancelled);
            };

            match action {
                RetryAction::ScheduleRetry(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = live.cancelled() => return Ok(CycleOutcome::Cancelled),
                    }
                }
                RetryAction::FallbackToMock => {
                    let shown = self
                        .publish(live, |presenter| {
                            presenter.on_data_update(&LatestReadings::mock());
                            presenter.notify(
                                AlertLevel::Warning,
                                "Server unreachable, showing sample data",
                            );
                        })
                        .await;
                    return Ok(if shown {
                        CycleOutcome::FellBack
                    } else {
                        CycleOutcome::Cancelled
                    });
                }
                RetryAction::Exhausted => return Ok(CycleOutcome::Unavailable),
            }
        }
    }

    async fn load_chart(&self, live: &CancellationToken) -> ChartPayload {
        let chart = if self.is_connected().await {
            match self.client.chart().await {
                Ok(response) => response.data,
                Err(err) => {
                    warn!(error = %err, "chart data unavailable, using sample data");
                    ChartPayload::mock()
                }
            }
        } else {
            ChartPayload::mock()
        };

        self.publish(live, |presenter| presenter.on_chart_data(&chart))
            .await;
        chart
    }

    async fn bootstrap(&self, live: &CancellationToken) -> Result<(), ApiError> {
        self.check_connection(live).await;
        self.load_chart(live).await;
        let outcome = self.refresh(live).await?;
        debug!(?outcome, "initial data loaded");
        Ok(())
    }

    async fn tick(&self, live: CancellationToken) {
        match self.refresh(&live).await {
            Ok(outcome) => debug!(?outcome, "poll cycle finished"),
            Err(err) => warn!(error = %err, "poll cycle received an unusable payload"),
        }
        self.publish(&live, |presenter| presenter.on_tick(Utc::now()))
            .await;
    }
}

pub struct ConnectionManager {
    core: Arc<ManagerCore>,
    poller: Poller,
    session: CancellationToken,
    poll_interval: Duration,
}

impl ConnectionManager {
    pub fn new(
        config: &MonitorConfig,
        transport: Arc<dyn HttpTransport>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        let policy = RetryPolicy::new(config.retry.clone());
        let session = CancellationToken::new();

        let core = ManagerCore {
            client: ApiClient::new(config.base_url.clone(), transport),
            state: RwLock::new(ConnectivityState::new(policy.max_retries())),
            policy,
            presenter,
            in_flight: AtomicBool::new(false),
        };

        Self {
            core: Arc::new(core),
            poller: Poller::new(session.child_token()),
            session,
            poll_interval: config.poll_interval,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.core.client
    }

    pub async fn state(&self) -> ConnectivityState {
        self.core.state.read().await.clone()
    }

    pub async fn initialize(&mut self) {
        info!(base_url = %self.core.client.base_url(), "initializing dashboard session");

        if let Err(err) = self.core.bootstrap(&self.session).await {
            error!(error = %err, "initialization failed");
            self.core
                .publish(&self.session, |presenter| {
                    presenter.notify(
                        AlertLevel::Danger,
                        &format!("Failed to initialize the dashboard: {err}"),
                    );
                    presenter.on_data_update(&LatestReadings::mock());
                })
                .await;
        }

        self.start(self.poll_interval);
    }

    pub async fn check_connection(&self) -> bool {
        self.core.check_connection(&self.session).await
    }

    pub async fn refresh(&self) -> Result<CycleOutcome, ApiError> {
        self.core.refresh(&self.session).await
    }

    pub async fn chart_data(&self) -> ChartPayload {
        self.core.load_chart(&self.session).await
    }

    pub async fn history(&self, query: &HistoryQuery) -> Vec<Value> {
        match self.core.client.history(query).await {
            Ok(response) => {
                info!(rows = response.data.len(), "historical data loaded");
                response.data
            }
            Err(err) => {
                warn!(error = %err, "failed to load historical data");
                self.core
                    .presenter
                    .notify(AlertLevel::Danger, "Failed to load historical data");
                Vec::new()
            }
        }
    }

    pub async fn submit(&self, draft: ReadingDraft) -> Result<ApiResponse<Value>, SubmitError> {
        let presenter = &self.core.presenter;

        let reading = match draft.validate(Utc::now()) {
            Ok(reading) => reading,
            Err(err) => {
                warn!(field = err.field, reason = %err.reason, "reading rejected");
                presenter.notify(AlertLevel::Warning, &format!("Please fix the form: {err}"));
                return Err(err.into());
            }
        };

        if !self.core.is_connected().await {
            presenter.notify(AlertLevel::Warning, "No connection to the server");
            return Err(SubmitError::Offline);
        }

        match self.core.client.submit(&reading).await {
            Ok(response) => {
                info!(status = response.status, "reading saved");
                presenter.notify(AlertLevel::Success, "Reading saved");
                if let Err(err) = self.core.refresh(&self.session).await {
                    warn!(error = %err, "refresh after save failed");
                }
                Ok(response)
            }
            Err(err) => {
                error!(error = %err, "failed to save reading");
                presenter.notify(AlertLevel::Danger, "Failed to save the reading");
                Err(err.into())
            }
        }
    }

    pub fn start(&mut self, period: Duration) {
        let core = Arc::clone(&self.core);
        self.poller.start(period, move |live| {
            let core = Arc::clone(&core);
            async move { core.tick(live).await }
        });
    }

    pub async fn stop(&mut self) {
        if self.poller.stop() {
            // A cancelled cycle can't apply once we hold the write lock.
            let _barrier = self.core.state.write().await;
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    pub async fn shutdown(&mut self) {
        self.session.cancel();
        self.poller.stop();
        let _barrier = self.core.state.write().await;
        info!("dashboard session closed");
    }
}
