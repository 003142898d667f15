pub mod client;
pub mod config;
pub mod manager;
pub mod poller;
pub mod presenter;
pub mod reading;
pub mod retry;
pub mod state;

#[cfg(test)]
mod manager_tests;

pub use client::{
    ApiClient, ApiError, ApiResponse, ApiResult, ErrorKind, HttpRequest, HttpResponse, HttpTransport, Method,
    ReqwestTransport,
};
pub use config::{Backoff, MonitorConfig, RetryConfig};
pub use manager::{ConnectionManager, CycleOutcome, SubmitError};
pub use poller::Poller;
pub use presenter::{AlertLevel, Presenter};
pub use reading::{
    ChartPayload, DataSource, HistoryQuery, LatestReadings, MeasurementType, MonitoringReading, ParameterReading,
    ReadingDraft, ValidationError,
};
pub use retry::{RetryAction, RetryPolicy};
pub use state::{ConnectionPhase, ConnectivityState};
