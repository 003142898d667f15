use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reading::{ChartPayload, LatestReadings};
use crate::state::ConnectivityState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Success,
    Warning,
    Danger,
}

// May be called with the state lock held; must not block.
pub trait Presenter: Send + Sync {
    fn on_state_change(&self, state: &ConnectivityState);
    fn on_data_update(&self, readings: &LatestReadings);
    fn on_chart_data(&self, chart: &ChartPayload);
    fn on_tick(&self, at: DateTime<Utc>);
    fn notify(&self, level: AlertLevel, message: &str);
}
