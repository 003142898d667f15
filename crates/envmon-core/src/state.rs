use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
    Failed,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionPhase::Disconnected => "disconnected",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Connected => "connected",
            ConnectionPhase::Degraded => "degraded",
            ConnectionPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub is_connected: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_update: Option<DateTime<Utc>>,
    pub phase: ConnectionPhase,
    pub fallback_active: bool,
}

impl ConnectivityState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            is_connected: false,
            retry_count: 0,
            max_retries,
            last_update: None,
            phase: ConnectionPhase::Disconnected,
            fallback_active: false,
        }
    }

    pub fn begin_connect(&mut self) {
        self.phase = ConnectionPhase::Connecting;
    }

    // Health answered but no data has arrived yet; the retry count stands.
    pub fn mark_reachable(&mut self) {
        self.is_connected = true;
    }

    pub fn mark_connected(&mut self, now: DateTime<Utc>) {
        self.is_connected = true;
        self.retry_count = 0;
        self.last_update = Some(now);
        self.phase = ConnectionPhase::Connected;
        self.fallback_active = false;
    }

    pub fn mark_disconnected(&mut self) {
        self.is_connected = false;
        if matches!(self.phase, ConnectionPhase::Connected | ConnectionPhase::Connecting) {
            self.phase = ConnectionPhase::Disconnected;
        }
    }

    pub fn retries_remaining(&self) -> u32 {
        self.max_retries.saturating_sub(self.retry_count)
    }
}
