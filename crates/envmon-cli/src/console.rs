use chrono::{DateTime, Local, Utc};
use envmon_core::{AlertLevel, ChartPayload, ConnectivityState, DataSource, LatestReadings, Presenter};
use serde_json::json;
use tracing::error;

use crate::OutputFormat;

pub struct ConsolePresenter {
    format: OutputFormat,
}

impl ConsolePresenter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn emit_json(&self, value: serde_json::Value) {
        let rendered = match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&value),
            _ => serde_json::to_string(&value),
        };
        match rendered {
            Ok(line) => println!("{line}"),
            Err(err) => error!(error = %err, "failed to render event"),
        }
    }
}

impl Presenter for ConsolePresenter {
    fn on_state_change(&self, state: &ConnectivityState) {
        if self.format != OutputFormat::Human {
            self.emit_json(json!({"event": "state", "state": state}));
            return;
        }

        println!(
            "State:      phase={} connected={} retries={}/{} last_update={}",
            state.phase,
            state.is_connected,
            state.retry_count,
            state.max_retries,
            state
                .last_update
                .map(|ts| ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string()),
        );
    }

    fn on_data_update(&self, readings: &LatestReadings) {
        if self.format != OutputFormat::Human {
            self.emit_json(json!({"event": "readings", "readings": readings}));
            return;
        }

        let source = match readings.source {
            DataSource::Live => "live",
            DataSource::Mock => "sample data",
        };
        println!("=== Environmental Readings ({source}) ===");
        if readings.parameters.is_empty() {
            println!("  (no parameters reported)");
        }
        for (name, reading) in &readings.parameters {
            let unit = reading.unit.as_deref().unwrap_or("");
            let mut line = format!("  {name:<16} {:>10.2} {unit}", reading.value);
            if let Some(status) = &reading.status {
                line.push_str(&format!(" [{status}]"));
            }
            if let Some(station) = &reading.station {
                line.push_str(&format!(" @ {station}"));
            }
            println!("{line}");
        }
    }

    fn on_chart_data(&self, chart: &ChartPayload) {
        if self.format != OutputFormat::Human {
            self.emit_json(json!({"event": "chart", "chart": chart}));
            return;
        }

        println!("=== Environmental Chart ===");
        println!("  {:<20} {:>12} {:>12}", "label", "temp (C)", "humidity (%)");
        for (idx, label) in chart.labels.iter().enumerate() {
            let cell = |series: &[f64]| {
                series
                    .get(idx)
                    .map(|v| format!("{v:.1}"))
                    .unwrap_or_else(|| "-".to_string())
            };
            println!(
                "  {label:<20} {:>12} {:>12}",
                cell(&chart.temperature),
                cell(&chart.humidity)
            );
        }
    }

    fn on_tick(&self, at: DateTime<Utc>) {
        if self.format != OutputFormat::Human {
            self.emit_json(json!({"event": "tick", "at": at}));
            return;
        }
        println!(
            "Updated:    {}",
            at.with_timezone(&Local).format("%d/%m/%Y %H:%M")
        );
    }

    fn notify(&self, level: AlertLevel, message: &str) {
        if self.format != OutputFormat::Human {
            self.emit_json(json!({"event": "alert", "level": level, "message": message}));
            return;
        }

        let tag = match level {
            AlertLevel::Info => "INFO",
            AlertLevel::Success => "OK",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Danger => "ERROR",
        };
        eprintln!("[{tag}] {message}");
    }
}
