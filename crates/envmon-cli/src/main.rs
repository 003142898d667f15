use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use envmon_core::config::DEFAULT_BASE_URL;
use envmon_core::{
    ApiClient, Backoff, ConnectionManager, HistoryQuery, HttpTransport, MeasurementType, MonitorConfig, ReadingDraft,
    ReqwestTransport, RetryConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod console;
mod viewer;

use console::ConsolePresenter;

#[derive(Debug, Parser)]
#[command(name = "envmon")]
#[command(about = "Environmental monitoring dashboard client")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, env = "ENVMON_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, default_value_t = 30_000)]
    interval_ms: u64,

    #[arg(long, default_value_t = 5_000)]
    retry_delay_ms: u64,

    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    #[arg(long, value_enum, default_value = "fixed")]
    backoff: BackoffKind,

    #[arg(long, default_value_t = 60_000)]
    max_retry_delay_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
}

impl Cli {
    fn monitor_config(&self) -> MonitorConfig {
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Exponential => Backoff::Exponential {
                max_delay: Duration::from_millis(self.max_retry_delay_ms),
            },
        };

        MonitorConfig {
            base_url: self.base_url.clone(),
            poll_interval: Duration::from_millis(self.interval_ms),
            request_timeout: Duration::from_millis(self.timeout_ms),
            retry: RetryConfig {
                max_retries: self.max_retries,
                delay: Duration::from_millis(self.retry_delay_ms),
                backoff,
            },
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    Health,
    Latest {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    Submit {
        #[arg(long, allow_negative_numbers = true)]
        temperature: Option<f64>,
        #[arg(long)]
        humidity: Option<f64>,
        #[arg(long, default_value = "")]
        observations: String,
        #[arg(long, value_enum, default_value = "manual")]
        measurement_type: MeasurementKind,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    History {
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, default_value_t = HistoryQuery::DEFAULT_LIMIT)]
        limit: u32,
    },
    Chart {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    Watch {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    View {
        #[arg(long, default_value_t = 600.0)]
        window_sec: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MeasurementKind {
    Manual,
    Automatic,
}

impl From<MeasurementKind> for MeasurementType {
    fn from(kind: MeasurementKind) -> Self {
        match kind {
            MeasurementKind::Manual => MeasurementType::Manual,
            MeasurementKind::Automatic => MeasurementType::Automatic,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = cli.monitor_config();
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(config.request_timeout)?);

    match cli.command {
        Command::Health => {
            let client = ApiClient::new(config.base_url.clone(), transport);
            let response = client.health().await?;
            let out = serde_json::json!({
                "base_url": client.base_url(),
                "status": response.status,
                "body": response.data,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Latest { format } => {
            let manager = console_manager(&config, transport, format);
            let outcome = manager.refresh().await?;
            info!(?outcome, "latest readings loaded");
        }
        Command::Submit {
            temperature,
            humidity,
            observations,
            measurement_type,
            format,
        } => {
            let manager = console_manager(&config, transport, format);
            manager.check_connection().await;
            let draft = ReadingDraft {
                temperature,
                humidity,
                observations,
                measurement_type: measurement_type.into(),
            };
            manager.submit(draft).await?;
        }
        Command::History { from, to, limit } => {
            let manager = console_manager(&config, transport, OutputFormat::Json);
            let to = to.unwrap_or_else(|| Utc::now().date_naive());
            let mut query = HistoryQuery::last_week(to);
            if let Some(from) = from {
                query.from = from;
            }
            query.limit = limit;
            let rows = manager.history(&query).await;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Command::Chart { format } => {
            let manager = console_manager(&config, transport, format);
            manager.check_connection().await;
            manager.chart_data().await;
        }
        Command::Watch { format } => {
            let mut manager = console_manager(&config, transport, format);
            watch(&mut manager).await?;
        }
        Command::View { window_sec } => {
            viewer::run_viewer(&config, transport, window_sec).await?;
        }
    }

    Ok(())
}

fn console_manager(config: &MonitorConfig, transport: Arc<dyn HttpTransport>, format: OutputFormat) -> ConnectionManager {
    ConnectionManager::new(config, transport, Arc::new(ConsolePresenter::new(format)))
}

async fn watch(manager: &mut ConnectionManager) -> Result<()> {
    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        _ = manager.initialize() => false,
    };

    if !interrupted {
        tokio::signal::ctrl_c().await?;
    }
    warn!("received ctrl-c, stopping");
    manager.shutdown().await;
    Ok(())
}
