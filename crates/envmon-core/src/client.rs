use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::reading::{ChartPayload, HistoryQuery, LatestReadings, MonitoringReading};

pub const HEALTH_ENDPOINT: &str = "/health";
pub const LATEST_ENDPOINT: &str = "/api/datos/recientes";
pub const SUBMIT_ENDPOINT: &str = "/api/monitoreo";
pub const HISTORY_ENDPOINT: &str = "/api/datos/historial";
pub const CHART_ENDPOINT: &str = "/api/datos/grafico";

const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    fn carries_body(self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Http(u16),
    Validation,
    Parse,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("parse error: {0}")]
    Parse(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Transport(_) => ErrorKind::Transport,
            ApiError::Http { status, .. } => ErrorKind::Http(*status),
            ApiError::Validation { .. } => ErrorKind::Validation,
            ApiError::Parse(_) => ErrorKind::Parse,
        }
    }
}

impl From<crate::reading::ValidationError> for ApiError {
    fn from(err: crate::reading::ValidationError) -> Self {
        ApiError::Validation {
            field: err.field,
            reason: err.reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub data: T,
    pub status: u16,
}

pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ApiError::Transport(format!("failed to build http client: {err}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .header(reqwest::header::CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(reqwest::header::ACCEPT, JSON_CONTENT_TYPE);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|err| {
            let reason = if err.is_timeout() { "timed out" } else { "failed" };
            ApiError::Transport(format!("{} {} {reason}: {err}", request.method, request.url))
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| ApiError::Transport(format!("reading response body: {err}")))?;

        Ok(HttpResponse { status, body })
    }
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, transport }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn request(&self, endpoint: &str, method: Method, body: Option<&Value>) -> ApiResult<Value> {
        let url = format!("{}{}", self.base_url, endpoint);

        let body = match body {
            Some(value) if method.carries_body() => Some(
                serde_json::to_string(value)
                    .map_err(|err| ApiError::Parse(format!("failed to encode request body: {err}")))?,
            ),
            _ => None,
        };

        debug!(%method, %url, has_body = body.is_some(), "api request");
        let response = self
            .transport
            .send(HttpRequest {
                method,
                url: url.clone(),
                body,
            })
            .await?;
        debug!(%method, %url, status = response.status, bytes = response.body.len(), "api response");

        if !(200..300).contains(&response.status) {
            return Err(ApiError::Http {
                status: response.status,
                message: truncate(&response.body, 200),
            });
        }

        let data = if response.body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&response.body)
                .map_err(|err| ApiError::Parse(format!("{method} {url}: {err}")))?
        };

        Ok(ApiResponse {
            data,
            status: response.status,
        })
    }

    pub async fn health(&self) -> ApiResult<Value> {
        self.request(HEALTH_ENDPOINT, Method::Get, None).await
    }

    pub async fn latest(&self) -> ApiResult<LatestReadings> {
        let response = self.request(LATEST_ENDPOINT, Method::Get, None).await?;
        let data = LatestReadings::from_json(&response.data)
            .ok_or_else(|| ApiError::Parse("latest readings must be a JSON object".to_string()))?;
        Ok(ApiResponse {
            data,
            status: response.status,
        })
    }

    pub async fn submit(&self, reading: &MonitoringReading) -> ApiResult<Value> {
        let body = serde_json::to_value(reading)
            .map_err(|err| ApiError::Parse(format!("failed to encode reading: {err}")))?;
        self.request(SUBMIT_ENDPOINT, Method::Post, Some(&body)).await
    }

    pub async fn history(&self, query: &HistoryQuery) -> ApiResult<Vec<Value>> {
        let endpoint = format!("{HISTORY_ENDPOINT}?{}", query.to_query_string());
        let response = self.request(&endpoint, Method::Get, None).await?;
        let data = serde_json::from_value(response.data)
            .map_err(|err| ApiError::Parse(format!("history must be a JSON array: {err}")))?;
        Ok(ApiResponse {
            data,
            status: response.status,
        })
    }

    pub async fn chart(&self) -> ApiResult<ChartPayload> {
        let response = self.request(CHART_ENDPOINT, Method::Get, None).await?;
        let data = serde_json::from_value(response.data)
            .map_err(|err| ApiError::Parse(format!("invalid chart payload: {err}")))?;
        Ok(ApiResponse {
            data,
            status: response.status,
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
