use super::{validate_script_path, RunApi};
use crate::error::{SubmissionError, TransportError};
use crate::model::{EpochSeconds, MonitorConfig, RunId, StatusSnapshot, Submission};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest slice of a non-JSON error body carried into an error message.
const MAX_ERROR_BODY: usize = 200;

/// Decoded executor reply.
#[derive(Debug)]
pub(crate) enum Reply<T> {
    Ok(T),
    /// The executor answered with an error envelope.
    Rejected { status: u16, message: String },
}

impl<T> Reply<T> {
    /// Treat an error envelope as a transport failure.
    pub(crate) fn into_transport(self) -> Result<T, TransportError> {
        match self {
            Reply::Ok(v) => Ok(v),
            Reply::Rejected { status, message } => Err(TransportError::Status { status, message }),
        }
    }
}

/// Shared HTTP plumbing for the run and file clients.
#[derive(Debug, Clone)]
pub(crate) struct ApiTransport {
    pub http: reqwest::Client,
    base_url: String,
}

impl ApiTransport {
    pub fn new(cfg: &MonitorConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<Reply<T>, TransportError> {
        let resp = request
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = resp.status();
        let body = resp.text().await.map_err(|source| TransportError::Request {
            url: url.to_string(),
            source,
        })?;

        // Every executor endpoint answers either with its payload or with `{"error": ...}`.
        let value = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(value) => value,
            Err(source) if status.is_success() => {
                return Err(TransportError::Decode {
                    url: url.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    message: truncate_body(&body),
                })
            }
        };
        if let Some(error) = value.get("error").and_then(serde_json::Value::as_str) {
            return Ok(Reply::Rejected {
                status: status.as_u16(),
                message: error.to_string(),
            });
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("unexpected status").to_string(),
            });
        }
        serde_json::from_value(value)
            .map(Reply::Ok)
            .map_err(|source| TransportError::Decode {
                url: url.to_string(),
                source,
            })
    }
}

fn truncate_body(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    path: &'a str,
    args: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SubmitReply {
    run_id: RunId,
    #[serde(default)]
    started_at: Option<EpochSeconds>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LogReply {
    #[serde(default)]
    log: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthReply {
    #[serde(default)]
    ok: bool,
}

/// [`RunApi`] over the executor's JSON HTTP API.
#[derive(Debug, Clone)]
pub(crate) struct HttpRunClient {
    transport: ApiTransport,
    log_tail_kb: Option<u32>,
}

impl HttpRunClient {
    pub fn new(cfg: &MonitorConfig) -> Result<Self> {
        Ok(Self {
            transport: ApiTransport::new(cfg)?,
            log_tail_kb: cfg.log_tail_kb,
        })
    }

    /// `GET /health`; true when the executor answers `{"ok": true}`.
    pub async fn health(&self) -> Result<bool, TransportError> {
        let url = self.transport.url("/health");
        let req = self.transport.http.get(&url);
        let reply: HealthReply = self.transport.execute(req, &url).await?.into_transport()?;
        Ok(reply.ok)
    }
}

#[async_trait]
impl RunApi for HttpRunClient {
    async fn submit(&self, path: &str, args: &[String]) -> Result<Submission, SubmissionError> {
        let path = validate_script_path(path)?;
        let url = self.transport.url("/api/run");
        let req = self
            .transport
            .http
            .post(&url)
            .json(&SubmitRequest { path, args });

        tracing::debug!(%url, path, ?args, "submitting run");
        match self.transport.execute::<SubmitReply>(req, &url).await? {
            Reply::Ok(reply) => Ok(Submission {
                run_id: reply.run_id,
                started_at: reply.started_at,
                timeout: reply.timeout_ms.map(Duration::from_millis),
            }),
            Reply::Rejected { message, .. } => Err(SubmissionError::Rejected(message)),
        }
    }

    async fn fetch_status(&self, id: &RunId) -> Result<StatusSnapshot, TransportError> {
        let url = self.transport.url("/api/run/status");
        let req = self
            .transport
            .http
            .get(&url)
            .query(&[("run_id", id.as_str())]);
        self.transport.execute(req, &url).await?.into_transport()
    }

    async fn fetch_log(&self, id: &RunId) -> Result<String, TransportError> {
        let url = self.transport.url("/api/run/log");
        let mut req = self
            .transport
            .http
            .get(&url)
            .query(&[("run_id", id.as_str())]);
        if let Some(kb) = self.log_tail_kb {
            req = req.query(&[("tail_kb", kb)]);
        }
        let reply: LogReply = self.transport.execute(req, &url).await?.into_transport()?;
        Ok(reply.log.unwrap_or_default())
    }
}
