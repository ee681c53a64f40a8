//! HTTP gateway transport.
//!
//! Each platform connection talks to a gateway process that holds the
//! platform's real long connection (SDK websocket, callback receiver) and
//! exposes it over plain HTTP: `GET /poll` long-polls for inbound frames,
//! `POST /send` submits an outbound frame and returns the platform's ack,
//! `GET /status` answers liveness. Credentials ride as headers on every
//! request; 401/403 from the gateway is the credential error class.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{RawFrame, Session, Transport, TransportError, TransportFactory};
use crate::config::PlatformSection;
use crate::types::Platform;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Request timeout for normal operations (status, send).
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Long-poll timeout; must exceed the gateway's server-side hold.
const POLL_TIMEOUT_SECS: u64 = 60;

/// Delay before re-polling after a non-success poll response.
const POLL_RETRY_DELAY_SECS: u64 = 5;

/// Longest error-body excerpt carried in an error message.
const MAX_ERROR_BODY_CHARS: usize = 256;

/// Shared gateway endpoint state: one HTTP client, base URL, auth headers.
struct Gateway {
    client: reqwest::Client,
    base_url: String,
    headers: Vec<(String, String)>,
}

impl Gateway {
    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder;
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        builder
    }
}

/// Transport for one platform gateway.
pub struct HttpTransport {
    gateway: Arc<Gateway>,
}

impl HttpTransport {
    /// Creates a transport for the gateway at `base_url`, attaching
    /// `headers` to every request.
    pub fn new(base_url: String, headers: Vec<(String, String)>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            gateway: Arc::new(Gateway {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                headers,
            }),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<Box<dyn Session>, TransportError> {
        let url = format!("{}/status", self.gateway.base_url);
        let resp = self
            .gateway
            .request(self.gateway.client.get(&url))
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Denied(short_body(&body)));
        }
        if !status.is_success() {
            return Err(TransportError::Connect(format!(
                "gateway status returned {status}"
            )));
        }

        Ok(Box::new(HttpSession {
            gateway: Arc::clone(&self.gateway),
            cursor: AtomicU64::new(0),
            buffer: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One page of frames from the gateway's poll endpoint.
#[derive(Deserialize)]
struct PollPage {
    /// Frames since the requested cursor.
    #[serde(default)]
    frames: Vec<RawFrame>,
    /// Cursor to request next.
    cursor: u64,
}

/// Live session against one gateway.
struct HttpSession {
    gateway: Arc<Gateway>,
    cursor: AtomicU64,
    buffer: Mutex<VecDeque<RawFrame>>,
    closed: AtomicBool,
}

impl HttpSession {
    fn pop_buffered(&self) -> Option<RawFrame> {
        self.buffer
            .lock()
            .ok()
            .and_then(|mut buffer| buffer.pop_front())
    }

    fn push_page(&self, page: PollPage) {
        // The cursor only advances once the page is buffered, so a poll
        // cancelled mid-flight is redelivered by the gateway.
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.extend(page.frames);
        }
        self.cursor.store(page.cursor, Ordering::Release);
    }
}

#[async_trait]
impl Session for HttpSession {
    async fn next_frame(&self) -> Result<RawFrame, TransportError> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Lost("session closed".to_string()));
            }
            if let Some(frame) = self.pop_buffered() {
                return Ok(frame);
            }

            let url = format!("{}/poll", self.gateway.base_url);
            let cursor = self.cursor.load(Ordering::Acquire);
            let result = self
                .gateway
                .request(self.gateway.client.get(&url))
                .query(&[("cursor", cursor)])
                .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS))
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let page: PollPage = resp.json().await?;
                    self.push_page(page);
                }
                Ok(resp)
                    if resp.status() == reqwest::StatusCode::UNAUTHORIZED
                        || resp.status() == reqwest::StatusCode::FORBIDDEN =>
                {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(TransportError::Denied(short_body(&body)));
                }
                Ok(resp) => {
                    // Gateway alive but unhappy; poll again after a pause.
                    debug!(status = %resp.status(), "frame poll returned non-success");
                    tokio::time::sleep(std::time::Duration::from_secs(POLL_RETRY_DELAY_SECS))
                        .await;
                }
                Err(e) if e.is_timeout() => {
                    // Normal: long-poll hold expired, re-poll immediately.
                }
                Err(e) => return Err(TransportError::Http(e)),
            }
        }
    }

    async fn send(&self, frame: RawFrame) -> Result<RawFrame, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Lost("session closed".to_string()));
        }
        let url = format!("{}/send", self.gateway.base_url);
        let resp = self
            .gateway
            .request(self.gateway.client.post(&url))
            .json(&frame)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.is_success() {
            let ack = serde_json::from_str(&body).unwrap_or(RawFrame::Null);
            return Ok(ack);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(TransportError::Denied(short_body(&body)));
        }
        if status.is_client_error() {
            return Err(TransportError::Rejected(short_body(&body)));
        }
        Err(TransportError::Lost(format!(
            "send failed with status {status}"
        )))
    }

    async fn ping(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Lost("session closed".to_string()));
        }
        let url = format!("{}/status", self.gateway.base_url);
        let resp = self
            .gateway
            .request(self.gateway.client.get(&url))
            .send()
            .await?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Denied(short_body(&body)));
        }
        if !status.is_success() {
            return Err(TransportError::Lost(format!(
                "gateway status returned {status}"
            )));
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Builds [`HttpTransport`]s from platform config sections.
///
/// Credential fields become `x-`-prefixed headers, e.g. feishu `app_secret`
/// rides as `x-app-secret`.
pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
    fn create(
        &self,
        platform: Platform,
        section: &PlatformSection,
    ) -> Result<Box<dyn Transport>, TransportError> {
        url::Url::parse(section.gateway_url()).map_err(|e| {
            TransportError::Connect(format!(
                "invalid gateway url {:?}: {e}",
                section.gateway_url()
            ))
        })?;
        let headers = credential_headers(section);
        debug!(%platform, url = section.gateway_url(), "building http transport");
        Ok(Box::new(HttpTransport::new(
            section.gateway_url().to_string(),
            headers,
        )))
    }
}

/// Maps a section's credential fields to request headers.
fn credential_headers(section: &PlatformSection) -> Vec<(String, String)> {
    section
        .credential_fields()
        .into_iter()
        .map(|(field, value)| (format!("x-{}", field.replace('_', "-")), value.to_string()))
        .collect()
}

/// Collapses whitespace and truncates an error body for log-safe messages.
fn short_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = collapsed
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }
    collapsed
}
