use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use spritegen_contracts::config::EffectiveConfig;
use spritegen_contracts::events::{EventWriter, RunEvent};
use spritegen_contracts::models::EndpointKind;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::payload::RequestPayload;
use crate::transport::{HttpReply, HttpRequest, HttpTransport, TransportError};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining-requests";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset-requests";

const ERROR_DETAIL_MAX_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Protocol,
    Extraction,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Extraction => "extraction",
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("HTTP {status} {reason}{}", detail_suffix(.details))]
    Http {
        status: u16,
        reason: String,
        details: Option<String>,
    },
    #[error("response body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("response body is not a JSON object")]
    NotAnObject,
    #[error("rate limit still exhausted after {0} waits")]
    RateLimitExhausted(u32),
    #[error("image download from {url} failed with HTTP {status}")]
    Download { url: String, status: u16 },
    #[error("no image data in response: {0}")]
    NoImage(String),
    #[error("image base64 decode failed: {0}")]
    Base64(String),
}

impl DispatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transport(_) => FailureKind::Transport,
            Self::Http { .. }
            | Self::InvalidJson(_)
            | Self::NotAnObject
            | Self::RateLimitExhausted(_)
            | Self::Download { .. } => FailureKind::Protocol,
            Self::NoImage(_) | Self::Base64(_) => FailureKind::Extraction,
        }
    }
}

fn detail_suffix(details: &Option<String>) -> String {
    details
        .as_deref()
        .map(|text| format!(": {text}"))
        .unwrap_or_default()
}

/// Target URL and headers for one endpoint shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl Endpoint {
    pub fn from_config(config: &EffectiveConfig, kind: EndpointKind, api_key: &str) -> Self {
        let base = config.text("api_base").unwrap_or(DEFAULT_API_BASE);
        let path = config.text("api_path").unwrap_or(kind.default_path());

        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), format!("Bearer {api_key}")),
        ];
        if let Some(org) = config.text("organization") {
            headers.push(("OpenAI-Organization".to_string(), org.to_string()));
        }
        if let Some(project) = config.text("project") {
            headers.push(("OpenAI-Project".to_string(), project.to_string()));
        }

        Self {
            url: join_url(base, path),
            headers,
        }
    }
}

pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Sends generation requests, waiting out exhausted rate limits, and pulls
/// image bytes out of either response shape.
pub struct Dispatcher<'a> {
    transport: &'a dyn HttpTransport,
    clock: &'a dyn Clock,
    max_rate_limit_waits: Option<u32>,
    events: Option<EventWriter>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(transport: &'a dyn HttpTransport, clock: &'a dyn Clock) -> Self {
        Self {
            transport,
            clock,
            max_rate_limit_waits: None,
            events: None,
        }
    }

    /// `None` keeps waiting for as long as the server keeps reporting zero
    /// remaining requests.
    pub fn with_max_rate_limit_waits(mut self, max_waits: Option<u32>) -> Self {
        self.max_rate_limit_waits = max_waits;
        self
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    pub fn generate(
        &self,
        endpoint: &Endpoint,
        payload: &RequestPayload,
    ) -> Result<Vec<u8>, DispatchError> {
        let body = self.send(endpoint, payload)?;
        self.extract_image(payload.kind(), &body)
    }

    pub fn send(
        &self,
        endpoint: &Endpoint,
        payload: &RequestPayload,
    ) -> Result<Map<String, Value>, DispatchError> {
        let request = HttpRequest {
            url: endpoint.url.clone(),
            headers: endpoint.headers.clone(),
            body: payload.to_json(),
        };
        let mut waits: u32 = 0;

        loop {
            debug!(url = %request.url, "sending generation request");
            let reply = self.transport.post_json(&request)?;
            let Some(wait) = rate_limit_wait(&reply, self.clock.now()) else {
                if reply.is_success() {
                    return decode_object(&reply);
                }
                return Err(http_failure(&reply));
            };
            if let Some(max_waits) = self.max_rate_limit_waits {
                if waits >= max_waits {
                    return Err(DispatchError::RateLimitExhausted(waits));
                }
            }
            waits += 1;
            warn!(
                url = %request.url,
                wait_s = wait.as_secs_f64(),
                "rate limit exhausted; waiting for reset"
            );
            self.record(RunEvent::RateLimited {
                url: request.url.clone(),
                wait_s: wait.as_secs_f64(),
            });
            self.clock.sleep(wait);
        }
    }

    /// Pulls the first image out of a decoded body; the endpoint kind picks
    /// the response shape.
    pub fn extract_image(
        &self,
        kind: EndpointKind,
        body: &Map<String, Value>,
    ) -> Result<Vec<u8>, DispatchError> {
        match kind {
            EndpointKind::Images => self.extract_images_shape(body),
            EndpointKind::Responses => extract_responses_shape(body),
        }
    }

    fn extract_images_shape(&self, body: &Map<String, Value>) -> Result<Vec<u8>, DispatchError> {
        let Some(item) = body
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(Value::as_object)
        else {
            return Err(DispatchError::NoImage("missing data[0]".to_string()));
        };

        if let Some(b64) = item.get("b64_json").and_then(Value::as_str) {
            return decode_base64(b64);
        }
        if let Some(url) = item.get("url").and_then(Value::as_str) {
            return self.download(url);
        }
        Err(DispatchError::NoImage(
            "data[0] carries neither b64_json nor url".to_string(),
        ))
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, DispatchError> {
        debug!(url, "downloading hosted image");
        let reply = self.transport.get(url)?;
        if !reply.is_success() {
            return Err(DispatchError::Download {
                url: url.to_string(),
                status: reply.status,
            });
        }
        Ok(reply.body)
    }

    fn record(&self, event: RunEvent) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.record(&event) {
            warn!("failed to record {} event: {err:#}", event.event_type());
        }
    }
}

fn extract_responses_shape(body: &Map<String, Value>) -> Result<Vec<u8>, DispatchError> {
    let result = body
        .get("output")
        .and_then(Value::as_array)
        .and_then(|items| {
            items.iter().find(|item| {
                item.get("type").and_then(Value::as_str) == Some("image_generation_call")
            })
        })
        .and_then(|item| item.get("result"))
        .and_then(Value::as_str);
    match result {
        Some(b64) => decode_base64(b64),
        None => Err(DispatchError::NoImage(
            "no image_generation_call result in output".to_string(),
        )),
    }
}

fn decode_base64(raw: &str) -> Result<Vec<u8>, DispatchError> {
    BASE64
        .decode(raw.trim().as_bytes())
        .map_err(|err| DispatchError::Base64(err.to_string()))
}

fn decode_object(reply: &HttpReply) -> Result<Map<String, Value>, DispatchError> {
    let parsed: Value = serde_json::from_slice(&reply.body)
        .map_err(|err| DispatchError::InvalidJson(err.to_string()))?;
    match parsed {
        Value::Object(map) => Ok(map),
        _ => Err(DispatchError::NotAnObject),
    }
}

fn http_failure(reply: &HttpReply) -> DispatchError {
    let details = if reply.is_json() {
        serde_json::from_slice::<Value>(&reply.body)
            .ok()
            .map(|value| error_details(&value))
            .filter(|text| !text.is_empty())
            .map(|text| truncate_text(&text, ERROR_DETAIL_MAX_CHARS))
    } else {
        None
    };
    DispatchError::Http {
        status: reply.status,
        reason: reply.reason.clone(),
        details,
    }
}

fn error_details(value: &Value) -> String {
    let error = value.get("error").unwrap_or(value);
    if let Some(message) = error.get("message").and_then(Value::as_str) {
        return message.trim().to_string();
    }
    if let Some(message) = error.as_str() {
        return message.trim().to_string();
    }
    value.to_string()
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

/// How long to wait before retrying, when the reply reports zero remaining
/// requests and carries a reset value.
pub fn rate_limit_wait(reply: &HttpReply, now: DateTime<Utc>) -> Option<Duration> {
    let remaining = reply.header(RATE_LIMIT_REMAINING_HEADER)?.trim();
    if remaining.parse::<u64>().ok()? != 0 {
        return None;
    }
    let reset = reply.header(RATE_LIMIT_RESET_HEADER)?;
    parse_reset(reset, now)
}

/// Plain numbers are epoch seconds; `6m0s`/`1.5s`/`250ms` style values are
/// relative durations.
pub fn parse_reset(raw: &str, now: DateTime<Utc>) -> Option<Duration> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(epoch_s) = trimmed.parse::<f64>() {
        let now_s = now.timestamp_millis() as f64 / 1000.0;
        let delta = epoch_s - now_s;
        if !delta.is_finite() {
            return None;
        }
        return Duration::try_from_secs_f64(delta.max(0.0)).ok();
    }
    parse_relative_duration(trimmed)
}

fn parse_relative_duration(raw: &str) -> Option<Duration> {
    let mut total_s = 0.0_f64;
    let mut rest = raw;
    while !rest.is_empty() {
        let number_len = rest
            .chars()
            .take_while(|ch| ch.is_ascii_digit() || *ch == '.')
            .count();
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];
        let unit_len = rest
            .chars()
            .take_while(|ch| ch.is_ascii_alphabetic())
            .count();
        let scale = match &rest[..unit_len] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 0.001,
            _ => return None,
        };
        total_s += value * scale;
        rest = &rest[unit_len..];
    }
    Duration::try_from_secs_f64(total_s).ok()
}
