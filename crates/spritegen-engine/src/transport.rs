use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use thiserror::Error;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// A fully-read HTTP response. Header names are lower-case.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpReply {
    pub status: u16,
    pub reason: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_json(&self) -> bool {
        self.header("content-type")
            .map(|value| value.to_ascii_lowercase().contains("json"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("request to {url} failed: {message}")]
pub struct TransportError {
    pub url: String,
    pub message: String,
}

/// Network seam used by the dispatcher.
pub trait HttpTransport: Send + Sync {
    fn post_json(&self, request: &HttpRequest) -> Result<HttpReply, TransportError>;
    fn get(&self, url: &str) -> Result<HttpReply, TransportError>;
}

pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }

    fn execute(&self, url: &str, request: RequestBuilder) -> Result<HttpReply, TransportError> {
        let response = request
            .send()
            .map_err(|err| transport_error(url, &err))?;
        read_reply(url, response)
    }
}

impl HttpTransport for ReqwestTransport {
    fn post_json(&self, request: &HttpRequest) -> Result<HttpReply, TransportError> {
        let headers = header_map(&request.url, &request.headers)?;
        let builder = self
            .http
            .post(&request.url)
            .json(&request.body)
            .headers(headers);
        self.execute(&request.url, builder)
    }

    fn get(&self, url: &str) -> Result<HttpReply, TransportError> {
        self.execute(url, self.http.get(url))
    }
}

/// Later entries replace earlier ones, and replace whatever the builder
/// already set (such as the JSON content type).
fn header_map(url: &str, headers: &[(String, String)]) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|err| TransportError {
                url: url.to_string(),
                message: format!("invalid header name {name}: {err}"),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|err| TransportError {
            url: url.to_string(),
            message: format!("invalid value for header {name}: {err}"),
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn read_reply(url: &str, response: HttpResponse) -> Result<HttpReply, TransportError> {
    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|text| (name.as_str().to_ascii_lowercase(), text.to_string()))
        })
        .collect();
    let body = response
        .bytes()
        .map_err(|err| transport_error(url, &err))?
        .to_vec();
    Ok(HttpReply {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or_default().to_string(),
        headers,
        body,
    })
}

fn transport_error(url: &str, err: &reqwest::Error) -> TransportError {
    TransportError {
        url: url.to_string(),
        message: error_chain_text(err),
    }
}

fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty() && parts.last().map(String::as_str) != Some(trimmed) {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    parts.join(" | caused by: ")
}
