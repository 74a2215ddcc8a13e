use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::clock::Clock;
use crate::transport::{HttpReply, HttpRequest, HttpTransport, TransportError};

pub(crate) fn epoch(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).expect("valid timestamp")
}

pub(crate) fn json_reply(status: u16, body: Value) -> HttpReply {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "",
    };
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    HttpReply {
        status,
        reason: reason.to_string(),
        headers,
        body: serde_json::to_vec(&body).expect("serializable body"),
    }
}

pub(crate) fn rate_limited_reply(reset: &str) -> HttpReply {
    let mut reply = json_reply(
        429,
        json!({ "error": { "message": "Rate limit reached for requests" } }),
    );
    reply.headers.insert(
        "x-ratelimit-remaining-requests".to_string(),
        "0".to_string(),
    );
    reply
        .headers
        .insert("x-ratelimit-reset-requests".to_string(), reset.to_string());
    reply
}

/// Scripted transport: POSTs pop replies in order, GETs look up by URL.
pub(crate) struct FakeTransport {
    replies: Mutex<VecDeque<Result<HttpReply, TransportError>>>,
    downloads: BTreeMap<String, HttpReply>,
    posts: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub(crate) fn new(replies: Vec<Result<HttpReply, TransportError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            downloads: BTreeMap::new(),
            posts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_download(mut self, url: &str, reply: HttpReply) -> Self {
        self.downloads.insert(url.to_string(), reply);
        self
    }

    pub(crate) fn posts(&self) -> Vec<HttpRequest> {
        self.posts.lock().expect("posts lock").clone()
    }
}

impl HttpTransport for FakeTransport {
    fn post_json(&self, request: &HttpRequest) -> Result<HttpReply, TransportError> {
        self.posts.lock().expect("posts lock").push(request.clone());
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(TransportError {
                    url: request.url.clone(),
                    message: "no scripted reply".to_string(),
                })
            })
    }

    fn get(&self, url: &str) -> Result<HttpReply, TransportError> {
        self.downloads
            .get(url)
            .cloned()
            .ok_or_else(|| TransportError {
                url: url.to_string(),
                message: "no scripted download".to_string(),
            })
    }
}

/// Clock that never blocks; sleeping advances `now` and is recorded.
pub(crate) struct FakeClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("sleeps lock").clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().expect("sleeps lock").push(duration);
        let mut now = self.now.lock().expect("clock lock");
        if let Ok(step) = chrono::Duration::from_std(duration) {
            *now += step;
        }
    }
}
