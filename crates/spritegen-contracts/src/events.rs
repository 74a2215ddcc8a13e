use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::runs::RunCounters;

pub type EventPayload = Map<String, Value>;

/// Something worth recording in a run's `events.jsonl`.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    RunStarted {
        spec: String,
        out_dir: String,
        limit: usize,
        endpoint: String,
        dry_run: bool,
    },
    AssetSkipped {
        filename: String,
    },
    AssetCreated {
        filename: String,
        prompt_sha256: String,
        bytes: usize,
    },
    AssetFailed {
        filename: String,
        kind: String,
        error: String,
    },
    RateLimited {
        url: String,
        wait_s: f64,
    },
    RunFinished {
        counters: RunCounters,
        aborted: bool,
    },
}

impl RunEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::AssetSkipped { .. } => "asset_skipped",
            Self::AssetCreated { .. } => "asset_created",
            Self::AssetFailed { .. } => "asset_failed",
            Self::RateLimited { .. } => "rate_limited",
            Self::RunFinished { .. } => "run_finished",
        }
    }

    pub fn payload(&self) -> EventPayload {
        let value = match self {
            Self::RunStarted {
                spec,
                out_dir,
                limit,
                endpoint,
                dry_run,
            } => json!({
                "spec": spec,
                "out_dir": out_dir,
                "limit": limit,
                "endpoint": endpoint,
                "dry_run": dry_run,
            }),
            Self::AssetSkipped { filename } => json!({ "filename": filename }),
            Self::AssetCreated {
                filename,
                prompt_sha256,
                bytes,
            } => json!({
                "filename": filename,
                "prompt_sha256": prompt_sha256,
                "bytes": bytes,
            }),
            Self::AssetFailed {
                filename,
                kind,
                error,
            } => json!({
                "filename": filename,
                "kind": kind,
                "error": error,
            }),
            Self::RateLimited { url, wait_s } => json!({ "url": url, "wait_s": wait_s }),
            Self::RunFinished { counters, aborted } => json!({
                "created": counters.created,
                "remaining": counters.remaining,
                "total": counters.total,
                "aborted": aborted,
            }),
        };
        value.as_object().cloned().unwrap_or_default()
    }
}

/// Append-only writer for `events.jsonl`.
///
/// - default fields are `type`, `run_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn record(&self, event: &RunEvent) -> anyhow::Result<Value> {
        self.emit(event.event_type(), event.payload())
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
