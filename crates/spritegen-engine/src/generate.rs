use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use spritegen_contracts::config::{resolve_api_key, ConfigError, EffectiveConfig};
use spritegen_contracts::events::{EventWriter, RunEvent};
use spritegen_contracts::models::EndpointKind;
use spritegen_contracts::runs::RunCounters;
use spritegen_contracts::spec::{Asset, SpecDocument};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::dispatch::{DispatchError, Dispatcher, Endpoint};
use crate::payload::{build_payload, RequestPayload};
use crate::transport::HttpTransport;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl AssetError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dispatch(err) => err.kind().as_str(),
            Self::Write { .. } => "write",
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to create output directory {}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("generation aborted at {filename} ({counters})")]
    Aborted {
        filename: String,
        counters: RunCounters,
        #[source]
        source: AssetError,
    },
}

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub spec_path: PathBuf,
    pub out_dir: PathBuf,
    /// Maximum number of new images this invocation may create.
    pub limit: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub counters: RunCounters,
    pub failed: Vec<String>,
    pub planned: Vec<String>,
}

pub struct Generator<'a> {
    transport: &'a dyn HttpTransport,
    clock: &'a dyn Clock,
    events: Option<EventWriter>,
    max_rate_limit_waits: Option<u32>,
}

impl<'a> Generator<'a> {
    pub fn new(transport: &'a dyn HttpTransport, clock: &'a dyn Clock) -> Self {
        Self {
            transport,
            clock,
            events: None,
            max_rate_limit_waits: None,
        }
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    pub fn with_max_rate_limit_waits(mut self, max_waits: Option<u32>) -> Self {
        self.max_rate_limit_waits = max_waits;
        self
    }

    /// Creates up to `options.limit` missing assets, in spec order.
    ///
    /// Existing output files are skipped without any request. A per-asset
    /// failure aborts the run unless `continue_on_error` is set; either way
    /// the counters are recomputed from the output directory.
    pub fn run(
        &self,
        spec: &SpecDocument,
        config: &EffectiveConfig,
        options: &GenerationOptions,
    ) -> Result<RunReport, RunError> {
        let kind = EndpointKind::for_model(config.text("model"));
        let api_key = match resolve_api_key(config) {
            Ok(key) => key,
            Err(_) if options.dry_run => String::new(),
            Err(err) => return Err(err.into()),
        };
        let endpoint = Endpoint::from_config(config, kind, &api_key);

        if !options.dry_run {
            fs::create_dir_all(&options.out_dir).map_err(|source| RunError::OutputDir {
                path: options.out_dir.clone(),
                source,
            })?;
        }

        self.record(RunEvent::RunStarted {
            spec: options.spec_path.display().to_string(),
            out_dir: options.out_dir.display().to_string(),
            limit: options.limit,
            endpoint: endpoint.url.clone(),
            dry_run: options.dry_run,
        });

        let dispatcher = Dispatcher::new(self.transport, self.clock)
            .with_max_rate_limit_waits(self.max_rate_limit_waits)
            .with_events(self.events.clone());
        let continue_on_error = config.continue_on_error();
        let mut created = 0;
        let mut failed: Vec<String> = Vec::new();
        let mut planned: Vec<String> = Vec::new();

        for asset in &spec.assets {
            if created + planned.len() >= options.limit {
                break;
            }
            let dest = options.out_dir.join(&asset.filename);
            if dest.exists() {
                debug!(filename = %asset.filename, "output exists; skipping");
                self.record(RunEvent::AssetSkipped {
                    filename: asset.filename.clone(),
                });
                continue;
            }

            let prompt = compose_prompt(&spec.preamble, &asset.detail);
            let payload = build_payload(&prompt, &asset.filename, config);
            debug!(
                filename = %asset.filename,
                payload = %payload.to_json(),
                "built {:?} payload",
                payload.kind()
            );

            if options.dry_run {
                info!(filename = %asset.filename, url = %endpoint.url, "dry run; request not sent");
                planned.push(asset.filename.clone());
                continue;
            }

            match self.generate_asset(&dispatcher, &endpoint, asset, &dest, &prompt, &payload) {
                Ok(byte_count) => {
                    created += 1;
                    info!("✓ {}", asset.filename);
                    self.record(RunEvent::AssetCreated {
                        filename: asset.filename.clone(),
                        prompt_sha256: prompt_digest(&prompt),
                        bytes: byte_count,
                    });
                }
                Err(err) => {
                    warn!("⚠️  {}: {err:#}", asset.filename);
                    self.record(RunEvent::AssetFailed {
                        filename: asset.filename.clone(),
                        kind: err.kind().to_string(),
                        error: format!("{err:#}"),
                    });
                    if !continue_on_error {
                        let counters = RunCounters::snapshot(created, &spec.assets, &options.out_dir);
                        self.record(RunEvent::RunFinished {
                            counters,
                            aborted: true,
                        });
                        return Err(RunError::Aborted {
                            filename: asset.filename.clone(),
                            counters,
                            source: err,
                        });
                    }
                    failed.push(asset.filename.clone());
                }
            }
        }

        let counters = RunCounters::snapshot(created, &spec.assets, &options.out_dir);
        self.record(RunEvent::RunFinished {
            counters,
            aborted: false,
        });
        Ok(RunReport {
            counters,
            failed,
            planned,
        })
    }

    fn generate_asset(
        &self,
        dispatcher: &Dispatcher<'_>,
        endpoint: &Endpoint,
        asset: &Asset,
        dest: &Path,
        prompt: &str,
        payload: &RequestPayload,
    ) -> Result<usize, AssetError> {
        let bytes = dispatcher.generate(endpoint, payload)?;
        write_outputs(dest, &asset.filename, prompt, &bytes)?;
        Ok(bytes.len())
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

pub fn compose_prompt(preamble: &str, detail: &str) -> String {
    format!("{preamble} {detail}").trim().to_string()
}

/// Sibling description file: `tile.png` → `tile.md`. An asset that is itself
/// a `.md` file gets `notes.prompt.md` so the image is never overwritten.
pub fn description_path(dest: &Path) -> PathBuf {
    let is_markdown = dest
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md"));
    if is_markdown {
        dest.with_extension("prompt.md")
    } else {
        dest.with_extension("md")
    }
}

pub fn description_text(filename: &str, prompt: &str) -> String {
    format!("# Prompt for {filename}\n\n```\n{prompt}\n```\n")
}

/// The description goes down first; the image file is the resume marker, so
/// it only appears once both writes succeed.
fn write_outputs(dest: &Path, filename: &str, prompt: &str, bytes: &[u8]) -> Result<(), AssetError> {
    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| AssetError::Write { path, source }
    };
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(write_err(parent))?;
    }
    let md_path = description_path(dest);
    fs::write(&md_path, description_text(filename, prompt)).map_err(write_err(&md_path))?;
    if let Err(source) = fs::write(dest, bytes) {
        let _ = fs::remove_file(dest);
        let _ = fs::remove_file(&md_path);
        return Err(write_err(dest)(source));
    }
    Ok(())
}

fn prompt_digest(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde_json::{json, Value};
    use spritegen_contracts::config::{ConfigMap, ConfigValue, EffectiveConfig};
    use spritegen_contracts::events::EventWriter;
    use spritegen_contracts::runs::RunCounters;
    use spritegen_contracts::spec::parse_spec;

    use super::{
        compose_prompt, description_path, description_text, GenerationOptions, Generator,
        RunError,
    };
    use crate::testing::{epoch, json_reply, FakeClock, FakeTransport};
    use crate::transport::{HttpReply, TransportError};

    fn config(rows: &[(&str, &str)]) -> EffectiveConfig {
        let mut values = ConfigMap::new();
        values.insert("api_key".to_string(), ConfigValue::from("sk-test"));
        for (key, value) in rows {
            values.insert(key.to_string(), ConfigValue::from(*value));
        }
        EffectiveConfig::new(values)
    }

    fn image_reply(bytes: &[u8]) -> Result<HttpReply, TransportError> {
        Ok(json_reply(200, json!({ "data": [{ "b64_json": BASE64.encode(bytes) }] })))
    }

    fn options(out_dir: &std::path::Path, limit: usize) -> GenerationOptions {
        GenerationOptions {
            spec_path: "assets.spec".into(),
            out_dir: out_dir.to_path_buf(),
            limit,
            dry_run: false,
        }
    }

    #[test]
    fn limit_one_creates_first_asset_only() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let spec = parse_spec("PROMPT A\nASSET a.png b\nASSET b.png c\n")?;
        let transport = FakeTransport::new(vec![image_reply(b"image-a")]);
        let clock = FakeClock::new(epoch(0));

        let report = Generator::new(&transport, &clock).run(
            &spec,
            &config(&[]),
            &options(temp.path(), 1),
        )?;

        assert_eq!(transport.posts().len(), 1);
        assert_eq!(transport.posts()[0].body["prompt"], json!("A b"));
        assert_eq!(fs::read(temp.path().join("a.png"))?, b"image-a");
        assert_eq!(
            fs::read_to_string(temp.path().join("a.md"))?,
            "# Prompt for a.png\n\n```\nA b\n```\n"
        );
        assert!(!temp.path().join("b.png").exists());
        assert_eq!(report.counters.to_string(), "Created 1; 1 remaining; 2 total.");
        Ok(())
    }

    #[test]
    fn second_run_over_complete_output_issues_no_requests() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let spec = parse_spec("PROMPT A\nASSET a.png b\nASSET b.png c\n")?;
        let clock = FakeClock::new(epoch(0));

        let first = FakeTransport::new(vec![image_reply(b"a"), image_reply(b"b")]);
        let report = Generator::new(&first, &clock).run(&spec, &config(&[]), &options(temp.path(), 5))?;
        assert_eq!(report.counters.created, 2);

        for _ in 0..2 {
            let idle = FakeTransport::new(Vec::new());
            let report =
                Generator::new(&idle, &clock).run(&spec, &config(&[]), &options(temp.path(), 5))?;
            assert_eq!(
                report.counters,
                RunCounters {
                    created: 0,
                    remaining: 0,
                    total: 2,
                }
            );
            assert!(idle.posts().is_empty());
        }
        Ok(())
    }

    #[test]
    fn failure_aborts_run_without_continue_on_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let spec = parse_spec("ASSET a.png one\nASSET b.png two\n")?;
        let transport = FakeTransport::new(vec![
            Ok(json_reply(500, json!({ "error": { "message": "boom" } }))),
            image_reply(b"b"),
        ]);
        let clock = FakeClock::new(epoch(0));

        let err = Generator::new(&transport, &clock)
            .run(&spec, &config(&[]), &options(temp.path(), 5))
            .err();
        match err {
            Some(RunError::Aborted {
                filename,
                counters,
                source,
            }) => {
                assert_eq!(filename, "a.png");
                assert_eq!(source.kind(), "protocol");
                assert_eq!(counters.remaining, 2);
            }
            other => panic!("expected aborted run, got {other:?}"),
        }
        assert_eq!(transport.posts().len(), 1);
        assert!(!temp.path().join("b.png").exists());
        Ok(())
    }

    #[test]
    fn continue_on_error_moves_to_next_asset() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let spec = parse_spec("ASSET a.png one\nASSET b.png two\nASSET c.png three\n")?;
        let transport = FakeTransport::new(vec![
            Ok(json_reply(200, json!({ "data": [] }))),
            image_reply(b"b"),
            image_reply(b"c"),
        ]);
        let clock = FakeClock::new(epoch(0));

        let report = Generator::new(&transport, &clock).run(
            &spec,
            &config(&[("continue_on_error", "yes")]),
            &options(temp.path(), 2),
        )?;

        assert_eq!(report.failed, vec!["a.png".to_string()]);
        assert_eq!(report.counters.to_string(), "Created 2; 1 remaining; 3 total.");
        assert!(temp.path().join("c.png").exists());
        assert_eq!(transport.posts().len(), 3);
        Ok(())
    }

    #[test]
    fn missing_credential_fails_before_any_request() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let spec = parse_spec("ASSET a.png one\n")?;
        let transport = FakeTransport::new(Vec::new());
        let clock = FakeClock::new(epoch(0));

        let err = Generator::new(&transport, &clock)
            .run(&spec, &EffectiveConfig::default(), &options(temp.path(), 1))
            .err();
        assert!(matches!(err, Some(RunError::Config(_))));
        assert!(transport.posts().is_empty());
        Ok(())
    }

    #[test]
    fn dry_run_plans_without_network_or_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let out_dir = temp.path().join("out");
        let spec = parse_spec("ASSET a.png one\nASSET b.png two\nASSET c.png three\n")?;
        let transport = FakeTransport::new(Vec::new());
        let clock = FakeClock::new(epoch(0));

        let report = Generator::new(&transport, &clock).run(
            &spec,
            &EffectiveConfig::default(),
            &GenerationOptions {
                spec_path: "assets.spec".into(),
                out_dir: out_dir.clone(),
                limit: 2,
                dry_run: true,
            },
        )?;
        assert_eq!(report.planned, vec!["a.png".to_string(), "b.png".to_string()]);
        assert_eq!(report.counters.created, 0);
        assert_eq!(report.counters.remaining, 3);
        assert!(transport.posts().is_empty());
        assert!(!out_dir.exists());
        Ok(())
    }

    #[test]
    fn responses_model_writes_tool_result() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let spec = parse_spec("PROMPT pixel art\nASSET tiles/grass.png grass tile\n")?;
        let transport = FakeTransport::new(vec![Ok(json_reply(
            200,
            json!({
                "output": [
                    { "type": "image_generation_call", "result": BASE64.encode(b"grass") }
                ]
            }),
        ))]);
        let clock = FakeClock::new(epoch(0));

        Generator::new(&transport, &clock).run(
            &spec,
            &config(&[("model", "gpt-5.2"), ("organization", "org-9")]),
            &options(temp.path(), 1),
        )?;

        let posts = transport.posts();
        assert_eq!(posts[0].url, "https://api.openai.com/v1/responses");
        assert_eq!(posts[0].body["input"], json!("pixel art grass tile"));
        assert!(posts[0]
            .headers
            .contains(&("OpenAI-Organization".to_string(), "org-9".to_string())));
        assert_eq!(fs::read(temp.path().join("tiles/grass.png"))?, b"grass");
        assert!(temp.path().join("tiles/grass.md").exists());
        Ok(())
    }

    #[test]
    fn events_log_records_run_lifecycle() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        fs::write(temp.path().join("a.png"), b"existing")?;
        let spec = parse_spec("ASSET a.png one\nASSET b.png two\n")?;
        let transport = FakeTransport::new(vec![image_reply(b"b")]);
        let clock = FakeClock::new(epoch(0));

        Generator::new(&transport, &clock)
            .with_events(Some(EventWriter::new(&events_path, "run-1")))
            .run(&spec, &config(&[]), &options(temp.path(), 1))?;

        let raw = fs::read_to_string(events_path)?;
        let rows: Vec<Value> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .collect();
        let types: Vec<&str> = rows
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str))
            .collect();
        assert_eq!(
            types,
            vec!["run_started", "asset_skipped", "asset_created", "run_finished"]
        );
        assert_eq!(rows[2]["prompt_sha256"].as_str().map(str::len), Some(64));
        assert_eq!(rows[3]["remaining"], json!(0));
        Ok(())
    }

    #[test]
    fn unwritable_output_is_a_write_failure() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("blocked"), b"not a directory")?;
        let spec = parse_spec("ASSET blocked/a.png one\nASSET b.png two\n")?;
        let clock = FakeClock::new(epoch(0));

        let transport = FakeTransport::new(vec![image_reply(b"a")]);
        let err = Generator::new(&transport, &clock)
            .run(&spec, &config(&[]), &options(temp.path(), 2))
            .err();
        match err {
            Some(RunError::Aborted {
                filename, source, ..
            }) => {
                assert_eq!(filename, "blocked/a.png");
                assert_eq!(source.kind(), "write");
            }
            other => panic!("expected aborted run, got {other:?}"),
        }
        assert!(!temp.path().join("b.png").exists());

        let transport = FakeTransport::new(vec![image_reply(b"a"), image_reply(b"b")]);
        let report = Generator::new(&transport, &clock).run(
            &spec,
            &config(&[("continue_on_error", "true")]),
            &options(temp.path(), 2),
        )?;
        assert_eq!(report.failed, vec!["blocked/a.png".to_string()]);
        assert_eq!(fs::read(temp.path().join("b.png"))?, b"b");
        assert_eq!(report.counters.to_string(), "Created 1; 1 remaining; 2 total.");
        Ok(())
    }

    #[test]
    fn failed_description_write_leaves_no_image() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::create_dir(temp.path().join("c.md"))?;
        let spec = parse_spec("ASSET c.png one\n")?;
        let transport = FakeTransport::new(vec![image_reply(b"c")]);
        let clock = FakeClock::new(epoch(0));

        let err = Generator::new(&transport, &clock)
            .run(&spec, &config(&[]), &options(temp.path(), 1))
            .err();
        assert!(matches!(
            err,
            Some(RunError::Aborted { ref source, .. }) if source.kind() == "write"
        ));
        assert!(!temp.path().join("c.png").exists());

        assert_eq!(RunCounters::snapshot(0, &spec.assets, temp.path()).remaining, 1);
        Ok(())
    }

    #[test]
    fn markdown_asset_keeps_its_own_bytes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let spec = parse_spec("ASSET notes.md release notes\n")?;
        let transport = FakeTransport::new(vec![image_reply(b"generated")]);
        let clock = FakeClock::new(epoch(0));

        Generator::new(&transport, &clock).run(&spec, &config(&[]), &options(temp.path(), 1))?;
        assert_eq!(fs::read(temp.path().join("notes.md"))?, b"generated");
        assert!(fs::read_to_string(temp.path().join("notes.prompt.md"))?
            .starts_with("# Prompt for notes.md"));
        Ok(())
    }

    #[test]
    fn prompt_and_description_helpers() {
        assert_eq!(compose_prompt("", "  detail "), "detail");
        assert_eq!(compose_prompt("Shared.", "tile"), "Shared. tile");
        assert_eq!(
            description_path(std::path::Path::new("out/road.webp")),
            std::path::Path::new("out/road.md")
        );
        assert_eq!(
            description_path(std::path::Path::new("out/Readme.MD")),
            std::path::Path::new("out/Readme.prompt.md")
        );
        assert!(description_text("x.png", "p").contains("```\np\n```"));
    }
}
