use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use spritegen_contracts::config::{env_snapshot, merge_config, ConfigMap, ConfigValue};
use spritegen_contracts::events::EventWriter;
use spritegen_contracts::spec::load_spec;
use spritegen_engine::{GenerationOptions, Generator, ReqwestTransport, RunError, SystemClock};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "spritegen",
    version,
    about = "Generate missing image assets described by a spec file"
)]
struct Cli {
    /// Spec file listing PROMPT, ASSET and option lines.
    spec: PathBuf,
    #[arg(short = 'o', long, default_value = ".")]
    output_dir: PathBuf,
    /// Maximum number of new images to create in this run.
    #[arg(short = 'n', long, default_value_t = 1)]
    count: usize,
    #[arg(long)]
    continue_on_error: bool,
    #[arg(short, long)]
    verbose: bool,
    /// Build and log payloads without sending requests or writing files.
    #[arg(long)]
    dry_run: bool,
    /// Append structured run events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Give up after this many rate-limit waits on one asset.
    #[arg(long)]
    max_rate_limit_waits: Option<u32>,
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    api_path: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[command(flatten)]
    tags: TagArgs,
}

/// One flag per request option a spec line may also set.
#[derive(Debug, Default, clap::Args)]
struct TagArgs {
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    background: Option<String>,
    #[arg(long)]
    moderation: Option<String>,
    #[arg(long = "n")]
    n: Option<String>,
    #[arg(long)]
    output_compression: Option<String>,
    #[arg(long)]
    output_format: Option<String>,
    #[arg(long)]
    quality: Option<String>,
    #[arg(long)]
    response_format: Option<String>,
    #[arg(long)]
    size: Option<String>,
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    organization: Option<String>,
    #[arg(long)]
    project: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("spritegen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let doc = load_spec(&cli.spec)
        .with_context(|| format!("failed to load spec {}", cli.spec.display()))?;
    let config = merge_config(&doc.config, &env_snapshot(), &caller_overrides(&cli));

    let events = cli
        .events
        .as_ref()
        .map(|path| EventWriter::new(path, Uuid::new_v4().to_string()));
    let transport = ReqwestTransport::new()?;
    let clock = SystemClock;
    let options = GenerationOptions {
        spec_path: cli.spec.clone(),
        out_dir: cli.output_dir.clone(),
        limit: cli.count,
        dry_run: cli.dry_run,
    };

    let outcome = Generator::new(&transport, &clock)
        .with_events(events)
        .with_max_rate_limit_waits(cli.max_rate_limit_waits)
        .run(&doc, &config, &options);

    match outcome {
        Ok(report) => {
            for filename in &report.planned {
                println!("would generate {filename}");
            }
            if !report.failed.is_empty() {
                println!("Failed: {}", report.failed.join(", "));
            }
            println!("{}", report.counters);
            Ok(0)
        }
        Err(RunError::Aborted {
            filename,
            counters,
            source,
        }) => {
            eprintln!("spritegen error: {filename}: {source:#}");
            println!("{counters}");
            Ok(1)
        }
        Err(err) => Err(err.into()),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .try_init();
}

/// Highest-precedence config layer: only flags the caller actually passed.
fn caller_overrides(cli: &Cli) -> ConfigMap {
    let tags = &cli.tags;
    let text_flags = [
        ("model", &tags.model),
        ("background", &tags.background),
        ("moderation", &tags.moderation),
        ("n", &tags.n),
        ("output_compression", &tags.output_compression),
        ("output_format", &tags.output_format),
        ("quality", &tags.quality),
        ("response_format", &tags.response_format),
        ("size", &tags.size),
        ("style", &tags.style),
        ("user", &tags.user),
        ("organization", &tags.organization),
        ("project", &tags.project),
        ("api_base", &cli.api_base),
        ("api_path", &cli.api_path),
        ("api_key", &cli.api_key),
    ];

    let mut overrides = ConfigMap::new();
    for (key, value) in text_flags {
        if let Some(value) = value {
            overrides.insert(key.to_string(), ConfigValue::from(value.as_str()));
        }
    }
    if cli.continue_on_error {
        overrides.insert("continue_on_error".to_string(), ConfigValue::from(true));
    }
    if cli.verbose {
        overrides.insert("verbose".to_string(), ConfigValue::from(true));
    }
    overrides
}
