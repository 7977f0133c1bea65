//! Operational CLI: the cron-invoked twin of `POST /trigger/<source>`
//! (§6, §9) — cron and HTTP triggers are interchangeable entry points that
//! both just call `publish` on a named adapter. Exit code `0` on success,
//! `1` on any failure; `--dry-run` never touches the column/relational
//! stores or the event bus.

use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use eventintel_backend::adapters::{AdapterRegistry, FetchWindow};
use eventintel_backend::config::Config;
use eventintel_backend::store::{self, EventStore, SqliteEventStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pipeline-cli", about = "Ingest pipeline operational CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch + transform + validate one adapter's window, optionally publishing it.
    Trigger {
        /// Adapter `source_name`, e.g. `gdelt`.
        source: String,
        #[arg(long)]
        lookback_minutes: Option<u32>,
        #[arg(long, default_value_t = 500)]
        limit: u32,
        /// Fetch/transform/validate only; never writes to the store or bus.
        #[arg(long)]
        dry_run: bool,
    },
    /// Lists every registered adapter's `source_name`.
    ListAdapters,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Trigger { source, lookback_minutes, limit, dry_run } => {
            run_trigger(&source, lookback_minutes, limit, dry_run).await
        }
        Command::ListAdapters => {
            let registry = AdapterRegistry::discover();
            for name in registry.source_names() {
                println!("{name}");
            }
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            tracing::error!(error = %e, "pipeline-cli run failed");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run_trigger(source: &str, lookback_minutes: Option<u32>, limit: u32, dry_run: bool) -> anyhow::Result<()> {
    let registry = AdapterRegistry::discover();
    let adapter = registry
        .get(source)
        .ok_or_else(|| anyhow::anyhow!("unknown source: {source}"))?;

    let end = Utc::now();
    let lookback = lookback_minutes.unwrap_or_else(|| adapter.default_lookback_minutes());
    let start = end - chrono::Duration::minutes(i64::from(lookback));
    let window = FetchWindow { start, end, limit };

    if dry_run {
        let raw = adapter.fetch(window).await?;
        let events = adapter.transform(raw);
        let (valid, invalid): (Vec<_>, Vec<_>) = events.into_iter().partition(|e| adapter.validate(e).0);
        println!(
            "dry-run: source={source} would_publish={} would_fail={} (no store or bus writes)",
            valid.len(),
            invalid.len()
        );
        return Ok(());
    }

    // Async mode (the default, as opposed to `--dry-run`): this CLI's job
    // ends at the ingest write. `analyze`/`extract` are the running
    // service's consumers (main.rs); a one-shot CLI invocation has nowhere
    // to await their completion, so it stops at the same boundary the
    // adapter's `publish` helper does — the idempotent upsert that is, in
    // this single-process deployment, the ingest topic's durable sink.
    let config = Config::from_env()?;
    let conn = store::open(&config.database_path)?;
    let event_store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(conn));

    let raw = adapter.fetch(window).await?;
    let events = adapter.transform(raw);
    let mut outcome = eventintel_backend::adapters::PublishOutcome::default();
    for event in events {
        let (ok, reason) = adapter.validate(&event);
        if !ok {
            outcome.failed += 1;
            tracing::warn!(source, reason = reason.as_deref().unwrap_or("unknown"), "event failed validation, dropping");
            continue;
        }
        match event_store.upsert(&event) {
            Ok(_) => outcome.published += 1,
            Err(e) => {
                outcome.failed += 1;
                tracing::warn!(error = %e, "failed to persist triggered event");
            }
        }
    }

    println!("source={source} published={} failed={}", outcome.published, outcome.failed);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eventintel_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
