//! MultiSearch-RS command line driver
//!
//! Races a query across the backends listed in settings.yml and prints the
//! winning answer (or the last failure) together with the race report.

use anyhow::{bail, Result};
use multisearch_rs::{
    config,
    network::HttpClient,
    operations::{HttpHit, HttpOperation, HttpOperationError},
    BoxedOperation, CancellationScope, Dispatcher,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage();
        return Ok(());
    }
    if args.iter().any(|a| a == "-V" || a == "--version") {
        println!("multisearch {}", multisearch_rs::VERSION);
        return Ok(());
    }

    // Load configuration; logging depends on it, so report the source afterwards
    let (settings, source) = config::load()?;

    // Initialize logging
    let default_level = if settings.general.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting MultiSearch-RS v{}", multisearch_rs::VERSION);
    match source {
        Some(path) => info!("Loaded settings from: {}", path.display()),
        None => info!("No settings file found, using defaults"),
    }

    let query = args.join(" ");
    if query.trim().is_empty() {
        print_usage();
        bail!("no query given");
    }

    // Build one operation per enabled backend
    let client = HttpClient::with_settings(&settings.outgoing)?;
    let operations: Vec<BoxedOperation<String, HttpHit, HttpOperationError>> = settings
        .enabled_backends()
        .into_iter()
        .map(|backend| {
            Arc::new(HttpOperation::new(client.clone(), backend))
                as BoxedOperation<String, HttpHit, HttpOperationError>
        })
        .collect();
    info!("Loaded {} backends", operations.len());

    // Ctrl-C cancels the race; operations already running are abandoned
    let root = CancellationScope::new();
    {
        let root = root.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling race");
                root.cancel();
            }
        });
    }

    let outcome = Dispatcher::from_settings(&settings.race)
        .run(&root, query, operations)
        .await;

    let output = match &outcome.result {
        Ok(hit) => json!({ "result": hit, "report": outcome.report }),
        Err(e) => json!({ "error": e.to_string(), "report": outcome.report }),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    outcome.result?;
    Ok(())
}

/// Print usage information
fn print_usage() {
    println!(
        r#"
MultiSearch-RS v{}
Race a query across search backends and keep the first answer

USAGE:
    multisearch [OPTIONS] <QUERY>...

OPTIONS:
    -h, --help             Print help information
    -V, --version          Print version information

ENVIRONMENT VARIABLES:
    MULTISEARCH_SETTINGS_PATH   Path to settings.yml
    MULTISEARCH_DEBUG           Enable debug logging (true/false)
    MULTISEARCH_CONCURRENCY     Maximum backends queried at once
    MULTISEARCH_TIMEOUT         Race deadline in seconds
    MULTISEARCH_RETURN_ON_WIN   Return without waiting for slower backends
    RUST_LOG                    Log filter (overrides MULTISEARCH_DEBUG)
"#,
        multisearch_rs::VERSION
    );
}
