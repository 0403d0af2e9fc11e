// ABOUTME: CLI entry point for marketsharp-sync
// ABOUTME: Loads settings and credentials, then pulls the selected endpoints in order

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use marketsharp_sync::config::{Credentials, Settings};
use marketsharp_sync::registry::Registry;
use marketsharp_sync::remote::{RequestSigner, SignedClient};
use marketsharp_sync::store::{MemoryStore, PostgresStore, Store};
use marketsharp_sync::sync::Orchestrator;
use marketsharp_sync::utils::redact_url;

#[derive(Parser)]
#[command(name = "marketsharp-sync")]
#[command(about = "Pull MarketSharp CRM feeds and reconcile them into PostgreSQL", long_about = None)]
#[command(version)]
struct Cli {
    /// Only pull this endpoint (default: every registered endpoint, in order)
    #[arg(long)]
    endpoint: Option<String>,
    /// Page fetches per round at the start of each endpoint
    #[arg(long = "max-concurrent")]
    max_concurrent: Option<usize>,
    /// Path to a TOML settings file
    #[arg(long = "config")]
    config_path: Option<PathBuf>,
    /// Target PostgreSQL connection string
    #[arg(long = "database-url", env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
    /// Run the pipeline against an in-memory store instead of PostgreSQL
    #[arg(long)]
    dry_run: bool,
    /// Print the registered endpoints and exit
    #[arg(long)]
    list_endpoints: bool,
    /// MarketSharp company id
    #[arg(long = "company-id", env = "MARKETSHARP_COMPANY_ID", hide_env_values = true)]
    company_id: Option<String>,
    /// MarketSharp API key
    #[arg(long = "api-key", env = "MARKETSHARP_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// Base64-encoded MarketSharp secret key
    #[arg(long = "secret-key", env = "MARKETSHARP_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut settings = match &cli.config_path {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(max_concurrent) = cli.max_concurrent {
        settings.max_concurrent = max_concurrent;
    }
    settings.validate()?;

    let registry = Registry::marketsharp(&settings.api_base_url)?;

    if cli.list_endpoints {
        for endpoint in registry.iter() {
            let mode = if endpoint.incremental {
                "incremental"
            } else {
                "static"
            };
            println!("{:<28} {:<12} {}", endpoint.name, mode, endpoint.url);
        }
        return Ok(());
    }

    let endpoints = registry.select(cli.endpoint.as_deref())?;

    let credentials = Credentials::from_parts(cli.company_id, cli.api_key, cli.secret_key)?;
    let signer = RequestSigner::new(&credentials).context("Invalid MarketSharp credentials")?;
    let client = SignedClient::new(signer, settings.client_config())?;

    let store: Arc<dyn Store> = if cli.dry_run {
        tracing::info!("Dry run: records are reconciled into memory only");
        Arc::new(MemoryStore::new())
    } else {
        let url = cli.database_url.as_deref().ok_or_else(|| {
            anyhow::anyhow!("Target database URL not provided. Use --database-url or set DATABASE_URL (or pass --dry-run)")
        })?;
        tracing::info!("Connecting to {}", redact_url(url));
        Arc::new(PostgresStore::connect(url).await?)
    };

    let orchestrator = Orchestrator::new(Arc::new(client), store, settings.orchestrator_config());
    let summary = orchestrator.run(&endpoints).await;

    let failed: Vec<&str> = summary.failed().map(|o| o.endpoint.as_str()).collect();
    tracing::info!(
        "Run complete: {} endpoint(s), {} inserted, {} updated, {} failed",
        summary.endpoints.len(),
        summary.total_inserted(),
        summary.total_updated(),
        failed.len()
    );
    if !failed.is_empty() {
        tracing::warn!("Endpoints with errors: {}", failed.join(", "));
    }

    Ok(())
}
