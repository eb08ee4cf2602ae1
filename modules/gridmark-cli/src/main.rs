use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gridmark_common::{load_config, AppConfig, FileConfig};
use gridmark_pipeline::{run_migrations, CanonicalRegistry, Resolver};

mod ingest;

use ingest::{IngestOptions, SourceArg};

#[derive(Parser)]
#[command(name = "gridmark", about = "GPU pricing and power plant data ingestion")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, env = "GRIDMARK_CONFIG", default_value = "./config/gridmark.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations.
    Migrate,

    /// Run one source through fetch, resolve and upsert.
    Ingest {
        #[arg(value_enum)]
        source: SourceArg,

        /// Pricing platform name from the config file (pricing only).
        #[arg(long, required_if_eq("source", "pricing"))]
        platform: Option<String>,

        /// Write to an in-memory store instead of the database.
        #[arg(long)]
        dry_run: bool,

        /// Resolve against a JSON registry file instead of the database.
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Stop after roughly this many records.
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Show how a raw name resolves.
    Resolve {
        name: String,

        #[arg(long, value_enum, default_value = "gpu")]
        kind: RegistryKind,

        /// JSON registry file. Defaults to the database.
        #[arg(long)]
        registry: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum RegistryKind {
    Gpu,
    Plant,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing()?;

    let cli = Cli::parse();
    let app = AppConfig::from_env()?;
    let file_config = load_file_config(&cli.config)?;

    match cli.command {
        Command::Migrate => {
            let pool = connect(&app).await?;
            run_migrations(&pool).await.context("Failed to run migrations")?;
            pool.close().await;
            Ok(ExitCode::SUCCESS)
        }

        Command::Ingest {
            source,
            platform,
            dry_run,
            registry,
            limit,
        } => {
            let cancel = CancellationToken::new();
            spawn_interrupt_handler(cancel.clone());

            let options = IngestOptions {
                source,
                platform,
                dry_run,
                registry,
                limit,
            };
            let report = ingest::run(&app, &file_config, options, cancel).await?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.outcome.is_fatal() {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }

        Command::Resolve {
            name,
            kind,
            registry,
        } => {
            let resolver = load_resolver(&app, kind, registry.as_deref(), None).await?;
            let resolution = resolver.resolve_with_tier(&name);
            let output = match resolution {
                Some(r) => serde_json::json!({
                    "name": name,
                    "id": r.id,
                    "canonical": resolver.registry().get(r.id).map(|e| e.name.clone()),
                    "tier": r.tier.as_str(),
                }),
                None => serde_json::json!({ "name": name, "id": null }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("gridmark=info".parse()?)
        .add_directive("gridmark_pipeline=info".parse()?)
        .add_directive("gridmark_sources=info".parse()?)
        .add_directive("vast_client=info".parse()?)
        .add_directive("eia_client=info".parse()?)
        .add_directive("browserless_client=info".parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    if path.exists() {
        load_config(path)
    } else {
        warn!(path = %path.display(), "Config file not found, using defaults");
        Ok(FileConfig::default())
    }
}

/// Cancel `token` on Ctrl-C. The driver stops after the page in flight.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current page");
            token.cancel();
        }
    });
}

pub(crate) async fn connect(app: &AppConfig) -> Result<PgPool> {
    let url = app.require_database_url()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .context("Failed to connect to Postgres")?;
    info!("Connected to Postgres");
    Ok(pool)
}

/// Registry from a file when given, else from the database.
pub(crate) async fn load_resolver(
    app: &AppConfig,
    kind: RegistryKind,
    file: Option<&Path>,
    pool: Option<&PgPool>,
) -> Result<Resolver> {
    let registry = match (file, pool) {
        (Some(path), _) => CanonicalRegistry::from_json_file(path)?,
        (None, Some(pool)) => load_registry(kind, pool).await?,
        (None, None) => {
            let pool = connect(app).await?;
            let registry = load_registry(kind, &pool).await;
            pool.close().await;
            registry?
        }
    };

    info!(entities = registry.len(), "Canonical registry loaded");
    let resolver = Resolver::new(Arc::new(registry));
    Ok(match kind {
        RegistryKind::Gpu => resolver,
        RegistryKind::Plant => resolver.without_partial(),
    })
}

async fn load_registry(kind: RegistryKind, pool: &PgPool) -> Result<CanonicalRegistry> {
    let registry = match kind {
        RegistryKind::Gpu => CanonicalRegistry::load_gpus(pool).await,
        RegistryKind::Plant => CanonicalRegistry::load_power_plants(pool).await,
    };
    registry.context("Failed to load canonical registry")
}
