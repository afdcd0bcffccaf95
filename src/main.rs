use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sqlx::PgConnection;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tenant_migrator::api;
use tenant_migrator::config::AppConfig;
use tenant_migrator::database::{tenants, PgConnector};
use tenant_migrator::runner::SqlxRunner;
use tenant_migrator::{Dispatcher, DispatcherConfig, MigrationRequest};

#[derive(Parser)]
#[command(name = "tenant-migrator")]
#[command(about = "Apply schema migrations to per-tenant PostgreSQL schemas")]
struct Cli {
    /// Configuration file (defaults to ./tenant-migrator.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory with migration files
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP migration endpoint (default)
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one command for one tenant schema
    Migrate {
        /// Tenant schema name
        #[arg(short, long)]
        name: String,

        /// Migration command (up, down, status, ...)
        #[arg(short = 'C', long)]
        command: String,

        /// Connection string; falls back to the configured database_url
        #[arg(long, env = "DATABASE_URL")]
        dbstring: Option<String>,

        /// Extra command arguments, e.g. the target version for up-to
        args: Vec<String>,
    },
    /// Run one command for every tenant listed in public.tenant_client
    MigrateAll {
        #[arg(short = 'C', long)]
        command: String,

        #[arg(long, env = "DATABASE_URL")]
        dbstring: Option<String>,

        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tenant_migrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.dir {
        config.migrations_dir = dir;
    }
    info!("Configuration loaded");

    match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    }) {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server_host = host;
            }
            if let Some(port) = port {
                config.server_port = port;
            }
            serve(config).await
        }
        Commands::Migrate {
            name,
            command,
            dbstring,
            args,
        } => migrate_one(&config, name, command, dbstring, args).await,
        Commands::MigrateAll {
            command,
            dbstring,
            args,
        } => migrate_all(&config, command, dbstring, args).await,
    }
}

fn build_dispatcher(config: &AppConfig) -> Dispatcher<PgConnector, SqlxRunner> {
    let runner = SqlxRunner::new(config.migrations_dir.clone())
        .with_locking(config.runner_locking)
        .with_lock_wait(Duration::from_secs(config.lock_wait_secs));
    Dispatcher::new(PgConnector, runner, DispatcherConfig::from(config))
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    info!(
        "Serving migrations from {}",
        config.migrations_dir.display()
    );
    let dispatcher = Arc::new(build_dispatcher(&config));
    let app = api::router(dispatcher);

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

async fn migrate_one(
    config: &AppConfig,
    name: String,
    command: String,
    dbstring: Option<String>,
    args: Vec<String>,
) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(config);
    let report = dispatcher
        .dispatch(MigrationRequest {
            name,
            command,
            dbstring,
            args,
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn migrate_all(
    config: &AppConfig,
    command: String,
    dbstring: Option<String>,
    args: Vec<String>,
) -> anyhow::Result<()> {
    let Some(dbstring) = dbstring.or_else(|| config.database_url.clone()) else {
        bail!("no connection string given and no database_url configured");
    };

    let mut conn = <PgConnection as sqlx::Connection>::connect(&dbstring)
        .await
        .context("failed to connect to tenant registry")?;
    let registry = tenants::list_tenants(&mut conn).await;
    if let Err(e) = <PgConnection as sqlx::Connection>::close(conn).await {
        warn!("Failed to close registry connection: {}", e);
    }
    let names: Vec<String> = registry?.into_iter().map(|t| t.schema_name).collect();
    info!("Found {} tenants", names.len());

    let dispatcher = build_dispatcher(config);
    let outcomes = dispatcher
        .dispatch_all(&names, &command, &args, Some(&dbstring))
        .await;

    let mut failed = 0;
    for (tenant, outcome) in &outcomes {
        match outcome {
            Ok(report) => println!("{}: ok {}", tenant, serde_json::to_string(report)?),
            Err(e) => {
                failed += 1;
                println!("{}: failed: {}", tenant, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} tenants failed", failed, outcomes.len());
    }
    Ok(())
}
