use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use restful_api_rust::auth::issue_token;
use restful_api_rust::config::{config, AppConfig, CounterStore};
use restful_api_rust::database::DatabaseManager;
use restful_api_rust::rate_limit::{MemoryRateLimitStore, PgRateLimitStore, RateLimitStore, SystemClock};
use restful_api_rust::sample;
use restful_api_rust::server::{app, AppState};

#[derive(Parser)]
#[command(name = "restful-api")]
#[command(about = "Versioned REST resources with pluggable authentication and rate limits")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Serve the sample resources over HTTP (default)")]
    Serve {
        #[arg(long, env = "PORT", default_value_t = 3000)]
        port: u16,

        #[arg(long, help = "Postgres table to expose as an extra resource")]
        table: Option<String>,

        #[arg(long, value_delimiter = ',', help = "Columns of --table to expose")]
        columns: Vec<String>,

        #[arg(long, default_value_t = 300, help = "Seconds between expired counter sweeps")]
        sweep_interval: u64,
    },

    #[command(about = "Print an access token for a sample account")]
    Token {
        #[arg(default_value = "ada")]
        username: String,
    },

    #[command(about = "Delete expired rate-limit counters from Postgres")]
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so DATABASE_URL, APP_ENV, etc. are picked up
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config();
    tracing::info!("Starting in {:?} mode", config.environment);

    match Cli::parse().command.unwrap_or(Commands::Serve {
        port: 3000,
        table: None,
        columns: Vec::new(),
        sweep_interval: 300,
    }) {
        Commands::Serve {
            port,
            table,
            columns,
            sweep_interval,
        } => serve(config, port, table, columns, sweep_interval).await,
        Commands::Token { username } => token(config, &username),
        Commands::Purge => purge().await,
    }
}

async fn serve(
    config: &AppConfig,
    port: u16,
    table: Option<String>,
    columns: Vec<String>,
    sweep_interval: u64,
) -> anyhow::Result<()> {
    let database = DatabaseManager::is_configured().then(DatabaseManager::new);
    let store = counter_store(config, database.as_ref()).await?;

    let mut pipeline = sample::build_pipeline(config, store, Arc::new(SystemClock))
        .await
        .context("building sample resources")?;

    if let Some(table) = table {
        let db = database
            .as_ref()
            .context("--table needs DATABASE_URL to be set")?;
        let definition = sample::table_resource(db.pool().await?, &table, &columns)?;
        pipeline = pipeline.with_resource(definition)?;
    }

    let pipeline = Arc::new(pipeline);
    spawn_sweeper(pipeline.clone(), Duration::from_secs(sweep_interval.max(1)));

    let mut state = AppState::shared(pipeline);
    if let Some(db) = database {
        state = state.with_database(db);
    }
    let router = app(state, config);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("Listening on http://{}{}", bind_addr, config.api.path_prefix);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn counter_store(
    config: &AppConfig,
    database: Option<&DatabaseManager>,
) -> anyhow::Result<Arc<dyn RateLimitStore>> {
    match (config.rate_limit.store, database) {
        (CounterStore::Postgres, Some(db)) => {
            let store = PgRateLimitStore::new(db.pool().await?);
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
        (CounterStore::Postgres, None) => {
            tracing::warn!("Postgres counter store requested without DATABASE_URL, using memory");
            Ok(Arc::new(MemoryRateLimitStore::new()))
        }
        (CounterStore::Memory, _) => Ok(Arc::new(MemoryRateLimitStore::new())),
    }
}

/// Periodically drop expired counters
fn spawn_sweeper(pipeline: Arc<restful_api_rust::pipeline::Pipeline>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match pipeline.rate_limits().purge_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::debug!("Purged {} expired rate-limit counters", n),
                Err(e) => tracing::warn!("Counter sweep failed: {}", e),
            }
        }
    });
}

fn token(config: &AppConfig, username: &str) -> anyhow::Result<()> {
    let identity = match username {
        "root" => sample::admin(),
        "ada" => sample::editor(),
        "alan" => sample::reader(),
        other => anyhow::bail!("unknown sample account '{}'", other),
    };
    println!("{}", issue_token(&identity, &config.auth)?);
    Ok(())
}

async fn purge() -> anyhow::Result<()> {
    let db = DatabaseManager::new();
    let store = PgRateLimitStore::new(db.pool().await?);
    store.ensure_schema().await?;
    let removed = store.purge_expired(chrono::Utc::now().timestamp()).await?;
    println!("Removed {} expired counters", removed);
    db.close_all().await;
    Ok(())
}
