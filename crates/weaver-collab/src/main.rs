use clap::{Parser, Subcommand};
use tracing::info;
use weaver_collab::server::{self, AppState};
use weaver_collab::telemetry::{self, TelemetryConfig};
use weaver_collab::Config;
use weaver_persist::{ClickHouseConfig, ClickHouseStore, Persistence, StoreConfig};

#[derive(Parser)]
#[command(name = "weaver-collab")]
#[command(about = "Collaborative document host with durable persistence")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Create the document table
    Migrate,

    /// Check store connectivity
    Health,

    /// Start the HTTP server (default)
    Serve,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    dotenvy::dotenv().ok();

    let _log_guard = telemetry::init(TelemetryConfig::from_env("weaver-collab"));

    let args = Args::parse();

    match args.command.unwrap_or(Command::Serve) {
        Command::Migrate => run_migrate().await,
        Command::Health => run_health().await,
        Command::Serve => run_server().await,
    }
}

fn connect() -> miette::Result<ClickHouseStore> {
    let config = ClickHouseConfig::from_env()?;
    info!(
        "Connecting to ClickHouse at {} (database: {})",
        config.url, config.database
    );
    Ok(ClickHouseStore::new(&config, &StoreConfig::from_env()?)?)
}

async fn run_migrate() -> miette::Result<()> {
    let store = connect()?;
    store.ensure_table().await?;
    info!(table = store.layout().table(), "document table ready");
    Ok(())
}

async fn run_health() -> miette::Result<()> {
    let store = connect()?;
    store.ping().await?;
    info!("ClickHouse connection OK");
    Ok(())
}

async fn run_server() -> miette::Result<()> {
    let config = Config::from_env()?;

    let persistence = Persistence::<ClickHouseStore>::from_config(&config.persist)?;
    persistence.prepare().await?;

    let state = AppState::new(persistence);
    server::run(state, config.server).await?;

    Ok(())
}
