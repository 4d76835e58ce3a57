//! # tandem
//!
//! Paired progression server binary: wires settings, telemetry, storage and
//! the engine together and exposes the callable surface.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use tandem_core::catalog::{Subtopic, Topic};
use tandem_core::ids::AccountId;
use tandem_engine::rollover::run_rollover;
use tandem_engine::{gateway_from_settings, EngineContext};
use tandem_server::{AppState, HandlerState, ServerConfig, TokenAuthority};
use tandem_settings::{load_settings, load_settings_from_path, resolve_data_path, TandemSettings};
use tandem_store::accounts::AccountProfile;
use tandem_store::{Database, Store};
use tandem_telemetry::{init_telemetry, TelemetryConfig};

/// Paired progression scheduler.
#[derive(Parser, Debug)]
#[command(name = "tandem", about = "Paired progression scheduler")]
struct Cli {
    /// Settings file (defaults to ~/.tandem/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the RPC surface with the change dispatcher and rollover loop.
    Serve {
        /// Port to bind (overrides settings).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one rollover pass and print the report.
    Rollover,
    /// Load topics, subtopics and accounts from a JSON file.
    Seed { file: PathBuf },
    /// Print a bearer token for an account, for local testing.
    Token {
        account: String,
        #[arg(long, default_value = "24")]
        hours: i64,
    },
}

/// Contents of a `tandem seed` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeedFile {
    topics: Vec<Topic>,
    subtopics: Vec<Subtopic>,
    accounts: Vec<AccountProfile>,
}

fn load(config: Option<&Path>) -> Result<TandemSettings> {
    let settings = match config {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => load_settings().context("Failed to load settings")?,
    };
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn open_store(settings: &TandemSettings) -> Result<Store> {
    let db_path = resolve_data_path(&settings.storage.database_path);
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "Database opened");
    Ok(Store::new(db))
}

fn engine_context(settings: &TandemSettings, store: Store) -> Result<EngineContext> {
    let gateway = gateway_from_settings(&settings.notifications)
        .context("Failed to build notification gateway")?;
    tracing::info!(gateway = gateway.name(), "Notification gateway ready");
    Ok(EngineContext::from_settings(store, gateway, &settings.schedule))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(cli.config.as_deref())?;
    init_telemetry(&TelemetryConfig::from_settings(&settings.logging));

    match cli.command {
        Command::Serve { port } => serve(settings, port).await,
        Command::Rollover => {
            let ctx = engine_context(&settings, open_store(&settings)?)?;
            let report = run_rollover(&ctx).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Seed { file } => seed(&settings, &file),
        Command::Token { account, hours } => {
            let token = TokenAuthority::new(&settings.server.jwt_secret)
                .issue(&AccountId::from_raw(account), chrono::Duration::hours(hours))?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(settings: TandemSettings, port: Option<u16>) -> Result<()> {
    tracing::info!("Starting Tandem server");

    let ctx = engine_context(&settings, open_store(&settings)?)?;
    let cancel = CancellationToken::new();

    let mut config = ServerConfig::from(&settings.server);
    if let Some(port) = port {
        config.port = port;
    }
    let state = AppState {
        handler_state: Arc::new(HandlerState::new(ctx.clone())),
        auth: Arc::new(TokenAuthority::new(&settings.server.jwt_secret)),
    };

    let mut handle = tandem_server::start(config, state, cancel.clone())
        .await
        .context("Failed to start server")?;
    handle.attach(tandem_server::spawn_background(&ctx, &settings.schedule, &cancel));
    tracing::info!(port = handle.port, "Tandem server ready");

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl+c")?;
    tracing::info!("Shutting down");
    cancel.cancel();
    handle.join().await;
    Ok(())
}

fn seed(settings: &TandemSettings, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let seed: SeedFile = serde_json::from_str(&content)
        .with_context(|| format!("Invalid seed file {}", file.display()))?;

    let store = open_store(settings)?;
    store.catalog().import(&seed.topics, &seed.subtopics)?;
    let now = chrono::Utc::now();
    for account in &seed.accounts {
        store.accounts().upsert(account, now)?;
    }

    tracing::info!(
        topics = seed.topics.len(),
        subtopics = seed.subtopics.len(),
        accounts = seed.accounts.len(),
        "Seed loaded"
    );
    Ok(())
}
