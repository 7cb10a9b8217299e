//! Tally HTTP server
//!
//! Serves the generic entity API over a SQLite-backed store:
//!
//!   tally-server --port 8000 --db tally.db --auth tokens.json
//!
//! Without an auth file every request runs anonymously, which still allows
//! public searches.

use anyhow::{Context, Result};
use clap::Parser;
use std::{fs, path::PathBuf, sync::Arc};
use tally_engine::Engine;
use tally_model::Registry;
use tally_server::{AppState, AuthTable, build_router};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tally-server")]
#[command(about = "HTTP front end for the Tally entity engine")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8000")]
    port: u16,

    /// Path to the SQLite database file
    #[arg(short, long, default_value = "tally.db")]
    db: PathBuf,

    /// Path to the bearer-token table (JSON)
    #[arg(short, long)]
    auth: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Tally server starting...");
    let store = tally_store::EntityStore::open(&args.db)
        .with_context(|| format!("failed to open database at {:?}", args.db))?;
    let engine = Engine::new(Registry::tracker(), store);

    let auth = match &args.auth {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read auth file {path:?}"))?;
            AuthTable::from_json(&raw).context("failed to parse auth file")?
        }
        None => AuthTable::default(),
    };

    let state = Arc::new(AppState { engine, auth });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port))
        .await
        .with_context(|| format!("failed to bind port {}", args.port))?;
    info!("Listening on port {}", args.port);
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
