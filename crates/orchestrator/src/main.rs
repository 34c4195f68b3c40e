use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;

use orchestrator::api::{AppState, create_router};
use orchestrator::db::Database;
use orchestrator::observability::init_tracing;
use orchestrator::settings::Settings;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Agent coordinator: run queue, session event log, runner registry.",
    propagate_version = true
)]
struct Cli {
    /// Override the config file path.
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the coordinator server.
    Serve,
    /// Load and print the effective configuration, then exit.
    CheckConfig,
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => serve(settings),
        Command::CheckConfig => {
            println!("{settings:#?}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn serve(settings: Settings) -> Result<()> {
    init_tracing("orchestrator=info,tower_http=info");

    let db = Database::new(&settings.database_path).await?;
    let (state, watcher_rx) = AppState::build(&db, &settings);
    let background = state.spawn_background(watcher_rx);

    if !state.auth.is_enabled() {
        tracing::warn!("authentication is disabled; all callers are admin");
    }

    let router = create_router(state);
    let listener = TcpListener::bind(settings.listen_addr)
        .await
        .with_context(|| format!("binding {}", settings.listen_addr))?;
    info!(addr = %settings.listen_addr, "coordinator listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    // Long-poll waiters drain with the server; background loops just stop.
    for task in background {
        task.abort();
    }
    info!("coordinator shut down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
