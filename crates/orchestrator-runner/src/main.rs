use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use orchestrator_protocol::RegisterRunnerRequest;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use orchestrator_runner::client::CoordinatorClient;
use orchestrator_runner::mcp;
use orchestrator_runner::settings::RunnerSettings;
use orchestrator_runner::supervisor::Supervisor;

fn main() {
    if let Err(err) = try_main() {
        eprintln!("{err:?}");
        // Nonzero on fatal registration failure or an unrecoverable
        // coordinator error.
        std::process::exit(1);
    }
}

#[tokio::main]
async fn try_main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("orchestrator_runner=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = RunnerSettings::parse();
    let agents = settings.load_agents()?;
    let hostname = hostname();

    let client = Arc::new(CoordinatorClient::new(
        settings.api_url.clone(),
        settings.api_key.clone(),
    )?);

    let registration = client
        .register(&RegisterRunnerRequest {
            hostname: hostname.clone(),
            executor_type: settings.executor_type.clone(),
            executor_profile: settings.executor_profile.clone(),
            project_dir: settings.project_dir.clone(),
            tags: settings.tags.clone(),
            agents,
        })
        .await
        .context("registering with the coordinator")?;
    info!(
        runner_id = %registration.runner_id,
        hostname = %hostname,
        executor_type = %settings.executor_type,
        "registered with coordinator"
    );

    let (mcp_url, mcp_task) = mcp::start(client.clone(), settings.mcp_port).await?;

    let supervisor = Arc::new(Supervisor::new(
        client,
        settings,
        registration.runner_id,
        mcp_url,
    ));
    let heartbeat_task = supervisor.spawn_heartbeat();

    let result = tokio::select! {
        result = supervisor.clone().run_loop() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
    };

    heartbeat_task.abort();
    mcp_task.abort();
    if let Err(err) = &result {
        error!(error = %err, "runner exiting");
    }
    result
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown-host".to_string())
}
