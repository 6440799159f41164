use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use ralph_agents::{GitHubClient, HttpAgentService};
use ralph_observability::{canonical_logs_dir_from_root, init_process_logging, install_metrics};
use ralph_server::{
    serve, spawn_consumer, AgentSuite, AppState, EventQueue, OrchestratorService, RalphConfig,
};
use ralph_store::WorkflowStore;

#[derive(Parser, Debug)]
#[command(name = "ralph-engine")]
#[command(about = "Event-driven orchestrator for code-task webhooks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8090)]
        port: u16,
        #[arg(long)]
        state_dir: Option<String>,
    },
    CheckConfig {
        #[arg(long)]
        state_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            hostname,
            port,
            state_dir,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            run_serve(addr, state_dir).await?;
        }
        Command::CheckConfig { state_dir } => {
            let state_dir = resolve_state_dir(state_dir);
            let config = RalphConfig::load(&state_dir).await?;
            print_config_summary(&config);
        }
    }

    Ok(())
}

async fn run_serve(addr: SocketAddr, state_dir: PathBuf) -> anyhow::Result<()> {
    let config = Arc::new(RalphConfig::load(&state_dir).await?);

    let logs_dir = canonical_logs_dir_from_root(&state_dir);
    let (_log_guard, log_info) = init_process_logging(&logs_dir, config.retention_days as u64)?;
    install_metrics()?;

    if config.webhook_secret.is_empty() {
        tracing::warn!("webhook secret is empty; all deliveries will be rejected");
    }

    let store = Arc::new(WorkflowStore::open(&config.db_path).await?);
    let host = Arc::new(GitHubClient::new(
        &config.github_api_base,
        &config.github_token,
    )?);
    let agent = Arc::new(HttpAgentService::new(&config.agent_base_url)?);
    let agents = AgentSuite {
        spec_generator: agent.clone(),
        executor: agent.clone(),
        reviewer: agent.clone(),
        merge_decider: agent,
    };

    let shutdown = CancellationToken::new();
    let (queue, rx) = EventQueue::new();
    let orchestrator = Arc::new(OrchestratorService::new(
        store.clone(),
        host,
        agents,
        config.clone(),
        shutdown.clone(),
    ));
    let consumer = spawn_consumer(rx, orchestrator, shutdown.clone());
    spawn_retention_sweep(store.clone(), config.retention_days, shutdown.clone());

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    info!(
        "starting ralph-engine on http://{addr} (state_dir={}, logs={})",
        state_dir.display(),
        log_info.logs_dir
    );

    let state = AppState::new(store, queue, config, shutdown.clone());
    serve(addr, state).await?;

    shutdown.cancel();
    let _ = consumer.await;
    Ok(())
}

fn spawn_retention_sweep(
    store: Arc<WorkflowStore>,
    retention_days: u32,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match store.purge_stale_deliveries(retention_days).await {
                        Ok(0) => {}
                        Ok(deleted) => info!(deleted, "purged stale webhook deliveries"),
                        Err(error) => tracing::warn!(%error, "retention sweep failed"),
                    }
                }
            }
        }
    });
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("RALPH_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".ralph")
}

fn print_config_summary(config: &RalphConfig) {
    // Never echo secrets; show presence only.
    println!(
        "{}",
        serde_json::json!({
            "db_path": config.db_path.display().to_string(),
            "github_api_base": config.github_api_base,
            "github_token_set": !config.github_token.is_empty(),
            "webhook_secret_set": !config.webhook_secret.is_empty(),
            "agent_base_url": config.agent_base_url,
            "default_branch": config.default_branch,
            "auto_merge_enabled": config.auto_merge_enabled,
            "max_task_attempts": config.max_task_attempts,
            "retention_days": config.retention_days,
        })
    );
}
