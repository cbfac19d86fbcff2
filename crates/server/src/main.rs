// crates/server/src/main.rs
//! Reelforge server binary.
//!
//! Wires the placeholder stage executors into the orchestrator, serves the
//! HTTP API and, on Ctrl-C / SIGTERM, cancels in-flight jobs before exiting.

use std::time::Duration;

use anyhow::{Context, Result};
use reelforge_pipeline::{JobOrchestrator, JobStore, PipelineConfig, PlaceholderExecutor};
use reelforge_server::{create_app, init_metrics, spawn_retention_sweeper, AppState, ServerConfig};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// How long shutdown waits for jobs to reach a terminal status.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "warn,reelforge_server=info,reelforge_pipeline=info,tower_http=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let server_config = ServerConfig::from_env();
    init_tracing(server_config.json_logs);
    init_metrics();

    let pipeline_config = PipelineConfig::from_env();
    tokio::fs::create_dir_all(&pipeline_config.output_root)
        .await
        .with_context(|| {
            format!(
                "creating output directory {}",
                pipeline_config.output_root.display()
            )
        })?;

    let store = JobStore::new();
    let executors = PlaceholderExecutor::registry(pipeline_config.stage_delay);
    let orchestrator = JobOrchestrator::new(store.clone(), executors, pipeline_config.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = spawn_retention_sweeper(
        store,
        server_config.retention,
        server_config.retention_sweep_interval,
        shutdown_rx.clone(),
    );
    let app = create_app(AppState::new(orchestrator.clone(), shutdown_rx));

    let addr = server_config.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(
        %addr,
        output_root = %pipeline_config.output_root.display(),
        max_concurrent_jobs = pipeline_config.max_concurrent_jobs,
        max_queued_jobs = pipeline_config.max_queued_jobs,
        "Reelforge server listening"
    );
    eprintln!("\n\u{1f3ac} reelforge v{} on http://{addr}\n", env!("CARGO_PKG_VERSION"));

    let graceful = {
        let orchestrator = orchestrator.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
            orchestrator.shutdown();
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(graceful)
        .await
        .context("server error")?;

    if !orchestrator.wait_idle(SHUTDOWN_GRACE).await {
        tracing::warn!(
            active = orchestrator.active_jobs(),
            "Jobs still running after shutdown grace period"
        );
    }
    sweeper.abort();
    tracing::info!("Server stopped");
    Ok(())
}
