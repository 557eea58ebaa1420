mod api;
mod middleware;
mod runtime;
mod scheduler;
mod sink;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use cflow_collector::{build_source, CollectorPool, CursorStore, SourceSchedule};
use cflow_core::{Environment, JsonCheckpointStore};
use cflow_ingest::JsonlDeadLetterSink;
use cflow_trends::{AlertDispatcher, LogAlertDispatcher, WebhookAlertDispatcher};

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
    runtime::{Runtime, RuntimeParts},
    sink::JsonlRecordSink,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(cflow_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pipeline = cflow_core::load_pipeline_config(&config.pipeline_path)?;
    tracing::info!(
        env = %config.env,
        pipeline = %config.pipeline_path.display(),
        sources = pipeline.sources.len(),
        windows = pipeline.windows.len(),
        "configuration loaded"
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()?;

    let mut dispatchers: Vec<Box<dyn AlertDispatcher>> = vec![Box::new(LogAlertDispatcher)];
    if let Some(url) = &config.alert_webhook_url {
        dispatchers.push(Box::new(WebhookAlertDispatcher::new(
            url.clone(),
            http.clone(),
        )));
    }

    let checkpoints = JsonCheckpointStore::new(config.state_dir.clone());

    let mut pool = CollectorPool::new();
    let mut collectors = BTreeMap::new();
    for source_config in pipeline.sources.iter().filter(|s| s.enabled) {
        let source = build_source(source_config, config.http_timeout_secs, &config.user_agent)?;
        let budget = source.describe_rate_budget();
        tracing::info!(
            source = %source_config.name,
            platform = %source_config.platform,
            requests_per_sec = budget.requests_per_sec,
            burst = budget.burst,
            "source registered"
        );
        let stats = pool.add(source, SourceSchedule::from(source_config));
        collectors.insert(source_config.name.clone(), stats);
    }

    let (runtime, bus_workers) = Runtime::start(
        pipeline,
        RuntimeParts {
            checkpoints: checkpoints.clone(),
            sink: Arc::new(JsonlRecordSink::new(config.sink_dir.clone())),
            dead_letters: Arc::new(JsonlDeadLetterSink::new(config.dead_letter_path.clone())),
            dispatchers,
            collectors,
        },
    )?;
    runtime.restore().await?;
    let runtime = Arc::new(runtime);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (raw_tx, raw_rx) = mpsc::channel(config.raw_queue_capacity);
    let ingest_task = tokio::spawn(Arc::clone(&runtime.ingest).run(raw_rx));

    let cursors = Arc::new(CursorStore::open(checkpoints).await?);
    let collector_tasks = pool.spawn(&cursors, &raw_tx, &shutdown_rx);
    drop(raw_tx);

    let mut scheduler = scheduler::build_scheduler(Arc::clone(&runtime), &config).await?;

    let auth = AuthState::from_env(matches!(config.env, Environment::Development))?;
    let app = build_app(
        AppState {
            runtime: Arc::clone(&runtime),
        },
        auth,
        default_rate_limit_state(),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send_replace(true);
    for task in collector_tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "collector task ended abnormally");
        }
    }
    // Collectors are gone, so the raw queue closes once the stage drains it.
    if let Err(e) = ingest_task.await {
        tracing::warn!(error = %e, "ingest task ended abnormally");
    }
    bus_workers.close().await;
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "scheduler shutdown failed");
    }

    runtime.flush_model().await;
    runtime.checkpoint(Utc::now()).await;
    tracing::info!(stats = ?runtime.stats().await, "shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
