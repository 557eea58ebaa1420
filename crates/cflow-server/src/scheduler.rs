//! Background job scheduler.
//!
//! Registers the recurring pipeline jobs (trend detection, model flushes,
//! checkpoints, feature-store sweeps). Each run is bounded by its interval,
//! and a job whose previous run is still in flight skips its tick.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::runtime::Runtime;

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive
/// for the lifetime of the process.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// a job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(
    runtime: Arc<Runtime>,
    config: &cflow_core::AppConfig,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let detection = Duration::from_secs(runtime.pipeline.trend.cadence_secs);
    let flush = Duration::from_secs(runtime.pipeline.recommend.flush_secs);
    let checkpoint = Duration::from_secs(config.checkpoint_interval_secs);
    let sweep = Duration::from_secs(config.sweep_interval_secs);

    register(&scheduler, "trend-detection", detection, &runtime, |rt| async move {
        rt.run_detection(Utc::now()).await;
    })
    .await?;
    register(&scheduler, "model-flush", flush, &runtime, |rt| async move {
        rt.flush_model().await;
    })
    .await?;
    register(&scheduler, "checkpoint", checkpoint, &runtime, |rt| async move {
        rt.checkpoint(Utc::now()).await;
    })
    .await?;
    register(&scheduler, "feature-sweep", sweep, &runtime, |rt| async move {
        rt.sweep(Utc::now()).await;
    })
    .await?;

    scheduler.start().await?;
    tracing::info!(
        detection_secs = detection.as_secs(),
        flush_secs = flush.as_secs(),
        checkpoint_secs = checkpoint.as_secs(),
        sweep_secs = sweep.as_secs(),
        "scheduler: pipeline jobs registered"
    );
    Ok(scheduler)
}

async fn register<F, Fut>(
    scheduler: &JobScheduler,
    name: &'static str,
    every: Duration,
    runtime: &Arc<Runtime>,
    task: F,
) -> Result<(), JobSchedulerError>
where
    F: Fn(Arc<Runtime>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let runtime = Arc::clone(runtime);
    let running = Arc::new(Mutex::new(()));
    let task = Arc::new(task);

    let job = Job::new_repeated_async(every, move |_uuid, _lock| {
        let runtime = Arc::clone(&runtime);
        let running = Arc::clone(&running);
        let task = Arc::clone(&task);

        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                tracing::warn!(job = name, "scheduler: previous run still in flight; skipping");
                return;
            };
            tracing::debug!(job = name, "scheduler: run starting");
            if tokio::time::timeout(every, task(runtime)).await.is_err() {
                tracing::warn!(
                    job = name,
                    deadline_secs = every.as_secs(),
                    "scheduler: run exceeded its interval"
                );
            }
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}
