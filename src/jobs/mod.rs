use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

use crate::{context::AppContext, error::AppResult, metrics};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        // Spawn cleanup tasks
        tokio::spawn(Self::typing_sweep_job(Arc::clone(&self)));
        tokio::spawn(Self::realtime_prune_job(Arc::clone(&self)));
        tokio::spawn(Self::call_expiry_job(Arc::clone(&self)));

        // Spawn monitoring tasks
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Sweep expired typing marks (runs every 30 seconds)
    async fn typing_sweep_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(30));

        loop {
            interval.tick().await;

            match run_timed("typing_sweep", tasks::sweep_typing(&scheduler.context)).await {
                Ok(count) if count > 0 => debug!("Swept {} expired typing marks", count),
                Ok(_) => {}
                Err(e) => error!("Failed to sweep typing marks: {}", e),
            }
        }
    }

    /// Drop closed realtime subscribers (runs every minute)
    async fn realtime_prune_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            match run_timed("realtime_prune", tasks::prune_realtime(&scheduler.context)).await {
                Ok(count) if count > 0 => info!("Pruned {} closed realtime connections", count),
                Ok(_) => {}
                Err(e) => error!("Failed to prune realtime connections: {}", e),
            }
        }
    }

    /// End unanswered calls (runs every 15 seconds)
    async fn call_expiry_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(15));

        loop {
            interval.tick().await;

            match run_timed("call_expiry", tasks::expire_unanswered_calls(&scheduler.context)).await {
                Ok(count) if count > 0 => info!("Expired {} unanswered calls", count),
                Ok(_) => {}
                Err(e) => error!("Failed to expire unanswered calls: {}", e),
            }
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            if let Err(e) = run_timed("health_check", tasks::health_check(&scheduler.context)).await {
                error!("Health check failed: {}", e);
            }
        }
    }
}

async fn run_timed<T>(job_type: &str, task: impl Future<Output = AppResult<T>>) -> AppResult<T> {
    let start = Instant::now();
    let result = task.await;
    let status = if result.is_ok() { "success" } else { "failure" };
    metrics::record_background_job(job_type, status, start.elapsed().as_secs_f64());
    result
}
