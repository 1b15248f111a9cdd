//! # Stale Run Sweeper
//!
//! Background task that releases sync keys held by abandoned runs and returns queue tasks
//! whose worker disappeared mid-flight to the queue.

use std::time::Duration;

use metrics::histogram;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::orchestrator::SyncOrchestrator;
use crate::config::SweeperConfig;
use crate::queue::JobQueue;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub runs_reset: u64,
    pub tasks_recovered: u64,
}

pub struct StaleRunSweeper {
    orchestrator: SyncOrchestrator,
    queue: JobQueue,
    config: SweeperConfig,
}

impl StaleRunSweeper {
    pub fn new(orchestrator: SyncOrchestrator, queue: JobQueue, config: SweeperConfig) -> Self {
        Self {
            orchestrator,
            queue,
            config,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting stale run sweeper");
        let tick = Duration::from_secs(self.config.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Stale run sweeper shutdown requested");
                    break;
                }
                _ = sleep(tick) => {
                    let started = Instant::now();
                    let stats = self.tick().await;
                    if stats != SweepStats::default() {
                        info!(runs_reset = stats.runs_reset, tasks_recovered = stats.tasks_recovered, "Sweep reclaimed work");
                    }
                    histogram!("sweeper_tick_duration_ms")
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Stale run sweeper stopped");
    }

    /// One sweep; failures of either half are logged and do not stop the other
    pub async fn tick(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        match self.orchestrator.reset_stale_runs().await {
            Ok(reset) => stats.runs_reset = reset,
            Err(err) => error!(error = %err, "Failed to reset stale runs"),
        }

        let stalled = Duration::from_secs(self.config.stalled_task_seconds);
        match self.queue.recover_stalled(stalled).await {
            Ok(recovered) => stats.tasks_recovered = recovered,
            Err(err) => warn!(error = %err, "Failed to recover stalled queue tasks"),
        }

        debug!(?stats, "Sweep finished");
        stats
    }
}
