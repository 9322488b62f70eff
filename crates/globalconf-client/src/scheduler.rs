//! Periodic refresh cycles.
//!
//! The scheduler ticks at the configured interval and runs a cycle on each
//! tick, unless an on-demand cycle is already holding the client context,
//! in which case the tick is skipped. Shutdown is only observed between
//! cycles.

use crate::client::{ConfigurationClient, CycleOptions};
use crate::fetch::DocumentFetcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a running scheduler task.
pub struct SchedulerHandle<F> {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    client: Arc<ConfigurationClient<F>>,
}

/// Starts the scheduler. The first cycle runs immediately.
pub fn spawn_scheduler<F>(
    client: Arc<ConfigurationClient<F>>,
    interval: Duration,
    options: CycleOptions,
) -> SchedulerHandle<F>
where
    F: DocumentFetcher + 'static,
{
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let task_client = Arc::clone(&client);

    tracing::info!(interval_seconds = interval.as_secs(), "starting configuration scheduler");

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    match task_client.try_run_cycle(&options).await {
                        Some(report) => {
                            tracing::debug!(
                                cycle_id = %report.cycle_id,
                                outcome = %report.outcome,
                                "scheduled cycle finished"
                            );
                        }
                        None => {
                            tracing::debug!("cycle already in flight, skipping tick");
                        }
                    }
                }
            }
        }

        tracing::info!("configuration scheduler stopped");
    });

    SchedulerHandle {
        shutdown,
        task,
        client,
    }
}

impl<F: DocumentFetcher> SchedulerHandle<F> {
    /// Stops the scheduler, then waits for any running cycle to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("scheduler task join error: {}", e);
        }
        self.client.wait_idle().await;
    }
}
