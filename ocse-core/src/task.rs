use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::CseError;

/// Helpers for the CSE's background activities (expiration sweeps,
/// announcement retries, registrar probes, batch flushes, statistics writes).
///
/// Each worker is a plain tokio task driven by an interval and stopped
/// through a [`CancellationToken`]; a tick that is already running finishes
/// before the task exits, so shutdown never truncates a sweep.
pub struct Worker;

impl Worker {
    /// Spawn a ticking worker. Errors from a tick are logged, not fatal.
    pub fn interval<F, Fut>(
        name: &'static str,
        period: Duration,
        token: CancellationToken,
        f: F,
    ) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CseError>> + Send,
    {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so workers start
            // one full period after boot.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!(worker = name, "worker stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(err) = f().await {
                            tracing::warn!(worker = name, error = %err, "worker tick failed");
                        }
                    }
                }
            }
        })
    }
}
