//! Wall-clock driver for the scheduler.
//!
//! `SchedulerDaemon` runs a tokio event loop that fires one scheduler tick per
//! interval and persists the store periodically. Agents stay synchronous:
//! tokio only drives timing and signal handling, and each tick runs on the
//! blocking pool.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{MindResult, SchedulerError};
use crate::store::DurableImage;

use super::Scheduler;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Timing of the daemon loop.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Length of one tick (default: 1s).
    pub tick_interval: Duration,
    /// Store persistence interval (default: 60s).
    pub persist_interval: Duration,
    /// Stop after this many ticks (0 = unlimited).
    pub max_ticks: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            persist_interval: Duration::from_secs(60),
            max_ticks: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Long-running loop ticking a [`Scheduler`] until Ctrl+C.
pub struct SchedulerDaemon {
    scheduler: Arc<Scheduler>,
    image: Option<DurableImage>,
    config: DaemonConfig,
}

impl SchedulerDaemon {
    pub fn new(scheduler: Arc<Scheduler>, image: Option<DurableImage>, config: DaemonConfig) -> Self {
        Self {
            scheduler,
            image,
            config,
        }
    }

    /// Run the main loop.
    ///
    /// Shuts down cleanly on Ctrl+C or after `max_ticks`, persisting the
    /// store before returning. A fatal scheduler error also ends the loop,
    /// without persisting the possibly inconsistent store.
    pub async fn run(&self) -> MindResult<()> {
        use tokio::time::{MissedTickBehavior, interval};

        let mut tick_timer = interval(self.config.tick_interval);
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut persist_timer = interval(self.config.persist_interval);
        persist_timer.tick().await;

        tracing::info!(
            agents = self.scheduler.agent_count(),
            interval_ms = self.config.tick_interval.as_millis() as u64,
            "daemon started"
        );

        loop {
            tokio::select! {
                _ = tick_timer.tick() => {
                    let scheduler = Arc::clone(&self.scheduler);
                    let report = tokio::task::spawn_blocking(move || scheduler.step())
                        .await
                        .map_err(|e| SchedulerError::Fatal {
                            message: format!("tick task failed: {e}"),
                        })??;
                    tracing::debug!(tick = report.tick, runs = report.runs.len(), asserted = report.asserted(), "daemon tick");
                    if self.config.max_ticks > 0 && report.tick >= self.config.max_ticks {
                        tracing::info!(max_ticks = self.config.max_ticks, "daemon: tick limit reached, shutting down");
                        break;
                    }
                }
                _ = persist_timer.tick() => {
                    self.persist();
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("daemon: received shutdown signal, persisting store...");
                    break;
                }
            }
        }

        self.persist();
        tracing::info!(ticks = self.scheduler.current_tick(), "daemon stopped");
        Ok(())
    }

    fn persist(&self) {
        let Some(image) = &self.image else {
            return;
        };
        match image.save(self.scheduler.store()) {
            Ok(()) => tracing::debug!(atoms = self.scheduler.store().len(), "daemon: store persisted"),
            Err(e) => tracing::warn!(error = %e, "daemon: persist failed"),
        }
    }
}
