//! Background retention loops.
//!
//! Two independent loops run until their [`CancellationToken`] fires: one
//! evicts expired job records, the other sweeps stale workspaces from disk.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Supervisor;

/// Handles for the spawned retention loops.
pub struct MaintenanceHandles {
    pub eviction: JoinHandle<()>,
    pub sweep: JoinHandle<()>,
}

impl MaintenanceHandles {
    /// Wait for both loops to exit.
    pub async fn join(self) {
        let (eviction, sweep) = tokio::join!(self.eviction, self.sweep);
        if let Err(e) = eviction {
            tracing::error!("Eviction loop panicked: {e}");
        }
        if let Err(e) = sweep {
            tracing::error!("Workspace sweep loop panicked: {e}");
        }
    }
}

impl Supervisor {
    /// Start the eviction loop and the workspace sweep loop.
    pub fn spawn_maintenance(&self, cancel: CancellationToken) -> MaintenanceHandles {
        let eviction = tokio::spawn(run_eviction_loop(self.clone(), cancel.clone()));
        let sweep = tokio::spawn(run_sweep_loop(self.clone(), cancel));
        MaintenanceHandles { eviction, sweep }
    }
}

async fn run_eviction_loop(supervisor: Supervisor, cancel: CancellationToken) {
    let interval = supervisor.config().retention.eviction_interval();
    tracing::info!(interval_secs = interval.as_secs(), "Eviction loop started");

    while wait_or_cancel(interval, &cancel).await {
        let evicted = supervisor.evict_expired();
        if evicted > 0 {
            tracing::info!(evicted, "Evicted expired job records");
        }
    }

    tracing::info!("Eviction loop stopped");
}

async fn run_sweep_loop(supervisor: Supervisor, cancel: CancellationToken) {
    let interval = supervisor.config().retention.sweep_interval();
    tracing::info!(interval_secs = interval.as_secs(), "Workspace sweep loop started");

    while wait_or_cancel(interval, &cancel).await {
        let sweeper = supervisor.clone();
        match tokio::task::spawn_blocking(move || sweeper.sweep_workspaces()).await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "Removed stale workspaces"),
            Err(e) => tracing::error!("Cleanup cycle error: {e}"),
        }
    }

    tracing::info!("Workspace sweep loop stopped");
}

/// Sleep for `interval`; `false` once cancelled.
async fn wait_or_cancel(interval: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => !cancel.is_cancelled(),
        _ = cancel.cancelled() => false,
    }
}
