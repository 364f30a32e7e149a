use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::sync::SyncHub;

/// Periodically drops idle clients and expired updates from the hub.
pub struct SweepScheduler {
    hub: Arc<SyncHub>,
    interval: Duration,
}

impl SweepScheduler {
    pub fn new(hub: Arc<SyncHub>, interval: Duration) -> Self {
        Self { hub, interval }
    }

    /// Runs forever, sweeping once per interval.
    pub async fn start(self) {
        info!("Starting sweep scheduler (interval: {:?})", self.interval);

        loop {
            // Wait first, then sweep
            tokio::time::sleep(self.interval).await;

            let report = self.hub.sweep();
            if report.dropped_clients > 0 || report.pruned_updates > 0 {
                info!(
                    "Sweep completed - dropped {} idle clients, pruned {} updates",
                    report.dropped_clients, report.pruned_updates
                );
            } else {
                debug!("Sweep completed - nothing to clean up");
            }
        }
    }
}
