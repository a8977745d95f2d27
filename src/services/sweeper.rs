use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::middleware::rate_limit::RateLimitStore;
use crate::services::HoldManager;

/// Background pass that expires lapsed holds, drops closed holds past their
/// retention and evicts ended rate-limit windows.
pub struct ExpirySweeper {
    holds: HoldManager,
    rate_limits: Option<Arc<dyn RateLimitStore>>,
    interval: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub holds_expired: usize,
    pub seats_freed: usize,
    pub holds_purged: usize,
    pub windows_evicted: usize,
}

impl ExpirySweeper {
    pub fn new(holds: HoldManager, interval: Duration) -> Self {
        Self {
            holds,
            rate_limits: None,
            interval,
        }
    }

    pub fn with_rate_limits(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.rate_limits = Some(store);
        self
    }

    /// One full pass. Storage failures are logged and reported as nothing done.
    pub async fn run_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.holds.sweep().await {
            Ok(expired) => {
                report.holds_expired = expired.len();
                report.seats_freed = expired.iter().map(|h| h.seats.len()).sum();
                for hold in &expired {
                    debug!("Hold {} expired, {} seats freed", hold.id, hold.seats.len());
                }
            }
            Err(e) => error!("Hold sweep failed: {}", e),
        }

        match self.holds.purge_closed().await {
            Ok(purged) => report.holds_purged = purged,
            Err(e) => error!("Closed hold purge failed: {}", e),
        }

        if let Some(store) = &self.rate_limits {
            report.windows_evicted = store.evict_expired().await;
        }

        if report != SweepReport::default() {
            info!(
                "Sweep: {} holds expired, {} seats freed, {} closed holds purged, {} rate-limit windows evicted",
                report.holds_expired, report.seats_freed, report.holds_purged, report.windows_evicted
            );
        } else {
            debug!("Sweep: nothing to do");
        }
        report
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Expiry sweeper started, interval {:?}", self.interval);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {
                        self.run_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Expiry sweeper stopped");
        })
    }
}
