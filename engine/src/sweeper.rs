//! Background expiry sweep.
//!
//! Runs on its own timer, independent of user traffic:
//!
//! ```text
//! loop {
//!     tick or shutdown:
//!         - expire lapsed sessions (seats back to free, notifications out)
//!         - expire open orders past their deadline
//!         - prune bus topics nobody listens to
//! }
//! ```
//!
//! Failures are logged and the next tick tries again.

use crate::bus::NotificationBus;
use crate::holds::HoldManager;
use crate::metrics;
use crate::orders::OrderCoordinator;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// What one sweep did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions released because their hold lapsed
    pub sessions_expired: usize,
    /// Orders moved to `expired`
    pub orders_expired: usize,
    /// Bus topics dropped
    pub topics_pruned: usize,
}

/// Periodic releaser of lapsed holds and overdue orders.
pub struct ExpirySweeper {
    holds: Arc<HoldManager>,
    orders: Arc<OrderCoordinator>,
    bus: NotificationBus,
    interval: Duration,
}

impl ExpirySweeper {
    /// Creates a sweeper running every `interval`
    #[must_use]
    pub fn new(
        holds: Arc<HoldManager>,
        orders: Arc<OrderCoordinator>,
        bus: NotificationBus,
        interval: Duration,
    ) -> Self {
        Self {
            holds,
            orders,
            bus,
            interval,
        }
    }

    /// Run one sweep now.
    pub async fn run_once(&self) -> SweepReport {
        let started = Instant::now();

        let sessions_expired = self.holds.sweep_expired().await;
        let orders_expired = match self.orders.expire_overdue_orders().await {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, "Failed to expire overdue orders");
                0
            }
        };
        let topics_pruned = self.bus.prune_idle().await;

        metrics::record_sweep_duration(started.elapsed().as_secs_f64());
        let report = SweepReport {
            sessions_expired,
            orders_expired,
            topics_pruned,
        };
        if report != SweepReport::default() {
            debug!(?report, "Expiry sweep finished");
        }
        report
    }

    /// Spawn the sweep loop as a background task.
    ///
    /// The task stops when `shutdown` fires or its sender is dropped.
    #[must_use]
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = self.interval.as_millis(), "Expiry sweeper started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Expiry sweeper received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }

            info!("Expiry sweeper stopped");
        })
    }
}
