//! ControlLoop — runs reconcile cycles on an interval until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::reconciler::Reconciler;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

/// Requests an out-of-schedule cycle from a running loop.
#[derive(Clone, Default)]
pub struct LoopHandle {
    trigger: Arc<Notify>,
}

impl LoopHandle {
    /// Schedule a cycle. Requests made while a cycle is running coalesce
    /// into one follow-up cycle.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }
}

pub struct ControlLoop {
    reconciler: Reconciler,
    interval: Duration,
    handle: LoopHandle,
}

impl ControlLoop {
    pub fn new(reconciler: Reconciler, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            handle: LoopHandle::default(),
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Run until `shutdown` flips or its sender goes away.
    ///
    /// The first cycle starts immediately. Shutdown is only observed
    /// between cycles, so an in-flight cycle always completes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "control loop started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.reconciler.run_cycle().await;
                }
                _ = self.handle.trigger.notified() => {
                    debug!("forced cycle");
                    self.reconciler.run_cycle().await;
                    ticker.reset();
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        info!("control loop shutting down");
    }
}
