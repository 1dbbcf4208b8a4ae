//! Reconciler — the single entry point for every reconcile.
//!
//! Control loop ticks and API-triggered reconciles both go through one
//! gate, so at most one sample→decide→apply pass is in flight. The last
//! usage and report are cached for `/status` and for reconciles that run
//! between ticks.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use kubeflux_metrics::{AggregateUsage, UsageAggregator};
use kubeflux_state::PolicyStore;

use crate::advisor::ModeAdvisor;
use crate::controller::{ReconcileReport, ReplicaController};

/// What the cache holds after the most recent pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileStatus {
    /// Usage of the last successful sample; `None` before the first.
    pub usage: Option<AggregateUsage>,
    /// Report of the last reconcile, from a tick or from the API.
    pub report: Option<ReconcileReport>,
    /// Error of the last cycle, cleared by the next successful one.
    pub last_error: Option<String>,
    /// Completed control loop cycles.
    pub cycles: u64,
}

#[derive(Clone)]
pub struct Reconciler {
    store: PolicyStore,
    aggregator: UsageAggregator,
    controller: ReplicaController,
    advisor: Option<Arc<dyn ModeAdvisor>>,
    gate: Arc<Mutex<()>>,
    status: Arc<RwLock<ReconcileStatus>>,
}

impl Reconciler {
    pub fn new(
        store: PolicyStore,
        aggregator: UsageAggregator,
        controller: ReplicaController,
    ) -> Self {
        Self {
            store,
            aggregator,
            controller,
            advisor: None,
            gate: Arc::new(Mutex::new(())),
            status: Arc::new(RwLock::new(ReconcileStatus::default())),
        }
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn ModeAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    /// Copy of the cached status.
    pub async fn status(&self) -> ReconcileStatus {
        self.status.read().await.clone()
    }

    /// One full control loop cycle: sample, optionally pick a mode, apply.
    ///
    /// Returns `None` when sampling failed; no replica is touched then.
    pub async fn run_cycle(&self) -> Option<ReconcileReport> {
        let _gate = self.gate.lock().await;

        let usage = match self.aggregator.compute().await {
            Ok(usage) => usage,
            Err(e) => {
                error!(error = %e, "usage sampling failed, cycle skipped");
                let mut status = self.status.write().await;
                status.last_error = Some(e.to_string());
                status.cycles += 1;
                return None;
            }
        };

        if let Some(advisor) = &self.advisor {
            let current = self.store.snapshot().await.mode;
            if let Some(proposed) = advisor.advise(&usage, current) {
                match self.store.set_mode(proposed).await {
                    Ok(_) => info!(from = %current, to = %proposed, "mode changed by advisor"),
                    Err(e) => warn!(error = %e, "advisor mode change not committed"),
                }
            }
        }

        let policy = self.store.snapshot().await;
        let report = self.controller.reconcile(&usage, &policy).await;
        log_report(&report, "cycle");

        let mut status = self.status.write().await;
        status.usage = Some(usage);
        status.report = Some(report.clone());
        status.last_error = None;
        status.cycles += 1;
        Some(report)
    }

    /// Reconcile against the latest committed policy without sampling.
    ///
    /// Uses the cached usage, or an empty one before the first cycle.
    pub async fn reconcile_now(&self) -> ReconcileReport {
        let _gate = self.gate.lock().await;

        let usage = self
            .status
            .read()
            .await
            .usage
            .clone()
            .unwrap_or_else(AggregateUsage::empty);
        let policy = self.store.snapshot().await;
        let report = self.controller.reconcile(&usage, &policy).await;
        log_report(&report, "on-demand");

        self.status.write().await.report = Some(report.clone());
        report
    }
}

fn log_report(report: &ReconcileReport, kind: &str) {
    let failed = report.failures().count();
    if failed > 0 {
        warn!(
            kind,
            mode = %report.mode,
            scaled = report.scaled(),
            failed,
            "reconcile finished with failures"
        );
    } else {
        info!(kind, mode = %report.mode, scaled = report.scaled(), "reconcile finished");
    }
}
