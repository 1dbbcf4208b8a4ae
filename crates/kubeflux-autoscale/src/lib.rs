//! kubeflux-autoscale — tier reconciliation against the factor matrix.
//!
//! # Cycle
//!
//! ```text
//! usage  = UsageAggregator::compute()        // abort on listing failure
//! mode   = advisor.advise(usage) or current  // only with an advisor
//! policy = PolicyStore::snapshot()
//!
//! for (tier, target) in policy.factor_matrix[policy.mode]:
//!     for workload in tier:
//!         if workload.replicas != target:
//!             set_replicas(workload, target)
//! ```
//!
//! Every pass, whether started by the [`ControlLoop`] or by the API, goes
//! through the [`Reconciler`] gate.

pub mod advisor;
pub mod control_loop;
pub mod controller;
pub mod reconciler;

pub use advisor::{ModeAdvisor, ThresholdAdvisor};
pub use control_loop::{ControlLoop, DEFAULT_INTERVAL, LoopHandle};
pub use controller::{
    ReconcileEntry, ReconcileReport, ReplicaController, ScaleAction, ScaleOutcome,
};
pub use reconciler::{ReconcileStatus, Reconciler};
