//! ReplicaController — drives each tier's workloads to the policy target.
//!
//! The target for a tier is always `factor_matrix[mode][tier]`. Usage is
//! only logged alongside the decision; it never changes a target.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use kubeflux_cluster::{ClusterProvider, Selector, Workload};
use kubeflux_metrics::AggregateUsage;
use kubeflux_state::{Mode, Policy, Tier};

/// Direction of a replica change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleAction {
    None,
    Increased,
    Decreased,
}

impl ScaleAction {
    fn between(previous: u32, target: u32) -> Self {
        match target.cmp(&previous) {
            std::cmp::Ordering::Equal => ScaleAction::None,
            std::cmp::Ordering::Greater => ScaleAction::Increased,
            std::cmp::Ordering::Less => ScaleAction::Decreased,
        }
    }
}

/// What happened to one (tier, workload) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ScaleOutcome {
    /// Already at target.
    Unchanged,
    /// Replica update accepted.
    Scaled,
    Failed { reason: String },
    /// No workload carries this tier.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileEntry {
    pub tier: Tier,
    /// `None` for `missing` entries and listing failures.
    pub workload: Option<String>,
    pub previous: Option<u32>,
    pub target: u32,
    pub action: ScaleAction,
    pub outcome: ScaleOutcome,
}

/// Result of one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub mode: Mode,
    pub entries: Vec<ReconcileEntry>,
}

impl ReconcileReport {
    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReconcileEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, ScaleOutcome::Failed { .. }))
    }

    /// Number of replica updates that were accepted.
    pub fn scaled(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome == ScaleOutcome::Scaled)
            .count()
    }

    pub fn entries_for(&self, tier: Tier) -> impl Iterator<Item = &ReconcileEntry> {
        self.entries.iter().filter(move |e| e.tier == tier)
    }
}

/// Compares workloads with the active factor matrix row and issues
/// corrective replica updates.
#[derive(Clone)]
pub struct ReplicaController {
    provider: Arc<dyn ClusterProvider>,
    selector: Selector,
}

impl ReplicaController {
    pub fn new(provider: Arc<dyn ClusterProvider>, selector: Selector) -> Self {
        Self { provider, selector }
    }

    /// Reconcile every tier of the active mode.
    ///
    /// Workloads are listed fresh. A listing failure fails every tier and
    /// issues no update; an update failure only fails its own entry.
    pub async fn reconcile(&self, usage: &AggregateUsage, policy: &Policy) -> ReconcileReport {
        let targets = policy.active_targets();

        let workloads = match self.provider.list_workloads(&self.selector).await {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "cannot list workloads, skipping reconcile");
                let reason = e.to_string();
                return ReconcileReport {
                    mode: policy.mode,
                    entries: targets
                        .into_iter()
                        .map(|(tier, target)| ReconcileEntry {
                            tier,
                            workload: None,
                            previous: None,
                            target,
                            action: ScaleAction::None,
                            outcome: ScaleOutcome::Failed {
                                reason: reason.clone(),
                            },
                        })
                        .collect(),
                };
            }
        };

        let mut entries = Vec::new();
        for (tier, target) in targets {
            let tier_usage = usage.tier(tier);
            let matching: Vec<&Workload> =
                workloads.iter().filter(|w| w.tier == Some(tier)).collect();

            if matching.is_empty() {
                warn!(tier = %tier, target, "no workload found for tier");
                entries.push(ReconcileEntry {
                    tier,
                    workload: None,
                    previous: None,
                    target,
                    action: ScaleAction::None,
                    outcome: ScaleOutcome::Missing,
                });
                continue;
            }

            for workload in matching {
                let action = ScaleAction::between(workload.replicas, target);
                let outcome = if action == ScaleAction::None {
                    debug!(tier = %tier, workload = %workload.id, replicas = target, "at target");
                    ScaleOutcome::Unchanged
                } else {
                    match self.provider.set_replicas(&workload.id, target).await {
                        Ok(()) => {
                            info!(
                                tier = %tier,
                                workload = %workload.id,
                                from = workload.replicas,
                                to = target,
                                cpu_nanocores = tier_usage.cpu_nanocores,
                                memory_kib = tier_usage.memory_kib,
                                "replicas updated"
                            );
                            ScaleOutcome::Scaled
                        }
                        Err(e) => {
                            warn!(
                                tier = %tier,
                                workload = %workload.id,
                                target,
                                error = %e,
                                "replica update failed"
                            );
                            ScaleOutcome::Failed {
                                reason: e.to_string(),
                            }
                        }
                    }
                };

                entries.push(ReconcileEntry {
                    tier,
                    workload: Some(workload.id.clone()),
                    previous: Some(workload.replicas),
                    target,
                    action,
                    outcome,
                });
            }
        }

        ReconcileReport {
            mode: policy.mode,
            entries,
        }
    }
}
