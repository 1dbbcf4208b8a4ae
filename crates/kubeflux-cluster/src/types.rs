//! Observation types exchanged with cluster collaborators.

use serde::{Deserialize, Serialize};

use kubeflux_state::Tier;

/// Default label/annotation key carrying a tier name.
pub const DEFAULT_TIER_KEY: &str = "tier";

/// An externally managed replicated unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub id: String,
    /// `None` when the workload carries no recognised tier label.
    pub tier: Option<Tier>,
    /// Replica count as last reported by the cluster.
    pub replicas: u32,
    /// Label selector matching the workload's pods (`k=v,k2=v2`).
    pub pod_selector: String,
}

/// A single running replica of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub id: String,
    pub workload_id: String,
    /// Tier set on the pod itself; callers fall back to the workload's tier.
    pub tier: Option<Tier>,
}

/// Raw usage of one container, in resource quantity notation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerUsage {
    pub name: String,
    pub cpu: String,
    pub memory: String,
}

/// Raw usage of one pod as returned by the metrics source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodUsageSample {
    pub pod_id: String,
    pub containers: Vec<ContainerUsage>,
}

/// Which workloads to consider and where their tier is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    /// Label selector applied when listing workloads.
    pub labels: Option<String>,
    /// Label (or annotation) key holding the tier name.
    pub tier_key: String,
}

impl Default for Selector {
    fn default() -> Self {
        Self {
            labels: None,
            tier_key: DEFAULT_TIER_KEY.to_string(),
        }
    }
}
