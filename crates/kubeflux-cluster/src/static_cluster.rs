//! StaticCluster — an in-memory cluster seeded from configuration.
//!
//! Serves dry runs of the daemon and doubles as the test cluster for the
//! other crates: failures can be injected per operation, and every replica
//! update is recorded.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use kubeflux_state::Tier;

use crate::error::ClusterError;
use crate::provider::{ClusterFuture, ClusterProvider, MetricsSource};
use crate::types::{ContainerUsage, Pod, PodUsageSample, Selector, Workload};

/// A workload definition for the static cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticWorkload {
    pub id: String,
    pub tier: Option<Tier>,
    pub replicas: u32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub pods: Vec<StaticPod>,
}

impl StaticWorkload {
    pub fn new(id: &str, tier: Tier, replicas: u32) -> Self {
        Self {
            id: id.to_string(),
            tier: Some(tier),
            replicas,
            labels: BTreeMap::new(),
            pods: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_pod(mut self, id: &str, cpu: &str, memory: &str) -> Self {
        self.pods.push(StaticPod {
            id: id.to_string(),
            tier: None,
            cpu: cpu.to_string(),
            memory: memory.to_string(),
        });
        self
    }
}

/// A pod of a [`StaticWorkload`] with fixed usage quantities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticPod {
    pub id: String,
    #[serde(default)]
    pub tier: Option<Tier>,
    pub cpu: String,
    pub memory: String,
}

#[derive(Default)]
struct Inner {
    workloads: BTreeMap<String, StaticWorkload>,
    fail_listing: bool,
    failing_metrics: HashSet<String>,
    failing_updates: HashSet<String>,
    updates: Vec<(String, u32)>,
}

/// In-memory [`ClusterProvider`] and [`MetricsSource`].
#[derive(Clone, Default)]
pub struct StaticCluster {
    inner: Arc<Mutex<Inner>>,
}

impl StaticCluster {
    pub fn new(workloads: impl IntoIterator<Item = StaticWorkload>) -> Self {
        let workloads = workloads.into_iter().map(|w| (w.id.clone(), w)).collect();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                workloads,
                ..Inner::default()
            })),
        }
    }

    /// Make workload and pod listing fail until turned off.
    pub async fn fail_listing(&self, fail: bool) {
        self.inner.lock().await.fail_listing = fail;
    }

    /// Make usage reads for `pod_id` fail.
    pub async fn fail_metrics_for(&self, pod_id: &str) {
        self.inner.lock().await.failing_metrics.insert(pod_id.to_string());
    }

    /// Make replica updates of `workload_id` fail.
    pub async fn fail_updates_for(&self, workload_id: &str) {
        self.inner
            .lock()
            .await
            .failing_updates
            .insert(workload_id.to_string());
    }

    /// Current replica count of a workload.
    pub async fn replicas(&self, workload_id: &str) -> Option<u32> {
        self.inner
            .lock()
            .await
            .workloads
            .get(workload_id)
            .map(|w| w.replicas)
    }

    /// Every successful `set_replicas` call, in order.
    pub async fn updates(&self) -> Vec<(String, u32)> {
        self.inner.lock().await.updates.clone()
    }
}

impl ClusterProvider for StaticCluster {
    fn list_workloads<'a>(&'a self, selector: &'a Selector) -> ClusterFuture<'a, Vec<Workload>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            if inner.fail_listing {
                return Err(ClusterError::list("workloads", "listing disabled"));
            }

            Ok(inner
                .workloads
                .values()
                .filter(|w| matches_selector(&w.labels, selector.labels.as_deref()))
                .map(|w| Workload {
                    id: w.id.clone(),
                    tier: w.tier,
                    replicas: w.replicas,
                    pod_selector: format!("workload={}", w.id),
                })
                .collect())
        })
    }

    fn list_pods<'a>(
        &'a self,
        workload: &'a Workload,
        _selector: &'a Selector,
    ) -> ClusterFuture<'a, Vec<Pod>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            if inner.fail_listing {
                return Err(ClusterError::list("pods", "listing disabled"));
            }

            Ok(inner
                .workloads
                .get(&workload.id)
                .map(|w| {
                    w.pods
                        .iter()
                        .map(|p| Pod {
                            id: p.id.clone(),
                            workload_id: w.id.clone(),
                            tier: p.tier,
                        })
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn set_replicas<'a>(&'a self, workload_id: &'a str, replicas: u32) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            if inner.failing_updates.contains(workload_id) {
                return Err(ClusterError::ReplicaUpdate {
                    workload: workload_id.to_string(),
                    reason: "update rejected".to_string(),
                });
            }

            let workload = inner.workloads.get_mut(workload_id).ok_or_else(|| {
                ClusterError::ReplicaUpdate {
                    workload: workload_id.to_string(),
                    reason: "no such workload".to_string(),
                }
            })?;
            workload.replicas = replicas;
            inner.updates.push((workload_id.to_string(), replicas));
            debug!(workload = %workload_id, replicas, "static replicas set");
            Ok(())
        })
    }
}

impl MetricsSource for StaticCluster {
    fn pod_usage<'a>(&'a self, pod: &'a Pod) -> ClusterFuture<'a, PodUsageSample> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            if inner.failing_metrics.contains(&pod.id) {
                return Err(ClusterError::MetricsFetch {
                    pod: pod.id.clone(),
                    reason: "metrics unavailable".to_string(),
                });
            }

            let found = inner
                .workloads
                .get(&pod.workload_id)
                .and_then(|w| w.pods.iter().find(|p| p.id == pod.id))
                .ok_or_else(|| ClusterError::MetricsFetch {
                    pod: pod.id.clone(),
                    reason: "pod not found".to_string(),
                })?;

            Ok(PodUsageSample {
                pod_id: found.id.clone(),
                containers: vec![ContainerUsage {
                    name: "main".to_string(),
                    cpu: found.cpu.clone(),
                    memory: found.memory.clone(),
                }],
            })
        })
    }
}

/// Equality-based label selector: `k=v`, `k==v`, `k!=v`, `k`, `!k`,
/// comma-separated and all required.
fn matches_selector(labels: &BTreeMap<String, String>, selector: Option<&str>) -> bool {
    let Some(selector) = selector else {
        return true;
    };

    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                labels.get(key.trim()).map(String::as_str) != Some(value.trim())
            } else if let Some((key, value)) = term.split_once('=') {
                let value = value.trim_start_matches('=');
                labels.get(key.trim()).map(String::as_str) == Some(value.trim())
            } else if let Some(key) = term.strip_prefix('!') {
                !labels.contains_key(key.trim())
            } else {
                labels.contains_key(term)
            }
        })
}
