//! Usage aggregator — reduces per-pod samples to per-tier averages.
//!
//! One call to [`UsageAggregator::compute`] is one sampling pass. Nothing is
//! kept between passes; the result is an owned [`AggregateUsage`] value.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use kubeflux_cluster::{ClusterError, ClusterProvider, MetricsSource, Pod, Selector};
use kubeflux_state::Tier;

use crate::quantity::{parse_cpu_nanocores, parse_memory_kib};

/// Average usage of one tier during a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierUsage {
    /// Mean CPU per sampled pod, in nanocores.
    pub cpu_nanocores: u64,
    /// Mean memory per sampled pod, in KiB.
    pub memory_kib: u64,
    pub sampled_pods: u32,
    /// Pods whose usage could not be fetched or parsed.
    pub excluded_pods: u32,
}

/// Per-tier usage of one cycle. Every tier is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateUsage {
    /// Unix epoch seconds when sampling finished.
    pub sampled_at: u64,
    pub tiers: BTreeMap<Tier, TierUsage>,
}

impl AggregateUsage {
    /// All tiers at zero, stamped now.
    pub fn empty() -> Self {
        Self {
            sampled_at: epoch_secs(),
            tiers: Tier::ALL.into_iter().map(|t| (t, TierUsage::default())).collect(),
        }
    }

    pub fn tier(&self, tier: Tier) -> TierUsage {
        self.tiers.get(&tier).copied().unwrap_or_default()
    }
}

impl Default for AggregateUsage {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Default)]
struct TierTotals {
    cpu_nanocores: u64,
    memory_kib: u64,
    sampled: u32,
    excluded: u32,
}

impl TierTotals {
    fn average(&self) -> TierUsage {
        let divisor = u64::from(self.sampled.max(1));
        TierUsage {
            cpu_nanocores: self.cpu_nanocores / divisor,
            memory_kib: self.memory_kib / divisor,
            sampled_pods: self.sampled,
            excluded_pods: self.excluded,
        }
    }
}

/// Samples pod usage through the cluster collaborators.
#[derive(Clone)]
pub struct UsageAggregator {
    provider: Arc<dyn ClusterProvider>,
    metrics: Arc<dyn MetricsSource>,
    selector: Selector,
}

impl UsageAggregator {
    pub fn new(
        provider: Arc<dyn ClusterProvider>,
        metrics: Arc<dyn MetricsSource>,
        selector: Selector,
    ) -> Self {
        Self {
            provider,
            metrics,
            selector,
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Sample every tiered pod and average per tier.
    ///
    /// A listing failure aborts the pass. A pod whose usage cannot be
    /// fetched or parsed is excluded from its tier and counted.
    pub async fn compute(&self) -> Result<AggregateUsage, ClusterError> {
        let workloads = self.provider.list_workloads(&self.selector).await?;

        let mut totals: BTreeMap<Tier, TierTotals> = Tier::ALL
            .into_iter()
            .map(|t| (t, TierTotals::default()))
            .collect();

        for workload in &workloads {
            let pods = self.provider.list_pods(workload, &self.selector).await?;

            for pod in &pods {
                let Some(tier) = pod.tier.or(workload.tier) else {
                    debug!(pod = %pod.id, workload = %workload.id, "pod has no tier, skipping");
                    continue;
                };
                let entry = totals.entry(tier).or_default();

                match self.sample(pod).await {
                    Ok((cpu, memory)) => {
                        entry.cpu_nanocores = entry.cpu_nanocores.saturating_add(cpu);
                        entry.memory_kib = entry.memory_kib.saturating_add(memory);
                        entry.sampled += 1;
                    }
                    Err(e) => {
                        warn!(pod = %pod.id, tier = %tier, error = %e, "excluding pod from usage");
                        entry.excluded += 1;
                    }
                }
            }
        }

        let usage = AggregateUsage {
            sampled_at: epoch_secs(),
            tiers: totals.iter().map(|(t, tt)| (*t, tt.average())).collect(),
        };

        for (tier, u) in &usage.tiers {
            info!(
                tier = %tier,
                cpu_nanocores = u.cpu_nanocores,
                memory_kib = u.memory_kib,
                sampled = u.sampled_pods,
                excluded = u.excluded_pods,
                "tier usage"
            );
        }

        Ok(usage)
    }

    /// Fetch one pod's usage and sum it across containers.
    async fn sample(&self, pod: &Pod) -> Result<(u64, u64), ClusterError> {
        let sample = self.metrics.pod_usage(pod).await?;
        if sample.containers.is_empty() {
            return Err(ClusterError::MetricsParse {
                pod: pod.id.clone(),
                reason: "no containers reported".to_string(),
            });
        }

        let malformed = |e: crate::quantity::QuantityError| ClusterError::MetricsParse {
            pod: pod.id.clone(),
            reason: e.to_string(),
        };

        let mut cpu = 0u64;
        let mut memory = 0u64;
        for container in &sample.containers {
            cpu = cpu.saturating_add(parse_cpu_nanocores(&container.cpu).map_err(malformed)?);
            memory = memory.saturating_add(parse_memory_kib(&container.memory).map_err(malformed)?);
        }
        Ok((cpu, memory))
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
