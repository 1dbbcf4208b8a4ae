//! Mode advisors — optional automatic mode selection.
//!
//! Without an advisor the mode only changes through the API.

use anyhow::bail;
use tracing::debug;

use kubeflux_metrics::AggregateUsage;
use kubeflux_state::{Mode, Tier};

/// Proposes a mode from the latest usage.
pub trait ModeAdvisor: Send + Sync {
    /// `None` keeps the current mode.
    fn advise(&self, usage: &AggregateUsage, current: Mode) -> Option<Mode>;
}

/// Picks a mode from one tier's mean CPU against two thresholds.
///
/// At or above `red` → Red, at or above `yellow` → Yellow, else Green.
/// A tier with no sampled pods gives no advice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdAdvisor {
    tier: Tier,
    yellow_cpu_nanocores: u64,
    red_cpu_nanocores: u64,
}

impl ThresholdAdvisor {
    pub fn new(
        tier: Tier,
        yellow_cpu_nanocores: u64,
        red_cpu_nanocores: u64,
    ) -> anyhow::Result<Self> {
        if yellow_cpu_nanocores > red_cpu_nanocores {
            bail!(
                "yellow threshold ({yellow_cpu_nanocores}) must not exceed red threshold ({red_cpu_nanocores})"
            );
        }
        Ok(Self {
            tier,
            yellow_cpu_nanocores,
            red_cpu_nanocores,
        })
    }
}

impl ModeAdvisor for ThresholdAdvisor {
    fn advise(&self, usage: &AggregateUsage, current: Mode) -> Option<Mode> {
        let watched = usage.tier(self.tier);
        if watched.sampled_pods == 0 {
            return None;
        }

        let proposed = if watched.cpu_nanocores >= self.red_cpu_nanocores {
            Mode::Red
        } else if watched.cpu_nanocores >= self.yellow_cpu_nanocores {
            Mode::Yellow
        } else {
            Mode::Green
        };

        debug!(
            tier = %self.tier,
            cpu_nanocores = watched.cpu_nanocores,
            current = %current,
            proposed = %proposed,
            "threshold advice"
        );
        (proposed != current).then_some(proposed)
    }
}
