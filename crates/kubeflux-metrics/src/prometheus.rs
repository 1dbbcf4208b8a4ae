//! Prometheus text exposition format.
//!
//! Renders the latest tier usage and the active policy for scraping by a
//! Prometheus server or compatible agent.

use kubeflux_state::{Mode, Policy, Tier};

use crate::aggregator::{AggregateUsage, TierUsage};

/// Render usage (if a cycle has completed) and policy into Prometheus text.
///
/// Tier gauges are labelled `tier`; the mode is a one-hot gauge labelled
/// `mode`.
pub fn render_prometheus(usage: Option<&AggregateUsage>, policy: &Policy) -> String {
    let mut out = String::new();

    if let Some(usage) = usage {
        tier_gauge(
            &mut out,
            "kubeflux_tier_cpu_nanocores",
            "Mean CPU per sampled pod in nanocores.",
            usage,
            |u| u.cpu_nanocores,
        );
        tier_gauge(
            &mut out,
            "kubeflux_tier_memory_kib",
            "Mean memory per sampled pod in KiB.",
            usage,
            |u| u.memory_kib,
        );
        tier_gauge(
            &mut out,
            "kubeflux_tier_sampled_pods",
            "Pods sampled in the last cycle.",
            usage,
            |u| u64::from(u.sampled_pods),
        );
        tier_gauge(
            &mut out,
            "kubeflux_tier_excluded_pods",
            "Pods excluded from the last cycle.",
            usage,
            |u| u64::from(u.excluded_pods),
        );

        out.push_str("# HELP kubeflux_last_sample_timestamp_seconds Unix time of the last usage sample.\n");
        out.push_str("# TYPE kubeflux_last_sample_timestamp_seconds gauge\n");
        out.push_str(&format!(
            "kubeflux_last_sample_timestamp_seconds {}\n",
            usage.sampled_at
        ));
    }

    out.push_str("# HELP kubeflux_replica_target Target replicas per tier under the active mode.\n");
    out.push_str("# TYPE kubeflux_replica_target gauge\n");
    for tier in Tier::ALL {
        out.push_str(&format!(
            "kubeflux_replica_target{{tier=\"{}\"}} {}\n",
            tier,
            policy.target(tier)
        ));
    }

    out.push_str("# HELP kubeflux_mode Active operating mode (1 for the active one).\n");
    out.push_str("# TYPE kubeflux_mode gauge\n");
    for mode in Mode::ALL {
        out.push_str(&format!(
            "kubeflux_mode{{mode=\"{}\"}} {}\n",
            mode,
            u8::from(mode == policy.mode)
        ));
    }

    out
}

fn tier_gauge(
    out: &mut String,
    name: &str,
    help: &str,
    usage: &AggregateUsage,
    value: impl Fn(&TierUsage) -> u64,
) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} gauge\n"));
    for (tier, u) in &usage.tiers {
        out.push_str(&format!("{name}{{tier=\"{tier}\"}} {}\n", value(u)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage() -> AggregateUsage {
        let mut usage = AggregateUsage::empty();
        usage.sampled_at = 1_700_000_000;
        usage.tiers.insert(
            Tier::High,
            TierUsage {
                cpu_nanocores: 250_000_000,
                memory_kib: 65_536,
                sampled_pods: 3,
                excluded_pods: 1,
            },
        );
        usage
    }

    #[test]
    fn renders_tier_usage() {
        let output = render_prometheus(Some(&usage()), &Policy::default());

        assert!(output.contains("# TYPE kubeflux_tier_cpu_nanocores gauge"));
        assert!(output.contains("kubeflux_tier_cpu_nanocores{tier=\"High\"} 250000000"));
        assert!(output.contains("kubeflux_tier_memory_kib{tier=\"High\"} 65536"));
        assert!(output.contains("kubeflux_tier_sampled_pods{tier=\"High\"} 3"));
        assert!(output.contains("kubeflux_tier_excluded_pods{tier=\"High\"} 1"));
        assert!(output.contains("kubeflux_tier_cpu_nanocores{tier=\"Low\"} 0"));
        assert!(output.contains("kubeflux_last_sample_timestamp_seconds 1700000000"));
    }

    #[test]
    fn renders_policy_without_usage() {
        let policy = Policy {
            mode: Mode::Red,
            ..Policy::default()
        };
        let output = render_prometheus(None, &policy);

        assert!(!output.contains("kubeflux_tier_cpu_nanocores"));
        assert!(output.contains("kubeflux_replica_target{tier=\"High\"} 3"));
        assert!(output.contains("kubeflux_mode{mode=\"Red\"} 1"));
        assert!(output.contains("kubeflux_mode{mode=\"Green\"} 0"));
    }

    #[test]
    fn every_sample_line_is_declared() {
        let output = render_prometheus(Some(&usage()), &Policy::default());
        for line in output.lines().filter(|l| !l.starts_with('#')) {
            let name = line.split(['{', ' ']).next().unwrap();
            assert!(
                output.contains(&format!("# TYPE {name} gauge")),
                "undeclared metric {name}"
            );
        }
    }
}
