//! kubeflux.toml configuration.
//!
//! Every section and key is optional; missing values fall back to the
//! defaults below. CLI flags are applied on top with
//! [`KubefluxConfig::apply_overrides`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use kubeflux_autoscale::{DEFAULT_INTERVAL, ThresholdAdvisor};
use kubeflux_cluster::{DEFAULT_TIER_KEY, KubeConfig, Selector, StaticWorkload};
use kubeflux_state::{FactorMatrix, Mode, Policy, RawFactorMatrix, Tier};

pub const DEFAULT_PORT: u16 = 8888;

/// Database file name inside `storage.data_dir`.
pub const DB_FILE: &str = "kubeflux.redb";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KubefluxConfig {
    pub server: ServerConfig,
    pub control: ControlConfig,
    pub storage: StorageConfig,
    pub cluster: ClusterConfig,
    pub policy: PolicyConfig,
    pub advisor: AdvisorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub interval_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// No persistence when unset.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Kube,
    Static,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub provider: ProviderKind,
    pub api_url: String,
    pub namespace: String,
    pub label_selector: Option<String>,
    pub tier_key: String,
    pub token_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub timeout_secs: u64,
    /// Seed for the static provider.
    pub workloads: Vec<StaticWorkload>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let kube = KubeConfig::default();
        Self {
            provider: ProviderKind::default(),
            api_url: kube.api_url,
            namespace: kube.namespace,
            label_selector: None,
            tier_key: DEFAULT_TIER_KEY.to_string(),
            token_file: None,
            ca_file: None,
            timeout_secs: kube.timeout.as_secs(),
            workloads: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub mode: Option<String>,
    pub factor_matrix: Option<RawFactorMatrix>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub enabled: bool,
    pub tier: String,
    pub yellow_cpu_nanocores: Option<u64>,
    pub red_cpu_nanocores: Option<u64>,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tier: Tier::High.to_string(),
            yellow_cpu_nanocores: None,
            red_cpu_nanocores: None,
        }
    }
}

impl KubefluxConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: KubefluxConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply CLI flags; `None` keeps the file value.
    pub fn apply_overrides(
        &mut self,
        port: Option<u16>,
        interval_secs: Option<u64>,
        data_dir: Option<PathBuf>,
        namespace: Option<String>,
    ) {
        if let Some(port) = port {
            self.server.port = port;
        }
        if let Some(secs) = interval_secs {
            self.control.interval_secs = secs;
        }
        if data_dir.is_some() {
            self.storage.data_dir = data_dir;
        }
        if let Some(namespace) = namespace {
            self.cluster.namespace = namespace;
        }
    }

    pub fn interval(&self) -> anyhow::Result<Duration> {
        if self.control.interval_secs == 0 {
            bail!("control.interval_secs must be positive");
        }
        Ok(Duration::from_secs(self.control.interval_secs))
    }

    pub fn db_path(&self) -> Option<PathBuf> {
        self.storage.data_dir.as_ref().map(|dir| dir.join(DB_FILE))
    }

    /// Policy used when nothing is persisted yet.
    pub fn initial_policy(&self) -> anyhow::Result<Policy> {
        let mode = match &self.policy.mode {
            Some(mode) => mode.parse::<Mode>().context("policy.mode")?,
            None => Mode::Green,
        };
        let matrix = match &self.policy.factor_matrix {
            Some(raw) => FactorMatrix::try_from(raw.clone()).context("policy.factor_matrix")?,
            None => FactorMatrix::default(),
        };
        Ok(Policy::new(mode, matrix))
    }

    pub fn selector(&self) -> Selector {
        Selector {
            labels: self.cluster.label_selector.clone(),
            tier_key: self.cluster.tier_key.clone(),
        }
    }

    pub fn kube_config(&self) -> KubeConfig {
        KubeConfig {
            api_url: self.cluster.api_url.clone(),
            namespace: self.cluster.namespace.clone(),
            token_file: self.cluster.token_file.clone(),
            ca_file: self.cluster.ca_file.clone(),
            timeout: Duration::from_secs(self.cluster.timeout_secs),
        }
    }

    /// The configured mode advisor, if enabled.
    pub fn advisor(&self) -> anyhow::Result<Option<ThresholdAdvisor>> {
        if !self.advisor.enabled {
            return Ok(None);
        }

        let tier: Tier = self.advisor.tier.parse().context("advisor.tier")?;
        let (Some(yellow), Some(red)) = (
            self.advisor.yellow_cpu_nanocores,
            self.advisor.red_cpu_nanocores,
        ) else {
            bail!("advisor.yellow_cpu_nanocores and advisor.red_cpu_nanocores are required when the advisor is enabled");
        };

        Ok(Some(ThresholdAdvisor::new(tier, yellow, red)?))
    }
}
