//! Domain types for the kube-flux policy.
//!
//! `Mode` and `Tier` are closed sets. A `FactorMatrix` always holds a
//! target for every (mode, tier) pair; the only ways to build one are
//! [`FactorMatrix::from_fn`], [`Default`] and the validating
//! `TryFrom<RawFactorMatrix>` that serde goes through as well.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

// ── Mode ──────────────────────────────────────────────────────────

/// Global operating posture selecting the active factor matrix row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Mode {
    Green,
    Yellow,
    Red,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Green, Mode::Yellow, Mode::Red];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Green => "Green",
            Mode::Yellow => "Yellow",
            Mode::Red => "Red",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Mode {
    type Error = PolicyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl FromStr for Mode {
    type Err = PolicyError;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| PolicyError::InvalidMode(s.to_string()))
    }
}

// ── Tier ──────────────────────────────────────────────────────────

/// Priority label carried by workloads and pods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Tier {
    High,
    Medium,
    Low,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::High, Tier::Medium, Tier::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::High => "High",
            Tier::Medium => "Medium",
            Tier::Low => "Low",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Tier {
    type Error = PolicyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl FromStr for Tier {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Tier::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| PolicyError::InvalidTier(s.to_string()))
    }
}

// ── FactorMatrix ──────────────────────────────────────────────────

/// Unvalidated matrix as it arrives over the wire or from a config file.
///
/// Targets are signed so that negative values reach validation instead of
/// failing as a decode error.
pub type RawFactorMatrix = BTreeMap<String, BTreeMap<String, i64>>;

/// Target replica count for every (mode, tier) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFactorMatrix", into = "RawFactorMatrix")]
pub struct FactorMatrix {
    rows: BTreeMap<Mode, BTreeMap<Tier, u32>>,
}

impl FactorMatrix {
    /// Build a complete matrix from a target function.
    pub fn from_fn(f: impl Fn(Mode, Tier) -> u32) -> Self {
        let rows = Mode::ALL
            .into_iter()
            .map(|mode| {
                let row = Tier::ALL.into_iter().map(|tier| (tier, f(mode, tier))).collect();
                (mode, row)
            })
            .collect();
        Self { rows }
    }

    /// Replace a single target, keeping the rest.
    pub fn with_target(mut self, mode: Mode, tier: Tier, target: u32) -> Self {
        self.rows.entry(mode).or_default().insert(tier, target);
        self
    }

    /// Target replica count for `tier` under `mode`.
    pub fn target(&self, mode: Mode, tier: Tier) -> u32 {
        // Complete by construction.
        self.rows[&mode][&tier]
    }

    /// The tier targets of one mode, in tier order.
    pub fn row(&self, mode: Mode) -> impl Iterator<Item = (Tier, u32)> + '_ {
        self.rows[&mode].iter().map(|(tier, target)| (*tier, *target))
    }
}

impl Default for FactorMatrix {
    fn default() -> Self {
        Self::from_fn(|mode, _| match mode {
            Mode::Green => 10,
            Mode::Yellow => 8,
            Mode::Red => 3,
        })
    }
}

impl TryFrom<RawFactorMatrix> for FactorMatrix {
    type Error = PolicyError;

    fn try_from(raw: RawFactorMatrix) -> Result<Self, Self::Error> {
        let mut rows: BTreeMap<Mode, BTreeMap<Tier, u32>> = BTreeMap::new();

        for (mode_name, raw_row) in raw {
            let mode: Mode = mode_name
                .parse()
                .map_err(|_| PolicyError::InvalidMatrix(format!("unknown mode {mode_name:?}")))?;

            let mut row = BTreeMap::new();
            for (tier_name, target) in raw_row {
                let tier: Tier = tier_name.parse().map_err(|_| {
                    PolicyError::InvalidMatrix(format!("unknown tier {tier_name:?} in {mode}"))
                })?;
                let target = u32::try_from(target).map_err(|_| {
                    PolicyError::InvalidMatrix(format!(
                        "target for {mode}/{tier} must be a non-negative integer, got {target}"
                    ))
                })?;
                if row.insert(tier, target).is_some() {
                    return Err(PolicyError::InvalidMatrix(format!(
                        "tier {tier} given twice in {mode}"
                    )));
                }
            }

            if rows.insert(mode, row).is_some() {
                return Err(PolicyError::InvalidMatrix(format!("mode {mode} given twice")));
            }
        }

        for mode in Mode::ALL {
            let row = rows
                .get(&mode)
                .ok_or_else(|| PolicyError::InvalidMatrix(format!("missing mode {mode}")))?;
            if let Some(tier) = Tier::ALL.into_iter().find(|t| !row.contains_key(t)) {
                return Err(PolicyError::InvalidMatrix(format!(
                    "missing target for {mode}/{tier}"
                )));
            }
        }

        Ok(Self { rows })
    }
}

impl From<FactorMatrix> for RawFactorMatrix {
    fn from(matrix: FactorMatrix) -> Self {
        matrix
            .rows
            .into_iter()
            .map(|(mode, row)| {
                let row = row
                    .into_iter()
                    .map(|(tier, target)| (tier.to_string(), i64::from(target)))
                    .collect();
                (mode.to_string(), row)
            })
            .collect()
    }
}

// ── Policy ────────────────────────────────────────────────────────

/// The operator's declared intent: active mode plus the full matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub mode: Mode,
    pub factor_matrix: FactorMatrix,
}

impl Policy {
    pub fn new(mode: Mode, factor_matrix: FactorMatrix) -> Self {
        Self {
            mode,
            factor_matrix,
        }
    }

    /// Target replica count for `tier` under the active mode.
    pub fn target(&self, tier: Tier) -> u32 {
        self.factor_matrix.target(self.mode, tier)
    }

    /// Tier targets of the active mode.
    pub fn active_targets(&self) -> Vec<(Tier, u32)> {
        self.factor_matrix.row(self.mode).collect()
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new(Mode::Green, FactorMatrix::default())
    }
}

/// A validated change to apply atomically to the policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyUpdate {
    pub mode: Option<Mode>,
    pub factor_matrix: Option<FactorMatrix>,
}

impl PolicyUpdate {
    pub fn mode(mode: Mode) -> Self {
        Self {
            mode: Some(mode),
            factor_matrix: None,
        }
    }

    pub fn matrix(factor_matrix: FactorMatrix) -> Self {
        Self {
            mode: None,
            factor_matrix: Some(factor_matrix),
        }
    }

    pub fn with_matrix(mut self, factor_matrix: FactorMatrix) -> Self {
        self.factor_matrix = Some(factor_matrix);
        self
    }

    /// The policy that results from applying this update to `current`.
    pub fn apply_to(&self, current: &Policy) -> Policy {
        Policy {
            mode: self.mode.unwrap_or(current.mode),
            factor_matrix: self
                .factor_matrix
                .clone()
                .unwrap_or_else(|| current.factor_matrix.clone()),
        }
    }
}
