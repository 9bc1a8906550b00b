//! Learning configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningMode {
    /// Learn nothing; not even justifications.
    Off,
    /// Learn chunks in every goal.
    On,
    /// Learn chunks only in goals flagged with `force_learn`.
    Only,
    /// Learn chunks in every goal except those flagged with `dont_learn`.
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairPolicy {
    pub enabled: bool,
    /// Also repair justifications. Unrepaired justifications that fail
    /// validation are discarded.
    pub justifications: bool,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            justifications: false,
        }
    }
}

/// Configuration for the chunker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    pub learning: LearningMode,
    /// Only learn chunks from results of the bottom-most goal.
    pub bottom_only: bool,
    pub max_chunks_per_cycle: u64,
    /// Merge structurally equal grounds into one condition.
    pub merge_conditions: bool,
    /// Attach constraints seen during backtrace to the learned rule.
    pub attach_constraints: bool,
    /// When false, a negation that tests sub-goal structure makes the rule a
    /// justification.
    pub allow_local_negations: bool,
    /// Keep potentials that never got grounded (repair reconnects them).
    pub keep_ungrounded_potentials: bool,
    pub chunk_prefix: String,
    pub justification_prefix: String,
    pub repair: RepairPolicy,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            learning: LearningMode::On,
            bottom_only: false,
            max_chunks_per_cycle: 50,
            merge_conditions: true,
            attach_constraints: true,
            allow_local_negations: true,
            keep_ungrounded_potentials: true,
            chunk_prefix: "chunk".to_string(),
            justification_prefix: "justify".to_string(),
            repair: RepairPolicy::default(),
        }
    }
}

impl ChunkConfig {
    /// Parse a config from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
#[path = "tests/config.rs"]
mod tests;
