//! Engine configuration

use serde::{Deserialize, Serialize};
use strata_core::error::{Result, StrataError};
use strata_core::types::constants;

/// Replacement rule when a second pattern crosses the good threshold in a
/// layer that already has a good pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    /// Replace only when the challenger has strictly more support
    Supersede,
    /// Always replace with the latest crossing pattern
    Overwrite,
}

/// Tally engine configuration
///
/// Immutable after construction. `validate` is called by the engine
/// constructor and rejects degenerate values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TortoiseConfig {
    /// Expected number of blocks per layer
    pub layer_size: u32,

    /// Maximum number of explicitly voted layers per block
    pub k: u8,

    /// Maximum look-back of the good-pattern scan, in layers
    pub window: u32,

    /// Local vote threshold (theta_l)
    pub local_threshold: u32,

    /// Global vote threshold (theta_g)
    pub global_threshold: u32,

    /// Good-pattern replacement rule
    pub tie_break: TieBreak,
}

impl Default for TortoiseConfig {
    fn default() -> Self {
        Self {
            layer_size: constants::DEFAULT_LAYER_SIZE,
            k: constants::DEFAULT_K,
            window: constants::DEFAULT_WINDOW,
            local_threshold: constants::DEFAULT_LOCAL_THRESHOLD,
            global_threshold: constants::DEFAULT_GLOBAL_THRESHOLD,
            tie_break: TieBreak::Supersede,
        }
    }
}

impl TortoiseConfig {
    /// Convenience constructor for the common case
    pub fn with_layer_size(layer_size: u32) -> Self {
        Self {
            layer_size,
            ..Self::default()
        }
    }

    /// Reject degenerate parameter values
    pub fn validate(&self) -> Result<()> {
        if self.layer_size == 0 {
            return Err(StrataError::InvalidConfig(
                "layer size must be at least 1".to_string(),
            ));
        }
        if self.local_threshold == 0 || self.global_threshold == 0 {
            return Err(StrataError::InvalidConfig(
                "vote thresholds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
