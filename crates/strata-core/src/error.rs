//! Error types for Strata core operations

use crate::types::{BlockId, LayerId};
use thiserror::Error;

/// Result type alias for Strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors that can occur while tallying layer votes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrataError {
    /// A view or vote edge targets a block that was never ingested
    #[error("missing ancestor block: {0}")]
    MissingAncestor(BlockId),

    /// The layer feed delivered a layer out of sequence
    #[error("layer out of order: got {got}, expected {expected}")]
    LayerOutOfOrder { got: LayerId, expected: LayerId },

    /// Rejected configuration at construction
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal bookkeeping invariant broken; indicates an engine bug
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl StrataError {
    /// True when the error indicates a caller-side precondition failure
    /// rather than an engine bug.
    pub fn is_precondition(&self) -> bool {
        !matches!(self, Self::InvariantViolation(_))
    }
}
