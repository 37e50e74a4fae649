//! Core type definitions for the Strata layer mesh
//!
//! A Strata mesh is organized into discrete layers. Every block lives in
//! exactly one layer, references ancestor blocks in earlier layers through
//! its view edges, and endorses a small set of ancestors through its vote
//! edges.

use serde::{Deserialize, Serialize};
use std::fmt;

/// BlockId - unique 64-bit identifier of a block in the mesh
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct BlockId(u64);

impl BlockId {
    /// Create a BlockId from a raw 64-bit value
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for BlockId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// LayerId - a discrete time step of the mesh
///
/// All blocks in a layer are produced concurrently; the layer feed delivers
/// layers in strictly increasing order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct LayerId(u64);

impl LayerId {
    /// The genesis layer
    pub const GENESIS: Self = Self(0);

    /// Create a LayerId from a raw 64-bit value
    pub const fn new(layer: u64) -> Self {
        Self(layer)
    }

    /// Get the raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The layer directly above this one
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Move `n` layers down, stopping at genesis
    pub const fn saturating_sub(self, n: u64) -> Self {
        Self(self.0.saturating_sub(n))
    }

    /// Number of layers between `earlier` and this one (0 if not earlier)
    pub const fn delta_from(self, earlier: LayerId) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl From<u64> for LayerId {
    fn from(layer: u64) -> Self {
        Self(layer)
    }
}

impl fmt::Debug for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LayerId({})", self.0)
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A block as delivered by the layer feed
///
/// View edges reference ancestors in prior layers and span the part of the
/// mesh the block has seen. Vote edges name the ancestor blocks the block
/// endorses; they are grouped by target layer when the block is ingested.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Unique block identifier
    pub id: BlockId,

    /// Layer the block was produced in
    pub layer: LayerId,

    /// Ancestor references spanning the block's view
    pub view_edges: Vec<BlockId>,

    /// Endorsed ancestor blocks
    pub vote_edges: Vec<BlockId>,
}

impl Block {
    /// Create a new block
    pub fn new(id: BlockId, layer: LayerId, view_edges: Vec<BlockId>, vote_edges: Vec<BlockId>) -> Self {
        Self {
            id,
            layer,
            view_edges,
            vote_edges,
        }
    }

    /// Create a genesis block (no ancestors)
    pub fn genesis(id: BlockId) -> Self {
        Self::new(id, LayerId::GENESIS, Vec::new(), Vec::new())
    }
}

/// Protocol constants
pub mod constants {
    /// Maximum number of explicitly voted layers per block
    pub const DEFAULT_K: u8 = 5;

    /// Maximum look-back of the good-pattern scan, in layers
    pub const DEFAULT_WINDOW: u32 = 100;

    /// Local vote threshold (theta_l)
    pub const DEFAULT_LOCAL_THRESHOLD: u32 = 1;

    /// Global vote threshold (theta_g)
    pub const DEFAULT_GLOBAL_THRESHOLD: u32 = 1;

    /// Expected number of blocks per layer
    pub const DEFAULT_LAYER_SIZE: u32 = 200;
}
