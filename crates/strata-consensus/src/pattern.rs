//! Voting pattern identity
//!
//! A pattern is a set of blocks, all in one layer, that some block voted
//! for. Patterns are content-addressed: the identity is the FNV-1a hash of
//! the sorted member ids, paired with the layer. Hash collisions are
//! tolerated because the layer is part of equality, confining any collision
//! to a single layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use strata_core::types::{BlockId, LayerId};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Content hash of a pattern's member set
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PatternId(u32);

impl PatternId {
    /// Create a PatternId from a raw digest
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw digest
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Hash a member list. The same ids in any order yield the same id.
    pub fn of(ids: &[BlockId]) -> Self {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        Self::fold_sorted(&sorted)
    }

    /// FNV-1a over the big-endian low 32 bits of each id, in sorted order.
    fn fold_sorted(ids: &[BlockId]) -> Self {
        let mut hash = FNV_OFFSET_BASIS;
        for id in ids {
            for byte in (id.as_u64() as u32).to_be_bytes() {
                hash ^= u32::from(byte);
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        }
        Self(hash)
    }
}

impl fmt::Debug for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PatternId({:#010x})", self.0)
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A voting pattern: a layer plus the hash of its member set
///
/// Two patterns are equal iff both the layer and the hash are. A pattern is
/// never mutated after its id is computed; a pattern with different members
/// is a different pattern.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VotingPattern {
    /// Layer the member blocks live in
    pub layer: LayerId,
    /// Hash of the sorted member ids
    pub id: PatternId,
}

impl VotingPattern {
    /// The frontier before any layer has settled
    pub const SENTINEL: VotingPattern = VotingPattern {
        layer: LayerId::GENESIS,
        id: PatternId::new(0),
    };

    /// Canonicalize `members` in place (sorted, unique) and derive the
    /// pattern identity over them.
    pub fn of(layer: LayerId, members: &mut Vec<BlockId>) -> Self {
        members.sort_unstable();
        members.dedup();
        Self {
            layer,
            id: PatternId::fold_sorted(members),
        }
    }
}

impl fmt::Debug for VotingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VotingPattern({}, {})", self.layer, self.id)
    }
}

impl fmt::Display for VotingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.layer, self.id)
    }
}
