//! Embedder-side driver for the tally engine
//!
//! The engine itself is single-threaded; this wrapper supplies the
//! reader/writer discipline the embedder owes it. `handle_layer` takes the
//! exclusive guard, every query takes a shared guard, so concurrent
//! readers never observe a half-applied update. After each layer the
//! driver also garbage-collects state that fell out of the window behind
//! the frontier.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use strata_core::error::Result;
use strata_core::types::{Block, BlockId, LayerId};

use crate::config::TortoiseConfig;
use crate::opinion::Verdict;
use crate::pattern::VotingPattern;
use crate::tortoise::Tortoise;

/// Reconstruction state an embedder may persist.
///
/// Holds the frontier, the frontier's verdict table, and the membership of
/// every layer still inside the window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The verified frontier
    pub pbase: VotingPattern,
    /// The frontier's opinion on every block it derived
    pub verdicts: BTreeMap<BlockId, Verdict>,
    /// Layer membership from the window floor upward
    pub layer_blocks: BTreeMap<LayerId, Vec<BlockId>>,
}

/// Serializes layer updates and offers concurrent read access.
pub struct TallyDriver {
    engine: RwLock<Tortoise>,
}

impl TallyDriver {
    /// Create a driver around a freshly configured engine.
    pub fn new(config: TortoiseConfig) -> Result<Self> {
        Ok(Self {
            engine: RwLock::new(Tortoise::new(config)?),
        })
    }

    /// Feed one finalized layer through the engine, then drop state that
    /// fell out of the window behind the frontier. Returns the frontier
    /// layer after the update.
    pub fn handle_layer(&self, blocks: &[Block], layer: LayerId) -> Result<LayerId> {
        let mut engine = self.engine.write();
        let frontier = engine.update_tables(blocks, layer)?;

        let floor = frontier.saturating_sub(u64::from(engine.config().window));
        if floor > LayerId::GENESIS {
            debug!(%floor, "collecting layers behind the window");
            engine.prune_below(floor);
        }
        Ok(frontier)
    }

    /// The global opinion of `pattern` about `block`, if derived.
    pub fn opinion(&self, pattern: VotingPattern, block: BlockId) -> Option<Verdict> {
        self.engine.read().opinion(pattern, block)
    }

    /// The current verified frontier.
    pub fn pbase(&self) -> VotingPattern {
        self.engine.read().pbase()
    }

    /// Capture reconstruction state for external persistence.
    pub fn snapshot(&self) -> Snapshot {
        let engine = self.engine.read();
        let pbase = engine.pbase();
        let floor = pbase.layer.saturating_sub(u64::from(engine.config().window));
        Snapshot {
            pbase,
            verdicts: engine.verdict_table(pbase),
            layer_blocks: engine.layers_from(floor),
        }
    }
}
