//! # Strata Consensus
//!
//! The layer-vote tallying engine of the Strata mesh.
//!
//! Blocks arrive one layer at a time, each carrying explicit votes on
//! blocks of earlier layers. The engine folds those votes into a running
//! tally and derives a three-valued global opinion (support / against /
//! abstain) on every block it has seen. When a voting pattern settles its
//! opinion on everything below it, the pattern becomes the new verified
//! frontier.
//!
//! ## Pipeline
//!
//! ```text
//!   layer feed ──► vote resolution ──► good-pattern scan
//!                                            │
//!   frontier ◄── completeness ◄── opinions ◄─┴─ tally propagation
//! ```
//!
//! - [`Opinion`] / [`Verdict`] - the vote algebra and its thresholded form
//! - [`VotingPattern`] - content-addressed identity of a voted block set
//! - [`Tortoise`] - the engine proper; single-threaded, one entry point
//! - [`TallyDriver`] - embedder-side locking, window GC and snapshots

pub mod config;
pub mod driver;
pub mod opinion;
pub mod pattern;
pub mod tortoise;

mod view;

pub use config::{TieBreak, TortoiseConfig};
pub use driver::{Snapshot, TallyDriver};
pub use opinion::{Opinion, Verdict};
pub use pattern::{PatternId, VotingPattern};
pub use tortoise::Tortoise;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{TieBreak, TortoiseConfig};
    pub use crate::driver::{Snapshot, TallyDriver};
    pub use crate::opinion::{Opinion, Verdict};
    pub use crate::pattern::{PatternId, VotingPattern};
    pub use crate::tortoise::Tortoise;
    pub use strata_core::prelude::*;
}
