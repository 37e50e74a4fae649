//! Layer-vote tallying engine
//!
//! The engine ingests one layer of blocks at a time and maintains a global
//! opinion on every block it has seen. Each update runs the same pipeline:
//!
//! 1. **Vote resolution** - group every new block's vote edges by target
//!    layer into voting patterns; the highest-layer pattern becomes the
//!    block's effective pattern.
//! 2. **Good-pattern detection** - count which pattern each new block backs
//!    per scanned layer (explicitly, or implicitly through its effective
//!    pattern); a pattern backed by a majority of the possible voters
//!    becomes the layer's good pattern.
//! 3. **Tally propagation** - for every good pattern in the updated range,
//!    seed its tally from the frontier, fold in the inherited tallies of
//!    intermediate good patterns, then add the direct votes cast inside its
//!    view.
//! 4. **Global opinion** - threshold the tallies into per-block verdicts;
//!    when every verdict under a pattern is decided the pattern is complete
//!    and the frontier advances to it.
//!
//! The engine is single-threaded and non-suspending; callers serialize
//! `update_tables` invocations, one per finalized layer.

use hashbrown::{HashMap, HashSet};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use strata_core::error::{Result, StrataError};
use strata_core::types::{Block, BlockId, LayerId};

use crate::config::{TieBreak, TortoiseConfig};
use crate::opinion::{Opinion, Verdict};
use crate::pattern::VotingPattern;
use crate::view::for_block_in_view;

/// A block after vote resolution: its explicit vote pattern per layer.
#[derive(Clone, Debug)]
pub(crate) struct MeshBlock {
    pub id: BlockId,
    pub layer: LayerId,
    pub view_edges: Vec<BlockId>,
    pub votes: BTreeMap<LayerId, VotingPattern>,
}

/// How a voter relates to a pattern of the layer it is voting on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VoteKind {
    /// Explicitly endorses the exact pattern the block belongs to
    ExplicitFor,
    /// Explicitly endorses a different pattern in the same layer
    ExplicitAgainst,
    /// No explicit vote on the layer; the stance is inherited
    Implicit,
}

impl VoteKind {
    fn contribution(self) -> Opinion {
        match self {
            VoteKind::ExplicitFor => Opinion::SUPPORT,
            VoteKind::ExplicitAgainst => Opinion::AGAINST,
            VoteKind::Implicit => Opinion::ABSTAIN,
        }
    }
}

/// Classify `voter`'s stance on `target` (a block of `target_layer`).
fn vote_kind(
    voter: &MeshBlock,
    target: BlockId,
    target_layer: LayerId,
    members: &HashMap<VotingPattern, Vec<BlockId>>,
) -> VoteKind {
    match voter.votes.get(&target_layer) {
        Some(endorsed) => match members.get(endorsed) {
            Some(ids) if ids.binary_search(&target).is_ok() => VoteKind::ExplicitFor,
            _ => VoteKind::ExplicitAgainst,
        },
        None => VoteKind::Implicit,
    }
}

/// The layer-vote tallying engine.
///
/// All state lives in this struct; there are no globals. Construction
/// validates the configuration, `update_tables` is the single mutation
/// entry point, and the remaining methods are read-only queries.
pub struct Tortoise {
    config: TortoiseConfig,

    /// The verified frontier: the latest complete pattern
    pbase: VotingPattern,

    /// Layer the feed must deliver next
    next_layer: LayerId,

    blocks: HashMap<BlockId, MeshBlock>,
    layer_blocks: BTreeMap<LayerId, Vec<BlockId>>,

    /// Highest-layer pattern each block explicitly votes on
    effective: HashMap<BlockId, VotingPattern>,
    /// Inverse of `effective`
    effective_blocks: HashMap<VotingPattern, Vec<BlockId>>,
    /// Per layer, which pattern each voter endorses there
    explicit: HashMap<LayerId, HashMap<BlockId, VotingPattern>>,

    /// Member blocks of each pattern, sorted and unique
    members: HashMap<VotingPattern, Vec<BlockId>>,
    /// Number of blocks known to back each pattern
    support: HashMap<VotingPattern, u64>,
    /// The good pattern chosen per layer
    good: BTreeMap<LayerId, VotingPattern>,

    /// Cumulative opinion of a pattern about each block
    tally: HashMap<VotingPattern, HashMap<BlockId, Opinion>>,
    /// Derived global opinion of a pattern about each block
    verdicts: HashMap<VotingPattern, HashMap<BlockId, Verdict>>,
    /// Per pattern, the pattern of each fully-resolved layer it supports
    pattern_support: HashMap<VotingPattern, BTreeMap<LayerId, VotingPattern>>,
    /// Correction vectors applied when re-basing tallies
    correction: HashMap<BlockId, HashMap<VotingPattern, Opinion>>,
    /// Patterns whose opinion is decided on every block they derived
    complete: HashSet<VotingPattern>,
}

impl Tortoise {
    /// Create an engine with the given configuration.
    pub fn new(config: TortoiseConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pbase: VotingPattern::SENTINEL,
            next_layer: LayerId::GENESIS,
            blocks: HashMap::new(),
            layer_blocks: BTreeMap::new(),
            effective: HashMap::new(),
            effective_blocks: HashMap::new(),
            explicit: HashMap::new(),
            members: HashMap::new(),
            support: HashMap::new(),
            good: BTreeMap::new(),
            tally: HashMap::new(),
            verdicts: HashMap::new(),
            pattern_support: HashMap::new(),
            correction: HashMap::new(),
            complete: HashSet::new(),
        })
    }

    /// Ingest one finalized layer and re-tally.
    ///
    /// Returns the layer of the frontier after the update. Preconditions
    /// (layer ordering, known ancestors) are checked before the first
    /// mutation, so a failed call leaves the engine untouched.
    pub fn update_tables(&mut self, blocks: &[Block], layer: LayerId) -> Result<LayerId> {
        debug!(%layer, blocks = blocks.len(), "updating tally tables");
        self.check_layer(blocks, layer)?;

        for block in blocks {
            self.process_block(block)?;
            self.layer_blocks.entry(layer).or_default().push(block.id);
        }
        self.next_layer = layer.next();

        if layer == LayerId::GENESIS {
            debug!("genesis layer ingested");
            return Ok(self.pbase.layer);
        }

        let min_good = self.find_minimal_good_layer(layer, blocks);
        self.propagate_tallies(min_good, layer)?;

        Ok(self.pbase.layer)
    }

    /// The global opinion of `pattern` about `block`, if derived.
    pub fn opinion(&self, pattern: VotingPattern, block: BlockId) -> Option<Verdict> {
        self.verdicts.get(&pattern)?.get(&block).copied()
    }

    /// The current verified frontier.
    pub fn pbase(&self) -> VotingPattern {
        self.pbase
    }

    /// The good pattern recorded for a layer, if any.
    pub fn good_pattern(&self, layer: LayerId) -> Option<VotingPattern> {
        self.good.get(&layer).copied()
    }

    /// Whether `pattern` has settled its opinion on every block it derived.
    pub fn is_complete(&self, pattern: VotingPattern) -> bool {
        self.complete.contains(&pattern)
    }

    /// Number of blocks known to back `pattern`.
    pub fn support(&self, pattern: VotingPattern) -> u64 {
        self.support.get(&pattern).copied().unwrap_or(0)
    }

    /// Number of blocks currently held.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the block is currently held.
    pub fn contains_block(&self, block: BlockId) -> bool {
        self.blocks.contains_key(&block)
    }

    /// The engine configuration.
    pub fn config(&self) -> &TortoiseConfig {
        &self.config
    }

    /// All verdicts derived by `pattern`, in block order.
    pub fn verdict_table(&self, pattern: VotingPattern) -> BTreeMap<BlockId, Verdict> {
        self.verdicts
            .get(&pattern)
            .map(|table| table.iter().map(|(&b, &v)| (b, v)).collect())
            .unwrap_or_default()
    }

    /// Layer membership from `from` upward, in layer order.
    pub fn layers_from(&self, from: LayerId) -> BTreeMap<LayerId, Vec<BlockId>> {
        self.layer_blocks
            .range(from..)
            .map(|(&l, ids)| (l, ids.clone()))
            .collect()
    }

    /// Drop all state for layers strictly below `floor`.
    ///
    /// Surviving blocks lose their edges into the dropped region, so later
    /// traversals never dangle. The embedder calls this with a floor no
    /// higher than the frontier minus the window.
    pub fn prune_below(&mut self, floor: LayerId) {
        let keep = self.layer_blocks.split_off(&floor);
        let dropped = std::mem::replace(&mut self.layer_blocks, keep);
        if dropped.is_empty() {
            return;
        }

        let mut dropped_ids: HashSet<BlockId> = HashSet::new();
        for (layer, ids) in dropped {
            self.explicit.remove(&layer);
            self.good.remove(&layer);
            for id in ids {
                self.blocks.remove(&id);
                self.correction.remove(&id);
                if let Some(eff) = self.effective.remove(&id) {
                    if let Some(backers) = self.effective_blocks.get_mut(&eff) {
                        backers.retain(|b| *b != id);
                    }
                }
                dropped_ids.insert(id);
            }
        }

        for block in self.blocks.values_mut() {
            block.view_edges.retain(|id| !dropped_ids.contains(id));
            block.votes.retain(|l, _| *l >= floor);
        }
        for table in self.explicit.values_mut() {
            table.retain(|id, _| !dropped_ids.contains(id));
        }

        self.members.retain(|p, _| p.layer >= floor);
        self.support.retain(|p, _| p.layer >= floor);
        self.effective_blocks.retain(|p, _| p.layer >= floor);
        self.pattern_support.retain(|p, _| p.layer >= floor);
        self.complete.retain(|p| p.layer >= floor);
        self.tally.retain(|p, _| p.layer >= floor);
        self.verdicts.retain(|p, _| p.layer >= floor);
        for table in self.tally.values_mut() {
            table.retain(|id, _| !dropped_ids.contains(id));
        }
        for table in self.verdicts.values_mut() {
            table.retain(|id, _| !dropped_ids.contains(id));
        }
        for table in self.correction.values_mut() {
            table.retain(|p, _| p.layer >= floor);
        }
        for table in self.pattern_support.values_mut() {
            table.retain(|l, _| *l >= floor);
        }

        debug!(%floor, remaining = self.blocks.len(), "pruned stale layers");
    }

    // === update pipeline ===

    /// Validate the whole batch before the first mutation.
    fn check_layer(&self, blocks: &[Block], layer: LayerId) -> Result<()> {
        if layer != self.next_layer {
            return Err(StrataError::LayerOutOfOrder {
                got: layer,
                expected: self.next_layer,
            });
        }
        let mut batch: HashSet<BlockId> = HashSet::with_capacity(blocks.len());
        for block in blocks {
            if block.layer != layer {
                return Err(StrataError::LayerOutOfOrder {
                    got: block.layer,
                    expected: layer,
                });
            }
            if self.blocks.contains_key(&block.id) || !batch.insert(block.id) {
                return Err(StrataError::InvariantViolation(format!(
                    "block {} inserted twice",
                    block.id
                )));
            }
            for &edge in block.view_edges.iter().chain(block.vote_edges.iter()) {
                if !self.blocks.contains_key(&edge) {
                    warn!(block = %block.id, ancestor = %edge, "edge to unknown ancestor");
                    return Err(StrataError::MissingAncestor(edge));
                }
            }
        }
        Ok(())
    }

    /// Resolve a block's explicit votes into per-layer patterns.
    fn process_block(&mut self, block: &Block) -> Result<()> {
        let mut groups: BTreeMap<LayerId, Vec<BlockId>> = BTreeMap::new();
        for &target in &block.vote_edges {
            let target_layer = self
                .blocks
                .get(&target)
                .map(|b| b.layer)
                .ok_or(StrataError::MissingAncestor(target))?;
            groups.entry(target_layer).or_default().push(target);
        }
        if groups.len() > usize::from(self.config.k) {
            warn!(block = %block.id, layers = groups.len(), "block votes on more layers than configured");
        }

        let mut mesh_block = MeshBlock {
            id: block.id,
            layer: block.layer,
            view_edges: block.view_edges.clone(),
            votes: BTreeMap::new(),
        };
        let mut effective: Option<VotingPattern> = None;
        for (target_layer, mut ids) in groups {
            let pattern = VotingPattern::of(target_layer, &mut ids);
            self.members.entry(pattern).or_insert(ids);
            self.explicit
                .entry(target_layer)
                .or_default()
                .insert(block.id, pattern);
            mesh_block.votes.insert(target_layer, pattern);
            // highest layer wins, higher pattern id breaks ties
            effective = match effective {
                Some(current) if current > pattern => Some(current),
                _ => Some(pattern),
            };
        }
        if let Some(effective) = effective {
            self.effective.insert(block.id, effective);
            self.effective_blocks
                .entry(effective)
                .or_default()
                .push(block.id);
        }
        debug!(block = %block.id, votes = mesh_block.votes.len(), "block ingested");
        self.blocks.insert(block.id, mesh_block);
        Ok(())
    }

    /// Count the new blocks' backing per scanned layer and mark layers
    /// whose good pattern is new or re-confirmed. Returns the minimal such
    /// layer (or `current` when nothing changed).
    fn find_minimal_good_layer(&mut self, current: LayerId, fresh: &[Block]) -> LayerId {
        let start = LayerId::new(
            (self.pbase.layer.as_u64() + 1)
                .max(current.as_u64().saturating_sub(u64::from(self.config.window))),
        );
        let mut min_good = current;

        let mut scanned = start;
        while scanned < current {
            let mut updated: BTreeSet<VotingPattern> = BTreeSet::new();
            for block in fresh {
                let backed = self
                    .blocks
                    .get(&block.id)
                    .and_then(|b| b.votes.get(&scanned).copied())
                    .or_else(|| {
                        // implicit: whatever the block's effective pattern
                        // supports in this layer
                        self.effective
                            .get(&block.id)
                            .and_then(|eff| self.pattern_support.get(eff))
                            .and_then(|layers| layers.get(&scanned).copied())
                    });
                if let Some(pattern) = backed {
                    *self.support.entry(pattern).or_insert(0) += 1;
                    updated.insert(pattern);
                }
            }

            for pattern in updated {
                let backing = self.support.get(&pattern).copied().unwrap_or(0);
                // majority of the blocks that could have voted since the
                // pattern's layer
                let possible = u64::from(self.config.layer_size) * current.delta_from(pattern.layer);
                if 2 * backing <= possible {
                    continue;
                }
                let replace = match self.good.get(&scanned) {
                    None => true,
                    Some(current_good) if *current_good == pattern => true,
                    Some(current_good) => match self.config.tie_break {
                        TieBreak::Overwrite => true,
                        TieBreak::Supersede => {
                            backing > self.support.get(current_good).copied().unwrap_or(0)
                        }
                    },
                };
                if replace {
                    debug!(layer = %scanned, %pattern, backing, "good pattern recorded");
                    self.good.insert(scanned, pattern);
                    if scanned < min_good {
                        min_good = scanned;
                    }
                }
            }
            scanned = scanned.next();
        }

        debug!(layer = %min_good, "minimal good layer");
        min_good
    }

    /// Re-tally every good pattern in `[from, current)`, advancing the
    /// frontier whenever a pattern completes.
    fn propagate_tallies(&mut self, from: LayerId, current: LayerId) -> Result<()> {
        let mut layer = from;
        while layer < current {
            if let Some(pattern) = self.good.get(&layer).copied() {
                self.tally_pattern(pattern)?;
            }
            layer = layer.next();
        }
        Ok(())
    }

    /// Run the full tally pipeline for one good pattern.
    fn tally_pattern(&mut self, pattern: VotingPattern) -> Result<()> {
        debug!(%pattern, frontier = %self.pbase, "tallying pattern");

        // seed from the frontier's tally, point-wise
        let seed: Vec<(BlockId, Opinion)> = self
            .tally
            .get(&self.pbase)
            .map(|table| table.iter().map(|(&b, &v)| (b, v)).collect())
            .unwrap_or_default();
        let table = self.tally.entry(pattern).or_default();
        for (block, value) in seed {
            table.insert(block, value);
        }

        // fold in every intermediate good pattern's decided votes
        let mut layer = self.pbase.layer;
        while layer < pattern.layer {
            if let Some(inherited) = self.good.get(&layer).copied() {
                self.update_pattern_tally(inherited, pattern)?;
            }
            layer = layer.next();
        }

        // direct votes cast inside the pattern's view
        let layer_counter = self.add_pattern_votes(pattern)?;

        self.derive_opinions(pattern, &layer_counter)
    }

    /// Fold `inherited`'s decided votes into `pattern`'s tally.
    ///
    /// Every block in `pattern`'s view whose effective pattern is
    /// `inherited` votes implicitly as `inherited` does, so the inherited
    /// verdicts are scaled by the number of such blocks; the correction
    /// vectors accumulated for those blocks re-base the contribution.
    fn update_pattern_tally(
        &mut self,
        inherited: VotingPattern,
        pattern: VotingPattern,
    ) -> Result<()> {
        let seeds = self.members.get(&pattern).cloned().unwrap_or_default();
        let mut corrections = Opinion::ABSTAIN;
        let mut backer_count: i64 = 0;
        {
            let effective = &self.effective;
            let correction = &self.correction;
            for_block_in_view(&self.blocks, &seeds, inherited.layer, |block| {
                if effective.get(&block.id) == Some(&inherited) {
                    backer_count += 1;
                    corrections = corrections
                        + correction
                            .get(&block.id)
                            .and_then(|c| c.get(&inherited).copied())
                            .unwrap_or(Opinion::ABSTAIN);
                }
            })?;
        }
        if backer_count == 0 {
            return Ok(());
        }
        debug!(%inherited, %pattern, backer_count, "folding inherited tally");

        let mut updates: Vec<(BlockId, Opinion)> = Vec::new();
        let mut layer = self.pbase.layer;
        while layer <= inherited.layer {
            if let Some(ids) = self.layer_blocks.get(&layer) {
                for &block in ids {
                    if let Some(verdict) = self.verdicts.get(&inherited).and_then(|t| t.get(&block))
                    {
                        let delta = verdict.as_opinion() * backer_count + corrections;
                        if delta != Opinion::ABSTAIN {
                            updates.push((block, delta));
                        }
                    }
                }
            }
            layer = layer.next();
        }

        let table = self.tally.entry(pattern).or_default();
        for (block, delta) in updates {
            let current = table.get(&block).copied().unwrap_or(Opinion::ABSTAIN);
            table.insert(block, current + delta);
        }
        Ok(())
    }

    /// Walk `pattern`'s view and add every explicit vote found there to its
    /// tally. Returns the per-layer view counters.
    fn add_pattern_votes(&mut self, pattern: VotingPattern) -> Result<HashMap<LayerId, usize>> {
        let seeds = self.members.get(&pattern).cloned().unwrap_or_default();
        let frontier_layer = self.pbase.layer;
        let mut contributions: Vec<(BlockId, Opinion)> = Vec::new();
        let layer_counter = {
            let members = &self.members;
            let layer_blocks = &self.layer_blocks;
            for_block_in_view(&self.blocks, &seeds, frontier_layer, |voter| {
                for &voted_layer in voter.votes.keys() {
                    if voted_layer < frontier_layer {
                        continue;
                    }
                    let Some(ids) = layer_blocks.get(&voted_layer) else {
                        continue;
                    };
                    for &target in ids {
                        let stance = vote_kind(voter, target, voted_layer, members).contribution();
                        if stance != Opinion::ABSTAIN {
                            contributions.push((target, stance));
                        }
                    }
                }
            })?
        };

        let table = self.tally.entry(pattern).or_default();
        for (block, stance) in contributions {
            let current = table.get(&block).copied().unwrap_or(Opinion::ABSTAIN);
            table.insert(block, current + stance);
        }
        Ok(layer_counter)
    }

    /// Threshold `pattern`'s tally into verdicts for every block between
    /// the frontier and the pattern's own layer, record which layers fully
    /// resolved, refresh correction vectors, and advance the frontier when
    /// the pattern is complete.
    fn derive_opinions(
        &mut self,
        pattern: VotingPattern,
        layer_counter: &HashMap<LayerId, usize>,
    ) -> Result<()> {
        let pattern_members = self.members.get(&pattern).cloned().unwrap_or_default();
        let mut all_decided = true;

        let mut layer = self.pbase.layer;
        while layer <= pattern.layer {
            let Some(ids) = self.layer_blocks.get(&layer).cloned() else {
                layer = layer.next();
                continue;
            };
            let mut layer_decided = true;
            let mut supported: Vec<BlockId> = Vec::new();
            for &block in &ids {
                let table = self.tally.entry(pattern).or_default();
                if !table.contains_key(&block) {
                    // out of the pattern's view: one against per view block
                    // between here and the pattern's layer
                    table.insert(block, sum_nodes_in_view(layer_counter, layer, pattern.layer));
                }

                let verdict = if layer == pattern.layer {
                    // a pattern is its own vote for its layer
                    if pattern_members.binary_search(&block).is_ok() {
                        Verdict::Support
                    } else {
                        Verdict::Against
                    }
                } else {
                    let tally = self
                        .tally
                        .get(&pattern)
                        .and_then(|t| t.get(&block))
                        .copied()
                        .ok_or_else(|| {
                            StrataError::InvariantViolation(format!(
                                "tally missing for block {block} under {pattern}"
                            ))
                        })?;
                    let delta = pattern.layer.delta_from(layer) as i64;
                    let threshold =
                        i64::from(self.config.global_threshold) * delta * i64::from(self.config.layer_size);
                    tally.verdict(threshold)
                };

                self.verdicts.entry(pattern).or_default().insert(block, verdict);
                match verdict {
                    Verdict::Support => supported.push(block),
                    Verdict::Against => {}
                    Verdict::Abstain => layer_decided = false,
                }
            }

            if layer_decided {
                let resolved = VotingPattern::of(layer, &mut supported);
                self.members.entry(resolved).or_insert(supported);
                self.pattern_support
                    .entry(pattern)
                    .or_default()
                    .insert(layer, resolved);
            } else {
                all_decided = false;
            }
            layer = layer.next();
        }

        self.update_correction_vectors(pattern);

        if all_decided && !self.complete.contains(&pattern) {
            if pattern.layer < self.pbase.layer {
                return Err(StrataError::InvariantViolation(format!(
                    "complete pattern {pattern} behind frontier {}",
                    self.pbase
                )));
            }
            info!(%pattern, layer = %pattern.layer, "pattern complete, frontier advanced");
            self.complete.insert(pattern);
            self.pbase = pattern;
        }
        Ok(())
    }

    /// Refresh the correction vectors of `pattern`'s members from its
    /// freshly derived verdicts.
    fn update_correction_vectors(&mut self, pattern: VotingPattern) {
        let has_explicit_backer = self
            .effective_blocks
            .get(&pattern)
            .into_iter()
            .flatten()
            .any(|backer| {
                self.explicit
                    .get(&pattern.layer)
                    .is_some_and(|t| t.contains_key(backer))
            });
        if !has_explicit_backer {
            return;
        }
        let members = self.members.get(&pattern).cloned().unwrap_or_default();
        for member in members {
            let verdict = self
                .verdicts
                .get(&pattern)
                .and_then(|t| t.get(&member))
                .copied()
                .unwrap_or(Verdict::Abstain);
            self.correction
                .entry(member)
                .or_default()
                .insert(pattern, -verdict.as_opinion());
        }
    }
}

/// Against, once per block of the view in `[from, to)`.
///
/// Callers must enter with `from <= to`.
fn sum_nodes_in_view(
    layer_counter: &HashMap<LayerId, usize>,
    from: LayerId,
    to: LayerId,
) -> Opinion {
    let mut sum: i64 = 0;
    let mut layer = from;
    while layer < to {
        sum += layer_counter.get(&layer).copied().unwrap_or(0) as i64;
        layer = layer.next();
    }
    Opinion::AGAINST * sum
}
