//! Bounded traversal over block view edges

use hashbrown::{HashMap, HashSet};
use std::collections::VecDeque;

use strata_core::error::{Result, StrataError};
use strata_core::types::{BlockId, LayerId};

use crate::tortoise::MeshBlock;

/// Breadth-first walk of the view spanned by `seeds`, calling `visit` on
/// every reachable block exactly once.
///
/// The walk only descends into a block's view edges while the current
/// block's layer is strictly greater than `cutoff`; blocks at or below the
/// cutoff are visited but not expanded, which bounds the work to the part
/// of the mesh above the cutoff. Returns how many blocks were visited per
/// layer.
///
/// An edge to an unknown block is a precondition failure and aborts the
/// walk with `MissingAncestor`.
pub(crate) fn for_block_in_view<F>(
    blocks: &HashMap<BlockId, MeshBlock>,
    seeds: &[BlockId],
    cutoff: LayerId,
    mut visit: F,
) -> Result<HashMap<LayerId, usize>>
where
    F: FnMut(&MeshBlock),
{
    let mut seen: HashSet<BlockId> = HashSet::with_capacity(seeds.len());
    let mut queue: VecDeque<BlockId> = VecDeque::with_capacity(seeds.len());
    for &seed in seeds {
        if seen.insert(seed) {
            queue.push_back(seed);
        }
    }

    let mut layer_counter: HashMap<LayerId, usize> = HashMap::new();
    while let Some(id) = queue.pop_front() {
        let block = blocks.get(&id).ok_or(StrataError::MissingAncestor(id))?;
        *layer_counter.entry(block.layer).or_insert(0) += 1;
        visit(block);

        if block.layer > cutoff {
            for &child in &block.view_edges {
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }
    }

    Ok(layer_counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn make_block(id: u64, layer: u64, view: &[u64]) -> MeshBlock {
        MeshBlock {
            id: BlockId::new(id),
            layer: LayerId::new(layer),
            view_edges: view.iter().copied().map(BlockId::new).collect(),
            votes: BTreeMap::new(),
        }
    }

    fn make_mesh(blocks: Vec<MeshBlock>) -> HashMap<BlockId, MeshBlock> {
        blocks.into_iter().map(|b| (b.id, b)).collect()
    }

    #[test]
    fn test_visits_each_block_once() {
        // diamond: 3 -> {1, 2} -> 0
        let mesh = make_mesh(vec![
            make_block(0, 0, &[]),
            make_block(1, 1, &[0]),
            make_block(2, 1, &[0]),
            make_block(3, 2, &[1, 2]),
        ]);

        let mut visited = Vec::new();
        let counter = for_block_in_view(&mesh, &[BlockId::new(3)], LayerId::GENESIS, |b| {
            visited.push(b.id)
        })
        .unwrap();

        assert_eq!(visited.len(), 4);
        let unique: HashSet<BlockId> = visited.iter().copied().collect();
        assert_eq!(unique.len(), 4);
        assert_eq!(counter.get(&LayerId::new(2)), Some(&1));
        assert_eq!(counter.get(&LayerId::new(1)), Some(&2));
        assert_eq!(counter.get(&LayerId::GENESIS), Some(&1));
    }

    #[test]
    fn test_cutoff_stops_descent() {
        let mesh = make_mesh(vec![
            make_block(0, 0, &[]),
            make_block(1, 1, &[0]),
            make_block(2, 2, &[1]),
            make_block(3, 3, &[2]),
        ]);

        // blocks at layer <= 2 are visited but not expanded
        let counter = for_block_in_view(&mesh, &[BlockId::new(3)], LayerId::new(2), |_| {}).unwrap();

        assert_eq!(counter.get(&LayerId::new(3)), Some(&1));
        assert_eq!(counter.get(&LayerId::new(2)), Some(&1));
        assert_eq!(counter.get(&LayerId::new(1)), None);
        assert_eq!(counter.get(&LayerId::GENESIS), None);
    }

    #[test]
    fn test_duplicate_seeds_collapse() {
        let mesh = make_mesh(vec![make_block(7, 1, &[])]);
        let seeds = [BlockId::new(7), BlockId::new(7)];

        let counter = for_block_in_view(&mesh, &seeds, LayerId::GENESIS, |_| {}).unwrap();
        assert_eq!(counter.get(&LayerId::new(1)), Some(&1));
    }

    #[test]
    fn test_unknown_edge_is_an_error() {
        let mesh = make_mesh(vec![make_block(1, 1, &[99])]);

        let err = for_block_in_view(&mesh, &[BlockId::new(1)], LayerId::GENESIS, |_| {})
            .unwrap_err();
        assert_eq!(err, StrataError::MissingAncestor(BlockId::new(99)));
    }
}
