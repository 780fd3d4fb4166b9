//! Bottom-up AABB refit.
//!
//! Every leaf walks towards the root. Each internal node counts arrivals: the
//! first child to arrive stops, the second sees both children finished, writes
//! the union box and keeps climbing. The walk that runs out of parents has
//! found the root. The serial path uses plain increments, the parallel path an
//! atomic fetch-add per node.

use parking_lot::Mutex;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};

use super::lbvh::MortonLeaf;
use super::node::BvhNode;
use crate::util::{Aabb, INVALID_INDEX};

/// Result of a refit pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefitStats {
    /// Root discovered by the walks.
    pub root: u32,
    /// Edges on the longest root-to-leaf path.
    pub height: u32,
}

/// Serial refit over local node and leaf indices.
///
/// # Panics
/// If a leaf has no parent, two walks disagree on the root, or some node was
/// not reached by both children.
#[tracing::instrument(skip_all, fields(node_count = nodes.len(), leaf_count = leaves.len()))]
pub fn refit<L: MortonLeaf>(nodes: &mut [BvhNode], leaves: &[L]) -> RefitStats {
    for node in nodes.iter_mut() {
        node.visit_count = 0;
        node.aabb = Aabb::EMPTY;
    }
    let mut heights = vec![0u32; nodes.len()];
    let mut root = INVALID_INDEX;

    for (leaf_index, leaf) in leaves.iter().enumerate() {
        let mut current = leaf_parent(leaf_index, leaf, nodes.len());
        loop {
            let node = &mut nodes[current as usize];
            node.visit_count += 1;
            if node.visit_count == 1 {
                break;
            }

            let node = nodes[current as usize];
            let (left, left_h) = child_bounds(node.left, node.left_is_leaf, leaves, |i| {
                (nodes[i].aabb, heights[i])
            });
            let (right, right_h) = child_bounds(node.right, node.right_is_leaf, leaves, |i| {
                (nodes[i].aabb, heights[i])
            });
            nodes[current as usize].aabb = left.union(&right);
            heights[current as usize] = 1 + left_h.max(right_h);

            if node.is_root() {
                record_root(&mut root, current);
                break;
            }
            current = node.parent;
        }
    }

    finish(nodes, root, &heights)
}

/// Parallel refit, one rayon task per leaf.
///
/// Same contract and output as [`refit`]; boxes may differ only in
/// floating-point reduction order, which for min/max unions means not at all.
#[tracing::instrument(skip_all, fields(node_count = nodes.len(), leaf_count = leaves.len()))]
pub fn refit_parallel<L: MortonLeaf>(nodes: &mut [BvhNode], leaves: &[L]) -> RefitStats {
    let counters: Vec<AtomicU32> = (0..nodes.len()).map(|_| AtomicU32::new(0)).collect();
    let boxes: Vec<Mutex<(Aabb, u32)>> =
        (0..nodes.len()).map(|_| Mutex::new((Aabb::EMPTY, 0))).collect();
    let found_root = Mutex::new(INVALID_INDEX);

    {
        let topology: &[BvhNode] = nodes;
        leaves.par_iter().enumerate().for_each(|(leaf_index, leaf)| {
            let mut current = leaf_parent(leaf_index, leaf, topology.len());
            loop {
                let c = current as usize;
                if counters[c].fetch_add(1, Ordering::AcqRel) == 0 {
                    return;
                }

                let node = &topology[c];
                let (left, left_h) =
                    child_bounds(node.left, node.left_is_leaf, leaves, |i| *boxes[i].lock());
                let (right, right_h) =
                    child_bounds(node.right, node.right_is_leaf, leaves, |i| *boxes[i].lock());
                *boxes[c].lock() = (left.union(&right), 1 + left_h.max(right_h));

                if node.is_root() {
                    record_root(&mut found_root.lock(), current);
                    return;
                }
                current = node.parent;
            }
        });
    }

    let mut heights = Vec::with_capacity(nodes.len());
    for ((node, counter), cell) in nodes.iter_mut().zip(counters).zip(boxes) {
        let (aabb, height) = cell.into_inner();
        node.aabb = aabb;
        node.visit_count = counter.into_inner();
        heights.push(height);
    }

    finish(nodes, found_root.into_inner(), &heights)
}

fn leaf_parent<L: MortonLeaf>(leaf_index: usize, leaf: &L, node_count: usize) -> u32 {
    let parent = leaf.bvh_node_index();
    assert!(
        (parent as usize) < node_count,
        "leaf {leaf_index} has no parent (bvh_node_index {parent}, {node_count} nodes)"
    );
    parent
}

/// Box and height of one child, reading internal nodes through `internal`.
#[inline]
fn child_bounds<L, F>(index: u32, is_leaf: bool, leaves: &[L], internal: F) -> (Aabb, u32)
where
    L: MortonLeaf,
    F: FnOnce(usize) -> (Aabb, u32),
{
    if is_leaf {
        (leaves[index as usize].aabb(), 0)
    } else {
        internal(index as usize)
    }
}

fn record_root(root: &mut u32, candidate: u32) {
    assert!(
        *root == INVALID_INDEX || *root == candidate,
        "refit walks disagree on the root ({} vs {candidate})",
        *root
    );
    *root = candidate;
}

fn finish(nodes: &[BvhNode], root: u32, heights: &[u32]) -> RefitStats {
    assert_ne!(root, INVALID_INDEX, "refit found no root");
    if let Some((i, n)) = nodes.iter().enumerate().find(|(_, n)| n.visit_count != 2) {
        panic!("node {i} visited {} times during refit", n.visit_count);
    }
    let height = heights[root as usize];
    tracing::trace!(root, height, "refit done");
    RefitStats { root, height }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::lbvh::{build, tests::leaves};

    #[test]
    fn test_two_leaf_union() {
        let mut l = leaves(&[1, 2]);
        let mut tree = build(&mut l, false).unwrap();
        let stats = refit(&mut tree.nodes, &l);
        assert_eq!(stats, RefitStats { root: 0, height: 1 });
        let expected = l[0].bounds.union(&l[1].bounds);
        assert_eq!(tree.nodes[0].aabb, expected);
        assert_eq!(tree.nodes[0].visit_count, 2);
    }

    #[test]
    fn test_root_box_is_union_of_leaves() {
        let codes: Vec<u32> = (0..64u32).map(|i| (i * 37) % 19).collect();
        let mut l = leaves(&codes);
        let mut tree = build(&mut l, false).unwrap();
        let stats = refit(&mut tree.nodes, &l);
        let all = l.iter().fold(Aabb::EMPTY, |acc, leaf| acc.union(&leaf.bounds));
        assert_eq!(tree.nodes[stats.root as usize].aabb, all);
        assert!(stats.height >= 6);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let codes: Vec<u32> = (0..500u32).map(|i| i.wrapping_mul(40_503) & 0x3fff_ffff).collect();
        let mut l = leaves(&codes);
        let tree = build(&mut l, false).unwrap();

        let mut serial = tree.nodes.clone();
        let mut parallel = tree.nodes.clone();
        let a = refit(&mut serial, &l);
        let b = refit_parallel(&mut parallel, &l);
        assert_eq!(a, b);
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_refit_is_repeatable() {
        let mut l = leaves(&[9, 4, 4, 1]);
        let mut tree = build(&mut l, false).unwrap();
        let first = refit(&mut tree.nodes, &l);
        let boxes: Vec<Aabb> = tree.nodes.iter().map(|n| n.aabb).collect();
        let second = refit(&mut tree.nodes, &l);
        assert_eq!(first, second);
        assert!(tree.nodes.iter().map(|n| n.aabb).eq(boxes));
    }

    #[test]
    #[should_panic(expected = "has no parent")]
    fn test_orphan_leaf_panics() {
        let mut l = leaves(&[1, 2, 3]);
        let mut tree = build(&mut l, false).unwrap();
        l[2].node = INVALID_INDEX;
        refit(&mut tree.nodes, &l);
    }
}
