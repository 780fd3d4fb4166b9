//! Karras-style linear BVH construction.
//!
//! Leaves are sorted by descending morton code, then each of the `n - 1`
//! internal nodes finds its key range and split point independently from the
//! sorted codes alone. Internal node 0 is always the root. Equal codes are
//! disambiguated by leaf index, so duplicate keys still give a valid tree.
//!
//! Reference: T. Karras, "Maximizing Parallelism in the Construction of BVHs,
//! Octrees, and k-d Trees", HPG 2012.

use rayon::prelude::*;

use super::node::BvhNode;
use crate::util::{to_index, Aabb, Error, Result, INVALID_INDEX};

/// Leaf element the builder can sort and link.
///
/// Implemented by triangles for per-mesh trees and by AABB proxies for the
/// mesh-level tree.
pub trait MortonLeaf: Clone + Send + Sync {
    fn morton_code(&self) -> u32;
    /// Index of the internal node whose child this leaf is.
    fn bvh_node_index(&self) -> u32;
    fn set_bvh_node_index(&mut self, index: u32);
    fn aabb(&self) -> Aabb;
}

/// Internal nodes plus the root index of a freshly linked tree.
///
/// AABBs are empty until a refit pass fills them.
#[derive(Debug, Clone, PartialEq)]
pub struct LbvhTree {
    pub nodes: Vec<BvhNode>,
    pub root: u32,
}

/// Children chosen for one internal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split {
    pub left: u32,
    pub right: u32,
    pub left_is_leaf: bool,
    pub right_is_leaf: bool,
}

/// Length of the common prefix of keys `i` and `j`, or -1 if `j` is out of range.
///
/// Equal codes fall back to the prefix of the indices themselves, extending the
/// key to `code ++ index`.
#[inline]
pub fn delta(codes: &[u32], i: i64, j: i64) -> i32 {
    if j < 0 || j >= codes.len() as i64 {
        return -1;
    }
    let (a, b) = (codes[i as usize], codes[j as usize]);
    if a == b {
        32 + ((i ^ j) as u32).leading_zeros() as i32
    } else {
        (a ^ b).leading_zeros() as i32
    }
}

/// Range and split search for internal node `i` over sorted `codes`.
///
/// # Panics
/// If the computed split falls outside the node's key range, which means the
/// codes were not sorted.
pub fn split_node(codes: &[u32], i: usize) -> Split {
    let i = i as i64;

    // Direction of the range: towards the neighbour sharing the longer prefix
    let d: i64 = if delta(codes, i, i + 1) - delta(codes, i, i - 1) > 0 { 1 } else { -1 };
    let delta_min = delta(codes, i, i - d);

    // Exponential search for an upper bound on the range length
    let mut l_max: i64 = 2;
    while delta(codes, i, i + l_max * d) > delta_min {
        l_max *= 2;
    }

    // Binary search for the exact length
    let mut l: i64 = 0;
    let mut t = l_max / 2;
    while t >= 1 {
        if delta(codes, i, i + (l + t) * d) > delta_min {
            l += t;
        }
        t /= 2;
    }
    let j = i + l * d;
    let delta_node = delta(codes, i, j);

    // Binary search for the last key sharing more than delta_node bits with i
    let mut s: i64 = 0;
    let mut div: i64 = 2;
    loop {
        let t = (l + div - 1) / div;
        if delta(codes, i, i + (s + t) * d) > delta_node {
            s += t;
        }
        if t <= 1 {
            break;
        }
        div *= 2;
    }
    let gamma = i + s * d + d.min(0);

    let (lo, hi) = (i.min(j), i.max(j));
    assert!(
        gamma >= lo && gamma < hi,
        "split {gamma} outside range [{lo}, {hi}] for node {i}"
    );

    Split {
        left: gamma as u32,
        right: (gamma + 1) as u32,
        left_is_leaf: lo == gamma,
        right_is_leaf: hi == gamma + 1,
    }
}

/// Stable sort by descending morton code.
///
/// Leaves with equal codes keep their relative input order.
pub fn sort_leaves<L: MortonLeaf>(leaves: &mut [L], parallel: bool) {
    if parallel {
        leaves.par_sort_by(|a, b| b.morton_code().cmp(&a.morton_code()));
    } else {
        leaves.sort_by(|a, b| b.morton_code().cmp(&a.morton_code()));
    }
}

/// Fail unless `count` leaves can form a radix tree with 32-bit indices.
pub fn check_leaf_count(count: usize) -> Result<()> {
    if count < 2 {
        return Err(Error::TooFewLeaves { count });
    }
    to_index("leaf", count)?;
    Ok(())
}

/// Split points for every internal node of already sorted leaves.
pub fn compute_splits(codes: &[u32], parallel: bool) -> Vec<Split> {
    let internal = codes.len().saturating_sub(1);
    if parallel {
        (0..internal).into_par_iter().map(|i| split_node(codes, i)).collect()
    } else {
        (0..internal).map(|i| split_node(codes, i)).collect()
    }
}

/// Turn split points into nodes and write parent links in both directions.
///
/// # Panics
/// If the links do not form a single tree.
pub fn link_nodes<L: MortonLeaf>(splits: &[Split], leaves: &mut [L]) -> LbvhTree {
    let mut nodes: Vec<BvhNode> = splits
        .iter()
        .map(|s| BvhNode {
            left: s.left,
            right: s.right,
            left_is_leaf: s.left_is_leaf,
            right_is_leaf: s.right_is_leaf,
            ..Default::default()
        })
        .collect();

    for leaf in leaves.iter_mut() {
        leaf.set_bvh_node_index(INVALID_INDEX);
    }

    for (i, s) in splits.iter().enumerate() {
        let i = i as u32;
        for (child, is_leaf) in [(s.left, s.left_is_leaf), (s.right, s.right_is_leaf)] {
            let child = child as usize;
            if is_leaf {
                let leaf = &mut leaves[child];
                assert_eq!(leaf.bvh_node_index(), INVALID_INDEX, "leaf {child} has two parents");
                leaf.set_bvh_node_index(i);
            } else {
                assert!(nodes[child].is_root(), "node {child} has two parents");
                nodes[child].parent = i;
            }
        }
    }

    let mut roots = nodes.iter().enumerate().filter(|(_, n)| n.is_root()).map(|(i, _)| i);
    let root = match (roots.next(), roots.next()) {
        (Some(root), None) => root as u32,
        (None, _) => panic!("radix tree has no root"),
        (Some(a), Some(b)) => panic!("radix tree has several roots ({a}, {b}, ...)"),
    };
    debug_assert_eq!(root, 0);

    LbvhTree { nodes, root }
}

/// Link a tree over leaves that are already in descending code order.
pub fn build_sorted<L: MortonLeaf>(leaves: &mut [L], parallel: bool) -> Result<LbvhTree> {
    check_leaf_count(leaves.len())?;
    let codes: Vec<u32> = leaves.iter().map(|l| l.morton_code()).collect();
    let splits = compute_splits(&codes, parallel);
    Ok(link_nodes(&splits, leaves))
}

/// Sort `leaves` in place and build the radix tree over them.
///
/// Each leaf's back-pointer is set to its parent node. AABBs are left empty;
/// run [`refit`](super::refit::refit) afterwards.
#[tracing::instrument(skip_all, fields(leaf_count = leaves.len(), parallel = parallel))]
pub fn build<L: MortonLeaf>(leaves: &mut [L], parallel: bool) -> Result<LbvhTree> {
    check_leaf_count(leaves.len())?;
    sort_leaves(leaves, parallel);
    build_sorted(leaves, parallel)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::util::Vec3;

    /// Minimal leaf used across the bvh unit tests.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct TestLeaf {
        pub code: u32,
        pub tag: u32,
        pub node: u32,
        pub bounds: Aabb,
    }

    impl TestLeaf {
        pub(crate) fn new(code: u32, tag: u32) -> Self {
            let p = Vec3::splat(tag as f32);
            Self {
                code,
                tag,
                node: INVALID_INDEX,
                bounds: Aabb::new(p, p + Vec3::ONE),
            }
        }
    }

    impl MortonLeaf for TestLeaf {
        fn morton_code(&self) -> u32 {
            self.code
        }
        fn bvh_node_index(&self) -> u32 {
            self.node
        }
        fn set_bvh_node_index(&mut self, index: u32) {
            self.node = index;
        }
        fn aabb(&self) -> Aabb {
            self.bounds
        }
    }

    pub(crate) fn leaves(codes: &[u32]) -> Vec<TestLeaf> {
        codes.iter().enumerate().map(|(i, &c)| TestLeaf::new(c, i as u32)).collect()
    }

    #[test]
    fn test_delta() {
        let codes = [0b1100, 0b1000, 0b1000];
        assert_eq!(delta(&codes, 0, -1), -1);
        assert_eq!(delta(&codes, 0, 3), -1);
        assert_eq!(delta(&codes, 0, 1), 29);
        // equal codes: 32 + clz(1 ^ 2)
        assert_eq!(delta(&codes, 1, 2), 32 + 30);
    }

    #[test]
    fn test_too_few_leaves() {
        let mut none: Vec<TestLeaf> = Vec::new();
        assert!(matches!(build(&mut none, false), Err(Error::TooFewLeaves { count: 0 })));
        let mut one = leaves(&[5]);
        assert!(matches!(build(&mut one, false), Err(Error::TooFewLeaves { count: 1 })));
    }

    #[test]
    fn test_two_leaves() {
        let mut l = leaves(&[3, 9]);
        let tree = build(&mut l, false).unwrap();
        assert_eq!(tree.root, 0);
        assert_eq!(tree.nodes.len(), 1);
        let n = &tree.nodes[0];
        assert!(n.left_is_leaf && n.right_is_leaf);
        assert_eq!((n.left, n.right), (0, 1));
        // sorted descending
        assert_eq!(l[0].code, 9);
        assert_eq!(l[0].node, 0);
        assert_eq!(l[1].node, 0);
    }

    #[test]
    fn test_karras_example_topology() {
        // Eight keys from the paper, already sorted (ascending works the same)
        let codes = [1, 2, 4, 5, 19, 24, 25, 30];
        let splits: Vec<Split> = (0..7).map(|i| split_node(&codes, i)).collect();
        let s = |l, r, ll, rl| Split { left: l, right: r, left_is_leaf: ll, right_is_leaf: rl };
        assert_eq!(
            splits,
            vec![
                s(3, 4, false, false),
                s(0, 1, true, true),
                s(2, 3, true, true),
                s(1, 2, false, false),
                s(4, 5, true, false),
                s(6, 7, false, true),
                s(5, 6, true, true),
            ]
        );
    }

    #[test]
    fn test_all_duplicate_codes() {
        let mut l = leaves(&[7, 7, 7, 7, 7]);
        let tree = build(&mut l, false).unwrap();
        assert_eq!(tree.nodes.len(), 4);
        assert_eq!(tree.nodes.iter().filter(|n| n.is_root()).count(), 1);
        assert!(l.iter().all(|leaf| leaf.node != INVALID_INDEX));
        // stable: input order kept
        let tags: Vec<u32> = l.iter().map(|leaf| leaf.tag).collect();
        assert_eq!(tags, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let codes: Vec<u32> = (0..200u32).map(|i| i.wrapping_mul(2_654_435_761) >> 2).collect();
        let mut a = leaves(&codes);
        let mut b = leaves(&codes);
        let ta = build(&mut a, false).unwrap();
        let tb = build(&mut b, true).unwrap();
        assert_eq!(ta, tb);
        assert_eq!(a, b);
    }
}
