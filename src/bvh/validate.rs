//! Structural checks for built trees.
//!
//! Used by tests and the CLI; the build itself relies on assertions instead.

use smallvec::{smallvec, SmallVec};

use super::lbvh::MortonLeaf;
use super::node::BvhNode;
use crate::util::{Error, Result};

/// Offsets added to child indices stored in a tree.
///
/// Zero for a freshly built tree; a triangle BVH stitched into the global
/// array carries its node offset and its mesh's triangle offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexBase {
    pub node: u32,
    pub leaf: u32,
}

/// Shape summary of a valid tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub internal_nodes: usize,
    pub leaves: usize,
    pub height: u32,
}

/// Back-pointers of `leaves`, in order.
pub fn leaf_parents<L: MortonLeaf>(leaves: &[L]) -> Vec<u32> {
    leaves.iter().map(|l| l.bvh_node_index()).collect()
}

/// Check that `nodes` form a single binary tree over `leaf_parents.len()` leaves.
///
/// `root` is relative to `nodes`. Verifies one root, `n - 1` internal nodes,
/// parent/child agreement in both directions (including leaf back-pointers),
/// each node and leaf reached exactly once, and, once boxes are set, that every
/// internal child lies inside its parent.
pub fn validate(nodes: &[BvhNode], root: u32, leaf_parents: &[u32], base: IndexBase) -> Result<TreeStats> {
    let leaf_count = leaf_parents.len();
    if leaf_count < 2 || nodes.len() != leaf_count - 1 {
        return Err(Error::invalid_tree(format!(
            "{} internal nodes for {leaf_count} leaves",
            nodes.len()
        )));
    }
    let root_node = nodes
        .get(root as usize)
        .ok_or_else(|| Error::invalid_tree(format!("root {root} out of range")))?;
    if !root_node.is_root() {
        return Err(Error::invalid_tree(format!("root {root} has parent {}", root_node.parent)));
    }
    let roots = nodes.iter().filter(|n| n.is_root()).count();
    if roots != 1 {
        return Err(Error::invalid_tree(format!("{roots} nodes without parent")));
    }

    let mut node_seen = vec![false; nodes.len()];
    let mut leaf_seen = vec![false; leaf_count];
    let mut height = 0;
    let mut stack: SmallVec<[(usize, u32); 64]> = smallvec![(root as usize, 0)];

    while let Some((i, depth)) = stack.pop() {
        if std::mem::replace(&mut node_seen[i], true) {
            return Err(Error::invalid_tree(format!("node {i} reached twice")));
        }
        let node = &nodes[i];
        let global = base.node + i as u32;

        for (child, is_leaf) in [(node.left, node.left_is_leaf), (node.right, node.right_is_leaf)] {
            if is_leaf {
                let li = local(child, base.leaf, leaf_count, "leaf")?;
                if std::mem::replace(&mut leaf_seen[li], true) {
                    return Err(Error::invalid_tree(format!("leaf {child} reached twice")));
                }
                if leaf_parents[li] != global {
                    return Err(Error::invalid_tree(format!(
                        "leaf {child} points at {} instead of {global}",
                        leaf_parents[li]
                    )));
                }
                height = height.max(depth + 1);
            } else {
                let ci = local(child, base.node, nodes.len(), "node")?;
                let c = &nodes[ci];
                if c.parent != global {
                    return Err(Error::invalid_tree(format!(
                        "node {child} has parent {} instead of {global}",
                        c.parent
                    )));
                }
                if !node.aabb.is_empty() && !node.aabb.contains_box(&c.aabb) {
                    return Err(Error::invalid_tree(format!("node {child} box escapes its parent")));
                }
                stack.push((ci, depth + 1));
            }
        }
    }

    if let Some(i) = node_seen.iter().position(|s| !s) {
        return Err(Error::invalid_tree(format!("node {i} unreachable")));
    }
    if let Some(i) = leaf_seen.iter().position(|s| !s) {
        return Err(Error::invalid_tree(format!("leaf {i} unreachable")));
    }

    Ok(TreeStats {
        internal_nodes: nodes.len(),
        leaves: leaf_count,
        height,
    })
}

fn local(index: u32, base: u32, len: usize, what: &str) -> Result<usize> {
    index
        .checked_sub(base)
        .map(|i| i as usize)
        .filter(|&i| i < len)
        .ok_or_else(|| Error::invalid_tree(format!("{what} index {index} outside [{base}, {base} + {len})")))
}

/// First field where two node arrays differ, if any.
///
/// Topology (links, leaf flags, mesh tag) must match exactly; boxes may differ
/// by `eps` per component.
pub fn first_difference(a: &[BvhNode], b: &[BvhNode], eps: f32) -> Option<String> {
    if a.len() != b.len() {
        return Some(format!("node count {} vs {}", a.len(), b.len()));
    }
    a.iter().zip(b).enumerate().find_map(|(i, (x, y))| {
        if (x.parent, x.left, x.right) != (y.parent, y.left, y.right) {
            Some(format!(
                "node {i} links (parent {}, left {}, right {}) vs ({}, {}, {})",
                x.parent, x.left, x.right, y.parent, y.left, y.right
            ))
        } else if (x.left_is_leaf, x.right_is_leaf) != (y.left_is_leaf, y.right_is_leaf) {
            Some(format!("node {i} leaf flags differ"))
        } else if x.mesh_index != y.mesh_index {
            Some(format!("node {i} mesh {} vs {}", x.mesh_index, y.mesh_index))
        } else if !x.aabb.approx_eq(&y.aabb, eps) {
            Some(format!("node {i} box {} vs {}", x.aabb, y.aabb))
        } else {
            None
        }
    })
}

/// True when two node arrays describe the same tree (see [`first_difference`]).
pub fn trees_equivalent(a: &[BvhNode], b: &[BvhNode], eps: f32) -> bool {
    first_difference(a, b, eps).is_none()
}
