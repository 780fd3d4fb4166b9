//! Indented text dump of a tree, for debugging.

use smallvec::{smallvec, SmallVec};
use std::fmt::{self, Write};

use super::node::BvhNode;
use super::validate::IndexBase;

/// Write `nodes` depth-first starting at `root` (relative to `nodes`).
///
/// Child indices are interpreted through `base`, so a triangle BVH can be
/// dumped straight out of the global array. `describe_leaf` receives the
/// stored (global) leaf index.
pub fn dump_tree<W, F>(out: &mut W, nodes: &[BvhNode], root: u32, base: IndexBase, describe_leaf: F) -> fmt::Result
where
    W: Write,
    F: Fn(u32) -> String,
{
    enum Item {
        Node(u32),
        Leaf(u32),
    }

    let mut stack: SmallVec<[(Item, usize); 64]> = smallvec![(Item::Node(base.node + root), 0)];
    while let Some((item, depth)) = stack.pop() {
        let indent = depth * 2;
        match item {
            Item::Leaf(index) => {
                writeln!(out, "{:indent$}leaf {index}: {}", "", describe_leaf(index))?;
            }
            Item::Node(index) => {
                let Some(node) = index.checked_sub(base.node).and_then(|i| nodes.get(i as usize)) else {
                    writeln!(out, "{:indent$}node {index}: <out of range>", "")?;
                    continue;
                };
                writeln!(out, "{:indent$}node {index} {} visits={}", "", node.aabb, node.visit_count)?;
                // right first so the left subtree prints first
                for (child, is_leaf) in [(node.right, node.right_is_leaf), (node.left, node.left_is_leaf)] {
                    let item = if is_leaf { Item::Leaf(child) } else { Item::Node(child) };
                    stack.push((item, depth + 1));
                }
            }
        }
    }
    Ok(())
}

/// [`dump_tree`] into a new string.
pub fn format_tree<F: Fn(u32) -> String>(nodes: &[BvhNode], root: u32, base: IndexBase, describe_leaf: F) -> String {
    let mut s = String::new();
    // Writing into a String never fails
    let _ = dump_tree(&mut s, nodes, root, base, describe_leaf);
    s
}
