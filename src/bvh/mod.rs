//! Linear BVH construction.
//!
//! Building blocks shared by both tree levels of a scene:
//! - [`morton`] - 30-bit Morton codes for leaf centroids
//! - [`lbvh`] - sort + Karras radix tree over any [`MortonLeaf`]
//! - [`refit`] - bottom-up box propagation that also finds the root
//! - [`radix`] - host replay of the GPU radix-sort pipeline
//! - [`backend`] - CPU / GPU-mirror selection behind [`BvhBuilder`]
//! - [`validate`], [`dump`] - diagnostics
//!
//! Trees store internal nodes only. A node's children point either into the
//! node array or into the leaf array, as told by its two leaf flags.

pub mod backend;
pub mod dump;
pub mod lbvh;
pub mod morton;
pub mod node;
pub mod radix;
pub mod refit;
pub mod validate;

pub use backend::{Backend, BuiltTree, BvhBuilder, CpuBuilder};
pub use dump::{dump_tree, format_tree};
pub use lbvh::{LbvhTree, MortonLeaf};
pub use node::{AabbProxy, BvhNode, GpuAabbProxy, GpuBvhNode, GpuTriangle, Triangle};
pub use radix::{Dispatch, DispatchPlan, DispatchStage, RadixMirror};
pub use refit::{refit, refit_parallel, RefitStats};
pub use validate::{first_difference, trees_equivalent, validate, IndexBase, TreeStats};
