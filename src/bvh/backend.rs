//! Builder backends behind one capability.
//!
//! [`CpuBuilder`] is the reference path (comparison sort, Karras split,
//! bottom-up refit). [`RadixMirror`] replays the GPU dispatch sequence on the
//! host. Both must hand back structurally identical trees for the same input.

use super::lbvh::{self, MortonLeaf};
use super::node::BvhNode;
use super::radix::RadixMirror;
use super::refit::{refit, refit_parallel};
use crate::config::{BackendKind, BuildConfig};
use crate::util::Result;

/// A sorted, linked and refit tree.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltTree {
    /// Internal nodes, child indices local to this tree.
    pub nodes: Vec<BvhNode>,
    pub root: u32,
    pub height: u32,
}

/// Something that can turn a leaf set into a finished BVH.
///
/// On success `leaves` is left in tree order with back-pointers set. On error
/// neither `leaves` nor any output has been touched.
pub trait BvhBuilder {
    fn name(&self) -> &'static str;

    fn build<L: MortonLeaf>(&self, leaves: &mut [L]) -> Result<BuiltTree>;
}

/// Host reference builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuBuilder {
    /// Use rayon for sorting, splitting and refit.
    pub parallel: bool,
}

impl BvhBuilder for CpuBuilder {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn build<L: MortonLeaf>(&self, leaves: &mut [L]) -> Result<BuiltTree> {
        let mut tree = lbvh::build(leaves, self.parallel)?;
        let stats = if self.parallel {
            refit_parallel(&mut tree.nodes, leaves)
        } else {
            refit(&mut tree.nodes, leaves)
        };
        Ok(BuiltTree {
            nodes: tree.nodes,
            root: stats.root,
            height: stats.height,
        })
    }
}

/// Backend picked from [`BuildConfig::backend`].
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    Cpu(CpuBuilder),
    GpuMirror(RadixMirror),
}

impl Backend {
    pub fn from_config(config: &BuildConfig) -> Self {
        match config.backend {
            BackendKind::Cpu => Self::Cpu(CpuBuilder {
                parallel: config.parallel,
            }),
            BackendKind::GpuMirror => Self::GpuMirror(RadixMirror::from_config(config)),
        }
    }
}

impl BvhBuilder for Backend {
    fn name(&self) -> &'static str {
        match self {
            Self::Cpu(b) => b.name(),
            Self::GpuMirror(b) => b.name(),
        }
    }

    fn build<L: MortonLeaf>(&self, leaves: &mut [L]) -> Result<BuiltTree> {
        match self {
            Self::Cpu(b) => b.build(leaves),
            Self::GpuMirror(b) => b.build(leaves),
        }
    }
}
