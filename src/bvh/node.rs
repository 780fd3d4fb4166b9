//! BVH node and leaf types, plus their packed GPU layouts.
//!
//! The builder works on [`BvhNode`] arrays holding only internal nodes; leaves
//! live in their own array ([`Triangle`] or [`AabbProxy`]) and are addressed
//! through the per-child leaf flags. Flat layouts for upload:
//! - 48-byte nodes
//! - 48-byte triangles
//! - 32-byte proxies

use bytemuck::{Pod, Zeroable};

use super::lbvh::MortonLeaf;
use crate::util::{Aabb, Vec3, INVALID_INDEX};

/// Internal node of a binary radix tree.
///
/// `left`/`right` index the node array when the matching `*_is_leaf` flag is
/// false and the leaf array otherwise. All indices are local to the tree being
/// built until the assembler shifts them into the global arrays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    pub parent: u32,
    pub left: u32,
    pub right: u32,
    pub left_is_leaf: bool,
    pub right_is_leaf: bool,
    pub aabb: Aabb,
    /// Child arrivals seen by the refit pass; 2 once refit completes.
    pub visit_count: u32,
    /// Owning mesh for triangle BVH nodes, `INVALID_INDEX` in the mesh BVH.
    pub mesh_index: u32,
}

impl Default for BvhNode {
    fn default() -> Self {
        Self {
            parent: INVALID_INDEX,
            left: INVALID_INDEX,
            right: INVALID_INDEX,
            left_is_leaf: false,
            right_is_leaf: false,
            aabb: Aabb::EMPTY,
            visit_count: 0,
            mesh_index: INVALID_INDEX,
        }
    }
}

impl BvhNode {
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent == INVALID_INDEX
    }

    /// Packed form for the traversal kernel.
    pub fn to_gpu(&self) -> GpuBvhNode {
        let mut flags = 0;
        if self.left_is_leaf {
            flags |= GpuBvhNode::LEFT_LEAF;
        }
        if self.right_is_leaf {
            flags |= GpuBvhNode::RIGHT_LEAF;
        }
        GpuBvhNode {
            aabb_min: self.aabb.min.to_array(),
            parent: self.parent,
            aabb_max: self.aabb.max.to_array(),
            left: self.left,
            right: self.right,
            flags,
            mesh_index: self.mesh_index,
            visit_count: self.visit_count,
        }
    }
}

/// GPU-friendly BVH node (48 bytes, matches the traversal kernel struct).
///
/// flags bit 0: left child is a leaf, bit 1: right child is a leaf
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuBvhNode {
    pub aabb_min: [f32; 3],
    pub parent: u32,
    pub aabb_max: [f32; 3],
    pub left: u32,
    pub right: u32,
    pub flags: u32,
    pub mesh_index: u32,
    pub visit_count: u32,
}

impl GpuBvhNode {
    pub const LEFT_LEAF: u32 = 1;
    pub const RIGHT_LEAF: u32 = 2;
}

/// Triangle leaf of a per-mesh BVH.
///
/// Positions are object space and never change after conversion; the morton
/// code and back-pointer are written during the build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub v0: Vec3,
    pub v1: Vec3,
    pub v2: Vec3,
    pub mesh_index: u32,
    pub morton_code: u32,
    /// Internal node owning this leaf.
    pub bvh_node_index: u32,
}

impl Triangle {
    pub fn new(v0: Vec3, v1: Vec3, v2: Vec3, mesh_index: u32) -> Self {
        Self {
            v0,
            v1,
            v2,
            mesh_index,
            morton_code: 0,
            bvh_node_index: INVALID_INDEX,
        }
    }

    /// Compute AABB of this triangle.
    pub fn aabb(&self) -> Aabb {
        Aabb::from_points([self.v0, self.v1, self.v2])
    }

    /// Centroid of the triangle.
    pub fn centroid(&self) -> Vec3 {
        (self.v0 + self.v1 + self.v2) / 3.0
    }

    /// Convert to GPU-friendly packed format.
    pub fn to_gpu(&self) -> GpuTriangle {
        GpuTriangle {
            v0: self.v0.to_array(),
            mesh_index: self.mesh_index,
            v1: self.v1.to_array(),
            morton_code: self.morton_code,
            v2: self.v2.to_array(),
            bvh_node_index: self.bvh_node_index,
        }
    }
}

impl MortonLeaf for Triangle {
    #[inline]
    fn morton_code(&self) -> u32 {
        self.morton_code
    }

    #[inline]
    fn bvh_node_index(&self) -> u32 {
        self.bvh_node_index
    }

    #[inline]
    fn set_bvh_node_index(&mut self, index: u32) {
        self.bvh_node_index = index;
    }

    #[inline]
    fn aabb(&self) -> Aabb {
        Triangle::aabb(self)
    }
}

/// Triangle primitive for GPU storage (48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuTriangle {
    pub v0: [f32; 3],
    pub mesh_index: u32,
    pub v1: [f32; 3],
    pub morton_code: u32,
    pub v2: [f32; 3],
    pub bvh_node_index: u32,
}

/// World-space stand-in for a whole mesh in the mesh-level tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AabbProxy {
    pub aabb: Aabb,
    pub morton_code: u32,
    /// Mesh this proxy represents; stable across sorting.
    pub original_index: u32,
    pub bvh_node_index: u32,
}

impl AabbProxy {
    pub fn new(aabb: Aabb, original_index: u32) -> Self {
        Self {
            aabb,
            morton_code: 0,
            original_index,
            bvh_node_index: INVALID_INDEX,
        }
    }

    pub fn to_gpu(&self) -> GpuAabbProxy {
        GpuAabbProxy {
            aabb_min: self.aabb.min.to_array(),
            morton_code: self.morton_code,
            aabb_max: self.aabb.max.to_array(),
            original_index: self.original_index,
        }
    }
}

impl MortonLeaf for AabbProxy {
    #[inline]
    fn morton_code(&self) -> u32 {
        self.morton_code
    }

    #[inline]
    fn bvh_node_index(&self) -> u32 {
        self.bvh_node_index
    }

    #[inline]
    fn set_bvh_node_index(&mut self, index: u32) {
        self.bvh_node_index = index;
    }

    #[inline]
    fn aabb(&self) -> Aabb {
        self.aabb
    }
}

/// Proxy element of the radix-sort ping-pong buffers (32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuAabbProxy {
    pub aabb_min: [f32; 3],
    pub morton_code: u32,
    pub aabb_max: [f32; 3],
    pub original_index: u32,
}
