//! # LBVH scene
//!
//! Two-level linear BVH construction for GPU path tracing.
//!
//! Every mesh is turned into triangles and gets an object-space triangle BVH;
//! the meshes themselves, as world-space boxes, form a second BVH on top.
//! Trees are built with Karras' radix-tree construction over Morton-sorted
//! leaves and refit bottom-up. Results are flattened into index-addressed
//! arrays and packed into fixed-capacity buffers for upload.
//!
//! ## Modules
//!
//! - [`util`] - Errors, math types, bounding boxes
//! - [`config`] - Build configuration (backend, limits)
//! - [`bvh`] - Morton codes, builder, refit, GPU radix-sort mirror
//! - [`scene`] - Mesh registration, two-level assembly, buffers
//!
//! ## Example
//!
//! ```ignore
//! use lbvh_scene::prelude::*;
//!
//! let mut ctx = SceneContext::new(BuildConfig::default())?;
//! for mesh in demo_scene(8) {
//!     ctx.register_mesh(mesh)?;
//! }
//! let bvh = ctx.build()?;
//! println!("mesh BVH root: {}", bvh.mesh_bvh_root);
//! ```

pub mod util;
pub mod config;
pub mod bvh;
pub mod scene;

// Re-export commonly used types
pub use util::{Aabb, Error, Result};
pub use config::{BackendKind, BuildConfig, SceneLimits};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{Aabb, Error, Mat4, Result, Vec3};
    pub use crate::config::{BackendKind, BuildConfig, SceneLimits};
    pub use crate::bvh::{Backend, BuiltTree, BvhBuilder, BvhNode, CpuBuilder, MortonLeaf, RadixMirror};
    pub use crate::scene::{
        build_triangle_and_mesh_bvh, demo_scene, Material, MeshDesc, SceneBvh, SceneContext, SceneFile,
    };
}
