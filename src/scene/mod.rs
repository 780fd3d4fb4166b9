//! Two-level scene assembly.
//!
//! Every mesh gets its own triangle BVH in object space. The root boxes of
//! those trees, pushed through each mesh's model matrix, become proxy leaves of
//! a single world-space mesh BVH. Both levels are flattened into global arrays
//! with all stored indices already shifted to global positions:
//!
//! - triangle BVH: per-mesh subtrees back to back; internal children are
//!   offset by the subtree's node offset, leaf children by the mesh's triangle
//!   offset. [`MeshRecord`] keeps the local root and the node offset.
//! - mesh BVH: leaf children are real mesh indices, not proxy positions.
//!
//! [`SceneContext`] owns the registered meshes, the built arrays and the GPU
//! buffers, and publishes counts plus the mesh BVH root through a
//! [`SceneUniform`] with a dirty flag.

pub mod buffers;
pub mod convert;

pub use buffers::{GpuMesh, SceneBuffers, SceneUniform, StructuredBuffer};
pub use convert::{box_mesh, convert_to_triangles, demo_scene, quad_grid, triangle_bounds, MeshEntry, SceneFile};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bvh::{
    dump_tree, morton, validate, AabbProxy, Backend, BvhBuilder, BvhNode, IndexBase, TreeStats, Triangle,
};
use crate::config::{BuildConfig, SceneLimits};
use crate::util::{ensure_capacity, to_index, Aabb, Error, Mat4, Result, Vec3, INVALID_INDEX};

/// Surface parameters carried through to the GPU mesh record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    pub base_color: [f32; 3],
    pub metallic: f32,
    pub roughness: f32,
    pub emission: [f32; 3],
}

impl Default for Material {
    /// Grey dielectric.
    fn default() -> Self {
        Self {
            base_color: [0.8, 0.8, 0.8],
            metallic: 0.0,
            roughness: 0.5,
            emission: [0.0; 3],
        }
    }
}

/// Indexed triangle mesh as registered with a scene.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshDesc {
    pub name: String,
    /// Object-space positions.
    pub vertices: Vec<Vec3>,
    /// Three indices per triangle.
    pub indices: Vec<u32>,
    /// Object-to-world.
    pub transform: Mat4,
    pub material: Material,
}

/// Per-mesh entry of a built scene.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshRecord {
    pub name: String,
    /// First triangle in the global triangle array.
    pub triangle_offset: u32,
    pub triangle_count: u32,
    pub transform: Mat4,
    pub inverse_transform: Mat4,
    pub material: Material,
    /// Root of this mesh's subtree, relative to `triangle_bvh_offset`.
    pub triangle_bvh_root: u32,
    /// First node of this mesh's subtree in the global triangle BVH.
    pub triangle_bvh_offset: u32,
    /// Object-space root box after the model transform.
    pub world_aabb: Aabb,
}

impl MeshRecord {
    /// Internal nodes in this mesh's subtree.
    pub fn triangle_bvh_count(&self) -> u32 {
        self.triangle_count - 1
    }

    /// Index of the subtree root in the global triangle BVH.
    pub fn global_root(&self) -> u32 {
        self.triangle_bvh_offset + self.triangle_bvh_root
    }
}

/// Diagnostics gathered during assembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneStats {
    pub max_triangle_bvh_height: u32,
    pub mesh_bvh_height: u32,
}

/// Output of [`build_triangle_and_mesh_bvh`].
#[derive(Debug, Clone, PartialEq)]
pub struct SceneBvh {
    /// All triangles, grouped per mesh, each group in its tree order.
    pub triangles: Vec<Triangle>,
    pub meshes: Vec<MeshRecord>,
    pub triangle_bvh: Vec<BvhNode>,
    pub mesh_bvh: Vec<BvhNode>,
    pub mesh_bvh_root: u32,
    /// Mesh proxies in mesh BVH leaf order.
    pub proxies: Vec<AabbProxy>,
    pub stats: SceneStats,
}

/// Per-tree results of [`SceneBvh::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneValidation {
    pub triangle_trees: Vec<TreeStats>,
    pub mesh_tree: TreeStats,
}

/// Build per-mesh triangle BVHs and the mesh BVH over them.
///
/// All limits are checked before any tree is built. Meshes must number at
/// least two and each needs at least two triangles; a mesh with no triangles is
/// rejected as invalid.
#[tracing::instrument(skip_all, fields(mesh_count = meshes.len(), backend = builder.name()))]
pub fn build_triangle_and_mesh_bvh<B: BvhBuilder>(
    meshes: &[MeshDesc],
    builder: &B,
    limits: &SceneLimits,
) -> Result<SceneBvh> {
    if meshes.len() < 2 {
        return Err(Error::TooFewLeaves { count: meshes.len() });
    }
    ensure_capacity("meshes", meshes.len(), limits.max_meshes)?;
    ensure_capacity("mesh BVH", meshes.len() - 1, limits.max_mesh_bvh_nodes)?;
    to_index("mesh", meshes.len())?;

    let mut per_mesh = Vec::with_capacity(meshes.len());
    for (i, mesh) in meshes.iter().enumerate() {
        let tris = convert_to_triangles(mesh, i as u32)?;
        match tris.len() {
            0 => return Err(Error::invalid_mesh(format!("'{}' has no triangles", mesh.name))),
            1 => return Err(Error::TooFewLeaves { count: 1 }),
            _ => per_mesh.push(tris),
        }
    }

    let triangle_count: usize = per_mesh.iter().map(Vec::len).sum();
    let node_count: usize = per_mesh.iter().map(|t| t.len() - 1).sum();
    ensure_capacity("triangles", triangle_count, limits.max_triangles)?;
    ensure_capacity("triangle BVH", node_count, limits.max_triangle_bvh_nodes)?;
    to_index("triangle", triangle_count)?;
    to_index("triangle BVH node", node_count)?;

    let mut triangles = Vec::with_capacity(triangle_count);
    let mut triangle_bvh = Vec::with_capacity(node_count);
    let mut records = Vec::with_capacity(meshes.len());
    let mut stats = SceneStats::default();

    for (mesh_index, (mesh, mut tris)) in meshes.iter().zip(per_mesh).enumerate() {
        let bounds = triangle_bounds(&tris);
        for t in &mut tris {
            t.morton_code = morton::encode_in(t.centroid(), &bounds);
        }
        let tree = builder.build(&mut tris)?;

        let node_offset = triangle_bvh.len() as u32;
        let triangle_offset = triangles.len() as u32;
        for t in &mut tris {
            t.bvh_node_index += node_offset;
        }
        triangle_bvh.extend(
            tree.nodes
                .iter()
                .map(|n| to_global(n, node_offset, triangle_offset, mesh_index as u32)),
        );

        let world_aabb = tree.nodes[tree.root as usize].aabb.transformed(&mesh.transform);
        tracing::debug!(
            mesh = %mesh.name,
            triangles = tris.len(),
            height = tree.height,
            %world_aabb,
            "triangle BVH built"
        );
        stats.max_triangle_bvh_height = stats.max_triangle_bvh_height.max(tree.height);

        records.push(MeshRecord {
            name: mesh.name.clone(),
            triangle_offset,
            triangle_count: tris.len() as u32,
            transform: mesh.transform,
            inverse_transform: mesh.transform.inverse(),
            material: mesh.material.clone(),
            triangle_bvh_root: tree.root,
            triangle_bvh_offset: node_offset,
            world_aabb,
        });
        triangles.extend(tris);
    }

    let scene_bounds = records.iter().fold(Aabb::EMPTY, |acc, r| acc.union(&r.world_aabb));
    let mut proxies: Vec<AabbProxy> = records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut p = AabbProxy::new(r.world_aabb, i as u32);
            p.morton_code = morton::encode_in(r.world_aabb.center(), &scene_bounds);
            p
        })
        .collect();
    let mesh_tree = builder.build(&mut proxies)?;

    let mut mesh_bvh = mesh_tree.nodes;
    for node in &mut mesh_bvh {
        if node.left_is_leaf {
            node.left = proxies[node.left as usize].original_index;
        }
        if node.right_is_leaf {
            node.right = proxies[node.right as usize].original_index;
        }
        node.mesh_index = INVALID_INDEX;
    }
    stats.mesh_bvh_height = mesh_tree.height;

    tracing::debug!(
        triangles = triangles.len(),
        triangle_bvh_nodes = triangle_bvh.len(),
        mesh_bvh_nodes = mesh_bvh.len(),
        root = mesh_tree.root,
        %scene_bounds,
        "scene BVH assembled"
    );

    Ok(SceneBvh {
        triangles,
        meshes: records,
        triangle_bvh,
        mesh_bvh,
        mesh_bvh_root: mesh_tree.root,
        proxies,
        stats,
    })
}

/// Shift a locally numbered node into the global triangle BVH.
fn to_global(node: &BvhNode, node_offset: u32, leaf_offset: u32, mesh_index: u32) -> BvhNode {
    let shift = |index: u32, is_leaf: bool| index + if is_leaf { leaf_offset } else { node_offset };
    BvhNode {
        parent: if node.is_root() { INVALID_INDEX } else { node.parent + node_offset },
        left: shift(node.left, node.left_is_leaf),
        right: shift(node.right, node.right_is_leaf),
        mesh_index,
        ..*node
    }
}

impl SceneBvh {
    /// Counts and root for the traversal kernel.
    pub fn uniform(&self) -> SceneUniform {
        SceneUniform {
            mesh_bvh_count: self.mesh_bvh.len() as u32,
            triangle_bvh_count: self.triangle_bvh.len() as u32,
            mesh_bvh_root_index: self.mesh_bvh_root,
            triangle_count: self.triangles.len() as u32,
            mesh_count: self.meshes.len() as u32,
            _pad: [0; 3],
        }
    }

    /// Nodes of one mesh's subtree inside the global triangle BVH.
    pub fn triangle_bvh_of(&self, mesh_index: usize) -> Result<&[BvhNode]> {
        let r = self.mesh(mesh_index)?;
        let start = r.triangle_bvh_offset as usize;
        Ok(&self.triangle_bvh[start..start + r.triangle_bvh_count() as usize])
    }

    /// Triangles owned by one mesh.
    pub fn triangles_of(&self, mesh_index: usize) -> Result<&[Triangle]> {
        let r = self.mesh(mesh_index)?;
        let start = r.triangle_offset as usize;
        Ok(&self.triangles[start..start + r.triangle_count as usize])
    }

    fn mesh(&self, index: usize) -> Result<&MeshRecord> {
        self.meshes.get(index).ok_or(Error::MeshOutOfBounds {
            index,
            count: self.meshes.len(),
        })
    }

    /// Leaf back-pointers of the mesh BVH, indexed by mesh.
    pub fn mesh_leaf_parents(&self) -> Vec<u32> {
        let mut parents = vec![INVALID_INDEX; self.meshes.len()];
        for p in &self.proxies {
            parents[p.original_index as usize] = p.bvh_node_index;
        }
        parents
    }

    /// Structurally validate every tree in the scene.
    pub fn validate(&self) -> Result<SceneValidation> {
        let mut triangle_trees = Vec::with_capacity(self.meshes.len());
        for (i, r) in self.meshes.iter().enumerate() {
            let nodes = self.triangle_bvh_of(i)?;
            let parents: Vec<u32> = self.triangles_of(i)?.iter().map(|t| t.bvh_node_index).collect();
            let base = IndexBase {
                node: r.triangle_bvh_offset,
                leaf: r.triangle_offset,
            };
            let stats = validate(nodes, r.triangle_bvh_root, &parents, base)?;
            if nodes.iter().any(|n| n.mesh_index != i as u32) {
                return Err(Error::invalid_tree(format!("mesh {i} subtree has foreign nodes")));
            }
            triangle_trees.push(stats);
        }
        let mesh_tree = validate(
            &self.mesh_bvh,
            self.mesh_bvh_root,
            &self.mesh_leaf_parents(),
            IndexBase::default(),
        )?;
        Ok(SceneValidation {
            triangle_trees,
            mesh_tree,
        })
    }

    /// Dump the mesh BVH; leaves show mesh name, triangle count and world box.
    pub fn dump_mesh_bvh<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        dump_tree(out, &self.mesh_bvh, self.mesh_bvh_root, IndexBase::default(), |i| {
            match self.meshes.get(i as usize) {
                Some(m) => format!("mesh '{}' tris={} {}", m.name, m.triangle_count, m.world_aabb),
                None => "<missing mesh>".into(),
            }
        })
    }

    /// Dump one mesh's triangle BVH straight from the global array.
    pub fn dump_triangle_bvh<W: fmt::Write>(&self, mesh_index: usize, out: &mut W) -> fmt::Result {
        let (Ok(nodes), Some(r)) = (self.triangle_bvh_of(mesh_index), self.meshes.get(mesh_index)) else {
            return writeln!(out, "no mesh {mesh_index}");
        };
        let base = IndexBase {
            node: r.triangle_bvh_offset,
            leaf: r.triangle_offset,
        };
        dump_tree(out, nodes, r.triangle_bvh_root, base, |i| match self.triangles.get(i as usize) {
            Some(t) => {
                let c = t.centroid();
                format!("tri morton={:#010x} centroid=({:.3}, {:.3}, {:.3})", t.morton_code, c.x, c.y, c.z)
            }
            None => "<missing triangle>".into(),
        })
    }
}

/// Owns one scene: registered meshes, built arrays, GPU buffers and uniform.
#[derive(Debug, Clone)]
pub struct SceneContext {
    config: BuildConfig,
    backend: Backend,
    meshes: Vec<MeshDesc>,
    buffers: SceneBuffers,
    bvh: Option<SceneBvh>,
    uniform: SceneUniform,
    uniform_dirty: bool,
}

impl SceneContext {
    pub fn new(config: BuildConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend: Backend::from_config(&config),
            buffers: SceneBuffers::new(&config.limits),
            config,
            meshes: Vec::new(),
            bvh: None,
            uniform: SceneUniform::default(),
            uniform_dirty: false,
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Register a mesh; returns its index. Limits are enforced by [`build`](Self::build).
    pub fn register_mesh(&mut self, mesh: MeshDesc) -> Result<u32> {
        let index = to_index("mesh", self.meshes.len())?;
        self.meshes.push(mesh);
        Ok(index)
    }

    pub fn meshes(&self) -> &[MeshDesc] {
        &self.meshes
    }

    /// Object-space triangles of a registered mesh.
    pub fn convert_to_triangles(&self, mesh_index: usize) -> Result<Vec<Triangle>> {
        let mesh = self.meshes.get(mesh_index).ok_or(Error::MeshOutOfBounds {
            index: mesh_index,
            count: self.meshes.len(),
        })?;
        convert_to_triangles(mesh, mesh_index as u32)
    }

    /// Build both levels, upload them and publish the uniform.
    ///
    /// On error the previous build, buffers and uniform are untouched.
    #[tracing::instrument(skip_all, fields(meshes = self.meshes.len()))]
    pub fn build(&mut self) -> Result<&SceneBvh> {
        let bvh = build_triangle_and_mesh_bvh(&self.meshes, &self.backend, &self.config.limits)?;
        self.buffers.upload(&bvh)?;
        self.uniform = bvh.uniform();
        self.uniform_dirty = true;
        tracing::info!(
            triangles = self.uniform.triangle_count,
            triangle_bvh_nodes = self.uniform.triangle_bvh_count,
            mesh_bvh_nodes = self.uniform.mesh_bvh_count,
            bytes = self.buffers.total_bytes(),
            "scene built"
        );
        Ok(self.bvh.insert(bvh))
    }

    pub fn bvh(&self) -> Option<&SceneBvh> {
        self.bvh.as_ref()
    }

    pub fn buffers(&self) -> &SceneBuffers {
        &self.buffers
    }

    pub fn uniform(&self) -> &SceneUniform {
        &self.uniform
    }

    pub fn is_uniform_dirty(&self) -> bool {
        self.uniform_dirty
    }

    /// Uniform to re-upload, if it changed since the last call.
    pub fn take_dirty_uniform(&mut self) -> Option<SceneUniform> {
        std::mem::take(&mut self.uniform_dirty).then_some(self.uniform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::CpuBuilder;

    fn two_grids() -> Vec<MeshDesc> {
        vec![
            quad_grid("a", 2, 1, 1.0, Mat4::IDENTITY),
            quad_grid("b", 2, 1, 1.0, Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0))),
        ]
    }

    #[test]
    fn test_offsets_are_global() {
        let bvh = build_triangle_and_mesh_bvh(&two_grids(), &CpuBuilder::default(), &SceneLimits::default()).unwrap();
        let second = &bvh.meshes[1];
        assert_eq!((second.triangle_offset, second.triangle_bvh_offset), (4, 3));
        for node in &bvh.triangle_bvh[3..] {
            assert_eq!(node.mesh_index, 1);
            for (child, is_leaf) in [(node.left, node.left_is_leaf), (node.right, node.right_is_leaf)] {
                if is_leaf {
                    assert!((4..8).contains(&child));
                } else {
                    assert!((3..6).contains(&child));
                }
            }
        }
        assert!(bvh.triangles[4..].iter().all(|t| (3..6).contains(&t.bvh_node_index)));
        bvh.validate().unwrap();
    }

    #[test]
    fn test_world_aabb_uses_transform() {
        let bvh = build_triangle_and_mesh_bvh(&two_grids(), &CpuBuilder::default(), &SceneLimits::default()).unwrap();
        let w = bvh.meshes[1].world_aabb;
        assert!(w.approx_eq(&Aabb::new(Vec3::new(10.0, 0.0, 0.0), Vec3::new(12.0, 0.0, 1.0)), 1e-5));
        let root = &bvh.mesh_bvh[bvh.mesh_bvh_root as usize];
        assert!(root.aabb.contains_box(&w));
        assert_eq!(root.mesh_index, INVALID_INDEX);
    }

    #[test]
    fn test_mesh_leaves_are_mesh_indices() {
        let meshes = demo_scene(7);
        let bvh = build_triangle_and_mesh_bvh(&meshes, &CpuBuilder::default(), &SceneLimits::default()).unwrap();
        let mut seen: Vec<u32> = bvh
            .mesh_bvh
            .iter()
            .flat_map(|n| {
                [(n.left, n.left_is_leaf), (n.right, n.right_is_leaf)]
                    .into_iter()
                    .filter(|c| c.1)
                    .map(|c| c.0)
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<u32>>());
        bvh.validate().unwrap();
    }

    #[test]
    fn test_tiny_meshes_rejected() {
        let single = MeshDesc {
            name: "tri".into(),
            vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            indices: vec![0, 1, 2],
            transform: Mat4::IDENTITY,
            material: Material::default(),
        };
        let empty = MeshDesc {
            indices: Vec::new(),
            ..single.clone()
        };
        let grid = quad_grid("g", 1, 1, 1.0, Mat4::IDENTITY);
        let limits = SceneLimits::default();
        let cpu = CpuBuilder::default();

        let err = build_triangle_and_mesh_bvh(&[grid.clone(), single], &cpu, &limits).unwrap_err();
        assert!(matches!(err, Error::TooFewLeaves { count: 1 }));
        let err = build_triangle_and_mesh_bvh(&[grid.clone(), empty], &cpu, &limits).unwrap_err();
        assert!(matches!(err, Error::InvalidMesh(_)));
        let err = build_triangle_and_mesh_bvh(&[grid], &cpu, &limits).unwrap_err();
        assert!(matches!(err, Error::TooFewLeaves { count: 1 }));
    }

    #[test]
    fn test_context_uniform_dirty_flag() {
        let mut ctx = SceneContext::new(BuildConfig::default()).unwrap();
        for m in two_grids() {
            ctx.register_mesh(m).unwrap();
        }
        assert!(!ctx.is_uniform_dirty());
        ctx.build().unwrap();
        let u = ctx.take_dirty_uniform().unwrap();
        assert_eq!(u.triangle_bvh_count, 6);
        assert_eq!(u.mesh_bvh_count, 1);
        assert_eq!(u.mesh_bvh_root_index, 0);
        assert!(ctx.take_dirty_uniform().is_none());
        assert!(ctx.buffers().any_dirty());
    }

    #[test]
    fn test_convert_unknown_mesh() {
        let ctx = SceneContext::new(BuildConfig::default()).unwrap();
        assert!(matches!(
            ctx.convert_to_triangles(0),
            Err(Error::MeshOutOfBounds { index: 0, count: 0 })
        ));
    }

    #[test]
    fn test_dump_mesh_bvh() {
        let bvh = build_triangle_and_mesh_bvh(&two_grids(), &CpuBuilder::default(), &SceneLimits::default()).unwrap();
        let mut s = String::new();
        bvh.dump_mesh_bvh(&mut s).unwrap();
        assert!(s.contains("mesh 'a' tris=4"));
        assert!(s.contains("mesh 'b' tris=4"));
        let mut t = String::new();
        bvh.dump_triangle_bvh(1, &mut t).unwrap();
        assert!(t.starts_with("node 3"));
        assert_eq!(t.matches("leaf").count(), 4);
    }
}
