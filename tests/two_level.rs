//! Two-level scene assembly through `SceneContext`.

use lbvh_scene::bvh::GpuBvhNode;
use lbvh_scene::prelude::*;
use lbvh_scene::scene::quad_grid;

/// 2x1 grid: four triangles.
fn four_tri_mesh(name: &str, x: f32) -> MeshDesc {
    quad_grid(name, 2, 1, 1.0, Mat4::from_translation(Vec3::new(x, 0.0, 0.0)))
}

fn context(config: BuildConfig) -> SceneContext {
    let mut ctx = SceneContext::new(config).unwrap();
    ctx.register_mesh(four_tri_mesh("left", 0.0)).unwrap();
    ctx.register_mesh(four_tri_mesh("right", 5.0)).unwrap();
    ctx
}

#[test]
fn test_two_meshes_four_triangles() {
    let mut ctx = context(BuildConfig::default());
    let bvh = ctx.build().unwrap().clone();

    assert_eq!(bvh.triangles.len(), 8);
    assert_eq!(bvh.triangle_bvh.len(), 6);
    assert_eq!(bvh.mesh_bvh.len(), 1);
    assert_eq!(bvh.mesh_bvh_root, 0);

    let offsets: Vec<(u32, u32)> = bvh
        .meshes
        .iter()
        .map(|m| (m.triangle_offset, m.triangle_bvh_offset))
        .collect();
    assert_eq!(offsets, vec![(0, 0), (4, 3)]);
    assert_eq!(bvh.meshes[0].global_root(), 0);
    assert_eq!(bvh.meshes[1].global_root(), 3);

    // mesh BVH root holds both meshes directly, by real index
    let root = &bvh.mesh_bvh[0];
    assert!(root.left_is_leaf && root.right_is_leaf);
    let mut leaves = [root.left, root.right];
    leaves.sort_unstable();
    assert_eq!(leaves, [0, 1]);
    let union = bvh.meshes[0].world_aabb.union(&bvh.meshes[1].world_aabb);
    assert_eq!(root.aabb, union);

    let report = bvh.validate().unwrap();
    assert_eq!(report.triangle_trees.len(), 2);
    assert!(report.triangle_trees.iter().all(|t| t.internal_nodes == 3 && t.leaves == 4));
    assert_eq!(report.mesh_tree.height, 1);

    let u = *ctx.uniform();
    assert_eq!(
        (u.triangle_count, u.triangle_bvh_count, u.mesh_bvh_count, u.mesh_bvh_root_index, u.mesh_count),
        (8, 6, 1, 0, 2)
    );
    assert!(ctx.is_uniform_dirty());

    let buffers = ctx.buffers();
    assert_eq!(buffers.triangle_bvh.len(), 6);
    assert_eq!(buffers.triangle_bvh.as_bytes().len(), 6 * std::mem::size_of::<GpuBvhNode>());
    assert_eq!(buffers.mesh_bvh.len(), 1);
    assert_eq!(buffers.triangles.len(), 8);
    assert_eq!(buffers.meshes.as_slice()[1].triangle_bvh_offset, 3);
    assert_eq!(buffers.proxies[0].len(), 2);
}

#[test]
fn test_gpu_mirror_matches_cpu_scene() {
    let cpu = context(BuildConfig::default()).build().unwrap().clone();
    let config = BuildConfig {
        backend: BackendKind::GpuMirror,
        ..Default::default()
    };
    let gpu = context(config).build().unwrap().clone();
    assert_eq!(cpu, gpu);
}

#[test]
fn test_triangle_capacity_fails_before_any_write() {
    let mut config = BuildConfig::default();
    config.limits.max_triangles = 7;
    let mut ctx = context(config);

    let err = ctx.build().unwrap_err();
    assert!(matches!(
        err,
        Error::CapacityExceeded {
            buffer: "triangles",
            requested: 8,
            capacity: 7
        }
    ));
    assert!(ctx.bvh().is_none());
    assert!(!ctx.is_uniform_dirty());
    assert!(!ctx.buffers().any_dirty());
    assert!(ctx.buffers().triangles.is_empty());
    assert_eq!(ctx.buffers().total_bytes(), 0);
}

#[test]
fn test_node_and_mesh_limits() {
    let mut config = BuildConfig::default();
    config.limits.max_triangle_bvh_nodes = 5;
    let err = context(config).build().unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded { buffer: "triangle BVH", requested: 6, .. }));

    let mut config = BuildConfig::default();
    config.limits.max_meshes = 2;
    let mut ctx = context(config);
    ctx.register_mesh(four_tri_mesh("third", 10.0)).unwrap();
    let err = ctx.build().unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded { buffer: "meshes", requested: 3, .. }));
}

#[test]
fn test_failed_rebuild_keeps_previous_scene() {
    let mut config = BuildConfig::default();
    config.limits.max_triangles = 8;
    let mut ctx = context(config);
    let first = ctx.build().unwrap().clone();
    let bytes = ctx.buffers().triangle_bvh.as_bytes().to_vec();
    assert!(ctx.take_dirty_uniform().is_some());

    ctx.register_mesh(four_tri_mesh("extra", 10.0)).unwrap();
    assert!(ctx.build().is_err());

    assert_eq!(ctx.bvh(), Some(&first));
    assert_eq!(ctx.buffers().triangle_bvh.as_bytes(), bytes.as_slice());
    assert!(!ctx.is_uniform_dirty());
    assert_eq!(ctx.uniform().triangle_count, 8);
}

#[test]
fn test_demo_scene_parallel() {
    let config = BuildConfig {
        parallel: true,
        ..Default::default()
    };
    let mut ctx = SceneContext::new(config).unwrap();
    for mesh in demo_scene(24) {
        ctx.register_mesh(mesh).unwrap();
    }
    let bvh = ctx.build().unwrap();
    assert_eq!(bvh.mesh_bvh.len(), 23);
    let report = bvh.validate().unwrap();
    assert_eq!(report.mesh_tree.leaves, 24);

    // every world box sits inside the mesh BVH root
    let root = bvh.mesh_bvh[bvh.mesh_bvh_root as usize].aabb;
    assert!(bvh.meshes.iter().all(|m| root.contains_box(&m.world_aabb)));

    let serial = build_triangle_and_mesh_bvh(ctx.meshes(), &CpuBuilder::default(), &ctx.config().limits).unwrap();
    assert_eq!(ctx.bvh(), Some(&serial));
}

#[test]
fn test_rotated_mesh_world_box() {
    let rotated = quad_grid(
        "rotated",
        2,
        2,
        1.0,
        Mat4::from_rotation_y(std::f32::consts::FRAC_PI_4),
    );
    let meshes = vec![four_tri_mesh("plain", 0.0), rotated];
    let bvh = build_triangle_and_mesh_bvh(&meshes, &CpuBuilder::default(), &SceneLimits::default()).unwrap();

    let object = bvh.triangle_bvh[bvh.meshes[1].global_root() as usize].aabb;
    assert_eq!(object, Aabb::new(Vec3::ZERO, Vec3::new(2.0, 0.0, 2.0)));
    // (2, 0, 2) rotated 45 degrees about +Y lands on x = 2 * sqrt(2)
    let w = bvh.meshes[1].world_aabb;
    assert!((w.max.x - 2.0 * std::f32::consts::SQRT_2).abs() < 1e-4);
    assert!(w.min.z < 0.0);
}
