//! Config and scene files on disk.

use lbvh_scene::prelude::*;
use lbvh_scene::scene::SceneFile;

#[test]
fn test_config_save_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let mut config = BuildConfig::default();
    config.backend = BackendKind::GpuMirror;
    config.parallel = true;
    config.radix_bits = 8;
    config.limits.max_meshes = 64;
    config.save(&path).unwrap();

    let loaded = BuildConfig::load(&path).unwrap();
    assert_eq!(loaded, config);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"gpu_mirror\""));
}

#[test]
fn test_config_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = BuildConfig::load(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_invalid_config_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "limits": { "max_triangles": 1 } }"#).unwrap();
    assert!(matches!(BuildConfig::load(&path), Err(Error::Config(_))));
}

#[test]
fn test_scene_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.json");
    let meshes = demo_scene(5);

    SceneFile::from_meshes(&meshes).save(&path).unwrap();
    let loaded = SceneFile::load(&path).unwrap().into_meshes();
    assert_eq!(loaded, meshes);

    let mut ctx = SceneContext::new(BuildConfig::default()).unwrap();
    for m in loaded {
        ctx.register_mesh(m).unwrap();
    }
    assert_eq!(ctx.build().unwrap().meshes.len(), 5);
}
