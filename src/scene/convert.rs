//! Mesh to triangle conversion, scene files and procedural meshes.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{Material, MeshDesc};
use crate::bvh::Triangle;
use crate::util::{Aabb, Error, Mat4, Quat, Result, Vec3};

/// Extract object-space triangles from an indexed mesh.
///
/// Every triangle is tagged with `mesh_index`. A face referencing a missing
/// vertex fails the whole mesh.
pub fn convert_to_triangles(mesh: &MeshDesc, mesh_index: u32) -> Result<Vec<Triangle>> {
    if mesh.indices.len() % 3 != 0 {
        return Err(Error::invalid_mesh(format!(
            "'{}': index count {} is not a multiple of 3",
            mesh.name,
            mesh.indices.len()
        )));
    }

    let vertex = |i: u32| {
        mesh.vertices.get(i as usize).copied().ok_or_else(|| {
            Error::invalid_mesh(format!(
                "'{}': index {i} out of range ({} vertices)",
                mesh.name,
                mesh.vertices.len()
            ))
        })
    };

    mesh.indices
        .chunks_exact(3)
        .map(|c| Ok(Triangle::new(vertex(c[0])?, vertex(c[1])?, vertex(c[2])?, mesh_index)))
        .collect()
}

/// Object-space bounds of the vertices referenced by `triangles`.
pub fn triangle_bounds(triangles: &[Triangle]) -> Aabb {
    triangles.iter().fold(Aabb::EMPTY, |acc, t| acc.union(&t.aabb()))
}

// ============================================================================
// Scene file
// ============================================================================

/// One mesh in a scene JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshEntry {
    #[serde(default)]
    pub name: String,
    pub vertices: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    /// Column-major object-to-world matrix; identity when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<[f32; 16]>,
    #[serde(default)]
    pub material: Material,
}

/// Scene description consumed by the CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneFile {
    pub meshes: Vec<MeshEntry>,
}

impl SceneFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn from_meshes(meshes: &[MeshDesc]) -> Self {
        let meshes = meshes
            .iter()
            .map(|m| MeshEntry {
                name: m.name.clone(),
                vertices: m.vertices.iter().map(|v| v.to_array()).collect(),
                indices: m.indices.clone(),
                transform: (m.transform != Mat4::IDENTITY).then(|| m.transform.to_cols_array()),
                material: m.material.clone(),
            })
            .collect();
        Self { meshes }
    }

    pub fn into_meshes(self) -> Vec<MeshDesc> {
        self.meshes
            .into_iter()
            .enumerate()
            .map(|(i, e)| MeshDesc {
                name: if e.name.is_empty() { format!("mesh{i}") } else { e.name },
                vertices: e.vertices.into_iter().map(Vec3::from).collect(),
                indices: e.indices,
                transform: e.transform.map_or(Mat4::IDENTITY, |m| Mat4::from_cols_array(&m)),
                material: e.material,
            })
            .collect()
    }
}

// ============================================================================
// Procedural meshes
// ============================================================================

/// Axis-aligned box of half size `half` around the origin, 12 triangles.
pub fn box_mesh(name: impl Into<String>, half: Vec3, transform: Mat4) -> MeshDesc {
    let h = half;
    let vertices = vec![
        Vec3::new(-h.x, -h.y, -h.z),
        Vec3::new(h.x, -h.y, -h.z),
        Vec3::new(h.x, h.y, -h.z),
        Vec3::new(-h.x, h.y, -h.z),
        Vec3::new(-h.x, -h.y, h.z),
        Vec3::new(h.x, -h.y, h.z),
        Vec3::new(h.x, h.y, h.z),
        Vec3::new(-h.x, h.y, h.z),
    ];
    #[rustfmt::skip]
    let indices = vec![
        0, 2, 1, 0, 3, 2, // -z
        4, 5, 6, 4, 6, 7, // +z
        0, 1, 5, 0, 5, 4, // -y
        3, 7, 6, 3, 6, 2, // +y
        0, 4, 7, 0, 7, 3, // -x
        1, 2, 6, 1, 6, 5, // +x
    ];
    MeshDesc {
        name: name.into(),
        vertices,
        indices,
        transform,
        material: Material::default(),
    }
}

/// Flat grid in the XZ plane with `cells_x * cells_z` quads (two triangles each).
pub fn quad_grid(name: impl Into<String>, cells_x: u32, cells_z: u32, cell_size: f32, transform: Mat4) -> MeshDesc {
    let mut vertices = Vec::with_capacity(((cells_x + 1) * (cells_z + 1)) as usize);
    for z in 0..=cells_z {
        for x in 0..=cells_x {
            vertices.push(Vec3::new(x as f32 * cell_size, 0.0, z as f32 * cell_size));
        }
    }

    let row = cells_x + 1;
    let mut indices = Vec::with_capacity((cells_x * cells_z * 6) as usize);
    for z in 0..cells_z {
        for x in 0..cells_x {
            let a = z * row + x;
            let (b, c, d) = (a + 1, a + row, a + row + 1);
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }

    MeshDesc {
        name: name.into(),
        vertices,
        indices,
        transform,
        material: Material::default(),
    }
}

/// `count` meshes on a ring, alternating boxes and small grids, each with its
/// own rotation so world boxes differ from object boxes.
pub fn demo_scene(count: usize) -> Vec<MeshDesc> {
    let radius = 2.0 + count as f32 * 0.5;
    (0..count)
        .map(|i| {
            let angle = i as f32 / count.max(1) as f32 * std::f32::consts::TAU;
            let position = Vec3::new(angle.cos() * radius, (i % 3) as f32, angle.sin() * radius);
            let transform = Mat4::from_rotation_translation(Quat::from_rotation_y(angle), position);
            let mut mesh = if i % 2 == 0 {
                box_mesh(format!("box{i}"), Vec3::new(0.5, 0.25 + 0.1 * (i % 4) as f32, 0.5), transform)
            } else {
                quad_grid(format!("grid{i}"), 3, 2, 0.4, transform)
            };
            let t = i as f32 / count.max(1) as f32;
            mesh.material.base_color = [0.2 + 0.6 * t, 0.5, 0.8 - 0.6 * t];
            mesh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_box() {
        let mesh = box_mesh("b", Vec3::ONE, Mat4::IDENTITY);
        let tris = convert_to_triangles(&mesh, 3).unwrap();
        assert_eq!(tris.len(), 12);
        assert!(tris.iter().all(|t| t.mesh_index == 3));
        let b = triangle_bounds(&tris);
        assert_eq!(b, Aabb::new(Vec3::splat(-1.0), Vec3::ONE));
    }

    #[test]
    fn test_convert_rejects_bad_indices() {
        let mut mesh = quad_grid("g", 1, 1, 1.0, Mat4::IDENTITY);
        mesh.indices.push(0);
        assert!(matches!(convert_to_triangles(&mesh, 0), Err(Error::InvalidMesh(_))));

        let mut mesh = quad_grid("g", 1, 1, 1.0, Mat4::IDENTITY);
        mesh.indices[4] = 99;
        let err = convert_to_triangles(&mesh, 0).unwrap_err();
        assert!(err.to_string().contains("99"));
    }

    #[test]
    fn test_quad_grid_counts() {
        let mesh = quad_grid("g", 2, 1, 0.5, Mat4::IDENTITY);
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.indices.len(), 12);
        let tris = convert_to_triangles(&mesh, 0).unwrap();
        assert_eq!(tris.len(), 4);
        let b = triangle_bounds(&tris);
        assert_eq!(b.max, Vec3::new(1.0, 0.0, 0.5));
    }

    #[test]
    fn test_scene_file_json() {
        let json = r#"{
            "meshes": [
                { "vertices": [[0,0,0],[1,0,0],[0,1,0]], "indices": [0,1,2] },
                { "name": "moved", "vertices": [[0,0,0],[1,0,0],[0,1,0]], "indices": [0,1,2],
                  "transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, 5,0,0,1],
                  "material": { "base_color": [1.0, 0.0, 0.0] } }
            ]
        }"#;
        let meshes = SceneFile::from_json_str(json).unwrap().into_meshes();
        assert_eq!(meshes[0].name, "mesh0");
        assert_eq!(meshes[0].transform, Mat4::IDENTITY);
        assert_eq!(meshes[1].transform.w_axis.x, 5.0);
        assert_eq!(meshes[1].material.base_color, [1.0, 0.0, 0.0]);
        assert_eq!(meshes[1].material.roughness, Material::default().roughness);
    }

    #[test]
    fn test_demo_scene_is_deterministic() {
        let a = demo_scene(5);
        let b = demo_scene(5);
        assert_eq!(a.len(), 5);
        assert_eq!(SceneFile::from_meshes(&a), SceneFile::from_meshes(&b));
    }
}
