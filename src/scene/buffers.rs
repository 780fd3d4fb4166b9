//! Fixed-capacity structured buffers and the scene uniform.
//!
//! Host-side stand-ins for the GPU storage buffers the traversal kernel reads.
//! Capacities are fixed when the scene context is created; uploads that would
//! overflow fail before touching any buffer.

use bytemuck::{Pod, Zeroable};

use super::{MeshRecord, SceneBvh};
use crate::bvh::{GpuAabbProxy, GpuBvhNode, GpuTriangle};
use crate::config::SceneLimits;
use crate::util::{ensure_capacity, Error, Result};

/// Typed storage buffer with a fixed element capacity.
#[derive(Debug, Clone)]
pub struct StructuredBuffer<T: Pod> {
    name: &'static str,
    capacity: usize,
    count: usize,
    data: Vec<T>,
    dirty: bool,
}

impl<T: Pod> StructuredBuffer<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            count: 0,
            data: Vec::new(),
            dirty: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Elements declared by the last [`set_element_size_and_count`](Self::set_element_size_and_count).
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Declare the layout of the next upload.
    ///
    /// `element_size` must match `T` byte for byte and `count` must fit the
    /// capacity. Contents are zeroed up to `count`.
    pub fn set_element_size_and_count(&mut self, element_size: usize, count: usize) -> Result<()> {
        let expected = std::mem::size_of::<T>();
        if element_size != expected {
            return Err(Error::ElementSize {
                buffer: self.name,
                expected,
                actual: element_size,
            });
        }
        ensure_capacity(self.name, count, self.capacity)?;
        self.count = count;
        self.data.clear();
        self.data.resize(count, T::zeroed());
        self.dirty = true;
        Ok(())
    }

    /// Copy `data` into the declared range.
    pub fn set_buffer_data(&mut self, data: &[T]) -> Result<()> {
        if data.len() != self.count {
            return Err(Error::other(format!(
                "{}: {} elements written, {} declared",
                self.name,
                data.len(),
                self.count
            )));
        }
        self.data.copy_from_slice(data);
        self.dirty = true;
        Ok(())
    }

    /// Declare and fill in one step.
    pub fn upload(&mut self, data: &[T]) -> Result<()> {
        self.set_element_size_and_count(std::mem::size_of::<T>(), data.len())?;
        self.set_buffer_data(data)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Contents as raw bytes, ready for a GPU copy.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Scene-level constants read by the traversal kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SceneUniform {
    pub mesh_bvh_count: u32,
    pub triangle_bvh_count: u32,
    pub mesh_bvh_root_index: u32,
    pub triangle_count: u32,
    pub mesh_count: u32,
    pub _pad: [u32; 3],
}

/// Mesh record as stored on the GPU (176 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuMesh {
    /// Object-to-world, column-major.
    pub model: [[f32; 4]; 4],
    pub inverse_model: [[f32; 4]; 4],
    /// RGB = base color, A = metallic.
    pub base_color_metallic: [f32; 4],
    /// RGB = emission, A = roughness.
    pub emission_roughness: [f32; 4],
    pub triangle_offset: u32,
    pub triangle_count: u32,
    pub triangle_bvh_root: u32,
    pub triangle_bvh_offset: u32,
}

impl MeshRecord {
    pub fn to_gpu(&self) -> GpuMesh {
        let m = &self.material;
        GpuMesh {
            model: self.transform.to_cols_array_2d(),
            inverse_model: self.inverse_transform.to_cols_array_2d(),
            base_color_metallic: [m.base_color[0], m.base_color[1], m.base_color[2], m.metallic],
            emission_roughness: [m.emission[0], m.emission[1], m.emission[2], m.roughness],
            triangle_offset: self.triangle_offset,
            triangle_count: self.triangle_count,
            triangle_bvh_root: self.triangle_bvh_root,
            triangle_bvh_offset: self.triangle_bvh_offset,
        }
    }
}

/// All storage buffers of one scene.
#[derive(Debug, Clone)]
pub struct SceneBuffers {
    pub triangles: StructuredBuffer<GpuTriangle>,
    pub meshes: StructuredBuffer<GpuMesh>,
    pub triangle_bvh: StructuredBuffer<GpuBvhNode>,
    pub mesh_bvh: StructuredBuffer<GpuBvhNode>,
    /// Ping-pong pair used by the radix sort over mesh proxies.
    pub proxies: [StructuredBuffer<GpuAabbProxy>; 2],
}

impl SceneBuffers {
    pub fn new(limits: &SceneLimits) -> Self {
        Self {
            triangles: StructuredBuffer::new("triangles", limits.max_triangles),
            meshes: StructuredBuffer::new("meshes", limits.max_meshes),
            triangle_bvh: StructuredBuffer::new("triangle BVH", limits.max_triangle_bvh_nodes),
            mesh_bvh: StructuredBuffer::new("mesh BVH", limits.max_mesh_bvh_nodes),
            proxies: [
                StructuredBuffer::new("proxies (ping)", limits.max_meshes),
                StructuredBuffer::new("proxies (pong)", limits.max_meshes),
            ],
        }
    }

    /// Pack and upload a built scene.
    ///
    /// Every capacity is checked first, so a failed upload leaves all buffers
    /// as they were.
    #[tracing::instrument(skip_all, fields(triangles = bvh.triangles.len(), meshes = bvh.meshes.len()))]
    pub fn upload(&mut self, bvh: &SceneBvh) -> Result<()> {
        ensure_capacity(self.triangles.name, bvh.triangles.len(), self.triangles.capacity)?;
        ensure_capacity(self.meshes.name, bvh.meshes.len(), self.meshes.capacity)?;
        ensure_capacity(self.triangle_bvh.name, bvh.triangle_bvh.len(), self.triangle_bvh.capacity)?;
        ensure_capacity(self.mesh_bvh.name, bvh.mesh_bvh.len(), self.mesh_bvh.capacity)?;
        for p in &self.proxies {
            ensure_capacity(p.name, bvh.proxies.len(), p.capacity)?;
        }

        let triangles: Vec<GpuTriangle> = bvh.triangles.iter().map(|t| t.to_gpu()).collect();
        let meshes: Vec<GpuMesh> = bvh.meshes.iter().map(|m| m.to_gpu()).collect();
        let triangle_bvh: Vec<GpuBvhNode> = bvh.triangle_bvh.iter().map(|n| n.to_gpu()).collect();
        let mesh_bvh: Vec<GpuBvhNode> = bvh.mesh_bvh.iter().map(|n| n.to_gpu()).collect();
        let proxies: Vec<GpuAabbProxy> = bvh.proxies.iter().map(|p| p.to_gpu()).collect();

        self.triangles.upload(&triangles)?;
        self.meshes.upload(&meshes)?;
        self.triangle_bvh.upload(&triangle_bvh)?;
        self.mesh_bvh.upload(&mesh_bvh)?;
        self.proxies[0].upload(&proxies)?;
        self.proxies[1].set_element_size_and_count(std::mem::size_of::<GpuAabbProxy>(), proxies.len())?;
        Ok(())
    }

    /// Total bytes currently held.
    pub fn total_bytes(&self) -> usize {
        self.triangles.as_bytes().len()
            + self.meshes.as_bytes().len()
            + self.triangle_bvh.as_bytes().len()
            + self.mesh_bvh.as_bytes().len()
            + self.proxies.iter().map(|p| p.as_bytes().len()).sum::<usize>()
    }

    pub fn any_dirty(&self) -> bool {
        self.triangles.is_dirty()
            || self.meshes.is_dirty()
            || self.triangle_bvh.is_dirty()
            || self.mesh_bvh.is_dirty()
            || self.proxies.iter().any(|p| p.is_dirty())
    }
}
