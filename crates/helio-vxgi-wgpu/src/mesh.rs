//! Triangle meshes drawn by the voxelization raster

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use helio_vxgi::{Aabb, PassTag};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct VoxelVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl VoxelVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];

    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self { position: position.to_array(), normal: normal.to_array() }
    }

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<VoxelVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Surface response of a whole mesh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshMaterial {
    /// Linear albedo, w = opacity
    pub albedo: Vec4,
    pub emission: Vec3,
}

impl MeshMaterial {
    pub fn new(albedo: Vec4) -> Self {
        Self { albedo, emission: Vec3::ZERO }
    }

    pub fn with_emission(mut self, emission: Vec3) -> Self {
        self.emission = emission;
        self
    }
}

impl Default for MeshMaterial {
    fn default() -> Self {
        Self::new(Vec4::ONE)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct MeshUniforms {
    pub model: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
    pub albedo: [f32; 4],
    pub emission: [f32; 4],
}

impl MeshUniforms {
    pub fn new(transform: Mat4, material: &MeshMaterial) -> Self {
        Self {
            model: transform.to_cols_array_2d(),
            normal_matrix: transform.inverse().transpose().to_cols_array_2d(),
            albedo: material.albedo.to_array(),
            emission: material.emission.extend(0.0).to_array(),
        }
    }
}

/// Per-raster-pass parameters of the voxelization shader
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct RasterUniforms {
    pub world_to_voxel: [[f32; 4]; 4],
    /// resolution, cascade, capacity, projection axis
    pub params: [u32; 4],
}

pub(crate) struct VoxelMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
    pub uniforms: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub local_bounds: Option<Aabb>,
    pub transform: Mat4,
    pub material: MeshMaterial,
    pub layer_mask: u32,
    pub pass_tags: Vec<PassTag>,
}

impl VoxelMesh {
    pub fn draws_in(&self, pass_tag: PassTag, cull_mask: u32) -> bool {
        self.index_count > 0 && self.layer_mask & cull_mask != 0 && self.pass_tags.contains(&pass_tag)
    }

    /// World-space bounds of the transformed mesh
    pub fn world_bounds(&self) -> Option<Aabb> {
        let local = self.local_bounds?;
        let corners = (0..8).map(|i| {
            let corner = Vec3::new(
                if i & 1 == 0 { local.min.x } else { local.max.x },
                if i & 2 == 0 { local.min.y } else { local.max.y },
                if i & 4 == 0 { local.min.z } else { local.max.z },
            );
            self.transform.transform_point3(corner)
        });
        Aabb::from_points(corners)
    }
}
