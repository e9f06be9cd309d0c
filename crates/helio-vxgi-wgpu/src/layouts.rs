//! Bind group layouts of the VXGI kernels.
//!
//! Every kernel binds a single group 0; its parameter block always comes from
//! the shared uniform arena through a dynamic offset. The voxelization raster
//! adds a per-mesh group 1.

use helio_vxgi::KernelId;

pub(crate) struct KernelLayouts {
    pub parameterize: wgpu::BindGroupLayout,
    pub clear: wgpu::BindGroupLayout,
    pub render: wgpu::BindGroupLayout,
    pub aggregate: wgpu::BindGroupLayout,
    /// Shift and filter: sampled source level, storage destination level
    pub resample: wgpu::BindGroupLayout,
    pub voxelize: wgpu::BindGroupLayout,
    pub mesh: wgpu::BindGroupLayout,
}

impl KernelLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let cs = wgpu::ShaderStages::COMPUTE;
        let raster = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;

        let parameterize = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("vxgi_parameterize_bgl"),
            entries: &[bgl_storage(0, cs, true), bgl_storage(1, cs, false), bgl_uniform_dynamic(2, cs)],
        });
        let clear = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("vxgi_clear_bgl"),
            entries: &[bgl_storage(0, cs, false), bgl_uniform_dynamic(1, cs)],
        });
        let render = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("vxgi_render_bgl"),
            entries: &[
                bgl_storage(0, cs, true),
                bgl_storage(1, cs, true),
                bgl_storage(2, cs, true),
                bgl_storage(3, cs, false),
                bgl_uniform_dynamic(4, cs),
            ],
        });
        let aggregate = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("vxgi_aggregate_bgl"),
            entries: &[bgl_storage(0, cs, true), bgl_storage_tex3d_write(1, cs), bgl_uniform_dynamic(2, cs)],
        });
        let resample = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("vxgi_resample_bgl"),
            entries: &[bgl_tex3d(0, cs), bgl_storage_tex3d_write(1, cs), bgl_uniform_dynamic(2, cs)],
        });
        let voxelize = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("vxgi_voxelize_bgl"),
            entries: &[
                bgl_uniform_dynamic(0, raster),
                bgl_storage(1, wgpu::ShaderStages::FRAGMENT, false),
                bgl_storage(2, wgpu::ShaderStages::FRAGMENT, false),
            ],
        });
        let mesh = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("vxgi_mesh_bgl"),
            entries: &[bgl_uniform(0, raster)],
        });

        Self { parameterize, clear, render, aggregate, resample, voxelize, mesh }
    }

    pub fn kernel(&self, id: KernelId) -> &wgpu::BindGroupLayout {
        match id {
            KernelId::Parameterize => &self.parameterize,
            KernelId::Clear => &self.clear,
            KernelId::Render(_) => &self.render,
            KernelId::Aggregate(_) => &self.aggregate,
            KernelId::Shift(_) | KernelId::Filter(_) => &self.resample,
        }
    }
}

// ======================== Helpers ========================

fn bgl_uniform(binding: u32, vis: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry { binding, visibility: vis,
        ty: wgpu::BindingType::Buffer { ty: wgpu::BufferBindingType::Uniform, has_dynamic_offset: false, min_binding_size: None },
        count: None }
}
fn bgl_uniform_dynamic(binding: u32, vis: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry { binding, visibility: vis,
        ty: wgpu::BindingType::Buffer { ty: wgpu::BufferBindingType::Uniform, has_dynamic_offset: true, min_binding_size: None },
        count: None }
}
fn bgl_storage(binding: u32, vis: wgpu::ShaderStages, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry { binding, visibility: vis,
        ty: wgpu::BindingType::Buffer { ty: wgpu::BufferBindingType::Storage { read_only }, has_dynamic_offset: false, min_binding_size: None },
        count: None }
}
fn bgl_storage_tex3d_write(binding: u32, vis: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry { binding, visibility: vis,
        ty: wgpu::BindingType::StorageTexture { access: wgpu::StorageTextureAccess::WriteOnly, format: wgpu::TextureFormat::Rgba16Float, view_dimension: wgpu::TextureViewDimension::D3 },
        count: None }
}
fn bgl_tex3d(binding: u32, vis: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry { binding, visibility: vis,
        ty: wgpu::BindingType::Texture { sample_type: wgpu::TextureSampleType::Float { filterable: false }, view_dimension: wgpu::TextureViewDimension::D3, multisampled: false },
        count: None }
}
