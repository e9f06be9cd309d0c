//! wgpu implementation of the Helio VXGI backend contract.
//!
//! Commands record into one encoder that is submitted on
//! [`GpuBackend::submit`]. Kernel parameters live in a uniform arena bound with
//! dynamic offsets, and geometry is registered as indexed triangle meshes that
//! the voxelization raster draws once per projection axis.

mod arena;
mod layouts;
mod mesh;
mod pipelines;
mod resources;

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::Pod;
use glam::Mat4;
use wgpu::util::DeviceExt;

use helio_vxgi::{
    Aabb, BackendCapabilities, BufferDesc, BufferHandle, BufferKind, ComputeKernel, Error, GeometryHandle, GpuBackend,
    PassTag, RasterPass, Readback, Result, TextureDesc, TextureFormat, TextureHandle,
};
use helio_vxgi::uniforms::{DispatchParams, FilterParams, ShiftParams, SlabParams, VolumeUniforms};

use arena::ParamArena;
use layouts::KernelLayouts;
use mesh::{MeshUniforms, RasterUniforms, VoxelMesh};
use pipelines::{KernelPipelines, RASTER_FORMAT};
use resources::{align_to, buffer_usage, texture_format, GpuBuffer, GpuTexture, ResourceRegistry};

pub use mesh::{MeshMaterial, VoxelVertex};

/// Parameter slots available between two submissions
const ARENA_SLOTS: u32 = 256;

/// Texture row pitch required by buffer copies
const COPY_ROW_ALIGNMENT: u64 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64;

enum Launch<'a> {
    Direct([u32; 3]),
    Indirect(&'a wgpu::Buffer, u64),
}

pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    capabilities: BackendCapabilities,
    /// MSAA counts the voxelization target supports, ascending
    sample_counts: Vec<u32>,
    resources: ResourceRegistry,
    layouts: KernelLayouts,
    pipelines: KernelPipelines,
    arena: ParamArena,
    encoder: Option<wgpu::CommandEncoder>,
    meshes: HashMap<GeometryHandle, VoxelMesh>,
    next_mesh: u64,
    raster_targets: HashMap<(u32, u32), wgpu::TextureView>,
}

impl WgpuBackend {
    /// Wrap an existing device. Only the sample counts WebGPU guarantees are
    /// assumed for the voxelization target.
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, downlevel: wgpu::DownlevelFlags) -> Self {
        Self::with_sample_counts(device, queue, downlevel, vec![1, 4])
    }

    pub fn from_adapter(adapter: &wgpu::Adapter, device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let flags = adapter.get_texture_format_features(RASTER_FORMAT).flags;
        let sample_counts = [1, 2, 4, 8, 16]
            .into_iter()
            .filter(|&count| count == 1 || flags.sample_count_supported(count))
            .collect();
        let downlevel = adapter.get_downlevel_capabilities().flags;
        Self::with_sample_counts(device, queue, downlevel, sample_counts)
    }

    fn with_sample_counts(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        downlevel: wgpu::DownlevelFlags,
        sample_counts: Vec<u32>,
    ) -> Self {
        let limits = device.limits();
        let capabilities = BackendCapabilities {
            supports_indirect_dispatch: downlevel.contains(wgpu::DownlevelFlags::INDIRECT_EXECUTION),
            max_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
            max_buffer_size: limits.max_buffer_size.min(limits.max_storage_buffer_binding_size as u64),
            max_texture_dimension_3d: limits.max_texture_dimension_3d,
        };
        log::info!("VXGI wgpu backend: {:?}, raster MSAA {:?}", capabilities, sample_counts);

        let layouts = KernelLayouts::new(&device);
        let pipelines = KernelPipelines::new(device.clone());
        let arena = ParamArena::new(&device, ARENA_SLOTS);

        Self {
            device,
            queue,
            capabilities,
            sample_counts,
            resources: ResourceRegistry::default(),
            layouts,
            pipelines,
            arena,
            encoder: None,
            meshes: HashMap::new(),
            next_mesh: 1,
            raster_targets: HashMap::new(),
        }
    }

    /// Open the default adapter and device
    pub async fn request() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| Error::Unsupported("no compatible GPU adapter".into()))?;
        log::info!("Using adapter: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("VXGI Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        Ok(Self::from_adapter(&adapter, Arc::new(device), Arc::new(queue)))
    }

    /// Blocking [`WgpuBackend::request`]
    pub fn headless() -> Result<Self> {
        pollster::block_on(Self::request())
    }

    /// Report indirect dispatch as unavailable, forcing the fallback path
    pub fn without_indirect_dispatch(mut self) -> Self {
        self.capabilities.supports_indirect_dispatch = false;
        self
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Texture view of a radiance level, for binding in lighting passes
    pub fn texture_view(&self, texture: TextureHandle) -> Result<&wgpu::TextureView> {
        Ok(&self.resources.texture(texture)?.view)
    }

    pub fn live_buffers(&self) -> usize {
        self.resources.live_buffers()
    }

    pub fn live_textures(&self) -> usize {
        self.resources.live_textures()
    }

    // ======================== Meshes ========================

    /// Register a mesh drawn by the voxelization pass
    pub fn register_mesh(
        &mut self,
        vertices: &[VoxelVertex],
        indices: &[u32],
        material: MeshMaterial,
        layer_mask: u32,
    ) -> GeometryHandle {
        let handle = GeometryHandle(self.next_mesh);
        self.next_mesh += 1;

        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("vxgi_mesh_vertices"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("vxgi_mesh_indices"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        let uniforms = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("vxgi_mesh_uniforms"),
            contents: bytemuck::bytes_of(&MeshUniforms::new(Mat4::IDENTITY, &material)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("vxgi_mesh_bg"),
            layout: &self.layouts.mesh,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: uniforms.as_entire_binding() }],
        });

        let local_bounds = Aabb::from_points(vertices.iter().map(|v| glam::Vec3::from_array(v.position)));
        log::debug!("Registered mesh {:?}: {} vertices, {} indices", handle, vertices.len(), indices.len());

        self.meshes.insert(
            handle,
            VoxelMesh {
                vertex_buffer,
                index_buffer,
                index_count: indices.len() as u32,
                uniforms,
                bind_group,
                local_bounds,
                transform: Mat4::IDENTITY,
                material,
                layer_mask,
                pass_tags: vec![PassTag::VOXELIZATION],
            },
        );
        handle
    }

    pub fn set_mesh_transform(&mut self, handle: GeometryHandle, transform: Mat4) -> Result<()> {
        let mesh = self
            .meshes
            .get_mut(&handle)
            .ok_or_else(|| Error::UnknownResource(format!("{:?}", handle)))?;
        mesh.transform = transform;
        self.queue
            .write_buffer(&mesh.uniforms, 0, bytemuck::bytes_of(&MeshUniforms::new(transform, &mesh.material)));
        Ok(())
    }

    /// Replace the render pass tags whose material passes draw this mesh
    pub fn set_mesh_pass_tags(&mut self, handle: GeometryHandle, pass_tags: Vec<PassTag>) -> Result<()> {
        let mesh = self
            .meshes
            .get_mut(&handle)
            .ok_or_else(|| Error::UnknownResource(format!("{:?}", handle)))?;
        mesh.pass_tags = pass_tags;
        Ok(())
    }

    pub fn remove_mesh(&mut self, handle: GeometryHandle) {
        self.meshes.remove(&handle);
    }

    /// World-space bounds, for registering the mesh with a culling provider
    pub fn mesh_bounds(&self, handle: GeometryHandle) -> Option<Aabb> {
        self.meshes.get(&handle)?.world_bounds()
    }

    // ======================== Recording ========================

    /// Submit recorded work and recycle the parameter arena
    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            log::trace!("Submitting VXGI commands ({} parameter slots)", self.arena.used());
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        self.arena.reset();
    }

    /// Stage a parameter block, flushing once if the arena is full
    fn stage<T: Pod>(&mut self, value: &T) -> Result<u32> {
        if let Some(offset) = self.arena.push(&self.queue, value) {
            return Ok(offset);
        }
        self.flush();
        self.arena
            .push(&self.queue, value)
            .ok_or_else(|| Error::Backend("parameter arena has no slots".into()))
    }

    fn stage_kernel_params(&mut self, kernel: &ComputeKernel) -> Result<u32> {
        match kernel {
            ComputeKernel::Parameterize { params, .. } => self.stage(params),
            ComputeKernel::Clear { slab, .. } | ComputeKernel::Aggregate { slab, .. } => self.stage(slab),
            ComputeKernel::Render { uniforms, .. } => self.stage(uniforms),
            ComputeKernel::Shift { params, .. } => self.stage(params),
            ComputeKernel::Filter { params, .. } => self.stage(params),
        }
    }

    fn storage_view(&self, texture: TextureHandle) -> Result<&wgpu::TextureView> {
        let texture = self.resources.texture(texture)?;
        if texture.desc.format != TextureFormat::Rgba16Float {
            return Err(Error::Unsupported(format!(
                "storage writes to {:?} texture '{}'",
                texture.desc.format, texture.desc.label
            )));
        }
        Ok(&texture.view)
    }

    fn buffer_entry(&self, binding: u32, handle: BufferHandle) -> Result<wgpu::BindGroupEntry<'_>> {
        Ok(wgpu::BindGroupEntry { binding, resource: self.resources.buffer(handle)?.buffer.as_entire_binding() })
    }

    fn sampled_entry(&self, binding: u32, handle: TextureHandle) -> Result<wgpu::BindGroupEntry<'_>> {
        let view = &self.resources.texture(handle)?.view;
        Ok(wgpu::BindGroupEntry { binding, resource: wgpu::BindingResource::TextureView(view) })
    }

    fn storage_entry(&self, binding: u32, handle: TextureHandle) -> Result<wgpu::BindGroupEntry<'_>> {
        let view = self.storage_view(handle)?;
        Ok(wgpu::BindGroupEntry { binding, resource: wgpu::BindingResource::TextureView(view) })
    }

    fn params_entry<T: Pod>(&self, binding: u32) -> wgpu::BindGroupEntry<'_> {
        wgpu::BindGroupEntry { binding, resource: self.arena.binding::<T>() }
    }

    fn kernel_bind_group(&self, kernel: &ComputeKernel) -> Result<wgpu::BindGroup> {
        let entries = match *kernel {
            ComputeKernel::Parameterize { counter, args, .. } => vec![
                self.buffer_entry(0, counter)?,
                self.buffer_entry(1, args)?,
                self.params_entry::<DispatchParams>(2),
            ],
            ComputeKernel::Clear { scratch, .. } => {
                vec![self.buffer_entry(0, scratch)?, self.params_entry::<SlabParams>(1)]
            }
            ComputeKernel::Render { fragments, counter, lights, scratch, .. } => vec![
                self.buffer_entry(0, fragments)?,
                self.buffer_entry(1, counter)?,
                self.buffer_entry(2, lights)?,
                self.buffer_entry(3, scratch)?,
                self.params_entry::<VolumeUniforms>(4),
            ],
            ComputeKernel::Aggregate { scratch, target, .. } => vec![
                self.buffer_entry(0, scratch)?,
                self.storage_entry(1, target)?,
                self.params_entry::<SlabParams>(2),
            ],
            ComputeKernel::Shift { source, target, .. } => vec![
                self.sampled_entry(0, source)?,
                self.storage_entry(1, target)?,
                self.params_entry::<ShiftParams>(2),
            ],
            ComputeKernel::Filter { source, target, .. } => vec![
                self.sampled_entry(0, source)?,
                self.storage_entry(1, target)?,
                self.params_entry::<FilterParams>(2),
            ],
        };

        let id = kernel.id();
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(id.entry_point()),
            layout: self.layouts.kernel(id),
            entries: &entries,
        }))
    }

    fn record_kernel(&mut self, kernel: &ComputeKernel, args: Option<(BufferHandle, u64)>, groups: [u32; 3]) -> Result<()> {
        let id = kernel.id();
        let offset = self.stage_kernel_params(kernel)?;
        let pipeline = self.pipelines.compute(&self.layouts, id);
        let bind_group = self.kernel_bind_group(kernel)?;

        let launch = match args {
            Some((handle, args_offset)) => Launch::Indirect(&self.resources.buffer(handle)?.buffer, args_offset),
            None => Launch::Direct(groups),
        };

        let encoder = encoder(&self.device, &mut self.encoder);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(id.entry_point()),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[offset]);
        match launch {
            Launch::Direct([x, y, z]) => pass.dispatch_workgroups(x, y, z),
            Launch::Indirect(buffer, args_offset) => pass.dispatch_workgroups_indirect(buffer, args_offset),
        }
        Ok(())
    }

    /// Largest supported MSAA count not above `requested`
    fn raster_samples(&self, requested: u32) -> u32 {
        self.sample_counts
            .iter()
            .copied()
            .filter(|&count| count <= requested.max(1))
            .max()
            .unwrap_or(1)
    }

    fn ensure_raster_target(&mut self, size: u32, samples: u32) {
        self.raster_targets.entry((size, samples)).or_insert_with(|| {
            log::debug!("Creating {}x{} voxelization target ({}x MSAA)", size, size, samples);
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("vxgi_raster_target"),
                size: wgpu::Extent3d { width: size, height: size, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: samples,
                dimension: wgpu::TextureDimension::D2,
                format: RASTER_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            texture.create_view(&wgpu::TextureViewDescriptor::default())
        });
    }

    /// Run `create` inside validation and out-of-memory error scopes
    fn scoped<T>(&self, label: &str, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        match validation.or(out_of_memory) {
            Some(error) => Err(Error::allocation(label, error.to_string())),
            None => Ok(value),
        }
    }
}

/// Copy `size` bytes into a mappable buffer and wait for the host view
fn map_read(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    size: u64,
    copy: impl FnOnce(&mut wgpu::CommandEncoder, &wgpu::Buffer),
) -> Result<Vec<u8>> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("vxgi_readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("vxgi_readback") });
    copy(&mut encoder, &staging);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|_| Error::Backend("readback channel closed".into()))?
        .map_err(|e| Error::Backend(e.to_string()))?;

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

/// Lazily opened encoder of the current submission
fn encoder<'a>(device: &wgpu::Device, slot: &'a mut Option<wgpu::CommandEncoder>) -> &'a mut wgpu::CommandEncoder {
    slot.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("vxgi_commands") })
    })
}

impl GpuBackend for WgpuBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn allocate_texture_3d(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        let limit = self.capabilities.max_texture_dimension_3d;
        if desc.extent.iter().any(|&e| e == 0 || e > limit) {
            return Err(Error::allocation(&desc.label, format!("extent {:?} outside 1..={}", desc.extent, limit)));
        }

        let [width, height, depth] = desc.extent;
        let texture = self.scoped(&desc.label, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(desc.label.as_str()),
                size: wgpu::Extent3d { width, height, depth_or_array_layers: depth },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D3,
                format: texture_format(desc.format),
                usage: wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.resources.insert_texture(GpuTexture { texture, view, desc: desc.clone() }))
    }

    fn allocate_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        let size = desc.kind.byte_size();
        if size > self.capabilities.max_buffer_size {
            return Err(Error::allocation(&desc.label, format!("{} bytes exceeds max buffer size", size)));
        }

        // Zero-sized storage cannot be bound
        let padded = align_to(size.max(4), wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.scoped(&desc.label, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label.as_str()),
                size: padded,
                usage: buffer_usage(desc.kind),
                mapped_at_creation: false,
            })
        })?;
        Ok(self.resources.insert_buffer(&desc.label, GpuBuffer { buffer, kind: desc.kind }))
    }

    fn release_texture(&mut self, handle: TextureHandle) {
        if self.resources.remove_texture(handle).is_some() {
            log::debug!("Released texture {:?}", handle);
        }
    }

    fn release_buffer(&mut self, handle: BufferHandle) {
        if self.resources.remove_buffer(handle).is_some() {
            log::debug!("Released buffer {:?}", handle);
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        if offset % 4 != 0 || data.len() % 4 != 0 {
            return Err(Error::Backend("buffer writes must be 4-byte aligned".into()));
        }
        let target = &self.resources.buffer(buffer)?.buffer;
        if offset + data.len() as u64 > target.size() {
            return Err(Error::Backend(format!("write of {} bytes at {} overruns buffer", data.len(), offset)));
        }
        if data.is_empty() {
            return Ok(());
        }

        // Staged through the encoder so the write lands in recording order
        let staging = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("vxgi_upload"),
            contents: data,
            usage: wgpu::BufferUsages::COPY_SRC,
        });
        encoder(&self.device, &mut self.encoder).copy_buffer_to_buffer(&staging, 0, target, offset, data.len() as u64);
        Ok(())
    }

    fn dispatch(&mut self, kernel: &ComputeKernel, groups: [u32; 3]) -> Result<()> {
        let limit = self.capabilities.max_workgroups_per_dimension;
        if groups.iter().any(|&g| g > limit) {
            return Err(Error::Backend(format!("dispatch {:?} exceeds {} groups per dimension", groups, limit)));
        }
        self.record_kernel(kernel, None, groups)
    }

    fn dispatch_indirect(&mut self, kernel: &ComputeKernel, args: BufferHandle, offset: u64) -> Result<()> {
        if !self.capabilities.supports_indirect_dispatch {
            return Err(Error::Unsupported("indirect dispatch".into()));
        }
        if !matches!(self.resources.buffer(args)?.kind, BufferKind::IndirectArgs) {
            return Err(Error::Backend(format!("{:?} is not an indirect argument buffer", args)));
        }
        self.record_kernel(kernel, Some((args, offset)), [0; 3])
    }

    fn rasterize(&mut self, pass: &RasterPass<'_>) -> Result<()> {
        let draws: Vec<GeometryHandle> = pass
            .geometry
            .iter()
            .copied()
            .filter(|handle| match self.meshes.get(handle) {
                Some(mesh) => mesh.draws_in(pass.pass_tag, pass.cull_mask),
                None => {
                    log::warn!("Skipping unknown geometry {:?}", handle);
                    false
                }
            })
            .collect();
        if draws.is_empty() {
            return Ok(());
        }

        let samples = self.raster_samples(pass.samples);
        let size = (pass.resolution - pass.resolution % 2).max(1);
        let pipeline = self.pipelines.raster(&self.layouts, samples);
        self.ensure_raster_target(size, samples);

        let mut offsets = [0u32; 3];
        for (axis, offset) in offsets.iter_mut().enumerate() {
            *offset = self.stage(&RasterUniforms {
                world_to_voxel: pass.world_to_voxel.to_cols_array_2d(),
                params: [pass.resolution, pass.cascade, pass.capacity, axis as u32],
            })?;
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("vxgi_voxelize_bg"),
            layout: &self.layouts.voxelize,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: self.arena.binding::<RasterUniforms>() },
                wgpu::BindGroupEntry { binding: 1, resource: self.resources.buffer(pass.fragments)?.buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: self.resources.buffer(pass.counter)?.buffer.as_entire_binding() },
            ],
        });
        let target = self
            .raster_targets
            .get(&(size, samples))
            .ok_or_else(|| Error::Backend("voxelization target missing".into()))?;

        let encoder = encoder(&self.device, &mut self.encoder);
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("vxgi_voxelize"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT), store: wgpu::StoreOp::Discard },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_pipeline(&pipeline);

        for offset in offsets {
            render_pass.set_bind_group(0, &bind_group, &[offset]);
            for mesh in draws.iter().filter_map(|handle| self.meshes.get(handle)) {
                render_pass.set_bind_group(1, &mesh.bind_group, &[]);
                render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                render_pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
        }

        log::trace!("Voxelized cascade {} with {} meshes", pass.cascade, draws.len());
        Ok(())
    }

    fn copy_counter_value(&mut self, counter: BufferHandle, dst: BufferHandle, dst_offset: u64) -> Result<()> {
        let source = self.resources.buffer(counter)?;
        let BufferKind::Counter { slots } = source.kind else {
            return Err(Error::Backend(format!("{:?} is not a counter buffer", counter)));
        };
        let size = 4 * slots as u64;
        let target = self.resources.buffer(dst)?;
        if dst_offset + size > target.kind.byte_size() {
            return Err(Error::Backend("counter copy overruns destination".into()));
        }
        encoder(&self.device, &mut self.encoder).copy_buffer_to_buffer(&source.buffer, 0, &target.buffer, dst_offset, size);
        Ok(())
    }

    fn reset_counter(&mut self, counter: BufferHandle) -> Result<()> {
        let buffer = &self.resources.buffer(counter)?.buffer;
        encoder(&self.device, &mut self.encoder).clear_buffer(buffer, 0, None);
        Ok(())
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<()> {
        let source = self.resources.texture(src)?;
        let target = self.resources.texture(dst)?;
        if source.desc.extent != target.desc.extent || source.desc.format != target.desc.format {
            return Err(Error::Backend(format!(
                "texture copy {:?} -> {:?} extent or format mismatch",
                source.desc.extent, target.desc.extent
            )));
        }
        let [width, height, depth] = source.desc.extent;
        encoder(&self.device, &mut self.encoder).copy_texture_to_texture(
            source.texture.as_image_copy(),
            target.texture.as_image_copy(),
            wgpu::Extent3d { width, height, depth_or_array_layers: depth },
        );
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        self.flush();
        Ok(())
    }
}

impl Readback for WgpuBackend {
    fn read_buffer(&mut self, buffer: BufferHandle) -> Result<Vec<u8>> {
        self.flush();
        let source = self.resources.buffer(buffer)?;
        let padded = source.buffer.size();

        let mut bytes = map_read(&self.device, &self.queue, padded, |encoder, staging| {
            encoder.copy_buffer_to_buffer(&source.buffer, 0, staging, 0, padded);
        })?;
        bytes.truncate(source.kind.byte_size() as usize);
        Ok(bytes)
    }

    fn read_texture(&mut self, texture: TextureHandle) -> Result<Vec<[f32; 4]>> {
        self.flush();
        let source = self.resources.texture(texture)?;

        let [width, height, depth] = source.desc.extent;
        let texel_size = source.desc.format.bytes_per_texel();
        let row_bytes = width as u64 * texel_size;
        let row_pitch = align_to(row_bytes, COPY_ROW_ALIGNMENT);
        let size = row_pitch * height as u64 * depth as u64;

        let bytes = map_read(&self.device, &self.queue, size, |encoder, staging| {
            encoder.copy_texture_to_buffer(
                source.texture.as_image_copy(),
                wgpu::ImageCopyBuffer {
                    buffer: staging,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(row_pitch as u32),
                        rows_per_image: Some(height),
                    },
                },
                wgpu::Extent3d { width, height, depth_or_array_layers: depth },
            );
        })?;

        let mut texels = Vec::with_capacity(width as usize * height as usize * depth as usize);
        for row in bytes.chunks_exact(row_pitch as usize) {
            for texel in row[..row_bytes as usize].chunks_exact(texel_size as usize) {
                texels.push(decode_texel(source.desc.format, texel));
            }
        }
        Ok(texels)
    }
}

fn decode_texel(format: TextureFormat, bytes: &[u8]) -> [f32; 4] {
    let mut texel = [0.0; 4];
    match format {
        TextureFormat::Rgba16Float => {
            for (channel, half) in texel.iter_mut().zip(bytes.chunks_exact(2)) {
                *channel = half::f16::from_le_bytes([half[0], half[1]]).to_f32();
            }
        }
        TextureFormat::Rgba32Float => {
            for (channel, word) in texel.iter_mut().zip(bytes.chunks_exact(4)) {
                *channel = f32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            }
        }
    }
    texel
}
