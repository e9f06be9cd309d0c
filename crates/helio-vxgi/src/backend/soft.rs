//! Memory-resident reference backend.
//!
//! Executes each command as it is recorded, with the same fixed-point
//! arithmetic and addressing as the WGSL kernels. Geometry is a set of
//! pre-sampled surface points rather than triangles, so "rasterizing" a
//! capture is a per-sample frustum and grid test.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::{IVec3, Vec3, Vec4};

use super::{
    BackendCapabilities, BufferDesc, BufferHandle, BufferKind, ComputeKernel, GpuBackend, PassTag, RasterPass,
    Readback, TextureDesc, TextureHandle,
};
use crate::culling::{Aabb, GeometryHandle};
use crate::kernels::KernelId;
use crate::passes::accumulate::{direction_weights, fragment_radiance, scratch_index, to_fixed, FIXED_POINT_SCALE, SCRATCH_LANES};
use crate::passes::indirect_dispatch::indirect_args;
use crate::passes::mipmap::filter_taps;
use crate::uniforms::{
    DispatchIndirectArgs, DispatchParams, FilterParams, FragmentRecord, LightSourceRecord, ShiftParams, SlabParams,
    VolumeUniforms,
};
use crate::{Error, Result};

/// One pre-sampled surface point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSample {
    pub position: Vec3,
    pub normal: Vec3,
    pub albedo: Vec4,
    pub emission: Vec3,
}

impl SurfaceSample {
    pub fn new(position: Vec3, normal: Vec3, albedo: Vec4) -> Self {
        Self { position, normal, albedo, emission: Vec3::ZERO }
    }

    pub fn with_emission(mut self, emission: Vec3) -> Self {
        self.emission = emission;
        self
    }
}

/// Command log entry, in recording order
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Dispatch { kernel: KernelId, groups: [u32; 3] },
    DispatchIndirect { kernel: KernelId, groups: [u32; 3] },
    Rasterize { cascade: u32, draws: usize, appended: u32 },
    CopyCounter,
    ResetCounter,
    CopyTexture,
    WriteBuffer { bytes: usize },
    Submit,
}

struct SoftGeometry {
    samples: Vec<SurfaceSample>,
    pass_tags: Vec<PassTag>,
    layer_mask: u32,
}

struct SoftBuffer {
    kind: BufferKind,
    /// Grown on demand; words past the end read as zero
    words: Vec<u32>,
}

impl SoftBuffer {
    fn word(&self, index: usize) -> u32 {
        self.words.get(index).copied().unwrap_or(0)
    }

    fn ensure(&mut self, len: usize) {
        if self.words.len() < len {
            self.words.resize(len, 0);
        }
    }

    fn read<T: Pod>(&self, word_offset: usize) -> T {
        let len = std::mem::size_of::<T>() / 4;
        match self.words.get(word_offset..word_offset + len) {
            Some(words) => bytemuck::pod_read_unaligned(bytemuck::cast_slice(words)),
            None => {
                let mut value = <T as Zeroable>::zeroed();
                let bytes = bytemuck::bytes_of_mut(&mut value);
                for (i, chunk) in bytes.chunks_exact_mut(4).enumerate() {
                    chunk.copy_from_slice(&self.word(word_offset + i).to_le_bytes());
                }
                value
            }
        }
    }

    fn write<T: Pod>(&mut self, word_offset: usize, value: &T) {
        let bytes = bytemuck::bytes_of(value);
        self.ensure(word_offset + bytes.len() / 4);
        for (i, chunk) in bytes.chunks_exact(4).enumerate() {
            self.words[word_offset + i] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }
}

struct SoftTexture {
    desc: TextureDesc,
    texels: Vec<[f32; 4]>,
}

impl SoftTexture {
    fn index(&self, x: u32, y: u32, z: u32) -> usize {
        let [w, h, _] = self.desc.extent;
        x as usize + y as usize * w as usize + z as usize * w as usize * h as usize
    }
}

pub struct SoftwareBackend {
    capabilities: BackendCapabilities,
    buffers: HashMap<BufferHandle, SoftBuffer>,
    textures: HashMap<TextureHandle, SoftTexture>,
    geometry: HashMap<GeometryHandle, SoftGeometry>,
    next_geometry: u64,
    memory_budget: Option<u64>,
    memory_used: u64,
    failing_kernel: Option<KernelId>,
    recorded: Vec<RecordedCommand>,
}

/// Texels of `slab` reached by a dispatch covering `covered` threads
fn slab_texels(slab: &SlabParams, covered: [u32; 3]) -> impl Iterator<Item = [u32; 3]> {
    let [w, h, d] = slab.extent();
    let [ox, oy, oz] = slab.origin();
    let full = slab.grid.extent();
    let (w, h, d) = (w.min(covered[0]), h.min(covered[1]), d.min(covered[2]));
    (0..d).flat_map(move |z| (0..h).flat_map(move |y| (0..w).map(move |x| [x + ox, y + oy, z + oz])))
        .filter(move |p| p[0] < full[0] && p[1] < full[1] && p[2] < full[2])
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            capabilities: BackendCapabilities { max_buffer_size: u64::MAX, ..Default::default() },
            buffers: HashMap::new(),
            textures: HashMap::new(),
            geometry: HashMap::new(),
            next_geometry: 1,
            memory_budget: None,
            memory_used: 0,
            failing_kernel: None,
            recorded: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Fail allocations that would push declared memory past `bytes`
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    pub fn set_memory_budget(&mut self, bytes: Option<u64>) {
        self.memory_budget = bytes;
    }

    /// Fail every dispatch of `kernel` with a backend error
    pub fn set_failing_kernel(&mut self, kernel: Option<KernelId>) {
        self.failing_kernel = kernel;
    }

    /// Declared bytes of all live resources
    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn texture_desc(&self, texture: TextureHandle) -> Option<&TextureDesc> {
        self.textures.get(&texture).map(|t| &t.desc)
    }

    pub fn buffer_kind(&self, buffer: BufferHandle) -> Option<BufferKind> {
        self.buffers.get(&buffer).map(|b| b.kind)
    }

    /// Register voxelizable geometry drawn in the Voxelization pass
    pub fn register_geometry(&mut self, samples: Vec<SurfaceSample>, layer_mask: u32) -> GeometryHandle {
        self.register_geometry_with_tags(samples, layer_mask, vec![PassTag::VOXELIZATION])
    }

    pub fn register_geometry_with_tags(
        &mut self,
        samples: Vec<SurfaceSample>,
        layer_mask: u32,
        pass_tags: Vec<PassTag>,
    ) -> GeometryHandle {
        let handle = GeometryHandle(self.next_geometry);
        self.next_geometry += 1;
        log::debug!("Registered geometry {:?} with {} samples", handle, samples.len());
        self.geometry.insert(handle, SoftGeometry { samples, pass_tags, layer_mask });
        handle
    }

    pub fn remove_geometry(&mut self, handle: GeometryHandle) {
        self.geometry.remove(&handle);
    }

    pub fn geometry_bounds(&self, handle: GeometryHandle) -> Option<Aabb> {
        let geometry = self.geometry.get(&handle)?;
        Aabb::from_points(geometry.samples.iter().map(|s| s.position))
    }

    pub fn recorded(&self) -> &[RecordedCommand] {
        &self.recorded
    }

    pub fn take_recorded(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.recorded)
    }

    fn reserve(&mut self, label: &str, bytes: u64) -> Result<()> {
        if let Some(budget) = self.memory_budget {
            if self.memory_used.saturating_add(bytes) > budget {
                return Err(Error::allocation(
                    label,
                    format!("{} bytes exceeds budget ({} of {} used)", bytes, self.memory_used, budget),
                ));
            }
        }
        self.memory_used = self.memory_used.saturating_add(bytes);
        Ok(())
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&SoftBuffer> {
        self.buffers
            .get(&handle)
            .ok_or_else(|| Error::UnknownResource(format!("{:?}", handle)))
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> Result<&mut SoftBuffer> {
        self.buffers
            .get_mut(&handle)
            .ok_or_else(|| Error::UnknownResource(format!("{:?}", handle)))
    }

    fn texture(&self, handle: TextureHandle) -> Result<&SoftTexture> {
        self.textures
            .get(&handle)
            .ok_or_else(|| Error::UnknownResource(format!("{:?}", handle)))
    }

    fn texture_mut(&mut self, handle: TextureHandle) -> Result<&mut SoftTexture> {
        self.textures
            .get_mut(&handle)
            .ok_or_else(|| Error::UnknownResource(format!("{:?}", handle)))
    }

    fn execute(&mut self, kernel: &ComputeKernel, groups: [u32; 3]) -> Result<()> {
        let size = kernel.id().workgroup_size();
        let covered = [groups[0] * size[0], groups[1] * size[1], groups[2] * size[2]];

        match *kernel {
            ComputeKernel::Parameterize { counter, args, params } => self.parameterize(counter, args, params),
            ComputeKernel::Clear { scratch, slab } => self.clear(scratch, slab, covered),
            ComputeKernel::Render { fragments, counter, lights, scratch, uniforms, .. } => {
                let threads = covered[0] as u64 * groups[1] as u64 * groups[2] as u64;
                self.render(fragments, counter, lights, scratch, &uniforms, threads)
            }
            ComputeKernel::Aggregate { scratch, target, slab, .. } => self.aggregate(scratch, target, slab, covered),
            ComputeKernel::Shift { source, target, params, .. } => self.shift(source, target, params, covered),
            ComputeKernel::Filter { mode, source, target, params } => {
                self.filter(filter_taps(mode), source, target, params, covered)
            }
        }
    }

    fn parameterize(&mut self, counter: BufferHandle, args: BufferHandle, params: DispatchParams) -> Result<()> {
        let count = self.buffer(counter)?.word(0).min(params.capacity);
        let dispatch = indirect_args(count, params.group_size, params.max_groups);
        self.buffer_mut(args)?.write(0, &dispatch);
        Ok(())
    }

    fn clear(&mut self, scratch: BufferHandle, slab: SlabParams, covered: [u32; 3]) -> Result<()> {
        let extent = slab.grid.extent();
        let buffer = self.buffer_mut(scratch)?;
        let cells = extent.iter().map(|&e| e as usize).product::<usize>();
        buffer.ensure(cells * SCRATCH_LANES);

        for [x, y, z] in slab_texels(&slab, covered) {
            let cell = x as usize + (y as usize + z as usize * extent[1] as usize) * extent[0] as usize;
            if let Some(lanes) = buffer.words.get_mut(cell * SCRATCH_LANES..(cell + 1) * SCRATCH_LANES) {
                lanes.fill(0);
            }
        }
        Ok(())
    }

    fn render(
        &mut self,
        fragments: BufferHandle,
        counter: BufferHandle,
        lights: BufferHandle,
        scratch: BufferHandle,
        uniforms: &VolumeUniforms,
        threads: u64,
    ) -> Result<()> {
        let count = self.buffer(counter)?.word(0).min(uniforms.fragment_capacity());
        let active = (count as u64).min(threads) as usize;

        let light_buffer = self.buffer(lights)?;
        let stride = std::mem::size_of::<LightSourceRecord>() / 4;
        let light_records: Vec<LightSourceRecord> = (0..uniforms.light_count() as usize)
            .map(|i| light_buffer.read(i * stride))
            .collect();

        let fragment_buffer = self.buffer(fragments)?;
        let stride = std::mem::size_of::<FragmentRecord>() / 4;
        let records: Vec<FragmentRecord> = (0..active).map(|i| fragment_buffer.read(i * stride)).collect();

        let resolution = uniforms.resolution();
        let directions = uniforms.directions();
        let cascades = uniforms.cascade_count();
        let anisotropic = directions > 1;

        let scratch = self.buffer_mut(scratch)?;
        for fragment in &records {
            let cascade = fragment.cascade();
            let cell = fragment.position().floor().as_ivec3();
            if cascade >= cascades || cell.cmplt(IVec3::ZERO).any() || cell.cmpge(IVec3::splat(resolution as i32)).any() {
                continue;
            }
            let cell = cell.as_uvec3().to_array();

            let radiance = fragment_radiance(fragment, &light_records, uniforms);
            let alpha = fragment.albedo[3];
            let weights = direction_weights(Vec4::from_array(fragment.normal).truncate(), anisotropic);

            for direction in 0..directions {
                let weight = weights[direction as usize];
                if weight <= 0.0 {
                    continue;
                }
                let base = scratch_index(cell, direction, cascade, resolution, directions) * SCRATCH_LANES;
                scratch.ensure(base + SCRATCH_LANES);
                let lanes = [
                    to_fixed(radiance.x * weight),
                    to_fixed(radiance.y * weight),
                    to_fixed(radiance.z * weight),
                    to_fixed(alpha * weight),
                    1,
                ];
                for (lane, value) in lanes.iter().enumerate() {
                    scratch.words[base + lane] = scratch.words[base + lane].saturating_add(*value);
                }
            }
        }
        Ok(())
    }

    fn aggregate(&mut self, scratch: BufferHandle, target: TextureHandle, slab: SlabParams, covered: [u32; 3]) -> Result<()> {
        let extent = slab.grid.extent();
        let sums = self.buffer(scratch)?;
        let mut resolved = Vec::new();
        for [x, y, z] in slab_texels(&slab, covered) {
            let cell = x as usize + (y as usize + z as usize * extent[1] as usize) * extent[0] as usize;
            let base = cell * SCRATCH_LANES;
            let count = sums.word(base + 4);
            let texel = if count == 0 {
                [0.0; 4]
            } else {
                let scale = FIXED_POINT_SCALE * count as f32;
                [0, 1, 2, 3].map(|lane| sums.word(base + lane) as f32 / scale)
            };
            resolved.push(([x, y, z], texel));
        }

        let texture = self.texture_mut(target)?;
        for ([x, y, z], texel) in resolved {
            let index = texture.index(x, y, z);
            if let Some(slot) = texture.texels.get_mut(index) {
                *slot = texel;
            }
        }
        Ok(())
    }

    fn shift(&mut self, source: TextureHandle, target: TextureHandle, params: ShiftParams, covered: [u32; 3]) -> Result<()> {
        let extent = params.grid.extent();
        let r = params.grid.resolution() as i32;
        let d = IVec3::from_slice(&params.displacement[..3]);

        let src = self.texture(source)?;
        let wrap = |coord: u32, offset: i32| -> u32 {
            let slab = coord as i32 / r;
            ((coord as i32 % r + offset).rem_euclid(r) + slab * r) as u32
        };
        let mut shifted = Vec::new();
        for z in 0..extent[2].min(covered[2]) {
            for y in 0..extent[1].min(covered[1]) {
                for x in 0..extent[0].min(covered[0]) {
                    let texel = src.texels[src.index(wrap(x, d.x), wrap(y, d.y), wrap(z, d.z))];
                    shifted.push(([x, y, z], texel));
                }
            }
        }

        let dst = self.texture_mut(target)?;
        for ([x, y, z], texel) in shifted {
            let index = dst.index(x, y, z);
            dst.texels[index] = texel;
        }
        Ok(())
    }

    fn filter(
        &mut self,
        (taps, first): (&'static [f32], i32),
        source: TextureHandle,
        target: TextureHandle,
        params: FilterParams,
        covered: [u32; 3],
    ) -> Result<()> {
        let src = self.texture(source)?;
        let rs = params.source.resolution() as i32;
        let rt = params.target.resolution();
        let extent = params.target.extent();

        let mut filtered = Vec::new();
        for z in 0..extent[2].min(covered[2]) {
            for y in 0..extent[1].min(covered[1]) {
                for x in 0..extent[0].min(covered[0]) {
                    let slab = (x / rt) as i32 * rs;
                    let local = IVec3::new((x % rt) as i32, y as i32, z as i32) * 2 + IVec3::splat(first);

                    let mut sum = Vec4::ZERO;
                    for (k, wz) in taps.iter().enumerate() {
                        for (j, wy) in taps.iter().enumerate() {
                            for (i, wx) in taps.iter().enumerate() {
                                let p = (local + IVec3::new(i as i32, j as i32, k as i32)).clamp(IVec3::ZERO, IVec3::splat(rs - 1));
                                let texel = src.texels[src.index((p.x + slab) as u32, p.y as u32, p.z as u32)];
                                sum += Vec4::from_array(texel) * (wx * wy * wz);
                            }
                        }
                    }
                    filtered.push(([x, y, z], sum.to_array()));
                }
            }
        }

        let dst = self.texture_mut(target)?;
        for ([x, y, z], texel) in filtered {
            let index = dst.index(x, y, z);
            dst.texels[index] = texel;
        }
        Ok(())
    }

    fn append(&mut self, pass: &RasterPass<'_>, records: &[FragmentRecord]) -> Result<u32> {
        let stride = std::mem::size_of::<FragmentRecord>() / 4;
        let mut count = self.buffer(pass.counter)?.word(0);
        let mut dropped = self.buffer(pass.counter)?.word(1);
        let mut appended = 0;

        let fragments = self.buffer_mut(pass.fragments)?;
        for record in records {
            if count < pass.capacity {
                fragments.write(count as usize * stride, record);
                count += 1;
                appended += 1;
            } else {
                dropped += 1;
            }
        }

        let counter = self.buffer_mut(pass.counter)?;
        counter.write(0, &[count, dropped]);
        Ok(appended)
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for SoftwareBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn allocate_texture_3d(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        let limit = self.capabilities.max_texture_dimension_3d;
        if desc.extent.iter().any(|&e| e == 0 || e > limit) {
            return Err(Error::allocation(&desc.label, format!("extent {:?} outside 1..={}", desc.extent, limit)));
        }
        self.reserve(&desc.label, desc.byte_size())?;

        let texels = desc.extent.iter().map(|&e| e as usize).product();
        let handle = TextureHandle::next();
        self.textures.insert(handle, SoftTexture { desc: desc.clone(), texels: vec![[0.0; 4]; texels] });
        log::debug!("Created texture '{}' {:?} with id {:?}", desc.label, desc.extent, handle);
        Ok(handle)
    }

    fn allocate_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        let size = desc.kind.byte_size();
        if size > self.capabilities.max_buffer_size {
            return Err(Error::allocation(&desc.label, format!("{} bytes exceeds max buffer size", size)));
        }
        self.reserve(&desc.label, size)?;

        let handle = BufferHandle::next();
        self.buffers.insert(handle, SoftBuffer { kind: desc.kind, words: Vec::new() });
        log::debug!("Created buffer '{}' ({} bytes) with id {:?}", desc.label, size, handle);
        Ok(handle)
    }

    fn release_texture(&mut self, handle: TextureHandle) {
        if let Some(texture) = self.textures.remove(&handle) {
            self.memory_used = self.memory_used.saturating_sub(texture.desc.byte_size());
        }
    }

    fn release_buffer(&mut self, handle: BufferHandle) {
        if let Some(buffer) = self.buffers.remove(&handle) {
            self.memory_used = self.memory_used.saturating_sub(buffer.kind.byte_size());
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        if offset % 4 != 0 || data.len() % 4 != 0 {
            return Err(Error::Backend("buffer writes must be 4-byte aligned".into()));
        }
        let target = self.buffer_mut(buffer)?;
        if offset + data.len() as u64 > target.kind.byte_size() {
            return Err(Error::Backend(format!("write of {} bytes at {} overruns buffer", data.len(), offset)));
        }
        let start = (offset / 4) as usize;
        target.ensure(start + data.len() / 4);
        for (i, chunk) in data.chunks_exact(4).enumerate() {
            target.words[start + i] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        self.recorded.push(RecordedCommand::WriteBuffer { bytes: data.len() });
        Ok(())
    }

    fn dispatch(&mut self, kernel: &ComputeKernel, groups: [u32; 3]) -> Result<()> {
        let limit = self.capabilities.max_workgroups_per_dimension;
        if groups.iter().any(|&g| g > limit) {
            return Err(Error::Backend(format!("dispatch {:?} exceeds {} groups per dimension", groups, limit)));
        }
        if self.failing_kernel == Some(kernel.id()) {
            return Err(Error::Backend(format!("{:?} failed", kernel.id())));
        }
        self.recorded.push(RecordedCommand::Dispatch { kernel: kernel.id(), groups });
        self.execute(kernel, groups)
    }

    fn dispatch_indirect(&mut self, kernel: &ComputeKernel, args: BufferHandle, offset: u64) -> Result<()> {
        if !self.capabilities.supports_indirect_dispatch {
            return Err(Error::Unsupported("indirect dispatch".into()));
        }
        if self.failing_kernel == Some(kernel.id()) {
            return Err(Error::Backend(format!("{:?} failed", kernel.id())));
        }
        let args: DispatchIndirectArgs = self.buffer(args)?.read((offset / 4) as usize);
        let groups = [args.x, args.y, args.z];
        self.recorded.push(RecordedCommand::DispatchIndirect { kernel: kernel.id(), groups });
        self.execute(kernel, groups)
    }

    fn rasterize(&mut self, pass: &RasterPass<'_>) -> Result<()> {
        let resolution = pass.resolution as f32;
        let mut records = Vec::new();

        for handle in pass.geometry {
            let Some(geometry) = self.geometry.get(handle) else {
                log::warn!("Skipping unknown geometry {:?}", handle);
                continue;
            };
            if geometry.layer_mask & pass.cull_mask == 0 || !geometry.pass_tags.contains(&pass.pass_tag) {
                continue;
            }

            for sample in &geometry.samples {
                let clip = pass.view_proj.project_point3(sample.position);
                if clip.x.abs() > 1.0 || clip.y.abs() > 1.0 || !(0.0..=1.0).contains(&clip.z) {
                    continue;
                }
                let voxel = pass.world_to_voxel.transform_point3(sample.position);
                if voxel.cmplt(Vec3::ZERO).any() || voxel.cmpge(Vec3::splat(resolution)).any() {
                    continue;
                }
                records.push(FragmentRecord::new(voxel, pass.cascade, sample.normal, sample.albedo, sample.emission));
            }
        }

        let appended = self.append(pass, &records)?;
        self.recorded.push(RecordedCommand::Rasterize { cascade: pass.cascade, draws: pass.geometry.len(), appended });
        Ok(())
    }

    fn copy_counter_value(&mut self, counter: BufferHandle, dst: BufferHandle, dst_offset: u64) -> Result<()> {
        let source = self.buffer(counter)?;
        let BufferKind::Counter { slots } = source.kind else {
            return Err(Error::Backend(format!("{:?} is not a counter buffer", counter)));
        };
        let values: Vec<u32> = (0..slots as usize).map(|i| source.word(i)).collect();

        let target = self.buffer_mut(dst)?;
        if dst_offset + 4 * slots as u64 > target.kind.byte_size() {
            return Err(Error::Backend("counter copy overruns destination".into()));
        }
        let start = (dst_offset / 4) as usize;
        target.ensure(start + values.len());
        target.words[start..start + values.len()].copy_from_slice(&values);
        self.recorded.push(RecordedCommand::CopyCounter);
        Ok(())
    }

    fn reset_counter(&mut self, counter: BufferHandle) -> Result<()> {
        self.buffer_mut(counter)?.words.fill(0);
        self.recorded.push(RecordedCommand::ResetCounter);
        Ok(())
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<()> {
        let source = self.texture(src)?;
        let (extent, texels) = (source.desc.extent, source.texels.clone());
        let target = self.texture_mut(dst)?;
        if target.desc.extent != extent {
            return Err(Error::Backend(format!("texture copy {:?} -> {:?} extent mismatch", extent, target.desc.extent)));
        }
        target.texels = texels;
        self.recorded.push(RecordedCommand::CopyTexture);
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        self.recorded.push(RecordedCommand::Submit);
        Ok(())
    }
}

impl Readback for SoftwareBackend {
    fn read_buffer(&mut self, buffer: BufferHandle) -> Result<Vec<u8>> {
        let buffer = self.buffer(buffer)?;
        let size = buffer.kind.byte_size() as usize;
        let mut bytes: Vec<u8> = buffer.words.iter().flat_map(|w| w.to_le_bytes()).collect();
        bytes.resize(size, 0);
        Ok(bytes)
    }

    fn read_texture(&mut self, texture: TextureHandle) -> Result<Vec<[f32; 4]>> {
        Ok(self.texture(texture)?.texels.clone())
    }
}
