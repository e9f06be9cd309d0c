//! GPU backend contract.
//!
//! Every call records into one ordered command stream; a backend may execute
//! eagerly or batch until [`GpuBackend::submit`], but it must preserve
//! recording order. Nothing in the frame path reads GPU memory back.

mod soft;

pub use soft::{SoftwareBackend, SurfaceSample, RecordedCommand};

use glam::Mat4;

use crate::culling::GeometryHandle;
use crate::kernels::{KernelId, VariantFlags};
use crate::uniforms::{DispatchParams, FilterParams, ShiftParams, SlabParams, VolumeUniforms};
use crate::config::FilterMode;
use crate::Result;

fn next_resource_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Handle of a backend buffer
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct BufferHandle(u64);

impl BufferHandle {
    /// Fresh process-unique handle, for backend implementations
    pub fn next() -> Self {
        Self(next_resource_id())
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Handle of a backend 3D texture
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct TextureHandle(u64);

impl TextureHandle {
    /// Fresh process-unique handle, for backend implementations
    pub fn next() -> Self {
        Self(next_resource_id())
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Texture handle handed to lighting consumers: sample it, never write it
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct ReadOnlyTexture(TextureHandle);

impl ReadOnlyTexture {
    pub fn new(handle: TextureHandle) -> Self {
        Self(handle)
    }

    /// Underlying handle, for binding as a sampled texture
    pub fn sampled(&self) -> TextureHandle {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba16Float,
    Rgba32Float,
}

impl TextureFormat {
    pub fn bytes_per_texel(&self) -> u64 {
        match self {
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub label: String,
    pub extent: [u32; 3],
    pub format: TextureFormat,
}

impl TextureDesc {
    pub fn byte_size(&self) -> u64 {
        self.extent.iter().map(|&e| e as u64).product::<u64>() * self.format.bytes_per_texel()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Capacity-bounded append target; its fill level lives in a Counter buffer
    Append { stride: u32, capacity: u32 },
    /// `slots` atomic u32 counters: slot 0 counts, slot 1 tallies overflow
    Counter { slots: u32 },
    /// Untyped storage
    Raw { size: u64 },
    /// Read-only array of fixed-stride records
    Structured { stride: u32, count: u32 },
    /// One set of indirect dispatch arguments
    IndirectArgs,
}

impl BufferKind {
    pub fn byte_size(&self) -> u64 {
        match *self {
            BufferKind::Append { stride, capacity } => stride as u64 * capacity as u64,
            BufferKind::Counter { slots } => 4 * slots as u64,
            BufferKind::Raw { size } => size,
            BufferKind::Structured { stride, count } => stride as u64 * count as u64,
            BufferKind::IndirectArgs => 12,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub label: String,
    pub kind: BufferKind,
}

/// Runtime capabilities, queried once at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub supports_indirect_dispatch: bool,
    /// Per-dimension workgroup limit of a dispatch
    pub max_workgroups_per_dimension: u32,
    pub max_buffer_size: u64,
    pub max_texture_dimension_3d: u32,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            supports_indirect_dispatch: true,
            max_workgroups_per_dimension: 65535,
            max_buffer_size: 1 << 30,
            max_texture_dimension_3d: 2048,
        }
    }
}

/// Render pass tag selecting which material pass rasterizes
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct PassTag(pub &'static str);

impl PassTag {
    pub const VOXELIZATION: PassTag = PassTag("Voxelization");
}

/// One cascade's voxelization draw
#[derive(Debug, Clone)]
pub struct RasterPass<'a> {
    pub cascade: u32,
    pub view_proj: Mat4,
    /// Maps world positions into this cascade's voxel grid
    pub world_to_voxel: Mat4,
    pub resolution: u32,
    pub samples: u32,
    pub pass_tag: PassTag,
    pub cull_mask: u32,
    pub geometry: &'a [GeometryHandle],
    pub fragments: BufferHandle,
    pub counter: BufferHandle,
    pub capacity: u32,
}

/// A compute kernel invocation with its bindings
#[derive(Debug, Clone, Copy)]
pub enum ComputeKernel {
    Parameterize {
        counter: BufferHandle,
        args: BufferHandle,
        params: DispatchParams,
    },
    Clear {
        scratch: BufferHandle,
        slab: SlabParams,
    },
    Render {
        variant: VariantFlags,
        fragments: BufferHandle,
        counter: BufferHandle,
        lights: BufferHandle,
        scratch: BufferHandle,
        uniforms: VolumeUniforms,
    },
    Aggregate {
        variant: VariantFlags,
        scratch: BufferHandle,
        target: TextureHandle,
        slab: SlabParams,
    },
    Shift {
        variant: VariantFlags,
        source: TextureHandle,
        target: TextureHandle,
        params: ShiftParams,
    },
    Filter {
        mode: FilterMode,
        source: TextureHandle,
        target: TextureHandle,
        params: FilterParams,
    },
}

impl ComputeKernel {
    pub fn id(&self) -> KernelId {
        match self {
            ComputeKernel::Parameterize { .. } => KernelId::Parameterize,
            ComputeKernel::Clear { .. } => KernelId::Clear,
            ComputeKernel::Render { variant, .. } => KernelId::Render(*variant),
            ComputeKernel::Aggregate { variant, .. } => KernelId::Aggregate(*variant),
            ComputeKernel::Shift { variant, .. } => KernelId::Shift(*variant),
            ComputeKernel::Filter { mode, .. } => KernelId::Filter(*mode),
        }
    }
}

/// Command recording and resource management
pub trait GpuBackend {
    fn capabilities(&self) -> BackendCapabilities;

    fn allocate_texture_3d(&mut self, desc: &TextureDesc) -> Result<TextureHandle>;
    fn allocate_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle>;
    fn release_texture(&mut self, handle: TextureHandle);
    fn release_buffer(&mut self, handle: BufferHandle);

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()>;

    fn dispatch(&mut self, kernel: &ComputeKernel, groups: [u32; 3]) -> Result<()>;
    fn dispatch_indirect(&mut self, kernel: &ComputeKernel, args: BufferHandle, offset: u64) -> Result<()>;
    fn rasterize(&mut self, pass: &RasterPass<'_>) -> Result<()>;

    /// Copy every slot of `counter` into `dst` at `dst_offset`
    fn copy_counter_value(&mut self, counter: BufferHandle, dst: BufferHandle, dst_offset: u64) -> Result<()>;
    fn reset_counter(&mut self, counter: BufferHandle) -> Result<()>;
    /// Copy a whole texture into another of identical extent and format
    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<()>;

    /// Flush recorded work
    fn submit(&mut self) -> Result<()>;
}

/// Blocking readback, for tests and diagnostics only
pub trait Readback {
    fn read_buffer(&mut self, buffer: BufferHandle) -> Result<Vec<u8>>;

    /// Texels in x-fastest order as linear RGBA
    fn read_texture(&mut self, texture: TextureHandle) -> Result<Vec<[f32; 4]>>;
}
