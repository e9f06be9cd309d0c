//! Helio VXGI - volumetric radiance cache for voxel cone traced GI
//!
//! Keeps a dense 3D radiance volume (a mip pyramid or a stack of nested
//! cascades) consistent with a moving point of interest:
//!
//! - Voxelizes visible geometry into a capacity-bounded fragment list
//! - Sizes the accumulation dispatch on the GPU from the fragment counter
//! - Scatter-accumulates lit fragments and resolves them into level 0
//! - Shifts the pyramid by whole voxels when the center moves, then refilters
//! - Throttles refreshes independently of frame rate
//!
//! All GPU work goes through the [`GpuBackend`] contract. A CPU
//! [`SoftwareBackend`] ships with the crate; `helio-vxgi-wgpu` provides the
//! wgpu implementation.

pub mod backend;
pub mod config;
pub mod culling;
pub mod kernels;
pub mod passes;
pub mod pipeline;
pub mod throttle;
pub mod uniforms;
pub mod volume;

mod error;

pub use backend::{
    BackendCapabilities, BufferDesc, BufferHandle, BufferKind, ComputeKernel, GpuBackend, PassTag, RasterPass,
    ReadOnlyTexture, Readback, SoftwareBackend, SurfaceSample, TextureDesc, TextureFormat, TextureHandle,
};
pub use config::{AntiAliasing, FilterMode, Resolution, VolumeConfig};
pub use culling::{Aabb, CullQuery, CullResult, CullingProvider, GeometryHandle, LightId, LightKind, SceneCulling, VisibleLight};
pub use error::{Error, Result};
pub use kernels::{KernelId, KernelSet, VariantFlags};
pub use passes::{LightSnapshot, RadianceLevel, MAX_LIGHTS};
pub use pipeline::{FragmentStats, FrameInput, FrameOutput, PipelineState, PublishedVolume, RefreshReport, VoxelGi};
pub use volume::{CaptureVolume, VolumeGeometry, VolumeLayout};
