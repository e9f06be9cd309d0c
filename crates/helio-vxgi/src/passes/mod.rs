//! Per-frame passes of the cache maintenance pipeline

pub mod accumulate;
pub mod indirect_dispatch;
pub mod lights;
pub mod mipmap;
pub mod voxelize;

pub use accumulate::RadianceAccumulator;
pub use indirect_dispatch::DispatchSizer;
pub use lights::{LightSnapshot, LightSnapshotBuilder, MAX_LIGHTS};
pub use mipmap::{MipCascadeCache, RadianceLevel};
pub use voxelize::{CollectReport, FragmentCollector};

use crate::kernels::KernelSet;
use crate::volume::{VolumeGeometry, VolumeLayout};

/// Everything a pass needs to know about the current update
#[derive(Debug, Clone, Copy)]
pub struct UpdateContext {
    pub layout: VolumeLayout,
    pub geometry: VolumeGeometry,
    pub kernels: KernelSet,
    pub cull_mask: u32,
    /// Multisample count of the voxelization raster
    pub samples: u32,
}
