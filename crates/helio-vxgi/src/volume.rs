//! Resolved volume layout and per-frame placement.
//!
//! [`VolumeLayout`] is the structural part of a [`VolumeConfig`]: whenever it
//! changes every GPU resource is rebuilt. [`VolumeGeometry`] is recomputed each
//! frame from the bound and the (snapped) center.

use glam::{IVec3, Mat4, Quat, Vec3};

use crate::config::{FilterMode, VolumeConfig};
use crate::culling::Frustum;
use crate::kernels::VariantFlags;

/// Fragment slots per `evenResolution²` surface cell when no override is set
pub const DEFAULT_BUFFER_BASE: f32 = 64.0;

/// Direction count of an anisotropic voxel (+X, -X, +Y, -Y, +Z, -Z)
pub const ANISOTROPIC_DIRECTIONS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeLayout {
    /// Texels per axis of the base level, `2^n + 1` for the symmetric gaussian
    pub resolution: u32,
    /// Nested cascade count, `None` for the mip-pyramid mode
    pub cascades: Option<u32>,
    pub anisotropic: bool,
    pub filter_mode: FilterMode,
    pub buffer_scale: f32,
}

impl VolumeLayout {
    pub fn from_config(config: &VolumeConfig) -> Self {
        let config = config.sanitized();
        let cascades = config.cascades_enabled.then_some(config.cascades_count);

        let mut resolution = config.resolution.texels();
        if config.filter_mode == FilterMode::Gaussian3 && cascades.is_none() {
            resolution += 1;
        }

        let even = resolution - resolution % 2;
        let buffer_scale = config.buffer_scale.unwrap_or_else(|| {
            DEFAULT_BUFFER_BASE / even as f32 * cascades.unwrap_or(1) as f32
        });

        Self {
            resolution,
            cascades,
            anisotropic: config.anisotropic,
            filter_mode: config.filter_mode,
            buffer_scale,
        }
    }

    /// Resolution rounded down to even; voxel size divides the bound by this
    pub fn even_resolution(&self) -> u32 {
        self.resolution - self.resolution % 2
    }

    pub fn is_cascaded(&self) -> bool {
        self.cascades.is_some()
    }

    pub fn cascade_count(&self) -> u32 {
        self.cascades.unwrap_or(1)
    }

    pub fn directions(&self) -> u32 {
        if self.anisotropic {
            ANISOTROPIC_DIRECTIONS
        } else {
            1
        }
    }

    /// Voxels covered by the volume across all cascades, one direction
    pub fn cells(&self) -> u64 {
        let r = self.resolution as u64;
        r * r * r * self.cascade_count() as u64
    }

    /// Accumulation cells including directional copies
    pub fn scratch_cells(&self) -> u64 {
        self.cells() * self.directions() as u64
    }

    /// Append-buffer capacity, `bufferScale × resolution³`
    pub fn fragment_capacity(&self) -> u32 {
        let r = self.resolution as f64;
        let capacity = (self.buffer_scale as f64 * r * r * r).floor();
        capacity.clamp(1.0, u32::MAX as f64) as u32
    }

    /// Number of radiance levels: mips in pyramid mode, cascades otherwise
    pub fn level_count(&self) -> u32 {
        match self.cascades {
            Some(count) => count,
            None => self.resolution.ilog2(),
        }
    }

    /// Per-axis resolution of every level, base first
    pub fn level_resolutions(&self) -> Vec<u32> {
        if self.is_cascaded() {
            return vec![self.resolution; self.level_count() as usize];
        }

        let modifier = self.resolution % 2;
        let mut current = self.resolution;
        (0..self.level_count())
            .map(|_| {
                let level = current;
                current = (current - modifier) / 2 + modifier;
                level
            })
            .collect()
    }

    /// Texture extent of a level with the given per-axis resolution.
    ///
    /// Directions are laid out along X, cascades along Z.
    pub fn level_extent(&self, resolution: u32) -> [u32; 3] {
        [
            resolution * self.directions(),
            resolution,
            resolution * self.cascade_count(),
        ]
    }

    /// Extent of the base level (and of the accumulation grid)
    pub fn base_extent(&self) -> [u32; 3] {
        self.level_extent(self.resolution)
    }

    pub fn variant_flags(&self) -> VariantFlags {
        let mut flags = VariantFlags::empty();
        flags.set(VariantFlags::ANISOTROPIC, self.anisotropic);
        flags.set(VariantFlags::CASCADED, self.is_cascaded());
        flags
    }
}

/// World placement of the volume for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeGeometry {
    pub bound: f32,
    pub voxel_size: f32,
    /// Center snapped to the voxel grid
    pub center: Vec3,
    /// World position of voxel (0, 0, 0) of the base cascade
    pub origin: Vec3,
    pub resolution: u32,
    pub cascade_count: u32,
}

impl VolumeGeometry {
    pub fn new(layout: &VolumeLayout, bound: f32, center: Vec3) -> Self {
        let voxel_size = bound / layout.even_resolution() as f32;
        let center = snap_to_grid(center, voxel_size);
        Self {
            bound,
            voxel_size,
            center,
            origin: center - Vec3::splat(0.5 * bound),
            resolution: layout.resolution,
            cascade_count: layout.cascade_count(),
        }
    }

    pub fn voxel_to_world(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(Vec3::splat(self.voxel_size), Quat::IDENTITY, self.origin)
    }

    pub fn world_to_voxel(&self) -> Mat4 {
        self.voxel_to_world().inverse()
    }

    /// Whole-voxel displacement from a previous snapped center
    pub fn displacement_from(&self, previous: Vec3) -> IVec3 {
        ((self.center - previous) / self.voxel_size).round().as_ivec3()
    }

    /// World-space edge length of cascade `index`; cascade 0 is the coarsest
    pub fn cascade_extent(&self, index: u32) -> f32 {
        self.bound / (1u64 << index.min(63)) as f32
    }

    /// Orthographic capture of one cascade
    pub fn capture(&self, index: u32) -> CaptureVolume {
        CaptureVolume::new(index, self.center, self.cascade_extent(index), self.resolution)
    }
}

/// Snaps `position` down onto a grid of spacing `voxel_size`
pub fn snap_to_grid(position: Vec3, voxel_size: f32) -> Vec3 {
    (position / voxel_size).floor() * voxel_size
}

/// Orthographic camera and voxel mapping of a single cascade
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureVolume {
    pub index: u32,
    pub center: Vec3,
    pub extent: f32,
    pub voxel_size: f32,
    pub resolution: u32,
    pub view: Mat4,
    pub projection: Mat4,
}

impl CaptureVolume {
    pub fn new(index: u32, center: Vec3, extent: f32, resolution: u32) -> Self {
        let half = 0.5 * extent;
        let eye = center - Vec3::Z * half;
        let view = Mat4::look_at_rh(eye, center, Vec3::Y);
        let projection = Mat4::orthographic_rh(-half, half, -half, half, 0.0, extent);
        let even = resolution - resolution % 2;
        Self {
            index,
            center,
            extent,
            voxel_size: extent / even.max(1) as f32,
            resolution,
            view,
            projection,
        }
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection * self.view
    }

    pub fn origin(&self) -> Vec3 {
        self.center - Vec3::splat(0.5 * self.extent)
    }

    pub fn voxel_to_world(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(Vec3::splat(self.voxel_size), Quat::IDENTITY, self.origin())
    }

    pub fn world_to_voxel(&self) -> Mat4 {
        self.voxel_to_world().inverse()
    }

    /// Culling frustum of the capture, `None` when degenerate
    pub fn frustum(&self) -> Option<Frustum> {
        if !(self.extent.is_finite() && self.extent > 0.0) || !self.center.is_finite() {
            return None;
        }
        Frustum::from_matrix(self.view_proj())
    }
}
