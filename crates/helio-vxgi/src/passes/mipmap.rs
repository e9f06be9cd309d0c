//! Multi-resolution radiance storage.
//!
//! Pyramid mode keeps one texture per mip level and rebuilds levels 1..N
//! from level 0 with the configured filter. Cascade mode keeps a single
//! texture with every cascade stacked along Z and never filters or shifts.

use glam::IVec3;

use crate::backend::{ComputeKernel, GpuBackend, ReadOnlyTexture, TextureDesc, TextureFormat, TextureHandle};
use crate::config::FilterMode;
use crate::kernels::{volume_groups, KernelId, KernelSet};
use crate::uniforms::{FilterParams, GridParams, ShiftParams};
use crate::volume::VolumeLayout;
use crate::{Error, Result};

/// Storage format of every radiance level
pub const RADIANCE_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Separable filter taps and the offset of the first tap from `2 * x`
pub fn filter_taps(mode: FilterMode) -> (&'static [f32], i32) {
    match mode {
        FilterMode::Box => (&[0.5, 0.5], 0),
        FilterMode::Gaussian3 => (&[0.25, 0.5, 0.25], -1),
        FilterMode::Gaussian4 => (&[0.125, 0.375, 0.375, 0.125], -1),
    }
}

/// One published radiance level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadianceLevel {
    pub texture: ReadOnlyTexture,
    /// Texels per axis of one direction/cascade slab
    pub resolution: u32,
    pub extent: [u32; 3],
}

struct Level {
    texture: TextureHandle,
    resolution: u32,
    extent: [u32; 3],
}

pub struct MipCascadeCache {
    levels: Vec<Level>,
    shift_scratch: Option<TextureHandle>,
    cascaded: bool,
}

impl MipCascadeCache {
    pub fn new() -> Self {
        Self { levels: Vec::new(), shift_scratch: None, cascaded: false }
    }

    pub fn allocate<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, layout: &VolumeLayout) -> Result<()> {
        self.cascaded = layout.is_cascaded();

        if self.cascaded {
            let extent = layout.base_extent();
            let texture = backend.allocate_texture_3d(&TextureDesc {
                label: "VXGI Radiance Cascades".into(),
                extent,
                format: RADIANCE_FORMAT,
            })?;
            self.levels.push(Level { texture, resolution: layout.resolution, extent });
            return Ok(());
        }

        for (index, resolution) in layout.level_resolutions().into_iter().enumerate() {
            let extent = layout.level_extent(resolution);
            let texture = backend.allocate_texture_3d(&TextureDesc {
                label: format!("VXGI Radiance Mip {}", index),
                extent,
                format: RADIANCE_FORMAT,
            })?;
            self.levels.push(Level { texture, resolution, extent });
        }

        let scratch = backend.allocate_texture_3d(&TextureDesc {
            label: "VXGI Shift Scratch".into(),
            extent: layout.base_extent(),
            format: RADIANCE_FORMAT,
        })?;
        self.shift_scratch = Some(scratch);
        Ok(())
    }

    pub fn release<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        for level in self.levels.drain(..) {
            backend.release_texture(level.texture);
        }
        if let Some(scratch) = self.shift_scratch.take() {
            backend.release_texture(scratch);
        }
    }

    /// Texture written by accumulation
    pub fn base(&self) -> Option<TextureHandle> {
        self.levels.first().map(|level| level.texture)
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Read-only view of every level, base first
    pub fn published_levels(&self) -> Vec<RadianceLevel> {
        self.levels
            .iter()
            .map(|level| RadianceLevel {
                texture: ReadOnlyTexture::new(level.texture),
                resolution: level.resolution,
                extent: level.extent,
            })
            .collect()
    }

    /// Displace level 0 by whole voxels with toroidal wrap:
    /// `new[x] = old[(x + displacement) mod resolution]`.
    ///
    /// No-op in cascade mode or for a zero displacement.
    pub fn shift<B: GpuBackend + ?Sized>(&self, backend: &mut B, kernels: &KernelSet, displacement: IVec3) -> Result<()> {
        let Some(kernel) = kernels.shift else {
            return Ok(());
        };
        if self.cascaded || displacement == IVec3::ZERO {
            return Ok(());
        }
        let (Some(base), Some(scratch)) = (self.levels.first(), self.shift_scratch) else {
            return Err(Error::Backend("radiance cache shifted before allocation".into()));
        };

        log::debug!("Shifting radiance volume by {}", displacement);
        backend.copy_texture(base.texture, scratch)?;

        let grid = GridParams::new(base.extent, base.resolution);
        backend.dispatch(
            &ComputeKernel::Shift {
                variant: kernel.variant(),
                source: scratch,
                target: base.texture,
                params: ShiftParams::new(displacement, grid),
            },
            volume_groups(kernel, base.extent),
        )
    }

    /// Rebuild levels 1..N, each from the level above it
    pub fn filter<B: GpuBackend + ?Sized>(&self, backend: &mut B, kernels: &KernelSet) -> Result<()> {
        let Some(kernel) = kernels.filter else {
            return Ok(());
        };
        let KernelId::Filter(mode) = kernel else {
            return Err(Error::Unsupported(format!("{:?} is not a filter kernel", kernel)));
        };
        if self.cascaded {
            return Ok(());
        }

        for pair in self.levels.windows(2) {
            let (source, target) = (&pair[0], &pair[1]);
            backend.dispatch(
                &ComputeKernel::Filter {
                    mode,
                    source: source.texture,
                    target: target.texture,
                    params: FilterParams {
                        source: GridParams::new(source.extent, source.resolution),
                        target: GridParams::new(target.extent, target.resolution),
                    },
                },
                volume_groups(kernel, target.extent),
            )?;
        }
        Ok(())
    }
}

impl Default for MipCascadeCache {
    fn default() -> Self {
        Self::new()
    }
}
