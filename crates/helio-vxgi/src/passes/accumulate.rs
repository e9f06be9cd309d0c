//! Scatter-accumulation of fragments into the base radiance level.
//!
//! Clear, Render, Aggregate and Cleanup run back to back in one command
//! stream. The scratch holds [`SCRATCH_LANES`] u32 lanes per cell: fixed-point
//! red, green, blue, alpha sums and a sample count.

use glam::{Vec3, Vec4};

use crate::backend::{BufferDesc, BufferHandle, BufferKind, ComputeKernel, GpuBackend, TextureHandle};
use crate::culling::LightKind;
use crate::kernels::volume_groups;
use crate::passes::indirect_dispatch::DispatchSizer;
use crate::passes::voxelize::{FragmentCollector, COUNTER_SLOTS};
use crate::passes::UpdateContext;
use crate::uniforms::{FragmentRecord, GridParams, LightSourceRecord, SlabParams, VolumeUniforms};
use crate::volume::VolumeLayout;
use crate::{Error, Result};

pub const SCRATCH_LANES: usize = 5;
/// Fixed-point scale of the scratch color sums
pub const FIXED_POINT_SCALE: f32 = 1024.0;
/// Largest per-cell, per-channel radiance sum the scratch holds (about
/// 4.19e6). Sums saturate there, so brighter cells resolve dimmer than
/// their true mean instead of wrapping.
pub const MAX_CELL_SUM: f32 = u32::MAX as f32 / FIXED_POINT_SCALE;

/// Axes of the six directional bins, in texture order
pub const DIRECTIONS: [Vec3; 6] = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];

pub fn to_fixed(value: f32) -> u32 {
    (value.max(0.0) * FIXED_POINT_SCALE + 0.5) as u32
}

/// Linear cell index of voxel `cell`, direction `direction`, cascade `cascade`
pub fn scratch_index(cell: [u32; 3], direction: u32, cascade: u32, resolution: u32, directions: u32) -> usize {
    let width = (resolution * directions) as usize;
    let height = resolution as usize;
    let x = (cell[0] + direction * resolution) as usize;
    let y = cell[1] as usize;
    let z = (cell[2] + cascade * resolution) as usize;
    x + y * width + z * width * height
}

/// Bin weights of a fragment; a single bin of weight 1 when isotropic
pub fn direction_weights(normal: Vec3, anisotropic: bool) -> [f32; 6] {
    if !anisotropic {
        return [1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
    }
    let n = normal.normalize_or_zero();
    DIRECTIONS.map(|axis| n.dot(axis).max(0.0))
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn range_attenuation(distance: f32, range: f32) -> f32 {
    if range <= 0.0 {
        return 0.0;
    }
    let ratio = (distance / range).min(1.0);
    let falloff = 1.0 - ratio * ratio;
    falloff * falloff
}

/// Direct radiance leaving a fragment: emission plus Lambert-lit albedo
pub fn fragment_radiance(fragment: &FragmentRecord, lights: &[LightSourceRecord], uniforms: &VolumeUniforms) -> Vec3 {
    let world = uniforms.fragment_world_position(fragment.position(), fragment.cascade());
    let normal = Vec4::from_array(fragment.normal).truncate().normalize_or_zero();
    let albedo = Vec4::from_array(fragment.albedo).truncate();
    let emission = Vec4::from_array(fragment.emission).truncate();

    let mut irradiance = Vec3::ZERO;
    for light in lights {
        let position = Vec4::from_array(light.position_and_kind);
        let direction = Vec4::from_array(light.direction_and_range);
        let color = Vec4::from_array(light.color_and_intensity);
        let range = direction.w;
        let cos_outer = light.voxel_position_and_spot[3];

        let (to_light, attenuation) = match position.w as u32 {
            k if k == LightKind::Directional as u32 => (-direction.truncate(), 1.0),
            k => {
                let delta = position.truncate() - world;
                let distance = delta.length();
                let l = delta.normalize_or_zero();
                let mut attenuation = range_attenuation(distance, range);
                if k == LightKind::Spot as u32 {
                    let cos_inner = cos_outer + (1.0 - cos_outer) * 0.25;
                    attenuation *= smoothstep(cos_outer, cos_inner, (-l).dot(direction.truncate()));
                }
                (l, attenuation)
            }
        };

        let lambert = if normal == Vec3::ZERO { 1.0 } else { normal.dot(to_light).max(0.0) };
        irradiance += color.truncate() * color.w * lambert * attenuation;
    }

    emission + albedo * irradiance
}

/// Owns the accumulation scratch and the fragment diagnostics copy
pub struct RadianceAccumulator {
    scratch: Option<BufferHandle>,
    stats: Option<BufferHandle>,
}

impl RadianceAccumulator {
    pub fn new() -> Self {
        Self { scratch: None, stats: None }
    }

    pub fn allocate<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, layout: &VolumeLayout) -> Result<()> {
        let size = layout.scratch_cells() * (SCRATCH_LANES * 4) as u64;
        let scratch = backend.allocate_buffer(&BufferDesc {
            label: "VXGI Accumulation Scratch".into(),
            kind: BufferKind::Raw { size },
        })?;
        self.scratch = Some(scratch);

        let stats = backend.allocate_buffer(&BufferDesc {
            label: "VXGI Fragment Stats".into(),
            kind: BufferKind::Raw { size: 4 * COUNTER_SLOTS as u64 },
        })?;
        self.stats = Some(stats);
        Ok(())
    }

    pub fn release<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(scratch) = self.scratch.take() {
            backend.release_buffer(scratch);
        }
        if let Some(stats) = self.stats.take() {
            backend.release_buffer(stats);
        }
    }

    /// Diagnostics copy of the fragment counter from the last cleanup
    pub fn stats_buffer(&self) -> Option<BufferHandle> {
        self.stats
    }

    /// Clear, scatter, aggregate into `target`, then reset the fragment counter.
    ///
    /// Only the slabs of `captured` cascades are cleared and resolved; the
    /// rest of `target` keeps what the last successful capture left there.
    pub fn accumulate<B: GpuBackend + ?Sized>(
        &self,
        backend: &mut B,
        ctx: &UpdateContext,
        uniforms: &VolumeUniforms,
        sizer: &DispatchSizer,
        collector: &FragmentCollector,
        lights: BufferHandle,
        target: TextureHandle,
        captured: &[u32],
    ) -> Result<()> {
        let (Some(scratch), Some(stats)) = (self.scratch, self.stats) else {
            return Err(Error::Backend("accumulator used before allocation".into()));
        };
        let (Some(fragments), Some(counter)) = (collector.fragments(), collector.counter()) else {
            return Err(Error::Backend("fragment list missing during accumulation".into()));
        };

        let grid = GridParams::new(ctx.layout.base_extent(), ctx.layout.resolution);
        let slabs: Vec<SlabParams> = captured.iter().map(|&cascade| SlabParams::cascade(grid, cascade)).collect();

        // ── Clear ─────────────────────────────────────────────────────────
        for slab in &slabs {
            backend.dispatch(
                &ComputeKernel::Clear { scratch, slab: *slab },
                volume_groups(ctx.kernels.clear, slab.extent()),
            )?;
        }

        // ── Render ────────────────────────────────────────────────────────
        let render = ComputeKernel::Render {
            variant: ctx.kernels.flags,
            fragments,
            counter,
            lights,
            scratch,
            uniforms: *uniforms,
        };
        debug_assert_eq!(render.id(), ctx.kernels.render);
        sizer.dispatch_counted(backend, counter, collector.capacity(), &render)?;

        // ── Aggregate ─────────────────────────────────────────────────────
        for slab in &slabs {
            backend.dispatch(
                &ComputeKernel::Aggregate { variant: ctx.kernels.flags, scratch, target, slab: *slab },
                volume_groups(ctx.kernels.aggregate, slab.extent()),
            )?;
        }

        // ── Cleanup ───────────────────────────────────────────────────────
        backend.copy_counter_value(counter, stats, 0)?;
        backend.reset_counter(counter)
    }
}

impl Default for RadianceAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
