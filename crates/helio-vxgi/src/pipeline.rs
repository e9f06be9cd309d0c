//! Frame orchestration of the radiance cache.

use glam::{IVec3, Mat4, Vec3};

use crate::backend::{BackendCapabilities, BufferHandle, GpuBackend, Readback};
use crate::config::VolumeConfig;
use crate::culling::CullingProvider;
use crate::kernels::KernelSet;
use crate::passes::{
    DispatchSizer, FragmentCollector, LightSnapshot, LightSnapshotBuilder, MipCascadeCache, RadianceAccumulator,
    RadianceLevel, UpdateContext,
};
use crate::throttle::RefreshThrottle;
use crate::uniforms::VolumeUniforms;
use crate::volume::{VolumeGeometry, VolumeLayout};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Created, nothing allocated yet
    Idle,
    /// (Re)allocating resources for a new layout
    Configuring,
    Ready,
    /// Resources released; `initialize` may start over
    Disposed,
}

/// Per-frame input from the host
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameInput {
    /// Monotonic time in seconds
    pub time: f64,
    /// Point of interest followed when `follow_anchor` is set
    pub anchor: Option<Vec3>,
}

impl FrameInput {
    pub fn at(time: f64) -> Self {
        Self { time, anchor: None }
    }

    pub fn with_anchor(mut self, anchor: Vec3) -> Self {
        self.anchor = Some(anchor);
        self
    }
}

/// What one refresh did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    pub time: f64,
    /// Whole-voxel shift applied to the pyramid before accumulation
    pub shift: Option<IVec3>,
    pub captured_cascades: Vec<u32>,
    pub skipped_cascades: Vec<u32>,
    pub lights: LightSnapshot,
}

/// Everything a lighting consumer needs to sample the cache
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedVolume {
    /// Mip levels (pyramid) or the single stacked texture (cascades)
    pub levels: Vec<RadianceLevel>,
    pub resolution: u32,
    pub cascade_count: u32,
    pub cascaded: bool,
    pub anisotropic: bool,
    pub bound: f32,
    pub center: Vec3,
    pub voxel_size: f32,
    pub world_to_voxel: Mat4,
    pub voxel_to_world: Mat4,
    /// Base voxel space to the clip space of the cascade 0 capture
    pub voxel_to_projection: Mat4,
    pub lights: Option<BufferHandle>,
    pub light_count: u32,
    pub last_refresh: Option<f64>,
}

impl PublishedVolume {
    pub fn level_resolutions(&self) -> Vec<u32> {
        if self.cascaded {
            vec![self.resolution; self.cascade_count as usize]
        } else {
            self.levels.iter().map(|level| level.resolution).collect()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutput {
    pub volume: PublishedVolume,
    /// `None` when the throttle skipped this frame
    pub refresh: Option<RefreshReport>,
}

/// Fragment counter copy taken at the last accumulation cleanup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FragmentStats {
    pub collected: u32,
    pub dropped: u32,
}

#[derive(Debug, Clone, Copy)]
struct Applied {
    layout: VolumeLayout,
    kernels: KernelSet,
}

/// Volumetric radiance cache and its per-frame maintenance pipeline
pub struct VoxelGi<B: GpuBackend> {
    backend: B,
    state: PipelineState,
    config: VolumeConfig,
    applied: Option<Applied>,
    capabilities: BackendCapabilities,

    sizer: DispatchSizer,
    collector: FragmentCollector,
    lights: LightSnapshotBuilder,
    accumulator: RadianceAccumulator,
    mips: MipCascadeCache,

    throttle: RefreshThrottle,
    last_center: Option<Vec3>,
    last_geometry: Option<VolumeGeometry>,
    last_light_count: u32,
    published: Option<PublishedVolume>,
    frame: u64,
}

impl<B: GpuBackend> VoxelGi<B> {
    pub fn new(backend: B) -> Self {
        let capabilities = backend.capabilities();
        Self {
            backend,
            state: PipelineState::Idle,
            config: VolumeConfig::default(),
            applied: None,
            capabilities,
            sizer: DispatchSizer::new(),
            collector: FragmentCollector::new(),
            lights: LightSnapshotBuilder::new(),
            accumulator: RadianceAccumulator::new(),
            mips: MipCascadeCache::new(),
            throttle: RefreshThrottle::new(),
            last_center: None,
            last_geometry: None,
            last_light_count: 0,
            published: None,
            frame: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    /// Edit the configuration; structural changes apply at the next update
    pub fn config_mut(&mut self) -> &mut VolumeConfig {
        &mut self.config
    }

    pub fn set_config(&mut self, config: VolumeConfig) {
        self.config = config;
    }

    /// Layout the live resources were allocated for
    pub fn layout(&self) -> Option<&VolumeLayout> {
        self.applied.as_ref().map(|applied| &applied.layout)
    }

    pub fn kernels(&self) -> Option<&KernelSet> {
        self.applied.as_ref().map(|applied| &applied.kernels)
    }

    /// Snapped center of the last refresh
    pub fn last_center(&self) -> Option<Vec3> {
        self.last_center
    }

    pub fn last_refresh(&self) -> Option<f64> {
        self.throttle.last_refresh()
    }

    /// Result of the most recent update
    pub fn published(&self) -> Option<&PublishedVolume> {
        self.published.as_ref()
    }

    pub fn fragment_stats_buffer(&self) -> Option<BufferHandle> {
        self.accumulator.stats_buffer()
    }

    /// Allocate every resource for `config` and move to `Ready`.
    ///
    /// Already `Ready`: adopts `config`, reallocating only when the layout
    /// changed. Allowed again after `Disposed`.
    pub fn initialize(&mut self, config: VolumeConfig) -> Result<()> {
        self.config = config;
        if self.state == PipelineState::Ready {
            return self.reconcile();
        }
        self.configure()
    }

    /// Release everything. Idempotent.
    pub fn shutdown(&mut self) {
        if self.state == PipelineState::Disposed {
            return;
        }
        self.release_resources();
        self.state = PipelineState::Disposed;
        log::info!("VXGI pipeline shut down after {} frames", self.frame);
    }

    /// Run one frame: reconcile configuration, refresh unless throttled, publish
    pub fn update<C: CullingProvider + ?Sized>(&mut self, culling: &mut C, frame: FrameInput) -> Result<FrameOutput> {
        if self.state != PipelineState::Ready {
            return Err(Error::InvalidState { state: self.state, expected: PipelineState::Ready });
        }
        self.frame += 1;

        if self.config.follow_anchor {
            if let Some(anchor) = frame.anchor {
                self.config.center = anchor;
            }
        }

        self.reconcile()?;
        let Some(applied) = self.applied else {
            return Err(Error::InvalidState { state: self.state, expected: PipelineState::Ready });
        };

        let config = self.config.sanitized();
        let geometry = VolumeGeometry::new(&applied.layout, config.bound, config.center);
        let ctx = UpdateContext {
            layout: applied.layout,
            geometry,
            kernels: applied.kernels,
            cull_mask: config.cull_mask,
            samples: config.anti_aliasing.samples(),
        };

        let refresh = if self.throttle.should_refresh(frame.time, config.refresh_interval()) {
            Some(self.refresh(culling, &ctx, frame.time)?)
        } else {
            log::trace!("Frame {}: refresh throttled", self.frame);
            None
        };

        let volume = self.publish(&ctx);
        Ok(FrameOutput { volume, refresh })
    }

    fn reconcile(&mut self) -> Result<()> {
        let layout = VolumeLayout::from_config(&self.config);
        match self.applied {
            Some(applied) if applied.layout == layout => Ok(()),
            _ => self.configure(),
        }
    }

    fn configure(&mut self) -> Result<()> {
        let layout = VolumeLayout::from_config(&self.config);
        self.state = PipelineState::Configuring;
        log::info!(
            "Configuring VXGI volume: {}³ x {} cascade(s), {} direction(s), {:?} filter, {} fragment slots",
            layout.resolution,
            layout.cascade_count(),
            layout.directions(),
            layout.filter_mode,
            layout.fragment_capacity()
        );

        self.release_resources();
        self.capabilities = self.backend.capabilities();
        if let Err(err) = self.allocate_resources(&layout) {
            log::error!("VXGI allocation failed, disposing pipeline: {}", err);
            self.release_resources();
            self.state = PipelineState::Disposed;
            return Err(err);
        }

        self.applied = Some(Applied { layout, kernels: KernelSet::resolve(&layout) });
        self.state = PipelineState::Ready;
        Ok(())
    }

    fn allocate_resources(&mut self, layout: &VolumeLayout) -> Result<()> {
        let capabilities = self.capabilities;
        self.sizer.allocate(&mut self.backend, &capabilities)?;
        self.collector.allocate(&mut self.backend, layout.fragment_capacity())?;
        self.lights.allocate(&mut self.backend)?;
        self.accumulator.allocate(&mut self.backend, layout)?;
        self.mips.allocate(&mut self.backend, layout)?;
        log::debug!("Allocated {} radiance level(s)", self.mips.level_count());
        Ok(())
    }

    fn release_resources(&mut self) {
        self.sizer.release(&mut self.backend);
        self.collector.release(&mut self.backend);
        self.lights.release(&mut self.backend);
        self.accumulator.release(&mut self.backend);
        self.mips.release(&mut self.backend);

        self.applied = None;
        self.throttle.reset();
        self.last_center = None;
        self.last_geometry = None;
        self.last_light_count = 0;
        self.published = None;
    }

    fn refresh<C: CullingProvider + ?Sized>(
        &mut self,
        culling: &mut C,
        ctx: &UpdateContext,
        time: f64,
    ) -> Result<RefreshReport> {
        let geometry = &ctx.geometry;

        // ── Shift ─────────────────────────────────────────────────────────
        let shift = match self.last_center {
            Some(last) if !ctx.layout.is_cascaded() => {
                let displacement = geometry.displacement_from(last);
                (displacement != IVec3::ZERO).then_some(displacement)
            }
            _ => None,
        };
        if let Some(displacement) = shift {
            self.mips.shift(&mut self.backend, &ctx.kernels, displacement)?;
        }
        // The textures now sit at this center even if a later stage fails.
        self.last_center = Some(geometry.center);

        // ── Voxelize ──────────────────────────────────────────────────────
        self.lights.begin(geometry.world_to_voxel());
        let collected = self.collector.collect(&mut self.backend, culling, ctx, &mut self.lights)?;
        let lights = self.lights.finish(&mut self.backend)?;

        // ── Accumulate ────────────────────────────────────────────────────
        let (Some(light_buffer), Some(base)) = (self.lights.buffer(), self.mips.base()) else {
            return Err(Error::Backend("radiance resources missing during refresh".into()));
        };
        let uniforms = VolumeUniforms::new(&ctx.layout, geometry, lights.count);
        self.accumulator.accumulate(
            &mut self.backend,
            ctx,
            &uniforms,
            &self.sizer,
            &self.collector,
            light_buffer,
            base,
            &collected.captured,
        )?;

        // ── Filter ────────────────────────────────────────────────────────
        self.mips.filter(&mut self.backend, &ctx.kernels)?;
        self.backend.submit()?;

        self.throttle.mark(time);
        self.last_geometry = Some(*geometry);
        self.last_light_count = lights.count;

        log::debug!(
            "Frame {}: refreshed {} cascade(s), {} light(s), shift {:?}",
            self.frame,
            collected.captured.len(),
            lights.count,
            shift
        );

        Ok(RefreshReport {
            time,
            shift,
            captured_cascades: collected.captured,
            skipped_cascades: collected.skipped,
            lights,
        })
    }

    fn publish(&mut self, ctx: &UpdateContext) -> PublishedVolume {
        // Textures hold the last refresh; describe them with its placement.
        let geometry = self.last_geometry.unwrap_or(ctx.geometry);
        let voxel_to_world = geometry.voxel_to_world();
        let volume = PublishedVolume {
            levels: self.mips.published_levels(),
            resolution: ctx.layout.resolution,
            cascade_count: ctx.layout.cascade_count(),
            cascaded: ctx.layout.is_cascaded(),
            anisotropic: ctx.layout.anisotropic,
            bound: geometry.bound,
            center: geometry.center,
            voxel_size: geometry.voxel_size,
            world_to_voxel: geometry.world_to_voxel(),
            voxel_to_world,
            voxel_to_projection: geometry.capture(0).view_proj() * voxel_to_world,
            lights: self.lights.buffer(),
            light_count: self.last_light_count,
            last_refresh: self.throttle.last_refresh(),
        };
        self.published = Some(volume.clone());
        volume
    }
}

impl<B: GpuBackend + Readback> VoxelGi<B> {
    /// Blocking read of the fragment diagnostics. Not for the frame path.
    pub fn read_fragment_stats(&mut self) -> Result<FragmentStats> {
        let stats = self
            .accumulator
            .stats_buffer()
            .ok_or_else(|| Error::InvalidState { state: self.state, expected: PipelineState::Ready })?;
        let bytes = self.backend.read_buffer(stats)?;
        let word = |index: usize| {
            bytes
                .get(index * 4..index * 4 + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .unwrap_or(0)
        };
        Ok(FragmentStats { collected: word(0), dropped: word(1) })
    }
}
