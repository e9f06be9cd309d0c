use crate::backend::{BufferDesc, BufferHandle, BufferKind, GpuBackend, PassTag, RasterPass};
use crate::culling::{CullQuery, CullingProvider};
use crate::passes::lights::LightSnapshotBuilder;
use crate::passes::UpdateContext;
use crate::uniforms::FragmentRecord;
use crate::{Error, Result};

/// Counter slots: fragment count, overflow tally
pub const COUNTER_SLOTS: u32 = 2;

/// Cascades covered by one collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub captured: Vec<u32>,
    /// Cascades skipped because their frustum was degenerate
    pub skipped: Vec<u32>,
}

/// Rasterizes visible geometry of every cascade into the shared fragment list
pub struct FragmentCollector {
    fragments: Option<BufferHandle>,
    counter: Option<BufferHandle>,
    capacity: u32,
}

impl FragmentCollector {
    pub fn new() -> Self {
        Self { fragments: None, counter: None, capacity: 0 }
    }

    pub fn allocate<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, capacity: u32) -> Result<()> {
        let fragments = backend.allocate_buffer(&BufferDesc {
            label: "VXGI Fragments".into(),
            kind: BufferKind::Append {
                stride: std::mem::size_of::<FragmentRecord>() as u32,
                capacity,
            },
        })?;
        self.fragments = Some(fragments);

        let counter = backend.allocate_buffer(&BufferDesc {
            label: "VXGI Fragment Counter".into(),
            kind: BufferKind::Counter { slots: COUNTER_SLOTS },
        })?;
        self.counter = Some(counter);
        self.capacity = capacity;
        log::debug!("Fragment list capacity: {} ({} KiB)", capacity, capacity as u64 * 64 / 1024);
        Ok(())
    }

    pub fn release<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(fragments) = self.fragments.take() {
            backend.release_buffer(fragments);
        }
        if let Some(counter) = self.counter.take() {
            backend.release_buffer(counter);
        }
        self.capacity = 0;
    }

    pub fn fragments(&self) -> Option<BufferHandle> {
        self.fragments
    }

    pub fn counter(&self) -> Option<BufferHandle> {
        self.counter
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Voxelize every cascade, coarsest first, feeding culled lights to `lights`
    pub fn collect<B, C>(
        &self,
        backend: &mut B,
        culling: &mut C,
        ctx: &UpdateContext,
        lights: &mut LightSnapshotBuilder,
    ) -> Result<CollectReport>
    where
        B: GpuBackend + ?Sized,
        C: CullingProvider + ?Sized,
    {
        let (Some(fragments), Some(counter)) = (self.fragments, self.counter) else {
            return Err(Error::Backend("fragment collector used before allocation".into()));
        };

        let mut report = CollectReport::default();
        for cascade in 0..ctx.layout.cascade_count() {
            let capture = ctx.geometry.capture(cascade);
            let Some(frustum) = capture.frustum() else {
                log::warn!("Cascade {} has a degenerate capture frustum, skipping", cascade);
                report.skipped.push(cascade);
                continue;
            };

            let view_proj = capture.view_proj();
            let query = CullQuery { cascade, view_proj, frustum, cull_mask: ctx.cull_mask };
            let Some(visible) = culling.cull(&query) else {
                log::warn!("Culling rejected cascade {} frustum, skipping", cascade);
                report.skipped.push(cascade);
                continue;
            };

            lights.extend(&visible.lights);

            backend.rasterize(&RasterPass {
                cascade,
                view_proj,
                world_to_voxel: capture.world_to_voxel(),
                resolution: ctx.layout.resolution,
                samples: ctx.samples,
                pass_tag: PassTag::VOXELIZATION,
                cull_mask: ctx.cull_mask,
                geometry: &visible.geometry,
                fragments,
                counter,
                capacity: self.capacity,
            })?;

            log::trace!(
                "Voxelized cascade {} (extent {:.3}, {} draws, {} lights)",
                cascade,
                capture.extent,
                visible.geometry.len(),
                visible.lights.len()
            );
            report.captured.push(cascade);
        }
        Ok(report)
    }
}

impl Default for FragmentCollector {
    fn default() -> Self {
        Self::new()
    }
}
