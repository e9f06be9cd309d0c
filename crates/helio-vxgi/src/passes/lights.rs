use std::collections::HashSet;

use glam::{Mat4, Vec3};

use crate::backend::{BufferDesc, BufferHandle, BufferKind, GpuBackend};
use crate::culling::{LightId, LightKind, VisibleLight};
use crate::uniforms::LightSourceRecord;
use crate::{Error, Result};

/// Fixed capacity of the light snapshot
pub const MAX_LIGHTS: usize = 64;

/// Result of packing one frame's lights
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightSnapshot {
    pub count: u32,
    /// Supported lights that did not fit
    pub dropped: u32,
}

/// Whether a light can contribute to accumulation at all
pub fn is_supported(light: &VisibleLight) -> bool {
    matches!(light.kind, LightKind::Directional | LightKind::Point | LightKind::Spot)
        && light.final_color().max_element() > 0.0
}

/// Pack a light; `world_to_voxel` is the base volume's transform
pub fn pack_light(light: &VisibleLight, world_to_voxel: Mat4) -> LightSourceRecord {
    let voxel_position = world_to_voxel.transform_point3(light.position);
    let cos_half_angle = (0.5 * light.spot_angle.to_radians()).cos();
    let direction = light.direction.normalize_or(Vec3::NEG_Y);
    LightSourceRecord {
        position_and_kind: light.position.extend(light.kind as u32 as f32).to_array(),
        direction_and_range: direction.extend(light.range).to_array(),
        color_and_intensity: light.color.extend(light.intensity).to_array(),
        voxel_position_and_spot: voxel_position.extend(cos_half_angle).to_array(),
    }
}

/// Collects the visible lights of every cascade into one record set
pub struct LightSnapshotBuilder {
    buffer: Option<BufferHandle>,
    records: Vec<LightSourceRecord>,
    seen: HashSet<LightId>,
    world_to_voxel: Mat4,
    dropped: u32,
}

impl LightSnapshotBuilder {
    pub fn new() -> Self {
        Self {
            buffer: None,
            records: Vec::with_capacity(MAX_LIGHTS),
            seen: HashSet::new(),
            world_to_voxel: Mat4::IDENTITY,
            dropped: 0,
        }
    }

    pub fn allocate<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) -> Result<()> {
        let buffer = backend.allocate_buffer(&BufferDesc {
            label: "VXGI Light Sources".into(),
            kind: BufferKind::Structured {
                stride: std::mem::size_of::<LightSourceRecord>() as u32,
                count: MAX_LIGHTS as u32,
            },
        })?;
        self.buffer = Some(buffer);
        Ok(())
    }

    pub fn release<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(buffer) = self.buffer.take() {
            backend.release_buffer(buffer);
        }
    }

    pub fn buffer(&self) -> Option<BufferHandle> {
        self.buffer
    }

    /// Start a new snapshot
    pub fn begin(&mut self, world_to_voxel: Mat4) {
        self.records.clear();
        self.seen.clear();
        self.world_to_voxel = world_to_voxel;
        self.dropped = 0;
    }

    /// Add lights in visibility order; repeats across cascades are ignored
    pub fn extend<'a>(&mut self, lights: impl IntoIterator<Item = &'a VisibleLight>) {
        for light in lights {
            if !is_supported(light) || !self.seen.insert(light.id) {
                continue;
            }
            if self.records.len() < MAX_LIGHTS {
                self.records.push(pack_light(light, self.world_to_voxel));
            } else {
                self.dropped += 1;
            }
        }
    }

    pub fn records(&self) -> &[LightSourceRecord] {
        &self.records
    }

    /// Upload the snapshot
    pub fn finish<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) -> Result<LightSnapshot> {
        let buffer = self
            .buffer
            .ok_or_else(|| Error::Backend("light buffer used before allocation".into()))?;
        if !self.records.is_empty() {
            backend.write_buffer(buffer, 0, bytemuck::cast_slice(&self.records))?;
        }
        if self.dropped > 0 {
            log::warn!("Light snapshot full, dropped {} lights", self.dropped);
        }
        Ok(LightSnapshot { count: self.records.len() as u32, dropped: self.dropped })
    }
}

impl Default for LightSnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: u64) -> VisibleLight {
        VisibleLight::point(id, Vec3::new(id as f32, 0.0, 0.0), 5.0, Vec3::ONE, 1.0)
    }

    #[test]
    fn filters_unsupported_and_black_lights() {
        let mut builder = LightSnapshotBuilder::new();
        builder.begin(Mat4::IDENTITY);

        let mut area = point(1);
        area.kind = LightKind::Area;
        let black = VisibleLight::point(2, Vec3::ZERO, 5.0, Vec3::ONE, 0.0);
        builder.extend([&area, &black, &point(3)]);

        assert_eq!(builder.records().len(), 1);
        assert_eq!(builder.records()[0].position_and_kind, [3.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn truncates_in_visibility_order() {
        let lights: Vec<_> = (0..70).map(point).collect();
        let mut builder = LightSnapshotBuilder::new();
        builder.begin(Mat4::IDENTITY);
        builder.extend(&lights);

        assert_eq!(builder.records().len(), MAX_LIGHTS);
        assert_eq!(builder.records()[63].position_and_kind[0], 63.0);
        assert_eq!(builder.dropped, 6);
    }

    #[test]
    fn repeated_lights_pack_once() {
        let lights = [point(1), point(2)];
        let mut builder = LightSnapshotBuilder::new();
        builder.begin(Mat4::IDENTITY);
        builder.extend(&lights);
        builder.extend(&lights);
        assert_eq!(builder.records().len(), 2);
    }

    #[test]
    fn spot_cone_packs_cosine_of_half_angle() {
        let spot = VisibleLight::spot(1, Vec3::ZERO, Vec3::NEG_Y, 4.0, 90.0, Vec3::ONE, 1.0);
        let record = pack_light(&spot, Mat4::from_translation(Vec3::splat(2.0)));
        assert!((record.voxel_position_and_spot[3] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert_eq!(&record.voxel_position_and_spot[..3], &[2.0, 2.0, 2.0]);
        assert_eq!(record.position_and_kind[3], 2.0);
    }
}
