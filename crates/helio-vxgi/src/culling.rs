//! Culling provider contract consumed by the fragment collector.

use glam::{Mat4, Vec3, Vec4};

/// Opaque handle of a piece of scene geometry known to the raster backend
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct GeometryHandle(pub u64);

/// Stable identity of a light across cascades and frames
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct LightId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Directional = 0,
    Point = 1,
    Spot = 2,
    /// Reported by some providers; never packed into the light snapshot
    Area = 3,
}

/// A light the culling provider found visible from a capture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleLight {
    pub id: LightId,
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub position: Vec3,
    /// Direction the light travels along (normalized)
    pub direction: Vec3,
    pub range: f32,
    /// Full cone angle in degrees (spot lights)
    pub spot_angle: f32,
}

impl VisibleLight {
    pub fn directional(id: u64, direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            id: LightId(id),
            kind: LightKind::Directional,
            color,
            intensity,
            position: Vec3::ZERO,
            direction: direction.normalize_or_zero(),
            range: f32::INFINITY,
            spot_angle: 0.0,
        }
    }

    pub fn point(id: u64, position: Vec3, range: f32, color: Vec3, intensity: f32) -> Self {
        Self {
            id: LightId(id),
            kind: LightKind::Point,
            color,
            intensity,
            position,
            direction: Vec3::NEG_Y,
            range,
            spot_angle: 0.0,
        }
    }

    pub fn spot(
        id: u64,
        position: Vec3,
        direction: Vec3,
        range: f32,
        spot_angle: f32,
        color: Vec3,
        intensity: f32,
    ) -> Self {
        Self {
            id: LightId(id),
            kind: LightKind::Spot,
            color,
            intensity,
            position,
            direction: direction.normalize_or_zero(),
            range,
            spot_angle,
        }
    }

    /// Color after intensity scaling
    pub fn final_color(&self) -> Vec3 {
        self.color * self.intensity
    }
}

/// What the collector asks for: one cascade's capture frustum
#[derive(Debug, Clone, Copy)]
pub struct CullQuery {
    pub cascade: u32,
    pub view_proj: Mat4,
    pub frustum: Frustum,
    pub cull_mask: u32,
}

#[derive(Debug, Clone, Default)]
pub struct CullResult {
    pub geometry: Vec<GeometryHandle>,
    /// Visible lights in visibility order
    pub lights: Vec<VisibleLight>,
}

/// Scene visibility, owned by the host.
///
/// Returning `None` marks the query frustum as unusable; the cascade is
/// skipped for the frame.
pub trait CullingProvider {
    fn cull(&mut self, query: &CullQuery) -> Option<CullResult>;
}

/// Plane-extracted frustum (depth range 0..1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_matrix(view_projection: Mat4) -> Option<Self> {
        let mut planes = [
            view_projection.row(3) + view_projection.row(0), // Left
            view_projection.row(3) - view_projection.row(0), // Right
            view_projection.row(3) + view_projection.row(1), // Bottom
            view_projection.row(3) - view_projection.row(1), // Top
            view_projection.row(2),                          // Near
            view_projection.row(3) - view_projection.row(2), // Far
        ];

        for plane in &mut planes {
            let length = plane.truncate().length();
            if !length.is_finite() || length <= f32::EPSILON {
                return None;
            }
            *plane /= length;
        }

        Some(Self { planes })
    }

    pub fn test_point(&self, point: Vec3) -> bool {
        self.test_sphere(point, 0.0)
    }

    pub fn test_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.dot(center.extend(1.0)) >= -radius)
    }

    pub fn test_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let p = Vec3::new(
                if plane.x > 0.0 { aabb.max.x } else { aabb.min.x },
                if plane.y > 0.0 { aabb.max.y } else { aabb.min.y },
                if plane.z > 0.0 { aabb.max.z } else { aabb.min.z },
            );
            plane.dot(p.extend(1.0)) >= 0.0
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min: min.min(max), max: min.max(max) }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        Some(points.fold(Self::new(first, first), |aabb, p| Self {
            min: aabb.min.min(p),
            max: aabb.max.max(p),
        }))
    }
}

struct SceneEntry {
    handle: GeometryHandle,
    bounds: Aabb,
    layer_mask: u32,
}

/// Ready-made [`CullingProvider`] over registered bounds and lights
#[derive(Default)]
pub struct SceneCulling {
    entries: Vec<SceneEntry>,
    lights: Vec<VisibleLight>,
}

impl SceneCulling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_geometry(&mut self, handle: GeometryHandle, bounds: Aabb, layer_mask: u32) {
        self.entries.push(SceneEntry { handle, bounds, layer_mask });
    }

    pub fn remove_geometry(&mut self, handle: GeometryHandle) {
        self.entries.retain(|entry| entry.handle != handle);
    }

    /// Add or replace a light (matched by id)
    pub fn set_light(&mut self, light: VisibleLight) {
        match self.lights.iter_mut().find(|l| l.id == light.id) {
            Some(existing) => *existing = light,
            None => self.lights.push(light),
        }
    }

    pub fn remove_light(&mut self, id: LightId) {
        self.lights.retain(|light| light.id != id);
    }

    pub fn clear_lights(&mut self) {
        self.lights.clear();
    }

    fn light_visible(frustum: &Frustum, light: &VisibleLight) -> bool {
        match light.kind {
            LightKind::Directional => true,
            _ => frustum.test_sphere(light.position, light.range.max(0.0)),
        }
    }
}

impl CullingProvider for SceneCulling {
    fn cull(&mut self, query: &CullQuery) -> Option<CullResult> {
        let geometry = self
            .entries
            .iter()
            .filter(|entry| entry.layer_mask & query.cull_mask != 0)
            .filter(|entry| query.frustum.test_aabb(&entry.bounds))
            .map(|entry| entry.handle)
            .collect();
        let lights = self
            .lights
            .iter()
            .filter(|light| Self::light_visible(&query.frustum, light))
            .copied()
            .collect();
        Some(CullResult { geometry, lights })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::CaptureVolume;

    fn query(extent: f32) -> CullQuery {
        let capture = CaptureVolume::new(0, Vec3::ZERO, extent, 32);
        CullQuery {
            cascade: 0,
            view_proj: capture.view_proj(),
            frustum: capture.frustum().expect("valid capture"),
            cull_mask: u32::MAX,
        }
    }

    #[test]
    fn frustum_contains_capture_box_only() {
        let q = query(4.0);
        assert!(q.frustum.test_point(Vec3::new(1.9, -1.9, 1.9)));
        assert!(!q.frustum.test_point(Vec3::new(2.5, 0.0, 0.0)));
        assert!(!q.frustum.test_point(Vec3::new(0.0, 0.0, -2.5)));
        assert!(q.frustum.test_sphere(Vec3::new(2.5, 0.0, 0.0), 1.0));
    }

    #[test]
    fn singular_matrix_is_degenerate() {
        assert!(Frustum::from_matrix(Mat4::ZERO).is_none());
    }

    #[test]
    fn scene_culling_filters_by_bounds_and_mask() {
        let mut scene = SceneCulling::new();
        scene.add_geometry(GeometryHandle(1), Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5)), 1);
        scene.add_geometry(GeometryHandle(2), Aabb::new(Vec3::splat(10.0), Vec3::splat(11.0)), 1);
        scene.add_geometry(GeometryHandle(3), Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5)), 2);
        scene.set_light(VisibleLight::point(7, Vec3::splat(50.0), 1.0, Vec3::ONE, 1.0));
        scene.set_light(VisibleLight::directional(8, Vec3::NEG_Y, Vec3::ONE, 1.0));

        let mut q = query(4.0);
        q.cull_mask = 1;
        let result = scene.cull(&q).expect("scene culling always answers");
        assert_eq!(result.geometry, vec![GeometryHandle(1)]);
        assert_eq!(result.lights.len(), 1);
        assert_eq!(result.lights[0].id, LightId(8));
    }

    #[test]
    fn set_light_replaces_by_id() {
        let mut scene = SceneCulling::new();
        scene.set_light(VisibleLight::directional(1, Vec3::NEG_Y, Vec3::ONE, 1.0));
        scene.set_light(VisibleLight::directional(1, Vec3::NEG_Y, Vec3::ONE, 3.0));
        let result = scene.cull(&query(4.0)).unwrap();
        assert_eq!(result.lights.len(), 1);
        assert_eq!(result.lights[0].intensity, 3.0);
    }
}
