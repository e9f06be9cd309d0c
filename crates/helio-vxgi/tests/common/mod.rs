#![allow(dead_code)]

use glam::{Vec3, Vec4};
use helio_vxgi::{Aabb, GeometryHandle, SceneCulling, SoftwareBackend, SurfaceSample};

/// Upward-facing grid of samples at `height`, one per `spacing`, centered on the origin
pub fn floor_samples(half_extent: f32, spacing: f32, height: f32, albedo: Vec4) -> Vec<SurfaceSample> {
    let steps = (2.0 * half_extent / spacing) as i32;
    let mut samples = Vec::new();
    for i in 0..steps {
        for k in 0..steps {
            let position = Vec3::new(
                -half_extent + (i as f32 + 0.5) * spacing,
                height,
                -half_extent + (k as f32 + 0.5) * spacing,
            );
            samples.push(SurfaceSample::new(position, Vec3::Y, albedo));
        }
    }
    samples
}

/// Register `samples` on the backend and make them visible to the returned culler
pub fn add_to_scene(backend: &mut SoftwareBackend, scene: &mut SceneCulling, samples: Vec<SurfaceSample>) -> GeometryHandle {
    let bounds = Aabb::from_points(samples.iter().map(|s| s.position)).expect("non-empty geometry");
    let handle = backend.register_geometry(samples, 1);
    scene.add_geometry(handle, bounds, 1);
    handle
}

pub fn texel_index(extent: [u32; 3], x: u32, y: u32, z: u32) -> usize {
    (x + y * extent[0] + z * extent[0] * extent[1]) as usize
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
