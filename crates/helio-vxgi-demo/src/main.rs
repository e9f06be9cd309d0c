//! Headless VXGI demo.
//!
//! Flies an anchor across a lit floor with an emissive pillar and logs what
//! every frame refreshes. Runs on the software backend unless `--gpu` is given.
//!
//!   RUST_LOG=debug cargo run --bin vxgi_demo -- --gpu --cascades

use glam::{Vec3, Vec4};
use helio_vxgi::{
    FilterMode, FrameInput, GpuBackend, Readback, Resolution, SceneCulling, SoftwareBackend, SurfaceSample,
    VisibleLight, VolumeConfig, VoxelGi,
};
use helio_vxgi_wgpu::{MeshMaterial, VoxelVertex, WgpuBackend};

const FRAMES: u32 = 120;
const FRAME_TIME: f64 = 1.0 / 60.0;

struct Options {
    gpu: bool,
    cascades: bool,
}

impl Options {
    fn from_args() -> Self {
        let args: Vec<String> = std::env::args().skip(1).collect();
        Self {
            gpu: args.iter().any(|a| a == "--gpu"),
            cascades: args.iter().any(|a| a == "--cascades"),
        }
    }
}

fn config(options: &Options) -> VolumeConfig {
    let config = VolumeConfig::new()
        .with_resolution(Resolution::Medium)
        .with_bound(16.0)
        .with_filter_mode(FilterMode::Gaussian3)
        .with_throttle(30.0)
        .with_follow_anchor(true);
    if options.cascades {
        config.with_cascades(4)
    } else {
        config
    }
}

fn lights(scene: &mut SceneCulling) {
    scene.set_light(VisibleLight::directional(1, Vec3::new(-0.3, -1.0, -0.2), Vec3::new(1.0, 0.95, 0.9), 2.0));
    scene.set_light(VisibleLight::point(2, Vec3::new(2.0, 1.5, 0.0), 6.0, Vec3::new(1.0, 0.4, 0.2), 4.0));
}

/// Floor and pillar as pre-sampled surface points
fn software_scene() -> (SoftwareBackend, SceneCulling) {
    let mut backend = SoftwareBackend::new();
    let mut scene = SceneCulling::new();

    let mut floor = Vec::new();
    for i in 0..64 {
        for k in 0..64 {
            let position = Vec3::new(-8.0 + (i as f32 + 0.5) * 0.25, 0.0, -8.0 + (k as f32 + 0.5) * 0.25);
            floor.push(SurfaceSample::new(position, Vec3::Y, Vec4::new(0.8, 0.8, 0.8, 1.0)));
        }
    }
    let mut pillar = Vec::new();
    for j in 0..16 {
        for side in [Vec3::X, Vec3::NEG_X, Vec3::Z, Vec3::NEG_Z] {
            let position = side * 0.5 + Vec3::Y * (j as f32 + 0.5) * 0.25;
            pillar.push(
                SurfaceSample::new(position, side, Vec4::new(0.2, 0.6, 1.0, 1.0)).with_emission(Vec3::new(0.1, 0.3, 0.5)),
            );
        }
    }

    for samples in [floor, pillar] {
        if let Some(bounds) = helio_vxgi::Aabb::from_points(samples.iter().map(|s| s.position)) {
            let handle = backend.register_geometry(samples, 1);
            scene.add_geometry(handle, bounds, 1);
        }
    }
    lights(&mut scene);
    (backend, scene)
}

/// Floor quad and an emissive pillar box as triangle meshes
fn gpu_scene(mut backend: WgpuBackend) -> (WgpuBackend, SceneCulling) {
    let mut scene = SceneCulling::new();

    let floor = [
        VoxelVertex::new(Vec3::new(-8.0, 0.0, -8.0), Vec3::Y),
        VoxelVertex::new(Vec3::new(8.0, 0.0, -8.0), Vec3::Y),
        VoxelVertex::new(Vec3::new(8.0, 0.0, 8.0), Vec3::Y),
        VoxelVertex::new(Vec3::new(-8.0, 0.0, 8.0), Vec3::Y),
    ];
    let floor = backend.register_mesh(&floor, &[0, 1, 2, 0, 2, 3], MeshMaterial::new(Vec4::new(0.8, 0.8, 0.8, 1.0)), 1);

    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    for side in [Vec3::X, Vec3::NEG_X, Vec3::Z, Vec3::NEG_Z] {
        let tangent = Vec3::Y.cross(side);
        let base = vertices.len() as u32;
        for (u, v) in [(-0.5, 0.0), (0.5, 0.0), (0.5, 4.0), (-0.5, 4.0)] {
            vertices.push(VoxelVertex::new(side * 0.5 + tangent * u + Vec3::Y * v, side));
        }
        indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    let material = MeshMaterial::new(Vec4::new(0.2, 0.6, 1.0, 1.0)).with_emission(Vec3::new(0.1, 0.3, 0.5));
    let pillar = backend.register_mesh(&vertices, &indices, material, 1);

    for handle in [floor, pillar] {
        if let Some(bounds) = backend.mesh_bounds(handle) {
            scene.add_geometry(handle, bounds, 1);
        }
    }
    lights(&mut scene);
    (backend, scene)
}

fn run<B: GpuBackend + Readback>(backend: B, scene: &mut SceneCulling, config: VolumeConfig) -> helio_vxgi::Result<()> {
    let mut gi = VoxelGi::new(backend);
    gi.initialize(config)?;

    let mut refreshes = 0;
    for frame in 0..FRAMES {
        let time = frame as f64 * FRAME_TIME;
        let anchor = Vec3::new((time * 1.5) as f32 - 3.0, 1.0, 0.0);
        let output = gi.update(scene, FrameInput::at(time).with_anchor(anchor))?;

        if let Some(report) = output.refresh {
            refreshes += 1;
            log::info!(
                "frame {:3}: refresh at {:.3}s, shift {:?}, cascades {:?}, {} lights ({} dropped)",
                frame,
                report.time,
                report.shift,
                report.captured_cascades,
                report.lights.count,
                report.lights.dropped
            );
            if !report.skipped_cascades.is_empty() {
                log::warn!("frame {:3}: skipped cascades {:?}", frame, report.skipped_cascades);
            }
        }
    }

    let stats = gi.read_fragment_stats()?;
    if let Some(volume) = gi.published() {
        log::info!(
            "{} refreshes over {} frames; center {:?}, voxel size {}, levels {:?}",
            refreshes,
            FRAMES,
            volume.center,
            volume.voxel_size,
            volume.level_resolutions()
        );
    }
    log::info!("Last refresh collected {} fragments, dropped {}", stats.collected, stats.dropped);

    gi.shutdown();
    Ok(())
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let options = Options::from_args();
    let config = config(&options);

    let result = if options.gpu {
        match WgpuBackend::headless() {
            Ok(backend) => {
                let (backend, mut scene) = gpu_scene(backend);
                run(backend, &mut scene, config)
            }
            Err(e) => Err(e),
        }
    } else {
        let (backend, mut scene) = software_scene();
        run(backend, &mut scene, config)
    };

    if let Err(e) = result {
        log::error!("VXGI demo failed: {}", e);
        std::process::exit(1);
    }
}
