mod common;

use glam::{IVec3, Vec3, Vec4};
use helio_vxgi::backend::RecordedCommand;
use helio_vxgi::{
    BackendCapabilities, CullQuery, CullResult, CullingProvider, Error, FilterMode, FrameInput, KernelId,
    PipelineState, Readback, Resolution, SceneCulling, SoftwareBackend, SurfaceSample, VisibleLight, VolumeConfig,
    VoxelGi,
};

use common::{add_to_scene, floor_samples, init_logger};

fn box_64() -> VolumeConfig {
    VolumeConfig::new()
        .with_resolution(Resolution::Medium)
        .with_bound(10.0)
        .with_filter_mode(FilterMode::Box)
}

fn small_box() -> VolumeConfig {
    VolumeConfig::new()
        .with_resolution(Resolution::Low)
        .with_bound(8.0)
        .with_filter_mode(FilterMode::Box)
}

fn lit_floor() -> (SoftwareBackend, SceneCulling) {
    let mut backend = SoftwareBackend::new();
    let mut scene = SceneCulling::new();
    add_to_scene(&mut backend, &mut scene, floor_samples(3.0, 0.25, -1.0, Vec4::new(0.8, 0.8, 0.8, 1.0)));
    scene.set_light(VisibleLight::directional(1, Vec3::NEG_Y, Vec3::ONE, 1.0));
    (backend, scene)
}

/// Records the view-projection of every query, optionally rejecting cascades
struct RecordingCulling {
    inner: SceneCulling,
    reject: Vec<u32>,
    queries: Vec<CullQuery>,
}

impl CullingProvider for RecordingCulling {
    fn cull(&mut self, query: &CullQuery) -> Option<CullResult> {
        self.queries.push(*query);
        if self.reject.contains(&query.cascade) {
            return None;
        }
        self.inner.cull(query)
    }
}

#[test]
fn medium_box_volume_layout_and_single_voxel_shift() {
    init_logger();
    let (backend, mut scene) = lit_floor();
    let mut gi = VoxelGi::new(backend);
    gi.initialize(box_64()).unwrap();

    let first = gi.update(&mut scene, FrameInput::at(0.0)).unwrap();
    let volume = &first.volume;
    assert_eq!(volume.voxel_size, 0.15625);
    assert_eq!(volume.level_resolutions(), vec![64, 32, 16, 8, 4, 2]);
    assert_eq!(gi.layout().unwrap().cells(), 262_144);
    assert_eq!(first.refresh.unwrap().shift, None);

    gi.config_mut().center = Vec3::new(0.15625, 0.0, 0.0);
    let second = gi.update(&mut scene, FrameInput::at(1.0)).unwrap();
    assert_eq!(second.refresh.unwrap().shift, Some(IVec3::new(1, 0, 0)));

    let third = gi.update(&mut scene, FrameInput::at(2.0)).unwrap();
    assert_eq!(third.refresh.unwrap().shift, None);

    let shifts = gi
        .backend()
        .recorded()
        .iter()
        .filter(|cmd| matches!(cmd, RecordedCommand::Dispatch { kernel: KernelId::Shift(_), .. }))
        .count();
    assert_eq!(shifts, 1);
}

#[test]
fn cascades_revoxelize_every_refresh_without_shifting() {
    init_logger();
    let (backend, scene) = lit_floor();
    let mut culling = RecordingCulling { inner: scene, reject: Vec::new(), queries: Vec::new() };
    let bound = 16.0;

    let mut gi = VoxelGi::new(backend);
    gi.initialize(VolumeConfig::new().with_resolution(Resolution::Low).with_bound(bound).with_cascades(4))
        .unwrap();

    let out = gi.update(&mut culling, FrameInput::at(0.0)).unwrap();
    assert_eq!(out.volume.cascade_count, 4);
    assert_eq!(out.volume.levels.len(), 1);
    assert_eq!(out.volume.level_resolutions(), vec![32; 4]);
    assert_eq!(out.volume.levels[0].extent, [32, 32, 128]);
    assert_eq!(out.refresh.as_ref().unwrap().captured_cascades, vec![0, 1, 2, 3]);

    // Cascade i spans bound / 2^i: its half extent lands on the clip edge.
    for query in &culling.queries {
        let half = bound / (1 << query.cascade) as f32 / 2.0;
        let edge = query.view_proj.project_point3(Vec3::new(0.0, half, 0.0));
        assert!((edge.y.abs() - 1.0).abs() < 1e-5, "cascade {}", query.cascade);
    }

    gi.config_mut().center = Vec3::new(1.0, 0.0, 0.0);
    let moved = gi.update(&mut culling, FrameInput::at(1.0)).unwrap().refresh.unwrap();
    assert_eq!(moved.shift, None);
    assert_eq!(moved.captured_cascades, vec![0, 1, 2, 3]);

    let recorded = gi.backend().recorded();
    let rasterized = recorded.iter().filter(|cmd| matches!(cmd, RecordedCommand::Rasterize { .. })).count();
    assert_eq!(rasterized, 8);
    assert!(!recorded.iter().any(|cmd| matches!(
        cmd,
        RecordedCommand::Dispatch { kernel: KernelId::Shift(_) | KernelId::Filter(_), .. }
    )));
}

#[test]
fn throttle_spaces_refreshes_and_publishes_every_frame() {
    init_logger();
    let (backend, mut scene) = lit_floor();
    let mut gi = VoxelGi::new(backend);
    gi.initialize(small_box().with_throttle(10.0)).unwrap();

    let mut refreshes = Vec::new();
    for frame in 0..60 {
        let time = frame as f64 / 60.0;
        let out = gi.update(&mut scene, FrameInput::at(time)).unwrap();
        assert!(!out.volume.levels.is_empty());
        assert!(gi.published().is_some());
        if out.refresh.is_some() {
            refreshes.push(time);
        }
        assert_eq!(out.volume.last_refresh, refreshes.last().copied());
    }

    assert!(refreshes.len() >= 5);
    for pair in refreshes.windows(2) {
        assert!(pair[1] - pair[0] >= 0.1 - 1e-9, "{:?}", pair);
    }
}

#[test]
fn reconfiguration_refreshes_immediately_despite_the_throttle() {
    let (backend, mut scene) = lit_floor();
    let mut gi = VoxelGi::new(backend);
    gi.initialize(small_box().with_throttle(1.0)).unwrap();
    assert!(gi.update(&mut scene, FrameInput::at(0.0)).unwrap().refresh.is_some());
    assert!(gi.update(&mut scene, FrameInput::at(0.1)).unwrap().refresh.is_none());

    // Fresh textures are empty; filling them does not wait out the interval
    gi.config_mut().resolution = Resolution::Medium;
    let out = gi.update(&mut scene, FrameInput::at(0.2)).unwrap();
    assert!(out.refresh.is_some());
    assert_eq!(out.volume.last_refresh, Some(0.2));

    assert!(gi.update(&mut scene, FrameInput::at(0.3)).unwrap().refresh.is_none());
}

#[test]
fn structural_change_reallocates_everything_at_once() {
    init_logger();
    let (backend, mut scene) = lit_floor();
    let mut gi = VoxelGi::new(backend);
    gi.initialize(box_64()).unwrap();
    let before = gi.update(&mut scene, FrameInput::at(0.0)).unwrap().volume;
    let buffers = gi.backend().live_buffers();
    let textures = gi.backend().live_textures();

    gi.config_mut().resolution = Resolution::High;
    let after = gi.update(&mut scene, FrameInput::at(0.1)).unwrap();

    assert_eq!(gi.layout().unwrap().resolution, 128);
    assert_eq!(after.volume.level_resolutions(), vec![128, 64, 32, 16, 8, 4, 2]);
    assert!(after.refresh.is_some());
    for level in &before.levels {
        assert!(gi.backend().texture_desc(level.texture.sampled()).is_none());
    }
    for level in &after.volume.levels {
        let desc = gi.backend().texture_desc(level.texture.sampled()).unwrap();
        assert_eq!(desc.extent, [level.resolution; 3]);
    }
    assert_eq!(gi.backend().live_buffers(), buffers);
    assert_eq!(gi.backend().live_textures(), textures + 1);

    // One clear per refresh, each sized to the layout live at the time.
    let clears: Vec<_> = gi
        .backend()
        .recorded()
        .iter()
        .filter_map(|cmd| match cmd {
            RecordedCommand::Dispatch { kernel: KernelId::Clear, groups } => Some(*groups),
            _ => None,
        })
        .collect();
    assert_eq!(clears, vec![[16, 16, 16], [32, 32, 32]]);
}

#[test]
fn allocation_failure_disposes_the_pipeline() {
    init_logger();
    let mut gi = VoxelGi::new(SoftwareBackend::new().with_memory_budget(64 * 1024));
    let err = gi.initialize(small_box()).unwrap_err();

    assert!(matches!(err, Error::Allocation { .. }));
    assert_eq!(gi.state(), PipelineState::Disposed);
    assert_eq!(gi.backend().live_buffers(), 0);
    assert_eq!(gi.backend().live_textures(), 0);
    assert_eq!(gi.backend().memory_used(), 0);

    let mut scene = SceneCulling::new();
    let err = gi.update(&mut scene, FrameInput::at(0.0)).unwrap_err();
    assert!(matches!(err, Error::InvalidState { state: PipelineState::Disposed, .. }));
}

#[test]
fn failed_reconfiguration_releases_partial_resources() {
    init_logger();
    let (backend, mut scene) = lit_floor();
    let mut gi = VoxelGi::new(backend);
    gi.initialize(small_box()).unwrap();
    gi.update(&mut scene, FrameInput::at(0.0)).unwrap();

    let budget = gi.backend().memory_used() * 2;
    gi.backend_mut().set_memory_budget(Some(budget));
    gi.config_mut().resolution = Resolution::High;

    assert!(gi.update(&mut scene, FrameInput::at(1.0)).is_err());
    assert_eq!(gi.state(), PipelineState::Disposed);
    assert_eq!(gi.backend().live_textures(), 0);
    assert_eq!(gi.backend().live_buffers(), 0);
    assert!(gi.published().is_none());

    gi.backend_mut().set_memory_budget(None);
    gi.initialize(small_box()).unwrap();
    assert_eq!(gi.state(), PipelineState::Ready);
    assert!(gi.update(&mut scene, FrameInput::at(2.0)).is_ok());
}

#[test]
fn lifecycle_entry_points_are_idempotent() {
    let mut gi = VoxelGi::new(SoftwareBackend::new());
    assert_eq!(gi.state(), PipelineState::Idle);

    let mut scene = SceneCulling::new();
    assert!(matches!(
        gi.update(&mut scene, FrameInput::at(0.0)),
        Err(Error::InvalidState { state: PipelineState::Idle, .. })
    ));

    gi.initialize(small_box()).unwrap();
    let textures = gi.backend().live_textures();
    gi.initialize(small_box()).unwrap();
    assert_eq!(gi.backend().live_textures(), textures);

    gi.shutdown();
    gi.shutdown();
    assert_eq!(gi.state(), PipelineState::Disposed);
    assert_eq!(gi.backend().live_textures(), 0);
}

#[test]
fn empty_scene_accumulates_to_zero() {
    let mut gi = VoxelGi::new(SoftwareBackend::new());
    gi.initialize(small_box()).unwrap();
    let mut scene = SceneCulling::new();
    let out = gi.update(&mut scene, FrameInput::at(0.0)).unwrap();

    for level in &out.volume.levels {
        let texels = gi.backend_mut().read_texture(level.texture.sampled()).unwrap();
        assert!(texels.iter().all(|t| *t == [0.0; 4]));
    }
    assert_eq!(gi.read_fragment_stats().unwrap().collected, 0);
}

#[test]
fn degenerate_cascade_is_skipped_without_error() {
    let (backend, scene) = lit_floor();
    let mut culling = RecordingCulling { inner: scene, reject: vec![1], queries: Vec::new() };
    let mut gi = VoxelGi::new(backend);
    gi.initialize(small_box().with_cascades(3)).unwrap();

    let refresh = gi.update(&mut culling, FrameInput::at(0.0)).unwrap().refresh.unwrap();
    assert_eq!(refresh.captured_cascades, vec![0, 2]);
    assert_eq!(refresh.skipped_cascades, vec![1]);
}

/// Texels of cascade `cascade` in a stacked level
fn cascade_slab(texels: &[[f32; 4]], extent: [u32; 3], resolution: u32, cascade: u32) -> &[[f32; 4]] {
    let plane = (extent[0] * extent[1]) as usize;
    let first = (cascade * resolution) as usize * plane;
    &texels[first..first + resolution as usize * plane]
}

#[test]
fn skipped_cascade_keeps_its_previous_radiance() {
    init_logger();
    let (backend, scene) = lit_floor();
    let mut culling = RecordingCulling { inner: scene, reject: Vec::new(), queries: Vec::new() };
    let mut gi = VoxelGi::new(backend);
    gi.initialize(small_box().with_cascades(3)).unwrap();

    let out = gi.update(&mut culling, FrameInput::at(0.0)).unwrap();
    let level = out.volume.levels[0];
    let before = gi.backend_mut().read_texture(level.texture.sampled()).unwrap();
    assert!(cascade_slab(&before, level.extent, 32, 1).iter().any(|t| t[3] > 0.0));

    // Brighter light, but cascade 1 is not captured this time
    culling.inner.set_light(VisibleLight::directional(1, Vec3::NEG_Y, Vec3::ONE, 2.0));
    culling.reject = vec![1];
    let refresh = gi.update(&mut culling, FrameInput::at(1.0)).unwrap().refresh.unwrap();
    assert_eq!(refresh.skipped_cascades, vec![1]);
    let after = gi.backend_mut().read_texture(level.texture.sampled()).unwrap();

    assert_eq!(cascade_slab(&after, level.extent, 32, 1), cascade_slab(&before, level.extent, 32, 1));
    assert_ne!(cascade_slab(&after, level.extent, 32, 0), cascade_slab(&before, level.extent, 32, 0));

    // Captured again: refreshed with the new light
    culling.reject.clear();
    gi.update(&mut culling, FrameInput::at(2.0)).unwrap();
    let recaptured = gi.backend_mut().read_texture(level.texture.sampled()).unwrap();
    assert_ne!(cascade_slab(&recaptured, level.extent, 32, 1), cascade_slab(&before, level.extent, 32, 1));
}

#[test]
fn skipped_base_capture_leaves_the_pyramid_intact() {
    init_logger();
    let (backend, scene) = lit_floor();
    let mut culling = RecordingCulling { inner: scene, reject: Vec::new(), queries: Vec::new() };
    let mut gi = VoxelGi::new(backend);
    gi.initialize(small_box()).unwrap();

    let levels = gi.update(&mut culling, FrameInput::at(0.0)).unwrap().volume.levels;
    let read_all = |gi: &mut VoxelGi<SoftwareBackend>| -> Vec<Vec<[f32; 4]>> {
        levels
            .iter()
            .map(|level| gi.backend_mut().read_texture(level.texture.sampled()).unwrap())
            .collect()
    };
    let before = read_all(&mut gi);
    assert!(before[0].iter().any(|t| t[3] > 0.0));

    culling.inner.set_light(VisibleLight::directional(1, Vec3::NEG_Y, Vec3::ONE, 2.0));
    culling.reject = vec![0];
    let refresh = gi.update(&mut culling, FrameInput::at(1.0)).unwrap().refresh.unwrap();
    assert!(refresh.captured_cascades.is_empty());
    assert_eq!(read_all(&mut gi), before);
}

#[test]
fn failed_refresh_does_not_repeat_the_shift() {
    init_logger();
    let (backend, mut scene) = lit_floor();
    let mut gi = VoxelGi::new(backend);
    gi.initialize(small_box()).unwrap();
    gi.update(&mut scene, FrameInput::at(0.0)).unwrap();

    // One voxel to the right, with aggregation failing after the shift ran
    let aggregate = gi.kernels().unwrap().aggregate;
    gi.backend_mut().set_failing_kernel(Some(aggregate));
    gi.config_mut().center = Vec3::new(0.25, 0.0, 0.0);
    assert!(gi.update(&mut scene, FrameInput::at(1.0)).is_err());
    assert_eq!(gi.last_center(), Some(Vec3::new(0.25, 0.0, 0.0)));

    gi.backend_mut().set_failing_kernel(None);
    let refresh = gi.update(&mut scene, FrameInput::at(2.0)).unwrap().refresh.unwrap();
    assert_eq!(refresh.shift, None);

    let shifts = gi
        .backend()
        .recorded()
        .iter()
        .filter(|cmd| matches!(cmd, RecordedCommand::Dispatch { kernel: KernelId::Shift(_), .. }))
        .count();
    assert_eq!(shifts, 1);
}

#[test]
fn fragment_counter_never_exceeds_capacity() {
    let mut backend = SoftwareBackend::new();
    let mut scene = SceneCulling::new();
    // 24 x 24 samples, one per voxel
    add_to_scene(&mut backend, &mut scene, floor_samples(3.0, 0.25, 0.125, Vec4::ONE));

    let mut gi = VoxelGi::new(backend);
    let scale = 100.0 / (32.0 * 32.0 * 32.0);
    gi.initialize(small_box().with_buffer_scale(scale)).unwrap();
    let capacity = gi.layout().unwrap().fragment_capacity();
    assert_eq!(capacity, 100);

    gi.update(&mut scene, FrameInput::at(0.0)).unwrap();
    let stats = gi.read_fragment_stats().unwrap();
    assert_eq!(stats.collected, 100);
    assert_eq!(stats.dropped, 576 - 100);

    // Below capacity nothing is lost
    gi.config_mut().buffer_scale = None;
    gi.update(&mut scene, FrameInput::at(1.0)).unwrap();
    let stats = gi.read_fragment_stats().unwrap();
    assert_eq!(stats.collected, 576);
    assert_eq!(stats.dropped, 0);
}

#[test]
fn lights_beyond_capacity_are_reported() {
    let (backend, mut scene) = lit_floor();
    for id in 0..70 {
        scene.set_light(VisibleLight::point(100 + id, Vec3::new(0.0, 1.0, 0.0), 4.0, Vec3::ONE, 0.1));
    }
    let mut gi = VoxelGi::new(backend);
    gi.initialize(small_box()).unwrap();

    let out = gi.update(&mut scene, FrameInput::at(0.0)).unwrap();
    let lights = out.refresh.unwrap().lights;
    assert_eq!(lights.count, 64);
    assert_eq!(lights.dropped, 7);
    assert_eq!(out.volume.light_count, 64);
}

#[test]
fn follow_anchor_recenters_on_the_frame_anchor() {
    let (backend, mut scene) = lit_floor();
    let mut gi = VoxelGi::new(backend);
    gi.initialize(small_box().with_follow_anchor(true)).unwrap();

    let out = gi
        .update(&mut scene, FrameInput::at(0.0).with_anchor(Vec3::new(1.1, 0.0, -0.3)))
        .unwrap();
    assert_eq!(out.volume.center, Vec3::new(1.0, 0.0, -0.5));
    assert_eq!(gi.last_center(), Some(Vec3::new(1.0, 0.0, -0.5)));
}

#[test]
fn capacity_sized_dispatch_matches_indirect_dispatch() {
    let run = |capabilities: BackendCapabilities| {
        let mut backend = SoftwareBackend::new().with_capabilities(capabilities);
        let mut scene = SceneCulling::new();
        add_to_scene(&mut backend, &mut scene, floor_samples(2.0, 0.25, -0.5, Vec4::new(0.5, 0.25, 1.0, 1.0)));
        scene.set_light(VisibleLight::directional(1, Vec3::new(0.3, -1.0, 0.1), Vec3::ONE, 2.0));

        let mut gi = VoxelGi::new(backend);
        gi.initialize(small_box()).unwrap();
        let out = gi.update(&mut scene, FrameInput::at(0.0)).unwrap();
        let base = out.volume.levels[0].texture.sampled();
        let indirect = gi
            .backend()
            .recorded()
            .iter()
            .any(|cmd| matches!(cmd, RecordedCommand::DispatchIndirect { .. }));
        (gi.backend_mut().read_texture(base).unwrap(), indirect)
    };

    let (gpu_sized, used_indirect) = run(BackendCapabilities::default());
    let (capacity_sized, fallback_indirect) = run(BackendCapabilities {
        supports_indirect_dispatch: false,
        ..Default::default()
    });

    assert!(used_indirect);
    assert!(!fallback_indirect);
    assert_eq!(gpu_sized, capacity_sized);
    assert!(gpu_sized.iter().any(|t| t[0] > 0.0));
}

#[test]
fn geometry_outside_the_pass_tag_is_not_voxelized() {
    let mut backend = SoftwareBackend::new();
    let mut scene = SceneCulling::new();
    let samples = vec![SurfaceSample::new(Vec3::new(0.1, 0.1, 0.1), Vec3::Y, Vec4::ONE)];
    let handle = backend.register_geometry_with_tags(samples, 1, vec![helio_vxgi::PassTag("ShadowCaster")]);
    scene.add_geometry(handle, helio_vxgi::Aabb::new(Vec3::ZERO, Vec3::splat(0.2)), 1);

    let mut gi = VoxelGi::new(backend);
    gi.initialize(small_box()).unwrap();
    gi.update(&mut scene, FrameInput::at(0.0)).unwrap();
    assert_eq!(gi.read_fragment_stats().unwrap().collected, 0);
}
