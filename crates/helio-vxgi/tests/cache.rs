mod common;

use glam::{IVec3, Vec3, Vec4};
use helio_vxgi::backend::RecordedCommand;
use helio_vxgi::passes::{
    DispatchSizer, FragmentCollector, LightSnapshotBuilder, MipCascadeCache, RadianceAccumulator, UpdateContext,
};
use helio_vxgi::uniforms::VolumeUniforms;
use helio_vxgi::{
    FilterMode, FrameInput, GpuBackend, KernelId, KernelSet, Readback, Resolution, SceneCulling, SoftwareBackend,
    SurfaceSample, VolumeConfig, VolumeGeometry, VolumeLayout, VoxelGi,
};

use common::{add_to_scene, init_logger, texel_index};

const BOUND: f32 = 8.0;

/// The cache passes wired together by hand, without the orchestrator
struct Cache {
    backend: SoftwareBackend,
    layout: VolumeLayout,
    kernels: KernelSet,
    sizer: DispatchSizer,
    collector: FragmentCollector,
    lights: LightSnapshotBuilder,
    accumulator: RadianceAccumulator,
    mips: MipCascadeCache,
}

impl Cache {
    fn new(backend: SoftwareBackend, config: &VolumeConfig) -> Self {
        let mut backend = backend;
        let layout = VolumeLayout::from_config(config);
        let capabilities = backend.capabilities();

        let mut sizer = DispatchSizer::new();
        let mut collector = FragmentCollector::new();
        let mut lights = LightSnapshotBuilder::new();
        let mut accumulator = RadianceAccumulator::new();
        let mut mips = MipCascadeCache::new();
        sizer.allocate(&mut backend, &capabilities).unwrap();
        collector.allocate(&mut backend, layout.fragment_capacity()).unwrap();
        lights.allocate(&mut backend).unwrap();
        accumulator.allocate(&mut backend, &layout).unwrap();
        mips.allocate(&mut backend, &layout).unwrap();

        Self { backend, layout, kernels: KernelSet::resolve(&layout), sizer, collector, lights, accumulator, mips }
    }

    fn accumulate_at(&mut self, scene: &mut SceneCulling, center: Vec3) -> Vec<[f32; 4]> {
        let geometry = VolumeGeometry::new(&self.layout, BOUND, center);
        let ctx = UpdateContext {
            layout: self.layout,
            geometry,
            kernels: self.kernels,
            cull_mask: u32::MAX,
            samples: 1,
        };

        self.lights.begin(geometry.world_to_voxel());
        let collected = self.collector.collect(&mut self.backend, scene, &ctx, &mut self.lights).unwrap();
        let snapshot = self.lights.finish(&mut self.backend).unwrap();
        let uniforms = VolumeUniforms::new(&self.layout, &geometry, snapshot.count);
        let base = self.mips.base().unwrap();
        self.accumulator
            .accumulate(
                &mut self.backend,
                &ctx,
                &uniforms,
                &self.sizer,
                &self.collector,
                self.lights.buffer().unwrap(),
                base,
                &collected.captured,
            )
            .unwrap();
        self.backend.read_texture(base).unwrap()
    }

    fn shift(&mut self, displacement: IVec3) -> Vec<[f32; 4]> {
        self.mips.shift(&mut self.backend, &self.kernels, displacement).unwrap();
        self.backend.read_texture(self.mips.base().unwrap()).unwrap()
    }
}

fn box_32() -> VolumeConfig {
    VolumeConfig::new()
        .with_resolution(Resolution::Low)
        .with_bound(BOUND)
        .with_filter_mode(FilterMode::Box)
}

/// Emissive cube of samples at voxel centers, each with its own color
fn emissive_block(backend: &mut SoftwareBackend, scene: &mut SceneCulling) {
    let mut samples = Vec::new();
    for i in 0..6 {
        for j in 0..6 {
            for k in 0..6 {
                let position = Vec3::new(i as f32, j as f32, k as f32) * 0.25 - Vec3::splat(0.625);
                let emission = Vec3::new(i as f32 * 0.125, j as f32 * 0.25, 0.5 + k as f32 * 0.0625);
                samples.push(SurfaceSample::new(position, Vec3::Y, Vec4::ONE).with_emission(emission));
            }
        }
    }
    add_to_scene(backend, scene, samples);
}

#[test]
fn shifted_volume_matches_accumulation_at_new_center() {
    init_logger();
    let mut backend = SoftwareBackend::new();
    let mut scene = SceneCulling::new();
    emissive_block(&mut backend, &mut scene);
    let mut cache = Cache::new(backend, &box_32());

    let displacement = IVec3::new(2, -1, 0);
    let old_center = Vec3::ZERO;
    let new_center = old_center + displacement.as_vec3() * 0.25;

    cache.accumulate_at(&mut scene, old_center);
    let shifted = cache.shift(displacement);
    let fresh = cache.accumulate_at(&mut scene, new_center);

    let r = 32;
    let extent = [r as u32; 3];
    let mut compared = 0;
    let mut lit = 0;
    for z in 0..r {
        for y in 0..r {
            for x in 0..r {
                let source = IVec3::new(x, y, z) + displacement;
                if source.cmplt(IVec3::ZERO).any() || source.cmpge(IVec3::splat(r)).any() {
                    continue;
                }
                let index = texel_index(extent, x as u32, y as u32, z as u32);
                assert_eq!(shifted[index], fresh[index], "texel {} {} {}", x, y, z);
                compared += 1;
                if fresh[index][3] > 0.0 {
                    lit += 1;
                }
            }
        }
    }
    assert_eq!(compared, 30 * 31 * 32);
    assert_eq!(lit, 216);
}

#[test]
fn cells_without_fragments_are_exactly_zero() {
    let mut backend = SoftwareBackend::new();
    let mut scene = SceneCulling::new();
    let sample =
        SurfaceSample::new(Vec3::splat(0.125), Vec3::Y, Vec4::ONE).with_emission(Vec3::new(0.5, 0.25, 0.0));
    add_to_scene(&mut backend, &mut scene, vec![sample]);
    let mut cache = Cache::new(backend, &box_32());

    let texels = cache.accumulate_at(&mut scene, Vec3::ZERO);
    let lit = texel_index([32; 3], 16, 16, 16);
    assert_eq!(texels[lit], [0.5, 0.25, 0.0, 1.0]);
    for (index, texel) in texels.iter().enumerate() {
        if index != lit {
            assert_eq!(*texel, [0.0; 4], "texel {}", index);
        }
    }
}

#[test]
fn repeated_samples_average_per_cell() {
    let mut backend = SoftwareBackend::new();
    let mut scene = SceneCulling::new();
    let samples = vec![
        SurfaceSample::new(Vec3::new(0.05, 0.05, 0.05), Vec3::Y, Vec4::ONE).with_emission(Vec3::new(1.0, 0.0, 0.0)),
        SurfaceSample::new(Vec3::new(0.2, 0.2, 0.2), Vec3::Y, Vec4::ONE).with_emission(Vec3::new(0.0, 0.0, 1.0)),
    ];
    add_to_scene(&mut backend, &mut scene, samples);
    let mut cache = Cache::new(backend, &box_32());

    let texels = cache.accumulate_at(&mut scene, Vec3::ZERO);
    assert_eq!(texels[texel_index([32; 3], 16, 16, 16)], [0.5, 0.0, 0.5, 1.0]);
}

#[test]
fn anisotropic_volume_bins_by_facing() {
    let mut backend = SoftwareBackend::new();
    let mut scene = SceneCulling::new();
    let sample = SurfaceSample::new(Vec3::splat(0.125), Vec3::X, Vec4::ONE).with_emission(Vec3::ONE);
    add_to_scene(&mut backend, &mut scene, vec![sample]);
    let mut cache = Cache::new(backend, &box_32().with_anisotropic(true));

    let texels = cache.accumulate_at(&mut scene, Vec3::ZERO);
    let extent = [32 * 6, 32, 32];
    assert_eq!(texels[texel_index(extent, 16, 16, 16)], [1.0; 4]);
    for direction in 1..6 {
        assert_eq!(texels[texel_index(extent, 16 + direction * 32, 16, 16)], [0.0; 4], "direction {}", direction);
    }
}

#[test]
fn cascades_stack_along_depth() {
    let mut backend = SoftwareBackend::new();
    let mut scene = SceneCulling::new();
    let sample = SurfaceSample::new(Vec3::splat(0.1875), Vec3::Y, Vec4::ONE).with_emission(Vec3::ONE);
    add_to_scene(&mut backend, &mut scene, vec![sample]);
    let mut cache = Cache::new(backend, &box_32().with_cascades(2));

    let texels = cache.accumulate_at(&mut scene, Vec3::ZERO);
    let extent = [32, 32, 64];
    // Cascade 0: voxel size 0.25, cascade 1: 0.125
    assert_eq!(texels[texel_index(extent, 16, 16, 16)], [1.0; 4]);
    assert_eq!(texels[texel_index(extent, 17, 17, 17 + 32)], [1.0; 4]);
    assert_eq!(texels.iter().filter(|t| t[3] > 0.0).count(), 2);
}

#[test]
fn symmetric_gaussian_pyramid_filters_coarsest_last() {
    init_logger();
    let mut backend = SoftwareBackend::new();
    let mut scene = SceneCulling::new();
    let mut samples = Vec::new();
    for i in 0..32 {
        for j in 0..32 {
            for k in 0..32 {
                let position = Vec3::new(i as f32, j as f32, k as f32) * 0.25 - Vec3::splat(3.875);
                samples.push(SurfaceSample::new(position, Vec3::Y, Vec4::ONE).with_emission(Vec3::splat(0.25)));
            }
        }
    }
    add_to_scene(&mut backend, &mut scene, samples);

    let mut gi = VoxelGi::new(backend);
    gi.initialize(VolumeConfig::new().with_resolution(Resolution::Low).with_bound(BOUND)).unwrap();
    let out = gi.update(&mut scene, FrameInput::at(0.0)).unwrap();
    assert_eq!(out.volume.level_resolutions(), vec![33, 17, 9, 5, 3]);

    let filters: Vec<_> = gi
        .backend()
        .recorded()
        .iter()
        .filter_map(|cmd| match cmd {
            RecordedCommand::Dispatch { kernel: KernelId::Filter(FilterMode::Gaussian3), groups } => Some(groups[1]),
            _ => None,
        })
        .collect();
    assert_eq!(filters, vec![5, 3, 2, 1]);

    let level1 = gi.backend_mut().read_texture(out.volume.levels[1].texture.sampled()).unwrap();
    let texel = level1[texel_index([17; 3], 8, 8, 8)];
    assert!((texel[0] - 0.25).abs() < 1e-6);
    assert!((texel[3] - 1.0).abs() < 1e-6);
}
