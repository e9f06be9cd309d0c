//! Pipeline cache keyed by kernel identity.
//!
//! Variant flags are baked in as WGSL `override` declarations prepended to the
//! kernel source, so each (kernel, flags) pair compiles exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use helio_vxgi::{KernelId, VariantFlags};

use crate::layouts::KernelLayouts;
use crate::mesh::VoxelVertex;

const COMMON_SOURCE: &str = include_str!("../shaders/common.wgsl");
const VOXELIZE_SOURCE: &str = include_str!("../shaders/voxelize.wgsl");

/// Color format of the voxelization target; nothing is ever written to it
pub(crate) const RASTER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

fn kernel_source(id: KernelId) -> &'static str {
    match id {
        KernelId::Parameterize => include_str!("../shaders/parameterize.wgsl"),
        KernelId::Clear => include_str!("../shaders/clear.wgsl"),
        KernelId::Render(_) => include_str!("../shaders/render.wgsl"),
        KernelId::Aggregate(_) => include_str!("../shaders/aggregate.wgsl"),
        KernelId::Shift(_) => include_str!("../shaders/shift.wgsl"),
        KernelId::Filter(_) => include_str!("../shaders/filter.wgsl"),
    }
}

pub(crate) struct KernelPipelines {
    device: Arc<wgpu::Device>,
    compute: HashMap<KernelId, Arc<wgpu::ComputePipeline>>,
    raster: HashMap<u32, Arc<wgpu::RenderPipeline>>,
}

impl KernelPipelines {
    pub fn new(device: Arc<wgpu::Device>) -> Self {
        Self { device, compute: HashMap::new(), raster: HashMap::new() }
    }

    /// Get or create the compute pipeline of `id`
    pub fn compute(&mut self, layouts: &KernelLayouts, id: KernelId) -> Arc<wgpu::ComputePipeline> {
        if let Some(pipeline) = self.compute.get(&id) {
            log::trace!("Using cached pipeline: {:?}", id);
            return pipeline.clone();
        }

        log::info!("Creating VXGI kernel pipeline: {:?}", id);
        let label = format!("vxgi_{}", id.entry_point());
        let source = apply_defines(kernel_source(id), id.variant());
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label.as_str()),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(format!("{}_layout", label).as_str()),
            bind_group_layouts: &[layouts.kernel(id)],
            push_constant_ranges: &[],
        });
        let pipeline = Arc::new(self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label.as_str()),
            layout: Some(&layout),
            module: &module,
            entry_point: Some(id.entry_point()),
            compilation_options: Default::default(),
            cache: None,
        }));

        self.compute.insert(id, pipeline.clone());
        pipeline
    }

    /// Get or create the voxelization raster pipeline for `samples` MSAA samples
    pub fn raster(&mut self, layouts: &KernelLayouts, samples: u32) -> Arc<wgpu::RenderPipeline> {
        if let Some(pipeline) = self.raster.get(&samples) {
            return pipeline.clone();
        }

        log::info!("Creating VXGI voxelization pipeline ({}x MSAA)", samples);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("vxgi_voxelize"),
            source: wgpu::ShaderSource::Wgsl(VOXELIZE_SOURCE.into()),
        });
        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("vxgi_voxelize_layout"),
            bind_group_layouts: &[&layouts.voxelize, &layouts.mesh],
            push_constant_ranges: &[],
        });
        let pipeline = Arc::new(self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("vxgi_voxelize"),
            layout: Some(&layout),
            cache: None,
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                buffers: &[VoxelVertex::desc()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: RASTER_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::empty(),
                })],
                compilation_options: Default::default(),
            }),
            // Both faces: a voxel does not care which side was seen
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: samples,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
        }));

        self.raster.insert(samples, pipeline.clone());
        pipeline
    }
}

/// Prepend variant overrides and the shared prelude to a kernel source
fn apply_defines(source: &str, flags: VariantFlags) -> String {
    let defines = [
        ("ANISOTROPIC", flags.contains(VariantFlags::ANISOTROPIC)),
        ("CASCADED", flags.contains(VariantFlags::CASCADED)),
    ];

    let mut result = String::new();
    for (name, value) in defines {
        result.push_str(&format!("override {}: bool = {};\n", name, value));
    }
    result.push_str(COMMON_SOURCE);
    result.push('\n');
    result.push_str(source);
    result
}
