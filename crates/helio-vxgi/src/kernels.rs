//! Compute kernel identities and the per-configuration variant table.

use bitflags::bitflags;

use crate::config::FilterMode;
use crate::volume::VolumeLayout;

bitflags! {
    /// Compile-time variant switches shared by the accumulation kernels
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VariantFlags: u32 {
        const ANISOTROPIC = 1 << 0;
        const CASCADED    = 1 << 1;
    }
}

/// Threads per group along X for linear (per-fragment) kernels
pub const LINEAR_GROUP_SIZE: u32 = 64;
/// Threads per group along each axis for volume kernels
pub const VOLUME_GROUP_SIZE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelId {
    /// Counter → indirect dispatch arguments
    Parameterize,
    /// Zero the accumulation scratch
    Clear,
    /// Scatter fragments into the scratch
    Render(VariantFlags),
    /// Resolve scratch sums into the base radiance level
    Aggregate(VariantFlags),
    /// Toroidal displacement of the base level
    Shift(VariantFlags),
    /// Downsample one mip level into the next
    Filter(FilterMode),
}

impl KernelId {
    pub fn workgroup_size(&self) -> [u32; 3] {
        match self {
            KernelId::Parameterize => [1, 1, 1],
            KernelId::Render(_) => [LINEAR_GROUP_SIZE, 1, 1],
            KernelId::Clear
            | KernelId::Aggregate(_)
            | KernelId::Shift(_)
            | KernelId::Filter(_) => [VOLUME_GROUP_SIZE; 3],
        }
    }

    /// Shader entry point implementing the kernel
    pub fn entry_point(&self) -> &'static str {
        match self {
            KernelId::Parameterize => "parameterize",
            KernelId::Clear => "clear",
            KernelId::Render(_) => "render",
            KernelId::Aggregate(_) => "aggregate",
            KernelId::Shift(_) => "shift",
            KernelId::Filter(FilterMode::Box) => "filter_box",
            KernelId::Filter(FilterMode::Gaussian3) => "filter_gaussian3",
            KernelId::Filter(FilterMode::Gaussian4) => "filter_gaussian4",
        }
    }

    pub fn variant(&self) -> VariantFlags {
        match self {
            KernelId::Render(flags) | KernelId::Aggregate(flags) | KernelId::Shift(flags) => *flags,
            _ => VariantFlags::empty(),
        }
    }
}

/// Kernels bound for the current configuration.
///
/// Resolved once per structural configuration change; passes never look at
/// the raw flags themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelSet {
    pub flags: VariantFlags,
    pub parameterize: KernelId,
    pub clear: KernelId,
    pub render: KernelId,
    pub aggregate: KernelId,
    /// `None` in cascade mode
    pub shift: Option<KernelId>,
    /// `None` in cascade mode
    pub filter: Option<KernelId>,
}

impl KernelSet {
    pub fn resolve(layout: &VolumeLayout) -> Self {
        let flags = layout.variant_flags();
        let pyramid = !layout.is_cascaded();
        let set = Self {
            flags,
            parameterize: KernelId::Parameterize,
            clear: KernelId::Clear,
            render: KernelId::Render(flags),
            aggregate: KernelId::Aggregate(flags),
            shift: pyramid.then_some(KernelId::Shift(flags & VariantFlags::ANISOTROPIC)),
            filter: pyramid.then_some(KernelId::Filter(layout.filter_mode)),
        };
        log::debug!("Resolved kernel set: {:?}", set);
        set
    }
}

/// Groups needed to cover `elements` threads in groups of `group`
pub fn group_count(elements: u32, group: u32) -> u32 {
    elements.div_ceil(group.max(1))
}

/// Groups covering a 3D extent for the given kernel
pub fn volume_groups(kernel: KernelId, extent: [u32; 3]) -> [u32; 3] {
    let size = kernel.workgroup_size();
    [
        group_count(extent[0], size[0]),
        group_count(extent[1], size[1]),
        group_count(extent[2], size[2]),
    ]
}
