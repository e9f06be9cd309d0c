//! GPU-visible records. Layouts match the WGSL structs field for field.

use bytemuck::{Pod, Zeroable};
use glam::{IVec3, Mat4, Vec3, Vec4};

use crate::volume::{VolumeGeometry, VolumeLayout};

/// One rasterized point sample
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FragmentRecord {
    /// Voxel-space position inside its cascade, w = cascade index
    pub position_and_cascade: [f32; 4],
    pub normal: [f32; 4],
    /// Linear albedo, w = opacity
    pub albedo: [f32; 4],
    pub emission: [f32; 4],
}

impl FragmentRecord {
    pub fn new(position: Vec3, cascade: u32, normal: Vec3, albedo: Vec4, emission: Vec3) -> Self {
        Self {
            position_and_cascade: position.extend(cascade as f32).to_array(),
            normal: normal.extend(0.0).to_array(),
            albedo: albedo.to_array(),
            emission: emission.extend(0.0).to_array(),
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec4::from_array(self.position_and_cascade).truncate()
    }

    pub fn cascade(&self) -> u32 {
        self.position_and_cascade[3] as u32
    }
}

/// One packed light of the snapshot
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LightSourceRecord {
    /// World position, w = kind
    pub position_and_kind: [f32; 4],
    /// Travel direction, w = range
    pub direction_and_range: [f32; 4],
    /// Linear color, w = intensity
    pub color_and_intensity: [f32; 4],
    /// Position in base voxel space, w = cos(half spot angle)
    pub voxel_position_and_spot: [f32; 4],
}

/// Volume description bound to every accumulation kernel
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct VolumeUniforms {
    pub world_to_voxel: [[f32; 4]; 4],
    pub voxel_to_world: [[f32; 4]; 4],
    /// Snapped center, w = bound
    pub center_and_bound: [f32; 4],
    /// x = voxel size of cascade 0
    pub grid: [f32; 4],
    /// resolution, cascade count, directions, light count
    pub params: [u32; 4],
    /// fragment capacity, variant flags
    pub limits: [u32; 4],
}

impl VolumeUniforms {
    pub fn new(layout: &VolumeLayout, geometry: &VolumeGeometry, light_count: u32) -> Self {
        Self {
            world_to_voxel: geometry.world_to_voxel().to_cols_array_2d(),
            voxel_to_world: geometry.voxel_to_world().to_cols_array_2d(),
            center_and_bound: geometry.center.extend(geometry.bound).to_array(),
            grid: [geometry.voxel_size, 0.0, 0.0, 0.0],
            params: [
                layout.resolution,
                layout.cascade_count(),
                layout.directions(),
                light_count,
            ],
            limits: [layout.fragment_capacity(), layout.variant_flags().bits(), 0, 0],
        }
    }

    pub fn resolution(&self) -> u32 {
        self.params[0]
    }

    pub fn cascade_count(&self) -> u32 {
        self.params[1]
    }

    pub fn directions(&self) -> u32 {
        self.params[2]
    }

    pub fn light_count(&self) -> u32 {
        self.params[3]
    }

    pub fn fragment_capacity(&self) -> u32 {
        self.limits[0]
    }

    pub fn voxel_to_world(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.voxel_to_world)
    }

    /// World position of a fragment stored in voxel space of `cascade`
    pub fn fragment_world_position(&self, position: Vec3, cascade: u32) -> Vec3 {
        let scale = 1.0 / (1u32 << cascade.min(31)) as f32;
        let center = Vec4::from_array(self.center_and_bound).truncate();
        let extent = self.center_and_bound[3] * scale;
        center - Vec3::splat(0.5 * extent) + position * self.grid[0] * scale
    }
}

/// Arguments of an indirect compute dispatch
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchIndirectArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

/// Parameters of the Parameterize kernel
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchParams {
    /// Consumer's threads per group along X
    pub group_size: u32,
    /// Per-dimension group limit of the backend
    pub max_groups: u32,
    /// Counter clamp (buffer capacity)
    pub capacity: u32,
    pub _pad: u32,
}

/// Extent of a volume kernel's grid: texels along X (directions stacked),
/// Y, and Z (cascades stacked), plus the per-axis resolution
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GridParams {
    pub extent: [u32; 4],
}

impl GridParams {
    pub fn new(extent: [u32; 3], resolution: u32) -> Self {
        Self { extent: [extent[0], extent[1], extent[2], resolution] }
    }

    pub fn extent(&self) -> [u32; 3] {
        [self.extent[0], self.extent[1], self.extent[2]]
    }

    pub fn resolution(&self) -> u32 {
        self.extent[3]
    }
}

/// One cascade's Z-slab of a stacked grid. Clear and Aggregate touch only
/// the slab, leaving the rest of the texture as it was.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SlabParams {
    /// Whole grid the slab lives in
    pub grid: GridParams,
    /// First texel of the slab, w unused
    pub origin: [u32; 4],
}

impl SlabParams {
    pub fn cascade(grid: GridParams, cascade: u32) -> Self {
        Self { grid, origin: [0, 0, cascade * grid.resolution(), 0] }
    }

    /// Texels covered: every direction along X, one cascade along Z
    pub fn extent(&self) -> [u32; 3] {
        let full = self.grid.extent();
        [full[0], full[1], self.grid.resolution().min(full[2])]
    }

    pub fn origin(&self) -> [u32; 3] {
        [self.origin[0], self.origin[1], self.origin[2]]
    }
}

/// Parameters of the Shift kernel
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ShiftParams {
    /// Whole-voxel displacement, w unused
    pub displacement: [i32; 4],
    pub grid: GridParams,
}

impl ShiftParams {
    pub fn new(displacement: IVec3, grid: GridParams) -> Self {
        Self { displacement: displacement.extend(0).to_array(), grid }
    }
}

/// Parameters of the Filter kernels
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct FilterParams {
    /// Finer (source) level grid
    pub source: GridParams,
    /// Coarser (target) level grid
    pub target: GridParams,
}
