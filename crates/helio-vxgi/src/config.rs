use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Upper bound on nested cascades sharing one radiance texture
pub const MAX_CASCADES: u32 = 8;
/// Smallest accepted world-space edge length of the base cascade
pub const MIN_BOUND: f32 = 0.01;
/// Smallest accepted refresh rate (Hz)
pub const MIN_REFRESH_RATE: f32 = 0.01;

/// Grid resolution per axis of the base radiance volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    /// 32³ voxels
    Low,
    /// 64³ voxels (default)
    Medium,
    /// 128³ voxels
    High,
    /// 256³ voxels
    VeryHigh,
}

impl Resolution {
    pub fn texels(&self) -> u32 {
        match self {
            Resolution::Low => 32,
            Resolution::Medium => 64,
            Resolution::High => 128,
            Resolution::VeryHigh => 256,
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::Medium
    }
}

/// Downsampling filter used to build mip levels from the base level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterMode {
    /// 2×2×2 average, even input
    Box = 0,
    /// Symmetric 3×3×3 gaussian on a `2^n + 1` grid
    Gaussian3 = 1,
    /// 4×4×4 gaussian (weights 1,3,3,1), even input
    Gaussian4 = 2,
}

impl Default for FilterMode {
    fn default() -> Self {
        FilterMode::Gaussian3
    }
}

/// Multisample count of the voxelization raster pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AntiAliasing {
    X1,
    X2,
    X4,
    X8,
}

impl AntiAliasing {
    pub fn samples(&self) -> u32 {
        match self {
            AntiAliasing::X1 => 1,
            AntiAliasing::X2 => 2,
            AntiAliasing::X4 => 4,
            AntiAliasing::X8 => 8,
        }
    }
}

impl Default for AntiAliasing {
    fn default() -> Self {
        AntiAliasing::X1
    }
}

/// User-facing configuration of the radiance volume.
///
/// Structural fields (resolution, cascades, anisotropy, filter, buffer scale)
/// trigger a full reallocation when they change; the rest are read every
/// frame. Out-of-range values are clamped, never rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub resolution: Resolution,
    /// World-space edge length of the base cascade
    pub bound: f32,
    /// World position the volume is centered on (snapped to the voxel grid)
    pub center: Vec3,
    pub cascades_enabled: bool,
    /// Number of nested cascades when enabled, clamped to [1, 8]
    pub cascades_count: u32,
    /// Store 6 directional copies per voxel instead of 1
    pub anisotropic: bool,
    pub filter_mode: FilterMode,
    pub anti_aliasing: AntiAliasing,
    pub throttle_enabled: bool,
    /// Maximum refreshes per second while throttling
    pub target_refresh_rate: f32,
    /// Re-center on the frame's anchor every update
    pub follow_anchor: bool,
    /// Layer mask handed to the culling provider and raster pass
    pub cull_mask: u32,
    /// Fragment capacity multiplier over `resolution³`; `None` picks the default
    pub buffer_scale: Option<f32>,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::Medium,
            bound: 10.0,
            center: Vec3::ZERO,
            cascades_enabled: false,
            cascades_count: 4,
            anisotropic: false,
            filter_mode: FilterMode::Gaussian3,
            anti_aliasing: AntiAliasing::X1,
            throttle_enabled: false,
            target_refresh_rate: 30.0,
            follow_anchor: false,
            cull_mask: u32::MAX,
            buffer_scale: None,
        }
    }
}

impl VolumeConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set the base cascade edge length (clamped to a small positive minimum)
    pub fn with_bound(mut self, bound: f32) -> Self {
        self.bound = sanitize_bound(bound);
        self
    }

    pub fn with_center(mut self, center: Vec3) -> Self {
        self.center = center;
        self
    }

    /// Enable `count` nested cascades (clamped to [1, 8])
    pub fn with_cascades(mut self, count: u32) -> Self {
        self.cascades_enabled = true;
        self.cascades_count = count.clamp(1, MAX_CASCADES);
        self
    }

    pub fn without_cascades(mut self) -> Self {
        self.cascades_enabled = false;
        self
    }

    pub fn with_anisotropic(mut self, anisotropic: bool) -> Self {
        self.anisotropic = anisotropic;
        self
    }

    pub fn with_filter_mode(mut self, mode: FilterMode) -> Self {
        self.filter_mode = mode;
        self
    }

    pub fn with_anti_aliasing(mut self, anti_aliasing: AntiAliasing) -> Self {
        self.anti_aliasing = anti_aliasing;
        self
    }

    /// Limit refreshes to `rate` per second
    pub fn with_throttle(mut self, rate: f32) -> Self {
        self.throttle_enabled = true;
        self.target_refresh_rate = sanitize_rate(rate);
        self
    }

    pub fn without_throttle(mut self) -> Self {
        self.throttle_enabled = false;
        self
    }

    pub fn with_follow_anchor(mut self, follow: bool) -> Self {
        self.follow_anchor = follow;
        self
    }

    pub fn with_cull_mask(mut self, mask: u32) -> Self {
        self.cull_mask = mask;
        self
    }

    /// Override the fragment capacity multiplier
    pub fn with_buffer_scale(mut self, scale: f32) -> Self {
        self.buffer_scale = Some(scale.max(0.0));
        self
    }

    /// Copy with every field clamped into its valid range.
    ///
    /// Public fields can be set directly or deserialized, so the pipeline
    /// always works from the sanitized copy.
    pub fn sanitized(&self) -> Self {
        let mut config = self.clone();
        config.bound = sanitize_bound(config.bound);
        config.cascades_count = config.cascades_count.clamp(1, MAX_CASCADES);
        config.target_refresh_rate = sanitize_rate(config.target_refresh_rate);
        if !config.center.is_finite() {
            config.center = Vec3::ZERO;
        }
        config.buffer_scale = config
            .buffer_scale
            .filter(|scale| scale.is_finite())
            .map(|scale| scale.max(0.0));
        config
    }

    /// Minimum spacing between two refreshes, `None` when unthrottled
    pub fn refresh_interval(&self) -> Option<f64> {
        self.throttle_enabled
            .then(|| 1.0 / sanitize_rate(self.target_refresh_rate) as f64)
    }
}

fn sanitize_bound(bound: f32) -> f32 {
    if bound.is_finite() {
        bound.max(MIN_BOUND)
    } else {
        MIN_BOUND
    }
}

fn sanitize_rate(rate: f32) -> f32 {
    if rate.is_finite() {
        rate.max(MIN_REFRESH_RATE)
    } else {
        MIN_REFRESH_RATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_cascades_and_bound() {
        let config = VolumeConfig::new().with_cascades(12).with_bound(-3.0);
        assert_eq!(config.cascades_count, MAX_CASCADES);
        assert_eq!(config.bound, MIN_BOUND);

        let config = VolumeConfig::new().with_cascades(0);
        assert_eq!(config.cascades_count, 1);
    }

    #[test]
    fn sanitized_repairs_direct_field_writes() {
        let mut config = VolumeConfig::default();
        config.bound = f32::NAN;
        config.cascades_count = 40;
        config.target_refresh_rate = 0.0;
        config.buffer_scale = Some(f32::INFINITY);

        let clean = config.sanitized();
        assert_eq!(clean.bound, MIN_BOUND);
        assert_eq!(clean.cascades_count, 8);
        assert_eq!(clean.target_refresh_rate, MIN_REFRESH_RATE);
        assert_eq!(clean.buffer_scale, None);
    }

    #[test]
    fn refresh_interval_follows_throttle() {
        assert_eq!(VolumeConfig::default().refresh_interval(), None);
        let interval = VolumeConfig::default().with_throttle(4.0).refresh_interval();
        assert_eq!(interval, Some(0.25));
    }

    #[test]
    fn resolution_presets() {
        assert_eq!(Resolution::default().texels(), 64);
        assert_eq!(Resolution::VeryHigh.texels(), 256);
    }
}
