//! Simulation configuration.
//!
//! # Example
//!
//! ```
//! use fluidx::{FluidConfig, GridSize, RenderMode};
//!
//! let config = FluidConfig::new(GridSize::new(64, 64, 64))
//!     .with_max_samples(128, 32)
//!     .with_render_mode(RenderMode::SeparateCubemap)
//!     .with_radiance(32);
//! assert!(config.validate().is_ok());
//! ```

use std::f32::consts::PI;

use glam::{Vec3, Vec4};

use crate::error::FluidError;
use crate::grid::GridSize;
use crate::lod::{FaceCulling, FaceList, GpuCulling, LodConfig, VisibilityMask};
use crate::render::{RenderMode, SampleBudget};

/// Which cube-face culling policy the cubemap passes use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CullPolicy {
    Gpu,
    #[default]
    Mask,
    List,
}

impl CullPolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "gpu" => Some(CullPolicy::Gpu),
            "mask" => Some(CullPolicy::Mask),
            "list" => Some(CullPolicy::List),
            _ => None,
        }
    }

    pub fn strategy(self) -> Box<dyn FaceCulling> {
        match self {
            CullPolicy::Gpu => Box::new(GpuCulling),
            CullPolicy::Mask => Box::new(VisibilityMask),
            CullPolicy::List => Box::new(FaceList),
        }
    }
}

/// Light and ambient terms.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lighting {
    pub position: Vec3,
    /// RGB colour with intensity in `w`.
    pub color: Vec4,
    /// RGB colour with intensity in `w`.
    pub ambient: Vec4,
}

impl Default for Lighting {
    fn default() -> Self {
        Self {
            position: Vec3::new(75.0, 75.0, -75.0),
            color: Vec4::new(1.0, 0.7, 0.3, PI),
            ambient: Vec4::new(1.0, 1.0, 1.0, 0.1 * PI),
        }
    }
}

/// Everything needed to build a simulator.
#[derive(Clone, Debug, PartialEq)]
pub struct FluidConfig {
    pub grid: GridSize,
    /// Render target size in pixels.
    pub viewport: (u32, u32),
    pub budget: SampleBudget,
    pub render_mode: RenderMode,
    pub culling: CullPolicy,
    pub lod: LodConfig,
    /// Uniform scale of the simulation volume in world space.
    pub volume_scale: f32,
    pub lighting: Lighting,
    /// Face size of the procedural radiance cube; `None` disables the probe.
    pub radiance: Option<u32>,
    pub seed: u64,
}

impl Default for FluidConfig {
    fn default() -> Self {
        Self::new(GridSize::default())
    }
}

impl FluidConfig {
    pub fn new(grid: GridSize) -> Self {
        Self {
            grid,
            viewport: (1280, 720),
            budget: SampleBudget::default(),
            render_mode: RenderMode::default(),
            culling: CullPolicy::default(),
            lod: LodConfig::default(),
            volume_scale: 10.0,
            lighting: Lighting::default(),
            radiance: None,
            seed: 0x5eed,
        }
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = (width, height);
        self
    }

    pub fn with_max_samples(mut self, ray: u32, light: u32) -> Self {
        self.budget = SampleBudget {
            max_ray_samples: ray,
            max_light_samples: light,
        };
        self
    }

    pub fn with_render_mode(mut self, mode: RenderMode) -> Self {
        self.render_mode = mode;
        self
    }

    pub fn with_culling(mut self, culling: CullPolicy) -> Self {
        self.culling = culling;
        self
    }

    pub fn with_lod(mut self, lod: LodConfig) -> Self {
        self.lod = lod;
        self
    }

    pub fn with_volume_scale(mut self, scale: f32) -> Self {
        self.volume_scale = scale;
        self
    }

    pub fn with_lighting(mut self, lighting: Lighting) -> Self {
        self.lighting = lighting;
        self
    }

    /// Enable the light probe with a procedural sky of `face_size` texels.
    pub fn with_radiance(mut self, face_size: u32) -> Self {
        self.radiance = Some(face_size);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), FluidError> {
        self.grid.validate()?;
        if self.viewport.0 == 0 || self.viewport.1 == 0 {
            return Err(FluidError::InvalidConfig("viewport must be non-zero".into()));
        }
        if self.volume_scale <= 0.0 {
            return Err(FluidError::InvalidConfig(format!(
                "volume scale must be positive, got {}",
                self.volume_scale
            )));
        }
        if self.radiance == Some(0) {
            return Err(FluidError::InvalidConfig("radiance face size must be non-zero".into()));
        }
        Ok(())
    }

    /// Apply demo arguments: `-gridSize x y z`, `-renderMode <name>`,
    /// `-cull <gpu|mask|list>`, `-radiance <faceSize>`. Unknown or malformed
    /// arguments are skipped.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        let mut config = Self::default();

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].trim_start_matches(&['-', '/'][..]).to_ascii_lowercase();
            let rest = &args[i + 1..];
            match flag.as_str() {
                "gridsize" if rest.len() >= 3 => {
                    let dims: Vec<u32> = rest[..3].iter().filter_map(|s| s.parse().ok()).collect();
                    if let [x, y, z] = dims.as_slice() {
                        config.grid = GridSize::new(*x, *y, *z);
                        i += 3;
                    }
                }
                "rendermode" if !rest.is_empty() => {
                    if let Some(mode) = RenderMode::from_name(&rest[0]) {
                        config.render_mode = mode;
                        i += 1;
                    }
                }
                "cull" if !rest.is_empty() => {
                    if let Some(policy) = CullPolicy::from_name(&rest[0]) {
                        config.culling = policy;
                        i += 1;
                    }
                }
                "radiance" if !rest.is_empty() => {
                    if let Ok(size) = rest[0].parse() {
                        config.radiance = Some(size);
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FluidConfig::default();
        assert_eq!(config.grid, GridSize::new(128, 128, 128));
        assert_eq!(config.budget.max_ray_samples, 256);
        assert_eq!(config.budget.max_light_samples, 64);
        assert_eq!(config.render_mode, RenderMode::Separate);
        assert_eq!(config.culling, CullPolicy::Mask);
        assert_eq!(config.lighting.position, Vec3::new(75.0, 75.0, -75.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_grid_size() {
        let config = FluidConfig::from_args(["fluidx", "-gridSize", "64", "64", "1"]);
        assert_eq!(config.grid, GridSize::new(64, 64, 1));
    }

    #[test]
    fn test_parse_all_flags() {
        let config = FluidConfig::from_args([
            "fluidx",
            "-renderMode",
            "merged-cubemap",
            "-cull",
            "list",
            "-radiance",
            "32",
            "-gridSize",
            "32",
            "32",
            "32",
        ]);
        assert_eq!(config.render_mode, RenderMode::MergedCubemap);
        assert_eq!(config.culling, CullPolicy::List);
        assert_eq!(config.radiance, Some(32));
        assert_eq!(config.grid, GridSize::new(32, 32, 32));
    }

    #[test]
    fn test_malformed_args_skipped() {
        let config = FluidConfig::from_args(["fluidx", "-gridSize", "64", "x", "-cull", "nope", "-radiance"]);
        assert_eq!(config, FluidConfig::default());
    }

    #[test]
    fn test_validate_rejects() {
        assert!(FluidConfig::new(GridSize::new(64, 32, 32)).validate().is_err());
        assert!(FluidConfig::default().with_viewport(0, 10).validate().is_err());
        assert!(FluidConfig::default().with_radiance(0).validate().is_err());
        assert!(FluidConfig::default().with_volume_scale(0.0).validate().is_err());
    }
}
