//! Visualization strategies.
//!
//! A frame is rendered by exactly one [`RenderStrategy`], chosen from the grid
//! depth and the [`RenderMode`] passed in for that frame:
//!
//! | strategy | passes |
//! |---|---|
//! | `Direct2D` | full-screen blit of the dye field |
//! | `MergedDirect` | full-screen ray cast with inline shadow rays |
//! | `SeparateDirect` | light-map dispatch, then full-screen ray cast reading it |
//! | `MergedCubemap` | cube-mip ray march per visible face, then cube draw |
//! | `SeparateCubemap` | light-map dispatch, cube-mip view march, then cube draw |
//!
//! Every pass declares the states it needs through a [`BarrierBatch`] which
//! is flushed right before its dispatch or draw.

use std::fmt;

use bitflags::bitflags;

use crate::barrier::{BarrierBatch, StateTracker};
use crate::device::{
    div_up, Binding, BufferHandle, GpuDevice, KernelHandle, ResourceState, ResourceView,
    SamplerPreset, Subresource, ViewAccess,
};
use crate::error::FluidError;
use crate::grid::{Field, GridResourceSet, GridSize, Parity, VolumeTargets};
use crate::kernels;
use crate::light_probe::ShCoefficients;
use crate::lod::{FaceVisibility, LodEstimate};

bitflags! {
    /// Render-mode bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct RenderFlags: u8 {
        const RAY_MARCH_CUBEMAP = 1 << 0;
        const SEPARATE_LIGHT_PASS = 1 << 1;
    }
}

/// User-selected render method for volumetric grids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum RenderMode {
    /// Screen-space ray cast, lighting computed inline.
    Merged,
    /// Light map first, then screen-space ray cast.
    #[default]
    Separate,
    /// Cubemap-space ray march, lighting computed inline.
    MergedCubemap,
    /// Light map first, then cubemap-space ray march.
    SeparateCubemap,
}

impl RenderMode {
    pub const ALL: [RenderMode; 4] = [
        RenderMode::Merged,
        RenderMode::Separate,
        RenderMode::MergedCubemap,
        RenderMode::SeparateCubemap,
    ];

    pub fn from_flags(flags: RenderFlags) -> Self {
        let cubemap = flags.contains(RenderFlags::RAY_MARCH_CUBEMAP);
        let separate = flags.contains(RenderFlags::SEPARATE_LIGHT_PASS);
        match (cubemap, separate) {
            (false, false) => RenderMode::Merged,
            (false, true) => RenderMode::Separate,
            (true, false) => RenderMode::MergedCubemap,
            (true, true) => RenderMode::SeparateCubemap,
        }
    }

    pub fn flags(self) -> RenderFlags {
        match self {
            RenderMode::Merged => RenderFlags::empty(),
            RenderMode::Separate => RenderFlags::SEPARATE_LIGHT_PASS,
            RenderMode::MergedCubemap => RenderFlags::RAY_MARCH_CUBEMAP,
            RenderMode::SeparateCubemap => RenderFlags::all(),
        }
    }

    /// Next mode, wrapping.
    pub fn next(self) -> Self {
        let i = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(i + 1) % Self::ALL.len()]
    }

    /// Previous mode, wrapping.
    pub fn prev(self) -> Self {
        let i = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(i + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    pub fn name(self) -> &'static str {
        match self {
            RenderMode::Merged => "merged",
            RenderMode::Separate => "separate",
            RenderMode::MergedCubemap => "merged-cubemap",
            RenderMode::SeparateCubemap => "separate-cubemap",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The pass sequence actually executed for a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderStrategy {
    Direct2D,
    MergedDirect,
    SeparateDirect,
    MergedCubemap,
    SeparateCubemap,
}

impl RenderStrategy {
    /// 2-D grids always blit; volumetric grids follow `mode`.
    pub fn resolve(size: GridSize, mode: RenderMode) -> Self {
        if !size.is_volumetric() {
            return RenderStrategy::Direct2D;
        }
        match mode {
            RenderMode::Merged => RenderStrategy::MergedDirect,
            RenderMode::Separate => RenderStrategy::SeparateDirect,
            RenderMode::MergedCubemap => RenderStrategy::MergedCubemap,
            RenderMode::SeparateCubemap => RenderStrategy::SeparateCubemap,
        }
    }

    pub fn uses_light_map(self) -> bool {
        matches!(self, RenderStrategy::SeparateDirect | RenderStrategy::SeparateCubemap)
    }

    pub fn uses_cubemap(self) -> bool {
        matches!(self, RenderStrategy::MergedCubemap | RenderStrategy::SeparateCubemap)
    }
}

/// Ray-marching sample limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleBudget {
    pub max_ray_samples: u32,
    pub max_light_samples: u32,
}

impl Default for SampleBudget {
    fn default() -> Self {
        Self {
            max_ray_samples: 256,
            max_light_samples: 64,
        }
    }
}

/// Constant slots read by the volumetric passes.
#[derive(Clone, Copy, Debug)]
pub struct VolumeConstants {
    pub per_frame: BufferHandle,
    pub per_object: BufferHandle,
    pub face_list: BufferHandle,
}

/// Per-frame inputs of [`RenderStage::render`].
#[derive(Clone, Copy, Debug)]
pub struct RenderInputs<'a> {
    pub frame_index: usize,
    pub parity: Parity,
    pub lod: LodEstimate,
    pub visibility: FaceVisibility,
    pub budget: SampleBudget,
    pub sh: Option<&'a ShCoefficients>,
}

struct VolumeKernels {
    ray_cast: KernelHandle,
    ray_cast_view: KernelHandle,
    ray_march_light: KernelHandle,
    ray_march: KernelHandle,
    ray_march_view: KernelHandle,
    render_cube: KernelHandle,
    constants: VolumeConstants,
    targets: VolumeTargets,
}

enum Kernels {
    Planar { visualize: KernelHandle },
    Volume(Box<VolumeKernels>),
}

/// Records the passes of whichever strategy a frame uses.
pub struct RenderStage {
    kernels: Kernels,
}

impl RenderStage {
    /// Load the kernels the grid can use. Volumetric grids need `constants`.
    pub fn new(
        device: &mut dyn GpuDevice,
        grid: &GridResourceSet,
        constants: Option<VolumeConstants>,
    ) -> Result<Self, FluidError> {
        let kernels = match (grid.volume(), constants) {
            (Some(targets), Some(constants)) => Kernels::Volume(Box::new(VolumeKernels {
                ray_cast: device.load_kernel(&kernels::RAY_CAST)?,
                ray_cast_view: device.load_kernel(&kernels::RAY_CAST_VIEW)?,
                ray_march_light: device.load_kernel(&kernels::RAY_MARCH_LIGHT)?,
                ray_march: device.load_kernel(&kernels::RAY_MARCH)?,
                ray_march_view: device.load_kernel(&kernels::RAY_MARCH_VIEW)?,
                render_cube: device.load_kernel(&kernels::RENDER_CUBE)?,
                constants,
                targets: *targets,
            })),
            (Some(_), None) => {
                return Err(FluidError::InvalidConfig(
                    "volumetric rendering requires per-frame constant slots".into(),
                ))
            }
            (None, _) => Kernels::Planar {
                visualize: device.load_kernel(&kernels::VISUALIZE)?,
            },
        };
        Ok(Self { kernels })
    }

    /// Record the passes for this frame and return the strategy taken.
    pub fn render(
        &self,
        device: &mut dyn GpuDevice,
        grid: &GridResourceSet,
        states: &mut StateTracker,
        inputs: &RenderInputs<'_>,
        mode: RenderMode,
    ) -> RenderStrategy {
        let strategy = RenderStrategy::resolve(grid.size(), mode);
        let color = grid.view_for(Field::Color, inputs.parity, ViewAccess::Read);

        // The dye was left readable by projection; this is a no-op unless a
        // caller renders without simulating first.
        let mut batch = BarrierBatch::new(states);
        batch.require(color.buffer, ResourceState::SHADER_RESOURCE);
        batch.flush(device);

        let volume = match &self.kernels {
            Kernels::Planar { visualize } => {
                device.set_kernel(*visualize);
                device.bind_graphics(0, Binding::View(color));
                device.bind_graphics(1, Binding::Sampler(SamplerPreset::LinearClamp));
                device.draw(3, 1);
                return RenderStrategy::Direct2D;
            }
            Kernels::Volume(volume) => volume,
        };

        // Volumetric grids resolve each mode to its own strategy.
        match mode {
            RenderMode::Merged => volume.ray_cast(device, color, inputs),
            RenderMode::Separate => {
                volume.light_pass(device, grid, states, color, inputs);
                volume.ray_cast_view(device, states, color, inputs);
            }
            RenderMode::MergedCubemap => {
                volume.ray_march(device, states, color, inputs);
                volume.render_cube(device, states, inputs);
            }
            RenderMode::SeparateCubemap => {
                volume.light_pass(device, grid, states, color, inputs);
                volume.ray_march_view(device, states, color, inputs);
                volume.render_cube(device, states, inputs);
            }
        }
        strategy
    }
}

impl VolumeKernels {
    fn bind_constants(&self, device: &mut dyn GpuDevice, compute: bool, frame_index: usize) {
        let per_object = Binding::Constants {
            buffer: self.constants.per_object,
            frame_index,
        };
        let per_frame = Binding::Constants {
            buffer: self.constants.per_frame,
            frame_index,
        };
        if compute {
            device.bind_compute(0, per_object);
            device.bind_compute(1, per_frame);
        } else {
            device.bind_graphics(0, per_object);
            device.bind_graphics(1, per_frame);
        }
    }

    fn face_list(&self, frame_index: usize) -> Binding {
        Binding::Constants {
            buffer: self.constants.face_list,
            frame_index,
        }
    }

    fn cube_mip_state(
        &self,
        device: &mut dyn GpuDevice,
        states: &mut StateTracker,
        mip: u32,
        state: ResourceState,
        light_map: Option<ResourceState>,
    ) {
        let mut batch = BarrierBatch::new(states);
        if let Some(light_state) = light_map {
            batch.require(self.targets.light_map, light_state);
        }
        for face in 0..6 {
            let sub = Subresource::cube_face(mip, face, self.targets.mip_levels);
            batch.transition(self.targets.cube_map, sub, state);
        }
        batch.flush(device);
    }

    fn cube_groups(&self, inputs: &RenderInputs<'_>) -> [u32; 3] {
        let size = self.targets.mip_size(inputs.lod.mip_level);
        [
            div_up(size, 8),
            div_up(size, 8),
            inputs.visibility.dispatch_faces(),
        ]
    }

    fn light_pass(
        &self,
        device: &mut dyn GpuDevice,
        grid: &GridResourceSet,
        states: &mut StateTracker,
        color: ResourceView,
        inputs: &RenderInputs<'_>,
    ) {
        let mut batch = BarrierBatch::new(states);
        batch.require(self.targets.light_map, ResourceState::UNORDERED_ACCESS);
        batch.flush(device);

        device.set_kernel(self.ray_march_light);
        self.bind_constants(device, true, inputs.frame_index);
        device.bind_compute(2, Binding::View(color));
        device.bind_compute(3, Binding::View(self.targets.light_map_view(ViewAccess::Write)));
        device.bind_compute(4, Binding::Sampler(SamplerPreset::LinearClamp));
        device.bind_compute(
            5,
            Binding::Values([inputs.budget.max_light_samples, inputs.sh.is_some() as u32, 0, 0]),
        );
        bind_sh(device, 6, inputs.sh, true);

        let size = grid.size();
        device.dispatch(div_up(size.x, 4), div_up(size.y, 4), div_up(size.z, 4));
    }

    fn ray_cast(&self, device: &mut dyn GpuDevice, color: ResourceView, inputs: &RenderInputs<'_>) {
        device.set_kernel(self.ray_cast);
        self.bind_constants(device, false, inputs.frame_index);
        device.bind_graphics(2, Binding::View(color));
        device.bind_graphics(3, Binding::Sampler(SamplerPreset::LinearClamp));
        device.bind_graphics(
            4,
            Binding::Values([
                inputs.budget.max_ray_samples,
                inputs.sh.is_some() as u32,
                inputs.budget.max_light_samples,
                0,
            ]),
        );
        bind_sh(device, 5, inputs.sh, false);
        device.draw(3, 1);
    }

    fn ray_cast_view(
        &self,
        device: &mut dyn GpuDevice,
        states: &mut StateTracker,
        color: ResourceView,
        inputs: &RenderInputs<'_>,
    ) {
        let mut batch = BarrierBatch::new(states);
        batch.require(self.targets.light_map, ResourceState::PIXEL_SHADER_RESOURCE);
        batch.flush(device);

        device.set_kernel(self.ray_cast_view);
        self.bind_constants(device, false, inputs.frame_index);
        device.bind_graphics(2, Binding::View(color));
        device.bind_graphics(3, Binding::View(self.targets.light_map_view(ViewAccess::Read)));
        device.bind_graphics(4, Binding::Sampler(SamplerPreset::LinearClamp));
        device.bind_graphics(5, Binding::Values([inputs.lod.ray_samples, 0, 0, 0]));
        device.draw(3, 1);
    }

    fn ray_march(
        &self,
        device: &mut dyn GpuDevice,
        states: &mut StateTracker,
        color: ResourceView,
        inputs: &RenderInputs<'_>,
    ) {
        let mip = inputs.lod.mip_level;
        self.cube_mip_state(device, states, mip, ResourceState::UNORDERED_ACCESS, None);

        device.set_kernel(self.ray_march);
        self.bind_constants(device, true, inputs.frame_index);
        device.bind_compute(2, Binding::View(self.targets.cube_mip_view(mip, ViewAccess::Write)));
        device.bind_compute(3, Binding::View(color));
        device.bind_compute(4, Binding::Sampler(SamplerPreset::LinearClamp));
        device.bind_compute(
            5,
            Binding::Values([
                inputs.lod.ray_samples,
                inputs.sh.is_some() as u32 | (inputs.visibility.mode() << 8),
                inputs.budget.max_light_samples,
                inputs.visibility.mask() as u32,
            ]),
        );
        bind_sh(device, 6, inputs.sh, true);
        device.bind_compute(7, self.face_list(inputs.frame_index));

        let [x, y, z] = self.cube_groups(inputs);
        device.dispatch(x, y, z);
    }

    fn ray_march_view(
        &self,
        device: &mut dyn GpuDevice,
        states: &mut StateTracker,
        color: ResourceView,
        inputs: &RenderInputs<'_>,
    ) {
        let mip = inputs.lod.mip_level;
        self.cube_mip_state(
            device,
            states,
            mip,
            ResourceState::UNORDERED_ACCESS,
            Some(ResourceState::NON_PIXEL_SHADER_RESOURCE),
        );

        device.set_kernel(self.ray_march_view);
        self.bind_constants(device, true, inputs.frame_index);
        device.bind_compute(2, Binding::View(self.targets.cube_mip_view(mip, ViewAccess::Write)));
        device.bind_compute(3, Binding::View(color));
        device.bind_compute(4, Binding::View(self.targets.light_map_view(ViewAccess::Read)));
        device.bind_compute(5, Binding::Sampler(SamplerPreset::LinearClamp));
        device.bind_compute(
            6,
            Binding::Values([
                inputs.lod.ray_samples,
                inputs.visibility.mode(),
                inputs.visibility.mask() as u32,
                0,
            ]),
        );
        device.bind_compute(7, self.face_list(inputs.frame_index));

        let [x, y, z] = self.cube_groups(inputs);
        device.dispatch(x, y, z);
    }

    fn render_cube(&self, device: &mut dyn GpuDevice, states: &mut StateTracker, inputs: &RenderInputs<'_>) {
        let mip = inputs.lod.mip_level;
        self.cube_mip_state(device, states, mip, ResourceState::PIXEL_SHADER_RESOURCE, None);

        device.set_kernel(self.render_cube);
        self.bind_constants(device, false, inputs.frame_index);
        device.bind_graphics(2, Binding::View(self.targets.cube_mip_view(mip, ViewAccess::Read)));
        device.bind_graphics(3, Binding::Sampler(SamplerPreset::LinearClamp));
        device.draw(4, 6);
    }
}

fn bind_sh(device: &mut dyn GpuDevice, slot: u32, sh: Option<&ShCoefficients>, compute: bool) {
    let Some(sh) = sh else {
        return;
    };
    let binding = Binding::View(ResourceView::read(sh.buffer()));
    if compute {
        device.bind_compute(slot, binding);
    } else {
        device.bind_graphics(slot, binding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_round_trip() {
        for mode in RenderMode::ALL {
            assert_eq!(RenderMode::from_flags(mode.flags()), mode);
        }
        assert_eq!(
            RenderMode::from_flags(RenderFlags::RAY_MARCH_CUBEMAP | RenderFlags::SEPARATE_LIGHT_PASS),
            RenderMode::SeparateCubemap
        );
    }

    #[test]
    fn test_mode_cycling_wraps() {
        assert_eq!(RenderMode::SeparateCubemap.next(), RenderMode::Merged);
        assert_eq!(RenderMode::Merged.prev(), RenderMode::SeparateCubemap);
        let mut mode = RenderMode::Separate;
        for _ in 0..4 {
            mode = mode.next();
        }
        assert_eq!(mode, RenderMode::Separate);
    }

    #[test]
    fn test_mode_names_parse() {
        for mode in RenderMode::ALL {
            assert_eq!(RenderMode::from_name(mode.name()), Some(mode));
        }
        assert_eq!(RenderMode::from_name("Merged-Cubemap"), Some(RenderMode::MergedCubemap));
        assert_eq!(RenderMode::from_name("wireframe"), None);
    }

    #[test]
    fn test_planar_grid_always_direct() {
        let planar = GridSize::new(64, 64, 1);
        for mode in RenderMode::ALL {
            assert_eq!(RenderStrategy::resolve(planar, mode), RenderStrategy::Direct2D);
        }
    }

    #[test]
    fn test_volume_strategies() {
        let volume = GridSize::new(64, 64, 64);
        assert_eq!(RenderStrategy::resolve(volume, RenderMode::Merged), RenderStrategy::MergedDirect);
        let separate = RenderStrategy::resolve(volume, RenderMode::Separate);
        assert!(separate.uses_light_map() && !separate.uses_cubemap());
        let both = RenderStrategy::resolve(volume, RenderMode::SeparateCubemap);
        assert!(both.uses_light_map() && both.uses_cubemap());
    }

    #[test]
    fn test_recorded_passes_match_strategy() {
        use crate::backend::RecordingDevice;
        use crate::config::FluidConfig;
        use crate::fluid::Fluid;
        use glam::{Mat4, Vec3};

        let mut device = RecordingDevice::new();
        let mut fluid = Fluid::new(&mut device, &FluidConfig::new(GridSize::new(32, 32, 32))).unwrap();
        let eye = Vec3::new(4.0, 16.0, -40.0);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_4, 16.0 / 9.0, 1.0, 1000.0);

        for mode in RenderMode::ALL {
            device.clear_commands();
            fluid.update_frame(&mut device, 0, 0.0, &view, &proj, eye);
            let strategy = fluid.render(&mut device, 0, mode);
            assert_eq!(strategy, RenderStrategy::resolve(GridSize::new(32, 32, 32), mode));

            let names: Vec<&str> = device.passes().iter().map(|p| p.kernel).collect();
            assert_eq!(names.contains(&"ray_march_light"), strategy.uses_light_map(), "{}", mode);
            assert_eq!(names.contains(&"render_cube"), strategy.uses_cubemap(), "{}", mode);
            assert!(!names.contains(&"visualize"), "{}", mode);
        }
    }
}
