//! The two-phase stable-fluids solver.
//!
//! Each frame runs one advection dispatch and one projection dispatch:
//!
//! - **Advection** reads velocity 0 and the dye written last frame, and writes
//!   velocity 1 and this frame's dye.
//! - **Projection** reads velocity 1, uses the incompressibility scratch field
//!   and writes the corrected velocity back into velocity 0.
//!
//! Velocity therefore always ends the frame in slot 0, while dye alternates
//! with the frame parity.

use crate::barrier::{BarrierBatch, StateTracker};
use crate::device::{
    div_up, Binding, BufferHandle, GpuDevice, KernelHandle, ResourceState, ResourceView,
    SamplerPreset, ViewAccess,
};
use crate::error::FluidError;
use crate::grid::{Field, GridResourceSet, GridSize, Parity};
use crate::kernels;
use crate::uniforms::SimulationUniforms;

/// Fixed update interval for volumetric grids.
pub const VOLUME_INTERVAL: f32 = 1.0 / 60.0;
/// Fixed update interval for thin 2-D grids.
pub const PLANAR_INTERVAL: f32 = 1.0 / 800.0;

/// Accumulator that turns per-frame time steps into fixed solver steps.
///
/// The step handed to the solver is either zero or exactly the target
/// interval; once it fires, the accumulated time restarts on the next frame.
#[derive(Clone, Copy, Debug)]
pub struct TimeStepGate {
    target: f32,
    accumulated: f32,
}

impl TimeStepGate {
    pub fn new(target: f32) -> Self {
        Self {
            target,
            accumulated: 0.0,
        }
    }

    pub fn for_grid(size: GridSize) -> Self {
        Self::new(if size.is_volumetric() {
            VOLUME_INTERVAL
        } else {
            PLANAR_INTERVAL
        })
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Feed one frame's time step and return the solver step to use.
    pub fn advance(&mut self, time_step: f32) -> f32 {
        if self.accumulated > self.target {
            self.accumulated = 0.0;
        }
        self.accumulated += time_step;
        if self.accumulated < self.target {
            0.0
        } else {
            self.target
        }
    }
}

/// Advection and projection over a [`GridResourceSet`].
pub struct SimulationStage {
    advect: KernelHandle,
    project: KernelHandle,
    project_groups: [u32; 3],
    advect_groups: [u32; 3],
    constants: BufferHandle,
    gate: TimeStepGate,
}

impl SimulationStage {
    /// Load the solver kernels and put the scratch field into its only state.
    pub fn new(
        device: &mut dyn GpuDevice,
        grid: &GridResourceSet,
        states: &mut StateTracker,
        constants: BufferHandle,
    ) -> Result<Self, FluidError> {
        let size = grid.size();
        let advect = device.load_kernel(&kernels::ADVECT)?;
        let (project, project_groups) = if size.is_volumetric() {
            (
                device.load_kernel(&kernels::PROJECT_3D)?,
                [div_up(size.x, 4), div_up(size.y, 4), div_up(size.z, 4)],
            )
        } else {
            (
                device.load_kernel(&kernels::PROJECT_2D)?,
                [div_up(size.x, 8), div_up(size.y, 8), size.z],
            )
        };

        let mut batch = BarrierBatch::new(states);
        batch.require(grid.incompressibility(), ResourceState::UNORDERED_ACCESS);
        batch.flush(device);

        Ok(Self {
            advect,
            project,
            project_groups,
            advect_groups: [div_up(size.x, 8), div_up(size.y, 8), size.z],
            constants,
            gate: TimeStepGate::for_grid(size),
        })
    }

    pub fn advect_groups(&self) -> [u32; 3] {
        self.advect_groups
    }

    pub fn project_groups(&self) -> [u32; 3] {
        self.project_groups
    }

    /// Advance the fluid by one gated step.
    ///
    /// `parity` is the frame parity after this frame's update: dye is read
    /// from `parity.flip()` and written to `parity`. Returns the solver step.
    #[allow(clippy::too_many_arguments)]
    pub fn simulate(
        &mut self,
        device: &mut dyn GpuDevice,
        grid: &GridResourceSet,
        states: &mut StateTracker,
        frame_index: usize,
        parity: Parity,
        time_step: f32,
        base_seed: u32,
    ) -> f32 {
        let step = self.gate.advance(time_step);
        let uniforms = SimulationUniforms {
            time_step: step,
            base_seed,
            _padding: [0; 2],
        };
        device.write_constants(self.constants, frame_index, bytemuck::bytes_of(&uniforms));

        self.advect(device, grid, states, frame_index, parity);
        self.project(device, grid, states, frame_index, parity);
        step
    }

    fn advect(
        &self,
        device: &mut dyn GpuDevice,
        grid: &GridResourceSet,
        states: &mut StateTracker,
        frame_index: usize,
        parity: Parity,
    ) {
        let mut batch = BarrierBatch::new(states);
        batch
            .require(grid.handle(Field::Velocity, Parity::Even), ResourceState::NON_PIXEL_SHADER_RESOURCE)
            .require(grid.handle(Field::Velocity, Parity::Odd), ResourceState::UNORDERED_ACCESS)
            .require(grid.handle(Field::Color, parity.flip()), ResourceState::NON_PIXEL_SHADER_RESOURCE)
            .require(grid.handle(Field::Color, parity), ResourceState::UNORDERED_ACCESS);
        batch.flush(device);

        device.set_kernel(self.advect);
        device.bind_compute(0, self.constant_binding(frame_index));
        device.bind_compute(1, Binding::View(grid.view_for(Field::Velocity, Parity::Even, ViewAccess::Read)));
        device.bind_compute(2, Binding::View(grid.view_for(Field::Velocity, Parity::Odd, ViewAccess::Write)));
        device.bind_compute(3, Binding::Sampler(SamplerPreset::LinearMirror));
        device.bind_compute(4, Binding::View(grid.view_for(Field::Color, parity.flip(), ViewAccess::Read)));
        device.bind_compute(5, Binding::View(grid.view_for(Field::Color, parity, ViewAccess::Write)));

        let [x, y, z] = self.advect_groups;
        device.dispatch(x, y, z);
    }

    fn project(
        &self,
        device: &mut dyn GpuDevice,
        grid: &GridResourceSet,
        states: &mut StateTracker,
        frame_index: usize,
        parity: Parity,
    ) {
        // The freshly written dye is left readable for every render path.
        let mut batch = BarrierBatch::new(states);
        batch
            .require(grid.handle(Field::Velocity, Parity::Even), ResourceState::UNORDERED_ACCESS)
            .require(grid.handle(Field::Velocity, Parity::Odd), ResourceState::NON_PIXEL_SHADER_RESOURCE)
            .require(grid.handle(Field::Color, parity), ResourceState::SHADER_RESOURCE);
        batch.flush(device);

        device.set_kernel(self.project);
        device.bind_compute(0, self.constant_binding(frame_index));
        device.bind_compute(1, Binding::View(grid.view_for(Field::Velocity, Parity::Odd, ViewAccess::Read)));
        device.bind_compute(2, Binding::View(grid.view_for(Field::Velocity, Parity::Even, ViewAccess::Write)));
        device.bind_compute(3, Binding::View(ResourceView::write(grid.incompressibility())));

        let [x, y, z] = self.project_groups;
        device.dispatch(x, y, z);
    }

    fn constant_binding(&self, frame_index: usize) -> Binding {
        Binding::Constants {
            buffer: self.constants,
            frame_index,
        }
    }
}
