//! Frame pacing and per-frame ordering.
//!
//! Up to [`FRAME_COUNT`] frames are in flight. Every frame slot remembers the
//! fence value its last submission signals; before a slot is reused the CPU
//! waits for that fence, which keeps the slot's constant data alive while the
//! GPU still reads it.

use glam::{Mat4, Vec3};

use crate::config::FluidConfig;
use crate::device::{GpuDevice, FRAME_COUNT};
use crate::error::FluidError;
use crate::fluid::Fluid;
use crate::light_probe::{LightProbeStage, RadianceSource};
use crate::render::{RenderMode, RenderStrategy};

/// Background colour of every frame.
pub const CLEAR_COLOR: [f32; 4] = [0.2, 0.2, 0.2, 0.0];

/// Drives one [`Fluid`] (and optional light probe) on a device.
pub struct FrameOrchestrator<D: GpuDevice> {
    device: D,
    fluid: Fluid,
    probe: Option<LightProbeStage>,
    frame_index: usize,
    fence_values: [u64; FRAME_COUNT],
    last_submitted: u64,
}

impl<D: GpuDevice> FrameOrchestrator<D> {
    pub fn new(mut device: D, config: &FluidConfig) -> Result<Self, FluidError> {
        let fluid = Fluid::new(&mut device, config)?;
        let probe = match config.radiance {
            Some(face_size) => {
                let radiance = RadianceSource::procedural(&mut device, face_size)?;
                Some(LightProbeStage::new(&mut device, radiance)?)
            }
            None => None,
        };

        let mut fence_values = [0; FRAME_COUNT];
        fence_values[0] = 1;
        Ok(Self {
            device,
            fluid,
            probe,
            frame_index: 0,
            fence_values,
            last_submitted: 0,
        })
    }

    /// CPU-side work for the coming frame. Call before [`render_frame`](Self::render_frame).
    pub fn update(&mut self, time_step: f32, view: &Mat4, proj: &Mat4, eye: Vec3) {
        self.fluid
            .update_frame(&mut self.device, self.frame_index, time_step, view, proj, eye);
        if let Some(probe) = &self.probe {
            probe.update_frame(&mut self.device, self.frame_index, view, proj, eye);
        }
    }

    /// Record and submit one frame: light probe (first frame only),
    /// simulation, background, visualization.
    ///
    /// If no frame target can be acquired nothing is recorded and the parity
    /// flip of the preceding [`update`](Self::update) is undone.
    pub fn render_frame(&mut self, mode: RenderMode) -> Result<RenderStrategy, FluidError> {
        let frame_index = self.frame_index;
        if let Err(e) = self.device.begin_frame(frame_index, CLEAR_COLOR) {
            self.fluid.discard_frame();
            return Err(e);
        }

        if let Some(probe) = &mut self.probe {
            if probe.sh().is_none() {
                let sh = probe.process(&mut self.device);
                self.fluid.set_sh(Some(sh));
            }
        }

        self.fluid.simulate(&mut self.device, frame_index);
        if let Some(probe) = &self.probe {
            probe.render_environment(&mut self.device, frame_index);
        }
        let strategy = self.fluid.render(&mut self.device, frame_index, mode);

        let fence_value = self.fence_values[frame_index];
        self.device.submit(fence_value)?;
        self.last_submitted = fence_value;
        self.move_to_next_frame();
        Ok(strategy)
    }

    fn move_to_next_frame(&mut self) {
        let current = self.fence_values[self.frame_index];
        self.frame_index = (self.frame_index + 1) % FRAME_COUNT;

        let pending = self.fence_values[self.frame_index];
        if self.device.completed_fence() < pending {
            log::trace!("waiting for frame slot {} (fence {})", self.frame_index, pending);
            self.device.wait_for_fence(pending);
        }
        self.fence_values[self.frame_index] = current + 1;
    }

    /// Block until everything submitted so far has finished.
    pub fn wait_for_gpu(&mut self) {
        if self.last_submitted > 0 && self.device.completed_fence() < self.last_submitted {
            self.device.wait_for_fence(self.last_submitted);
        }
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn fluid(&self) -> &Fluid {
        &self.fluid
    }

    pub fn fluid_mut(&mut self) -> &mut Fluid {
        &mut self.fluid
    }

    pub fn light_probe(&self) -> Option<&LightProbeStage> {
        self.probe.as_ref()
    }
}
