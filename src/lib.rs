//! # fluidx
//!
//! GPU stable-fluids simulation with ray-marched volumetric rendering.
//!
//! fluidx orchestrates a velocity/dye fluid solver on a 2-D or 3-D grid and
//! renders the dye either directly (2-D) or with one of four volumetric
//! strategies: a screen-space ray cast or a cubemap-space ray march, each with
//! the lighting computed inline or read from a precomputed light map. An
//! optional light probe projects a radiance cube onto spherical harmonics for
//! ambient lighting.
//!
//! ## Quick Start
//!
//! ```ignore
//! use fluidx::prelude::*;
//!
//! let config = FluidConfig::new(GridSize::new(128, 128, 128))
//!     .with_render_mode(RenderMode::SeparateCubemap)
//!     .with_radiance(64);
//!
//! let device = pollster::block_on(WgpuDevice::new(window))?;
//! let mut frames = FrameOrchestrator::new(device, &config)?;
//!
//! loop {
//!     frames.update(time_step, &view, &proj, eye);
//!     frames.render_frame(config.render_mode)?;
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Devices
//!
//! Stages record into a [`GpuDevice`]: typed buffers, explicit state
//! transitions, kernel slots, dispatches and draws. [`WgpuDevice`] executes
//! the stream; [`RecordingDevice`] captures it and reports hazards, which is
//! what the tests run against.
//!
//! ### Frames
//!
//! [`FrameOrchestrator`] keeps up to [`FRAME_COUNT`](device::FRAME_COUNT)
//! frames in flight. Each frame: light probe (first frame only), simulation,
//! background, fluid rendering, submit.
//!
//! ### Level of detail
//!
//! Before rendering a volumetric grid, the on-screen size of one cube edge
//! picks the cubemap mip and the ray sample count. See [`lod`].

pub mod backend;
pub mod barrier;
pub mod camera;
pub mod config;
pub mod device;
pub mod error;
pub mod fluid;
pub mod frame;
pub mod grid;
pub mod kernels;
pub mod light_probe;
pub mod lod;
pub mod render;
pub mod sh;
pub mod simulation;
pub mod time;
pub mod uniforms;
pub mod window;

pub use backend::{RecordingDevice, WgpuDevice};
pub use camera::Camera;
pub use config::{CullPolicy, FluidConfig, Lighting};
pub use device::{GpuDevice, ResourceState, ResourceView};
pub use error::FluidError;
pub use fluid::Fluid;
pub use frame::FrameOrchestrator;
pub use glam::{Mat4, Vec2, Vec3, Vec4};
pub use grid::{GridResourceSet, GridSize, Parity};
pub use light_probe::{LightProbeStage, RadianceSource, ShCoefficients};
pub use lod::{FaceCulling, FaceVisibility, LodConfig, LodEstimate};
pub use render::{RenderMode, RenderStage, RenderStrategy, SampleBudget};
pub use simulation::{SimulationStage, TimeStepGate};
pub use time::FrameClock;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::backend::{RecordingDevice, WgpuDevice};
    pub use crate::camera::Camera;
    pub use crate::config::{CullPolicy, FluidConfig, Lighting};
    pub use crate::device::GpuDevice;
    pub use crate::error::FluidError;
    pub use crate::frame::FrameOrchestrator;
    pub use crate::grid::GridSize;
    pub use crate::render::{RenderMode, RenderStrategy};
    pub use crate::time::FrameClock;
    pub use crate::{Mat4, Vec2, Vec3, Vec4};
}
