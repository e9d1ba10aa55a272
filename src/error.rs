//! Error types for fluidx.
//!
//! Every failure in this crate happens during initialization: allocating grid
//! resources, loading kernels, validating the configuration or bringing up the
//! GPU. Once a [`FrameOrchestrator`](crate::FrameOrchestrator) exists, the
//! per-frame path does not fail except for surface presentation.

use std::fmt;

/// Errors that can occur while setting up or presenting a fluid simulation.
#[derive(Debug)]
pub enum FluidError {
    /// A typed buffer or texture could not be created.
    Allocation {
        /// Debug label of the resource.
        label: String,
        /// Backend-provided reason.
        reason: String,
    },
    /// A compute or graphics kernel failed to compile or link.
    KernelLoad {
        /// Kernel name from the kernel table.
        name: &'static str,
        /// Backend-provided reason.
        reason: String,
    },
    /// The configuration violates a grid invariant.
    InvalidConfig(String),
    /// No compatible GPU adapter found.
    NoAdapter,
    /// Failed to create GPU device.
    DeviceCreation(String),
    /// The presentation surface could not be created or acquired.
    Surface(String),
    /// Failed to create the event loop or window.
    EventLoop(String),
}

impl fmt::Display for FluidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FluidError::Allocation { label, reason } => {
                write!(f, "Failed to allocate '{}': {}", label, reason)
            }
            FluidError::KernelLoad { name, reason } => {
                write!(f, "Failed to load kernel '{}': {}", name, reason)
            }
            FluidError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            FluidError::NoAdapter => write!(f, "No compatible GPU adapter found. Ensure your system has a GPU with WebGPU/Vulkan/Metal/DX12 support."),
            FluidError::DeviceCreation(msg) => write!(f, "Failed to create GPU device: {}", msg),
            FluidError::Surface(msg) => write!(f, "Surface error: {}", msg),
            FluidError::EventLoop(msg) => write!(f, "Failed to run event loop: {}", msg),
        }
    }
}

impl std::error::Error for FluidError {}

impl From<wgpu::CreateSurfaceError> for FluidError {
    fn from(e: wgpu::CreateSurfaceError) -> Self {
        FluidError::Surface(e.to_string())
    }
}

impl From<wgpu::RequestDeviceError> for FluidError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        FluidError::DeviceCreation(e.to_string())
    }
}

impl From<wgpu::SurfaceError> for FluidError {
    fn from(e: wgpu::SurfaceError) -> Self {
        FluidError::Surface(e.to_string())
    }
}

impl From<winit::error::EventLoopError> for FluidError {
    fn from(e: winit::error::EventLoopError) -> Self {
        FluidError::EventLoop(e.to_string())
    }
}

impl From<winit::error::OsError> for FluidError {
    fn from(e: winit::error::OsError) -> Self {
        FluidError::EventLoop(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_resource() {
        let err = FluidError::Allocation {
            label: "Velocity 0".into(),
            reason: "out of memory".into(),
        };
        assert_eq!(err.to_string(), "Failed to allocate 'Velocity 0': out of memory");

        let err = FluidError::KernelLoad {
            name: "advect",
            reason: "parse error".into(),
        };
        assert!(err.to_string().contains("advect"));
    }

    #[test]
    fn test_invalid_config_message() {
        let err = FluidError::InvalidConfig("grid x (64) != y (32)".into());
        assert!(err.to_string().starts_with("Invalid configuration"));
    }
}
