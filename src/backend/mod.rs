//! [`GpuDevice`](crate::device::GpuDevice) implementations.

pub mod recording;
pub mod wgpu;

pub use recording::{Allocation, Command, Hazard, HazardKind, Pass, RecordingDevice};
pub use self::wgpu::WgpuDevice;
