//! The device abstraction the simulation and render stages record into.
//!
//! Stages never talk to a graphics API directly. They allocate typed buffers,
//! request state transitions, bind views into kernel slots and issue
//! dispatches and draws through [`GpuDevice`]. Two implementations exist:
//! [`WgpuDevice`](crate::backend::WgpuDevice) for real rendering and
//! [`RecordingDevice`](crate::backend::RecordingDevice), which captures the
//! command stream and checks it for hazards.

use bitflags::bitflags;

use crate::error::FluidError;
use crate::kernels::KernelDesc;

/// Number of frames that may be in flight at once.
pub const FRAME_COUNT: usize = 3;

/// Opaque handle to an allocated buffer or texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u32);

impl BufferHandle {
    /// Raw index, unique per device.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Opaque handle to a loaded kernel (pipeline).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KernelHandle(pub(crate) u32);

impl KernelHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Element format of a typed buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementFormat {
    /// Four half floats; velocity and dye.
    Rgba16Float,
    /// One float; incompressibility scratch.
    R32Float,
    /// Packed HDR light. Backends without packed storage formats may widen it.
    R11G11B10Float,
    /// Eight-bit RGBA; cubemap faces.
    Rgba8Unorm,
    /// Three floats per structured element.
    Float3,
    /// One float per structured element.
    Float,
}

impl ElementFormat {
    /// Size of one element in bytes.
    pub fn size(self) -> u32 {
        match self {
            ElementFormat::Rgba16Float => 8,
            ElementFormat::R32Float | ElementFormat::R11G11B10Float => 4,
            ElementFormat::Rgba8Unorm => 4,
            ElementFormat::Float3 => 12,
            ElementFormat::Float => 4,
        }
    }
}

bitflags! {
    /// How a buffer may be accessed once allocated.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u8 {
        /// Writable from compute kernels.
        const UNORDERED_ACCESS = 1 << 0;
        /// May be read and written by different queues without a transition.
        const SIMULTANEOUS_ACCESS = 1 << 1;
        /// CPU-written every frame (constant slots).
        const UPLOAD = 1 << 2;
    }
}

bitflags! {
    /// GPU-visible state of a subresource.
    ///
    /// The empty set is the common state every resource starts in.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ResourceState: u8 {
        const UNORDERED_ACCESS = 1 << 0;
        const NON_PIXEL_SHADER_RESOURCE = 1 << 1;
        const PIXEL_SHADER_RESOURCE = 1 << 2;
        const SHADER_RESOURCE = Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits();
    }
}

impl ResourceState {
    pub const COMMON: ResourceState = ResourceState::empty();

    /// Whether kernels may sample the subresource in this state.
    pub fn is_readable(self) -> bool {
        self.intersects(ResourceState::SHADER_RESOURCE)
    }

    /// Whether compute kernels may write the subresource in this state.
    pub fn is_writable(self) -> bool {
        self.contains(ResourceState::UNORDERED_ACCESS)
    }
}

/// Shape of a typed buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferLayout {
    /// A 3-D texture; 2-D grids use depth 1.
    Volume { width: u32, height: u32, depth: u32 },
    /// Six square faces, each with `mip_levels` mips.
    Cube { size: u32 },
    /// A linear array of structured elements.
    Structured { elements: u32 },
    /// One constant block of `size` bytes per in-flight frame.
    Constants { size: u32 },
}

/// Everything needed to allocate a typed buffer.
#[derive(Clone, Debug)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub layout: BufferLayout,
    pub format: ElementFormat,
    pub access: AccessFlags,
    pub mip_levels: u32,
}

impl<'a> BufferDesc<'a> {
    pub fn volume(label: &'a str, dims: [u32; 3], format: ElementFormat) -> Self {
        Self {
            label,
            layout: BufferLayout::Volume {
                width: dims[0],
                height: dims[1],
                depth: dims[2],
            },
            format,
            access: AccessFlags::empty(),
            mip_levels: 1,
        }
    }

    pub fn cube(label: &'a str, size: u32, format: ElementFormat, mip_levels: u32) -> Self {
        Self {
            label,
            layout: BufferLayout::Cube { size },
            format,
            access: AccessFlags::empty(),
            mip_levels,
        }
    }

    pub fn structured(label: &'a str, elements: u32, format: ElementFormat) -> Self {
        Self {
            label,
            layout: BufferLayout::Structured { elements },
            format,
            access: AccessFlags::empty(),
            mip_levels: 1,
        }
    }

    /// Per-frame constant slots sized for `T`.
    pub fn constants<T>(label: &'a str) -> Self {
        Self {
            label,
            layout: BufferLayout::Constants {
                size: std::mem::size_of::<T>() as u32,
            },
            format: ElementFormat::Float,
            access: AccessFlags::UPLOAD,
            mip_levels: 1,
        }
    }

    pub fn with_access(mut self, access: AccessFlags) -> Self {
        self.access = access;
        self
    }

    /// Number of independently transitionable subresources.
    pub fn subresource_count(&self) -> u32 {
        match self.layout {
            BufferLayout::Cube { .. } => 6 * self.mip_levels,
            _ => 1,
        }
    }
}

/// One subresource of a buffer, or all of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subresource {
    All,
    /// D3D-style index: `mip + face * mip_levels`.
    Index(u32),
}

impl Subresource {
    pub fn cube_face(mip: u32, face: u32, mip_levels: u32) -> Self {
        Subresource::Index(mip + face * mip_levels)
    }
}

/// A state transition for one subresource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Barrier {
    pub buffer: BufferHandle,
    pub subresource: Subresource,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// How a view is used by the kernel it is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewAccess {
    /// Sampled or loaded; requires a readable state.
    Read,
    /// Written through unordered access; requires the UAV state.
    Write,
}

/// Opaque binding handle returned by the grid and light-probe stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceView {
    pub buffer: BufferHandle,
    pub access: ViewAccess,
    /// Restricts the view to one mip of a cube (all six faces).
    pub mip: Option<u32>,
}

impl ResourceView {
    pub fn read(buffer: BufferHandle) -> Self {
        Self {
            buffer,
            access: ViewAccess::Read,
            mip: None,
        }
    }

    pub fn write(buffer: BufferHandle) -> Self {
        Self {
            buffer,
            access: ViewAccess::Write,
            mip: None,
        }
    }

    pub fn with_mip(mut self, mip: u32) -> Self {
        self.mip = Some(mip);
        self
    }
}

/// Fixed sampler presets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplerPreset {
    /// Trilinear, mirrored addressing (advection backtrace).
    LinearMirror,
    /// Trilinear, clamped addressing (rendering).
    LinearClamp,
}

/// What gets bound into a kernel slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Binding {
    View(ResourceView),
    /// The constant slot belonging to `frame_index`.
    Constants {
        buffer: BufferHandle,
        frame_index: usize,
    },
    Sampler(SamplerPreset),
    /// Small per-call constants (root constants).
    Values([u32; 4]),
}

/// The operations the core needs from a graphics API.
///
/// Commands are recorded in call order into a single command stream and
/// executed by the GPU in that order. Ordering between passes is expressed
/// only through [`GpuDevice::barrier`].
pub trait GpuDevice {
    /// Allocate a typed buffer. All subresources start in the common state.
    fn allocate_typed_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferHandle, FluidError>;

    /// Upload initial contents (mip 0 of every face for cubes).
    fn upload(&mut self, buffer: BufferHandle, data: &[u8]);

    fn load_kernel(&mut self, desc: &'static KernelDesc) -> Result<KernelHandle, FluidError>;

    /// Write the constant slot of `frame_index`.
    fn write_constants(&mut self, buffer: BufferHandle, frame_index: usize, data: &[u8]);

    /// Submit a batch of transitions before the next dispatch or draw.
    fn barrier(&mut self, barriers: &[Barrier]);

    fn set_kernel(&mut self, kernel: KernelHandle);
    fn bind_compute(&mut self, slot: u32, binding: Binding);
    fn bind_graphics(&mut self, slot: u32, binding: Binding);
    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32);
    fn draw(&mut self, vertex_count: u32, instance_count: u32);

    /// Start recording frame `frame_index`; the render target is cleared to
    /// `clear_color` before the first draw.
    fn begin_frame(&mut self, frame_index: usize, clear_color: [f32; 4]) -> Result<(), FluidError>;

    /// Execute everything recorded since `begin_frame`, present, and signal
    /// `fence_value` once the GPU has finished.
    fn submit(&mut self, fence_value: u64) -> Result<(), FluidError>;

    /// Highest fence value the GPU has completed.
    fn completed_fence(&mut self) -> u64;

    /// Block until the GPU has reached `fence_value`.
    fn wait_for_fence(&mut self, fence_value: u64);
}

/// `ceil(value / divisor)`.
#[inline]
pub fn div_up(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor)
}
