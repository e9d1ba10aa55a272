//! A [`GpuDevice`] that records instead of rendering.
//!
//! Every call is appended to a command list. The device also mirrors the
//! state of every subresource from the barriers it receives and checks each
//! dispatch and draw against the kernel's slot signature. Anything that would
//! be undefined behaviour on a real GPU is reported as a [`Hazard`] instead of
//! panicking, so tests can assert on the whole stream.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::device::{
    AccessFlags, Barrier, Binding, BufferDesc, BufferHandle, BufferLayout, ElementFormat,
    GpuDevice, KernelHandle, ResourceState, ResourceView, Subresource, ViewAccess, FRAME_COUNT,
};
use crate::error::FluidError;
use crate::kernels::{KernelDesc, SlotKind};

/// One recorded device call.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Allocate { buffer: BufferHandle, label: String },
    Upload { buffer: BufferHandle, bytes: usize },
    LoadKernel { kernel: KernelHandle, name: &'static str },
    WriteConstants { buffer: BufferHandle, frame_index: usize, data: Vec<u8> },
    Barrier(Vec<Barrier>),
    SetKernel(KernelHandle),
    Bind { slot: u32, binding: Binding, compute: bool },
    Dispatch([u32; 3]),
    Draw { vertex_count: u32, instance_count: u32 },
    BeginFrame { frame_index: usize, clear_color: [f32; 4] },
    Submit { fence_value: u64 },
    Wait { fence_value: u64 },
}

/// A buffer as it was allocated.
#[derive(Clone, Debug, PartialEq)]
pub struct Allocation {
    pub label: String,
    pub layout: BufferLayout,
    pub format: ElementFormat,
    pub access: AccessFlags,
    pub mip_levels: u32,
}

impl Allocation {
    fn subresources(&self) -> usize {
        match self.layout {
            BufferLayout::Cube { .. } => 6 * self.mip_levels as usize,
            _ => 1,
        }
    }

    fn byte_size(&self) -> usize {
        let elements = match self.layout {
            BufferLayout::Volume { width, height, depth } => width * height * depth,
            BufferLayout::Cube { size } => size * size * 6,
            BufferLayout::Structured { elements } => elements,
            BufferLayout::Constants { size } => return size as usize,
        };
        elements as usize * self.format.size() as usize
    }
}

/// A dispatch or draw together with everything bound for it.
#[derive(Clone, Debug, PartialEq)]
pub struct Pass {
    pub kernel: &'static str,
    pub compute: bool,
    pub bindings: BTreeMap<u32, Binding>,
}

impl Pass {
    fn views(&self) -> impl Iterator<Item = ResourceView> + '_ {
        self.bindings.values().filter_map(|b| match b {
            Binding::View(view) => Some(*view),
            _ => None,
        })
    }

    pub fn reads(&self, buffer: BufferHandle) -> bool {
        self.views()
            .any(|v| v.buffer == buffer && v.access == ViewAccess::Read)
    }

    pub fn writes(&self, buffer: BufferHandle) -> bool {
        self.views()
            .any(|v| v.buffer == buffer && v.access == ViewAccess::Write)
    }

    pub fn written_buffers(&self) -> impl Iterator<Item = BufferHandle> + '_ {
        self.views()
            .filter(|v| v.access == ViewAccess::Write)
            .map(|v| v.buffer)
    }

    pub fn binding(&self, slot: u32) -> Option<Binding> {
        self.bindings.get(&slot).copied()
    }
}

/// What went wrong.
#[derive(Clone, Debug, PartialEq)]
pub enum HazardKind {
    UnknownBuffer(BufferHandle),
    /// A barrier's `before` disagrees with the mirrored state.
    StaleBarrier {
        buffer: BufferHandle,
        subresource: u32,
        expected: ResourceState,
        actual: ResourceState,
    },
    SubresourceOutOfRange { buffer: BufferHandle, subresource: u32 },
    NotReadable { slot: u32, buffer: BufferHandle, state: ResourceState },
    NotWritable { slot: u32, buffer: BufferHandle, state: ResourceState },
    /// The same buffer is read and written by one pass.
    ReadWriteAlias(BufferHandle),
    SlotMismatch { slot: u32, expected: SlotKind },
    SlotOutOfRange(u32),
    MissingSlot { slot: u32, expected: SlotKind },
    UnwrittenConstants { buffer: BufferHandle, frame_index: usize },
    FrameOutOfRange(usize),
    /// Compute binding or dispatch on a graphics kernel, or the reverse.
    WrongPipeline,
    NoKernel,
    UploadSize { buffer: BufferHandle, expected: usize, actual: usize },
    /// Waiting for a fence that was never submitted would never return.
    UnsubmittedFence(u64),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Hazard {
    /// Index into [`RecordingDevice::commands`] at the time it was found.
    pub command: usize,
    pub kernel: Option<&'static str>,
    pub kind: HazardKind,
}

/// Recording, validating device for tests and headless runs.
#[derive(Default)]
pub struct RecordingDevice {
    allocations: Vec<Allocation>,
    states: Vec<Vec<ResourceState>>,
    kernels: Vec<&'static KernelDesc>,
    current: Option<KernelHandle>,
    bound: BTreeMap<u32, Binding>,
    written_constants: HashSet<(BufferHandle, usize)>,
    commands: Vec<Command>,
    passes: Vec<Pass>,
    snapshots: Vec<HashMap<BufferHandle, ResourceState>>,
    hazards: Vec<Hazard>,
    barrier_count: usize,
    fail_at: Option<usize>,
    allocation_calls: usize,
    fail_begin_at: Option<usize>,
    begin_calls: usize,
    submitted: Vec<u64>,
    latency: usize,
    waited: u64,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `index`-th allocation call (zero-based) fail.
    pub fn fail_allocation_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Make the `index`-th `begin_frame` call (zero-based) fail as a lost
    /// surface would. Nothing is recorded for that call.
    pub fn fail_begin_frame_at(mut self, index: usize) -> Self {
        self.fail_begin_at = Some(index);
        self
    }

    /// Keep the last `frames` submissions incomplete until waited on.
    pub fn with_gpu_latency(mut self, frames: usize) -> Self {
        self.latency = frames;
        self
    }

    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    pub fn allocation(&self, buffer: BufferHandle) -> Option<&Allocation> {
        self.allocations.get(buffer.index())
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Forget recorded commands, passes and snapshots. Hazards, barrier
    /// counts and mirrored states are kept.
    pub fn clear_commands(&mut self) {
        self.commands.clear();
        self.passes.clear();
        self.snapshots.clear();
    }

    pub fn dispatches(&self) -> Vec<[u32; 3]> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::Dispatch(groups) => Some(*groups),
                _ => None,
            })
            .collect()
    }

    pub fn draws(&self) -> Vec<(u32, u32)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::Draw {
                    vertex_count,
                    instance_count,
                } => Some((*vertex_count, *instance_count)),
                _ => None,
            })
            .collect()
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn hazards(&self) -> &[Hazard] {
        &self.hazards
    }

    /// State of the first subresource of every buffer, taken right before
    /// each dispatch or draw.
    pub fn state_snapshots(&self) -> &[HashMap<BufferHandle, ResourceState>] {
        &self.snapshots
    }

    /// Individual transitions received since creation.
    pub fn barrier_count(&self) -> usize {
        self.barrier_count
    }

    /// Mirrored state of one subresource.
    pub fn state(&self, buffer: BufferHandle, subresource: u32) -> Option<ResourceState> {
        self.states
            .get(buffer.index())
            .and_then(|s| s.get(subresource as usize))
            .copied()
    }

    fn hazard(&mut self, kind: HazardKind) {
        let kernel = self.current.map(|k| self.kernels[k.index()].name);
        log::debug!("hazard in {:?}: {:?}", kernel, kind);
        self.hazards.push(Hazard {
            command: self.commands.len(),
            kernel,
            kind,
        });
    }

    fn apply_barrier(&mut self, barrier: &Barrier) {
        let Some(count) = self.states.get(barrier.buffer.index()).map(Vec::len) else {
            self.hazard(HazardKind::UnknownBuffer(barrier.buffer));
            return;
        };
        let range = match barrier.subresource {
            Subresource::All => 0..count,
            Subresource::Index(i) if (i as usize) < count => i as usize..i as usize + 1,
            Subresource::Index(i) => {
                self.hazard(HazardKind::SubresourceOutOfRange {
                    buffer: barrier.buffer,
                    subresource: i,
                });
                return;
            }
        };

        let states = &mut self.states[barrier.buffer.index()];
        let mut stale = Vec::new();
        for i in range {
            if states[i] != barrier.before {
                stale.push(HazardKind::StaleBarrier {
                    buffer: barrier.buffer,
                    subresource: i as u32,
                    expected: barrier.before,
                    actual: states[i],
                });
            }
            states[i] = barrier.after;
        }
        for kind in stale {
            self.hazard(kind);
        }
    }

    fn bind(&mut self, slot: u32, binding: Binding, compute: bool) {
        self.commands.push(Command::Bind {
            slot,
            binding,
            compute,
        });
        match self.current {
            Some(kernel) if self.kernels[kernel.index()].is_compute() != compute => {
                self.hazard(HazardKind::WrongPipeline)
            }
            Some(_) => {}
            None => self.hazard(HazardKind::NoKernel),
        }
        self.bound.insert(slot, binding);
    }

    /// Subresources a view touches.
    fn view_subresources(&self, view: &ResourceView) -> Vec<usize> {
        let Some(allocation) = self.allocation(view.buffer) else {
            return Vec::new();
        };
        match (view.mip, allocation.layout) {
            (Some(mip), BufferLayout::Cube { .. }) => (0..6)
                .map(|face| (mip + face * allocation.mip_levels) as usize)
                .collect(),
            _ => (0..allocation.subresources()).collect(),
        }
    }

    fn accepts(&self, kind: SlotKind, binding: &Binding) -> bool {
        let view = match binding {
            Binding::Values(_) => return kind == SlotKind::Values,
            Binding::Sampler(_) => return kind == SlotKind::Sampler,
            Binding::Constants { buffer, .. } => {
                return kind == SlotKind::Constants
                    && matches!(
                        self.allocation(*buffer).map(|a| a.layout),
                        Some(BufferLayout::Constants { .. })
                    )
            }
            Binding::View(view) => view,
        };
        let Some(allocation) = self.allocation(view.buffer) else {
            return false;
        };
        let read = view.access == ViewAccess::Read;
        let mip_ok = view.mip.map_or(true, |mip| mip < allocation.mip_levels);
        match (kind, allocation.layout) {
            (SlotKind::Volume, BufferLayout::Volume { .. }) => read,
            (SlotKind::Cube, BufferLayout::Cube { .. }) => read && mip_ok,
            (SlotKind::StorageVolume(format), BufferLayout::Volume { .. }) => {
                !read && allocation.format == format
            }
            (SlotKind::StorageCubeMip(format), BufferLayout::Cube { .. }) => {
                !read && view.mip.is_some() && mip_ok && allocation.format == format
            }
            (SlotKind::Structured | SlotKind::OptionalStructured, BufferLayout::Structured { .. }) => read,
            (SlotKind::StructuredRw, BufferLayout::Structured { .. }) => !read,
            _ => false,
        }
    }

    /// Check the bound slots and states for the pass about to run, then
    /// record it.
    fn validate_pass(&mut self, compute: bool) {
        let Some(kernel) = self.current else {
            self.hazard(HazardKind::NoKernel);
            return;
        };
        let desc = self.kernels[kernel.index()];
        if desc.is_compute() != compute {
            self.hazard(HazardKind::WrongPipeline);
        }

        let mut found = Vec::new();
        for (index, kind) in desc.slots.iter().enumerate() {
            let slot = index as u32;
            match self.bound.get(&slot) {
                None if *kind == SlotKind::OptionalStructured => {}
                None => found.push(HazardKind::MissingSlot {
                    slot,
                    expected: *kind,
                }),
                Some(binding) if !self.accepts(*kind, binding) => found.push(HazardKind::SlotMismatch {
                    slot,
                    expected: *kind,
                }),
                Some(_) => {}
            }
        }
        for slot in self.bound.keys() {
            if *slot as usize >= desc.slots.len() {
                found.push(HazardKind::SlotOutOfRange(*slot));
            }
        }

        let read_bit = if compute {
            ResourceState::NON_PIXEL_SHADER_RESOURCE
        } else {
            ResourceState::PIXEL_SHADER_RESOURCE
        };
        let mut read_buffers = HashSet::new();
        let mut written_buffers = HashSet::new();
        for (slot, binding) in &self.bound {
            match binding {
                Binding::View(view) => {
                    let Some(states) = self.states.get(view.buffer.index()) else {
                        found.push(HazardKind::UnknownBuffer(view.buffer));
                        continue;
                    };
                    for sub in self.view_subresources(view) {
                        let state = states[sub];
                        let ok = match view.access {
                            ViewAccess::Read => state.contains(read_bit),
                            ViewAccess::Write => state.is_writable(),
                        };
                        if !ok {
                            found.push(match view.access {
                                ViewAccess::Read => HazardKind::NotReadable {
                                    slot: *slot,
                                    buffer: view.buffer,
                                    state,
                                },
                                ViewAccess::Write => HazardKind::NotWritable {
                                    slot: *slot,
                                    buffer: view.buffer,
                                    state,
                                },
                            });
                            break;
                        }
                    }
                    match view.access {
                        ViewAccess::Read => read_buffers.insert(view.buffer),
                        ViewAccess::Write => written_buffers.insert(view.buffer),
                    };
                }
                Binding::Constants { buffer, frame_index } => {
                    if !self.written_constants.contains(&(*buffer, *frame_index)) {
                        found.push(HazardKind::UnwrittenConstants {
                            buffer: *buffer,
                            frame_index: *frame_index,
                        });
                    }
                }
                Binding::Sampler(_) | Binding::Values(_) => {}
            }
        }
        for buffer in read_buffers.intersection(&written_buffers) {
            found.push(HazardKind::ReadWriteAlias(*buffer));
        }
        for kind in found {
            self.hazard(kind);
        }

        let snapshot = self
            .states
            .iter()
            .enumerate()
            .filter_map(|(i, s)| Some((BufferHandle(i as u32), *s.first()?)))
            .collect();
        self.snapshots.push(snapshot);
        self.passes.push(Pass {
            kernel: desc.name,
            compute,
            bindings: self.bound.clone(),
        });
    }
}

impl GpuDevice for RecordingDevice {
    fn allocate_typed_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferHandle, FluidError> {
        let call = self.allocation_calls;
        self.allocation_calls += 1;
        if self.fail_at == Some(call) {
            return Err(FluidError::Allocation {
                label: desc.label.to_string(),
                reason: "injected failure".into(),
            });
        }

        let buffer = BufferHandle(self.allocations.len() as u32);
        let allocation = Allocation {
            label: desc.label.to_string(),
            layout: desc.layout,
            format: desc.format,
            access: desc.access,
            mip_levels: desc.mip_levels.max(1),
        };
        self.states
            .push(vec![ResourceState::COMMON; allocation.subresources()]);
        self.allocations.push(allocation);
        self.commands.push(Command::Allocate {
            buffer,
            label: desc.label.to_string(),
        });
        Ok(buffer)
    }

    fn upload(&mut self, buffer: BufferHandle, data: &[u8]) {
        self.commands.push(Command::Upload {
            buffer,
            bytes: data.len(),
        });
        let Some(allocation) = self.allocation(buffer) else {
            self.hazard(HazardKind::UnknownBuffer(buffer));
            return;
        };
        // Cubes upload mip 0 only, which is the whole of a one-mip cube.
        let expected = allocation.byte_size();
        if expected != data.len() {
            self.hazard(HazardKind::UploadSize {
                buffer,
                expected,
                actual: data.len(),
            });
        }
    }

    fn load_kernel(&mut self, desc: &'static KernelDesc) -> Result<KernelHandle, FluidError> {
        if let Some(i) = self.kernels.iter().position(|k| std::ptr::eq(*k, desc)) {
            return Ok(KernelHandle(i as u32));
        }
        let kernel = KernelHandle(self.kernels.len() as u32);
        self.kernels.push(desc);
        self.commands.push(Command::LoadKernel {
            kernel,
            name: desc.name,
        });
        Ok(kernel)
    }

    fn write_constants(&mut self, buffer: BufferHandle, frame_index: usize, data: &[u8]) {
        self.commands.push(Command::WriteConstants {
            buffer,
            frame_index,
            data: data.to_vec(),
        });
        if frame_index >= FRAME_COUNT {
            self.hazard(HazardKind::FrameOutOfRange(frame_index));
            return;
        }
        match self.allocation(buffer).map(|a| a.layout) {
            Some(BufferLayout::Constants { size }) if data.len() <= size as usize => {
                self.written_constants.insert((buffer, frame_index));
            }
            Some(BufferLayout::Constants { size }) => self.hazard(HazardKind::UploadSize {
                buffer,
                expected: size as usize,
                actual: data.len(),
            }),
            _ => self.hazard(HazardKind::UnknownBuffer(buffer)),
        }
    }

    fn barrier(&mut self, barriers: &[Barrier]) {
        self.commands.push(Command::Barrier(barriers.to_vec()));
        self.barrier_count += barriers.len();
        for barrier in barriers {
            self.apply_barrier(barrier);
        }
    }

    fn set_kernel(&mut self, kernel: KernelHandle) {
        self.commands.push(Command::SetKernel(kernel));
        self.bound.clear();
        if kernel.index() < self.kernels.len() {
            self.current = Some(kernel);
        } else {
            self.current = None;
            self.hazard(HazardKind::NoKernel);
        }
    }

    fn bind_compute(&mut self, slot: u32, binding: Binding) {
        self.bind(slot, binding, true);
    }

    fn bind_graphics(&mut self, slot: u32, binding: Binding) {
        self.bind(slot, binding, false);
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        self.validate_pass(true);
        self.commands.push(Command::Dispatch([groups_x, groups_y, groups_z]));
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.validate_pass(false);
        self.commands.push(Command::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn begin_frame(&mut self, frame_index: usize, clear_color: [f32; 4]) -> Result<(), FluidError> {
        let call = self.begin_calls;
        self.begin_calls += 1;
        if self.fail_begin_at == Some(call) {
            return Err(FluidError::Surface("injected lost surface".into()));
        }
        self.commands.push(Command::BeginFrame {
            frame_index,
            clear_color,
        });
        if frame_index >= FRAME_COUNT {
            self.hazard(HazardKind::FrameOutOfRange(frame_index));
        }
        Ok(())
    }

    fn submit(&mut self, fence_value: u64) -> Result<(), FluidError> {
        self.commands.push(Command::Submit { fence_value });
        self.submitted.push(fence_value);
        Ok(())
    }

    fn completed_fence(&mut self) -> u64 {
        let finished = self.submitted.len().saturating_sub(self.latency);
        let lagged = finished
            .checked_sub(1)
            .map_or(0, |i| self.submitted[i]);
        lagged.max(self.waited)
    }

    fn wait_for_fence(&mut self, fence_value: u64) {
        self.commands.push(Command::Wait { fence_value });
        if self.submitted.contains(&fence_value) {
            self.waited = self.waited.max(fence_value);
        } else {
            self.hazard(HazardKind::UnsubmittedFence(fence_value));
        }
    }
}
