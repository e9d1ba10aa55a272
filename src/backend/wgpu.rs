//! [`GpuDevice`] on top of wgpu.
//!
//! wgpu tracks resource usage itself, so explicit barriers are only counted.
//! Every dispatch gets its own compute pass and every draw its own render
//! pass, which keeps the recorded order identical to the call order. Bind
//! groups are built at dispatch/draw time from whatever is bound to the
//! current kernel's slots. Root constants are suballocated from a ring with
//! one region per frame slot, rewound when the slot is reused.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use winit::window::Window;

use crate::device::{
    AccessFlags, Barrier, Binding, BufferDesc, BufferHandle, BufferLayout, ElementFormat,
    GpuDevice, KernelHandle, ResourceView, SamplerPreset, FRAME_COUNT,
};
use crate::error::FluidError;
use crate::kernels::{CullMode, KernelDesc, KernelKind, SlotKind, Topology};

/// Backing size of the buffer bound to an unbound optional structured slot.
/// Large enough for one order-3 coefficient set.
const DUMMY_STRUCTURED_SIZE: u64 = 9 * 3 * 4;

/// Size of one set of root constants.
const VALUES_SIZE: u64 = 16;

/// Root-constant sets one frame may bind.
const VALUES_PER_FRAME: u64 = 64;

/// Offsets into the root-constant ring.
///
/// Queue writes land before the submission that follows them, so every set
/// bound within one frame needs its own offset.
#[derive(Debug)]
struct ValuesRing {
    stride: u64,
    frame_index: usize,
    cursor: u64,
}

impl ValuesRing {
    fn new(alignment: u64) -> Self {
        Self {
            stride: alignment.max(VALUES_SIZE),
            frame_index: 0,
            cursor: 0,
        }
    }

    fn size(&self) -> u64 {
        self.stride * VALUES_PER_FRAME * FRAME_COUNT as u64
    }

    /// Rewind to the start of `frame_index`'s region. Only safe once the
    /// slot's previous submission has completed.
    fn begin_frame(&mut self, frame_index: usize) {
        self.frame_index = frame_index % FRAME_COUNT;
        self.cursor = 0;
    }

    /// Next free offset in the current frame's region.
    fn next_offset(&mut self) -> Option<u64> {
        if self.cursor == VALUES_PER_FRAME {
            return None;
        }
        let offset = (self.frame_index as u64 * VALUES_PER_FRAME + self.cursor) * self.stride;
        self.cursor += 1;
        Some(offset)
    }
}

enum Resource {
    Texture {
        texture: wgpu::Texture,
        dimension: wgpu::TextureViewDimension,
    },
    Buffer(wgpu::Buffer),
    Constants {
        buffer: wgpu::Buffer,
        size: u64,
        stride: u64,
    },
}

struct Kernel {
    desc: &'static KernelDesc,
    layout: wgpu::BindGroupLayout,
    pipeline: Pipeline,
}

enum Pipeline {
    Compute(wgpu::ComputePipeline),
    Graphics(wgpu::RenderPipeline),
}

struct FrameTarget {
    surface_texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    /// Pending clear, consumed by the first render pass of the frame.
    clear: Option<wgpu::Color>,
}

pub struct WgpuDevice {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    resources: Vec<Resource>,
    kernels: Vec<Kernel>,
    kernel_ids: HashMap<usize, KernelHandle>,
    mirror_sampler: wgpu::Sampler,
    clamp_sampler: wgpu::Sampler,
    dummy_structured: wgpu::Buffer,
    values_buffer: wgpu::Buffer,
    values_ring: ValuesRing,
    current: Option<KernelHandle>,
    bindings: BTreeMap<u32, Binding>,
    encoder: Option<wgpu::CommandEncoder>,
    frame: Option<FrameTarget>,
    submissions: VecDeque<(u64, wgpu::SubmissionIndex)>,
    completed: Arc<AtomicU64>,
    barrier_count: u64,
}

impl WgpuDevice {
    pub async fn new(window: Arc<Window>) -> Result<Self, FluidError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(FluidError::NoAdapter)?;

        log::info!("using adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Fluid Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| FluidError::Surface("surface reports no formats".into()))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: FRAME_COUNT as u32 - 1,
        };
        surface.configure(&device, &config);

        let mirror_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Mirror Sampler"),
            address_mode_u: wgpu::AddressMode::MirrorRepeat,
            address_mode_v: wgpu::AddressMode::MirrorRepeat,
            address_mode_w: wgpu::AddressMode::MirrorRepeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let clamp_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Clamp Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let dummy_structured = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Unbound Structured"),
            size: DUMMY_STRUCTURED_SIZE,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let values_ring = ValuesRing::new(device.limits().min_uniform_buffer_offset_alignment as u64);
        let values_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Root Constant Ring"),
            size: values_ring.size(),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            surface,
            device,
            queue,
            config,
            resources: Vec::new(),
            kernels: Vec::new(),
            kernel_ids: HashMap::new(),
            mirror_sampler,
            clamp_sampler,
            dummy_structured,
            values_buffer,
            values_ring,
            current: None,
            bindings: BTreeMap::new(),
            encoder: None,
            frame: None,
            submissions: VecDeque::new(),
            completed: Arc::new(AtomicU64::new(0)),
            barrier_count: 0,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    /// Barriers requested so far. wgpu inserts its own transitions.
    pub fn barrier_count(&self) -> u64 {
        self.barrier_count
    }

    fn take_encoder(&mut self) -> wgpu::CommandEncoder {
        match self.encoder.take() {
            Some(encoder) => encoder,
            None => self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                }),
        }
    }

    fn current_kernel(&self, compute: bool) -> Option<&Kernel> {
        let kernel = self.current.and_then(|handle| self.kernels.get(handle.index()));
        match kernel {
            Some(kernel) if kernel.desc.is_compute() == compute => Some(kernel),
            Some(kernel) => {
                log::warn!("kernel '{}' used with the wrong pipeline type", kernel.desc.name);
                None
            }
            None => {
                log::warn!("dispatch or draw without a kernel");
                None
            }
        }
    }

    fn texture_view(&self, view: &ResourceView, kind: SlotKind) -> Option<wgpu::TextureView> {
        let Some(Resource::Texture { texture, dimension }) = self.resources.get(view.buffer.index())
        else {
            return None;
        };

        let desc = match kind {
            SlotKind::Cube => wgpu::TextureViewDescriptor {
                dimension: Some(wgpu::TextureViewDimension::Cube),
                base_mip_level: view.mip.unwrap_or(0),
                mip_level_count: view.mip.map(|_| 1),
                ..Default::default()
            },
            SlotKind::StorageCubeMip(_) => wgpu::TextureViewDescriptor {
                dimension: Some(wgpu::TextureViewDimension::D2Array),
                base_mip_level: view.mip.unwrap_or(0),
                mip_level_count: Some(1),
                array_layer_count: Some(6),
                ..Default::default()
            },
            _ => wgpu::TextureViewDescriptor {
                dimension: Some(*dimension),
                ..Default::default()
            },
        };
        Some(texture.create_view(&desc))
    }

    fn sampler(&self, preset: SamplerPreset) -> &wgpu::Sampler {
        match preset {
            SamplerPreset::LinearMirror => &self.mirror_sampler,
            SamplerPreset::LinearClamp => &self.clamp_sampler,
        }
    }

    /// Write every bound set of root constants into the ring and return the
    /// offset for each slot.
    fn upload_values(&mut self) -> BTreeMap<u32, u64> {
        let mut offsets = BTreeMap::new();
        for (slot, binding) in &self.bindings {
            let Binding::Values(values) = binding else {
                continue;
            };
            match self.values_ring.next_offset() {
                Some(offset) => {
                    self.queue
                        .write_buffer(&self.values_buffer, offset, bytemuck::cast_slice(values));
                    offsets.insert(*slot, offset);
                }
                None => log::warn!("root constant ring full, slot {} left unbound", slot),
            }
        }
        offsets
    }

    fn bind_group(&self, kernel: &Kernel, value_offsets: &BTreeMap<u32, u64>) -> wgpu::BindGroup {
        let slots = kernel.desc.slots;

        // Owned views must outlive the entries.
        let mut views = Vec::with_capacity(slots.len());
        for (slot, kind) in slots.iter().enumerate() {
            views.push(match self.bindings.get(&(slot as u32)) {
                Some(Binding::View(view)) => self.texture_view(view, *kind),
                _ => None,
            });
        }

        let mut entries = Vec::with_capacity(slots.len());
        for (slot, kind) in slots.iter().enumerate() {
            let resource = match (self.bindings.get(&(slot as u32)), kind) {
                (Some(Binding::View(view)), _) => match (&views[slot], self.resources.get(view.buffer.index())) {
                    (Some(texture_view), _) => wgpu::BindingResource::TextureView(texture_view),
                    (None, Some(Resource::Buffer(buffer))) => buffer.as_entire_binding(),
                    _ => {
                        log::warn!("kernel '{}' slot {}: view of an unknown resource", kernel.desc.name, slot);
                        continue;
                    }
                },
                (Some(Binding::Constants { buffer, frame_index }), _) => {
                    match self.resources.get(buffer.index()) {
                        Some(Resource::Constants { buffer, size, stride }) => {
                            wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                buffer,
                                offset: stride * *frame_index as u64,
                                size: wgpu::BufferSize::new(*size),
                            })
                        }
                        _ => {
                            log::warn!("kernel '{}' slot {}: not a constant buffer", kernel.desc.name, slot);
                            continue;
                        }
                    }
                }
                (Some(Binding::Sampler(preset)), _) => wgpu::BindingResource::Sampler(self.sampler(*preset)),
                (Some(Binding::Values(_)), _) => match value_offsets.get(&(slot as u32)) {
                    Some(offset) => wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.values_buffer,
                        offset: *offset,
                        size: wgpu::BufferSize::new(VALUES_SIZE),
                    }),
                    None => continue,
                },
                (None, SlotKind::OptionalStructured) => self.dummy_structured.as_entire_binding(),
                (None, _) => {
                    log::warn!("kernel '{}' slot {} left unbound", kernel.desc.name, slot);
                    continue;
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: slot as u32,
                resource,
            });
        }

        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.desc.name),
            layout: &kernel.layout,
            entries: &entries,
        })
    }

    fn create_pipeline(&self, desc: &'static KernelDesc) -> (wgpu::BindGroupLayout, Pipeline) {
        let visibility = if desc.is_compute() {
            wgpu::ShaderStages::COMPUTE
        } else {
            wgpu::ShaderStages::VERTEX_FRAGMENT
        };
        let entries: Vec<_> = desc
            .slots
            .iter()
            .enumerate()
            .map(|(slot, kind)| layout_entry(slot as u32, *kind, visibility))
            .collect();

        let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(desc.name),
            entries: &entries,
        });

        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(desc.name),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.name),
            source: wgpu::ShaderSource::Wgsl(desc.source.into()),
        });

        let pipeline = match desc.kind {
            KernelKind::Compute => Pipeline::Compute(self.device.create_compute_pipeline(
                &wgpu::ComputePipelineDescriptor {
                    label: Some(desc.name),
                    layout: Some(&pipeline_layout),
                    module: &module,
                    entry_point: Some("main"),
                    compilation_options: Default::default(),
                    cache: None,
                },
            )),
            KernelKind::Graphics(state) => {
                let topology = match state.topology {
                    Topology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
                    Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
                };
                let cull_mode = match state.cull {
                    CullMode::None => None,
                    CullMode::Front => Some(wgpu::Face::Front),
                };
                let blend = if state.blend {
                    Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING)
                } else {
                    None
                };

                Pipeline::Graphics(self.device.create_render_pipeline(
                    &wgpu::RenderPipelineDescriptor {
                        label: Some(desc.name),
                        layout: Some(&pipeline_layout),
                        vertex: wgpu::VertexState {
                            module: &module,
                            entry_point: Some("vs_main"),
                            buffers: &[],
                            compilation_options: Default::default(),
                        },
                        fragment: Some(wgpu::FragmentState {
                            module: &module,
                            entry_point: Some("fs_main"),
                            targets: &[Some(wgpu::ColorTargetState {
                                format: self.config.format,
                                blend,
                                write_mask: wgpu::ColorWrites::ALL,
                            })],
                            compilation_options: Default::default(),
                        }),
                        primitive: wgpu::PrimitiveState {
                            topology,
                            strip_index_format: None,
                            front_face: wgpu::FrontFace::Ccw,
                            cull_mode,
                            polygon_mode: wgpu::PolygonMode::Fill,
                            unclipped_depth: false,
                            conservative: false,
                        },
                        depth_stencil: None,
                        multisample: wgpu::MultisampleState::default(),
                        multiview: None,
                        cache: None,
                    },
                ))
            }
        };
        (layout, pipeline)
    }
}

fn texture_format(format: ElementFormat) -> wgpu::TextureFormat {
    match format {
        ElementFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        // Rg11b10Ufloat is not a storage format without extra features.
        ElementFormat::R11G11B10Float => wgpu::TextureFormat::Rgba16Float,
        ElementFormat::R32Float | ElementFormat::Float | ElementFormat::Float3 => {
            wgpu::TextureFormat::R32Float
        }
        ElementFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
    }
}

fn layout_entry(binding: u32, kind: SlotKind, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    let uniform = wgpu::BindingType::Buffer {
        ty: wgpu::BufferBindingType::Uniform,
        has_dynamic_offset: false,
        min_binding_size: None,
    };
    let storage = |read_only| wgpu::BindingType::Buffer {
        ty: wgpu::BufferBindingType::Storage { read_only },
        has_dynamic_offset: false,
        min_binding_size: None,
    };
    let sampled = |view_dimension| wgpu::BindingType::Texture {
        sample_type: wgpu::TextureSampleType::Float { filterable: true },
        view_dimension,
        multisampled: false,
    };
    let storage_texture = |format, view_dimension| wgpu::BindingType::StorageTexture {
        access: wgpu::StorageTextureAccess::WriteOnly,
        format: texture_format(format),
        view_dimension,
    };

    let ty = match kind {
        SlotKind::Constants | SlotKind::Values => uniform,
        SlotKind::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        SlotKind::Volume => sampled(wgpu::TextureViewDimension::D3),
        SlotKind::Cube => sampled(wgpu::TextureViewDimension::Cube),
        SlotKind::StorageVolume(format) => storage_texture(format, wgpu::TextureViewDimension::D3),
        SlotKind::StorageCubeMip(format) => {
            storage_texture(format, wgpu::TextureViewDimension::D2Array)
        }
        SlotKind::Structured | SlotKind::OptionalStructured => storage(true),
        SlotKind::StructuredRw => storage(false),
    };

    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty,
        count: None,
    }
}

impl GpuDevice for WgpuDevice {
    fn allocate_typed_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferHandle, FluidError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let writable = desc.access.contains(AccessFlags::UNORDERED_ACCESS);
        let resource = match desc.layout {
            BufferLayout::Volume { width, height, depth } => {
                let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
                if writable {
                    usage |= wgpu::TextureUsages::STORAGE_BINDING;
                }
                let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(desc.label),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: depth,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D3,
                    format: texture_format(desc.format),
                    usage,
                    view_formats: &[],
                });
                Resource::Texture {
                    texture,
                    dimension: wgpu::TextureViewDimension::D3,
                }
            }
            BufferLayout::Cube { size } => {
                let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
                if writable {
                    usage |= wgpu::TextureUsages::STORAGE_BINDING;
                }
                let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(desc.label),
                    size: wgpu::Extent3d {
                        width: size,
                        height: size,
                        depth_or_array_layers: 6,
                    },
                    mip_level_count: desc.mip_levels.max(1),
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: texture_format(desc.format),
                    usage,
                    view_formats: &[],
                });
                Resource::Texture {
                    texture,
                    dimension: wgpu::TextureViewDimension::Cube,
                }
            }
            BufferLayout::Structured { elements } => {
                let size = (elements as u64 * desc.format.size() as u64).max(4);
                Resource::Buffer(self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(desc.label),
                    size,
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_DST
                        | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                }))
            }
            BufferLayout::Constants { size } => {
                let align = self.device.limits().min_uniform_buffer_offset_alignment as u64;
                let size = size as u64;
                let stride = size.div_ceil(align) * align;
                let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(desc.label),
                    size: stride * FRAME_COUNT as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                Resource::Constants { buffer, size, stride }
            }
        };

        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            return Err(FluidError::Allocation {
                label: desc.label.to_string(),
                reason: err.to_string(),
            });
        }

        let handle = BufferHandle(self.resources.len() as u32);
        self.resources.push(resource);
        log::debug!("allocated '{}' as {:?}", desc.label, handle);
        Ok(handle)
    }

    fn upload(&mut self, buffer: BufferHandle, data: &[u8]) {
        match self.resources.get(buffer.index()) {
            Some(Resource::Texture { texture, .. }) => {
                let size = texture.size();
                let bytes_per_texel = texture.format().block_copy_size(None).unwrap_or(4);
                self.queue.write_texture(
                    wgpu::TexelCopyTextureInfo {
                        texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    data,
                    wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(size.width * bytes_per_texel),
                        rows_per_image: Some(size.height),
                    },
                    size,
                );
            }
            Some(Resource::Buffer(buffer)) => self.queue.write_buffer(buffer, 0, data),
            Some(Resource::Constants { .. }) | None => {
                log::warn!("upload into {:?} ignored", buffer);
            }
        }
    }

    fn load_kernel(&mut self, desc: &'static KernelDesc) -> Result<KernelHandle, FluidError> {
        let key = desc as *const KernelDesc as usize;
        if let Some(handle) = self.kernel_ids.get(&key) {
            return Ok(*handle);
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let (layout, pipeline) = self.create_pipeline(desc);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(FluidError::KernelLoad {
                name: desc.name,
                reason: err.to_string(),
            });
        }

        let handle = KernelHandle(self.kernels.len() as u32);
        self.kernels.push(Kernel {
            desc,
            layout,
            pipeline,
        });
        self.kernel_ids.insert(key, handle);
        log::debug!("loaded kernel '{}'", desc.name);
        Ok(handle)
    }

    fn write_constants(&mut self, buffer: BufferHandle, frame_index: usize, data: &[u8]) {
        match self.resources.get(buffer.index()) {
            Some(Resource::Constants { buffer, stride, .. }) => {
                self.queue.write_buffer(buffer, stride * frame_index as u64, data);
            }
            _ => log::warn!("write_constants into non-constant {:?}", buffer),
        }
    }

    fn barrier(&mut self, barriers: &[Barrier]) {
        self.barrier_count += barriers.len() as u64;
    }

    fn set_kernel(&mut self, kernel: KernelHandle) {
        self.current = Some(kernel);
        self.bindings.clear();
    }

    fn bind_compute(&mut self, slot: u32, binding: Binding) {
        self.bindings.insert(slot, binding);
    }

    fn bind_graphics(&mut self, slot: u32, binding: Binding) {
        self.bindings.insert(slot, binding);
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        let value_offsets = self.upload_values();
        let mut encoder = self.take_encoder();
        if let Some(kernel) = self.current_kernel(true) {
            if let Pipeline::Compute(pipeline) = &kernel.pipeline {
                let bind_group = self.bind_group(kernel, &value_offsets);
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(kernel.desc.name),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups_x, groups_y, groups_z);
            }
        }
        self.encoder = Some(encoder);
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        let load = match self.frame.as_mut().map(|frame| frame.clear.take()) {
            Some(Some(color)) => wgpu::LoadOp::Clear(color),
            _ => wgpu::LoadOp::Load,
        };

        let value_offsets = self.upload_values();
        let mut encoder = self.take_encoder();
        if let Some(kernel) = self.current_kernel(false) {
            match (&kernel.pipeline, &self.frame) {
                (Pipeline::Graphics(pipeline), Some(frame)) => {
                    let bind_group = self.bind_group(kernel, &value_offsets);
                    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some(kernel.desc.name),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: &frame.view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load,
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    pass.set_pipeline(pipeline);
                    pass.set_bind_group(0, &bind_group, &[]);
                    pass.draw(0..vertex_count, 0..instance_count);
                }
                (Pipeline::Graphics(_), None) => {
                    log::warn!("draw '{}' without a frame target, skipped", kernel.desc.name);
                }
                _ => {}
            }
        }
        self.encoder = Some(encoder);
    }

    fn begin_frame(&mut self, frame_index: usize, clear_color: [f32; 4]) -> Result<(), FluidError> {
        self.values_ring.begin_frame(frame_index);
        let surface_texture = match self.surface.get_current_texture() {
            Ok(texture) => Some(texture),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("surface lost, reconfiguring");
                self.surface.configure(&self.device, &self.config);
                None
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("surface timeout, frame {} not presented", frame_index);
                None
            }
            Err(e) => return Err(e.into()),
        };

        self.frame = surface_texture.map(|surface_texture| {
            let view = surface_texture
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default());
            let [r, g, b, a] = clear_color.map(f64::from);
            FrameTarget {
                surface_texture,
                view,
                clear: Some(wgpu::Color { r, g, b, a }),
            }
        });
        Ok(())
    }

    fn submit(&mut self, fence_value: u64) -> Result<(), FluidError> {
        let mut encoder = self.take_encoder();
        let frame = self.frame.take();

        // A frame without draws still has to be cleared.
        if let Some(FrameTarget {
            view,
            clear: Some(color),
            ..
        }) = &frame
        {
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(*color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }

        let index = self.queue.submit(std::iter::once(encoder.finish()));

        let completed = Arc::clone(&self.completed);
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(fence_value, Ordering::AcqRel);
        });
        self.submissions.push_back((fence_value, index));

        if let Some(frame) = frame {
            frame.surface_texture.present();
        }
        Ok(())
    }

    fn completed_fence(&mut self) -> u64 {
        let _ = self.device.poll(wgpu::Maintain::Poll);
        let completed = self.completed.load(Ordering::Acquire);
        self.submissions.retain(|(value, _)| *value > completed);
        completed
    }

    fn wait_for_fence(&mut self, fence_value: u64) {
        let pending = self
            .submissions
            .iter()
            .find(|(value, _)| *value >= fence_value)
            .map(|(_, index)| index.clone());
        if let Some(index) = pending {
            let _ = self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
        }
        self.completed.fetch_max(fence_value, Ordering::AcqRel);
        self.submissions.retain(|(value, _)| *value > fence_value);
    }
}
