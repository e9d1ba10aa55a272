//! Environment lighting: radiance cubemap to SH coefficients.
//!
//! The light probe runs three kinds of compute passes once:
//!
//! 1. projection of every cube texel onto the SH basis, one partial sum per
//!    group of 32 texels,
//! 2. tree-reduction sums, ping-ponging between two coefficient/weight buffer
//!    pairs until one group is left,
//! 3. normalisation by the summed solid angle.
//!
//! The normalised coefficients are handed out as a shared, read-only
//! [`ShCoefficients`]. The probe also draws the radiance cube as the frame
//! background.

use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::barrier::{BarrierBatch, StateTracker};
use crate::device::{
    div_up, AccessFlags, Binding, BufferDesc, BufferHandle, ElementFormat, GpuDevice,
    KernelHandle, ResourceState, ResourceView, SamplerPreset,
};
use crate::error::FluidError;
use crate::kernels;
use crate::sh::{self, ReductionPlan, SH_COEFFICIENTS, SH_GROUP_SIZE, SH_ORDER};
use crate::uniforms::EnvironmentUniforms;

/// Normalised SH coefficients on the GPU. Immutable once handed out.
#[derive(Debug, PartialEq, Eq)]
pub struct ShCoefficients {
    buffer: BufferHandle,
    order: u32,
}

impl ShCoefficients {
    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn order(&self) -> u32 {
        self.order
    }
}

/// A radiance cubemap readable by the probe.
#[derive(Clone, Copy, Debug)]
pub struct RadianceSource {
    pub buffer: BufferHandle,
    pub face_size: u32,
}

impl RadianceSource {
    /// Allocate and upload the built-in procedural sky.
    pub fn procedural(device: &mut dyn GpuDevice, face_size: u32) -> Result<Self, FluidError> {
        if face_size == 0 {
            return Err(FluidError::InvalidConfig("radiance face size must be non-zero".into()));
        }
        let buffer = device.allocate_typed_buffer(&BufferDesc::cube(
            "Radiance",
            face_size,
            ElementFormat::Rgba8Unorm,
            1,
        ))?;
        device.upload(buffer, &sh::procedural_sky(face_size));
        Ok(Self { buffer, face_size })
    }

    pub fn num_texels(&self) -> u32 {
        self.face_size * self.face_size * 6
    }
}

pub struct LightProbeStage {
    states: StateTracker,
    radiance: RadianceSource,
    coefficients: [BufferHandle; 2],
    weights: [BufferHandle; 2],
    parity: usize,
    plan: ReductionPlan,
    project: KernelHandle,
    sum: KernelHandle,
    normalize: KernelHandle,
    environment: KernelHandle,
    environment_constants: BufferHandle,
    result: Option<Arc<ShCoefficients>>,
}

impl LightProbeStage {
    pub fn new(device: &mut dyn GpuDevice, radiance: RadianceSource) -> Result<Self, FluidError> {
        let plan = ReductionPlan::new(radiance.num_texels());
        let mut states = StateTracker::new();

        let uav = AccessFlags::UNORDERED_ACCESS;
        let coefficient_count = |groups: u32| SH_COEFFICIENTS as u32 * groups;
        let mut alloc = |desc: BufferDesc<'_>| -> Result<BufferHandle, FluidError> {
            let handle = device.allocate_typed_buffer(&desc)?;
            states.register(handle, 1, ResourceState::COMMON);
            Ok(handle)
        };

        let coefficients = [
            alloc(
                BufferDesc::structured(
                    "SH Coefficients 0",
                    coefficient_count(plan.projection_groups),
                    ElementFormat::Float3,
                )
                .with_access(uav),
            )?,
            alloc(
                BufferDesc::structured("SH Coefficients 1", coefficient_count(plan.sum_groups()), ElementFormat::Float3)
                    .with_access(uav),
            )?,
        ];
        let weights = [
            alloc(
                BufferDesc::structured("SH Weights 0", plan.projection_groups, ElementFormat::Float)
                    .with_access(uav),
            )?,
            alloc(
                BufferDesc::structured("SH Weights 1", plan.sum_groups(), ElementFormat::Float)
                    .with_access(uav),
            )?,
        ];

        states.register(radiance.buffer, 6, ResourceState::COMMON);
        let mut batch = BarrierBatch::new(&mut states);
        batch.require(radiance.buffer, ResourceState::SHADER_RESOURCE);
        batch.flush(device);

        let environment_constants =
            device.allocate_typed_buffer(&BufferDesc::constants::<EnvironmentUniforms>("Environment"))?;

        Ok(Self {
            states,
            radiance,
            coefficients,
            weights,
            parity: 0,
            plan,
            project: device.load_kernel(&kernels::SH_CUBE_MAP)?,
            sum: device.load_kernel(&kernels::SH_SUM)?,
            normalize: device.load_kernel(&kernels::SH_NORMALIZE)?,
            environment: device.load_kernel(&kernels::ENVIRONMENT)?,
            environment_constants,
            result: None,
        })
    }

    pub fn plan(&self) -> &ReductionPlan {
        &self.plan
    }

    /// Coefficients, if [`process`](Self::process) has run.
    pub fn sh(&self) -> Option<Arc<ShCoefficients>> {
        self.result.clone()
    }

    /// Compute the coefficients on first call; later calls return them.
    pub fn process(&mut self, device: &mut dyn GpuDevice) -> Arc<ShCoefficients> {
        if let Some(result) = &self.result {
            return Arc::clone(result);
        }

        self.parity = 0;
        self.project_radiance(device);
        self.sum(device);
        self.normalize(device);

        let buffer = self.coefficients[self.parity];
        let mut batch = BarrierBatch::new(&mut self.states);
        batch.require(buffer, ResourceState::SHADER_RESOURCE);
        batch.flush(device);

        log::info!(
            "light probe: {} texels reduced in {} passes",
            self.plan.num_texels,
            self.plan.passes()
        );

        let result = Arc::new(ShCoefficients {
            buffer,
            order: SH_ORDER,
        });
        self.result = Some(Arc::clone(&result));
        result
    }

    fn project_radiance(&mut self, device: &mut dyn GpuDevice) {
        let mut batch = BarrierBatch::new(&mut self.states);
        batch
            .require(self.coefficients[0], ResourceState::UNORDERED_ACCESS)
            .require(self.weights[0], ResourceState::UNORDERED_ACCESS);
        batch.flush(device);

        device.set_kernel(self.project);
        device.bind_compute(0, Binding::Sampler(SamplerPreset::LinearClamp));
        device.bind_compute(1, Binding::View(ResourceView::write(self.coefficients[0])));
        device.bind_compute(2, Binding::View(ResourceView::write(self.weights[0])));
        device.bind_compute(3, Binding::View(ResourceView::read(self.radiance.buffer)));
        device.bind_compute(
            4,
            Binding::Values([SH_ORDER, self.radiance.face_size, self.plan.num_texels, 0]),
        );
        device.dispatch(self.plan.projection_groups, 1, 1);
    }

    fn sum(&mut self, device: &mut dyn GpuDevice) {
        let inputs = self.plan.sum_inputs.clone();
        for groups in inputs {
            let src = self.parity;
            let dst = src ^ 1;
            self.swap_roles(device, src, dst);

            device.set_kernel(self.sum);
            device.bind_compute(0, Binding::View(ResourceView::write(self.coefficients[dst])));
            device.bind_compute(1, Binding::View(ResourceView::write(self.weights[dst])));
            device.bind_compute(2, Binding::View(ResourceView::read(self.coefficients[src])));
            device.bind_compute(3, Binding::View(ResourceView::read(self.weights[src])));
            device.bind_compute(4, Binding::Values([SH_ORDER, groups, 0, 0]));
            device.dispatch(div_up(groups, SH_GROUP_SIZE), SH_ORDER * SH_ORDER, 1);

            self.parity = dst;
        }
    }

    fn normalize(&mut self, device: &mut dyn GpuDevice) {
        let src = self.parity;
        let dst = src ^ 1;
        self.swap_roles(device, src, dst);

        device.set_kernel(self.normalize);
        device.bind_compute(0, Binding::View(ResourceView::write(self.coefficients[dst])));
        device.bind_compute(1, Binding::View(ResourceView::read(self.coefficients[src])));
        device.bind_compute(2, Binding::View(ResourceView::read(self.weights[src])));
        device.bind_compute(3, Binding::Values([SH_ORDER, 0, 0, 0]));
        device.dispatch(div_up(SH_ORDER * SH_ORDER, SH_GROUP_SIZE), 1, 1);

        self.parity = dst;
    }

    fn swap_roles(&mut self, device: &mut dyn GpuDevice, src: usize, dst: usize) {
        let mut batch = BarrierBatch::new(&mut self.states);
        batch
            .require(self.coefficients[dst], ResourceState::UNORDERED_ACCESS)
            .require(self.weights[dst], ResourceState::UNORDERED_ACCESS)
            .require(self.coefficients[src], ResourceState::NON_PIXEL_SHADER_RESOURCE)
            .require(self.weights[src], ResourceState::NON_PIXEL_SHADER_RESOURCE);
        batch.flush(device);
    }

    /// Write the background constants for `frame_index`.
    pub fn update_frame(&self, device: &mut dyn GpuDevice, frame_index: usize, view: &Mat4, proj: &Mat4, eye: Vec3) {
        // Rotation only: the sky sits at infinity.
        let rotation = Mat4::from_mat3(glam::Mat3::from_mat4(*view));
        let uniforms = EnvironmentUniforms {
            view_proj_inv: (*proj * rotation).inverse().to_cols_array_2d(),
            eye_pos: eye.extend(1.0).to_array(),
        };
        device.write_constants(self.environment_constants, frame_index, bytemuck::bytes_of(&uniforms));
    }

    /// Draw the radiance cube behind everything else.
    pub fn render_environment(&self, device: &mut dyn GpuDevice, frame_index: usize) {
        device.set_kernel(self.environment);
        device.bind_graphics(
            0,
            Binding::Constants {
                buffer: self.environment_constants,
                frame_index,
            },
        );
        device.bind_graphics(1, Binding::View(ResourceView::read(self.radiance.buffer)));
        device.bind_graphics(2, Binding::Sampler(SamplerPreset::LinearClamp));
        device.draw(3, 1);
    }
}
