//! The fluid simulator: grid resources, solver and renderer behind one type.
//!
//! [`Fluid`] owns the state that survives between frames (the grid, the frame
//! parity and the last LOD estimate) and writes the per-frame constant slots.
//! It does not pace frames; that is [`FrameOrchestrator`](crate::FrameOrchestrator)'s job.

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::barrier::StateTracker;
use crate::config::{FluidConfig, Lighting};
use crate::device::{BufferDesc, BufferHandle, GpuDevice};
use crate::error::FluidError;
use crate::grid::{GridResourceSet, Parity};
use crate::light_probe::ShCoefficients;
use crate::lod::{self, FaceCulling, FaceVisibility, LodConfig, LodEstimate};
use crate::render::{RenderInputs, RenderMode, RenderStage, RenderStrategy, SampleBudget, VolumeConstants};
use crate::simulation::SimulationStage;
use crate::uniforms::{FaceListUniforms, PerFrameUniforms, PerObjectUniforms, SimulationUniforms};

pub struct Fluid {
    grid: GridResourceSet,
    states: StateTracker,
    simulation: SimulationStage,
    renderer: RenderStage,
    volume_constants: Option<VolumeConstants>,

    parity: Parity,
    flipped: bool,
    time_step: f32,
    base_seed: u32,
    rng: StdRng,

    lod_config: LodConfig,
    lod: LodEstimate,
    culling: Box<dyn FaceCulling>,
    visibility: FaceVisibility,
    budget: SampleBudget,
    viewport: Vec2,

    lighting: Lighting,
    world: Mat4,
    light_map_world: Mat4,
    sh: Option<Arc<ShCoefficients>>,
    last_strategy: Option<RenderStrategy>,
}

impl Fluid {
    /// Allocate the grid, load every kernel the grid can use and prepare the
    /// constant slots. Any failure aborts construction.
    pub fn new(device: &mut dyn GpuDevice, config: &FluidConfig) -> Result<Self, FluidError> {
        config.validate()?;

        let mut states = StateTracker::new();
        let grid = GridResourceSet::create(device, &mut states, config.grid, config.lod.num_mips)?;

        let simulation_constants: BufferHandle = device.allocate_typed_buffer(
            &BufferDesc::constants::<SimulationUniforms>("Simulation Constants"),
        )?;
        let volume_constants = if config.grid.is_volumetric() {
            Some(VolumeConstants {
                per_frame: device
                    .allocate_typed_buffer(&BufferDesc::constants::<PerFrameUniforms>("Per-Frame Constants"))?,
                per_object: device
                    .allocate_typed_buffer(&BufferDesc::constants::<PerObjectUniforms>("Per-Object Constants"))?,
                face_list: device
                    .allocate_typed_buffer(&BufferDesc::constants::<FaceListUniforms>("Face List"))?,
            })
        } else {
            None
        };

        let simulation = SimulationStage::new(device, &grid, &mut states, simulation_constants)?;
        let renderer = RenderStage::new(device, &grid, volume_constants)?;

        // The light map covers the simulation volume exactly.
        let world = Mat4::from_scale(Vec3::splat(config.volume_scale));
        log::info!(
            "fluid ready: {:?}, render mode {}, culling {:?}",
            config.grid,
            config.render_mode,
            config.culling
        );

        Ok(Self {
            grid,
            states,
            simulation,
            renderer,
            volume_constants,
            parity: Parity::default(),
            flipped: false,
            time_step: 0.0,
            base_seed: 0,
            rng: StdRng::seed_from_u64(config.seed),
            lod_config: config.lod,
            lod: LodEstimate {
                ray_samples: config.budget.max_ray_samples,
                mip_level: 0,
            },
            culling: config.culling.strategy(),
            visibility: FaceVisibility::Gpu,
            budget: config.budget,
            viewport: Vec2::new(config.viewport.0 as f32, config.viewport.1 as f32),
            lighting: config.lighting,
            world,
            light_map_world: world,
            sh: None,
            last_strategy: None,
        })
    }

    pub fn set_max_samples(&mut self, max_ray_samples: u32, max_light_samples: u32) {
        self.budget = SampleBudget {
            max_ray_samples,
            max_light_samples,
        };
    }

    /// Ambient lighting input; `None` falls back to the flat ambient term.
    pub fn set_sh(&mut self, sh: Option<Arc<ShCoefficients>>) {
        self.sh = sh;
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = Vec2::new(width.max(1) as f32, height.max(1) as f32);
    }

    pub fn set_face_culling(&mut self, culling: Box<dyn FaceCulling>) {
        log::debug!("face culling: {}", culling.name());
        self.culling = culling;
    }

    /// Per-frame CPU work: store the step, flip parity unless paused, pick a
    /// new seed and write this frame's constant slots.
    pub fn update_frame(
        &mut self,
        device: &mut dyn GpuDevice,
        frame_index: usize,
        time_step: f32,
        view: &Mat4,
        proj: &Mat4,
        eye: Vec3,
    ) {
        self.time_step = time_step;
        self.flipped = time_step > 0.0;
        if self.flipped {
            self.parity = self.parity.flip();
        }
        self.base_seed = self.rng.gen();

        let (Some(constants), Some(targets)) = (self.volume_constants, self.grid.volume()) else {
            return;
        };

        let view_proj = *proj * *view;
        let per_frame = PerFrameUniforms::new(
            eye,
            self.light_map_world,
            self.lighting.position,
            self.lighting.color,
            self.lighting.ambient,
        );
        let per_object = PerObjectUniforms::new(self.world, view_proj, self.light_map_world);
        device.write_constants(constants.per_frame, frame_index, bytemuck::bytes_of(&per_frame));
        device.write_constants(constants.per_object, frame_index, bytemuck::bytes_of(&per_object));

        let lod = lod::estimate(
            &(view_proj * self.world),
            self.viewport,
            targets.cube_size,
            targets.mip_levels,
            self.budget.max_ray_samples,
            &self.lod_config,
        );
        if lod != self.lod {
            log::debug!("lod: mip {} with {} ray samples", lod.mip_level, lod.ray_samples);
            self.lod = lod;
        }

        let local = lod::local_eye(&self.world.inverse(), eye);
        self.visibility = self.culling.cull(local);
        let faces = FaceListUniforms::from_faces(&self.visibility.faces());
        device.write_constants(constants.face_list, frame_index, bytemuck::bytes_of(&faces));
    }

    /// Undo the parity flip of the last update when its frame is dropped
    /// before anything was recorded.
    pub fn discard_frame(&mut self) {
        if self.flipped {
            self.parity = self.parity.flip();
            self.flipped = false;
        }
    }

    /// Run advection and projection with the step from the last update.
    /// Returns the step the solver actually applied.
    pub fn simulate(&mut self, device: &mut dyn GpuDevice, frame_index: usize) -> f32 {
        self.simulation.simulate(
            device,
            &self.grid,
            &mut self.states,
            frame_index,
            self.parity,
            self.time_step,
            self.base_seed,
        )
    }

    /// Record this frame's visualization passes.
    pub fn render(&mut self, device: &mut dyn GpuDevice, frame_index: usize, mode: RenderMode) -> RenderStrategy {
        let inputs = RenderInputs {
            frame_index,
            parity: self.parity,
            lod: self.lod,
            visibility: self.visibility,
            budget: self.budget,
            sh: self.sh.as_deref(),
        };
        let strategy = self
            .renderer
            .render(device, &self.grid, &mut self.states, &inputs, mode);
        if self.last_strategy != Some(strategy) {
            log::debug!("render strategy: {:?}", strategy);
            self.last_strategy = Some(strategy);
        }
        strategy
    }

    pub fn grid(&self) -> &GridResourceSet {
        &self.grid
    }

    pub fn states(&self) -> &StateTracker {
        &self.states
    }

    pub fn parity(&self) -> Parity {
        self.parity
    }

    pub fn lod(&self) -> LodEstimate {
        self.lod
    }

    pub fn visibility(&self) -> FaceVisibility {
        self.visibility
    }

    pub fn budget(&self) -> SampleBudget {
        self.budget
    }

    pub fn sh(&self) -> Option<&Arc<ShCoefficients>> {
        self.sh.as_ref()
    }

    /// Local-to-world transform of the unit cube.
    pub fn world(&self) -> Mat4 {
        self.world
    }
}
