//! Grid-sized GPU resources.
//!
//! The grid owns the ping-pong velocity and dye fields, the incompressibility
//! scratch field and, for volumetric grids, the light map and the mip-chained
//! cubemap. Resources are created once and never resized.

use crate::barrier::StateTracker;
use crate::device::{
    AccessFlags, BufferDesc, BufferHandle, ElementFormat, GpuDevice, ResourceState, ResourceView,
    ViewAccess,
};
use crate::error::FluidError;

/// Dimensions of the simulation lattice. `z == 1` selects the 2-D path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridSize {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GridSize {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub fn is_volumetric(&self) -> bool {
        self.z > 1
    }

    pub fn dims(&self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }

    /// Check the invariants every grid must satisfy.
    pub fn validate(&self) -> Result<(), FluidError> {
        if self.x == 0 || self.y == 0 || self.z == 0 {
            return Err(FluidError::InvalidConfig(format!(
                "grid dimensions must be non-zero, got {}x{}x{}",
                self.x, self.y, self.z
            )));
        }
        if self.is_volumetric() && self.x != self.y {
            return Err(FluidError::InvalidConfig(format!(
                "volumetric grids require x == y, got x = {} and y = {}",
                self.x, self.y
            )));
        }
        Ok(())
    }
}

impl Default for GridSize {
    fn default() -> Self {
        Self::new(128, 128, 128)
    }
}

/// Selects one half of a ping-pong pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Parity {
    #[default]
    Even,
    Odd,
}

impl Parity {
    pub fn index(self) -> usize {
        match self {
            Parity::Even => 0,
            Parity::Odd => 1,
        }
    }

    /// The other half.
    pub fn flip(self) -> Self {
        match self {
            Parity::Even => Parity::Odd,
            Parity::Odd => Parity::Even,
        }
    }
}

/// Double-buffered fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Velocity,
    Color,
}

/// Render targets that only exist for volumetric grids.
#[derive(Clone, Copy, Debug)]
pub struct VolumeTargets {
    pub light_map: BufferHandle,
    pub cube_map: BufferHandle,
    pub cube_size: u32,
    pub mip_levels: u32,
}

impl VolumeTargets {
    pub fn light_map_view(&self, access: ViewAccess) -> ResourceView {
        ResourceView {
            buffer: self.light_map,
            access,
            mip: None,
        }
    }

    pub fn cube_mip_view(&self, mip: u32, access: ViewAccess) -> ResourceView {
        ResourceView {
            buffer: self.cube_map,
            access,
            mip: Some(mip),
        }
    }

    /// Edge length of `mip` in texels.
    pub fn mip_size(&self, mip: u32) -> u32 {
        (self.cube_size >> mip).max(1)
    }
}

/// All grid-sized resources of one simulator.
#[derive(Debug)]
pub struct GridResourceSet {
    size: GridSize,
    velocity: [BufferHandle; 2],
    color: [BufferHandle; 2],
    incompressibility: BufferHandle,
    volume: Option<VolumeTargets>,
}

impl GridResourceSet {
    /// Allocate every field for `size`. `cube_mips` is the requested mip
    /// count of the cubemap and is capped at what its size allows.
    ///
    /// Every allocation is registered in `states` in the common state.
    pub fn create(
        device: &mut dyn GpuDevice,
        states: &mut StateTracker,
        size: GridSize,
        cube_mips: u32,
    ) -> Result<Self, FluidError> {
        size.validate()?;
        let dims = size.dims();

        let mut alloc = |desc: BufferDesc<'_>| -> Result<BufferHandle, FluidError> {
            let handle = device.allocate_typed_buffer(&desc)?;
            states.register(handle, desc.subresource_count(), ResourceState::COMMON);
            Ok(handle)
        };

        let uav = AccessFlags::UNORDERED_ACCESS;
        let velocity = [
            alloc(
                BufferDesc::volume("Velocity 0", dims, ElementFormat::Rgba16Float)
                    .with_access(uav | AccessFlags::SIMULTANEOUS_ACCESS),
            )?,
            alloc(BufferDesc::volume("Velocity 1", dims, ElementFormat::Rgba16Float).with_access(uav))?,
        ];
        let color = [
            alloc(BufferDesc::volume("Color 0", dims, ElementFormat::Rgba16Float).with_access(uav))?,
            alloc(BufferDesc::volume("Color 1", dims, ElementFormat::Rgba16Float).with_access(uav))?,
        ];
        let incompressibility = alloc(
            BufferDesc::volume("Incompressibility", dims, ElementFormat::R32Float).with_access(uav),
        )?;

        let volume = if size.is_volumetric() {
            let light_map = alloc(
                BufferDesc::volume("Light Map", dims, ElementFormat::R11G11B10Float)
                    .with_access(uav | AccessFlags::SIMULTANEOUS_ACCESS),
            )?;
            let mip_levels = cube_mips.clamp(1, max_mips(size.x));
            let cube_map = alloc(
                BufferDesc::cube("Cube Map", size.x, ElementFormat::Rgba8Unorm, mip_levels)
                    .with_access(uav),
            )?;
            Some(VolumeTargets {
                light_map,
                cube_map,
                cube_size: size.x,
                mip_levels,
            })
        } else {
            None
        };

        log::info!(
            "allocated grid {}x{}x{} ({})",
            size.x,
            size.y,
            size.z,
            if volume.is_some() { "volumetric" } else { "2-D" }
        );

        Ok(Self {
            size,
            velocity,
            color,
            incompressibility,
            volume,
        })
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    /// Buffer backing `field` at `parity`.
    pub fn handle(&self, field: Field, parity: Parity) -> BufferHandle {
        match field {
            Field::Velocity => self.velocity[parity.index()],
            Field::Color => self.color[parity.index()],
        }
    }

    /// Binding view of `field` at `parity`. No transition is implied.
    pub fn view_for(&self, field: Field, parity: Parity, access: ViewAccess) -> ResourceView {
        ResourceView {
            buffer: self.handle(field, parity),
            access,
            mip: None,
        }
    }

    pub fn incompressibility(&self) -> BufferHandle {
        self.incompressibility
    }

    pub fn volume(&self) -> Option<&VolumeTargets> {
        self.volume.as_ref()
    }
}

/// Longest mip chain a square face of `size` texels supports.
fn max_mips(size: u32) -> u32 {
    32 - size.max(1).leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingDevice;

    #[test]
    fn test_validate_rejects_non_square_volume() {
        assert!(GridSize::new(64, 32, 16).validate().is_err());
        assert!(GridSize::new(0, 8, 1).validate().is_err());
        // 2-D grids may be rectangular.
        assert!(GridSize::new(64, 32, 1).validate().is_ok());
        assert!(GridSize::new(64, 64, 64).validate().is_ok());
    }

    #[test]
    fn test_parity_flip() {
        assert_eq!(Parity::Even.flip(), Parity::Odd);
        assert_eq!(Parity::Odd.flip().index(), 0);
    }

    #[test]
    fn test_create_2d_has_no_volume_targets() {
        let mut device = RecordingDevice::new();
        let mut states = StateTracker::new();
        let grid = GridResourceSet::create(&mut device, &mut states, GridSize::new(64, 64, 1), 5)
            .unwrap();

        assert!(grid.volume().is_none());
        assert_eq!(device.allocations().len(), 5);
    }

    #[test]
    fn test_create_volume_allocations() {
        let mut device = RecordingDevice::new();
        let mut states = StateTracker::new();
        let grid =
            GridResourceSet::create(&mut device, &mut states, GridSize::new(32, 32, 32), 5).unwrap();

        let volume = grid.volume().unwrap();
        assert_eq!(volume.mip_levels, 5);
        assert_eq!(volume.mip_size(4), 2);
        assert_eq!(device.allocations().len(), 7);
        assert!(states.is_tracked(volume.cube_map));
    }

    #[test]
    fn test_cube_mips_capped_by_size() {
        let mut device = RecordingDevice::new();
        let mut states = StateTracker::new();
        let grid =
            GridResourceSet::create(&mut device, &mut states, GridSize::new(4, 4, 4), 5).unwrap();
        assert_eq!(grid.volume().unwrap().mip_levels, 3);
    }

    #[test]
    fn test_views_select_parity() {
        let mut device = RecordingDevice::new();
        let mut states = StateTracker::new();
        let grid =
            GridResourceSet::create(&mut device, &mut states, GridSize::new(16, 16, 1), 1).unwrap();

        let read = grid.view_for(Field::Color, Parity::Odd, ViewAccess::Read);
        let write = grid.view_for(Field::Color, Parity::Even, ViewAccess::Write);
        assert_ne!(read.buffer, write.buffer);
        assert_eq!(read.buffer, grid.handle(Field::Color, Parity::Odd));
    }

    #[test]
    fn test_allocation_failure_propagates() {
        let mut device = RecordingDevice::new().fail_allocation_at(2);
        let mut states = StateTracker::new();
        let result = GridResourceSet::create(&mut device, &mut states, GridSize::new(8, 8, 8), 1);
        assert!(matches!(result, Err(FluidError::Allocation { .. })));
    }
}
