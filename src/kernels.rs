//! Kernel table.
//!
//! Each kernel is described once: its WGSL source, whether it is a compute or
//! a graphics kernel, and the signature of its binding slots. Backends build
//! pipeline layouts from the signature and [`RecordingDevice`] checks bindings
//! against it.
//!
//! Compute kernels use the entry point `main`; graphics kernels use `vs_main`
//! and `fs_main`. Every slot `n` maps to `@group(0) @binding(n)`.
//!
//! [`RecordingDevice`]: crate::backend::RecordingDevice

use crate::device::ElementFormat;

/// What a binding slot expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotKind {
    /// A per-frame constant slot.
    Constants,
    /// Four `u32` root constants.
    Values,
    Sampler,
    /// A sampled 3-D texture.
    Volume,
    /// A sampled cube (optionally one mip of it).
    Cube,
    /// A writable 3-D texture.
    StorageVolume(ElementFormat),
    /// A writable mip of a cube, as a six-layer array.
    StorageCubeMip(ElementFormat),
    /// A read-only structured buffer.
    Structured,
    /// A structured buffer that may be left unbound.
    OptionalStructured,
    /// A writable structured buffer.
    StructuredRw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    TriangleList,
    TriangleStrip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
}

/// Fixed-function state of a graphics kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphicsState {
    pub topology: Topology,
    pub cull: CullMode,
    /// Premultiplied-alpha blending onto the target.
    pub blend: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelKind {
    Compute,
    Graphics(GraphicsState),
}

/// A loadable kernel.
#[derive(Debug)]
pub struct KernelDesc {
    pub name: &'static str,
    pub kind: KernelKind,
    pub source: &'static str,
    pub slots: &'static [SlotKind],
}

impl KernelDesc {
    pub fn is_compute(&self) -> bool {
        matches!(self.kind, KernelKind::Compute)
    }
}

const SCREEN_TRIANGLE: GraphicsState = GraphicsState {
    topology: Topology::TriangleList,
    cull: CullMode::None,
    blend: true,
};

const LIGHT_FORMAT: ElementFormat = ElementFormat::R11G11B10Float;

// ========== Simulation ==========

pub static ADVECT: KernelDesc = KernelDesc {
    name: "advect",
    kind: KernelKind::Compute,
    source: include_str!("shaders/advect.wgsl"),
    slots: &[
        SlotKind::Constants,
        SlotKind::Volume,
        SlotKind::StorageVolume(ElementFormat::Rgba16Float),
        SlotKind::Sampler,
        SlotKind::Volume,
        SlotKind::StorageVolume(ElementFormat::Rgba16Float),
    ],
};

pub static PROJECT_3D: KernelDesc = KernelDesc {
    name: "project_3d",
    kind: KernelKind::Compute,
    source: include_str!("shaders/project_3d.wgsl"),
    slots: &[
        SlotKind::Constants,
        SlotKind::Volume,
        SlotKind::StorageVolume(ElementFormat::Rgba16Float),
        SlotKind::StorageVolume(ElementFormat::R32Float),
    ],
};

pub static PROJECT_2D: KernelDesc = KernelDesc {
    name: "project_2d",
    kind: KernelKind::Compute,
    source: include_str!("shaders/project_2d.wgsl"),
    slots: &[
        SlotKind::Constants,
        SlotKind::Volume,
        SlotKind::StorageVolume(ElementFormat::Rgba16Float),
        SlotKind::StorageVolume(ElementFormat::R32Float),
    ],
};

// ========== Rendering ==========

pub static VISUALIZE: KernelDesc = KernelDesc {
    name: "visualize",
    kind: KernelKind::Graphics(SCREEN_TRIANGLE),
    source: include_str!("shaders/visualize.wgsl"),
    slots: &[SlotKind::Volume, SlotKind::Sampler],
};

/// Screen-space ray march with inline shadow rays.
pub static RAY_CAST: KernelDesc = KernelDesc {
    name: "ray_cast",
    kind: KernelKind::Graphics(SCREEN_TRIANGLE),
    source: include_str!("shaders/ray_cast.wgsl"),
    slots: &[
        SlotKind::Constants,
        SlotKind::Constants,
        SlotKind::Volume,
        SlotKind::Sampler,
        SlotKind::Values,
        SlotKind::OptionalStructured,
    ],
};

/// Screen-space ray march reading the light map.
pub static RAY_CAST_VIEW: KernelDesc = KernelDesc {
    name: "ray_cast_view",
    kind: KernelKind::Graphics(SCREEN_TRIANGLE),
    source: include_str!("shaders/ray_cast_view.wgsl"),
    slots: &[
        SlotKind::Constants,
        SlotKind::Constants,
        SlotKind::Volume,
        SlotKind::Volume,
        SlotKind::Sampler,
        SlotKind::Values,
    ],
};

pub static RAY_MARCH_LIGHT: KernelDesc = KernelDesc {
    name: "ray_march_light",
    kind: KernelKind::Compute,
    source: include_str!("shaders/ray_march_light.wgsl"),
    slots: &[
        SlotKind::Constants,
        SlotKind::Constants,
        SlotKind::Volume,
        SlotKind::StorageVolume(LIGHT_FORMAT),
        SlotKind::Sampler,
        SlotKind::Values,
        SlotKind::OptionalStructured,
    ],
};

/// Cubemap-space ray march with inline shadow rays.
pub static RAY_MARCH: KernelDesc = KernelDesc {
    name: "ray_march",
    kind: KernelKind::Compute,
    source: include_str!("shaders/ray_march.wgsl"),
    slots: &[
        SlotKind::Constants,
        SlotKind::Constants,
        SlotKind::StorageCubeMip(ElementFormat::Rgba8Unorm),
        SlotKind::Volume,
        SlotKind::Sampler,
        SlotKind::Values,
        SlotKind::OptionalStructured,
        SlotKind::Constants,
    ],
};

/// Cubemap-space ray march reading the light map.
pub static RAY_MARCH_VIEW: KernelDesc = KernelDesc {
    name: "ray_march_view",
    kind: KernelKind::Compute,
    source: include_str!("shaders/ray_march_view.wgsl"),
    slots: &[
        SlotKind::Constants,
        SlotKind::Constants,
        SlotKind::StorageCubeMip(ElementFormat::Rgba8Unorm),
        SlotKind::Volume,
        SlotKind::Volume,
        SlotKind::Sampler,
        SlotKind::Values,
        SlotKind::Constants,
    ],
};

pub static RENDER_CUBE: KernelDesc = KernelDesc {
    name: "render_cube",
    kind: KernelKind::Graphics(GraphicsState {
        topology: Topology::TriangleStrip,
        cull: CullMode::Front,
        blend: true,
    }),
    source: include_str!("shaders/render_cube.wgsl"),
    slots: &[
        SlotKind::Constants,
        SlotKind::Constants,
        SlotKind::Cube,
        SlotKind::Sampler,
    ],
};

// ========== Light probe ==========

pub static SH_CUBE_MAP: KernelDesc = KernelDesc {
    name: "sh_cube_map",
    kind: KernelKind::Compute,
    source: include_str!("shaders/sh_cube_map.wgsl"),
    slots: &[
        SlotKind::Sampler,
        SlotKind::StructuredRw,
        SlotKind::StructuredRw,
        SlotKind::Cube,
        SlotKind::Values,
    ],
};

pub static SH_SUM: KernelDesc = KernelDesc {
    name: "sh_sum",
    kind: KernelKind::Compute,
    source: include_str!("shaders/sh_sum.wgsl"),
    slots: &[
        SlotKind::StructuredRw,
        SlotKind::StructuredRw,
        SlotKind::Structured,
        SlotKind::Structured,
        SlotKind::Values,
    ],
};

pub static SH_NORMALIZE: KernelDesc = KernelDesc {
    name: "sh_normalize",
    kind: KernelKind::Compute,
    source: include_str!("shaders/sh_normalize.wgsl"),
    slots: &[
        SlotKind::StructuredRw,
        SlotKind::Structured,
        SlotKind::Structured,
        SlotKind::Values,
    ],
};

pub static ENVIRONMENT: KernelDesc = KernelDesc {
    name: "environment",
    kind: KernelKind::Graphics(GraphicsState {
        topology: Topology::TriangleList,
        cull: CullMode::None,
        blend: false,
    }),
    source: include_str!("shaders/environment.wgsl"),
    slots: &[SlotKind::Constants, SlotKind::Cube, SlotKind::Sampler],
};

/// Every kernel, for validation and warm-up.
pub static ALL: &[&KernelDesc] = &[
    &ADVECT,
    &PROJECT_3D,
    &PROJECT_2D,
    &VISUALIZE,
    &RAY_CAST,
    &RAY_CAST_VIEW,
    &RAY_MARCH_LIGHT,
    &RAY_MARCH,
    &RAY_MARCH_VIEW,
    &RENDER_CUBE,
    &SH_CUBE_MAP,
    &SH_SUM,
    &SH_NORMALIZE,
    &ENVIRONMENT,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_unique() {
        let mut names: Vec<_> = ALL.iter().map(|k| k.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ALL.len());
    }

    #[test]
    fn test_entry_points_present() {
        for kernel in ALL {
            if kernel.is_compute() {
                assert!(kernel.source.contains("fn main("), "{} lacks main", kernel.name);
            } else {
                assert!(kernel.source.contains("fn vs_main("), "{} lacks vs_main", kernel.name);
                assert!(kernel.source.contains("fn fs_main("), "{} lacks fs_main", kernel.name);
            }
        }
    }

    #[test]
    fn test_every_slot_declared() {
        for kernel in ALL {
            for slot in 0..kernel.slots.len() {
                let decl = format!("@binding({})", slot);
                assert!(kernel.source.contains(&decl), "{} missing {}", kernel.name, decl);
            }
        }
    }

    #[test]
    fn test_graphics_kernels_have_no_storage_slots() {
        for kernel in ALL.iter().filter(|k| !k.is_compute()) {
            for slot in kernel.slots {
                assert!(!matches!(
                    slot,
                    SlotKind::StorageVolume(_) | SlotKind::StorageCubeMip(_) | SlotKind::StructuredRw
                ));
            }
        }
    }
}
