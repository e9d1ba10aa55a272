//! Constant-buffer layouts shared with the WGSL kernels.
//!
//! Matrices are column-major `mat4x4<f32>`; every struct is a multiple of 16
//! bytes so it can sit in a uniform binding unchanged.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Per-frame simulation constants.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq)]
pub struct SimulationUniforms {
    pub time_step: f32,
    pub base_seed: u32,
    pub _padding: [u32; 2],
}

/// Per-frame lighting constants.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PerFrameUniforms {
    pub eye_pos: [f32; 4],
    pub light_map_world: [[f32; 4]; 4],
    pub light_pos: [f32; 4],
    pub light_color: [f32; 4],
    pub ambient: [f32; 4],
}

impl PerFrameUniforms {
    pub fn new(eye: Vec3, light_map_world: Mat4, light_pos: Vec3, light_color: Vec4, ambient: Vec4) -> Self {
        Self {
            eye_pos: eye.extend(1.0).to_array(),
            light_map_world: light_map_world.to_cols_array_2d(),
            light_pos: light_pos.extend(1.0).to_array(),
            light_color: light_color.to_array(),
            ambient: ambient.to_array(),
        }
    }
}

/// Per-object transforms of the simulation volume.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PerObjectUniforms {
    pub world_view_proj_inv: [[f32; 4]; 4],
    pub world_view_proj: [[f32; 4]; 4],
    pub world_inv: [[f32; 4]; 4],
    pub world: [[f32; 4]; 4],
    /// Volume local space to light-map local space.
    pub local_to_light: [[f32; 4]; 4],
}

impl PerObjectUniforms {
    pub fn new(world: Mat4, view_proj: Mat4, light_map_world: Mat4) -> Self {
        let world_view_proj = view_proj * world;
        Self {
            world_view_proj_inv: world_view_proj.inverse().to_cols_array_2d(),
            world_view_proj: world_view_proj.to_cols_array_2d(),
            world_inv: world.inverse().to_cols_array_2d(),
            world: world.to_cols_array_2d(),
            local_to_light: (light_map_world.inverse() * world).to_cols_array_2d(),
        }
    }
}

/// Visible cube faces, one per `x` component.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq)]
pub struct FaceListUniforms {
    pub faces: [[u32; 4]; 6],
}

impl FaceListUniforms {
    pub fn from_faces(faces: &[u8]) -> Self {
        let mut list = Self::default();
        for (slot, face) in list.faces.iter_mut().zip(faces) {
            slot[0] = *face as u32;
        }
        list
    }
}

/// Constants for the environment background pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct EnvironmentUniforms {
    pub view_proj_inv: [[f32; 4]; 4],
    pub eye_pos: [f32; 4],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_are_uniform_friendly() {
        assert_eq!(std::mem::size_of::<SimulationUniforms>(), 16);
        assert_eq!(std::mem::size_of::<PerFrameUniforms>(), 128);
        assert_eq!(std::mem::size_of::<PerObjectUniforms>(), 320);
        assert_eq!(std::mem::size_of::<FaceListUniforms>(), 96);
        assert_eq!(std::mem::size_of::<EnvironmentUniforms>(), 80);
    }

    #[test]
    fn test_face_list_packing() {
        let list = FaceListUniforms::from_faces(&[0, 2, 5]);
        assert_eq!(list.faces[0][0], 0);
        assert_eq!(list.faces[1][0], 2);
        assert_eq!(list.faces[2][0], 5);
        assert_eq!(list.faces[3][0], 0);
    }

    #[test]
    fn test_per_object_inverse_round_trips() {
        let world = Mat4::from_scale(Vec3::splat(10.0));
        let view_proj = Mat4::perspective_rh(0.8, 1.5, 1.0, 1000.0)
            * Mat4::look_at_rh(Vec3::new(4.0, 16.0, -40.0), Vec3::ZERO, Vec3::Y);
        let uniforms = PerObjectUniforms::new(world, view_proj, world);

        let wvp = Mat4::from_cols_array_2d(&uniforms.world_view_proj);
        let inv = Mat4::from_cols_array_2d(&uniforms.world_view_proj_inv);
        assert!((wvp * inv).abs_diff_eq(Mat4::IDENTITY, 1e-3));

        let local_to_light = Mat4::from_cols_array_2d(&uniforms.local_to_light);
        assert!(local_to_light.abs_diff_eq(Mat4::IDENTITY, 1e-5));
    }
}
