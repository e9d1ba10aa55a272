//! Ray-sample budget and cubemap LOD selection, plus cube-face culling.
//!
//! Everything here is CPU-side arithmetic on the camera matrices; nothing is
//! recorded on the device.

use glam::{Mat4, Vec2, Vec3, Vec4};

/// Tuning of the sample/LOD heuristic.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LodConfig {
    /// Screen pixels covered by one cubemap texel at mip 0.
    pub upscale: f32,
    /// Ray samples per projected cube texel.
    pub sample_count_scale: f32,
    /// Requested cubemap mip count.
    pub num_mips: u32,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            upscale: 2.0,
            sample_count_scale: 2.0,
            num_mips: 5,
        }
    }
}

/// Result of one estimate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct LodEstimate {
    pub ray_samples: u32,
    pub mip_level: u32,
}

// Corners of the unit cube, paired with the edge list below.
const CORNERS: [Vec3; 8] = [
    Vec3::new(1.0, 1.0, 1.0),
    Vec3::new(-1.0, 1.0, 1.0),
    Vec3::new(1.0, -1.0, 1.0),
    Vec3::new(-1.0, -1.0, 1.0),
    Vec3::new(-1.0, 1.0, -1.0),
    Vec3::new(1.0, 1.0, -1.0),
    Vec3::new(-1.0, -1.0, -1.0),
    Vec3::new(1.0, -1.0, -1.0),
];

const EDGES: [(usize, usize); 12] = [
    (0, 1),
    (3, 2),
    (1, 3),
    (2, 0),
    (4, 5),
    (7, 6),
    (5, 7),
    (6, 4),
    (1, 4),
    (6, 3),
    (5, 0),
    (2, 7),
];

/// Longest projected edge of the unit cube, in pixels.
pub fn cube_edge_pixel_size(world_view_proj: &Mat4, viewport: Vec2) -> f32 {
    let projected = CORNERS.map(|corner| {
        let p = world_view_proj.project_point3(corner);
        Vec2::new(p.x * 0.5 + 0.5, -p.y * 0.5 + 0.5) * viewport
    });

    EDGES
        .iter()
        .map(|&(a, b)| projected[a].distance(projected[b]))
        .fold(0.0, f32::max)
}

/// Map a projected cube edge to a sample budget and mip level.
pub fn estimate_from_edge(
    edge_pixels: f32,
    cube_size: u32,
    mip_levels: u32,
    max_ray_samples: u32,
    config: &LodConfig,
) -> LodEstimate {
    let sqrt3 = 3f32.sqrt();
    let texels = edge_pixels / config.upscale;
    let ideal = config.sample_count_scale * texels / sqrt3;

    let ray_samples = (ideal.ceil() as u32).min(max_ray_samples);
    let clamped = ideal.min(ray_samples as f32);
    let effective = clamped / config.sample_count_scale * sqrt3;

    // Saturating casts: an empty footprint selects the coarsest mip.
    let level = (cube_size as f32 / effective).log2().max(0.0) as u32;
    LodEstimate {
        ray_samples,
        mip_level: level.min(mip_levels.saturating_sub(1)),
    }
}

/// Estimate ray samples and cubemap mip for the current camera.
pub fn estimate(
    world_view_proj: &Mat4,
    viewport: Vec2,
    cube_size: u32,
    mip_levels: u32,
    max_ray_samples: u32,
    config: &LodConfig,
) -> LodEstimate {
    let edge = cube_edge_pixel_size(world_view_proj, viewport);
    estimate_from_edge(edge, cube_size, mip_levels, max_ray_samples, config)
}

/// Eye position in the volume's local (unit cube) space.
pub fn local_eye(world_inv: &Mat4, eye: Vec3) -> Vec3 {
    let p = *world_inv * Vec4::new(eye.x, eye.y, eye.z, 1.0);
    p.truncate() / p.w
}

/// Whether `face` (+X, -X, +Y, -Y, +Z, -Z) can contribute for an eye at
/// `local_eye`. A face is hidden only when the eye lies beyond the plane of
/// the opposite face.
pub fn face_visible(face: u8, local_eye: Vec3) -> bool {
    let component = local_eye[(face >> 1) as usize];
    if face & 1 == 0 {
        component > -1.0
    } else {
        component < 1.0
    }
}

/// Six-bit mask of visible faces.
pub fn visibility_mask(local_eye: Vec3) -> u8 {
    (0..6u8)
        .filter(|&face| face_visible(face, local_eye))
        .fold(0, |mask, face| mask | (1 << face))
}

/// How the cubemap pass learns which faces to march.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaceVisibility {
    /// All six faces are dispatched; the kernel culls.
    Gpu,
    /// Only the faces whose bit is set are dispatched, in face order.
    Mask(u8),
    /// Compacted list of visible faces.
    List { faces: [u8; 6], count: u8 },
}

impl FaceVisibility {
    /// Thread-group count along z for the cubemap passes.
    pub fn dispatch_faces(&self) -> u32 {
        match *self {
            FaceVisibility::Gpu => 6,
            FaceVisibility::Mask(mask) => mask.count_ones(),
            FaceVisibility::List { count, .. } => count as u32,
        }
    }

    /// Policy selector seen by the kernel: 0 GPU, 1 mask, 2 list.
    pub fn mode(&self) -> u32 {
        match self {
            FaceVisibility::Gpu => 0,
            FaceVisibility::Mask(_) => 1,
            FaceVisibility::List { .. } => 2,
        }
    }

    pub fn mask(&self) -> u8 {
        match *self {
            FaceVisibility::Gpu => 0x3f,
            FaceVisibility::Mask(mask) => mask,
            FaceVisibility::List { faces, count } => faces[..count as usize]
                .iter()
                .fold(0, |mask, face| mask | (1 << face)),
        }
    }

    /// Visible faces in dispatch order.
    pub fn faces(&self) -> Vec<u8> {
        match *self {
            FaceVisibility::List { faces, count } => faces[..count as usize].to_vec(),
            _ => (0..6).filter(|face| self.mask() & (1 << face) != 0).collect(),
        }
    }
}

/// Runtime-selectable cube-face culling policy.
pub trait FaceCulling: Send + Sync {
    fn name(&self) -> &'static str;
    fn cull(&self, local_eye: Vec3) -> FaceVisibility;
}

/// Leave culling to the kernel.
#[derive(Clone, Copy, Debug, Default)]
pub struct GpuCulling;

impl FaceCulling for GpuCulling {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn cull(&self, _local_eye: Vec3) -> FaceVisibility {
        FaceVisibility::Gpu
    }
}

/// Cull on the CPU and pass a bit mask.
#[derive(Clone, Copy, Debug, Default)]
pub struct VisibilityMask;

impl FaceCulling for VisibilityMask {
    fn name(&self) -> &'static str {
        "mask"
    }

    fn cull(&self, local_eye: Vec3) -> FaceVisibility {
        FaceVisibility::Mask(visibility_mask(local_eye))
    }
}

/// Cull on the CPU and pass a compacted face list.
#[derive(Clone, Copy, Debug, Default)]
pub struct FaceList;

impl FaceCulling for FaceList {
    fn name(&self) -> &'static str {
        "list"
    }

    fn cull(&self, local_eye: Vec3) -> FaceVisibility {
        let mut faces = [0u8; 6];
        let mut count = 0u8;
        for face in (0..6u8).filter(|&face| face_visible(face, local_eye)) {
            faces[count as usize] = face;
            count += 1;
        }
        FaceVisibility::List { faces, count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEWPORT: Vec2 = Vec2::new(1280.0, 720.0);

    fn wvp(distance: f32) -> Mat4 {
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_4, VIEWPORT.x / VIEWPORT.y, 1.0, 1000.0);
        let eye = Vec3::new(0.3, 0.4, -1.0).normalize() * distance;
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        proj * view * Mat4::from_scale(Vec3::splat(10.0))
    }

    // ========== Estimate Tests ==========

    #[test]
    fn test_edge_size_shrinks_with_distance() {
        let near = cube_edge_pixel_size(&wvp(40.0), VIEWPORT);
        let far = cube_edge_pixel_size(&wvp(80.0), VIEWPORT);
        assert!(near > far);
        assert!(far > 0.0);
    }

    #[test]
    fn test_monotonic_in_distance() {
        let config = LodConfig::default();
        let mut last = LodEstimate {
            ray_samples: u32::MAX,
            mip_level: 0,
        };
        for step in 0..60 {
            let distance = 30.0 + step as f32 * 10.0;
            let lod = estimate(&wvp(distance), VIEWPORT, 128, 5, 256, &config);
            assert!(lod.mip_level >= last.mip_level, "mip decreased at {}", distance);
            assert!(lod.ray_samples <= last.ray_samples, "samples grew at {}", distance);
            last = lod;
        }
        assert!(last.mip_level > 0);
    }

    #[test]
    fn test_bounds_hold_for_any_edge() {
        let config = LodConfig::default();
        for edge in [0.0, 0.5, 1.0, 10.0, 100.0, 1e4, 1e9, f32::INFINITY] {
            let lod = estimate_from_edge(edge, 128, 5, 256, &config);
            assert!(lod.mip_level <= 4);
            assert!(lod.ray_samples <= 256);
        }
    }

    #[test]
    fn test_close_camera_saturates_budget() {
        let config = LodConfig::default();
        let lod = estimate(&wvp(22.0), VIEWPORT, 64, 5, 64, &config);
        assert_eq!(lod.ray_samples, 64);
        assert_eq!(lod.mip_level, 0);
    }

    #[test]
    fn test_known_values() {
        let config = LodConfig::default();
        // 2 * (400 / 2) / sqrt(3) = 230.9 -> 231 samples, full size footprint.
        let lod = estimate_from_edge(400.0, 128, 5, 256, &config);
        assert_eq!(lod.ray_samples, 231);
        assert_eq!(lod.mip_level, 0);

        // Just under a quarter-size footprint lands two mips down.
        let lod = estimate_from_edge(60.0, 128, 5, 256, &config);
        assert_eq!(lod.mip_level, 2);
    }

    // ========== Culling Tests ==========

    #[test]
    fn test_inside_sees_all_faces() {
        for eye in [Vec3::ZERO, Vec3::new(0.9, -0.9, 0.5), Vec3::new(-0.99, 0.0, 0.99)] {
            assert_eq!(visibility_mask(eye), 0x3f);
            assert_eq!(VisibilityMask.cull(eye).dispatch_faces(), 6);
        }
    }

    #[test]
    fn test_far_positive_x_hides_negative_x() {
        let eye = Vec3::new(100.0, 0.0, 0.0);
        assert!(face_visible(0, eye));
        assert!(!face_visible(1, eye));
        assert_eq!(visibility_mask(eye) & 0b10, 0);
    }

    #[test]
    fn test_outside_lists_at_most_five() {
        let eyes = [
            Vec3::new(100.0, 0.0, 0.0),
            Vec3::new(0.0, -5.0, 0.0),
            Vec3::new(3.0, 3.0, 3.0),
            Vec3::new(-2.0, 0.5, 8.0),
        ];
        for eye in eyes {
            let visibility = FaceList.cull(eye);
            assert!(visibility.dispatch_faces() <= 5);
            assert_eq!(visibility.mask(), visibility_mask(eye));
        }
        assert_eq!(FaceList.cull(Vec3::new(3.0, 3.0, 3.0)).faces(), vec![0, 2, 4]);
    }

    #[test]
    fn test_gpu_policy_dispatches_six() {
        let visibility = GpuCulling.cull(Vec3::new(100.0, 0.0, 0.0));
        assert_eq!(visibility.dispatch_faces(), 6);
        assert_eq!(visibility.mode(), 0);
        assert_eq!(visibility.mask(), 0x3f);
    }

    #[test]
    fn test_local_eye_undoes_world() {
        let world = Mat4::from_scale(Vec3::splat(10.0));
        let eye = local_eye(&world.inverse(), Vec3::new(20.0, 0.0, -5.0));
        assert!(eye.abs_diff_eq(Vec3::new(2.0, 0.0, -0.5), 1e-5));
    }
}
