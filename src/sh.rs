//! Spherical-harmonic helpers shared by the light probe.
//!
//! The GPU kernels in `shaders/sh_*.wgsl` implement the same projection,
//! tree reduction and normalisation as the CPU functions here. The CPU side
//! is used to plan the reduction passes, to generate the procedural sky and
//! as a reference in tests.

use glam::{Vec2, Vec3};

/// Threads per group in every SH kernel, and the reduction fan-in.
pub const SH_GROUP_SIZE: u32 = 32;
/// Lighting uses order 3 (bands 0..=2).
pub const SH_ORDER: u32 = 3;
/// Coefficients per order-3 set.
pub const SH_COEFFICIENTS: usize = (SH_ORDER * SH_ORDER) as usize;

/// Real SH basis up to band 2, evaluated for a unit direction.
pub fn basis(dir: Vec3) -> [f32; SH_COEFFICIENTS] {
    let Vec3 { x, y, z } = dir;
    [
        0.282_095,
        0.488_603 * y,
        0.488_603 * z,
        0.488_603 * x,
        1.092_548 * x * y,
        1.092_548 * y * z,
        0.315_392 * (3.0 * z * z - 1.0),
        1.092_548 * x * z,
        0.546_274 * (x * x - y * y),
    ]
}

/// Direction through `uv` (each in [-1, 1]) on cube face `face`
/// (+X, -X, +Y, -Y, +Z, -Z), not normalised.
pub fn face_direction(face: u32, uv: Vec2) -> Vec3 {
    let Vec2 { x: u, y: v } = uv;
    match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        _ => Vec3::new(-u, -v, -1.0),
    }
}

/// Centre of texel (`x`, `y`) in face coordinates.
pub fn texel_uv(x: u32, y: u32, face_size: u32) -> Vec2 {
    let size = face_size as f32;
    Vec2::new(
        (x as f32 + 0.5) / size * 2.0 - 1.0,
        (y as f32 + 0.5) / size * 2.0 - 1.0,
    )
}

/// Approximate solid angle of the texel centred at `uv`.
pub fn texel_solid_angle(uv: Vec2, face_size: u32) -> f32 {
    let size = face_size as f32;
    let d = 1.0 + uv.length_squared();
    4.0 / (size * size * d * d.sqrt())
}

/// Sequence of dispatches that reduces `num_texels` samples to one group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReductionPlan {
    pub num_texels: u32,
    /// Groups dispatched by the projection pass.
    pub projection_groups: u32,
    /// Input group count of each sum pass, in order.
    pub sum_inputs: Vec<u32>,
}

impl ReductionPlan {
    pub fn new(num_texels: u32) -> Self {
        let projection_groups = num_texels.max(1).div_ceil(SH_GROUP_SIZE);
        let mut sum_inputs = Vec::new();
        let mut groups = projection_groups;
        while groups > 1 {
            sum_inputs.push(groups);
            groups = groups.div_ceil(SH_GROUP_SIZE);
        }
        Self {
            num_texels,
            projection_groups,
            sum_inputs,
        }
    }

    /// Groups left after the last sum pass.
    pub fn remaining_groups(&self) -> u32 {
        self.sum_inputs
            .last()
            .map_or(self.projection_groups, |n| n.div_ceil(SH_GROUP_SIZE))
    }

    /// Projection plus sum passes.
    pub fn passes(&self) -> usize {
        1 + self.sum_inputs.len()
    }

    /// Group count of the second buffer pair: the output of the first sum.
    pub fn sum_groups(&self) -> u32 {
        self.projection_groups.div_ceil(SH_GROUP_SIZE).max(1)
    }
}

/// Per-group partial sums.
#[derive(Clone, Debug, PartialEq)]
pub struct Partials {
    pub coefficients: Vec<[Vec3; SH_COEFFICIENTS]>,
    pub weights: Vec<f32>,
}

impl Partials {
    pub fn groups(&self) -> usize {
        self.weights.len()
    }
}

/// Project a cube of radiance onto the basis, one partial per group of
/// [`SH_GROUP_SIZE`] texels. Texels are unrolled face by face, row by row.
pub fn project(face_size: u32, radiance: impl Fn(Vec3) -> Vec3) -> Partials {
    let texels_per_face = face_size * face_size;
    let num_texels = texels_per_face * 6;
    let groups = num_texels.div_ceil(SH_GROUP_SIZE) as usize;

    let mut partials = Partials {
        coefficients: vec![[Vec3::ZERO; SH_COEFFICIENTS]; groups],
        weights: vec![0.0; groups],
    };

    for texel in 0..num_texels {
        let face = texel / texels_per_face;
        let within = texel % texels_per_face;
        let uv = texel_uv(within % face_size, within / face_size, face_size);
        let dir = face_direction(face, uv).normalize();
        let weight = texel_solid_angle(uv, face_size);
        let color = radiance(dir);

        let group = (texel / SH_GROUP_SIZE) as usize;
        for (c, y) in partials.coefficients[group].iter_mut().zip(basis(dir)) {
            *c += color * y * weight;
        }
        partials.weights[group] += weight;
    }
    partials
}

/// One tree-reduction pass: every [`SH_GROUP_SIZE`] partials become one.
pub fn sum(input: &Partials) -> Partials {
    let groups = input.groups().div_ceil(SH_GROUP_SIZE as usize);
    let mut output = Partials {
        coefficients: vec![[Vec3::ZERO; SH_COEFFICIENTS]; groups],
        weights: vec![0.0; groups],
    };
    for (i, (coefficients, weight)) in input.coefficients.iter().zip(&input.weights).enumerate() {
        let group = i / SH_GROUP_SIZE as usize;
        for (dst, src) in output.coefficients[group].iter_mut().zip(coefficients) {
            *dst += *src;
        }
        output.weights[group] += weight;
    }
    output
}

/// Sum until one group remains.
pub fn reduce(mut partials: Partials) -> Partials {
    while partials.groups() > 1 {
        partials = sum(&partials);
    }
    partials
}

/// Scale summed coefficients so the weights integrate to the full sphere.
pub fn normalize(coefficients: &[Vec3; SH_COEFFICIENTS], weight: f32) -> [Vec3; SH_COEFFICIENTS] {
    let scale = 4.0 * std::f32::consts::PI / weight;
    coefficients.map(|c| c * scale)
}

/// Radiance of the built-in sky: a warm horizon fading to a blue zenith
/// above a dark ground.
pub fn sky_radiance(dir: Vec3) -> Vec3 {
    let horizon = Vec3::new(0.9, 0.8, 0.7);
    let zenith = Vec3::new(0.25, 0.45, 0.9);
    let ground = Vec3::new(0.15, 0.12, 0.1);
    if dir.y >= 0.0 {
        horizon.lerp(zenith, dir.y.sqrt())
    } else {
        horizon.lerp(ground, (-dir.y).sqrt())
    }
}

/// RGBA8 texels of the built-in sky, face by face.
pub fn procedural_sky(face_size: u32) -> Vec<u8> {
    let mut texels = Vec::with_capacity((face_size * face_size * 6 * 4) as usize);
    for face in 0..6 {
        for y in 0..face_size {
            for x in 0..face_size {
                let dir = face_direction(face, texel_uv(x, y, face_size)).normalize();
                let c = sky_radiance(dir).clamp(Vec3::ZERO, Vec3::ONE) * 255.0;
                texels.extend_from_slice(&[c.x as u8, c.y as u8, c.z as u8, 255]);
            }
        }
    }
    texels
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Smallest k with GROUP^k >= n.
    fn ceil_log_group(n: u32) -> usize {
        let mut k = 0;
        let mut reach = 1u64;
        while reach < n as u64 {
            reach *= SH_GROUP_SIZE as u64;
            k += 1;
        }
        k
    }

    // ========== Reduction Plan Tests ==========

    #[test]
    fn test_plan_converges_to_one_group() {
        let counts = [2, 6, 31, 32, 33, 1024, 1025, 1536, 6 * 64 * 64, 32 * 32 * 32, 6 * 512 * 512];
        for n in counts {
            let plan = ReductionPlan::new(n);
            assert_eq!(plan.remaining_groups(), 1, "n = {}", n);
            assert_eq!(plan.passes(), ceil_log_group(n), "n = {}", n);
        }
    }

    #[test]
    fn test_plan_sum_inputs_shrink() {
        let plan = ReductionPlan::new(6 * 128 * 128);
        assert_eq!(plan.projection_groups, 3072);
        assert_eq!(plan.sum_inputs, vec![3072, 96, 3]);
        assert_eq!(plan.sum_groups(), 96);
    }

    #[test]
    fn test_small_cube_needs_no_sum() {
        let plan = ReductionPlan::new(6);
        assert!(plan.sum_inputs.is_empty());
        assert_eq!(plan.sum_groups(), 1);
    }

    // ========== Projection Tests ==========

    #[test]
    fn test_solid_angles_cover_sphere() {
        let size = 32;
        let partials = reduce(project(size, |_| Vec3::ONE));
        let total = partials.weights[0];
        assert!((total - 4.0 * std::f32::consts::PI).abs() < 0.05, "total = {}", total);
    }

    #[test]
    fn test_constant_radiance_is_pure_dc() {
        let partials = reduce(project(16, |_| Vec3::ONE));
        let sh = normalize(&partials.coefficients[0], partials.weights[0]);

        let dc = 0.282_095 * 4.0 * std::f32::consts::PI;
        assert!((sh[0].x - dc).abs() < 1e-3);
        for c in &sh[1..] {
            assert!(c.abs().max_element() < 1e-3, "{:?}", c);
        }
    }

    #[test]
    fn test_directional_radiance_shows_in_band_one() {
        let partials = reduce(project(16, |dir| Vec3::splat(dir.y.max(0.0))));
        let sh = normalize(&partials.coefficients[0], partials.weights[0]);
        // Light from above: the y-linear coefficient is positive, x and z vanish.
        assert!(sh[1].x > 0.1);
        assert!(sh[3].x.abs() < 1e-3);
        assert!(sh[2].x.abs() < 1e-3);
    }

    #[test]
    fn test_reduction_matches_direct_sum() {
        let partials = project(8, sky_radiance);
        let direct: f32 = partials.weights.iter().sum();
        let reduced = reduce(partials.clone());
        assert_eq!(reduced.groups(), 1);
        assert!((reduced.weights[0] - direct).abs() < 1e-4);
    }

    // ========== Normalization Tests ==========

    #[test]
    fn test_normalize_twice_is_stable() {
        let input = reduce(project(8, sky_radiance)).coefficients[0];
        let first = normalize(&input, 1.0);
        let second = normalize(&input, 1.0);
        assert_eq!(first, second);
        assert_eq!(first[0], input[0] * (4.0 * std::f32::consts::PI));
    }

    #[test]
    fn test_procedural_sky_size() {
        let texels = procedural_sky(4);
        assert_eq!(texels.len(), 4 * 4 * 6 * 4);
        assert!(texels.chunks(4).all(|t| t[3] == 255));
    }

    #[test]
    fn test_face_directions_point_outward() {
        let axes = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
        for (face, axis) in axes.iter().enumerate() {
            assert_eq!(face_direction(face as u32, Vec2::ZERO), *axis);
        }
    }
}
