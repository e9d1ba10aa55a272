//! Orbit camera around the simulation volume.

use glam::{Mat4, Vec3};

/// Near clip distance.
pub const Z_NEAR: f32 = 1.0;
/// Far clip distance.
pub const Z_FAR: f32 = 1000.0;

/// Orbit camera looking at a fixed point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    /// Horizontal rotation angle in radians.
    pub yaw: f32,
    /// Vertical rotation angle in radians.
    pub pitch: f32,
    /// Distance from the target point.
    pub distance: f32,
    /// Point the camera orbits around.
    pub target: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
}

impl Camera {
    /// Default view: eye at (4, 16, -40) looking at the origin.
    pub fn new() -> Self {
        Self::from_eye(Vec3::new(4.0, 16.0, -40.0), Vec3::ZERO)
    }

    pub fn from_eye(eye: Vec3, target: Vec3) -> Self {
        let offset = eye - target;
        let distance = offset.length().max(f32::EPSILON);
        Self {
            yaw: offset.x.atan2(offset.z),
            pitch: (offset.y / distance).clamp(-1.0, 1.0).asin(),
            distance,
            target,
            fov: std::f32::consts::FRAC_PI_4,
        }
    }

    /// Calculate the camera's world position.
    pub fn position(&self) -> Vec3 {
        let x = self.distance * self.pitch.cos() * self.yaw.sin();
        let y = self.distance * self.pitch.sin();
        let z = self.distance * self.pitch.cos() * self.yaw.cos();
        self.target + Vec3::new(x, y, z)
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect, Z_NEAR, Z_FAR)
    }

    /// Rotate by a mouse drag of (`dx`, `dy`) pixels.
    pub fn orbit(&mut self, dx: f32, dy: f32) {
        self.yaw -= dx * 0.005;
        self.pitch = (self.pitch + dy * 0.005).clamp(-1.5, 1.5);
    }

    /// Move towards (positive) or away from the target.
    pub fn zoom(&mut self, scroll: f32) {
        self.distance = (self.distance - scroll * 2.0).clamp(2.0, 200.0);
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}
