//! Observer camera supplying view and projection matrices
//!
//! Orientation is stored as yaw and pitch. The streaming demo and the
//! culling tests only ever need a free-look camera without roll.

use crate::core::types::{Mat4, Vec3};

/// Pitch stays just short of straight up or down so the view basis stays defined
const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

/// Free-look camera following the streaming observer
#[derive(Clone, Debug)]
pub struct Camera {
    /// World position (also the streaming observer position)
    pub position: Vec3,
    /// Rotation about +Y in radians; zero faces -Z
    pub yaw: f32,
    /// Rotation above the horizon in radians
    pub pitch: f32,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Width / height
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    /// Camera at `position` facing -Z
    pub fn new(position: Vec3, fov_y_degrees: f32, aspect: f32) -> Self {
        Self {
            position,
            yaw: 0.0,
            pitch: 0.0,
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near: 0.1,
            far: 512.0,
        }
    }

    /// Camera at `position` aimed at `target`
    ///
    /// A target equal to the position leaves the camera facing -Z.
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        let mut camera = Self::new(position, 70.0, 16.0 / 9.0);
        camera.face(target - position);
        camera
    }

    /// Turn to face `direction`; zero-length directions are ignored
    pub fn face(&mut self, direction: Vec3) {
        let Some(dir) = direction.try_normalize() else {
            return;
        };
        self.yaw = (-dir.x).atan2(-dir.z);
        self.pitch = dir.y.asin().clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Add to yaw and pitch, keeping pitch inside its limit
    pub fn rotate(&mut self, delta_yaw: f32, delta_pitch: f32) {
        self.yaw = (self.yaw + delta_yaw).rem_euclid(std::f32::consts::TAU);
        self.pitch = (self.pitch + delta_pitch).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Unit view direction
    pub fn forward(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        Vec3::new(-sin_yaw * cos_pitch, sin_pitch, -cos_yaw * cos_pitch)
    }

    /// World to camera space
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), Vec3::Y)
    }

    /// Camera to clip space
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 140.0, 0.0), 70.0, 16.0 / 9.0)
    }
}
