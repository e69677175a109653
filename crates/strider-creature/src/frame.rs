//! Stabilized orientation reference frame
//!
//! The frame sits at the root position and yaws towards the current steering
//! target. It never tilts or rolls with the limbs, so observations expressed in
//! it are free of ragdoll jitter.

use glam::{Quat, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationFrame {
    position: Vec3,
    rotation: Quat,
}

impl Default for OrientationFrame {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl OrientationFrame {
    /// Recompute the frame from the root position and the steering target.
    ///
    /// When the target is directly above or below the root the previous yaw is kept.
    pub fn update(&mut self, root_position: Vec3, target: Vec3) {
        self.position = root_position;
        let mut direction = target - root_position;
        direction.y = 0.0;
        if direction.length_squared() > 1e-8 {
            self.rotation = Quat::from_rotation_y(direction.x.atan2(direction.z));
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    /// Horizontal unit vector pointing at the target
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    pub fn inverse_transform_direction(&self, direction: Vec3) -> Vec3 {
        self.rotation.inverse() * direction
    }

    pub fn inverse_transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation.inverse() * (point - self.position)
    }
}

/// Rotation taking `from` onto `to`; identity for degenerate input
pub fn from_to_rotation(from: Vec3, to: Vec3) -> Quat {
    match (from.try_normalize(), to.try_normalize()) {
        (Some(a), Some(b)) => Quat::from_rotation_arc(a, b),
        _ => Quat::IDENTITY,
    }
}
