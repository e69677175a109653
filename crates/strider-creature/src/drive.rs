//! Joint drive controller
//!
//! Maps the flat action vector onto joint target rotations and strengths.
//! The vector is consumed in body part order: one value per free axis (locked
//! axes stay at zero), then one strength value.

use serde::{Deserialize, Serialize};

use crate::creature::Creature;
use crate::error::DriveError;
use crate::physics::{from_euler_xyz, JointDrive, PhysicsBackend};
use crate::types::AxisMotion;

/// Spring, damper and force ceiling shared by every joint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub max_spring: f32,
    pub damper: f32,
    pub max_force: f32,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            max_spring: 40000.0,
            damper: 5000.0,
            max_force: 20000.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JointDriveController {
    config: DriveConfig,
}

impl JointDriveController {
    pub fn new(config: DriveConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Target angle for an action value in `[-1, 1]` within `(low, high)`
    pub fn axis_target(value: f32, (low, high): (f32, f32)) -> f32 {
        let t = ((value + 1.0) * 0.5).clamp(0.0, 1.0);
        low + (high - low) * t
    }

    /// Force limit for a strength value in `[-1, 1]`
    pub fn strength(&self, value: f32) -> f32 {
        ((value + 1.0) * 0.5 * self.config.max_force).clamp(0.0, self.config.max_force)
    }

    /// Apply one action vector.
    ///
    /// The whole vector is validated before any joint is touched, so a rejected
    /// action leaves the creature unchanged.
    pub fn apply<B: PhysicsBackend + ?Sized>(
        &self,
        creature: &mut Creature,
        backend: &mut B,
        action: &[f32],
    ) -> Result<(), DriveError> {
        if action.len() != creature.action_size() {
            return Err(DriveError::ActionSizeMismatch {
                expected: creature.action_size(),
                actual: action.len(),
            });
        }
        if let Some(index) = action.iter().position(|v| !v.is_finite()) {
            return Err(DriveError::NonFiniteAction { index });
        }

        let mut values = action.iter().copied();
        for part in creature.parts_mut() {
            let mut angles = [0.0_f32; 3];
            for axis in 0..3 {
                if part.motion[axis] == AxisMotion::Free {
                    let value = values.next().unwrap_or_default();
                    angles[axis] = Self::axis_target(value, part.limits[axis]);
                }
            }
            let strength = self.strength(values.next().unwrap_or_default());

            backend.set_joint_drive(
                part.joint,
                &JointDrive {
                    target: from_euler_xyz(angles),
                    spring: self.config.max_spring,
                    damper: self.config.damper,
                    max_force: strength,
                },
            )?;
            part.current_strength = strength;
        }
        Ok(())
    }
}
