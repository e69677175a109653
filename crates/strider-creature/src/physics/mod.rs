//! Physics backend seam
//!
//! The creature and episode code never talk to a physics engine directly. They
//! go through [`PhysicsBackend`], which is implemented by the built-in
//! [`SimplePhysics`] integrator and, with the `rapier` feature, by a rapier3d
//! world. Contacts are reported as a queue of [`ContactEvent`]s that is drained
//! once per step, so the order in which contacts are processed does not depend
//! on engine callback timing.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use strider_terrain::Terrain;

use crate::error::PhysicsError;
use crate::types::AxisMask;

#[cfg(feature = "rapier")]
pub mod rapier;
pub mod simple;

#[cfg(feature = "rapier")]
pub use rapier::RapierPhysics;
pub use simple::{SimplePhysics, SimplePhysicsConfig};

/// Surface tag of the terrain heightmap
pub const GROUND_TAG: &str = "ground";
/// Surface tag of the arena boundary walls
pub const WALL_TAG: &str = "wall";
/// Surface tag of scattered obstacles
pub const OBSTACLE_TAG: &str = "obstacle";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JointHandle(pub u32);

/// Dynamic spherical body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyDesc {
    pub position: Vec3,
    pub rotation: Quat,
    pub radius: f32,
    pub mass: f32,
}

/// Ball joint between two bodies
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointDesc {
    pub parent: BodyHandle,
    pub child: BodyHandle,
    /// Anchor in the parent's local frame
    pub parent_anchor: Vec3,
    /// Anchor in the child's local frame
    pub child_anchor: Vec3,
    pub locked: AxisMask,
    /// Angular limits per axis in radians, relative to the rest pose
    pub limits: [(f32, f32); 3],
}

/// Spring-damper drive towards a target rotation relative to the rest pose
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointDrive {
    pub target: Quat,
    pub spring: f32,
    pub damper: f32,
    pub max_force: f32,
}

/// Kinematic state of one body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub position: Vec3,
    pub rotation: Quat,
    pub linvel: Vec3,
    pub angvel: Vec3,
}

impl BodyState {
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.rotation.is_finite()
            && self.linvel.is_finite()
            && self.angvel.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactPhase {
    Started,
    Stopped,
}

/// Contact change between a body and a tagged static surface
#[derive(Debug, Clone, PartialEq)]
pub struct ContactEvent {
    pub body: BodyHandle,
    pub surface: String,
    pub phase: ContactPhase,
    /// World-space contact point
    pub point: Vec3,
}

/// Rigid body simulation used by creatures
pub trait PhysicsBackend {
    fn add_body(&mut self, desc: &BodyDesc) -> Result<BodyHandle, PhysicsError>;

    fn add_joint(&mut self, desc: &JointDesc) -> Result<JointHandle, PhysicsError>;

    fn body_state(&self, body: BodyHandle) -> Result<BodyState, PhysicsError>;

    /// Teleport a body. Contacts of the body are forgotten; contacts that
    /// still exist after the next step are reported as started again.
    fn set_body_pose(
        &mut self,
        body: BodyHandle,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), PhysicsError>;

    fn set_body_velocity(
        &mut self,
        body: BodyHandle,
        linvel: Vec3,
        angvel: Vec3,
    ) -> Result<(), PhysicsError>;

    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec3) -> Result<(), PhysicsError>;

    fn set_joint_drive(&mut self, joint: JointHandle, drive: &JointDrive)
        -> Result<(), PhysicsError>;

    /// Replace the static world (heightmap, walls, obstacles) with `terrain`
    fn sync_terrain(&mut self, terrain: &Terrain) -> Result<(), PhysicsError>;

    /// Advance the simulation by `dt` seconds
    fn step(&mut self, dt: f32) -> Result<(), PhysicsError>;

    /// Contact changes since the previous drain, in deterministic order
    fn drain_contact_events(&mut self) -> Vec<ContactEvent>;
}

/// Decompose a rotation into XYZ Euler angles (radians)
pub fn to_euler_xyz(rotation: Quat) -> [f32; 3] {
    let (x, y, z) = rotation.to_euler(glam::EulerRot::XYZ);
    [x, y, z]
}

/// Compose XYZ Euler angles (radians) into a rotation
pub fn from_euler_xyz(angles: [f32; 3]) -> Quat {
    Quat::from_euler(glam::EulerRot::XYZ, angles[0], angles[1], angles[2])
}
