//! Articulated creatures for Strider
//!
//! This crate implements:
//! - Skeleton descriptions (built-in biped and quadruped, or RON files)
//! - A physics backend seam with a built-in integrator and an optional rapier3d backend
//! - The body part registry of a spawned creature
//! - Joint drives, ground contact tracking, observation assembly and reward shaping

pub mod contact;
pub mod creature;
pub mod drive;
pub mod error;
pub mod frame;
pub mod observation;
pub mod physics;
pub mod reward;
pub mod skeleton;
pub mod types;

// Re-export main types for convenience
pub use contact::{ContactConfig, ContactOutcome, GroundContactMonitor};
pub use creature::{BodyPart, ContactState, Creature, CreatureSnapshot, RootPart};
pub use drive::{DriveConfig, JointDriveController};
pub use error::{CreatureError, DriveError, PhysicsError};
pub use frame::OrientationFrame;
pub use observation::{ObservationAssembler, ObservationConfig, ObservationContext};
pub use physics::{
    BodyHandle, BodyState, ContactEvent, ContactPhase, JointHandle, PhysicsBackend, SimplePhysics,
    SimplePhysicsConfig,
};
pub use reward::{HeadingSource, RewardConfig, RewardContext, RewardShaper, RewardTerm};
pub use skeleton::{BoneSpec, SkeletonDescription};
pub use types::{AxisMotion, BodyCategory, CategoryMap};
