//! Episode control for Strider arenas
//!
//! This crate implements:
//! - The environment configuration model
//! - Walk targets with random placement and roaming
//! - The policy boundary
//! - The episode controller that runs the per-step control loop
//! - An arena registry and per-arena episode statistics

pub mod arena;
pub mod config;
pub mod episode;
pub mod error;
pub mod goal;
pub mod policy;
pub mod stats;

// Re-export main types for convenience
pub use arena::{ArenaDeps, ArenaId, ArenaRegistry};
pub use config::{EnvConfig, SkeletonSource, StartPose};
pub use episode::{EpisodeController, EpisodePhase, StepOutcome, Termination};
pub use error::{ArenaError, ConfigError, StepFailure};
pub use goal::{GoalConfig, GoalReachedPolicy, WalkTarget};
pub use policy::{ConstantPolicy, DecisionRequest, Policy, PolicyError, RandomPolicy};
pub use stats::{EpisodeRecord, EpisodeStats};
