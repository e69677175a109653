//! Configuration, step and arena errors

use strider_creature::{CreatureError, DriveError, PhysicsError};
use strider_terrain::TerrainError;
use thiserror::Error;

use crate::arena::ArenaId;
use crate::policy::PolicyError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("at least one arena is required")]
    NoArenas,

    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f32 },

    #[error("out-of-bounds band is inverted: min {min} >= max {max}")]
    InvertedBounds { min: f32, max: f32 },

    #[error("decision period must be at least one step")]
    ZeroDecisionPeriod,

    #[error("{field} must lie in [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error(transparent)]
    Terrain(#[from] TerrainError),
}

/// Failure of a single step. The episode ends with [`crate::Termination::Failed`]
/// and the arena resets; the simulation loop keeps running.
#[derive(Debug, Error)]
pub enum StepFailure {
    #[error("policy failed: {0}")]
    Policy(#[from] PolicyError),

    #[error("action rejected: {0}")]
    Drive(#[from] DriveError),

    #[error("terrain service failed: {0}")]
    Terrain(#[from] TerrainError),

    #[error("physics failed: {0}")]
    Physics(#[from] PhysicsError),

    #[error("observation failed: {0}")]
    Creature(#[from] CreatureError),
}

/// Unrecoverable arena failures
#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("creature setup failed: {0}")]
    Creature(#[from] CreatureError),

    #[error("terrain setup failed: {0}")]
    Terrain(#[from] TerrainError),

    #[error("physics setup failed: {0}")]
    Physics(#[from] PhysicsError),

    #[error("arena {0} has not been initialized")]
    NotInitialized(ArenaId),

    #[error("arena {arena} failed to reset: {source}")]
    Reset {
        arena: ArenaId,
        #[source]
        source: StepFailure,
    },

    #[error("unknown arena {0}")]
    UnknownArena(ArenaId),

    #[error("arena {0} is already registered")]
    DuplicateArena(ArenaId),
}
