//! Terrain service errors

use thiserror::Error;

/// Failures of the terrain and path services.
///
/// These are surfaced to the episode controller as a failed step, since a
/// creature placed against a half-built or stale terrain ends up embedded in it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TerrainError {
    #[error("terrain has not been generated yet")]
    NotGenerated,

    #[error("non-finite terrain query at ({x}, {z})")]
    NonFiniteQuery { x: f32, z: f32 },

    #[error("navigation grid is stale (grid generation {grid}, terrain generation {terrain})")]
    StaleNavGrid { grid: u64, terrain: u64 },

    #[error("invalid terrain configuration: {0}")]
    InvalidConfig(String),
}
