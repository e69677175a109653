//! Terrain services for Strider arenas
//!
//! This crate implements:
//! - Perlin-noise heightmap terrain with on-demand regeneration
//! - Noise-driven obstacle scattering with exclusion zones
//! - A navigation grid with A* path queries
//! - A waypoint planner that follows and periodically recomputes paths

pub mod error;
pub mod heightmap;
pub mod navgrid;
pub mod obstacles;
pub mod planner;

pub use error::TerrainError;
pub use heightmap::{HeightGrid, HeightSampler, Terrain, TerrainConfig};
pub use navgrid::{NavGrid, NavGridConfig, PathFinder};
pub use obstacles::{ExclusionZone, Obstacle, ObstacleConfig};
pub use planner::{PathPlanner, PlanOutcome, PlannerConfig};
