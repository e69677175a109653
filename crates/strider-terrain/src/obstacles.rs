//! Noise-driven obstacle scattering

use glam::{Vec2, Vec3};
use noise::Perlin;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TerrainError;
use crate::heightmap::{noise01, HeightGrid};

/// Axis-aligned rectangle on the ground plane (x, z) where no obstacle may be placed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExclusionZone {
    pub min: Vec2,
    pub max: Vec2,
}

impl ExclusionZone {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Whether a square footprint centred at `center` overlaps the zone
    pub fn overlaps(&self, center: Vec2, half_extent: f32) -> bool {
        center.x + half_extent > self.min.x
            && center.x - half_extent < self.max.x
            && center.y + half_extent > self.min.y
            && center.y - half_extent < self.max.y
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObstacleConfig {
    pub enabled: bool,
    /// Noise value in `[0, 1]` a cell must exceed to receive an obstacle
    pub threshold: f32,
    pub noise_scale: f32,
    pub max_count: usize,
    /// Half the edge length of an obstacle's square footprint
    pub half_extent: f32,
    pub height: f32,
    /// Distance between candidate cells
    pub cell_stride: usize,
    pub exclusion: Option<ExclusionZone>,
}

impl Default for ObstacleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0.9,
            noise_scale: 10.0,
            max_count: 50,
            half_extent: 1.5,
            height: 3.0,
            cell_stride: 4,
            exclusion: None,
        }
    }
}

impl ObstacleConfig {
    pub fn validate(&self) -> Result<(), TerrainError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(TerrainError::InvalidConfig(format!(
                "obstacle threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if self.cell_stride == 0 {
            return Err(TerrainError::InvalidConfig(
                "obstacle cell stride must be positive".to_string(),
            ));
        }
        if !(self.half_extent > 0.0 && self.height > 0.0) {
            return Err(TerrainError::InvalidConfig(format!(
                "obstacle dimensions must be positive (half extent {}, height {})",
                self.half_extent, self.height
            )));
        }
        Ok(())
    }
}

/// Static box standing on the terrain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    /// Centre of the box
    pub center: Vec3,
    pub half_extents: Vec3,
}

impl Obstacle {
    /// Whether the point lies inside the footprint grown by `margin`
    pub fn covers_xz(&self, x: f32, z: f32, margin: f32) -> bool {
        (x - self.center.x).abs() <= self.half_extents.x + margin
            && (z - self.center.z).abs() <= self.half_extents.z + margin
    }

    pub fn top(&self) -> f32 {
        self.center.y + self.half_extents.y
    }

    pub fn bottom(&self) -> f32 {
        self.center.y - self.half_extents.y
    }

    fn overlaps(&self, other_center: Vec2, half_extent: f32) -> bool {
        (other_center.x - self.center.x).abs() < self.half_extents.x + half_extent
            && (other_center.y - self.center.z).abs() < self.half_extents.z + half_extent
    }
}

/// Place obstacles at cells whose noise value exceeds the threshold.
///
/// Candidates overlapping the exclusion zone or an already placed obstacle are skipped.
pub fn scatter_obstacles<R: Rng + ?Sized>(
    config: &ObstacleConfig,
    grid: &HeightGrid,
    rng: &mut R,
) -> Vec<Obstacle> {
    let mut placed: Vec<Obstacle> = Vec::new();
    if !config.enabled || config.max_count == 0 {
        return placed;
    }

    let perlin = Perlin::new(rng.gen());
    let offset = [rng.gen_range(0.0..9999.0), rng.gen_range(0.0..9999.0)];
    let size = grid.size();
    let stride = config.cell_stride.max(1);
    let half = config.half_extent;
    let cells = grid.resolution() - 1;

    'cells: for iz in (0..=cells).step_by(stride) {
        for ix in (0..=cells).step_by(stride) {
            if placed.len() >= config.max_count {
                break 'cells;
            }

            let center = Vec2::new(ix as f32, iz as f32);
            // Keep the footprint fully on the terrain
            if center.x - half < 0.0
                || center.y - half < 0.0
                || center.x + half > size
                || center.y + half > size
            {
                continue;
            }

            let nx = ix as f64 / size as f64 * config.noise_scale as f64 + offset[0];
            let nz = iz as f64 / size as f64 * config.noise_scale as f64 + offset[1];
            if noise01(&perlin, nx, nz) <= config.threshold {
                continue;
            }

            if let Some(zone) = &config.exclusion {
                if zone.overlaps(center, half) {
                    continue;
                }
            }
            if placed.iter().any(|o| o.overlaps(center, half)) {
                continue;
            }

            let ground = grid.sample(center.x, center.y);
            placed.push(Obstacle {
                center: Vec3::new(center.x, ground + config.height * 0.5, center.y),
                half_extents: Vec3::new(half, config.height * 0.5, half),
            });
        }
    }

    placed
}
