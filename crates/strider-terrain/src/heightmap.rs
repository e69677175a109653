//! Perlin-noise heightmap terrain
//!
//! The terrain is a square heightmap spanning `[0, size]` on both the x and z
//! axes. Heights are sampled from 2D Perlin noise with offsets that are redrawn
//! on every regeneration, so each regeneration yields a new landscape.

use noise::{NoiseFn, Perlin};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TerrainError;
use crate::obstacles::{scatter_obstacles, Obstacle, ObstacleConfig};

/// Upper bound for the random noise offsets drawn on regeneration
const MAX_NOISE_OFFSET: f64 = 9999.0;

/// Ground elevation queries
pub trait HeightSampler {
    /// Ground elevation at world coordinates `(x, z)`.
    ///
    /// Coordinates outside the terrain are clamped to its border.
    fn height(&self, x: f32, z: f32) -> Result<f32, TerrainError>;
}

/// Heightmap generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Edge length of the square terrain in world units
    pub size: usize,
    /// Maximum terrain elevation
    pub depth: f32,
    /// Noise frequency across the whole terrain
    pub scale: f32,
    /// When false the terrain stays flat at height 0
    pub generate_heights: bool,
    pub obstacles: ObstacleConfig,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            size: 128,
            depth: 10.0,
            scale: 2.5,
            generate_heights: true,
            obstacles: ObstacleConfig::default(),
        }
    }
}

impl TerrainConfig {
    /// Check the configuration for values that would produce an unusable heightmap
    pub fn validate(&self) -> Result<(), TerrainError> {
        if self.size < 2 {
            return Err(TerrainError::InvalidConfig(format!(
                "terrain size must be at least 2, got {}",
                self.size
            )));
        }
        if !self.depth.is_finite() || self.depth < 0.0 {
            return Err(TerrainError::InvalidConfig(format!(
                "terrain depth must be finite and non-negative, got {}",
                self.depth
            )));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(TerrainError::InvalidConfig(format!(
                "terrain noise scale must be positive, got {}",
                self.scale
            )));
        }
        self.obstacles.validate()
    }
}

/// Square grid of height samples with unit spacing between vertices
#[derive(Debug, Clone, PartialEq)]
pub struct HeightGrid {
    resolution: usize,
    heights: Vec<f32>,
}

impl HeightGrid {
    /// Flat grid covering `[0, size]` at height 0
    pub fn flat(size: usize) -> Self {
        let resolution = size.max(1) + 1;
        Self {
            resolution,
            heights: vec![0.0; resolution * resolution],
        }
    }

    /// Number of vertices along each edge
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Edge length in world units
    pub fn size(&self) -> f32 {
        (self.resolution - 1) as f32
    }

    /// Raw heights in row-major order (rows run along z)
    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    /// Height of the vertex at integer grid coordinates
    pub fn vertex(&self, ix: usize, iz: usize) -> f32 {
        let ix = ix.min(self.resolution - 1);
        let iz = iz.min(self.resolution - 1);
        self.heights[iz * self.resolution + ix]
    }

    fn set_vertex(&mut self, ix: usize, iz: usize, height: f32) {
        self.heights[iz * self.resolution + ix] = height;
    }

    /// Whether `(x, z)` lies on the terrain
    pub fn contains(&self, x: f32, z: f32) -> bool {
        let size = self.size();
        (0.0..=size).contains(&x) && (0.0..=size).contains(&z)
    }

    /// Bilinear height sample, clamped to the grid border
    pub fn sample(&self, x: f32, z: f32) -> f32 {
        let size = self.size();
        let x = x.clamp(0.0, size);
        let z = z.clamp(0.0, size);

        let x0 = x.floor() as usize;
        let z0 = z.floor() as usize;
        let x1 = (x0 + 1).min(self.resolution - 1);
        let z1 = (z0 + 1).min(self.resolution - 1);
        let tx = x - x0 as f32;
        let tz = z - z0 as f32;

        let h00 = self.vertex(x0, z0);
        let h10 = self.vertex(x1, z0);
        let h01 = self.vertex(x0, z1);
        let h11 = self.vertex(x1, z1);

        let near = h00 + (h10 - h00) * tx;
        let far = h01 + (h11 - h01) * tx;
        near + (far - near) * tz
    }
}

impl HeightSampler for HeightGrid {
    fn height(&self, x: f32, z: f32) -> Result<f32, TerrainError> {
        if !x.is_finite() || !z.is_finite() {
            return Err(TerrainError::NonFiniteQuery { x, z });
        }
        Ok(self.sample(x, z))
    }
}

/// Procedural arena terrain: heightmap plus optional obstacle layout
#[derive(Debug, Clone)]
pub struct Terrain {
    config: TerrainConfig,
    grid: HeightGrid,
    obstacles: Vec<Obstacle>,
    noise_offset: [f64; 2],
    generation: u64,
}

impl Terrain {
    /// Create an ungenerated terrain. Height queries fail until [`Terrain::regenerate`] ran once.
    pub fn new(config: TerrainConfig) -> Result<Self, TerrainError> {
        config.validate()?;
        let grid = HeightGrid::flat(config.size);
        Ok(Self {
            config,
            grid,
            obstacles: Vec::new(),
            noise_offset: [0.0, 0.0],
            generation: 0,
        })
    }

    /// Redraw the heightmap with fresh noise offsets and rescatter obstacles.
    ///
    /// Takes `&mut self`, so no height or path query can observe a partially
    /// regenerated terrain.
    pub fn regenerate<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.noise_offset = [
            rng.gen_range(0.0..MAX_NOISE_OFFSET),
            rng.gen_range(0.0..MAX_NOISE_OFFSET),
        ];
        let perlin = Perlin::new(rng.gen());

        let mut grid = HeightGrid::flat(self.config.size);
        if self.config.generate_heights {
            let size = self.config.size as f64;
            let scale = self.config.scale as f64;
            let depth = self.config.depth;
            let resolution = grid.resolution();
            for iz in 0..resolution {
                for ix in 0..resolution {
                    let nx = ix as f64 / size * scale + self.noise_offset[0];
                    let nz = iz as f64 / size * scale + self.noise_offset[1];
                    grid.set_vertex(ix, iz, noise01(&perlin, nx, nz) * depth);
                }
            }
        }

        self.obstacles = scatter_obstacles(&self.config.obstacles, &grid, rng);
        self.grid = grid;
        self.generation += 1;

        log::debug!(
            "Terrain: regenerated (generation {}, offset ({:.1}, {:.1}), {} obstacles)",
            self.generation,
            self.noise_offset[0],
            self.noise_offset[1],
            self.obstacles.len()
        );
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn grid(&self) -> &HeightGrid {
        &self.grid
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    /// Incremented on each regeneration; 0 means never generated
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_generated(&self) -> bool {
        self.generation > 0
    }

    /// Edge length in world units
    pub fn size(&self) -> f32 {
        self.grid.size()
    }
}

impl HeightSampler for Terrain {
    fn height(&self, x: f32, z: f32) -> Result<f32, TerrainError> {
        if !self.is_generated() {
            return Err(TerrainError::NotGenerated);
        }
        self.grid.height(x, z)
    }
}

/// Perlin noise remapped from `[-1, 1]` to `[0, 1]`
pub(crate) fn noise01(perlin: &Perlin, x: f64, z: f64) -> f32 {
    let value = perlin.get([x, z]);
    ((value + 1.0) * 0.5).clamp(0.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;

    #[test]
    fn test_query_before_generation_fails() {
        let terrain = Terrain::new(TerrainConfig::default()).unwrap();
        assert_eq!(terrain.height(10.0, 10.0), Err(TerrainError::NotGenerated));
    }

    #[test]
    fn test_regenerated_heights_within_depth() {
        let config = TerrainConfig::default();
        let depth = config.depth;
        let mut terrain = Terrain::new(config).unwrap();
        let mut rng = Xoshiro256StarStar::seed_from_u64(7);
        terrain.regenerate(&mut rng);

        for i in 0..200 {
            let x = (i as f32 * 0.637) % 128.0;
            let z = (i as f32 * 1.913) % 128.0;
            let h = terrain.height(x, z).unwrap();
            assert!(h.is_finite());
            assert!((0.0..=depth).contains(&h), "height {} outside [0, {}]", h, depth);
        }
    }

    #[test]
    fn test_regeneration_changes_landscape() {
        let mut terrain = Terrain::new(TerrainConfig::default()).unwrap();
        let mut rng = Xoshiro256StarStar::seed_from_u64(11);
        terrain.regenerate(&mut rng);
        let first = terrain.grid().clone();
        terrain.regenerate(&mut rng);

        assert_eq!(terrain.generation(), 2);
        assert_ne!(&first, terrain.grid());
    }

    #[test]
    fn test_flat_terrain_when_heights_disabled() {
        let config = TerrainConfig {
            generate_heights: false,
            ..Default::default()
        };
        let mut terrain = Terrain::new(config).unwrap();
        terrain.regenerate(&mut Xoshiro256StarStar::seed_from_u64(1));
        assert_eq!(terrain.height(64.0, 64.0).unwrap(), 0.0);
    }

    #[test]
    fn test_out_of_bounds_query_is_clamped() {
        let mut terrain = Terrain::new(TerrainConfig::default()).unwrap();
        terrain.regenerate(&mut Xoshiro256StarStar::seed_from_u64(3));
        let inside = terrain.height(0.0, 0.0).unwrap();
        let outside = terrain.height(-50.0, -50.0).unwrap();
        assert_eq!(inside, outside);
    }

    #[test]
    fn test_non_finite_query_rejected() {
        let mut terrain = Terrain::new(TerrainConfig::default()).unwrap();
        terrain.regenerate(&mut Xoshiro256StarStar::seed_from_u64(3));
        assert!(matches!(
            terrain.height(f32::NAN, 1.0),
            Err(TerrainError::NonFiniteQuery { .. })
        ));
    }

    #[test]
    fn test_bilinear_sample_interpolates() {
        let mut grid = HeightGrid::flat(2);
        grid.set_vertex(1, 0, 2.0);
        assert!((grid.sample(0.5, 0.0) - 1.0).abs() < 1e-6);
        assert!((grid.sample(1.0, 0.0) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TerrainConfig {
            size: 1,
            ..Default::default()
        };
        assert!(Terrain::new(config).is_err());
    }
}
