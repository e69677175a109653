//! Navigation grid over the terrain
//!
//! The walkable surface is sampled on a regular lattice. Lattice points covered by
//! an obstacle are left out, and neighbouring points (8-connected) are linked only
//! when the slope between them is climbable. Paths are found with A* and returned
//! as a list of corners where the walking direction changes.

use glam::{Vec2, Vec3};
use petgraph::algo::astar;
use petgraph::graphmap::UnGraphMap;
use serde::{Deserialize, Serialize};

use crate::error::TerrainError;
use crate::heightmap::{HeightGrid, Terrain};
use crate::obstacles::Obstacle;

type Cell = (i32, i32);

/// Forward half of the 8-neighbourhood; the graph is undirected
const NEIGHBOURS: [Cell; 4] = [(1, 0), (0, 1), (1, 1), (1, -1)];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavGridConfig {
    /// Distance between lattice points
    pub cell_size: f32,
    /// Maximum rise over run between two linked lattice points
    pub max_slope: f32,
    /// Clearance kept around obstacles
    pub obstacle_margin: f32,
}

impl Default for NavGridConfig {
    fn default() -> Self {
        Self {
            cell_size: 2.0,
            max_slope: 1.0,
            obstacle_margin: 0.5,
        }
    }
}

/// Shortest-path queries over a walkable surface
pub trait PathFinder {
    /// Terrain generation this finder was built from
    fn generation(&self) -> u64;

    /// Corners of a traversable path from `from` to `to`, both included.
    ///
    /// `Ok(None)` means the goal is unreachable.
    fn find_path(&self, from: Vec3, to: Vec3) -> Result<Option<Vec<Vec3>>, TerrainError>;
}

#[derive(Debug, Clone)]
pub struct NavGrid {
    config: NavGridConfig,
    graph: UnGraphMap<Cell, f32>,
    heights: HeightGrid,
    cells: i32,
    generation: u64,
}

impl NavGrid {
    /// Build the grid for the current terrain
    pub fn build(terrain: &Terrain, config: NavGridConfig) -> Result<Self, TerrainError> {
        if !terrain.is_generated() {
            return Err(TerrainError::NotGenerated);
        }
        Self::from_parts(
            terrain.grid().clone(),
            terrain.obstacles(),
            config,
            terrain.generation(),
        )
    }

    /// Build the grid from a heightmap and obstacle list
    pub fn from_parts(
        heights: HeightGrid,
        obstacles: &[Obstacle],
        config: NavGridConfig,
        generation: u64,
    ) -> Result<Self, TerrainError> {
        if !(config.cell_size.is_finite() && config.cell_size > 0.0) {
            return Err(TerrainError::InvalidConfig(format!(
                "navigation cell size must be positive, got {}",
                config.cell_size
            )));
        }

        let cells = (heights.size() / config.cell_size).floor() as i32;
        let mut graph = UnGraphMap::new();

        for j in 0..=cells {
            for i in 0..=cells {
                let (x, z) = (i as f32 * config.cell_size, j as f32 * config.cell_size);
                let blocked = obstacles
                    .iter()
                    .any(|o| o.covers_xz(x, z, config.obstacle_margin));
                if !blocked {
                    graph.add_node((i, j));
                }
            }
        }

        let nodes: Vec<Cell> = graph.nodes().collect();
        for (i, j) in nodes {
            let h = heights.sample(i as f32 * config.cell_size, j as f32 * config.cell_size);
            for (di, dj) in NEIGHBOURS {
                let other = (i + di, j + dj);
                if !graph.contains_node(other) {
                    continue;
                }
                let oh = heights.sample(
                    other.0 as f32 * config.cell_size,
                    other.1 as f32 * config.cell_size,
                );
                let run = config.cell_size * ((di * di + dj * dj) as f32).sqrt();
                let rise = (oh - h).abs();
                if rise / run <= config.max_slope {
                    graph.add_edge((i, j), other, (run * run + rise * rise).sqrt());
                }
            }
        }

        log::debug!(
            "NavGrid: built {} nodes, {} edges for terrain generation {}",
            graph.node_count(),
            graph.edge_count(),
            generation
        );

        Ok(Self {
            config,
            graph,
            heights,
            cells,
            generation,
        })
    }

    /// Fails when the terrain was regenerated after this grid was built
    pub fn ensure_fresh(&self, terrain: &Terrain) -> Result<(), TerrainError> {
        if self.generation != terrain.generation() {
            return Err(TerrainError::StaleNavGrid {
                grid: self.generation,
                terrain: terrain.generation(),
            });
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_walkable(&self, x: f32, z: f32) -> bool {
        self.graph.contains_node(self.cell_of(Vec2::new(x, z)))
    }

    fn cell_of(&self, pos: Vec2) -> Cell {
        let i = (pos.x / self.config.cell_size).round() as i32;
        let j = (pos.y / self.config.cell_size).round() as i32;
        (i.clamp(0, self.cells), j.clamp(0, self.cells))
    }

    fn cell_position(&self, cell: Cell) -> Vec3 {
        let x = cell.0 as f32 * self.config.cell_size;
        let z = cell.1 as f32 * self.config.cell_size;
        Vec3::new(x, self.heights.sample(x, z), z)
    }

    /// Closest walkable lattice point, searching outwards ring by ring
    fn nearest_node(&self, pos: Vec2) -> Option<Cell> {
        let origin = self.cell_of(pos);
        if self.graph.contains_node(origin) {
            return Some(origin);
        }
        for radius in 1..=self.cells {
            let mut best: Option<(f32, Cell)> = None;
            for dj in -radius..=radius {
                for di in -radius..=radius {
                    if di.abs() != radius && dj.abs() != radius {
                        continue;
                    }
                    let cell = (origin.0 + di, origin.1 + dj);
                    if !self.graph.contains_node(cell) {
                        continue;
                    }
                    let p = self.cell_position(cell);
                    let d = Vec2::new(p.x, p.z).distance_squared(pos);
                    if best.map_or(true, |(bd, _)| d < bd) {
                        best = Some((d, cell));
                    }
                }
            }
            if let Some((_, cell)) = best {
                return Some(cell);
            }
        }
        None
    }
}

impl PathFinder for NavGrid {
    fn generation(&self) -> u64 {
        self.generation
    }

    fn find_path(&self, from: Vec3, to: Vec3) -> Result<Option<Vec<Vec3>>, TerrainError> {
        for p in [from, to] {
            if !p.is_finite() {
                return Err(TerrainError::NonFiniteQuery { x: p.x, z: p.z });
            }
        }

        let (Some(start), Some(goal)) = (
            self.nearest_node(Vec2::new(from.x, from.z)),
            self.nearest_node(Vec2::new(to.x, to.z)),
        ) else {
            return Ok(None);
        };

        let goal_pos = self.cell_position(goal);
        let result = astar(
            &self.graph,
            start,
            |n| n == goal,
            |(_, _, w)| *w,
            |n| self.cell_position(n).distance(goal_pos),
        );
        let Some((_, cells)) = result else {
            return Ok(None);
        };

        let mut corners = Vec::with_capacity(cells.len().min(16) + 2);
        corners.push(Vec3::new(from.x, self.heights.sample(from.x, from.z), from.z));
        for window in cells.windows(3) {
            let incoming = (window[1].0 - window[0].0, window[1].1 - window[0].1);
            let outgoing = (window[2].0 - window[1].0, window[2].1 - window[1].1);
            if incoming != outgoing {
                corners.push(self.cell_position(window[1]));
            }
        }
        let end = if self.is_walkable(to.x, to.z) {
            Vec3::new(to.x, self.heights.sample(to.x, to.z), to.z)
        } else {
            goal_pos
        };
        corners.push(end);

        Ok(Some(corners))
    }
}
