//! Walk target
//!
//! The goal the creature walks towards. It rests on the terrain, can be placed
//! randomly, and optionally roams in a random horizontal direction that is
//! redrawn every few seconds and deflected when the target runs into an
//! obstacle or the arena border.

use glam::{Quat, Vec2, Vec3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use strider_creature::CreatureSnapshot;
use strider_terrain::{HeightSampler, Terrain, TerrainError};

/// Highest the target may float before it is snapped back to the terrain
const MAX_TARGET_HEIGHT: f32 = 40.0;
/// Random placements tried before accepting a spot inside an obstacle
const PLACEMENT_ATTEMPTS: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalReachedPolicy {
    /// Pay the bonus and move the goal to a new random spot
    #[default]
    Relocate,
    /// Pay the bonus and end the episode
    EndEpisode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalConfig {
    /// Position (x, z) before the first random placement
    pub initial: Vec2,
    /// Distance kept from the terrain border when placing randomly
    pub margin: f32,
    /// A body part within this distance of the target touches it
    pub touch_radius: f32,
    /// Roaming speed in units per second, 0 keeps the target still
    pub roaming_speed: f32,
    /// Upper bound of the seconds spent walking in one direction
    pub max_seconds_in_one_direction: u32,
    pub on_reached: GoalReachedPolicy,
    pub reached_bonus: f32,
}

impl Default for GoalConfig {
    fn default() -> Self {
        Self {
            initial: Vec2::new(64.0, 80.0),
            margin: 4.0,
            touch_radius: 1.0,
            roaming_speed: 0.0,
            max_seconds_in_one_direction: 10,
            on_reached: GoalReachedPolicy::Relocate,
            reached_bonus: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalkTarget {
    config: GoalConfig,
    position: Vec3,
    direction: Vec3,
    direction_remaining: f32,
}

impl WalkTarget {
    /// Target at its initial position. Call [`WalkTarget::snap_to_terrain`] once
    /// the terrain has been generated.
    pub fn new(config: GoalConfig) -> Self {
        let position = Vec3::new(config.initial.x, 0.0, config.initial.y);
        Self {
            config,
            position,
            direction: Vec3::Z,
            direction_remaining: 0.0,
        }
    }

    pub fn config(&self) -> &GoalConfig {
        &self.config
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    /// Move the target to `(x, z)`, resting on the terrain
    pub fn set_position(&mut self, terrain: &Terrain, x: f32, z: f32) -> Result<(), TerrainError> {
        self.position = Vec3::new(x, terrain.height(x, z)?, z);
        Ok(())
    }

    /// Random spot inside the margin, avoiding obstacles where possible
    pub fn place_randomly<R: Rng + ?Sized>(
        &mut self,
        terrain: &Terrain,
        rng: &mut R,
    ) -> Result<(), TerrainError> {
        let low = self.config.margin;
        let high = terrain.size() - self.config.margin;
        let mut spot = (low, low);
        for _ in 0..PLACEMENT_ATTEMPTS {
            spot = (rng.gen_range(low..high), rng.gen_range(low..high));
            let blocked = terrain
                .obstacles()
                .iter()
                .any(|o| o.covers_xz(spot.0, spot.1, self.config.touch_radius));
            if !blocked {
                break;
            }
        }
        self.set_position(terrain, spot.0, spot.1)?;
        log::debug!(
            "WalkTarget: placed at ({:.1}, {:.1}, {:.1})",
            self.position.x,
            self.position.y,
            self.position.z
        );
        Ok(())
    }

    /// Put the target back on the terrain surface, e.g. after regeneration
    pub fn snap_to_terrain(&mut self, terrain: &Terrain) -> Result<(), TerrainError> {
        self.set_position(terrain, self.position.x, self.position.z)
    }

    /// Advance roaming by `dt` seconds and keep the target inside the arena
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        dt: f32,
        terrain: &Terrain,
        rng: &mut R,
    ) -> Result<(), TerrainError> {
        if self.config.roaming_speed > 0.0 {
            self.direction_remaining -= dt;
            if self.direction_remaining <= 0.0 {
                self.redraw_direction(rng);
            }

            let next = self.position + self.direction * self.config.roaming_speed * dt;
            let size = terrain.size();
            let inside = next.x >= 0.0 && next.x <= size && next.z >= 0.0 && next.z <= size;
            let blocked = terrain
                .obstacles()
                .iter()
                .any(|o| o.covers_xz(next.x, next.z, 0.0));
            if inside && !blocked {
                self.set_position(terrain, next.x, next.z)?;
            } else {
                let angle = rng.gen_range(60.0_f32..170.0).to_radians();
                self.direction = Quat::from_rotation_y(angle) * self.direction;
            }
        }
        self.safeguard(terrain)
    }

    /// Re-snap a target that sank below the terrain, floated away or left the arena
    fn safeguard(&mut self, terrain: &Terrain) -> Result<(), TerrainError> {
        let size = terrain.size();
        let p = self.position;
        let ground = terrain.height(p.x, p.z)?;
        let outside = p.x < -1.0 || p.x > size + 1.0 || p.z < -1.0 || p.z > size + 1.0;
        if p.y < ground - 1.0 || p.y > MAX_TARGET_HEIGHT || outside {
            let x = p.x.clamp(0.0, size);
            let z = p.z.clamp(0.0, size);
            self.position = Vec3::new(x, terrain.height(x, z)? + 1.0, z);
            log::debug!("WalkTarget: re-snapped to terrain at ({:.1}, {:.1})", x, z);
        }
        Ok(())
    }

    fn redraw_direction<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let x = rng.gen_range(-1.0_f32..1.0);
        let z = rng.gen_range(-1.0_f32..1.0);
        self.direction = Vec3::new(x, 0.0, z).try_normalize().unwrap_or(Vec3::Z);
        let max_seconds = self.config.max_seconds_in_one_direction.max(2);
        self.direction_remaining = rng.gen_range(1..max_seconds) as f32;
    }

    /// Whether any body of the creature is within the touch radius
    pub fn is_touched(&self, snapshot: &CreatureSnapshot) -> bool {
        let radius = self.config.touch_radius;
        std::iter::once(&snapshot.root)
            .chain(snapshot.parts.iter())
            .any(|body| body.position.distance(self.position) <= radius)
    }
}
