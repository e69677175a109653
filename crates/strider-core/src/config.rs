//! Environment configuration
//!
//! One [`EnvConfig`] describes every arena of a run. All sections default to the
//! reference training setup, so a configuration file only lists what it changes.

use std::path::PathBuf;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use strider_creature::{
    ContactConfig, CreatureError, DriveConfig, ObservationConfig, RewardConfig,
    SimplePhysicsConfig, SkeletonDescription,
};
use strider_terrain::{NavGridConfig, PlannerConfig, TerrainConfig};

use crate::error::ConfigError;
use crate::goal::GoalConfig;

/// Lower bound of the target walking speed
pub const MIN_WALKING_SPEED: f32 = 0.1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub arena: ArenaConfig,
    pub terrain: TerrainConfig,
    pub regeneration: RegenerationConfig,
    pub navigation: NavigationConfig,
    pub physics: SimplePhysicsConfig,
    pub creature: CreatureConfig,
    pub drive: DriveConfig,
    pub walking: WalkingConfig,
    pub contact: ContactConfig,
    pub observation: ObservationConfig,
    pub reward: RewardConfig,
    pub goal: GoalConfig,
    pub bounds: BoundsConfig,
    pub perturbation: PerturbationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    pub count: usize,
    /// Arena `i` seeds its RNG with `base_seed + i`
    pub base_seed: u64,
    /// Fixed physics timestep in seconds
    pub physics_dt: f32,
    /// Physics steps per policy decision
    pub decision_period: u32,
    /// Re-apply the last action on steps between decisions
    pub take_actions_between_decisions: bool,
    /// Steps after which an episode ends, 0 for no limit
    pub max_steps: u64,
    /// Finished episodes kept per arena
    pub history: usize,
    /// Seconds a policy may take to answer a decision, `None` waits forever
    pub decision_timeout: Option<f32>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            count: 10,
            base_seed: 0,
            physics_dt: 0.02,
            decision_period: 5,
            take_actions_between_decisions: true,
            max_steps: 5000,
            history: 100,
            decision_timeout: None,
        }
    }
}

/// Episode cadences, 0 disables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegenerationConfig {
    pub terrain_every: u64,
    pub goal_every: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    pub enabled: bool,
    pub grid: NavGridConfig,
    pub planner: PlannerConfig,
    /// Waypoint height above the path as a multiple of the root's rest height
    pub lift_factor: f32,
    /// Move the goal when the planner reports it unreachable
    pub relocate_unreachable_goal: bool,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            grid: NavGridConfig::default(),
            planner: PlannerConfig::default(),
            lift_factor: 2.0,
            relocate_unreachable_goal: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SkeletonSource {
    #[default]
    Biped,
    Quadruped,
    File {
        path: PathBuf,
    },
}

impl SkeletonSource {
    pub fn load(&self) -> Result<SkeletonDescription, CreatureError> {
        match self {
            SkeletonSource::Biped => Ok(SkeletonDescription::biped()),
            SkeletonSource::Quadruped => Ok(SkeletonDescription::quadruped()),
            SkeletonSource::File { path } => SkeletonDescription::load(path),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartPose {
    #[default]
    Upright,
    /// Rolled onto its side, for stand-up training
    Lying,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CreatureConfig {
    pub skeleton: SkeletonSource,
    /// Start position on the terrain (x, z)
    pub start: Vec2,
    /// Extra height above the rest pose when placed on the terrain
    pub clearance: f32,
    /// Random yaw around the start rotation, degrees either way
    pub yaw_jitter: f32,
    /// Random roll around the start rotation, degrees either way
    pub roll_jitter: f32,
    pub start_pose: StartPose,
    /// Root height above the terrain in the lying pose
    pub lying_height: f32,
    /// Action size the policy was built for
    pub declared_action_size: Option<usize>,
}

impl Default for CreatureConfig {
    fn default() -> Self {
        Self {
            skeleton: SkeletonSource::Biped,
            start: Vec2::new(64.0, 48.0),
            clearance: 0.5,
            yaw_jitter: 180.0,
            roll_jitter: 5.0,
            start_pose: StartPose::Upright,
            lying_height: 0.3,
            declared_action_size: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkingConfig {
    pub target_speed: f32,
    pub max_speed: f32,
    /// Draw the target speed from `[0.1, max_speed]` at each episode begin
    pub randomize_each_episode: bool,
}

impl Default for WalkingConfig {
    fn default() -> Self {
        Self {
            target_speed: 10.0,
            max_speed: 10.0,
            randomize_each_episode: false,
        }
    }
}

impl WalkingConfig {
    pub fn clamp_speed(&self, speed: f32) -> f32 {
        speed.clamp(MIN_WALKING_SPEED, self.max_speed.max(MIN_WALKING_SPEED))
    }
}

/// Vertical band the root must stay in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsConfig {
    pub min_y: f32,
    pub max_y: f32,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            min_y: -10.0,
            max_y: 40.0,
        }
    }
}

impl BoundsConfig {
    pub fn contains(&self, y: f32) -> bool {
        y >= self.min_y && y <= self.max_y
    }
}

/// Random upward kicks for resilience training
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerturbationConfig {
    pub enabled: bool,
    /// Minimum seconds between two kicks
    pub min_interval: f32,
    /// Chance per step once the interval has passed
    pub probability: f32,
    pub impulse: f32,
}

impl Default for PerturbationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_interval: 15.0,
            probability: 0.004,
            impulse: 1500.0,
        }
    }
}

impl EnvConfig {
    /// Check the configuration and clamp the target walking speed into
    /// `[0.1, max_speed]`.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.arena.count == 0 {
            return Err(ConfigError::NoArenas);
        }
        if self.arena.decision_period == 0 {
            return Err(ConfigError::ZeroDecisionPeriod);
        }
        positive("arena.physics_dt", self.arena.physics_dt)?;
        positive("walking.max_speed", self.walking.max_speed)?;
        positive("walking.target_speed", self.walking.target_speed)?;
        positive("goal.touch_radius", self.goal.touch_radius)?;
        if let Some(timeout) = self.arena.decision_timeout {
            positive("arena.decision_timeout", timeout)?;
        }
        let bounds = &self.bounds;
        if bounds.min_y.is_nan() || bounds.max_y.is_nan() || bounds.min_y >= bounds.max_y {
            return Err(ConfigError::InvertedBounds {
                min: self.bounds.min_y,
                max: self.bounds.max_y,
            });
        }
        if !(0.0..=1.0).contains(&self.perturbation.probability) {
            return Err(ConfigError::OutOfRange {
                field: "perturbation.probability",
                value: self.perturbation.probability,
                min: 0.0,
                max: 1.0,
            });
        }
        for (field, value) in [
            ("creature.yaw_jitter", self.creature.yaw_jitter),
            ("creature.roll_jitter", self.creature.roll_jitter),
        ] {
            if !(0.0..=180.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    field,
                    value,
                    min: 0.0,
                    max: 180.0,
                });
            }
        }
        let half = self.terrain.size as f32 * 0.5;
        if !(0.0..half).contains(&self.goal.margin) {
            return Err(ConfigError::OutOfRange {
                field: "goal.margin",
                value: self.goal.margin,
                min: 0.0,
                max: half,
            });
        }
        self.terrain.validate()?;

        let clamped = self.walking.clamp_speed(self.walking.target_speed);
        if clamped != self.walking.target_speed {
            log::warn!(
                "EnvConfig: target walking speed {} clamped to {}",
                self.walking.target_speed,
                clamped
            );
            self.walking.target_speed = clamped;
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { field, value })
    }
}
