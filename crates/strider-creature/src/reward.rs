//! Step reward shaping
//!
//! A creature profile selects a list of [`RewardTerm`]s. Multiplicative terms
//! are factors in `[0, 1]` whose product forms the core reward; additive terms
//! are bonuses and penalties summed on top of it.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::creature::{Creature, CreatureSnapshot};
use crate::error::CreatureError;
use crate::frame::OrientationFrame;
use crate::physics::BodyState;
use crate::types::BodyCategory;

/// Body axis compared against the reference forward by [`RewardTerm::Heading`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HeadingSource {
    #[default]
    RootForward,
    RootUp,
    Head,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RewardTerm {
    /// Match between average body velocity and the desired velocity
    VelocityMatch,
    /// `(dot(reference forward, body axis) + 1) / 2`
    Heading {
        #[serde(default)]
        source: HeadingSource,
    },
    /// Head height over the standing head height, clamped to `[0, 1]`
    HeadHeight,
    /// Torso tilt from vertical, 1 when upright and 0 at `max_angle` degrees
    Uprightness { max_angle: f32 },
    /// 1 while any foot touches the ground
    FootContact,
    /// Reward for raising the head towards standing height
    StandUp { band: f32, lowering_penalty: f32 },
    /// Reward for bringing root height and tilt back to the standing pose
    RootRecovery {
        base: f32,
        height_band: f32,
        rotation_band: f32,
    },
    /// Constant per step bonus
    Alive { bonus: f32 },
}

impl RewardTerm {
    pub fn stand_up() -> Self {
        RewardTerm::StandUp {
            band: 0.25,
            lowering_penalty: -0.1,
        }
    }

    pub fn root_recovery() -> Self {
        RewardTerm::RootRecovery {
            base: 0.2,
            height_band: 0.125,
            rotation_band: 0.4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RewardTerm::VelocityMatch => "VelocityMatch",
            RewardTerm::Heading { .. } => "Heading",
            RewardTerm::HeadHeight => "HeadHeight",
            RewardTerm::Uprightness { .. } => "Uprightness",
            RewardTerm::FootContact => "FootContact",
            RewardTerm::StandUp { .. } => "StandUp",
            RewardTerm::RootRecovery { .. } => "RootRecovery",
            RewardTerm::Alive { .. } => "Alive",
        }
    }

    pub fn is_multiplicative(&self) -> bool {
        matches!(
            self,
            RewardTerm::VelocityMatch
                | RewardTerm::Heading { .. }
                | RewardTerm::HeadHeight
                | RewardTerm::Uprightness { .. }
                | RewardTerm::FootContact
        )
    }

    /// Category a creature must have for this term to be computable
    fn required_category(&self) -> Option<BodyCategory> {
        match self {
            RewardTerm::Heading {
                source: HeadingSource::Head,
            }
            | RewardTerm::HeadHeight
            | RewardTerm::StandUp { .. } => Some(BodyCategory::Head),
            RewardTerm::Uprightness { .. } => Some(BodyCategory::Torso),
            RewardTerm::FootContact => Some(BodyCategory::Foot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub terms: Vec<RewardTerm>,
    /// Lower bound applied to every multiplicative factor
    pub factor_floor: Option<f32>,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            terms: vec![
                RewardTerm::VelocityMatch,
                RewardTerm::Heading {
                    source: HeadingSource::RootForward,
                },
            ],
            factor_floor: None,
        }
    }
}

/// Declining quartic from 1 at a perfect match to 0 at a deviation of `v_max` or more
pub fn velocity_match(actual: Vec3, goal: Vec3, v_max: f32) -> f32 {
    let deviation = actual.distance(goal);
    if v_max <= 0.0 {
        return if deviation == 0.0 { 1.0 } else { 0.0 };
    }
    let ratio = deviation.clamp(0.0, v_max) / v_max;
    (1.0 - ratio * ratio).powi(2)
}

/// `(dot(a, b) + 1) / 2` for unit vectors
pub fn heading_alignment(reference_forward: Vec3, axis: Vec3) -> f32 {
    (reference_forward.dot(axis.normalize_or_zero()) + 1.0) * 0.5
}

/// Per-step inputs of the reward
pub struct RewardContext<'a> {
    pub creature: &'a Creature,
    pub snapshot: &'a CreatureSnapshot,
    pub frame: &'a OrientationFrame,
    pub target_speed: f32,
    /// Terrain height below the root
    pub ground_height: f32,
}

#[derive(Debug, Clone, Default)]
struct EpisodeMemory {
    last_head_height: f32,
    max_head_height: f32,
    min_height_diff: f32,
    min_rotation_diff: f32,
}

#[derive(Debug, Clone)]
pub struct RewardShaper {
    terms: Vec<RewardTerm>,
    factor_floor: Option<f32>,
    head: Option<usize>,
    torso: Option<usize>,
    standing_head_height: f32,
    standing_root_height: f32,
    memory: EpisodeMemory,
}

impl RewardShaper {
    /// Check that `creature` has every category the configured terms read
    pub fn new(config: RewardConfig, creature: &Creature) -> Result<Self, CreatureError> {
        for term in &config.terms {
            if let Some(category) = term.required_category() {
                if !creature.has_category(category) {
                    return Err(CreatureError::MissingCategory {
                        category,
                        required_by: term.name(),
                    });
                }
            }
        }

        let find = |category| creature.parts().iter().position(|p| p.category == category);
        let head = find(BodyCategory::Head);
        let torso = find(BodyCategory::Torso);
        let root_height = creature.root().rest_height;
        let standing_head_height =
            root_height + head.map_or(0.0, |i| creature.parts()[i].rest_height);

        Ok(Self {
            terms: config.terms,
            factor_floor: config.factor_floor,
            head,
            torso,
            standing_head_height,
            standing_root_height: root_height,
            memory: EpisodeMemory::default(),
        })
    }

    pub fn terms(&self) -> &[RewardTerm] {
        &self.terms
    }

    pub fn standing_head_height(&self) -> f32 {
        self.standing_head_height
    }

    /// Capture the reference values of the stateful terms from the start pose
    pub fn begin_episode(&mut self, snapshot: &CreatureSnapshot, ground_height: f32) {
        let head_height = self.head_height(snapshot, ground_height);
        self.memory = EpisodeMemory {
            last_head_height: head_height,
            max_head_height: head_height,
            min_height_diff: self.root_height_diff(snapshot, ground_height),
            min_rotation_diff: root_tilt(&snapshot.root),
        };
    }

    /// Step reward. A non-finite term is logged and the step reward becomes 0.
    pub fn compute(&mut self, ctx: &RewardContext<'_>) -> f32 {
        self.compute_checked(ctx).unwrap_or(0.0)
    }

    /// Step reward, or `None` after logging a non-finite term
    pub fn compute_checked(&mut self, ctx: &RewardContext<'_>) -> Option<f32> {
        let mut product = 1.0;
        let mut has_factor = false;
        let mut sum = 0.0;

        for i in 0..self.terms.len() {
            let term = self.terms[i].clone();
            let value = self.evaluate(&term, ctx);
            if !value.is_finite() {
                log::error!(
                    "RewardShaper: term {} produced {} for '{}', reporting 0",
                    term.name(),
                    value,
                    ctx.creature.name()
                );
                return None;
            }
            if term.is_multiplicative() {
                has_factor = true;
                product *= match self.factor_floor {
                    Some(floor) => value.max(floor),
                    None => value,
                };
            } else {
                sum += value;
            }
        }

        let core = if has_factor { product } else { 0.0 };
        Some(core + sum)
    }

    fn evaluate(&mut self, term: &RewardTerm, ctx: &RewardContext<'_>) -> f32 {
        let snapshot = ctx.snapshot;
        let forward = ctx.frame.forward();
        match *term {
            RewardTerm::VelocityMatch => velocity_match(
                snapshot.average_velocity(),
                forward * ctx.target_speed,
                ctx.target_speed,
            ),
            RewardTerm::Heading { source } => {
                let axis = match source {
                    HeadingSource::RootForward => snapshot.root.forward(),
                    HeadingSource::RootUp => snapshot.root.up(),
                    HeadingSource::Head => self.part_state(snapshot, self.head).forward(),
                };
                heading_alignment(forward, axis)
            }
            RewardTerm::HeadHeight => {
                let height = self.head_height(snapshot, ctx.ground_height);
                (height / self.standing_head_height).clamp(0.0, 1.0)
            }
            RewardTerm::Uprightness { max_angle } => {
                let tilt = self.part_state(snapshot, self.torso).up().angle_between(Vec3::Y);
                (1.0 - tilt / max_angle.to_radians()).clamp(0.0, 1.0)
            }
            RewardTerm::FootContact => {
                let touching = ctx
                    .creature
                    .parts()
                    .iter()
                    .any(|p| p.category == BodyCategory::Foot && p.contact.is_touching());
                if touching {
                    1.0
                } else {
                    0.0
                }
            }
            RewardTerm::StandUp {
                band,
                lowering_penalty,
            } => {
                let height = self.head_height(snapshot, ctx.ground_height);
                let standing = self.standing_head_height;
                let near_standing = (standing - height).abs() < band;
                let memory = &mut self.memory;
                let value = if height > memory.max_head_height || near_standing {
                    memory.max_head_height = height;
                    (height / standing).clamp(0.0, 1.0).powi(2)
                } else if height < memory.last_head_height {
                    lowering_penalty
                } else {
                    0.0
                };
                memory.last_head_height = height;
                value
            }
            RewardTerm::RootRecovery {
                base,
                height_band,
                rotation_band,
            } => {
                let height_diff = self.root_height_diff(snapshot, ctx.ground_height);
                let rotation_diff = root_tilt(&snapshot.root);
                let memory = &mut self.memory;
                let mut value = 0.0;
                if height_diff < memory.min_height_diff || height_diff < height_band {
                    memory.min_height_diff = height_diff;
                    value += base.powf(height_diff).clamp(0.0, 1.0);
                }
                if rotation_diff < memory.min_rotation_diff || rotation_diff < rotation_band {
                    memory.min_rotation_diff = rotation_diff;
                    value += base.powf(rotation_diff).clamp(0.0, 1.0);
                }
                value
            }
            RewardTerm::Alive { bonus } => bonus,
        }
    }

    fn part_state<'s>(&self, snapshot: &'s CreatureSnapshot, index: Option<usize>) -> &'s BodyState {
        index
            .and_then(|i| snapshot.parts.get(i))
            .unwrap_or(&snapshot.root)
    }

    fn head_height(&self, snapshot: &CreatureSnapshot, ground_height: f32) -> f32 {
        self.part_state(snapshot, self.head).position.y - ground_height
    }

    fn root_height_diff(&self, snapshot: &CreatureSnapshot, ground_height: f32) -> f32 {
        (snapshot.root.position.y - ground_height - self.standing_root_height).abs()
    }
}

/// Angle in radians between the root's up axis and world up
fn root_tilt(root: &BodyState) -> f32 {
    root.up().angle_between(Vec3::Y)
}
