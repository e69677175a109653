//! Observation vector assembly
//!
//! Layout, in order:
//! - distance between desired and actual average velocity (1)
//! - average velocity in the reference frame (3)
//! - desired velocity in the reference frame (3)
//! - rotation from root forward to reference forward (4)
//! - steering target in the reference frame (3)
//! - per body part: ground contact flag (1), linear and angular velocity (3 + 3)
//!   and position relative to the root (3) in the reference frame; except for
//!   hands the local rotation (4) and normalized strength (1); for heads the
//!   rotation from head forward to reference forward (4, optional); the part's
//!   up vector in the reference frame (3, extended only)
//! - extended only: root height above ground (1) and centre of mass relative to
//!   the root in the reference frame (3)
//!
//! Quaternions are emitted as `x, y, z, w`.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::creature::{Creature, CreatureSnapshot};
use crate::error::CreatureError;
use crate::frame::{from_to_rotation, OrientationFrame};
use crate::types::BodyCategory;

const GLOBAL_FEATURES: usize = 1 + 3 + 3 + 4 + 3;
const PART_KINEMATICS: usize = 1 + 3 + 3 + 3;
const PART_POSE: usize = 4 + 1;
const HEAD_ROTATION: usize = 4;
const PART_UP: usize = 3;
const EXTENDED_TRAILER: usize = 1 + 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationConfig {
    /// Size the policy expects; checked against the computed layout at setup
    pub declared_size: Option<usize>,
    pub head_rotation: bool,
    pub extended: bool,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            declared_size: None,
            head_rotation: true,
            extended: false,
        }
    }
}

/// Everything an observation is built from, captured for one step
pub struct ObservationContext<'a> {
    pub creature: &'a Creature,
    pub snapshot: &'a CreatureSnapshot,
    pub frame: &'a OrientationFrame,
    pub target_speed: f32,
    /// Steering target (waypoint or goal)
    pub target: Vec3,
    /// Terrain height below the root
    pub ground_height: f32,
    /// Maximum joint force, used to normalize strengths
    pub max_force: f32,
}

#[derive(Debug, Clone)]
pub struct ObservationAssembler {
    config: ObservationConfig,
    size: usize,
}

impl ObservationAssembler {
    /// Compute the layout for `creature` and check it against the declared size
    pub fn new(config: ObservationConfig, creature: &Creature) -> Result<Self, CreatureError> {
        let size = Self::layout_size(&config, creature);
        if let Some(declared) = config.declared_size {
            if declared != size {
                return Err(CreatureError::ObservationSizeMismatch {
                    declared,
                    computed: size,
                });
            }
        }
        Ok(Self { config, size })
    }

    pub fn layout_size(config: &ObservationConfig, creature: &Creature) -> usize {
        let per_part: usize = creature
            .parts()
            .iter()
            .map(|part| {
                let mut n = PART_KINEMATICS;
                if part.category != BodyCategory::Hand {
                    n += PART_POSE;
                }
                if config.head_rotation && part.category == BodyCategory::Head {
                    n += HEAD_ROTATION;
                }
                if config.extended {
                    n += PART_UP;
                }
                n
            })
            .sum();
        let trailer = if config.extended { EXTENDED_TRAILER } else { 0 };
        GLOBAL_FEATURES + per_part + trailer
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Build the observation vector. Non-finite entries are replaced by zero.
    pub fn build(&self, ctx: &ObservationContext<'_>) -> Result<Vec<f32>, CreatureError> {
        let mut out = Vec::with_capacity(self.size);
        let frame = ctx.frame;
        let forward = frame.forward();
        let root = &ctx.snapshot.root;

        let velocity_goal = forward * ctx.target_speed;
        let average = ctx.snapshot.average_velocity();
        out.push(velocity_goal.distance(average));
        push_vec(&mut out, frame.inverse_transform_direction(average));
        push_vec(&mut out, frame.inverse_transform_direction(velocity_goal));
        push_quat(&mut out, from_to_rotation(root.forward(), forward));
        push_vec(&mut out, frame.inverse_transform_point(ctx.target));

        for (i, part) in ctx.creature.parts().iter().enumerate() {
            let state = &ctx.snapshot.parts[i];
            out.push(if part.contact.is_touching() { 1.0 } else { 0.0 });
            push_vec(&mut out, frame.inverse_transform_direction(state.linvel));
            push_vec(&mut out, frame.inverse_transform_direction(state.angvel));
            push_vec(
                &mut out,
                frame.inverse_transform_direction(state.position - root.position),
            );
            if part.category != BodyCategory::Hand {
                push_quat(&mut out, ctx.snapshot.local_rotation(ctx.creature, i));
                out.push(if ctx.max_force > 0.0 {
                    part.current_strength / ctx.max_force
                } else {
                    0.0
                });
            }
            if self.config.head_rotation && part.category == BodyCategory::Head {
                push_quat(&mut out, from_to_rotation(state.forward(), forward));
            }
            if self.config.extended {
                push_vec(&mut out, frame.inverse_transform_direction(state.up()));
            }
        }

        if self.config.extended {
            out.push(root.position.y - ctx.ground_height);
            let com = ctx.creature.center_of_mass(ctx.snapshot);
            push_vec(&mut out, frame.inverse_transform_direction(com - root.position));
        }

        if out.len() != self.size {
            return Err(CreatureError::ObservationSizeMismatch {
                declared: self.size,
                computed: out.len(),
            });
        }

        let mut replaced = 0;
        for value in &mut out {
            if !value.is_finite() {
                *value = 0.0;
                replaced += 1;
            }
        }
        if replaced > 0 {
            log::error!(
                "Observation: replaced {} non-finite values with 0 for '{}'",
                replaced,
                ctx.creature.name()
            );
        }

        Ok(out)
    }
}

fn push_vec(out: &mut Vec<f32>, v: Vec3) {
    out.extend_from_slice(&[v.x, v.y, v.z]);
}

fn push_quat(out: &mut Vec<f32>, q: Quat) {
    out.extend_from_slice(&[q.x, q.y, q.z, q.w]);
}
