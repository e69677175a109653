//! Creature setup and actuation errors

use thiserror::Error;

use crate::physics::{BodyHandle, JointHandle};
use crate::types::BodyCategory;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PhysicsError {
    #[error("unknown body {0:?}")]
    UnknownBody(BodyHandle),

    #[error("unknown joint {0:?}")]
    UnknownJoint(JointHandle),

    #[error("body {0:?} has a non-finite state")]
    NonFiniteState(BodyHandle),

    #[error("invalid body description: {0}")]
    InvalidDescription(String),
}

/// Configuration errors raised while building a creature.
///
/// These are fatal: a creature with a mismatched action or observation layout
/// must never be simulated.
#[derive(Debug, Error)]
pub enum CreatureError {
    #[error("skeleton has no bones")]
    EmptySkeleton,

    #[error("skeleton has no root bone")]
    MissingRoot,

    #[error("skeleton has more than one root bone ({first} and {second})")]
    MultipleRoots { first: String, second: String },

    #[error("bone `{bone}` references unknown or later parent `{parent}`")]
    InvalidParent { bone: String, parent: String },

    #[error("invalid bone `{bone}`: {reason}")]
    InvalidBone { bone: String, reason: String },

    #[error("{required_by} requires a body part of category {category}")]
    MissingCategory {
        category: BodyCategory,
        required_by: &'static str,
    },

    #[error("observation size mismatch: declared {declared}, computed {computed}")]
    ObservationSizeMismatch { declared: usize, computed: usize },

    #[error("action size mismatch: declared {declared}, computed {computed}")]
    ActionSizeMismatch { declared: usize, computed: usize },

    #[error("physics backend rejected creature: {0}")]
    Physics(#[from] PhysicsError),

    #[error("failed to load skeleton: {0}")]
    Skeleton(String),
}

/// Per-step actuation failures. Any of these ends the current episode.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriveError {
    #[error("action size mismatch: expected {expected}, got {actual}")]
    ActionSizeMismatch { expected: usize, actual: usize },

    #[error("non-finite action value at index {index}")]
    NonFiniteAction { index: usize },

    #[error(transparent)]
    Physics(#[from] PhysicsError),
}
