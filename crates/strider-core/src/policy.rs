//! Policy boundary
//!
//! The policy is an external collaborator: it receives an observation and must
//! answer with an action vector before the arena can continue. A policy that
//! times out or is cancelled fails the step, which ends the episode. When the
//! arena has a decision timeout, an answer arriving after it is discarded as a
//! timeout as well.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use thiserror::Error;

use crate::arena::ArenaId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("policy did not answer in time")]
    Timeout,

    #[error("decision was cancelled")]
    Cancelled,

    #[error("policy backend failed: {0}")]
    Backend(String),
}

/// One decision the arena waits on
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub arena: ArenaId,
    pub episode: u64,
    pub step: u64,
    pub observation: &'a [f32],
    pub action_size: usize,
    /// Time the arena waits for the answer, if bounded
    pub timeout: Option<Duration>,
}

pub trait Policy: Send {
    fn name(&self) -> &str;

    /// Answer with an action vector of `request.action_size` values.
    ///
    /// Policies backed by a remote or batched service should give up with
    /// [`PolicyError::Timeout`] once `request.timeout` has passed.
    fn act(&mut self, request: &DecisionRequest<'_>) -> Result<Vec<f32>, PolicyError>;
}

/// Uniform actions in `[-1, 1]`
pub struct RandomPolicy {
    rng: Xoshiro256StarStar,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Xoshiro256StarStar::seed_from_u64(seed),
        }
    }
}

impl Policy for RandomPolicy {
    fn name(&self) -> &str {
        "random"
    }

    fn act(&mut self, request: &DecisionRequest<'_>) -> Result<Vec<f32>, PolicyError> {
        Ok((0..request.action_size)
            .map(|_| self.rng.gen_range(-1.0..=1.0))
            .collect())
    }
}

/// The same value for every action scalar
pub struct ConstantPolicy {
    value: f32,
}

impl ConstantPolicy {
    pub fn new(value: f32) -> Self {
        Self { value }
    }

    /// Joints at mid range, half strength
    pub fn zero() -> Self {
        Self::new(0.0)
    }
}

impl Policy for ConstantPolicy {
    fn name(&self) -> &str {
        "constant"
    }

    fn act(&mut self, request: &DecisionRequest<'_>) -> Result<Vec<f32>, PolicyError> {
        Ok(vec![self.value; request.action_size])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(observation: &[f32]) -> DecisionRequest<'_> {
        DecisionRequest {
            arena: ArenaId(0),
            episode: 1,
            step: 1,
            observation,
            action_size: 31,
            timeout: None,
        }
    }

    #[test]
    fn test_random_policy_in_range_and_seeded() {
        let obs = [0.0; 4];
        let mut a = RandomPolicy::new(7);
        let mut b = RandomPolicy::new(7);
        let first = a.act(&request(&obs)).unwrap();
        assert_eq!(first.len(), 31);
        assert!(first.iter().all(|v| (-1.0..=1.0).contains(v)));
        assert_eq!(first, b.act(&request(&obs)).unwrap());
    }

    #[test]
    fn test_constant_policy() {
        let obs = [0.0; 4];
        let actions = ConstantPolicy::new(0.5).act(&request(&obs)).unwrap();
        assert!(actions.iter().all(|v| *v == 0.5));
        assert_eq!(ConstantPolicy::zero().name(), "constant");
    }
}
