//! Arena registry
//!
//! Arenas are independent: each owns its terrain, planner, creature, physics
//! backend, policy and RNG. The registry only keeps them addressable by id and
//! in a stable order for parallel stepping.

use std::fmt;

use ahash::AHashMap;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use serde::{Deserialize, Serialize};
use strider_creature::PhysicsBackend;
use strider_terrain::{PathPlanner, Terrain};

use crate::config::EnvConfig;
use crate::episode::{EpisodeController, StepOutcome};
use crate::error::ArenaError;
use crate::policy::Policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArenaId(pub u32);

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Collaborators injected into one arena
pub struct ArenaDeps<B: PhysicsBackend> {
    pub terrain: Terrain,
    pub planner: PathPlanner,
    pub backend: B,
    pub policy: Box<dyn Policy>,
    pub rng: Xoshiro256StarStar,
}

impl<B: PhysicsBackend> ArenaDeps<B> {
    /// Standard collaborators for arena `index` of `config`
    pub fn standard(
        config: &EnvConfig,
        index: u32,
        backend: B,
        policy: Box<dyn Policy>,
    ) -> Result<Self, ArenaError> {
        Ok(Self {
            terrain: Terrain::new(config.terrain.clone())?,
            planner: PathPlanner::new(config.navigation.planner.clone(), 0.0),
            backend,
            policy,
            rng: Xoshiro256StarStar::seed_from_u64(
                config.arena.base_seed.wrapping_add(u64::from(index)),
            ),
        })
    }
}

pub struct ArenaRegistry<B: PhysicsBackend> {
    arenas: Vec<EpisodeController<B>>,
    index: AHashMap<ArenaId, usize>,
}

impl<B: PhysicsBackend> Default for ArenaRegistry<B> {
    fn default() -> Self {
        Self {
            arenas: Vec::new(),
            index: AHashMap::new(),
        }
    }
}

impl<B: PhysicsBackend> ArenaRegistry<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and initialize one arena per `config.arena.count`
    pub fn build<F>(config: &EnvConfig, mut deps: F) -> Result<Self, ArenaError>
    where
        F: FnMut(ArenaId) -> Result<ArenaDeps<B>, ArenaError>,
    {
        let mut registry = Self::new();
        for i in 0..config.arena.count as u32 {
            let id = ArenaId(i);
            let mut controller = EpisodeController::new(id, config, deps(id)?)?;
            controller.initialize()?;
            registry.insert(controller)?;
        }
        log::info!("ArenaRegistry: built {} arenas", registry.len());
        Ok(registry)
    }

    pub fn insert(&mut self, controller: EpisodeController<B>) -> Result<(), ArenaError> {
        let id = controller.id();
        if self.index.contains_key(&id) {
            return Err(ArenaError::DuplicateArena(id));
        }
        self.index.insert(id, self.arenas.len());
        self.arenas.push(controller);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.arenas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arenas.is_empty()
    }

    pub fn get(&self, id: ArenaId) -> Option<&EpisodeController<B>> {
        self.index.get(&id).map(|&i| &self.arenas[i])
    }

    pub fn get_mut(&mut self, id: ArenaId) -> Option<&mut EpisodeController<B>> {
        let i = *self.index.get(&id)?;
        self.arenas.get_mut(i)
    }

    /// Step a single arena
    pub fn step(&mut self, id: ArenaId) -> Result<StepOutcome, ArenaError> {
        self.get_mut(id)
            .ok_or(ArenaError::UnknownArena(id))?
            .step()
    }

    /// Arenas in insertion order
    pub fn controllers(&self) -> &[EpisodeController<B>] {
        &self.arenas
    }

    /// Arenas in insertion order, for stepping them in parallel
    pub fn controllers_mut(&mut self) -> &mut [EpisodeController<B>] {
        &mut self.arenas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ConstantPolicy;
    use rand::RngCore;
    use strider_creature::SimplePhysics;

    fn deps(config: &EnvConfig, index: u32) -> ArenaDeps<SimplePhysics> {
        ArenaDeps::standard(
            config,
            index,
            SimplePhysics::default(),
            Box::new(ConstantPolicy::zero()),
        )
        .unwrap()
    }

    #[test]
    fn test_seed_wraps_at_max() {
        let mut config = EnvConfig::default();
        config.arena.base_seed = u64::MAX;

        let mut last = deps(&config, 0);
        let mut wrapped = deps(&config, 1);
        assert_eq!(
            last.rng.next_u64(),
            Xoshiro256StarStar::seed_from_u64(u64::MAX).next_u64()
        );
        assert_eq!(
            wrapped.rng.next_u64(),
            Xoshiro256StarStar::seed_from_u64(0).next_u64()
        );
    }

    #[test]
    fn test_arena_id_display() {
        assert_eq!(ArenaId(3).to_string(), "#3");
    }
}
