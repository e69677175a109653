//! Episode controller
//!
//! Drives one arena through `Uninitialized -> Ready -> Running -> (Resetting -> Running)*`.
//! Every call to [`EpisodeController::step`] runs, in order:
//!
//! 1. optional perturbation, then one physics step
//! 2. ground contact processing (penalties, forbidden contacts)
//! 3. out-of-bounds check
//! 4. goal roaming and waypoint planning
//! 5. reference frame update and, on decision steps, observation, policy and joint drives
//! 6. reward, goal touch and step limit
//!
//! A termination stops the step where it is detected. The arena is reset before
//! `step` returns, so the next step always starts a clean episode.

use std::f32::consts::{FRAC_PI_2, PI};
use std::time::{Duration, Instant};

use glam::{Quat, Vec3};
use rand::Rng;
use rand_xoshiro::Xoshiro256StarStar;
use serde::{Deserialize, Serialize};
use strider_creature::{
    Creature, CreatureError, CreatureSnapshot, GroundContactMonitor, JointDriveController,
    ObservationAssembler, ObservationContext, OrientationFrame, PhysicsBackend, PhysicsError,
    RewardContext, RewardShaper,
};
use strider_terrain::{HeightSampler, NavGrid, PathPlanner, PlanOutcome, Terrain, TerrainError};

use crate::arena::{ArenaDeps, ArenaId};
use crate::config::{EnvConfig, StartPose, MIN_WALKING_SPEED};
use crate::error::{ArenaError, StepFailure};
use crate::goal::{GoalReachedPolicy, WalkTarget};
use crate::policy::{DecisionRequest, Policy, PolicyError};
use crate::stats::{EpisodeRecord, EpisodeStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodePhase {
    Uninitialized,
    Ready,
    Running,
    Resetting,
}

/// Why an episode ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    OutOfBounds { height: f32 },
    ForbiddenContact { part: String },
    GoalReached,
    MaxSteps,
    Failed { reason: String },
}

impl Termination {
    pub fn kind(&self) -> &'static str {
        match self {
            Termination::OutOfBounds { .. } => "out_of_bounds",
            Termination::ForbiddenContact { .. } => "forbidden_contact",
            Termination::GoalReached => "goal_reached",
            Termination::MaxSteps => "max_steps",
            Termination::Failed { .. } => "failed",
        }
    }
}

/// Result of one step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub episode: u64,
    /// Step index within the episode, starting at 1
    pub step: u64,
    pub reward: f32,
    /// Set when this step ended the episode
    pub termination: Option<Termination>,
    /// Whether the policy was queried this step
    pub decided: bool,
}

struct Advance {
    reward: f32,
    termination: Option<Termination>,
    decided: bool,
}

impl Advance {
    fn end(reward: f32, termination: Termination, decided: bool) -> Self {
        Self {
            reward,
            termination: Some(termination),
            decided,
        }
    }
}

pub struct EpisodeController<B: PhysicsBackend> {
    id: ArenaId,
    config: EnvConfig,
    phase: EpisodePhase,

    terrain: Terrain,
    navigation: Option<NavGrid>,
    planner: PathPlanner,
    backend: B,
    policy: Box<dyn Policy>,
    rng: Xoshiro256StarStar,

    creature: Creature,
    drive: JointDriveController,
    contacts: GroundContactMonitor,
    observer: ObservationAssembler,
    shaper: RewardShaper,
    frame: OrientationFrame,
    goal: WalkTarget,

    target_speed: f32,
    episode: u64,
    episode_step: u64,
    episode_return: f32,
    since_perturbation: f32,
    waypoint: Vec3,
    last_action: Option<Vec<f32>>,
    last_observation: Vec<f32>,
    stats: EpisodeStats,
}

impl<B: PhysicsBackend> EpisodeController<B> {
    /// Validate the configuration and spawn the creature.
    ///
    /// Layout errors (declared action or observation size, missing body part
    /// categories) are reported here and never at step time.
    pub fn new(id: ArenaId, config: &EnvConfig, deps: ArenaDeps<B>) -> Result<Self, ArenaError> {
        let mut config = config.clone();
        config.validate()?;

        let ArenaDeps {
            terrain,
            mut planner,
            mut backend,
            policy,
            rng,
        } = deps;

        let skeleton = config.creature.skeleton.load()?;
        let start = config.creature.start;
        let creature = Creature::spawn(
            &skeleton,
            &mut backend,
            Vec3::new(start.x, config.creature.clearance, start.y),
            Quat::IDENTITY,
        )?;
        if let Some(declared) = config.creature.declared_action_size {
            if declared != creature.action_size() {
                return Err(CreatureError::ActionSizeMismatch {
                    declared,
                    computed: creature.action_size(),
                }
                .into());
            }
        }
        let observer = ObservationAssembler::new(config.observation.clone(), &creature)?;
        let shaper = RewardShaper::new(config.reward.clone(), &creature)?;
        planner.set_lift(config.navigation.lift_factor * creature.root().rest_height);

        Ok(Self {
            id,
            phase: EpisodePhase::Uninitialized,
            terrain,
            navigation: None,
            planner,
            backend,
            policy,
            rng,
            drive: JointDriveController::new(config.drive.clone()),
            contacts: GroundContactMonitor::new(&config.contact),
            observer,
            shaper,
            frame: OrientationFrame::default(),
            goal: WalkTarget::new(config.goal.clone()),
            target_speed: config.walking.target_speed,
            episode: 0,
            episode_step: 0,
            episode_return: 0.0,
            since_perturbation: 0.0,
            waypoint: Vec3::ZERO,
            last_action: None,
            last_observation: Vec::new(),
            stats: EpisodeStats::new(config.arena.history),
            creature,
            config,
        })
    }

    /// Generate the terrain if needed and load it into the physics backend
    pub fn initialize(&mut self) -> Result<(), ArenaError> {
        if self.phase != EpisodePhase::Uninitialized {
            return Ok(());
        }
        if !self.terrain.is_generated() {
            self.terrain.regenerate(&mut self.rng);
        }
        self.backend.sync_terrain(&self.terrain)?;
        if self.config.navigation.enabled {
            self.navigation = Some(NavGrid::build(
                &self.terrain,
                self.config.navigation.grid.clone(),
            )?);
        }
        self.goal.snap_to_terrain(&self.terrain)?;
        self.phase = EpisodePhase::Ready;

        log::info!(
            "Arena {}: ready with '{}' ({} parts, action size {}, observation size {}, policy {})",
            self.id,
            self.creature.name(),
            self.creature.parts().len(),
            self.creature.action_size(),
            self.observer.size(),
            self.policy.name()
        );
        Ok(())
    }

    /// Advance the arena by one physics step.
    ///
    /// Per-step failures end the episode with [`Termination::Failed`]. Only a
    /// failed reset, which would leave the creature in an inconsistent state,
    /// is returned as an error.
    pub fn step(&mut self) -> Result<StepOutcome, ArenaError> {
        match self.phase {
            EpisodePhase::Uninitialized => return Err(ArenaError::NotInitialized(self.id)),
            EpisodePhase::Ready | EpisodePhase::Resetting => self.reset()?,
            EpisodePhase::Running => {}
        }

        self.episode_step += 1;
        let episode = self.episode;
        let step = self.episode_step;

        let advance = match self.advance() {
            Ok(advance) => advance,
            Err(failure) => {
                log::warn!(
                    "Arena {}: step {} of episode {} failed: {}",
                    self.id,
                    step,
                    episode,
                    failure
                );
                Advance::end(
                    0.0,
                    Termination::Failed {
                        reason: failure.to_string(),
                    },
                    false,
                )
            }
        };
        self.episode_return += advance.reward;

        if let Some(termination) = &advance.termination {
            self.finish_episode(termination.clone());
            self.reset()?;
        }

        Ok(StepOutcome {
            episode,
            step,
            reward: advance.reward,
            termination: advance.termination,
            decided: advance.decided,
        })
    }

    fn reset(&mut self) -> Result<(), ArenaError> {
        self.begin_episode().map_err(|source| ArenaError::Reset {
            arena: self.id,
            source,
        })
    }

    fn begin_episode(&mut self) -> Result<(), StepFailure> {
        self.phase = EpisodePhase::Resetting;
        self.episode += 1;
        let episode = self.episode;

        // Terrain first: goal and creature placement sample it
        let terrain_every = self.config.regeneration.terrain_every;
        if terrain_every > 0 && episode % terrain_every == 0 {
            self.regenerate_terrain()?;
        }
        let goal_every = self.config.regeneration.goal_every;
        if goal_every > 0 && episode % goal_every == 0 {
            self.goal.place_randomly(&self.terrain, &mut self.rng)?;
            self.planner.reset();
        }

        self.place_creature()?;
        // Contacts from before the teleport are stale
        self.backend.drain_contact_events();

        let walking = &self.config.walking;
        self.target_speed = if walking.randomize_each_episode {
            let high = walking.max_speed.max(MIN_WALKING_SPEED);
            walking.clamp_speed(self.rng.gen_range(MIN_WALKING_SPEED..=high))
        } else {
            walking.clamp_speed(walking.target_speed)
        };

        self.episode_step = 0;
        self.episode_return = 0.0;
        self.since_perturbation = 0.0;
        self.last_action = None;
        self.last_observation.clear();
        self.planner.invalidate();

        let snapshot = self.creature.snapshot(&self.backend)?;
        let root = snapshot.root.position;
        let ground = self.terrain.height(root.x, root.z)?;
        self.waypoint = self.goal.position();
        self.frame.update(root, self.waypoint);
        self.shaper.begin_episode(&snapshot, ground);

        self.phase = EpisodePhase::Running;
        log::info!(
            "Arena {}: episode {} begins (target speed {:.2}, goal ({:.1}, {:.1}))",
            self.id,
            episode,
            self.target_speed,
            self.waypoint.x,
            self.waypoint.z
        );
        Ok(())
    }

    fn regenerate_terrain(&mut self) -> Result<(), StepFailure> {
        self.terrain.regenerate(&mut self.rng);
        self.backend.sync_terrain(&self.terrain)?;
        if self.navigation.is_some() {
            self.navigation = Some(NavGrid::build(
                &self.terrain,
                self.config.navigation.grid.clone(),
            )?);
        }
        self.planner.reset();
        self.goal.snap_to_terrain(&self.terrain)?;
        Ok(())
    }

    /// Put the creature at its start position on the terrain with zero velocity
    fn place_creature(&mut self) -> Result<(), StepFailure> {
        let config = &self.config.creature;
        let (x, z) = (config.start.x, config.start.y);
        let ground = self.terrain.height(x, z)?;

        let (height, rotation) = match config.start_pose {
            StartPose::Upright => {
                let yaw = jitter(&mut self.rng, config.yaw_jitter);
                let roll = jitter(&mut self.rng, config.roll_jitter);
                (
                    self.creature.root().rest_height + config.clearance,
                    Quat::from_rotation_y(yaw) * Quat::from_rotation_z(roll),
                )
            }
            StartPose::Lying => {
                let yaw = self.rng.gen_range(-PI..PI);
                let side = if self.rng.gen_bool(0.5) {
                    FRAC_PI_2
                } else {
                    -FRAC_PI_2
                };
                (
                    config.lying_height,
                    Quat::from_rotation_y(yaw) * Quat::from_rotation_z(side),
                )
            }
        };

        self.creature
            .reset_pose(&mut self.backend, Vec3::new(x, ground + height, z), rotation)?;
        Ok(())
    }

    fn advance(&mut self) -> Result<Advance, StepFailure> {
        let dt = self.config.arena.physics_dt;
        self.perturb(dt)?;
        self.backend.step(dt)?;

        let events = self.backend.drain_contact_events();
        let contact = self
            .contacts
            .process(&mut self.creature, &events, &self.terrain)?;
        let mut reward = contact.penalty;
        if let Some(part) = contact.forbidden_contact {
            return Ok(Advance::end(
                reward,
                Termination::ForbiddenContact { part },
                false,
            ));
        }

        let snapshot = self.creature.snapshot(&self.backend)?;
        let root = snapshot.root.position;
        if !snapshot.root.is_finite() {
            return Err(PhysicsError::NonFiniteState(self.creature.root().body).into());
        }
        if !self.config.bounds.contains(root.y) {
            log::debug!("Arena {}: root left the arena at height {:.2}", self.id, root.y);
            return Ok(Advance::end(
                reward,
                Termination::OutOfBounds { height: root.y },
                false,
            ));
        }

        self.goal.update(dt, &self.terrain, &mut self.rng)?;
        self.waypoint = self.steer(root, dt)?;
        self.frame.update(root, self.waypoint);
        let ground = self.terrain.height(root.x, root.z)?;

        let decided = (self.episode_step - 1) % self.config.arena.decision_period as u64 == 0;
        if decided {
            self.decide(&snapshot, ground)?;
        } else if self.config.arena.take_actions_between_decisions {
            if let Some(action) = &self.last_action {
                self.drive
                    .apply(&mut self.creature, &mut self.backend, action)?;
            }
        }

        // A non-finite term zeroes the whole step, contact penalty and goal bonus included
        let shaped = self.shaper.compute_checked(&RewardContext {
            creature: &self.creature,
            snapshot: &snapshot,
            frame: &self.frame,
            target_speed: self.target_speed,
            ground_height: ground,
        });
        match shaped {
            Some(shaped) => reward += shaped,
            None => reward = 0.0,
        }

        if self.goal.is_touched(&snapshot) {
            if shaped.is_some() {
                reward += self.goal.config().reached_bonus;
            }
            let on_reached = self.goal.config().on_reached;
            match on_reached {
                GoalReachedPolicy::EndEpisode => {
                    return Ok(Advance::end(reward, Termination::GoalReached, decided));
                }
                GoalReachedPolicy::Relocate => {
                    log::debug!("Arena {}: goal reached, relocating", self.id);
                    self.goal.place_randomly(&self.terrain, &mut self.rng)?;
                    self.planner.reset();
                }
            }
        }

        let max_steps = self.config.arena.max_steps;
        if max_steps > 0 && self.episode_step >= max_steps {
            return Ok(Advance::end(reward, Termination::MaxSteps, decided));
        }

        Ok(Advance {
            reward,
            termination: None,
            decided,
        })
    }

    /// Observation, policy query and joint drives of a decision step
    fn decide(&mut self, snapshot: &CreatureSnapshot, ground: f32) -> Result<(), StepFailure> {
        let observation = self.observer.build(&ObservationContext {
            creature: &self.creature,
            snapshot,
            frame: &self.frame,
            target_speed: self.target_speed,
            target: self.waypoint,
            ground_height: ground,
            max_force: self.drive.config().max_force,
        })?;
        let timeout = self
            .config
            .arena
            .decision_timeout
            .and_then(|secs| Duration::try_from_secs_f32(secs).ok());
        let asked = Instant::now();
        let action = self.policy.act(&DecisionRequest {
            arena: self.id,
            episode: self.episode,
            step: self.episode_step,
            observation: &observation,
            action_size: self.creature.action_size(),
            timeout,
        })?;
        if let Some(timeout) = timeout {
            let waited = asked.elapsed();
            if waited > timeout {
                log::warn!(
                    "Arena {}: policy '{}' answered after {:?} (timeout {:?})",
                    self.id,
                    self.policy.name(),
                    waited,
                    timeout
                );
                return Err(PolicyError::Timeout.into());
            }
        }
        self.drive
            .apply(&mut self.creature, &mut self.backend, &action)?;
        self.last_action = Some(action);
        self.last_observation = observation;
        Ok(())
    }

    /// Steering target: the next path waypoint with navigation, the goal without
    fn steer(&mut self, position: Vec3, dt: f32) -> Result<Vec3, TerrainError> {
        let goal = self.goal.position();
        let Some(navigation) = &self.navigation else {
            return Ok(goal);
        };
        navigation.ensure_fresh(&self.terrain)?;
        let waypoint = self
            .planner
            .next_waypoint(navigation, position, goal, dt)?;

        if self.planner.last_outcome() == PlanOutcome::Unreachable
            && self.config.navigation.relocate_unreachable_goal
        {
            log::debug!("Arena {}: goal unreachable, relocating", self.id);
            self.goal.place_randomly(&self.terrain, &mut self.rng)?;
            self.planner.reset();
        }
        Ok(waypoint)
    }

    /// Random upward kick on a random body part
    fn perturb(&mut self, dt: f32) -> Result<(), PhysicsError> {
        let config = &self.config.perturbation;
        if !config.enabled || self.creature.parts().is_empty() {
            return Ok(());
        }
        self.since_perturbation += dt;
        if self.since_perturbation < config.min_interval
            || !self.rng.gen_bool(config.probability as f64)
        {
            return Ok(());
        }
        let index = self.rng.gen_range(0..self.creature.parts().len());
        let part = &self.creature.parts()[index];
        self.backend
            .apply_impulse(part.body, Vec3::Y * config.impulse)?;
        self.since_perturbation = 0.0;
        log::debug!("Arena {}: kicked '{}'", self.id, part.name);
        Ok(())
    }

    fn finish_episode(&mut self, termination: Termination) {
        log::info!(
            "Arena {}: episode {} ended after {} steps with return {:.3} ({})",
            self.id,
            self.episode,
            self.episode_step,
            self.episode_return,
            termination.kind()
        );
        self.stats.record(EpisodeRecord {
            arena: self.id,
            episode: self.episode,
            steps: self.episode_step,
            total_reward: self.episode_return,
            termination,
        });
        self.phase = EpisodePhase::Resetting;
    }

    pub fn id(&self) -> ArenaId {
        self.id
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn phase(&self) -> EpisodePhase {
        self.phase
    }

    /// Current episode number, 0 before the first episode began
    pub fn episode(&self) -> u64 {
        self.episode
    }

    pub fn episode_step(&self) -> u64 {
        self.episode_step
    }

    pub fn episode_return(&self) -> f32 {
        self.episode_return
    }

    pub fn target_speed(&self) -> f32 {
        self.target_speed
    }

    pub fn creature(&self) -> &Creature {
        &self.creature
    }

    pub fn terrain(&self) -> &Terrain {
        &self.terrain
    }

    pub fn goal(&self) -> &WalkTarget {
        &self.goal
    }

    pub fn waypoint(&self) -> Vec3 {
        self.waypoint
    }

    pub fn planner(&self) -> &PathPlanner {
        &self.planner
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn stats(&self) -> &EpisodeStats {
        &self.stats
    }

    /// Observation of the last decision step
    pub fn last_observation(&self) -> &[f32] {
        &self.last_observation
    }

    pub fn observation_size(&self) -> usize {
        self.observer.size()
    }

    pub fn action_size(&self) -> usize {
        self.creature.action_size()
    }

    pub fn snapshot(&self) -> Result<CreatureSnapshot, PhysicsError> {
        self.creature.snapshot(&self.backend)
    }

    /// Move the goal to `(x, z)` on the terrain
    pub fn place_goal(&mut self, x: f32, z: f32) -> Result<(), TerrainError> {
        self.goal.set_position(&self.terrain, x, z)?;
        self.planner.reset();
        Ok(())
    }

    /// Shift the whole creature, e.g. to push it out of the arena
    pub fn displace_creature(&mut self, offset: Vec3) -> Result<(), PhysicsError> {
        self.creature.translate(&mut self.backend, offset)
    }
}

/// Uniform angle in `[-degrees, degrees]`, in radians
fn jitter<R: Rng + ?Sized>(rng: &mut R, degrees: f32) -> f32 {
    if degrees <= 0.0 {
        return 0.0;
    }
    rng.gen_range(-degrees..=degrees).to_radians()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ConstantPolicy;
    use rand::SeedableRng;
    use strider_creature::SimplePhysics;

    fn flat_config() -> EnvConfig {
        let mut config = EnvConfig::default();
        config.arena.count = 1;
        config.terrain.generate_heights = false;
        config.creature.yaw_jitter = 0.0;
        config.creature.roll_jitter = 0.0;
        config
    }

    fn controller(config: &EnvConfig) -> EpisodeController<SimplePhysics> {
        let deps = ArenaDeps::standard(
            config,
            0,
            SimplePhysics::new(config.physics.clone()),
            Box::new(ConstantPolicy::zero()),
        )
        .unwrap();
        EpisodeController::new(ArenaId(0), config, deps).unwrap()
    }

    #[test]
    fn test_phase_transitions() {
        let config = flat_config();
        let mut arena = controller(&config);
        assert_eq!(arena.phase(), EpisodePhase::Uninitialized);
        assert!(matches!(arena.step(), Err(ArenaError::NotInitialized(_))));

        arena.initialize().unwrap();
        assert_eq!(arena.phase(), EpisodePhase::Ready);
        assert!(arena.terrain().is_generated());

        let outcome = arena.step().unwrap();
        assert_eq!(arena.phase(), EpisodePhase::Running);
        assert_eq!((outcome.episode, outcome.step), (1, 1));
        assert!(outcome.decided);
    }

    #[test]
    fn test_upright_start_height() {
        let config = flat_config();
        let mut arena = controller(&config);
        arena.initialize().unwrap();
        arena.begin_episode().unwrap();
        let snapshot = arena.snapshot().unwrap();
        let expected = arena.creature().root().rest_height + config.creature.clearance;
        assert!((snapshot.root.position.y - expected).abs() < 1e-5);
        assert_eq!(snapshot.root.rotation, Quat::IDENTITY);
    }

    #[test]
    fn test_lying_start_pose() {
        let mut config = flat_config();
        config.creature.start_pose = StartPose::Lying;
        let mut arena = controller(&config);
        arena.initialize().unwrap();
        arena.begin_episode().unwrap();
        let snapshot = arena.snapshot().unwrap();
        assert!((snapshot.root.position.y - 0.3).abs() < 1e-5);
        assert!(snapshot.root.up().y.abs() < 1e-4);
    }

    #[test]
    fn test_declared_action_size_mismatch_is_fatal() {
        let mut config = flat_config();
        config.creature.declared_action_size = Some(12);
        let deps = ArenaDeps::standard(
            &config,
            0,
            SimplePhysics::default(),
            Box::new(ConstantPolicy::zero()),
        )
        .unwrap();
        let result = EpisodeController::new(ArenaId(0), &config, deps);
        assert!(matches!(
            result,
            Err(ArenaError::Creature(CreatureError::ActionSizeMismatch {
                declared: 12,
                computed: 31
            }))
        ));
    }

    #[test]
    fn test_jitter_bounds() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(3);
        assert_eq!(jitter(&mut rng, 0.0), 0.0);
        for _ in 0..100 {
            assert!(jitter(&mut rng, 5.0).abs() <= 5.0_f32.to_radians() + 1e-6);
        }
    }

    #[test]
    fn test_termination_kinds() {
        assert_eq!(Termination::MaxSteps.kind(), "max_steps");
        assert_eq!(
            Termination::ForbiddenContact {
                part: "head".to_string()
            }
            .kind(),
            "forbidden_contact"
        );
    }
}
