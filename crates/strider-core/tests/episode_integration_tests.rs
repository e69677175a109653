//! Integration tests for the episode controller
//!
//! The controller is driven through the physics backend trait, either with the
//! built-in integrator or with a scripted backend whose bodies never move and
//! whose contact events are fed in by the test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use glam::{Quat, Vec3};
use strider_core::{
    ArenaDeps, ArenaError, ArenaId, ArenaRegistry, DecisionRequest, EnvConfig, EpisodeController,
    EpisodePhase, GoalReachedPolicy, Policy, PolicyError, Termination,
};
use strider_creature::physics::{BodyDesc, JointDesc, JointDrive};
use strider_creature::{
    BodyCategory, BodyHandle, BodyState, ContactEvent, ContactPhase, JointHandle, PhysicsBackend,
    PhysicsError, SimplePhysics,
};
use strider_terrain::{HeightSampler, Terrain};

// ============================================================================
// Test doubles
// ============================================================================

/// Backend whose bodies stay where they are put
#[derive(Default)]
struct ScriptedBackend {
    bodies: Vec<BodyState>,
    drives: Vec<Option<JointDrive>>,
    steps: usize,
    script: Vec<(usize, ContactEvent)>,
    pending: Vec<ContactEvent>,
}

impl ScriptedBackend {
    /// Emit `event` during backend step number `step` (1-based)
    fn emit_at(&mut self, step: usize, event: ContactEvent) {
        self.script.push((step, event));
    }

    /// Give every body some motion, as a running episode would
    fn stir(&mut self) {
        for (i, state) in self.bodies.iter_mut().enumerate() {
            state.linvel = Vec3::new(1.0, -2.0, 0.5 + i as f32);
            state.angvel = Vec3::new(0.0, 3.0, -1.0);
        }
    }

    fn body_mut(&mut self, body: BodyHandle) -> Result<&mut BodyState, PhysicsError> {
        self.bodies
            .get_mut(body.0 as usize)
            .ok_or(PhysicsError::UnknownBody(body))
    }
}

impl PhysicsBackend for ScriptedBackend {
    fn add_body(&mut self, desc: &BodyDesc) -> Result<BodyHandle, PhysicsError> {
        self.bodies.push(BodyState {
            position: desc.position,
            rotation: desc.rotation,
            linvel: Vec3::ZERO,
            angvel: Vec3::ZERO,
        });
        Ok(BodyHandle(self.bodies.len() as u32 - 1))
    }

    fn add_joint(&mut self, _desc: &JointDesc) -> Result<JointHandle, PhysicsError> {
        self.drives.push(None);
        Ok(JointHandle(self.drives.len() as u32 - 1))
    }

    fn body_state(&self, body: BodyHandle) -> Result<BodyState, PhysicsError> {
        self.bodies
            .get(body.0 as usize)
            .copied()
            .ok_or(PhysicsError::UnknownBody(body))
    }

    fn set_body_pose(
        &mut self,
        body: BodyHandle,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), PhysicsError> {
        let state = self.body_mut(body)?;
        state.position = position;
        state.rotation = rotation;
        Ok(())
    }

    fn set_body_velocity(
        &mut self,
        body: BodyHandle,
        linvel: Vec3,
        angvel: Vec3,
    ) -> Result<(), PhysicsError> {
        let state = self.body_mut(body)?;
        state.linvel = linvel;
        state.angvel = angvel;
        Ok(())
    }

    fn apply_impulse(&mut self, body: BodyHandle, _impulse: Vec3) -> Result<(), PhysicsError> {
        self.body_mut(body).map(|_| ())
    }

    fn set_joint_drive(
        &mut self,
        joint: JointHandle,
        drive: &JointDrive,
    ) -> Result<(), PhysicsError> {
        let slot = self
            .drives
            .get_mut(joint.0 as usize)
            .ok_or(PhysicsError::UnknownJoint(joint))?;
        *slot = Some(*drive);
        Ok(())
    }

    fn sync_terrain(&mut self, _terrain: &Terrain) -> Result<(), PhysicsError> {
        Ok(())
    }

    fn step(&mut self, _dt: f32) -> Result<(), PhysicsError> {
        self.steps += 1;
        let steps = self.steps;
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.script)
            .into_iter()
            .partition(|(at, _)| *at == steps);
        self.script = later;
        self.pending.extend(due.into_iter().map(|(_, event)| event));
        Ok(())
    }

    fn drain_contact_events(&mut self) -> Vec<ContactEvent> {
        std::mem::take(&mut self.pending)
    }
}

/// Counts decisions and answers with zeros
struct CountingPolicy {
    calls: Arc<AtomicUsize>,
}

impl Policy for CountingPolicy {
    fn name(&self) -> &str {
        "counting"
    }

    fn act(&mut self, request: &DecisionRequest<'_>) -> Result<Vec<f32>, PolicyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0.0; request.action_size])
    }
}

/// Always fails with the given error
struct FailingPolicy(PolicyError);

impl Policy for FailingPolicy {
    fn name(&self) -> &str {
        "failing"
    }

    fn act(&mut self, _request: &DecisionRequest<'_>) -> Result<Vec<f32>, PolicyError> {
        Err(self.0.clone())
    }
}

/// Answers with zeros after a fixed delay
struct SlowPolicy {
    delay: Duration,
    seen_timeout: Arc<Mutex<Option<Duration>>>,
}

impl Policy for SlowPolicy {
    fn name(&self) -> &str {
        "slow"
    }

    fn act(&mut self, request: &DecisionRequest<'_>) -> Result<Vec<f32>, PolicyError> {
        if let Ok(mut seen) = self.seen_timeout.lock() {
            *seen = request.timeout;
        }
        std::thread::sleep(self.delay);
        Ok(vec![0.0; request.action_size])
    }
}

/// Answers with a fixed number of values regardless of the request
struct WrongSizePolicy(usize);

impl Policy for WrongSizePolicy {
    fn name(&self) -> &str {
        "wrong-size"
    }

    fn act(&mut self, _request: &DecisionRequest<'_>) -> Result<Vec<f32>, PolicyError> {
        Ok(vec![0.0; self.0])
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn flat_config() -> EnvConfig {
    let mut config = EnvConfig::default();
    config.arena.count = 1;
    config.terrain.generate_heights = false;
    config.creature.yaw_jitter = 0.0;
    config.creature.roll_jitter = 0.0;
    config
}

fn arena<B: PhysicsBackend>(
    config: &EnvConfig,
    backend: B,
    policy: Box<dyn Policy>,
) -> EpisodeController<B> {
    let deps = ArenaDeps::standard(config, 0, backend, policy).unwrap();
    let mut controller = EpisodeController::new(ArenaId(0), config, deps).unwrap();
    controller.initialize().unwrap();
    controller
}

fn scripted(config: &EnvConfig) -> EpisodeController<ScriptedBackend> {
    arena(
        config,
        ScriptedBackend::default(),
        Box::new(strider_core::ConstantPolicy::zero()),
    )
}

fn head_contact() -> ContactEvent {
    ContactEvent {
        body: BodyHandle(0),
        surface: "ground".to_string(),
        phase: ContactPhase::Started,
        point: Vec3::new(64.0, 0.0, 48.0),
    }
}

/// Every body at rest and every contact cleared
fn assert_clean_reset<B: PhysicsBackend>(controller: &EpisodeController<B>) {
    let snapshot = controller.snapshot().unwrap();
    for state in std::iter::once(&snapshot.root).chain(snapshot.parts.iter()) {
        assert_eq!(state.linvel, Vec3::ZERO);
        assert_eq!(state.angvel, Vec3::ZERO);
    }
    assert!(!controller.creature().root().contact.is_touching());
    assert!(controller
        .creature()
        .parts()
        .iter()
        .all(|p| !p.contact.is_touching()));
    assert_eq!(controller.episode_step(), 0);
    assert_eq!(controller.episode_return(), 0.0);
}

fn part_body(controller: &EpisodeController<ScriptedBackend>, name: &str) -> BodyHandle {
    controller
        .creature()
        .parts()
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.body)
        .unwrap()
}

// ============================================================================
// Termination Tests
// ============================================================================

#[test]
fn test_forbidden_contact_ends_episode_and_resets() {
    let config = flat_config();
    let mut controller = scripted(&config);
    let head = part_body(&controller, "head");
    controller.backend_mut().emit_at(
        3,
        ContactEvent {
            body: head,
            surface: "ground".to_string(),
            phase: ContactPhase::Started,
            point: Vec3::new(64.0, 0.0, 48.0),
        },
    );

    assert!(controller.step().unwrap().termination.is_none());
    assert!(controller.step().unwrap().termination.is_none());
    let outcome = controller.step().unwrap();
    assert_eq!(
        outcome.termination,
        Some(Termination::ForbiddenContact {
            part: "head".to_string()
        })
    );
    assert_eq!(outcome.episode, 1);

    // Reset happened at the same step boundary
    assert_eq!(controller.phase(), EpisodePhase::Running);
    assert_eq!(controller.episode(), 2);
    assert_eq!(controller.episode_step(), 0);
    assert!(controller
        .creature()
        .parts()
        .iter()
        .all(|p| !p.contact.is_touching()));
    assert_eq!(controller.stats().completed(), 1);
    assert_eq!(controller.stats().last().map(|r| r.steps), Some(3));
}

#[test]
fn test_out_of_bounds_resets_to_start_height() {
    let config = flat_config();
    let mut controller = arena(
        &config,
        SimplePhysics::new(config.physics.clone()),
        Box::new(strider_core::ConstantPolicy::zero()),
    );
    controller.step().unwrap();

    let root_y = controller.snapshot().unwrap().root.position.y;
    controller
        .displace_creature(Vec3::new(0.0, -15.0 - root_y, 0.0))
        .unwrap();
    let outcome = controller.step().unwrap();
    match outcome.termination {
        Some(Termination::OutOfBounds { height }) => assert!(height < -10.0),
        other => panic!("expected out-of-bounds termination, got {:?}", other),
    }

    let root = controller.snapshot().unwrap().root;
    let ground = controller.terrain().height(64.0, 48.0).unwrap();
    let expected = ground + controller.creature().root().rest_height + config.creature.clearance;
    assert!((root.position.y - expected).abs() < 1e-5);
    assert_clean_reset(&controller);
    assert_eq!(controller.episode(), 2);
}

#[test]
fn test_consecutive_terminations_reset_cleanly() {
    let mut config = flat_config();
    config.arena.max_steps = 3;
    let mut controller = scripted(&config);
    let head = part_body(&controller, "head");
    for at in [2, 7] {
        controller.backend_mut().emit_at(
            at,
            ContactEvent {
                body: head,
                ..head_contact()
            },
        );
    }

    let mut ended = Vec::new();
    while ended.len() < 3 {
        controller.backend_mut().stir();
        let outcome = controller.step().unwrap();
        if let Some(termination) = outcome.termination {
            assert_clean_reset(&controller);
            assert_eq!(controller.episode(), outcome.episode + 1);
            ended.push((outcome.episode, termination));
        }
    }

    let forbidden = Termination::ForbiddenContact {
        part: "head".to_string(),
    };
    assert_eq!(
        ended,
        vec![
            (1, forbidden.clone()),
            (2, Termination::MaxSteps),
            (3, forbidden),
        ]
    );
    assert_eq!(controller.stats().completed(), 3);
    let terminations = controller.stats().terminations();
    assert_eq!(terminations.get("forbidden_contact"), Some(&2));
    assert_eq!(terminations.get("max_steps"), Some(&1));
}

#[test]
fn test_non_finite_reward_zeroes_whole_step() {
    let mut config = flat_config();
    config.contact.penalties.insert(BodyCategory::Foot, -0.5);
    let mut controller = scripted(&config);
    let arm = part_body(&controller, "arm_l");
    let foot = part_body(&controller, "foot_l");
    controller.step().unwrap();

    controller
        .backend_mut()
        .set_body_velocity(arm, Vec3::NAN, Vec3::ZERO)
        .unwrap();
    controller.backend_mut().emit_at(
        2,
        ContactEvent {
            body: foot,
            ..head_contact()
        },
    );
    let outcome = controller.step().unwrap();
    assert!(outcome.termination.is_none());
    assert_eq!(outcome.reward, 0.0);
    // The contact itself was still registered
    let foot_part = controller.creature().parts().iter().find(|p| p.body == foot);
    assert!(foot_part.map(|p| p.contact.is_touching()).unwrap_or(false));
}

#[test]
fn test_max_steps_ends_episode() {
    let mut config = flat_config();
    config.arena.max_steps = 4;
    let mut controller = scripted(&config);
    for _ in 0..3 {
        assert!(controller.step().unwrap().termination.is_none());
    }
    let outcome = controller.step().unwrap();
    assert_eq!(outcome.step, 4);
    assert_eq!(outcome.termination, Some(Termination::MaxSteps));
    assert_eq!(controller.episode(), 2);
}

// ============================================================================
// Failure Handling Tests
// ============================================================================

#[test]
fn test_policy_timeout_fails_step_without_stalling() {
    let config = flat_config();
    let mut controller = arena(
        &config,
        ScriptedBackend::default(),
        Box::new(FailingPolicy(PolicyError::Timeout)),
    );

    for episode in 1..=3 {
        let outcome = controller.step().unwrap();
        assert_eq!(outcome.episode, episode);
        assert_eq!(outcome.reward, 0.0);
        assert!(matches!(
            outcome.termination,
            Some(Termination::Failed { .. })
        ));
    }
    assert_eq!(controller.stats().terminations().get("failed"), Some(&3));
}

#[test]
fn test_late_policy_answer_fails_step() {
    let mut config = flat_config();
    config.arena.decision_timeout = Some(0.005);
    let seen_timeout = Arc::new(Mutex::new(None));
    let mut controller = arena(
        &config,
        ScriptedBackend::default(),
        Box::new(SlowPolicy {
            delay: Duration::from_millis(40),
            seen_timeout: seen_timeout.clone(),
        }),
    );

    let outcome = controller.step().unwrap();
    match outcome.termination {
        Some(Termination::Failed { reason }) => assert!(reason.contains("in time")),
        other => panic!("expected failed termination, got {:?}", other),
    }
    assert_eq!(outcome.reward, 0.0);
    assert_eq!(controller.episode(), 2);
    assert_eq!(
        *seen_timeout.lock().unwrap(),
        Some(Duration::from_secs_f32(0.005))
    );
    // The late action never reached the joints
    assert!(controller.backend().drives.iter().all(|d| d.is_none()));
}

#[test]
fn test_policy_within_timeout_keeps_running() {
    let mut config = flat_config();
    config.arena.decision_timeout = Some(5.0);
    let mut controller = arena(
        &config,
        ScriptedBackend::default(),
        Box::new(SlowPolicy {
            delay: Duration::ZERO,
            seen_timeout: Arc::new(Mutex::new(None)),
        }),
    );
    let outcome = controller.step().unwrap();
    assert!(outcome.termination.is_none());
    assert!(outcome.decided);
    assert!(controller.backend().drives.iter().all(|d| d.is_some()));
}

#[test]
fn test_malformed_action_fails_episode() {
    let config = flat_config();
    let mut controller = arena(
        &config,
        ScriptedBackend::default(),
        Box::new(WrongSizePolicy(3)),
    );
    let outcome = controller.step().unwrap();
    match outcome.termination {
        Some(Termination::Failed { reason }) => assert!(reason.contains("action")),
        other => panic!("expected failed termination, got {:?}", other),
    }
    // No joint was driven by the rejected action
    assert!(controller.backend().drives.iter().all(|d| d.is_none()));
}

#[test]
fn test_step_before_initialize_is_rejected() {
    let config = flat_config();
    let deps = ArenaDeps::standard(
        &config,
        0,
        ScriptedBackend::default(),
        Box::new(strider_core::ConstantPolicy::zero()),
    )
    .unwrap();
    let mut controller = EpisodeController::new(ArenaId(0), &config, deps).unwrap();
    assert!(matches!(
        controller.step(),
        Err(ArenaError::NotInitialized(ArenaId(0)))
    ));
}

// ============================================================================
// Decision and Goal Tests
// ============================================================================

#[test]
fn test_policy_queried_every_decision_period() {
    let mut config = flat_config();
    config.arena.decision_period = 5;
    let calls = Arc::new(AtomicUsize::new(0));
    let mut controller = arena(
        &config,
        ScriptedBackend::default(),
        Box::new(CountingPolicy {
            calls: calls.clone(),
        }),
    );

    let decided: Vec<u64> = (0..12)
        .map(|_| controller.step().unwrap())
        .filter(|o| o.decided)
        .map(|o| o.step)
        .collect();
    assert_eq!(decided, vec![1, 6, 11]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(controller.last_observation().len(), controller.observation_size());
}

#[test]
fn test_goal_reached_ends_episode_with_bonus() {
    let mut config = flat_config();
    config.goal.on_reached = GoalReachedPolicy::EndEpisode;
    let mut controller = scripted(&config);
    controller.place_goal(64.0, 48.0).unwrap();

    let outcome = controller.step().unwrap();
    assert_eq!(outcome.termination, Some(Termination::GoalReached));
    assert!(outcome.reward >= 1.0);
}

#[test]
fn test_goal_relocated_when_reached() {
    let config = flat_config();
    let mut controller = scripted(&config);
    controller.place_goal(64.0, 48.0).unwrap();

    let outcome = controller.step().unwrap();
    assert!(outcome.termination.is_none());
    let goal = controller.goal().position();
    assert!(goal.distance(Vec3::new(64.0, 0.0, 48.0)) > 0.0);
    assert!((4.0..124.0).contains(&goal.x));
    assert!((4.0..124.0).contains(&goal.z));
}

#[test]
fn test_navigation_steers_at_lifted_waypoint() {
    let mut config = flat_config();
    config.navigation.enabled = true;
    let mut controller = scripted(&config);
    controller.step().unwrap();

    let goal = controller.goal().position();
    let waypoint = controller.waypoint();
    let lift = config.navigation.lift_factor * controller.creature().root().rest_height;
    assert!((waypoint.y - (goal.y + lift)).abs() < 1e-4);
    assert!((waypoint.x - goal.x).abs() < 1e-4);
    assert!((waypoint.z - goal.z).abs() < 1e-4);
}

// ============================================================================
// Arena Tests
// ============================================================================

#[test]
fn test_terrain_regenerated_on_cadence() {
    let mut config = flat_config();
    config.terrain.generate_heights = true;
    config.regeneration.terrain_every = 1;
    config.arena.max_steps = 1;
    let mut controller = scripted(&config);
    assert_eq!(controller.terrain().generation(), 1);

    // Episode 1 begins and ends in this step, episode 2 begins
    controller.step().unwrap();
    assert_eq!(controller.episode(), 2);
    assert_eq!(controller.terrain().generation(), 3);
}

#[test]
fn test_registry_builds_independent_arenas() {
    let mut config = flat_config();
    config.arena.count = 3;
    config.terrain.generate_heights = true;
    let mut registry = ArenaRegistry::build(&config, |id| {
        ArenaDeps::standard(
            &config,
            id.0,
            SimplePhysics::new(config.physics.clone()),
            Box::new(strider_core::RandomPolicy::new(id.0 as u64)),
        )
    })
    .unwrap();
    assert_eq!(registry.len(), 3);

    for controller in registry.controllers_mut() {
        controller.step().unwrap();
        assert_eq!(controller.episode(), 1);
    }
    assert!(registry.step(ArenaId(2)).is_ok());
    assert!(matches!(
        registry.step(ArenaId(7)),
        Err(ArenaError::UnknownArena(ArenaId(7)))
    ));

    let heights: Vec<f32> = registry
        .controllers()
        .iter()
        .map(|c| c.terrain().height(30.0, 30.0).unwrap())
        .collect();
    assert!(heights[0] != heights[1] || heights[1] != heights[2]);
}
