//! Waypoint following along a periodically recomputed path

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::TerrainError;
use crate::navgrid::PathFinder;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Simulated seconds between full path recomputations
    pub recompute_interval: f32,
    /// Horizontal distance at which the next corner becomes the target
    pub corner_radius: f32,
    /// Goal displacement that invalidates the cached path
    pub goal_tolerance: f32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            recompute_interval: 1.0,
            corner_radius: 4.0,
            goal_tolerance: 1.0,
        }
    }
}

/// Result of the most recent path computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanOutcome {
    /// No computation has run since the last reset
    None,
    Found,
    /// The goal could not be reached; the previous path is kept
    Unreachable,
}

/// Supplies the next waypoint towards the goal.
///
/// The returned waypoint is the current path corner raised by `lift`, which
/// biases steering above the ground instead of into it.
#[derive(Debug, Clone)]
pub struct PathPlanner {
    config: PlannerConfig,
    lift: f32,
    path: Vec<Vec3>,
    corner: usize,
    since_recompute: f32,
    planned_goal: Option<Vec3>,
    waypoint: Option<Vec3>,
    last_outcome: PlanOutcome,
}

impl PathPlanner {
    pub fn new(config: PlannerConfig, lift: f32) -> Self {
        Self {
            config,
            lift,
            path: Vec::new(),
            corner: 0,
            since_recompute: 0.0,
            planned_goal: None,
            waypoint: None,
            last_outcome: PlanOutcome::None,
        }
    }

    pub fn set_lift(&mut self, lift: f32) {
        self.lift = lift;
    }

    /// Force a recomputation on the next query, keeping the cached path as fallback
    pub fn invalidate(&mut self) {
        self.planned_goal = None;
    }

    /// Drop all cached state, e.g. after the terrain was regenerated
    pub fn reset(&mut self) {
        self.path.clear();
        self.corner = 0;
        self.since_recompute = 0.0;
        self.planned_goal = None;
        self.waypoint = None;
        self.last_outcome = PlanOutcome::None;
    }

    pub fn path(&self) -> &[Vec3] {
        &self.path
    }

    pub fn corner_index(&self) -> usize {
        self.corner
    }

    pub fn last_outcome(&self) -> PlanOutcome {
        self.last_outcome
    }

    pub fn last_waypoint(&self) -> Option<Vec3> {
        self.waypoint
    }

    fn needs_recompute(&self, goal: Vec3) -> bool {
        match self.planned_goal {
            None => true,
            Some(planned) => {
                self.path.is_empty()
                    || self.since_recompute >= self.config.recompute_interval
                    || planned.distance(goal) > self.config.goal_tolerance
            }
        }
    }

    /// Next waypoint for a creature at `current` heading to `goal`.
    ///
    /// `dt` is the simulated time since the previous query. When the goal is
    /// unreachable the previously cached waypoint is returned; without any cached
    /// path the creature steers straight at the goal. The corner index advances
    /// by at most one per query, even when several corners are within reach.
    pub fn next_waypoint<F: PathFinder + ?Sized>(
        &mut self,
        finder: &F,
        current: Vec3,
        goal: Vec3,
        dt: f32,
    ) -> Result<Vec3, TerrainError> {
        self.since_recompute += dt;

        if self.needs_recompute(goal) {
            self.since_recompute = 0.0;
            self.planned_goal = Some(goal);
            match finder.find_path(current, goal)? {
                Some(path) => {
                    self.corner = if path.len() > 1 { 1 } else { 0 };
                    self.path = path;
                    self.last_outcome = PlanOutcome::Found;
                }
                None => {
                    log::debug!(
                        "PathPlanner: goal ({:.1}, {:.1}) unreachable, keeping {} cached corners",
                        goal.x,
                        goal.z,
                        self.path.len()
                    );
                    self.last_outcome = PlanOutcome::Unreachable;
                }
            }
        }

        if self.path.is_empty() {
            let waypoint = self.waypoint.unwrap_or(goal + Vec3::Y * self.lift);
            self.waypoint = Some(waypoint);
            return Ok(waypoint);
        }

        let last = self.path.len() - 1;
        let here = Vec2::new(current.x, current.z);
        // At most one corner per query
        if self.corner < last {
            let corner = self.path[self.corner];
            if Vec2::new(corner.x, corner.z).distance(here) <= self.config.corner_radius {
                self.corner += 1;
            }
        }

        let waypoint = self.path[self.corner] + Vec3::Y * self.lift;
        self.waypoint = Some(waypoint);
        Ok(waypoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// Finder returning scripted answers and counting queries
    struct ScriptedFinder {
        answers: RefCell<Vec<Option<Vec<Vec3>>>>,
        calls: Cell<usize>,
    }

    impl ScriptedFinder {
        fn new(answers: Vec<Option<Vec<Vec3>>>) -> Self {
            Self {
                answers: RefCell::new(answers),
                calls: Cell::new(0),
            }
        }
    }

    impl PathFinder for ScriptedFinder {
        fn generation(&self) -> u64 {
            1
        }

        fn find_path(&self, _from: Vec3, _to: Vec3) -> Result<Option<Vec<Vec3>>, TerrainError> {
            self.calls.set(self.calls.get() + 1);
            let mut answers = self.answers.borrow_mut();
            if answers.is_empty() {
                Ok(None)
            } else {
                Ok(answers.remove(0))
            }
        }
    }

    fn l_path() -> Vec<Vec3> {
        vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 10.0),
            Vec3::new(10.0, 0.0, 10.0),
        ]
    }

    #[test]
    fn test_first_waypoint_is_lifted_second_corner() {
        let finder = ScriptedFinder::new(vec![Some(l_path())]);
        let mut planner = PathPlanner::new(PlannerConfig::default(), 2.0);
        let wp = planner
            .next_waypoint(&finder, Vec3::ZERO, Vec3::new(10.0, 0.0, 10.0), 0.02)
            .unwrap();
        assert_eq!(wp, Vec3::new(0.0, 2.0, 10.0));
        assert_eq!(planner.last_outcome(), PlanOutcome::Found);
    }

    #[test]
    fn test_advances_corner_within_radius() {
        let finder = ScriptedFinder::new(vec![Some(l_path())]);
        let mut planner = PathPlanner::new(PlannerConfig::default(), 0.0);
        let goal = Vec3::new(10.0, 0.0, 10.0);
        planner.next_waypoint(&finder, Vec3::ZERO, goal, 0.02).unwrap();

        let wp = planner
            .next_waypoint(&finder, Vec3::new(0.0, 0.0, 7.0), goal, 0.02)
            .unwrap();
        assert_eq!(wp, goal);
        assert_eq!(planner.corner_index(), 2);

        // The final corner is never advanced past
        let wp = planner.next_waypoint(&finder, goal, goal, 0.02).unwrap();
        assert_eq!(wp, goal);
        assert_eq!(planner.corner_index(), 2);
    }

    #[test]
    fn test_advances_one_corner_per_query() {
        let path = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 2.0),
            Vec3::new(0.0, 0.0, 3.0),
            Vec3::new(10.0, 0.0, 3.0),
        ];
        let finder = ScriptedFinder::new(vec![Some(path)]);
        let mut planner = PathPlanner::new(PlannerConfig::default(), 0.0);
        let goal = Vec3::new(10.0, 0.0, 3.0);

        let wp = planner.next_waypoint(&finder, Vec3::ZERO, goal, 0.02).unwrap();
        assert_eq!(planner.corner_index(), 2);
        assert_eq!(wp, Vec3::new(0.0, 0.0, 3.0));

        let wp = planner.next_waypoint(&finder, Vec3::ZERO, goal, 0.02).unwrap();
        assert_eq!(planner.corner_index(), 3);
        assert_eq!(wp, goal);
    }

    #[test]
    fn test_recomputes_after_interval() {
        let finder = ScriptedFinder::new(vec![Some(l_path()), Some(l_path())]);
        let mut planner = PathPlanner::new(PlannerConfig::default(), 0.0);
        let goal = Vec3::new(10.0, 0.0, 10.0);

        for _ in 0..10 {
            planner.next_waypoint(&finder, Vec3::ZERO, goal, 0.05).unwrap();
        }
        assert_eq!(finder.calls.get(), 1);

        for _ in 0..12 {
            planner.next_waypoint(&finder, Vec3::ZERO, goal, 0.05).unwrap();
        }
        assert_eq!(finder.calls.get(), 2);
    }

    #[test]
    fn test_unreachable_goal_keeps_cached_waypoint() {
        let finder = ScriptedFinder::new(vec![Some(l_path()), None]);
        let mut planner = PathPlanner::new(PlannerConfig::default(), 1.0);
        let goal = Vec3::new(10.0, 0.0, 10.0);
        let first = planner.next_waypoint(&finder, Vec3::ZERO, goal, 0.02).unwrap();

        // Moving the goal forces a recomputation, which fails
        let moved = Vec3::new(50.0, 0.0, 50.0);
        let second = planner.next_waypoint(&finder, Vec3::ZERO, moved, 0.02).unwrap();

        assert_eq!(first, second);
        assert_eq!(planner.last_outcome(), PlanOutcome::Unreachable);
        assert_eq!(finder.calls.get(), 2);
    }

    #[test]
    fn test_without_any_path_steers_at_goal() {
        let finder = ScriptedFinder::new(vec![None]);
        let mut planner = PathPlanner::new(PlannerConfig::default(), 1.0);
        let goal = Vec3::new(3.0, 0.0, 4.0);
        let wp = planner.next_waypoint(&finder, Vec3::ZERO, goal, 0.02).unwrap();
        assert_eq!(wp, Vec3::new(3.0, 1.0, 4.0));
    }

    #[test]
    fn test_invalidate_forces_recompute() {
        let finder = ScriptedFinder::new(vec![Some(l_path()), Some(l_path())]);
        let mut planner = PathPlanner::new(PlannerConfig::default(), 0.0);
        let goal = Vec3::new(10.0, 0.0, 10.0);
        planner.next_waypoint(&finder, Vec3::ZERO, goal, 0.02).unwrap();
        planner.invalidate();
        planner.next_waypoint(&finder, Vec3::ZERO, goal, 0.02).unwrap();
        assert_eq!(finder.calls.get(), 2);
    }
}
