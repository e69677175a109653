//! Ground contact monitor
//!
//! Each body part is either `Airborne` or `Touching`. The physics backend's
//! contact events are drained once per step and fed through [`GroundContactMonitor::process`]
//! in order. The first ground contact of a part applies its category penalty and,
//! for forbidden categories, requests the end of the episode.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strider_terrain::{HeightSampler, TerrainError};

use crate::creature::{ContactState, Creature};
use crate::physics::{ContactEvent, ContactPhase, GROUND_TAG};
use crate::types::{BodyCategory, CategoryMap, CategorySet};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    /// Surface tag treated as ground
    pub ground_tag: String,
    /// Penalty per category, applied on the first ground contact
    pub penalties: BTreeMap<BodyCategory, f32>,
    /// Categories whose ground contact ends the episode
    pub forbidden: Vec<BodyCategory>,
    /// Contacts this far above the terrain surface count as wall contacts
    pub wall_height_threshold: Option<f32>,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            ground_tag: GROUND_TAG.to_string(),
            penalties: BTreeMap::new(),
            forbidden: vec![BodyCategory::Head],
            wall_height_threshold: None,
        }
    }
}

/// Accumulated effect of one step's contact events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactOutcome {
    /// Sum of the penalties applied this step (never positive)
    pub penalty: f32,
    /// Name of the first forbidden part that touched the ground
    pub forbidden_contact: Option<String>,
}

impl ContactOutcome {
    pub fn terminate(&self) -> bool {
        self.forbidden_contact.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct GroundContactMonitor {
    ground_tag: String,
    penalties: CategoryMap<f32>,
    forbidden: CategorySet,
    wall_height_threshold: Option<f32>,
}

impl GroundContactMonitor {
    pub fn new(config: &ContactConfig) -> Self {
        let penalties = CategoryMap::from_entries(
            0.0,
            config.penalties.iter().map(|(&category, &penalty)| {
                if penalty > 0.0 {
                    log::warn!(
                        "ContactMonitor: positive ground contact penalty {} for {} inverted to {}",
                        penalty,
                        category,
                        -penalty
                    );
                    (category, -penalty)
                } else {
                    (category, penalty)
                }
            }),
        );
        Self {
            ground_tag: config.ground_tag.clone(),
            penalties,
            forbidden: config.forbidden.iter().copied().collect(),
            wall_height_threshold: config.wall_height_threshold,
        }
    }

    pub fn penalty(&self, category: BodyCategory) -> f32 {
        self.penalties.get(category)
    }

    pub fn is_forbidden(&self, category: BodyCategory) -> bool {
        self.forbidden.contains_category(category)
    }

    /// Run every event through the per-part state machine.
    ///
    /// Events for bodies that do not belong to `creature` are ignored.
    pub fn process<S: HeightSampler + ?Sized>(
        &self,
        creature: &mut Creature,
        events: &[ContactEvent],
        terrain: &S,
    ) -> Result<ContactOutcome, TerrainError> {
        let mut outcome = ContactOutcome::default();

        for event in events {
            if event.surface != self.ground_tag {
                continue;
            }
            let is_wall = match (event.phase, self.wall_height_threshold) {
                (ContactPhase::Started, Some(threshold)) => {
                    event.point.y - terrain.height(event.point.x, event.point.z)? > threshold
                }
                _ => false,
            };

            let penalty = &self.penalties;
            let forbidden = self.forbidden;
            let name = creature
                .part_index(event.body)
                .map(|i| creature.parts()[i].name.clone())
                .unwrap_or_else(|| creature.root().name.clone());
            let Some((category, state)) = creature.contact_slot_mut(event.body) else {
                continue;
            };

            match (event.phase, *state) {
                (ContactPhase::Started, ContactState::Airborne) if !is_wall => {
                    *state = ContactState::Touching;
                    outcome.penalty += penalty.get(category);
                    if forbidden.contains_category(category) && outcome.forbidden_contact.is_none()
                    {
                        log::debug!("ContactMonitor: forbidden part '{}' touched ground", name);
                        outcome.forbidden_contact = Some(name);
                    }
                }
                (ContactPhase::Stopped, ContactState::Touching) => {
                    *state = ContactState::Airborne;
                }
                _ => {}
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{BodyHandle, SimplePhysics};
    use crate::skeleton::SkeletonDescription;
    use glam::{Quat, Vec3};
    use strider_terrain::HeightGrid;

    fn biped() -> Creature {
        let mut physics = SimplePhysics::default();
        Creature::spawn(
            &SkeletonDescription::biped(),
            &mut physics,
            Vec3::ZERO,
            Quat::IDENTITY,
        )
        .unwrap()
    }

    fn event(body: BodyHandle, phase: ContactPhase, y: f32) -> ContactEvent {
        ContactEvent {
            body,
            surface: GROUND_TAG.to_string(),
            phase,
            point: Vec3::new(1.0, y, 1.0),
        }
    }

    fn part(creature: &Creature, name: &str) -> BodyHandle {
        creature
            .parts()
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.body)
            .unwrap()
    }

    #[test]
    fn test_forbidden_contact_terminates() {
        let mut creature = biped();
        let monitor = GroundContactMonitor::new(&ContactConfig::default());
        let head = part(&creature, "head");
        let outcome = monitor
            .process(&mut creature, &[event(head, ContactPhase::Started, 0.0)], &HeightGrid::flat(8))
            .unwrap();
        assert!(outcome.terminate());
        assert_eq!(outcome.forbidden_contact.as_deref(), Some("head"));
        assert!(creature.parts()[1].contact.is_touching());
    }

    #[test]
    fn test_penalty_applied_once_per_touch() {
        let mut creature = biped();
        let config = ContactConfig {
            penalties: [(BodyCategory::Leg, -0.5)].into_iter().collect(),
            forbidden: Vec::new(),
            ..Default::default()
        };
        let monitor = GroundContactMonitor::new(&config);
        let shin = part(&creature, "shin_l");
        let events = [
            event(shin, ContactPhase::Started, 0.0),
            event(shin, ContactPhase::Started, 0.0),
        ];
        let outcome = monitor
            .process(&mut creature, &events, &HeightGrid::flat(8))
            .unwrap();
        assert_eq!(outcome.penalty, -0.5);
        assert!(!outcome.terminate());

        // Leaving and touching again is a new contact
        let events = [
            event(shin, ContactPhase::Stopped, 0.0),
            event(shin, ContactPhase::Started, 0.0),
        ];
        let outcome = monitor
            .process(&mut creature, &events, &HeightGrid::flat(8))
            .unwrap();
        assert_eq!(outcome.penalty, -0.5);
    }

    #[test]
    fn test_positive_penalty_inverted() {
        let config = ContactConfig {
            penalties: [(BodyCategory::Foot, 0.25)].into_iter().collect(),
            ..Default::default()
        };
        let monitor = GroundContactMonitor::new(&config);
        assert_eq!(monitor.penalty(BodyCategory::Foot), -0.25);
        assert_eq!(monitor.penalty(BodyCategory::Arm), 0.0);
    }

    #[test]
    fn test_other_surfaces_ignored() {
        let mut creature = biped();
        let monitor = GroundContactMonitor::new(&ContactConfig::default());
        let head = part(&creature, "head");
        let mut wall = event(head, ContactPhase::Started, 0.0);
        wall.surface = "wall".to_string();
        let outcome = monitor
            .process(&mut creature, &[wall], &HeightGrid::flat(8))
            .unwrap();
        assert!(!outcome.terminate());
        assert!(!creature.parts()[1].contact.is_touching());
    }

    #[test]
    fn test_high_contact_treated_as_wall() {
        let mut creature = biped();
        let config = ContactConfig {
            wall_height_threshold: Some(0.5),
            ..Default::default()
        };
        let monitor = GroundContactMonitor::new(&config);
        let head = part(&creature, "head");
        let outcome = monitor
            .process(&mut creature, &[event(head, ContactPhase::Started, 2.0)], &HeightGrid::flat(8))
            .unwrap();
        assert!(!outcome.terminate());
    }

    #[test]
    fn test_root_contact_tracked() {
        let mut creature = biped();
        let config = ContactConfig {
            forbidden: vec![BodyCategory::Hip],
            ..Default::default()
        };
        let monitor = GroundContactMonitor::new(&config);
        let root = creature.root().body;
        let outcome = monitor
            .process(&mut creature, &[event(root, ContactPhase::Started, 0.0)], &HeightGrid::flat(8))
            .unwrap();
        assert_eq!(outcome.forbidden_contact.as_deref(), Some("pelvis"));
    }
}
