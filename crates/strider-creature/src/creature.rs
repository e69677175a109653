//! Body part registry of one creature
//!
//! A creature is spawned from a [`SkeletonDescription`] into a physics backend.
//! Its body parts and their order are fixed from then on: action and
//! observation vectors are positional and rely on it.

use ahash::AHashMap;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{CreatureError, PhysicsError};
use crate::physics::{BodyDesc, BodyHandle, BodyState, JointDesc, JointHandle, PhysicsBackend};
use crate::skeleton::SkeletonDescription;
use crate::types::{AxisMask, AxisMotion, BodyCategory};

/// Ground contact state of one body part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContactState {
    #[default]
    Airborne,
    Touching,
}

impl ContactState {
    pub fn is_touching(&self) -> bool {
        *self == ContactState::Touching
    }
}

/// The unactuated pose reference of a creature
#[derive(Debug, Clone)]
pub struct RootPart {
    pub name: String,
    pub category: BodyCategory,
    pub body: BodyHandle,
    /// Height of the root above the ground in the spawn pose
    pub rest_height: f32,
    pub contact: ContactState,
}

/// One actuated segment
#[derive(Debug, Clone)]
pub struct BodyPart {
    pub name: String,
    pub category: BodyCategory,
    pub body: BodyHandle,
    pub joint: JointHandle,
    /// Index of the parent part, `None` when attached to the root
    pub parent: Option<usize>,
    pub motion: [AxisMotion; 3],
    /// Angular limits per axis in radians
    pub limits: [(f32, f32); 3],
    /// Position relative to the root in the creature's spawn frame
    pub rest_offset: Vec3,
    /// Rotation relative to the creature's spawn rotation
    pub rest_rotation: Quat,
    /// Height above the root in the spawn pose
    pub rest_height: f32,
    pub contact: ContactState,
    /// Force limit set by the last applied action
    pub current_strength: f32,
}

impl BodyPart {
    pub fn free_axes(&self) -> usize {
        self.motion.iter().filter(|m| **m == AxisMotion::Free).count()
    }

    /// Action scalars consumed by this part: one per free axis plus strength
    pub fn action_len(&self) -> usize {
        self.free_axes() + 1
    }
}

/// Kinematic state of a creature captured once per step
#[derive(Debug, Clone, PartialEq)]
pub struct CreatureSnapshot {
    pub root: BodyState,
    /// Part states in body part order
    pub parts: Vec<BodyState>,
}

impl CreatureSnapshot {
    /// Mean linear velocity over all actuated parts
    pub fn average_velocity(&self) -> Vec3 {
        if self.parts.is_empty() {
            return self.root.linvel;
        }
        self.parts.iter().map(|p| p.linvel).sum::<Vec3>() / self.parts.len() as f32
    }

    /// Rotation of `part` relative to its parent
    pub fn local_rotation(&self, creature: &Creature, part: usize) -> Quat {
        let parent = match creature.parts()[part].parent {
            Some(p) => self.parts[p].rotation,
            None => self.root.rotation,
        };
        parent.inverse() * self.parts[part].rotation
    }
}

/// An articulated creature living in a physics backend
#[derive(Debug, Clone)]
pub struct Creature {
    name: String,
    root: RootPart,
    parts: Vec<BodyPart>,
    part_of_body: AHashMap<BodyHandle, usize>,
    action_size: usize,
    masses: Vec<f32>,
}

impl Creature {
    /// Create all bodies and joints of `skeleton` with its origin at `origin`
    pub fn spawn<B: PhysicsBackend + ?Sized>(
        skeleton: &SkeletonDescription,
        backend: &mut B,
        origin: Vec3,
        rotation: Quat,
    ) -> Result<Self, CreatureError> {
        skeleton.validate()?;
        let root_bone = skeleton.root().ok_or(CreatureError::MissingRoot)?;

        let root_body = backend.add_body(&BodyDesc {
            position: origin + rotation * root_bone.position,
            rotation,
            radius: root_bone.radius,
            mass: root_bone.mass,
        })?;
        let root = RootPart {
            name: root_bone.name.clone(),
            category: root_bone.category,
            body: root_body,
            rest_height: root_bone.position.y,
            contact: ContactState::Airborne,
        };

        let mut index_of: AHashMap<&str, Option<usize>> = AHashMap::new();
        index_of.insert(root_bone.name.as_str(), None);
        let mut bone_positions: AHashMap<&str, Vec3> = AHashMap::new();
        bone_positions.insert(root_bone.name.as_str(), root_bone.position);

        let mut parts: Vec<BodyPart> = Vec::new();
        let mut part_of_body = AHashMap::new();
        let mut masses = vec![root_bone.mass];

        for bone in skeleton.actuated() {
            let parent_name = bone.parent.as_deref().unwrap_or_default();
            let parent_index = *index_of.get(parent_name).ok_or_else(|| {
                CreatureError::InvalidParent {
                    bone: bone.name.clone(),
                    parent: parent_name.to_string(),
                }
            })?;
            let parent_body = match parent_index {
                Some(i) => parts[i].body,
                None => root_body,
            };
            let parent_position = bone_positions
                .get(parent_name)
                .copied()
                .unwrap_or(root_bone.position);

            let body = backend.add_body(&BodyDesc {
                position: origin + rotation * bone.position,
                rotation,
                radius: bone.radius,
                mass: bone.mass,
            })?;

            let limits = [0, 1, 2].map(|axis| {
                let [low, high] = bone.limits[axis];
                (low.to_radians(), high.to_radians())
            });
            let joint = backend.add_joint(&JointDesc {
                parent: parent_body,
                child: body,
                parent_anchor: bone.pivot - parent_position,
                child_anchor: bone.pivot - bone.position,
                locked: AxisMask::locked_from(&bone.motion),
                limits,
            })?;

            let index = parts.len();
            index_of.insert(bone.name.as_str(), Some(index));
            bone_positions.insert(bone.name.as_str(), bone.position);
            part_of_body.insert(body, index);
            masses.push(bone.mass);
            parts.push(BodyPart {
                name: bone.name.clone(),
                category: bone.category,
                body,
                joint,
                parent: parent_index,
                motion: bone.motion,
                limits,
                rest_offset: bone.position - root_bone.position,
                rest_rotation: Quat::IDENTITY,
                rest_height: bone.position.y - root_bone.position.y,
                contact: ContactState::Airborne,
                current_strength: 0.0,
            });
        }

        let action_size = parts.iter().map(BodyPart::action_len).sum();
        log::debug!(
            "Creature: spawned '{}' with {} parts, action size {}",
            skeleton.name,
            parts.len(),
            action_size
        );

        Ok(Self {
            name: skeleton.name.clone(),
            root,
            parts,
            part_of_body,
            action_size,
            masses,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &RootPart {
        &self.root
    }

    pub fn parts(&self) -> &[BodyPart] {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut [BodyPart] {
        &mut self.parts
    }

    /// Length of the action vector, fixed at spawn
    pub fn action_size(&self) -> usize {
        self.action_size
    }

    pub fn has_category(&self, category: BodyCategory) -> bool {
        self.root.category == category || self.parts.iter().any(|p| p.category == category)
    }

    /// Index of the part owning `body`
    pub fn part_index(&self, body: BodyHandle) -> Option<usize> {
        self.part_of_body.get(&body).copied()
    }

    /// Category and contact state slot of any body of this creature, root included
    pub fn contact_slot_mut(&mut self, body: BodyHandle) -> Option<(BodyCategory, &mut ContactState)> {
        if body == self.root.body {
            return Some((self.root.category, &mut self.root.contact));
        }
        let index = self.part_index(body)?;
        let part = &mut self.parts[index];
        Some((part.category, &mut part.contact))
    }

    /// Every body handle, root first
    pub fn bodies(&self) -> impl Iterator<Item = BodyHandle> + '_ {
        std::iter::once(self.root.body).chain(self.parts.iter().map(|p| p.body))
    }

    pub fn snapshot<B: PhysicsBackend + ?Sized>(
        &self,
        backend: &B,
    ) -> Result<CreatureSnapshot, PhysicsError> {
        let root = backend.body_state(self.root.body)?;
        let parts = self
            .parts
            .iter()
            .map(|p| backend.body_state(p.body))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CreatureSnapshot { root, parts })
    }

    /// Centre of mass of all bodies
    pub fn center_of_mass(&self, snapshot: &CreatureSnapshot) -> Vec3 {
        let total: f32 = self.masses.iter().sum();
        let weighted = std::iter::once(&snapshot.root)
            .chain(snapshot.parts.iter())
            .zip(&self.masses)
            .map(|(s, m)| s.position * *m)
            .sum::<Vec3>();
        weighted / total
    }

    /// Place the root at `root_position` with `rotation` and every part at its
    /// rest offset from it. All velocities are zeroed and contact flags cleared.
    pub fn reset_pose<B: PhysicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        root_position: Vec3,
        rotation: Quat,
    ) -> Result<(), PhysicsError> {
        backend.set_body_pose(self.root.body, root_position, rotation)?;
        backend.set_body_velocity(self.root.body, Vec3::ZERO, Vec3::ZERO)?;
        self.root.contact = ContactState::Airborne;

        for part in &mut self.parts {
            backend.set_body_pose(
                part.body,
                root_position + rotation * part.rest_offset,
                rotation * part.rest_rotation,
            )?;
            backend.set_body_velocity(part.body, Vec3::ZERO, Vec3::ZERO)?;
            part.contact = ContactState::Airborne;
            part.current_strength = 0.0;
        }
        Ok(())
    }

    /// Shift every body by `offset` without touching velocities
    pub fn translate<B: PhysicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        offset: Vec3,
    ) -> Result<(), PhysicsError> {
        for body in self.bodies().collect::<Vec<_>>() {
            let state = backend.body_state(body)?;
            backend.set_body_pose(body, state.position + offset, state.rotation)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::SimplePhysics;

    fn spawn_biped() -> (Creature, SimplePhysics) {
        let mut physics = SimplePhysics::default();
        let creature = Creature::spawn(
            &SkeletonDescription::biped(),
            &mut physics,
            Vec3::new(10.0, 0.0, 10.0),
            Quat::IDENTITY,
        )
        .unwrap();
        (creature, physics)
    }

    #[test]
    fn test_spawn_registers_parts_in_order() {
        let (creature, physics) = spawn_biped();
        assert_eq!(creature.parts().len(), 12);
        assert_eq!(physics.body_count(), 13);
        assert_eq!(creature.parts()[0].name, "torso");
        assert_eq!(creature.parts()[1].parent, Some(0));
        assert_eq!(creature.action_size(), 31);
        assert_eq!(creature.root().rest_height, 1.0);
    }

    #[test]
    fn test_reset_zeroes_velocities_and_restores_pose() {
        let (mut creature, mut physics) = spawn_biped();
        for _ in 0..20 {
            physics.step(0.02).unwrap();
        }
        creature
            .reset_pose(&mut physics, Vec3::new(20.0, 3.0, 20.0), Quat::IDENTITY)
            .unwrap();

        let snapshot = creature.snapshot(&physics).unwrap();
        assert_eq!(snapshot.root.position, Vec3::new(20.0, 3.0, 20.0));
        assert_eq!(snapshot.root.linvel, Vec3::ZERO);
        for (state, part) in snapshot.parts.iter().zip(creature.parts()) {
            assert_eq!(state.linvel, Vec3::ZERO);
            assert_eq!(state.angvel, Vec3::ZERO);
            assert!((state.position.y - (3.0 + part.rest_height)).abs() < 1e-5);
        }
    }

    #[test]
    fn test_contact_slot_covers_root_and_parts() {
        let (mut creature, _) = spawn_biped();
        let root = creature.root().body;
        let head = creature.parts()[1].body;
        assert_eq!(creature.contact_slot_mut(root).unwrap().0, BodyCategory::Hip);
        assert_eq!(creature.contact_slot_mut(head).unwrap().0, BodyCategory::Head);
        assert!(creature.contact_slot_mut(BodyHandle(999)).is_none());
    }

    #[test]
    fn test_average_velocity_over_parts() {
        let state = |v: f32| BodyState {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            linvel: Vec3::new(v, 0.0, 0.0),
            angvel: Vec3::ZERO,
        };
        let snapshot = CreatureSnapshot {
            root: state(100.0),
            parts: vec![state(1.0), state(3.0)],
        };
        assert_eq!(snapshot.average_velocity(), Vec3::new(2.0, 0.0, 0.0));
    }
}
