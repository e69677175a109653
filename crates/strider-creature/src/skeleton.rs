//! Creature skeleton descriptions
//!
//! A skeleton is a list of bones in rest pose. Positions are given relative to
//! the creature origin, which sits on the ground directly below the root bone.
//! Exactly one bone has no parent; it becomes the root and pose reference, all
//! other bones become actuated body parts in declaration order.

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::CreatureError;
use crate::types::{AxisMotion, BodyCategory};

/// One rigid segment of a skeleton
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoneSpec {
    pub name: String,
    pub category: BodyCategory,
    /// Name of the parent bone; `None` for the root
    #[serde(default)]
    pub parent: Option<String>,
    /// Centre of the bone in rest pose
    pub position: Vec3,
    /// Joint anchor connecting the bone to its parent, in rest pose
    #[serde(default)]
    pub pivot: Vec3,
    pub radius: f32,
    pub mass: f32,
    /// Freedom of the X, Y and Z rotation axes
    #[serde(default = "all_free")]
    pub motion: [AxisMotion; 3],
    /// Angular limits per axis in degrees
    #[serde(default = "default_limits")]
    pub limits: [[f32; 2]; 3],
}

fn all_free() -> [AxisMotion; 3] {
    [AxisMotion::Free; 3]
}

fn default_limits() -> [[f32; 2]; 3] {
    [[-45.0, 45.0]; 3]
}

impl BoneSpec {
    fn new(name: &str, category: BodyCategory, parent: Option<&str>, position: Vec3) -> Self {
        Self {
            name: name.to_string(),
            category,
            parent: parent.map(str::to_string),
            position,
            pivot: position,
            radius: 0.1,
            mass: 1.0,
            motion: all_free(),
            limits: default_limits(),
        }
    }

    fn pivot(mut self, pivot: Vec3) -> Self {
        self.pivot = pivot;
        self
    }

    fn size(mut self, radius: f32, mass: f32) -> Self {
        self.radius = radius;
        self.mass = mass;
        self
    }

    /// Set one axis free with limits (degrees) or locked with `None`
    fn axis(mut self, axis: usize, limits: Option<(f32, f32)>) -> Self {
        match limits {
            Some((low, high)) => {
                self.motion[axis] = AxisMotion::Free;
                self.limits[axis] = [low, high];
            }
            None => {
                self.motion[axis] = AxisMotion::Locked;
                self.limits[axis] = [0.0, 0.0];
            }
        }
        self
    }

    /// Number of rotational axes that accept actions
    pub fn free_axes(&self) -> usize {
        self.motion.iter().filter(|m| **m == AxisMotion::Free).count()
    }
}

/// Full skeleton of one creature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkeletonDescription {
    pub name: String,
    pub bones: Vec<BoneSpec>,
}

impl SkeletonDescription {
    /// Parse a skeleton from RON text
    pub fn from_ron_str(text: &str) -> Result<Self, CreatureError> {
        let skeleton: SkeletonDescription =
            ron::from_str(text).map_err(|e| CreatureError::Skeleton(e.to_string()))?;
        skeleton.validate()?;
        Ok(skeleton)
    }

    /// Load and validate a skeleton from a RON file
    pub fn load(path: &Path) -> Result<Self, CreatureError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CreatureError::Skeleton(format!("{}: {}", path.display(), e)))?;
        Self::from_ron_str(&text)
    }

    /// Root bone. Only meaningful on a validated skeleton.
    pub fn root(&self) -> Option<&BoneSpec> {
        self.bones.iter().find(|b| b.parent.is_none())
    }

    /// Bones that become actuated body parts, in order
    pub fn actuated(&self) -> impl Iterator<Item = &BoneSpec> {
        self.bones.iter().filter(|b| b.parent.is_some())
    }

    /// `Σ (free axes + 1)` over all actuated bones
    pub fn action_size(&self) -> usize {
        self.actuated().map(|b| b.free_axes() + 1).sum()
    }

    /// Check that the skeleton forms a single tree with one root.
    ///
    /// Parents must be declared before their children.
    pub fn validate(&self) -> Result<(), CreatureError> {
        if self.bones.is_empty() {
            return Err(CreatureError::EmptySkeleton);
        }

        let mut root: Option<&str> = None;
        for (i, bone) in self.bones.iter().enumerate() {
            if !(bone.radius.is_finite() && bone.radius > 0.0) {
                return Err(CreatureError::InvalidBone {
                    bone: bone.name.clone(),
                    reason: format!("radius must be positive, got {}", bone.radius),
                });
            }
            if !(bone.mass.is_finite() && bone.mass > 0.0) {
                return Err(CreatureError::InvalidBone {
                    bone: bone.name.clone(),
                    reason: format!("mass must be positive, got {}", bone.mass),
                });
            }
            if !bone.position.is_finite() || !bone.pivot.is_finite() {
                return Err(CreatureError::InvalidBone {
                    bone: bone.name.clone(),
                    reason: "position and pivot must be finite".to_string(),
                });
            }
            for [low, high] in bone.limits {
                if low > high {
                    return Err(CreatureError::InvalidBone {
                        bone: bone.name.clone(),
                        reason: format!("inverted limits [{}, {}]", low, high),
                    });
                }
            }
            if self.bones[..i].iter().any(|b| b.name == bone.name) {
                return Err(CreatureError::InvalidBone {
                    bone: bone.name.clone(),
                    reason: "duplicate bone name".to_string(),
                });
            }

            match &bone.parent {
                None => {
                    if let Some(first) = root {
                        return Err(CreatureError::MultipleRoots {
                            first: first.to_string(),
                            second: bone.name.clone(),
                        });
                    }
                    root = Some(&bone.name);
                }
                Some(parent) => {
                    if !self.bones[..i].iter().any(|b| &b.name == parent) {
                        return Err(CreatureError::InvalidParent {
                            bone: bone.name.clone(),
                            parent: parent.clone(),
                        });
                    }
                }
            }
        }

        if root.is_none() {
            return Err(CreatureError::MissingRoot);
        }
        Ok(())
    }

    /// Two-legged walker with arms
    pub fn biped() -> Self {
        use BodyCategory::*;
        let mut bones = vec![
            BoneSpec::new("pelvis", Hip, None, Vec3::new(0.0, 1.0, 0.0)).size(0.15, 4.0),
            BoneSpec::new("torso", Torso, Some("pelvis"), Vec3::new(0.0, 1.35, 0.0))
                .pivot(Vec3::new(0.0, 1.15, 0.0))
                .size(0.18, 6.0)
                .axis(0, Some((-30.0, 30.0)))
                .axis(1, Some((-30.0, 30.0)))
                .axis(2, Some((-20.0, 20.0))),
            BoneSpec::new("head", Head, Some("torso"), Vec3::new(0.0, 1.75, 0.0))
                .pivot(Vec3::new(0.0, 1.58, 0.0))
                .size(0.12, 2.0)
                .axis(0, Some((-30.0, 30.0)))
                .axis(1, Some((-40.0, 40.0)))
                .axis(2, None),
        ];
        for (side, x) in [("l", -0.15_f32), ("r", 0.15)] {
            let thigh = format!("thigh_{}", side);
            let shin = format!("shin_{}", side);
            bones.push(
                BoneSpec::new(&thigh, Leg, Some("pelvis"), Vec3::new(x, 0.75, 0.0))
                    .pivot(Vec3::new(x, 0.95, 0.0))
                    .size(0.09, 3.0)
                    .axis(0, Some((-90.0, 45.0)))
                    .axis(1, None)
                    .axis(2, Some((-20.0, 20.0))),
            );
            bones.push(
                BoneSpec::new(&shin, Leg, Some(&thigh), Vec3::new(x, 0.38, 0.0))
                    .pivot(Vec3::new(x, 0.55, 0.0))
                    .size(0.08, 2.0)
                    .axis(0, Some((0.0, 120.0)))
                    .axis(1, None)
                    .axis(2, None),
            );
            bones.push(
                BoneSpec::new(&format!("foot_{}", side), Foot, Some(&shin), Vec3::new(x, 0.08, 0.05))
                    .pivot(Vec3::new(x, 0.16, 0.0))
                    .size(0.08, 1.0)
                    .axis(0, Some((-30.0, 30.0)))
                    .axis(1, None)
                    .axis(2, None),
            );
        }
        for (side, x) in [("l", -1.0_f32), ("r", 1.0)] {
            let arm = format!("arm_{}", side);
            bones.push(
                BoneSpec::new(&arm, Arm, Some("torso"), Vec3::new(0.3 * x, 1.3, 0.0))
                    .pivot(Vec3::new(0.24 * x, 1.45, 0.0))
                    .size(0.07, 1.5)
                    .axis(0, Some((-90.0, 90.0)))
                    .axis(1, None)
                    .axis(2, Some((-60.0, 60.0))),
            );
            bones.push(
                BoneSpec::new(&format!("hand_{}", side), Hand, Some(&arm), Vec3::new(0.3 * x, 1.05, 0.0))
                    .pivot(Vec3::new(0.3 * x, 1.15, 0.0))
                    .size(0.06, 0.5)
                    .axis(0, Some((-60.0, 60.0)))
                    .axis(1, None)
                    .axis(2, None),
            );
        }
        Self {
            name: "biped".to_string(),
            bones,
        }
    }

    /// Four-legged walker
    pub fn quadruped() -> Self {
        use BodyCategory::*;
        let mut bones = vec![
            BoneSpec::new("body", Torso, None, Vec3::new(0.0, 0.6, 0.0)).size(0.25, 8.0),
            BoneSpec::new("head", Head, Some("body"), Vec3::new(0.0, 0.75, 0.5))
                .pivot(Vec3::new(0.0, 0.68, 0.3))
                .size(0.12, 1.5)
                .axis(0, Some((-30.0, 30.0)))
                .axis(1, Some((-30.0, 30.0)))
                .axis(2, None),
        ];
        for (name, x, z) in [
            ("fl", -0.2_f32, 0.25_f32),
            ("fr", 0.2, 0.25),
            ("bl", -0.2, -0.25),
            ("br", 0.2, -0.25),
        ] {
            let upper = format!("leg_{}", name);
            bones.push(
                BoneSpec::new(&upper, Leg, Some("body"), Vec3::new(x, 0.4, z))
                    .pivot(Vec3::new(x, 0.55, z))
                    .size(0.08, 1.5)
                    .axis(0, Some((-60.0, 60.0)))
                    .axis(1, None)
                    .axis(2, Some((-20.0, 20.0))),
            );
            bones.push(
                BoneSpec::new(&format!("foot_{}", name), Foot, Some(&upper), Vec3::new(x, 0.1, z))
                    .pivot(Vec3::new(x, 0.25, z))
                    .size(0.1, 1.0)
                    .axis(0, Some((-60.0, 60.0)))
                    .axis(1, None)
                    .axis(2, None),
            );
        }
        Self {
            name: "quadruped".to_string(),
            bones,
        }
    }
}
