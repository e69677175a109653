//! Simple creature physics - no external physics engine
//!
//! Bodies are spheres integrated with position-based dynamics:
//! 1. gravity and queued impulses change velocities
//! 2. joint drives act as implicit spring-dampers on relative angular velocity
//! 3. positions and rotations are integrated
//! 4. joint limits, joint pivots and static collisions are projected
//! 5. velocities are re-derived from the corrected positions
//!
//! Everything runs in body and joint insertion order, so a run is fully
//! deterministic for a given sequence of calls.

use bitflags::bitflags;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use strider_terrain::{HeightGrid, Obstacle, Terrain};

use super::{
    from_euler_xyz, to_euler_xyz, BodyDesc, BodyHandle, BodyState, ContactEvent, ContactPhase,
    JointDesc, JointDrive, JointHandle, PhysicsBackend, GROUND_TAG, OBSTACLE_TAG, WALL_TAG,
};
use crate::error::PhysicsError;
use crate::types::AxisMask;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplePhysicsConfig {
    pub gravity: f32,
    pub solver_iterations: usize,
    /// Share of a grounded body's horizontal slide removed per solver iteration
    pub ground_friction: f32,
    /// Penetrations deeper than this are not resolved, the body falls through
    pub tunnel_depth: f32,
    pub max_linear_speed: f32,
    pub max_angular_speed: f32,
}

impl Default for SimplePhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: -9.81,
            solver_iterations: 4,
            ground_friction: 0.3,
            tunnel_depth: 1.0,
            max_linear_speed: 100.0,
            max_angular_speed: 50.0,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct Surfaces: u8 {
        const GROUND = 1 << 0;
        const WALL = 1 << 1;
        const OBSTACLE = 1 << 2;
    }
}

const SURFACE_TAGS: [(Surfaces, &str); 3] = [
    (Surfaces::GROUND, GROUND_TAG),
    (Surfaces::WALL, WALL_TAG),
    (Surfaces::OBSTACLE, OBSTACLE_TAG),
];

#[derive(Debug, Clone)]
struct Body {
    radius: f32,
    inv_mass: f32,
    inertia: f32,
    position: Vec3,
    rotation: Quat,
    linvel: Vec3,
    angvel: Vec3,
    pending_impulse: Vec3,
    contacts: Surfaces,
    /// Last contact point per surface, indexed like `SURFACE_TAGS`
    contact_points: [Vec3; 3],
}

#[derive(Debug, Clone)]
struct Joint {
    parent: usize,
    child: usize,
    parent_anchor: Vec3,
    child_anchor: Vec3,
    /// Child rotation relative to the parent at creation time
    rest: Quat,
    locked: AxisMask,
    limits: [(f32, f32); 3],
    drive: Option<JointDrive>,
}

/// Static world the bodies collide with
#[derive(Debug, Clone)]
struct StaticWorld {
    heights: HeightGrid,
    obstacles: Vec<Obstacle>,
    extent: f32,
}

/// Deterministic position-based physics world
#[derive(Debug, Clone, Default)]
pub struct SimplePhysics {
    config: SimplePhysicsConfig,
    bodies: Vec<Body>,
    joints: Vec<Joint>,
    world: Option<StaticWorld>,
    events: Vec<ContactEvent>,
}

impl SimplePhysics {
    pub fn new(config: SimplePhysicsConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn body_index(&self, body: BodyHandle) -> Result<usize, PhysicsError> {
        let index = body.0 as usize;
        if index < self.bodies.len() {
            Ok(index)
        } else {
            Err(PhysicsError::UnknownBody(body))
        }
    }

    /// Two distinct mutable bodies
    fn pair_mut(&mut self, a: usize, b: usize) -> (&mut Body, &mut Body) {
        if a < b {
            let (left, right) = self.bodies.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.bodies.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }

    fn apply_drives(&mut self, dt: f32) {
        for j in 0..self.joints.len() {
            let joint = self.joints[j].clone();
            let Some(drive) = joint.drive else {
                continue;
            };
            let (parent, child) = self.pair_mut(joint.parent, joint.child);

            let frame = parent.rotation * joint.rest;
            let local = frame.inverse() * child.rotation;
            let mut error = drive.target * local.inverse();
            if error.w < 0.0 {
                error = -error;
            }
            let error = frame * error.to_scaled_axis();

            let inertia = 1.0 / (1.0 / child.inertia + 1.0 / parent.inertia);
            let rel = child.angvel - parent.angvel;
            let k = drive.spring.max(0.0);
            let c = drive.damper.max(0.0);
            let delta = dt * (error * k - rel * (c + dt * k)) / (inertia + dt * c + dt * dt * k);

            let impulse = (delta * inertia).clamp_length_max(drive.max_force.max(0.0) * dt);
            child.angvel += impulse / child.inertia;
            parent.angvel -= impulse / parent.inertia;
        }
    }

    fn project_joints(&mut self) {
        for j in 0..self.joints.len() {
            let joint = self.joints[j].clone();
            let (parent, child) = self.pair_mut(joint.parent, joint.child);

            // Angular limits; locked axes are held at zero
            let frame = parent.rotation * joint.rest;
            let angles = to_euler_xyz(frame.inverse() * child.rotation);
            let mut clamped = angles;
            for (axis, mask) in AxisMask::AXES.iter().enumerate() {
                clamped[axis] = if joint.locked.contains(*mask) {
                    0.0
                } else {
                    let (low, high) = joint.limits[axis];
                    angles[axis].clamp(low, high)
                };
            }
            if clamped != angles {
                child.rotation = (frame * from_euler_xyz(clamped)).normalize();
            }

            // Pivot: both anchors must coincide
            let pa = parent.position + parent.rotation * joint.parent_anchor;
            let pc = child.position + child.rotation * joint.child_anchor;
            let gap = pc - pa;
            let w = parent.inv_mass + child.inv_mass;
            if w > 0.0 {
                parent.position += gap * (parent.inv_mass / w);
                child.position -= gap * (child.inv_mass / w);
            }
        }
    }

    fn collide(&mut self, previous: &[Vec3], touched: &mut [Surfaces]) {
        let Some(world) = &self.world else {
            return;
        };
        let friction = self.config.ground_friction.clamp(0.0, 1.0);

        for (i, body) in self.bodies.iter_mut().enumerate() {
            let r = body.radius;

            for obstacle in &world.obstacles {
                let min = obstacle.center - obstacle.half_extents;
                let max = obstacle.center + obstacle.half_extents;
                let closest = body.position.clamp(min, max);
                let offset = body.position - closest;
                let dist = offset.length();
                if dist < r {
                    if dist > 1e-6 {
                        body.position += offset / dist * (r - dist);
                    } else {
                        body.position.y = max.y + r;
                    }
                    touched[i] |= Surfaces::OBSTACLE;
                    body.contact_points[2] = closest;
                }
            }

            let p = &mut body.position;
            let mut wall_point = None;
            if p.x < r {
                p.x = r;
                wall_point = Some(Vec3::new(0.0, p.y, p.z));
            } else if p.x > world.extent - r {
                p.x = world.extent - r;
                wall_point = Some(Vec3::new(world.extent, p.y, p.z));
            }
            if p.z < r {
                p.z = r;
                wall_point = Some(Vec3::new(p.x, p.y, 0.0));
            } else if p.z > world.extent - r {
                p.z = world.extent - r;
                wall_point = Some(Vec3::new(p.x, p.y, world.extent));
            }
            if let Some(point) = wall_point {
                touched[i] |= Surfaces::WALL;
                body.contact_points[1] = point;
            }

            let ground = world.heights.sample(body.position.x, body.position.z);
            let penetration = ground + r - body.position.y;
            if penetration > 0.0 && penetration < self.config.tunnel_depth {
                body.position.y += penetration;
                let slide = body.position - previous[i];
                body.position.x -= slide.x * friction;
                body.position.z -= slide.z * friction;
                touched[i] |= Surfaces::GROUND;
                body.contact_points[0] = Vec3::new(body.position.x, ground, body.position.z);
            }
        }
    }

    fn emit_contact_events(&mut self, touched: &[Surfaces]) {
        for (i, body) in self.bodies.iter_mut().enumerate() {
            let now = touched[i];
            for (slot, (flag, tag)) in SURFACE_TAGS.iter().enumerate() {
                let was = body.contacts.contains(*flag);
                let is = now.contains(*flag);
                if was == is {
                    continue;
                }
                self.events.push(ContactEvent {
                    body: BodyHandle(i as u32),
                    surface: tag.to_string(),
                    phase: if is {
                        ContactPhase::Started
                    } else {
                        ContactPhase::Stopped
                    },
                    point: body.contact_points[slot],
                });
            }
            body.contacts = now;
        }
    }
}

impl PhysicsBackend for SimplePhysics {
    fn add_body(&mut self, desc: &BodyDesc) -> Result<BodyHandle, PhysicsError> {
        if !(desc.radius > 0.0 && desc.mass > 0.0)
            || !desc.position.is_finite()
            || !desc.rotation.is_finite()
        {
            return Err(PhysicsError::InvalidDescription(format!(
                "body needs positive radius and mass and a finite pose, got {:?}",
                desc
            )));
        }
        let handle = BodyHandle(self.bodies.len() as u32);
        self.bodies.push(Body {
            radius: desc.radius,
            inv_mass: 1.0 / desc.mass,
            inertia: 0.4 * desc.mass * desc.radius * desc.radius,
            position: desc.position,
            rotation: desc.rotation.normalize(),
            linvel: Vec3::ZERO,
            angvel: Vec3::ZERO,
            pending_impulse: Vec3::ZERO,
            contacts: Surfaces::empty(),
            contact_points: [Vec3::ZERO; 3],
        });
        Ok(handle)
    }

    fn add_joint(&mut self, desc: &JointDesc) -> Result<JointHandle, PhysicsError> {
        let parent = self.body_index(desc.parent)?;
        let child = self.body_index(desc.child)?;
        if parent == child {
            return Err(PhysicsError::InvalidDescription(
                "joint must connect two different bodies".to_string(),
            ));
        }
        let rest = self.bodies[parent].rotation.inverse() * self.bodies[child].rotation;
        let handle = JointHandle(self.joints.len() as u32);
        self.joints.push(Joint {
            parent,
            child,
            parent_anchor: desc.parent_anchor,
            child_anchor: desc.child_anchor,
            rest,
            locked: desc.locked,
            limits: desc.limits,
            drive: None,
        });
        Ok(handle)
    }

    fn body_state(&self, body: BodyHandle) -> Result<BodyState, PhysicsError> {
        let b = &self.bodies[self.body_index(body)?];
        Ok(BodyState {
            position: b.position,
            rotation: b.rotation,
            linvel: b.linvel,
            angvel: b.angvel,
        })
    }

    fn set_body_pose(
        &mut self,
        body: BodyHandle,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), PhysicsError> {
        let index = self.body_index(body)?;
        let b = &mut self.bodies[index];
        b.position = position;
        b.rotation = rotation.normalize();
        b.contacts = Surfaces::empty();
        Ok(())
    }

    fn set_body_velocity(
        &mut self,
        body: BodyHandle,
        linvel: Vec3,
        angvel: Vec3,
    ) -> Result<(), PhysicsError> {
        let index = self.body_index(body)?;
        let b = &mut self.bodies[index];
        b.linvel = linvel;
        b.angvel = angvel;
        b.pending_impulse = Vec3::ZERO;
        Ok(())
    }

    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec3) -> Result<(), PhysicsError> {
        let index = self.body_index(body)?;
        self.bodies[index].pending_impulse += impulse;
        Ok(())
    }

    fn set_joint_drive(
        &mut self,
        joint: JointHandle,
        drive: &JointDrive,
    ) -> Result<(), PhysicsError> {
        let j = self
            .joints
            .get_mut(joint.0 as usize)
            .ok_or(PhysicsError::UnknownJoint(joint))?;
        j.drive = Some(*drive);
        Ok(())
    }

    fn sync_terrain(&mut self, terrain: &Terrain) -> Result<(), PhysicsError> {
        self.world = Some(StaticWorld {
            heights: terrain.grid().clone(),
            obstacles: terrain.obstacles().to_vec(),
            extent: terrain.size(),
        });
        log::debug!(
            "SimplePhysics: synced terrain generation {} ({} obstacles)",
            terrain.generation(),
            terrain.obstacles().len()
        );
        Ok(())
    }

    fn step(&mut self, dt: f32) -> Result<(), PhysicsError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(PhysicsError::InvalidDescription(format!(
                "timestep must be positive, got {}",
                dt
            )));
        }

        let gravity = Vec3::new(0.0, self.config.gravity, 0.0);
        for body in &mut self.bodies {
            body.linvel += gravity * dt + body.pending_impulse * body.inv_mass;
            body.pending_impulse = Vec3::ZERO;
        }

        self.apply_drives(dt);

        let previous: Vec<(Vec3, Quat)> = self
            .bodies
            .iter()
            .map(|b| (b.position, b.rotation))
            .collect();
        let previous_positions: Vec<Vec3> = previous.iter().map(|(p, _)| *p).collect();

        for body in &mut self.bodies {
            body.linvel = body.linvel.clamp_length_max(self.config.max_linear_speed);
            body.angvel = body.angvel.clamp_length_max(self.config.max_angular_speed);
            body.position += body.linvel * dt;
            body.rotation = (Quat::from_scaled_axis(body.angvel * dt) * body.rotation).normalize();
        }

        let mut touched = vec![Surfaces::empty(); self.bodies.len()];
        for _ in 0..self.config.solver_iterations.max(1) {
            self.project_joints();
            self.collide(&previous_positions, &mut touched);
        }

        for (i, body) in self.bodies.iter_mut().enumerate() {
            let (position, rotation) = previous[i];
            body.linvel = (body.position - position) / dt;
            let mut turn = body.rotation * rotation.inverse();
            if turn.w < 0.0 {
                turn = -turn;
            }
            body.angvel = turn.to_scaled_axis() / dt;

            if !(body.position.is_finite() && body.rotation.is_finite()) {
                return Err(PhysicsError::NonFiniteState(BodyHandle(i as u32)));
            }
        }

        self.emit_contact_events(&touched);
        Ok(())
    }

    fn drain_contact_events(&mut self) -> Vec<ContactEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;
    use strider_terrain::TerrainConfig;

    fn flat_terrain() -> Terrain {
        let mut terrain = Terrain::new(TerrainConfig {
            size: 32,
            generate_heights: false,
            ..Default::default()
        })
        .unwrap();
        terrain.regenerate(&mut Xoshiro256StarStar::seed_from_u64(0));
        terrain
    }

    fn ball(physics: &mut SimplePhysics, position: Vec3) -> BodyHandle {
        physics
            .add_body(&BodyDesc {
                position,
                rotation: Quat::IDENTITY,
                radius: 0.5,
                mass: 1.0,
            })
            .unwrap()
    }

    #[test]
    fn test_body_falls_and_lands_on_ground() {
        let mut physics = SimplePhysics::default();
        physics.sync_terrain(&flat_terrain()).unwrap();
        let body = ball(&mut physics, Vec3::new(16.0, 3.0, 16.0));

        let mut started = 0;
        for _ in 0..200 {
            physics.step(0.02).unwrap();
            started += physics
                .drain_contact_events()
                .iter()
                .filter(|e| e.surface == GROUND_TAG && e.phase == ContactPhase::Started)
                .count();
        }

        let state = physics.body_state(body).unwrap();
        assert!((state.position.y - 0.5).abs() < 1e-3);
        assert_eq!(started, 1);
    }

    #[test]
    fn test_without_terrain_body_keeps_falling() {
        let mut physics = SimplePhysics::default();
        let body = ball(&mut physics, Vec3::new(16.0, 3.0, 16.0));
        for _ in 0..100 {
            physics.step(0.02).unwrap();
        }
        assert!(physics.body_state(body).unwrap().position.y < -10.0);
    }

    #[test]
    fn test_teleport_reports_contact_again() {
        let mut physics = SimplePhysics::default();
        physics.sync_terrain(&flat_terrain()).unwrap();
        let body = ball(&mut physics, Vec3::new(16.0, 0.5, 16.0));
        physics.step(0.02).unwrap();
        assert_eq!(physics.drain_contact_events().len(), 1);

        physics
            .set_body_pose(body, Vec3::new(10.0, 0.5, 10.0), Quat::IDENTITY)
            .unwrap();
        physics.step(0.02).unwrap();
        let events = physics.drain_contact_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].phase, ContactPhase::Started);
    }

    #[test]
    fn test_pivot_keeps_bodies_connected() {
        let mut physics = SimplePhysics::default();
        let a = ball(&mut physics, Vec3::new(0.0, 10.0, 0.0));
        let b = ball(&mut physics, Vec3::new(0.0, 9.0, 0.0));
        physics
            .add_joint(&JointDesc {
                parent: a,
                child: b,
                parent_anchor: Vec3::new(0.0, -0.5, 0.0),
                child_anchor: Vec3::new(0.0, 0.5, 0.0),
                locked: AxisMask::empty(),
                limits: [(-1.0, 1.0); 3],
            })
            .unwrap();
        physics.apply_impulse(a, Vec3::new(3.0, 0.0, 0.0)).unwrap();
        for _ in 0..20 {
            physics.step(0.02).unwrap();
        }
        let (sa, sb) = (physics.body_state(a).unwrap(), physics.body_state(b).unwrap());
        let gap = (sa.position + sa.rotation * Vec3::new(0.0, -0.5, 0.0))
            - (sb.position + sb.rotation * Vec3::new(0.0, 0.5, 0.0));
        assert!(gap.length() < 0.05, "joint gap {}", gap.length());
    }

    #[test]
    fn test_drive_rotates_child_towards_target() {
        let mut physics = SimplePhysics::default();
        let a = ball(&mut physics, Vec3::new(0.0, 10.0, 0.0));
        let b = ball(&mut physics, Vec3::new(0.0, 9.0, 0.0));
        let joint = physics
            .add_joint(&JointDesc {
                parent: a,
                child: b,
                parent_anchor: Vec3::new(0.0, -0.5, 0.0),
                child_anchor: Vec3::new(0.0, 0.5, 0.0),
                locked: AxisMask::Y | AxisMask::Z,
                limits: [(-1.0, 1.0); 3],
            })
            .unwrap();
        physics
            .set_joint_drive(
                joint,
                &JointDrive {
                    target: Quat::from_rotation_x(0.5),
                    spring: 40000.0,
                    damper: 5000.0,
                    max_force: 20000.0,
                },
            )
            .unwrap();
        for _ in 0..50 {
            physics.step(0.02).unwrap();
        }
        let (sa, sb) = (physics.body_state(a).unwrap(), physics.body_state(b).unwrap());
        let local = to_euler_xyz(sa.rotation.inverse() * sb.rotation);
        assert!(local[0] > 0.1, "x rotation {}", local[0]);
        assert!(local[1].abs() < 1e-3);
        assert!(local[2].abs() < 1e-3);
    }

    #[test]
    fn test_unknown_handles_rejected() {
        let mut physics = SimplePhysics::default();
        assert_eq!(
            physics.body_state(BodyHandle(3)),
            Err(PhysicsError::UnknownBody(BodyHandle(3)))
        );
        assert!(physics
            .set_joint_drive(
                JointHandle(0),
                &JointDrive {
                    target: Quat::IDENTITY,
                    spring: 1.0,
                    damper: 1.0,
                    max_force: 1.0
                }
            )
            .is_err());
    }
}
