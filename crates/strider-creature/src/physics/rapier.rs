//! rapier3d physics backend
//!
//! Creature bones become dynamic ball colliders connected by generic joints
//! whose angular axes carry position motors. The terrain heightmap becomes a
//! heightfield collider, and walls and obstacles become cuboids. Contacts are
//! diffed against the previous step's active pairs, which yields the same
//! started/stopped events the simple integrator produces.

use ahash::{AHashMap, AHashSet};
use glam::{Quat, Vec3};
use rapier3d::na::{DMatrix, UnitQuaternion};
use rapier3d::prelude::*;
use strider_terrain::Terrain;

use super::{
    to_euler_xyz, BodyDesc, BodyHandle, BodyState, ContactEvent, ContactPhase, JointDesc,
    JointDrive, JointHandle, PhysicsBackend, GROUND_TAG, OBSTACLE_TAG, WALL_TAG,
};
use crate::error::PhysicsError;
use crate::types::AxisMask;

const ANGULAR_AXES: [JointAxis; 3] = [JointAxis::AngX, JointAxis::AngY, JointAxis::AngZ];
const WALL_HEIGHT: f32 = 40.0;

fn to_vector(v: Vec3) -> Vector<Real> {
    vector![v.x, v.y, v.z]
}

fn to_vec3(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

fn to_rotation(q: Quat) -> UnitQuaternion<Real> {
    UnitQuaternion::from_quaternion(rapier3d::na::Quaternion::new(q.w, q.x, q.y, q.z))
}

fn to_quat(q: &UnitQuaternion<Real>) -> Quat {
    Quat::from_xyzw(q.i, q.j, q.k, q.w)
}

fn to_isometry(position: Vec3, rotation: Quat) -> Isometry<Real> {
    Isometry::from_parts(Translation::from(to_vector(position)), to_rotation(rotation))
}

/// Physics world backed by rapier3d
pub struct RapierPhysics {
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: BroadPhase,
    narrow_phase: NarrowPhase,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    gravity: Vector<Real>,

    bodies: Vec<RigidBodyHandle>,
    joints: Vec<ImpulseJointHandle>,
    body_of_collider: AHashMap<ColliderHandle, BodyHandle>,
    static_colliders: AHashMap<ColliderHandle, &'static str>,
    active_contacts: AHashSet<(BodyHandle, &'static str)>,
    events: Vec<ContactEvent>,
}

impl RapierPhysics {
    pub fn new(gravity: f32) -> Self {
        Self {
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            pipeline: PhysicsPipeline::new(),
            integration_parameters: IntegrationParameters::default(),
            island_manager: IslandManager::new(),
            broad_phase: BroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            gravity: vector![0.0, gravity, 0.0],
            bodies: Vec::new(),
            joints: Vec::new(),
            body_of_collider: AHashMap::new(),
            static_colliders: AHashMap::new(),
            active_contacts: AHashSet::new(),
            events: Vec::new(),
        }
    }

    fn rigid_body(&self, body: BodyHandle) -> Result<&RigidBody, PhysicsError> {
        self.bodies
            .get(body.0 as usize)
            .and_then(|h| self.rigid_body_set.get(*h))
            .ok_or(PhysicsError::UnknownBody(body))
    }

    fn rigid_body_mut(&mut self, body: BodyHandle) -> Result<&mut RigidBody, PhysicsError> {
        let handle = *self
            .bodies
            .get(body.0 as usize)
            .ok_or(PhysicsError::UnknownBody(body))?;
        self.rigid_body_set
            .get_mut(handle)
            .ok_or(PhysicsError::UnknownBody(body))
    }

    fn clear_static_world(&mut self) {
        let handles: Vec<ColliderHandle> = self.static_colliders.keys().copied().collect();
        for handle in handles {
            self.collider_set.remove(
                handle,
                &mut self.island_manager,
                &mut self.rigid_body_set,
                false,
            );
        }
        self.static_colliders.clear();
        self.active_contacts.clear();
    }

    fn insert_static(&mut self, collider: Collider, tag: &'static str) {
        let handle = self.collider_set.insert(collider);
        self.static_colliders.insert(handle, tag);
    }

    /// Active body/surface pairs with a representative contact point
    fn current_contacts(&self) -> Vec<((BodyHandle, &'static str), Vec3)> {
        let mut contacts = Vec::new();
        for pair in self.narrow_phase.contact_pairs() {
            if !pair.has_any_active_contact {
                continue;
            }
            let (body, surface) = match (
                self.body_of_collider.get(&pair.collider1),
                self.static_colliders.get(&pair.collider2),
                self.body_of_collider.get(&pair.collider2),
                self.static_colliders.get(&pair.collider1),
            ) {
                (Some(body), Some(tag), _, _) | (_, _, Some(body), Some(tag)) => (*body, *tag),
                _ => continue,
            };
            let point = pair
                .manifolds
                .iter()
                .flat_map(|m| m.data.solver_contacts.iter())
                .next()
                .map(|c| Vec3::new(c.point.x, c.point.y, c.point.z))
                .unwrap_or(Vec3::ZERO);
            contacts.push(((body, surface), point));
        }
        contacts.sort_by(|a, b| a.0.cmp(&b.0));
        contacts
    }
}

impl PhysicsBackend for RapierPhysics {
    fn add_body(&mut self, desc: &BodyDesc) -> Result<BodyHandle, PhysicsError> {
        if !(desc.radius > 0.0 && desc.mass > 0.0) {
            return Err(PhysicsError::InvalidDescription(format!(
                "body needs positive radius and mass, got {:?}",
                desc
            )));
        }
        let rigid_body = RigidBodyBuilder::dynamic()
            .position(to_isometry(desc.position, desc.rotation))
            .build();
        let rb_handle = self.rigid_body_set.insert(rigid_body);
        let collider = ColliderBuilder::ball(desc.radius)
            .mass(desc.mass)
            .friction(0.8)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .build();
        let collider_handle =
            self.collider_set
                .insert_with_parent(collider, rb_handle, &mut self.rigid_body_set);

        let handle = BodyHandle(self.bodies.len() as u32);
        self.bodies.push(rb_handle);
        self.body_of_collider.insert(collider_handle, handle);
        Ok(handle)
    }

    fn add_joint(&mut self, desc: &JointDesc) -> Result<JointHandle, PhysicsError> {
        let parent = *self.rigid_body(desc.parent)?.rotation();
        let child = *self.rigid_body(desc.child)?.rotation();
        let rest = parent.inverse() * child;

        let mut locked = JointAxesMask::LIN_AXES;
        for (axis, mask) in AxisMask::AXES.iter().enumerate() {
            if desc.locked.contains(*mask) {
                locked |= match axis {
                    0 => JointAxesMask::ANG_X,
                    1 => JointAxesMask::ANG_Y,
                    _ => JointAxesMask::ANG_Z,
                };
            }
        }

        let mut builder = GenericJointBuilder::new(locked)
            .local_frame1(Isometry::from_parts(
                Translation::from(to_vector(desc.parent_anchor)),
                rest,
            ))
            .local_frame2(Isometry::from_parts(
                Translation::from(to_vector(desc.child_anchor)),
                UnitQuaternion::identity(),
            ))
            .contacts_enabled(false);
        for (axis, mask) in AxisMask::AXES.iter().enumerate() {
            if !desc.locked.contains(*mask) {
                let (low, high) = desc.limits[axis];
                builder = builder.limits(ANGULAR_AXES[axis], [low, high]);
            }
        }

        let parent_handle = self.bodies[desc.parent.0 as usize];
        let child_handle = self.bodies[desc.child.0 as usize];
        let joint_handle =
            self.impulse_joint_set
                .insert(parent_handle, child_handle, builder.build(), true);

        let handle = JointHandle(self.joints.len() as u32);
        self.joints.push(joint_handle);
        Ok(handle)
    }

    fn body_state(&self, body: BodyHandle) -> Result<BodyState, PhysicsError> {
        let rb = self.rigid_body(body)?;
        Ok(BodyState {
            position: to_vec3(rb.translation()),
            rotation: to_quat(rb.rotation()),
            linvel: to_vec3(rb.linvel()),
            angvel: to_vec3(rb.angvel()),
        })
    }

    fn set_body_pose(
        &mut self,
        body: BodyHandle,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), PhysicsError> {
        self.rigid_body_mut(body)?
            .set_position(to_isometry(position, rotation), true);
        self.active_contacts.retain(|(b, _)| *b != body);
        Ok(())
    }

    fn set_body_velocity(
        &mut self,
        body: BodyHandle,
        linvel: Vec3,
        angvel: Vec3,
    ) -> Result<(), PhysicsError> {
        let rb = self.rigid_body_mut(body)?;
        rb.set_linvel(to_vector(linvel), true);
        rb.set_angvel(to_vector(angvel), true);
        rb.reset_forces(true);
        Ok(())
    }

    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec3) -> Result<(), PhysicsError> {
        self.rigid_body_mut(body)?
            .apply_impulse(to_vector(impulse), true);
        Ok(())
    }

    fn set_joint_drive(
        &mut self,
        joint: JointHandle,
        drive: &JointDrive,
    ) -> Result<(), PhysicsError> {
        let handle = *self
            .joints
            .get(joint.0 as usize)
            .ok_or(PhysicsError::UnknownJoint(joint))?;
        let impulse_joint = self
            .impulse_joint_set
            .get_mut(handle)
            .ok_or(PhysicsError::UnknownJoint(joint))?;

        let targets = to_euler_xyz(drive.target);
        for (axis, target) in ANGULAR_AXES.iter().zip(targets) {
            impulse_joint
                .data
                .set_motor_position(*axis, target, drive.spring, drive.damper)
                .set_motor_max_force(*axis, drive.max_force);
        }
        Ok(())
    }

    fn sync_terrain(&mut self, terrain: &Terrain) -> Result<(), PhysicsError> {
        self.clear_static_world();

        let grid = terrain.grid();
        let resolution = grid.resolution();
        let size = grid.size();
        let heights = DMatrix::from_fn(resolution, resolution, |iz, ix| grid.vertex(ix, iz));
        let ground = ColliderBuilder::heightfield(heights, vector![size, 1.0, size])
            .translation(vector![size * 0.5, 0.0, size * 0.5])
            .friction(0.8)
            .build();
        self.insert_static(ground, GROUND_TAG);

        let half = size * 0.5;
        for (center, half_extents) in [
            (vector![-0.5, WALL_HEIGHT * 0.5, half], vector![0.5, WALL_HEIGHT * 0.5, half]),
            (vector![size + 0.5, WALL_HEIGHT * 0.5, half], vector![0.5, WALL_HEIGHT * 0.5, half]),
            (vector![half, WALL_HEIGHT * 0.5, -0.5], vector![half, WALL_HEIGHT * 0.5, 0.5]),
            (vector![half, WALL_HEIGHT * 0.5, size + 0.5], vector![half, WALL_HEIGHT * 0.5, 0.5]),
        ] {
            let wall = ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
                .translation(center)
                .build();
            self.insert_static(wall, WALL_TAG);
        }

        for obstacle in terrain.obstacles() {
            let e = obstacle.half_extents;
            let collider = ColliderBuilder::cuboid(e.x, e.y, e.z)
                .translation(to_vector(obstacle.center))
                .build();
            self.insert_static(collider, OBSTACLE_TAG);
        }

        log::debug!(
            "RapierPhysics: synced terrain generation {} ({}x{} heightfield, {} obstacles)",
            terrain.generation(),
            resolution,
            resolution,
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
        self.integration_parameters.dt = dt;

        let physics_hooks = ();
        let event_handler = ();
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &physics_hooks,
            &event_handler,
        );

        for (i, handle) in self.bodies.iter().enumerate() {
            if let Some(rb) = self.rigid_body_set.get(*handle) {
                if !rb.translation().iter().all(|v| v.is_finite()) {
                    return Err(PhysicsError::NonFiniteState(BodyHandle(i as u32)));
                }
            }
        }

        let current = self.current_contacts();
        let now: AHashSet<(BodyHandle, &'static str)> = current.iter().map(|(k, _)| *k).collect();

        let mut stopped: Vec<(BodyHandle, &'static str)> = self
            .active_contacts
            .iter()
            .filter(|k| !now.contains(*k))
            .copied()
            .collect();
        stopped.sort();
        for (body, surface) in stopped {
            let point = self
                .body_state(body)
                .map(|s| s.position)
                .unwrap_or(Vec3::ZERO);
            self.events.push(ContactEvent {
                body,
                surface: surface.to_string(),
                phase: ContactPhase::Stopped,
                point,
            });
        }
        for (key, point) in &current {
            if !self.active_contacts.contains(key) {
                self.events.push(ContactEvent {
                    body: key.0,
                    surface: key.1.to_string(),
                    phase: ContactPhase::Started,
                    point: *point,
                });
            }
        }
        self.active_contacts = now;
        Ok(())
    }

    fn drain_contact_events(&mut self) -> Vec<ContactEvent> {
        std::mem::take(&mut self.events)
    }
}
