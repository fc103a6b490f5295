//! Physics world ownership using Rapier3d.

use std::collections::HashMap;

use nalgebra::Vector3;
use rapier3d::dynamics::{
    CCDSolver, GenericJoint, ImpulseJoint, ImpulseJointHandle, ImpulseJointSet,
    IntegrationParameters, IslandManager, MultibodyJointSet, RigidBody, RigidBodyHandle,
    RigidBodySet,
};
use rapier3d::geometry::{BroadPhaseMultiSap, Collider, ColliderHandle, ColliderSet, NarrowPhase};
use rapier3d::pipeline::{PhysicsPipeline, QueryPipeline};
use scenephys_scene::EntityId;

use crate::config::PhysicsConfig;

/// Rapier world plus the registry mapping engine bodies back to scene entities.
///
/// The registry is written only by the rigidbody synchronizer that owns each body; everything
/// else reads it through [`PhysicsWorld::entity_for_body`].
pub struct PhysicsWorld {
    // Rapier components
    pipeline: PhysicsPipeline,
    gravity: Vector3<f32>,
    integration_params: IntegrationParameters,
    islands: IslandManager,
    broad_phase: BroadPhaseMultiSap,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,

    body_entities: HashMap<RigidBodyHandle, EntityId>,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsWorld {
    /// Create an empty physics world with standard gravity.
    pub fn new() -> Self {
        Self {
            pipeline: PhysicsPipeline::new(),
            gravity: Vector3::new(0.0, -9.81, 0.0),
            integration_params: IntegrationParameters::default(),
            islands: IslandManager::new(),
            broad_phase: BroadPhaseMultiSap::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            body_entities: HashMap::new(),
        }
    }

    /// Create an empty physics world from a configuration.
    pub fn from_config(config: &PhysicsConfig) -> Self {
        let mut world = Self::new();
        world.gravity = config.gravity;
        world.integration_params.dt = config.timestep;
        world
    }

    /// Step the physics simulation by dt seconds.
    pub fn step(&mut self, dt: f32) {
        self.integration_params.dt = dt;

        self.pipeline.step(
            &self.gravity,
            &self.integration_params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );
    }

    /// Clear user forces and torques on every body. Forces apply for a single step.
    pub fn reset_forces(&mut self) {
        for (_, body) in self.bodies.iter_mut() {
            body.reset_forces(false);
            body.reset_torques(false);
        }
    }

    /// Gravity vector.
    pub fn gravity(&self) -> Vector3<f32> {
        self.gravity
    }

    /// Set gravity vector.
    pub fn set_gravity(&mut self, gravity: Vector3<f32>) {
        self.gravity = gravity;
    }

    /// Insert a body and register it as belonging to `entity`.
    pub(crate) fn add_body(&mut self, entity: EntityId, body: RigidBody) -> RigidBodyHandle {
        let handle = self.bodies.insert(body);
        self.body_entities.insert(handle, entity);
        handle
    }

    /// Remove a body together with its colliders and attached joints, and drop its registry
    /// entry. Returns false if the body was already gone.
    pub(crate) fn remove_body(&mut self, handle: RigidBodyHandle) -> bool {
        self.body_entities.remove(&handle);
        self.bodies
            .remove(
                handle,
                &mut self.islands,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            )
            .is_some()
    }

    /// Attach a collider to a body.
    pub(crate) fn add_collider(
        &mut self,
        parent: RigidBodyHandle,
        collider: Collider,
    ) -> ColliderHandle {
        self.colliders
            .insert_with_parent(collider, parent, &mut self.bodies)
    }

    /// Insert a constraint between two bodies.
    pub fn add_constraint(
        &mut self,
        body1: RigidBodyHandle,
        body2: RigidBodyHandle,
        joint: GenericJoint,
    ) -> ImpulseJointHandle {
        self.impulse_joints.insert(body1, body2, joint, true)
    }

    /// Remove a constraint. Returns false if it was already gone.
    pub fn remove_constraint(&mut self, handle: ImpulseJointHandle) -> bool {
        self.impulse_joints.remove(handle, true).is_some()
    }

    /// Entity owning the given engine body.
    pub fn entity_for_body(&self, handle: RigidBodyHandle) -> Option<EntityId> {
        self.body_entities.get(&handle).copied()
    }

    /// Entity owning the body a collider is attached to.
    pub fn entity_for_collider(&self, handle: ColliderHandle) -> Option<EntityId> {
        let parent = self.colliders.get(handle)?.parent()?;
        self.entity_for_body(parent)
    }

    /// Engine body.
    pub fn body(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle)
    }

    /// Mutable engine body.
    pub fn body_mut(&mut self, handle: RigidBodyHandle) -> Option<&mut RigidBody> {
        self.bodies.get_mut(handle)
    }

    /// Engine collider.
    pub fn collider(&self, handle: ColliderHandle) -> Option<&Collider> {
        self.colliders.get(handle)
    }

    pub(crate) fn collider_mut(&mut self, handle: ColliderHandle) -> Option<&mut Collider> {
        self.colliders.get_mut(handle)
    }

    /// Engine constraint.
    pub fn constraint(&self, handle: ImpulseJointHandle) -> Option<&ImpulseJoint> {
        self.impulse_joints.get(handle)
    }

    /// Number of live bodies.
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Number of live colliders.
    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    /// Number of live constraints.
    pub fn constraint_count(&self) -> usize {
        self.impulse_joints.len()
    }

    /// Entity pairs whose solid colliders are currently touching.
    pub fn contact_pairs(&self) -> Vec<(EntityId, EntityId)> {
        self.narrow_phase
            .contact_pairs()
            .filter(|pair| pair.has_any_active_contact)
            .filter_map(|pair| {
                Some((
                    self.entity_for_collider(pair.collider1)?,
                    self.entity_for_collider(pair.collider2)?,
                ))
            })
            .collect()
    }

    /// Entity pairs where at least one side is a trigger and the shapes overlap.
    pub fn trigger_pairs(&self) -> Vec<(EntityId, EntityId)> {
        self.narrow_phase
            .intersection_pairs()
            .filter(|(_, _, intersecting)| *intersecting)
            .filter_map(|(c1, c2, _)| {
                Some((self.entity_for_collider(c1)?, self.entity_for_collider(c2)?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapier3d::dynamics::{GenericJointBuilder, JointAxesMask, RigidBodyBuilder};
    use rapier3d::geometry::ColliderBuilder;
    use scenephys_scene::SceneGraph;

    fn two_entities() -> (EntityId, EntityId) {
        let mut scene = SceneGraph::new();
        (scene.spawn("a"), scene.spawn("b"))
    }

    #[test]
    fn test_registry_follows_body_lifetime() {
        let (a, _) = two_entities();
        let mut world = PhysicsWorld::new();

        let handle = world.add_body(a, RigidBodyBuilder::dynamic().build());
        assert_eq!(world.entity_for_body(handle), Some(a));

        assert!(world.remove_body(handle));
        assert_eq!(world.entity_for_body(handle), None);
        assert!(!world.remove_body(handle));
    }

    #[test]
    fn test_remove_body_drops_colliders_and_constraints() {
        let (a, b) = two_entities();
        let mut world = PhysicsWorld::new();

        let ha = world.add_body(a, RigidBodyBuilder::dynamic().build());
        let hb = world.add_body(b, RigidBodyBuilder::dynamic().build());
        let collider = world.add_collider(ha, ColliderBuilder::ball(0.5).build());
        assert_eq!(world.entity_for_collider(collider), Some(a));

        let joint = GenericJointBuilder::new(JointAxesMask::LOCKED_SPHERICAL_AXES).build();
        let constraint = world.add_constraint(ha, hb, joint);
        assert_eq!(world.constraint_count(), 1);

        world.remove_body(ha);
        assert_eq!(world.collider_count(), 0);
        assert!(world.constraint(constraint).is_none());
        assert!(!world.remove_constraint(constraint));
    }

    #[test]
    fn test_step_applies_gravity() {
        let (a, _) = two_entities();
        let mut world = PhysicsWorld::from_config(&PhysicsConfig::default());

        let handle = world.add_body(a, RigidBodyBuilder::dynamic().build());
        world.add_collider(handle, ColliderBuilder::ball(0.5).build());

        for _ in 0..10 {
            world.step(1.0 / 60.0);
        }

        let body = world.body(handle).unwrap();
        assert!(body.translation().y < 0.0);
        assert!(body.linvel().y < 0.0);
    }
}
