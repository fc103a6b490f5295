//! Rigidbody synchronization between a scene entity and a Rapier body.
//!
//! A [`Rigidbody`] owns at most one engine body. The body is (re)built lazily by
//! [`Rigidbody::process`] whenever the rigidbody is dirty, and is made of one engine collider
//! per [`scenephys_scene::ColliderComponent`] found in the entity's subtree (nested rigidbodies
//! excluded). Between rebuilds, scalar properties are patched on the live body and dirty
//! collider descriptors are refreshed in place.

use nalgebra::{Isometry3, Point3, UnitQuaternion, Vector3};
use parry3d::mass_properties::MassProperties;
use rapier3d::dynamics::{RigidBody, RigidBodyBuilder, RigidBodyHandle, RigidBodyType};
use rapier3d::geometry::{ColliderBuilder, ColliderHandle};
use scenephys_scene::{EntityId, SceneError, SceneGraph, Traverse};

use crate::config::RigidbodySettings;
use crate::error::{PhysicsError, Result};
use crate::joints::Joint;
use crate::shapes::{bounding_radius, build_shape};
use crate::world::PhysicsWorld;

/// Lifecycle state of a [`Rigidbody`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    /// No engine body has been built yet.
    Uninitialized,
    /// A rebuild is pending. The previous engine body may still be live until then.
    Dirty,
    /// The engine body is live and up to date.
    Active,
    /// The last build failed; no rebuild happens until [`Rigidbody::mark_dirty`].
    Blocked,
}

/// An engine collider built from one collider entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachedCollider {
    /// Entity carrying the collider descriptor.
    pub entity: EntityId,
    /// Engine collider holding the live shape.
    pub collider: ColliderHandle,
    /// Largest distance from the shape origin to the shape surface.
    pub bounding_radius: f32,
}

/// Adapter pairing a scene entity with one engine body.
#[derive(Debug)]
pub struct Rigidbody {
    entity: Option<EntityId>,

    mass: f32,
    is_kinematic: bool,
    linear_velocity: Vector3<f32>,
    angular_velocity: Vector3<f32>,
    linear_damping: f32,
    angular_damping: f32,
    sleep_speed_threshold: f32,
    sleep_time_limit: f32,
    preserve_velocity_on_rebuild: bool,

    dirty: bool,
    initialized: bool,
    blocked: bool,
    body: Option<RigidBodyHandle>,
    attached: Vec<AttachedCollider>,
    // Colliders in the subtree that produced no shape (unsupported kinds).
    skipped: Vec<EntityId>,
    joints: Vec<Joint>,
}

impl Default for Rigidbody {
    fn default() -> Self {
        Self::new(RigidbodySettings::default())
    }
}

impl Clone for Rigidbody {
    /// Copies the scalar configuration only; the clone is unattached and has no engine body,
    /// colliders or joints.
    fn clone(&self) -> Self {
        Self::new(self.settings())
    }
}

impl Rigidbody {
    /// Create an unattached rigidbody.
    ///
    /// A kinematic body gets zero mass, and a body with zero mass becomes kinematic.
    pub fn new(settings: RigidbodySettings) -> Self {
        let mut mass = settings.mass.max(0.0);
        let mut is_kinematic = settings.is_kinematic;
        if is_kinematic {
            mass = 0.0;
        } else if mass == 0.0 {
            is_kinematic = true;
        }

        Self {
            entity: None,
            mass,
            is_kinematic,
            linear_velocity: settings.velocity,
            angular_velocity: settings.angular_velocity,
            linear_damping: settings.linear_damping,
            angular_damping: settings.angular_damping,
            sleep_speed_threshold: settings.sleep_speed_threshold,
            sleep_time_limit: settings.sleep_time_limit,
            preserve_velocity_on_rebuild: settings.preserve_velocity_on_rebuild,
            dirty: true,
            initialized: false,
            blocked: false,
            body: None,
            attached: Vec::new(),
            skipped: Vec::new(),
            joints: Vec::new(),
        }
    }

    /// Snapshot of the scalar configuration, with the cached velocities.
    pub fn settings(&self) -> RigidbodySettings {
        RigidbodySettings {
            mass: self.mass,
            is_kinematic: self.is_kinematic,
            velocity: self.linear_velocity,
            angular_velocity: self.angular_velocity,
            linear_damping: self.linear_damping,
            angular_damping: self.angular_damping,
            sleep_speed_threshold: self.sleep_speed_threshold,
            sleep_time_limit: self.sleep_time_limit,
            preserve_velocity_on_rebuild: self.preserve_velocity_on_rebuild,
        }
    }

    /// Bind this rigidbody to `entity`. No engine object is created until the next
    /// [`Rigidbody::process`].
    pub fn attach(&mut self, entity: EntityId, scene: &mut SceneGraph) -> Result<()> {
        scene.set_rigidbody_root(entity, true)?;
        self.entity = Some(entity);
        Ok(())
    }

    /// Tear down the engine body and unbind from the entity.
    pub fn detach(&mut self, scene: &mut SceneGraph, world: &mut PhysicsWorld) {
        self.destroy(scene, world);
        if let Some(entity) = self.entity.take() {
            if scene.contains(entity) {
                // Entity exists, so this cannot fail.
                let _ = scene.set_rigidbody_root(entity, false);
            }
        }
    }

    /// Owning entity.
    pub fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    /// Live engine body handle.
    pub fn body_handle(&self) -> Option<RigidBodyHandle> {
        self.body
    }

    /// Lifecycle state.
    pub fn state(&self) -> BodyState {
        if self.blocked {
            BodyState::Blocked
        } else if self.dirty && self.initialized {
            BodyState::Dirty
        } else if self.dirty {
            BodyState::Uninitialized
        } else {
            BodyState::Active
        }
    }

    /// Whether a rebuild is pending.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether an engine body was built at least once.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Request a full rebuild on the next [`Rigidbody::process`]. Also lifts a blocked state.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.blocked = false;
    }

    /// Attached colliders, in attachment order.
    pub fn attached_colliders(&self) -> &[AttachedCollider] {
        &self.attached
    }

    /// Entities whose collider contributed a shape to the body, in attachment order.
    pub fn attached_collider_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.attached.iter().map(|a| a.entity)
    }

    /// Joints owned by this rigidbody.
    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub(crate) fn joints_mut(&mut self) -> &mut [Joint] {
        &mut self.joints
    }

    /// Add a joint. It is realized by the physics system once both bodies are live.
    pub fn add_joint(&mut self, joint: Joint) {
        self.joints.push(joint);
    }

    /// Destroy and remove every joint connecting to `connected`. Returns how many were removed.
    pub fn remove_joints_to(&mut self, connected: EntityId, world: &mut PhysicsWorld) -> usize {
        let before = self.joints.len();
        self.joints.retain_mut(|joint| {
            if joint.connected_entity() == connected {
                joint.destroy(world);
                false
            } else {
                true
            }
        });
        before - self.joints.len()
    }

    /// Rebuild the engine body if dirty.
    ///
    /// The previous body is fully torn down before the new one is registered. Returns
    /// `Ok(true)` when a body was built, which is the "initialized" notification joints wait
    /// for.
    ///
    /// # Errors
    ///
    /// Fatal shape errors (e.g. [`PhysicsError::InvalidMeshTopology`]) abort the build. The
    /// partial body is removed and the rigidbody is blocked until marked dirty again.
    pub fn process(&mut self, scene: &mut SceneGraph, world: &mut PhysicsWorld) -> Result<bool> {
        if !self.dirty || self.blocked {
            return Ok(false);
        }
        let entity = self.entity.ok_or(PhysicsError::NotAttached)?;

        self.destroy(scene, world);

        match self.build(entity, scene, world) {
            Ok(()) => {
                self.initialized = true;
                self.dirty = false;
                log::debug!(
                    "Built rigidbody for {:?} with {} collider(s)",
                    entity,
                    self.attached.len()
                );
                Ok(true)
            }
            Err(err) => {
                self.destroy(scene, world);
                self.blocked = true;
                log::warn!("Failed to build rigidbody for {:?}: {}", entity, err);
                Err(err)
            }
        }
    }

    fn build(
        &mut self,
        entity: EntityId,
        scene: &mut SceneGraph,
        world: &mut PhysicsWorld,
    ) -> Result<()> {
        let root = scene.world_transform(entity)?;

        let mut builder = RigidBodyBuilder::dynamic()
            .linear_damping(self.linear_damping)
            .angular_damping(self.angular_damping);
        if !self.initialized || self.preserve_velocity_on_rebuild {
            builder = builder
                .linvel(self.linear_velocity)
                .angvel(self.angular_velocity);
        }
        let mut body = builder.build();
        apply_sleep_params(&mut body, self.sleep_speed_threshold, self.sleep_time_limit);

        let handle = world.add_body(entity, body);
        self.body = Some(handle);

        for (collider_entity, offset) in collect_colliders(scene, entity)? {
            self.add_collider(scene, world, collider_entity, offset)?;
        }
        self.update_mass_properties(world);

        if let Some(body) = world.body_mut(handle) {
            if self.is_kinematic {
                body.set_body_type(RigidBodyType::KinematicVelocityBased, true);
            }
            body.set_position(root.isometry(), true);
        }
        Ok(())
    }

    /// Build the shape for `entity`'s collider and attach it to the body at `offset` (relative
    /// to this rigidbody's entity).
    ///
    /// Returns `Ok(false)` when the collider kind has no engine shape; that is logged and the
    /// collider is left out.
    pub fn add_collider(
        &mut self,
        scene: &mut SceneGraph,
        world: &mut PhysicsWorld,
        entity: EntityId,
        offset: Isometry3<f32>,
    ) -> Result<bool> {
        let owner = self.entity.ok_or(PhysicsError::NotAttached)?;
        let body = self.body.ok_or(PhysicsError::BodyNotRealized(owner))?;
        let world_transform = scene.world_transform(entity)?;
        let component = scene
            .collider_mut(entity)
            .ok_or(SceneError::MissingCollider(entity))?;

        let built = build_shape(component.update_world_collider(&world_transform));
        // The descriptor is consumed either way; a failed build is not retried until it
        // changes again.
        component.clear_dirty();
        let shape = match built {
            Ok(shape) => shape,
            Err(PhysicsError::UnsupportedColliderKind { kind }) => {
                log::warn!(
                    "Unhandled collider kind '{}' on {:?}; leaving it out of the body",
                    kind,
                    entity
                );
                self.skipped.push(entity);
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let radius = bounding_radius(&shape);
        let mut builder = ColliderBuilder::new(shape)
            .position(offset)
            .sensor(component.is_trigger())
            .density(0.0);
        if let Some(material) = component.material() {
            builder = builder
                .friction(material.friction)
                .restitution(material.restitution);
        }
        component.set_body_entity(Some(owner));

        let collider = world.add_collider(body, builder.build());
        self.attached.push(AttachedCollider {
            entity,
            collider,
            bounding_radius: radius,
        });
        Ok(true)
    }

    /// Refresh the live shapes of attached colliders whose descriptors are dirty.
    ///
    /// Shapes are swapped inside the existing engine colliders, so neither collider nor body
    /// handles change. Returns the number of refreshed colliders.
    pub fn update_dirty_colliders(
        &mut self,
        scene: &mut SceneGraph,
        world: &mut PhysicsWorld,
    ) -> Result<usize> {
        let mut refreshed = 0;
        for attached in &mut self.attached {
            if !scene
                .collider(attached.entity)
                .is_some_and(|c| c.is_dirty())
            {
                continue;
            }
            let world_transform = scene.world_transform(attached.entity)?;
            let Some(component) = scene.collider_mut(attached.entity) else {
                continue;
            };

            let built = build_shape(component.update_world_collider(&world_transform));
            component.clear_dirty();
            let shape = match built {
                Ok(shape) => shape,
                Err(PhysicsError::UnsupportedColliderKind { kind }) => {
                    log::warn!(
                        "Collider on {:?} changed to unhandled kind '{}'; keeping previous shape",
                        attached.entity,
                        kind
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };

            attached.bounding_radius = bounding_radius(&shape);
            if let Some(collider) = world.collider_mut(attached.collider) {
                collider.set_shape(shape);
                collider.set_sensor(component.is_trigger());
                match component.material() {
                    Some(material) => {
                        collider.set_friction(material.friction);
                        collider.set_restitution(material.restitution);
                    }
                    None => {
                        let defaults = ColliderBuilder::default();
                        collider.set_friction(defaults.friction);
                        collider.set_restitution(defaults.restitution);
                    }
                }
            }
            log::debug!("Refreshed collider shape on {:?}", attached.entity);
            refreshed += 1;
        }

        if refreshed > 0 {
            self.update_mass_properties(world);
        }
        Ok(refreshed)
    }

    /// Mark dirty when the set of collider entities in the subtree no longer matches the
    /// attached set, or when a blocked/skipped descriptor was edited. Returns whether the
    /// rigidbody was marked dirty.
    pub fn detect_structural_changes(&mut self, scene: &SceneGraph) -> Result<bool> {
        let Some(entity) = self.entity else {
            return Ok(false);
        };
        if self.dirty && !self.blocked {
            return Ok(false);
        }

        let mut current = subtree_collider_entities(scene, entity)?;
        let edited = |e: &EntityId| scene.collider(*e).is_some_and(|c| c.is_dirty());

        let changed = if self.blocked {
            current.iter().any(edited)
        } else {
            let mut known: Vec<EntityId> = self
                .attached
                .iter()
                .map(|a| a.entity)
                .chain(self.skipped.iter().copied())
                .collect();
            known.sort();
            current.sort();
            known != current || self.skipped.iter().any(edited)
        };

        if changed {
            log::debug!("Collider set of {:?} changed; rebuilding", entity);
            self.mark_dirty();
        }
        Ok(changed)
    }

    /// Remove the engine body from the world, drop its registry entry and sever every collider
    /// back-reference. Safe to call repeatedly.
    pub fn destroy(&mut self, scene: &mut SceneGraph, world: &mut PhysicsWorld) {
        if let Some(handle) = self.body.take() {
            if self.preserve_velocity_on_rebuild {
                if let Some(body) = world.body(handle) {
                    self.linear_velocity = *body.linvel();
                    self.angular_velocity = *body.angvel();
                }
            }
            for joint in &mut self.joints {
                joint.destroy(world);
            }
            world.remove_body(handle);
            self.dirty = true;
        }

        for attached in self.attached.drain(..) {
            if let Some(component) = scene.collider_mut(attached.entity) {
                // Another body may have claimed the collider already.
                if component.body_entity() == self.entity {
                    component.set_body_entity(None);
                }
            }
        }
        self.skipped.clear();
    }

    fn live_body<'w>(&self, world: &'w PhysicsWorld) -> Option<&'w RigidBody> {
        self.body.and_then(|h| world.body(h))
    }

    fn live_body_mut<'w>(&self, world: &'w mut PhysicsWorld) -> Option<&'w mut RigidBody> {
        self.body.and_then(|h| world.body_mut(h))
    }

    fn owner(&self) -> Result<EntityId> {
        self.entity.ok_or(PhysicsError::NotAttached)
    }

    /// World-space position: the engine body's when live, the entity's otherwise.
    pub fn position(&self, scene: &SceneGraph, world: &PhysicsWorld) -> Result<Vector3<f32>> {
        match self.live_body(world) {
            Some(body) => Ok(*body.translation()),
            None => Ok(scene.world_transform(self.owner()?)?.translation),
        }
    }

    /// Set the world-space position. Without a live body the entity is moved, and the body
    /// picks it up on its next build.
    pub fn set_position(
        &mut self,
        scene: &mut SceneGraph,
        world: &mut PhysicsWorld,
        position: Vector3<f32>,
    ) -> Result<()> {
        if let Some(body) = self.live_body_mut(world) {
            body.set_translation(position, true);
            return Ok(());
        }
        let entity = self.owner()?;
        let orientation = scene.world_transform(entity)?.orientation();
        scene.set_world_pose(entity, position, orientation)?;
        Ok(())
    }

    /// World-space orientation: the engine body's when live, the entity's otherwise.
    pub fn orientation(
        &self,
        scene: &SceneGraph,
        world: &PhysicsWorld,
    ) -> Result<UnitQuaternion<f32>> {
        match self.live_body(world) {
            Some(body) => Ok(*body.rotation()),
            None => Ok(scene.world_transform(self.owner()?)?.orientation()),
        }
    }

    /// Set the world-space orientation. Without a live body the entity is rotated.
    pub fn set_orientation(
        &mut self,
        scene: &mut SceneGraph,
        world: &mut PhysicsWorld,
        orientation: UnitQuaternion<f32>,
    ) -> Result<()> {
        if let Some(body) = self.live_body_mut(world) {
            body.set_rotation(orientation, true);
            return Ok(());
        }
        let entity = self.owner()?;
        let translation = scene.world_transform(entity)?.translation;
        scene.set_world_pose(entity, translation, orientation)?;
        Ok(())
    }

    /// Linear velocity: the engine body's when live, the cached value otherwise.
    pub fn linear_velocity(&self, world: &PhysicsWorld) -> Vector3<f32> {
        self.live_body(world)
            .map(|b| *b.linvel())
            .unwrap_or(self.linear_velocity)
    }

    /// Set the linear velocity on the live body (if any) and in the cache.
    pub fn set_linear_velocity(&mut self, world: &mut PhysicsWorld, velocity: Vector3<f32>) {
        if let Some(body) = self.live_body_mut(world) {
            body.set_linvel(velocity, true);
        }
        self.linear_velocity = velocity;
    }

    /// Angular velocity: the engine body's when live, the cached value otherwise.
    pub fn angular_velocity(&self, world: &PhysicsWorld) -> Vector3<f32> {
        self.live_body(world)
            .map(|b| *b.angvel())
            .unwrap_or(self.angular_velocity)
    }

    /// Set the angular velocity on the live body (if any) and in the cache.
    pub fn set_angular_velocity(&mut self, world: &mut PhysicsWorld, velocity: Vector3<f32>) {
        if let Some(body) = self.live_body_mut(world) {
            body.set_angvel(velocity, true);
        }
        self.angular_velocity = velocity;
    }

    /// Apply a force at a world-space point, or at the center of mass when `point` is `None`.
    /// Forces are cleared after each physics step.
    pub fn apply_force(
        &self,
        world: &mut PhysicsWorld,
        force: Vector3<f32>,
        point: Option<Point3<f32>>,
    ) -> Result<()> {
        let owner = self.owner()?;
        let body = self
            .live_body_mut(world)
            .ok_or(PhysicsError::BodyNotRealized(owner))?;
        match point {
            Some(point) => body.add_force_at_point(force, point, true),
            None => body.add_force(force, true),
        }
        Ok(())
    }

    /// Mass in kg.
    pub fn mass(&self) -> f32 {
        self.mass
    }

    /// Set the mass, patching the live body.
    pub fn set_mass(&mut self, world: &mut PhysicsWorld, mass: f32) {
        self.mass = mass.max(0.0);
        self.update_mass_properties(world);
    }

    /// Whether the body is driven externally.
    pub fn is_kinematic(&self) -> bool {
        self.is_kinematic
    }

    /// Switch between kinematic and dynamic. The body type needs a full rebuild.
    pub fn set_kinematic(&mut self, is_kinematic: bool) {
        self.is_kinematic = is_kinematic;
        self.mark_dirty();
    }

    /// Linear damping.
    pub fn linear_damping(&self) -> f32 {
        self.linear_damping
    }

    /// Set linear damping, patching the live body.
    pub fn set_linear_damping(&mut self, world: &mut PhysicsWorld, damping: f32) {
        if let Some(body) = self.live_body_mut(world) {
            body.set_linear_damping(damping);
        }
        self.linear_damping = damping;
    }

    /// Angular damping.
    pub fn angular_damping(&self) -> f32 {
        self.angular_damping
    }

    /// Set angular damping, patching the live body.
    pub fn set_angular_damping(&mut self, world: &mut PhysicsWorld, damping: f32) {
        if let Some(body) = self.live_body_mut(world) {
            body.set_angular_damping(damping);
        }
        self.angular_damping = damping;
    }

    /// Speed below which the body may fall asleep.
    pub fn sleep_speed_threshold(&self) -> f32 {
        self.sleep_speed_threshold
    }

    /// Set the sleep speed threshold, patching the live body.
    pub fn set_sleep_speed_threshold(&mut self, world: &mut PhysicsWorld, threshold: f32) {
        self.sleep_speed_threshold = threshold;
        let limit = self.sleep_time_limit;
        if let Some(body) = self.live_body_mut(world) {
            apply_sleep_params(body, threshold, limit);
        }
    }

    /// Seconds below the threshold before the body falls asleep.
    pub fn sleep_time_limit(&self) -> f32 {
        self.sleep_time_limit
    }

    /// Set the sleep time limit, patching the live body.
    pub fn set_sleep_time_limit(&mut self, world: &mut PhysicsWorld, limit: f32) {
        self.sleep_time_limit = limit;
        let threshold = self.sleep_speed_threshold;
        if let Some(body) = self.live_body_mut(world) {
            apply_sleep_params(body, threshold, limit);
        }
    }

    /// Whether the live velocity is carried over when the body is rebuilt.
    pub fn preserve_velocity_on_rebuild(&self) -> bool {
        self.preserve_velocity_on_rebuild
    }

    /// Choose whether the live velocity is carried over when the body is rebuilt.
    pub fn set_preserve_velocity_on_rebuild(&mut self, preserve: bool) {
        self.preserve_velocity_on_rebuild = preserve;
    }

    /// Distribute the configured mass over the attached shapes by volume.
    ///
    /// Colliders are built with zero density so the body mass is exactly `mass`; shapes with
    /// no volume (planes) leave a point mass at the body origin.
    fn update_mass_properties(&self, world: &mut PhysicsWorld) {
        let Some(handle) = self.body else {
            return;
        };

        let parts: Vec<(MassProperties, Isometry3<f32>)> = self
            .attached
            .iter()
            .filter_map(|a| world.collider(a.collider))
            .map(|c| {
                (
                    c.shape().mass_properties(1.0),
                    c.position_wrt_parent()
                        .copied()
                        .unwrap_or_else(Isometry3::identity),
                )
            })
            .collect();
        let volume: f32 = parts.iter().map(|(props, _)| props.mass()).sum();

        let props = if volume > f32::EPSILON && self.mass > 0.0 {
            let density = self.mass / volume;
            parts
                .iter()
                .fold(
                    MassProperties::new(Point3::origin(), 0.0, Vector3::zeros()),
                    |acc, (unit, offset)| {
                        acc + MassProperties::with_principal_inertia_frame(
                            unit.local_com,
                            unit.mass() * density,
                            unit.principal_inertia() * density,
                            unit.principal_inertia_local_frame,
                        )
                        .transform_by(offset)
                    },
                )
        } else {
            MassProperties::new(Point3::origin(), self.mass, Vector3::zeros())
        };

        if let Some(body) = world.body_mut(handle) {
            body.set_additional_mass_properties(props, true);
        }
    }
}

fn apply_sleep_params(body: &mut RigidBody, threshold: f32, time_limit: f32) {
    let activation = body.activation_mut();
    activation.normalized_linear_threshold = threshold;
    activation.angular_threshold = threshold;
    activation.time_until_sleep = time_limit;
}

/// Collider entities belonging to `root`'s body: `root` itself and its descendants, excluding
/// nested rigidbody subtrees. Depth-first, parents first.
fn subtree_collider_entities(scene: &SceneGraph, root: EntityId) -> Result<Vec<EntityId>> {
    let mut found = Vec::new();
    scene.traverse(root, |id, _| {
        if id != root && scene.is_rigidbody_root(id) {
            return Traverse::SkipChildren;
        }
        if scene.collider(id).is_some() {
            found.push(id);
        }
        Traverse::Continue
    })?;
    Ok(found)
}

/// Collider entities with their pose relative to `root`'s (unscaled) frame.
fn collect_colliders(
    scene: &SceneGraph,
    root: EntityId,
) -> Result<Vec<(EntityId, Isometry3<f32>)>> {
    let root_inv = scene.world_transform(root)?.isometry().inverse();
    subtree_collider_entities(scene, root)?
        .into_iter()
        .map(|id| Ok((id, root_inv * scene.world_transform(id)?.isometry())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;
    use scenephys_scene::{
        Collider, ColliderComponent, IndexMode, MeshCollider, PhysicsMaterial, TerrainCollider,
        Transform,
    };

    fn sphere(radius: f32) -> ColliderComponent {
        ColliderComponent::new(Collider::Sphere { radius })
    }

    fn attached(
        scene: &mut SceneGraph,
        collider: Option<ColliderComponent>,
        settings: RigidbodySettings,
    ) -> (EntityId, Rigidbody) {
        let entity = scene.spawn("body");
        scene.set_collider(entity, collider).unwrap();
        let mut rb = Rigidbody::new(settings);
        rb.attach(entity, scene).unwrap();
        (entity, rb)
    }

    #[test]
    fn test_zero_mass_implies_kinematic() {
        for mass in [0.0, 1.0, 2.5] {
            let rb = Rigidbody::new(RigidbodySettings {
                mass,
                is_kinematic: false,
                ..Default::default()
            });
            assert_eq!(rb.is_kinematic(), mass == 0.0);
        }
    }

    #[test]
    fn test_kinematic_forces_zero_mass() {
        for mass in [0.0, 1.0, 100.0] {
            let rb = Rigidbody::new(RigidbodySettings {
                mass,
                is_kinematic: true,
                ..Default::default()
            });
            assert_eq!(rb.mass(), 0.0);
            assert!(rb.is_kinematic());
        }
    }

    #[test]
    fn test_process_builds_body_once() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (entity, mut rb) = attached(&mut scene, Some(sphere(1.0)), Default::default());
        assert_eq!(rb.state(), BodyState::Uninitialized);

        assert!(rb.process(&mut scene, &mut world).unwrap());
        let handle = rb.body_handle().unwrap();
        assert_eq!(rb.state(), BodyState::Active);
        assert_eq!(world.entity_for_body(handle), Some(entity));
        assert_eq!(world.collider_count(), 1);

        // Not dirty: nothing happens.
        assert!(!rb.process(&mut scene, &mut world).unwrap());
        assert_eq!(rb.body_handle(), Some(handle));
        assert_eq!(world.body_count(), 1);
    }

    #[test]
    fn test_process_without_attach_fails() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let mut rb = Rigidbody::default();
        assert!(matches!(
            rb.process(&mut scene, &mut world),
            Err(PhysicsError::NotAttached)
        ));
    }

    #[test]
    fn test_body_takes_entity_world_transform() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (entity, mut rb) = attached(&mut scene, Some(sphere(1.0)), Default::default());
        let rotation = Rotation3::from_euler_angles(0.1, 0.2, 0.3);
        scene
            .set_local_transform(
                entity,
                Transform::from_translation(Vector3::new(1.0, 2.0, 3.0)).with_rotation(rotation),
            )
            .unwrap();

        rb.process(&mut scene, &mut world).unwrap();
        let body = world.body(rb.body_handle().unwrap()).unwrap();
        assert_relative_eq!(*body.translation(), Vector3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(
            body.rotation().to_rotation_matrix(),
            rotation,
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_kinematic_body_type() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (_, mut rb) = attached(
            &mut scene,
            Some(sphere(1.0)),
            RigidbodySettings {
                mass: 0.0,
                ..Default::default()
            },
        );
        rb.process(&mut scene, &mut world).unwrap();
        assert!(world.body(rb.body_handle().unwrap()).unwrap().is_kinematic());
    }

    #[test]
    fn test_set_kinematic_rebuilds_with_new_handle() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (_, mut rb) = attached(&mut scene, Some(sphere(1.0)), Default::default());
        rb.process(&mut scene, &mut world).unwrap();
        let first = rb.body_handle().unwrap();

        rb.set_kinematic(true);
        assert_eq!(rb.state(), BodyState::Dirty);
        assert!(rb.process(&mut scene, &mut world).unwrap());

        let second = rb.body_handle().unwrap();
        assert_ne!(first, second);
        assert!(world.body(first).is_none());
        assert!(world.body(second).unwrap().is_kinematic());
        assert_eq!(world.body_count(), 1);
        assert_eq!(world.entity_for_body(first), None);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (entity, mut rb) = attached(&mut scene, Some(sphere(1.0)), Default::default());
        rb.process(&mut scene, &mut world).unwrap();
        assert_eq!(scene.collider(entity).unwrap().body_entity(), Some(entity));

        rb.destroy(&mut scene, &mut world);
        let after_once = (rb.body_handle(), rb.is_dirty(), rb.attached_colliders().len());
        rb.destroy(&mut scene, &mut world);
        let after_twice = (rb.body_handle(), rb.is_dirty(), rb.attached_colliders().len());

        assert_eq!(after_once, (None, true, 0));
        assert_eq!(after_once, after_twice);
        assert_eq!(world.body_count(), 0);
        assert_eq!(world.collider_count(), 0);
        assert_eq!(scene.collider(entity).unwrap().body_entity(), None);
    }

    #[test]
    fn test_velocity_round_trip_before_and_after_build() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (_, mut rb) = attached(&mut scene, Some(sphere(1.0)), Default::default());

        let v = Vector3::new(1.5, -2.0, 0.25);
        let w = Vector3::new(0.0, 3.0, -1.0);
        rb.set_linear_velocity(&mut world, v);
        rb.set_angular_velocity(&mut world, w);
        assert_eq!(rb.linear_velocity(&world), v);
        assert_eq!(rb.angular_velocity(&world), w);

        rb.process(&mut scene, &mut world).unwrap();
        // Cached velocity was pushed into the first body.
        assert_eq!(rb.linear_velocity(&world), v);
        assert_eq!(rb.angular_velocity(&world), w);

        let v2 = Vector3::new(-4.0, 0.5, 9.0);
        rb.set_linear_velocity(&mut world, v2);
        assert_eq!(rb.linear_velocity(&world), v2);
        assert_eq!(
            *world.body(rb.body_handle().unwrap()).unwrap().linvel(),
            v2
        );
    }

    #[test]
    fn test_rebuild_drops_velocity_by_default() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (_, mut rb) = attached(
            &mut scene,
            Some(sphere(1.0)),
            RigidbodySettings {
                velocity: Vector3::new(1.0, 0.0, 0.0),
                ..Default::default()
            },
        );
        rb.process(&mut scene, &mut world).unwrap();
        assert_eq!(rb.linear_velocity(&world), Vector3::new(1.0, 0.0, 0.0));

        rb.mark_dirty();
        rb.process(&mut scene, &mut world).unwrap();
        assert_eq!(rb.linear_velocity(&world), Vector3::zeros());
    }

    #[test]
    fn test_rebuild_preserves_live_velocity_when_enabled() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (_, mut rb) = attached(
            &mut scene,
            Some(sphere(1.0)),
            RigidbodySettings {
                preserve_velocity_on_rebuild: true,
                ..Default::default()
            },
        );
        rb.process(&mut scene, &mut world).unwrap();

        // Change the engine state directly, bypassing the cache.
        let live = Vector3::new(0.0, -3.0, 2.0);
        world
            .body_mut(rb.body_handle().unwrap())
            .unwrap()
            .set_linvel(live, true);

        rb.mark_dirty();
        rb.process(&mut scene, &mut world).unwrap();
        assert_eq!(rb.linear_velocity(&world), live);
    }

    #[test]
    fn test_clone_copies_scalars_only() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (_, mut rb) = attached(
            &mut scene,
            Some(sphere(1.0)),
            RigidbodySettings {
                mass: 2.0,
                is_kinematic: false,
                linear_damping: 0.3,
                ..Default::default()
            },
        );
        rb.process(&mut scene, &mut world).unwrap();

        let copy = rb.clone();
        assert_eq!(copy.mass(), 2.0);
        assert!(!copy.is_kinematic());
        assert_eq!(copy.linear_damping(), 0.3);
        assert_eq!(copy.settings(), rb.settings());
        assert_eq!(copy.state(), BodyState::Uninitialized);
        assert!(copy.entity().is_none());
        assert!(copy.body_handle().is_none());
        assert_eq!(copy.attached_collider_entities().count(), 0);
    }

    #[test]
    fn test_subtree_colliders_get_relative_offsets() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (root, mut rb) = attached(&mut scene, Some(sphere(0.5)), Default::default());
        scene
            .set_local_transform(
                root,
                Transform::from_translation(Vector3::new(10.0, 0.0, 0.0))
                    .with_scale(Vector3::new(2.0, 2.0, 2.0)),
            )
            .unwrap();

        let child = scene.spawn_child(root, "child").unwrap();
        scene
            .set_local_transform(child, Transform::from_translation(Vector3::new(0.0, 1.0, 0.0)))
            .unwrap();
        scene
            .set_collider(
                child,
                Some(ColliderComponent::new(Collider::Box {
                    half_extents: Vector3::new(1.0, 1.0, 1.0),
                })),
            )
            .unwrap();

        rb.process(&mut scene, &mut world).unwrap();
        let entities: Vec<_> = rb.attached_collider_entities().collect();
        assert_eq!(entities, vec![root, child]);

        let child_collider = world.collider(rb.attached_colliders()[1].collider).unwrap();
        // Offset is scaled by the root's scale, and the shape by the child's world scale.
        assert_relative_eq!(
            child_collider.position_wrt_parent().unwrap().translation.vector,
            Vector3::new(0.0, 2.0, 0.0)
        );
        assert_relative_eq!(
            child_collider.shape().as_cuboid().unwrap().half_extents,
            Vector3::new(2.0, 2.0, 2.0)
        );
        assert_relative_eq!(
            world.collider(rb.attached_colliders()[0].collider).unwrap().shape().as_ball().unwrap().radius,
            1.0
        );
        assert_eq!(scene.collider(child).unwrap().body_entity(), Some(root));
    }

    #[test]
    fn test_nested_rigidbody_subtree_is_excluded() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (root, mut rb) = attached(&mut scene, Some(sphere(1.0)), Default::default());

        let nested = scene.spawn_child(root, "nested").unwrap();
        scene.set_collider(nested, Some(sphere(1.0))).unwrap();
        let nested_child = scene.spawn_child(nested, "nested_child").unwrap();
        scene.set_collider(nested_child, Some(sphere(1.0))).unwrap();
        let mut nested_rb = Rigidbody::default();
        nested_rb.attach(nested, &mut scene).unwrap();

        rb.process(&mut scene, &mut world).unwrap();
        nested_rb.process(&mut scene, &mut world).unwrap();

        assert_eq!(rb.attached_collider_entities().collect::<Vec<_>>(), vec![root]);
        assert_eq!(
            nested_rb.attached_collider_entities().collect::<Vec<_>>(),
            vec![nested, nested_child]
        );
        assert_eq!(scene.collider(nested_child).unwrap().body_entity(), Some(nested));
    }

    #[test]
    fn test_material_and_trigger_flags() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let collider = sphere(1.0)
            .with_material(PhysicsMaterial {
                friction: 0.9,
                restitution: 0.4,
            })
            .with_trigger(true);
        let (_, mut rb) = attached(&mut scene, Some(collider), Default::default());
        rb.process(&mut scene, &mut world).unwrap();

        let native = world.collider(rb.attached_colliders()[0].collider).unwrap();
        assert!(native.is_sensor());
        assert_relative_eq!(native.friction(), 0.9);
        assert_relative_eq!(native.restitution(), 0.4);
    }

    #[test]
    fn test_clearing_material_restores_engine_defaults() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let collider = sphere(1.0).with_material(PhysicsMaterial {
            friction: 0.9,
            restitution: 0.4,
        });
        let (entity, mut rb) = attached(&mut scene, Some(collider), Default::default());
        rb.process(&mut scene, &mut world).unwrap();
        let handle = rb.attached_colliders()[0].collider;

        scene.collider_mut(entity).unwrap().set_material(None);
        assert_eq!(rb.update_dirty_colliders(&mut scene, &mut world).unwrap(), 1);

        let defaults = ColliderBuilder::default();
        let native = world.collider(handle).unwrap();
        assert_relative_eq!(native.friction(), defaults.friction);
        assert_relative_eq!(native.restitution(), defaults.restitution);
    }

    #[test]
    fn test_unsupported_collider_is_skipped() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let terrain = ColliderComponent::new(Collider::Terrain(TerrainCollider {
            data: vec![vec![0.0; 2]; 2],
            scale: Vector3::repeat(1.0),
        }));
        let (root, mut rb) = attached(&mut scene, Some(terrain), Default::default());
        let child = scene.spawn_child(root, "child").unwrap();
        scene.set_collider(child, Some(sphere(1.0))).unwrap();

        assert!(rb.process(&mut scene, &mut world).unwrap());
        assert_eq!(rb.attached_collider_entities().collect::<Vec<_>>(), vec![child]);
        assert_eq!(scene.collider(root).unwrap().body_entity(), None);

        // A skipped collider does not count as a structural change.
        assert!(!rb.detect_structural_changes(&scene).unwrap());
    }

    #[test]
    fn test_invalid_mesh_blocks_until_descriptor_changes() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let mut mesh = MeshCollider::triangles(vec![0.0; 9], vec![0, 1, 2]);
        mesh.index_modes = vec![IndexMode::Lines];
        let (entity, mut rb) = attached(
            &mut scene,
            Some(ColliderComponent::new(Collider::Mesh(mesh))),
            Default::default(),
        );

        let err = rb.process(&mut scene, &mut world).unwrap_err();
        assert!(matches!(err, PhysicsError::InvalidMeshTopology(_)));
        assert_eq!(rb.state(), BodyState::Blocked);
        assert_eq!(world.body_count(), 0);
        assert!(rb.body_handle().is_none());

        // No retry while the descriptor is unchanged.
        assert!(!rb.detect_structural_changes(&scene).unwrap());
        assert!(!rb.process(&mut scene, &mut world).unwrap());

        scene
            .collider_mut(entity)
            .unwrap()
            .set_collider(Collider::Sphere { radius: 1.0 });
        assert!(rb.detect_structural_changes(&scene).unwrap());
        assert!(rb.process(&mut scene, &mut world).unwrap());
        assert_eq!(rb.state(), BodyState::Active);
    }

    #[test]
    fn test_dirty_sphere_refresh_keeps_handles() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (entity, mut rb) = attached(&mut scene, Some(sphere(1.0)), Default::default());
        rb.process(&mut scene, &mut world).unwrap();
        let body = rb.body_handle().unwrap();
        let collider = rb.attached_colliders()[0].collider;

        if let Some(Collider::Sphere { radius }) =
            scene.collider_mut(entity).map(|c| c.collider_mut())
        {
            *radius = 2.0;
        }
        assert_eq!(rb.update_dirty_colliders(&mut scene, &mut world).unwrap(), 1);

        assert_eq!(rb.body_handle(), Some(body));
        assert_eq!(rb.attached_colliders()[0].collider, collider);
        assert_relative_eq!(rb.attached_colliders()[0].bounding_radius, 2.0);
        assert_relative_eq!(
            world.collider(collider).unwrap().shape().as_ball().unwrap().radius,
            2.0
        );
        assert!(!scene.collider(entity).unwrap().is_dirty());
        assert!(!rb.detect_structural_changes(&scene).unwrap());

        // Clean descriptors are left alone.
        assert_eq!(rb.update_dirty_colliders(&mut scene, &mut world).unwrap(), 0);
    }

    #[test]
    fn test_dirty_mesh_refresh_rescales() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let mesh = MeshCollider::triangles(
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            vec![0, 1, 2],
        );
        let (entity, mut rb) = attached(
            &mut scene,
            Some(ColliderComponent::new(Collider::Mesh(mesh))),
            Default::default(),
        );
        rb.process(&mut scene, &mut world).unwrap();
        assert_relative_eq!(rb.attached_colliders()[0].bounding_radius, 1.0);

        if let Some(Collider::Mesh(mesh)) = scene.collider_mut(entity).map(|c| c.collider_mut()) {
            mesh.scale = Vector3::new(3.0, 3.0, 3.0);
        }
        rb.update_dirty_colliders(&mut scene, &mut world).unwrap();
        assert_relative_eq!(rb.attached_colliders()[0].bounding_radius, 3.0);
    }

    #[test]
    fn test_new_child_collider_marks_dirty() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (root, mut rb) = attached(&mut scene, Some(sphere(1.0)), Default::default());
        rb.process(&mut scene, &mut world).unwrap();
        assert!(!rb.detect_structural_changes(&scene).unwrap());

        let child = scene.spawn_child(root, "child").unwrap();
        scene.set_collider(child, Some(sphere(0.5))).unwrap();
        assert!(rb.detect_structural_changes(&scene).unwrap());
        rb.process(&mut scene, &mut world).unwrap();
        assert_eq!(rb.attached_colliders().len(), 2);
    }

    #[test]
    fn test_pose_accessors_without_body_use_entity() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (entity, mut rb) = attached(&mut scene, Some(sphere(1.0)), Default::default());

        let orientation = UnitQuaternion::from_euler_angles(0.0, 1.0, 0.0);
        rb.set_position(&mut scene, &mut world, Vector3::new(0.0, 5.0, 0.0))
            .unwrap();
        rb.set_orientation(&mut scene, &mut world, orientation)
            .unwrap();
        assert_relative_eq!(
            scene.world_transform(entity).unwrap().translation,
            Vector3::new(0.0, 5.0, 0.0),
            epsilon = 1e-6
        );

        rb.process(&mut scene, &mut world).unwrap();
        assert_relative_eq!(
            rb.position(&scene, &world).unwrap(),
            Vector3::new(0.0, 5.0, 0.0),
            epsilon = 1e-6
        );
        assert_relative_eq!(
            rb.orientation(&scene, &world).unwrap().to_rotation_matrix(),
            orientation.to_rotation_matrix(),
            epsilon = 1e-5
        );

        rb.set_position(&mut scene, &mut world, Vector3::new(1.0, 1.0, 1.0))
            .unwrap();
        assert_eq!(rb.position(&scene, &world).unwrap(), Vector3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_live_tunables_patch_body() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (_, mut rb) = attached(&mut scene, Some(sphere(1.0)), Default::default());
        rb.process(&mut scene, &mut world).unwrap();
        let handle = rb.body_handle().unwrap();

        rb.set_linear_damping(&mut world, 0.7);
        rb.set_angular_damping(&mut world, 0.8);
        rb.set_sleep_speed_threshold(&mut world, 0.5);
        rb.set_sleep_time_limit(&mut world, 3.0);
        rb.set_mass(&mut world, 4.0);

        let body = world.body(handle).unwrap();
        assert_relative_eq!(body.linear_damping(), 0.7);
        assert_relative_eq!(body.angular_damping(), 0.8);
        assert_relative_eq!(body.activation().normalized_linear_threshold, 0.5);
        assert_relative_eq!(body.activation().time_until_sleep, 3.0);
        assert_eq!(rb.mass(), 4.0);
        assert_eq!(rb.body_handle(), Some(handle));
        assert!(!rb.is_dirty());
    }

    #[test]
    fn test_mass_is_spread_over_shapes() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (root, mut rb) = attached(&mut scene, Some(sphere(1.0)), Default::default());
        let child = scene.spawn_child(root, "child").unwrap();
        scene
            .set_local_transform(child, Transform::from_translation(Vector3::new(2.0, 0.0, 0.0)))
            .unwrap();
        scene
            .set_collider(
                child,
                Some(ColliderComponent::new(Collider::Box {
                    half_extents: Vector3::new(0.5, 0.5, 0.5),
                })),
            )
            .unwrap();
        rb.process(&mut scene, &mut world).unwrap();

        rb.set_mass(&mut world, 4.0);
        world.step(1.0 / 60.0);
        let body = world.body(rb.body_handle().unwrap()).unwrap();
        assert_relative_eq!(body.mass(), 4.0, epsilon = 1e-3);
    }

    #[test]
    fn test_apply_force_requires_body() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (entity, mut rb) = attached(&mut scene, Some(sphere(1.0)), Default::default());

        let err = rb
            .apply_force(&mut world, Vector3::new(0.0, 10.0, 0.0), None)
            .unwrap_err();
        assert!(matches!(err, PhysicsError::BodyNotRealized(e) if e == entity));

        rb.process(&mut scene, &mut world).unwrap();
        rb.apply_force(
            &mut world,
            Vector3::new(0.0, 10.0, 0.0),
            Some(Point3::new(1.0, 0.0, 0.0)),
        )
        .unwrap();
        let body = world.body(rb.body_handle().unwrap()).unwrap();
        assert_relative_eq!(body.user_force(), Vector3::new(0.0, 10.0, 0.0));
    }

    #[test]
    fn test_detach_clears_scene_marker() {
        let mut scene = SceneGraph::new();
        let mut world = PhysicsWorld::new();
        let (entity, mut rb) = attached(&mut scene, Some(sphere(1.0)), Default::default());
        rb.process(&mut scene, &mut world).unwrap();
        assert!(scene.is_rigidbody_root(entity));

        rb.detach(&mut scene, &mut world);
        assert!(!scene.is_rigidbody_root(entity));
        assert!(rb.entity().is_none());
        assert_eq!(world.body_count(), 0);
    }
}
