//! Per-tick orchestration of rigidbodies, joints and the engine step.

use nalgebra::Vector3;
use scenephys_scene::{EntityId, JointDesc, SceneGraph, Traverse};
use slotmap::SecondaryMap;

use crate::config::PhysicsConfig;
use crate::error::{PhysicsError, Result};
use crate::joints::{realize_joint, Joint};
use crate::rigidbody::Rigidbody;
use crate::world::PhysicsWorld;

/// Notification produced during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicsEvent {
    /// A rigidbody's engine body was (re)built.
    BodyInitialized(EntityId),
    /// A joint constraint was created.
    JointRealized {
        /// Entity owning the joint.
        owner: EntityId,
        /// Entity on the other end.
        connected: EntityId,
    },
}

/// Owns the physics world and every rigidbody, and keeps them in sync with a scene.
pub struct PhysicsSystem {
    config: PhysicsConfig,
    world: PhysicsWorld,
    rigidbodies: SecondaryMap<EntityId, Rigidbody>,
    events: Vec<PhysicsEvent>,
}

impl Default for PhysicsSystem {
    fn default() -> Self {
        Self::new(PhysicsConfig::default())
    }
}

impl PhysicsSystem {
    /// Create a system with an empty world.
    pub fn new(config: PhysicsConfig) -> Self {
        Self {
            world: PhysicsWorld::from_config(&config),
            config,
            rigidbodies: SecondaryMap::new(),
            events: Vec::new(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// Physics world.
    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    /// Mutable physics world.
    pub fn world_mut(&mut self) -> &mut PhysicsWorld {
        &mut self.world
    }

    /// Attach `rigidbody` to `entity`, replacing (and tearing down) any previous one.
    pub fn add_rigidbody(
        &mut self,
        scene: &mut SceneGraph,
        entity: EntityId,
        mut rigidbody: Rigidbody,
    ) -> Result<()> {
        rigidbody.attach(entity, scene)?;
        if let Some(mut previous) = self.rigidbodies.insert(entity, rigidbody) {
            previous.destroy(scene, &mut self.world);
        }
        // The new body may split colliders away from an ancestor's body.
        self.mark_ancestors_dirty(scene, entity);
        Ok(())
    }

    /// Attach a rigidbody built from the configured defaults.
    pub fn add_default_rigidbody(&mut self, scene: &mut SceneGraph, entity: EntityId) -> Result<()> {
        let rigidbody = Rigidbody::new(self.config.rigidbody.clone());
        self.add_rigidbody(scene, entity, rigidbody)
    }

    /// Detach and return the rigidbody on `entity`. Joints on other bodies pointing at it are
    /// unrealized until a body exists there again.
    pub fn remove_rigidbody(
        &mut self,
        scene: &mut SceneGraph,
        entity: EntityId,
    ) -> Option<Rigidbody> {
        let mut rigidbody = self.rigidbodies.remove(entity)?;
        rigidbody.detach(scene, &mut self.world);
        self.release_joints_to(entity);
        if scene.contains(entity) {
            self.mark_ancestors_dirty(scene, entity);
        }
        Some(rigidbody)
    }

    /// Rigidbody on `entity`.
    pub fn rigidbody(&self, entity: EntityId) -> Option<&Rigidbody> {
        self.rigidbodies.get(entity)
    }

    /// Mutable rigidbody on `entity`.
    pub fn rigidbody_mut(&mut self, entity: EntityId) -> Option<&mut Rigidbody> {
        self.rigidbodies.get_mut(entity)
    }

    /// Rigidbody on `entity` together with the world, for the accessors that need both.
    pub fn rigidbody_and_world(
        &mut self,
        entity: EntityId,
    ) -> Option<(&mut Rigidbody, &mut PhysicsWorld)> {
        let rigidbody = self.rigidbodies.get_mut(entity)?;
        Some((rigidbody, &mut self.world))
    }

    /// Number of rigidbodies.
    pub fn rigidbody_count(&self) -> usize {
        self.rigidbodies.len()
    }

    /// Add a joint owned by `entity`'s rigidbody. It is realized on a later tick once both
    /// bodies are live.
    pub fn add_joint(&mut self, entity: EntityId, desc: JointDesc) -> Result<()> {
        let rigidbody = self
            .rigidbodies
            .get_mut(entity)
            .ok_or(PhysicsError::MissingRigidbody(entity))?;
        rigidbody.add_joint(Joint::new(desc));
        Ok(())
    }

    /// Remove every joint from `entity` to `connected`. Returns how many were removed.
    pub fn remove_joints(&mut self, entity: EntityId, connected: EntityId) -> usize {
        match self.rigidbodies.get_mut(entity) {
            Some(rigidbody) => rigidbody.remove_joints_to(connected, &mut self.world),
            None => 0,
        }
    }

    /// Despawn `entity` and its subtree, tearing down every rigidbody in it first.
    pub fn despawn(&mut self, scene: &mut SceneGraph, entity: EntityId) -> Result<Vec<EntityId>> {
        let mut doomed = Vec::new();
        scene.traverse(entity, |id, _| {
            doomed.push(id);
            Traverse::Continue
        })?;
        for &id in &doomed {
            self.remove_rigidbody(scene, id);
        }
        if let Some(parent) = scene.parent(entity)? {
            self.mark_owner_dirty(scene, parent);
        }
        Ok(scene.despawn(entity)?)
    }

    /// Events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<PhysicsEvent> {
        std::mem::take(&mut self.events)
    }

    /// Advance one configured timestep.
    pub fn tick(&mut self, scene: &mut SceneGraph) -> Result<()> {
        self.step(scene, self.config.timestep)
    }

    /// Synchronize the scene into the engine, step by `dt` seconds, and write the resulting
    /// body poses back into the scene.
    ///
    /// Rigidbodies whose entity left the scene are torn down first.
    ///
    /// # Errors
    ///
    /// Returns the first fatal build error of the tick. The failing rigidbody is blocked; every
    /// other body is still processed and the engine still steps.
    pub fn step(&mut self, scene: &mut SceneGraph, dt: f32) -> Result<()> {
        self.prune_despawned(scene);

        let mut entities: Vec<EntityId> = self.rigidbodies.keys().collect();
        // Parents before children, so pose write-back sees updated ancestors.
        entities.sort_by_key(|&e| depth(scene, e));
        let mut first_error = None;

        for &entity in &entities {
            keep_first(
                &mut first_error,
                self.rigidbodies[entity].detect_structural_changes(scene),
            );
        }

        self.release_joints_to_dirty_bodies();

        for &entity in &entities {
            let built = self.rigidbodies[entity].process(scene, &mut self.world);
            if keep_first(&mut first_error, built) == Some(true) {
                self.events.push(PhysicsEvent::BodyInitialized(entity));
            }
        }

        self.realize_pending_joints(scene, &entities, &mut first_error);

        for &entity in &entities {
            let refreshed = self.rigidbodies[entity].update_dirty_colliders(scene, &mut self.world);
            keep_first(&mut first_error, refreshed);
        }

        self.world.step(dt);
        self.world.reset_forces();
        log::trace!(
            "Stepped {} bodies, {} colliders, {} constraints",
            self.world.body_count(),
            self.world.collider_count(),
            self.world.constraint_count()
        );

        for &entity in &entities {
            let Some(body) = self.rigidbodies[entity]
                .body_handle()
                .and_then(|handle| self.world.body(handle))
            else {
                continue;
            };
            let written = scene.set_world_pose(entity, *body.translation(), *body.rotation());
            keep_first(&mut first_error, written.map_err(PhysicsError::from));
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // Entities despawned straight through the scene leave their rigidbodies behind.
    fn prune_despawned(&mut self, scene: &mut SceneGraph) {
        let gone: Vec<EntityId> = self
            .rigidbodies
            .keys()
            .filter(|&entity| !scene.contains(entity))
            .collect();
        for entity in gone {
            if let Some(mut rigidbody) = self.rigidbodies.remove(entity) {
                rigidbody.detach(scene, &mut self.world);
            }
            self.release_joints_to(entity);
            log::debug!("Dropped rigidbody of despawned entity {:?}", entity);
        }
    }

    fn release_joints_to(&mut self, connected: EntityId) {
        for (_, rigidbody) in self.rigidbodies.iter_mut() {
            for joint in rigidbody.joints_mut() {
                if joint.connected_entity() == connected {
                    joint.destroy(&mut self.world);
                }
            }
        }
    }

    // A body about to be rebuilt takes its constraints with it, including the ones owned by
    // the other side.
    fn release_joints_to_dirty_bodies(&mut self) {
        let dirty: Vec<EntityId> = self
            .rigidbodies
            .iter()
            .filter(|(_, rb)| rb.is_dirty())
            .map(|(entity, _)| entity)
            .collect();
        for entity in dirty {
            self.release_joints_to(entity);
        }
    }

    fn realize_pending_joints(
        &mut self,
        scene: &SceneGraph,
        entities: &[EntityId],
        first_error: &mut Option<PhysicsError>,
    ) {
        for &owner in entities {
            let Some(body_a) = self.rigidbodies[owner].body_handle() else {
                continue;
            };
            for index in 0..self.rigidbodies[owner].joints().len() {
                let joint = &self.rigidbodies[owner].joints()[index];
                if joint.is_realized() || joint.is_failed() {
                    continue;
                }
                let connected = joint.connected_entity();
                let Some(body_b) = self
                    .rigidbodies
                    .get(connected)
                    .and_then(|rb| rb.body_handle())
                else {
                    continue;
                };

                let scales = local_scale(scene, owner)
                    .and_then(|a| local_scale(scene, connected).map(|b| (a, b)));
                let Some((scale_a, scale_b)) = keep_first(first_error, scales) else {
                    continue;
                };
                let joint = &mut self.rigidbodies[owner].joints_mut()[index];
                let realized =
                    realize_joint(joint, &mut self.world, body_a, scale_a, body_b, scale_b);
                if keep_first(first_error, realized) == Some(true) {
                    self.events
                        .push(PhysicsEvent::JointRealized { owner, connected });
                }
            }
        }
    }

    // Mark the nearest rigidbody strictly above `entity` dirty.
    fn mark_ancestors_dirty(&mut self, scene: &SceneGraph, entity: EntityId) {
        if let Ok(Some(parent)) = scene.parent(entity) {
            self.mark_owner_dirty(scene, parent);
        }
    }

    // Mark the rigidbody owning `entity`'s colliders (itself or its nearest ancestor) dirty.
    fn mark_owner_dirty(&mut self, scene: &SceneGraph, entity: EntityId) {
        let mut current = Some(entity);
        while let Some(id) = current {
            if let Some(rigidbody) = self.rigidbodies.get_mut(id) {
                rigidbody.mark_dirty();
                return;
            }
            current = scene.parent(id).ok().flatten();
        }
    }
}

fn depth(scene: &SceneGraph, entity: EntityId) -> usize {
    let mut depth = 0;
    let mut current = scene.parent(entity).ok().flatten();
    while let Some(id) = current {
        depth += 1;
        current = scene.parent(id).ok().flatten();
    }
    depth
}

/// Unwrap `result`, stashing its error in `slot` unless an earlier one is already there.
fn keep_first<T>(slot: &mut Option<PhysicsError>, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            slot.get_or_insert(err);
            None
        }
    }
}

fn local_scale(scene: &SceneGraph, entity: EntityId) -> Result<Vector3<f32>> {
    Ok(scene.local_transform(entity)?.scale)
}
