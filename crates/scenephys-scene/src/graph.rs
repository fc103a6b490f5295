//! Entity hierarchy and transform provider.

use nalgebra::{UnitQuaternion, Vector3};
use slotmap::{new_key_type, SlotMap};

use crate::collider::ColliderComponent;
use crate::error::{Result, SceneError};
use crate::transform::Transform;

new_key_type! {
    /// Stable identifier of an entity in a [`SceneGraph`].
    pub struct EntityId;
}

/// Traversal control returned by [`SceneGraph::traverse`] visitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traverse {
    /// Descend into the visited entity's children.
    Continue,
    /// Do not visit the visited entity's descendants.
    SkipChildren,
}

#[derive(Debug, Clone)]
struct EntityNode {
    name: String,
    parent: Option<EntityId>,
    children: Vec<EntityId>,
    transform: Transform,
    collider: Option<ColliderComponent>,
    rigidbody_root: bool,
}

impl EntityNode {
    fn new(name: String, parent: Option<EntityId>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            transform: Transform::identity(),
            collider: None,
            rigidbody_root: false,
        }
    }
}

/// Hierarchy of entities with local transforms and optional colliders.
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    entities: SlotMap<EntityId, EntityNode>,
}

impl SceneGraph {
    /// Create an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a root entity.
    pub fn spawn(&mut self, name: impl Into<String>) -> EntityId {
        self.entities.insert(EntityNode::new(name.into(), None))
    }

    /// Spawn an entity under `parent`.
    pub fn spawn_child(&mut self, parent: EntityId, name: impl Into<String>) -> Result<EntityId> {
        if !self.entities.contains_key(parent) {
            return Err(SceneError::MissingEntity(parent));
        }
        let child = self
            .entities
            .insert(EntityNode::new(name.into(), Some(parent)));
        self.entities[parent].children.push(child);
        Ok(child)
    }

    /// Move `child` under `parent`, or make it a root when `parent` is `None`.
    ///
    /// The local transform is kept as is, so the world transform changes with the new parent.
    pub fn set_parent(&mut self, child: EntityId, parent: Option<EntityId>) -> Result<()> {
        self.node(child)?;
        if let Some(parent) = parent {
            self.node(parent)?;
            if parent == child || self.is_ancestor(child, parent) {
                return Err(SceneError::ParentCycle { child, parent });
            }
        }

        if let Some(old) = self.entities[child].parent {
            self.entities[old].children.retain(|c| *c != child);
        }
        self.entities[child].parent = parent;
        if let Some(parent) = parent {
            self.entities[parent].children.push(child);
        }
        Ok(())
    }

    /// Remove `entity` and all its descendants. Returns the removed ids, parents first.
    pub fn despawn(&mut self, entity: EntityId) -> Result<Vec<EntityId>> {
        let mut removed = Vec::new();
        self.traverse(entity, |id, _| {
            removed.push(id);
            Traverse::Continue
        })?;

        if let Some(parent) = self.entities[entity].parent {
            self.entities[parent].children.retain(|c| *c != entity);
        }
        for id in &removed {
            self.entities.remove(*id);
        }
        Ok(removed)
    }

    /// Whether `entity` exists.
    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains_key(entity)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the scene has no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All live entity ids, in no particular order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys()
    }

    /// Entity name.
    pub fn name(&self, entity: EntityId) -> Result<&str> {
        Ok(&self.node(entity)?.name)
    }

    /// Parent of `entity`, if any.
    pub fn parent(&self, entity: EntityId) -> Result<Option<EntityId>> {
        Ok(self.node(entity)?.parent)
    }

    /// Direct children of `entity`, in insertion order.
    pub fn children(&self, entity: EntityId) -> Result<&[EntityId]> {
        Ok(&self.node(entity)?.children)
    }

    /// Whether `ancestor` is a strict ancestor of `entity`.
    pub fn is_ancestor(&self, ancestor: EntityId, entity: EntityId) -> bool {
        let mut current = self.entities.get(entity).and_then(|n| n.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.entities.get(id).and_then(|n| n.parent);
        }
        false
    }

    /// Transform relative to the parent.
    pub fn local_transform(&self, entity: EntityId) -> Result<Transform> {
        Ok(self.node(entity)?.transform)
    }

    /// Replace the transform relative to the parent.
    pub fn set_local_transform(&mut self, entity: EntityId, transform: Transform) -> Result<()> {
        self.node_mut(entity)?.transform = transform;
        Ok(())
    }

    /// Transform in world space, composed from the root down.
    pub fn world_transform(&self, entity: EntityId) -> Result<Transform> {
        let node = self.node(entity)?;
        match node.parent {
            Some(parent) => Ok(self.world_transform(parent)?.combine(&node.transform)),
            None => Ok(node.transform),
        }
    }

    /// Place `entity` at a world-space translation and orientation, keeping its scale.
    pub fn set_world_pose(
        &mut self,
        entity: EntityId,
        translation: Vector3<f32>,
        orientation: UnitQuaternion<f32>,
    ) -> Result<()> {
        let node = self.node(entity)?;
        let scale = node.transform.scale;
        let desired = Transform {
            translation,
            rotation: orientation.to_rotation_matrix(),
            scale,
        };
        let local = match node.parent {
            Some(parent) => {
                let parent_world = self.world_transform(parent)?;
                Transform {
                    scale,
                    ..desired.relative_to(&parent_world)
                }
            }
            None => desired,
        };
        self.node_mut(entity)?.transform = local;
        Ok(())
    }

    /// Collider attached to `entity`, if any.
    pub fn collider(&self, entity: EntityId) -> Option<&ColliderComponent> {
        self.entities.get(entity).and_then(|n| n.collider.as_ref())
    }

    /// Mutable collider attached to `entity`, if any.
    pub fn collider_mut(&mut self, entity: EntityId) -> Option<&mut ColliderComponent> {
        self.entities
            .get_mut(entity)
            .and_then(|n| n.collider.as_mut())
    }

    /// Attach, replace or remove the collider of `entity`. Returns the previous one.
    pub fn set_collider(
        &mut self,
        entity: EntityId,
        collider: Option<ColliderComponent>,
    ) -> Result<Option<ColliderComponent>> {
        let node = self.node_mut(entity)?;
        Ok(std::mem::replace(&mut node.collider, collider))
    }

    /// Whether `entity` owns a rigidbody.
    pub fn is_rigidbody_root(&self, entity: EntityId) -> bool {
        self.entities
            .get(entity)
            .map(|n| n.rigidbody_root)
            .unwrap_or(false)
    }

    /// Mark or unmark `entity` as owning a rigidbody.
    pub fn set_rigidbody_root(&mut self, entity: EntityId, value: bool) -> Result<()> {
        self.node_mut(entity)?.rigidbody_root = value;
        Ok(())
    }

    /// Depth-first, parent-before-children traversal starting at `root` (depth 0).
    pub fn traverse<F>(&self, root: EntityId, mut visit: F) -> Result<()>
    where
        F: FnMut(EntityId, usize) -> Traverse,
    {
        self.node(root)?;
        let mut stack = vec![(root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            if visit(id, depth) == Traverse::SkipChildren {
                continue;
            }
            if let Some(node) = self.entities.get(id) {
                // Reversed so the first child is visited first.
                stack.extend(node.children.iter().rev().map(|c| (*c, depth + 1)));
            }
        }
        Ok(())
    }

    fn node(&self, entity: EntityId) -> Result<&EntityNode> {
        self.entities
            .get(entity)
            .ok_or(SceneError::MissingEntity(entity))
    }

    fn node_mut(&mut self, entity: EntityId) -> Result<&mut EntityNode> {
        self.entities
            .get_mut(entity)
            .ok_or(SceneError::MissingEntity(entity))
    }
}
