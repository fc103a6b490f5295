//! Error types for scene graph operations.

use thiserror::Error;

use crate::graph::EntityId;

/// Errors that can occur while editing the scene graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    /// Entity does not exist (never spawned or already despawned).
    #[error("Entity not found: {0:?}")]
    MissingEntity(EntityId),

    /// Reparenting would make an entity its own ancestor.
    #[error("Cannot parent {child:?} under its own descendant {parent:?}")]
    ParentCycle {
        /// Entity being reparented.
        child: EntityId,
        /// Requested new parent.
        parent: EntityId,
    },

    /// Entity has no collider component.
    #[error("Entity {0:?} has no collider")]
    MissingCollider(EntityId),
}

/// Result type for scene operations.
pub type Result<T> = std::result::Result<T, SceneError>;
