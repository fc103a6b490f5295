//! Error types for physics synchronization.

use scenephys_scene::{EntityId, SceneError};
use thiserror::Error;

/// Errors that can occur while synchronizing the scene with the physics engine.
#[derive(Error, Debug)]
pub enum PhysicsError {
    /// The shape builder has no engine shape for this collider kind.
    ///
    /// Non-fatal: callers log it and leave the collider out of the body.
    #[error("Unsupported collider kind: {kind}")]
    UnsupportedColliderKind {
        /// Collider kind name.
        kind: &'static str,
    },

    /// Mesh collider data is not a plain triangle list.
    #[error("Mesh collider data must be a triangle mesh: {0}")]
    InvalidMeshTopology(String),

    /// The joint synchronizer has no engine constraint for this joint kind.
    ///
    /// Non-fatal: callers log it and leave the entities unconstrained.
    #[error("Unhandled joint kind: {0}")]
    UnhandledJointKind(String),

    /// Invalid joint configuration.
    #[error("Invalid joint configuration: {0}")]
    InvalidJoint(String),

    /// Failed to create collision shape.
    #[error("Failed to create collision shape for {name}: {reason}")]
    CollisionShape {
        /// Collider kind name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// No rigidbody registered for the entity.
    #[error("No rigidbody on entity {0:?}")]
    MissingRigidbody(EntityId),

    /// Rigidbody was used before being attached to an entity.
    #[error("Rigidbody is not attached to an entity")]
    NotAttached,

    /// Operation needs a live engine body, but none has been built yet.
    #[error("Rigidbody on entity {0:?} has no engine body yet")]
    BodyNotRealized(EntityId),

    /// Scene graph error.
    #[error(transparent)]
    Scene(#[from] SceneError),

    /// Configuration could not be parsed.
    #[error("Invalid physics configuration: {0}")]
    Config(#[from] toml::de::Error),
}

/// Result type for physics operations.
pub type Result<T> = std::result::Result<T, PhysicsError>;
