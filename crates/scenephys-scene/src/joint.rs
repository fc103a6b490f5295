//! Joint descriptors linking two rigidbody entities.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::graph::EntityId;

/// Kind of constraint a joint describes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[non_exhaustive]
pub enum JointKind {
    /// Point-to-point constraint; free rotation around the pivot.
    Ball,
    /// Rotation around a single axis through the pivot.
    Hinge {
        /// Rotation axis in the owning entity's local frame. Never scaled.
        local_axis: Vector3<f32>,
    },
}

impl JointKind {
    /// Short name of the joint kind, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            JointKind::Ball => "ball",
            JointKind::Hinge { .. } => "hinge",
        }
    }
}

/// Authored joint between the owning entity and `connected_entity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointDesc {
    /// Constraint kind.
    pub kind: JointKind,
    /// Pivot in the owning entity's local frame, before scaling.
    pub local_pivot: Vector3<f32>,
    /// Entity on the other end of the joint.
    #[serde(skip)]
    pub connected_entity: EntityId,
    /// Derive the connected pivot (and hinge axis) from this entity's world-space pivot.
    pub auto_configure_connected_pivot: bool,
    /// Pivot in the connected entity's local frame. Ignored when auto-configuring.
    pub connected_local_pivot: Vector3<f32>,
    /// Whether the two bodies keep colliding with each other.
    pub collide_connected: bool,
}

impl JointDesc {
    /// Ball joint at `local_pivot`, auto-configuring the connected pivot.
    pub fn ball(connected_entity: EntityId, local_pivot: Vector3<f32>) -> Self {
        Self {
            kind: JointKind::Ball,
            local_pivot,
            connected_entity,
            auto_configure_connected_pivot: true,
            connected_local_pivot: Vector3::zeros(),
            collide_connected: false,
        }
    }

    /// Hinge joint at `local_pivot` around `local_axis`, auto-configuring the connected side.
    pub fn hinge(
        connected_entity: EntityId,
        local_pivot: Vector3<f32>,
        local_axis: Vector3<f32>,
    ) -> Self {
        Self {
            kind: JointKind::Hinge { local_axis },
            ..Self::ball(connected_entity, local_pivot)
        }
    }

    /// Use an explicit connected pivot instead of deriving it.
    pub fn with_connected_pivot(mut self, connected_local_pivot: Vector3<f32>) -> Self {
        self.auto_configure_connected_pivot = false;
        self.connected_local_pivot = connected_local_pivot;
        self
    }

    /// Builder-style `collide_connected`.
    pub fn with_collide_connected(mut self, collide_connected: bool) -> Self {
        self.collide_connected = collide_connected;
        self
    }
}
