#![warn(missing_docs)]

//! Scene-side data consumed by the scenephys physics layer.
//!
//! This crate holds everything the physics synchronizers read from or write back to the
//! scene, with no dependency on the physics engine:
//!
//! - [`SceneGraph`]: entity hierarchy with local and world [`Transform`]s
//! - [`ColliderComponent`]: collider descriptors attached to entities
//! - [`JointDesc`]: joint descriptors linking two entities
//!
//! # Example
//!
//! ```
//! use nalgebra::Vector3;
//! use scenephys_scene::{Collider, ColliderComponent, SceneGraph, Transform};
//!
//! let mut scene = SceneGraph::new();
//! let crate_entity = scene.spawn("crate");
//! scene
//!     .set_local_transform(crate_entity, Transform::from_translation(Vector3::new(0.0, 2.0, 0.0)))
//!     .unwrap();
//! scene
//!     .set_collider(
//!         crate_entity,
//!         Some(ColliderComponent::new(Collider::Box {
//!             half_extents: Vector3::new(0.5, 0.5, 0.5),
//!         })),
//!     )
//!     .unwrap();
//! ```

mod collider;
mod error;
mod graph;
mod joint;
mod transform;

pub use collider::{
    Collider, ColliderComponent, IndexMode, MeshCollider, PhysicsMaterial, TerrainCollider,
};
pub use error::{Result, SceneError};
pub use graph::{EntityId, SceneGraph, Traverse};
pub use joint::{JointDesc, JointKind};
pub use transform::Transform;
