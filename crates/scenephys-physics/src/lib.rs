#![warn(missing_docs)]

//! Rapier synchronization for scene rigidbodies, colliders and joints.
//!
//! Each rigidbody entity owns one engine body assembled from every collider in its subtree
//! (nested rigidbodies excluded). Bodies are rebuilt lazily when their structure changes, and
//! collider shapes are refreshed in place when only a descriptor changes.
//!
//! # Features
//!
//! - Box, sphere, cylinder, plane and triangle-mesh collision shapes
//! - Ball and hinge joints with scale-corrected pivots
//! - Kinematic bodies, sleep tuning and per-collider materials and triggers
//! - Body-to-entity registry for contact and trigger queries
//!
//! # Example
//!
//! ```ignore
//! use nalgebra::Vector3;
//! use scenephys_physics::{PhysicsConfig, PhysicsSystem};
//! use scenephys_scene::{Collider, ColliderComponent, SceneGraph};
//!
//! let mut scene = SceneGraph::new();
//! let ball = scene.spawn("ball");
//! scene.set_collider(ball, Some(ColliderComponent::new(Collider::Sphere { radius: 0.5 })))?;
//!
//! let mut physics = PhysicsSystem::new(PhysicsConfig::default());
//! physics.add_default_rigidbody(&mut scene, ball)?;
//!
//! // Build, step and write poses back into the scene.
//! physics.tick(&mut scene)?;
//! ```

mod config;
mod error;
mod joints;
mod rigidbody;
mod shapes;
mod system;
mod world;

pub use config::{
    PhysicsConfig, RigidbodySettings, DEFAULT_ANGULAR_DAMPING, DEFAULT_LINEAR_DAMPING,
    DEFAULT_MASS, DEFAULT_SLEEP_SPEED_THRESHOLD, DEFAULT_SLEEP_TIME_LIMIT,
};
pub use error::{PhysicsError, Result};
pub use joints::{compute_frames, realize_joint, Joint, JointFrames};
pub use rigidbody::{AttachedCollider, BodyState, Rigidbody};
pub use shapes::{bounding_radius, build_shape, cylinder_axis_correction, CYLINDER_SEGMENTS};
pub use system::{PhysicsEvent, PhysicsSystem};
pub use world::PhysicsWorld;
