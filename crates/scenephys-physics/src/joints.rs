//! Joint realization between two rigidbodies.

use nalgebra::{Point3, UnitVector3, Vector3};
use rapier3d::dynamics::{
    GenericJoint, GenericJointBuilder, ImpulseJointHandle, JointAxesMask, RigidBodyHandle,
};
use scenephys_scene::{EntityId, JointDesc, JointKind};

use crate::error::{PhysicsError, Result};
use crate::world::PhysicsWorld;

/// A joint owned by a rigidbody entity, plus its engine constraint once realized.
#[derive(Debug, Clone)]
pub struct Joint {
    desc: JointDesc,
    constraint: Option<ImpulseJointHandle>,
    // Set when realization failed; cleared when the descriptor is replaced.
    failed: bool,
}

impl Joint {
    /// Unrealized joint from a descriptor.
    pub fn new(desc: JointDesc) -> Self {
        Self {
            desc,
            constraint: None,
            failed: false,
        }
    }

    /// Replace the descriptor. A realized constraint is removed and rebuilt later from the new
    /// descriptor.
    pub fn set_desc(&mut self, desc: JointDesc, world: &mut PhysicsWorld) {
        self.destroy(world);
        self.desc = desc;
        self.failed = false;
    }

    /// Joint descriptor.
    pub fn desc(&self) -> &JointDesc {
        &self.desc
    }

    /// Entity on the other end of the joint.
    pub fn connected_entity(&self) -> EntityId {
        self.desc.connected_entity
    }

    /// Engine constraint, if realized.
    pub fn constraint(&self) -> Option<ImpulseJointHandle> {
        self.constraint
    }

    /// Whether the engine constraint exists.
    pub fn is_realized(&self) -> bool {
        self.constraint.is_some()
    }

    /// Whether the last realization failed. Failed joints are not retried until
    /// [`Joint::set_desc`].
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Remove the engine constraint, if any. Safe to call repeatedly.
    pub fn destroy(&mut self, world: &mut PhysicsWorld) {
        if let Some(handle) = self.constraint.take() {
            // The constraint may already be gone if one of its bodies was removed.
            world.remove_constraint(handle);
            log::debug!("Removed {} joint constraint", self.desc.kind.kind_name());
        }
    }
}

/// Anchors and axes of a joint expressed in each body's local frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointFrames {
    /// Pivot in body A's frame.
    pub pivot_a: Point3<f32>,
    /// Pivot in body B's frame.
    pub pivot_b: Point3<f32>,
    /// Hinge axis in body A's frame and in body B's frame.
    pub axes: Option<(UnitVector3<f32>, UnitVector3<f32>)>,
}

/// Compute the scale-corrected pivots (and hinge axes) for a joint between two live bodies.
///
/// # Arguments
///
/// * `desc` - The joint descriptor owned by entity A
/// * `body_a` / `scale_a` - Engine body and local scale of the owning entity
/// * `body_b` / `scale_b` - Engine body and local scale of the connected entity
///
/// # Returns
///
/// `Ok(None)` for joint kinds this synchronizer does not know.
pub fn compute_frames(
    desc: &JointDesc,
    world: &PhysicsWorld,
    body_a: RigidBodyHandle,
    scale_a: Vector3<f32>,
    body_b: RigidBodyHandle,
    scale_b: Vector3<f32>,
) -> Result<Option<JointFrames>> {
    let iso_a = *world
        .body(body_a)
        .ok_or_else(|| PhysicsError::InvalidJoint("owning body is gone".to_string()))?
        .position();
    let iso_b = *world
        .body(body_b)
        .ok_or_else(|| PhysicsError::InvalidJoint("connected body is gone".to_string()))?
        .position();

    // Scale the pivot into the owning body's (unscaled) frame.
    let pivot_a = Point3::from(desc.local_pivot.component_mul(&scale_a));

    let pivot_b = if desc.auto_configure_connected_pivot {
        iso_b.inverse_transform_point(&(iso_a * pivot_a))
    } else {
        Point3::from(desc.connected_local_pivot.component_mul(&scale_b))
    };

    match desc.kind {
        JointKind::Ball => Ok(Some(JointFrames {
            pivot_a,
            pivot_b,
            axes: None,
        })),
        JointKind::Hinge { local_axis } => {
            let axis_a = UnitVector3::try_new(local_axis, f32::EPSILON).ok_or_else(|| {
                PhysicsError::InvalidJoint("hinge axis has zero length".to_string())
            })?;
            let axis_b = UnitVector3::new_normalize(
                iso_b.inverse_transform_vector(&(iso_a * axis_a.into_inner())),
            );
            Ok(Some(JointFrames {
                pivot_a,
                pivot_b,
                axes: Some((axis_a, axis_b)),
            }))
        }
        _ => Ok(None),
    }
}

fn create_ball_joint(frames: &JointFrames) -> GenericJoint {
    GenericJointBuilder::new(JointAxesMask::LOCKED_SPHERICAL_AXES)
        .local_anchor1(frames.pivot_a)
        .local_anchor2(frames.pivot_b)
        .build()
}

fn create_hinge_joint(
    frames: &JointFrames,
    axis_a: UnitVector3<f32>,
    axis_b: UnitVector3<f32>,
    collide_connected: bool,
) -> GenericJoint {
    GenericJointBuilder::new(JointAxesMask::LOCKED_REVOLUTE_AXES)
        .local_anchor1(frames.pivot_a)
        .local_anchor2(frames.pivot_b)
        .local_axis1(axis_a)
        .local_axis2(axis_b)
        .contacts_enabled(collide_connected)
        .build()
}

/// Build the engine constraint for `joint` and register it with the world.
///
/// Returns `Ok(false)` without creating anything when the joint kind is unhandled; that case
/// is logged as a warning.
pub fn realize_joint(
    joint: &mut Joint,
    world: &mut PhysicsWorld,
    body_a: RigidBodyHandle,
    scale_a: Vector3<f32>,
    body_b: RigidBodyHandle,
    scale_b: Vector3<f32>,
) -> Result<bool> {
    joint.destroy(world);

    let frames = match compute_frames(&joint.desc, world, body_a, scale_a, body_b, scale_b) {
        Ok(Some(frames)) => frames,
        Ok(None) => {
            joint.failed = true;
            let err = PhysicsError::UnhandledJointKind(format!("{:?}", joint.desc.kind));
            log::warn!("{err}; entities stay unconstrained");
            return Ok(false);
        }
        Err(err) => {
            joint.failed = true;
            return Err(err);
        }
    };

    let native = match frames.axes {
        None => create_ball_joint(&frames),
        Some((axis_a, axis_b)) => {
            create_hinge_joint(&frames, axis_a, axis_b, joint.desc.collide_connected)
        }
    };

    let handle = world.add_constraint(body_a, body_b, native);
    joint.constraint = Some(handle);
    log::debug!(
        "Created {} joint constraint to {:?}",
        joint.desc.kind.kind_name(),
        joint.desc.connected_entity
    );
    Ok(true)
}
