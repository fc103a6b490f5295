//! Translation / rotation / non-uniform scale transforms.

use nalgebra::{Isometry3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Transform of an entity: translation, rotation matrix and per-axis scale.
///
/// Points are mapped as `translation + rotation * (scale ∘ p)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Translation component.
    pub translation: Vector3<f32>,
    /// Rotation component as a 3x3 rotation matrix.
    pub rotation: Rotation3<f32>,
    /// Non-uniform scale component.
    pub scale: Vector3<f32>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    /// Identity transform.
    pub fn identity() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: Rotation3::identity(),
            scale: Vector3::repeat(1.0),
        }
    }

    /// Pure translation.
    pub fn from_translation(translation: Vector3<f32>) -> Self {
        Self {
            translation,
            ..Self::identity()
        }
    }

    /// Builder-style rotation override.
    pub fn with_rotation(mut self, rotation: Rotation3<f32>) -> Self {
        self.rotation = rotation;
        self
    }

    /// Builder-style scale override.
    pub fn with_scale(mut self, scale: Vector3<f32>) -> Self {
        self.scale = scale;
        self
    }

    /// Rotation as a unit quaternion.
    pub fn orientation(&self) -> UnitQuaternion<f32> {
        UnitQuaternion::from_rotation_matrix(&self.rotation)
    }

    /// Rigid part of the transform (scale dropped).
    pub fn isometry(&self) -> Isometry3<f32> {
        Isometry3::from_parts(Translation3::from(self.translation), self.orientation())
    }

    /// Map a point from this transform's local space.
    pub fn transform_point(&self, point: &Point3<f32>) -> Point3<f32> {
        Point3::from(self.translation + self.rotation * point.coords.component_mul(&self.scale))
    }

    /// Compose `self` (parent) with `child`, yielding the child's transform in the parent's
    /// space.
    ///
    /// Scale is combined per axis, which is exact as long as no shear is introduced (rotated
    /// children of non-uniformly scaled parents are approximated).
    pub fn combine(&self, child: &Transform) -> Transform {
        Transform {
            translation: self.translation
                + self.rotation * child.translation.component_mul(&self.scale),
            rotation: self.rotation * child.rotation,
            scale: self.scale.component_mul(&child.scale),
        }
    }

    /// Inverse of [`Transform::combine`]: given a parent transform and a desired world
    /// transform, return the local transform that reproduces it under the parent.
    pub fn relative_to(&self, parent: &Transform) -> Transform {
        let inv_rot = parent.rotation.inverse();
        let local_translation = inv_rot * (self.translation - parent.translation);
        Transform {
            translation: local_translation.component_div(&safe_scale(parent.scale)),
            rotation: inv_rot * self.rotation,
            scale: self.scale.component_div(&safe_scale(parent.scale)),
        }
    }
}

fn safe_scale(scale: Vector3<f32>) -> Vector3<f32> {
    scale.map(|s| if s.abs() < f32::EPSILON { 1.0 } else { s })
}
