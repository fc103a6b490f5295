//! Collider descriptors attached to scene entities.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::graph::EntityId;
use crate::transform::Transform;

/// How the indices of a [`MeshCollider`] are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexMode {
    /// Every three indices form a triangle.
    Triangles,
    /// Triangle strip.
    TriangleStrip,
    /// Triangle fan.
    TriangleFan,
    /// Every two indices form a line segment.
    Lines,
    /// Individual points.
    Points,
}

/// Triangle mesh collision geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshCollider {
    /// Flat `[x, y, z, x, y, z, ...]` vertex positions.
    pub positions: Vec<f32>,
    /// Vertex indices.
    pub indices: Vec<u32>,
    /// Index topology of each primitive batch.
    pub index_modes: Vec<IndexMode>,
    /// Scale applied to the positions.
    #[serde(default = "unit_scale")]
    pub scale: Vector3<f32>,
}

impl MeshCollider {
    /// Triangle mesh with unit scale.
    pub fn triangles(positions: Vec<f32>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            indices,
            index_modes: vec![IndexMode::Triangles],
            scale: unit_scale(),
        }
    }

    /// True when every primitive batch is a plain triangle list.
    pub fn is_triangle_list(&self) -> bool {
        !self.index_modes.is_empty()
            && self.index_modes.iter().all(|m| *m == IndexMode::Triangles)
            && self.indices.len() % 3 == 0
    }
}

/// Heightfield collision geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainCollider {
    /// Row-major height samples.
    pub data: Vec<Vec<f32>>,
    /// Scale applied to the heightfield.
    #[serde(default = "unit_scale")]
    pub scale: Vector3<f32>,
}

fn unit_scale() -> Vector3<f32> {
    Vector3::repeat(1.0)
}

/// Shape description of a collider.
///
/// New kinds may be added; consumers must handle unknown kinds gracefully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[non_exhaustive]
pub enum Collider {
    /// Box centered at the entity origin.
    Box {
        /// Half size along each axis.
        half_extents: Vector3<f32>,
    },
    /// Sphere centered at the entity origin.
    Sphere {
        /// Radius.
        radius: f32,
    },
    /// Cylinder along the local Y axis, centered at the entity origin.
    Cylinder {
        /// Radius of both caps.
        radius: f32,
        /// Full height.
        height: f32,
    },
    /// Infinite plane through the origin with its normal along local +Y.
    Plane,
    /// Triangle mesh.
    Mesh(MeshCollider),
    /// Heightfield terrain.
    Terrain(TerrainCollider),
}

impl Collider {
    /// Short name of the collider kind, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Collider::Box { .. } => "box",
            Collider::Sphere { .. } => "sphere",
            Collider::Cylinder { .. } => "cylinder",
            Collider::Plane => "plane",
            Collider::Mesh(_) => "mesh",
            Collider::Terrain(_) => "terrain",
        }
    }

    /// Resolve this collider under `transform`'s scale.
    ///
    /// Translation and rotation are not baked in; they become the shape's offset on the body.
    pub fn transformed(&self, transform: &Transform) -> Collider {
        let s = transform.scale.abs();
        match self {
            Collider::Box { half_extents } => Collider::Box {
                half_extents: half_extents.component_mul(&s),
            },
            Collider::Sphere { radius } => Collider::Sphere {
                radius: radius * s.max(),
            },
            Collider::Cylinder { radius, height } => Collider::Cylinder {
                radius: radius * s.x.max(s.z),
                height: height * s.y,
            },
            Collider::Plane => Collider::Plane,
            Collider::Mesh(mesh) => Collider::Mesh(MeshCollider {
                scale: mesh.scale.component_mul(&transform.scale),
                ..mesh.clone()
            }),
            Collider::Terrain(terrain) => Collider::Terrain(TerrainCollider {
                scale: terrain.scale.component_mul(&transform.scale),
                ..terrain.clone()
            }),
        }
    }
}

/// Surface material of a collider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsMaterial {
    /// Friction coefficient.
    pub friction: f32,
    /// Restitution (bounciness) coefficient.
    pub restitution: f32,
}

impl Default for PhysicsMaterial {
    fn default() -> Self {
        Self {
            friction: 0.3,
            restitution: 0.0,
        }
    }
}

/// Collider attached to an entity.
///
/// Holds the authored [`Collider`], its resolved world-space counterpart, and the id of the
/// rigidbody entity currently using it as a shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColliderComponent {
    collider: Collider,
    material: Option<PhysicsMaterial>,
    is_trigger: bool,
    #[serde(skip, default = "dirty_default")]
    dirty: bool,
    #[serde(skip)]
    world_collider: Option<Collider>,
    #[serde(skip)]
    body_entity: Option<EntityId>,
}

fn dirty_default() -> bool {
    true
}

impl ColliderComponent {
    /// New collider component without material and not a trigger.
    pub fn new(collider: Collider) -> Self {
        Self {
            collider,
            material: None,
            is_trigger: false,
            dirty: true,
            world_collider: None,
            body_entity: None,
        }
    }

    /// Builder-style material.
    pub fn with_material(mut self, material: PhysicsMaterial) -> Self {
        self.material = Some(material);
        self
    }

    /// Builder-style trigger flag.
    pub fn with_trigger(mut self, is_trigger: bool) -> Self {
        self.is_trigger = is_trigger;
        self
    }

    /// Authored collider.
    pub fn collider(&self) -> &Collider {
        &self.collider
    }

    /// Mutable access to the authored collider. Marks the component dirty.
    pub fn collider_mut(&mut self) -> &mut Collider {
        self.dirty = true;
        &mut self.collider
    }

    /// Replace the authored collider and mark the component dirty.
    pub fn set_collider(&mut self, collider: Collider) {
        self.collider = collider;
        self.dirty = true;
    }

    /// Material, if one was assigned.
    pub fn material(&self) -> Option<&PhysicsMaterial> {
        self.material.as_ref()
    }

    /// Set or clear the material and mark the component dirty.
    pub fn set_material(&mut self, material: Option<PhysicsMaterial>) {
        self.material = material;
        self.dirty = true;
    }

    /// Whether the collider only reports overlaps without a collision response.
    pub fn is_trigger(&self) -> bool {
        self.is_trigger
    }

    /// Set the trigger flag and mark the component dirty.
    pub fn set_trigger(&mut self, is_trigger: bool) {
        self.is_trigger = is_trigger;
        self.dirty = true;
    }

    /// Whether the descriptor changed since the live shape was last refreshed.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Flag the descriptor as changed.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clear the dirty flag after the live shape has been refreshed.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Resolve the world collider under the entity's world transform.
    pub fn update_world_collider(&mut self, world_transform: &Transform) -> &Collider {
        self.world_collider
            .insert(self.collider.transformed(world_transform))
    }

    /// Last resolved world collider, or the authored one if never resolved.
    pub fn world_collider(&self) -> &Collider {
        self.world_collider.as_ref().unwrap_or(&self.collider)
    }

    /// Rigidbody entity using this collider as one of its shapes.
    pub fn body_entity(&self) -> Option<EntityId> {
        self.body_entity
    }

    /// Set the rigidbody back-reference. Managed by the rigidbody that owns the shape.
    pub fn set_body_entity(&mut self, body_entity: Option<EntityId>) {
        self.body_entity = body_entity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scaled(x: f32, y: f32, z: f32) -> Transform {
        Transform::identity().with_scale(Vector3::new(x, y, z))
    }

    #[test]
    fn test_sphere_uses_largest_scale() {
        let c = Collider::Sphere { radius: 1.0 }.transformed(&scaled(1.0, -3.0, 2.0));
        assert_eq!(c, Collider::Sphere { radius: 3.0 });
    }

    #[test]
    fn test_box_scales_per_axis() {
        let c = Collider::Box {
            half_extents: Vector3::new(1.0, 2.0, 3.0),
        }
        .transformed(&scaled(2.0, -1.0, 0.5));
        match c {
            Collider::Box { half_extents } => {
                assert_relative_eq!(half_extents, Vector3::new(2.0, 2.0, 1.5))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cylinder_scales_radius_and_height() {
        let c = Collider::Cylinder {
            radius: 1.0,
            height: 2.0,
        }
        .transformed(&scaled(2.0, 3.0, 1.0));
        assert_eq!(
            c,
            Collider::Cylinder {
                radius: 2.0,
                height: 6.0
            }
        );
    }

    #[test]
    fn test_terrain_scale_multiplies() {
        let terrain = Collider::Terrain(TerrainCollider {
            data: vec![],
            scale: Vector3::new(2.0, 3.0, 4.0),
        });
        match terrain.transformed(&scaled(1.0, 2.0, 3.0)) {
            Collider::Terrain(t) => assert_relative_eq!(t.scale, Vector3::new(2.0, 6.0, 12.0)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_collider_mut_marks_dirty() {
        let mut cc = ColliderComponent::new(Collider::Sphere { radius: 1.0 });
        cc.clear_dirty();
        assert!(!cc.is_dirty());

        if let Collider::Sphere { radius } = cc.collider_mut() {
            *radius = 2.0;
        }
        assert!(cc.is_dirty());
        assert_eq!(cc.collider(), &Collider::Sphere { radius: 2.0 });
    }

    #[test]
    fn test_mesh_topology_check() {
        let mut mesh = MeshCollider::triangles(vec![0.0; 9], vec![0, 1, 2]);
        assert!(mesh.is_triangle_list());
        mesh.index_modes = vec![IndexMode::Triangles, IndexMode::TriangleStrip];
        assert!(!mesh.is_triangle_list());
    }

    #[test]
    fn test_collider_from_json() {
        let c: Collider =
            serde_json::from_str(r#"{"type":"Cylinder","radius":0.5,"height":2.0}"#).unwrap();
        assert_eq!(
            c,
            Collider::Cylinder {
                radius: 0.5,
                height: 2.0
            }
        );
    }
}
