//! Collision shape generation from collider descriptors.

use std::f32::consts::{FRAC_PI_2, TAU};

use nalgebra::{Point3, UnitQuaternion, Vector3};
use parry3d::shape::{ConvexPolyhedron, SharedShape, TriMesh};
use scenephys_scene::{Collider, MeshCollider};

use crate::error::{PhysicsError, Result};

/// Number of segments used to approximate a cylinder as a convex polyhedron.
pub const CYLINDER_SEGMENTS: usize = 10;

/// Build the engine shape for a resolved (world-scaled) collider.
///
/// Cylinders are built as segmented convex polyhedra around the local Y axis; meshes must be
/// plain triangle lists.
///
/// # Errors
///
/// * [`PhysicsError::UnsupportedColliderKind`] for kinds without an engine shape. Callers
///   treat this as a warning.
/// * [`PhysicsError::InvalidMeshTopology`] for meshes that are not triangle lists.
/// * [`PhysicsError::CollisionShape`] for degenerate geometry.
pub fn build_shape(collider: &Collider) -> Result<SharedShape> {
    match collider {
        Collider::Box { half_extents } => Ok(SharedShape::cuboid(
            half_extents.x,
            half_extents.y,
            half_extents.z,
        )),
        Collider::Sphere { radius } => Ok(SharedShape::ball(*radius)),
        Collider::Plane => Ok(SharedShape::halfspace(Vector3::y_axis())),
        Collider::Cylinder { radius, height } => {
            create_cylinder(*radius, *radius, *height, CYLINDER_SEGMENTS)
        }
        Collider::Mesh(mesh) => create_trimesh(mesh),
        other => Err(PhysicsError::UnsupportedColliderKind {
            kind: other.kind_name(),
        }),
    }
}

/// Rotation taking the raw cylinder primitive's axis (local X) onto local up (Y).
pub fn cylinder_axis_correction() -> UnitQuaternion<f32> {
    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -FRAC_PI_2)
}

/// Points of a segmented cylinder whose axis runs along local X, before axis correction.
fn cylinder_points(
    radius_top: f32,
    radius_bottom: f32,
    height: f32,
    segments: usize,
) -> Vec<Point3<f32>> {
    let half = height / 2.0;
    let mut points = Vec::with_capacity(segments * 2);
    for i in 0..segments {
        let (sin, cos) = (TAU * i as f32 / segments as f32).sin_cos();
        points.push(Point3::new(-half, radius_bottom * cos, radius_bottom * sin));
        points.push(Point3::new(half, radius_top * cos, radius_top * sin));
    }
    points
}

fn create_cylinder(
    radius_top: f32,
    radius_bottom: f32,
    height: f32,
    segments: usize,
) -> Result<SharedShape> {
    let correction = cylinder_axis_correction();
    let points: Vec<Point3<f32>> = cylinder_points(radius_top, radius_bottom, height, segments)
        .into_iter()
        .map(|p| correction * p)
        .collect();

    match ConvexPolyhedron::from_convex_hull(&points) {
        Some(hull) => Ok(SharedShape::new(hull)),
        None => Err(PhysicsError::CollisionShape {
            name: "cylinder".to_string(),
            reason: format!("degenerate cylinder (radius {radius_top}, height {height})"),
        }),
    }
}

fn create_trimesh(mesh: &MeshCollider) -> Result<SharedShape> {
    if !mesh.is_triangle_list() {
        return Err(PhysicsError::InvalidMeshTopology(format!(
            "index modes {:?} with {} indices",
            mesh.index_modes,
            mesh.indices.len()
        )));
    }
    if mesh.positions.len() % 3 != 0 {
        return Err(PhysicsError::CollisionShape {
            name: "mesh".to_string(),
            reason: format!("{} position components is not a multiple of 3", mesh.positions.len()),
        });
    }

    let scale = mesh.scale;
    let vertices: Vec<Point3<f32>> = mesh
        .positions
        .chunks_exact(3)
        .map(|v| Point3::new(v[0] * scale.x, v[1] * scale.y, v[2] * scale.z))
        .collect();

    if let Some(&max) = mesh.indices.iter().max() {
        if max as usize >= vertices.len() {
            return Err(PhysicsError::CollisionShape {
                name: "mesh".to_string(),
                reason: format!("index {max} out of range for {} vertices", vertices.len()),
            });
        }
    }

    let indices: Vec<[u32; 3]> = mesh
        .indices
        .chunks_exact(3)
        .map(|i| [i[0], i[1], i[2]])
        .collect();

    match TriMesh::new(vertices, indices) {
        Ok(trimesh) => Ok(SharedShape::new(trimesh)),
        Err(e) => Err(PhysicsError::CollisionShape {
            name: "mesh".to_string(),
            reason: format!("Failed to create trimesh: {:?}", e),
        }),
    }
}

/// Largest distance from the shape's local origin to any point of the shape.
pub fn bounding_radius(shape: &SharedShape) -> f32 {
    if let Some(ball) = shape.as_ball() {
        ball.radius
    } else if let Some(cuboid) = shape.as_cuboid() {
        cuboid.half_extents.norm()
    } else if shape.as_halfspace().is_some() {
        f32::MAX
    } else if let Some(poly) = shape.as_convex_polyhedron() {
        max_norm(poly.points())
    } else if let Some(trimesh) = shape.as_trimesh() {
        max_norm(trimesh.vertices())
    } else {
        let sphere = shape.compute_local_bounding_sphere();
        sphere.center().coords.norm() + sphere.radius()
    }
}

fn max_norm(points: &[Point3<f32>]) -> f32 {
    points
        .iter()
        .map(|p| p.coords.norm())
        .fold(0.0, f32::max)
}
