//! Spatial queries: single and piercing ray casts, volume overlaps
//!
//! Multi-result queries write into growable buffers owned by the engine. A
//! buffer that fills up mid-query is doubled and the query is re-run; callers
//! only ever see the complete result set.

use crate::collider::{FilterData, Shape, ShapeGeometry, ShapeId};
use crate::error::{PhysicsError, Result};
use rapier3d::na::{Quaternion, UnitQuaternion};
use rapier3d::parry::bounding_volume::Aabb;
use rapier3d::parry::query::visitors::RayIntersectionsVisitor;
use rapier3d::parry::query::{RayCast, RayIntersection};
use rapier3d::parry::shape::{FeatureId, HeightField, Shape as ParryShape, Triangle};
use rapier3d::prelude as rapier;
use std::collections::{HashMap, HashSet};

/// Padding around heightfield ray segments so cells touched only on an edge
/// are still visited
const CELL_MARGIN: f32 = 1e-4;

/// Result of a ray cast
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryHit {
    /// The shape that was hit
    pub shape: ShapeId,
    /// Hit point in world space
    pub point: [f32; 3],
    /// Surface normal at hit point, world space
    pub normal: [f32; 3],
    /// Triangle index for meshes and heightfields, in the caller's order
    pub face_index: Option<u32>,
    /// Distance from ray origin
    pub distance: f32,
}

/// Fixed-capacity result buffer that records overflow instead of growing
/// while a query is filling it.
#[derive(Debug)]
pub(crate) struct HitBuffer<T> {
    items: Vec<T>,
    capacity: usize,
    overflowed: bool,
}

impl<T> HitBuffer<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            overflowed: false,
        }
    }

    /// Store an item; returns false once the buffer is full
    pub(crate) fn push(&mut self, item: T) -> bool {
        if self.items.len() == self.capacity {
            self.overflowed = true;
            return false;
        }
        self.items.push(item);
        true
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Run `fill` until it completes without overflowing, doubling between
    /// attempts. Capacity never shrinks.
    pub(crate) fn fill_growing(&mut self, mut fill: impl FnMut(&mut Self)) {
        loop {
            self.items.clear();
            self.overflowed = false;
            fill(self);
            if !self.overflowed {
                return;
            }
            self.capacity *= 2;
            self.items.reserve(self.capacity - self.items.len());
            log::debug!("Query buffer overflow, growing to {}", self.capacity);
        }
    }
}

/// Read-only view of the scene needed to answer queries
pub(crate) struct QueryWorld<'a> {
    pub(crate) pipeline: &'a rapier::QueryPipeline,
    pub(crate) bodies: &'a rapier::RigidBodySet,
    pub(crate) colliders: &'a rapier::ColliderSet,
    pub(crate) shapes: &'a HashMap<ShapeId, Shape>,
}

/// Answers ray and overlap questions for gameplay code
pub struct SpatialQueryEngine {
    primary: HitBuffer<(rapier::ColliderHandle, RayIntersection)>,
    secondary: HitBuffer<QueryHit>,
    piercing: Vec<QueryHit>,
    overlaps: HitBuffer<ShapeId>,
}

impl SpatialQueryEngine {
    /// Create an engine whose buffers start at `initial_capacity`
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            primary: HitBuffer::with_capacity(initial_capacity),
            secondary: HitBuffer::with_capacity(initial_capacity),
            piercing: Vec::with_capacity(initial_capacity),
            overlaps: HitBuffer::with_capacity(initial_capacity),
        }
    }

    /// Current capacities of the (primary ray, secondary ray, overlap) buffers
    pub fn buffer_capacities(&self) -> (usize, usize, usize) {
        (
            self.primary.capacity(),
            self.secondary.capacity(),
            self.overlaps.capacity(),
        )
    }

    /// Hits from the last piercing ray cast
    pub fn piercing_hits(&self) -> &[QueryHit] {
        &self.piercing
    }

    /// Shapes from the last overlap query
    pub fn overlap_results(&self) -> &[ShapeId] {
        self.overlaps.as_slice()
    }

    /// Nearest hit along the ray
    pub(crate) fn ray_cast_single(
        &self,
        world: &QueryWorld<'_>,
        origin: [f32; 3],
        direction: [f32; 3],
        max_distance: f32,
        group_mask: u32,
    ) -> Result<Option<QueryHit>> {
        let ray = make_ray(origin, direction, max_distance)?;
        let predicate = group_predicate(group_mask);
        let filter = rapier::QueryFilter::new()
            .exclude_sensors()
            .predicate(&predicate);

        let hit = world.pipeline.cast_ray_and_get_normal(
            world.bodies,
            world.colliders,
            &ray,
            max_distance,
            true,
            filter,
        );
        Ok(hit.and_then(|(handle, intersection)| primary_hit(world, &ray, handle, intersection)))
    }

    /// Every hit along the ray, sorted by ascending distance
    pub(crate) fn ray_cast_piercing(
        &mut self,
        world: &QueryWorld<'_>,
        origin: [f32; 3],
        direction: [f32; 3],
        max_distance: f32,
        group_mask: u32,
    ) -> Result<&[QueryHit]> {
        let ray = make_ray(origin, direction, max_distance)?;
        let predicate = group_predicate(group_mask);
        let filter = rapier::QueryFilter::new()
            .exclude_sensors()
            .predicate(&predicate);

        self.primary.fill_growing(|buffer| {
            world.pipeline.intersections_with_ray(
                world.bodies,
                world.colliders,
                &ray,
                max_distance,
                true,
                filter,
                |handle, intersection| buffer.push((handle, intersection)),
            );
        });

        self.piercing.clear();
        for &(handle, intersection) in self.primary.as_slice() {
            let Some(collider) = world.colliders.get(handle) else {
                continue;
            };
            let shape_id = FilterData::unpack(collider.user_data).shape;
            let Some(shape) = world.shapes.get(&shape_id) else {
                continue;
            };

            if shape.composite {
                let local_ray = ray.inverse_transform_by(collider.position());
                self.secondary.fill_growing(|buffer| {
                    cast_triangles_on_ray(buffer, shape, collider, &local_ray, max_distance);
                });
                self.piercing.extend_from_slice(self.secondary.as_slice());
            } else if let Some(hit) = primary_hit(world, &ray, handle, intersection) {
                self.piercing.push(hit);
            }
        }

        self.piercing.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(&self.piercing)
    }

    /// Shapes overlapping `geometry` placed at `position`/`rotation`
    pub(crate) fn overlap_shapes(
        &mut self,
        world: &QueryWorld<'_>,
        geometry: &ShapeGeometry,
        position: [f32; 3],
        rotation: [f32; 4],
        group_mask: u32,
    ) -> Result<&[ShapeId]> {
        let pose = make_pose(position, rotation)?;
        let shape = geometry
            .to_rapier()
            .map_err(|e| PhysicsError::InvalidArgument(e.to_string()))?;
        let predicate = group_predicate(group_mask);
        let filter = rapier::QueryFilter::new()
            .exclude_sensors()
            .predicate(&predicate);

        self.overlaps.fill_growing(|buffer| {
            world.pipeline.intersections_with_shape(
                world.bodies,
                world.colliders,
                &pose,
                shape.as_ref(),
                filter,
                |handle| {
                    world
                        .colliders
                        .get(handle)
                        .map_or(true, |c| buffer.push(FilterData::unpack(c.user_data).shape))
                },
            );
        });
        Ok(self.overlaps.as_slice())
    }
}

fn group_predicate(group_mask: u32) -> impl Fn(rapier::ColliderHandle, &rapier::Collider) -> bool {
    move |_, collider| group_mask & FilterData::unpack(collider.user_data).group.as_mask() != 0
}

fn make_ray(origin: [f32; 3], direction: [f32; 3], max_distance: f32) -> Result<rapier::Ray> {
    if !(max_distance.is_finite() && max_distance > 0.0) {
        return Err(PhysicsError::InvalidArgument(format!(
            "max distance must be positive, got {max_distance}"
        )));
    }
    if origin.iter().chain(direction.iter()).any(|v| !v.is_finite()) {
        return Err(PhysicsError::InvalidArgument(
            "ray origin and direction must be finite".into(),
        ));
    }
    let dir = rapier::Vector::new(direction[0], direction[1], direction[2]);
    let length = dir.norm();
    if length < 1e-6 {
        return Err(PhysicsError::InvalidArgument(
            "ray direction must be non-zero".into(),
        ));
    }
    Ok(rapier::Ray::new(
        rapier::Point::new(origin[0], origin[1], origin[2]),
        dir / length,
    ))
}

fn make_pose(position: [f32; 3], rotation: [f32; 4]) -> Result<rapier::Isometry<f32>> {
    let [x, y, z, w] = rotation;
    let norm = (x * x + y * y + z * z + w * w).sqrt();
    if !norm.is_finite() || (norm - 1.0).abs() > 1e-3 {
        return Err(PhysicsError::InvalidArgument(
            "orientation must be a unit quaternion".into(),
        ));
    }
    if position.iter().any(|v| !v.is_finite()) {
        return Err(PhysicsError::InvalidArgument("position must be finite".into()));
    }
    Ok(rapier::Isometry::from_parts(
        rapier::Translation::new(position[0], position[1], position[2]),
        UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)),
    ))
}

fn primary_hit(
    world: &QueryWorld<'_>,
    ray: &rapier::Ray,
    handle: rapier::ColliderHandle,
    intersection: RayIntersection,
) -> Option<QueryHit> {
    let collider = world.colliders.get(handle)?;
    let shape = world.shapes.get(&FilterData::unpack(collider.user_data).shape)?;
    let point = ray.point_at(intersection.time_of_impact);

    let face_index = match intersection.feature {
        FeatureId::Face(face) if shape.composite => {
            // Back-face hits are reported past the triangle count
            let face = match triangle_count(collider.shape()) {
                Some(triangles) if face >= triangles => face - triangles,
                _ => face,
            };
            Some(shape.remap_face(face))
        }
        _ => None,
    };

    Some(QueryHit {
        shape: shape.id,
        point: [point.x, point.y, point.z],
        normal: [
            intersection.normal.x,
            intersection.normal.y,
            intersection.normal.z,
        ],
        face_index,
        distance: intersection.time_of_impact,
    })
}

/// Backend triangle count of a mesh or heightfield
fn triangle_count(geometry: &dyn ParryShape) -> Option<u32> {
    geometry
        .as_trimesh()
        .map(|mesh| mesh.num_triangles() as u32)
        .or_else(|| {
            geometry
                .as_heightfield()
                .map(|field| (field.nrows() * field.ncols() * 2) as u32)
        })
}

/// Exact per-triangle pass over one mesh or heightfield, in its local frame
fn cast_triangles_on_ray(
    buffer: &mut HitBuffer<QueryHit>,
    shape: &Shape,
    collider: &rapier::Collider,
    local_ray: &rapier::Ray,
    max_distance: f32,
) {
    let pose = collider.position();
    visit_triangles_on_ray(
        collider.shape(),
        local_ray,
        max_distance,
        &mut |face, triangle| {
            let Some(hit) = triangle.cast_local_ray_and_get_normal(local_ray, max_distance, false)
            else {
                return true;
            };
            let point = pose * local_ray.point_at(hit.time_of_impact);
            let normal = pose * hit.normal;
            buffer.push(QueryHit {
                shape: shape.id,
                point: [point.x, point.y, point.z],
                normal: [normal.x, normal.y, normal.z],
                face_index: Some(shape.remap_face(face)),
                distance: hit.time_of_impact,
            })
        },
    );
}

/// Call `visit` for the triangles whose bounds the ray crosses, until it
/// returns false
fn visit_triangles_on_ray(
    geometry: &dyn ParryShape,
    ray: &rapier::Ray,
    max_distance: f32,
    visit: &mut impl FnMut(u32, &Triangle) -> bool,
) {
    if let Some(mesh) = geometry.as_trimesh() {
        let mut leaf = |face: &u32| visit(*face, &mesh.triangle(*face));
        let mut visitor = RayIntersectionsVisitor::new(ray, max_distance, &mut leaf);
        mesh.qbvh().traverse_depth_first(&mut visitor);
    } else if let Some(field) = geometry.as_heightfield() {
        visit_heightfield_on_ray(field, ray, max_distance, visit);
    }
}

/// Walk a heightfield along the ray in steps of at most one cell
fn visit_heightfield_on_ray(
    field: &HeightField,
    ray: &rapier::Ray,
    max_distance: f32,
    visit: &mut impl FnMut(u32, &Triangle) -> bool,
) {
    let margin = rapier::Vector::repeat(CELL_MARGIN);
    let bounds = field.root_aabb();
    let bounds = Aabb::new(bounds.mins - margin, bounds.maxs + margin);
    let Some((start, end)) = bounds.clip_ray_parameters(ray) else {
        return;
    };
    let end = end.min(max_distance);
    if start > end {
        return;
    }

    let step = field.cell_width().min(field.cell_height()).max(CELL_MARGIN);
    let segments = ((end - start) / step).ceil().max(1.0) as usize;
    let span = (end - start) / segments as f32;

    // Neighbouring segments share the cells on their boundary
    let mut seen = HashSet::new();
    let mut done = false;
    for k in 0..segments {
        let a = ray.point_at(start + span * k as f32);
        let b = ray.point_at(start + span * (k + 1) as f32);
        let segment = Aabb::new(a.inf(&b) - margin, a.sup(&b) + margin);
        field.map_elements_in_local_aabb(&segment, &mut |face, triangle| {
            if !done && seen.insert(face) {
                done = !visit(face, triangle);
            }
        });
        if done {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_buffer_grows_until_complete() {
        let mut buffer = HitBuffer::with_capacity(2);
        let mut attempts = 0;
        buffer.fill_growing(|b| {
            attempts += 1;
            for i in 0..9 {
                if !b.push(i) {
                    return;
                }
            }
        });
        assert_eq!(buffer.as_slice(), &[0, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(attempts, 4);
    }

    #[test]
    fn test_hit_buffer_never_shrinks() {
        let mut buffer = HitBuffer::with_capacity(1);
        buffer.fill_growing(|b| {
            for i in 0..5 {
                b.push(i);
            }
        });
        assert_eq!(buffer.capacity(), 8);
        buffer.fill_growing(|b| {
            b.push(42);
        });
        assert_eq!(buffer.capacity(), 8);
        assert_eq!(buffer.as_slice(), &[42]);
    }

    #[test]
    fn test_ray_argument_validation() {
        assert!(make_ray([0.0; 3], [0.0, 0.0, 1.0], 0.0).is_err());
        assert!(make_ray([0.0; 3], [0.0, 0.0, 1.0], -3.0).is_err());
        assert!(make_ray([0.0; 3], [0.0, 0.0, 0.0], 10.0).is_err());
        assert!(make_ray([f32::NAN, 0.0, 0.0], [0.0, 0.0, 1.0], 10.0).is_err());

        let ray = make_ray([0.0; 3], [0.0, 0.0, 4.0], 10.0).unwrap();
        assert!((ray.dir.norm() - 1.0).abs() < 1e-6);
    }

    fn grid_heights(n: usize) -> ShapeGeometry {
        ShapeGeometry::HeightField {
            heights: (0..n * n).map(|i| ((i % 7) as f32) * 0.1).collect(),
            rows: n,
            cols: n,
            scale: [100.0, 1.0, 100.0],
        }
    }

    fn grid_mesh(n: usize) -> ShapeGeometry {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        for z in 0..=n {
            for x in 0..=n {
                vertices.push([x as f32, 0.0, z as f32]);
            }
        }
        let row = n as u32 + 1;
        for z in 0..n as u32 {
            for x in 0..n as u32 {
                let v = z * row + x;
                indices.push([v, v + row, v + 1]);
                indices.push([v + 1, v + row, v + row + 1]);
            }
        }
        ShapeGeometry::TriMesh { vertices, indices }
    }

    fn visits(geometry: &ShapeGeometry, ray: &rapier::Ray) -> (usize, usize) {
        let shape = geometry.to_rapier().unwrap();
        let mut visited = 0;
        let mut hits = 0;
        visit_triangles_on_ray(shape.as_ref(), ray, 1000.0, &mut |_, triangle| {
            visited += 1;
            if triangle.cast_local_ray(ray, 1000.0, false).is_some() {
                hits += 1;
            }
            true
        });
        (visited, hits)
    }

    #[test]
    fn test_heightfield_pass_visits_cells_near_ray() {
        // 127 x 127 cells, 32258 triangles
        let field = grid_heights(128);
        let down = rapier::Ray::new(
            rapier::Point::new(3.3, 10.0, -7.9),
            rapier::Vector::new(0.0, -1.0, 0.0),
        );
        let (visited, hits) = visits(&field, &down);
        assert_eq!(hits, 1);
        assert!(visited <= 16, "visited {visited} triangles");

        // Grazing ray across the whole field stays proportional to its path
        let across = rapier::Ray::new(
            rapier::Point::new(-60.0, 0.25, 0.3),
            rapier::Vector::new(1.0, 0.0, 0.0),
        );
        let (visited, _) = visits(&field, &across);
        assert!(visited > 0);
        assert!(visited <= 127 * 2 * 4, "visited {visited} triangles");
    }

    #[test]
    fn test_mesh_pass_visits_triangles_near_ray() {
        // 64 x 64 quads, 8192 triangles
        let mesh = grid_mesh(64);
        let down = rapier::Ray::new(
            rapier::Point::new(20.3, 5.0, 41.6),
            rapier::Vector::new(0.0, -1.0, 0.0),
        );
        let (visited, hits) = visits(&mesh, &down);
        assert_eq!(hits, 1);
        assert!(visited <= 64, "visited {visited} triangles");
    }

    #[test]
    fn test_heightfield_back_faces_wrap() {
        let shape = grid_heights(5).to_rapier().unwrap();
        assert_eq!(triangle_count(shape.as_ref()), Some(32));
        let ball = ShapeGeometry::sphere(1.0).to_rapier().unwrap();
        assert_eq!(triangle_count(ball.as_ref()), None);
    }

    #[test]
    fn test_pose_validation() {
        assert!(make_pose([0.0; 3], [0.0, 0.0, 0.0, 1.0]).is_ok());
        assert!(make_pose([0.0; 3], [0.0, 0.0, 0.0, 0.0]).is_err());
        assert!(make_pose([0.0; 3], [1.0, 1.0, 0.0, 1.0]).is_err());
    }
}
