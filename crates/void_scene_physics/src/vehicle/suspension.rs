//! Batched suspension ray casts, one ray per wheel per update

use crate::collider::{FilterData, ShapeId};
use crate::material::{MaterialId, MaterialPool};
use crate::query::QueryWorld;
use rapier3d::prelude as rapier;

/// Ground found under one wheel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuspensionHit {
    /// Ground shape
    pub shape: ShapeId,
    /// Drivable material under the wheel, if the ground carries one
    pub surface: Option<MaterialId>,
    /// Hit point, world space
    pub point: [f32; 3],
    /// Ground normal, world space
    pub normal: [f32; 3],
    /// Distance from the suspension attachment point
    pub distance: f32,
}

#[derive(Debug, Clone, Copy)]
struct SuspensionRay {
    origin: rapier::Point<f32>,
    direction: rapier::Vector<f32>,
    length: f32,
}

/// Fixed-size ray batch sized to the vehicle's wheel count
#[derive(Debug)]
pub(crate) struct SuspensionRaycastBatch {
    rays: Vec<SuspensionRay>,
    hits: Vec<Option<SuspensionHit>>,
}

impl SuspensionRaycastBatch {
    pub(crate) fn new(wheel_count: usize) -> Self {
        Self {
            rays: Vec::with_capacity(wheel_count),
            hits: vec![None; wheel_count],
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.hits.len()
    }

    /// Queue one ray; rays beyond the wheel count are dropped
    pub(crate) fn push(&mut self, origin: rapier::Point<f32>, direction: rapier::Vector<f32>, length: f32) {
        if self.rays.len() < self.capacity() {
            self.rays.push(SuspensionRay {
                origin,
                direction,
                length,
            });
        }
    }

    /// Cast every queued ray, ignoring the chassis body and trigger volumes
    pub(crate) fn issue(
        &mut self,
        world: &QueryWorld<'_>,
        chassis: rapier::RigidBodyHandle,
        pool: &MaterialPool,
    ) -> &[Option<SuspensionHit>] {
        let filter = rapier::QueryFilter::new()
            .exclude_sensors()
            .exclude_rigid_body(chassis);

        self.hits.iter_mut().for_each(|h| *h = None);
        for (slot, ray) in self.hits.iter_mut().zip(self.rays.drain(..)) {
            let cast = rapier::Ray::new(ray.origin, ray.direction);
            *slot = world
                .pipeline
                .cast_ray_and_get_normal(world.bodies, world.colliders, &cast, ray.length, true, filter)
                .and_then(|(handle, hit)| {
                    let collider = world.colliders.get(handle)?;
                    let shape = FilterData::unpack(collider.user_data).shape;
                    let surface = world.shapes.get(&shape).and_then(|s| {
                        s.materials().iter().copied().find(|m| pool.is_drivable(*m))
                    });
                    let point = cast.point_at(hit.time_of_impact);
                    Some(SuspensionHit {
                        shape,
                        surface,
                        point: [point.x, point.y, point.z],
                        normal: [hit.normal.x, hit.normal.y, hit.normal.z],
                        distance: hit.time_of_impact,
                    })
                });
        }
        &self.hits
    }

    /// Results of the last `issue`
    pub(crate) fn hits(&self) -> &[Option<SuspensionHit>] {
        &self.hits
    }

    pub(crate) fn clear(&mut self) {
        self.rays.clear();
        self.hits.iter_mut().for_each(|h| *h = None);
    }
}
