//! Physics scene - the host-facing container
//!
//! Owns the backend sets, the collision filtering state, the material pool,
//! the query engine and every vehicle. All calls are made from the thread
//! that drives the scene; the only in-step callback is the pair filter.

use crate::body::{Body, BodyDesc, BodyId};
use crate::collider::{Shape, ShapeDesc, ShapeGeometry, ShapeId};
use crate::config::SceneConfig;
use crate::error::{PhysicsError, Result};
use crate::events::{ChannelEventSink, EventCollector, PairEvent};
use crate::filter::PairFilterHooks;
use crate::layers::{ContactGroup, ContactGroupMatrix};
use crate::material::{Material, MaterialId, MaterialPool};
use crate::query::{QueryHit, QueryWorld, SpatialQueryEngine};
use crate::suppression::ShapeSuppressionRegistry;
use crate::vehicle::{
    ChassisGeometry, Gear, VehicleContext, VehicleDesc, VehicleEnv, VehicleId, VehicleInput,
    VehicleTables, WheelGeometry, WheelTelemetry,
};
use rapier3d::prelude as rapier;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// A simulated scene
pub struct PhysicsScene {
    /// Configuration
    config: SceneConfig,

    /// Rapier physics pipeline
    pipeline: rapier::PhysicsPipeline,

    /// Gravity
    gravity: rapier::Vector<f32>,

    /// Integration parameters
    integration_params: rapier::IntegrationParameters,

    islands: rapier::IslandManager,
    broad_phase: rapier::DefaultBroadPhase,
    narrow_phase: rapier::NarrowPhase,
    impulse_joints: rapier::ImpulseJointSet,
    multibody_joints: rapier::MultibodyJointSet,
    ccd_solver: rapier::CCDSolver,

    /// Query pipeline, refreshed on fetch and lazily after edits
    query_pipeline: rapier::QueryPipeline,
    query_dirty: bool,

    rigid_bodies: rapier::RigidBodySet,
    colliders: rapier::ColliderSet,

    /// Scene bookkeeping keyed by our own identities
    bodies: HashMap<BodyId, Body>,
    shapes: HashMap<ShapeId, Shape>,
    vehicles: HashMap<VehicleId, VehicleContext>,

    /// Collision filtering state read by the pair filter
    matrix: ContactGroupMatrix,
    suppression: ShapeSuppressionRegistry,

    /// Shared material pool
    materials: Arc<MaterialPool>,

    queries: SpatialQueryEngine,

    /// Events from the last fetched step
    events: EventCollector,
    event_sender: crossbeam_channel::Sender<rapier::CollisionEvent>,
    event_receiver: crossbeam_channel::Receiver<rapier::CollisionEvent>,

    /// A step was simulated and its results are not fetched yet
    in_flight: bool,

    next_body: u64,
    next_shape: u64,
    next_vehicle: u64,
}

impl PhysicsScene {
    /// Create a scene with its own material pool
    pub fn new(config: SceneConfig) -> Result<Self> {
        Self::with_material_pool(config, Arc::new(MaterialPool::new()))
    }

    /// Create a scene sharing an existing material pool
    pub fn with_material_pool(config: SceneConfig, materials: Arc<MaterialPool>) -> Result<Self> {
        config.validate()?;

        let gravity = rapier::Vector::new(config.gravity[0], config.gravity[1], config.gravity[2]);

        let mut integration_params = rapier::IntegrationParameters::default();
        integration_params.num_solver_iterations = NonZeroUsize::new(config.solver_iterations)
            .ok_or_else(|| PhysicsError::InvalidConfig("solver_iterations must be at least 1".into()))?;

        let (event_sender, event_receiver) = crossbeam_channel::unbounded();

        if config.worker_threads > 0 {
            log::warn!(
                "Ignoring worker thread hint {}: the backend steps on the calling thread",
                config.worker_threads
            );
        }
        log::info!(
            "Physics scene created (gravity {:?}, {} solver iterations)",
            config.gravity,
            config.solver_iterations
        );

        Ok(Self {
            queries: SpatialQueryEngine::new(config.query_buffer_capacity),
            config,
            pipeline: rapier::PhysicsPipeline::new(),
            gravity,
            integration_params,
            islands: rapier::IslandManager::new(),
            broad_phase: rapier::DefaultBroadPhase::new(),
            narrow_phase: rapier::NarrowPhase::new(),
            impulse_joints: rapier::ImpulseJointSet::new(),
            multibody_joints: rapier::MultibodyJointSet::new(),
            ccd_solver: rapier::CCDSolver::new(),
            query_pipeline: rapier::QueryPipeline::new(),
            query_dirty: false,
            rigid_bodies: rapier::RigidBodySet::new(),
            colliders: rapier::ColliderSet::new(),
            bodies: HashMap::new(),
            shapes: HashMap::new(),
            vehicles: HashMap::new(),
            matrix: ContactGroupMatrix::new(),
            suppression: ShapeSuppressionRegistry::new(),
            materials,
            events: EventCollector::default(),
            event_sender,
            event_receiver,
            in_flight: false,
            next_body: 1,
            next_shape: 1,
            next_vehicle: 1,
        })
    }

    /// Get the scene configuration
    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Set gravity
    pub fn set_gravity(&mut self, x: f32, y: f32, z: f32) -> Result<()> {
        self.ensure_idle()?;
        if ![x, y, z].iter().all(|g| g.is_finite()) {
            return Err(PhysicsError::InvalidArgument("gravity must be finite".into()));
        }
        self.gravity = rapier::Vector::new(x, y, z);
        Ok(())
    }

    /// Get gravity
    pub fn gravity(&self) -> [f32; 3] {
        [self.gravity.x, self.gravity.y, self.gravity.z]
    }

    /// Whether a step is waiting for `fetch_results`
    pub fn is_simulating(&self) -> bool {
        self.in_flight
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.in_flight {
            Err(PhysicsError::SimulationInFlight)
        } else {
            Ok(())
        }
    }

    // ==================== Bodies ====================

    /// Add a rigid body
    pub fn add_body(&mut self, desc: BodyDesc) -> Result<BodyId> {
        self.ensure_idle()?;
        let [x, y, z, w] = desc.rotation;
        let norm = (x * x + y * y + z * z + w * w).sqrt();
        if !norm.is_finite() || norm < 1e-6 || desc.position.iter().any(|p| !p.is_finite()) {
            return Err(PhysicsError::InvalidConfig(
                "body pose must be finite with a non-zero rotation".into(),
            ));
        }

        let handle = self
            .rigid_bodies
            .insert(desc.to_rapier_builder(self.config.ccd_enabled));
        let id = BodyId(self.next_body);
        self.next_body += 1;
        self.bodies.insert(
            id,
            Body {
                id,
                handle,
                shapes: Vec::new(),
                vehicle: None,
            },
        );
        log::debug!("Body {:?} added ({:?})", id, desc.body_type);
        Ok(id)
    }

    /// Remove a body, its shapes and any vehicle driving it
    pub fn remove_body(&mut self, id: BodyId) -> Result<()> {
        self.ensure_idle()?;
        let body = self.bodies.get(&id).ok_or(PhysicsError::BodyNotFound(id))?;
        let vehicle = body.vehicle;
        let shapes = body.shapes.clone();

        if let Some(vehicle) = vehicle {
            self.destroy_vehicle(vehicle)?;
        }
        for shape in shapes {
            self.detach_shape(shape)?;
        }

        if let Some(body) = self.bodies.remove(&id) {
            self.rigid_bodies.remove(
                body.handle,
                &mut self.islands,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            );
        }
        self.query_dirty = true;
        log::debug!("Body {:?} removed", id);
        Ok(())
    }

    /// Scene bookkeeping for a body
    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.bodies.get(&id)
    }

    fn rigid_body(&self, id: BodyId) -> Result<&rapier::RigidBody> {
        self.bodies
            .get(&id)
            .and_then(|b| self.rigid_bodies.get(b.handle))
            .ok_or(PhysicsError::BodyNotFound(id))
    }

    /// Get body position
    pub fn body_position(&self, id: BodyId) -> Result<[f32; 3]> {
        let t = self.rigid_body(id)?.translation();
        Ok([t.x, t.y, t.z])
    }

    /// Get body rotation (quaternion: x, y, z, w)
    pub fn body_rotation(&self, id: BodyId) -> Result<[f32; 4]> {
        let r = self.rigid_body(id)?.rotation();
        Ok([r.i, r.j, r.k, r.w])
    }

    /// Get body linear velocity
    pub fn body_linear_velocity(&self, id: BodyId) -> Result<[f32; 3]> {
        let v = self.rigid_body(id)?.linvel();
        Ok([v.x, v.y, v.z])
    }

    /// Set body linear velocity
    pub fn set_body_linear_velocity(&mut self, id: BodyId, x: f32, y: f32, z: f32) -> Result<()> {
        self.ensure_idle()?;
        let handle = self.bodies.get(&id).ok_or(PhysicsError::BodyNotFound(id))?.handle;
        self.rigid_bodies
            .get_mut(handle)
            .map(|b| b.set_linvel(rapier::Vector::new(x, y, z), true))
            .ok_or(PhysicsError::BodyNotFound(id))
    }

    /// Get number of bodies
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    // ==================== Shapes ====================

    /// Attach a shape to a body
    pub fn add_shape(&mut self, body: BodyId, desc: ShapeDesc) -> Result<ShapeId> {
        self.ensure_idle()?;
        let group = ContactGroup::new(desc.group)?;
        let body_handle = self.bodies.get(&body).ok_or(PhysicsError::BodyNotFound(body))?.handle;
        let geometry = desc.geometry.to_rapier()?;
        let local_pose = desc.local_pose()?;

        // Take material references; roll back on a stale handle
        for (i, material) in desc.materials.iter().enumerate() {
            if let Err(e) = self.materials.acquire(*material) {
                for taken in &desc.materials[..i] {
                    let _ = self.materials.free(*taken);
                }
                return Err(e);
            }
        }
        let drivable = desc.materials.iter().any(|m| self.materials.is_drivable(*m));
        let surface = desc
            .materials
            .first()
            .and_then(|m| self.materials.get(*m))
            .unwrap_or_default();

        let id = ShapeId(self.next_shape);
        self.next_shape += 1;

        let mut shape = Shape {
            id,
            body,
            collider: rapier::ColliderHandle::invalid(),
            materials: desc.materials.clone(),
            group,
            trigger: desc.trigger,
            drivable,
            is_wheel: false,
            composite: desc.geometry.is_composite(),
            face_remap: desc.face_remap.map(Arc::from),
        };

        let collider = rapier::ColliderBuilder::new(geometry)
            .position(local_pose)
            .sensor(desc.trigger)
            .density(desc.density)
            .friction(surface.dynamic_friction)
            .restitution(surface.restitution)
            .active_hooks(
                rapier::ActiveHooks::FILTER_CONTACT_PAIRS | rapier::ActiveHooks::FILTER_INTERSECTION_PAIR,
            )
            .active_events(rapier::ActiveEvents::COLLISION_EVENTS)
            .user_data(shape.filter_data().pack())
            .build();
        shape.collider = self
            .colliders
            .insert_with_parent(collider, body_handle, &mut self.rigid_bodies);

        self.shapes.insert(id, shape);
        if let Some(body) = self.bodies.get_mut(&body) {
            body.shapes.push(id);
        }
        self.query_dirty = true;
        log::debug!(
            "Shape {:?} added to body {:?} (group {}, trigger {}, drivable {})",
            id,
            body,
            group.index(),
            desc.trigger,
            drivable
        );
        Ok(id)
    }

    /// Remove a shape. Shapes in use by a vehicle must be released by
    /// destroying the vehicle first.
    pub fn remove_shape(&mut self, id: ShapeId) -> Result<()> {
        self.ensure_idle()?;
        let shape = self.shapes.get(&id).ok_or(PhysicsError::ShapeNotFound(id))?;
        let in_use = shape.is_wheel
            || self
                .vehicles
                .values()
                .any(|v| v.chassis_shape() == id);
        if in_use {
            return Err(PhysicsError::InvalidVehicle(format!(
                "shape {id:?} is used by a vehicle"
            )));
        }
        self.detach_shape(id)
    }

    /// Drop a shape from the backend and every registry that references it
    fn detach_shape(&mut self, id: ShapeId) -> Result<()> {
        let shape = self.shapes.remove(&id).ok_or(PhysicsError::ShapeNotFound(id))?;
        self.colliders
            .remove(shape.collider, &mut self.islands, &mut self.rigid_bodies, true);
        self.events.collider_removed(shape.collider, id);

        let partners = self.suppression.remove_shape(id);
        if !partners.is_empty() {
            log::debug!("Shape {:?} dropped {} suppressed pairs", id, partners.len());
        }

        for material in &shape.materials {
            if let Err(e) = self.materials.free(*material) {
                log::warn!("Shape {:?} released an unknown material: {}", id, e);
            }
        }

        if let Some(body) = self.bodies.get_mut(&shape.body) {
            body.shapes.retain(|s| *s != id);
        }
        self.query_dirty = true;
        log::debug!("Shape {:?} removed", id);
        Ok(())
    }

    /// Move a shape to another contact group
    pub fn set_shape_group(&mut self, id: ShapeId, group: u32) -> Result<()> {
        self.ensure_idle()?;
        let group = ContactGroup::new(group)?;
        let shape = self.shapes.get_mut(&id).ok_or(PhysicsError::ShapeNotFound(id))?;
        shape.group = group;
        self.sync_filter_data(id);
        Ok(())
    }

    /// Scene bookkeeping for a shape
    pub fn shape(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.get(&id)
    }

    /// Get number of shapes
    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    /// Rewrite the packed filter data the pair filter reads
    fn sync_filter_data(&mut self, id: ShapeId) {
        if let Some(shape) = self.shapes.get(&id) {
            if let Some(collider) = self.colliders.get_mut(shape.collider) {
                collider.user_data = shape.filter_data().pack();
            }
        }
    }

    // ==================== Collision Filtering ====================

    /// Enable or disable collision between two contact groups
    pub fn set_group_pair_enabled(&mut self, g1: u32, g2: u32, enabled: bool) -> Result<()> {
        self.ensure_idle()?;
        self.matrix.set_group_pair_enabled(g1, g2, enabled)
    }

    /// Check whether two contact groups collide
    pub fn is_group_pair_enabled(&self, g1: u32, g2: u32) -> Result<bool> {
        self.matrix.is_group_pair_enabled(g1, g2)
    }

    /// The group matrix
    pub fn group_matrix(&self) -> &ContactGroupMatrix {
        &self.matrix
    }

    /// Stop two shapes from colliding. Returns false if already suppressed.
    pub fn suppress_pair(&mut self, a: ShapeId, b: ShapeId) -> Result<bool> {
        self.ensure_idle()?;
        self.check_shapes(a, b)?;
        Ok(self.suppression.suppress(a, b))
    }

    /// Let two shapes collide again. Returns false if they were not suppressed.
    pub fn unsuppress_pair(&mut self, a: ShapeId, b: ShapeId) -> Result<bool> {
        self.ensure_idle()?;
        self.check_shapes(a, b)?;
        Ok(self.suppression.unsuppress(a, b))
    }

    /// Check whether a pair is suppressed
    pub fn is_pair_suppressed(&self, a: ShapeId, b: ShapeId) -> bool {
        self.suppression.is_suppressed(a, b)
    }

    /// The suppression registry
    pub fn suppression(&self) -> &ShapeSuppressionRegistry {
        &self.suppression
    }

    fn check_shapes(&self, a: ShapeId, b: ShapeId) -> Result<()> {
        for id in [a, b] {
            if !self.shapes.contains_key(&id) {
                return Err(PhysicsError::ShapeNotFound(id));
            }
        }
        Ok(())
    }

    // ==================== Materials ====================

    /// Get or create a pooled material
    pub fn alloc_material(&self, material: Material) -> MaterialId {
        self.materials.alloc(material)
    }

    /// Release one reference to a pooled material
    pub fn free_material(&self, id: MaterialId) -> Result<bool> {
        self.materials.free(id).map_err(|e| {
            log::warn!("Freeing unknown material {:?}", id);
            e
        })
    }

    /// The shared material pool
    pub fn materials(&self) -> &Arc<MaterialPool> {
        &self.materials
    }

    // ==================== Simulation ====================

    /// Start a step. Mutation and queries fail until `fetch_results`.
    pub fn simulate(&mut self, dt: f32) -> Result<()> {
        self.ensure_idle()?;
        if !(dt.is_finite() && dt > 0.0) {
            return Err(PhysicsError::InvalidArgument(format!(
                "time step must be positive, got {dt}"
            )));
        }
        self.integration_params.dt = dt;

        let hooks = PairFilterHooks {
            matrix: &self.matrix,
            suppression: &self.suppression,
        };
        let sink = ChannelEventSink {
            collision_events: self.event_sender.clone(),
        };

        self.pipeline.step(
            &self.gravity,
            &self.integration_params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &hooks,
            &sink,
        );
        self.in_flight = true;
        Ok(())
    }

    /// Finish the pending step: refresh queries and gather events. Returns
    /// false when no step was pending. The step itself completes inside
    /// `simulate`, so `block` never has to wait.
    pub fn fetch_results(&mut self, _block: bool) -> bool {
        if !self.in_flight {
            return false;
        }
        self.query_pipeline.update(&self.colliders);
        self.query_dirty = false;

        self.events.clear();
        self.events
            .collect(&self.event_receiver, &self.colliders, &self.narrow_phase);
        self.in_flight = false;
        true
    }

    /// `simulate` followed by a blocking `fetch_results`
    pub fn step(&mut self, dt: f32) -> Result<()> {
        self.simulate(dt)?;
        self.fetch_results(true);
        Ok(())
    }

    fn sync_queries(&mut self) {
        if self.query_dirty {
            self.query_pipeline.update(&self.colliders);
            self.query_dirty = false;
        }
    }

    // ==================== Queries ====================

    /// Nearest hit along a ray against shapes whose group is in `group_mask`
    pub fn ray_cast_single(
        &mut self,
        origin: [f32; 3],
        direction: [f32; 3],
        max_distance: f32,
        group_mask: u32,
    ) -> Result<Option<QueryHit>> {
        self.ensure_idle()?;
        self.sync_queries();
        let world = QueryWorld {
            pipeline: &self.query_pipeline,
            bodies: &self.rigid_bodies,
            colliders: &self.colliders,
            shapes: &self.shapes,
        };
        self.queries
            .ray_cast_single(&world, origin, direction, max_distance, group_mask)
    }

    /// Every hit along a ray, nearest first
    pub fn ray_cast_piercing(
        &mut self,
        origin: [f32; 3],
        direction: [f32; 3],
        max_distance: f32,
        group_mask: u32,
    ) -> Result<&[QueryHit]> {
        self.ensure_idle()?;
        self.sync_queries();
        let world = QueryWorld {
            pipeline: &self.query_pipeline,
            bodies: &self.rigid_bodies,
            colliders: &self.colliders,
            shapes: &self.shapes,
        };
        self.queries
            .ray_cast_piercing(&world, origin, direction, max_distance, group_mask)
    }

    /// Hits of the last piercing ray cast
    pub fn piercing_hits(&self) -> &[QueryHit] {
        self.queries.piercing_hits()
    }

    /// Shapes overlapping an oriented box
    pub fn overlap_box(
        &mut self,
        half_extents: [f32; 3],
        position: [f32; 3],
        rotation: [f32; 4],
        group_mask: u32,
    ) -> Result<&[ShapeId]> {
        let geometry = ShapeGeometry::Box { half_extents };
        self.overlap_shape(&geometry, position, rotation, group_mask)
    }

    /// Shapes overlapping a sphere
    pub fn overlap_sphere(&mut self, radius: f32, position: [f32; 3], group_mask: u32) -> Result<&[ShapeId]> {
        let geometry = ShapeGeometry::sphere(radius);
        self.overlap_shape(&geometry, position, [0.0, 0.0, 0.0, 1.0], group_mask)
    }

    /// Shapes overlapping a Y-aligned capsule
    pub fn overlap_capsule(
        &mut self,
        half_height: f32,
        radius: f32,
        position: [f32; 3],
        rotation: [f32; 4],
        group_mask: u32,
    ) -> Result<&[ShapeId]> {
        let geometry = ShapeGeometry::capsule(half_height, radius);
        self.overlap_shape(&geometry, position, rotation, group_mask)
    }

    /// Shapes overlapping arbitrary geometry
    pub fn overlap_shape(
        &mut self,
        geometry: &ShapeGeometry,
        position: [f32; 3],
        rotation: [f32; 4],
        group_mask: u32,
    ) -> Result<&[ShapeId]> {
        self.ensure_idle()?;
        self.sync_queries();
        let world = QueryWorld {
            pipeline: &self.query_pipeline,
            bodies: &self.rigid_bodies,
            colliders: &self.colliders,
            shapes: &self.shapes,
        };
        self.queries
            .overlap_shapes(&world, geometry, position, rotation, group_mask)
    }

    /// Shapes from the last overlap query
    pub fn overlap_results(&self) -> &[ShapeId] {
        self.queries.overlap_results()
    }

    /// The query engine
    pub fn query_engine(&self) -> &SpatialQueryEngine {
        &self.queries
    }

    // ==================== Vehicles ====================

    /// Turn a dynamic body and some of its shapes into a vehicle
    pub fn create_vehicle(&mut self, desc: VehicleDesc) -> Result<VehicleId> {
        self.ensure_idle()?;
        let chassis = self
            .bodies
            .get(&desc.chassis)
            .ok_or(PhysicsError::BodyNotFound(desc.chassis))?;
        if chassis.vehicle.is_some() {
            return Err(PhysicsError::InvalidVehicle(format!(
                "body {:?} already drives a vehicle",
                desc.chassis
            )));
        }
        let chassis_handle = chassis.handle;
        let is_dynamic = self
            .rigid_bodies
            .get(chassis_handle)
            .is_some_and(|b| b.is_dynamic());
        if !is_dynamic {
            return Err(PhysicsError::InvalidVehicle("chassis body must be dynamic".into()));
        }

        let chassis_collider = self.vehicle_shape_collider(&desc, desc.chassis_shape)?;
        let mut seen = HashSet::from([desc.chassis_shape]);
        let mut wheel_geometry = Vec::with_capacity(desc.wheels.len());
        for wheel in &desc.wheels {
            if !seen.insert(wheel.shape) {
                return Err(PhysicsError::InvalidVehicle(format!(
                    "shape {:?} listed twice",
                    wheel.shape
                )));
            }
            let collider = self.vehicle_shape_collider(&desc, wheel.shape)?;
            if self.shapes.get(&wheel.shape).is_some_and(|s| s.is_wheel) {
                return Err(PhysicsError::InvalidVehicle(format!(
                    "shape {:?} is already a wheel",
                    wheel.shape
                )));
            }
            wheel_geometry.push(WheelGeometry::measure(collider));
        }
        let chassis_geometry = ChassisGeometry::measure(chassis_collider);

        let tables = VehicleTables::from_params(&desc.params)?;
        let mass = chassis_geometry.mass_properties(tables.chassis_mass, tables.chassis_com_offset);

        let id = VehicleId(self.next_vehicle);
        let mut context = VehicleContext::build(
            id,
            &desc,
            chassis_handle,
            &wheel_geometry,
            tables,
            self.config.max_drivable_surfaces,
        );
        context.prime_friction(&self.materials)?;
        self.next_vehicle += 1;

        if let Some(body) = self.rigid_bodies.get_mut(chassis_handle) {
            body.set_additional_mass_properties(mass, true);
        }
        for wheel in &desc.wheels {
            if let Some(shape) = self.shapes.get_mut(&wheel.shape) {
                shape.is_wheel = true;
            }
            self.sync_filter_data(wheel.shape);
        }
        if let Some(body) = self.bodies.get_mut(&desc.chassis) {
            body.vehicle = Some(id);
        }
        self.vehicles.insert(id, context);
        log::debug!(
            "Vehicle {:?} created on body {:?} with {} wheels",
            id,
            desc.chassis,
            desc.wheels.len()
        );
        Ok(id)
    }

    fn vehicle_shape_collider(&self, desc: &VehicleDesc, id: ShapeId) -> Result<&rapier::Collider> {
        let shape = self.shapes.get(&id).ok_or(PhysicsError::ShapeNotFound(id))?;
        if shape.body != desc.chassis {
            return Err(PhysicsError::InvalidVehicle(format!(
                "shape {id:?} is not attached to the chassis body"
            )));
        }
        if shape.trigger {
            return Err(PhysicsError::InvalidVehicle(format!(
                "shape {id:?} is a trigger volume"
            )));
        }
        self.colliders
            .get(shape.collider)
            .ok_or(PhysicsError::ShapeNotFound(id))
    }

    /// Destroy a vehicle, returning its wheels to plain shapes
    pub fn destroy_vehicle(&mut self, id: VehicleId) -> Result<()> {
        self.ensure_idle()?;
        let context = self.vehicles.remove(&id).ok_or(PhysicsError::VehicleNotFound(id))?;
        let wheels: Vec<ShapeId> = context.wheel_shapes().collect();
        for wheel in wheels {
            if let Some(shape) = self.shapes.get_mut(&wheel) {
                shape.is_wheel = false;
            }
            self.sync_filter_data(wheel);
        }
        if let Some(body) = self.bodies.get_mut(&context.chassis()) {
            body.vehicle = None;
            if let Some(rb) = self.rigid_bodies.get_mut(body.handle) {
                rb.set_additional_mass(0.0, true);
            }
        }
        log::debug!("Vehicle {:?} destroyed", id);
        Ok(())
    }

    /// Advance one vehicle by `dt`
    pub fn step_vehicle(&mut self, id: VehicleId, dt: f32) -> Result<()> {
        self.ensure_idle()?;
        self.sync_queries();
        let context = self.vehicles.get_mut(&id).ok_or(PhysicsError::VehicleNotFound(id))?;
        context.update(
            dt,
            VehicleEnv {
                bodies: &mut self.rigid_bodies,
                colliders: &self.colliders,
                pipeline: &self.query_pipeline,
                shapes: &self.shapes,
                materials: &self.materials,
            },
        )
    }

    /// Advance every vehicle by `dt`
    pub fn step_vehicles(&mut self, dt: f32) -> Result<()> {
        let mut ids: Vec<VehicleId> = self.vehicles.keys().copied().collect();
        ids.sort();
        for id in ids {
            self.step_vehicle(id, dt)?;
        }
        Ok(())
    }

    fn vehicle_mut(&mut self, id: VehicleId) -> Result<&mut VehicleContext> {
        self.vehicles.get_mut(&id).ok_or(PhysicsError::VehicleNotFound(id))
    }

    /// Replace a vehicle's raw control input
    pub fn set_vehicle_input(&mut self, id: VehicleId, input: VehicleInput) -> Result<()> {
        self.vehicle_mut(id)?.set_input(input);
        Ok(())
    }

    /// Engage a gear immediately
    pub fn force_gear(&mut self, id: VehicleId, gear: Gear) -> Result<()> {
        self.vehicle_mut(id)?.force_gear(gear).map_err(|e| {
            log::warn!("Vehicle {:?} rejected gear {:?}: {}", id, gear, e);
            e
        })
    }

    /// Shift toward a gear over the configured switch time
    pub fn request_gear(&mut self, id: VehicleId, gear: Gear) -> Result<()> {
        self.vehicle_mut(id)?.request_gear(gear).map_err(|e| {
            log::warn!("Vehicle {:?} rejected gear request {:?}: {}", id, gear, e);
            e
        })
    }

    /// Put a vehicle back into its resting state
    pub fn reset_vehicle(&mut self, id: VehicleId) -> Result<()> {
        self.vehicle_mut(id)?.reset();
        Ok(())
    }

    /// Per-wheel telemetry from the vehicle's last update
    pub fn wheel_telemetry(&self, id: VehicleId) -> Result<&[WheelTelemetry]> {
        self.vehicle(id)
            .map(VehicleContext::telemetry)
            .ok_or(PhysicsError::VehicleNotFound(id))
    }

    /// A vehicle
    pub fn vehicle(&self, id: VehicleId) -> Option<&VehicleContext> {
        self.vehicles.get(&id)
    }

    /// Get number of vehicles
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    // ==================== Events ====================

    /// Every pair event from the last fetched step
    pub fn events(&self) -> &[PairEvent] {
        &self.events.events
    }

    /// Contact start events
    pub fn contacts_started(&self) -> impl Iterator<Item = &PairEvent> {
        self.events.started()
    }

    /// Trigger enter events
    pub fn trigger_enters(&self) -> impl Iterator<Item = &PairEvent> {
        self.events.trigger_enters()
    }

    /// Trigger exit events
    pub fn trigger_exits(&self) -> impl Iterator<Item = &PairEvent> {
        self.events.trigger_exits()
    }
}

impl Drop for PhysicsScene {
    fn drop(&mut self) {
        // Shapes hold pool references that outlive the scene when the pool is shared
        for shape in self.shapes.values() {
            for material in &shape.materials {
                let _ = self.materials.free(*material);
            }
        }
        log::debug!("Physics scene dropped ({} bodies)", self.bodies.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_scene() {
        let scene = PhysicsScene::new(SceneConfig::default()).unwrap();
        assert_eq!(scene.body_count(), 0);
        assert_eq!(scene.shape_count(), 0);
        assert!(!scene.is_simulating());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SceneConfig {
            solver_iterations: 0,
            ..Default::default()
        };
        assert!(matches!(
            PhysicsScene::new(config),
            Err(PhysicsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_gravity_fall() {
        let mut scene = PhysicsScene::new(SceneConfig::default()).unwrap();
        let body = scene
            .add_body(BodyDesc::dynamic().with_position(0.0, 10.0, 0.0))
            .unwrap();
        scene
            .add_shape(body, ShapeDesc::new(ShapeGeometry::sphere(1.0)))
            .unwrap();

        let initial_y = scene.body_position(body).unwrap()[1];
        for _ in 0..60 {
            scene.step(1.0 / 60.0).unwrap();
        }
        let final_y = scene.body_position(body).unwrap()[1];
        assert!(final_y < initial_y, "Body should fall due to gravity");
    }

    #[test]
    fn test_worker_hint_does_not_change_results() {
        let fall = |threads: usize| {
            let config = SceneConfig::default().with_worker_threads(threads);
            let mut scene = PhysicsScene::new(config).unwrap();
            let body = scene
                .add_body(BodyDesc::dynamic().with_position(0.0, 10.0, 0.0))
                .unwrap();
            scene
                .add_shape(body, ShapeDesc::new(ShapeGeometry::sphere(1.0)))
                .unwrap();
            for _ in 0..30 {
                scene.step(1.0 / 60.0).unwrap();
            }
            scene.body_position(body).unwrap()
        };
        assert_eq!(fall(0), fall(8));
    }

    #[test]
    fn test_in_flight_window() {
        let mut scene = PhysicsScene::new(SceneConfig::default()).unwrap();
        let body = scene.add_body(BodyDesc::fixed()).unwrap();
        let shape = scene
            .add_shape(body, ShapeDesc::new(ShapeGeometry::cuboid(1.0, 1.0, 1.0)))
            .unwrap();

        scene.simulate(1.0 / 60.0).unwrap();
        assert!(scene.is_simulating());
        assert!(matches!(
            scene.set_group_pair_enabled(0, 1, false),
            Err(PhysicsError::SimulationInFlight)
        ));
        assert!(matches!(
            scene.suppress_pair(shape, shape),
            Err(PhysicsError::SimulationInFlight)
        ));
        assert!(matches!(
            scene.simulate(1.0 / 60.0),
            Err(PhysicsError::SimulationInFlight)
        ));

        assert!(scene.fetch_results(true));
        assert!(!scene.fetch_results(true));
        assert!(scene.set_group_pair_enabled(0, 1, false).is_ok());
    }

    #[test]
    fn test_shape_on_missing_body() {
        let mut scene = PhysicsScene::new(SceneConfig::default()).unwrap();
        let body = scene.add_body(BodyDesc::fixed()).unwrap();
        scene.remove_body(body).unwrap();
        assert!(matches!(
            scene.add_shape(body, ShapeDesc::new(ShapeGeometry::sphere(1.0))),
            Err(PhysicsError::BodyNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_group_rejected() {
        let mut scene = PhysicsScene::new(SceneConfig::default()).unwrap();
        let body = scene.add_body(BodyDesc::fixed()).unwrap();
        assert!(matches!(
            scene.add_shape(body, ShapeDesc::new(ShapeGeometry::sphere(1.0)).with_group(32)),
            Err(PhysicsError::InvalidGroup(32))
        ));
        assert!(scene.is_group_pair_enabled(0, 40).is_err());
    }
}
