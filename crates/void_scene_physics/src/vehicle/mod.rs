//! Raycast vehicles built from a chassis body and its wheel shapes
//!
//! A vehicle never owns its chassis or wheels; it borrows a body and a set of
//! that body's shapes, marks the wheels so the pair filter lets suspension
//! raycasts own their ground contact, and drives the backend vehicle
//! controller from smoothed input every frame.

pub mod drivetrain;
pub mod friction;
pub mod input;
pub mod params;
pub(crate) mod suspension;

pub use drivetrain::{DrivenWheel, Drivetrain, Gear};
pub use friction::TireFrictionTable;
pub use input::{AnalogInput, DigitalInput, InputSmoother, SmoothedInput, SteerVsSpeed, VehicleInput};
pub use params::{VehicleParams, VehicleTables, WILDCARD_SURFACE};
pub use suspension::SuspensionHit;

use crate::body::BodyId;
use crate::collider::{Shape, ShapeId};
use crate::error::{PhysicsError, Result};
use crate::material::{MaterialId, MaterialPool};
use crate::query::QueryWorld;
use params::{TireData, WheelData};
use rapier3d::control::{DynamicRayCastVehicleController, WheelTuning};
use rapier3d::na::UnitQuaternion;
use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use suspension::SuspensionRaycastBatch;

/// Radius and width come out slightly smaller than the hull so the wheel
/// shape never pokes through the ground the suspension rests on
const WHEEL_SAFETY_FACTOR: f32 = 0.95;

/// Scene-unique vehicle identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub(crate) u64);

impl VehicleId {
    /// Raw identity value
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Lifecycle of a vehicle's internal dynamics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleState {
    /// Created, never reset or stepped
    Uninitialized,
    /// Internal state zeroed, waiting for the first update
    Resting,
    /// Stepped at least once since the last reset
    Active,
}

/// Which axle a wheel sits on. Front wheels steer, rear wheels take the
/// handbrake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axle {
    Front,
    Rear,
}

/// One wheel of a vehicle description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelDesc {
    /// Wheel shape, attached to the chassis body
    pub shape: ShapeId,
    /// Axle the wheel belongs to
    pub axle: Axle,
}

impl WheelDesc {
    /// Steered wheel
    pub fn front(shape: ShapeId) -> Self {
        Self {
            shape,
            axle: Axle::Front,
        }
    }

    /// Handbraked wheel
    pub fn rear(shape: ShapeId) -> Self {
        Self {
            shape,
            axle: Axle::Rear,
        }
    }
}

/// Description for creating a vehicle
#[derive(Debug, Clone)]
pub struct VehicleDesc {
    /// Dynamic body acting as the chassis
    pub chassis: BodyId,
    /// Shape of the chassis body that is not a wheel
    pub chassis_shape: ShapeId,
    /// Wheels, in the order telemetry reports them
    pub wheels: Vec<WheelDesc>,
    /// Named parameters
    pub params: VehicleParams,
}

impl VehicleDesc {
    /// Create a description without wheels
    pub fn new(chassis: BodyId, chassis_shape: ShapeId, params: VehicleParams) -> Self {
        Self {
            chassis,
            chassis_shape,
            wheels: Vec::new(),
            params,
        }
    }

    /// Add a wheel
    pub fn with_wheel(mut self, wheel: WheelDesc) -> Self {
        self.wheels.push(wheel);
        self
    }
}

/// Per-wheel state read back after each update
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelTelemetry {
    /// Rotation speed around the axle (rad/s)
    pub rotation_speed: f32,
    /// Steer angle (radians), positive turns left
    pub steer_angle: f32,
    /// Suspension compression from rest, 0 while airborne
    pub jounce: f32,
    /// Longitudinal slip ratio
    pub longitudinal_slip: f32,
    /// Lateral slip angle (radians)
    pub lateral_slip: f32,
    /// Friction multiplier applied this frame
    pub friction: f32,
    /// No ground under the wheel
    pub airborne: bool,
    /// Drivable material under the wheel
    pub surface: Option<MaterialId>,
    /// Shape under the wheel
    pub ground: Option<ShapeId>,
}

/// Wheel placement derived from its hull, in chassis body space
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct WheelGeometry {
    pub(crate) center: rapier::Point<f32>,
    pub(crate) radius: f32,
    pub(crate) width: f32,
}

impl WheelGeometry {
    /// Measure a wheel collider. Radius is half the larger span across the
    /// Y and Z axes, width is the X span.
    pub(crate) fn measure(collider: &rapier::Collider) -> Self {
        let (min, max) = body_space_bounds(collider);
        let span = max - min;
        Self {
            center: rapier::Point::from((min.coords + max.coords) * 0.5),
            radius: 0.5 * span.y.max(span.z) * WHEEL_SAFETY_FACTOR,
            width: span.x * WHEEL_SAFETY_FACTOR,
        }
    }
}

/// Chassis extents in chassis body space
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ChassisGeometry {
    pub(crate) center: rapier::Point<f32>,
    pub(crate) half_extents: rapier::Vector<f32>,
}

impl ChassisGeometry {
    pub(crate) fn measure(collider: &rapier::Collider) -> Self {
        let (min, max) = body_space_bounds(collider);
        Self {
            center: rapier::Point::from((min.coords + max.coords) * 0.5),
            half_extents: (max - min) * 0.5,
        }
    }

    /// Mass properties of a solid box filling the chassis extents
    pub(crate) fn mass_properties(&self, mass: f32, com_offset: f32) -> rapier::MassProperties {
        let [x, y, z] = [
            2.0 * self.half_extents.x,
            2.0 * self.half_extents.y,
            2.0 * self.half_extents.z,
        ];
        let inertia = rapier::Vector::new(y * y + z * z, x * x + z * z, x * x + y * y) * (mass / 12.0);
        let com = self.center + rapier::Vector::new(0.0, com_offset, 0.0);
        rapier::MassProperties::new(com, mass, inertia)
    }
}

/// Hull vertices (or local bounds for non-polyhedral shapes) in the parent
/// body's frame
fn body_space_bounds(collider: &rapier::Collider) -> (rapier::Point<f32>, rapier::Point<f32>) {
    // Detached colliders have no parent; their own pose stands in
    let to_body = *collider
        .position_wrt_parent()
        .unwrap_or(collider.position());

    let points: Vec<rapier::Point<f32>> = match collider.shape().as_convex_polyhedron() {
        Some(hull) => hull.points().iter().map(|p| to_body * p).collect(),
        None => {
            let aabb = collider.shape().compute_local_aabb();
            aabb.vertices().iter().map(|p| to_body * p).collect()
        }
    };

    let mut min = rapier::Point::new(f32::MAX, f32::MAX, f32::MAX);
    let mut max = rapier::Point::new(f32::MIN, f32::MIN, f32::MIN);
    for p in &points {
        min = min.inf(p);
        max = max.sup(p);
    }
    (min, max)
}

#[derive(Debug, Clone)]
struct WheelSlot {
    shape: ShapeId,
    axle: Axle,
    connection: rapier::Point<f32>,
    data: WheelData,
    tire: TireData,
}

/// Borrowed scene state a vehicle update needs
pub(crate) struct VehicleEnv<'a> {
    pub(crate) bodies: &'a mut rapier::RigidBodySet,
    pub(crate) colliders: &'a rapier::ColliderSet,
    pub(crate) pipeline: &'a rapier::QueryPipeline,
    pub(crate) shapes: &'a HashMap<ShapeId, Shape>,
    pub(crate) materials: &'a MaterialPool,
}

/// Everything one vehicle simulates between frames
pub struct VehicleContext {
    id: VehicleId,
    chassis_body: BodyId,
    chassis_handle: rapier::RigidBodyHandle,
    chassis_shape: ShapeId,
    wheels: Vec<WheelSlot>,
    tables: VehicleTables,
    controller: DynamicRayCastVehicleController,
    drivetrain: Drivetrain,
    smoother: InputSmoother,
    raw_input: VehicleInput,
    friction: TireFrictionTable,
    suspension: SuspensionRaycastBatch,
    telemetry: Vec<WheelTelemetry>,
    last_rotation: Vec<f32>,
    torques: Vec<f32>,
    forward_speed: f32,
    /// Chassis plus wheel mass
    vehicle_mass: f32,
    /// Sum of every wheel's I / r²
    rotating_mass: f32,
    state: VehicleState,
}

impl VehicleContext {
    pub(crate) fn build(
        id: VehicleId,
        desc: &VehicleDesc,
        chassis_handle: rapier::RigidBodyHandle,
        wheel_geometry: &[WheelGeometry],
        tables: VehicleTables,
        max_drivable_surfaces: usize,
    ) -> Self {
        let susp = tables.suspension;
        let mut controller = DynamicRayCastVehicleController::new(chassis_handle);
        controller.index_up_axis = 1;
        controller.index_forward_axis = 2;

        let mut wheels = Vec::with_capacity(desc.wheels.len());
        for (wheel, geometry) in desc.wheels.iter().zip(wheel_geometry) {
            let tire = match wheel.axle {
                Axle::Front => tables.tires[0],
                Axle::Rear => tables.tires[1],
            };
            let data = WheelData {
                radius: geometry.radius,
                width: geometry.width,
                inertia: WheelData::disc_inertia(tables.wheel.mass, geometry.radius),
                ..tables.wheel
            };
            let connection = geometry.center + rapier::Vector::y() * susp.rest_length;
            let tuning = WheelTuning {
                suspension_stiffness: susp.stiffness,
                suspension_compression: susp.compression_damping,
                suspension_damping: susp.relaxation_damping,
                max_suspension_travel: susp.max_travel,
                side_friction_stiffness: tire.side_stiffness,
                friction_slip: tire.friction_slip,
                max_suspension_force: susp.max_force,
            };
            controller.add_wheel(
                connection,
                -rapier::Vector::y(),
                -rapier::Vector::x(),
                susp.rest_length,
                data.radius,
                &tuning,
            );
            wheels.push(WheelSlot {
                shape: wheel.shape,
                axle: wheel.axle,
                connection,
                data,
                tire,
            });
        }

        let wheel_count = wheels.len();
        let vehicle_mass = tables.chassis_mass + wheels.iter().map(|w| w.data.mass).sum::<f32>();
        let rotating_mass = wheels.iter().map(|w| w.data.rotating_mass()).sum();
        Self {
            id,
            chassis_body: desc.chassis,
            chassis_handle,
            chassis_shape: desc.chassis_shape,
            friction: TireFrictionTable::new(max_drivable_surfaces, &tables.friction),
            drivetrain: Drivetrain::new(&tables),
            tables,
            controller,
            wheels,
            smoother: InputSmoother::default(),
            raw_input: VehicleInput::default(),
            suspension: SuspensionRaycastBatch::new(wheel_count),
            telemetry: vec![WheelTelemetry::default(); wheel_count],
            last_rotation: vec![0.0; wheel_count],
            torques: vec![0.0; wheel_count],
            forward_speed: 0.0,
            vehicle_mass,
            rotating_mass,
            state: VehicleState::Uninitialized,
        }
    }

    // ==================== Accessors ====================

    /// Vehicle identity
    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// Chassis body
    pub fn chassis(&self) -> BodyId {
        self.chassis_body
    }

    /// Chassis shape
    pub fn chassis_shape(&self) -> ShapeId {
        self.chassis_shape
    }

    /// Wheel shapes in wheel order
    pub fn wheel_shapes(&self) -> impl Iterator<Item = ShapeId> + '_ {
        self.wheels.iter().map(|w| w.shape)
    }

    /// Number of wheels
    pub fn wheel_count(&self) -> usize {
        self.wheels.len()
    }

    /// Simulation data of one wheel
    pub fn wheel_data(&self, wheel: usize) -> Option<&WheelData> {
        self.wheels.get(wheel).map(|w| &w.data)
    }

    /// Tables the vehicle was built from
    pub fn tables(&self) -> &VehicleTables {
        &self.tables
    }

    /// Lifecycle state
    pub fn state(&self) -> VehicleState {
        self.state
    }

    /// Per-wheel telemetry from the last update
    pub fn telemetry(&self) -> &[WheelTelemetry] {
        &self.telemetry
    }

    /// Drivetrain state
    pub fn drivetrain(&self) -> &Drivetrain {
        &self.drivetrain
    }

    /// Last smoothed input
    pub fn smoothed_input(&self) -> SmoothedInput {
        self.smoother.current()
    }

    /// Chassis speed along its forward axis at the start of the last update
    pub fn forward_speed(&self) -> f32 {
        self.forward_speed
    }

    /// Friction table, rebuilt lazily when drivable materials change
    pub fn friction_table(&self) -> &TireFrictionTable {
        &self.friction
    }

    /// Ground found by the last suspension batch, one entry per wheel
    pub fn suspension_hits(&self) -> &[Option<SuspensionHit>] {
        self.suspension.hits()
    }

    /// Build the friction table up front so an oversized drivable set fails
    /// at construction rather than on the first update
    pub(crate) fn prime_friction(&mut self, pool: &MaterialPool) -> Result<()> {
        self.friction.refresh(pool, &self.tables.friction).map(|_| ())
    }

    // ==================== Control ====================

    /// Replace the raw input used from the next update on
    pub fn set_input(&mut self, input: VehicleInput) {
        self.raw_input = input;
    }

    /// Engage a gear immediately
    pub fn force_gear(&mut self, gear: Gear) -> Result<()> {
        self.drivetrain.force_gear(gear)
    }

    /// Shift toward a gear over the configured switch time
    pub fn request_gear(&mut self, gear: Gear) -> Result<()> {
        self.drivetrain.request_gear(gear)
    }

    /// Zero the internal dynamics state and enter [`VehicleState::Resting`]
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.drivetrain.reset();
        self.raw_input = VehicleInput::default();
        self.suspension.clear();
        self.forward_speed = 0.0;
        self.torques.iter_mut().for_each(|t| *t = 0.0);
        self.telemetry.iter_mut().for_each(|t| *t = WheelTelemetry::default());
        for (last, wheel) in self.last_rotation.iter_mut().zip(self.controller.wheels_mut()) {
            wheel.engine_force = 0.0;
            wheel.brake = 0.0;
            wheel.steering = 0.0;
            *last = wheel.rotation;
        }
        self.state = VehicleState::Resting;
        log::debug!("Vehicle {:?} reset to rest", self.id);
    }

    // ==================== Update ====================

    /// Advance one frame: smooth input, cast suspension rays, refresh the
    /// friction table, apply drive/brake/steer and step the controller
    pub(crate) fn update(&mut self, dt: f32, env: VehicleEnv<'_>) -> Result<()> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(PhysicsError::InvalidArgument(format!(
                "vehicle time step must be positive, got {dt}"
            )));
        }
        if self.state == VehicleState::Uninitialized {
            self.reset();
        }

        let chassis = env
            .bodies
            .get(self.chassis_handle)
            .ok_or(PhysicsError::BodyNotFound(self.chassis_body))?;
        let pose = *chassis.position();
        let forward = pose.rotation * rapier::Vector::z();
        self.forward_speed = chassis.linvel().dot(&forward);

        let input = self.smoother.update(&self.raw_input, dt, self.forward_speed);

        if !self.wheels.is_empty() {
            // Same ray the controller casts, so surface and contact agree
            let down = pose.rotation * -rapier::Vector::y();
            let rest = self.tables.suspension.rest_length;
            for wheel in &self.wheels {
                self.suspension
                    .push(pose * wheel.connection, down, rest + wheel.data.radius);
            }
            let world = QueryWorld {
                pipeline: env.pipeline,
                bodies: env.bodies,
                colliders: env.colliders,
                shapes: env.shapes,
            };
            self.suspension.issue(&world, self.chassis_handle, env.materials);
        }

        self.friction.refresh(env.materials, &self.tables.friction)?;

        let driven: Vec<DrivenWheel> = self
            .wheels
            .iter()
            .zip(&self.telemetry)
            .map(|(w, t)| DrivenWheel {
                omega: t.rotation_speed,
                front: w.axle == Axle::Front,
            })
            .collect();
        self.drivetrain
            .update(dt, input.accelerate, &driven, &mut self.torques);

        let steer = self.steer_angles(input.steer);
        let hits = self.suspension.hits();
        for (i, wheel) in self.controller.wheels_mut().iter_mut().enumerate() {
            let slot = &self.wheels[i];
            let surface = hits.get(i).copied().flatten().and_then(|h| h.surface);
            let friction = self.friction.friction(slot.tire.tire_type, surface);

            let mut brake_torque = input.brake * slot.data.max_brake_torque
                + slot.data.damping_rate * self.telemetry[i].rotation_speed.abs();
            if slot.axle == Axle::Rear {
                brake_torque += input.handbrake * slot.data.max_handbrake_torque;
            }

            let torque = self.torques[i];
            wheel.engine_force = slot.data.drive_force(torque, self.vehicle_mass, self.rotating_mass);
            wheel.brake = brake_torque / slot.data.radius * dt;
            wheel.steering = steer[i] + slot.data.toe;
            wheel.friction_slip = slot.tire.friction_slip * friction;
            wheel.side_friction_stiffness = slot.tire.side_stiffness * friction;
            self.telemetry[i].friction = friction;
        }

        let filter = rapier::QueryFilter::new()
            .exclude_sensors()
            .exclude_rigid_body(self.chassis_handle);
        self.controller
            .update_vehicle(dt, env.bodies, env.colliders, env.pipeline, filter);

        self.update_telemetry(dt, env.bodies, env.colliders);
        self.state = VehicleState::Active;
        Ok(())
    }

    /// Front wheel angles with Ackermann correction; rear wheels stay straight
    fn steer_angles(&self, steer: f32) -> Vec<f32> {
        let max_steer = self.tables.wheel.max_steer;
        // Positive input turns right, which is a negative rotation about +Y
        let base = -steer * max_steer;
        let mut angles: Vec<f32> = self
            .wheels
            .iter()
            .map(|w| if w.axle == Axle::Front { base } else { 0.0 })
            .collect();

        let accuracy = self.tables.ackermann.accuracy;
        if accuracy <= 0.0 || base.abs() < 1e-4 {
            return angles;
        }

        let axle_z = |axle: Axle| -> Option<f32> {
            let zs: Vec<f32> = self
                .wheels
                .iter()
                .filter(|w| w.axle == axle)
                .map(|w| w.connection.z)
                .collect();
            (!zs.is_empty()).then(|| zs.iter().sum::<f32>() / zs.len() as f32)
        };
        let (Some(front_z), Some(rear_z)) = (axle_z(Axle::Front), axle_z(Axle::Rear)) else {
            return angles;
        };
        let wheelbase = (front_z - rear_z).abs();
        let fronts: Vec<usize> = (0..self.wheels.len())
            .filter(|&i| self.wheels[i].axle == Axle::Front)
            .collect();
        let &[a, b] = fronts.as_slice() else {
            return angles;
        };
        let (left, right) = if self.wheels[a].connection.x >= self.wheels[b].connection.x {
            (a, b)
        } else {
            (b, a)
        };
        let track = self.wheels[left].connection.x - self.wheels[right].connection.x;
        if wheelbase < 1e-4 || track < 1e-4 {
            return angles;
        }

        let turn = wheelbase / base.abs().tan();
        let inner = (wheelbase / (turn - 0.5 * track)).atan();
        let outer = (wheelbase / (turn + 0.5 * track)).atan();
        let (inner_idx, outer_idx) = if base > 0.0 { (left, right) } else { (right, left) };
        let sign = base.signum();
        let blend = |ideal: f32| base + accuracy * (sign * ideal - base);
        angles[inner_idx] = blend(inner.abs());
        angles[outer_idx] = blend(outer.abs());
        angles
    }

    fn update_telemetry(&mut self, dt: f32, bodies: &rapier::RigidBodySet, colliders: &rapier::ColliderSet) {
        let chassis = bodies.get(self.chassis_handle);
        let hits = self.suspension.hits();

        for (i, wheel) in self.controller.wheels().iter().enumerate() {
            let t = &mut self.telemetry[i];
            let info = wheel.raycast_info();

            t.rotation_speed = (wheel.rotation - self.last_rotation[i]) / dt;
            self.last_rotation[i] = wheel.rotation;
            t.steer_angle = wheel.steering;
            t.airborne = !info.is_in_contact;

            let hit = hits.get(i).copied().flatten().filter(|_| info.is_in_contact);
            t.surface = hit.and_then(|h| h.surface);
            t.ground = info
                .ground_object
                .filter(|_| info.is_in_contact)
                .and_then(|handle| colliders.get(handle))
                .map(|c| crate::collider::FilterData::unpack(c.user_data).shape)
                .or(hit.map(|h| h.shape));

            let Some(chassis) = chassis.filter(|_| info.is_in_contact) else {
                t.jounce = 0.0;
                t.longitudinal_slip = 0.0;
                t.lateral_slip = 0.0;
                continue;
            };
            t.jounce = wheel.suspension_rest_length - info.suspension_length;

            let heading = chassis.position().rotation
                * UnitQuaternion::from_axis_angle(&rapier::Vector::y_axis(), wheel.steering);
            let forward = heading * rapier::Vector::z();
            let side = heading * rapier::Vector::x();
            let velocity = chassis.velocity_at_point(&info.contact_point_ws);
            let v_long = velocity.dot(&forward);
            let v_lat = velocity.dot(&side);
            let wheel_speed = t.rotation_speed * wheel.radius;

            let reference = v_long.abs().max(wheel_speed.abs()).max(0.1);
            t.longitudinal_slip = (wheel_speed - v_long) / reference;
            t.lateral_slip = v_lat.atan2(v_long.abs().max(0.1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_collider(hx: f32, hy: f32, hz: f32, offset: [f32; 3]) -> rapier::Collider {
        rapier::ColliderBuilder::cuboid(hx, hy, hz)
            .translation(rapier::Vector::new(offset[0], offset[1], offset[2]))
            .build()
    }

    #[test]
    fn test_wheel_geometry_from_hull() {
        let shape = crate::collider::ShapeGeometry::wheel_hull(0.4, 0.3, 32)
            .to_rapier()
            .unwrap();
        let collider = rapier::ColliderBuilder::new(shape)
            .translation(rapier::Vector::new(0.8, -0.3, 1.2))
            .build();
        let wheel = WheelGeometry::measure(&collider);
        assert!((wheel.radius - 0.4 * WHEEL_SAFETY_FACTOR).abs() < 1e-3);
        assert!((wheel.width - 0.3 * WHEEL_SAFETY_FACTOR).abs() < 1e-3);
        assert!((wheel.center.x - 0.8).abs() < 1e-4);
        assert!((wheel.center.z - 1.2).abs() < 1e-3);
    }

    #[test]
    fn test_wheel_geometry_falls_back_to_bounds() {
        let collider = box_collider(0.1, 0.35, 0.35, [0.0; 3]);
        let wheel = WheelGeometry::measure(&collider);
        assert!((wheel.radius - 0.35 * WHEEL_SAFETY_FACTOR).abs() < 1e-5);
        assert!((wheel.width - 0.2 * WHEEL_SAFETY_FACTOR).abs() < 1e-5);
    }

    #[test]
    fn test_chassis_mass_properties() {
        let collider = box_collider(1.0, 0.5, 2.0, [0.0, 0.5, 0.0]);
        let chassis = ChassisGeometry::measure(&collider);
        let props = chassis.mass_properties(1200.0, -0.25);
        assert!((props.mass() - 1200.0).abs() < 1e-3);
        assert!((props.local_com.y - 0.25).abs() < 1e-5);
    }
}
