//! Rigid bodies owning shapes

use crate::collider::ShapeId;
use crate::vehicle::VehicleId;
use rapier3d::na::{Quaternion, UnitQuaternion};
use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};

/// Scene-unique body identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(pub(crate) u64);

impl BodyId {
    /// Raw identity value
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Type of rigid body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BodyType {
    /// Static body - never moves, infinite mass
    Static,
    /// Dynamic body - fully simulated
    #[default]
    Dynamic,
    /// Kinematic body - moved by the host, pushes dynamic bodies
    Kinematic,
}

impl From<BodyType> for rapier::RigidBodyType {
    fn from(t: BodyType) -> Self {
        match t {
            BodyType::Static => rapier::RigidBodyType::Fixed,
            BodyType::Dynamic => rapier::RigidBodyType::Dynamic,
            BodyType::Kinematic => rapier::RigidBodyType::KinematicPositionBased,
        }
    }
}

/// Description for creating a body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyDesc {
    /// Type of rigid body
    pub body_type: BodyType,
    /// Initial position
    pub position: [f32; 3],
    /// Initial rotation (quaternion: x, y, z, w)
    pub rotation: [f32; 4],
    /// Initial linear velocity
    pub linear_velocity: [f32; 3],
    /// Linear damping
    pub linear_damping: f32,
    /// Angular damping
    pub angular_damping: f32,
    /// Continuous collision detection; `None` uses the scene default
    pub ccd_enabled: Option<bool>,
    /// Can this body sleep when inactive
    pub can_sleep: bool,
}

impl Default for BodyDesc {
    fn default() -> Self {
        Self {
            body_type: BodyType::Dynamic,
            position: [0.0, 0.0, 0.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
            linear_velocity: [0.0, 0.0, 0.0],
            linear_damping: 0.0,
            angular_damping: 0.0,
            ccd_enabled: None,
            can_sleep: true,
        }
    }
}

impl BodyDesc {
    /// Create a static body description
    pub fn fixed() -> Self {
        Self {
            body_type: BodyType::Static,
            ..Default::default()
        }
    }

    /// Create a dynamic body description
    pub fn dynamic() -> Self {
        Self {
            body_type: BodyType::Dynamic,
            ..Default::default()
        }
    }

    /// Create a kinematic body description
    pub fn kinematic() -> Self {
        Self {
            body_type: BodyType::Kinematic,
            ..Default::default()
        }
    }

    /// Set position
    pub fn with_position(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = [x, y, z];
        self
    }

    /// Set rotation quaternion (x, y, z, w)
    pub fn with_rotation(mut self, rotation: [f32; 4]) -> Self {
        self.rotation = rotation;
        self
    }

    /// Set linear velocity
    pub fn with_linear_velocity(mut self, x: f32, y: f32, z: f32) -> Self {
        self.linear_velocity = [x, y, z];
        self
    }

    /// Override CCD for this body
    pub fn with_ccd(mut self, enabled: bool) -> Self {
        self.ccd_enabled = Some(enabled);
        self
    }

    /// Build a Rapier rigid body builder
    pub(crate) fn to_rapier_builder(&self, default_ccd: bool) -> rapier::RigidBodyBuilder {
        let rotation = UnitQuaternion::from_quaternion(Quaternion::new(
            self.rotation[3],
            self.rotation[0],
            self.rotation[1],
            self.rotation[2],
        ));
        let pose = rapier::Isometry::from_parts(
            rapier::Translation::new(self.position[0], self.position[1], self.position[2]),
            rotation,
        );
        let ccd = self.body_type == BodyType::Dynamic && self.ccd_enabled.unwrap_or(default_ccd);

        rapier::RigidBodyBuilder::new(self.body_type.into())
            .position(pose)
            .linvel(rapier::Vector::new(
                self.linear_velocity[0],
                self.linear_velocity[1],
                self.linear_velocity[2],
            ))
            .linear_damping(self.linear_damping)
            .angular_damping(self.angular_damping)
            .ccd_enabled(ccd)
            .can_sleep(self.can_sleep)
    }
}

/// Scene bookkeeping for one body
#[derive(Debug, Clone)]
pub struct Body {
    pub(crate) id: BodyId,
    pub(crate) handle: rapier::RigidBodyHandle,
    pub(crate) shapes: Vec<ShapeId>,
    pub(crate) vehicle: Option<VehicleId>,
}

impl Body {
    /// Body identity
    pub fn id(&self) -> BodyId {
        self.id
    }

    /// Shapes attached to this body, in attachment order
    pub fn shapes(&self) -> &[ShapeId] {
        &self.shapes
    }

    /// Vehicle driving this body, if any
    pub fn vehicle(&self) -> Option<VehicleId> {
        self.vehicle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_pose() {
        let half_turn = std::f32::consts::FRAC_1_SQRT_2;
        let desc = BodyDesc::dynamic()
            .with_position(1.0, 2.0, 3.0)
            .with_rotation([0.0, half_turn, 0.0, half_turn]);
        let body = desc.to_rapier_builder(false).build();
        let t = body.translation();
        assert_eq!([t.x, t.y, t.z], [1.0, 2.0, 3.0]);
        let angle = body.rotation().angle();
        assert!((angle - std::f32::consts::FRAC_PI_2).abs() < 1e-4);
        assert!(!body.is_ccd_enabled());
    }

    #[test]
    fn test_ccd_only_for_dynamic() {
        let fixed = BodyDesc::fixed().to_rapier_builder(true).build();
        assert!(!fixed.is_ccd_enabled());
        let dynamic = BodyDesc::dynamic().to_rapier_builder(true).build();
        assert!(dynamic.is_ccd_enabled());
    }
}
