//! Named vehicle parameters and the simulation tables built from them

use crate::error::{PhysicsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key in `surface_friction` matched by materials without their own entry
pub const WILDCARD_SURFACE: &str = "*";

/// Named-parameter table a vehicle is configured from.
///
/// Required names must be present; every other name has a default. Forward
/// gears are read from `gear_ratio_1`, `gear_ratio_2`, ... until the first
/// missing ordinal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VehicleParams {
    /// Scalar parameters by name
    #[serde(default)]
    pub values: BTreeMap<String, f32>,
    /// Tire friction multiplier per drivable material display name
    #[serde(default)]
    pub surface_friction: BTreeMap<String, f32>,
}

impl VehicleParams {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a scalar parameter
    pub fn with(mut self, name: impl Into<String>, value: f32) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Set the friction multiplier for a surface name (or [`WILDCARD_SURFACE`])
    pub fn with_surface_friction(mut self, name: impl Into<String>, value: f32) -> Self {
        self.surface_friction.insert(name.into(), value);
        self
    }

    /// Look up a parameter that must be present
    pub fn require(&self, name: &str) -> Result<f32> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| PhysicsError::MissingParameter(name.to_string()))
    }

    /// Look up a parameter with a fallback
    pub fn get_or(&self, name: &str, default: f32) -> f32 {
        self.values.get(name).copied().unwrap_or(default)
    }

    /// Look up an optional parameter
    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.get(name).copied()
    }

    /// A typical 4-wheel car, useful as a starting point
    pub fn sedan() -> Self {
        Self::new()
            .with("chassis_mass", 1500.0)
            .with("engine_peak_torque", 500.0)
            .with("engine_max_omega", 600.0)
            .with("gear_ratio_reverse", -4.0)
            .with("gear_ratio_1", 4.0)
            .with("gear_ratio_2", 2.0)
            .with("gear_ratio_3", 1.5)
            .with("gear_ratio_4", 1.1)
            .with("gear_ratio_5", 1.0)
            .with_surface_friction(WILDCARD_SURFACE, 1.0)
    }
}

/// Per-wheel simulation data
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelData {
    /// Wheel mass (kg)
    pub mass: f32,
    /// Moment of inertia around the axle
    pub inertia: f32,
    /// Radius derived from the wheel hull
    pub radius: f32,
    /// Width derived from the wheel hull
    pub width: f32,
    /// Rotational damping rate
    pub damping_rate: f32,
    /// Maximum steer angle (radians)
    pub max_steer: f32,
    /// Static toe angle (radians)
    pub toe: f32,
    /// Maximum brake torque
    pub max_brake_torque: f32,
    /// Maximum handbrake torque
    pub max_handbrake_torque: f32,
}

impl WheelData {
    /// Moment of inertia of a solid disc
    pub fn disc_inertia(mass: f32, radius: f32) -> f32 {
        0.5 * mass * radius * radius
    }

    /// Mass the spinning wheel adds to the vehicle along its travel, I / r²
    pub fn rotating_mass(&self) -> f32 {
        if self.radius > 0.0 {
            self.inertia / (self.radius * self.radius)
        } else {
            0.0
        }
    }

    /// Ground force from an axle torque, less the share that spins up the
    /// wheels. `rotating_mass` is summed over every wheel of the vehicle.
    pub fn drive_force(&self, torque: f32, vehicle_mass: f32, rotating_mass: f32) -> f32 {
        if self.radius <= 0.0 {
            return 0.0;
        }
        let total = vehicle_mass + rotating_mass;
        if total <= 0.0 {
            return 0.0;
        }
        torque / self.radius * (vehicle_mass / total)
    }
}

/// Tire model parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TireData {
    /// Base longitudinal friction slip before the surface multiplier
    pub friction_slip: f32,
    /// Lateral stiffness
    pub side_stiffness: f32,
    /// Row of the friction table this tire uses
    pub tire_type: usize,
}

/// Suspension parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuspensionData {
    /// Rest length
    pub rest_length: f32,
    /// Spring stiffness
    pub stiffness: f32,
    /// Damping while compressing
    pub compression_damping: f32,
    /// Damping while extending
    pub relaxation_damping: f32,
    /// Maximum travel from rest
    pub max_travel: f32,
    /// Maximum spring force
    pub max_force: f32,
}

/// Differential layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifferentialType {
    /// Limited slip, all wheels driven
    LimitedSlip4Wd,
    /// Limited slip, front axle driven
    LimitedSlipFront,
    /// Limited slip, rear axle driven
    LimitedSlipRear,
    /// Open, all wheels driven
    Open4Wd,
    /// Open, front axle driven
    OpenFront,
    /// Open, rear axle driven
    OpenRear,
}

impl DifferentialType {
    fn from_index(index: f32) -> Result<Self> {
        Ok(match index as i32 {
            0 => Self::LimitedSlip4Wd,
            1 => Self::LimitedSlipFront,
            2 => Self::LimitedSlipRear,
            3 => Self::Open4Wd,
            4 => Self::OpenFront,
            5 => Self::OpenRear,
            other => {
                return Err(PhysicsError::InvalidConfig(format!(
                    "unknown differential type {other}"
                )))
            }
        })
    }

    /// Whether torque is biased toward the slower wheel
    pub fn is_limited_slip(self) -> bool {
        matches!(
            self,
            Self::LimitedSlip4Wd | Self::LimitedSlipFront | Self::LimitedSlipRear
        )
    }

    /// Whether the front axle receives torque
    pub fn drives_front(self) -> bool {
        !matches!(self, Self::LimitedSlipRear | Self::OpenRear)
    }

    /// Whether the rear axle receives torque
    pub fn drives_rear(self) -> bool {
        !matches!(self, Self::LimitedSlipFront | Self::OpenFront)
    }
}

/// Differential parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferentialData {
    /// Layout
    pub kind: DifferentialType,
    /// Share of torque sent to the front axle on 4WD layouts
    pub front_rear_split: f32,
    /// Maximum ratio between the fastest and slowest wheel's torque share
    pub bias: f32,
}

/// Engine parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineData {
    /// Peak torque
    pub peak_torque: f32,
    /// Maximum rotation speed (rad/s)
    pub max_omega: f32,
    /// Idle rotation speed (rad/s)
    pub idle_omega: f32,
}

/// Gearbox parameters
#[derive(Debug, Clone, PartialEq)]
pub struct GearData {
    /// Reverse ratio (negative)
    pub reverse_ratio: f32,
    /// Forward ratios, first gear at index 0
    pub forward_ratios: Vec<f32>,
    /// Final drive ratio
    pub final_ratio: f32,
    /// Seconds a requested gear change takes
    pub switch_time: f32,
}

/// Clutch parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClutchData {
    /// Coupling strength between engine and wheels
    pub strength: f32,
}

/// Ackermann steering correction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AckermannData {
    /// 0 = parallel steering, 1 = ideal Ackermann
    pub accuracy: f32,
}

/// Tire friction lookup parameters
#[derive(Debug, Clone, PartialEq)]
pub struct TireFrictionParams {
    /// Multiplier per surface display name
    pub by_name: BTreeMap<String, f32>,
    /// Multiplier for names without an entry
    pub wildcard: f32,
    /// Per tire type scale, one entry per table row
    pub tire_type_scales: Vec<f32>,
}

impl TireFrictionParams {
    /// Multiplier for a surface name, falling back to the wildcard
    pub fn surface(&self, name: &str) -> f32 {
        if name.is_empty() {
            return self.wildcard;
        }
        self.by_name.get(name).copied().unwrap_or(self.wildcard)
    }
}

/// Every table a vehicle needs, except per-wheel geometry
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleTables {
    /// Chassis mass
    pub chassis_mass: f32,
    /// Vertical center-of-mass offset from the chassis shape center
    pub chassis_com_offset: f32,
    /// Wheel template; radius and width are filled per wheel
    pub wheel: WheelData,
    /// Front and rear tire data
    pub tires: [TireData; 2],
    /// Suspension
    pub suspension: SuspensionData,
    /// Differential
    pub differential: DifferentialData,
    /// Engine
    pub engine: EngineData,
    /// Gears
    pub gears: GearData,
    /// Clutch
    pub clutch: ClutchData,
    /// Ackermann correction
    pub ackermann: AckermannData,
    /// Friction table inputs
    pub friction: TireFrictionParams,
}

impl VehicleTables {
    /// Build every table from named parameters
    pub fn from_params(params: &VehicleParams) -> Result<Self> {
        let chassis_mass = params.require("chassis_mass")?;
        if chassis_mass <= 0.0 {
            return Err(PhysicsError::InvalidConfig(
                "chassis_mass must be positive".into(),
            ));
        }

        let wheel_mass = params.get_or("wheel_mass", 20.0);
        let wheel = WheelData {
            mass: wheel_mass,
            inertia: 0.0,
            radius: 0.0,
            width: 0.0,
            damping_rate: params.get_or("wheel_damping_rate", 0.25),
            max_steer: params.get_or("wheel_max_steer", std::f32::consts::FRAC_PI_3),
            toe: params.get_or("wheel_toe", 0.0),
            max_brake_torque: params.get_or("wheel_max_brake_torque", 1500.0),
            max_handbrake_torque: params.get_or("wheel_max_handbrake_torque", 4000.0),
        };

        let tire_type_count = params.get_or("tire_type_count", 1.0).max(1.0) as usize;
        let tire = |axle: &str| -> Result<TireData> {
            let tire_type = params.get_or(&format!("tire_type_{axle}"), 0.0).max(0.0) as usize;
            if tire_type >= tire_type_count {
                return Err(PhysicsError::InvalidConfig(format!(
                    "tire_type_{axle} = {tire_type} but tire_type_count = {tire_type_count}"
                )));
            }
            Ok(TireData {
                friction_slip: params.get_or("tire_friction_slip", 10.5),
                side_stiffness: params.get_or("tire_side_stiffness", 1.0),
                tire_type,
            })
        };
        let tires = [tire("front")?, tire("rear")?];

        let suspension = SuspensionData {
            rest_length: params.get_or("suspension_rest_length", 0.3),
            stiffness: params.get_or("suspension_stiffness", 35.0),
            compression_damping: params.get_or("suspension_compression", 4.4),
            relaxation_damping: params.get_or("suspension_damping", 2.3),
            max_travel: params.get_or("suspension_max_travel", 0.3),
            max_force: params.get_or("suspension_max_force", 1.0e5),
        };

        let differential = DifferentialData {
            kind: DifferentialType::from_index(params.get_or("diff_type", 5.0))?,
            front_rear_split: params.get_or("diff_front_rear_split", 0.45).clamp(0.0, 1.0),
            bias: params.get_or("diff_bias", 1.3).max(1.0),
        };

        let engine = EngineData {
            peak_torque: params.require("engine_peak_torque")?,
            max_omega: params.require("engine_max_omega")?,
            idle_omega: params.get_or("engine_idle_omega", 60.0),
        };

        let gears = GearData {
            reverse_ratio: -params.get_or("gear_ratio_reverse", -4.0).abs(),
            forward_ratios: scan_forward_gears(params)?,
            final_ratio: params.get_or("gear_final_ratio", 4.0),
            switch_time: params.get_or("gear_switch_time", 0.5).max(0.0),
        };

        let friction = TireFrictionParams {
            wildcard: params
                .surface_friction
                .get(WILDCARD_SURFACE)
                .copied()
                .unwrap_or(1.0),
            by_name: params
                .surface_friction
                .iter()
                .filter(|(name, _)| name.as_str() != WILDCARD_SURFACE)
                .map(|(name, value)| (name.clone(), *value))
                .collect(),
            tire_type_scales: (0..tire_type_count)
                .map(|t| params.get_or(&format!("tire_type_scale_{t}"), 1.0))
                .collect(),
        };

        Ok(Self {
            chassis_mass,
            chassis_com_offset: params.get_or("chassis_com_offset", -0.25),
            wheel,
            tires,
            suspension,
            differential,
            engine,
            gears,
            clutch: ClutchData {
                strength: params.get_or("clutch_strength", 10.0),
            },
            ackermann: AckermannData {
                accuracy: params.get_or("ackermann_accuracy", 1.0).clamp(0.0, 1.0),
            },
            friction,
        })
    }
}

/// Contiguous forward gear range: `gear_ratio_1` upward, stopping at the
/// first missing ordinal
fn scan_forward_gears(params: &VehicleParams) -> Result<Vec<f32>> {
    let mut ratios = Vec::new();
    for ordinal in 1.. {
        match params.get(&format!("gear_ratio_{ordinal}")) {
            Some(ratio) => ratios.push(ratio),
            None => break,
        }
    }
    if ratios.is_empty() {
        return Err(PhysicsError::MissingParameter("gear_ratio_1".into()));
    }
    Ok(ratios)
}
