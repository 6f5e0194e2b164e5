//! Engine, gearbox, clutch and differential

use crate::error::{PhysicsError, Result};
use crate::vehicle::params::{ClutchData, DifferentialData, EngineData, GearData, VehicleTables};
use serde::{Deserialize, Serialize};

/// Gearbox position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gear {
    Reverse,
    Neutral,
    /// Forward gear, first gear is `Forward(1)`
    Forward(u8),
}

/// What the drivetrain needs to know about one wheel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrivenWheel {
    /// Wheel rotation speed (rad/s)
    pub omega: f32,
    /// Whether the wheel sits on the front axle
    pub front: bool,
}

/// Engine/gearbox/clutch/differential state for one vehicle
#[derive(Debug, Clone)]
pub struct Drivetrain {
    engine: EngineData,
    gears: GearData,
    clutch: ClutchData,
    differential: DifferentialData,
    current: Gear,
    target: Gear,
    switch_remaining: f32,
    engine_omega: f32,
}

impl Drivetrain {
    /// Build from vehicle tables, starting in neutral at idle
    pub fn new(tables: &VehicleTables) -> Self {
        Self {
            engine: tables.engine,
            gears: tables.gears.clone(),
            clutch: tables.clutch,
            differential: tables.differential,
            current: Gear::Neutral,
            target: Gear::Neutral,
            switch_remaining: 0.0,
            engine_omega: tables.engine.idle_omega,
        }
    }

    /// Engaged gear
    pub fn current_gear(&self) -> Gear {
        self.current
    }

    /// Gear being shifted into, equal to the current gear when idle
    pub fn target_gear(&self) -> Gear {
        self.target
    }

    /// Whether a requested shift is still in progress
    pub fn is_switching(&self) -> bool {
        self.current != self.target
    }

    /// Engine rotation speed (rad/s)
    pub fn engine_omega(&self) -> f32 {
        self.engine_omega
    }

    /// Number of forward gears
    pub fn forward_gear_count(&self) -> usize {
        self.gears.forward_ratios.len()
    }

    /// Engage `gear` immediately
    pub fn force_gear(&mut self, gear: Gear) -> Result<()> {
        self.check_gear(gear)?;
        self.current = gear;
        self.target = gear;
        self.switch_remaining = 0.0;
        Ok(())
    }

    /// Start shifting toward `gear`; the drivetrain is decoupled until the
    /// switch time elapses
    pub fn request_gear(&mut self, gear: Gear) -> Result<()> {
        self.check_gear(gear)?;
        if gear == self.current {
            self.target = gear;
            self.switch_remaining = 0.0;
            return Ok(());
        }
        self.target = gear;
        self.switch_remaining = self.gears.switch_time;
        if self.switch_remaining <= 0.0 {
            self.current = gear;
        }
        Ok(())
    }

    /// Return the engine to idle and cancel any pending shift
    pub fn reset(&mut self) {
        self.target = self.current;
        self.switch_remaining = 0.0;
        self.engine_omega = self.engine.idle_omega;
    }

    /// Overall ratio between engine and wheels in `gear`
    pub fn ratio(&self, gear: Gear) -> f32 {
        let box_ratio = match gear {
            Gear::Reverse => self.gears.reverse_ratio,
            Gear::Neutral => 0.0,
            Gear::Forward(n) => self
                .gears
                .forward_ratios
                .get(usize::from(n).wrapping_sub(1))
                .copied()
                .unwrap_or(0.0),
        };
        box_ratio * self.gears.final_ratio
    }

    /// Advance by `dt` and write the drive torque for each wheel into `torques`
    pub fn update(&mut self, dt: f32, accelerate: f32, wheels: &[DrivenWheel], torques: &mut [f32]) {
        torques.iter_mut().for_each(|t| *t = 0.0);

        if self.is_switching() {
            self.switch_remaining -= dt;
            if self.switch_remaining <= 0.0 {
                self.current = self.target;
                self.switch_remaining = 0.0;
                log::debug!("Gear change complete: {:?}", self.current);
            }
        }

        let ratio = if self.is_switching() {
            0.0
        } else {
            self.ratio(self.current)
        };

        let driven: Vec<usize> = wheels
            .iter()
            .enumerate()
            .filter(|(_, w)| self.drives(w.front))
            .map(|(i, _)| i)
            .collect();

        let EngineData {
            peak_torque,
            max_omega,
            idle_omega,
        } = self.engine;

        let target_omega = if ratio == 0.0 || driven.is_empty() {
            idle_omega + accelerate * (max_omega - idle_omega)
        } else {
            let mean = driven.iter().map(|&i| wheels[i].omega).sum::<f32>() / driven.len() as f32;
            (mean * ratio).abs().max(idle_omega)
        };
        let blend = (self.clutch.strength * dt).min(1.0);
        self.engine_omega += (target_omega - self.engine_omega) * blend;
        self.engine_omega = self.engine_omega.clamp(idle_omega, max_omega.max(idle_omega));

        if ratio == 0.0 || driven.is_empty() {
            return;
        }

        let rev = if max_omega > 0.0 {
            self.engine_omega / max_omega
        } else {
            1.0
        };
        let engine_torque = peak_torque * accelerate * (1.0 - rev * rev).max(0.0);
        let total = engine_torque * ratio;

        if self.differential.kind.drives_front() && self.differential.kind.drives_rear() {
            let split = self.differential.front_rear_split;
            let (front, rear): (Vec<usize>, Vec<usize>) =
                driven.iter().partition(|&&i| wheels[i].front);
            // A missing axle hands its share to the other one
            let front_share = match (front.is_empty(), rear.is_empty()) {
                (true, _) => 0.0,
                (_, true) => 1.0,
                _ => split,
            };
            self.distribute(total * front_share, &front, wheels, torques);
            self.distribute(total * (1.0 - front_share), &rear, wheels, torques);
        } else {
            self.distribute(total, &driven, wheels, torques);
        }
    }

    fn drives(&self, front: bool) -> bool {
        if front {
            self.differential.kind.drives_front()
        } else {
            self.differential.kind.drives_rear()
        }
    }

    /// Split `total` across `indices`. Open differentials split evenly;
    /// limited-slip ones favor the slower wheel, bounded by the bias ratio.
    fn distribute(&self, total: f32, indices: &[usize], wheels: &[DrivenWheel], torques: &mut [f32]) {
        if indices.is_empty() {
            return;
        }
        let even = 1.0 / indices.len() as f32;
        if !self.differential.kind.is_limited_slip() {
            for &i in indices {
                torques[i] = total * even;
            }
            return;
        }

        let bias = self.differential.bias;
        let raw: Vec<f32> = indices
            .iter()
            .map(|&i| 1.0 / (wheels[i].omega.abs() + 1.0))
            .collect();
        let raw_sum: f32 = raw.iter().sum();
        let clamped: Vec<f32> = raw
            .iter()
            .map(|w| (w / raw_sum).clamp(even / bias, even * bias))
            .collect();
        let clamped_sum: f32 = clamped.iter().sum();
        for (&i, w) in indices.iter().zip(&clamped) {
            torques[i] = total * w / clamped_sum;
        }
    }

    fn check_gear(&self, gear: Gear) -> Result<()> {
        match gear {
            Gear::Forward(n) if n == 0 || usize::from(n) > self.forward_gear_count() => {
                Err(PhysicsError::InvalidArgument(format!(
                    "gear {n} outside 1..={}",
                    self.forward_gear_count()
                )))
            }
            _ => Ok(()),
        }
    }
}
