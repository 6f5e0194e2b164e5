//! Driver input and its rate-limited smoothing

/// Keyboard-style driver input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigitalInput {
    pub accelerate: bool,
    pub brake: bool,
    pub handbrake: bool,
    pub steer_left: bool,
    pub steer_right: bool,
}

/// Gamepad-style driver input
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnalogInput {
    /// Throttle in `[0, 1]`
    pub accelerate: f32,
    /// Brake in `[0, 1]`
    pub brake: f32,
    /// Handbrake in `[0, 1]`
    pub handbrake: f32,
    /// Steer in `[-1, 1]`, positive turns right
    pub steer: f32,
}

/// Raw input pushed by the host each frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VehicleInput {
    Digital(DigitalInput),
    Analog(AnalogInput),
}

impl Default for VehicleInput {
    fn default() -> Self {
        Self::Digital(DigitalInput::default())
    }
}

impl VehicleInput {
    fn targets(&self) -> SmoothedInput {
        match *self {
            Self::Digital(d) => {
                let flag = |on: bool| if on { 1.0 } else { 0.0 };
                SmoothedInput {
                    accelerate: flag(d.accelerate),
                    brake: flag(d.brake),
                    handbrake: flag(d.handbrake),
                    steer: flag(d.steer_right) - flag(d.steer_left),
                }
            }
            Self::Analog(a) => SmoothedInput {
                accelerate: a.accelerate.clamp(0.0, 1.0),
                brake: a.brake.clamp(0.0, 1.0),
                handbrake: a.handbrake.clamp(0.0, 1.0),
                steer: a.steer.clamp(-1.0, 1.0),
            },
        }
    }

    fn is_analog(&self) -> bool {
        matches!(self, Self::Analog(_))
    }
}

/// Input after smoothing, what the drivetrain actually sees
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SmoothedInput {
    pub accelerate: f32,
    pub brake: f32,
    pub handbrake: f32,
    pub steer: f32,
}

/// Per-channel rates in units per second
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiseFallRates {
    /// Rates when a channel moves away from zero: accelerate, brake, handbrake, steer
    pub rise: [f32; 4],
    /// Rates when a channel moves back toward zero
    pub fall: [f32; 4],
}

impl RiseFallRates {
    /// Rates for keyboard input
    pub const DIGITAL: Self = Self {
        rise: [6.0, 6.0, 6.0, 2.5],
        fall: [10.0, 10.0, 10.0, 5.0],
    };

    /// Rates for gamepad input
    pub const ANALOG: Self = Self {
        rise: [6.0, 6.0, 12.0, 2.5],
        fall: [10.0, 10.0, 12.0, 5.0],
    };
}

/// Piecewise-linear steer scale over forward speed (m/s)
#[derive(Debug, Clone, PartialEq)]
pub struct SteerVsSpeed {
    points: Vec<(f32, f32)>,
}

impl Default for SteerVsSpeed {
    fn default() -> Self {
        Self {
            points: vec![(0.0, 0.75), (5.0, 0.75), (30.0, 0.125), (120.0, 0.1)],
        }
    }
}

impl SteerVsSpeed {
    /// Build from `(speed, scale)` points; points are sorted by speed
    pub fn new(mut points: Vec<(f32, f32)>) -> Self {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { points }
    }

    /// Scale at `speed`, clamped to the end points
    pub fn eval(&self, speed: f32) -> f32 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return 1.0;
        };
        if speed <= first.0 {
            return first.1;
        }
        if speed >= last.0 {
            return last.1;
        }
        for pair in self.points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if speed <= x1 {
                let span = x1 - x0;
                if span <= f32::EPSILON {
                    return y1;
                }
                return y0 + (y1 - y0) * (speed - x0) / span;
            }
        }
        last.1
    }
}

/// Rate-limits raw input toward its targets frame by frame
#[derive(Debug, Clone)]
pub struct InputSmoother {
    digital: RiseFallRates,
    analog: RiseFallRates,
    steer_vs_speed: SteerVsSpeed,
    current: SmoothedInput,
}

impl Default for InputSmoother {
    fn default() -> Self {
        Self {
            digital: RiseFallRates::DIGITAL,
            analog: RiseFallRates::ANALOG,
            steer_vs_speed: SteerVsSpeed::default(),
            current: SmoothedInput::default(),
        }
    }
}

impl InputSmoother {
    /// Replace the steer-vs-speed table used for analog input
    pub fn with_steer_vs_speed(mut self, table: SteerVsSpeed) -> Self {
        self.steer_vs_speed = table;
        self
    }

    /// Last smoothed value
    pub fn current(&self) -> SmoothedInput {
        self.current
    }

    /// Drop all smoothing state
    pub fn reset(&mut self) {
        self.current = SmoothedInput::default();
    }

    /// Advance smoothing by `dt` toward `raw`
    pub fn update(&mut self, raw: &VehicleInput, dt: f32, forward_speed: f32) -> SmoothedInput {
        let mut target = raw.targets();
        let rates = if raw.is_analog() {
            target.steer *= self.steer_vs_speed.eval(forward_speed.abs());
            &self.analog
        } else {
            &self.digital
        };

        let c = &mut self.current;
        c.accelerate = approach(c.accelerate, target.accelerate, rates.rise[0], rates.fall[0], dt);
        c.brake = approach(c.brake, target.brake, rates.rise[1], rates.fall[1], dt);
        c.handbrake = approach(c.handbrake, target.handbrake, rates.rise[2], rates.fall[2], dt);
        c.steer = approach(c.steer, target.steer, rates.rise[3], rates.fall[3], dt);
        *c
    }
}

/// Move `current` toward `target` without overshooting. Moving away from
/// zero uses `rise`, anything else uses `fall`.
fn approach(current: f32, target: f32, rise: f32, fall: f32, dt: f32) -> f32 {
    let delta = target - current;
    if delta == 0.0 {
        return current;
    }
    let outward = current == 0.0 || (current.signum() == delta.signum() && target.abs() > current.abs());
    let max_step = if outward { rise } else { fall } * dt;
    current + delta.clamp(-max_step, max_step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_digital_rise_is_rate_limited() {
        let mut smoother = InputSmoother::default();
        let raw = VehicleInput::Digital(DigitalInput {
            accelerate: true,
            ..Default::default()
        });
        let out = smoother.update(&raw, 0.1, 0.0);
        assert_relative_eq!(out.accelerate, 0.6, epsilon = 1e-5);
        let out = smoother.update(&raw, 0.1, 0.0);
        assert_relative_eq!(out.accelerate, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_release_falls_faster_than_rise() {
        let mut smoother = InputSmoother::default();
        let press = VehicleInput::Digital(DigitalInput {
            steer_left: true,
            ..Default::default()
        });
        for _ in 0..10 {
            smoother.update(&press, 0.1, 0.0);
        }
        assert_relative_eq!(smoother.current().steer, -1.0, epsilon = 1e-5);

        let out = smoother.update(&VehicleInput::default(), 0.1, 0.0);
        assert_relative_eq!(out.steer, -0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_analog_steer_scaled_by_speed() {
        let mut smoother = InputSmoother::default();
        let raw = VehicleInput::Analog(AnalogInput {
            steer: 1.0,
            ..Default::default()
        });
        for _ in 0..20 {
            smoother.update(&raw, 0.1, 120.0);
        }
        assert_relative_eq!(smoother.current().steer, 0.1, epsilon = 1e-5);
    }

    #[test]
    fn test_steer_vs_speed_interpolates() {
        let table = SteerVsSpeed::default();
        assert_relative_eq!(table.eval(0.0), 0.75);
        assert_relative_eq!(table.eval(5.0), 0.75);
        assert_relative_eq!(table.eval(17.5), 0.4375, epsilon = 1e-5);
        assert_relative_eq!(table.eval(500.0), 0.1);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut smoother = InputSmoother::default();
        let raw = VehicleInput::Analog(AnalogInput {
            accelerate: 1.0,
            ..Default::default()
        });
        smoother.update(&raw, 1.0, 0.0);
        smoother.reset();
        assert_eq!(smoother.current(), SmoothedInput::default());
    }
}
