//! A differential drive robot in software.
//!
//! Wheel surface speed follows motor power proportionally with no inertia or
//! slip. Encoder ticks are generated from that motion exactly the way the
//! navigator expects them, so the navigator's estimate tracks the simulated
//! robot.

use crate::configuration::GeometryConfig;
use crate::error::NavbotError;
use crate::hardware::{Clock, Millis, MotorSink, TickSource, WheelPower, WheelTicks};
use std::f64::consts::PI;

#[derive(Debug, Clone)]
pub struct SimulatedRobot {
    now: Millis,
    dist_per_tick: f64,
    wheel_base: f64,
    /// mm/s per motor sink unit
    wheel_response: f64,
    power: WheelPower,
    left_carry: f64,
    right_carry: f64,
    pending_left: i32,
    pending_right: i32,
    rotation: f64,
    failing: bool,
    reads: u32,
}

impl SimulatedRobot {
    pub fn new(geometry: &GeometryConfig, now: Millis) -> Self {
        let dist_per_tick = if geometry.ticks_per_revolution > 0 {
            geometry.wheel_diameter as f64 * PI / geometry.ticks_per_revolution as f64
        } else {
            0.0
        };
        Self {
            now,
            dist_per_tick,
            wheel_base: (geometry.wheel_base as f64).max(1.0),
            wheel_response: 2.0,
            power: WheelPower::stopped(),
            left_carry: 0.0,
            right_carry: 0.0,
            pending_left: 0,
            pending_right: 0,
            rotation: 0.0,
            failing: false,
            reads: 0,
        }
    }

    pub fn with_wheel_response(mut self, wheel_response: f32) -> Self {
        self.wheel_response = wheel_response as f64;
        self
    }

    /// Makes every following encoder read fail.
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    /// Runs the drivetrain at the current power for `ms`.
    pub fn advance(&mut self, ms: Millis) {
        self.now = self.now.wrapping_add(ms);
        if self.dist_per_tick == 0.0 {
            return;
        }
        let seconds = ms as f64 / 1000.0;
        let left_mm = self.power.left as f64 * self.wheel_response * seconds;
        let right_mm = self.power.right as f64 * self.wheel_response * seconds;

        let left = whole_ticks(left_mm / self.dist_per_tick, &mut self.left_carry);
        let right = whole_ticks(right_mm / self.dist_per_tick, &mut self.right_carry);
        self.pending_left += left;
        self.pending_right += right;

        let turn = (left - right) as f64 * self.dist_per_tick / self.wheel_base;
        self.rotation += turn.to_degrees();
    }

    /// Total rotation in degrees since creation, clockwise positive, never wrapped
    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    pub fn power(&self) -> WheelPower {
        self.power
    }

    /// Encoder reads attempted so far
    pub fn reads(&self) -> u32 {
        self.reads
    }
}

fn whole_ticks(ticks: f64, carry: &mut f64) -> i32 {
    let total = ticks + *carry;
    let whole = total.trunc();
    *carry = total - whole;
    whole as i32
}

fn saturate(ticks: i32) -> i16 {
    ticks.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

impl Clock for SimulatedRobot {
    fn now(&self) -> Millis {
        self.now
    }
}

impl TickSource for SimulatedRobot {
    fn read_ticks(&mut self) -> Result<WheelTicks, NavbotError> {
        self.reads += 1;
        let ticks = WheelTicks::new(saturate(self.pending_left), saturate(self.pending_right));
        self.pending_left = 0;
        self.pending_right = 0;
        if self.failing {
            return Err(NavbotError::SensorReadFailure);
        }
        Ok(ticks)
    }
}

impl MotorSink for SimulatedRobot {
    fn set_power(&mut self, power: WheelPower) {
        self.power = power;
    }
}
