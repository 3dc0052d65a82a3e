use crate::hardware::Millis;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl PidGains {
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }
}

/// Discrete PID element sampled with a millisecond time step.
///
/// The error sum is not clamped, so keep `ki` small on loops that can
/// saturate.
#[derive(Debug, Default, Clone)]
pub struct PidController {
    gains: PidGains,
    sum_errs: f32,
    last_err: f32,
    target: f32,
    min_delta: Millis,
}

impl PidController {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            ..Default::default()
        }
    }

    pub fn reset(&mut self, min_delta: Millis) {
        self.sum_errs = 0.0;
        self.last_err = 0.0;
        self.min_delta = min_delta;
    }

    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    pub fn set_ks(&mut self, kp: f32, ki: f32, kd: f32) {
        self.gains = PidGains::new(kp, ki, kd);
    }

    /// Returns `None` without touching any state when `dt` is shorter than
    /// the minimum sampling delta.
    pub fn calc_adjustment(&mut self, input: f32, dt: Millis) -> Option<f32> {
        if dt < self.min_delta || dt == 0 {
            return None;
        }
        let dt = dt as f32;
        let error = self.target - input;
        self.sum_errs += error * dt;
        let derivative = (error - self.last_err) / dt;
        self.last_err = error;
        Some(self.gains.kp * error + self.gains.ki * self.sum_errs + self.gains.kd * derivative)
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn sum_errs(&self) -> f32 {
        self.sum_errs
    }

    pub fn last_err(&self) -> f32 {
        self.last_err
    }

    pub fn min_delta(&self) -> Millis {
        self.min_delta
    }
}
