//! Dead reckoning from wheel encoder ticks.
//!
//! Heading is measured in degrees clockwise from north and y is the forward
//! axis, so a robot at heading 0 driving straight only changes y.

use crate::configuration::{Calibration, GeometryConfig, NavigatorConfig};
use crate::error::GeometryError;
use crate::hardware::{delta_time, Millis};
use crate::pose::{clip_radians, heading_vector, normalize_degrees, Pose, Position};
use std::f32::consts::PI;
use tracing::*;

const MIN_WHEEL_BASE: f32 = 1.0;
const DEFAULT_MIN_INTERVAL: Millis = 10;

#[derive(Debug, Clone)]
pub struct Navigator {
    pose: Pose,
    /// mm per second
    speed: f32,
    /// degrees per second
    turn_rate: f32,

    start_pose: Pose,
    calibration: Calibration,
    left_dist_per_tick: f32,
    right_dist_per_tick: f32,
    wheel_base: f32,
    encoder_heading_bias: f32,
    min_interval: Millis,
    geometry_faults: Vec<GeometryError>,

    last_ticks_time: Millis,
    dt: Millis,
    left_ticks: i32,
    right_ticks: i32,
    heading: f32,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator {
    pub fn new() -> Self {
        let mut navigator = Self {
            pose: Pose::default(),
            speed: 0.0,
            turn_rate: 0.0,
            start_pose: Pose::default(),
            calibration: Calibration::default(),
            left_dist_per_tick: 0.0,
            right_dist_per_tick: 0.0,
            wheel_base: MIN_WHEEL_BASE,
            encoder_heading_bias: 0.0,
            min_interval: DEFAULT_MIN_INTERVAL,
            geometry_faults: vec![],
            last_ticks_time: 0,
            dt: 0,
            left_ticks: 0,
            right_ticks: 0,
            heading: 0.0,
        };
        navigator.reset(0);
        navigator
    }

    /// Builds a navigator with geometry, calibration and start pose applied,
    /// seeded at `now`.
    pub fn from_config(geometry: &GeometryConfig, config: &NavigatorConfig, now: Millis) -> Self {
        let mut navigator = Self::new();
        navigator.set_calibration(geometry.calibration);
        navigator.set_start_pose(config.start_pose);
        navigator.set_encoder_heading_bias(config.encoder_heading_bias);
        navigator.set_min_interval(config.min_interval);
        navigator.init(
            geometry.wheel_diameter,
            geometry.wheel_base,
            geometry.ticks_per_revolution,
        );
        navigator.reset(now);
        navigator
    }

    /// Derives distance per tick and wheel base. Call once before feeding ticks.
    ///
    /// Bad geometry is clamped rather than rejected, check
    /// [`Navigator::geometry_faults`] to find out.
    pub fn init(&mut self, wheel_diameter: f32, wheel_base: f32, ticks_per_revolution: u16) {
        self.geometry_faults.clear();

        let dist_per_tick = if ticks_per_revolution > 0 {
            wheel_diameter * PI / ticks_per_revolution as f32
        } else {
            self.geometry_faults
                .push(GeometryError::ZeroTicksPerRevolution);
            0.0
        };
        let dist_per_tick = dist_per_tick * self.calibration.distance_scaler;
        // split the wheel diameter mismatch between both wheels
        let wheel_ratio = self.calibration.wheel_rl_scaler;
        self.left_dist_per_tick = dist_per_tick * 2.0 / (wheel_ratio + 1.0);
        self.right_dist_per_tick = dist_per_tick * 2.0 / (1.0 / wheel_ratio + 1.0);

        let wheel_base = wheel_base * self.calibration.wheel_base_scaler;
        self.wheel_base = if wheel_base >= MIN_WHEEL_BASE {
            wheel_base
        } else {
            self.geometry_faults
                .push(GeometryError::WheelBaseClamped(wheel_base));
            MIN_WHEEL_BASE
        };

        for fault in &self.geometry_faults {
            warn!("Odometry geometry degraded: {}", fault);
        }
    }

    /// Re-seeds the pose from the start pose and drops accumulated ticks.
    pub fn reset(&mut self, now: Millis) {
        self.last_ticks_time = now;
        self.dt = 0;
        self.left_ticks = 0;
        self.right_ticks = 0;
        self.pose = self.start_pose;
        self.heading = self.pose.heading.to_radians();
        self.speed = 0.0;
        self.turn_rate = 0.0;
    }

    /// Accumulates encoder ticks and integrates them into the pose once
    /// at least the minimum interval has passed.
    ///
    /// Returns `true` when the pose, speed and turn rate were updated.
    pub fn update_ticks(&mut self, left_ticks: i16, right_ticks: i16, now: Millis) -> bool {
        self.dt = self
            .dt
            .saturating_add(delta_time(self.last_ticks_time, now));
        self.left_ticks += left_ticks as i32;
        self.right_ticks += right_ticks as i32;
        self.last_ticks_time = now;

        if self.dt < self.min_interval || self.dt == 0 {
            return false;
        }

        let dt = self.dt as f32;
        let right = self.right_ticks as f32 * self.right_dist_per_tick;
        let left = self.left_ticks as f32 * self.left_dist_per_tick;
        let forward = (right + left) / 2.0;

        // left wheel ahead turns clockwise
        let turn = (left - right) / self.wheel_base;
        self.heading = clip_radians(self.heading + turn);

        self.speed = (forward * 1000.0) / dt;
        self.turn_rate = (turn.to_degrees() * 1000.0) / dt;

        self.pose.heading = normalize_degrees(self.heading.to_degrees());
        self.pose.position += heading_vector(self.heading) * forward;

        self.dt = 0;
        self.left_ticks = 0;
        self.right_ticks = 0;
        true
    }

    /// Moves the integration timestamp to `now` without integrating, for
    /// intervals whose ticks were lost.
    pub fn skip(&mut self, now: Millis) {
        self.last_ticks_time = now;
    }

    /// Point `distance` mm ahead of the robot along its current heading.
    pub fn new_position(&self, distance: f32) -> Position {
        self.pose.position + heading_vector(self.heading) * distance
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn position(&self) -> Position {
        self.pose.position
    }

    pub fn heading(&self) -> f32 {
        self.pose.heading
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn turn_rate(&self) -> f32 {
        self.turn_rate
    }

    pub fn ticks_heading_bias(&self) -> f32 {
        self.encoder_heading_bias
    }

    pub fn min_interval(&self) -> Millis {
        self.min_interval
    }

    pub fn wheel_base(&self) -> f32 {
        self.wheel_base
    }

    /// Mean of the calibrated left and right distance per tick
    pub fn dist_per_tick(&self) -> f32 {
        (self.left_dist_per_tick + self.right_dist_per_tick) / 2.0
    }

    pub fn geometry_faults(&self) -> &[GeometryError] {
        &self.geometry_faults
    }

    pub fn set_start_pose(&mut self, pose: Pose) {
        self.start_pose.position = pose.position;
        self.start_pose.heading = normalize_degrees(pose.heading);
    }

    pub fn set_start_position(&mut self, position: Position) {
        self.start_pose.position = position;
    }

    pub fn set_start_heading(&mut self, heading: f32) {
        self.start_pose.heading = normalize_degrees(heading);
    }

    /// Stored for the robot's use, the integration does not apply it.
    pub fn set_encoder_heading_bias(&mut self, bias: f32) {
        self.encoder_heading_bias = bias;
    }

    pub fn set_min_interval(&mut self, min_interval: Millis) {
        self.min_interval = min_interval;
    }

    /// Scalers are applied by [`Navigator::init`], so set them first.
    pub fn set_calibration(&mut self, calibration: Calibration) {
        self.calibration = calibration;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MAX_TIME;
    use approx::assert_relative_eq;

    const WHEEL_DIAMETER: f32 = 90.0;
    const WHEEL_BASE: f32 = 205.0;
    const TICKS_PER_REV: u16 = 1500;

    fn navigator() -> Navigator {
        let mut navigator = Navigator::new();
        navigator.init(WHEEL_DIAMETER, WHEEL_BASE, TICKS_PER_REV);
        navigator.reset(0);
        navigator
    }

    fn dist_per_tick() -> f32 {
        WHEEL_DIAMETER * PI / TICKS_PER_REV as f32
    }

    #[test]
    fn waits_for_min_interval() {
        let mut navigator = navigator();
        navigator.set_min_interval(10);
        assert!(!navigator.update_ticks(10, 10, 3));
        assert!(!navigator.update_ticks(10, 10, 6));
        assert!(!navigator.update_ticks(10, 10, 9));
        assert_relative_eq!(navigator.position().y, 0.0);
        assert!(navigator.update_ticks(10, 10, 12));
        assert_relative_eq!(
            navigator.position().y,
            40.0 * dist_per_tick(),
            epsilon = 1e-4
        );
        assert_relative_eq!(
            navigator.speed(),
            40.0 * dist_per_tick() * 1000.0 / 12.0,
            epsilon = 1e-2
        );
        // accumulators were cleared
        assert!(!navigator.update_ticks(0, 0, 13));
        assert!(navigator.update_ticks(0, 0, 22));
        assert_relative_eq!(navigator.speed(), 0.0);
    }

    #[test]
    fn symmetric_ticks_move_along_heading() {
        let mut navigator = Navigator::new();
        navigator.set_start_heading(30.0);
        navigator.init(WHEEL_DIAMETER, WHEEL_BASE, TICKS_PER_REV);
        navigator.reset(0);

        assert!(navigator.update_ticks(100, 100, 20));
        let distance = 100.0 * dist_per_tick();
        assert_relative_eq!(navigator.heading(), 30.0, epsilon = 1e-4);
        assert_relative_eq!(
            navigator.position().x,
            distance * 30_f32.to_radians().sin(),
            epsilon = 1e-4
        );
        assert_relative_eq!(
            navigator.position().y,
            distance * 30_f32.to_radians().cos(),
            epsilon = 1e-4
        );
        assert_relative_eq!(navigator.turn_rate(), 0.0);
    }

    #[test]
    fn pure_rotation_keeps_position() {
        let mut navigator = navigator();
        assert!(navigator.update_ticks(100, -100, 20));
        let expected = (2.0 * 100.0 * dist_per_tick()) / WHEEL_BASE;
        assert_relative_eq!(
            navigator.heading(),
            expected.to_degrees(),
            epsilon = 1e-3
        );
        assert_relative_eq!(navigator.position().x, 0.0);
        assert_relative_eq!(navigator.position().y, 0.0);
        assert_relative_eq!(navigator.speed(), 0.0);
        assert_relative_eq!(
            navigator.turn_rate(),
            expected.to_degrees() * 1000.0 / 20.0,
            epsilon = 1e-2
        );
    }

    #[test]
    fn heading_stays_in_range() {
        let mut navigator = navigator();
        let mut now = 0;
        for _ in 0..500 {
            now += 20;
            navigator.update_ticks(-130, 130, now);
            let heading = navigator.heading();
            assert!((0.0..360.0).contains(&heading), "heading {}", heading);
        }
        for _ in 0..500 {
            now += 20;
            navigator.update_ticks(170, -170, now);
            let heading = navigator.heading();
            assert!((0.0..360.0).contains(&heading), "heading {}", heading);
        }
    }

    #[test]
    fn elapsed_time_survives_clock_wrap() {
        let mut navigator = navigator();
        navigator.reset(MAX_TIME - 15);
        assert!(navigator.update_ticks(32, 32, 16));
        let distance = 32.0 * dist_per_tick();
        assert_relative_eq!(navigator.speed(), distance * 1000.0 / 32.0, epsilon = 1e-3);
    }

    #[test]
    fn reset_restores_start_pose() {
        let mut navigator = navigator();
        navigator.set_start_pose(Pose::new((100.0, -50.0), 370.0));
        navigator.update_ticks(50, 80, 20);
        navigator.reset(40);
        assert_eq!(navigator.pose(), Pose::new((100.0, -50.0), 10.0));
        assert_relative_eq!(navigator.speed(), 0.0);
        // time base moved to the reset time
        assert!(!navigator.update_ticks(0, 0, 45));
    }

    #[test]
    fn new_position_projects_without_moving() {
        let mut navigator = Navigator::new();
        navigator.set_start_pose(Pose::new((10.0, 10.0), 90.0));
        navigator.init(WHEEL_DIAMETER, WHEEL_BASE, TICKS_PER_REV);
        navigator.reset(0);
        let ahead = navigator.new_position(100.0);
        assert_relative_eq!(ahead.x, 110.0, epsilon = 1e-4);
        assert_relative_eq!(ahead.y, 10.0, epsilon = 1e-4);
        let behind = navigator.new_position(-100.0);
        assert_relative_eq!(behind.x, -90.0, epsilon = 1e-4);
        assert_eq!(navigator.position(), Position::new(10.0, 10.0));
    }

    #[test]
    fn bad_geometry_is_clamped_and_reported() {
        let mut navigator = Navigator::new();
        navigator.init(WHEEL_DIAMETER, 0.0, 0);
        assert_eq!(
            navigator.geometry_faults(),
            &[
                GeometryError::ZeroTicksPerRevolution,
                GeometryError::WheelBaseClamped(0.0)
            ]
        );
        assert_relative_eq!(navigator.dist_per_tick(), 0.0);
        assert_relative_eq!(navigator.wheel_base(), 1.0);
        navigator.reset(0);
        assert!(navigator.update_ticks(100, -100, 20));
        assert_eq!(navigator.pose(), Pose::default());

        navigator.init(WHEEL_DIAMETER, WHEEL_BASE, TICKS_PER_REV);
        assert!(navigator.geometry_faults().is_empty());
    }

    #[test]
    fn calibration_applies_at_init() {
        let mut navigator = Navigator::new();
        navigator.set_calibration(Calibration {
            wheel_rl_scaler: 1.0,
            wheel_base_scaler: 2.0,
            distance_scaler: 0.5,
        });
        navigator.init(WHEEL_DIAMETER, WHEEL_BASE, TICKS_PER_REV);
        assert_relative_eq!(navigator.wheel_base(), WHEEL_BASE * 2.0);
        assert_relative_eq!(navigator.dist_per_tick(), dist_per_tick() * 0.5);
    }

    #[test]
    fn wheel_ratio_splits_distance_per_tick() {
        let mut navigator = Navigator::new();
        navigator.set_calibration(Calibration {
            wheel_rl_scaler: 1.02,
            ..Default::default()
        });
        navigator.init(WHEEL_DIAMETER, WHEEL_BASE, TICKS_PER_REV);
        navigator.reset(0);
        // equal ticks now drift since the wheels differ
        assert!(navigator.update_ticks(1000, 1000, 20));
        assert!(navigator.heading() > 180.0);
    }

    #[test]
    fn from_config_applies_everything() {
        let geometry = GeometryConfig {
            wheel_diameter: WHEEL_DIAMETER,
            wheel_base: WHEEL_BASE,
            ticks_per_revolution: TICKS_PER_REV,
            calibration: Calibration::default(),
        };
        let config = NavigatorConfig {
            min_interval: 25,
            start_pose: Pose::new((5.0, 6.0), 45.0),
            encoder_heading_bias: 0.25,
        };
        let mut navigator = Navigator::from_config(&geometry, &config, 1000);
        assert_eq!(navigator.pose(), Pose::new((5.0, 6.0), 45.0));
        assert_eq!(navigator.min_interval(), 25);
        assert_relative_eq!(navigator.ticks_heading_bias(), 0.25);
        assert!(!navigator.update_ticks(10, 10, 1020));
        assert!(navigator.update_ticks(10, 10, 1025));
    }
}
