//! Closed loop execution of move, turn and spin commands.
//!
//! Commands only record what should happen. The work is done by
//! [`Pilot::service`], which the embedding application calls from its main
//! loop: it reads the encoders, updates the [`Navigator`], runs the control
//! law of the active command and hands the resulting wheel power to the
//! motors. A new command replaces the one in progress.

use crate::configuration::{MotorConfig, PilotConfig, RobotConfig};
use crate::error::NavbotError;
use crate::hardware::{delta_time, Millis, Platform, WheelPower};
use crate::navigator::Navigator;
use crate::observer::{PidKind, PilotEvent, PilotObserver};
use crate::pid::PidController;
use crate::pose::{bearing, heading_error, heading_vector, normalize_degrees, Pose, Position};
use serde::Serialize;
use tracing::*;

/// Full scale of the internal power units
pub const MAX_POWER: f32 = 1024.0;

/// MoveTo stops re-aiming at its target once this many target radii away
const PURSUIT_HOLD_RADII: f32 = 4.0;

/// Outstanding command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    None,
    Done,
    Turn,
    Move,
    Stop,
    Spin,
}

/// Motor control phase currently executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Stopped,
    Turning,
    Moving,
    Stopping,
    Spinning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Travel {
    Forward,
    Backward,
}

impl Travel {
    fn sign(self) -> f32 {
        match self {
            Travel::Forward => 1.0,
            Travel::Backward => -1.0,
        }
    }
}

/// Clockwise increases the compass heading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rotation {
    Clockwise,
    CounterClockwise,
}

impl Rotation {
    fn toward(degrees: f32) -> Self {
        if degrees < 0.0 {
            Rotation::CounterClockwise
        } else {
            Rotation::Clockwise
        }
    }

    fn sign(self) -> f32 {
        match self {
            Rotation::Clockwise => 1.0,
            Rotation::CounterClockwise => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct MovePlan {
    target: Position,
    /// Heading held while driving
    heading: f32,
    travel: Travel,
    /// Keep re-aiming at the target while far from it
    pursue: bool,
}

impl MovePlan {
    /// Distance still to go along the held heading, negative once past the target.
    fn remaining(&self, position: &Position) -> f32 {
        let along = heading_vector(self.heading.to_radians()).dot(&(self.target - position));
        along * self.travel.sign()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TurnPlan {
    target_heading: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SpinPlan {
    degrees: f32,
    rotation: Rotation,
    /// Unwrapped rotation so far, clockwise positive
    total: f32,
    last_heading: f32,
}

/// Which command a braking phase belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopCause {
    Command,
    Move,
    Spin,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Activity {
    Idle,
    Done,
    Turn(TurnPlan),
    Move(MovePlan),
    Spin(SpinPlan),
    Stopping { cause: StopCause, quiet: Millis },
}

impl Activity {
    fn task(&self) -> Task {
        match self {
            Activity::Idle => Task::None,
            Activity::Done => Task::Done,
            Activity::Turn(_) => Task::Turn,
            Activity::Move(_) => Task::Move,
            Activity::Spin(_) => Task::Spin,
            Activity::Stopping { cause, .. } => match cause {
                StopCause::Command => Task::Stop,
                StopCause::Move => Task::Move,
                StopCause::Spin => Task::Spin,
            },
        }
    }

    fn state(&self) -> State {
        match self {
            Activity::Idle | Activity::Done => State::Stopped,
            Activity::Turn(_) => State::Turning,
            Activity::Move(_) => State::Moving,
            Activity::Spin(_) => State::Spinning,
            Activity::Stopping { .. } => State::Stopping,
        }
    }
}

/// Internal power split into a shared level, per wheel direction and per
/// wheel correction.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Drive {
    power: f32,
    left_dir: f32,
    right_dir: f32,
    left_adjust: f32,
    right_adjust: f32,
}

impl Drive {
    fn straight(travel: Travel, power: f32) -> Self {
        Self {
            power,
            left_dir: travel.sign(),
            right_dir: travel.sign(),
            ..Default::default()
        }
    }

    fn rotate(rotation: Rotation, power: f32) -> Self {
        Self {
            power,
            left_dir: rotation.sign(),
            right_dir: -rotation.sign(),
            ..Default::default()
        }
    }

    fn halt(&mut self) {
        *self = Self::default();
    }

    fn rotation(&self) -> Option<Rotation> {
        if self.left_dir > 0.0 && self.right_dir < 0.0 {
            Some(Rotation::Clockwise)
        } else if self.left_dir < 0.0 && self.right_dir > 0.0 {
            Some(Rotation::CounterClockwise)
        } else {
            None
        }
    }

    fn wheels(&self) -> (f32, f32) {
        let left = self.left_dir * self.power + self.left_adjust;
        let right = self.right_dir * self.power + self.right_adjust;
        (
            left.clamp(-MAX_POWER, MAX_POWER),
            right.clamp(-MAX_POWER, MAX_POWER),
        )
    }
}

fn scale_power(power: f32, output_range: i16) -> i16 {
    (power * output_range as f32 / MAX_POWER).round() as i16
}

pub struct Pilot<P: Platform> {
    platform: P,
    navigator: Navigator,
    config: PilotConfig,
    motor: MotorConfig,

    activity: Activity,
    drive: Drive,
    heading_pid: PidController,
    speed_pid: PidController,
    wheel_pid: PidController,

    last_time: Millis,
    dt: Millis,
    encoder_errors: u32,
    /// Consecutive failed encoder reads
    encoder_blind: u32,
    /// Ticks since the current rotation started
    maneuver_ticks: (i32, i32),
    in_motion: bool,
    observer: Option<Box<dyn PilotObserver>>,
}

impl<P: Platform> Pilot<P> {
    pub fn new(platform: P, config: &RobotConfig) -> Result<Self, NavbotError> {
        config.validate()?;
        let now = platform.now();
        let navigator = Navigator::from_config(&config.geometry, &config.navigator, now);
        let mut pilot = Self {
            platform,
            navigator,
            config: config.pilot,
            motor: config.motor,
            activity: Activity::Idle,
            drive: Drive::default(),
            heading_pid: PidController::new(config.pilot.heading_pid),
            speed_pid: PidController::new(config.pilot.speed_pid),
            wheel_pid: PidController::new(config.pilot.wheel_pid),
            last_time: now,
            dt: 0,
            encoder_errors: 0,
            encoder_blind: 0,
            maneuver_ticks: (0, 0),
            in_motion: false,
            observer: None,
        };
        pilot.reset();
        Ok(pilot)
    }

    /// Drops any command, stops the motors and puts the robot back at its
    /// start pose.
    pub fn reset(&mut self) {
        let now = self.platform.now();
        self.navigator.reset(now);
        self.last_time = now;
        self.dt = 0;
        self.encoder_blind = 0;
        self.maneuver_ticks = (0, 0);
        self.in_motion = false;
        self.reset_controllers();
        self.drive.halt();
        self.set_activity(Activity::Idle);
        self.apply_power(now);
    }

    pub fn set_observer(&mut self, observer: Box<dyn PilotObserver>) {
        self.observer = Some(observer);
    }

    pub fn take_observer(&mut self) -> Option<Box<dyn PilotObserver>> {
        self.observer.take()
    }

    /// Brakes right away, finishing once the robot has been still for the
    /// settle period.
    pub fn stop(&mut self) {
        self.drive.halt();
        self.set_activity(Activity::Stopping {
            cause: StopCause::Command,
            quiet: 0,
        });
        let now = self.platform.now();
        self.apply_power(now);
    }

    /// Drives `distance` mm along the current heading, backwards when negative.
    pub fn move_by(&mut self, distance: f32) {
        let travel = if distance < 0.0 {
            Travel::Backward
        } else {
            Travel::Forward
        };
        self.begin_move(MovePlan {
            target: self.navigator.new_position(distance),
            heading: self.navigator.heading(),
            travel,
            pursue: false,
        });
    }

    /// Drives forward to `position`, steering toward it on the way.
    pub fn move_to(&mut self, position: Position) {
        self.begin_move(MovePlan {
            target: position,
            heading: bearing(&self.navigator.position(), &position),
            travel: Travel::Forward,
            pursue: true,
        });
    }

    pub fn turn_by(&mut self, degrees: f32) {
        self.turn_to(self.navigator.heading() + degrees);
    }

    pub fn turn_to(&mut self, heading: f32) {
        self.reset_controllers();
        self.drive.halt();
        self.set_activity(Activity::Turn(TurnPlan {
            target_heading: normalize_degrees(heading),
        }));
    }

    /// Rotates in place until `degrees` of rotation have accumulated, any
    /// number of full turns included. Negative spins counter clockwise.
    pub fn spin_by(&mut self, degrees: f32) {
        self.reset_controllers();
        self.drive.halt();
        self.set_activity(Activity::Spin(SpinPlan {
            degrees: degrees.abs(),
            rotation: Rotation::toward(degrees),
            total: 0.0,
            last_heading: self.navigator.heading(),
        }));
    }

    /// Runs one control cycle when at least the minimum service interval
    /// has passed.
    ///
    /// A failed encoder read skips the cycle. After `encoder_failure_limit`
    /// failures in a row the motors are stopped, while the command stays
    /// active and resumes once reads succeed again.
    pub fn service(&mut self) {
        let now = self.platform.now();
        let elapsed = delta_time(self.last_time, now);
        if elapsed < self.config.min_service_interval {
            return;
        }
        self.last_time = now;
        self.dt = self.dt.saturating_add(elapsed);

        let ticks = match self.platform.read_ticks() {
            Ok(ticks) => ticks,
            Err(err) => {
                self.encoder_errors = self.encoder_errors.saturating_add(1);
                if self.encoder_errors == 1 {
                    warn!("Encoder read failed: {}", err);
                } else {
                    trace!("Encoder read failed {} times", self.encoder_errors);
                }
                self.emit(PilotEvent::EncoderError {
                    count: self.encoder_errors,
                });
                // the lost interval feeds neither odometry nor the controllers
                self.navigator.skip(now);
                self.dt = 0;
                self.encoder_blind = self.encoder_blind.saturating_add(1);
                if self.encoder_blind == self.config.encoder_failure_limit {
                    warn!(
                        "{} encoder reads failed in a row, holding motors until they recover",
                        self.encoder_blind
                    );
                    self.platform.set_power(WheelPower::stopped());
                    self.emit(PilotEvent::MotorPower {
                        time: now,
                        power: WheelPower::stopped(),
                    });
                }
                return;
            }
        };
        self.encoder_blind = 0;
        if self.drive.rotation().is_some() {
            self.maneuver_ticks.0 = self.maneuver_ticks.0.saturating_add(ticks.left as i32);
            self.maneuver_ticks.1 = self.maneuver_ticks.1.saturating_add(ticks.right as i32);
        }

        if !self.navigator.update_ticks(ticks.left, ticks.right, now) {
            return;
        }
        let dt = std::mem::take(&mut self.dt);
        self.track_motion();

        match self.activity {
            Activity::Turn(plan) => self.update_turn(plan, now, dt),
            Activity::Move(plan) => self.update_move(plan, now, dt),
            Activity::Spin(plan) => self.update_spin(plan, now, dt),
            Activity::Stopping { cause, quiet } => self.full_stop(cause, quiet, dt),
            Activity::Idle | Activity::Done => self.drive.halt(),
        }
        self.apply_power(now);
    }

    fn update_turn(&mut self, plan: TurnPlan, now: Millis, dt: Millis) {
        let error = heading_error(self.navigator.heading(), plan.target_heading);
        if error.abs() <= self.config.heading_tolerance {
            self.drive.halt();
            if self.navigator.turn_rate().abs() <= self.config.settle_turn_rate {
                self.set_activity(Activity::Done);
            }
            return;
        }
        self.turn_toward(error, now, dt);
    }

    fn update_spin(&mut self, mut plan: SpinPlan, now: Millis, dt: Millis) {
        let heading = self.navigator.heading();
        plan.total += heading_error(plan.last_heading, heading);
        plan.last_heading = heading;
        if plan.total.abs() >= plan.degrees {
            self.brake(StopCause::Spin);
            return;
        }
        self.activity = Activity::Spin(plan);
        let remaining = plan.degrees - plan.total.abs();
        self.turn_toward(plan.rotation.sign() * remaining, now, dt);
    }

    /// Rotates in place toward a signed heading error in degrees.
    fn turn_toward(&mut self, error: f32, now: Millis, dt: Millis) {
        let rotation = Rotation::toward(error);
        if self.drive.rotation() != Some(rotation) {
            self.drive = Drive::rotate(rotation, self.config.start_power);
            self.speed_pid.reset(self.config.min_service_interval);
            self.wheel_pid.reset(self.config.min_service_interval);
            self.maneuver_ticks = (0, 0);
        }

        if let Some(rate) = self.heading_pid.calc_adjustment(-error.abs(), dt) {
            self.sample(PidKind::Heading, now, rate);
            let target_rate = rate.clamp(self.config.min_turn_speed, self.config.max_turn_speed);
            self.adjust_power(target_rate, self.navigator.turn_rate().abs(), now, dt);
        }
        self.sync_wheels(now, dt);
    }

    fn update_move(&mut self, mut plan: MovePlan, now: Millis, dt: Millis) {
        let position = self.navigator.position();
        if plan.pursue
            && (plan.target - position).norm() > PURSUIT_HOLD_RADII * self.config.target_radius
        {
            plan.heading = bearing(&position, &plan.target);
        }
        let remaining = plan.remaining(&position);
        if remaining <= self.config.target_radius {
            self.brake(StopCause::Move);
            return;
        }
        self.activity = Activity::Move(plan);

        let error = heading_error(self.navigator.heading(), plan.heading);
        if let Some(correction) = self.heading_pid.calc_adjustment(-error, dt) {
            self.sample(PidKind::Heading, now, correction);
            let limit = MAX_POWER / 4.0;
            let correction = correction.clamp(-limit, limit);
            self.drive.left_adjust = correction;
            self.drive.right_adjust = -correction;
        }

        // slow down while the target is off to the side
        let alignment = error.to_radians().cos().max(0.0);
        let target_speed = (remaining * self.config.approach_gain)
            .clamp(self.config.min_move_speed, self.config.max_move_speed)
            * alignment;
        self.adjust_power(target_speed, self.navigator.speed().abs(), now, dt);
    }

    fn full_stop(&mut self, cause: StopCause, quiet: Millis, dt: Millis) {
        self.drive.halt();
        let settled = self.navigator.speed().abs() <= self.config.settle_speed
            && self.navigator.turn_rate().abs() <= self.config.settle_turn_rate;
        let quiet = if settled { quiet.saturating_add(dt) } else { 0 };
        if quiet >= self.config.settle_period {
            self.set_activity(Activity::Done);
        } else {
            self.activity = Activity::Stopping { cause, quiet };
        }
    }

    fn brake(&mut self, cause: StopCause) {
        self.drive.halt();
        self.set_activity(Activity::Stopping { cause, quiet: 0 });
    }

    /// Ramps the shared power level so `measured` approaches `target`.
    fn adjust_power(&mut self, target: f32, measured: f32, now: Millis, dt: Millis) {
        self.speed_pid.set_target(target);
        if let Some(adjustment) = self.speed_pid.calc_adjustment(measured, dt) {
            self.sample(PidKind::Speed, now, adjustment);
            self.drive.power =
                (self.drive.power + adjustment).clamp(self.config.stop_power, MAX_POWER);
        }
    }

    /// Keeps both wheels turning the same amount during in place rotation.
    fn sync_wheels(&mut self, now: Millis, dt: Millis) {
        let (left, right) = self.maneuver_ticks;
        let lead = (left.abs() - right.abs()) as f32;
        if let Some(adjustment) = self.wheel_pid.calc_adjustment(lead, dt) {
            self.sample(PidKind::Wheel, now, adjustment);
            let limit = self.drive.power / 2.0;
            let half = adjustment.clamp(-limit, limit) / 2.0;
            self.drive.left_adjust = self.drive.left_dir * half;
            self.drive.right_adjust = -self.drive.right_dir * half;
        }
    }

    fn reset_controllers(&mut self) {
        let min_delta = self.config.min_service_interval;
        for pid in [
            &mut self.heading_pid,
            &mut self.speed_pid,
            &mut self.wheel_pid,
        ] {
            pid.reset(min_delta);
            pid.set_target(0.0);
        }
    }

    fn begin_move(&mut self, plan: MovePlan) {
        self.reset_controllers();
        self.drive = Drive::straight(plan.travel, self.config.start_power);
        self.maneuver_ticks = (0, 0);
        self.set_activity(Activity::Move(plan));
    }

    fn track_motion(&mut self) {
        let moving = self.navigator.speed().abs() > self.config.settle_speed
            || self.navigator.turn_rate().abs() > self.config.settle_turn_rate;
        if moving == self.in_motion {
            return;
        }
        self.in_motion = moving;
        let power = self.drive.power;
        if moving {
            debug!("Motion started at power {}", power);
            self.emit(PilotEvent::MotionStarted { power });
        } else {
            debug!("Motion stopped at power {}", power);
            self.emit(PilotEvent::MotionStopped { power });
        }
    }

    fn apply_power(&mut self, now: Millis) {
        let (left, right) = self.drive.wheels();
        let power = WheelPower::new(
            scale_power(left, self.motor.output_range),
            scale_power(right, self.motor.output_range),
        );
        self.platform.set_power(power);
        self.emit(PilotEvent::MotorPower { time: now, power });
    }

    fn set_activity(&mut self, activity: Activity) {
        let (task, state) = (self.activity.task(), self.activity.state());
        self.activity = activity;
        let (new_task, new_state) = (activity.task(), activity.state());
        if task != new_task {
            debug!(?task, ?new_task, "Task changed");
            self.emit(PilotEvent::TaskChanged {
                from: task,
                to: new_task,
            });
        }
        if state != new_state {
            debug!(?state, ?new_state, "State changed");
            self.emit(PilotEvent::StateChanged {
                from: state,
                to: new_state,
            });
        }
    }

    fn sample(&mut self, controller: PidKind, now: Millis, output: f32) {
        if self.observer.is_none() {
            return;
        }
        let pid = match controller {
            PidKind::Heading => &self.heading_pid,
            PidKind::Speed => &self.speed_pid,
            PidKind::Wheel => &self.wheel_pid,
        };
        let event = PilotEvent::PidSample {
            controller,
            time: now,
            error: pid.last_err(),
            sum: pid.sum_errs(),
            output,
        };
        self.emit(event);
    }

    fn emit(&mut self, event: PilotEvent) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_event(&event);
        }
    }

    pub fn is_done(&self) -> bool {
        self.activity.task() == Task::Done
    }

    pub fn task(&self) -> Task {
        self.activity.task()
    }

    pub fn state(&self) -> State {
        self.activity.state()
    }

    /// Heading the active turn is aiming for
    pub fn target_heading(&self) -> Option<f32> {
        match self.activity {
            Activity::Turn(plan) => Some(plan.target_heading),
            _ => None,
        }
    }

    pub fn encoder_errors(&self) -> u32 {
        self.encoder_errors
    }

    pub fn pose(&self) -> Pose {
        self.navigator.pose()
    }

    pub fn position(&self) -> Position {
        self.navigator.position()
    }

    pub fn heading(&self) -> f32 {
        self.navigator.heading()
    }

    pub fn speed(&self) -> f32 {
        self.navigator.speed()
    }

    pub fn turn_rate(&self) -> f32 {
        self.navigator.turn_rate()
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    /// For re-establishing the pose from outside, e.g. start pose then reset.
    pub fn navigator_mut(&mut self) -> &mut Navigator {
        &mut self.navigator
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn config(&self) -> &PilotConfig {
        &self.config
    }
}
