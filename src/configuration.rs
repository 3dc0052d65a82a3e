use crate::error::NavbotError;
use crate::hardware::Millis;
use crate::pid::PidGains;
use crate::pilot::MAX_POWER;
use crate::pose::{Pose, Position};
use config::Config;
use serde::Deserialize;
use std::{path::PathBuf, str};
use tracing::*;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub robot: RobotConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl AppConfig {
    pub fn load_config(config: &Option<PathBuf>) -> anyhow::Result<Self> {
        let settings = if let Some(config) = config {
            info!("Using configuration from {:?}", config);
            Config::builder()
                .add_source(config::Environment::with_prefix("NAVBOT").separator("__"))
                .add_source(config::File::with_name(
                    config
                        .to_str()
                        .ok_or_else(|| anyhow::anyhow!("Failed to convert path"))?,
                ))
                .build()?
        } else {
            info!("Using dev configuration");
            Config::builder()
                .add_source(config::Environment::with_prefix("NAVBOT").separator("__"))
                .add_source(config::File::with_name("config/settings"))
                .add_source(config::File::with_name("config/dev_settings").required(false))
                .build()?
        };

        let app_config: AppConfig = settings.try_deserialize()?;
        app_config.robot.validate()?;
        Ok(app_config)
    }
}

/// Per robot wiring and calibration, handed to the pilot once at startup
#[derive(Deserialize, Debug, Clone, Default)]
pub struct RobotConfig {
    pub geometry: GeometryConfig,
    #[serde(default)]
    pub navigator: NavigatorConfig,
    #[serde(default)]
    pub pilot: PilotConfig,
    #[serde(default)]
    pub motor: MotorConfig,
}

impl RobotConfig {
    pub fn validate(&self) -> Result<(), NavbotError> {
        let calibration = &self.geometry.calibration;
        for (name, scaler) in [
            ("wheel rl scaler", calibration.wheel_rl_scaler),
            ("wheel base scaler", calibration.wheel_base_scaler),
            ("distance scaler", calibration.distance_scaler),
        ] {
            if scaler.is_nan() || scaler <= 0.0 {
                return Err(NavbotError::InvalidConfig(format!(
                    "{} {} must be positive",
                    name, scaler
                )));
            }
        }
        let pilot = &self.pilot;
        if pilot.min_move_speed > pilot.max_move_speed {
            return Err(NavbotError::InvalidConfig(format!(
                "min move speed {} is above max move speed {}",
                pilot.min_move_speed, pilot.max_move_speed
            )));
        }
        if pilot.min_turn_speed > pilot.max_turn_speed {
            return Err(NavbotError::InvalidConfig(format!(
                "min turn speed {} is above max turn speed {}",
                pilot.min_turn_speed, pilot.max_turn_speed
            )));
        }
        if pilot.min_service_interval == 0 {
            return Err(NavbotError::InvalidConfig(
                "min service interval must be positive".to_owned(),
            ));
        }
        if pilot.encoder_failure_limit == 0 {
            return Err(NavbotError::InvalidConfig(
                "encoder failure limit must be positive".to_owned(),
            ));
        }
        for (name, power) in [
            ("start power", pilot.start_power),
            ("stop power", pilot.stop_power),
        ] {
            if power <= 0.0 || power > MAX_POWER {
                return Err(NavbotError::InvalidConfig(format!(
                    "{} {} is outside (0, {}]",
                    name, power, MAX_POWER
                )));
            }
        }
        if self.motor.output_range <= 0 {
            return Err(NavbotError::InvalidConfig(format!(
                "motor output range {} must be positive",
                self.motor.output_range
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct GeometryConfig {
    /// mm
    pub wheel_diameter: f32,
    /// mm between the wheel contact points
    pub wheel_base: f32,
    pub ticks_per_revolution: u16,
    #[serde(default)]
    pub calibration: Calibration,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            wheel_diameter: 90.0,
            wheel_base: 205.0,
            ticks_per_revolution: 1500,
            calibration: Calibration::default(),
        }
    }
}

/// Corrections for systematic odometry errors, all 1.0 when uncalibrated
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Calibration {
    /// Ratio of left to right wheel diameter
    pub wheel_rl_scaler: f32,
    pub wheel_base_scaler: f32,
    pub distance_scaler: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            wheel_rl_scaler: 1.0,
            wheel_base_scaler: 1.0,
            distance_scaler: 1.0,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct NavigatorConfig {
    /// ms of ticks to accumulate before integrating
    pub min_interval: Millis,
    pub start_pose: Pose,
    pub encoder_heading_bias: f32,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            min_interval: 10,
            start_pose: Pose::default(),
            encoder_heading_bias: 0.0,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct PilotConfig {
    /// mm/s
    pub min_move_speed: f32,
    /// mm/s
    pub max_move_speed: f32,
    /// deg/s
    pub min_turn_speed: f32,
    /// deg/s
    pub max_turn_speed: f32,
    /// mm from the destination that counts as arrived
    pub target_radius: f32,
    /// degrees from the target heading that counts as turned
    pub heading_tolerance: f32,
    /// Target speed per mm of remaining distance (1/s) while approaching
    pub approach_gain: f32,
    /// Internal power a maneuver starts from
    pub start_power: f32,
    /// Internal power below which the motors stall
    pub stop_power: f32,
    /// ms without motion before a stop counts as finished
    pub settle_period: Millis,
    /// mm/s treated as standing still
    pub settle_speed: f32,
    /// deg/s treated as not rotating
    pub settle_turn_rate: f32,
    pub min_service_interval: Millis,
    /// Consecutive failed encoder reads after which the motors are stopped
    pub encoder_failure_limit: u32,
    pub heading_pid: PidGains,
    pub speed_pid: PidGains,
    pub wheel_pid: PidGains,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            min_move_speed: 50.0,
            max_move_speed: 200.0,
            min_turn_speed: 20.0,
            max_turn_speed: 90.0,
            target_radius: 10.0,
            heading_tolerance: 2.0,
            approach_gain: 1.0,
            start_power: 150.0,
            stop_power: 40.0,
            settle_period: 60,
            settle_speed: 2.0,
            settle_turn_rate: 2.0,
            min_service_interval: 20,
            encoder_failure_limit: 10,
            heading_pid: PidGains::new(4.0, 0.0, 0.0),
            speed_pid: PidGains::new(1.0, 0.0, 0.0),
            wheel_pid: PidGains::new(2.0, 0.0, 0.0),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct MotorConfig {
    /// Motor sink units matching full internal power
    pub output_range: i16,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self { output_range: 250 }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SimulationConfig {
    /// Wheel surface speed in mm/s per motor sink unit
    pub wheel_response: f32,
    /// ms of simulated time per service call
    pub step: Millis,
    /// Give up on a mission step after this many ms
    pub step_timeout: Millis,
    pub mission: Vec<MissionStep>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            wheel_response: 2.0,
            step: 20,
            step_timeout: 60_000,
            mission: vec![],
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MissionStep {
    MoveBy(f32),
    MoveTo(Position),
    TurnBy(f32),
    TurnTo(f32),
    SpinBy(f32),
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    static DEFAULT_CONFIG: &str = include_str!("../config/settings.yaml");

    fn default_app_config() -> AppConfig {
        let builder = Config::builder()
            .add_source(config::File::from_str(
                DEFAULT_CONFIG,
                config::FileFormat::Yaml,
            ))
            .build()
            .unwrap();
        builder.try_deserialize::<AppConfig>().unwrap()
    }

    #[test]
    fn test_config() {
        let config = default_app_config();
        config.robot.validate().unwrap();
        assert_eq!(config.robot.geometry.ticks_per_revolution, 1500);
        assert!(!config.simulation.mission.is_empty());
    }

    #[test]
    fn mission_steps_parse() {
        let config = default_app_config();
        assert!(config
            .simulation
            .mission
            .contains(&MissionStep::MoveTo(Position::new(0.0, 0.0))));
        assert!(config.simulation.mission.contains(&MissionStep::Stop));
    }

    #[test]
    fn sections_fall_back_to_defaults() {
        let builder = Config::builder()
            .add_source(config::File::from_str(
                "robot:\n  geometry:\n    wheel_diameter: 60.0\n    wheel_base: 120.0\n    ticks_per_revolution: 360\n",
                config::FileFormat::Yaml,
            ))
            .build()
            .unwrap();
        let config = builder.try_deserialize::<AppConfig>().unwrap();
        assert_eq!(config.robot.geometry.calibration, Calibration::default());
        assert_eq!(config.robot.pilot.min_service_interval, 20);
        assert_eq!(config.robot.pilot.encoder_failure_limit, 10);
        assert_eq!(config.robot.motor.output_range, 250);
        assert!(config.simulation.mission.is_empty());
    }

    #[test]
    fn inverted_speed_bounds_are_rejected() {
        let mut config = RobotConfig::default();
        config.pilot.min_move_speed = 300.0;
        assert!(matches!(
            config.validate(),
            Err(NavbotError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_encoder_failure_limit_is_rejected() {
        let mut config = RobotConfig::default();
        config.pilot.encoder_failure_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn calibration_scalers_must_be_positive() {
        let mut config = RobotConfig::default();
        config.geometry.calibration.wheel_rl_scaler = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn power_thresholds_must_fit_power_range() {
        let mut config = RobotConfig::default();
        config.pilot.start_power = MAX_POWER + 1.0;
        assert!(config.validate().is_err());
        config.pilot.start_power = 100.0;
        config.pilot.stop_power = 0.0;
        assert!(config.validate().is_err());
        config.pilot.stop_power = 30.0;
        assert!(config.validate().is_ok());
    }
}
