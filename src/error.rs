#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum NavbotError {
    #[error("failed reading wheel encoders")]
    SensorReadFailure,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Odometry geometry that had to be clamped to keep the math finite
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
#[non_exhaustive]
pub enum GeometryError {
    #[error("ticks per revolution is zero, wheel motion will not register")]
    ZeroTicksPerRevolution,
    #[error("wheel base of {0} mm is below 1 mm and was clamped")]
    WheelBaseClamped(f32),
}
