use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use std::fmt;

/// Millimeters from the origin, y points north
pub type Position = na::Point2<f32>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Position,
    /// Degrees clockwise from north
    pub heading: f32,
}

impl Pose {
    pub fn new((x, y): (f32, f32), heading: f32) -> Self {
        Self {
            position: Position::new(x, y),
            heading: normalize_degrees(heading),
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::new((0.0, 0.0), 0.0)
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{:.1}, {:.1}] -> {:.1}",
            self.position.x, self.position.y, self.heading
        )
    }
}

/// Wraps any angle into [0, 360)
pub fn normalize_degrees(degrees: f32) -> f32 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Removes whole turns, keeping the sign of the input.
pub fn clip_radians(radians: f32) -> f32 {
    radians % TAU
}

/// Signed rotation in degrees taking the short way from `from` to `to`.
///
/// Result lies in (-180, 180], positive is clockwise.
pub fn heading_error(from: f32, to: f32) -> f32 {
    let delta = (to - from).rem_euclid(360.0);
    if delta > 180.0 {
        delta - 360.0
    } else {
        delta
    }
}

/// Compass heading of the straight line from `from` to `to`.
pub fn bearing(from: &Position, to: &Position) -> f32 {
    let delta = to - from;
    normalize_degrees(delta.x.atan2(delta.y).to_degrees())
}

/// Unit vector pointing along a compass heading given in radians.
pub fn heading_vector(heading_radians: f32) -> na::Vector2<f32> {
    na::Vector2::new(heading_radians.sin(), heading_radians.cos())
}
