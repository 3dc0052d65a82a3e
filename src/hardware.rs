use crate::error::NavbotError;
use serde::Serialize;

/// Milliseconds from a monotonic counter that wraps at `u32::MAX`
pub type Millis = u32;

pub const MAX_TIME: Millis = Millis::MAX;

/// Elapsed time between two clock readings, correct across a counter wrap.
pub fn delta_time(last: Millis, now: Millis) -> Millis {
    if now >= last {
        now - last
    } else {
        MAX_TIME - last + now + 1
    }
}

/// Encoder ticks accumulated since the previous read
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WheelTicks {
    pub left: i16,
    pub right: i16,
}

impl WheelTicks {
    pub fn new(left: i16, right: i16) -> Self {
        Self { left, right }
    }
}

/// Signed per wheel power already scaled to the motor sink's range
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WheelPower {
    pub left: i16,
    pub right: i16,
}

impl WheelPower {
    pub fn new(left: i16, right: i16) -> Self {
        Self { left, right }
    }

    pub fn stopped() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.left == 0 && self.right == 0
    }
}

pub trait Clock {
    fn now(&self) -> Millis;
}

pub trait TickSource {
    fn read_ticks(&mut self) -> Result<WheelTicks, NavbotError>;
}

pub trait MotorSink {
    fn set_power(&mut self, power: WheelPower);
}

/// Everything the pilot needs from the robot it is steering.
///
/// Implementations must not block. A robot that keeps the three concerns in
/// separate objects can wrap them in [`Hardware`].
pub trait Platform: Clock + TickSource + MotorSink {}

impl<T: Clock + TickSource + MotorSink> Platform for T {}

#[derive(Debug, Default)]
pub struct Hardware<C, T, M> {
    pub clock: C,
    pub ticks: T,
    pub motors: M,
}

impl<C, T, M> Hardware<C, T, M> {
    pub fn new(clock: C, ticks: T, motors: M) -> Self {
        Self {
            clock,
            ticks,
            motors,
        }
    }
}

impl<C: Clock, T, M> Clock for Hardware<C, T, M> {
    fn now(&self) -> Millis {
        self.clock.now()
    }
}

impl<C, T: TickSource, M> TickSource for Hardware<C, T, M> {
    fn read_ticks(&mut self) -> Result<WheelTicks, NavbotError> {
        self.ticks.read_ticks()
    }
}

impl<C, T, M: MotorSink> MotorSink for Hardware<C, T, M> {
    fn set_power(&mut self, power: WheelPower) {
        self.motors.set_power(power)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_time_without_wrap() {
        assert_eq!(delta_time(100, 150), 50);
        assert_eq!(delta_time(7, 7), 0);
    }

    #[test]
    fn delta_time_across_wrap() {
        assert_eq!(delta_time(MAX_TIME - 15, 16), 32);
        assert_eq!(delta_time(MAX_TIME, 0), 1);
    }

    struct FixedClock(Millis);

    impl Clock for FixedClock {
        fn now(&self) -> Millis {
            self.0
        }
    }

    struct CountingTicks(i16);

    impl TickSource for CountingTicks {
        fn read_ticks(&mut self) -> Result<WheelTicks, NavbotError> {
            self.0 += 1;
            Ok(WheelTicks::new(self.0, -self.0))
        }
    }

    #[derive(Default)]
    struct LastPower(Option<WheelPower>);

    impl MotorSink for LastPower {
        fn set_power(&mut self, power: WheelPower) {
            self.0 = Some(power);
        }
    }

    fn exercise<P: Platform>(platform: &mut P) -> (Millis, WheelTicks) {
        platform.set_power(WheelPower::new(10, -10));
        (platform.now(), platform.read_ticks().unwrap())
    }

    #[test]
    fn hardware_forwards_each_capability() {
        let mut hardware = Hardware::new(FixedClock(42), CountingTicks(0), LastPower::default());
        let (now, ticks) = exercise(&mut hardware);
        assert_eq!(now, 42);
        assert_eq!(ticks, WheelTicks::new(1, -1));
        assert_eq!(hardware.motors.0, Some(WheelPower::new(10, -10)));
    }
}
