//! Optional diagnostics hook for the pilot.
//!
//! Events are handed to whatever [`PilotObserver`] was installed with
//! `Pilot::set_observer`. Nothing is recorded when no observer is set.

use crate::hardware::{Millis, WheelPower};
use crate::pilot::{State, Task};
use serde::Serialize;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PidKind {
    Heading,
    Speed,
    Wheel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PilotEvent {
    TaskChanged {
        from: Task,
        to: Task,
    },
    StateChanged {
        from: State,
        to: State,
    },
    EncoderError {
        count: u32,
    },
    PidSample {
        controller: PidKind,
        time: Millis,
        error: f32,
        sum: f32,
        output: f32,
    },
    MotorPower {
        time: Millis,
        power: WheelPower,
    },
    /// Internal power at which the robot was seen to start moving
    MotionStarted {
        power: f32,
    },
    /// Internal power at which the robot was seen to stop moving
    MotionStopped {
        power: f32,
    },
}

pub trait PilotObserver {
    fn on_event(&mut self, event: &PilotEvent);
}

/// Writes every event as a line of JSON, handy for graphing PID behaviour.
pub struct JsonLinesObserver<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesObserver<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> PilotObserver for JsonLinesObserver<W> {
    fn on_event(&mut self, event: &PilotEvent) {
        let result = serde_json::to_writer(&mut self.writer, event)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));
        if let Err(err) = result {
            error!("Failed to write pilot event {:?}", err);
        }
    }
}

impl PilotObserver for Vec<PilotEvent> {
    fn on_event(&mut self, event: &PilotEvent) {
        self.push(*event);
    }
}

/// Lets the caller keep a handle on an observer it gave away.
impl<O: PilotObserver> PilotObserver for Rc<RefCell<O>> {
    fn on_event(&mut self, event: &PilotEvent) {
        self.borrow_mut().on_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_are_tagged() {
        let mut observer = JsonLinesObserver::new(Vec::<u8>::new());
        observer.on_event(&PilotEvent::TaskChanged {
            from: Task::None,
            to: Task::Turn,
        });
        observer.on_event(&PilotEvent::PidSample {
            controller: PidKind::Heading,
            time: 40,
            error: 1.5,
            sum: 0.0,
            output: 3.0,
        });
        let output = String::from_utf8(observer.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "task_changed");
        assert_eq!(first["to"], "turn");

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "pid_sample");
        assert_eq!(second["controller"], "heading");
        assert_eq!(second["time"], 40);
    }

    #[test]
    fn vec_records_events() {
        let mut events: Vec<PilotEvent> = vec![];
        events.on_event(&PilotEvent::EncoderError { count: 1 });
        assert_eq!(events, vec![PilotEvent::EncoderError { count: 1 }]);
    }
}
