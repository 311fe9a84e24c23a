//! Drover Shared Protocol Types
//!
//! This crate provides the shared wire codec, task state machine, and dispatch
//! data model for communication between operator consoles, rovers, and the
//! dispatch server.

pub mod codec;
pub mod dispatch;
pub mod tasking;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing parameters for the link layer
pub mod timing {
    /// Command loop period in milliseconds
    pub const COMMAND_INTERVAL_MS: u64 = 10;

    /// Heartbeat loop period in milliseconds
    pub const HEARTBEAT_INTERVAL_MS: u64 = 100;

    /// Fixed reconnect delay for command and video channels
    pub const LINK_RETRY_DELAY_MS: u64 = 1000;

    /// Initial reconnect delay for the dispatch subscription
    pub const DISPATCH_BACKOFF_INITIAL_MS: u64 = 1000;

    /// Reconnect delay cap for the dispatch subscription
    pub const DISPATCH_BACKOFF_MAX_MS: u64 = 30000;
}

/// Rover operating mode
///
/// `EStop` and `Fault` are reported by the rover in telemetry; clients only
/// ever request the first four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Disabled,
    Idle,
    Teleop,
    Autonomous,
    EStop,
    Fault,
}

impl Mode {
    /// Wire discriminant for the mode byte
    pub fn as_u8(self) -> u8 {
        match self {
            Mode::Disabled => 0,
            Mode::Idle => 1,
            Mode::Teleop => 2,
            Mode::Autonomous => 3,
            Mode::EStop => 4,
            Mode::Fault => 5,
        }
    }

    /// Parse a mode byte; unknown values are rejected
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Mode::Disabled),
            1 => Some(Mode::Idle),
            2 => Some(Mode::Teleop),
            3 => Some(Mode::Autonomous),
            4 => Some(Mode::EStop),
            5 => Some(Mode::Fault),
            _ => None,
        }
    }
}

/// Velocity command: linear m/s, angular rad/s
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Twist {
    pub linear: f64,
    pub angular: f64,
    /// Boost flag; affects client-side rate scaling, not the wire layout
    #[serde(default)]
    pub boost: bool,
}

impl Twist {
    /// Neutral command, sent to converge the rover to a stop
    pub const fn zero() -> Self {
        Self {
            linear: 0.0,
            angular: 0.0,
            boost: false,
        }
    }
}

/// Planar pose in the rover's local frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// Measured body velocity reported in telemetry
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub linear: f64,
    pub angular: f64,
}

/// Auxiliary tool head command: one proportional axis, one motor, two buttons
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolCommand {
    pub axis: f32,
    pub motor: f32,
    pub action_a: bool,
    pub action_b: bool,
}

impl ToolCommand {
    /// Whether any axis or button is driven; idle tools are not sent
    pub fn is_active(&self) -> bool {
        self.axis != 0.0 || self.motor != 0.0 || self.action_a || self.action_b
    }
}

/// One client-to-rover frame, produced fresh each send tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandFrame {
    Twist(Twist),
    EStop,
    Heartbeat,
    SetMode(Mode),
    Tool(ToolCommand),
    EStopRelease,
}

/// One rover-to-client telemetry frame
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub mode: Mode,
    pub pose: Pose,
    pub battery_voltage: f64,
    pub timestamp_ms: u64,
    pub velocity: Velocity,
    pub motor_temps: [f32; 4],
    pub motor_currents: [f32; 4],
}

/// One rover-to-client video frame; payload format is opaque here
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub timestamp_ms: u64,
    pub width: u16,
    pub height: u16,
    pub payload: bytes::Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms() {
        assert!(now_ms() > 0);
    }

    #[test]
    fn test_mode_byte_roundtrip() {
        for value in 0u8..6 {
            let mode = Mode::from_u8(value).expect("known mode byte");
            assert_eq!(mode.as_u8(), value);
        }
        assert_eq!(Mode::from_u8(6), None);
        assert_eq!(Mode::from_u8(255), None);
    }

    #[test]
    fn test_zero_twist() {
        let twist = Twist::zero();
        assert_eq!(twist.linear, 0.0);
        assert_eq!(twist.angular, 0.0);
        assert!(!twist.boost);
    }

    #[test]
    fn test_tool_activity() {
        assert!(!ToolCommand::default().is_active());
        assert!(ToolCommand {
            axis: 0.5,
            ..Default::default()
        }
        .is_active());
        assert!(ToolCommand {
            action_b: true,
            ..Default::default()
        }
        .is_active());
    }
}
