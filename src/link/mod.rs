//! Link layer for direct rover control
//!
//! This module handles:
//! - Per-rover command/telemetry and video channels over WebSocket
//! - Fixed send cadences (10 ms command loop, 100 ms heartbeat)
//! - Automatic reconnection with a fixed retry delay
//! - Rolling link latency estimation from telemetry receipt

pub mod channel;
pub mod machine;
pub mod session;
pub mod tick;

pub use channel::{LinkChannel, LinkConnector, WsLinkConnector};
pub use machine::{Effect, LinkEvent, LinkMachine, LinkState, ReconnectPolicy};
pub use session::{ChannelKind, LinkSession, SessionConfig, SessionEvent};
pub use tick::{plan_tick, InputSnapshot, SpeedEnvelope};
