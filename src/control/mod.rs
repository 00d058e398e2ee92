//! Robot control: tracking math and the per-connection command loop.
//!
//! Protocol (plain text over TCP):
//! - Robot -> server: `OK` (any non-empty message) asks for the next command;
//!   an empty message or a closed socket ends the session.
//! - Server -> robot: `(<pan>,<tilt>)\n`, radians as decimal floats.

mod session;
mod tracker;

pub use session::{ControlLoop, ControlState, MAX_ACK_BYTES};
pub use tracker::{
    clamp_angle, AngleCommand, SendReason, ServoAngles, Tracker, Transmission,
};
