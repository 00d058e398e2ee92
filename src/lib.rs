//! Face Tracker
//!
//! Follows a face with a pan/tilt robot head. A camera feed arrives over one
//! of three transports, frames are decoded and run through a face detector,
//! and the robot is sent absolute servo angles that re-centre the face.
//!
//! # Architecture
//!
//! ```text
//! transport -> TransportReader -> FrameQueue -> DetectorWorker -> FaceQueue -> ControlLoop -> robot
//! ```
//!
//! Per robot connection there is one reader thread and one detector thread;
//! the control loop runs on the accepting thread. Stages talk only through
//! bounded queues, and every blocking call is bounded so a `StopSignal` is
//! always observed.
//!
//! # Module Structure
//!
//! - `config`: Startup configuration (file + environment)
//! - `frame`: Compressed/decoded frames and the JPEG decoder
//! - `ingest`: Frame sources (stream, datagram, MJPEG) and the reader loop
//! - `detect`: Detector backends and the detector worker
//! - `control`: Tracking math and the robot command loop
//! - `supervisor`: Robot listener and per-connection wiring
//! - `queue`, `worker`, `stats`: Plumbing shared by the stages

pub mod config;
pub mod control;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod queue;
pub mod stats;
pub mod supervisor;
pub mod worker;

pub use config::{ControlSettings, QueueSettings, TrackerConfig, TransportSettings};
pub use control::{AngleCommand, ControlLoop, ControlState, ServoAngles, Tracker};
pub use detect::{BackendRegistry, DetectorBackend, DetectorWorker, FaceBox, FaceResult};
pub use frame::{ColorMode, CompressedFrame, DecodedFrame, FrameDecoder, MAX_JPEG_BYTES};
pub use ingest::{source_from_settings, FrameSource, TransportKind, TransportReader};
pub use queue::{FaceQueue, FrameQueue, Queue};
pub use stats::{LogStatsSink, SessionReport, StatsSink, ThroughputReport};
pub use supervisor::{ConnectionSupervisor, SupervisorHandle};
pub use worker::{StopSignal, Worker};
