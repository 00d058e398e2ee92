//! Face detection: the backend seam, result types and the detector thread.

mod backend;
mod backends;
mod registry;
mod result;
mod worker;

pub use backend::DetectorBackend;
pub use backends::{SkinToneBackend, StubBackend};
pub use registry::BackendRegistry;
pub use result::{FaceBox, FaceResult};
pub use worker::{DetectorSummary, DetectorWorker};
