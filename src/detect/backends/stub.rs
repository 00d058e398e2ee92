use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::FaceBox;
use crate::frame::DecodedFrame;

/// Backend that never finds a face. The control loop then only sends
/// keep-alive commands, which is enough to exercise the robot link.
#[derive(Default)]
pub struct StubBackend {
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &DecodedFrame) -> Result<Vec<FaceBox>> {
        self.frames_seen += 1;
        Ok(Vec::new())
    }
}
