use anyhow::Result;

use crate::detect::result::FaceBox;
use crate::frame::DecodedFrame;

/// Face detection algorithm seam.
///
/// One backend instance serves one connection and runs on the detector
/// thread only, so `detect` may keep state between frames.
/// Implementations must treat the frame as read-only and must not retain
/// pixel data past the call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Zero or more face boxes in frame pixel coordinates.
    fn detect(&mut self, frame: &DecodedFrame) -> Result<Vec<FaceBox>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
