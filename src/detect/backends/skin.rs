use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::FaceBox;
use crate::frame::DecodedFrame;

const DEFAULT_MIN_RATIO: f64 = 0.01;
const DEFAULT_STRIDE: u32 = 2;

/// Skin-colour backend.
///
/// Classifies sampled pixels with a fixed RGB skin rule and reports the
/// bounding box of all matches as a single face once the matching share of
/// samples exceeds `min_ratio`. Crude, but needs no model files.
pub struct SkinToneBackend {
    min_ratio: f64,
    stride: u32,
    warned_grayscale: bool,
}

impl Default for SkinToneBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_RATIO, DEFAULT_STRIDE)
    }
}

impl SkinToneBackend {
    pub fn new(min_ratio: f64, stride: u32) -> Self {
        Self {
            min_ratio,
            stride: stride.max(1),
            warned_grayscale: false,
        }
    }
}

fn is_skin(r: u8, g: u8, b: u8) -> bool {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    r > 95 && g > 40 && b > 20 && max - min > 15 && r.abs_diff(g) > 15 && r > g && r > b
}

impl DetectorBackend for SkinToneBackend {
    fn name(&self) -> &'static str {
        "skin"
    }

    fn detect(&mut self, frame: &DecodedFrame) -> Result<Vec<FaceBox>> {
        if frame.channels < 3 {
            if !self.warned_grayscale {
                log::warn!(
                    "skin backend received {}-channel frames; no faces will be reported",
                    frame.channels
                );
                self.warned_grayscale = true;
            }
            return Ok(Vec::new());
        }

        let mut samples = 0u64;
        let mut matches = 0u64;
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for y in (0..frame.height).step_by(self.stride as usize) {
            for x in (0..frame.width).step_by(self.stride as usize) {
                let Some(px) = frame.pixel(x, y) else {
                    continue;
                };
                samples += 1;
                if !is_skin(px[0], px[1], px[2]) {
                    continue;
                }
                matches += 1;
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }
        }

        if samples == 0 || (matches as f64 / samples as f64) <= self.min_ratio {
            return Ok(Vec::new());
        }
        Ok(bounds
            .map(|(x0, y0, x1, y1)| vec![FaceBox::from_corners(x0, y0, x1, y1)])
            .unwrap_or_default())
    }
}
