//! Frame types and JPEG decoding.
//!
//! - `CompressedFrame`: JPEG bytes as delivered by a transport.
//! - `DecodedFrame`: immutable raster produced by `FrameDecoder`.
//!
//! Decoding is pure: one compressed frame in, one decoded frame (or an error) out.

use anyhow::{anyhow, Context, Result};
use image::{GenericImageView, ImageFormat};
use serde::Deserialize;
use std::time::Instant;

/// Upper bound on a single compressed frame accepted from any transport.
pub const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

// ----------------------------------------------------------------------------
// CompressedFrame
// ----------------------------------------------------------------------------

/// Opaque JPEG payload. Consumed exactly once by `FrameDecoder::decode`.
#[derive(Debug)]
pub struct CompressedFrame {
    bytes: Vec<u8>,
}

impl CompressedFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for CompressedFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

// ----------------------------------------------------------------------------
// DecodedFrame
// ----------------------------------------------------------------------------

/// Decoded raster, row-major with interleaved channels. Immutable after creation.
#[derive(Debug)]
pub struct DecodedFrame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// Monotonic decode instant (for latency diagnostics).
    decoded_at: Instant,
}

impl DecodedFrame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, channels: u8) -> Result<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if pixels.len() != expected {
            return Err(anyhow!(
                "pixel buffer has {} bytes, expected {} for {}x{}x{}",
                pixels.len(),
                expected,
                width,
                height,
                channels
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            channels,
            decoded_at: Instant::now(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Channel values of the pixel at (x, y), or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let stride = self.channels as usize;
        let offset = (y as usize * self.width as usize + x as usize) * stride;
        self.pixels.get(offset..offset + stride)
    }

    pub fn age_ms(&self) -> u128 {
        self.decoded_at.elapsed().as_millis()
    }
}

// ----------------------------------------------------------------------------
// FrameDecoder
// ----------------------------------------------------------------------------

/// Output pixel layout of the decoder.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Color,
    Grayscale,
}

impl ColorMode {
    pub fn channels(self) -> u8 {
        match self {
            ColorMode::Color => 3,
            ColorMode::Grayscale => 1,
        }
    }
}

impl std::str::FromStr for ColorMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "color" | "rgb" => Ok(ColorMode::Color),
            "grayscale" | "gray" => Ok(ColorMode::Grayscale),
            other => Err(anyhow!(
                "unknown color mode '{}'; expected color or grayscale",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameDecoder {
    mode: ColorMode,
}

impl FrameDecoder {
    pub fn new(mode: ColorMode) -> Self {
        Self { mode }
    }

    pub fn decode(&self, frame: &CompressedFrame) -> Result<DecodedFrame> {
        if frame.is_empty() {
            return Err(anyhow!("empty jpeg frame"));
        }
        let image = image::load_from_memory_with_format(frame.as_bytes(), ImageFormat::Jpeg)
            .context("decode jpeg frame")?;
        let (width, height) = image.dimensions();
        let pixels = match self.mode {
            ColorMode::Color => image.into_rgb8().into_raw(),
            ColorMode::Grayscale => image.into_luma8().into_raw(),
        };
        DecodedFrame::new(pixels, width, height, self.mode.channels())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use std::io::Cursor;

    /// Encode a solid-colour JPEG for tests.
    pub(crate) fn jpeg_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb(rgb));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
            .expect("encode jpeg");
        out
    }

    #[test]
    fn decodes_color_frame() {
        let decoder = FrameDecoder::new(ColorMode::Color);
        let frame = decoder
            .decode(&CompressedFrame::new(jpeg_bytes(16, 8, [200, 10, 10])))
            .unwrap();
        assert_eq!((frame.width, frame.height, frame.channels), (16, 8, 3));
        assert_eq!(frame.pixels().len(), 16 * 8 * 3);
        let px = frame.pixel(3, 3).unwrap();
        assert!(px[0] > 150 && px[1] < 60);
    }

    #[test]
    fn decodes_grayscale_frame() {
        let decoder = FrameDecoder::new(ColorMode::Grayscale);
        let frame = decoder
            .decode(&CompressedFrame::new(jpeg_bytes(8, 8, [128, 128, 128])))
            .unwrap();
        assert_eq!(frame.channels, 1);
        assert_eq!(frame.pixels().len(), 64);
    }

    #[test]
    fn rejects_garbage_and_empty_input() {
        let decoder = FrameDecoder::default();
        assert!(decoder.decode(&CompressedFrame::new(vec![])).is_err());
        assert!(decoder
            .decode(&CompressedFrame::new(vec![0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]))
            .is_err());
    }

    #[test]
    fn sequence_decodes_one_to_one() {
        let decoder = FrameDecoder::default();
        let widths = [8u32, 16, 24];
        let decoded: Vec<u32> = widths
            .iter()
            .map(|w| {
                decoder
                    .decode(&CompressedFrame::new(jpeg_bytes(*w, 8, [0, 0, 0])))
                    .unwrap()
                    .width
            })
            .collect();
        assert_eq!(decoded, widths);
    }

    #[test]
    fn pixel_lookup_is_bounds_checked() {
        let frame = DecodedFrame::new(vec![0; 2 * 2 * 3], 2, 2, 3).unwrap();
        assert!(frame.pixel(1, 1).is_some());
        assert!(frame.pixel(2, 0).is_none());
        assert!(DecodedFrame::new(vec![0; 5], 2, 2, 3).is_err());
    }

    #[test]
    fn age_grows_from_decode_time() {
        let frame = DecodedFrame::new(vec![0; 3], 1, 1, 3).unwrap();
        let first = frame.age_ms();
        std::thread::sleep(std::time::Duration::from_millis(15));
        assert!(frame.age_ms() >= first + 10);
    }

    #[test]
    fn parses_color_mode() {
        assert_eq!("Gray".parse::<ColorMode>().unwrap(), ColorMode::Grayscale);
        assert_eq!("color".parse::<ColorMode>().unwrap(), ColorMode::Color);
        assert!("sepia".parse::<ColorMode>().is_err());
    }
}
