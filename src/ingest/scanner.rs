//! JPEG boundary scanning over a byte stream.
//!
//! `MjpegScanner` keeps a rolling buffer, slices out exactly one frame when a
//! start-of-image marker (`FF D8`) is followed by an end-of-image marker
//! (`FF D9`), and discards everything up to and including that end marker.

use anyhow::{anyhow, Context, Result};
use std::io::Read;

use super::is_timeout;
use crate::frame::{CompressedFrame, MAX_JPEG_BYTES};
use crate::worker::StopSignal;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

pub struct MjpegScanner<R> {
    reader: R,
    buffer: Vec<u8>,
    chunk: Vec<u8>,
}

impl<R: Read> MjpegScanner<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(chunk_size.max(1) * 2),
            chunk: vec![0u8; chunk_size.max(1)],
        }
    }

    /// Bytes currently held after the last extracted frame.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Extract a complete frame already in the buffer, without reading.
    pub fn take_buffered_frame(&mut self) -> Option<CompressedFrame> {
        let (start, end) = find_jpeg_bounds(&self.buffer)?;
        let frame = self.buffer[start..end].to_vec();
        self.buffer.drain(..end);
        Some(CompressedFrame::new(frame))
    }

    /// Read until one complete frame is available.
    ///
    /// Returns `Ok(None)` if a read timed out or `stop` was raised before a
    /// frame was complete; bytes read so far stay buffered. End of stream is
    /// an error.
    pub fn next_frame(&mut self, stop: &StopSignal) -> Result<Option<CompressedFrame>> {
        loop {
            if let Some(frame) = self.take_buffered_frame() {
                return Ok(Some(frame));
            }
            if stop.is_stopped() {
                return Ok(None);
            }

            let read = match self.reader.read(&mut self.chunk) {
                Ok(read) => read,
                Err(err) if is_timeout(&err) => return Ok(None),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err).context("read mjpeg chunk"),
            };
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&self.chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                log::warn!(
                    "no complete jpeg within {} bytes; discarding buffer",
                    self.buffer.len()
                );
                // Keep one byte: it may be the 0xFF of a split marker.
                let drain_len = self.buffer.len() - 1;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

/// Locate the first `[SOI, EOI + 2)` span, with EOI searched after SOI.
pub fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = find_marker(buffer, 0, SOI)?;
    let end = find_marker(buffer, start + 2, EOI)?;
    Some((start, end + 2))
}

fn find_marker(buffer: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
    if from >= buffer.len() {
        return None;
    }
    buffer[from..]
        .windows(2)
        .position(|pair| pair == marker)
        .map(|pos| pos + from)
}
