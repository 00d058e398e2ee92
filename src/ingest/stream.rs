//! Stream-chunk transport.
//!
//! The camera connects to a TCP listener and sends frames back to back, each
//! prefixed with its length:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ JPEG bytes (variable)    │
//! │ Big-endian u32   │                          │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! Reads are fixed-size chunks; `LengthPrefixedFramer` reassembles frames
//! regardless of how chunk boundaries fall.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use super::{is_timeout, FrameSource};
use crate::frame::{CompressedFrame, MAX_JPEG_BYTES};
use crate::worker::StopSignal;

const LENGTH_PREFIX_BYTES: usize = 4;
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Prefix `payload` with its big-endian `u32` length.
pub fn encode_length_prefixed(payload: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| anyhow!("frame of {} bytes exceeds u32 length prefix", payload.len()))?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Incremental decoder for length-prefixed frames.
#[derive(Debug)]
pub struct LengthPrefixedFramer {
    buffer: Vec<u8>,
    max_frame_bytes: usize,
}

impl Default for LengthPrefixedFramer {
    fn default() -> Self {
        Self::new(MAX_JPEG_BYTES)
    }
}

impl LengthPrefixedFramer {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_bytes,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete frame. A zero or oversized length is an error:
    /// the stream cannot be resynchronised after it.
    pub fn next_frame(&mut self) -> Result<Option<CompressedFrame>> {
        if self.buffer.len() < LENGTH_PREFIX_BYTES {
            return Ok(None);
        }
        let len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;
        if len == 0 || len > self.max_frame_bytes {
            return Err(anyhow!(
                "invalid frame length {} (max {})",
                len,
                self.max_frame_bytes
            ));
        }
        if self.buffer.len() < LENGTH_PREFIX_BYTES + len {
            return Ok(None);
        }
        let frame = self.buffer[LENGTH_PREFIX_BYTES..LENGTH_PREFIX_BYTES + len].to_vec();
        self.buffer.drain(..LENGTH_PREFIX_BYTES + len);
        Ok(Some(CompressedFrame::new(frame)))
    }
}

/// TCP listener that accepts one camera connection and reads framed JPEGs.
pub struct StreamSource {
    bind_addr: String,
    read_buffer_size: usize,
    read_timeout: Duration,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    framer: LengthPrefixedFramer,
    chunk: Vec<u8>,
}

impl StreamSource {
    pub fn new(bind_addr: String, read_buffer_size: usize, read_timeout: Duration) -> Self {
        Self {
            bind_addr,
            read_buffer_size: read_buffer_size.max(1),
            read_timeout,
            listener: None,
            stream: None,
            framer: LengthPrefixedFramer::default(),
            chunk: Vec::new(),
        }
    }

    /// Poll for the camera connection so the stop signal stays observable.
    fn accept(&mut self, stop: &StopSignal) -> Result<bool> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| anyhow!("stream source not opened"))?;
        loop {
            if stop.is_stopped() {
                return Ok(false);
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    stream
                        .set_nonblocking(false)
                        .context("set camera stream blocking")?;
                    stream
                        .set_read_timeout(Some(self.read_timeout))
                        .context("set camera stream read timeout")?;
                    log::info!("camera stream connected from {}", peer);
                    self.stream = Some(stream);
                    return Ok(true);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(err) => return Err(err).context("accept camera stream"),
            }
        }
    }
}

impl FrameSource for StreamSource {
    fn name(&self) -> &'static str {
        "StreamReader"
    }

    fn open(&mut self, _stop: &StopSignal) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_addr)
            .with_context(|| format!("bind camera stream listener on {}", self.bind_addr))?;
        listener
            .set_nonblocking(true)
            .context("set camera listener non-blocking")?;
        log::info!("waiting for camera stream on {}", listener.local_addr()?);
        self.listener = Some(listener);
        self.chunk = vec![0u8; self.read_buffer_size];
        Ok(())
    }

    fn next_frame(&mut self, stop: &StopSignal) -> Result<Option<CompressedFrame>> {
        if let Some(frame) = self.framer.next_frame()? {
            return Ok(Some(frame));
        }
        if self.stream.is_none() && !self.accept(stop)? {
            return Ok(None);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        let read = match stream.read(&mut self.chunk) {
            Ok(read) => read,
            Err(err) if is_timeout(&err) => return Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => return Ok(None),
            Err(err) => return Err(err).context("read camera stream"),
        };
        if read == 0 {
            return Err(anyhow!(
                "camera stream closed ({} bytes unframed)",
                self.framer.buffered_len()
            ));
        }
        self.framer.extend(&self.chunk[..read]);
        self.framer.next_frame()
    }

    fn close(&mut self) {
        self.stream = None;
        self.listener = None;
    }
}
