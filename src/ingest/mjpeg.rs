//! Multipart HTTP (MJPEG) transport.
//!
//! Opens a streaming GET and scans the body for JPEG start/end markers; the
//! multipart boundaries and part headers are skipped implicitly because only
//! bytes between a matching `FF D8` / `FF D9` pair ever become a frame.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use url::Url;

use super::{FrameSource, MjpegScanner};
use crate::frame::CompressedFrame;
use crate::worker::StopSignal;

type BodyReader = Box<dyn Read + Send + Sync + 'static>;

pub struct MjpegSource {
    url: String,
    chunk_size: usize,
    read_timeout: Duration,
    scanner: Option<MjpegScanner<BodyReader>>,
}

impl MjpegSource {
    pub fn new(url: &str, chunk_size: usize, read_timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(url).context("parse mjpeg url")?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported mjpeg scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        Ok(Self {
            url: url.to_string(),
            chunk_size,
            read_timeout,
            scanner: None,
        })
    }
}

impl FrameSource for MjpegSource {
    fn name(&self) -> &'static str {
        "MjpegReader"
    }

    fn open(&mut self, _stop: &StopSignal) -> Result<()> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(self.read_timeout.max(Duration::from_secs(1)))
            .timeout_read(self.read_timeout)
            .build();
        let response = agent
            .get(&self.url)
            .call()
            .with_context(|| format!("connect to mjpeg stream {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_string();
        if !content_type.to_lowercase().contains("multipart") {
            log::warn!(
                "mjpeg stream {} answered with content type '{}'; scanning anyway",
                self.url,
                content_type
            );
        }
        log::info!("mjpeg stream opened: {} ({})", self.url, content_type);
        self.scanner = Some(MjpegScanner::new(response.into_reader(), self.chunk_size));
        Ok(())
    }

    fn next_frame(&mut self, stop: &StopSignal) -> Result<Option<CompressedFrame>> {
        let scanner = self
            .scanner
            .as_mut()
            .ok_or_else(|| anyhow!("mjpeg source not connected; call open() first"))?;
        scanner.next_frame(stop)
    }

    fn close(&mut self) {
        self.scanner = None;
    }
}
