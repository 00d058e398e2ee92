//! Frame ingestion transports.
//!
//! This module provides the sources that deliver compressed frames:
//! - Stream-chunk: TCP, length-prefixed JPEG frames (`stream`)
//! - Datagram: UDP with fragment reassembly by a collaborator (`datagram`)
//! - Multipart HTTP: MJPEG over a streaming GET (`mjpeg`, feature: ingest-mjpeg)
//!
//! Every source implements `FrameSource`. A single `TransportReader` loop
//! drives whichever source the configuration selects: it decodes each frame,
//! pushes it into the shared `FrameQueue` and reports throughput.
//!
//! A source MUST:
//! - Bound every blocking read by the configured read timeout
//! - Return `Ok(None)` on timeout so the reader can observe its stop signal
//! - Never yield a partial frame

use anyhow::{anyhow, Result};
use serde::Deserialize;

pub mod datagram;
#[cfg(feature = "ingest-mjpeg")]
pub mod mjpeg;
mod reader;
mod scanner;
pub mod stream;

pub use datagram::{DatagramSource, Reassembler, RtpReassembler};
#[cfg(feature = "ingest-mjpeg")]
pub use mjpeg::MjpegSource;
pub use reader::{ReaderSummary, TransportReader};
pub use scanner::{find_jpeg_bounds, MjpegScanner};
pub use stream::{encode_length_prefixed, LengthPrefixedFramer, StreamSource};

use crate::config::TransportSettings;
use crate::frame::CompressedFrame;
use crate::worker::StopSignal;

/// Wire transport carrying the video feed.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stream,
    Datagram,
    Mjpeg,
}

impl std::str::FromStr for TransportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "stream" | "tcp" => Ok(TransportKind::Stream),
            "datagram" | "udp" => Ok(TransportKind::Datagram),
            "mjpeg" | "http" => Ok(TransportKind::Mjpeg),
            other => Err(anyhow!(
                "unknown transport '{}'; expected stream, datagram or mjpeg",
                other
            )),
        }
    }
}

/// A transport that yields whole compressed frames.
pub trait FrameSource: Send {
    /// Short identifier used in statistics lines.
    fn name(&self) -> &'static str;

    /// Bind or connect. Called once, on the reader thread.
    fn open(&mut self, stop: &StopSignal) -> Result<()>;

    /// Next complete frame, or `None` when the read timed out.
    fn next_frame(&mut self, stop: &StopSignal) -> Result<Option<CompressedFrame>>;

    /// Cumulative frames lost in transit, when the transport can tell.
    fn frames_lost(&self) -> u64 {
        0
    }

    /// Release sockets and stop collaborators.
    fn close(&mut self) {}
}

/// Build the source selected by configuration.
pub fn source_from_settings(settings: &TransportSettings) -> Result<Box<dyn FrameSource>> {
    match settings.kind {
        TransportKind::Stream => Ok(Box::new(StreamSource::new(
            settings.stream_addr.clone(),
            settings.read_buffer_size,
            settings.read_timeout,
        ))),
        TransportKind::Datagram => Ok(Box::new(DatagramSource::new(
            settings.datagram_addr.clone(),
            settings.read_timeout,
            Box::new(RtpReassembler::new()),
        ))),
        #[cfg(feature = "ingest-mjpeg")]
        TransportKind::Mjpeg => Ok(Box::new(MjpegSource::new(
            &settings.mjpeg_url,
            settings.read_chunk_size,
            settings.read_timeout,
        )?)),
        #[cfg(not(feature = "ingest-mjpeg"))]
        TransportKind::Mjpeg => Err(anyhow!("mjpeg transport requires the ingest-mjpeg feature")),
    }
}

/// True for the error kinds a read timeout produces.
pub(crate) fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transport_aliases() {
        assert_eq!("tcp".parse::<TransportKind>().unwrap(), TransportKind::Stream);
        assert_eq!("UDP".parse::<TransportKind>().unwrap(), TransportKind::Datagram);
        assert_eq!("mjpeg".parse::<TransportKind>().unwrap(), TransportKind::Mjpeg);
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }

    #[test]
    fn builds_configured_source() {
        let settings = TransportSettings::default();
        let source = source_from_settings(&settings).unwrap();
        assert_eq!(source.name(), "StreamReader");

        let settings = TransportSettings {
            kind: TransportKind::Datagram,
            ..TransportSettings::default()
        };
        assert_eq!(source_from_settings(&settings).unwrap().name(), "DatagramReader");
    }
}
