//! Datagram transport.
//!
//! A UDP socket is handed to a `Reassembler` collaborator that turns
//! fragments into whole compressed frames on an internal queue and owns the
//! frame-loss counter. `DatagramSource` only forwards what the collaborator
//! emits; loss is expected and never retried.
//!
//! The shipped collaborator, `RtpReassembler`, reads JPEG over RTP: payloads
//! are concatenated until the marker bit, and a sequence-number gap or an
//! oversized frame discards the frame in progress and counts it as lost.

use anyhow::{anyhow, Context, Result};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{is_timeout, FrameSource};
use crate::frame::{CompressedFrame, MAX_JPEG_BYTES};
use crate::queue::Queue;
use crate::worker::{StopSignal, Worker};

const RTP_JPEG_PAYLOAD_TYPE: u8 = 26;
const RTP_HEADER_BYTES: usize = 12;
const MAX_DATAGRAM_SIZE: usize = 65536;
const REASSEMBLED_QUEUE_CAPACITY: usize = 4;

/// Fragment reassembly collaborator: socket in, whole frames out.
pub trait Reassembler: Send {
    /// Start consuming `socket`, emitting complete frames into `output`.
    fn start(&mut self, socket: UdpSocket, output: Queue<CompressedFrame>) -> Result<()>;

    /// Stop and wait for the collaborator to exit. Idempotent.
    fn stop(&mut self);

    /// Cumulative frames lost.
    fn frames_lost(&self) -> u64;

    /// Why the collaborator exited on its own, if it did. A stopped
    /// collaborator is not a failure.
    fn failure(&self) -> Option<String>;
}

/// UDP source delegating reassembly to a `Reassembler`.
pub struct DatagramSource {
    bind_addr: String,
    read_timeout: Duration,
    reassembler: Box<dyn Reassembler>,
    frames: Queue<CompressedFrame>,
}

impl DatagramSource {
    pub fn new(
        bind_addr: String,
        read_timeout: Duration,
        reassembler: Box<dyn Reassembler>,
    ) -> Self {
        Self {
            bind_addr,
            read_timeout,
            reassembler,
            frames: Queue::new(REASSEMBLED_QUEUE_CAPACITY),
        }
    }
}

impl FrameSource for DatagramSource {
    fn name(&self) -> &'static str {
        "DatagramReader"
    }

    fn open(&mut self, _stop: &StopSignal) -> Result<()> {
        let socket = UdpSocket::bind(&self.bind_addr)
            .with_context(|| format!("bind udp socket on {}", self.bind_addr))?;
        socket
            .set_read_timeout(Some(self.read_timeout))
            .context("set udp read timeout")?;
        log::info!("datagram reader bound to {}", socket.local_addr()?);
        self.reassembler.start(socket, self.frames.clone())
    }

    fn next_frame(&mut self, stop: &StopSignal) -> Result<Option<CompressedFrame>> {
        if stop.is_stopped() {
            // The collaborator must not outlive the read loop.
            self.reassembler.stop();
            return Ok(None);
        }
        if let Some(frame) = self.frames.pop_timeout(self.read_timeout) {
            return Ok(Some(frame));
        }
        match self.reassembler.failure() {
            Some(reason) => Err(anyhow!("datagram reassembler exited: {}", reason)),
            None => Ok(None),
        }
    }

    fn frames_lost(&self) -> u64 {
        self.reassembler.frames_lost()
    }

    fn close(&mut self) {
        self.reassembler.stop();
    }
}

// ----------------------------------------------------------------------------
// RTP/JPEG reassembly
// ----------------------------------------------------------------------------

/// Parsed view of one RTP packet.
#[derive(Debug, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub sequence: u16,
    pub marker: bool,
    pub payload: &'a [u8],
}

/// Why a datagram was not accepted as RTP/JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpError {
    /// Shorter than the header it announces.
    Truncated { needed: usize, got: usize },
    Version(u8),
    PayloadType(u8),
    /// Padding count larger than the payload.
    Padding(usize),
}

impl std::fmt::Display for RtpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RtpError::Truncated { needed, got } => {
                write!(f, "rtp packet truncated: {} of {} header bytes", got, needed)
            }
            RtpError::Version(v) => write!(f, "unsupported rtp version {}", v),
            RtpError::PayloadType(pt) => write!(
                f,
                "payload type {} is not jpeg ({})",
                pt, RTP_JPEG_PAYLOAD_TYPE
            ),
            RtpError::Padding(n) => write!(f, "rtp padding of {} bytes exceeds payload", n),
        }
    }
}

impl std::error::Error for RtpError {}

/// Bytes before the payload: fixed header, CSRC list, optional extension.
fn rtp_header_len(packet: &[u8]) -> Result<usize, RtpError> {
    let truncated = |needed: usize| RtpError::Truncated {
        needed,
        got: packet.len(),
    };
    let fixed = packet.get(..RTP_HEADER_BYTES).ok_or_else(|| truncated(RTP_HEADER_BYTES))?;
    let mut len = RTP_HEADER_BYTES + usize::from(fixed[0] & 0x0F) * 4;
    if fixed[0] & 0x10 != 0 {
        let words = packet
            .get(len + 2..len + 4)
            .ok_or_else(|| truncated(len + 4))?;
        len += 4 + usize::from(u16::from_be_bytes([words[0], words[1]])) * 4;
    }
    if packet.len() < len {
        return Err(truncated(len));
    }
    Ok(len)
}

pub fn parse_rtp_packet(packet: &[u8]) -> Result<RtpPacket<'_>, RtpError> {
    let header_len = rtp_header_len(packet)?;
    let (flags, kind) = (packet[0], packet[1]);
    if flags >> 6 != 2 {
        return Err(RtpError::Version(flags >> 6));
    }
    if kind & 0x7F != RTP_JPEG_PAYLOAD_TYPE {
        return Err(RtpError::PayloadType(kind & 0x7F));
    }

    let mut body = &packet[header_len..];
    if flags & 0x20 != 0 {
        let pad = usize::from(body.last().copied().unwrap_or(0));
        body = body
            .len()
            .checked_sub(pad)
            .map(|keep| &body[..keep])
            .ok_or(RtpError::Padding(pad))?;
    }

    Ok(RtpPacket {
        sequence: u16::from_be_bytes([packet[2], packet[3]]),
        marker: kind & 0x80 != 0,
        payload: body,
    })
}

/// Sequence-checked frame assembly, independent of any socket.
#[derive(Debug)]
pub struct RtpFrameAssembler {
    buffer: Vec<u8>,
    next_sequence: Option<u16>,
    corrupt: bool,
    max_frame_bytes: usize,
    frames_lost: u64,
}

impl Default for RtpFrameAssembler {
    fn default() -> Self {
        Self::new(MAX_JPEG_BYTES)
    }
}

impl RtpFrameAssembler {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            next_sequence: None,
            corrupt: false,
            max_frame_bytes,
            frames_lost: 0,
        }
    }

    pub fn frames_lost(&self) -> u64 {
        self.frames_lost
    }

    /// Feed one packet; returns a frame when the marker packet completes it.
    pub fn push(&mut self, packet: &RtpPacket<'_>) -> Option<Vec<u8>> {
        if self
            .next_sequence
            .is_some_and(|expected| expected != packet.sequence)
        {
            self.corrupt = true;
        }
        self.next_sequence = Some(packet.sequence.wrapping_add(1));

        if !self.corrupt {
            if self.buffer.len() + packet.payload.len() > self.max_frame_bytes {
                self.corrupt = true;
                self.buffer.clear();
            } else {
                self.buffer.extend_from_slice(packet.payload);
            }
        }

        if !packet.marker {
            return None;
        }
        let frame = std::mem::take(&mut self.buffer);
        if std::mem::replace(&mut self.corrupt, false) || frame.is_empty() {
            self.frames_lost += 1;
            return None;
        }
        Some(frame)
    }
}

/// `Reassembler` for JPEG over RTP, running on its own thread.
pub struct RtpReassembler {
    lost: Arc<AtomicU64>,
    failure: Arc<Mutex<Option<String>>>,
    worker: Option<Worker>,
}

impl RtpReassembler {
    pub fn new() -> Self {
        Self {
            lost: Arc::new(AtomicU64::new(0)),
            failure: Arc::new(Mutex::new(None)),
            worker: None,
        }
    }
}

fn record_failure(slot: &Mutex<Option<String>>, reason: String) {
    log::error!("{}", reason);
    if let Ok(mut slot) = slot.lock() {
        slot.get_or_insert(reason);
    }
}

impl Default for RtpReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler for RtpReassembler {
    fn start(&mut self, socket: UdpSocket, output: Queue<CompressedFrame>) -> Result<()> {
        if self.worker.is_some() {
            return Err(anyhow!("rtp reassembler already started"));
        }
        let lost = self.lost.clone();
        let failure = self.failure.clone();
        let worker = Worker::spawn("rtp-reassembler", StopSignal::new(), move |stop| {
            let mut assembler = RtpFrameAssembler::default();
            let mut packet = vec![0u8; MAX_DATAGRAM_SIZE];
            while !stop.is_stopped() {
                let len = match socket.recv_from(&mut packet) {
                    Ok((len, _)) => len,
                    Err(err) if is_timeout(&err) => continue,
                    Err(err) => {
                        record_failure(&failure, format!("udp recv error: {}", err));
                        break;
                    }
                };
                let parsed = match parse_rtp_packet(&packet[..len]) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        log::debug!("ignoring datagram: {}", err);
                        continue;
                    }
                };
                let completed = assembler.push(&parsed);
                lost.store(assembler.frames_lost(), Ordering::Relaxed);
                if let Some(frame) = completed {
                    match output.push(CompressedFrame::new(frame), &stop) {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(err) => {
                            record_failure(
                                &failure,
                                format!("reassembled frame queue failed: {:#}", err),
                            );
                            break;
                        }
                    }
                }
            }
            log::debug!("rtp reassembler stopped");
        })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.shutdown() {
                log::error!("{:#}", err);
            }
        }
    }

    fn frames_lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|slot| slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp(sequence: u16, marker: bool, payload: &[u8]) -> Vec<u8> {
        let marker_bit = if marker { 0x80 } else { 0 };
        let mut packet = vec![0x80, RTP_JPEG_PAYLOAD_TYPE | marker_bit];
        packet.extend_from_slice(&sequence.to_be_bytes());
        packet.extend_from_slice(&[0; 8]);
        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn parses_header_fields() {
        let raw = rtp(7, true, b"abc");
        let packet = parse_rtp_packet(&raw).unwrap();
        assert_eq!(packet.sequence, 7);
        assert!(packet.marker);
        assert_eq!(packet.payload, b"abc");
    }

    #[test]
    fn rejects_foreign_packets() {
        assert_eq!(
            parse_rtp_packet(&[0x80; 4]),
            Err(RtpError::Truncated { needed: 12, got: 4 })
        );
        let mut wrong_version = rtp(1, false, b"x");
        wrong_version[0] = 0x40;
        assert_eq!(parse_rtp_packet(&wrong_version), Err(RtpError::Version(1)));
        let mut wrong_type = rtp(1, false, b"x");
        wrong_type[1] = 96;
        assert_eq!(parse_rtp_packet(&wrong_type), Err(RtpError::PayloadType(96)));
    }

    #[test]
    fn skips_csrc_and_extension_words() {
        let mut raw = rtp(3, false, b"");
        raw[0] |= 0x10 | 0x01;
        raw.extend_from_slice(&[9, 9, 9, 9]);
        raw.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01, 1, 2, 3, 4]);
        raw.extend_from_slice(b"jpeg");
        assert_eq!(parse_rtp_packet(&raw).unwrap().payload, b"jpeg");

        raw.truncate(18);
        assert!(matches!(
            parse_rtp_packet(&raw),
            Err(RtpError::Truncated { .. })
        ));
    }

    #[test]
    fn oversized_padding_is_rejected() {
        let mut raw = rtp(1, true, b"ab");
        raw[0] |= 0x20;
        raw.push(9);
        assert_eq!(parse_rtp_packet(&raw), Err(RtpError::Padding(9)));
    }

    #[test]
    fn strips_padding() {
        let mut raw = rtp(1, true, b"data");
        raw[0] |= 0x20;
        raw.extend_from_slice(&[0, 0, 3]);
        assert_eq!(parse_rtp_packet(&raw).unwrap().payload, b"data");
    }

    #[test]
    fn assembles_fragments_and_counts_gaps() {
        let mut assembler = RtpFrameAssembler::default();
        let packets = [
            rtp(10, false, b"ab"),
            rtp(11, true, b"cd"),
            // 13 is missing: the frame in progress is lost.
            rtp(12, false, b"ef"),
            rtp(14, true, b"gh"),
            rtp(15, false, b"ij"),
            rtp(16, true, b"kl"),
        ];
        let frames: Vec<Vec<u8>> = packets
            .iter()
            .filter_map(|raw| assembler.push(&parse_rtp_packet(raw).unwrap()))
            .collect();
        assert_eq!(frames, vec![b"abcd".to_vec(), b"ijkl".to_vec()]);
        assert_eq!(assembler.frames_lost(), 1);
    }

    #[test]
    fn sequence_wraps_without_loss() {
        let mut assembler = RtpFrameAssembler::default();
        assert!(assembler
            .push(&parse_rtp_packet(&rtp(u16::MAX, false, b"a")).unwrap())
            .is_none());
        let frame = assembler.push(&parse_rtp_packet(&rtp(0, true, b"b")).unwrap());
        assert_eq!(frame, Some(b"ab".to_vec()));
        assert_eq!(assembler.frames_lost(), 0);
    }

    #[test]
    fn oversized_frame_is_lost() {
        let mut assembler = RtpFrameAssembler::new(3);
        assembler.push(&parse_rtp_packet(&rtp(1, false, b"ab")).unwrap());
        assert!(assembler
            .push(&parse_rtp_packet(&rtp(2, true, b"cd")).unwrap())
            .is_none());
        assert_eq!(assembler.frames_lost(), 1);
    }

    #[test]
    fn datagram_source_forwards_reassembled_frames() {
        let free = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = free.local_addr().unwrap();
        drop(free);

        let mut source = DatagramSource::new(
            addr.to_string(),
            Duration::from_millis(50),
            Box::new(RtpReassembler::new()),
        );
        let stop = StopSignal::new();
        source.open(&stop).unwrap();

        let camera = UdpSocket::bind("127.0.0.1:0").unwrap();
        camera.send_to(&rtp(1, false, b"hello "), addr).unwrap();
        camera.send_to(&rtp(2, true, b"world"), addr).unwrap();

        let mut received = None;
        for _ in 0..40 {
            if let Some(frame) = source.next_frame(&stop).unwrap() {
                received = Some(frame.as_bytes().to_vec());
                break;
            }
        }
        assert_eq!(received.as_deref(), Some(b"hello world".as_slice()));
        assert_eq!(source.frames_lost(), 0);

        stop.stop();
        assert!(source.next_frame(&stop).unwrap().is_none());
        source.close();
    }

    /// Collaborator whose thread dies right after starting.
    #[derive(Default)]
    struct DyingReassembler {
        failure: Arc<Mutex<Option<String>>>,
        worker: Option<Worker>,
    }

    impl Reassembler for DyingReassembler {
        fn start(&mut self, _socket: UdpSocket, _output: Queue<CompressedFrame>) -> Result<()> {
            let failure = self.failure.clone();
            self.worker = Some(Worker::spawn("dying", StopSignal::new(), move |_| {
                record_failure(&failure, "socket closed underneath".to_string());
            })?);
            Ok(())
        }

        fn stop(&mut self) {
            if let Some(worker) = self.worker.take() {
                worker.shutdown().unwrap();
            }
        }

        fn frames_lost(&self) -> u64 {
            0
        }

        fn failure(&self) -> Option<String> {
            self.failure.lock().unwrap().clone()
        }
    }

    #[test]
    fn dead_collaborator_surfaces_as_transport_error() {
        let mut source = DatagramSource::new(
            "127.0.0.1:0".to_string(),
            Duration::from_millis(20),
            Box::<DyingReassembler>::default(),
        );
        let stop = StopSignal::new();
        source.open(&stop).unwrap();

        let mut outcome = Ok(None);
        for _ in 0..50 {
            outcome = source.next_frame(&stop);
            if outcome.is_err() {
                break;
            }
        }
        let err = outcome.unwrap_err();
        assert!(format!("{:#}", err).contains("socket closed underneath"));
        source.close();
    }

    #[test]
    fn rtp_reassembler_reports_no_failure_after_stop() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let mut reassembler = RtpReassembler::new();
        reassembler.start(socket, Queue::new(2)).unwrap();
        reassembler.stop();
        assert_eq!(reassembler.failure(), None);
    }
}
