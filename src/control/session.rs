use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::tracker::{SendReason, Tracker};
use crate::config::ControlSettings;
use crate::ingest::is_timeout;
use crate::queue::FaceQueue;
use crate::stats::{SessionReport, StatsSink};
use crate::worker::StopSignal;

/// Largest robot message read in one receive.
pub const MAX_ACK_BYTES: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlState {
    /// Waiting for the robot to ask for the next command.
    AwaitingAck,
    /// Reading face results until a command is due.
    Processing,
    /// Peer closed the link.
    Disconnected,
}

/// Robot-facing request/response loop for one connection.
///
/// The robot speaks first; every non-empty message earns exactly one
/// command. `S` needs a read timeout (or `WouldBlock` reads) so the stop
/// signal is observed while waiting.
pub struct ControlLoop<S> {
    link: S,
    peer: String,
    tracker: Tracker,
    faces: FaceQueue,
    tick: Duration,
    sink: Arc<dyn StatsSink>,
    state: ControlState,
    started_at: Instant,
    report: SessionReport,
}

impl<S: Read + Write> ControlLoop<S> {
    pub fn new(
        link: S,
        peer: impl Into<String>,
        settings: ControlSettings,
        faces: FaceQueue,
        sink: Arc<dyn StatsSink>,
    ) -> Self {
        let now = Instant::now();
        let peer = peer.into();
        Self {
            link,
            tick: settings.tick,
            tracker: Tracker::new(settings, now),
            faces,
            sink,
            state: ControlState::AwaitingAck,
            started_at: now,
            report: SessionReport {
                peer: peer.clone(),
                ..SessionReport::default()
            },
            peer,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Counters so far; `outcome` and `duration` are filled in by `run`.
    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    /// Advance the state machine by one receive or one processing tick.
    pub fn step(&mut self) -> Result<ControlState> {
        self.state = match self.state {
            ControlState::AwaitingAck => self.await_ack()?,
            ControlState::Processing => self.process_tick()?,
            ControlState::Disconnected => ControlState::Disconnected,
        };
        Ok(self.state)
    }

    /// Drive the loop until the peer disconnects, an error occurs or `stop`
    /// is raised. The session summary goes to the stats sink and is returned.
    pub fn run(mut self, stop: &StopSignal) -> SessionReport {
        log::info!("control session with {} started", self.peer);
        let outcome = loop {
            if stop.is_stopped() {
                break "stopped".to_string();
            }
            match self.step() {
                Ok(ControlState::Disconnected) => break "closed by peer".to_string(),
                Ok(_) => {}
                Err(err) => {
                    log::error!("control session with {} aborted: {:#}", self.peer, err);
                    break format!("aborted ({})", err);
                }
            }
        };

        self.report.outcome = outcome;
        self.report.duration = self.started_at.elapsed();
        self.sink.session(&self.report);
        self.report
    }

    fn await_ack(&mut self) -> Result<ControlState> {
        let mut buf = [0u8; MAX_ACK_BYTES];
        let read = match self.link.read(&mut buf) {
            Ok(read) => read,
            Err(err) if is_timeout(&err) => return Ok(ControlState::AwaitingAck),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {
                return Ok(ControlState::AwaitingAck)
            }
            Err(err) => return Err(err).context("receive from robot"),
        };
        let payload = String::from_utf8_lossy(&buf[..read]);
        let payload = payload.trim();
        if payload.is_empty() {
            log::info!("robot {} disconnected", self.peer);
            return Ok(ControlState::Disconnected);
        }
        if payload != "OK" {
            log::debug!("robot {} sent '{}'; treating as ready", self.peer, payload);
        }
        Ok(ControlState::Processing)
    }

    fn process_tick(&mut self) -> Result<ControlState> {
        let drained = self.faces.wait_latest(self.tick);
        self.report.faces_skipped += drained.discarded as u64;

        let decision = self.tracker.tick(drained.latest.as_ref(), Instant::now())?;
        if drained.latest.as_ref().and_then(|r| r.face()).is_some() {
            self.report.faces_used += 1;
        }
        let Some(sent) = decision else {
            return Ok(ControlState::Processing);
        };
        self.link
            .write_all(sent.command.to_wire().as_bytes())
            .context("send command to robot")?;
        self.link.flush().context("flush robot link")?;

        self.report.commands_sent += 1;
        if sent.reason == SendReason::KeepAlive {
            self.report.keep_alives_sent += 1;
        }
        log::debug!("sent {} to {} ({:?})", sent.command, self.peer, sent.reason);
        Ok(ControlState::AwaitingAck)
    }
}
