//! Robot connection supervisor.
//!
//! Serves one robot at a time. Per connection it builds fresh queues, a
//! detector backend and a frame source, runs the transport reader and the
//! detector on worker threads and the control loop on the accepting thread.
//! Teardown order: control loop ends, workers are stopped and joined, and
//! only then is the robot socket closed.

use anyhow::{Context, Result};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{TrackerConfig, TransportSettings};
use crate::control::ControlLoop;
use crate::detect::{BackendRegistry, DetectorBackend, DetectorWorker};
use crate::frame::FrameDecoder;
use crate::ingest::{source_from_settings, FrameSource, TransportReader};
use crate::queue::{FaceQueue, FrameQueue};
use crate::stats::{log_sink, SessionReport, StatsSink};
use crate::worker::{StopSignal, Worker};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const ROBOT_READ_TIMEOUT: Duration = Duration::from_millis(250);

pub type SourceFactory =
    Arc<dyn Fn(&TransportSettings) -> Result<Box<dyn FrameSource>> + Send + Sync>;
pub type DetectorFactory = Arc<dyn Fn(&str) -> Result<Box<dyn DetectorBackend>> + Send + Sync>;

pub struct ConnectionSupervisor {
    config: TrackerConfig,
    listener: TcpListener,
    sources: SourceFactory,
    detectors: DetectorFactory,
    sink: Arc<dyn StatsSink>,
    sessions: Arc<AtomicU64>,
}

/// Handle to a supervisor running on its own thread.
pub struct SupervisorHandle {
    pub addr: SocketAddr,
    sessions: Arc<AtomicU64>,
    worker: Worker,
}

impl SupervisorHandle {
    /// Connections fully torn down so far.
    pub fn sessions_served(&self) -> u64 {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn stop(self) -> Result<()> {
        self.worker.shutdown()
    }
}

impl ConnectionSupervisor {
    /// Validate `config` and bind the robot listener. Failure here is a
    /// startup error.
    pub fn bind(config: TrackerConfig) -> Result<Self> {
        config.validate().context("invalid tracker config")?;
        let listener = TcpListener::bind(&config.listen_addr)
            .with_context(|| format!("bind robot listener on {}", config.listen_addr))?;
        listener
            .set_nonblocking(true)
            .context("set robot listener non-blocking")?;

        let registry = BackendRegistry::with_defaults();
        Ok(Self {
            config,
            listener,
            sources: Arc::new(|settings: &TransportSettings| source_from_settings(settings)),
            detectors: Arc::new(move |name: &str| registry.create(name)),
            sink: log_sink(),
            sessions: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn with_source_factory(mut self, factory: SourceFactory) -> Self {
        self.sources = factory;
        self
    }

    pub fn with_detector_factory(mut self, factory: DetectorFactory) -> Self {
        self.detectors = factory;
        self
    }

    pub fn with_stats_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("robot listener address")
    }

    /// Run the accept loop on a dedicated thread.
    pub fn spawn(self) -> Result<SupervisorHandle> {
        let addr = self.local_addr()?;
        let sessions = self.sessions.clone();
        let worker = Worker::spawn("supervisor", StopSignal::new(), move |stop| {
            if let Err(err) = self.run(&stop) {
                log::error!("supervisor stopped: {:#}", err);
            }
        })?;
        Ok(SupervisorHandle {
            addr,
            sessions,
            worker,
        })
    }

    /// Accept and serve robots one at a time until `shutdown` is raised.
    pub fn run(&self, shutdown: &StopSignal) -> Result<()> {
        log::info!("waiting for robot on {}", self.local_addr()?);
        while !shutdown.is_stopped() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    log::info!("robot connected from {}", peer);
                    match self.serve(stream, peer, shutdown) {
                        Ok(report) => {
                            log::info!("robot {} session ended: {}", peer, report.outcome)
                        }
                        Err(err) => log::error!("robot {} session failed: {:#}", peer, err),
                    }
                    self.sessions.fetch_add(1, Ordering::SeqCst);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err).context("accept robot connection"),
            }
        }
        log::info!("supervisor shutting down");
        Ok(())
    }

    fn serve(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: &StopSignal,
    ) -> Result<SessionReport> {
        stream
            .set_nonblocking(false)
            .context("set robot socket blocking")?;
        stream.set_nodelay(true).context("disable nagle on robot socket")?;
        stream
            .set_read_timeout(Some(ROBOT_READ_TIMEOUT))
            .context("set robot read timeout")?;

        let cfg = &self.config;
        let frames = FrameQueue::new(cfg.queues.frame_capacity);
        let faces = FaceQueue::new(cfg.queues.face_capacity);
        let backend = (self.detectors)(&cfg.detector).context("create detector backend")?;
        let source = (self.sources)(&cfg.transport).context("create frame source")?;

        let workers_stop = StopSignal::new();
        let detector = DetectorWorker::new(
            backend,
            frames.clone(),
            faces.clone(),
            cfg.stats_interval,
        )
        .spawn(workers_stop.clone())?;
        let reader = TransportReader::new(
            source,
            FrameDecoder::new(cfg.transport.color),
            frames,
            cfg.stats_interval,
            self.sink.clone(),
        )
        .spawn(workers_stop.clone())?;

        let control = ControlLoop::new(
            &stream,
            peer.to_string(),
            cfg.control.clone(),
            faces,
            self.sink.clone(),
        );
        let report = control.run(shutdown);

        workers_stop.stop();
        for worker in [reader, detector] {
            let name = worker.name().to_string();
            if let Err(err) = worker.join() {
                log::error!("{}: {:#}", name, err);
            }
        }
        drop(stream);
        Ok(report)
    }
}
