use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::frame::ColorMode;
use crate::ingest::TransportKind;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_STREAM_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_READ_BUFFER_SIZE: usize = 16535;
const DEFAULT_DATAGRAM_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_MJPEG_URL: &str = "http://127.0.0.1:9090/stream/video.mjpeg";
const DEFAULT_READ_CHUNK_SIZE: usize = 32768;
const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;
const DEFAULT_STATS_INTERVAL_SECS: u64 = 10;
const DEFAULT_DETECTOR: &str = "skin";
const DEFAULT_FRAME_CAPACITY: usize = 16;
const DEFAULT_FACE_CAPACITY: usize = 16;

const DEFAULT_IMAGE_WIDTH: u32 = 640;
const DEFAULT_IMAGE_HEIGHT: u32 = 480;
const DEFAULT_FOV_X_DEG: f64 = 65.0;
const DEFAULT_FOV_Y_DEG: f64 = 40.0;
const DEFAULT_PAN_MIN_DEG: f64 = 90.0;
const DEFAULT_PAN_MAX_DEG: f64 = 275.0;
const DEFAULT_TILT_MIN_DEG: f64 = -35.0;
const DEFAULT_TILT_MAX_DEG: f64 = 5.0;
const DEFAULT_PAN_START_DEG: f64 = 180.0;
const DEFAULT_TILT_START_DEG: f64 = -15.0;
const DEFAULT_MAX_STEP_DEG: f64 = 20.0;
const DEFAULT_DEADBAND_DEG: f64 = 1.0;
const DEFAULT_KEEP_ALIVE_MS: u64 = 1000;
const DEFAULT_TICK_MS: u64 = 20;

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    listen_addr: Option<String>,
    detector: Option<String>,
    stats_interval_secs: Option<u64>,
    transport: Option<TransportConfigFile>,
    control: Option<ControlConfigFile>,
    queues: Option<QueueConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct TransportConfigFile {
    kind: Option<TransportKind>,
    stream_addr: Option<String>,
    read_buffer_size: Option<usize>,
    datagram_addr: Option<String>,
    mjpeg_url: Option<String>,
    read_chunk_size: Option<usize>,
    read_timeout_ms: Option<u64>,
    color: Option<ColorMode>,
}

#[derive(Debug, Deserialize, Default)]
struct ControlConfigFile {
    fov_x_deg: Option<f64>,
    fov_y_deg: Option<f64>,
    image_width: Option<u32>,
    image_height: Option<u32>,
    pan_min_deg: Option<f64>,
    pan_max_deg: Option<f64>,
    tilt_min_deg: Option<f64>,
    tilt_max_deg: Option<f64>,
    pan_start_deg: Option<f64>,
    tilt_start_deg: Option<f64>,
    max_step_x_deg: Option<f64>,
    max_step_y_deg: Option<f64>,
    deadband_x_deg: Option<f64>,
    deadband_y_deg: Option<f64>,
    keep_alive_ms: Option<u64>,
    tick_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct QueueConfigFile {
    frame_capacity: Option<usize>,
    face_capacity: Option<usize>,
}

/// Immutable process configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Robot control listener.
    pub listen_addr: String,
    /// Detector backend name (see `detect::BackendRegistry`).
    pub detector: String,
    pub stats_interval: Duration,
    pub transport: TransportSettings,
    pub control: ControlSettings,
    pub queues: QueueSettings,
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub kind: TransportKind,
    pub stream_addr: String,
    pub read_buffer_size: usize,
    pub datagram_addr: String,
    pub mjpeg_url: String,
    pub read_chunk_size: usize,
    /// Bounds every blocking transport read, and thus shutdown latency.
    pub read_timeout: Duration,
    pub color: ColorMode,
}

/// Physical limits and pacing for the control loop. Angles in radians.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSettings {
    pub fov_x: f64,
    pub fov_y: f64,
    pub image_width: u32,
    pub image_height: u32,
    pub pan_min: f64,
    pub pan_max: f64,
    pub tilt_min: f64,
    pub tilt_max: f64,
    pub pan_start: f64,
    pub tilt_start: f64,
    pub max_step_x: f64,
    pub max_step_y: f64,
    pub deadband_x: f64,
    pub deadband_y: f64,
    pub keep_alive: Duration,
    /// Longest wait for a face result before re-evaluating keep-alive.
    pub tick: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub frame_capacity: usize,
    pub face_capacity: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::Stream,
            stream_addr: DEFAULT_STREAM_ADDR.to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            datagram_addr: DEFAULT_DATAGRAM_ADDR.to_string(),
            mjpeg_url: DEFAULT_MJPEG_URL.to_string(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            color: ColorMode::Color,
        }
    }
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            fov_x: DEFAULT_FOV_X_DEG.to_radians(),
            fov_y: DEFAULT_FOV_Y_DEG.to_radians(),
            image_width: DEFAULT_IMAGE_WIDTH,
            image_height: DEFAULT_IMAGE_HEIGHT,
            pan_min: DEFAULT_PAN_MIN_DEG.to_radians(),
            pan_max: DEFAULT_PAN_MAX_DEG.to_radians(),
            tilt_min: DEFAULT_TILT_MIN_DEG.to_radians(),
            tilt_max: DEFAULT_TILT_MAX_DEG.to_radians(),
            pan_start: DEFAULT_PAN_START_DEG.to_radians(),
            tilt_start: DEFAULT_TILT_START_DEG.to_radians(),
            max_step_x: DEFAULT_MAX_STEP_DEG.to_radians(),
            max_step_y: DEFAULT_MAX_STEP_DEG.to_radians(),
            deadband_x: DEFAULT_DEADBAND_DEG.to_radians(),
            deadband_y: DEFAULT_DEADBAND_DEG.to_radians(),
            keep_alive: Duration::from_millis(DEFAULT_KEEP_ALIVE_MS),
            tick: Duration::from_millis(DEFAULT_TICK_MS),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            face_capacity: DEFAULT_FACE_CAPACITY,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            detector: DEFAULT_DETECTOR.to_string(),
            stats_interval: Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
            transport: TransportSettings::default(),
            control: ControlSettings::default(),
            queues: QueueSettings::default(),
        }
    }
}

impl ControlSettings {
    pub fn validate(&self) -> Result<()> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(anyhow!("image dimensions must be non-zero"));
        }
        for (name, value) in [("fov_x", self.fov_x), ("fov_y", self.fov_y)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(anyhow!("{} must be a positive angle", name));
            }
        }
        for (axis, min, max, start) in [
            ("pan", self.pan_min, self.pan_max, self.pan_start),
            ("tilt", self.tilt_min, self.tilt_max, self.tilt_start),
        ] {
            if !(min.is_finite() && max.is_finite()) || min >= max {
                return Err(anyhow!("{} min must be below {} max", axis, axis));
            }
            if !(min..=max).contains(&start) {
                return Err(anyhow!("{} start angle lies outside [min, max]", axis));
            }
        }
        for (name, value) in [("max_step_x", self.max_step_x), ("max_step_y", self.max_step_y)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(anyhow!("{} must be positive", name));
            }
        }
        for (name, value) in [("deadband_x", self.deadband_x), ("deadband_y", self.deadband_y)] {
            if !value.is_finite() || value < 0.0 {
                return Err(anyhow!("{} must not be negative", name));
            }
        }
        if self.keep_alive.is_zero() {
            return Err(anyhow!("keep-alive interval must be greater than zero"));
        }
        if self.tick.is_zero() {
            return Err(anyhow!("control tick must be greater than zero"));
        }
        Ok(())
    }
}

impl TrackerConfig {
    /// Load from the file named by `TRACKER_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TRACKER_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => TrackerConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrackerConfigFile) -> Self {
        let defaults = Self::default();
        let transport = file.transport.unwrap_or_default();
        let control = file.control.unwrap_or_default();
        let queues = file.queues.unwrap_or_default();
        let d = defaults.control;
        let deg = |value: Option<f64>, fallback: f64| value.map(f64::to_radians).unwrap_or(fallback);

        Self {
            listen_addr: file.listen_addr.unwrap_or(defaults.listen_addr),
            detector: file.detector.unwrap_or(defaults.detector),
            stats_interval: file
                .stats_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.stats_interval),
            transport: TransportSettings {
                kind: transport.kind.unwrap_or(defaults.transport.kind),
                stream_addr: transport
                    .stream_addr
                    .unwrap_or(defaults.transport.stream_addr),
                read_buffer_size: transport
                    .read_buffer_size
                    .unwrap_or(defaults.transport.read_buffer_size),
                datagram_addr: transport
                    .datagram_addr
                    .unwrap_or(defaults.transport.datagram_addr),
                mjpeg_url: transport.mjpeg_url.unwrap_or(defaults.transport.mjpeg_url),
                read_chunk_size: transport
                    .read_chunk_size
                    .unwrap_or(defaults.transport.read_chunk_size),
                read_timeout: transport
                    .read_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.transport.read_timeout),
                color: transport.color.unwrap_or(defaults.transport.color),
            },
            control: ControlSettings {
                fov_x: deg(control.fov_x_deg, d.fov_x),
                fov_y: deg(control.fov_y_deg, d.fov_y),
                image_width: control.image_width.unwrap_or(d.image_width),
                image_height: control.image_height.unwrap_or(d.image_height),
                pan_min: deg(control.pan_min_deg, d.pan_min),
                pan_max: deg(control.pan_max_deg, d.pan_max),
                tilt_min: deg(control.tilt_min_deg, d.tilt_min),
                tilt_max: deg(control.tilt_max_deg, d.tilt_max),
                pan_start: deg(control.pan_start_deg, d.pan_start),
                tilt_start: deg(control.tilt_start_deg, d.tilt_start),
                max_step_x: deg(control.max_step_x_deg, d.max_step_x),
                max_step_y: deg(control.max_step_y_deg, d.max_step_y),
                deadband_x: deg(control.deadband_x_deg, d.deadband_x),
                deadband_y: deg(control.deadband_y_deg, d.deadband_y),
                keep_alive: control
                    .keep_alive_ms
                    .map(Duration::from_millis)
                    .unwrap_or(d.keep_alive),
                tick: control.tick_ms.map(Duration::from_millis).unwrap_or(d.tick),
            },
            queues: QueueSettings {
                frame_capacity: queues
                    .frame_capacity
                    .unwrap_or(defaults.queues.frame_capacity),
                face_capacity: queues
                    .face_capacity
                    .unwrap_or(defaults.queues.face_capacity),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("TRACKER_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(kind) = non_empty_env("TRACKER_TRANSPORT") {
            self.transport.kind = kind.parse()?;
        }
        if let Some(addr) = non_empty_env("TRACKER_STREAM_ADDR") {
            self.transport.stream_addr = addr;
        }
        if let Some(addr) = non_empty_env("TRACKER_DATAGRAM_ADDR") {
            self.transport.datagram_addr = addr;
        }
        if let Some(url) = non_empty_env("TRACKER_MJPEG_URL") {
            self.transport.mjpeg_url = url;
        }
        if let Some(detector) = non_empty_env("TRACKER_DETECTOR") {
            self.detector = detector;
        }
        if let Some(interval) = non_empty_env("TRACKER_STATS_INTERVAL_SECS") {
            let seconds: u64 = interval.parse().map_err(|_| {
                anyhow!("TRACKER_STATS_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.stats_interval = Duration::from_secs(seconds);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        parse_addr("listen_addr", &self.listen_addr)?;
        match self.transport.kind {
            TransportKind::Stream => {
                parse_addr("stream_addr", &self.transport.stream_addr)?;
            }
            TransportKind::Datagram => {
                parse_addr("datagram_addr", &self.transport.datagram_addr)?;
            }
            TransportKind::Mjpeg => {
                let url = self.transport.mjpeg_url.trim();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(anyhow!("mjpeg_url must be an http(s) url, got '{}'", url));
                }
            }
        }
        if self.transport.read_buffer_size == 0 || self.transport.read_chunk_size == 0 {
            return Err(anyhow!("transport read sizes must be greater than zero"));
        }
        if self.transport.read_timeout.is_zero() {
            return Err(anyhow!("transport read timeout must be greater than zero"));
        }
        if self.queues.frame_capacity == 0 || self.queues.face_capacity == 0 {
            return Err(anyhow!("queue capacities must be greater than zero"));
        }
        if self.detector.trim().is_empty() {
            return Err(anyhow!("detector name must not be empty"));
        }
        self.control.validate()
    }
}

fn read_config_file(path: &Path) -> Result<TrackerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|_| anyhow!("{} must be an ip:port socket address, got '{}'", field, value))
}
