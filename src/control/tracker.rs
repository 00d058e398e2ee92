//! Pure pan/tilt tracking math. No I/O; time is passed in.

use anyhow::{Context, Result};
use std::fmt;
use std::time::Instant;

use crate::config::ControlSettings;
use crate::detect::{FaceBox, FaceResult};

/// Servo position in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ServoAngles {
    pub pan: f64,
    pub tilt: f64,
}

/// One command on the robot link.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AngleCommand {
    pub pan: f64,
    pub tilt: f64,
}

impl AngleCommand {
    /// Wire form: `(<pan>,<tilt>)` and a newline.
    pub fn to_wire(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for AngleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.pan, self.tilt)
    }
}

impl From<ServoAngles> for AngleCommand {
    fn from(angles: ServoAngles) -> Self {
        Self {
            pan: angles.pan,
            tilt: angles.tilt,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendReason {
    /// An axis moved past its deadband.
    Movement,
    /// Nothing moved but the keep-alive interval elapsed.
    KeepAlive,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transmission {
    pub command: AngleCommand,
    pub reason: SendReason,
}

/// Clamp `value` into `[min, max]` by bound assignment.
pub fn clamp_angle(value: f64, min: f64, max: f64) -> f64 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Per-connection servo state plus the last-sent baseline.
#[derive(Debug)]
pub struct Tracker {
    settings: ControlSettings,
    angles: ServoAngles,
    last_sent: ServoAngles,
    last_sent_at: Instant,
}

impl Tracker {
    /// Start at the configured start angles; the baseline counts as sent at `now`.
    pub fn new(settings: ControlSettings, now: Instant) -> Self {
        let angles = ServoAngles {
            pan: clamp_angle(settings.pan_start, settings.pan_min, settings.pan_max),
            tilt: clamp_angle(settings.tilt_start, settings.tilt_min, settings.tilt_max),
        };
        Self {
            settings,
            angles,
            last_sent: angles,
            last_sent_at: now,
        }
    }

    pub fn angles(&self) -> ServoAngles {
        self.angles
    }

    pub fn last_sent(&self) -> ServoAngles {
        self.last_sent
    }

    /// Angular offset of the face from the image centre, clamped per axis to
    /// `±|max_step|`. Returns `(dx, dy)`.
    pub fn angle_delta(&self, face: &FaceBox) -> (f64, f64) {
        let s = &self.settings;
        let width = f64::from(s.image_width);
        let height = f64::from(s.image_height);
        let dx = (width / 2.0 - face.center_x) * s.fov_x / width;
        let dy = (height / 2.0 - face.center_y) * s.fov_y / height;
        let (step_x, step_y) = (s.max_step_x.abs(), s.max_step_y.abs());
        (
            clamp_angle(dx, -step_x, step_x),
            clamp_angle(dy, -step_y, step_y),
        )
    }

    /// Move toward `face` and clamp to the servo limits.
    pub fn apply(&mut self, face: &FaceBox) -> Result<ServoAngles> {
        face.validate().context("malformed detection record")?;
        let (dx, dy) = self.angle_delta(face);
        let s = &self.settings;
        self.angles.pan = clamp_angle(self.angles.pan + dx, s.pan_min, s.pan_max);
        self.angles.tilt = clamp_angle(self.angles.tilt - dy, s.tilt_min, s.tilt_max);
        Ok(self.angles)
    }

    /// One control tick: apply the newest result (if any) and decide whether
    /// a command goes out. Sending moves the baseline to the new angles.
    pub fn tick(
        &mut self,
        latest: Option<&FaceResult>,
        now: Instant,
    ) -> Result<Option<Transmission>> {
        if let Some(FaceResult::Face(face)) = latest {
            self.apply(face)?;
        }

        let s = &self.settings;
        let moved = (self.angles.pan - self.last_sent.pan).abs() > s.deadband_x
            || (self.angles.tilt - self.last_sent.tilt).abs() > s.deadband_y;
        let reason = if moved {
            SendReason::Movement
        } else if now.saturating_duration_since(self.last_sent_at) > s.keep_alive {
            SendReason::KeepAlive
        } else {
            return Ok(None);
        };

        self.last_sent = self.angles;
        self.last_sent_at = now;
        Ok(Some(Transmission {
            command: self.angles.into(),
            reason,
        }))
    }
}
