use anyhow::{anyhow, Result};

/// Face bounding box in pixel coordinates of the decoded frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceBox {
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
}

impl FaceBox {
    pub fn new(center_x: f64, center_y: f64, width: f64, height: f64) -> Self {
        Self {
            center_x,
            center_y,
            width,
            height,
        }
    }

    /// Box spanning the inclusive pixel rectangle `[x0, x1] x [y0, y1]`.
    pub fn from_corners(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        let width = f64::from(x1.saturating_sub(x0)) + 1.0;
        let height = f64::from(y1.saturating_sub(y0)) + 1.0;
        Self::new(
            f64::from(x0) + width / 2.0,
            f64::from(y0) + height / 2.0,
            width,
            height,
        )
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// A record the control loop can act on: finite values, positive size.
    pub fn validate(&self) -> Result<()> {
        let values = [self.center_x, self.center_y, self.width, self.height];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("face box has non-finite coordinates: {:?}", self));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(anyhow!(
                "face box has non-positive size {}x{}",
                self.width,
                self.height
            ));
        }
        Ok(())
    }
}

/// Outcome of running detection on one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FaceResult {
    Face(FaceBox),
    /// Frame processed, no face found.
    Empty,
}

impl FaceResult {
    /// Keep the largest box by area; `Empty` when there are none.
    pub fn largest(faces: &[FaceBox]) -> Self {
        faces
            .iter()
            .copied()
            .max_by(|a, b| a.area().total_cmp(&b.area()))
            .map(FaceResult::Face)
            .unwrap_or(FaceResult::Empty)
    }

    pub fn face(&self) -> Option<&FaceBox> {
        match self {
            FaceResult::Face(face) => Some(face),
            FaceResult::Empty => None,
        }
    }
}
