use crate::{Pt2, Pt3, Real};
use serde::{Deserialize, Serialize};

/// Linear mapping from a camera's local clock to the global timeline.
///
/// `global = alpha * local + beta`, with `local` measured in the camera's
/// own frame indices and `global` in frames of the reference camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeModel {
    /// Time scale (ratio of reference to local frame rate).
    pub alpha: Real,
    /// Time offset in global units.
    pub beta: Real,
}

impl Default for TimeModel {
    fn default() -> Self {
        Self::identity()
    }
}

impl TimeModel {
    pub fn new(alpha: Real, beta: Real) -> Self {
        Self { alpha, beta }
    }

    pub fn identity() -> Self {
        Self {
            alpha: 1.0,
            beta: 0.0,
        }
    }

    /// Prior from frame rates: one local frame spans `fps_ref / fps` global frames.
    pub fn from_frame_rates(fps_ref: Real, fps: Real) -> Self {
        Self {
            alpha: fps_ref / fps,
            beta: 0.0,
        }
    }

    pub fn to_global(&self, local: Real) -> Real {
        self.alpha * local + self.beta
    }

    pub fn to_local(&self, global: Real) -> Real {
        (global - self.beta) / self.alpha
    }

    /// Global capture time of a pixel row under a rolling shutter.
    ///
    /// `rs` is the readout delay per image row, in local frames.
    pub fn capture_time(&self, frame: Real, row: Real, rs: Real) -> Real {
        self.to_global(frame + rs * row)
    }
}

/// Wire layout of a detection: `[frame, u, v]`.
pub type RawDetection = [Real; 3];

/// A single 2D observation of the moving object.
///
/// The corresponding 3D sample is the trajectory evaluated at the detection's
/// global capture time. `valid` is cleared by outlier removal and never set
/// again.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Local frame index (may be fractional).
    pub frame: Real,
    /// Observed pixel position.
    pub pixel: Pt2,
    #[serde(default = "default_valid")]
    pub valid: bool,
}

fn default_valid() -> bool {
    true
}

impl Detection {
    pub fn new(frame: Real, pixel: Pt2) -> Self {
        Self {
            frame,
            pixel,
            valid: true,
        }
    }

    /// Build from the `[frame, u, v]` wire layout.
    pub fn from_raw(raw: RawDetection) -> Self {
        Self::new(raw[0], Pt2::new(raw[1], raw[2]))
    }

    pub fn to_raw(&self) -> RawDetection {
        [self.frame, self.pixel.x, self.pixel.y]
    }
}

/// Discrete trajectory sample `(global_time, X, Y, Z)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySample {
    pub time: Real,
    pub point: Pt3,
}

impl TrajectorySample {
    pub fn new(time: Real, point: Pt3) -> Self {
        Self { time, point }
    }
}
