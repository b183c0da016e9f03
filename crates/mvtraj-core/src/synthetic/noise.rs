//! Deterministic corruption of synthetic detections.
//!
//! Every `(camera, frame)` pair owns an independent splitmix64 stream, so the
//! fate of one detection does not depend on which other detections were
//! generated, and scenes stay identical across platforms and `rand` versions.

use crate::{Pt2, Real, Vec2};
use std::f64::consts::TAU;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// What became of one clean projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Corruption {
    /// The detector missed the object in this frame.
    Missed,
    /// Jittered but correct.
    Inlier(Pt2),
    /// Jittered, then displaced by `outlier_offset_px` in a random direction.
    Outlier(Pt2),
}

impl Corruption {
    pub fn pixel(&self) -> Option<Pt2> {
        match *self {
            Corruption::Missed => None,
            Corruption::Inlier(px) | Corruption::Outlier(px) => Some(px),
        }
    }
}

/// Detector imperfections applied to synthetic projections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionNoise {
    pub seed: u64,
    /// Uniform per-axis jitter in `[-jitter_px, jitter_px]`.
    pub jitter_px: Real,
    /// Probability that a detection is a gross outlier.
    pub outlier_ratio: Real,
    pub outlier_offset_px: Real,
    /// Probability that a frame has no detection at all.
    pub miss_ratio: Real,
}

impl Default for DetectionNoise {
    fn default() -> Self {
        Self {
            seed: 0,
            jitter_px: 0.0,
            outlier_ratio: 0.0,
            outlier_offset_px: 40.0,
            miss_ratio: 0.0,
        }
    }
}

impl DetectionNoise {
    /// Jitter only.
    pub fn jitter(seed: u64, jitter_px: Real) -> Self {
        Self {
            seed,
            jitter_px,
            ..Self::default()
        }
    }

    pub fn corrupt(&self, camera: usize, frame: usize, clean: Pt2) -> Corruption {
        let mut stream = Stream::new(self.seed, camera, frame);
        // Fixed draw order: enabling one effect never reshuffles the others.
        let miss = stream.unit();
        let (jx, jy) = (stream.unit(), stream.unit());
        let gross = stream.unit();
        let heading = TAU * stream.unit();

        if miss < self.miss_ratio {
            return Corruption::Missed;
        }
        let a = self.jitter_px.abs();
        let px = clean + Vec2::new((2.0 * jx - 1.0) * a, (2.0 * jy - 1.0) * a);
        if gross < self.outlier_ratio {
            let offset = Vec2::new(heading.cos(), heading.sin()) * self.outlier_offset_px;
            Corruption::Outlier(px + offset)
        } else {
            Corruption::Inlier(px)
        }
    }
}

/// splitmix64 sequence keyed by `(seed, camera, frame)`.
struct Stream(u64);

impl Stream {
    fn new(seed: u64, camera: usize, frame: usize) -> Self {
        let key = seed
            ^ (camera as u64).wrapping_mul(GOLDEN_GAMMA)
            ^ (frame as u64).rotate_left(32).wrapping_mul(0xD1B5_4A32_D192_ED03);
        Self(finalize(key))
    }

    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(GOLDEN_GAMMA);
        finalize(self.0)
    }

    /// Uniform in `[0, 1)` from the top 53 bits.
    fn unit(&mut self) -> Real {
        (self.next_u64() >> 11) as Real / (1u64 << 53) as Real
    }
}

fn finalize(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
