//! Constant-position Kalman filter for the final trajectory.

use mvtraj_core::{Mat3, Real, TrajectorySample, Vec3};
use serde::{Deserialize, Serialize};

/// Kalman filter with identity transition and observation models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstantPositionKalman {
    /// Process noise variance per axis.
    pub process_noise: Real,
    /// Measurement noise variance per axis.
    pub measurement_noise: Real,
}

impl Default for ConstantPositionKalman {
    fn default() -> Self {
        Self {
            process_noise: 0.1,
            measurement_noise: 2.5,
        }
    }
}

impl ConstantPositionKalman {
    /// Filter one contiguous run of samples in time order.
    pub fn filter(&self, samples: &[TrajectorySample]) -> Vec<TrajectorySample> {
        let Some(first) = samples.first() else {
            return Vec::new();
        };
        let q = Mat3::identity() * self.process_noise;
        let r = Mat3::identity() * self.measurement_noise;

        let mut x: Vec3 = first.point.coords;
        let mut p = r;
        let mut out = Vec::with_capacity(samples.len());
        out.push(*first);
        for s in &samples[1..] {
            let p_pred = p + q;
            let Some(s_inv) = (p_pred + r).try_inverse() else {
                out.push(*s);
                continue;
            };
            let gain = p_pred * s_inv;
            x += gain * (s.point.coords - x);
            p = (Mat3::identity() - gain) * p_pred;
            out.push(TrajectorySample::new(s.time, x.into()));
        }
        out
    }

    /// Filter each run separately, restarting wherever consecutive samples
    /// are more than `max_step` apart.
    pub fn filter_runs(&self, samples: &[TrajectorySample], max_step: Real) -> Vec<TrajectorySample> {
        let mut out = Vec::with_capacity(samples.len());
        let mut start = 0;
        for i in 1..=samples.len() {
            if i == samples.len() || samples[i].time - samples[i - 1].time > max_step {
                out.extend(self.filter(&samples[start..i]));
                start = i;
            }
        }
        out
    }
}
