use crate::{Pt3, Real, TrajectorySample};
use nalgebra::{RealField, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of control points influencing one span of a cubic B-spline.
pub const SPAN_CONTROL_POINTS: usize = 4;

/// Uniform cubic B-spline basis weights for the local span parameter `u`.
///
/// Generic so that span evaluation can be differentiated with dual numbers.
pub fn cubic_basis<T: RealField>(u: T) -> [T; 4] {
    let one = T::one();
    let six = T::from_f64(6.0).unwrap();
    let three = T::from_f64(3.0).unwrap();
    let u2 = u.clone() * u.clone();
    let u3 = u2.clone() * u.clone();
    let omu = one.clone() - u.clone();
    [
        omu.clone() * omu.clone() * omu / six.clone(),
        (three.clone() * u3.clone() - six.clone() * u2.clone() + T::from_f64(4.0).unwrap())
            / six.clone(),
        (-three.clone() * u3.clone() + three.clone() * u2 + three * u + one) / six.clone(),
        u3 / six,
    ]
}

/// Evaluate one span given its four control points.
pub fn evaluate_span<T: RealField>(ctrl: &[Vector3<T>; 4], u: T) -> Vector3<T> {
    let w = cubic_basis(u);
    ctrl[0].clone() * w[0].clone()
        + ctrl[1].clone() * w[1].clone()
        + ctrl[2].clone() * w[2].clone()
        + ctrl[3].clone() * w[3].clone()
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SplineError {
    #[error("a cubic segment needs at least 4 control points, got {0}")]
    TooFewControlPoints(usize),
    #[error("knot spacing must be positive and finite, got {0}")]
    InvalidKnotSpacing(Real),
}

/// One continuous piece of the trajectory: a uniform cubic B-spline.
///
/// The curve is defined on `[t0, t0 + num_spans * knot_spacing]`; span `i`
/// is controlled by control points `i..i + 4`. Every segment, including a
/// deserialized one, has at least four control points and a positive knot
/// spacing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SegmentRecord")]
pub struct SplineSegment {
    t0: Real,
    knot_spacing: Real,
    control_points: Vec<Pt3>,
}

/// Unchecked wire form of [`SplineSegment`].
#[derive(Deserialize)]
struct SegmentRecord {
    t0: Real,
    knot_spacing: Real,
    control_points: Vec<Pt3>,
}

impl TryFrom<SegmentRecord> for SplineSegment {
    type Error = SplineError;

    fn try_from(r: SegmentRecord) -> Result<Self, Self::Error> {
        Self::new(r.t0, r.knot_spacing, r.control_points)
    }
}

impl SplineSegment {
    pub fn new(
        t0: Real,
        knot_spacing: Real,
        control_points: Vec<Pt3>,
    ) -> Result<Self, SplineError> {
        if !(knot_spacing > 0.0 && knot_spacing.is_finite()) {
            return Err(SplineError::InvalidKnotSpacing(knot_spacing));
        }
        if control_points.len() < SPAN_CONTROL_POINTS {
            return Err(SplineError::TooFewControlPoints(control_points.len()));
        }
        Ok(Self {
            t0,
            knot_spacing,
            control_points,
        })
    }

    pub fn t0(&self) -> Real {
        self.t0
    }

    pub fn knot_spacing(&self) -> Real {
        self.knot_spacing
    }

    pub fn control_points(&self) -> &[Pt3] {
        &self.control_points
    }

    /// Move control points in place; their number is fixed.
    pub fn control_points_mut(&mut self) -> &mut [Pt3] {
        &mut self.control_points
    }

    pub fn num_spans(&self) -> usize {
        self.control_points.len().saturating_sub(SPAN_CONTROL_POINTS - 1)
    }

    pub fn t_end(&self) -> Real {
        self.t0 + self.num_spans() as Real * self.knot_spacing
    }

    pub fn contains(&self, t: Real) -> bool {
        let eps = 1e-9 * self.knot_spacing;
        t >= self.t0 - eps && t <= self.t_end() + eps
    }

    /// Span index and local parameter for `t`.
    ///
    /// Times outside the domain are attached to the first/last span, so `u`
    /// leaves `[0, 1]` and the span polynomial extrapolates.
    pub fn locate(&self, t: Real) -> (usize, Real) {
        let s = (t - self.t0) / self.knot_spacing;
        let last = self.num_spans().saturating_sub(1);
        let span = if s <= 0.0 {
            0
        } else {
            (s.floor() as usize).min(last)
        };
        (span, s - span as Real)
    }

    pub fn evaluate(&self, t: Real) -> Pt3 {
        let (span, u) = self.locate(t);
        let ctrl = self.span_control_points(span);
        Pt3::from(evaluate_span(&ctrl, u))
    }

    pub fn span_control_points(&self, span: usize) -> [Vector3<Real>; 4] {
        let c = &self.control_points[span..span + SPAN_CONTROL_POINTS];
        [c[0].coords, c[1].coords, c[2].coords, c[3].coords]
    }
}

/// Continuous trajectory made of disjoint spline segments in global time.
///
/// Gaps between segments are regions with no reliable observations; the
/// trajectory is undefined there.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BSplineTrajectory {
    pub segments: Vec<SplineSegment>,
}

impl BSplineTrajectory {
    pub fn new(mut segments: Vec<SplineSegment>) -> Self {
        segments.sort_by(|a, b| a.t0.total_cmp(&b.t0));
        Self { segments }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Overall `[start, end]` of the covered global time.
    pub fn domain(&self) -> Option<(Real, Real)> {
        let first = self.segments.first()?;
        let last = self.segments.last()?;
        Some((first.t0, last.t_end()))
    }

    pub fn segment_index(&self, t: Real) -> Option<usize> {
        self.segments.iter().position(|s| s.contains(t))
    }

    pub fn covers(&self, t: Real) -> bool {
        self.segment_index(t).is_some()
    }

    pub fn evaluate(&self, t: Real) -> Option<Pt3> {
        self.segment_index(t).map(|i| self.segments[i].evaluate(t))
    }

    pub fn num_control_points(&self) -> usize {
        self.segments.iter().map(|s| s.control_points.len()).sum()
    }

    /// Evaluate at the given times, skipping the ones outside every segment.
    pub fn sample(&self, times: &[Real]) -> Vec<TrajectorySample> {
        times
            .iter()
            .filter_map(|&t| self.evaluate(t).map(|p| TrajectorySample::new(t, p)))
            .collect()
    }

    /// Resample every segment on the global grid `k * step`.
    pub fn resample(&self, step: Real) -> Vec<TrajectorySample> {
        debug_assert!(step > 0.0, "sampling step must be positive");
        let mut out = Vec::new();
        for seg in &self.segments {
            let k0 = (seg.t0 / step - 1e-9).ceil() as i64;
            let k1 = (seg.t_end() / step + 1e-9).floor() as i64;
            for k in k0..=k1 {
                let t = k as Real * step;
                out.push(TrajectorySample::new(t, seg.evaluate(t)));
            }
        }
        out
    }
}
