//! Choice of the next camera to register.

use mvtraj_core::BSplineTrajectory;

use super::config::{ReconstructionConfig, SelectionStrategy};
use super::state::{CameraState, ReconstructionState};

/// Valid detections whose global time falls inside the trajectory.
pub fn overlap(camera: &CameraState, spline: &BSplineTrajectory) -> usize {
    camera
        .detections
        .iter()
        .filter(|d| d.valid && spline.covers(camera.time.to_global(d.frame)))
        .count()
}

/// Unregistered cameras, most preferred first.
///
/// An explicit `camera_sequence` is followed as given. Otherwise
/// `MostOverlap` ranks by [`overlap`] with ties going to the lower index, and
/// `InputOrder` ranks by index.
pub fn candidate_order(state: &ReconstructionState, config: &ReconstructionConfig) -> Vec<usize> {
    if !config.camera_sequence.is_empty() {
        return config
            .camera_sequence
            .iter()
            .copied()
            .filter(|&c| !state.is_registered(c))
            .collect();
    }

    let mut candidates: Vec<usize> = (0..state.cameras.len())
        .filter(|&c| !state.is_registered(c))
        .collect();
    if config.selection == SelectionStrategy::MostOverlap {
        if let Some(traj) = &state.trajectory {
            let scores: Vec<usize> = candidates
                .iter()
                .map(|&c| overlap(&state.cameras[c], &traj.spline))
                .collect();
            let mut ranked: Vec<(usize, usize)> = candidates.iter().copied().zip(scores).collect();
            // Stable sort keeps ascending index among equal scores.
            ranked.sort_by(|a, b| b.1.cmp(&a.1));
            candidates = ranked.into_iter().map(|(c, _)| c).collect();
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconstruction::state::Trajectory;
    use mvtraj_core::{Detection, FxFyCxCySkew, Pt2, Pt3, Real, SplineSegment, TimeModel};

    fn camera(frames: impl Iterator<Item = usize>, time: TimeModel) -> CameraState {
        CameraState {
            name: String::new(),
            intrinsics: FxFyCxCySkew {
                fx: 1.0,
                fy: 1.0,
                cx: 0.0,
                cy: 0.0,
                skew: 0.0,
            },
            fps: 30.0,
            resolution: (640, 480),
            detections: frames
                .map(|f| Detection::new(f as Real, Pt2::origin()))
                .collect(),
            pose: None,
            time,
            rs: 0.0,
            time_prior: None,
        }
    }

    fn state() -> ReconstructionState {
        // Trajectory on [0, 20].
        let ctrl = (0..13).map(|i| Pt3::new(i as Real, 0.0, 0.0)).collect();
        let spline = BSplineTrajectory::new(vec![SplineSegment::new(0.0, 2.0, ctrl).unwrap()]);
        ReconstructionState {
            cameras: vec![
                camera(0..30, TimeModel::identity()),
                camera(0..30, TimeModel::identity()),
                camera(0..30, TimeModel::new(1.0, 15.0)),
                camera(0..30, TimeModel::identity()),
                camera(0..30, TimeModel::new(1.0, -5.0)),
            ],
            sequence: vec![0, 1],
            trajectory: Some(Trajectory {
                samples: Vec::new(),
                spline,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn most_overlap_ranks_with_low_index_tie_break() {
        let state = state();
        let order = candidate_order(&state, &ReconstructionConfig::default());
        // Overlaps: cam 2 -> 6, cam 3 -> 21, cam 4 -> 21.
        assert_eq!(order, vec![3, 4, 2]);
    }

    #[test]
    fn input_order_and_explicit_sequence() {
        let state = state();
        let by_index = ReconstructionConfig {
            selection: SelectionStrategy::InputOrder,
            ..Default::default()
        };
        assert_eq!(candidate_order(&state, &by_index), vec![2, 3, 4]);

        let explicit = ReconstructionConfig {
            camera_sequence: vec![1, 0, 4, 2],
            ..Default::default()
        };
        assert_eq!(candidate_order(&state, &explicit), vec![4, 2]);
    }
}
