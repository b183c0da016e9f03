use anyhow::{Result, ensure};
use mvtraj_core::{RansacOptions, RansacVariant, Real};
use mvtraj_optim::bundle::{BundleBackend, BundleOptions};
use mvtraj_optim::spline_fit::SplineFitOptions;
use mvtraj_optim::time_align::{SyncSearchOptions, TimeAlignOptions};
use mvtraj_optim::{RobustKernel, SolveOptions};
use serde::{Deserialize, Serialize};

/// How the next camera is picked when no explicit sequence is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Most valid detections whose global time falls inside the current
    /// trajectory; ties go to the lowest camera index.
    #[default]
    MostOverlap,
    /// Lowest unregistered camera index.
    InputOrder,
}

/// Ground-truth reference carried through to the output untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthConfig {
    pub frequency: Real,
    pub filepath: String,
}

/// Configuration of a reconstruction run.
///
/// Times are in global frames (reference-camera frames), pixel thresholds in
/// pixels unless noted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    // ─────────────────────────────────────────────────────────────────────────
    // Input preparation
    // ─────────────────────────────────────────────────────────────────────────
    /// Keep only detections within the first N seconds of each camera.
    pub cut_detection_second: Option<Real>,
    /// Search each camera's offset against the reference camera before
    /// initialization (cameras with a `time_prior` are skipped).
    pub time_shift: bool,
    pub sync_search: SyncSearchOptions,

    // ─────────────────────────────────────────────────────────────────────────
    // Two-view initialization
    // ─────────────────────────────────────────────────────────────────────────
    /// Sampson threshold of the fundamental-matrix RANSAC, in squared pixels.
    #[serde(alias = "thres_Fmatix")]
    pub thres_fmatrix: Real,
    /// Triangulated points reprojecting worse than this are discarded.
    pub thres_triangulation: Real,
    /// Shared RANSAC settings; thresholds are overridden per use.
    pub ransac: RansacOptions,

    // ─────────────────────────────────────────────────────────────────────────
    // Trajectory
    // ─────────────────────────────────────────────────────────────────────────
    pub smooth_factor: Real,
    pub knot_spacing: Real,
    /// Gaps longer than this split the trajectory into segments.
    pub max_gap: Real,
    /// Step of the discrete trajectory during reconstruction.
    pub sampling_rate: Real,

    // ─────────────────────────────────────────────────────────────────────────
    // Bundle adjustment
    // ─────────────────────────────────────────────────────────────────────────
    /// Sparse tiny-solver by default; the dense backend is for small runs.
    pub ba_backend: BundleBackend,
    pub rolling_shutter: bool,
    /// Bounds of the rolling-shutter delay, in local frames per row.
    pub rs_bounds: (Real, Real),
    pub motion_reg: bool,
    /// Per-axis weights of the motion regularization.
    pub motion_weights: [Real; 3],
    pub robust: RobustKernel,
    pub ba_max_iters: usize,
    /// Detections reprojecting worse than this after adjustment are dropped.
    pub thres_outlier: Real,

    // ─────────────────────────────────────────────────────────────────────────
    // Incremental registration
    // ─────────────────────────────────────────────────────────────────────────
    /// Explicit registration order. The first two entries form the initial
    /// pair; the run stops once all listed cameras are registered.
    pub camera_sequence: Vec<usize>,
    pub selection: SelectionStrategy,
    /// On registration failure, try the remaining cameras in preference order.
    pub registration_fallback: bool,
    pub min_registration_inliers: usize,
    /// PnP inlier threshold.
    pub thres_pnp: Real,
    /// Refine each new camera's time model against the trajectory.
    pub refine_time: bool,
    pub time_align: TimeAlignOptions,

    // ─────────────────────────────────────────────────────────────────────────
    // Output
    // ─────────────────────────────────────────────────────────────────────────
    /// Smooth the final trajectory with a constant-position Kalman filter.
    pub kalman_smoothing: bool,
    pub path_output: Option<String>,
    pub ground_truth: Option<GroundTruthConfig>,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            cut_detection_second: None,
            time_shift: true,
            sync_search: SyncSearchOptions::default(),
            thres_fmatrix: 2.0,
            thres_triangulation: 10.0,
            ransac: RansacOptions {
                max_iters: 1000,
                variant: RansacVariant::LocalOptimization,
                ..RansacOptions::default()
            },
            smooth_factor: 0.01,
            knot_spacing: 2.0,
            max_gap: 10.0,
            sampling_rate: 1.0,
            ba_backend: BundleBackend::TinySolver,
            rolling_shutter: false,
            rs_bounds: (-0.002, 0.002),
            motion_reg: false,
            motion_weights: [1.0; 3],
            robust: RobustKernel::None,
            ba_max_iters: 100,
            thres_outlier: 10.0,
            camera_sequence: Vec::new(),
            selection: SelectionStrategy::MostOverlap,
            registration_fallback: false,
            min_registration_inliers: 20,
            thres_pnp: 5.0,
            refine_time: true,
            time_align: TimeAlignOptions::default(),
            kalman_smoothing: false,
            path_output: None,
            ground_truth: None,
        }
    }
}

impl ReconstructionConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(s) = self.cut_detection_second {
            ensure!(s >= 0.0, "cut_detection_second must be non-negative");
        }
        ensure!(self.thres_fmatrix > 0.0, "thres_fmatrix must be positive");
        ensure!(
            self.thres_triangulation > 0.0,
            "thres_triangulation must be positive"
        );
        ensure!(self.thres_outlier > 0.0, "thres_outlier must be positive");
        ensure!(self.thres_pnp > 0.0, "thres_pnp must be positive");
        ensure!(self.smooth_factor >= 0.0, "smooth_factor must be non-negative");
        ensure!(self.knot_spacing > 0.0, "knot_spacing must be positive");
        ensure!(self.max_gap > 0.0, "max_gap must be positive");
        ensure!(self.sampling_rate > 0.0, "sampling_rate must be positive");
        ensure!(
            self.rs_bounds.0 <= self.rs_bounds.1,
            "rs_bounds must be ordered (got {:?})",
            self.rs_bounds
        );
        ensure!(
            self.motion_weights.iter().all(|w| *w >= 0.0),
            "motion_weights must be non-negative"
        );
        ensure!(self.ba_max_iters > 0, "ba_max_iters must be positive");
        ensure!(self.ransac.max_iters > 0, "ransac.max_iters must be positive");
        ensure!(
            self.min_registration_inliers >= 6,
            "min_registration_inliers must be at least 6 (PnP minimal set)"
        );
        let mut seen = self.camera_sequence.clone();
        seen.sort_unstable();
        seen.dedup();
        ensure!(
            seen.len() == self.camera_sequence.len(),
            "camera_sequence contains duplicates"
        );
        ensure!(
            self.camera_sequence.is_empty() || self.camera_sequence.len() >= 2,
            "camera_sequence needs at least the initial pair"
        );
        Ok(())
    }

    pub fn spline_fit_opts(&self) -> SplineFitOptions {
        SplineFitOptions {
            smooth_factor: self.smooth_factor,
            knot_spacing: self.knot_spacing,
            max_gap: self.max_gap,
            ..SplineFitOptions::default()
        }
    }

    pub fn bundle_opts(&self) -> BundleOptions {
        BundleOptions {
            backend: self.ba_backend,
            rolling_shutter: self.rolling_shutter,
            rs_bounds: self.rs_bounds,
            motion_reg: self.motion_reg,
            motion_weights: self.motion_weights,
            robust: self.robust,
            solve: SolveOptions {
                max_iters: self.ba_max_iters,
                ..SolveOptions::default()
            },
        }
    }

    pub fn fundamental_ransac(&self) -> RansacOptions {
        RansacOptions {
            thresh: self.thres_fmatrix,
            ..self.ransac.clone()
        }
    }

    pub fn pnp_ransac(&self) -> RansacOptions {
        RansacOptions {
            thresh: self.thres_pnp,
            min_inliers: self.min_registration_inliers,
            ..self.ransac.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ReconstructionConfig::default().validate().unwrap();
    }

    #[test]
    fn source_key_spelling_is_accepted() {
        let cfg: ReconstructionConfig = serde_json::from_str(
            r#"{
                "cut_detection_second": 30,
                "thres_Fmatix": 15,
                "smooth_factor": 0.5,
                "rolling_shutter": true,
                "motion_reg": true,
                "motion_weights": [1e-3, 1e-3, 5e-3],
                "rs_bounds": [-0.001, 0.001],
                "thres_outlier": 8,
                "thres_triangulation": 12,
                "sampling_rate": 0.5,
                "path_output": "out.json",
                "ground_truth": {"frequency": 50, "filepath": "gt.txt"}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.thres_fmatrix, 15.0);
        assert_eq!(cfg.cut_detection_second, Some(30.0));
        assert_eq!(cfg.motion_weights, [1e-3, 1e-3, 5e-3]);
        assert_eq!(cfg.path_output.as_deref(), Some("out.json"));
        assert_eq!(cfg.ground_truth.as_ref().map(|g| g.frequency), Some(50.0));
        // Unspecified keys fall back to defaults.
        assert_eq!(cfg.knot_spacing, 2.0);
        cfg.validate().unwrap();
    }

    #[test]
    fn bundle_backend_defaults_to_sparse() {
        assert_eq!(
            ReconstructionConfig::default().bundle_opts().backend,
            BundleBackend::TinySolver
        );
        let cfg: ReconstructionConfig =
            serde_json::from_str(r#"{"ba_backend": "dense_lm", "ba_max_iters": 7}"#).unwrap();
        let opts = cfg.bundle_opts();
        assert_eq!(opts.backend, BundleBackend::DenseLm);
        assert_eq!(opts.solve.max_iters, 7);
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        let bad = [
            ReconstructionConfig {
                sampling_rate: 0.0,
                ..Default::default()
            },
            ReconstructionConfig {
                rs_bounds: (0.01, -0.01),
                ..Default::default()
            },
            ReconstructionConfig {
                camera_sequence: vec![0, 2, 0],
                ..Default::default()
            },
            ReconstructionConfig {
                camera_sequence: vec![1],
                ..Default::default()
            },
            ReconstructionConfig {
                min_registration_inliers: 3,
                ..Default::default()
            },
        ];
        for cfg in bad {
            assert!(cfg.validate().is_err(), "accepted {cfg:?}");
        }
    }

    #[test]
    fn per_use_ransac_thresholds() {
        let cfg = ReconstructionConfig {
            thres_fmatrix: 3.5,
            thres_pnp: 4.0,
            min_registration_inliers: 30,
            ..Default::default()
        };
        assert_eq!(cfg.fundamental_ransac().thresh, 3.5);
        let pnp = cfg.pnp_ransac();
        assert_eq!(pnp.thresh, 4.0);
        assert_eq!(pnp.min_inliers, 30);
        assert_eq!(pnp.seed, cfg.ransac.seed);
    }
}
