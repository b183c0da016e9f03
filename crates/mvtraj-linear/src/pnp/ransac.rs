//! RANSAC-based robust PnP estimation.
//!
//! Wraps the DLT solver in a RANSAC loop for outlier rejection, using pixel
//! reprojection error as the residual.

use super::dlt::{MIN_PNP_POINTS, dlt};
use anyhow::Result;
use mvtraj_core::{Estimator, FxFyCxCySkew, Iso3, Pt2, Pt3, RansacOptions, Real, ransac_fit};

/// One 2D-3D correspondence with the intrinsics of the observing camera.
#[derive(Debug, Clone, Copy)]
pub struct PnpDatum {
    pub world: Pt3,
    pub image: Pt2,
    pub k: FxFyCxCySkew<Real>,
}

/// RANSAC strategy: 6-point DLT fit, pixel reprojection error score.
#[derive(Debug, Clone, Copy)]
pub struct PnpEstimator;

impl Estimator for PnpEstimator {
    type Datum = PnpDatum;
    type Model = Iso3;

    const MIN_SAMPLES: usize = MIN_PNP_POINTS;

    fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
        let (world, image): (Vec<Pt3>, Vec<Pt2>) = sample_indices
            .iter()
            .map(|&i| (data[i].world, data[i].image))
            .unzip();
        dlt(&world, &image, &data[sample_indices[0]].k).ok()
    }

    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
        let pc = model.transform_point(&datum.world);
        match datum.k.project(&pc.coords) {
            Some(uv) => (uv - datum.image).norm(),
            None => f64::INFINITY,
        }
    }
}

/// Robust PnP using DLT inside a RANSAC loop.
///
/// Returns `camera_se3_world` and the inlier mask. Fails when no consensus
/// reaches `opts.min_inliers`.
pub fn dlt_ransac(
    world: &[Pt3],
    image: &[Pt2],
    k: &FxFyCxCySkew<Real>,
    opts: &RansacOptions,
) -> Result<(Iso3, Vec<bool>)> {
    let n = world.len();
    if n < MIN_PNP_POINTS || image.len() != n {
        anyhow::bail!(
            "need at least {MIN_PNP_POINTS} matching 2d-3d correspondences, got {n} world / {} image",
            image.len()
        );
    }

    let data: Vec<PnpDatum> = world
        .iter()
        .zip(image)
        .map(|(&world, &image)| PnpDatum { world, image, k: *k })
        .collect();

    let res = ransac_fit::<PnpEstimator>(&data, opts);
    match res.model {
        Some(pose) if res.success => Ok((pose, res.inlier_mask)),
        _ => anyhow::bail!(
            "ransac failed to find a consensus PnP solution ({} inliers, need {})",
            res.inliers.len(),
            opts.min_inliers
        ),
    }
}
