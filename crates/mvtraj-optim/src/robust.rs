use mvtraj_core::Real;
use serde::{Deserialize, Serialize};

/// Robust loss applied to reprojection residuals through IRLS row scaling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RobustKernel {
    /// Plain squared loss.
    #[default]
    None,
    /// Quadratic up to `delta` pixels, linear beyond.
    Huber { delta: Real },
    /// `c^2 * ln(1 + r^2 / c^2)`.
    Cauchy { c: Real },
}

impl RobustKernel {
    /// Loss `rho(r^2)` and IRLS weight `w` for a squared residual norm.
    ///
    /// Rows of one observation are scaled by `sqrt(w)` before the linear solve.
    pub fn rho_and_weight(self, r2: Real) -> (Real, Real) {
        match self {
            RobustKernel::None => (r2, 1.0),
            RobustKernel::Huber { delta } => {
                let r = r2.sqrt();
                if r <= delta {
                    (r2, 1.0)
                } else {
                    (2.0 * delta * r - delta * delta, delta / r)
                }
            }
            RobustKernel::Cauchy { c } => {
                let t = r2 / (c * c);
                (c * c * (1.0 + t).ln(), 1.0 / (1.0 + t))
            }
        }
    }

    /// `sqrt(w)` for a block of residual rows sharing one weight.
    pub fn row_scale(self, block: &[Real]) -> Real {
        let r2: Real = block.iter().map(|v| v * v).sum();
        self.rho_and_weight(r2).1.sqrt()
    }
}
