//! Topological summaries of persistence diagrams
//!
//! [`TopologySummary`] is the seam for the summary primitives (persistence
//! image, Betti curve, life-entropy curve). The caller controls resolution,
//! bins and limits; the summary only evaluates. [`NativeTopology`] is the
//! in-crate implementation.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Per-axis extrema of a diagram corpus
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// (min, max) of births
    pub xlim: (f64, f64),
    /// (min, max) of deaths
    pub ylim: (f64, f64),
}

impl Limits {
    /// Smallest and largest value on either axis
    pub fn span(&self) -> (f64, f64) {
        (self.xlim.0.min(self.ylim.0), self.xlim.1.max(self.ylim.1))
    }
}

/// Per-axis (min, max) over every point of every diagram
///
/// Births give `xlim`, deaths give `ylim`. Returns `None` when there are no
/// points at all.
pub fn get_limits<'a, I>(diagrams: I) -> Option<Limits>
where
    I: IntoIterator<Item = &'a [[f64; 2]]>,
{
    let mut limits: Option<Limits> = None;

    for [b, d] in diagrams.into_iter().flatten() {
        limits = Some(match limits {
            None => Limits {
                xlim: (*b, *b),
                ylim: (*d, *d),
            },
            Some(l) => Limits {
                xlim: (l.xlim.0.min(*b), l.xlim.1.max(*b)),
                ylim: (l.ylim.0.min(*d), l.ylim.1.max(*d)),
            },
        });
    }

    limits
}

/// Topological summary primitives
pub trait TopologySummary: Send + Sync {
    /// Density image of the diagram on a `resolution × resolution` grid
    ///
    /// Row `i` samples birth `xs[i]`, column `j` samples death `ys[j]`, with
    /// both grids spanning their limits inclusively.
    fn persistence_image_data(
        &self,
        diagram: &[[f64; 2]],
        xlim: (f64, f64),
        ylim: (f64, f64),
        resolution: usize,
    ) -> Vec<Vec<f64>>;

    /// Number of bars alive at each bin
    fn betti_curve(&self, diagram: &[[f64; 2]], bins: &[f64]) -> Vec<f64>;

    /// Entropy of the bars alive at each bin
    fn life_entropy_curve(&self, diagram: &[[f64; 2]], bins: &[f64]) -> Vec<f64>;
}

/// In-crate topological summaries
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeTopology;

impl TopologySummary for NativeTopology {
    fn persistence_image_data(
        &self,
        diagram: &[[f64; 2]],
        xlim: (f64, f64),
        ylim: (f64, f64),
        resolution: usize,
    ) -> Vec<Vec<f64>> {
        let kde = GaussianKde::fit(diagram, grid_step(xlim, resolution), grid_step(ylim, resolution));
        let xs = crate::math::linspace(xlim.0, xlim.1, resolution);
        let ys = crate::math::linspace(ylim.0, ylim.1, resolution);

        xs.iter()
            .map(|x| ys.iter().map(|y| kde.evaluate(*x, *y)).collect())
            .collect()
    }

    fn betti_curve(&self, diagram: &[[f64; 2]], bins: &[f64]) -> Vec<f64> {
        let bars = bars(diagram);
        bins.iter()
            .map(|t| bars.iter().filter(|(s, e)| *s <= *t && *t < *e).count() as f64)
            .collect()
    }

    fn life_entropy_curve(&self, diagram: &[[f64; 2]], bins: &[f64]) -> Vec<f64> {
        let bars = bars(diagram);
        let total: f64 = bars.iter().map(|(s, e)| e - s).sum();

        if total <= 0.0 {
            return vec![0.0; bins.len()];
        }

        let entropy: Vec<f64> = bars
            .iter()
            .map(|(s, e)| {
                let p = (e - s) / total;
                if p > 0.0 {
                    -p * p.ln()
                } else {
                    0.0
                }
            })
            .collect();

        bins.iter()
            .map(|t| {
                bars.iter()
                    .zip(entropy.iter())
                    .filter(|((s, e), _)| *s <= *t && *t < *e)
                    .map(|(_, h)| h)
                    .sum::<f64>()
            })
            .collect()
    }
}

/// Bars as (start, end) with start <= end
fn bars(diagram: &[[f64; 2]]) -> Vec<(f64, f64)> {
    diagram.iter().map(|[b, d]| (b.min(*d), b.max(*d))).collect()
}

/// Grid spacing along one axis, 1.0 when the axis is collapsed
fn grid_step(lim: (f64, f64), resolution: usize) -> f64 {
    let extent = lim.1 - lim.0;
    if resolution > 1 && extent > 0.0 {
        extent / (resolution - 1) as f64
    } else {
        1.0
    }
}

/// Two-dimensional Gaussian kernel density estimate
///
/// Bandwidth follows Scott's rule: the sample covariance scaled by
/// `n^(-1/3)` (factor `n^(-1/6)` squared). When that covariance is singular
/// (a single point, collinear points) a diagonal covariance is used instead,
/// with each variance floored at one grid step squared.
struct GaussianKde {
    points: Vec<[f64; 2]>,
    inv: [[f64; 2]; 2],
    norm: f64,
}

impl GaussianKde {
    fn fit(points: &[[f64; 2]], step_x: f64, step_y: f64) -> Self {
        let n = points.len();
        let factor_sq = if n > 0 {
            (n as f64).powf(-1.0 / 3.0)
        } else {
            1.0
        };

        let (var_x, var_y, cov_xy) = sample_covariance(points);
        let (sxx, syy, sxy) = (var_x * factor_sq, var_y * factor_sq, cov_xy * factor_sq);
        let det = sxx * syy - sxy * sxy;

        let non_degenerate = n > 1
            && sxx > 0.0
            && syy > 0.0
            && det.is_finite()
            && det > 1e-9 * sxx * syy;

        let (sxx, syy, sxy) = if non_degenerate {
            (sxx, syy, sxy)
        } else {
            (sxx.max(step_x * step_x), syy.max(step_y * step_y), 0.0)
        };

        let det = sxx * syy - sxy * sxy;
        let inv = [[syy / det, -sxy / det], [-sxy / det, sxx / det]];
        let norm = if n > 0 {
            1.0 / (2.0 * PI * det.sqrt() * n as f64)
        } else {
            0.0
        };

        GaussianKde {
            points: points.to_vec(),
            inv,
            norm,
        }
    }

    fn evaluate(&self, x: f64, y: f64) -> f64 {
        let sum: f64 = self
            .points
            .iter()
            .map(|[px, py]| {
                let dx = x - px;
                let dy = y - py;
                let q = dx * (self.inv[0][0] * dx + self.inv[0][1] * dy)
                    + dy * (self.inv[1][0] * dx + self.inv[1][1] * dy);
                (-0.5 * q).exp()
            })
            .sum();
        sum * self.norm
    }
}

/// Unbiased sample (var_x, var_y, cov_xy); zeros below two points
fn sample_covariance(points: &[[f64; 2]]) -> (f64, f64, f64) {
    let n = points.len();
    if n < 2 {
        return (0.0, 0.0, 0.0);
    }

    let mean_x = points.iter().map(|p| p[0]).sum::<f64>() / n as f64;
    let mean_y = points.iter().map(|p| p[1]).sum::<f64>() / n as f64;

    let (sxx, syy, sxy) = points.iter().fold((0.0, 0.0, 0.0), |(xx, yy, xy), p| {
        let dx = p[0] - mean_x;
        let dy = p[1] - mean_y;
        (xx + dx * dx, yy + dy * dy, xy + dx * dy)
    });

    let ddof = (n - 1) as f64;
    (sxx / ddof, syy / ddof, sxy / ddof)
}
