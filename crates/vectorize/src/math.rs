//! Vector math over persistence diagrams
//!
//! Pure numeric routines: kernel density evaluation, persistence-point
//! splitting, the legacy kernel-density vector, and the normalization and
//! binning wrappers around the topological summaries.

use neurosim_core::FeatureVector;

use crate::topology::TopologySummary;

/// `num` evenly spaced samples over `[start, end]`, both ends included
pub fn linspace(start: f64, end: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (num - 1) as f64;
            (0..num)
                .map(|i| {
                    if i == num - 1 {
                        end
                    } else {
                        start + step * i as f64
                    }
                })
                .collect()
        }
    }
}

/// Sum of Gaussian kernels evaluated at `x`
///
/// `Σ mass · exp(−(2·width)⁻² · (x − center)²)`. `width` must be > 0;
/// the result is undefined otherwise.
pub fn kernel_density(x: f64, centers: &[f64], masses: &[f64], width: f64) -> f64 {
    let coeff = (2.0 * width).powi(-2);
    centers
        .iter()
        .zip(masses.iter())
        .map(|(c, m)| m * (-coeff * (x - c) * (x - c)).exp())
        .sum()
}

/// Split a diagram into lower and upper persistence points
///
/// Points with `birth >= death` become `(birth, birth - death)` in the lower
/// set; points with `birth <= death` become `(birth, death - birth)` in the
/// upper set. A point with `birth == death` lands in both.
pub fn diagram_to_persistence_points(diagram: &[[f64; 2]]) -> (Vec<[f64; 2]>, Vec<[f64; 2]>) {
    let lower = diagram
        .iter()
        .filter(|[b, d]| b >= d)
        .map(|[b, d]| [*b, b - d])
        .collect();
    let upper = diagram
        .iter()
        .filter(|[b, d]| b <= d)
        .map(|[b, d]| [*b, d - b])
        .collect();
    (lower, upper)
}

/// Kernel density of `points` (center, mass) sampled at every `x`
pub fn evaluate_composed_density(points: &[[f64; 2]], xs: &[f64], width: f64) -> Vec<f64> {
    let centers: Vec<f64> = points.iter().map(|p| p[0]).collect();
    let masses: Vec<f64> = points.iter().map(|p| p[1]).collect();
    xs.iter()
        .map(|x| kernel_density(*x, &centers, &masses, width))
        .collect()
}

/// Legacy kernel-density vector of length exactly `dim`
///
/// The lower half takes the extra slot when `dim` is odd. Each half samples
/// the density of its point set at evenly spaced times over
/// `[0, max_time]`; an empty point set gives zeros.
///
/// `max_height` is carried for interface compatibility and does not clip
/// the density.
pub fn compute_persistence_vector(
    diagram: &[[f64; 2]],
    dim: usize,
    max_time: f64,
    kernel_width: f64,
    _max_height: f64,
) -> FeatureVector {
    let upper_dim = dim / 2;
    let lower_dim = dim - upper_dim;

    let (lower_points, upper_points) = diagram_to_persistence_points(diagram);

    let half = |points: &[[f64; 2]], n: usize| {
        if points.is_empty() {
            vec![0.0; n]
        } else {
            evaluate_composed_density(points, &linspace(0.0, max_time, n), kernel_width)
        }
    };

    let mut vector = half(&lower_points, lower_dim);
    vector.extend(half(&upper_points, upper_dim));
    vector
}

/// Divide every pixel by the image maximum and flatten row-major
///
/// An image whose maximum is not a positive finite number flattens to
/// zeros.
pub fn normalize_flatten(image: &[Vec<f64>]) -> FeatureVector {
    let max = image
        .iter()
        .flatten()
        .fold(f64::NEG_INFINITY, |acc, v| acc.max(*v));

    if !(max.is_finite() && max > 0.0) {
        return vec![0.0; image.iter().map(Vec::len).sum()];
    }

    image.iter().flatten().map(|v| v / max).collect()
}

/// Persistence image of `diagram` over `xlim × ylim`, normalized and flattened
///
/// The result has `resolution²` elements in `[0, 1]`.
pub fn persistence_image(
    summary: &dyn TopologySummary,
    diagram: &[[f64; 2]],
    xlim: (f64, f64),
    ylim: (f64, f64),
    resolution: usize,
) -> FeatureVector {
    let image = summary.persistence_image_data(diagram, xlim, ylim, resolution);
    normalize_flatten(&image)
}

/// Betti curve sampled at `num_bins` points over `range`
pub fn betti_curve(
    summary: &dyn TopologySummary,
    diagram: &[[f64; 2]],
    range: (f64, f64),
    num_bins: usize,
) -> FeatureVector {
    summary.betti_curve(diagram, &linspace(range.0, range.1, num_bins))
}

/// Life-entropy curve sampled at `num_bins` points over `range`
pub fn life_entropy_curve(
    summary: &dyn TopologySummary,
    diagram: &[[f64; 2]],
    range: (f64, f64),
    num_bins: usize,
) -> FeatureVector {
    summary.life_entropy_curve(diagram, &linspace(range.0, range.1, num_bins))
}

/// Divide every vector by the largest component across all of them
///
/// Leaves the vectors untouched when that maximum isn't positive.
pub fn normalize_by_corpus_max<'a, I>(vectors: I) -> f64
where
    I: IntoIterator<Item = &'a mut FeatureVector>,
{
    let vectors: Vec<&mut FeatureVector> = vectors.into_iter().collect();
    let max = vectors
        .iter()
        .flat_map(|v| v.iter())
        .fold(f64::NEG_INFINITY, |acc, x| acc.max(*x));

    if max.is_finite() && max > 0.0 {
        for v in vectors {
            v.iter_mut().for_each(|x| *x /= max);
        }
    }
    max
}
