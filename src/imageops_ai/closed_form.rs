//! Closed-form alpha matting.
//!
//! Alpha is the minimiser of `αᵀLα + λ(α - t)ᵀD(α - t)` where `L` is the matting
//! Laplacian over 3x3 colour windows, `D` selects the trimap's known pixels and
//! `t` is 1 on known foreground. The Laplacian is never materialised: every
//! window keeps its mean colour and inverse regularised covariance, which is
//! enough to apply `L` to a vector in one pass.

use ndarray::prelude::*;
use tracing::{debug, trace};

use crate::errors::{BgStripError, Result};

const EPSILON: f64 = 1e-7;
const LAMBDA: f64 = 100.0;
const TOLERANCE: f64 = 1e-7;
const MAX_ITERATIONS: usize = 10_000;
const RADIUS: usize = 1;
const WINDOW_AREA: f64 = ((2 * RADIUS + 1) * (2 * RADIUS + 1)) as f64;

const FOREGROUND_LEVEL: f64 = 0.9;
const BACKGROUND_LEVEL: f64 = 0.1;

struct Window {
    x: usize,
    y: usize,
    mean: [f64; 3],
    inverse: [[f64; 3]; 3],
}

struct MattingSystem {
    width: usize,
    colors: Vec<[f64; 3]>,
    known: Vec<bool>,
    windows: Vec<Window>,
}

/// Estimate alpha for an image with channels in `[0, 1]` (`h x w x 3`) and a trimap
/// in `[0, 1]` (`h x w`).
///
/// Fails with `BgStripError::Matting` when the trimap lacks definite foreground or
/// background, or when the image is smaller than one window.
pub fn estimate_alpha(image: ArrayView3<f64>, trimap: ArrayView2<f64>) -> Result<Array2<f64>> {
    let (height, width) = trimap.dim();
    if image.dim() != (height, width, 3) {
        return Err(BgStripError::matting(format!(
            "image shape {:?} does not match trimap shape {:?}",
            image.dim(),
            trimap.dim()
        )));
    }

    let is_foreground: Vec<bool> = trimap.iter().map(|&t| t > FOREGROUND_LEVEL).collect();
    let is_background: Vec<bool> = trimap.iter().map(|&t| t < BACKGROUND_LEVEL).collect();
    if !is_foreground.contains(&true) {
        return Err(BgStripError::matting("trimap contains no foreground pixels"));
    }
    if !is_background.contains(&true) {
        return Err(BgStripError::matting("trimap contains no background pixels"));
    }
    let window_side = 2 * RADIUS + 1;
    if width < window_side || height < window_side {
        return Err(BgStripError::matting(format!(
            "{width}x{height} image is smaller than the {window_side}x{window_side} matting window"
        )));
    }

    let colors = image
        .outer_iter()
        .flat_map(|row| {
            row.outer_iter()
                .map(|px| [px[0], px[1], px[2]])
                .collect::<Vec<_>>()
        })
        .collect();
    let known = is_foreground
        .iter()
        .zip(&is_background)
        .map(|(&f, &b)| f || b)
        .collect();

    let system = MattingSystem::new(width, height, colors, known);
    let rhs: Vec<f64> = is_foreground
        .iter()
        .map(|&f| if f { LAMBDA } else { 0.0 })
        .collect();

    let solution = system.solve(&rhs);
    let alpha = solution.into_iter().map(|v| v.clamp(0.0, 1.0)).collect();
    Ok(Array2::from_shape_vec((height, width), alpha)?)
}

impl MattingSystem {
    fn new(width: usize, height: usize, colors: Vec<[f64; 3]>, known: Vec<bool>) -> Self {
        let mut windows = Vec::new();
        for y in RADIUS..height - RADIUS {
            for x in RADIUS..width - RADIUS {
                let fully_known = window_pixels(x, y, width).all(|i| known[i]);
                if fully_known {
                    continue;
                }

                let mut mean = [0.0; 3];
                let mut second = [[0.0; 3]; 3];
                for i in window_pixels(x, y, width) {
                    let c = colors[i];
                    for a in 0..3 {
                        mean[a] += c[a];
                        for b in 0..3 {
                            second[a][b] += c[a] * c[b];
                        }
                    }
                }
                mean.iter_mut().for_each(|m| *m /= WINDOW_AREA);

                let mut covariance = [[0.0; 3]; 3];
                for a in 0..3 {
                    for b in 0..3 {
                        covariance[a][b] = second[a][b] / WINDOW_AREA - mean[a] * mean[b];
                    }
                    covariance[a][a] += EPSILON / WINDOW_AREA;
                }

                windows.push(Window {
                    x,
                    y,
                    mean,
                    inverse: invert_symmetric(&covariance),
                });
            }
        }
        debug!(windows = windows.len(), "built matting laplacian");

        Self {
            width,
            colors,
            known,
            windows,
        }
    }

    fn len(&self) -> usize {
        self.colors.len()
    }

    /// `out = (L + λD) p`
    fn apply(&self, p: &[f64], out: &mut [f64]) {
        for ((o, &v), &k) in out.iter_mut().zip(p).zip(&self.known) {
            *o = if k { LAMBDA * v } else { 0.0 };
        }

        for window in &self.windows {
            let mut sum = 0.0;
            let mut weighted = [0.0; 3];
            for i in window_pixels(window.x, window.y, self.width) {
                let c = centered(self.colors[i], window.mean);
                sum += p[i];
                for a in 0..3 {
                    weighted[a] += c[a] * p[i];
                }
            }
            let g = mat_vec(&window.inverse, weighted);

            for i in window_pixels(window.x, window.y, self.width) {
                let c = centered(self.colors[i], window.mean);
                out[i] += p[i] - (sum + dot(c, g)) / WINDOW_AREA;
            }
        }
    }

    fn diagonal(&self) -> Vec<f64> {
        let mut diagonal: Vec<f64> = self
            .known
            .iter()
            .map(|&k| if k { LAMBDA } else { 0.0 })
            .collect();
        for window in &self.windows {
            for i in window_pixels(window.x, window.y, self.width) {
                let c = centered(self.colors[i], window.mean);
                let quadratic = dot(c, mat_vec(&window.inverse, c));
                diagonal[i] += 1.0 - (1.0 + quadratic) / WINDOW_AREA;
            }
        }
        diagonal
    }

    /// Jacobi-preconditioned conjugate gradient starting from zero.
    fn solve(&self, rhs: &[f64]) -> Vec<f64> {
        let n = self.len();
        let inverse_diagonal: Vec<f64> = self
            .diagonal()
            .into_iter()
            .map(|d| if d > 0.0 { 1.0 / d } else { 1.0 })
            .collect();

        let mut x = vec![0.0; n];
        let mut residual = rhs.to_vec();
        let mut z: Vec<f64> = residual.iter().zip(&inverse_diagonal).map(|(r, m)| r * m).collect();
        let mut direction = z.clone();
        let mut product = vec![0.0; n];
        let mut rz = dot_slices(&residual, &z);

        let threshold = TOLERANCE * dot_slices(rhs, rhs).sqrt();
        for iteration in 0..MAX_ITERATIONS {
            if dot_slices(&residual, &residual).sqrt() <= threshold {
                trace!(iteration, "conjugate gradient converged");
                break;
            }

            self.apply(&direction, &mut product);
            let curvature = dot_slices(&direction, &product);
            if curvature <= 0.0 || !curvature.is_finite() {
                debug!(iteration, "conjugate gradient stopped on degenerate direction");
                break;
            }
            let step = rz / curvature;
            for i in 0..n {
                x[i] += step * direction[i];
                residual[i] -= step * product[i];
            }

            for i in 0..n {
                z[i] = residual[i] * inverse_diagonal[i];
            }
            let rz_next = dot_slices(&residual, &z);
            let beta = rz_next / rz;
            rz = rz_next;
            for i in 0..n {
                direction[i] = z[i] + beta * direction[i];
            }
        }
        x
    }
}

fn window_pixels(x: usize, y: usize, width: usize) -> impl Iterator<Item = usize> {
    (y - RADIUS..=y + RADIUS)
        .flat_map(move |wy| (x - RADIUS..=x + RADIUS).map(move |wx| wy * width + wx))
}

fn centered(color: [f64; 3], mean: [f64; 3]) -> [f64; 3] {
    [color[0] - mean[0], color[1] - mean[1], color[2] - mean[2]]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn dot_slices(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn mat_vec(m: &[[f64; 3]; 3], v: [f64; 3]) -> [f64; 3] {
    [dot(m[0], v), dot(m[1], v), dot(m[2], v)]
}

/// Inverse of a symmetric positive definite 3x3 matrix via cofactors.
fn invert_symmetric(m: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let c00 = m[1][1] * m[2][2] - m[1][2] * m[2][1];
    let c01 = m[1][2] * m[2][0] - m[1][0] * m[2][2];
    let c02 = m[1][0] * m[2][1] - m[1][1] * m[2][0];
    let c11 = m[0][0] * m[2][2] - m[0][2] * m[2][0];
    let c12 = m[0][2] * m[1][0] - m[0][0] * m[1][2];
    let c22 = m[0][0] * m[1][1] - m[0][1] * m[1][0];

    let determinant = m[0][0] * c00 + m[0][1] * c01 + m[0][2] * c02;
    let inv = 1.0 / determinant;
    [
        [c00 * inv, c01 * inv, c02 * inv],
        [c01 * inv, c11 * inv, c12 * inv],
        [c02 * inv, c12 * inv, c22 * inv],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Left half white, right half black, known strips at both ends.
    fn split_fixture(width: usize, height: usize) -> (Array3<f64>, Array2<f64>) {
        let image = Array3::from_shape_fn((height, width, 3), |(_, x, _)| {
            if x < width / 2 {
                1.0
            } else {
                0.0
            }
        });
        let trimap = Array2::from_shape_fn((height, width), |(_, x)| {
            if x < 3 {
                1.0
            } else if x >= width - 3 {
                0.0
            } else {
                0.5
            }
        });
        (image, trimap)
    }

    #[test]
    fn test_alpha_follows_colour_boundary() {
        let (image, trimap) = split_fixture(16, 8);
        let alpha = estimate_alpha(image.view(), trimap.view()).unwrap();

        assert_eq!(alpha.dim(), (8, 16));
        assert!(alpha[[4, 0]] > 0.95);
        assert!(alpha[[4, 15]] < 0.05);
        // unknown pixels take the label of their colour region
        assert!(alpha[[4, 6]] > 0.8);
        assert!(alpha[[4, 10]] < 0.2);
        assert!(alpha.iter().all(|&a| (0.0..=1.0).contains(&a)));
    }

    #[test]
    fn test_missing_foreground_is_matting_error() {
        let image = Array3::<f64>::zeros((8, 8, 3));
        let trimap = Array2::<f64>::from_elem((8, 8), 0.5);
        let err = estimate_alpha(image.view(), trimap.view()).unwrap_err();
        assert!(matches!(err, BgStripError::Matting { .. }));
    }

    #[test]
    fn test_missing_background_is_matting_error() {
        let image = Array3::<f64>::zeros((8, 8, 3));
        let trimap = Array2::<f64>::from_elem((8, 8), 1.0);
        let err = estimate_alpha(image.view(), trimap.view()).unwrap_err();
        assert!(matches!(err, BgStripError::Matting { .. }));
    }

    #[test]
    fn test_tiny_image_is_matting_error() {
        let image = Array3::<f64>::zeros((2, 2, 3));
        let trimap = array![[1.0, 0.0], [0.5, 0.5]];
        let err = estimate_alpha(image.view(), trimap.view()).unwrap_err();
        assert!(matches!(err, BgStripError::Matting { .. }));
    }

    #[test]
    fn test_laplacian_annihilates_constants() {
        let (image, trimap) = split_fixture(8, 6);
        let (height, width) = trimap.dim();
        let colors = image
            .outer_iter()
            .flat_map(|row| row.outer_iter().map(|px| [px[0], px[1], px[2]]).collect::<Vec<_>>())
            .collect();
        let system = MattingSystem::new(width, height, colors, vec![false; width * height]);

        let ones = vec![1.0; width * height];
        let mut out = vec![0.0; width * height];
        system.apply(&ones, &mut out);
        assert!(out.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_invert_symmetric() {
        let m = [[4.0, 1.0, 0.0], [1.0, 3.0, 0.5], [0.0, 0.5, 2.0]];
        let inv = invert_symmetric(&m);
        for a in 0..3 {
            let row = mat_vec(&inv, [m[0][a], m[1][a], m[2][a]]);
            for (b, value) in row.iter().enumerate() {
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((value - expected).abs() < 1e-12);
            }
        }
    }
}
