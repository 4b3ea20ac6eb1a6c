//! Multilevel foreground estimation.
//!
//! Given an image and its alpha matte, recover foreground colours `F` (and the
//! background `B`) such that `I ≈ αF + (1 - α)B` while keeping both smooth where
//! alpha is smooth. The solve runs coarse to fine so that colour information
//! propagates across large transparent areas in a few iterations.

use ndarray::prelude::*;

const REGULARIZATION: f64 = 1e-5;
const GRADIENT_WEIGHT: f64 = 1.0;
const SMALL_SIZE: usize = 32;
const SMALL_ITERATIONS: usize = 10;
const BIG_ITERATIONS: usize = 2;

const NEIGHBOURS: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

/// Foreground colours for an `h x w x c` image in `[0, 1]` and an `h x w` alpha matte.
pub fn estimate_foreground(image: ArrayView3<f64>, alpha: ArrayView2<f64>) -> Array3<f64> {
    estimate_foreground_background(image, alpha).0
}

pub fn estimate_foreground_background(
    image: ArrayView3<f64>,
    alpha: ArrayView2<f64>,
) -> (Array3<f64>, Array3<f64>) {
    let (h0, w0, depth) = image.dim();
    let mut foreground = Array3::<f64>::zeros((1, 1, depth));
    let mut background = Array3::<f64>::zeros((1, 1, depth));

    let largest = w0.max(h0).max(1);
    let levels = (largest as f64).log2().ceil() as usize;

    for level in 0..=levels {
        let (w, h) = if levels == 0 {
            (w0, h0)
        } else {
            let t = level as f64 / levels as f64;
            (
                ((w0 as f64).powf(t).round() as usize).max(1),
                ((h0 as f64).powf(t).round() as usize).max(1),
            )
        };

        let level_image = resize_nearest(image, w, h);
        let level_alpha = resize_nearest(alpha.insert_axis(Axis(2)), w, h).remove_axis(Axis(2));
        foreground = resize_nearest(foreground.view(), w, h);
        background = resize_nearest(background.view(), w, h);

        let iterations = if w <= SMALL_SIZE && h <= SMALL_SIZE {
            SMALL_ITERATIONS
        } else {
            BIG_ITERATIONS
        };
        for _ in 0..iterations {
            update_level(
                level_image.view(),
                level_alpha.view(),
                &mut foreground,
                &mut background,
            );
        }
    }

    (foreground, background)
}

/// One Gauss-Seidel sweep over every pixel of a level.
fn update_level(
    image: ArrayView3<f64>,
    alpha: ArrayView2<f64>,
    foreground: &mut Array3<f64>,
    background: &mut Array3<f64>,
) {
    let (h, w, depth) = image.dim();
    let mut bf = vec![0.0; depth];
    let mut bb = vec![0.0; depth];

    for y in 0..h {
        for x in 0..w {
            let a0 = alpha[[y, x]];
            let a1 = 1.0 - a0;
            let mut a00 = a0 * a0;
            let a01 = a0 * a1;
            let mut a11 = a1 * a1;

            for c in 0..depth {
                bf[c] = a0 * image[[y, x, c]];
                bb[c] = a1 * image[[y, x, c]];
            }

            for (dx, dy) in NEIGHBOURS {
                let x2 = x.saturating_add_signed(dx).min(w - 1);
                let y2 = y.saturating_add_signed(dy).min(h - 1);
                let gradient = (a0 - alpha[[y2, x2]]).abs();
                let da = REGULARIZATION + GRADIENT_WEIGHT * gradient;
                a00 += da;
                a11 += da;
                for c in 0..depth {
                    bf[c] += da * foreground[[y2, x2, c]];
                    bb[c] += da * background[[y2, x2, c]];
                }
            }

            let inverse_determinant = 1.0 / (a00 * a11 - a01 * a01);
            let b00 = inverse_determinant * a11;
            let b01 = inverse_determinant * -a01;
            let b11 = inverse_determinant * a00;
            for c in 0..depth {
                foreground[[y, x, c]] = (b00 * bf[c] + b01 * bb[c]).clamp(0.0, 1.0);
                background[[y, x, c]] = (b01 * bf[c] + b11 * bb[c]).clamp(0.0, 1.0);
            }
        }
    }
}

fn resize_nearest(source: ArrayView3<f64>, width: usize, height: usize) -> Array3<f64> {
    let (old_height, old_width, depth) = source.dim();
    Array3::from_shape_fn((height, width, depth), |(y, x, c)| {
        let sy = (y * old_height / height).min(old_height - 1);
        let sx = (x * old_width / width).min(old_width - 1);
        source[[sy, sx, c]]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_alpha_recovers_image() {
        let image = Array3::from_shape_fn((12, 20, 3), |(y, x, c)| {
            ((x + y + c) % 5) as f64 / 4.0
        });
        let alpha = Array2::<f64>::ones((12, 20));

        let foreground = estimate_foreground(image.view(), alpha.view());
        assert_eq!(foreground.dim(), (12, 20, 3));
        for (f, i) in foreground.iter().zip(image.iter()) {
            assert!((f - i).abs() < 1e-3);
        }
    }

    #[test]
    fn test_foreground_stays_in_unit_range() {
        let image = Array3::from_shape_fn((9, 9, 3), |(y, x, _)| if x > y { 1.0 } else { 0.0 });
        let alpha = Array2::from_shape_fn((9, 9), |(_, x)| x as f64 / 8.0);

        let (foreground, background) = estimate_foreground_background(image.view(), alpha.view());
        assert!(foreground.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(background.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_single_pixel_image() {
        let image = Array3::from_elem((1, 1, 3), 0.5);
        let alpha = Array2::from_elem((1, 1), 1.0);
        let foreground = estimate_foreground(image.view(), alpha.view());
        assert!((foreground[[0, 0, 0]] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_resize_nearest_upsamples_blocks() {
        let source = array![[[0.0], [1.0]], [[2.0], [3.0]]];
        let resized = resize_nearest(source.view(), 4, 4);
        assert_eq!(resized[[0, 1, 0]], 0.0);
        assert_eq!(resized[[0, 2, 0]], 1.0);
        assert_eq!(resized[[3, 3, 0]], 3.0);
    }
}
