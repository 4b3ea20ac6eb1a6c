use image::{GrayImage, Luma};

pub const TRIMAP_FOREGROUND: u8 = 255;
pub const TRIMAP_BACKGROUND: u8 = 0;
pub const TRIMAP_UNKNOWN: u8 = 128;

/// Build a three-level trimap from a soft foreground mask.
///
/// Pixels strictly above `foreground_threshold` are candidate foreground, strictly
/// below `background_threshold` candidate background. Both regions are eroded with
/// an `erode_size` square; whatever is left uncertain becomes `TRIMAP_UNKNOWN`.
pub fn build(
    mask: &GrayImage,
    foreground_threshold: u8,
    background_threshold: u8,
    erode_size: u32,
) -> GrayImage {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize, height as usize);

    let mut is_foreground: Vec<bool> =
        mask.pixels().map(|p| p.0[0] > foreground_threshold).collect();
    let mut is_background: Vec<bool> =
        mask.pixels().map(|p| p.0[0] < background_threshold).collect();

    if erode_size > 0 {
        let size = erode_size as usize;
        is_foreground = erode(&is_foreground, w, h, size, false);
        is_background = erode(&is_background, w, h, size, true);
    }

    GrayImage::from_fn(width, height, |x, y| {
        let i = y as usize * w + x as usize;
        if is_foreground[i] {
            Luma([TRIMAP_FOREGROUND])
        } else if is_background[i] {
            Luma([TRIMAP_BACKGROUND])
        } else {
            Luma([TRIMAP_UNKNOWN])
        }
    })
}

/// Binary erosion with a `size x size` square whose origin sits at `size / 2`.
///
/// `border` is the value assumed for samples outside the image.
pub fn erode(region: &[bool], width: usize, height: usize, size: usize, border: bool) -> Vec<bool> {
    let before = size / 2;
    let after = size - 1 - before;

    let mut rows = vec![false; region.len()];
    for y in 0..height {
        let line = &region[y * width..(y + 1) * width];
        erode_line(line, before, after, border, &mut rows[y * width..(y + 1) * width]);
    }

    let mut out = vec![false; region.len()];
    let mut column = vec![false; height];
    let mut eroded = vec![false; height];
    for x in 0..width {
        for y in 0..height {
            column[y] = rows[y * width + x];
        }
        erode_line(&column, before, after, border, &mut eroded);
        for y in 0..height {
            out[y * width + x] = eroded[y];
        }
    }
    out
}

/// One-dimensional erosion: `out[i]` is true iff every sample in `i-before ..= i+after` is true.
fn erode_line(line: &[bool], before: usize, after: usize, border: bool, out: &mut [bool]) {
    let len = line.len();
    // misses[i] = number of false samples in line[..i]
    let mut misses = Vec::with_capacity(len + 1);
    misses.push(0usize);
    for &v in line {
        let last = misses[misses.len() - 1];
        misses.push(last + usize::from(!v));
    }

    for (i, slot) in out.iter_mut().enumerate() {
        let outside = i < before || i + after >= len;
        if outside && !border {
            *slot = false;
            continue;
        }
        let lo = i.saturating_sub(before);
        let hi = (i + after + 1).min(len);
        *slot = misses[hi] == misses[lo];
    }
}
