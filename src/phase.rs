//! Phase correlation for tracking shake detection fields
//!
//! Phase correlation finds the translation between two patches by:
//! 1. Normalizing each patch to [0, 1] and applying a 2D Hann window
//! 2. Computing the normalized cross-power spectrum of their FFTs
//! 3. Locating the peak of its inverse FFT
//! 4. Refining the peak to sub-pixel accuracy from its direct neighbours

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::geometry::Rect;
use crate::imaging::{crop_gray, GrayF32};

/// Spectrum bins weaker than this carry no usable phase
const MIN_SPECTRUM_MAGNITUDE: f64 = 1e-12;

/// Translation between two patches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseShift {
    /// Shift in pixels such that `target(x) = reference(x - shift)`
    pub dx: f64,
    pub dy: f64,
    /// Correlation energy around the peak, about 1.0 for a perfect match
    pub response: f64,
}

/// Rescale to [0, 1]; a constant patch becomes all zeros
pub fn normalize(data: &mut [f64]) {
    let (min, max) = data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !(max > min) {
        data.iter_mut().for_each(|v| *v = 0.0);
        return;
    }
    let range = max - min;
    data.iter_mut().for_each(|v| *v = (*v - min) / range);
}

/// 1D Hann window, `0.5 * (1 - cos(2*pi*i / (n - 1)))`
pub fn hann_window(n: usize) -> Vec<f64> {
    if n < 2 {
        return vec![1.0; n];
    }
    let scale = std::f64::consts::TAU / (n - 1) as f64;
    (0..n).map(|i| 0.5 * (1.0 - (scale * i as f64).cos())).collect()
}

/// Separable 2D Hann window, row-major
pub fn hann_window_2d(width: usize, height: usize) -> Vec<f64> {
    let wx = hann_window(width);
    let wy = hann_window(height);
    wy.iter()
        .flat_map(|&y| wx.iter().map(move |&x| x * y))
        .collect()
}

/// Estimate the translation from `reference` to `target`
///
/// Both buffers are row-major `width` x `height`. An optional window is
/// multiplied in before the transform.
pub fn phase_correlate(
    reference: &[f64],
    target: &[f64],
    width: usize,
    height: usize,
    window: Option<&[f64]>,
) -> PhaseShift {
    let n = width * height;
    debug_assert_eq!(reference.len(), n);
    debug_assert_eq!(target.len(), n);

    let mut planner = FftPlanner::new();
    let mut ref_spectrum = to_complex(reference, window);
    let mut tar_spectrum = to_complex(target, window);
    fft_2d(&mut ref_spectrum, width, height, &mut planner, false);
    fft_2d(&mut tar_spectrum, width, height, &mut planner, false);

    // Normalized cross-power spectrum
    let mut surface: Vec<Complex<f64>> = ref_spectrum
        .iter()
        .zip(&tar_spectrum)
        .map(|(r, t)| {
            let product = r.conj() * t;
            let magnitude = product.norm();
            if magnitude > MIN_SPECTRUM_MAGNITUDE {
                product / magnitude
            } else {
                Complex::new(0.0, 0.0)
            }
        })
        .collect();
    fft_2d(&mut surface, width, height, &mut planner, true);

    // Unnormalized inverse: a perfect match peaks at n
    let correlation: Vec<f64> = surface.iter().map(|c| c.re / n as f64).collect();

    let (peak_index, _) = correlation
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        });
    let (px, py) = (peak_index % width, peak_index / width);

    let at = |x: usize, y: usize| correlation[y * width + x];
    let left = (px + width - 1) % width;
    let right = (px + 1) % width;
    let up = (py + height - 1) % height;
    let down = (py + 1) % height;

    let center = at(px, py);
    let sub_x = if width > 2 {
        subpixel_offset(center, at(left, py), at(right, py))
    } else {
        0.0
    };
    let sub_y = if height > 2 {
        subpixel_offset(center, at(px, up), at(px, down))
    } else {
        0.0
    };

    let mut response = 0.0;
    for &y in &[up, py, down] {
        for &x in &[left, px, right] {
            response += at(x, y);
        }
    }

    PhaseShift {
        dx: wrap_shift(px, width) + sub_x,
        dy: wrap_shift(py, height) + sub_y,
        response,
    }
}

/// Track one field: crop both images to it, normalize, window and correlate
///
/// `field` must already lie inside both images.
pub fn track_field(base: &GrayF32, sample: &GrayF32, field: &Rect) -> PhaseShift {
    let (width, height) = (field.width() as usize, field.height() as usize);
    let mut base_patch = crop_gray(base, field);
    let mut sample_patch = crop_gray(sample, field);
    normalize(&mut base_patch);
    normalize(&mut sample_patch);
    let window = hann_window_2d(width, height);
    phase_correlate(&base_patch, &sample_patch, width, height, Some(&window))
}

fn to_complex(data: &[f64], window: Option<&[f64]>) -> Vec<Complex<f64>> {
    match window {
        Some(w) => data
            .iter()
            .zip(w)
            .map(|(&v, &w)| Complex::new(v * w, 0.0))
            .collect(),
        None => data.iter().map(|&v| Complex::new(v, 0.0)).collect(),
    }
}

/// In-place 2D FFT by rows then columns
fn fft_2d(
    data: &mut [Complex<f64>],
    width: usize,
    height: usize,
    planner: &mut FftPlanner<f64>,
    inverse: bool,
) {
    let (row_fft, col_fft) = if inverse {
        (planner.plan_fft_inverse(width), planner.plan_fft_inverse(height))
    } else {
        (planner.plan_fft_forward(width), planner.plan_fft_forward(height))
    };

    // Rows are contiguous, one call transforms all of them
    row_fft.process(data);

    let mut column = vec![Complex::new(0.0, 0.0); height];
    for x in 0..width {
        for y in 0..height {
            column[y] = data[y * width + x];
        }
        col_fft.process(&mut column);
        for y in 0..height {
            data[y * width + x] = column[y];
        }
    }
}

/// Peak index to signed shift, indices past the middle wrap to negative
fn wrap_shift(index: usize, size: usize) -> f64 {
    if index > size / 2 {
        index as f64 - size as f64
    } else {
        index as f64
    }
}

/// Sub-pixel offset of a phase correlation peak from its two neighbours
///
/// The peak of a pure shift is a sampled sinc, for which
/// `s = c1 / (c1 + c0)` holds exactly on the side of the larger neighbour.
fn subpixel_offset(center: f64, prev: f64, next: f64) -> f64 {
    if next >= prev {
        if next <= 0.0 || center + next <= 0.0 {
            return 0.0;
        }
        next / (next + center)
    } else {
        if prev <= 0.0 || center + prev <= 0.0 {
            return 0.0;
        }
        -prev / (prev + center)
    }
}
