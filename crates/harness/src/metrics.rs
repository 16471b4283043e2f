//! Metrics engine - similarity between two aligned images
//!
//! Every sample is normalized to [0, 1] by its own image's bit depth before
//! any arithmetic, so an 8-bit and a 16-bit rendition of the same picture
//! score as equal.
//!
//! SSIM follows the conventional windowed formulation: a 7x7 uniform window,
//! K1 = 0.01, K2 = 0.03, data range 1, sample covariance, averaged over every
//! window that lies fully inside the image. Images smaller than the window use
//! the largest odd window that fits; below 3x3 a single global window is used.

use rawparity_common::MetricReport;

use crate::error::{HarnessError, HarnessResult};
use crate::imaging::ImageBuffer;

/// PSNR reported for identical images instead of infinity
pub const PSNR_IDENTICAL: f64 = 100.0;

const SSIM_WINDOW: usize = 7;
const K1: f64 = 0.01;
const K2: f64 = 0.03;
const DATA_RANGE: f64 = 1.0;

/// Compute every metric for two aligned images.
///
/// File names and digests are left for the caller to fill in.
pub fn score(a: &ImageBuffer, b: &ImageBuffer) -> HarnessResult<MetricReport> {
    if a.shape() != b.shape() {
        return Err(HarnessError::AlignmentImpossible(format!(
            "cannot score unaligned images {:?} and {:?}",
            a.shape(),
            b.shape()
        )));
    }

    let (ma, mb) = (a.bit_depth().max_value(), b.bit_depth().max_value());
    let mut max_abs = 0.0f64;
    let mut sum_abs = 0.0f64;
    let mut sum_sq = 0.0f64;
    for (&p, &q) in a.data().iter().zip(b.data()) {
        let d = p as f64 / ma - q as f64 / mb;
        max_abs = max_abs.max(d.abs());
        sum_abs += d.abs();
        sum_sq += d * d;
    }

    let n = a.data().len().max(1) as f64;
    let mse = sum_sq / n;

    Ok(MetricReport {
        reference_name: String::new(),
        candidate_name: String::new(),
        compared_dimensions: a.shape(),
        reference_bit_depth: a.bit_depth().bits(),
        candidate_bit_depth: b.bit_depth().bits(),
        max_abs_diff: max_abs,
        mean_abs_error: sum_abs / n,
        mean_squared_error: mse,
        psnr_db: psnr(mse),
        ssim_score: ssim(
            &a.luminance(),
            &b.luminance(),
            a.width() as usize,
            a.height() as usize,
        ),
        reference_sha256: None,
        candidate_sha256: None,
    })
}

/// Peak signal-to-noise ratio for a [0, 1] signal
pub fn psnr(mse: f64) -> f64 {
    if mse == 0.0 {
        PSNR_IDENTICAL
    } else {
        20.0 * (1.0 / mse.sqrt()).log10()
    }
}

/// Running sums over one window: x, y, x², y², xy
#[derive(Debug, Clone, Copy, Default)]
struct Moments([f64; 5]);

impl Moments {
    fn of(x: f64, y: f64) -> Self {
        Moments([x, y, x * x, y * y, x * y])
    }

    fn add(&mut self, other: &Moments) {
        for (a, b) in self.0.iter_mut().zip(other.0) {
            *a += b;
        }
    }

    fn sub(&mut self, other: &Moments) {
        for (a, b) in self.0.iter_mut().zip(other.0) {
            *a -= b;
        }
    }

    /// SSIM of the window these sums were taken over, `n` samples wide
    fn ssim(&self, n: f64) -> f64 {
        let c1 = (K1 * DATA_RANGE).powi(2);
        let c2 = (K2 * DATA_RANGE).powi(2);
        let cov_norm = if n > 1.0 { n / (n - 1.0) } else { 1.0 };

        let [sx, sy, sxx, syy, sxy] = self.0;
        let (ux, uy) = (sx / n, sy / n);
        let vx = cov_norm * (sxx / n - ux * ux);
        let vy = cov_norm * (syy / n - uy * uy);
        let vxy = cov_norm * (sxy / n - ux * uy);

        ((2.0 * ux * uy + c1) * (2.0 * vxy + c2)) / ((ux * ux + uy * uy + c1) * (vx + vy + c2))
    }
}

/// Mean structural similarity of two single-channel images
pub fn ssim(x: &[f64], y: &[f64], width: usize, height: usize) -> f64 {
    let mut win = SSIM_WINDOW.min(width).min(height);
    if win % 2 == 0 {
        win = win.saturating_sub(1);
    }

    if win < 3 {
        let mut total = Moments::default();
        for (&a, &b) in x.iter().zip(y) {
            total.add(&Moments::of(a, b));
        }
        return total.ssim(x.len().max(1) as f64);
    }

    // Column sums over the current band of `win` rows, slid down the image
    let mut cols = vec![Moments::default(); width];
    let update_band = |cols: &mut [Moments], row: usize, remove: bool| {
        for (j, col) in cols.iter_mut().enumerate() {
            let i = row * width + j;
            let m = Moments::of(x[i], y[i]);
            if remove {
                col.sub(&m);
            } else {
                col.add(&m);
            }
        }
    };

    let n = (win * win) as f64;
    let mut total = 0.0;
    let mut count = 0usize;

    for row in 0..win - 1 {
        update_band(&mut cols, row, false);
    }
    for bottom in win - 1..height {
        update_band(&mut cols, bottom, false);

        let mut acc = Moments::default();
        for col in &cols[..win] {
            acc.add(col);
        }
        total += acc.ssim(n);
        count += 1;

        for j in win..width {
            acc.add(&cols[j]);
            acc.sub(&cols[j - win]);
            total += acc.ssim(n);
            count += 1;
        }

        update_band(&mut cols, bottom + 1 - win, true);
    }

    total / count as f64
}
