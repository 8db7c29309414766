//! Separable Gaussian blur over row-major grid counts.
//!
//! The kernel spans `ceil(3 * sigma)` cells on each side, capped at the
//! grid's longer side, and its weights sum to one. Samples past the grid
//! edge repeat the nearest edge cell.

/// Build a normalized 1D Gaussian kernel for `sigma` (in cells) with at
/// most `max_radius` taps on each side of the center.
pub fn gaussian_kernel(sigma: f64, max_radius: usize) -> Vec<f64> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return vec![1.0];
    }
    // Float-to-int casts saturate; the cap bounds the result either way.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let radius = ((3.0 * sigma).ceil() as usize).min(max_radius);
    let two_sigma_sq = 2.0 * sigma * sigma;
    let weights: Vec<f64> = (0..=radius.saturating_mul(2))
        .map(|k| {
            let offset = distance(k, radius);
            (-(offset * offset) / two_sigma_sq).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Signed distance of kernel tap `k` from the center tap `radius`.
fn distance(k: usize, radius: usize) -> f64 {
    let magnitude = k.abs_diff(radius);
    let magnitude = u32::try_from(magnitude).map_or(f64::MAX, f64::from);
    if k < radius { -magnitude } else { magnitude }
}

/// Blur `counts` (row-major, `width * height`) with a Gaussian of `sigma`.
///
/// Returns the input unchanged when `sigma` is zero or the buffer does not
/// match the dimensions. Every pass costs at most `2 * max(width, height) - 1`
/// taps per cell, however large `sigma` is.
pub fn gaussian_blur(counts: &[f64], width: usize, height: usize, sigma: f64) -> Vec<f64> {
    let kernel = gaussian_kernel(sigma, width.max(height).saturating_sub(1));
    if kernel.len() <= 1 || width == 0 || height == 0 || counts.len() != width.saturating_mul(height) {
        return counts.to_vec();
    }
    let radius = kernel.len() / 2;

    // Horizontal pass.
    let mut horizontal = vec![0.0; counts.len()];
    for (src_row, dst_row) in counts.chunks(width).zip(horizontal.chunks_mut(width)) {
        for (i, out) in dst_row.iter_mut().enumerate() {
            *out = convolve(&kernel, |k| {
                let index = clamp_tap(i, k, radius, width);
                src_row.get(index).copied().unwrap_or(0.0)
            });
        }
    }

    // Vertical pass.
    let mut blurred = vec![0.0; counts.len()];
    for (j, dst_row) in blurred.chunks_mut(width).enumerate() {
        for (i, out) in dst_row.iter_mut().enumerate() {
            *out = convolve(&kernel, |k| {
                let row = clamp_tap(j, k, radius, height);
                row.checked_mul(width)
                    .and_then(|base| base.checked_add(i))
                    .and_then(|index| horizontal.get(index))
                    .copied()
                    .unwrap_or(0.0)
            });
        }
    }
    blurred
}

fn convolve(kernel: &[f64], mut sample: impl FnMut(usize) -> f64) -> f64 {
    kernel
        .iter()
        .enumerate()
        .map(|(k, weight)| weight * sample(k))
        .sum()
}

/// Index of tap `k` around `center`, replicated at the edges.
fn clamp_tap(center: usize, k: usize, radius: usize, len: usize) -> usize {
    center
        .saturating_add(k)
        .saturating_sub(radius)
        .min(len.saturating_sub(1))
}
