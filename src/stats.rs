//! Descriptive statistics and smoothing helpers shared across modules

/// Scale factor making the MAD consistent for the normal SD
const MAD_CONSTANT: f64 = 1.4826;

/// Median of finite values; NaN when there are none
pub fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Median absolute deviation, scaled to the normal SD
pub fn mad(values: &[f64]) -> f64 {
    let center = median(values);
    let deviations: Vec<f64> = values.iter().map(|&v| (v - center).abs()).collect();
    MAD_CONSTANT * median(&deviations)
}

/// Mean after dropping `floor(n * trim)` values from each end
pub fn trimmed_mean(values: &[f64], trim: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let cut = ((n as f64) * trim).floor() as usize;
    let kept = if 2 * cut < n { &sorted[cut..n - cut] } else { &sorted[..] };
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Sample variance with `n - 1` denominator
pub fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Quantile with linear interpolation between order statistics (type 7).
/// `sorted` must be ascending.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    match n {
        0 => f64::NAN,
        1 => sorted[0],
        _ => {
            let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

/// Trigamma function (derivative of digamma)
pub fn trigamma(x: f64) -> f64 {
    if x <= 0.0 && x == x.floor() {
        return f64::INFINITY;
    }
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).powi(2) - trigamma(1.0 - x);
    }
    let mut acc = 0.0;
    let mut z = x;
    while z < 8.0 {
        acc += 1.0 / (z * z);
        z += 1.0;
    }
    let z2 = z * z;
    acc + 1.0 / z + 0.5 / z2 + 1.0 / (6.0 * z2 * z) - 1.0 / (30.0 * z2 * z2 * z)
        + 1.0 / (42.0 * z2 * z2 * z2 * z)
}

/// Robust locally weighted regression (Cleveland's LOWESS).
///
/// `x` must be sorted ascending. `span` is the fraction of points in each
/// local window and `iterations` the number of robustness passes. Points
/// closer than 1% of the x range reuse linear interpolation.
pub fn lowess(x: &[f64], y: &[f64], span: f64, iterations: usize) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return y.to_vec();
    }
    let delta = 0.01 * (x[n - 1] - x[0]);
    let window = ((span * n as f64 + 1e-7) as usize).clamp(2, n);

    let mut fitted = vec![0.0; n];
    let mut robustness = vec![1.0; n];
    let mut weights = vec![0.0; n];

    for pass in 0..=iterations {
        let mut left = 0usize;
        let mut right = window - 1;
        let mut last: Option<usize> = None;
        let mut i = 0usize;

        loop {
            while right < n - 1 && x[i] - x[left] > x[right + 1] - x[i] {
                left += 1;
                right += 1;
            }

            fitted[i] = local_fit(x, y, i, left, right, &mut weights, pass > 0, &robustness)
                .unwrap_or(y[i]);

            if let Some(prev) = last {
                if prev + 1 < i {
                    let denom = x[i] - x[prev];
                    for j in (prev + 1)..i {
                        let t = (x[j] - x[prev]) / denom;
                        fitted[j] = t * fitted[i] + (1.0 - t) * fitted[prev];
                    }
                }
            }

            let anchor = i;
            last = Some(anchor);
            let cut = x[anchor] + delta;
            let mut next = anchor + 1;
            while next < n && x[next] <= cut {
                if x[next] == x[anchor] {
                    fitted[next] = fitted[anchor];
                    last = Some(next);
                }
                next += 1;
            }
            let last_idx = last.unwrap_or(anchor);
            if last_idx >= n - 1 {
                break;
            }
            i = (last_idx + 1).max(next - 1);
        }

        if pass == iterations {
            break;
        }

        let residuals: Vec<f64> = (0..n).map(|k| (y[k] - fitted[k]).abs()).collect();
        let mean_abs = residuals.iter().sum::<f64>() / n as f64;
        let cmad = 6.0 * median(&residuals);
        if cmad < 1e-7 * mean_abs {
            break;
        }
        for k in 0..n {
            let r = residuals[k];
            robustness[k] = if r <= 0.001 * cmad {
                1.0
            } else if r <= 0.999 * cmad {
                let u = r / cmad;
                (1.0 - u * u).powi(2)
            } else {
                0.0
            };
        }
    }

    fitted
}

/// Weighted local linear fit at `x[i]` over the window `left..=right`
#[allow(clippy::too_many_arguments)]
fn local_fit(
    x: &[f64],
    y: &[f64],
    i: usize,
    left: usize,
    right: usize,
    w: &mut [f64],
    use_robustness: bool,
    robustness: &[f64],
) -> Option<f64> {
    let n = x.len();
    let xs = x[i];
    let range = x[n - 1] - x[0];
    let h = (xs - x[left]).max(x[right] - xs);

    let mut total = 0.0;
    let mut j = left;
    while j < n {
        w[j] = 0.0;
        let r = (x[j] - xs).abs();
        if r <= 0.999 * h {
            w[j] = if r <= 0.001 * h {
                1.0
            } else {
                (1.0 - (r / h).powi(3)).powi(3)
            };
            if use_robustness {
                w[j] *= robustness[j];
            }
            total += w[j];
        } else if x[j] > xs {
            break;
        }
        j += 1;
    }
    let end = j - 1;
    if total <= 0.0 {
        return None;
    }
    for k in left..=end {
        w[k] /= total;
    }

    if h > 0.0 {
        let center: f64 = (left..=end).map(|k| w[k] * x[k]).sum();
        let spread: f64 = (left..=end).map(|k| w[k] * (x[k] - center).powi(2)).sum();
        if spread.sqrt() > 0.001 * range {
            let slope = (xs - center) / spread;
            for k in left..=end {
                w[k] *= slope * (x[k] - center) + 1.0;
            }
        }
    }

    Some((left..=end).map(|k| w[k] * y[k]).sum())
}
