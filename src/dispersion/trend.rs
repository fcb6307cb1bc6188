//! Dispersion-mean trend fitting

use ndarray::Array1;

use super::DispersionParams;
use crate::data::{DESeqDataSet, DispersionTrend};
use crate::error::{AnalysisError, Result};
use crate::stats::trimmed_mean;

const TREND_MAX_ITER: usize = 11;
const TREND_TOL: f64 = 1e-6;

/// Fit the trend of gene-wise dispersions against mean normalized counts.
///
/// The parametric curve `asympt_disp + extra_pois / mean` is tried first; if
/// it fails to converge or yields a non-positive coefficient the trend falls
/// back to a trimmed mean of the gene-wise estimates.
pub fn fit_dispersion_trend(dds: &mut DESeqDataSet, params: &DispersionParams) -> Result<()> {
    let genewise = dds
        .genewise_dispersions()
        .ok_or_else(|| AnalysisError::InvalidInput {
            reason: "gene-wise dispersions must be estimated before the trend".to_string(),
        })?
        .to_vec();
    let means = dds.base_means().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "normalized counts are required for trend fitting".to_string(),
    })?;
    let means = means.to_vec();
    let all_zero = dds.all_zero().to_vec();

    let trend = match fit_parametric_trend(&means, &genewise, &all_zero, params.min_disp) {
        Ok((asympt_disp, extra_pois)) => {
            log::info!(
                "Parametric dispersion trend: asymptDisp={:.6}, extraPois={:.6}",
                asympt_disp,
                extra_pois
            );
            DispersionTrend::Parametric {
                asympt_disp,
                extra_pois,
            }
        }
        Err(e) => {
            log::warn!("{}; using the mean of gene-wise dispersions as trend", e);
            DispersionTrend::Mean(mean_trend(&genewise, &all_zero, params.min_disp)?)
        }
    };

    let fitted = evaluate_trend(trend, &means, &all_zero);
    dds.set_dispersion_trend(trend, fitted)
}

/// Trend values per gene; NaN for all-zero genes
pub(crate) fn evaluate_trend(trend: DispersionTrend, means: &[f64], all_zero: &[bool]) -> Array1<f64> {
    Array1::from_iter(means.iter().zip(all_zero).map(|(&m, &zero)| {
        if zero {
            f64::NAN
        } else {
            trend.evaluate(m)
        }
    }))
}

/// Iterative Gamma GLM fit of `disp ~ 1 + 1/mean` with residual filtering
fn fit_parametric_trend(
    means: &[f64],
    dispersions: &[f64],
    all_zero: &[bool],
    min_disp: f64,
) -> Result<(f64, f64)> {
    let data: Vec<(f64, f64)> = means
        .iter()
        .zip(dispersions)
        .zip(all_zero)
        .filter(|((&m, &d), &zero)| !zero && m > 0.0 && d.is_finite() && d > 100.0 * min_disp)
        .map(|((&m, &d), _)| (m, d))
        .collect();

    if data.len() < 3 {
        return Err(AnalysisError::ConvergenceFailure {
            operation: "dispersion trend".to_string(),
            reason: format!("only {} genes usable for the parametric fit", data.len()),
        });
    }

    let mut coefs = (0.1_f64, 1.0_f64);
    for iter in 0..TREND_MAX_ITER {
        let old = coefs;
        let kept: Vec<(f64, f64)> = data
            .iter()
            .filter(|&&(m, d)| {
                let ratio = d / (coefs.0 + coefs.1 / m);
                ratio > 1e-4 && ratio < 15.0
            })
            .copied()
            .collect();
        if kept.len() < 3 {
            return Err(AnalysisError::ConvergenceFailure {
                operation: "dispersion trend".to_string(),
                reason: "too few genes close to the curve".to_string(),
            });
        }

        let (new_coefs, glm_converged) = fit_gamma_identity(&kept, coefs);
        coefs = new_coefs;
        log::debug!(
            "trend iter {}: {} genes, a0={:.6}, a1={:.6}",
            iter + 1,
            kept.len(),
            coefs.0,
            coefs.1
        );

        if !(coefs.0 > 0.0 && coefs.1 > 0.0) {
            return Err(AnalysisError::ConvergenceFailure {
                operation: "dispersion trend".to_string(),
                reason: format!("non-positive coefficients ({:.4}, {:.4})", coefs.0, coefs.1),
            });
        }

        let change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        if change < TREND_TOL && glm_converged {
            return Ok(coefs);
        }
    }

    Err(AnalysisError::ConvergenceFailure {
        operation: "dispersion trend".to_string(),
        reason: format!("no convergence after {} iterations", TREND_MAX_ITER),
    })
}

/// Gamma GLM with identity link, IRLS from `start`.
/// Returns the coefficients and whether the deviance converged.
fn fit_gamma_identity(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let deviance = |a0: f64, a1: f64| -> f64 {
        data.iter()
            .map(|&(m, d)| {
                let mu = (a0 + a1 / m).max(1e-8);
                2.0 * (-(d / mu).ln() + (d - mu) / mu)
            })
            .sum()
    };

    let (mut a0, mut a1) = start;
    let mut dev_old = deviance(a0, a1);
    for _ in 0..25 {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(m, d) in data {
            let x = 1.0 / m;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * d;
            swxx += w * x * x;
            swxz += w * x * d;
        }
        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-300 {
            return ((a0, a1), false);
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = deviance(a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}

/// Trimmed mean of gene-wise estimates above 10 * min_disp
fn mean_trend(dispersions: &[f64], all_zero: &[bool], min_disp: f64) -> Result<f64> {
    let usable: Vec<f64> = dispersions
        .iter()
        .zip(all_zero)
        .filter(|(&d, &zero)| !zero && d.is_finite() && d > 10.0 * min_disp)
        .map(|(&d, _)| d)
        .collect();
    if usable.is_empty() {
        return Err(AnalysisError::NumericalError {
            operation: "dispersion trend".to_string(),
            details: "no gene-wise dispersion above the minimum".to_string(),
        });
    }
    Ok(trimmed_mean(&usable, 0.001))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parametric_trend_recovers_curve() {
        let means: Vec<f64> = (1..=200).map(|i| i as f64 * 5.0).collect();
        let disps: Vec<f64> = means
            .iter()
            .enumerate()
            .map(|(i, m)| (0.05 + 2.0 / m) * if i % 2 == 0 { 1.1 } else { 0.9 })
            .collect();
        let zeros = vec![false; means.len()];
        let (a0, a1) = fit_parametric_trend(&means, &disps, &zeros, 1e-8).unwrap();
        assert!((a0 - 0.05).abs() < 0.01, "a0 = {}", a0);
        assert!((a1 - 2.0).abs() < 0.3, "a1 = {}", a1);
    }

    #[test]
    fn test_rising_dispersion_falls_back_to_mean() {
        // dispersion grows with mean: extraPois would be negative
        let means: Vec<f64> = (1..=50).map(|i| i as f64).collect();
        let disps: Vec<f64> = means.iter().map(|m| 0.01 * m).collect();
        let zeros = vec![false; means.len()];
        assert!(fit_parametric_trend(&means, &disps, &zeros, 1e-8).is_err());
        let mean = mean_trend(&disps, &zeros, 1e-8).unwrap();
        assert!((mean - 0.255).abs() < 1e-9);
    }

    #[test]
    fn test_evaluate_trend_marks_zero_genes() {
        let trend = DispersionTrend::Mean(0.2);
        let fitted = evaluate_trend(trend, &[10.0, 0.0], &[false, true]);
        assert_eq!(fitted[0], 0.2);
        assert!(fitted[1].is_nan());
    }
}
