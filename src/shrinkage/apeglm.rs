//! apeglm-style shrinkage of log fold changes
//!
//! The contrast coefficient gets a zero-centred Cauchy prior whose scale is
//! estimated from the MLE fold changes and standard errors; the remaining
//! coefficients get a wide normal prior. Each gene's posterior mode is found
//! by Newton iterations and its SD from the inverse Hessian at the mode.

use std::f64::consts::LN_2;

use rayon::prelude::*;

use crate::data::DESeqDataSet;
use crate::error::{AnalysisError, Result};
use crate::glm::{minimize_newton, CoefPrior, GeneModel, MAX_BETA};
use crate::io::DESeqResults;
use crate::linalg;

/// Parameters for apeglm shrinkage
#[derive(Debug, Clone)]
pub struct ApeglmParams {
    /// Cap on the Cauchy prior scale
    pub max_prior_scale: f64,
    /// Normal prior SD for coefficients that are not shrunk
    pub no_shrink_sd: f64,
    pub maxit: usize,
}

impl Default for ApeglmParams {
    fn default() -> Self {
        Self {
            max_prior_scale: 1.0,
            no_shrink_sd: 15.0,
            maxit: 100,
        }
    }
}

/// Shrink `log2FoldChange` and `lfcSE` of `results` in place.
///
/// The contrast must compare a level against the reference level (in either
/// direction); p-values and all other columns are left untouched.
pub fn shrink_lfc_apeglm(dds: &DESeqDataSet, results: &mut DESeqResults, params: &ApeglmParams) -> Result<()> {
    let (coef, sign) = dds.design().contrast_coefficient(&results.contrast)?;
    let coefficients = dds.coefficients().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "the GLM must be fitted before shrinkage".to_string(),
    })?;
    let dispersions = dds.dispersions().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "dispersions must be estimated before shrinkage".to_string(),
    })?;
    let sf = dds
        .size_factors()
        .ok_or_else(|| AnalysisError::InvalidInput {
            reason: "size factors must be estimated before shrinkage".to_string(),
        })?
        .to_vec();
    if results.n_genes() != dds.n_genes() {
        return Err(AnalysisError::DimensionMismatch {
            expected: format!("{} result rows", dds.n_genes()),
            got: format!("{}", results.n_genes()),
        });
    }

    // MLE on the natural log scale of the shrunk coefficient
    let mle: Vec<f64> = results.log2_fold_changes.iter().map(|l| l * LN_2).collect();
    let mle_se: Vec<f64> = results.lfc_se.iter().map(|s| s * LN_2).collect();
    let prior_var = estimate_prior_var(&mle, &mle_se);
    let scale = prior_var.sqrt().min(params.max_prior_scale);
    log::info!("apeglm prior: variance {:.4}, Cauchy scale {:.4}", prior_var, scale);

    let p = dds.design().n_coefs();
    let priors: Vec<CoefPrior> = (0..p)
        .map(|j| {
            if j == coef {
                CoefPrior::Cauchy { scale }
            } else {
                CoefPrior::Normal { sd: params.no_shrink_sd }
            }
        })
        .collect();

    let design = dds.design().matrix().clone();
    let counts = dds.counts().counts();
    let all_zero = dds.all_zero();

    let shrunk: Vec<Option<(f64, f64)>> = (0..dds.n_genes())
        .into_par_iter()
        .map(|g| {
            let init: Vec<f64> = coefficients.row(g).to_vec();
            if all_zero[g] || init.iter().any(|b| !b.is_finite()) {
                return None;
            }
            let row = counts.row(g).to_vec();
            let model = GeneModel {
                counts: &row,
                size_factors: &sf,
                design: design.view(),
                alpha: dispersions[g],
            };
            let outcome = minimize_newton(&model, &priors, &init, MAX_BETA, params.maxit);
            let sd = posterior_sd(&model, &priors, &outcome.beta, coef);
            Some((outcome.beta[coef], sd))
        })
        .collect();

    let mut n_failed = 0;
    for (g, fit) in shrunk.into_iter().enumerate() {
        match fit {
            Some((beta, sd)) => {
                results.log2_fold_changes[g] = sign * beta / LN_2;
                results.lfc_se[g] = sd / LN_2;
                if !sd.is_finite() {
                    n_failed += 1;
                }
            }
            None => {
                results.log2_fold_changes[g] = f64::NAN;
                results.lfc_se[g] = f64::NAN;
            }
        }
    }
    if n_failed > 0 {
        log::warn!("apeglm: posterior SD unavailable for {} genes", n_failed);
    }
    results.shrunk = true;
    Ok(())
}

/// Posterior SD of coefficient `k` from the inverse Hessian at the mode.
/// Falls back to the convexified Hessian when the exact one is not invertible.
fn posterior_sd(model: &GeneModel<'_>, priors: &[CoefPrior], beta: &[f64], k: usize) -> f64 {
    let from = |convexify: bool| -> Option<f64> {
        let inv = linalg::invert(&model.hessian(beta, priors, convexify))?;
        let v = inv[[k, k]];
        (v > 0.0 && v.is_finite()).then(|| v.sqrt())
    };
    from(false).or_else(|| from(true)).unwrap_or(f64::NAN)
}

/// Prior variance A solving `A = sum((x^2 - d) I) / sum(I)` with
/// information weights `I = 1 / (2 (A + d)^2)`, where `x` are MLEs and `d`
/// their squared standard errors. Bounded to `[1e-6, 400]`.
pub(crate) fn estimate_prior_var(mle: &[f64], se: &[f64]) -> f64 {
    const MIN_VAR: f64 = 1e-6;
    const MAX_VAR: f64 = 400.0;

    let pairs: Vec<(f64, f64)> = mle
        .iter()
        .zip(se)
        .filter(|(x, s)| x.is_finite() && s.is_finite())
        .map(|(&x, &s)| (x * x, s * s))
        .collect();
    if pairs.is_empty() {
        return MIN_VAR;
    }

    let excess = |a: f64| -> f64 {
        let (mut num, mut den) = (0.0, 0.0);
        for &(sq, d) in &pairs {
            let info = 1.0 / (2.0 * (a + d).powi(2));
            num += (sq - d) * info;
            den += info;
        }
        num / den - a
    };

    if excess(MIN_VAR) < 0.0 {
        return MIN_VAR;
    }
    if excess(MAX_VAR) > 0.0 {
        return MAX_VAR;
    }
    let (mut lo, mut hi) = (MIN_VAR, MAX_VAR);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if excess(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-12 * hi.max(1.0) {
            break;
        }
    }
    0.5 * (lo + hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::dispersion::{estimate_dispersions, DispersionParams};
    use crate::glm::{fit_lfc, GlmFitParams};
    use crate::io::Contrast;
    use crate::normalization::estimate_size_factors;
    use crate::testing::wald_test;
    use ndarray::Array2;

    #[test]
    fn test_prior_var_recovers_spread() {
        // evenly spread MLEs with variance 1.25 and sampling variance 0.25
        let mle: Vec<f64> = (0..200).map(|i| ((i as f64 + 0.5) / 200.0 - 0.5) * 3.873).collect();
        let se = vec![0.5; 200];
        let a = estimate_prior_var(&mle, &se);
        assert!((a - 1.0).abs() < 0.1, "prior var {}", a);
        assert_eq!(estimate_prior_var(&[0.0, 0.01], &[1.0, 1.0]), 1e-6);
    }

    fn dataset() -> DESeqDataSet {
        let labels = ["WT", "WT", "WT", "KO", "KO", "KO"];
        let n_genes = 40;
        let mut counts = Array2::<f64>::zeros((n_genes, 6));
        for g in 0..n_genes {
            let base = 30.0 + 8.0 * g as f64;
            for j in 0..6 {
                let fold = match g % 4 {
                    0 if j >= 3 => 3.0,
                    1 if j >= 3 => 0.5,
                    _ => 1.0,
                };
                let jitter = 1.0 + 0.15 * (((g + 2 * j) % 3) as f64 - 1.0);
                counts[[g, j]] = (base * fold * jitter).round();
            }
        }
        let samples: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        let genes: Vec<String> = (0..n_genes).map(|g| format!("g{}", g)).collect();
        let matrix = CountMatrix::new(counts, genes, samples.clone()).unwrap();
        let mut meta = SampleMetadata::new(samples.clone());
        meta.add_column("sample-name", samples).unwrap();
        let mut dds = DESeqDataSet::new(matrix, meta, "sample-name", "WT").unwrap();
        estimate_size_factors(&mut dds).unwrap();
        estimate_dispersions(&mut dds, &DispersionParams::default()).unwrap();
        fit_lfc(&mut dds, &GlmFitParams::default()).unwrap();
        dds
    }

    #[test]
    fn test_shrinkage_pulls_toward_zero_and_keeps_pvalues() {
        let dds = dataset();
        let mut res = wald_test(&dds, &Contrast::new("sample-name", "KO", "WT")).unwrap();
        let mle = res.log2_fold_changes.clone();
        let pvalues = res.pvalues.clone();
        shrink_lfc_apeglm(&dds, &mut res, &ApeglmParams::default()).unwrap();
        assert!(res.shrunk);
        for g in 0..dds.n_genes() {
            assert!(res.log2_fold_changes[g].abs() <= mle[g].abs() + 1e-3);
            assert!(res.log2_fold_changes[g] * mle[g] >= -1e-6);
            assert!(res.lfc_se[g] > 0.0);
        }
        assert!(res.log2_fold_changes[0] > 1.0);
        assert_eq!(res.pvalues.len(), pvalues.len());
        assert!(res.pvalues.iter().zip(&pvalues).all(|(a, b)| a == b || (a.is_nan() && b.is_nan())));
    }

    #[test]
    fn test_reversed_contrast_flips_sign() {
        let dds = dataset();
        let mut fwd = wald_test(&dds, &Contrast::new("sample-name", "KO", "WT")).unwrap();
        let mut rev = wald_test(&dds, &Contrast::new("sample-name", "WT", "KO")).unwrap();
        shrink_lfc_apeglm(&dds, &mut fwd, &ApeglmParams::default()).unwrap();
        shrink_lfc_apeglm(&dds, &mut rev, &ApeglmParams::default()).unwrap();
        assert!((fwd.log2_fold_changes[0] + rev.log2_fold_changes[0]).abs() < 1e-9);
    }
}
