//! Negative binomial GLM fitting with IRLS

use ndarray::{Array2, Array3, ArrayView2};
use rayon::prelude::*;

use super::negative_binomial::{nb_log_likelihood_sum, nb_mean, nb_weight, MAX_BETA, MIN_MU, RIDGE_LAMBDA};
use super::optim::{minimize_newton, CoefPrior, GeneModel};
use crate::data::DESeqDataSet;
use crate::error::{AnalysisError, Result};
use crate::linalg;

/// Configurable parameters for GLM fitting
#[derive(Debug, Clone)]
pub struct GlmFitParams {
    /// Maximum IRLS iterations
    pub maxit: usize,
    /// Relative deviance change for convergence
    pub beta_tol: f64,
    /// Lower bound on fitted means while iterating
    pub min_mu: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self {
            maxit: 250,
            beta_tol: 1e-8,
            min_mu: MIN_MU,
        }
    }
}

/// Fit of one gene
#[derive(Debug, Clone)]
pub struct GeneFit {
    /// Coefficients on the natural log scale
    pub coefficients: Vec<f64>,
    /// Fitted means (not floored)
    pub mu: Vec<f64>,
    /// Diagonal of the weighted hat matrix
    pub hat_diagonals: Vec<f64>,
    pub converged: bool,
}

/// Fit the NB GLM for one gene with a fixed dispersion.
///
/// IRLS starts from least squares on `log(normalized + 0.1)`; when it diverges
/// or exhausts its iterations the fit is redone by penalised Newton
/// minimisation from the same start.
pub fn fit_gene(
    counts: &[f64],
    size_factors: &[f64],
    design: ArrayView2<f64>,
    alpha: f64,
    params: &GlmFitParams,
) -> GeneFit {
    let (n, p) = design.dim();

    let log_norm: Vec<f64> = counts
        .iter()
        .zip(size_factors)
        .map(|(&c, &s)| (c / s + 0.1).ln())
        .collect();
    let beta_init: Vec<f64> = match linalg::least_squares(design, &log_norm) {
        Some(b) if b.iter().all(|v| v.is_finite()) => b.to_vec(),
        _ => {
            let mut b = vec![0.0; p];
            b[0] = log_norm.iter().sum::<f64>() / n as f64;
            b
        }
    };

    let linear_mu = |beta: &[f64]| -> Vec<f64> {
        (0..n)
            .map(|i| {
                let eta: f64 = (0..p).map(|j| design[[i, j]] * beta[j]).sum();
                nb_mean(eta, size_factors[i])
            })
            .collect()
    };

    let mut beta = beta_init.clone();
    let mut mu: Vec<f64> = linear_mu(&beta).into_iter().map(|m| m.max(params.min_mu)).collect();
    let mut dev = 1000.0;
    let mut converged = true;
    let mut diverged = false;
    let mut iter = 0;

    loop {
        let weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
        let z: Vec<f64> = (0..n)
            .map(|i| (mu[i] / size_factors[i]).ln() + (counts[i] - mu[i]) / mu[i])
            .collect();
        let mut xtwx = linalg::weighted_crossprod(design, &weights);
        for j in 0..p {
            xtwx[[j, j]] += RIDGE_LAMBDA;
        }
        let xtwz = linalg::weighted_crossprod_vec(design, &weights, &z);
        iter += 1;

        let beta_hat = linalg::cholesky_solve(&xtwx, &xtwz);
        match beta_hat {
            Some(b) if b.iter().all(|v| v.is_finite() && v.abs() <= MAX_BETA) && iter < params.maxit => {
                beta = b.to_vec();
            }
            _ => {
                diverged = true;
                break;
            }
        }

        mu = linear_mu(&beta).into_iter().map(|m| m.max(params.min_mu)).collect();
        let old_dev = dev;
        dev = -2.0 * nb_log_likelihood_sum(counts, &mu, alpha);
        let ratio = (dev - old_dev).abs() / (dev.abs() + 0.1);
        if ratio.is_nan() {
            diverged = true;
            break;
        }
        if ratio <= params.beta_tol {
            break;
        }
    }

    if diverged {
        let model = GeneModel {
            counts,
            size_factors,
            design: design.view(),
            alpha,
        };
        let ridge = CoefPrior::Normal {
            sd: 1.0 / RIDGE_LAMBDA.sqrt(),
        };
        let outcome = minimize_newton(&model, &vec![ridge; p], &beta_init, MAX_BETA, params.maxit);
        log::debug!(
            "IRLS diverged after {} iterations; Newton fallback converged={}",
            iter,
            outcome.converged
        );
        beta = outcome.beta;
        converged = outcome.converged;
        mu = linear_mu(&beta).into_iter().map(|m| m.max(params.min_mu)).collect();
    }

    let weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
    let hat_diagonals = hat_diagonals(design, &weights);

    GeneFit {
        mu: linear_mu(&beta),
        coefficients: beta,
        hat_diagonals,
        converged,
    }
}

/// Diagonal of W^1/2 X (X'WX + ridge)^-1 X' W^1/2
fn hat_diagonals(design: ArrayView2<f64>, weights: &[f64]) -> Vec<f64> {
    let (n, p) = design.dim();
    let mut xtwx = linalg::weighted_crossprod(design, weights);
    for j in 0..p {
        xtwx[[j, j]] += RIDGE_LAMBDA;
    }
    let Some(inv) = linalg::invert(&xtwx) else {
        return vec![f64::NAN; n];
    };
    (0..n)
        .map(|i| {
            let x = design.row(i);
            let quad: f64 = (0..p)
                .map(|j| x[j] * (0..p).map(|k| inv[[j, k]] * x[k]).sum::<f64>())
                .sum();
            weights[i] * quad
        })
        .collect()
}

/// Sandwich covariance (M + ridge)^-1 M (M + ridge)^-1 with M = X'WX,
/// using unfloored means.
pub fn coefficient_covariance(design: ArrayView2<f64>, mu: &[f64], alpha: f64) -> Option<Array2<f64>> {
    let p = design.ncols();
    let weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
    let m = linalg::weighted_crossprod(design, &weights);
    let mut ridged = m.clone();
    for j in 0..p {
        ridged[[j, j]] += RIDGE_LAMBDA;
    }
    let h = linalg::invert(&ridged)?;
    Some(h.dot(&m).dot(&h))
}

/// Fit the GLM for every gene with the final dispersions
pub fn fit_lfc(dds: &mut DESeqDataSet, params: &GlmFitParams) -> Result<()> {
    let genes: Vec<usize> = (0..dds.n_genes()).collect();
    fit_lfc_genes(dds, &genes, params)
}

/// Fit the GLM for a subset of genes, writing results into their rows.
/// All-zero genes get NaN coefficients.
pub fn fit_lfc_genes(dds: &mut DESeqDataSet, genes: &[usize], params: &GlmFitParams) -> Result<()> {
    let size_factors = dds.size_factors().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "size factors must be estimated before fitting the GLM".to_string(),
    })?;
    let dispersions = dds.dispersions().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "dispersions must be estimated before fitting the GLM".to_string(),
    })?;
    let sf = size_factors.to_vec();
    let design = dds.design().matrix().clone();
    let counts = dds.counts().counts();
    let all_zero = dds.all_zero();
    let (n_genes, n_samples, p) = (dds.n_genes(), dds.n_samples(), design.ncols());

    let fits: Vec<(usize, Option<(GeneFit, Option<Array2<f64>>)>)> = genes
        .par_iter()
        .map(|&g| {
            if all_zero[g] {
                return (g, None);
            }
            let row = counts.row(g).to_vec();
            let alpha = dispersions[g];
            let fit = fit_gene(&row, &sf, design.view(), alpha, params);
            let cov = coefficient_covariance(design.view(), &fit.mu, alpha);
            (g, Some((fit, cov)))
        })
        .collect();

    let mut coefficients = dds
        .coefficients()
        .cloned()
        .unwrap_or_else(|| Array2::from_elem((n_genes, p), f64::NAN));
    let mut covariances = dds
        .covariances()
        .cloned()
        .unwrap_or_else(|| Array3::from_elem((n_genes, p, p), f64::NAN));
    let mut mu = dds
        .mu()
        .cloned()
        .unwrap_or_else(|| Array2::from_elem((n_genes, n_samples), f64::NAN));
    let mut hat = dds
        .hat_diagonals()
        .cloned()
        .unwrap_or_else(|| Array2::from_elem((n_genes, n_samples), f64::NAN));
    let mut converged = dds
        .converged()
        .map(|c| c.to_vec())
        .unwrap_or_else(|| vec![false; n_genes]);

    let mut n_unconverged = 0;
    for (g, fit) in fits {
        match fit {
            Some((fit, cov)) => {
                for j in 0..p {
                    coefficients[[g, j]] = fit.coefficients[j];
                }
                for i in 0..n_samples {
                    mu[[g, i]] = fit.mu[i];
                    hat[[g, i]] = fit.hat_diagonals[i];
                }
                match cov {
                    Some(c) => covariances.slice_mut(ndarray::s![g, .., ..]).assign(&c),
                    None => covariances.slice_mut(ndarray::s![g, .., ..]).fill(f64::NAN),
                }
                if !fit.converged {
                    n_unconverged += 1;
                }
                converged[g] = fit.converged;
            }
            None => {
                coefficients.row_mut(g).fill(f64::NAN);
                covariances.slice_mut(ndarray::s![g, .., ..]).fill(f64::NAN);
                mu.row_mut(g).fill(f64::NAN);
                hat.row_mut(g).fill(f64::NAN);
                converged[g] = true;
            }
        }
    }

    if n_unconverged > 0 {
        log::warn!("{} genes did not converge while fitting LFCs", n_unconverged);
    }

    dds.set_glm_fit(coefficients, covariances, mu, hat, converged)?;
    Ok(())
}
