//! Gene-wise dispersion estimation using the Cox-Reid adjusted profile likelihood
//!
//! Also hosts the likelihood, its derivative and the line/grid searches on
//! log(alpha), which the MAP step reuses with a log-normal prior.

use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;
use statrs::function::gamma::{digamma, ln_gamma};

use super::DispersionParams;
use crate::data::DESeqDataSet;
use crate::error::{AnalysisError, Result};
use crate::glm::{fit_gene, GlmFitParams, MIN_MU};
use crate::linalg;

/// Log-normal prior on the dispersion, centred on the trend
#[derive(Debug, Clone, Copy)]
pub(crate) struct LogNormalPrior {
    pub log_mean: f64,
    pub var: f64,
}

/// Outcome of the Armijo line search on log(alpha)
#[derive(Debug, Clone, Copy)]
pub(crate) struct LineSearch {
    pub log_alpha: f64,
    pub initial_lp: f64,
    pub last_lp: f64,
    pub iterations: usize,
}

/// Estimate gene-wise dispersions for all genes with non-zero counts.
///
/// Returns the fitted means used for each gene, which the MAP step reuses.
pub fn estimate_genewise_dispersions(
    dds: &mut DESeqDataSet,
    params: &DispersionParams,
) -> Result<Array2<f64>> {
    let size_factors = dds.size_factors().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "size factors must be estimated before dispersions".to_string(),
    })?;
    let sf = size_factors.to_vec();
    let design = dds.design().matrix().clone();
    let counts = dds.counts().counts();
    let all_zero = dds.all_zero();
    let (n_genes, n_samples) = (dds.n_genes(), dds.n_samples());
    let max_disp = params.max_disp(n_samples);
    let xim = sf.iter().map(|s| 1.0 / s).sum::<f64>() / n_samples as f64;
    let linear_mu = has_one_row_per_coefficient(design.view());

    let fits: Vec<(f64, Vec<f64>)> = (0..n_genes)
        .into_par_iter()
        .map(|g| {
            if all_zero[g] {
                return (f64::NAN, vec![f64::NAN; n_samples]);
            }
            let row = counts.row(g).to_vec();
            fit_genewise_dispersion(&row, &sf, design.view(), xim, linear_mu, max_disp, params)
        })
        .collect();

    let mut dispersions = Array1::<f64>::zeros(n_genes);
    let mut mu = Array2::<f64>::zeros((n_genes, n_samples));
    for (g, (disp, gene_mu)) in fits.into_iter().enumerate() {
        dispersions[g] = disp;
        for (j, m) in gene_mu.into_iter().enumerate() {
            mu[[g, j]] = m;
        }
    }

    dds.set_genewise_dispersions(dispersions)?;
    Ok(mu)
}

/// Whether the design has exactly as many distinct rows as columns, in which
/// case group means from least squares give the fitted means directly.
pub(crate) fn has_one_row_per_coefficient(design: ArrayView2<f64>) -> bool {
    let mut unique: Vec<Vec<u64>> = Vec::new();
    for row in design.rows() {
        let key: Vec<u64> = row.iter().map(|v| v.to_bits()).collect();
        if !unique.contains(&key) {
            unique.push(key);
        }
    }
    unique.len() == design.ncols()
}

/// Dispersion estimate and fitted means for one gene
pub(crate) fn fit_genewise_dispersion(
    counts: &[f64],
    size_factors: &[f64],
    design: ArrayView2<f64>,
    xim: f64,
    linear_mu: bool,
    max_disp: f64,
    params: &DispersionParams,
) -> (f64, Vec<f64>) {
    let normalized: Vec<f64> = counts.iter().zip(size_factors).map(|(c, s)| c / s).collect();

    let rough = rough_disp_estimate(&normalized, design);
    let moments = moments_disp_estimate(&normalized, xim);
    let alpha_init = rough.min(moments).clamp(params.min_disp, max_disp);

    let mu = if linear_mu {
        linear_model_mu(&normalized, design)
            .into_iter()
            .zip(size_factors)
            .map(|(m, s)| (m * s).max(MIN_MU))
            .collect()
    } else {
        fit_gene(counts, size_factors, design, alpha_init, &GlmFitParams::default())
            .mu
            .into_iter()
            .map(|m| m.max(MIN_MU))
            .collect::<Vec<f64>>()
    };

    let search = line_search(counts, design, &mu, alpha_init.ln(), None, max_disp, params);
    let no_increase = search.last_lp < search.initial_lp + search.initial_lp.abs() / 1e6;
    let mut alpha = if no_increase {
        alpha_init
    } else {
        search.log_alpha.exp()
    };

    let converged = search.iterations < params.maxit && search.iterations != 1;
    if !converged && alpha > params.min_disp * 10.0 {
        alpha = grid_search(counts, design, &mu, None, params.min_disp, max_disp);
    }

    (alpha.clamp(params.min_disp, max_disp), mu)
}

/// Least squares fitted group means of normalized counts
fn linear_model_mu(normalized: &[f64], design: ArrayView2<f64>) -> Vec<f64> {
    let n = normalized.len();
    match linalg::least_squares(design, normalized) {
        Some(beta) => design.dot(&beta).to_vec(),
        None => vec![normalized.iter().sum::<f64>() / n as f64; n],
    }
}

/// Moment estimate from residuals of the linear model fit
fn rough_disp_estimate(normalized: &[f64], design: ArrayView2<f64>) -> f64 {
    let (n, p) = design.dim();
    let mu = linear_model_mu(normalized, design);
    let sum: f64 = normalized
        .iter()
        .zip(&mu)
        .map(|(&y, &m)| {
            let m = m.max(1.0);
            ((y - m).powi(2) - m) / (m * m)
        })
        .sum();
    (sum / (n - p) as f64).max(0.0)
}

/// Method of moments: (variance - xim * mean) / mean^2
fn moments_disp_estimate(normalized: &[f64], xim: f64) -> f64 {
    let mean = normalized.iter().sum::<f64>() / normalized.len() as f64;
    let var = crate::stats::sample_variance(normalized);
    if mean > 0.0 {
        (var - xim * mean) / (mean * mean)
    } else {
        f64::INFINITY
    }
}

/// Cox-Reid adjusted log likelihood of log(alpha), plus the prior if given
pub(crate) fn log_posterior(
    counts: &[f64],
    design: ArrayView2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<LogNormalPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let size = 1.0 / alpha;

    let mut ll = 0.0;
    let mut weights = Vec::with_capacity(mu.len());
    for (&y, &m) in counts.iter().zip(mu) {
        ll += ln_gamma(y + size) - ln_gamma(size) - y * (m + size).ln() - size * (1.0 + m * alpha).ln();
        weights.push(1.0 / (1.0 / m + alpha));
    }

    let xtwx = linalg::weighted_crossprod(design, &weights);
    let cox_reid = linalg::log_det_spd(&xtwx).map_or(0.0, |ld| -0.5 * ld);

    let prior_term = prior.map_or(0.0, |p| -(log_alpha - p.log_mean).powi(2) / (2.0 * p.var));
    ll + cox_reid + prior_term
}

/// Derivative of `log_posterior` with respect to log(alpha)
pub(crate) fn d_log_posterior(
    counts: &[f64],
    design: ArrayView2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<LogNormalPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let alpha_sq = alpha * alpha;
    let size = 1.0 / alpha;

    let mut dll = 0.0;
    let mut weights = Vec::with_capacity(mu.len());
    let mut dweights = Vec::with_capacity(mu.len());
    for (&y, &m) in counts.iter().zip(mu) {
        dll += (digamma(size) - digamma(y + size)) / alpha_sq + y / (alpha_sq * (m + size))
            + (1.0 + m * alpha).ln() / alpha_sq
            - m / (alpha * (1.0 + m * alpha));
        let w = 1.0 / (1.0 / m + alpha);
        weights.push(w);
        dweights.push(-w * w);
    }

    let b = linalg::weighted_crossprod(design, &weights);
    let db = linalg::weighted_crossprod(design, &dweights);
    let dcr = match linalg::invert(&b) {
        Some(inv) => -0.5 * inv.dot(&db).diag().sum(),
        None => 0.0,
    };

    let dprior = prior.map_or(0.0, |p| -(log_alpha - p.log_mean) / p.var);
    (dll + dcr) * alpha + dprior
}

/// Armijo line search on log(alpha) with adaptive step size
pub(crate) fn line_search(
    counts: &[f64],
    design: ArrayView2<f64>,
    mu: &[f64],
    log_alpha_init: f64,
    prior: Option<LogNormalPrior>,
    max_disp: f64,
    params: &DispersionParams,
) -> LineSearch {
    const HARD_MIN_LOG_ALPHA: f64 = -30.0;
    const HARD_MAX_LOG_ALPHA: f64 = 10.0;
    const EPSILON: f64 = 1e-4;
    let min_log_alpha = (params.min_disp / 10.0).ln();

    let mut log_alpha = log_alpha_init.clamp(HARD_MIN_LOG_ALPHA, max_disp.ln());
    let initial_lp = log_posterior(counts, design, mu, log_alpha, prior);
    let mut lp = initial_lp;
    let mut dlp = d_log_posterior(counts, design, mu, log_alpha, prior);
    let mut kappa = params.kappa_0;
    let mut accepted = 0;
    let mut iterations = params.maxit;

    for iter in 0..params.maxit {
        let raw = log_alpha + kappa * dlp;
        if raw < HARD_MIN_LOG_ALPHA {
            kappa = (HARD_MIN_LOG_ALPHA - log_alpha) / dlp;
        }
        if raw > HARD_MAX_LOG_ALPHA {
            kappa = (HARD_MAX_LOG_ALPHA - log_alpha) / dlp;
        }
        let proposal = log_alpha + kappa * dlp;
        let lp_proposal = log_posterior(counts, design, mu, proposal, prior);

        if -lp_proposal <= -lp - kappa * EPSILON * dlp * dlp {
            accepted += 1;
            let change = lp_proposal - lp;
            log_alpha = proposal;
            lp = lp_proposal;
            if change < params.disp_tol || log_alpha < min_log_alpha {
                iterations = iter + 1;
                break;
            }
            dlp = d_log_posterior(counts, design, mu, log_alpha, prior);
            kappa = (kappa * 1.1).min(params.kappa_0);
            if accepted % 5 == 0 {
                kappa /= 2.0;
            }
        } else {
            kappa /= 2.0;
        }
    }

    LineSearch {
        log_alpha,
        initial_lp,
        last_lp: lp,
        iterations,
    }
}

/// Coarse then fine grid maximisation of the log posterior over log(alpha)
pub(crate) fn grid_search(
    counts: &[f64],
    design: ArrayView2<f64>,
    mu: &[f64],
    prior: Option<LogNormalPrior>,
    min_disp: f64,
    max_disp: f64,
) -> f64 {
    const GRID_POINTS: usize = 20;
    let best_on = |lo: f64, hi: f64| -> (f64, f64) {
        let step = (hi - lo) / (GRID_POINTS - 1) as f64;
        let mut best = (lo, f64::NEG_INFINITY);
        for k in 0..GRID_POINTS {
            let la = lo + k as f64 * step;
            let lp = log_posterior(counts, design, mu, la, prior);
            if lp > best.1 {
                best = (la, lp);
            }
        }
        (best.0, step)
    };

    let (coarse, step) = best_on(min_disp.ln(), max_disp.ln());
    let (fine, _) = best_on(coarse - step, coarse + step);
    fine.exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn design() -> Array2<f64> {
        array![
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [1.0, 1.0],
            [1.0, 1.0],
            [1.0, 1.0]
        ]
    }

    #[test]
    fn test_linear_mu_detection() {
        assert!(has_one_row_per_coefficient(design().view()));
        let continuous = array![[1.0, 0.1], [1.0, 0.2], [1.0, 0.3]];
        assert!(!has_one_row_per_coefficient(continuous.view()));
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let counts = [12.0, 30.0, 8.0, 20.0, 60.0, 45.0, 80.0, 52.0];
        let mu = [17.5, 17.5, 17.5, 17.5, 59.25, 59.25, 59.25, 59.25];
        let x = design();
        let prior = Some(LogNormalPrior {
            log_mean: -2.0,
            var: 0.5,
        });
        for &la in &[-3.0, -1.0, 0.5] {
            let h = 1e-5;
            let numeric = (log_posterior(&counts, x.view(), &mu, la + h, prior)
                - log_posterior(&counts, x.view(), &mu, la - h, prior))
                / (2.0 * h);
            let analytic = d_log_posterior(&counts, x.view(), &mu, la, prior);
            assert!(
                (numeric - analytic).abs() < 1e-4 * (1.0 + numeric.abs()),
                "log alpha {}: numeric {} analytic {}",
                la,
                numeric,
                analytic
            );
        }
    }

    #[test]
    fn test_overdispersed_gene_gets_larger_estimate() {
        let x = design();
        let sf = [1.0; 8];
        let params = DispersionParams::default();
        let quiet = [100.0, 102.0, 98.0, 101.0, 200.0, 199.0, 203.0, 198.0];
        let noisy = [40.0, 180.0, 95.0, 150.0, 90.0, 320.0, 150.0, 260.0];
        let (d_quiet, _) = fit_genewise_dispersion(&quiet, &sf, x.view(), 1.0, true, 10.0, &params);
        let (d_noisy, mu) = fit_genewise_dispersion(&noisy, &sf, x.view(), 1.0, true, 10.0, &params);
        assert!(d_noisy > d_quiet);
        assert!(d_noisy > 0.05 && d_noisy < 1.0);
        assert!(d_quiet >= params.min_disp);
        assert!((mu[0] - 116.25).abs() < 1e-9);
    }

    #[test]
    fn test_grid_search_near_line_search() {
        let x = design();
        let counts = [40.0, 180.0, 95.0, 150.0, 90.0, 320.0, 150.0, 260.0];
        let mu = [116.25, 116.25, 116.25, 116.25, 205.0, 205.0, 205.0, 205.0];
        let params = DispersionParams::default();
        let ls = line_search(&counts, x.view(), &mu, (0.1f64).ln(), None, 10.0, &params);
        let grid = grid_search(&counts, x.view(), &mu, None, params.min_disp, 10.0);
        assert!((ls.log_alpha - grid.ln()).abs() < 0.1);
    }
}
