//! Empirical Bayes shrinkage of dispersions toward the trend

use ndarray::{Array1, Array2};
use rayon::prelude::*;

use super::gene_wise::{grid_search, line_search, LogNormalPrior};
use super::DispersionParams;
use crate::data::DESeqDataSet;
use crate::error::{AnalysisError, Result};
use crate::stats::{mad, trigamma};

/// Estimate the variance of the log-normal dispersion prior.
///
/// The squared MAD of log residuals around the trend, taken over genes with
/// gene-wise estimates of at least `100 * min_disp`, minus the sampling
/// variance expected for `m - p` residual degrees of freedom. Floored at 0.25.
pub fn estimate_dispersion_prior(dds: &mut DESeqDataSet, params: &DispersionParams) -> Result<()> {
    let genewise = dds.genewise_dispersions().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "gene-wise dispersions must be estimated before the prior".to_string(),
    })?;
    let fitted = dds.fitted_dispersions().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "the dispersion trend must be fitted before the prior".to_string(),
    })?;

    let residuals: Vec<f64> = genewise
        .iter()
        .zip(fitted.iter())
        .zip(dds.all_zero())
        .filter(|((&g, &f), &zero)| !zero && g.is_finite() && f.is_finite() && g >= 100.0 * params.min_disp)
        .map(|((&g, &f), _)| g.ln() - f.ln())
        .collect();

    if residuals.is_empty() {
        return Err(AnalysisError::NumericalError {
            operation: "dispersion prior".to_string(),
            details: "no gene-wise dispersion above 100 * min_disp".to_string(),
        });
    }

    let squared_logres = mad(&residuals).powi(2);
    let df = (dds.n_samples() - dds.design().n_coefs()) as f64;
    let expected = trigamma(df / 2.0);
    let prior_var = (squared_logres - expected).max(0.25);

    log::info!(
        "Dispersion prior variance {:.4} (log residual variance {:.4}, expected {:.4})",
        prior_var,
        squared_logres,
        expected
    );
    dds.set_dispersion_prior(prior_var, squared_logres);
    Ok(())
}

/// MAP dispersions for every gene, using the means from the gene-wise step
pub fn estimate_map_dispersions(dds: &mut DESeqDataSet, mu: &Array2<f64>, params: &DispersionParams) -> Result<()> {
    let genes: Vec<usize> = (0..dds.n_genes()).collect();
    map_dispersions_for(dds, &genes, mu, params)
}

/// MAP dispersions for a subset of genes; other rows keep their values.
///
/// Genes whose gene-wise estimate lies more than `outlier_sd` residual SDs
/// above the trend keep the gene-wise estimate and are flagged.
pub(crate) fn map_dispersions_for(
    dds: &mut DESeqDataSet,
    genes: &[usize],
    mu: &Array2<f64>,
    params: &DispersionParams,
) -> Result<()> {
    let (prior_var, squared_logres) = match (dds.dispersion_prior_var(), dds.squared_log_residuals()) {
        (Some(v), Some(s)) => (v, s),
        _ => {
            return Err(AnalysisError::InvalidInput {
                reason: "the dispersion prior must be estimated before MAP dispersions".to_string(),
            })
        }
    };
    let genewise = dds.genewise_dispersions().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "gene-wise dispersions are missing".to_string(),
    })?;
    let fitted = dds.fitted_dispersions().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "fitted dispersions are missing".to_string(),
    })?;

    let design = dds.design().matrix().clone();
    let counts = dds.counts().counts();
    let all_zero = dds.all_zero();
    let max_disp = params.max_disp(dds.n_samples());
    let outlier_cut = params.outlier_sd * squared_logres.sqrt();

    let results: Vec<(usize, f64, bool)> = genes
        .par_iter()
        .map(|&g| {
            let (gw, trend) = (genewise[g], fitted[g]);
            if all_zero[g] || !gw.is_finite() || !trend.is_finite() {
                return (g, f64::NAN, false);
            }
            if gw.ln() > trend.ln() + outlier_cut {
                return (g, gw, true);
            }
            let row = counts.row(g).to_vec();
            let gene_mu = mu.row(g).to_vec();
            let prior = LogNormalPrior {
                log_mean: trend.ln(),
                var: prior_var,
            };
            let init = if gw > 0.1 * trend { gw } else { trend };
            let search = line_search(&row, design.view(), &gene_mu, init.ln(), Some(prior), max_disp, params);
            let alpha = if search.iterations < params.maxit {
                search.log_alpha.exp()
            } else {
                grid_search(&row, design.view(), &gene_mu, Some(prior), params.min_disp, max_disp)
            };
            (g, alpha.clamp(params.min_disp, max_disp), false)
        })
        .collect();

    let n_genes = dds.n_genes();
    let mut dispersions = dds
        .dispersions()
        .cloned()
        .unwrap_or_else(|| Array1::from_elem(n_genes, f64::NAN));
    let mut outliers = dds
        .dispersion_outliers()
        .map(|o| o.to_vec())
        .unwrap_or_else(|| vec![false; n_genes]);
    let mut n_outliers = 0;
    for (g, alpha, outlier) in results {
        dispersions[g] = alpha;
        outliers[g] = outlier;
        if outlier {
            n_outliers += 1;
        }
    }
    log::debug!("{} of {} genes kept their gene-wise dispersion", n_outliers, genes.len());

    dds.set_map_dispersions(dispersions, outliers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::dispersion::{estimate_genewise_dispersions, fit_dispersion_trend};
    use crate::normalization::estimate_size_factors;

    fn dataset() -> DESeqDataSet {
        let n_genes = 60;
        let labels = ["A", "A", "A", "A", "B", "B", "B", "B"];
        let mut counts = Array2::<f64>::zeros((n_genes, labels.len()));
        for g in 0..n_genes {
            let base = 20.0 + 15.0 * g as f64;
            for (j, _) in labels.iter().enumerate() {
                let wobble = 1.0 + 0.25 * (((g * 7 + j * 3) % 5) as f64 - 2.0) / 2.0;
                let depth = if j % 2 == 0 { 1.0 } else { 1.3 };
                counts[[g, j]] = (base * wobble * depth).round();
            }
        }
        let samples: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        let genes: Vec<String> = (0..n_genes).map(|g| format!("gene{}", g)).collect();
        let matrix = CountMatrix::new(counts, genes, samples.clone()).unwrap();
        let mut meta = SampleMetadata::new(samples.clone());
        meta.add_column("group", samples).unwrap();
        DESeqDataSet::new(matrix, meta, "group", "A").unwrap()
    }

    #[test]
    fn test_map_lies_between_genewise_and_trend() {
        let mut dds = dataset();
        let params = DispersionParams::default();
        estimate_size_factors(&mut dds).unwrap();
        let mu = estimate_genewise_dispersions(&mut dds, &params).unwrap();
        fit_dispersion_trend(&mut dds, &params).unwrap();
        estimate_dispersion_prior(&mut dds, &params).unwrap();
        assert!(dds.dispersion_prior_var().unwrap() >= 0.25);

        estimate_map_dispersions(&mut dds, &mu, &params).unwrap();
        let gw = dds.genewise_dispersions().unwrap();
        let trend = dds.fitted_dispersions().unwrap();
        let map = dds.dispersions().unwrap();
        let outliers = dds.dispersion_outliers().unwrap();
        for g in 0..dds.n_genes() {
            assert!(map[g].is_finite() && map[g] > 0.0);
            if outliers[g] {
                assert_eq!(map[g], gw[g]);
                continue;
            }
            let (lo, hi) = if gw[g] < trend[g] { (gw[g], trend[g]) } else { (trend[g], gw[g]) };
            assert!(
                map[g] >= lo.max(params.min_disp) * 0.9 && map[g] <= hi * 1.1,
                "gene {}: gw {} trend {} map {}",
                g,
                gw[g],
                trend[g],
                map[g]
            );
        }
    }

    #[test]
    fn test_map_requires_prior() {
        let mut dds = dataset();
        let params = DispersionParams::default();
        estimate_size_factors(&mut dds).unwrap();
        let mu = estimate_genewise_dispersions(&mut dds, &params).unwrap();
        assert!(estimate_map_dispersions(&mut dds, &mu, &params).is_err());
    }
}
