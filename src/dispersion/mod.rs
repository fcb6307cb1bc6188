//! Dispersion estimation for negative binomial models

mod gene_wise;
mod map;
mod trend;

pub use gene_wise::estimate_genewise_dispersions;
pub use map::{estimate_dispersion_prior, estimate_map_dispersions};
pub use trend::fit_dispersion_trend;

use ndarray::Array2;
use rayon::prelude::*;

use crate::data::DESeqDataSet;
use crate::error::{AnalysisError, Result};

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone)]
pub struct DispersionParams {
    /// Lower bound on any dispersion estimate
    pub min_disp: f64,
    /// Log posterior change for line search convergence
    pub disp_tol: f64,
    /// Initial step size for the line search
    pub kappa_0: f64,
    pub maxit: usize,
    /// Residual SDs above the trend at which a gene keeps its gene-wise estimate
    pub outlier_sd: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
        }
    }
}

impl DispersionParams {
    /// Upper bound on any dispersion estimate: max(10, number of samples)
    pub fn max_disp(&self, n_samples: usize) -> f64 {
        (n_samples as f64).max(10.0)
    }
}

/// Gene-wise estimates, trend, prior and MAP shrinkage in sequence
pub fn estimate_dispersions(dds: &mut DESeqDataSet, params: &DispersionParams) -> Result<()> {
    if dds.n_samples() <= dds.design().n_coefs() {
        return Err(AnalysisError::InvalidDesign {
            reason: "as many coefficients as samples; no replicates for dispersion estimation".to_string(),
        });
    }

    log::info!("Fitting dispersions...");
    let mu = estimate_genewise_dispersions(dds, params)?;
    fit_dispersion_trend(dds, params)?;
    estimate_dispersion_prior(dds, params)?;
    estimate_map_dispersions(dds, &mu, params)?;
    Ok(())
}

/// Re-estimate dispersions of selected genes after their counts changed.
///
/// The trend and prior stay fixed: gene-wise estimates are refit, the
/// existing trend is evaluated at the new means and MAP shrinkage reuses the
/// prior variance already on the dataset.
pub fn refit_dispersions(dds: &mut DESeqDataSet, genes: &[usize], params: &DispersionParams) -> Result<()> {
    if genes.is_empty() {
        return Ok(());
    }
    let trend = dds.dispersion_trend().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "a dispersion trend is required before refitting".to_string(),
    })?;
    let sf = dds
        .size_factors()
        .ok_or_else(|| AnalysisError::InvalidInput {
            reason: "size factors are required before refitting".to_string(),
        })?
        .to_vec();
    let mut genewise = dds
        .genewise_dispersions()
        .cloned()
        .ok_or_else(|| AnalysisError::InvalidInput {
            reason: "gene-wise dispersions are required before refitting".to_string(),
        })?;
    let mut fitted = dds
        .fitted_dispersions()
        .cloned()
        .ok_or_else(|| AnalysisError::InvalidInput {
            reason: "fitted dispersions are required before refitting".to_string(),
        })?;

    let design = dds.design().matrix().clone();
    let counts = dds.counts().counts();
    let all_zero = dds.all_zero().to_vec();
    let n_samples = dds.n_samples();
    let max_disp = params.max_disp(n_samples);
    let xim = sf.iter().map(|s| 1.0 / s).sum::<f64>() / n_samples as f64;
    let linear_mu = gene_wise::has_one_row_per_coefficient(design.view());

    log::info!("Refitting dispersions of {} genes", genes.len());
    let refits: Vec<(usize, f64, Vec<f64>)> = genes
        .par_iter()
        .map(|&g| {
            if all_zero[g] {
                return (g, f64::NAN, vec![f64::NAN; n_samples]);
            }
            let row = counts.row(g).to_vec();
            let (disp, mu) =
                gene_wise::fit_genewise_dispersion(&row, &sf, design.view(), xim, linear_mu, max_disp, params);
            (g, disp, mu)
        })
        .collect();

    let base_means = dds.base_means().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "normalized counts are required before refitting".to_string(),
    })?;
    let mut mu = Array2::from_elem((dds.n_genes(), n_samples), f64::NAN);
    for (g, disp, gene_mu) in refits {
        genewise[g] = disp;
        fitted[g] = if all_zero[g] { f64::NAN } else { trend.evaluate(base_means[g]) };
        for (j, m) in gene_mu.into_iter().enumerate() {
            mu[[g, j]] = m;
        }
    }

    dds.set_genewise_dispersions(genewise)?;
    dds.set_dispersion_trend(trend, fitted)?;
    map::map_dispersions_for(dds, genes, &mu, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::normalization::estimate_size_factors;

    fn dataset(labels: &[&str]) -> DESeqDataSet {
        let n_genes = 40;
        let mut counts = Array2::<f64>::zeros((n_genes, labels.len()));
        for g in 0..n_genes {
            for j in 0..labels.len() {
                let spread = 1.0 + 0.2 * (((g + 2 * j) % 4) as f64 - 1.5);
                counts[[g, j]] = ((30.0 + 12.0 * g as f64) * spread).round();
            }
        }
        let samples: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        let genes: Vec<String> = (0..n_genes).map(|g| format!("g{}", g)).collect();
        let matrix = CountMatrix::new(counts, genes, samples.clone()).unwrap();
        let mut meta = SampleMetadata::new(samples.clone());
        meta.add_column("group", samples).unwrap();
        DESeqDataSet::new(matrix, meta, "group", "ctrl").unwrap()
    }

    #[test]
    fn test_estimate_dispersions_populates_dataset() {
        let mut dds = dataset(&["ctrl", "ctrl", "ctrl", "trt", "trt", "trt"]);
        estimate_size_factors(&mut dds).unwrap();
        estimate_dispersions(&mut dds, &DispersionParams::default()).unwrap();
        let disp = dds.dispersions().unwrap();
        assert_eq!(disp.len(), 40);
        assert!(disp.iter().all(|d| d.is_finite() && *d > 0.0 && *d <= 10.0));
        assert!(dds.dispersion_trend().is_some());
    }

    #[test]
    fn test_refit_keeps_trend_and_prior() {
        let mut dds = dataset(&["ctrl", "ctrl", "ctrl", "trt", "trt", "trt"]);
        let params = DispersionParams::default();
        estimate_size_factors(&mut dds).unwrap();
        estimate_dispersions(&mut dds, &params).unwrap();
        let trend = dds.dispersion_trend();
        let prior = dds.dispersion_prior_var();
        let before = dds.dispersions().unwrap().clone();

        refit_dispersions(&mut dds, &[3], &params).unwrap();
        assert_eq!(dds.dispersion_trend(), trend);
        assert_eq!(dds.dispersion_prior_var(), prior);
        let after = dds.dispersions().unwrap();
        // unchanged counts give the same estimate back
        assert!((after[3] - before[3]).abs() < 1e-6 * before[3].max(1.0));
        assert_eq!(after[10], before[10]);
    }
}
