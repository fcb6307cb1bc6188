//! Cook's distance outlier detection, replacement and filtering
//!
//! Cook's distances are computed from the LFC fit with a robust method of
//! moments dispersion: `cooks = pearson_res^2 / p * h / (1 - h)^2`.

use ndarray::Array2;
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::data::DESeqDataSet;
use crate::error::{AnalysisError, Result};
use crate::io::DESeqResults;
use crate::stats::trimmed_mean;

/// Lower bound on the robust dispersion used for Cook's distances
const MIN_ROBUST_DISP: f64 = 0.04;

/// Parameters for outlier replacement
#[derive(Debug, Clone)]
pub struct OutlierParams {
    /// Smallest design cell whose samples may have counts replaced
    pub min_replicates: usize,
    /// Trim proportion for the replacement mean
    pub trim: f64,
}

impl Default for OutlierParams {
    fn default() -> Self {
        Self {
            min_replicates: 7,
            trim: 0.2,
        }
    }
}

/// Compute Cook's distances for every gene and sample and store them
pub fn calculate_cooks(dds: &mut DESeqDataSet) -> Result<()> {
    let mu = dds.mu().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "the GLM must be fitted before Cook's distances".to_string(),
    })?;
    let hat = dds.hat_diagonals().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "hat diagonals are missing".to_string(),
    })?;
    let normalized = dds.normalized_counts().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "normalized counts are missing".to_string(),
    })?;
    let counts = dds.counts().counts();
    let p = dds.design().n_coefs() as f64;
    let cells = design_cells(dds);
    let dispersions = robust_moments_dispersion(normalized, &cells);
    let (n_genes, n_samples) = (dds.n_genes(), dds.n_samples());

    let rows: Vec<Vec<f64>> = (0..n_genes)
        .into_par_iter()
        .map(|g| {
            let alpha = dispersions[g];
            (0..n_samples)
                .map(|j| {
                    let (y, m, h) = (counts[[g, j]], mu[[g, j]], hat[[g, j]]);
                    let v = m + alpha * m * m;
                    if !(v > 0.0) || !h.is_finite() || h >= 1.0 {
                        return f64::NAN;
                    }
                    (y - m).powi(2) / v / p * h / (1.0 - h).powi(2)
                })
                .collect()
        })
        .collect();

    let mut cooks = Array2::<f64>::zeros((n_genes, n_samples));
    for (g, row) in rows.into_iter().enumerate() {
        for (j, c) in row.into_iter().enumerate() {
            cooks[[g, j]] = c;
        }
    }
    dds.set_cooks(cooks)
}

/// Sample indices of each level of the design factor
fn design_cells(dds: &DESeqDataSet) -> Vec<Vec<usize>> {
    let design = dds.design();
    (0..design.levels.len())
        .map(|level| {
            design
                .sample_levels
                .iter()
                .enumerate()
                .filter(|(_, &l)| l == level)
                .map(|(j, _)| j)
                .collect()
        })
        .collect()
}

/// Dispersion from trimmed moments: `max((v - m) / m^2, 0.04)`.
///
/// Variances come from trimmed within-cell variances (maximum over cells with
/// at least three samples) or, with no such cell, a trimmed variance over all
/// samples.
pub(crate) fn robust_moments_dispersion(normalized: &Array2<f64>, cells: &[Vec<usize>]) -> Vec<f64> {
    let usable: Vec<&Vec<usize>> = cells.iter().filter(|c| c.len() >= 3).collect();
    let all: Vec<usize> = (0..normalized.ncols()).collect();

    (0..normalized.nrows())
        .into_par_iter()
        .map(|g| {
            let values = normalized.row(g).to_vec();
            let variance = if usable.is_empty() {
                trimmed_variance(&values, &all, 1.0 / 8.0, 1.51)
            } else {
                usable
                    .iter()
                    .map(|cell| {
                        let (trim, scale) = cell_trim(cell.len());
                        trimmed_variance(&values, cell, trim, scale)
                    })
                    .fold(f64::NEG_INFINITY, f64::max)
            };
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let alpha = (variance - mean) / (mean * mean);
            if alpha.is_finite() {
                alpha.max(MIN_ROBUST_DISP)
            } else {
                MIN_ROBUST_DISP
            }
        })
        .collect()
}

/// Trim ratio and scale for a cell of `n` samples
fn cell_trim(n: usize) -> (f64, f64) {
    let n = n as f64;
    if n <= 3.5 {
        (1.0 / 3.0, 2.04)
    } else if n <= 23.5 {
        (1.0 / 4.0, 1.86)
    } else {
        (1.0 / 8.0, 1.51)
    }
}

fn trimmed_variance(values: &[f64], samples: &[usize], trim: f64, scale: f64) -> f64 {
    let cell: Vec<f64> = samples.iter().map(|&j| values[j]).collect();
    let center = trimmed_mean(&cell, trim);
    let sq: Vec<f64> = cell.iter().map(|v| (v - center).powi(2)).collect();
    scale * trimmed_mean(&sq, trim)
}

/// 99% quantile of F(p, m - p)
pub fn cooks_cutoff(n_samples: usize, n_coefs: usize) -> Result<f64> {
    if n_samples <= n_coefs {
        return Ok(f64::INFINITY);
    }
    let f = FisherSnedecor::new(n_coefs as f64, (n_samples - n_coefs) as f64).map_err(|e| {
        AnalysisError::NumericalError {
            operation: "Cook's cutoff".to_string(),
            details: e.to_string(),
        }
    })?;
    Ok(f.inverse_cdf(0.99))
}

/// Samples whose design cell has at least `min_replicates` members
pub fn replaceable_samples(dds: &DESeqDataSet, min_replicates: usize) -> Vec<bool> {
    let sizes = dds.design().level_sizes();
    dds.design()
        .sample_levels
        .iter()
        .map(|&level| sizes[level] >= min_replicates)
        .collect()
}

/// Replace outlier counts in replaceable samples.
///
/// A count whose Cook's distance exceeds `cutoff` becomes the 20% trimmed mean
/// of the gene's normalized counts times the sample's size factor, truncated
/// to an integer. Returns the indices of genes with replaced counts.
pub fn replace_outliers(dds: &mut DESeqDataSet, cutoff: f64, params: &OutlierParams) -> Result<Vec<usize>> {
    let replaceable = replaceable_samples(dds, params.min_replicates);
    dds.set_replaceable(replaceable.clone());
    if !replaceable.iter().any(|&r| r) {
        log::debug!("No design cell has {} or more samples; outliers are not replaced", params.min_replicates);
        return Ok(Vec::new());
    }

    let cooks = dds.cooks().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "Cook's distances must be computed before replacing outliers".to_string(),
    })?;
    let sf = dds
        .size_factors()
        .ok_or_else(|| AnalysisError::InvalidInput {
            reason: "size factors are missing".to_string(),
        })?
        .to_vec();
    let normalized = dds.normalized_counts().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "normalized counts are missing".to_string(),
    })?;

    let mut counts = dds.counts().counts().to_owned();
    let mut replaced = vec![false; dds.n_genes()];
    for g in 0..dds.n_genes() {
        let outliers: Vec<usize> = (0..dds.n_samples())
            .filter(|&j| replaceable[j] && cooks[[g, j]] > cutoff)
            .collect();
        if outliers.is_empty() {
            continue;
        }
        let trimmed = trimmed_mean(&normalized.row(g).to_vec(), params.trim);
        for j in outliers {
            counts[[g, j]] = (trimmed * sf[j]).trunc();
        }
        replaced[g] = true;
    }

    let genes: Vec<usize> = replaced.iter().enumerate().filter(|(_, &r)| r).map(|(g, _)| g).collect();
    log::info!("Replacing outlier counts in {} genes", genes.len());
    dds.replace_counts(counts, replaced)?;
    Ok(genes)
}

/// Remove p-values of genes with a Cook's outlier among non-replaceable samples.
///
/// With a two-coefficient design a gene is kept when three or more samples
/// have a count above that of the sample with the largest Cook's distance.
pub fn cooks_filter(results: &mut DESeqResults, dds: &DESeqDataSet, cutoff: f64) -> Result<usize> {
    let cooks = dds.cooks().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "Cook's distances must be computed before filtering".to_string(),
    })?;
    let n_samples = dds.n_samples();
    let considered: Vec<bool> = match dds.replaceable() {
        Some(r) => r.iter().map(|&x| !x).collect(),
        None => vec![true; n_samples],
    };
    let counts = dds.original_counts();
    let two_groups = dds.design().n_coefs() == 2;

    let mut n_filtered = 0;
    for g in 0..results.n_genes() {
        let max = (0..n_samples)
            .filter(|&j| considered[j] && cooks[[g, j]].is_finite())
            .map(|j| (j, cooks[[g, j]]))
            .fold(None, |best: Option<(usize, f64)>, (j, c)| match best {
                Some((_, b)) if b >= c => best,
                _ => Some((j, c)),
            });
        let Some((sample, max_cooks)) = max else {
            continue;
        };
        results.max_cooks[g] = max_cooks;
        if max_cooks <= cutoff {
            continue;
        }
        if two_groups {
            let outlier_count = counts[[g, sample]];
            let above = (0..n_samples).filter(|&j| counts[[g, j]] > outlier_count).count();
            if above >= 3 {
                continue;
            }
        }
        results.pvalues[g] = f64::NAN;
        n_filtered += 1;
    }
    log::debug!("Cook's filtering removed p-values of {} genes", n_filtered);
    Ok(n_filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeseqConfig;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::io::Contrast;
    use crate::{deseq_results, run_deseq};
    use ndarray::array;

    const SPIKED_GENE: usize = 7;

    fn dataset_from(counts: Array2<f64>, groups: &[&str]) -> DESeqDataSet {
        let samples: Vec<String> = (0..groups.len()).map(|j| format!("s{}", j)).collect();
        let genes = (0..counts.nrows()).map(|g| format!("gene{}", g)).collect();
        let matrix = CountMatrix::new(counts, genes, samples.clone()).unwrap();
        let mut meta = SampleMetadata::new(samples);
        meta.add_column("condition", groups.iter().map(|g| g.to_string()).collect())
            .unwrap();
        DESeqDataSet::new(matrix, meta, "condition", groups[0]).unwrap()
    }

    /// Two groups of `n_per_group` with one huge count in the first sample
    /// of `SPIKED_GENE`
    fn spiked_dataset(n_per_group: usize) -> DESeqDataSet {
        let n = 2 * n_per_group;
        let n_genes = 30;
        let mut counts = Array2::<f64>::zeros((n_genes, n));
        for g in 0..n_genes {
            let base = 80.0 + 15.0 * g as f64;
            for j in 0..n {
                let fold = if g % 5 == 0 && j >= n_per_group { 4.0 } else { 1.0 };
                let jitter = 1.0 + 0.12 * (((g * 3 + j) % 5) as f64 - 2.0) / 2.0;
                counts[[g, j]] = (base * fold * jitter).round();
            }
        }
        counts[[SPIKED_GENE, 0]] = 20000.0;
        let groups: Vec<&str> = (0..n)
            .map(|j| if j < n_per_group { "control" } else { "treated" })
            .collect();
        dataset_from(counts, &groups)
    }

    fn fitted_results(n_per_group: usize) -> (DESeqDataSet, DESeqResults) {
        let mut dds = spiked_dataset(n_per_group);
        let config = DeseqConfig::default();
        run_deseq(&mut dds, &config).unwrap();
        let contrast = Contrast::new("condition", "treated", "control");
        let res = deseq_results(&dds, &contrast, &config).unwrap();
        (dds, res)
    }

    #[test]
    fn test_cutoff_matches_f_quantile() {
        // qf(0.99, 2, 6) = 10.92477
        let cutoff = cooks_cutoff(8, 2).unwrap();
        assert!((cutoff - 10.92477).abs() < 1e-3);
        assert!(cooks_cutoff(2, 2).unwrap().is_infinite());
    }

    #[test]
    fn test_robust_dispersion_ignores_single_spike() {
        let normalized = array![
            [100.0, 102.0, 98.0, 101.0, 99.0, 100.0],
            [100.0, 102.0, 98.0, 5000.0, 99.0, 100.0]
        ];
        let cells = vec![vec![0, 1, 2], vec![3, 4, 5]];
        let disp = robust_moments_dispersion(&normalized, &cells);
        assert_eq!(disp[0], MIN_ROBUST_DISP);
        // trimming a third of each cell keeps the middle value only
        assert_eq!(disp[1], MIN_ROBUST_DISP);
    }

    #[test]
    fn test_cell_trim_bands() {
        assert_eq!(cell_trim(3), (1.0 / 3.0, 2.04));
        assert_eq!(cell_trim(10), (1.0 / 4.0, 1.86));
        assert_eq!(cell_trim(30), (1.0 / 8.0, 1.51));
    }

    #[test]
    fn test_outlier_removes_pvalue_in_small_groups() {
        let (dds, res) = fitted_results(3);
        let cutoff = cooks_cutoff(6, 2).unwrap();
        assert!(res.max_cooks[SPIKED_GENE] > cutoff, "max cooks {}", res.max_cooks[SPIKED_GENE]);
        assert!(res.pvalues[SPIKED_GENE].is_nan());
        assert!(dds.replaced().is_none());
        // genes without outliers keep their p-values
        assert!(res.pvalues[0].is_finite());
    }

    #[test]
    fn test_outlier_replaced_in_large_groups() {
        let (dds, res) = fitted_results(7);
        assert!(dds.replaced().unwrap()[SPIKED_GENE]);
        assert_eq!(dds.original_counts()[[SPIKED_GENE, 0]], 20000.0);
        let now = dds.counts().counts()[[SPIKED_GENE, 0]];
        assert!(now < 1000.0, "replacement count {}", now);
        assert!(res.pvalues[SPIKED_GENE].is_finite());
        assert!(res.log2_fold_changes[SPIKED_GENE].abs() < 0.5);
        assert!(dds.converged().unwrap()[SPIKED_GENE]);
    }

    #[test]
    fn test_filter_exempts_outlier_with_three_higher_counts() {
        let counts = array![
            [100.0, 110.0, 90.0, 900.0, 1000.0, 1100.0],
            [5000.0, 100.0, 100.0, 100.0, 100.0, 100.0]
        ];
        let mut dds = dataset_from(counts, &["a", "a", "a", "b", "b", "b"]);
        let mut cooks = Array2::<f64>::zeros((2, 6));
        cooks[[0, 0]] = 50.0;
        cooks[[1, 0]] = 50.0;
        dds.set_cooks(cooks).unwrap();

        let mut res = DESeqResults::new(dds.gene_ids().to_vec(), Contrast::new("condition", "b", "a"));
        res.pvalues = vec![0.01, 0.01];
        let n = cooks_filter(&mut res, &dds, 10.0).unwrap();
        assert_eq!(n, 1);
        // samples 3, 4 and 5 count more than the outlier sample of gene0
        assert_eq!(res.pvalues[0], 0.01);
        assert!(res.pvalues[1].is_nan());
        assert_eq!(res.max_cooks[0], 50.0);
    }

    #[test]
    fn test_exemption_needs_two_coefficients() {
        let counts = array![[100.0, 110.0, 90.0, 900.0, 1000.0, 1100.0, 500.0, 520.0, 480.0]];
        let mut dds = dataset_from(counts, &["a", "a", "a", "b", "b", "b", "c", "c", "c"]);
        let mut cooks = Array2::<f64>::zeros((1, 9));
        cooks[[0, 0]] = 50.0;
        dds.set_cooks(cooks).unwrap();

        let mut res = DESeqResults::new(dds.gene_ids().to_vec(), Contrast::new("condition", "b", "a"));
        res.pvalues = vec![0.01];
        cooks_filter(&mut res, &dds, 10.0).unwrap();
        assert!(res.pvalues[0].is_nan());
    }
}
