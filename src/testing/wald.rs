//! Wald test for a contrast of GLM coefficients

use std::f64::consts::LN_2;

use super::fdr::benjamini_hochberg;
use super::pvalue::normal_pvalue;
use crate::data::DESeqDataSet;
use crate::error::{AnalysisError, Result};
use crate::io::{Contrast, DESeqResults};

/// Wald statistics for `contrast`.
///
/// The contrast estimate is `c' beta` with variance `c' Sigma c`, where Sigma
/// is the per-gene sandwich covariance of the fit. Log fold changes are
/// reported on the log2 scale. Genes with zero base mean keep missing values.
/// Adjusted p-values here use plain BH; filtering may replace them later.
pub fn wald_test(dds: &DESeqDataSet, contrast: &Contrast) -> Result<DESeqResults> {
    let coefficients = dds.coefficients().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "the GLM must be fitted before testing".to_string(),
    })?;
    let covariances = dds.covariances().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "coefficient covariances are missing".to_string(),
    })?;
    let base_means = dds.base_means().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "size factors must be estimated before testing".to_string(),
    })?;
    let weights = dds.design().contrast_vector(contrast)?;
    let p = weights.len();

    let mut results = DESeqResults::new(dds.gene_ids().to_vec(), contrast.clone());
    results.base_means = base_means.to_vec();
    if let Some(disp) = dds.dispersions() {
        results.dispersions = disp.to_vec();
    }

    for g in 0..dds.n_genes() {
        if !(base_means[g] > 0.0) {
            continue;
        }
        let estimate: f64 = (0..p).map(|j| weights[j] * coefficients[[g, j]]).sum();
        let variance: f64 = (0..p)
            .map(|j| {
                weights[j]
                    * (0..p)
                        .map(|k| covariances[[g, j, k]] * weights[k])
                        .sum::<f64>()
            })
            .sum();
        let se = variance.sqrt();

        results.log2_fold_changes[g] = estimate / LN_2;
        results.lfc_se[g] = se / LN_2;
        if se > 0.0 && se.is_finite() && estimate.is_finite() {
            let stat = estimate / se;
            results.stat[g] = stat;
            results.pvalues[g] = normal_pvalue(stat);
        }
    }

    results.padj = benjamini_hochberg(&results.pvalues);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::dispersion::{estimate_dispersions, DispersionParams};
    use crate::glm::{fit_lfc, GlmFitParams};
    use crate::normalization::estimate_size_factors;
    use ndarray::Array2;

    fn fitted_dataset() -> DESeqDataSet {
        let labels = ["WT", "WT", "WT", "KO", "KO", "KO"];
        let n_genes = 30;
        let mut counts = Array2::<f64>::zeros((n_genes, 6));
        for g in 0..n_genes {
            let base = 50.0 + 10.0 * g as f64;
            for j in 0..6 {
                let fold = if g < 5 && j >= 3 { 4.0 } else { 1.0 };
                let jitter = 1.0 + 0.1 * (((g + j) % 3) as f64 - 1.0);
                counts[[g, j]] = (base * fold * jitter).round();
            }
        }
        // one empty gene
        counts.row_mut(n_genes - 1).fill(0.0);
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
    fn test_changed_genes_detected() {
        let dds = fitted_dataset();
        let res = wald_test(&dds, &Contrast::new("sample-name", "KO", "WT")).unwrap();
        for g in 0..5 {
            assert!(res.log2_fold_changes[g] > 1.5, "gene {} lfc {}", g, res.log2_fold_changes[g]);
            assert!(res.pvalues[g] < 1e-3);
        }
        assert!(res.log2_fold_changes[10].abs() < 0.5);
        let last = dds.n_genes() - 1;
        assert_eq!(res.base_means[last], 0.0);
        assert!(res.stat[last].is_nan() && res.pvalues[last].is_nan());
    }

    #[test]
    fn test_reversed_contrast_flips_sign() {
        let dds = fitted_dataset();
        let fwd = wald_test(&dds, &Contrast::new("sample-name", "KO", "WT")).unwrap();
        let rev = wald_test(&dds, &Contrast::new("sample-name", "WT", "KO")).unwrap();
        assert!((fwd.log2_fold_changes[0] + rev.log2_fold_changes[0]).abs() < 1e-12);
        assert!((fwd.pvalues[0] - rev.pvalues[0]).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_level_rejected() {
        let dds = fitted_dataset();
        assert!(wald_test(&dds, &Contrast::new("sample-name", "HET", "WT")).is_err());
    }
}
