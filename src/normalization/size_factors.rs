//! Size factor estimation using the median of ratios method

use ndarray::{Array1, ArrayView2, Axis};

use crate::data::DESeqDataSet;
use crate::error::{AnalysisError, Result};
use crate::stats::median;

/// Estimate size factors and store them (with normalized counts) in the dataset
pub fn estimate_size_factors(dds: &mut DESeqDataSet) -> Result<()> {
    let size_factors = median_of_ratios(dds.counts().counts())?;
    log::debug!("Size factors: {:?}", size_factors.to_vec());
    dds.set_size_factors(size_factors)
}

/// Median of ratios to the per-gene geometric mean.
///
/// Only genes with a positive count in every sample enter the geometric
/// means, which accounts for both sequencing depth and composition.
pub fn median_of_ratios(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(AnalysisError::EmptyData {
            reason: "count matrix is empty".to_string(),
        });
    }

    let log_geo_means: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().all(|&c| c > 0.0))
        .map(|(i, row)| (i, row.iter().map(|c| c.ln()).sum::<f64>() / n_samples as f64))
        .collect();

    if log_geo_means.is_empty() {
        return Err(AnalysisError::NumericalError {
            operation: "size factor estimation".to_string(),
            details: "every gene contains at least one zero; cannot compute geometric means".to_string(),
        });
    }

    let size_factors: Vec<f64> = (0..n_samples)
        .map(|j| {
            let log_ratios: Vec<f64> = log_geo_means
                .iter()
                .map(|&(i, lg)| counts[[i, j]].ln() - lg)
                .collect();
            median(&log_ratios).exp()
        })
        .collect();

    if size_factors.iter().any(|s| !s.is_finite() || *s <= 0.0) {
        return Err(AnalysisError::NumericalError {
            operation: "size factor estimation".to_string(),
            details: format!("invalid size factors {:?}", size_factors),
        });
    }
    Ok(Array1::from_vec(size_factors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_depth_difference_recovered() {
        let counts = array![
            [10.0, 20.0, 10.0, 20.0],
            [100.0, 200.0, 110.0, 220.0],
            [50.0, 100.0, 45.0, 90.0],
            [0.0, 5.0, 3.0, 4.0]
        ];
        let sf = median_of_ratios(counts.view()).unwrap();
        assert_eq!(sf.len(), 4);
        assert!((sf[1] / sf[0] - 2.0).abs() < 1e-10);
        assert!((sf[3] / sf[2] - 2.0).abs() < 1e-10);
        // geometric mean of size factors is one
        let log_mean: f64 = sf.iter().map(|s| s.ln()).sum::<f64>() / 4.0;
        assert!(log_mean.abs() < 0.1);
    }

    #[test]
    fn test_all_genes_with_zero_fail() {
        let counts = array![[0.0, 1.0], [2.0, 0.0]];
        assert!(median_of_ratios(counts.view()).is_err());
    }
}
