//! Low-expression gene filter in the manner of edgeR's `filterByExpr`

use serde::{Deserialize, Serialize};

use crate::data::CountMatrix;
use crate::error::{AnalysisError, Result};
use crate::normalization::cpm;
use crate::stats::median;

const TOL: f64 = 1e-14;

/// Thresholds for [`filter_by_expr`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExprFilterParams {
    /// Minimum count in the median library, converted to a CPM cutoff
    pub min_count: f64,
    /// Minimum total count across all samples
    pub min_total_count: f64,
    /// Sample count above which only `min_prop` of the extra samples must pass
    pub large_n: f64,
    pub min_prop: f64,
}

impl Default for ExprFilterParams {
    fn default() -> Self {
        Self {
            min_count: 5.0,
            min_total_count: 10.0,
            large_n: 1.0,
            min_prop: 0.4,
        }
    }
}

/// Outcome of the expression filter, with the quantities behind it
#[derive(Debug, Clone)]
pub struct ExprFilter {
    pub keep: Vec<bool>,
    pub lib_sizes: Vec<f64>,
    pub cpm_cutoff: f64,
    pub min_sample_size: f64,
    /// Total count per gene
    pub totals: Vec<f64>,
    /// Samples per gene with CPM at or above the cutoff
    pub n_above: Vec<usize>,
}

impl ExprFilter {
    pub fn n_kept(&self) -> usize {
        self.keep.iter().filter(|&&k| k).count()
    }

    /// Counts restricted to the kept genes
    pub fn apply(&self, counts: &CountMatrix) -> Result<CountMatrix> {
        counts.filter_genes(&self.keep)
    }
}

/// Decide which genes have enough reads to be worth testing.
///
/// All samples form a single group, so the smallest group size is the
/// number of samples.
pub fn filter_by_expr(counts: &CountMatrix, params: &ExprFilterParams) -> Result<ExprFilter> {
    if counts.n_samples() == 0 || counts.n_genes() == 0 {
        return Err(AnalysisError::EmptyData {
            reason: "cannot filter an empty count matrix".to_string(),
        });
    }

    let lib_sizes = counts.library_sizes();
    let median_lib = median(&lib_sizes);
    if !(median_lib > 0.0) {
        return Err(AnalysisError::InvalidCountMatrix {
            reason: "median library size is zero".to_string(),
        });
    }

    let mut min_sample_size = counts.n_samples() as f64;
    if min_sample_size > params.large_n {
        min_sample_size = params.large_n + (min_sample_size - params.large_n) * params.min_prop;
    }
    let cpm_cutoff = params.min_count / median_lib * 1e6;

    let normalized = cpm(counts.counts(), &lib_sizes)?;
    let n_above: Vec<usize> = normalized
        .rows()
        .into_iter()
        .map(|row| row.iter().filter(|&&v| v >= cpm_cutoff).count())
        .collect();
    let totals = counts.gene_totals();
    let keep: Vec<bool> = n_above
        .iter()
        .zip(&totals)
        .map(|(&n, &t)| n as f64 >= min_sample_size - TOL && t >= params.min_total_count - TOL)
        .collect();

    let filter = ExprFilter {
        keep,
        lib_sizes,
        cpm_cutoff,
        min_sample_size,
        totals,
        n_above,
    };
    log::info!(
        "filterByExpr: CPM cutoff {:.3}, min sample size {:.2}, kept {} of {} genes",
        filter.cpm_cutoff,
        filter.min_sample_size,
        filter.n_kept(),
        counts.n_genes()
    );
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn matrix() -> CountMatrix {
        let counts = array![
            [500.0, 600.0, 550.0, 580.0, 0.0],
            [0.0, 0.0, 0.0, 2.0, 3.0],
            [10.0, 0.0, 12.0, 0.0, 0.0],
            [30.0, 1.0, 25.0, 0.0, 20.0],
            [460.0, 399.0, 413.0, 418.0, 977.0]
        ];
        let genes = (0..5).map(|g| format!("g{}", g)).collect();
        let samples = (0..5).map(|s| format!("s{}", s)).collect();
        CountMatrix::new(counts, genes, samples).unwrap()
    }

    #[test]
    fn test_thresholds() {
        let f = filter_by_expr(&matrix(), &ExprFilterParams::default()).unwrap();
        // 1 + (5 - 1) * 0.4
        assert!((f.min_sample_size - 2.6).abs() < 1e-12);
        // median library is 1000
        assert!((f.cpm_cutoff - 5000.0).abs() < 1e-9);
    }

    #[test]
    fn test_keep_mask() {
        let m = matrix();
        let f = filter_by_expr(&m, &ExprFilterParams::default()).unwrap();
        assert_eq!(f.keep, vec![true, false, false, true, true]);
        assert_eq!(f.n_above[2], 2);
        let kept = f.apply(&m).unwrap();
        assert_eq!(kept.gene_ids(), &["g0".to_string(), "g3".to_string(), "g4".to_string()]);
    }

    #[test]
    fn test_min_total_count_applies() {
        let params = ExprFilterParams {
            min_count: 0.0,
            min_total_count: 40.0,
            ..ExprFilterParams::default()
        };
        let f = filter_by_expr(&matrix(), &params).unwrap();
        assert_eq!(f.keep, vec![true, false, false, true, true]);
    }
}
