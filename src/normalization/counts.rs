//! Counts per million

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{AnalysisError, Result};

/// Counts per million of each sample's library size.
///
/// Samples with an empty library produce zeros rather than NaN.
pub fn cpm(counts: ArrayView2<f64>, library_sizes: &[f64]) -> Result<Array2<f64>> {
    if library_sizes.len() != counts.ncols() {
        return Err(AnalysisError::DimensionMismatch {
            expected: format!("{} library sizes", counts.ncols()),
            got: format!("{}", library_sizes.len()),
        });
    }
    let mut result = counts.to_owned();
    for (mut col, &lib) in result.axis_iter_mut(Axis(1)).zip(library_sizes) {
        if lib > 0.0 {
            col.mapv_inplace(|c| c * 1e6 / lib);
        } else {
            col.fill(0.0);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cpm_scales_by_library() {
        let counts = array![[1.0, 5.0], [3.0, 5.0]];
        let out = cpm(counts.view(), &[4.0, 10.0]).unwrap();
        assert!((out[[0, 0]] - 250_000.0).abs() < 1e-6);
        assert!((out[[1, 1]] - 500_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_cpm_empty_library_and_mismatch() {
        let counts = array![[0.0, 2.0]];
        let out = cpm(counts.view(), &[0.0, 2.0]).unwrap();
        assert_eq!(out[[0, 0]], 0.0);
        assert!(cpm(counts.view(), &[1.0]).is_err());
    }
}
