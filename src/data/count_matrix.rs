//! Genes x samples count matrix

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{AnalysisError, Result};

/// Raw sequencing counts with gene and sample labels.
///
/// Rows are genes, columns are samples. Sample labels may repeat: the study
/// design names samples by their group, so replicates share a label.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new count matrix, validating shape and values
    pub fn new(
        counts: Array2<f64>,
        gene_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }
        if sample_ids.len() != n_samples {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }

        if let Some(bad) = counts.iter().find(|x| !x.is_finite() || **x < 0.0) {
            return Err(AnalysisError::InvalidCountMatrix {
                reason: format!("counts must be non-negative finite values, found {}", bad),
            });
        }

        Ok(Self {
            counts,
            gene_ids,
            sample_ids,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn into_counts(self) -> Array2<f64> {
        self.counts
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn gene_counts(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|id| id == gene_id)
    }

    /// Total counts per sample (library size)
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(1)).map(|col| col.sum()).collect()
    }

    /// Total counts per gene across all samples
    pub fn gene_totals(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(0)).map(|row| row.sum()).collect()
    }

    /// Replace the gene labels, keeping the data
    pub fn with_gene_ids(self, gene_ids: Vec<String>) -> Result<Self> {
        Self::new(self.counts, gene_ids, self.sample_ids)
    }

    /// Replace the sample labels, keeping the data
    pub fn with_sample_ids(self, sample_ids: Vec<String>) -> Result<Self> {
        Self::new(self.counts, self.gene_ids, sample_ids)
    }

    /// Subset to specific genes, in the given order
    pub fn subset_genes(&self, gene_indices: &[usize]) -> Result<Self> {
        let counts = self.counts.select(Axis(0), gene_indices);
        let gene_ids = gene_indices
            .iter()
            .map(|&i| self.gene_ids[i].clone())
            .collect();
        Self::new(counts, gene_ids, self.sample_ids.clone())
    }

    /// Keep the genes whose mask entry is true
    pub fn filter_genes(&self, keep: &[bool]) -> Result<Self> {
        if keep.len() != self.n_genes() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("mask of length {}", self.n_genes()),
                got: format!("mask of length {}", keep.len()),
            });
        }
        let indices: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| k.then_some(i))
            .collect();
        self.subset_genes(&indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_count_matrix_creation() {
        let matrix =
            CountMatrix::new(array![[10.0, 20.0, 30.0], [5.0, 15.0, 25.0]], ids("g", 2), ids("s", 3))
                .unwrap();
        assert_eq!(matrix.n_genes(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.gene_index("g2"), Some(1));
    }

    #[test]
    fn test_negative_and_nan_counts_rejected() {
        assert!(CountMatrix::new(array![[10.0, -5.0]], ids("g", 1), ids("s", 2)).is_err());
        assert!(CountMatrix::new(array![[10.0, f64::NAN]], ids("g", 1), ids("s", 2)).is_err());
    }

    #[test]
    fn test_label_length_mismatch() {
        let result = CountMatrix::new(array![[1.0, 2.0]], ids("g", 2), ids("s", 2));
        assert!(matches!(result, Err(AnalysisError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_duplicate_sample_labels_allowed() {
        let samples = vec!["WT".to_string(), "WT".to_string()];
        let matrix = CountMatrix::new(array![[1.0, 2.0]], ids("g", 1), samples).unwrap();
        assert_eq!(matrix.sample_ids(), &["WT", "WT"]);
    }

    #[test]
    fn test_sums_and_filter() {
        let matrix =
            CountMatrix::new(array![[10.0, 20.0], [5.0, 15.0], [0.0, 0.0]], ids("g", 3), ids("s", 2))
                .unwrap();
        assert_eq!(matrix.library_sizes(), vec![15.0, 35.0]);
        assert_eq!(matrix.gene_totals(), vec![30.0, 20.0, 0.0]);

        let kept = matrix.filter_genes(&[true, false, true]).unwrap();
        assert_eq!(kept.gene_ids(), &["g1", "g3"]);
        assert!(matrix.filter_genes(&[true]).is_err());
    }
}
