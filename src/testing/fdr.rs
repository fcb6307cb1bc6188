//! Multiple testing correction

/// Benjamini-Hochberg adjusted p-values.
///
/// Missing p-values stay missing and do not count towards the number of tests.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..pvalues.len()).filter(|&i| !pvalues[i].is_nan()).collect();
    let m = order.len();
    let mut padj = vec![f64::NAN; pvalues.len()];
    if m == 0 {
        return padj;
    }
    order.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));

    let mut running_min = 1.0_f64;
    for (rank, &i) in order.iter().enumerate().rev() {
        let adjusted = pvalues[i] * m as f64 / (rank + 1) as f64;
        running_min = running_min.min(adjusted);
        padj[i] = running_min;
    }
    padj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_p_adjust() {
        // p.adjust(c(0.01, 0.04, 0.03, 0.5), "BH") = 0.04 0.0533 0.0533 0.5
        let padj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.5]);
        for (got, want) in padj.iter().zip([0.04, 0.16 / 3.0, 0.16 / 3.0, 0.5]) {
            assert!((got - want).abs() < 1e-12, "{} vs {}", got, want);
        }
    }

    #[test]
    fn test_missing_values_excluded() {
        let padj = benjamini_hochberg(&[0.02, f64::NAN, 0.04]);
        assert!(padj[1].is_nan());
        assert!((padj[0] - 0.04).abs() < 1e-12);
        assert!((padj[2] - 0.04).abs() < 1e-12);
        assert!(benjamini_hochberg(&[f64::NAN]).iter().all(|p| p.is_nan()));
    }
}
