//! Two-sided p-values from test statistics

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Two-sided p-value of a standard normal statistic
pub fn normal_pvalue(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    Normal::new(0.0, 1.0).map_or(f64::NAN, |n| 2.0 * n.sf(z.abs()))
}

/// Two-sided p-value of a Student t statistic with `df` degrees of freedom
pub fn t_pvalue(t: f64, df: f64) -> f64 {
    if !t.is_finite() || !(df > 0.0) {
        return f64::NAN;
    }
    StudentsT::new(0.0, 1.0, df).map_or(f64::NAN, |d| 2.0 * d.sf(t.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_pvalue() {
        assert!((normal_pvalue(0.0) - 1.0).abs() < 1e-12);
        assert!((normal_pvalue(1.959964) - 0.05).abs() < 1e-6);
        assert_eq!(normal_pvalue(-2.5), normal_pvalue(2.5));
        assert!(normal_pvalue(f64::NAN).is_nan());
    }

    #[test]
    fn test_t_pvalue_heavier_tails() {
        // 2 * pt(-2, 3) = 0.1393
        assert!((t_pvalue(2.0, 3.0) - 0.139326).abs() < 1e-5);
        assert!(t_pvalue(2.0, 3.0) > normal_pvalue(2.0));
        assert!(t_pvalue(1.0, 0.0).is_nan());
    }
}
