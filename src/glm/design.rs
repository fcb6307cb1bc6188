//! Single-factor design matrix with a chosen reference level

use ndarray::{Array1, Array2};

use crate::data::SampleMetadata;
use crate::error::{AnalysisError, Result};
use crate::io::Contrast;

/// Design of a one-factor model: intercept plus one indicator per
/// non-reference level.
#[derive(Debug, Clone)]
pub struct DesignInfo {
    /// Name of the design factor column in the sample metadata
    pub factor: String,
    /// Reference level (absorbed by the intercept)
    pub reference_level: String,
    /// All levels, reference first, then the rest sorted
    pub levels: Vec<String>,
    /// Coefficient names, `Intercept` then `<factor>_<level>_vs_<reference>`
    pub coef_names: Vec<String>,
    /// Level index of each sample
    pub sample_levels: Vec<usize>,
    matrix: Array2<f64>,
}

impl DesignInfo {
    /// Build the design from a metadata column
    pub fn from_metadata(metadata: &SampleMetadata, factor: &str, reference: &str) -> Result<Self> {
        let values = metadata.column(factor).ok_or_else(|| AnalysisError::InvalidDesign {
            reason: format!("design factor '{}' not found in sample metadata", factor),
        })?;

        let mut levels = metadata.levels(factor)?;
        let ref_pos = levels.iter().position(|l| l == reference).ok_or_else(|| {
            AnalysisError::InvalidDesign {
                reason: format!(
                    "reference level '{}' not found among levels of '{}': {:?}",
                    reference, factor, levels
                ),
            }
        })?;
        let reference_level = levels.remove(ref_pos);
        levels.insert(0, reference_level.clone());

        if levels.len() < 2 {
            return Err(AnalysisError::InvalidDesign {
                reason: format!("design factor '{}' has a single level", factor),
            });
        }

        let n_samples = values.len();
        let n_coefs = levels.len();
        if n_samples <= n_coefs {
            return Err(AnalysisError::InvalidDesign {
                reason: format!(
                    "{} samples for {} coefficients: no residual degrees of freedom for dispersion estimation",
                    n_samples, n_coefs
                ),
            });
        }

        let sample_levels: Vec<usize> = values
            .iter()
            .map(|v| levels.iter().position(|l| l == v).unwrap_or(0))
            .collect();

        let mut matrix = Array2::<f64>::zeros((n_samples, n_coefs));
        for (i, &level) in sample_levels.iter().enumerate() {
            matrix[[i, 0]] = 1.0;
            if level > 0 {
                matrix[[i, level]] = 1.0;
            }
        }

        let mut coef_names = vec!["Intercept".to_string()];
        coef_names.extend(
            levels
                .iter()
                .skip(1)
                .map(|l| format!("{}_{}_vs_{}", factor, l, reference_level)),
        );

        Ok(Self {
            factor: factor.to_string(),
            reference_level,
            levels,
            coef_names,
            sample_levels,
            matrix,
        })
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn n_coefs(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of samples in each level, in level order
    pub fn level_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.levels.len()];
        for &l in &self.sample_levels {
            sizes[l] += 1;
        }
        sizes
    }

    fn level_index(&self, level: &str) -> Result<usize> {
        self.levels
            .iter()
            .position(|l| l == level)
            .ok_or_else(|| AnalysisError::InvalidContrast {
                reason: format!(
                    "level '{}' not found in design factor '{}' (levels: {:?})",
                    level, self.factor, self.levels
                ),
            })
    }

    fn check_contrast(&self, contrast: &Contrast) -> Result<(usize, usize)> {
        if contrast.variable != self.factor {
            return Err(AnalysisError::InvalidContrast {
                reason: format!(
                    "contrast variable '{}' is not the design factor '{}'",
                    contrast.variable, self.factor
                ),
            });
        }
        if contrast.numerator == contrast.denominator {
            return Err(AnalysisError::InvalidContrast {
                reason: "numerator and denominator must differ".to_string(),
            });
        }
        Ok((
            self.level_index(&contrast.numerator)?,
            self.level_index(&contrast.denominator)?,
        ))
    }

    /// Contrast weights over the coefficients: numerator minus denominator
    pub fn contrast_vector(&self, contrast: &Contrast) -> Result<Array1<f64>> {
        let (num, den) = self.check_contrast(contrast)?;
        let mut c = Array1::<f64>::zeros(self.n_coefs());
        if num > 0 {
            c[num] += 1.0;
        }
        if den > 0 {
            c[den] -= 1.0;
        }
        Ok(c)
    }

    /// Single coefficient expressing the contrast, with its sign.
    /// Only contrasts against the reference level map onto one coefficient.
    pub fn contrast_coefficient(&self, contrast: &Contrast) -> Result<(usize, f64)> {
        let (num, den) = self.check_contrast(contrast)?;
        match (num, den) {
            (n, 0) => Ok((n, 1.0)),
            (0, d) => Ok((d, -1.0)),
            _ => Err(AnalysisError::InvalidContrast {
                reason: format!(
                    "'{}' vs '{}' does not involve the reference level '{}'",
                    contrast.numerator, contrast.denominator, self.reference_level
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(groups: &[&str]) -> SampleMetadata {
        let ids: Vec<String> = groups.iter().map(|s| s.to_string()).collect();
        let mut meta = SampleMetadata::new(ids.clone());
        meta.add_column("sample-name", ids).unwrap();
        meta
    }

    fn contrast(num: &str, den: &str) -> Contrast {
        Contrast {
            variable: "sample-name".to_string(),
            numerator: num.to_string(),
            denominator: den.to_string(),
        }
    }

    #[test]
    fn test_reference_level_first() {
        let meta = metadata(&["B", "B", "WT", "WT", "A", "A"]);
        let design = DesignInfo::from_metadata(&meta, "sample-name", "WT").unwrap();
        assert_eq!(design.levels, vec!["WT", "A", "B"]);
        assert_eq!(
            design.coef_names,
            vec!["Intercept", "sample-name_A_vs_WT", "sample-name_B_vs_WT"]
        );
        let x = design.matrix();
        assert_eq!(x.row(0).to_vec(), vec![1.0, 0.0, 1.0]);
        assert_eq!(x.row(2).to_vec(), vec![1.0, 0.0, 0.0]);
        assert_eq!(x.row(4).to_vec(), vec![1.0, 1.0, 0.0]);
        assert_eq!(design.level_sizes(), vec![2, 2, 2]);
    }

    #[test]
    fn test_missing_reference_level() {
        let meta = metadata(&["A", "A", "B", "B"]);
        assert!(DesignInfo::from_metadata(&meta, "sample-name", "WT").is_err());
    }

    #[test]
    fn test_saturated_design_rejected() {
        let meta = metadata(&["A", "B"]);
        assert!(DesignInfo::from_metadata(&meta, "sample-name", "A").is_err());
    }

    #[test]
    fn test_contrast_mapping() {
        let meta = metadata(&["WT", "WT", "A", "A", "B", "B"]);
        let design = DesignInfo::from_metadata(&meta, "sample-name", "WT").unwrap();

        assert_eq!(design.contrast_coefficient(&contrast("A", "WT")).unwrap(), (1, 1.0));
        assert_eq!(design.contrast_coefficient(&contrast("WT", "B")).unwrap(), (2, -1.0));
        assert!(design.contrast_coefficient(&contrast("A", "B")).is_err());

        let c = design.contrast_vector(&contrast("A", "B")).unwrap();
        assert_eq!(c.to_vec(), vec![0.0, 1.0, -1.0]);
        assert!(design.contrast_vector(&contrast("A", "C")).is_err());
        assert!(design.contrast_vector(&contrast("A", "A")).is_err());
    }
}
