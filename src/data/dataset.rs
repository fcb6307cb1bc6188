//! DESeqDataSet: counts, design and the fitted state of the model

use ndarray::{Array1, Array2, Array3, Axis};

use super::{CountMatrix, SampleMetadata};
use crate::error::{AnalysisError, Result};
use crate::glm::DesignInfo;

/// Fitted dispersion-mean relationship
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispersionTrend {
    /// alpha(mean) = asympt_disp + extra_pois / mean
    Parametric { asympt_disp: f64, extra_pois: f64 },
    /// Constant trend at the mean of the gene-wise estimates
    Mean(f64),
}

impl DispersionTrend {
    pub fn evaluate(&self, mean: f64) -> f64 {
        match *self {
            DispersionTrend::Parametric {
                asympt_disp,
                extra_pois,
            } => asympt_disp + extra_pois / mean,
            DispersionTrend::Mean(value) => value,
        }
    }
}

/// Main data structure for differential expression.
///
/// Holds the raw counts, sample metadata and design, plus every quantity
/// estimated along the way. Counts may be modified by outlier replacement;
/// the counts as loaded remain available through `original_counts`.
#[derive(Debug, Clone)]
pub struct DESeqDataSet {
    counts: CountMatrix,
    original_counts: Array2<f64>,
    metadata: SampleMetadata,
    design: DesignInfo,
    all_zero: Vec<bool>,

    size_factors: Option<Array1<f64>>,
    normalized_counts: Option<Array2<f64>>,

    genewise_dispersions: Option<Array1<f64>>,
    fitted_dispersions: Option<Array1<f64>>,
    dispersions: Option<Array1<f64>>,
    dispersion_trend: Option<DispersionTrend>,
    dispersion_prior_var: Option<f64>,
    squared_log_residuals: Option<f64>,
    dispersion_outliers: Option<Vec<bool>>,

    coefficients: Option<Array2<f64>>,
    covariances: Option<Array3<f64>>,
    mu: Option<Array2<f64>>,
    hat_diagonals: Option<Array2<f64>>,
    converged: Option<Vec<bool>>,

    cooks: Option<Array2<f64>>,
    replaceable: Option<Vec<bool>>,
    replaced: Option<Vec<bool>>,
}

impl DESeqDataSet {
    /// Create a dataset with a single-factor design
    pub fn new(
        counts: CountMatrix,
        metadata: SampleMetadata,
        design_factor: &str,
        reference_level: &str,
    ) -> Result<Self> {
        if counts.sample_ids() != metadata.sample_ids() {
            return Err(AnalysisError::InvalidMetadata {
                reason: "sample IDs in counts and metadata do not match".to_string(),
            });
        }
        if counts.n_genes() == 0 {
            return Err(AnalysisError::EmptyData {
                reason: "count matrix has no genes".to_string(),
            });
        }
        let design = DesignInfo::from_metadata(&metadata, design_factor, reference_level)?;
        let original_counts = counts.counts().to_owned();
        let all_zero = zero_rows(&original_counts);

        Ok(Self {
            counts,
            original_counts,
            metadata,
            design,
            all_zero,
            size_factors: None,
            normalized_counts: None,
            genewise_dispersions: None,
            fitted_dispersions: None,
            dispersions: None,
            dispersion_trend: None,
            dispersion_prior_var: None,
            squared_log_residuals: None,
            dispersion_outliers: None,
            coefficients: None,
            covariances: None,
            mu: None,
            hat_diagonals: None,
            converged: None,
            cooks: None,
            replaceable: None,
            replaced: None,
        })
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    /// Counts as loaded, before any outlier replacement
    pub fn original_counts(&self) -> &Array2<f64> {
        &self.original_counts
    }

    pub fn metadata(&self) -> &SampleMetadata {
        &self.metadata
    }

    pub fn design(&self) -> &DesignInfo {
        &self.design
    }

    pub fn gene_ids(&self) -> &[String] {
        self.counts.gene_ids()
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    /// Genes whose current counts are all zero
    pub fn all_zero(&self) -> &[bool] {
        &self.all_zero
    }

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    pub fn normalized_counts(&self) -> Option<&Array2<f64>> {
        self.normalized_counts.as_ref()
    }

    /// Mean of normalized counts per gene
    pub fn base_means(&self) -> Option<Array1<f64>> {
        self.normalized_counts
            .as_ref()
            .and_then(|n| n.mean_axis(Axis(1)))
    }

    pub fn genewise_dispersions(&self) -> Option<&Array1<f64>> {
        self.genewise_dispersions.as_ref()
    }

    pub fn fitted_dispersions(&self) -> Option<&Array1<f64>> {
        self.fitted_dispersions.as_ref()
    }

    /// Final (MAP) dispersions used for LFC fitting
    pub fn dispersions(&self) -> Option<&Array1<f64>> {
        self.dispersions.as_ref()
    }

    pub fn dispersion_trend(&self) -> Option<DispersionTrend> {
        self.dispersion_trend
    }

    pub fn dispersion_prior_var(&self) -> Option<f64> {
        self.dispersion_prior_var
    }

    /// Squared MAD of log dispersion residuals around the trend
    pub fn squared_log_residuals(&self) -> Option<f64> {
        self.squared_log_residuals
    }

    pub fn dispersion_outliers(&self) -> Option<&[bool]> {
        self.dispersion_outliers.as_deref()
    }

    /// GLM coefficients, natural log scale (genes x coefficients)
    pub fn coefficients(&self) -> Option<&Array2<f64>> {
        self.coefficients.as_ref()
    }

    pub fn covariances(&self) -> Option<&Array3<f64>> {
        self.covariances.as_ref()
    }

    pub fn mu(&self) -> Option<&Array2<f64>> {
        self.mu.as_ref()
    }

    pub fn hat_diagonals(&self) -> Option<&Array2<f64>> {
        self.hat_diagonals.as_ref()
    }

    pub fn converged(&self) -> Option<&[bool]> {
        self.converged.as_deref()
    }

    pub fn cooks(&self) -> Option<&Array2<f64>> {
        self.cooks.as_ref()
    }

    /// Samples in design cells large enough for outlier replacement
    pub fn replaceable(&self) -> Option<&[bool]> {
        self.replaceable.as_deref()
    }

    /// Genes whose counts were replaced and refit
    pub fn replaced(&self) -> Option<&[bool]> {
        self.replaced.as_deref()
    }

    fn check_genes(&self, what: &str, len: usize) -> Result<()> {
        if len != self.n_genes() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} {}", self.n_genes(), what),
                got: format!("{}", len),
            });
        }
        Ok(())
    }

    fn check_shape(&self, what: &str, shape: (usize, usize)) -> Result<()> {
        if shape != (self.n_genes(), self.n_samples()) {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} of shape ({}, {})", what, self.n_genes(), self.n_samples()),
                got: format!("{:?}", shape),
            });
        }
        Ok(())
    }

    pub fn set_size_factors(&mut self, size_factors: Array1<f64>) -> Result<()> {
        if size_factors.len() != self.n_samples() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} size factors", self.n_samples()),
                got: format!("{}", size_factors.len()),
            });
        }
        if size_factors.iter().any(|&s| !s.is_finite() || s <= 0.0) {
            return Err(AnalysisError::InvalidInput {
                reason: "size factors must be positive finite values".to_string(),
            });
        }
        self.size_factors = Some(size_factors);
        self.refresh_normalized_counts();
        Ok(())
    }

    fn refresh_normalized_counts(&mut self) {
        if let Some(sf) = &self.size_factors {
            let mut normalized = self.counts.counts().to_owned();
            for (mut col, &s) in normalized.axis_iter_mut(Axis(1)).zip(sf.iter()) {
                col.mapv_inplace(|c| c / s);
            }
            self.normalized_counts = Some(normalized);
        }
    }

    pub(crate) fn set_genewise_dispersions(&mut self, disp: Array1<f64>) -> Result<()> {
        self.check_genes("gene-wise dispersions", disp.len())?;
        self.genewise_dispersions = Some(disp);
        Ok(())
    }

    pub(crate) fn set_dispersion_trend(
        &mut self,
        trend: DispersionTrend,
        fitted: Array1<f64>,
    ) -> Result<()> {
        self.check_genes("fitted dispersions", fitted.len())?;
        self.dispersion_trend = Some(trend);
        self.fitted_dispersions = Some(fitted);
        Ok(())
    }

    pub(crate) fn set_dispersion_prior(&mut self, prior_var: f64, squared_log_residuals: f64) {
        self.dispersion_prior_var = Some(prior_var);
        self.squared_log_residuals = Some(squared_log_residuals);
    }

    pub(crate) fn set_map_dispersions(&mut self, disp: Array1<f64>, outliers: Vec<bool>) -> Result<()> {
        self.check_genes("dispersions", disp.len())?;
        self.check_genes("dispersion outlier flags", outliers.len())?;
        self.dispersions = Some(disp);
        self.dispersion_outliers = Some(outliers);
        Ok(())
    }

    pub(crate) fn set_glm_fit(
        &mut self,
        coefficients: Array2<f64>,
        covariances: Array3<f64>,
        mu: Array2<f64>,
        hat_diagonals: Array2<f64>,
        converged: Vec<bool>,
    ) -> Result<()> {
        self.check_genes("coefficient rows", coefficients.nrows())?;
        self.check_genes("covariance matrices", covariances.dim().0)?;
        self.check_shape("mu", mu.dim())?;
        self.check_shape("hat diagonals", hat_diagonals.dim())?;
        self.check_genes("convergence flags", converged.len())?;
        self.coefficients = Some(coefficients);
        self.covariances = Some(covariances);
        self.mu = Some(mu);
        self.hat_diagonals = Some(hat_diagonals);
        self.converged = Some(converged);
        Ok(())
    }

    pub(crate) fn set_cooks(&mut self, cooks: Array2<f64>) -> Result<()> {
        self.check_shape("Cook's distances", cooks.dim())?;
        self.cooks = Some(cooks);
        Ok(())
    }

    pub(crate) fn set_replaceable(&mut self, replaceable: Vec<bool>) {
        self.replaceable = Some(replaceable);
    }

    /// Swap in outlier-replaced counts; normalized counts and zero flags follow
    pub(crate) fn replace_counts(&mut self, counts: Array2<f64>, replaced: Vec<bool>) -> Result<()> {
        self.check_shape("replacement counts", counts.dim())?;
        self.check_genes("replaced flags", replaced.len())?;
        let current = self.counts.clone();
        self.counts = CountMatrix::new(
            counts,
            current.gene_ids().to_vec(),
            current.sample_ids().to_vec(),
        )?;
        self.all_zero = zero_rows(&self.counts.counts().to_owned());
        self.replaced = Some(replaced);
        self.refresh_normalized_counts();
        Ok(())
    }
}

fn zero_rows(counts: &Array2<f64>) -> Vec<bool> {
    counts
        .axis_iter(Axis(0))
        .map(|row| row.iter().all(|&c| c == 0.0))
        .collect()
}
