//! rnaseq_tfa: RNA-seq differential expression and TF activity inference
//!
//! Loads a gene-count table, annotates and filters genes, fits a DESeq2-style
//! negative binomial GLM, tests and shrinks a contrast, and scores
//! transcription factor activity from the Wald statistics with a univariate
//! linear model over a regulatory network.
//!
//! # Example
//!
//! ```ignore
//! use rnaseq_tfa::prelude::*;
//!
//! let config = AnalysisConfig::load("config.json")?;
//! let report = run_pipeline(&config)?;
//! println!("{}", report.summary);
//! ```

pub mod activity;
pub mod cli;
pub mod config;
pub mod data;
pub mod dispersion;
pub mod error;
pub mod filter;
pub mod glm;
pub mod io;
pub mod linalg;
pub mod normalization;
pub mod pipeline;
pub mod plot;
pub mod prep;
pub mod shrinkage;
pub mod stats;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::activity::{run_ulm, ActivityColumn, ActivityEstimate, Edge, RegulatoryNetwork};
    pub use crate::config::{AnalysisConfig, ConfigOverrides, DeseqConfig, SampleFlag};
    pub use crate::data::{CountMatrix, DESeqDataSet, SampleMetadata};
    pub use crate::dispersion::{estimate_dispersions, refit_dispersions, DispersionParams};
    pub use crate::error::{AnalysisError, Result};
    pub use crate::filter::{
        calculate_cooks, cooks_cutoff, cooks_filter, filter_by_expr, independent_filtering, replace_outliers,
        ExprFilter, ExprFilterParams, OutlierParams,
    };
    pub use crate::glm::{fit_lfc, fit_lfc_genes, DesignInfo, GlmFitParams};
    pub use crate::io::{
        read_annotation, read_count_table, read_network, read_results, read_study_design, write_activity,
        write_results, Contrast, DESeqResults, ResultsSummary,
    };
    pub use crate::normalization::estimate_size_factors;
    pub use crate::pipeline::{prepare_counts, run_activity, run_pipeline, PipelineReport, PreparedCounts};
    pub use crate::shrinkage::{shrink_lfc_apeglm, ApeglmParams};
    pub use crate::testing::{benjamini_hochberg, wald_test};
}

use prelude::*;

/// Fit the full model: size factors, dispersions, coefficients and Cook's
/// distances, then replace outliers and refit the affected genes when
/// `refit_cooks` is set
pub fn run_deseq(dds: &mut DESeqDataSet, config: &DeseqConfig) -> Result<()> {
    // Keep size factors that were set by hand
    if dds.size_factors().is_none() {
        estimate_size_factors(dds)?;
    }

    let disp_params = DispersionParams::default();
    let glm_params = GlmFitParams::default();
    estimate_dispersions(dds, &disp_params)?;

    log::info!("Fitting LFCs...");
    fit_lfc(dds, &glm_params)?;
    calculate_cooks(dds)?;

    if config.refit_cooks {
        let cutoff = cooks_cutoff(dds.n_samples(), dds.design().n_coefs())?;
        let outlier_params = OutlierParams {
            min_replicates: config.min_replicates,
            ..OutlierParams::default()
        };
        let genes = replace_outliers(dds, cutoff, &outlier_params)?;
        if !genes.is_empty() {
            log::info!("Refitting {} genes with replaced outliers", genes.len());
            refit_dispersions(dds, &genes, &disp_params)?;
            fit_lfc_genes(dds, &genes, &glm_params)?;
        }
    }
    Ok(())
}

/// Wald test for `contrast` followed by Cook's and independent filtering
pub fn deseq_results(dds: &DESeqDataSet, contrast: &Contrast, config: &DeseqConfig) -> Result<DESeqResults> {
    log::info!("Running Wald tests for {} {}", contrast.variable, contrast.label());
    let mut results = wald_test(dds, contrast)?;

    if config.cooks_filter {
        let cutoff = cooks_cutoff(dds.n_samples(), dds.design().n_coefs())?;
        cooks_filter(&mut results, dds, cutoff)?;
    }
    if config.independent_filter {
        independent_filtering(&mut results, config.alpha);
    } else {
        results.padj = benjamini_hochberg(&results.pvalues);
    }
    Ok(results)
}
