//! End-to-end analysis run
//!
//! counts -> annotated, cleaned and filtered matrix -> DESeq2 fit and Wald
//! test -> shrunk results -> ULM activity scores, with CSV and SVG outputs
//! written under the configured output directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::activity::{run_ulm, ActivityColumn, ActivityEstimate, RegulatoryNetwork};
use crate::config::AnalysisConfig;
use crate::data::{CountMatrix, DESeqDataSet, SampleMetadata};
use crate::error::Result;
use crate::filter::{filter_by_expr, ExprFilter};
use crate::io::{self, DESeqResults, ResultsSummary};
use crate::plot;
use crate::prep;
use crate::shrinkage::{shrink_lfc_apeglm, ApeglmParams};
use crate::{deseq_results, run_deseq};

/// Count matrix ready for the model, with its sample table
#[derive(Debug, Clone)]
pub struct PreparedCounts {
    pub counts: CountMatrix,
    pub metadata: SampleMetadata,
    pub filter: ExprFilter,
    /// Genes in the raw table
    pub n_raw_genes: usize,
    /// Genes after annotation and cleaning, before the expression filter
    pub n_clean_genes: usize,
}

/// What a pipeline run produced
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub n_raw_genes: usize,
    pub n_tested_genes: usize,
    pub summary: ResultsSummary,
    pub n_sources: usize,
    /// Every file written, in order
    pub outputs: Vec<PathBuf>,
}

/// Load, rename, annotate, clean and filter the count table
pub fn prepare_counts(config: &AnalysisConfig) -> Result<PreparedCounts> {
    log::info!("Reading counts from {}", config.counts.display());
    let raw = io::read_count_table(&config.counts, &config.id_column)?;
    let n_raw_genes = raw.n_genes();
    let design = io::read_study_design(&config.design)?;
    let renamed = prep::rename_samples(raw, &design)?;

    let annotation = io::read_annotation(&config.annotation)?;
    let annotated = prep::annotate_genes(&renamed, &annotation)?;
    let nonzero = prep::drop_zero_genes(&annotated)?;
    let cleaned = prep::clean_sample_names(nonzero)?;
    let counts = prep::make_unique_genes(cleaned)?;
    let n_clean_genes = counts.n_genes();
    log::info!("{} of {} genes annotated and non-empty", n_clean_genes, n_raw_genes);

    let metadata = prep::derive_sample_flags(counts.sample_ids(), &config.design_factor, &config.flags)?;
    let filter = filter_by_expr(&counts, &config.filter)?;
    let counts = filter.apply(&counts)?;

    Ok(PreparedCounts {
        counts,
        metadata,
        filter,
        n_raw_genes,
        n_clean_genes,
    })
}

/// Run every step and write all outputs
pub fn run_pipeline(config: &AnalysisConfig) -> Result<PipelineReport> {
    config.validate()?;
    fs::create_dir_all(&config.output_dir)?;
    let mut outputs = Vec::new();

    let prepared = prepare_counts(config)?;
    if config.plots.enabled {
        let path = config.output_dir.join("filter_by_expr.svg");
        render(&path, plot::plot_filter_by_expr(&path, &prepared.filter, &config.filter), &mut outputs);
    }
    io::write_sample_table(config.samples_path(), &prepared.metadata)?;
    outputs.push(config.samples_path());

    let mut dds = DESeqDataSet::new(
        prepared.counts,
        prepared.metadata,
        &config.design_factor,
        &config.reference_level,
    )?;
    run_deseq(&mut dds, &config.deseq)?;
    let mut results = deseq_results(&dds, &config.contrast, &config.deseq)?;
    let summary = results.summary(config.deseq.alpha);
    log::info!("Log2 fold change & Wald test p-value: {}\n{}", config.contrast.label(), summary);

    if config.deseq.lfc_shrink {
        log::info!("Shrinking LFCs");
        shrink_lfc_apeglm(&dds, &mut results, &ApeglmParams::default())?;
    }
    io::write_results(config.results_path(), &results)?;
    outputs.push(config.results_path());

    if config.plots.enabled {
        let p = &config.plots;
        let path = config.output_dir.join("volcano.svg");
        render(
            &path,
            plot::plot_volcano(&path, &results, p.lfc_threshold, p.padj_threshold, p.volcano_top),
            &mut outputs,
        );
    }

    let network = io::read_network(&config.network)?;
    let estimate = score_activity(config, &results, &network, &config.output_dir, &mut outputs)?;

    Ok(PipelineReport {
        n_raw_genes: prepared.n_raw_genes,
        n_tested_genes: results.n_genes(),
        summary,
        n_sources: estimate.n_sources(),
        outputs,
    })
}

/// ULM scoring of an existing results table
pub fn run_activity(
    results_path: &Path,
    network_path: &Path,
    config: &AnalysisConfig,
) -> Result<ActivityEstimate> {
    fs::create_dir_all(&config.output_dir)?;
    let results = io::read_results(results_path)?;
    let network = io::read_network(network_path)?;
    let mut outputs = Vec::new();
    score_activity(config, &results, &network, &config.output_dir, &mut outputs)
}

fn score_activity(
    config: &AnalysisConfig,
    results: &DESeqResults,
    network: &RegulatoryNetwork,
    output_dir: &Path,
    outputs: &mut Vec<PathBuf>,
) -> Result<ActivityEstimate> {
    log::info!("Inferring TF activities ({})", config.experiment_name);
    let estimate = run_ulm(&results.statistics(), network, config.ulm.min_n)?.named(&config.experiment_name);

    io::write_activity(config.tf_acts_path(), &estimate, ActivityColumn::Score)?;
    outputs.push(config.tf_acts_path());
    io::write_activity(config.tf_pvals_path(), &estimate, ActivityColumn::PValue)?;
    outputs.push(config.tf_pvals_path());

    if config.plots.enabled {
        let p = &config.plots;
        let path = output_dir.join("tf_barplot.svg");
        render(&path, plot::plot_barplot(&path, &estimate, p.barplot_top), outputs);
        for source in &p.target_sources {
            let path = output_dir.join(format!("targets_{}.svg", source));
            render(
                &path,
                plot::plot_targets(&path, results, network, source, p.targets_top),
                outputs,
            );
        }
    }
    Ok(estimate)
}

/// Record a written plot, or log why it was skipped
fn render(path: &Path, outcome: Result<()>, outputs: &mut Vec<PathBuf>) {
    match outcome {
        Ok(()) => outputs.push(path.to_path_buf()),
        Err(e) => log::warn!("Skipping plot {}: {}", path.display(), e),
    }
}
