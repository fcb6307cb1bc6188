//! Analysis configuration
//!
//! Stored as JSON. Every field has a default, so a config file only needs
//! the values it changes; command-line flags are applied on top.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};
use crate::filter::ExprFilterParams;
use crate::io::Contrast;

/// Full configuration of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Raw gene-count table
    pub counts: PathBuf,
    /// Name of the gene ID column of the count table
    pub id_column: String,
    /// Study design sheet (`Study_ID`, `New_Sample_name`)
    pub design: PathBuf,
    /// Ensembl ID to gene symbol table
    pub annotation: PathBuf,
    /// Regulatory network (`source,target,weight`)
    pub network: PathBuf,
    pub output_dir: PathBuf,
    pub results_file: String,
    pub tf_acts_file: String,
    pub tf_pvals_file: String,
    pub samples_file: String,
    /// Column label of the activity tables
    pub experiment_name: String,
    pub design_factor: String,
    pub reference_level: String,
    pub contrast: Contrast,
    pub filter: ExprFilterParams,
    pub deseq: DeseqConfig,
    pub ulm: UlmConfig,
    pub plots: PlotConfig,
    pub flags: Vec<SampleFlag>,
    /// Worker threads for per-gene fits
    pub n_cpus: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeseqConfig {
    /// Replace Cook's outliers and refit the affected genes
    pub refit_cooks: bool,
    pub min_replicates: usize,
    pub alpha: f64,
    pub cooks_filter: bool,
    pub independent_filter: bool,
    /// Shrink fold changes before writing results
    pub lfc_shrink: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UlmConfig {
    /// Minimum number of targets per source
    pub min_n: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub enabled: bool,
    pub volcano_top: usize,
    pub barplot_top: usize,
    pub targets_top: usize,
    /// Sources that get a target scatter plot
    pub target_sources: Vec<String>,
    pub lfc_threshold: f64,
    pub padj_threshold: f64,
}

/// Sample flag column: `treatment` when the sample name contains `marker`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFlag {
    pub column: String,
    pub marker: String,
}

impl SampleFlag {
    pub fn new(column: &str, marker: &str) -> Self {
        Self {
            column: column.to_string(),
            marker: marker.to_string(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let contrast = Contrast::new("sample-name", "Untreated ARID1A-KO", "Untreated WT");
        Self {
            counts: PathBuf::from("data/geneCounts_fixed.csv"),
            id_column: "ENSEMBL_ID".to_string(),
            design: PathBuf::from("data/Study_design.csv"),
            annotation: PathBuf::from("data/annotation.csv"),
            network: PathBuf::from("data/collectri.csv"),
            output_dir: PathBuf::from("results"),
            results_file: "results_df.csv".to_string(),
            tf_acts_file: "tf_acts.csv".to_string(),
            tf_pvals_file: "tf_pvals.csv".to_string(),
            samples_file: "samples.csv".to_string(),
            experiment_name: format!("{} {}", contrast.variable, contrast.label()),
            design_factor: "sample-name".to_string(),
            reference_level: "Untreated WT".to_string(),
            contrast,
            filter: ExprFilterParams::default(),
            deseq: DeseqConfig::default(),
            ulm: UlmConfig::default(),
            plots: PlotConfig::default(),
            flags: vec![
                SampleFlag::new("trametinib", "Trametinib"),
                SampleFlag::new("vemurafenib", "Vermurafenib"),
                SampleFlag::new("combination", "and"),
                SampleFlag::new("ARID1A_KO", "ARID1A_KO"),
            ],
            n_cpus: 8,
        }
    }
}

impl Default for DeseqConfig {
    fn default() -> Self {
        Self {
            refit_cooks: true,
            min_replicates: 7,
            alpha: 0.05,
            cooks_filter: true,
            independent_filter: true,
            lfc_shrink: true,
        }
    }
}

impl Default for UlmConfig {
    fn default() -> Self {
        Self { min_n: 5 }
    }
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            volcano_top: 20,
            barplot_top: 25,
            targets_top: 20,
            target_sources: ["RFX5", "RFXAP", "CIITA", "TWIST1"].iter().map(|s| s.to_string()).collect(),
            lfc_threshold: 0.5,
            padj_threshold: 0.05,
        }
    }
}

/// Values given on the command line that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub counts: Option<PathBuf>,
    pub design: Option<PathBuf>,
    pub annotation: Option<PathBuf>,
    pub network: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub n_cpus: Option<usize>,
    pub no_plots: bool,
}

impl AnalysisConfig {
    /// Load and validate a JSON config
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(p) = &overrides.counts {
            self.counts = p.clone();
        }
        if let Some(p) = &overrides.design {
            self.design = p.clone();
        }
        if let Some(p) = &overrides.annotation {
            self.annotation = p.clone();
        }
        if let Some(p) = &overrides.network {
            self.network = p.clone();
        }
        if let Some(p) = &overrides.output_dir {
            self.output_dir = p.clone();
        }
        if let Some(n) = overrides.n_cpus {
            self.n_cpus = n;
        }
        if overrides.no_plots {
            self.plots.enabled = false;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(AnalysisError::InvalidConfig { reason });

        let f = &self.filter;
        if !(f.min_count >= 0.0) || !(f.min_total_count >= 0.0) || !(f.large_n >= 0.0) {
            return invalid("filter thresholds must be non-negative".to_string());
        }
        if !(0.0..=1.0).contains(&f.min_prop) {
            return invalid(format!("filter.min_prop must be within [0, 1], got {}", f.min_prop));
        }
        if !(self.deseq.alpha > 0.0 && self.deseq.alpha < 1.0) {
            return invalid(format!("deseq.alpha must be within (0, 1), got {}", self.deseq.alpha));
        }
        if self.deseq.min_replicates == 0 {
            return invalid("deseq.min_replicates must be positive".to_string());
        }
        if self.ulm.min_n == 0 {
            return invalid("ulm.min_n must be positive".to_string());
        }
        if self.n_cpus == 0 {
            return invalid("n_cpus must be positive".to_string());
        }
        if self.contrast.numerator == self.contrast.denominator {
            return invalid(format!(
                "contrast compares '{}' with itself",
                self.contrast.numerator
            ));
        }
        if self.contrast.variable != self.design_factor {
            return invalid(format!(
                "contrast variable '{}' is not the design factor '{}'",
                self.contrast.variable, self.design_factor
            ));
        }
        if self.experiment_name.is_empty() {
            return invalid("experiment_name must not be empty".to_string());
        }
        Ok(())
    }

    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join(&self.results_file)
    }

    pub fn tf_acts_path(&self) -> PathBuf {
        self.output_dir.join(&self.tf_acts_file)
    }

    pub fn tf_pvals_path(&self) -> PathBuf {
        self.output_dir.join(&self.tf_pvals_file)
    }

    pub fn samples_path(&self) -> PathBuf {
        self.output_dir.join(&self.samples_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_analysis() {
        let config = AnalysisConfig::default();
        assert_eq!(config.experiment_name, "sample-name Untreated ARID1A-KO vs Untreated WT");
        assert_eq!(config.filter.min_prop, 0.4);
        assert_eq!(config.plots.target_sources.len(), 4);
        assert_eq!(config.flags[1].marker, "Vermurafenib");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"n_cpus": 2, "filter": {"min_count": 10}}"#).unwrap();
        let config = AnalysisConfig::load(&path).unwrap();
        assert_eq!(config.n_cpus, 2);
        assert_eq!(config.filter.min_count, 10.0);
        assert_eq!(config.filter.min_total_count, 10.0);
        assert_eq!(config.reference_level, "Untreated WT");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AnalysisConfig::default();
        config.ulm.min_n = 3;
        config.save(&path).unwrap();
        assert_eq!(AnalysisConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AnalysisConfig::default();
        config.filter.min_prop = 1.5;
        assert!(matches!(config.validate(), Err(AnalysisError::InvalidConfig { .. })));

        let mut config = AnalysisConfig::default();
        config.contrast.numerator = config.contrast.denominator.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = AnalysisConfig::default();
        config.apply_overrides(&ConfigOverrides {
            output_dir: Some(PathBuf::from("/tmp/out")),
            no_plots: true,
            ..ConfigOverrides::default()
        });
        assert_eq!(config.results_path(), PathBuf::from("/tmp/out/results_df.csv"));
        assert!(!config.plots.enabled);
    }
}
