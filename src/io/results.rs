//! Differential expression results

use serde::{Deserialize, Serialize};

/// Per-gene results of the Wald test for one contrast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DESeqResults {
    pub gene_ids: Vec<String>,
    /// Mean of normalized counts across all samples
    pub base_means: Vec<f64>,
    pub log2_fold_changes: Vec<f64>,
    /// Standard error of the log2 fold change
    pub lfc_se: Vec<f64>,
    /// Wald statistic
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
    /// Benjamini-Hochberg adjusted p-values after independent filtering
    pub padj: Vec<f64>,
    /// Final dispersions used for the fit
    pub dispersions: Vec<f64>,
    /// Largest Cook's distance per gene
    pub max_cooks: Vec<f64>,
    /// Base mean threshold chosen by independent filtering
    pub filter_threshold: Option<f64>,
    /// Whether fold changes have been shrunk
    pub shrunk: bool,
    pub contrast: Contrast,
}

/// Two-level comparison within one design factor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contrast {
    /// Column of the sample table, e.g. "sample-name"
    pub variable: String,
    pub numerator: String,
    pub denominator: String,
}

impl Contrast {
    pub fn new(variable: &str, numerator: &str, denominator: &str) -> Self {
        Self {
            variable: variable.to_string(),
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        }
    }

    /// Name used for output columns: "<numerator> vs <denominator>"
    pub fn label(&self) -> String {
        format!("{} vs {}", self.numerator, self.denominator)
    }
}

impl DESeqResults {
    /// Empty results with every value missing
    pub fn new(gene_ids: Vec<String>, contrast: Contrast) -> Self {
        let n = gene_ids.len();
        Self {
            gene_ids,
            base_means: vec![f64::NAN; n],
            log2_fold_changes: vec![f64::NAN; n],
            lfc_se: vec![f64::NAN; n],
            stat: vec![f64::NAN; n],
            pvalues: vec![f64::NAN; n],
            padj: vec![f64::NAN; n],
            dispersions: vec![f64::NAN; n],
            max_cooks: vec![f64::NAN; n],
            filter_threshold: None,
            shrunk: false,
            contrast,
        }
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    /// Genes with padj below `alpha`
    pub fn significant_genes(&self, alpha: f64) -> Vec<&str> {
        self.gene_ids
            .iter()
            .zip(&self.padj)
            .filter(|(_, &p)| p.is_finite() && p < alpha)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn upregulated_genes(&self, alpha: f64, min_lfc: f64) -> Vec<&str> {
        self.gene_ids
            .iter()
            .zip(self.padj.iter().zip(&self.log2_fold_changes))
            .filter(|(_, (&p, &lfc))| p.is_finite() && p < alpha && lfc > min_lfc)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn downregulated_genes(&self, alpha: f64, min_lfc: f64) -> Vec<&str> {
        self.gene_ids
            .iter()
            .zip(self.padj.iter().zip(&self.log2_fold_changes))
            .filter(|(_, (&p, &lfc))| p.is_finite() && p < alpha && lfc < -min_lfc)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Gene and statistic for every gene with a finite statistic
    pub fn statistics(&self) -> Vec<(&str, f64)> {
        self.gene_ids
            .iter()
            .zip(&self.stat)
            .filter(|(_, s)| s.is_finite())
            .map(|(g, &s)| (g.as_str(), s))
            .collect()
    }

    pub fn summary(&self, alpha: f64) -> ResultsSummary {
        let outliers = self
            .base_means
            .iter()
            .zip(&self.pvalues)
            .filter(|(&m, p)| m > 0.0 && p.is_nan())
            .count();
        let low_counts = self
            .pvalues
            .iter()
            .zip(&self.padj)
            .filter(|(p, q)| !p.is_nan() && q.is_nan())
            .count();

        ResultsSummary {
            total_genes: self.n_genes(),
            nonzero_genes: self.base_means.iter().filter(|&&m| m > 0.0).count(),
            upregulated: self.upregulated_genes(alpha, 0.0).len(),
            downregulated: self.downregulated_genes(alpha, 0.0).len(),
            outliers,
            low_counts,
            filter_threshold: self.filter_threshold,
            alpha,
        }
    }
}

/// Counts reported after a results table is built
#[derive(Debug, Clone)]
pub struct ResultsSummary {
    pub total_genes: usize,
    /// Genes with non-zero total count
    pub nonzero_genes: usize,
    pub upregulated: usize,
    pub downregulated: usize,
    /// Genes whose p-value was removed by Cook's filtering
    pub outliers: usize,
    /// Genes removed by independent filtering
    pub low_counts: usize,
    pub filter_threshold: Option<f64>,
    pub alpha: f64,
}

impl std::fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pct = |n: usize| {
            if self.nonzero_genes > 0 {
                100.0 * n as f64 / self.nonzero_genes as f64
            } else {
                0.0
            }
        };
        writeln!(f, "out of {} with nonzero total read count", self.nonzero_genes)?;
        writeln!(f, "adjusted p-value < {}", self.alpha)?;
        writeln!(f, "LFC > 0 (up)       : {}, {:.2}%", self.upregulated, pct(self.upregulated))?;
        writeln!(f, "LFC < 0 (down)     : {}, {:.2}%", self.downregulated, pct(self.downregulated))?;
        writeln!(f, "outliers [1]       : {}, {:.2}%", self.outliers, pct(self.outliers))?;
        match self.filter_threshold {
            Some(t) => writeln!(
                f,
                "low counts [2]     : {}, {:.2}% (mean count < {:.0})",
                self.low_counts,
                pct(self.low_counts),
                t
            )?,
            None => writeln!(f, "low counts [2]     : {}, {:.2}%", self.low_counts, pct(self.low_counts))?,
        }
        writeln!(f, "[1] see Cook's distance filtering")?;
        writeln!(f, "[2] see independent filtering")
    }
}
