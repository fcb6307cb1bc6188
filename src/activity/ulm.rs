//! Univariate linear model (ULM) activity scoring
//!
//! For every source the gene-level statistic is regressed on the source's
//! edge weights (zero for genes it does not regulate). The activity score is
//! the t-value of the slope, which for a single predictor follows from the
//! Pearson correlation `r` as `r * sqrt(df / (1 - r^2))`.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;

use super::network::RegulatoryNetwork;
use crate::error::{AnalysisError, Result};
use crate::testing::t_pvalue;

/// Which value of an activity estimate to report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityColumn {
    Score,
    PValue,
}

/// ULM scores and p-values for one experiment
#[derive(Debug, Clone)]
pub struct ActivityEstimate {
    /// Column label used in output tables
    pub experiment: String,
    pub sources: Vec<String>,
    pub scores: Vec<f64>,
    pub pvalues: Vec<f64>,
}

impl ActivityEstimate {
    pub fn named(mut self, experiment: &str) -> Self {
        self.experiment = experiment.to_string();
        self
    }

    pub fn n_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn values(&self, which: ActivityColumn) -> &[f64] {
        match which {
            ActivityColumn::Score => &self.scores,
            ActivityColumn::PValue => &self.pvalues,
        }
    }

    pub fn score_of(&self, source: &str) -> Option<f64> {
        self.sources.iter().position(|s| s == source).map(|i| self.scores[i])
    }

    /// Indices of the `n` sources with the largest absolute score
    pub fn top_sources(&self, n: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.sources.len()).filter(|&i| self.scores[i].is_finite()).collect();
        order.sort_by(|&a, &b| self.scores[b].abs().total_cmp(&self.scores[a].abs()));
        order.truncate(n);
        order
    }
}

/// Score every source of `network` against gene-level `stats`.
///
/// Genes with a missing or zero statistic are not features. Sources with fewer
/// than `min_n` targets among the features are dropped.
pub fn run_ulm(stats: &[(&str, f64)], network: &RegulatoryNetwork, min_n: usize) -> Result<ActivityEstimate> {
    let mut position: HashMap<&str, usize> = HashMap::with_capacity(stats.len());
    let mut values: Vec<f64> = Vec::with_capacity(stats.len());
    for &(gene, stat) in stats {
        if !stat.is_finite() || stat == 0.0 || position.contains_key(gene) {
            continue;
        }
        position.insert(gene, values.len());
        values.push(stat);
    }
    let n = values.len();
    let dropped = stats.len() - n;
    if dropped > 0 {
        log::warn!("ULM: {} genes without a usable statistic are not used as features", dropped);
    }

    let features: HashSet<&str> = position.keys().copied().collect();
    let net = network.restrict(&features, min_n);
    if net.is_empty() {
        return Err(AnalysisError::InvalidNetwork {
            reason: format!("no source has {} or more targets among the {} features", min_n, n),
        });
    }
    if n < 3 {
        return Err(AnalysisError::EmptyData {
            reason: format!("ULM needs at least 3 features, got {}", n),
        });
    }
    log::info!(
        "ULM: {} features, {} of {} sources with at least {} targets",
        n,
        net.n_sources(),
        network.n_sources(),
        min_n
    );

    let df = (n - 2) as f64;
    let scored: Vec<(f64, f64)> = net
        .sources()
        .par_iter()
        .map(|source| {
            let mut weights = vec![0.0; n];
            for (target, w) in net.targets_of(source).unwrap_or_default() {
                if let Some(&i) = position.get(target.as_str()) {
                    weights[i] = *w;
                }
            }
            let r = pearson(&weights, &values);
            let t = r * (df / ((1.0 - r + 1e-16) * (1.0 + r + 1e-16))).sqrt();
            (t, t_pvalue(t, df))
        })
        .collect();

    let (scores, pvalues) = scored.into_iter().unzip();
    Ok(ActivityEstimate {
        experiment: String::new(),
        sources: net.sources().to_vec(),
        scores,
        pvalues,
    })
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mx, b - my);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    sxy / (sxx * syy).sqrt()
}
