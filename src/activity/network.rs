//! Signed, weighted regulator -> target network

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

fn unit_weight() -> f64 {
    1.0
}

/// One regulatory interaction as it appears in a network table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default = "unit_weight")]
    pub weight: f64,
}

impl Edge {
    pub fn new(source: &str, target: &str, weight: f64) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            weight,
        }
    }
}

/// Regulatory network grouped by source, sources in first-seen order
#[derive(Debug, Clone, Default)]
pub struct RegulatoryNetwork {
    sources: Vec<String>,
    index: HashMap<String, usize>,
    targets: Vec<Vec<(String, f64)>>,
}

impl RegulatoryNetwork {
    /// Build a network, rejecting empty names, non-finite weights and
    /// repeated (source, target) pairs
    pub fn from_edges(edges: Vec<Edge>) -> Result<Self> {
        let mut network = Self::default();
        let mut seen: HashSet<(String, String)> = HashSet::with_capacity(edges.len());

        for edge in edges {
            if edge.source.is_empty() || edge.target.is_empty() {
                return Err(AnalysisError::InvalidNetwork {
                    reason: "edges need a non-empty source and target".to_string(),
                });
            }
            if !edge.weight.is_finite() {
                return Err(AnalysisError::InvalidNetwork {
                    reason: format!("edge {} -> {} has weight {}", edge.source, edge.target, edge.weight),
                });
            }
            if !seen.insert((edge.source.clone(), edge.target.clone())) {
                return Err(AnalysisError::InvalidNetwork {
                    reason: format!("duplicate edge {} -> {}", edge.source, edge.target),
                });
            }
            network.push(edge);
        }
        Ok(network)
    }

    fn push(&mut self, edge: Edge) {
        let slot = match self.index.get(&edge.source) {
            Some(&i) => i,
            None => {
                self.index.insert(edge.source.clone(), self.sources.len());
                self.sources.push(edge.source);
                self.targets.push(Vec::new());
                self.sources.len() - 1
            }
        };
        self.targets[slot].push((edge.target, edge.weight));
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn n_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn n_edges(&self) -> usize {
        self.targets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Targets and weights of `source`
    pub fn targets_of(&self, source: &str) -> Option<&[(String, f64)]> {
        self.index.get(source).map(|&i| self.targets[i].as_slice())
    }

    /// Keep edges whose target is in `features`, then drop sources with
    /// fewer than `min_n` remaining targets. Sources of the result are
    /// sorted by name.
    pub fn restrict(&self, features: &HashSet<&str>, min_n: usize) -> Self {
        let mut order: Vec<usize> = (0..self.sources.len()).collect();
        order.sort_by(|&a, &b| self.sources[a].cmp(&self.sources[b]));

        let mut restricted = Self::default();
        for i in order {
            let (source, targets) = (&self.sources[i], &self.targets[i]);
            let kept: Vec<&(String, f64)> = targets.iter().filter(|(t, _)| features.contains(t.as_str())).collect();
            if kept.len() < min_n {
                continue;
            }
            for (target, weight) in kept {
                restricted.push(Edge {
                    source: source.clone(),
                    target: target.clone(),
                    weight: *weight,
                });
            }
        }
        restricted
    }
}
