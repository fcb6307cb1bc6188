//! Gene-level cleaning: symbols, empty rows, unique names

use std::collections::{HashMap, HashSet};

use crate::data::CountMatrix;
use crate::error::{AnalysisError, Result};
use crate::io::GeneAnnotation;

/// Replace Ensembl IDs with gene symbols.
///
/// Genes absent from the annotation, or present without a symbol, are
/// dropped. Symbols may repeat; see [`make_unique_genes`].
pub fn annotate_genes(counts: &CountMatrix, annotation: &GeneAnnotation) -> Result<CountMatrix> {
    let mut keep = Vec::with_capacity(counts.n_genes());
    let mut symbols = Vec::new();
    let (mut unknown, mut unnamed) = (0usize, 0usize);
    for id in counts.gene_ids() {
        match annotation.get(id) {
            Some(Some(symbol)) => {
                keep.push(true);
                symbols.push(symbol.clone());
            }
            Some(None) => {
                unnamed += 1;
                keep.push(false);
            }
            None => {
                unknown += 1;
                keep.push(false);
            }
        }
    }
    if symbols.is_empty() {
        return Err(AnalysisError::EmptyData {
            reason: "no gene of the count table has an annotated symbol".to_string(),
        });
    }
    if unknown + unnamed > 0 {
        log::warn!(
            "Dropped {} genes missing from the annotation and {} without a symbol",
            unknown,
            unnamed
        );
    }
    counts.filter_genes(&keep)?.with_gene_ids(symbols)
}

/// Remove genes with no counts in any sample
pub fn drop_zero_genes(counts: &CountMatrix) -> Result<CountMatrix> {
    let keep: Vec<bool> = counts.gene_totals().iter().map(|&t| t > 0.0).collect();
    let dropped = keep.iter().filter(|&&k| !k).count();
    log::info!("Removed {} genes with all-zero counts", dropped);
    counts.filter_genes(&keep)
}

/// Make labels unique by suffixing repeats with `-1`, `-2`, ...
///
/// The first occurrence keeps its name; a suffix that would collide with an
/// existing label is skipped.
pub fn make_unique(names: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = names.iter().cloned().collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(names.len());
    let mut counters: HashMap<&str, usize> = HashMap::new();

    names
        .iter()
        .map(|name| {
            if seen.insert(name.as_str()) {
                return name.clone();
            }
            let counter = counters.entry(name.as_str()).or_insert(0);
            loop {
                *counter += 1;
                let candidate = format!("{}-{}", name, counter);
                if taken.insert(candidate.clone()) {
                    return candidate;
                }
            }
        })
        .collect()
}

/// [`make_unique`] applied to the gene labels of a count matrix
pub fn make_unique_genes(counts: CountMatrix) -> Result<CountMatrix> {
    let unique = make_unique(counts.gene_ids());
    let renamed = unique.iter().zip(counts.gene_ids()).filter(|(a, b)| a != b).count();
    if renamed > 0 {
        log::warn!("Renamed {} duplicated gene symbols", renamed);
    }
    counts.with_gene_ids(unique)
}
