//! CSV readers and writers for the pipeline's tables
//!
//! Input tables may be comma or tab separated; the delimiter is taken from
//! the header line. Outputs are always comma separated.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::results::{Contrast, DESeqResults};
use crate::activity::{ActivityColumn, ActivityEstimate, Edge, RegulatoryNetwork};
use crate::data::{CountMatrix, SampleMetadata};
use crate::error::{AnalysisError, Result};

/// Ensembl gene ID to gene symbol; `None` when the table has no symbol
pub type GeneAnnotation = HashMap<String, Option<String>>;

/// Sample sheet mapping sequencing IDs to sample names
#[derive(Debug, Clone, PartialEq)]
pub struct StudyDesign {
    pub study_ids: Vec<String>,
    pub sample_names: Vec<String>,
}

impl StudyDesign {
    pub fn n_samples(&self) -> usize {
        self.study_ids.len()
    }

    pub fn sample_name(&self, study_id: &str) -> Option<&str> {
        self.study_ids
            .iter()
            .position(|id| id == study_id)
            .map(|i| self.sample_names[i].as_str())
    }
}

#[derive(Debug, Deserialize)]
struct DesignRecord {
    #[serde(rename = "Study_ID")]
    study_id: String,
    #[serde(rename = "New_Sample_name")]
    sample_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResultRecord {
    gene: String,
    #[serde(rename = "baseMean")]
    base_mean: Option<f64>,
    #[serde(rename = "log2FoldChange")]
    log2_fold_change: Option<f64>,
    #[serde(rename = "lfcSE")]
    lfc_se: Option<f64>,
    stat: Option<f64>,
    pvalue: Option<f64>,
    padj: Option<f64>,
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

/// Tab when the header line contains one, comma otherwise
fn sniff_delimiter(path: &Path) -> Result<u8> {
    let mut header = String::new();
    BufReader::new(File::open(path)?).read_line(&mut header)?;
    if header.trim().is_empty() {
        return Err(AnalysisError::EmptyData {
            reason: format!("{} is empty", display(path)),
        });
    }
    Ok(if header.contains('\t') { b'\t' } else { b',' })
}

fn reader(path: &Path, flexible: bool) -> Result<csv::Reader<File>> {
    let delimiter = sniff_delimiter(path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(flexible)
        .trim(csv::Trim::All)
        .from_path(path)?)
}

fn column_index(headers: &csv::StringRecord, name: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| AnalysisError::MissingColumn {
            column: name.to_string(),
            file: display(path),
        })
}

/// Read a genes x samples count table whose first column is `id_column`
pub fn read_count_table<P: AsRef<Path>>(path: P, id_column: &str) -> Result<CountMatrix> {
    let path = path.as_ref();
    let mut rdr = reader(path, true)?;
    let headers = rdr.headers()?.clone();
    if headers.get(0) != Some(id_column) {
        return Err(AnalysisError::MissingColumn {
            column: id_column.to_string(),
            file: display(path),
        });
    }
    let sample_ids: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
    if sample_ids.is_empty() {
        return Err(AnalysisError::InvalidCountMatrix {
            reason: format!("{} has no sample columns", display(path)),
        });
    }

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line() as usize);
        if record.len() != sample_ids.len() + 1 {
            return Err(AnalysisError::Parse {
                file: display(path),
                line,
                reason: format!("expected {} fields, found {}", sample_ids.len() + 1, record.len()),
            });
        }
        gene_ids.push(record[0].to_string());
        for field in record.iter().skip(1) {
            let count: f64 = field.parse().map_err(|_| AnalysisError::Parse {
                file: display(path),
                line,
                reason: format!("'{}' is not a number", field),
            })?;
            if !count.is_finite() || count < 0.0 {
                return Err(AnalysisError::Parse {
                    file: display(path),
                    line,
                    reason: format!("count {} is not a non-negative number", field),
                });
            }
            values.push(count);
        }
    }
    if gene_ids.is_empty() {
        return Err(AnalysisError::EmptyData {
            reason: format!("no genes in {}", display(path)),
        });
    }

    let counts = Array2::from_shape_vec((gene_ids.len(), sample_ids.len()), values).map_err(|e| {
        AnalysisError::InvalidCountMatrix { reason: e.to_string() }
    })?;
    log::debug!("Read {} genes x {} samples from {}", gene_ids.len(), sample_ids.len(), display(path));
    CountMatrix::new(counts, gene_ids, sample_ids)
}

/// Read the study design sheet (`Study_ID`, `New_Sample_name`)
pub fn read_study_design<P: AsRef<Path>>(path: P) -> Result<StudyDesign> {
    let path = path.as_ref();
    let mut rdr = reader(path, false)?;
    let headers = rdr.headers()?.clone();
    column_index(&headers, "Study_ID", path)?;
    column_index(&headers, "New_Sample_name", path)?;

    let mut design = StudyDesign {
        study_ids: Vec::new(),
        sample_names: Vec::new(),
    };
    for record in rdr.deserialize() {
        let record: DesignRecord = record?;
        design.study_ids.push(record.study_id);
        design.sample_names.push(record.sample_name);
    }
    if design.n_samples() == 0 {
        return Err(AnalysisError::EmptyData {
            reason: format!("no samples in {}", display(path)),
        });
    }
    Ok(design)
}

/// Read an `ensembl_gene_id` / `external_gene_name` table.
///
/// The first row for an ID wins; empty names are recorded as missing.
pub fn read_annotation<P: AsRef<Path>>(path: P) -> Result<GeneAnnotation> {
    let path = path.as_ref();
    let mut rdr = reader(path, true)?;
    let headers = rdr.headers()?.clone();
    let id_col = column_index(&headers, "ensembl_gene_id", path)?;
    let name_col = column_index(&headers, "external_gene_name", path)?;

    let mut annotation = GeneAnnotation::new();
    for record in rdr.records() {
        let record = record?;
        let Some(id) = record.get(id_col).filter(|id| !id.is_empty()) else {
            continue;
        };
        let name = record
            .get(name_col)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        annotation.entry(id.to_string()).or_insert(name);
    }
    log::debug!("Read {} annotated genes from {}", annotation.len(), display(path));
    Ok(annotation)
}

/// Read a `source,target[,weight]` network table
pub fn read_network<P: AsRef<Path>>(path: P) -> Result<RegulatoryNetwork> {
    let path = path.as_ref();
    let mut rdr = reader(path, false)?;
    let headers = rdr.headers()?.clone();
    column_index(&headers, "source", path)?;
    column_index(&headers, "target", path)?;

    let edges = rdr.deserialize().collect::<std::result::Result<Vec<Edge>, _>>()?;
    let network = RegulatoryNetwork::from_edges(edges)?;
    if network.is_empty() {
        return Err(AnalysisError::InvalidNetwork {
            reason: format!("no edges in {}", display(path)),
        });
    }
    log::info!(
        "Read network with {} sources and {} edges from {}",
        network.n_sources(),
        network.n_edges(),
        display(path)
    );
    Ok(network)
}

/// Read a results table written by [`write_results`].
///
/// The contrast is not stored in the table and is left empty.
pub fn read_results<P: AsRef<Path>>(path: P) -> Result<DESeqResults> {
    let path = path.as_ref();
    let mut rdr = reader(path, false)?;
    let records = rdr.deserialize().collect::<std::result::Result<Vec<ResultRecord>, _>>()?;
    if records.is_empty() {
        return Err(AnalysisError::EmptyData {
            reason: format!("no genes in {}", display(path)),
        });
    }

    let nan = |x: Option<f64>| x.unwrap_or(f64::NAN);
    let mut results = DESeqResults::new(records.iter().map(|r| r.gene.clone()).collect(), Contrast::default());
    for (g, r) in records.into_iter().enumerate() {
        results.base_means[g] = nan(r.base_mean);
        results.log2_fold_changes[g] = nan(r.log2_fold_change);
        results.lfc_se[g] = nan(r.lfc_se);
        results.stat[g] = nan(r.stat);
        results.pvalues[g] = nan(r.pvalue);
        results.padj[g] = nan(r.padj);
    }
    Ok(results)
}

/// Write the results table; missing values become empty fields
pub fn write_results<P: AsRef<Path>>(path: P, results: &DESeqResults) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for g in 0..results.n_genes() {
        wtr.serialize(ResultRecord {
            gene: results.gene_ids[g].clone(),
            base_mean: finite(results.base_means[g]),
            log2_fold_change: finite(results.log2_fold_changes[g]),
            lfc_se: finite(results.lfc_se[g]),
            stat: finite(results.stat[g]),
            pvalue: finite(results.pvalues[g]),
            padj: finite(results.padj[g]),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write one activity column: a row per source, headed by the experiment name
pub fn write_activity<P: AsRef<Path>>(path: P, estimate: &ActivityEstimate, which: ActivityColumn) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["source", estimate.experiment.as_str()])?;
    for (source, value) in estimate.sources.iter().zip(estimate.values(which)) {
        let field = if value.is_finite() { value.to_string() } else { String::new() };
        wtr.write_record([source.as_str(), field.as_str()])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the sample sheet with all metadata columns
pub fn write_sample_table<P: AsRef<Path>>(path: P, metadata: &SampleMetadata) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    let names = metadata.column_names();
    let mut header = vec!["sample"];
    header.extend(names.iter().copied());
    wtr.write_record(&header)?;
    for (j, sample) in metadata.sample_ids().iter().enumerate() {
        let mut row = vec![sample.as_str()];
        for name in &names {
            row.push(metadata.column(name).map_or("", |c| c[j].as_str()));
        }
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write a count matrix with gene IDs under `id_column`
pub fn write_count_table<P: AsRef<Path>>(path: P, counts: &CountMatrix, id_column: &str) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    let mut header = vec![id_column.to_string()];
    header.extend(counts.sample_ids().iter().cloned());
    wtr.write_record(&header)?;
    for (gene, row) in counts.gene_ids().iter().zip(counts.counts().rows()) {
        let mut record = vec![gene.clone()];
        record.extend(row.iter().map(|c| c.to_string()));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "{}", contents).unwrap();
        f
    }

    #[test]
    fn test_read_count_table() {
        let f = file("ENSEMBL_ID,S1,S2,S3\nENSG01,100,200,150\nENSG02,0,7,3\n");
        let m = read_count_table(f.path(), "ENSEMBL_ID").unwrap();
        assert_eq!(m.n_genes(), 2);
        assert_eq!(m.sample_ids(), &["S1".to_string(), "S2".to_string(), "S3".to_string()]);
        assert_eq!(m.counts()[[1, 1]], 7.0);
    }

    #[test]
    fn test_count_table_errors() {
        let ragged = file("ENSEMBL_ID,S1,S2\nENSG01,1,2\nENSG02,3\n");
        assert!(matches!(
            read_count_table(ragged.path(), "ENSEMBL_ID"),
            Err(AnalysisError::Parse { line: 3, .. })
        ));
        let text = file("ENSEMBL_ID,S1\nENSG01,many\n");
        assert!(matches!(read_count_table(text.path(), "ENSEMBL_ID"), Err(AnalysisError::Parse { .. })));
        let negative = file("ENSEMBL_ID,S1\nENSG01,-4\n");
        assert!(read_count_table(negative.path(), "ENSEMBL_ID").is_err());
        let wrong_id = file("gene,S1\nENSG01,4\n");
        assert!(matches!(
            read_count_table(wrong_id.path(), "ENSEMBL_ID"),
            Err(AnalysisError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_read_study_design() {
        let f = file("Study_ID,New_Sample_name,Batch\nS1,Untreated WT,a\nS2,Untreated ARID1A-KO,b\n");
        let design = read_study_design(f.path()).unwrap();
        assert_eq!(design.n_samples(), 2);
        assert_eq!(design.sample_name("S2"), Some("Untreated ARID1A-KO"));

        let missing = file("Study_ID,Name\nS1,x\n");
        match read_study_design(missing.path()) {
            Err(AnalysisError::MissingColumn { column, .. }) => assert_eq!(column, "New_Sample_name"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_read_annotation_tab_separated() {
        let f = file("ensembl_gene_id\texternal_gene_name\nENSG01\tRFX5\nENSG02\t\nENSG01\tOTHER\n");
        let ann = read_annotation(f.path()).unwrap();
        assert_eq!(ann.len(), 2);
        assert_eq!(ann["ENSG01"].as_deref(), Some("RFX5"));
        assert_eq!(ann["ENSG02"], None);
    }

    #[test]
    fn test_read_network_default_weight() {
        let f = file("source,target\nRFX5,HLA-A\nRFX5,CD74\n");
        let net = read_network(f.path()).unwrap();
        assert_eq!(net.targets_of("RFX5").unwrap()[1], ("CD74".to_string(), 1.0));

        let weighted = file("source\ttarget\tweight\nTWIST1\tCDH1\t-1\n");
        let net = read_network(weighted.path()).unwrap();
        assert_eq!(net.targets_of("TWIST1").unwrap()[0].1, -1.0);
    }

    #[test]
    fn test_results_table_keeps_missing_values() {
        let mut res = DESeqResults::new(vec!["RFX5".to_string(), "CD74".to_string()], Contrast::default());
        res.base_means = vec![120.5, 0.0];
        res.log2_fold_changes = vec![-1.25, f64::NAN];
        res.stat = vec![-4.0, f64::NAN];
        let out = NamedTempFile::new().unwrap();
        write_results(out.path(), &res).unwrap();

        let text = std::fs::read_to_string(out.path()).unwrap();
        assert!(text.starts_with("gene,baseMean,log2FoldChange,lfcSE,stat,pvalue,padj\n"));
        assert!(text.contains("CD74,0.0,,,,,"));

        let back = read_results(out.path()).unwrap();
        assert_eq!(back.gene_ids, res.gene_ids);
        assert_eq!(back.stat[0], -4.0);
        assert!(back.stat[1].is_nan());
    }

    #[test]
    fn test_write_activity_header() {
        let est = ActivityEstimate {
            experiment: "sample-name KO vs WT".to_string(),
            sources: vec!["RFX5".to_string()],
            scores: vec![-3.5],
            pvalues: vec![0.001],
        };
        let out = NamedTempFile::new().unwrap();
        write_activity(out.path(), &est, ActivityColumn::PValue).unwrap();
        let text = std::fs::read_to_string(out.path()).unwrap();
        assert_eq!(text, "source,sample-name KO vs WT\nRFX5,0.001\n");
    }
}
