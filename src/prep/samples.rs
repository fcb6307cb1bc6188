//! Sample labels and sample-level annotation

use std::collections::HashMap;

use crate::config::SampleFlag;
use crate::data::{CountMatrix, SampleMetadata};
use crate::error::{AnalysisError, Result};
use crate::io::StudyDesign;

/// Rename count columns to the design's sample names.
///
/// When every count column is a known `Study_ID` the mapping is by ID;
/// otherwise columns are matched to design rows by position.
pub fn rename_samples(counts: CountMatrix, design: &StudyDesign) -> Result<CountMatrix> {
    let by_id: HashMap<&str, &str> = design
        .study_ids
        .iter()
        .map(String::as_str)
        .zip(design.sample_names.iter().map(String::as_str))
        .collect();

    let keyed: Option<Vec<String>> = counts
        .sample_ids()
        .iter()
        .map(|id| by_id.get(id.as_str()).map(|name| name.to_string()))
        .collect();
    let names = match keyed {
        Some(names) => {
            log::debug!("Renaming samples by Study_ID");
            names
        }
        None => {
            if counts.n_samples() != design.n_samples() {
                return Err(AnalysisError::DimensionMismatch {
                    expected: format!("{} design rows for the count columns", counts.n_samples()),
                    got: format!("{}", design.n_samples()),
                });
            }
            log::warn!("Count columns are not Study_IDs; renaming samples by position");
            design.sample_names.clone()
        }
    };
    counts.with_sample_ids(names)
}

/// Replace every `__` in sample names with a space
pub fn clean_sample_names(counts: CountMatrix) -> Result<CountMatrix> {
    let names = counts.sample_ids().iter().map(|s| s.replace("__", " ")).collect();
    counts.with_sample_ids(names)
}

/// Sample table with the design factor column set to the sample names and
/// one `treatment`/`control` column per flag, by substring match.
pub fn derive_sample_flags(samples: &[String], design_factor: &str, flags: &[SampleFlag]) -> Result<SampleMetadata> {
    let mut metadata = SampleMetadata::new(samples.to_vec());
    metadata.add_column(design_factor, samples.to_vec())?;
    for flag in flags {
        let values = samples
            .iter()
            .map(|s| {
                if s.contains(flag.marker.as_str()) {
                    "treatment".to_string()
                } else {
                    "control".to_string()
                }
            })
            .collect();
        metadata.add_column(&flag.column, values)?;
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn counts(samples: &[&str]) -> CountMatrix {
        CountMatrix::new(Array2::ones((2, samples.len())), strings(&["g1", "g2"]), strings(samples)).unwrap()
    }

    fn design() -> StudyDesign {
        StudyDesign {
            study_ids: strings(&["S1", "S2", "S3"]),
            sample_names: strings(&["Untreated__WT", "Untreated__ARID1A-KO", "Trametinib__WT"]),
        }
    }

    #[test]
    fn test_rename_by_id_then_position() {
        let by_id = rename_samples(counts(&["S3", "S1", "S2"]), &design()).unwrap();
        assert_eq!(by_id.sample_ids()[0], "Trametinib__WT");

        let by_position = rename_samples(counts(&["a", "b", "c"]), &design()).unwrap();
        assert_eq!(by_position.sample_ids()[1], "Untreated__ARID1A-KO");

        assert!(rename_samples(counts(&["a", "b"]), &design()).is_err());
    }

    #[test]
    fn test_clean_names() {
        let cleaned = clean_sample_names(counts(&["Untreated__WT", "Vermurafenib_and_Trametinib"])).unwrap();
        assert_eq!(cleaned.sample_ids(), &strings(&["Untreated WT", "Vermurafenib_and_Trametinib"])[..]);
    }

    #[test]
    fn test_flags_by_substring() {
        let samples = strings(&["Untreated WT", "Vermurafenib_and_Trametinib ARID1A_KO"]);
        let flags = vec![
            SampleFlag::new("trametinib", "Trametinib"),
            SampleFlag::new("combination", "and"),
            SampleFlag::new("ARID1A_KO", "ARID1A_KO"),
        ];
        let meta = derive_sample_flags(&samples, "sample-name", &flags).unwrap();
        assert_eq!(meta.column("sample-name").unwrap(), &samples[..]);
        assert_eq!(meta.column("trametinib").unwrap(), &strings(&["control", "treatment"])[..]);
        assert_eq!(meta.column("combination").unwrap()[1], "treatment");
        assert_eq!(meta.column_names().len(), 4);
    }
}
