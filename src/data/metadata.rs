//! Per-sample annotation columns

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Sample metadata: sample labels plus categorical columns in insertion order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleMetadata {
    sample_ids: Vec<String>,
    columns: Vec<(String, Vec<String>)>,
}

impl SampleMetadata {
    pub fn new(sample_ids: Vec<String>) -> Self {
        Self {
            sample_ids,
            columns: Vec::new(),
        }
    }

    /// Add or replace a categorical column
    pub fn add_column(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} values for column '{}'", self.sample_ids.len(), name),
                got: format!("{} values", values.len()),
            });
        }
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = values,
            None => self.columns.push((name.to_string(), values)),
        }
        Ok(())
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&[String]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// Column names in insertion order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Sorted unique levels of a column
    pub fn levels(&self, name: &str) -> Result<Vec<String>> {
        let values = self.column(name).ok_or_else(|| AnalysisError::InvalidMetadata {
            reason: format!("column '{}' not found", name),
        })?;
        let mut unique = values.to_vec();
        unique.sort();
        unique.dedup();
        Ok(unique)
    }

    /// Indices of samples carrying the given level
    pub fn samples_with_level(&self, name: &str, level: &str) -> Vec<usize> {
        self.column(name)
            .map(|values| {
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.as_str() == level)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_columns_and_levels() {
        let mut meta = SampleMetadata::new(strings(&["a", "b", "c"]));
        meta.add_column("group", strings(&["WT", "KO", "WT"])).unwrap();
        meta.add_column("flag", strings(&["control", "treatment", "control"]))
            .unwrap();

        assert_eq!(meta.column_names(), vec!["group", "flag"]);
        assert_eq!(meta.levels("group").unwrap(), strings(&["KO", "WT"]));
        assert_eq!(meta.samples_with_level("group", "WT"), vec![0, 2]);
        assert!(meta.levels("missing").is_err());
    }

    #[test]
    fn test_replace_column_keeps_position() {
        let mut meta = SampleMetadata::new(strings(&["a", "b"]));
        meta.add_column("x", strings(&["1", "2"])).unwrap();
        meta.add_column("y", strings(&["3", "4"])).unwrap();
        meta.add_column("x", strings(&["5", "6"])).unwrap();
        assert_eq!(meta.column_names(), vec!["x", "y"]);
        assert_eq!(meta.column("x").unwrap(), &["5", "6"]);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut meta = SampleMetadata::new(strings(&["a", "b"]));
        assert!(meta.add_column("x", strings(&["1"])).is_err());
    }
}
