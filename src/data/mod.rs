//! Data structures for the analysis

mod count_matrix;
mod dataset;
mod metadata;

pub use count_matrix::CountMatrix;
pub use dataset::{DESeqDataSet, DispersionTrend};
pub use metadata::SampleMetadata;
