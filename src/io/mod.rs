//! Reading input tables and writing result tables

mod csv;
mod results;

pub use self::csv::{
    read_annotation, read_count_table, read_network, read_results, read_study_design, write_activity,
    write_count_table, write_results, write_sample_table, GeneAnnotation, StudyDesign,
};
pub use results::{Contrast, DESeqResults, ResultsSummary};
