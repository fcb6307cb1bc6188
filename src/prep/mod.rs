//! Preparing the raw count table for analysis
//!
//! Sample renaming, gene annotation and cleaning, and the per-sample flag
//! columns derived from sample names.

mod genes;
mod samples;

pub use genes::{annotate_genes, drop_zero_genes, make_unique, make_unique_genes};
pub use samples::{clean_sample_names, derive_sample_flags, rename_samples};
