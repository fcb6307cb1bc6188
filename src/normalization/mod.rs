//! Library size normalization

mod counts;
mod size_factors;

pub use counts::cpm;
pub use size_factors::{estimate_size_factors, median_of_ratios};
