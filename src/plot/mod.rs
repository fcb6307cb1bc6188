//! SVG diagnostic plots
//!
//! Plots are written with the plotters SVG backend. Callers in the pipeline
//! log a failed plot and carry on.

mod activity;
mod expr;
mod volcano;

use std::ops::Range;

use plotters::style::RGBColor;

use crate::error::AnalysisError;

pub use activity::{plot_barplot, plot_targets, rank_targets};
pub use expr::plot_filter_by_expr;
pub use volcano::{classify_genes, plot_volcano, Regulation};

pub(crate) const UP: RGBColor = RGBColor(178, 24, 43);
pub(crate) const DOWN: RGBColor = RGBColor(33, 102, 172);
pub(crate) const NEUTRAL: RGBColor = RGBColor(160, 160, 160);

pub(crate) fn plot_err<E: std::fmt::Display>(e: E) -> AnalysisError {
    AnalysisError::Plot { reason: e.to_string() }
}

/// Range covering all finite values with 5% padding on both sides
pub(crate) fn padded_range<I: IntoIterator<Item = f64>>(values: I) -> Range<f64> {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return 0.0..1.0;
    }
    let pad = if hi > lo { 0.05 * (hi - lo) } else { 0.5 };
    (lo - pad)..(hi + pad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_range() {
        let r = padded_range([0.0, 10.0, f64::NAN]);
        assert!((r.start + 0.5).abs() < 1e-12 && (r.end - 10.5).abs() < 1e-12);
        assert_eq!(padded_range([3.0]), 2.5..3.5);
        assert_eq!(padded_range(Vec::<f64>::new()), 0.0..1.0);
    }
}
