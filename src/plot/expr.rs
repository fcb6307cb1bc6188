//! Expression filter diagnostic

use std::path::Path;

use plotters::prelude::*;

use super::{padded_range, plot_err, NEUTRAL, UP};
use crate::error::Result;
use crate::filter::{ExprFilter, ExprFilterParams};

/// Genes as points of log10 total count against the number of samples at
/// or above the CPM cutoff, with both thresholds drawn as lines.
/// Kept genes are highlighted.
pub fn plot_filter_by_expr<P: AsRef<Path>>(path: P, filter: &ExprFilter, params: &ExprFilterParams) -> Result<()> {
    let points: Vec<(f64, f64, bool)> = filter
        .totals
        .iter()
        .zip(&filter.n_above)
        .zip(&filter.keep)
        .map(|((&t, &n), &k)| ((t + 1.0).log10(), n as f64, k))
        .collect();
    let total_line = (params.min_total_count + 1.0).log10();
    let x_range = padded_range(points.iter().map(|p| p.0).chain(std::iter::once(total_line)));
    let y_max = filter.lib_sizes.len() as f64 + 0.5;

    let root = SVGBackend::new(path.as_ref(), (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("filterByExpr: CPM cutoff {:.2}", filter.cpm_cutoff),
            ("sans-serif", 20),
        )
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_range.clone(), -0.5..y_max)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("log10(total count + 1)")
        .y_desc("samples with CPM >= cutoff")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(
            points
                .iter()
                .map(|&(x, y, kept)| Circle::new((x, y), 2, if kept { UP.filled() } else { NEUTRAL.filled() })),
        )
        .map_err(plot_err)?;
    chart
        .draw_series(std::iter::once(PathElement::new(
            vec![(total_line, -0.5), (total_line, y_max)],
            BLACK.stroke_width(1),
        )))
        .map_err(plot_err)?;
    chart
        .draw_series(std::iter::once(PathElement::new(
            vec![(x_range.start, filter.min_sample_size), (x_range.end, filter.min_sample_size)],
            BLACK.stroke_width(1),
        )))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CountMatrix;
    use crate::filter::filter_by_expr;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn test_writes_svg() {
        let counts = CountMatrix::new(
            array![[10.0, 12.0, 0.0], [300.0, 280.0, 310.0], [0.0, 1.0, 0.0]],
            vec!["a".into(), "b".into(), "c".into()],
            vec!["s1".into(), "s2".into(), "s3".into()],
        )
        .unwrap();
        let params = ExprFilterParams::default();
        let filter = filter_by_expr(&counts, &params).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("filter.svg");
        plot_filter_by_expr(&path, &filter, &params).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("<svg"));
    }
}
