//! TF activity bar plot and target scatter

use std::collections::HashMap;
use std::path::Path;

use plotters::prelude::*;

use super::{padded_range, plot_err, DOWN, NEUTRAL, UP};
use crate::activity::{ActivityEstimate, RegulatoryNetwork};
use crate::error::{AnalysisError, Result};
use crate::io::DESeqResults;

/// Horizontal bars for the `top` sources by absolute score, red for
/// positive and blue for negative activity
pub fn plot_barplot<P: AsRef<Path>>(path: P, estimate: &ActivityEstimate, top: usize) -> Result<()> {
    let mut order = estimate.top_sources(top);
    if order.is_empty() {
        return Err(AnalysisError::Plot {
            reason: "no source has a finite activity score".to_string(),
        });
    }
    order.sort_by(|&a, &b| estimate.scores[a].total_cmp(&estimate.scores[b]));
    let n = order.len();

    let x_range = padded_range(order.iter().map(|&i| estimate.scores[i]).chain(std::iter::once(0.0)));
    let height = (80 + 22 * n).max(300) as u32;
    let root = SVGBackend::new(path.as_ref(), (700, height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(estimate.experiment.as_str(), ("sans-serif", 18))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(20)
        .build_cartesian_2d(x_range, 0.0..n as f64)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_label_formatter(&|_: &f64| String::new())
        .x_desc("activity score")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(order.iter().enumerate().map(|(row, &i)| {
            let score = estimate.scores[i];
            let color = if score >= 0.0 { UP } else { DOWN };
            Rectangle::new([(0.0, row as f64 + 0.1), (score, row as f64 + 0.9)], color.filled())
        }))
        .map_err(plot_err)?;
    chart
        .draw_series(order.iter().enumerate().map(|(row, &i)| {
            Text::new(
                estimate.sources[i].clone(),
                (estimate.scores[i], row as f64 + 0.5),
                ("sans-serif", 11).into_font(),
            )
        }))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

/// Targets of `source` present in `results` as (gene, weight, stat),
/// ordered by decreasing `|weight * stat|`
pub fn rank_targets<'a>(
    results: &'a DESeqResults,
    network: &RegulatoryNetwork,
    source: &str,
) -> Result<Vec<(&'a str, f64, f64)>> {
    let targets = network.targets_of(source).ok_or_else(|| AnalysisError::InvalidNetwork {
        reason: format!("source '{}' is not in the network", source),
    })?;
    let stats: HashMap<&str, f64> = results.statistics().into_iter().collect();

    let mut ranked: Vec<(&str, f64, f64)> = results
        .gene_ids
        .iter()
        .filter_map(|gene| {
            let stat = *stats.get(gene.as_str())?;
            let (_, weight) = targets.iter().find(|(t, _)| t == gene)?;
            Some((gene.as_str(), *weight, stat))
        })
        .collect();
    ranked.sort_by(|a, b| (b.1 * b.2).abs().total_cmp(&(a.1 * a.2).abs()));
    Ok(ranked)
}

/// Scatter of a source's targets: edge weight against gene statistic.
/// The `top` targets by `|weight * stat|` are labelled.
pub fn plot_targets<P: AsRef<Path>>(
    path: P,
    results: &DESeqResults,
    network: &RegulatoryNetwork,
    source: &str,
    top: usize,
) -> Result<()> {
    let ranked = rank_targets(results, network, source)?;
    if ranked.is_empty() {
        return Err(AnalysisError::Plot {
            reason: format!("no target of '{}' has a statistic", source),
        });
    }

    let x_range = padded_range(ranked.iter().map(|t| t.1).chain([-1.0, 1.0]));
    let y_range = padded_range(ranked.iter().map(|t| t.2).chain(std::iter::once(0.0)));
    let root = SVGBackend::new(path.as_ref(), (700, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(source, ("sans-serif", 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_range.clone(), y_range.clone())
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("weight")
        .y_desc("stat")
        .draw()
        .map_err(plot_err)?;

    let axes = [
        vec![(x_range.start, 0.0), (x_range.end, 0.0)],
        vec![(0.0, y_range.start), (0.0, y_range.end)],
    ];
    chart
        .draw_series(axes.into_iter().map(|line| PathElement::new(line, BLACK.mix(0.4).stroke_width(1))))
        .map_err(plot_err)?;

    chart
        .draw_series(ranked.iter().map(|&(_, w, s)| {
            let color = match (w * s).partial_cmp(&0.0) {
                Some(std::cmp::Ordering::Greater) => UP,
                Some(std::cmp::Ordering::Less) => DOWN,
                _ => NEUTRAL,
            };
            Circle::new((w, s), 3, color.filled())
        }))
        .map_err(plot_err)?;
    chart
        .draw_series(
            ranked
                .iter()
                .take(top)
                .map(|&(gene, w, s)| Text::new(gene.to_string(), (w, s), ("sans-serif", 11).into_font())),
        )
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}
