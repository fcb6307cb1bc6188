//! Volcano plot of differential expression results

use std::path::Path;

use plotters::prelude::*;

use super::{padded_range, plot_err, DOWN, NEUTRAL, UP};
use crate::error::Result;
use crate::io::DESeqResults;

/// Direction of a gene's change at the plot thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regulation {
    Up,
    Down,
    NotSignificant,
}

/// Classify genes by `|log2FoldChange| >= lfc_threshold` and
/// `padj < padj_threshold`; genes with a missing value are not significant
pub fn classify_genes(results: &DESeqResults, lfc_threshold: f64, padj_threshold: f64) -> Vec<Regulation> {
    results
        .log2_fold_changes
        .iter()
        .zip(&results.padj)
        .map(|(&lfc, &q)| {
            if !(q < padj_threshold) || !lfc.is_finite() {
                Regulation::NotSignificant
            } else if lfc >= lfc_threshold {
                Regulation::Up
            } else if lfc <= -lfc_threshold {
                Regulation::Down
            } else {
                Regulation::NotSignificant
            }
        })
        .collect()
}

/// log2 fold change against -log10(padj); the `top` significant genes with
/// the smallest adjusted p-values are labelled
pub fn plot_volcano<P: AsRef<Path>>(
    path: P,
    results: &DESeqResults,
    lfc_threshold: f64,
    padj_threshold: f64,
    top: usize,
) -> Result<()> {
    let classes = classify_genes(results, lfc_threshold, padj_threshold);
    let points: Vec<(usize, f64, f64)> = (0..results.n_genes())
        .filter(|&g| results.log2_fold_changes[g].is_finite() && results.padj[g].is_finite())
        .map(|g| (g, results.log2_fold_changes[g], -results.padj[g].max(1e-300).log10()))
        .collect();

    let mut labelled: Vec<&(usize, f64, f64)> = points
        .iter()
        .filter(|(g, _, _)| classes[*g] != Regulation::NotSignificant)
        .collect();
    labelled.sort_by(|a, b| b.2.total_cmp(&a.2));
    labelled.truncate(top);

    let x_range = padded_range(points.iter().map(|p| p.1).chain([-lfc_threshold, lfc_threshold]));
    let y_threshold = -padj_threshold.log10();
    let y_range = padded_range(points.iter().map(|p| p.2).chain([0.0, y_threshold]));

    let root = SVGBackend::new(path.as_ref(), (800, 700)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(results.contrast.label(), ("sans-serif", 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_range.clone(), y_range.clone())
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("log2FoldChange")
        .y_desc("-log10(padj)")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(points.iter().map(|&(g, x, y)| {
            let color = match classes[g] {
                Regulation::Up => UP,
                Regulation::Down => DOWN,
                Regulation::NotSignificant => NEUTRAL,
            };
            Circle::new((x, y), 2, color.filled())
        }))
        .map_err(plot_err)?;

    let dashed = BLACK.mix(0.5).stroke_width(1);
    let guides = [
        vec![(-lfc_threshold, y_range.start), (-lfc_threshold, y_range.end)],
        vec![(lfc_threshold, y_range.start), (lfc_threshold, y_range.end)],
        vec![(x_range.start, y_threshold), (x_range.end, y_threshold)],
    ];
    chart
        .draw_series(guides.into_iter().map(|line| PathElement::new(line, dashed)))
        .map_err(plot_err)?;

    chart
        .draw_series(labelled.iter().map(|&&(g, x, y)| {
            Text::new(results.gene_ids[g].clone(), (x, y), ("sans-serif", 11).into_font())
        }))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Contrast;
    use tempfile::tempdir;

    fn results() -> DESeqResults {
        let genes = ["RFX5", "CIITA", "TWIST1", "GAPDH", "ACTB"].iter().map(|s| s.to_string()).collect();
        let mut res = DESeqResults::new(genes, Contrast::new("sample-name", "KO", "WT"));
        res.log2_fold_changes = vec![-2.0, 1.2, 0.3, 0.8, f64::NAN];
        res.padj = vec![1e-8, 0.01, 1e-4, 0.2, f64::NAN];
        res
    }

    #[test]
    fn test_classification() {
        let classes = classify_genes(&results(), 0.5, 0.05);
        assert_eq!(
            classes,
            vec![
                Regulation::Down,
                Regulation::Up,
                Regulation::NotSignificant,
                Regulation::NotSignificant,
                Regulation::NotSignificant
            ]
        );
    }

    #[test]
    fn test_writes_labelled_svg() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("volcano.svg");
        plot_volcano(&path, &results(), 0.5, 0.05, 1).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("RFX5"));
        assert!(!svg.contains("CIITA"));
    }
}
