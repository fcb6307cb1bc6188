//! Independent filtering on mean normalized counts

use crate::io::DESeqResults;
use crate::stats::{lowess, quantile_sorted};
use crate::testing::benjamini_hochberg;

const N_THETA: usize = 50;

/// Choose the base mean cutoff that maximises rejections and adjust p-values.
///
/// For 50 quantiles of the base means, p-values of genes below the quantile
/// are dropped before BH adjustment and rejections at `alpha` counted. The
/// first quantile whose count exceeds the lowess fit maximum minus the fit
/// RMSE is used; with ten or fewer rejections everywhere no gene is filtered.
pub fn independent_filtering(results: &mut DESeqResults, alpha: f64) {
    let n = results.n_genes();
    if n == 0 {
        return;
    }

    let means = &results.base_means;
    let lower = means.iter().filter(|&&m| m == 0.0).count() as f64 / n as f64;
    let upper = if lower < 0.95 { 0.95 } else { 1.0 };
    let thetas: Vec<f64> = (0..N_THETA)
        .map(|i| lower + (upper - lower) * i as f64 / (N_THETA - 1) as f64)
        .collect();

    let mut sorted: Vec<f64> = means.iter().copied().filter(|m| m.is_finite()).collect();
    if sorted.is_empty() {
        results.padj = benjamini_hochberg(&results.pvalues);
        return;
    }
    sorted.sort_by(f64::total_cmp);
    let cutoffs: Vec<f64> = thetas.iter().map(|&t| quantile_sorted(&sorted, t)).collect();

    let adjusted: Vec<Vec<f64>> = cutoffs
        .iter()
        .map(|&cutoff| {
            let kept: Vec<f64> = results
                .pvalues
                .iter()
                .zip(means)
                .map(|(&p, &m)| if m >= cutoff { p } else { f64::NAN })
                .collect();
            benjamini_hochberg(&kept)
        })
        .collect();
    let rejections: Vec<f64> = adjusted
        .iter()
        .map(|padj| padj.iter().filter(|&&q| q < alpha).count() as f64)
        .collect();

    let max_rej = rejections.iter().copied().fold(0.0, f64::max);
    let best = if max_rej <= 10.0 {
        0
    } else {
        let fit = lowess(&thetas, &rejections, 1.0 / 5.0, 3);
        let residuals: Vec<f64> = rejections
            .iter()
            .zip(&fit)
            .filter(|(&r, _)| r > 0.0)
            .map(|(&r, &f)| r - f)
            .collect();
        let rmse = (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt();
        let threshold = fit.iter().copied().fold(f64::NEG_INFINITY, f64::max) - rmse;
        rejections.iter().position(|&r| r > threshold).unwrap_or(0)
    };

    log::info!(
        "Independent filtering: theta={:.3}, base mean cutoff={:.3}, rejections={}",
        thetas[best],
        cutoffs[best],
        rejections[best]
    );
    results.filter_threshold = Some(cutoffs[best]);
    results.padj = adjusted.into_iter().nth(best).unwrap_or_default();
}
