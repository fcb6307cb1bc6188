//! Gene and result filtering: expression filter, Cook's outliers, independent filtering

mod cooks;
mod expr;
mod independent;

pub use cooks::{calculate_cooks, cooks_cutoff, cooks_filter, replace_outliers, replaceable_samples, OutlierParams};
pub use expr::{filter_by_expr, ExprFilter, ExprFilterParams};
pub use independent::independent_filtering;
