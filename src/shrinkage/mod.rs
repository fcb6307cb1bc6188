//! Log fold change shrinkage

mod apeglm;

pub use apeglm::{shrink_lfc_apeglm, ApeglmParams};
