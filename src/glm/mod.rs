//! Negative binomial generalized linear model

mod design;
mod fitting;
mod negative_binomial;
mod optim;

pub use design::DesignInfo;
pub use fitting::{coefficient_covariance, fit_gene, fit_lfc, fit_lfc_genes, GeneFit, GlmFitParams};
pub use negative_binomial::{
    nb_log_likelihood, nb_log_likelihood_sum, nb_mean, nb_variance, nb_weight, MAX_BETA, MIN_MU, RIDGE_LAMBDA,
};
pub use optim::{minimize_newton, CoefPrior, GeneModel, NewtonOutcome};
