//! Negative binomial helpers in the mean/dispersion parameterisation

use statrs::function::gamma::ln_gamma;

/// Lower bound on fitted means during GLM fitting
pub const MIN_MU: f64 = 0.5;

/// Coefficients beyond this magnitude (natural log scale) abort IRLS
pub const MAX_BETA: f64 = 30.0;

/// Clamp on the linear predictor before exponentiation
pub const MAX_ETA: f64 = 700.0;

/// Ridge penalty added to the diagonal of X'WX
pub const RIDGE_LAMBDA: f64 = 1e-6;

/// mu = size_factor * exp(eta)
pub fn nb_mean(eta: f64, size_factor: f64) -> f64 {
    size_factor * eta.clamp(-MAX_ETA, MAX_ETA).exp()
}

/// Var(Y) = mu + alpha * mu^2
pub fn nb_variance(mu: f64, alpha: f64) -> f64 {
    mu + alpha * mu * mu
}

/// IRLS weight mu / (1 + alpha * mu)
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}

/// Log probability of `y` under NB(mean = mu, size = 1/alpha)
pub fn nb_log_likelihood(y: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let size = 1.0 / alpha;
    ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0)
        + size * (size / (size + mu)).ln()
        + if y > 0.0 { y * (mu / (size + mu)).ln() } else { 0.0 }
}

/// Total log-likelihood of a gene's counts
pub fn nb_log_likelihood_sum(counts: &[f64], mu: &[f64], alpha: f64) -> f64 {
    counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| nb_log_likelihood(y, m, alpha))
        .sum()
}
