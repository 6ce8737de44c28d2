//! Maximum-likelihood fitting of the two parametric families the model uses.
//!
//! - `LogNormal` models the tree height. Its MLE has a closed form: fit the
//!   normal MLE to the log-transformed observations.
//! - `Beta` models branch ratios on (0, 1). Its MLE has no closed form; we
//!   implement the exact-likelihood method of Beckman & Tietjen (1978),
//!   solving the profiled digamma equation with a 1-D Nelder-Mead
//!   minimization of a squared residual, seeded by a method-of-moments
//!   estimate. The inverse digamma function is solved the same way, seeded
//!   by the asymptotic bound of Batir (2018).
//!
//! All log transforms clamp their inputs away from 0 and 1 by `1e-10` so
//! the transformed observations stay finite.

use rand::Rng;
use rand_distr::{Beta as BetaSampler, Distribution, LogNormal as LogNormalSampler};
use statrs::function::beta::ln_beta;
use statrs::function::gamma::digamma;

use crate::error::{BccdError, Result};

/// Observations are clamped into `[CLAMP, 1 - CLAMP]` before log transforms.
const CLAMP: f64 = 1e-10;

/// Concentration used for a sample with (numerically) zero variance, where
/// the exact MLE diverges. The resulting Beta has its point estimate exactly
/// at the sample mean, so a degenerate forest reproduces its own ratios.
const DEGENERATE_CONCENTRATION: f64 = 1e8;

/// Samples with variance at or below this threshold are treated as degenerate.
const DEGENERATE_VARIANCE: f64 = 1e-12;

const MAX_ITERATIONS: usize = 200;
const TOLERANCE: f64 = 1e-12;

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased (n-1) sample variance; 0 for fewer than two observations.
fn variance(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (values.len() - 1) as f64
}

/// Minimizes `f` over a single scalar with a two-point Nelder-Mead simplex
/// (reflection, expansion, contraction, shrink), starting at `x0`.
pub(crate) fn minimize_scalar<F: Fn(f64) -> f64>(f: F, x0: f64) -> f64 {
    let step = if x0 != 0.0 { 0.05 * x0.abs() } else { 0.00025 };
    let mut best = (x0, f(x0));
    let mut worst = (x0 + step, f(x0 + step));

    for _ in 0..MAX_ITERATIONS {
        if worst.1 < best.1 {
            std::mem::swap(&mut best, &mut worst);
        }
        if (best.0 - worst.0).abs() < TOLERANCE {
            break;
        }

        let reflected = best.0 + (best.0 - worst.0);
        let fr = f(reflected);
        if fr < best.1 {
            let expanded = best.0 + 2.0 * (best.0 - worst.0);
            let fe = f(expanded);
            worst = if fe < fr { (expanded, fe) } else { (reflected, fr) };
        } else {
            let contracted = (best.0 + worst.0) / 2.0;
            let fc = f(contracted);
            worst = (contracted, fc);
        }
    }

    if worst.1 < best.1 { worst.0 } else { best.0 }
}

/// Inverse of the digamma function: solves `digamma(v) = y` for `v > 0`.
///
/// Seeded by the closed-form approximation `1 / ln(1 + exp(-y))` of
/// Batir, Arch. Math. 110 (2018), then refined by squared-residual
/// minimization.
pub fn inverse_digamma(y: f64) -> f64 {
    let objective = |v: f64| {
        if v <= 0.0 {
            return f64::INFINITY;
        }
        let residual = digamma(v) - y;
        residual * residual
    };

    let seed = (1.0 / (1.0 + (-y).exp()).ln()).max(CLAMP);
    minimize_scalar(objective, seed)
}

/// A fitted log-normal distribution over positive values.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LogNormal {
    pub mu: f64,
    pub sigma: f64,
}

impl LogNormal {
    /// Closed-form MLE: `mu = mean(log x)`, `sigma = stdev(log x)`.
    pub fn fit(observations: &[f64]) -> Result<Self> {
        if observations.is_empty() {
            return Err(BccdError::EmptySample);
        }

        let logs: Vec<f64> = observations.iter().map(|&x| x.max(CLAMP).ln()).collect();
        let mu = mean(&logs);
        let sigma = variance(&logs, mu).sqrt();

        Ok(LogNormal { mu, sigma })
    }

    /// The point value used for the estimated tree height.
    pub fn point_estimate(&self) -> f64 {
        (self.mu - self.sigma * self.sigma).exp()
    }

    pub fn log_density(&self, x: f64) -> f64 {
        if self.sigma <= 0.0 {
            // degenerate distribution, constant contribution
            return 0.0;
        }
        let lx = x.max(CLAMP).ln();
        let z = (lx - self.mu) / self.sigma;
        -lx - self.sigma.ln() - 0.5 * (2.0 * std::f64::consts::PI).ln() - 0.5 * z * z
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        let sampler = LogNormalSampler::new(self.mu, self.sigma)
            .map_err(|e| BccdError::InvalidSampler(e.to_string()))?;
        Ok(sampler.sample(rng))
    }
}

/// A fitted beta distribution over (0, 1).
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Beta {
    pub alpha: f64,
    pub beta: f64,
}

impl Beta {
    /// Exact-likelihood MLE after Beckman & Tietjen (1978).
    ///
    /// Solves `digamma(b) - digamma(inv_digamma(logG1 - logG2 + digamma(b)) + b)
    /// - logG2 = 0` for `b` by squared-residual minimization, where `logG1`
    /// and `logG2` are the means of `log(x)` and `log(1 - x)`, then recovers
    /// `a = inv_digamma(logG1 - logG2 + digamma(b))`.
    ///
    /// # Errors
    /// The method-of-moments seed fails with a fatal fitting error when the
    /// sample variance is incompatible with any beta distribution
    /// (`variance >= mean * (1 - mean)`) or the moment estimate is
    /// non-positive. There is no fallback at this layer; pooling decisions
    /// happen in the model builder based on sample counts.
    pub fn fit(observations: &[f64]) -> Result<Self> {
        if observations.is_empty() {
            return Err(BccdError::EmptySample);
        }

        let m = mean(observations);
        let v = variance(observations, m);

        if v <= DEGENERATE_VARIANCE {
            let m = m.clamp(CLAMP, 1.0 - CLAMP);
            return Ok(Beta {
                alpha: m * DEGENERATE_CONCENTRATION,
                beta: (1.0 - m) * DEGENERATE_CONCENTRATION,
            });
        }

        let seed = estimate_beta_with_mom(m, v)?;

        let n = observations.len() as f64;
        let log_g1 = observations.iter().map(|&x| x.max(CLAMP).ln()).sum::<f64>() / n;
        let log_g2 = observations.iter().map(|&x| (1.0 - x).max(CLAMP).ln()).sum::<f64>() / n;

        let objective = |b: f64| {
            if b <= 0.0 {
                return f64::INFINITY;
            }
            let a = inverse_digamma(log_g1 - log_g2 + digamma(b));
            let residual = digamma(b) - digamma(a + b) - log_g2;
            residual * residual
        };

        let beta = minimize_scalar(objective, seed);
        let alpha = inverse_digamma(log_g1 - log_g2 + digamma(beta));

        Ok(Beta { alpha, beta })
    }

    /// The distribution mean `alpha / (alpha + beta)`.
    pub fn point_estimate(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    pub fn log_density(&self, x: f64) -> f64 {
        let x = x.clamp(CLAMP, 1.0 - CLAMP);
        (self.alpha - 1.0) * x.ln() + (self.beta - 1.0) * (1.0 - x).ln()
            - ln_beta(self.alpha, self.beta)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        let sampler = BetaSampler::new(self.alpha, self.beta)
            .map_err(|e| BccdError::InvalidSampler(e.to_string()))?;
        Ok(sampler.sample(rng))
    }
}

/// Method-of-moments estimate of the beta parameter, used to seed the solve.
fn estimate_beta_with_mom(mean: f64, variance: f64) -> Result<f64> {
    if variance >= mean * (1.0 - mean) {
        return Err(BccdError::BetaVarianceTooLarge { mean, variance });
    }

    let beta = (1.0 - mean) * ((mean * (1.0 - mean)) / variance - 1.0);

    if beta <= 0.0 {
        return Err(BccdError::BetaMomentNonPositive);
    }

    Ok(beta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn inverse_digamma_round_trip() {
        for &v in &[0.1, 0.5, 1.0, 3.0, 8.0, 42.0] {
            let y = digamma(v);
            assert_abs_diff_eq!(inverse_digamma(y), v, epsilon = 1e-5);
        }
    }

    #[test]
    fn minimize_scalar_finds_parabola_minimum() {
        let x = minimize_scalar(|x| (x - 3.25) * (x - 3.25), 0.5);
        assert_abs_diff_eq!(x, 3.25, epsilon = 1e-6);
    }

    #[test]
    fn log_normal_mle_recovers_parameters() {
        let mut rng = StdRng::seed_from_u64(42);
        let true_dist = LogNormal { mu: 1.0, sigma: 0.5 };
        let samples: Vec<f64> =
            (0..10_000).map(|_| true_dist.sample(&mut rng).unwrap()).collect();

        let fitted = LogNormal::fit(&samples).unwrap();
        assert_abs_diff_eq!(fitted.mu, 1.0, epsilon = 0.05);
        assert_abs_diff_eq!(fitted.sigma, 0.5, epsilon = 0.05);
    }

    #[test]
    fn beta_mle_recovers_parameters() {
        let mut rng = StdRng::seed_from_u64(7);
        let true_dist = Beta { alpha: 3.0, beta: 5.0 };
        let samples: Vec<f64> =
            (0..10_000).map(|_| true_dist.sample(&mut rng).unwrap()).collect();

        let fitted = Beta::fit(&samples).unwrap();
        assert_abs_diff_eq!(fitted.alpha, 3.0, epsilon = 0.15);
        assert_abs_diff_eq!(fitted.beta, 5.0, epsilon = 0.2);
    }

    #[test]
    fn sampling_with_invalid_parameters_reports_an_error() {
        let mut rng = StdRng::seed_from_u64(1);

        let beta = Beta { alpha: 0.0, beta: 1.0 };
        assert!(matches!(beta.sample(&mut rng), Err(BccdError::InvalidSampler(_))));

        let log_normal = LogNormal { mu: 0.0, sigma: -1.0 };
        assert!(matches!(log_normal.sample(&mut rng), Err(BccdError::InvalidSampler(_))));
    }

    #[test]
    fn beta_fit_rejects_incompatible_variance() {
        // mean 0.5, sample variance far above mean * (1 - mean)
        let samples = [0.01, 0.99, 0.01, 0.99];
        match Beta::fit(&samples) {
            Err(BccdError::BetaVarianceTooLarge { .. }) => {}
            other => panic!("expected variance error, got {other:?}"),
        }
    }

    #[test]
    fn beta_fit_on_constant_sample_is_exact_at_the_mean() {
        let samples = [0.42; 8];
        let fitted = Beta::fit(&samples).unwrap();
        assert_abs_diff_eq!(fitted.point_estimate(), 0.42, epsilon = 1e-12);
    }

    #[test]
    fn log_normal_point_estimate_of_constant_sample_is_the_value() {
        let fitted = LogNormal::fit(&[2.0; 6]).unwrap();
        assert_abs_diff_eq!(fitted.point_estimate(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn beta_log_density_matches_known_value() {
        // Beta(2, 2): pdf(x) = 6 x (1 - x); at x = 0.5 the density is 1.5
        let dist = Beta { alpha: 2.0, beta: 2.0 };
        assert_abs_diff_eq!(dist.log_density(0.5), 1.5f64.ln(), epsilon = 1e-9);
    }
}
