//! Probability distributions and their samplers.
//!
//! All samplers draw from a caller-supplied uniform source so a task's
//! stream is fully determined by its seed.
//!
//! | Distribution | Method |
//! |---|---|
//! | Normal | Box-Muller from two uniforms |
//! | Uniform | linear scaling into `[min, max)` |
//! | Beta | Johnk when both shapes <= 1, otherwise ratio of two gammas |
//! | Gamma | Marsaglia-Tsang, boosted by one with a `U^(1/shape)` correction below 1 |
//! | Poisson | Knuth multiplication below 30, normal approximation above |
//! | Binomial | Bernoulli sum when `np` or `n(1-p)` is under 10, otherwise normal approximation |
//! | Exponential | inverse CDF |

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Above this rate Poisson draws use the normal approximation.
pub const POISSON_NORMAL_CUTOFF: f64 = 30.0;

/// Minimum `np` and `n(1-p)` for the binomial normal approximation.
pub const BINOMIAL_NORMAL_CUTOFF: f64 = 10.0;

/// A parametric distribution attached to a scenario variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Distribution {
    Normal { mean: f64, std_dev: f64 },
    Uniform { min: f64, max: f64 },
    Beta { alpha: f64, beta: f64 },
    Gamma { shape: f64, scale: f64 },
    Poisson { lambda: f64 },
    Binomial { n: u32, p: f64 },
    Exponential { lambda: f64 },
}

impl Distribution {
    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Distribution::Normal { .. } => "normal",
            Distribution::Uniform { .. } => "uniform",
            Distribution::Beta { .. } => "beta",
            Distribution::Gamma { .. } => "gamma",
            Distribution::Poisson { .. } => "poisson",
            Distribution::Binomial { .. } => "binomial",
            Distribution::Exponential { .. } => "exponential",
        }
    }

    /// True for distributions that only produce integers.
    pub fn is_discrete(&self) -> bool {
        matches!(self, Distribution::Poisson { .. } | Distribution::Binomial { .. })
    }

    /// Checks the parameters, returning a human readable reason on failure.
    pub fn check(&self) -> Result<(), String> {
        let finite = |label: &str, v: f64| {
            if v.is_finite() {
                Ok(())
            } else {
                Err(format!("{} must be finite, got {}", label, v))
            }
        };

        match *self {
            Distribution::Normal { mean, std_dev } => {
                finite("mean", mean)?;
                finite("std_dev", std_dev)?;
                if std_dev <= 0.0 {
                    return Err(format!("std_dev must be > 0, got {}", std_dev));
                }
            }
            Distribution::Uniform { min, max } => {
                finite("min", min)?;
                finite("max", max)?;
                if min >= max {
                    return Err(format!("min {} must be below max {}", min, max));
                }
            }
            Distribution::Beta { alpha, beta } => {
                finite("alpha", alpha)?;
                finite("beta", beta)?;
                if alpha <= 0.0 || beta <= 0.0 {
                    return Err(format!("alpha and beta must be > 0, got {} and {}", alpha, beta));
                }
            }
            Distribution::Gamma { shape, scale } => {
                finite("shape", shape)?;
                finite("scale", scale)?;
                if shape <= 0.0 || scale <= 0.0 {
                    return Err(format!("shape and scale must be > 0, got {} and {}", shape, scale));
                }
            }
            Distribution::Poisson { lambda } | Distribution::Exponential { lambda } => {
                finite("lambda", lambda)?;
                if lambda <= 0.0 {
                    return Err(format!("lambda must be > 0, got {}", lambda));
                }
            }
            Distribution::Binomial { n, p } => {
                if n < 1 {
                    return Err("n must be >= 1".to_string());
                }
                if !(0.0..=1.0).contains(&p) {
                    return Err(format!("p must be in [0, 1], got {}", p));
                }
            }
        }
        Ok(())
    }

    /// Theoretical mean, used by presets and tests.
    pub fn mean(&self) -> f64 {
        match *self {
            Distribution::Normal { mean, .. } => mean,
            Distribution::Uniform { min, max } => (min + max) / 2.0,
            Distribution::Beta { alpha, beta } => alpha / (alpha + beta),
            Distribution::Gamma { shape, scale } => shape * scale,
            Distribution::Poisson { lambda } => lambda,
            Distribution::Binomial { n, p } => n as f64 * p,
            Distribution::Exponential { lambda } => 1.0 / lambda,
        }
    }

    /// Draws one value.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            Distribution::Normal { mean, std_dev } => mean + std_dev * standard_normal(rng),
            Distribution::Uniform { min, max } => min + rng.gen::<f64>() * (max - min),
            Distribution::Beta { alpha, beta } => sample_beta(rng, alpha, beta),
            Distribution::Gamma { shape, scale } => standard_gamma(rng, shape) * scale,
            Distribution::Poisson { lambda } => sample_poisson(rng, lambda),
            Distribution::Binomial { n, p } => sample_binomial(rng, n, p),
            Distribution::Exponential { lambda } => -(1.0 - rng.gen::<f64>()).ln() / lambda,
        }
    }
}

/// Uniform draw in (0, 1], safe to take the logarithm of.
fn open_unit<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    1.0 - rng.gen::<f64>()
}

/// Box-Muller transform.
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1 = open_unit(rng);
    let u2 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Marsaglia-Tsang gamma with unit scale.
pub fn standard_gamma<R: Rng + ?Sized>(rng: &mut R, shape: f64) -> f64 {
    if shape < 1.0 {
        let u = open_unit(rng);
        return standard_gamma(rng, shape + 1.0) * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let (x, v) = loop {
            let x = standard_normal(rng);
            let v = 1.0 + c * x;
            if v > 0.0 {
                break (x, v);
            }
        };
        let v = v * v * v;
        let u = rng.gen::<f64>();
        let x2 = x * x;

        if u < 1.0 - 0.0331 * x2 * x2 {
            return d * v;
        }
        if u.ln() < 0.5 * x2 + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
}

fn sample_beta<R: Rng + ?Sized>(rng: &mut R, alpha: f64, beta: f64) -> f64 {
    if alpha <= 1.0 && beta <= 1.0 {
        // Johnk
        loop {
            let x = rng.gen::<f64>().powf(1.0 / alpha);
            let y = rng.gen::<f64>().powf(1.0 / beta);
            let sum = x + y;
            if sum <= 1.0 && sum > 0.0 {
                return x / sum;
            }
        }
    }

    loop {
        let x = standard_gamma(rng, alpha);
        let y = standard_gamma(rng, beta);
        let sum = x + y;
        if sum > 0.0 {
            return x / sum;
        }
    }
}

fn sample_poisson<R: Rng + ?Sized>(rng: &mut R, lambda: f64) -> f64 {
    if lambda < POISSON_NORMAL_CUTOFF {
        // Knuth
        let limit = (-lambda).exp();
        let mut k = 0u64;
        let mut product = 1.0;
        loop {
            k += 1;
            product *= rng.gen::<f64>();
            if product <= limit {
                return (k - 1) as f64;
            }
        }
    }

    (lambda + lambda.sqrt() * standard_normal(rng)).round().max(0.0)
}

fn sample_binomial<R: Rng + ?Sized>(rng: &mut R, n: u32, p: f64) -> f64 {
    let trials = n as f64;
    if trials * p < BINOMIAL_NORMAL_CUTOFF || trials * (1.0 - p) < BINOMIAL_NORMAL_CUTOFF {
        return (0..n).filter(|_| rng.gen::<f64>() < p).count() as f64;
    }

    let mean = trials * p;
    let std_dev = (trials * p * (1.0 - p)).sqrt();
    (mean + std_dev * standard_normal(rng)).round().clamp(0.0, trials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn moments(dist: &Distribution, draws: usize, seed: u64) -> (f64, f64) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let samples: Vec<f64> = (0..draws).map(|_| dist.sample(&mut rng)).collect();
        let mean = samples.iter().sum::<f64>() / draws as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / draws as f64;
        (mean, var.sqrt())
    }

    #[test]
    fn test_standard_normal_moments() {
        let (mean, std_dev) = moments(
            &Distribution::Normal {
                mean: 0.0,
                std_dev: 1.0,
            },
            100_000,
            42,
        );
        assert!(mean.abs() < 0.05, "mean {}", mean);
        assert!((std_dev - 1.0).abs() < 0.05, "std_dev {}", std_dev);
    }

    #[test]
    fn test_gamma_mean_both_regimes() {
        for (shape, scale) in [(0.5, 2.0), (3.0, 1.5)] {
            let (mean, _) = moments(&Distribution::Gamma { shape, scale }, 50_000, 7);
            assert!((mean - shape * scale).abs() < 0.05 * shape * scale + 0.02, "shape {} mean {}", shape, mean);
        }
    }

    #[test]
    fn test_beta_mean_both_regimes() {
        // Johnk branch, then gamma-ratio branch
        for (alpha, beta) in [(0.5, 0.8), (2.0, 5.0)] {
            let dist = Distribution::Beta { alpha, beta };
            let (mean, _) = moments(&dist, 50_000, 11);
            assert!((mean - dist.mean()).abs() < 0.01, "beta({}, {}) mean {}", alpha, beta, mean);
        }
    }

    #[test]
    fn test_poisson_mean_both_regimes() {
        for lambda in [3.5, 80.0] {
            let dist = Distribution::Poisson { lambda };
            let (mean, _) = moments(&dist, 50_000, 3);
            assert!((mean - lambda).abs() < 0.02 * lambda + 0.05, "lambda {} mean {}", lambda, mean);
        }
    }

    #[test]
    fn test_poisson_draws_are_non_negative_integers() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let dist = Distribution::Poisson { lambda: 31.0 };
        for _ in 0..10_000 {
            let x = dist.sample(&mut rng);
            assert!(x >= 0.0);
            assert_eq!(x, x.trunc());
        }
    }

    #[test]
    fn test_exponential_mean() {
        let (mean, _) = moments(&Distribution::Exponential { lambda: 4.0 }, 50_000, 9);
        assert!((mean - 0.25).abs() < 0.01);
    }

    #[test]
    fn test_check_rejects_bad_parameters() {
        assert!(Distribution::Normal { mean: 0.0, std_dev: 0.0 }.check().is_err());
        assert!(Distribution::Uniform { min: 1.0, max: 1.0 }.check().is_err());
        assert!(Distribution::Beta { alpha: 0.0, beta: 1.0 }.check().is_err());
        assert!(Distribution::Gamma { shape: 1.0, scale: -1.0 }.check().is_err());
        assert!(Distribution::Poisson { lambda: 0.0 }.check().is_err());
        assert!(Distribution::Binomial { n: 0, p: 0.5 }.check().is_err());
        assert!(Distribution::Binomial { n: 3, p: 1.5 }.check().is_err());
        assert!(Distribution::Exponential { lambda: f64::NAN }.check().is_err());
        assert!(Distribution::Binomial { n: 1, p: 1.0 }.check().is_ok());
    }

    #[test]
    fn test_serde_tagging() {
        let json = serde_json::to_string(&Distribution::Poisson { lambda: 2.0 }).unwrap();
        assert_eq!(json, r#"{"type":"poisson","lambda":2.0}"#);
    }

    proptest! {
        #[test]
        fn prop_uniform_unit_interval(seed in any::<u64>()) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let dist = Distribution::Uniform { min: 0.0, max: 1.0 };
            for _ in 0..1_000 {
                let x = dist.sample(&mut rng);
                prop_assert!((0.0..1.0).contains(&x));
            }
        }

        #[test]
        fn prop_binomial_integers_in_range(seed in any::<u64>(), n in 1u32..400, p in 0.0f64..=1.0) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let dist = Distribution::Binomial { n, p };
            for _ in 0..200 {
                let x = dist.sample(&mut rng);
                prop_assert_eq!(x, x.trunc());
                prop_assert!(x >= 0.0 && x <= n as f64);
            }
        }
    }
}
