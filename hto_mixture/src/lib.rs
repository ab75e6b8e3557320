//! Two-component mixture models for hashtag (HTO) counts.
//!
//! Every hashtag is fit on its own: one component describes the background
//! level that all cells pick up, the other the signal of the cells that were
//! actually stained with that tag. A fit yields, for every cell, the posterior
//! probability that its count came from the signal component.
#![deny(missing_docs)]

use log::debug;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Normal};

const TWO_MEANS_MAX_ITERATIONS: usize = 100;

/// A single fitted normal component, on the `ln(1 + count)` scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Mean of the component.
    pub mean: f64,
    /// Standard deviation of the component.
    pub std_dev: f64,
    /// Mixing weight, the fraction of cells attributed to this component.
    pub weight: f64,
}

impl Component {
    fn ln_weighted_pdf(&self, x: f64) -> Result<f64, MixtureFitError> {
        let dist = Normal::new(self.mean, self.std_dev)
            .map_err(|e| MixtureFitError::Numerical(e.to_string()))?;
        Ok(self.weight.ln() + dist.ln_pdf(x))
    }
}

/// The result of fitting one hashtag.
#[derive(Debug, Clone)]
pub struct TagFit {
    /// Posterior probability of the signal component, one value per cell.
    pub posterior: Array1<f64>,
    /// The low (background) component.
    pub background: Component,
    /// The high (signal) component.
    pub signal: Component,
    /// Log likelihood of the data under the final parameters.
    pub log_likelihood: f64,
    /// Number of EM iterations performed.
    pub iterations: usize,
}

impl TagFit {
    /// Distance between the component means in units of the background spread.
    pub fn signal_to_noise(&self) -> f64 {
        (self.signal.mean - self.background.mean) / self.background.std_dev
    }
}

/// Reasons a hashtag could not be split into background and signal.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum MixtureFitError {
    /// There is nothing to fit.
    #[error("no cells to fit")]
    NoCells,
    /// A count was negative, NaN or infinite.
    #[error("invalid count {value}, counts must be finite and non-negative")]
    InvalidCount {
        /// The offending value.
        value: f64,
    },
    /// All cells carry the same count.
    #[error("all counts are identical, there is no bimodal structure to fit")]
    NoVariance,
    /// The two components ended up on top of each other.
    #[error("components are not separated (separation {separation:.3} below {minimum:.3})")]
    NoSeparation {
        /// Observed separation, `(mu_signal - mu_background) / pooled_sd`.
        separation: f64,
        /// Required separation.
        minimum: f64,
    },
    /// One component collapsed to (almost) no cells.
    #[error("a component collapsed to weight {weight:.2e}")]
    DegenerateWeight {
        /// Weight of the collapsed component.
        weight: f64,
    },
    /// EM did not settle within the iteration budget.
    #[error("EM did not converge after {iterations} iterations")]
    NotConverged {
        /// Iterations performed.
        iterations: usize,
    },
    /// A distribution could not be evaluated.
    #[error("numerical failure while fitting: {0}")]
    Numerical(String),
}

/// A strategy that splits one hashtag's counts into background and signal.
///
/// The labeler only relies on this contract, so any mixture family (normal
/// on log counts, negative binomial, ...) can be plugged in, and tests can use
/// a canned implementation.
pub trait TagMixtureModel: Send + Sync {
    /// Fit the model to the counts of one hashtag across all cells.
    fn fit(&self, counts: ArrayView1<'_, f64>) -> Result<TagFit, MixtureFitError>;
}

/// Two normal components fit by expectation maximization on `ln(1 + count)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianTagMixture {
    /// Maximum number of EM iterations.
    pub max_iterations: usize,
    /// Absolute change of the log likelihood that ends the iterations.
    pub abs_tol: f64,
    /// Relative change of the log likelihood that ends the iterations.
    pub rel_tol: f64,
    /// Floor on both standard deviations.
    pub min_std_dev: f64,
    /// Minimum `(mu_signal - mu_background) / pooled_sd` for an accepted fit.
    pub min_separation: f64,
    /// Minimum mixing weight of either component for an accepted fit.
    pub min_weight: f64,
}

impl Default for GaussianTagMixture {
    fn default() -> Self {
        GaussianTagMixture {
            max_iterations: 1000,
            abs_tol: 1e-2,
            rel_tol: 1e-7,
            min_std_dev: 1e-3,
            min_separation: 1.0,
            min_weight: 1e-3,
        }
    }
}

impl TagMixtureModel for GaussianTagMixture {
    fn fit(&self, counts: ArrayView1<'_, f64>) -> Result<TagFit, MixtureFitError> {
        if counts.is_empty() {
            return Err(MixtureFitError::NoCells);
        }
        if let Some(&value) = counts.iter().find(|x| !x.is_finite() || **x < 0.0) {
            return Err(MixtureFitError::InvalidCount { value });
        }
        let values = counts.mapv(f64::ln_1p);
        let mut em = TagEm::initialize(values, self.min_std_dev)?;
        em.run(self)?;
        em.finish(self)
    }
}

/// State of one EM run.
struct TagEm {
    values: Array1<f64>,
    background: Component,
    signal: Component,
    // cells, P(signal | x)
    posterior: Array1<f64>,
    log_likelihood: f64,
    iterations: usize,
    min_std_dev: f64,
}

impl TagEm {
    /// Seed the components with a two-means split started at the extremes.
    fn initialize(values: Array1<f64>, min_std_dev: f64) -> Result<Self, MixtureFitError> {
        let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if hi - lo <= f64::EPSILON {
            return Err(MixtureFitError::NoVariance);
        }

        let mut centers = (lo, hi);
        let mut is_high = Array1::from_elem(values.len(), false);
        for _ in 0..TWO_MEANS_MAX_ITERATIONS {
            let assignment = values.mapv(|x| (x - centers.1).abs() < (x - centers.0).abs());
            let changed = assignment != is_high;
            is_high = assignment;
            let (low_mean, high_mean) = (
                masked_mean(&values, &is_high, false),
                masked_mean(&values, &is_high, true),
            );
            centers = (low_mean, high_mean);
            if !changed {
                break;
            }
        }

        let posterior = is_high.mapv(|h| if h { 1.0 } else { 0.0 });
        let mut em = TagEm {
            values,
            background: Component {
                mean: centers.0,
                std_dev: 1.0,
                weight: 0.5,
            },
            signal: Component {
                mean: centers.1,
                std_dev: 1.0,
                weight: 0.5,
            },
            posterior,
            log_likelihood: f64::NEG_INFINITY,
            iterations: 0,
            min_std_dev,
        };
        em.maximization()?;
        Ok(em)
    }

    /// Recompute the posterior and the log likelihood, log-sum-exp per cell.
    fn expectation(&mut self) -> Result<(), MixtureFitError> {
        let mut ll = 0.0;
        for (x, p) in self.values.iter().zip(self.posterior.iter_mut()) {
            let ln_bg = self.background.ln_weighted_pdf(*x)?;
            let ln_sig = self.signal.ln_weighted_pdf(*x)?;
            let max = ln_bg.max(ln_sig);
            let marginal = max + ((ln_bg - max).exp() + (ln_sig - max).exp()).ln();
            *p = (ln_sig - marginal).exp();
            ll += marginal;
        }
        self.log_likelihood = ll;
        Ok(())
    }

    /// Weighted mean, variance and weight of each component.
    fn maximization(&mut self) -> Result<(), MixtureFitError> {
        let n = self.values.len() as f64;
        let signal_mass = self.posterior.sum();
        let background_mass = n - signal_mass;
        for mass in [signal_mass, background_mass] {
            if mass <= f64::EPSILON {
                return Err(MixtureFitError::DegenerateWeight { weight: mass / n });
            }
        }

        let mut sums = [0.0; 2];
        for (x, p) in self.values.iter().zip(&self.posterior) {
            sums[0] += (1.0 - p) * x;
            sums[1] += p * x;
        }
        let bg_mean = sums[0] / background_mass;
        let sig_mean = sums[1] / signal_mass;

        let mut squares = [0.0; 2];
        for (x, p) in self.values.iter().zip(&self.posterior) {
            squares[0] += (1.0 - p) * (x - bg_mean).powi(2);
            squares[1] += p * (x - sig_mean).powi(2);
        }

        // Never let a variance reach 0, the likelihood would run off to infinity.
        self.background = Component {
            mean: bg_mean,
            std_dev: (squares[0] / background_mass).sqrt().max(self.min_std_dev),
            weight: background_mass / n,
        };
        self.signal = Component {
            mean: sig_mean,
            std_dev: (squares[1] / signal_mass).sqrt().max(self.min_std_dev),
            weight: signal_mass / n,
        };
        Ok(())
    }

    fn run(&mut self, params: &GaussianTagMixture) -> Result<(), MixtureFitError> {
        self.expectation()?;
        let mut last_ll = self.log_likelihood;
        loop {
            self.maximization()?;
            self.expectation()?;
            self.iterations += 1;
            let abs_change = (self.log_likelihood - last_ll).abs();
            let rel_change = (1.0 - self.log_likelihood / last_ll).abs();
            if abs_change < params.abs_tol || rel_change < params.rel_tol {
                debug!(
                    "EM converged after {} iterations, LL = {}",
                    self.iterations, self.log_likelihood
                );
                return Ok(());
            }
            if self.iterations >= params.max_iterations {
                return Err(MixtureFitError::NotConverged {
                    iterations: self.iterations,
                });
            }
            last_ll = self.log_likelihood;
        }
    }

    fn signal_posterior(&self, x: f64) -> Result<f64, MixtureFitError> {
        let ln_bg = self.background.ln_weighted_pdf(x)?;
        let ln_sig = self.signal.ln_weighted_pdf(x)?;
        Ok(1.0 / (1.0 + (ln_bg - ln_sig).exp()))
    }

    fn finish(mut self, params: &GaussianTagMixture) -> Result<TagFit, MixtureFitError> {
        if self.signal.mean < self.background.mean {
            std::mem::swap(&mut self.signal, &mut self.background);
            self.posterior.mapv_inplace(|p| 1.0 - p);
        }

        let weight = self.signal.weight.min(self.background.weight);
        if weight < params.min_weight {
            return Err(MixtureFitError::DegenerateWeight { weight });
        }
        let pooled_sd =
            ((self.signal.std_dev.powi(2) + self.background.std_dev.powi(2)) / 2.0).sqrt();
        let separation = (self.signal.mean - self.background.mean) / pooled_sd;
        if separation < params.min_separation {
            return Err(MixtureFitError::NoSeparation {
                separation,
                minimum: params.min_separation,
            });
        }

        // Unequal variances let the wider component win far out in both tails;
        // keep the posterior monotone outside the two means.
        let at_background = self.signal_posterior(self.background.mean)?;
        let at_signal = self.signal_posterior(self.signal.mean)?;
        for (x, p) in self.values.iter().zip(self.posterior.iter_mut()) {
            if *x < self.background.mean {
                *p = p.min(at_background);
            } else if *x > self.signal.mean {
                *p = p.max(at_signal);
            }
        }

        Ok(TagFit {
            posterior: self.posterior,
            background: self.background,
            signal: self.signal,
            log_likelihood: self.log_likelihood,
            iterations: self.iterations,
        })
    }
}

fn masked_mean(values: &Array1<f64>, mask: &Array1<bool>, keep: bool) -> f64 {
    let (sum, n) = values
        .iter()
        .zip(mask)
        .filter(|(_, m)| **m == keep)
        .fold((0.0, 0usize), |acc, (x, _)| (acc.0 + x, acc.1 + 1));
    sum / n as f64
}
