//! High-confidence calls from hashtag counts.
//!
//! Each hashtag is split into background and signal by a `TagMixtureModel`.
//! The per-hashtag signal posteriors are then combined, assuming the tags are
//! independent, into the probability of each class a cell can belong to:
//!
//! - negative: `prod_g (1 - p_g)`
//! - singlet of `g`: `p_g` by default, or `p_g * prod_{h != g} (1 - p_h)`
//!   with [`SingletAcceptance::Joint`]
//! - doublet: whatever joint probability no negative or singlet takes
//!
//! The candidate class comes from counting the hashtags whose posterior
//! reaches the detection threshold. A candidate whose class probability is
//! below the acceptance probability becomes `Uncertain`. Accepted singlets
//! are the trusted training cells.

use crate::config::{HighConfParams, SingletAcceptance};
use crate::dataset::{Dataset, GroupIdx, HtoCall, MixtureLabel};
use crate::error::DemuxError;
use hto_mixture::TagMixtureModel;
use itertools::Itertools;
use log::{info, warn};
use ndarray::Array1;
use rayon::prelude::*;

/// Call every cell from its hashtag counts.
///
/// Hashtags whose fit fails are not fatal: cells whose call depends on them
/// are labeled `Uncertain`. Any previous SNP classifier labels are dropped.
pub fn high_conf_calls<M>(
    dataset: &Dataset,
    model: &M,
    params: &HighConfParams,
) -> Result<Dataset, DemuxError>
where
    M: TagMixtureModel + ?Sized,
{
    params.validate()?;
    let hto = dataset.hto_counts();
    let groups = dataset.groups();

    let posteriors: Vec<Option<Array1<f64>>> = (0..dataset.num_groups())
        .into_par_iter()
        .map(|tag| match model.fit(hto.column(tag)) {
            Ok(fit) => {
                info!(
                    "hashtag {}: signal weight {:.3}, signal to noise {:.2}",
                    groups[tag],
                    fit.signal.weight,
                    fit.signal_to_noise()
                );
                Some(fit.posterior)
            }
            Err(err) => {
                warn!(
                    "hashtag {}: {err}; cells depending on it are called uncertain",
                    groups[tag]
                );
                None
            }
        })
        .collect();
    for p in posteriors.iter().flatten() {
        if p.len() != dataset.num_cells() {
            return Err(DemuxError::ShapeMismatch {
                what: "mixture posteriors",
                expected: dataset.num_cells(),
                found: p.len(),
            });
        }
    }

    let calls: Vec<HtoCall> = (0..dataset.num_cells())
        .map(|cell| {
            let cell_posteriors = posteriors
                .iter()
                .map(|p| p.as_ref().map(|p| p[cell]))
                .collect();
            classify_cell(cell_posteriors, params)
        })
        .collect();

    let counts = calls.iter().counts_by(|c| c.label.name(groups).to_string());
    info!(
        "hashtag calls: {}",
        counts
            .iter()
            .sorted()
            .map(|(label, n)| format!("{label}={n}"))
            .join(", ")
    );
    info!(
        "{} of {} cells trusted for training",
        calls.iter().filter(|c| c.trusted).count(),
        calls.len()
    );
    dataset.with_hto_calls(calls)
}

/// Call one cell from its per-hashtag signal posteriors. `None` marks a
/// hashtag that could not be fit.
pub fn classify_cell(posteriors: Vec<Option<f64>>, params: &HighConfParams) -> HtoCall {
    let fitted: Vec<(GroupIdx, f64)> = posteriors
        .iter()
        .enumerate()
        .filter_map(|(g, p)| p.map(|p| (g, p.clamp(0.0, 1.0))))
        .collect();
    let complete = fitted.len() == posteriors.len();
    let positives: Vec<GroupIdx> = fitted
        .iter()
        .filter(|(_, p)| *p >= params.detection_threshold)
        .map(|(g, _)| *g)
        .collect();

    let p_joint_singlet = |g: GroupIdx| -> f64 {
        fitted
            .iter()
            .map(|&(h, p)| if h == g { p } else { 1.0 - p })
            .product()
    };
    let p_negative: f64 = fitted.iter().map(|(_, p)| 1.0 - p).product();

    let (candidate, probability) = match positives.as_slice() {
        [] => (MixtureLabel::Negative, p_negative),
        // the only detected tag also has the highest posterior
        [g] => {
            let p = match params.singlet_acceptance {
                SingletAcceptance::SignalPosterior => fitted
                    .iter()
                    .find(|&&(h, _)| h == *g)
                    .map_or(0.0, |&(_, p)| p),
                SingletAcceptance::Joint => p_joint_singlet(*g),
            };
            (MixtureLabel::Singlet(*g), p)
        }
        _ => {
            let p_singlets: f64 = fitted.iter().map(|&(g, _)| p_joint_singlet(g)).sum();
            (
                MixtureLabel::Doublet,
                (1.0 - p_negative - p_singlets).max(0.0),
            )
        }
    };

    // An unfit hashtag could turn a negative into a singlet or a singlet into
    // a doublet. Two detected tags stay a doublet whatever it shows.
    if !complete && candidate != MixtureLabel::Doublet {
        return HtoCall {
            label: MixtureLabel::Uncertain,
            acceptance_probability: None,
            posteriors,
            trusted: false,
        };
    }

    let label = if probability >= params.acceptance_probability {
        candidate
    } else {
        MixtureLabel::Uncertain
    };
    HtoCall {
        label,
        acceptance_probability: Some(probability),
        posteriors,
        trusted: matches!(label, MixtureLabel::Singlet(_)),
    }
}
