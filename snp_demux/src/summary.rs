//! Run summary metrics.

use crate::dataset::{Dataset, FinalLabel};
use itertools::Itertools;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counts describing the calls made on a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemuxSummary {
    /// Number of cells.
    pub cells: usize,
    /// Cells trusted for training.
    pub trusted_cells: usize,
    /// Cells per hashtag call.
    pub mixture_labels: BTreeMap<String, usize>,
    /// Cells per SNP classifier label.
    pub final_labels: BTreeMap<String, usize>,
    /// Cells the hashtags could not call with confidence that received a
    /// SNP classifier label.
    pub reassigned_untrusted: usize,
    /// Among trusted cells that were also predicted, the fraction whose
    /// final label matches the hashtag call.
    pub trusted_agreement: Option<f64>,
}

impl DemuxSummary {
    /// Compute the summary of whatever stages have run on `dataset`.
    pub fn new(dataset: &Dataset) -> Self {
        let groups = dataset.groups();
        let hto_calls = dataset.hto_calls().unwrap_or_default();
        let final_calls = dataset.final_calls().unwrap_or_default();

        let mixture_labels = hto_calls
            .iter()
            .map(|c| c.label.name(groups).to_string())
            .counts()
            .into_iter()
            .collect();
        let final_labels = final_calls
            .iter()
            .flatten()
            .map(|l| l.name(groups).to_string())
            .counts()
            .into_iter()
            .collect();

        let mut reassigned_untrusted = 0;
        let mut trusted_predicted = 0;
        let mut trusted_agree = 0;
        for (call, label) in hto_calls.iter().zip(final_calls) {
            let Some(label) = label else { continue };
            if call.trusted {
                trusted_predicted += 1;
                if call.label.group().map(FinalLabel::Group) == Some(*label) {
                    trusted_agree += 1;
                }
            } else {
                reassigned_untrusted += 1;
            }
        }

        DemuxSummary {
            cells: dataset.num_cells(),
            trusted_cells: hto_calls.iter().filter(|c| c.trusted).count(),
            mixture_labels,
            final_labels,
            reassigned_untrusted,
            trusted_agreement: (trusted_predicted > 0)
                .then(|| trusted_agree as f64 / trusted_predicted as f64),
        }
    }

    /// Log the summary at info level.
    pub fn log(&self) {
        let fmt = |m: &BTreeMap<String, usize>| {
            m.iter().map(|(label, n)| format!("{label}={n}")).join(", ")
        };
        info!(
            "{} cells, {} trusted; hashtag calls: {}",
            self.cells,
            self.trusted_cells,
            fmt(&self.mixture_labels)
        );
        info!(
            "final labels: {}; {} untrusted cells reassigned",
            fmt(&self.final_labels),
            self.reassigned_untrusted
        );
        if let Some(agreement) = self.trusted_agreement {
            info!("final labels agree with {:.2}% of trusted calls", 100.0 * agreement);
        }
    }
}
