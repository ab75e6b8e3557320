//! Tunable parameters of the three demultiplexing stages.

use crate::error::DemuxError;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Default probability a hashtag call must reach to be accepted.
pub const DEFAULT_ACCEPTANCE_PROBABILITY: f64 = 0.95;
/// Default signal posterior above which a hashtag counts as detected.
pub const DEFAULT_DETECTION_THRESHOLD: f64 = 0.5;
/// Default fraction of cells that must have reads at a retained SNP.
pub const DEFAULT_MIN_CELL_FRACTION: f64 = 0.95;
/// Default number of neighbors voting on a cell.
pub const DEFAULT_K: usize = 5;

fn check_probability(name: &'static str, value: f64) -> Result<(), DemuxError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(DemuxError::invalid(name, value, "must lie in [0, 1]"))
    }
}

/// Parameters of the high-confidence labeler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HighConfParams {
    /// A call is accepted when the probability of its class reaches this value.
    pub acceptance_probability: f64,
    /// A hashtag is detected in a cell when its signal posterior reaches this value.
    pub detection_threshold: f64,
    /// Probability a singlet call is accepted on.
    pub singlet_acceptance: SingletAcceptance,
}

impl Default for HighConfParams {
    fn default() -> Self {
        HighConfParams {
            acceptance_probability: DEFAULT_ACCEPTANCE_PROBABILITY,
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            singlet_acceptance: SingletAcceptance::SignalPosterior,
        }
    }
}

impl HighConfParams {
    /// Reject out of range thresholds.
    pub fn validate(&self) -> Result<(), DemuxError> {
        check_probability("acceptance_probability", self.acceptance_probability)?;
        check_probability("detection_threshold", self.detection_threshold)
    }
}

/// Probability compared against the acceptance threshold for a singlet of group `g`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SingletAcceptance {
    /// The signal posterior of `g` alone.
    #[default]
    SignalPosterior,
    /// `p_g` times the background posterior of every other hashtag.
    Joint,
}

/// Parameters of the SNP integrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnpFilterParams {
    /// Keep a SNP when at least this fraction of cells has a read there.
    pub min_cell_fraction: f64,
}

impl Default for SnpFilterParams {
    fn default() -> Self {
        SnpFilterParams {
            min_cell_fraction: DEFAULT_MIN_CELL_FRACTION,
        }
    }
}

impl SnpFilterParams {
    /// Reject an out of range fraction.
    pub fn validate(&self) -> Result<(), DemuxError> {
        check_probability("min_cell_fraction", self.min_cell_fraction)
    }
}

/// How SNP count vectors are transformed before distances are taken.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Normalization {
    /// Euclidean distance on the raw counts.
    #[default]
    Raw,
    /// Euclidean distance on `ln(1 + count)`.
    #[serde(rename = "log1p")]
    #[strum(serialize = "log1p")]
    Log1p,
}

impl Normalization {
    /// Transform one count.
    pub fn apply(self, count: u32) -> f64 {
        match self {
            Normalization::Raw => f64::from(count),
            Normalization::Log1p => f64::from(count).ln_1p(),
        }
    }
}

/// Whether synthetic doublets can be predicted or only shape the neighborhoods.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DoubletPolicy {
    /// Doublet profiles occupy neighbor slots but every prediction is a sample group.
    #[default]
    Spoiler,
    /// Doublet is a class like any other and can be predicted.
    Predict,
}

/// Number of synthetic doublets generated for each pair of sample groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoubletCount {
    /// Enough doublets in total to match the mean size of a singlet class.
    #[default]
    Auto,
    /// A fixed number per pair.
    PerPair(usize),
}

impl DoubletCount {
    /// Resolve to a per pair count given the training class sizes and number of pairs.
    pub fn per_pair(self, class_sizes: &[usize], num_pairs: usize) -> usize {
        match self {
            DoubletCount::PerPair(n) => n,
            DoubletCount::Auto => {
                if class_sizes.is_empty() || num_pairs == 0 {
                    return 0;
                }
                let mean = class_sizes.iter().sum::<usize>() as f64 / class_sizes.len() as f64;
                ((mean / num_pairs as f64).ceil() as usize).max(1)
            }
        }
    }
}

/// Parameters of the SNP reassignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReassignParams {
    /// Number of neighbors voting on each cell.
    pub k: usize,
    /// Synthetic doublets per pair of sample groups.
    pub doublets: DoubletCount,
    /// Seed of the doublet sampler, the only source of randomness.
    pub seed: u64,
    /// Transformation applied to SNP counts before distances are taken.
    pub normalization: Normalization,
    /// Whether doublet is a reachable prediction.
    pub doublet_policy: DoubletPolicy,
    /// Cells to train on, the trusted cells when absent.
    #[serde(skip)]
    pub train_cells: Option<Vec<usize>>,
    /// Cells to label, all cells when absent.
    #[serde(skip)]
    pub predict_cells: Option<Vec<usize>>,
}

impl Default for ReassignParams {
    fn default() -> Self {
        ReassignParams {
            k: DEFAULT_K,
            doublets: DoubletCount::Auto,
            seed: 0,
            normalization: Normalization::Raw,
            doublet_policy: DoubletPolicy::Spoiler,
            train_cells: None,
            predict_cells: None,
        }
    }
}

impl ReassignParams {
    /// Checks that need no data. `k` against the training set size is checked
    /// once the training set is assembled.
    pub fn validate(&self) -> Result<(), DemuxError> {
        if self.k == 0 {
            return Err(DemuxError::invalid("k", self.k, "must be at least 1"));
        }
        if self.doublets == DoubletCount::PerPair(0) {
            return Err(DemuxError::invalid(
                "doublets.per_pair",
                0,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Parameters of a full run, as read from a parameters file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemuxParams {
    /// High-confidence labeler.
    pub high_conf: HighConfParams,
    /// SNP integrator.
    pub snp_filter: SnpFilterParams,
    /// Reassignment.
    pub reassign: ReassignParams,
}

impl DemuxParams {
    /// Validate all sections.
    pub fn validate(&self) -> Result<(), DemuxError> {
        self.high_conf.validate()?;
        self.snp_filter.validate()?;
        self.reassign.validate()
    }
}
