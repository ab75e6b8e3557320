//! The per-cell dataset handed from stage to stage.

use crate::error::DemuxError;
use fxhash::{FxHashMap, FxHashSet};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Index of a sample group, the position of its hashtag in the HTO matrix.
pub type GroupIdx = usize;

const DOUBLET: &str = "doublet";
const NEGATIVE: &str = "negative";
const UNCERTAIN: &str = "uncertain";

/// Call made from the hashtag counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MixtureLabel {
    /// Tagged by exactly one sample group.
    Singlet(GroupIdx),
    /// Tagged by two or more sample groups.
    Doublet,
    /// No tag above background.
    Negative,
    /// No class reached the acceptance probability, or a hashtag could not be fit.
    Uncertain,
}

impl MixtureLabel {
    /// The sample group of a singlet.
    pub fn group(&self) -> Option<GroupIdx> {
        match self {
            MixtureLabel::Singlet(g) => Some(*g),
            _ => None,
        }
    }

    /// Display name, the sample group name for singlets.
    pub fn name<'a>(&self, groups: &'a [String]) -> &'a str {
        match self {
            MixtureLabel::Singlet(g) => groups[*g].as_str(),
            MixtureLabel::Doublet => DOUBLET,
            MixtureLabel::Negative => NEGATIVE,
            MixtureLabel::Uncertain => UNCERTAIN,
        }
    }
}

/// Call made by the SNP classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FinalLabel {
    /// Assigned to a sample group.
    Group(GroupIdx),
    /// Closest to synthetic doublets. Only produced with `DoubletPolicy::Predict`.
    Doublet,
}

impl FinalLabel {
    /// Display name, the sample group name for groups.
    pub fn name<'a>(&self, groups: &'a [String]) -> &'a str {
        match self {
            FinalLabel::Group(g) => groups[*g].as_str(),
            FinalLabel::Doublet => DOUBLET,
        }
    }
}

/// Result of the high-confidence labeler for one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtoCall {
    /// Discrete call.
    pub label: MixtureLabel,
    /// Probability of the candidate class. Absent when a hashtag could not be fit.
    pub acceptance_probability: Option<f64>,
    /// Signal posterior per hashtag, absent for hashtags whose fit was degenerate.
    pub posteriors: Vec<Option<f64>>,
    /// Whether the cell is used as ground truth for training.
    pub trusted: bool,
}

/// Where a cell stands in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    /// No hashtag call yet.
    Unclassified,
    /// Called, but not trusted for training.
    Untrusted,
    /// Called and trusted for training.
    Trusted,
    /// Labeled by the SNP classifier.
    Reassigned,
}

/// SNP read counts of the retained loci, one row per cell in dataset order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnpTable {
    snp_ids: Vec<String>,
    // cells x snps
    counts: Array2<u32>,
}

impl SnpTable {
    pub(crate) fn new(snp_ids: Vec<String>, counts: Array2<u32>) -> Self {
        debug_assert_eq!(snp_ids.len(), counts.ncols());
        SnpTable { snp_ids, counts }
    }

    /// Identifiers of the retained loci.
    pub fn snp_ids(&self) -> &[String] {
        &self.snp_ids
    }

    /// Number of retained loci.
    pub fn num_snps(&self) -> usize {
        self.snp_ids.len()
    }

    /// Cells x SNPs count matrix.
    pub fn counts(&self) -> &Array2<u32> {
        &self.counts
    }

    /// SNP profile of one cell.
    pub fn profile(&self, cell: usize) -> ArrayView1<'_, u32> {
        self.counts.row(cell)
    }
}

/// Cells with their hashtag counts, SNP counts and the calls made so far.
///
/// A `Dataset` is a value: every stage returns a new one carrying the added
/// annotation. The raw counts are shared between these values and are never
/// modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    barcodes: Arc<Vec<String>>,
    groups: Arc<Vec<String>>,
    // cells x hashtags
    hto: Arc<Array2<f64>>,
    snps: Option<Arc<SnpTable>>,
    hto_calls: Option<Arc<Vec<HtoCall>>>,
    final_calls: Option<Arc<Vec<Option<FinalLabel>>>>,
}

impl Dataset {
    /// Create a dataset from a cells x hashtags count matrix. Each hashtag
    /// identifies one sample group.
    pub fn new(
        barcodes: Vec<String>,
        groups: Vec<String>,
        hto: Array2<f64>,
    ) -> Result<Self, DemuxError> {
        if barcodes.is_empty() {
            return Err(DemuxError::EmptyDataset);
        }
        if groups.len() < 2 {
            return Err(DemuxError::TooFewGroups {
                found: groups.len(),
            });
        }
        let (rows, cols) = hto.dim();
        if rows != barcodes.len() {
            return Err(DemuxError::ShapeMismatch {
                what: "HTO matrix rows (cells)",
                expected: barcodes.len(),
                found: rows,
            });
        }
        if cols != groups.len() {
            return Err(DemuxError::ShapeMismatch {
                what: "HTO matrix columns (hashtags)",
                expected: groups.len(),
                found: cols,
            });
        }
        if let Some(dup) = first_duplicate(&barcodes) {
            return Err(DemuxError::DuplicateBarcode(dup));
        }
        if let Some(dup) = first_duplicate(&groups) {
            return Err(DemuxError::DuplicateGroup(dup));
        }
        for (row, barcode) in hto.outer_iter().zip(&barcodes) {
            if let Some(&value) = row.iter().find(|x| !x.is_finite() || **x < 0.0) {
                return Err(DemuxError::InvalidCount {
                    barcode: barcode.clone(),
                    value,
                });
            }
        }

        Ok(Dataset {
            barcodes: Arc::new(barcodes),
            groups: Arc::new(groups),
            hto: Arc::new(hto),
            snps: None,
            hto_calls: None,
            final_calls: None,
        })
    }

    /// Number of cells.
    pub fn num_cells(&self) -> usize {
        self.barcodes.len()
    }

    /// Number of sample groups.
    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Cell barcodes in dataset order.
    pub fn barcodes(&self) -> &[String] {
        &self.barcodes
    }

    /// Sample group names in hashtag order.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Cells x hashtags count matrix.
    pub fn hto_counts(&self) -> &Array2<f64> {
        &self.hto
    }

    /// The retained SNP counts, once integrated.
    pub fn snps(&self) -> Option<&SnpTable> {
        self.snps.as_deref()
    }

    /// Hashtag calls, once computed.
    pub fn hto_calls(&self) -> Option<&[HtoCall]> {
        self.hto_calls.as_deref().map(Vec::as_slice)
    }

    /// SNP classifier labels, once computed. Cells that were not predicted are `None`.
    pub fn final_calls(&self) -> Option<&[Option<FinalLabel>]> {
        self.final_calls.as_deref().map(Vec::as_slice)
    }

    /// Indices of the trusted cells, empty before the hashtag calls exist.
    pub fn trusted_cells(&self) -> Vec<usize> {
        self.hto_calls()
            .map(|calls| {
                calls
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.trusted)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pipeline state of one cell.
    pub fn cell_state(&self, cell: usize) -> CellState {
        if matches!(self.final_calls(), Some(calls) if calls[cell].is_some()) {
            return CellState::Reassigned;
        }
        match self.hto_calls() {
            None => CellState::Unclassified,
            Some(calls) if calls[cell].trusted => CellState::Trusted,
            Some(_) => CellState::Untrusted,
        }
    }

    /// Map barcodes to cell indices.
    pub fn cell_indices<S: AsRef<str>>(&self, barcodes: &[S]) -> Result<Vec<usize>, DemuxError> {
        let index = self.barcode_index();
        barcodes
            .iter()
            .map(|b| {
                index
                    .get(b.as_ref())
                    .copied()
                    .ok_or_else(|| DemuxError::BarcodeMismatch {
                        missing: 0,
                        unexpected: 1,
                        example: b.as_ref().to_string(),
                    })
            })
            .collect()
    }

    pub(crate) fn barcode_index(&self) -> FxHashMap<&str, usize> {
        self.barcodes
            .iter()
            .enumerate()
            .map(|(i, b)| (b.as_str(), i))
            .collect()
    }

    /// Replace the hashtag calls, e.g. with curated labels. Clears the SNP
    /// classifier labels, which were derived from the previous calls.
    pub fn with_hto_calls(&self, calls: Vec<HtoCall>) -> Result<Dataset, DemuxError> {
        if calls.len() != self.num_cells() {
            return Err(DemuxError::ShapeMismatch {
                what: "hashtag calls",
                expected: self.num_cells(),
                found: calls.len(),
            });
        }
        for (call, barcode) in calls.iter().zip(self.barcodes.iter()) {
            if call.posteriors.len() != self.num_groups() {
                return Err(DemuxError::ShapeMismatch {
                    what: "hashtag posteriors",
                    expected: self.num_groups(),
                    found: call.posteriors.len(),
                });
            }
            match call.label {
                MixtureLabel::Singlet(g) if g >= self.num_groups() => {
                    return Err(DemuxError::invalid(
                        "mixture label",
                        g,
                        "sample group index out of range",
                    ));
                }
                MixtureLabel::Singlet(_) => {}
                label if call.trusted => {
                    return Err(DemuxError::UntrainableCell {
                        barcode: barcode.clone(),
                        label: label.name(&self.groups).to_string(),
                    });
                }
                _ => {}
            }
        }
        Ok(Dataset {
            hto_calls: Some(Arc::new(calls)),
            final_calls: None,
            ..self.clone()
        })
    }

    /// Replace the SNP counts. Clears the SNP classifier labels, which were
    /// derived from the previous counts.
    pub(crate) fn with_snps(&self, snps: SnpTable) -> Dataset {
        Dataset {
            snps: Some(Arc::new(snps)),
            final_calls: None,
            ..self.clone()
        }
    }

    pub(crate) fn with_final_calls(&self, calls: Vec<Option<FinalLabel>>) -> Dataset {
        debug_assert_eq!(calls.len(), self.num_cells());
        Dataset {
            final_calls: Some(Arc::new(calls)),
            ..self.clone()
        }
    }
}

fn first_duplicate(names: &[String]) -> Option<String> {
    let mut seen = FxHashSet::default();
    names
        .iter()
        .find(|name| !seen.insert(name.as_str()))
        .cloned()
}
