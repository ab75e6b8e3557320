use std::fmt::Display;

/// Failures of the demultiplexing stages.
///
/// Recoverable conditions (a hashtag without bimodal structure, a sample
/// group without trusted cells) are recorded in the data instead and never
/// surface here. Every variant aborts the call that raised it and leaves the
/// input dataset untouched.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DemuxError {
    /// Two inputs disagree on a dimension.
    #[error("{what}: expected {expected}, found {found}")]
    ShapeMismatch {
        /// Which dimension disagrees.
        what: &'static str,
        /// Size implied by the dataset.
        expected: usize,
        /// Size that was supplied.
        found: usize,
    },
    /// The dataset has no cells.
    #[error("the dataset has no cells")]
    EmptyDataset,
    /// Demultiplexing needs at least two sample groups.
    #[error("at least two sample groups are required, found {found}")]
    TooFewGroups {
        /// Number of groups supplied.
        found: usize,
    },
    /// A barcode occurs more than once.
    #[error("barcode {0} occurs more than once")]
    DuplicateBarcode(String),
    /// A sample group name occurs more than once.
    #[error("sample group {0} occurs more than once")]
    DuplicateGroup(String),
    /// A count is negative or not finite.
    #[error("invalid count {value} for cell {barcode}, counts must be finite and non-negative")]
    InvalidCount {
        /// The cell carrying the count.
        barcode: String,
        /// The offending value.
        value: f64,
    },
    /// The cells of an incoming matrix are not the cells of the dataset.
    #[error(
        "cell barcodes do not match the dataset: {missing} dataset cells are missing and \
         {unexpected} cells are unknown (e.g. {example})"
    )]
    BarcodeMismatch {
        /// Dataset cells absent from the incoming matrix.
        missing: usize,
        /// Incoming cells absent from the dataset.
        unexpected: usize,
        /// One offending barcode.
        example: String,
    },
    /// A configuration value is out of range.
    #[error("invalid value {value} for {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Rendered value.
        value: String,
        /// What the value must satisfy.
        reason: &'static str,
    },
    /// A stage ran before the stage it depends on.
    #[error("{0} must be computed first")]
    MissingStage(&'static str),
    /// A cell index is outside the dataset.
    #[error("cell index {cell} is out of range for {num_cells} cells")]
    CellOutOfRange {
        /// The index.
        cell: usize,
        /// Number of cells in the dataset.
        num_cells: usize,
    },
    /// A training cell has no singlet label to learn from.
    #[error("cell {barcode} cannot be used for training, its mixture label is {label}")]
    UntrainableCell {
        /// The cell.
        barcode: String,
        /// Its current mixture label.
        label: String,
    },
    /// No SNP locus survived filtering.
    #[error("no SNP loci are available for classification")]
    NoSnpFeatures,
    /// The classifier would be trained on fewer than two classes.
    #[error("the training set has {found} distinct class(es), at least two are required")]
    TooFewClasses {
        /// Number of distinct classes.
        found: usize,
    },
    /// There are not more training profiles than neighbors.
    #[error("k = {k} must be smaller than the training set size {training_size}")]
    KTooLarge {
        /// Requested neighbor count.
        k: usize,
        /// Number of training profiles.
        training_size: usize,
    },
}

impl DemuxError {
    pub(crate) fn invalid(name: &'static str, value: impl Display, reason: &'static str) -> Self {
        DemuxError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }
}
