//! Supervised demultiplexing of pooled single-cell data.
//!
//! Hashtag (HTO) counts give a noisy label for each cell. The cells labeled
//! with confidence become training data for a nearest-neighbor classifier
//! over SNP read counts, which then labels every cell:
//!
//! 1. [`high_conf_calls`] fits a two-component mixture per hashtag and
//!    marks confidently called singlets as trusted.
//! 2. [`add_snps`] attaches a SNPs x cells count matrix, dropping loci seen
//!    in too few cells.
//! 3. [`reassign`] trains on the trusted cells plus synthetic doublets and
//!    labels the requested cells.
//!
//! Each stage takes a [`Dataset`] and returns a new one.
#![deny(missing_docs)]

pub mod config;
pub mod dataset;
pub mod doublets;
mod error;
pub mod high_conf;
pub mod knn;
pub mod reassign;
pub mod snp_matrix;
pub mod summary;

#[cfg(test)]
mod test_pipeline;

pub use config::{
    DemuxParams, DoubletCount, DoubletPolicy, HighConfParams, Normalization, ReassignParams,
    SingletAcceptance, SnpFilterParams,
};
pub use dataset::{CellState, Dataset, FinalLabel, GroupIdx, HtoCall, MixtureLabel, SnpTable};
pub use error::DemuxError;
pub use high_conf::high_conf_calls;
pub use hto_mixture::{GaussianTagMixture, MixtureFitError, TagFit, TagMixtureModel};
pub use reassign::reassign;
pub use snp_matrix::{add_snps, SnpMatrix};
pub use summary::DemuxSummary;
