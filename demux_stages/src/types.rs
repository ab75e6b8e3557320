//! Martian file types and enums shared by the stages.

use martian_derive::{martian_filetype, MartianType};
use martian_filetypes::bin_file::BincodeFile;
use martian_filetypes::json_file::JsonFile;
use martian_filetypes::tabular_file::CsvFile;
use serde::{Deserialize, Serialize};
use snp_demux::{Dataset, DemuxSummary, DoubletPolicy, Normalization};

use crate::io::CellCallRow;

martian_filetype!(Mtx, "mtx");
martian_filetype!(TsvFile, "tsv");

/// Dataset handed from one stage to the next.
pub type DatasetFile = BincodeFile<Dataset>;
/// Per-cell calls.
pub type CellCallsCsv = CsvFile<CellCallRow>;
/// Run summary.
pub type SummaryJson = JsonFile<DemuxSummary>;

/// Transformation applied to SNP counts before distances are taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, MartianType)]
#[serde(rename_all = "snake_case")]
pub enum SnpNormalization {
    /// Raw counts.
    Raw,
    /// `ln(1 + count)`.
    Log1p,
}

impl From<SnpNormalization> for Normalization {
    fn from(value: SnpNormalization) -> Self {
        match value {
            SnpNormalization::Raw => Normalization::Raw,
            SnpNormalization::Log1p => Normalization::Log1p,
        }
    }
}

/// Whether synthetic doublets are a reachable prediction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, MartianType)]
#[serde(rename_all = "snake_case")]
pub enum DoubletHandling {
    /// Doublets only shape the neighborhoods.
    Spoiler,
    /// Doublet can be predicted.
    Predict,
}

impl From<DoubletHandling> for DoubletPolicy {
    fn from(value: DoubletHandling) -> Self {
        match value {
            DoubletHandling::Spoiler => DoubletPolicy::Spoiler,
            DoubletHandling::Predict => DoubletPolicy::Predict,
        }
    }
}
