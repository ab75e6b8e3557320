//! Martian stage HIGH_CONF_CALLS
//! Call every cell from its hashtag counts and flag the trusted singlets.

use crate::io::read_hto_csv;
use crate::types::{DatasetFile, SummaryJson};
use anyhow::Result;
use martian::prelude::*;
use martian_derive::{make_mro, MartianStruct};
use martian_filetypes::tabular_file::CsvFile;
use martian_filetypes::FileTypeWrite;
use serde::{Deserialize, Serialize};
use snp_demux::{high_conf_calls, DemuxSummary, GaussianTagMixture, HighConfParams};

/// The Martian stage inputs.
#[derive(Clone, Serialize, Deserialize, MartianStruct)]
pub struct HighConfCallsStageInputs {
    /// Hashtag counts, a `barcode` column then one column per hashtag.
    pub hto_counts: CsvFile<()>,
    /// Probability a call must reach to be accepted.
    pub acceptance_probability: Option<f64>,
    /// Signal posterior above which a hashtag counts as detected.
    pub detection_threshold: Option<f64>,
}

/// The Martian stage outputs.
#[derive(Clone, Serialize, Deserialize, MartianStruct)]
pub struct HighConfCallsStageOutputs {
    /// The dataset with its hashtag calls.
    pub dataset: DatasetFile,
    /// Counts of the hashtag calls.
    pub summary: SummaryJson,
}

/// Martian stage HIGH_CONF_CALLS
pub struct HighConfCalls;

#[make_mro(mem_gb = 4, threads = 4, volatile = strict)]
impl MartianMain for HighConfCalls {
    type StageInputs = HighConfCallsStageInputs;
    type StageOutputs = HighConfCallsStageOutputs;

    fn main(&self, args: Self::StageInputs, rover: MartianRover) -> Result<Self::StageOutputs> {
        let defaults = HighConfParams::default();
        let params = HighConfParams {
            acceptance_probability: args
                .acceptance_probability
                .unwrap_or(defaults.acceptance_probability),
            detection_threshold: args
                .detection_threshold
                .unwrap_or(defaults.detection_threshold),
            ..defaults
        };
        params.validate()?;

        let dataset = read_hto_csv(args.hto_counts.as_ref())?;
        let dataset = high_conf_calls(&dataset, &GaussianTagMixture::default(), &params)?;

        let summary = DemuxSummary::new(&dataset);
        summary.log();
        let summary_file: SummaryJson = rover.make_path("summary");
        summary_file.write(&summary)?;
        let dataset_file: DatasetFile = rover.make_path("dataset");
        dataset_file.write(&dataset)?;
        Ok(HighConfCallsStageOutputs {
            dataset: dataset_file,
            summary: summary_file,
        })
    }
}
