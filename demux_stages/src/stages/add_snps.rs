//! Martian stage ADD_SNPS
//! Attach the per-cell SNP read counts, keeping loci covered in most cells.

use crate::io::read_snp_matrix;
use crate::types::{DatasetFile, Mtx, TsvFile};
use anyhow::Result;
use martian::prelude::*;
use martian_derive::{make_mro, MartianStruct};
use martian_filetypes::{FileTypeRead, FileTypeWrite};
use serde::{Deserialize, Serialize};
use snp_demux::{add_snps, SnpFilterParams};

/// The Martian stage inputs.
#[derive(Clone, Serialize, Deserialize, MartianStruct)]
pub struct AddSnpsStageInputs {
    /// Dataset with its hashtag calls.
    pub dataset: DatasetFile,
    /// SNPs x cells read counts.
    pub snp_matrix: Mtx,
    /// Barcodes of the matrix columns, one per line.
    pub snp_barcodes: TsvFile,
    /// Identifiers of the matrix rows, one per line.
    pub snp_ids: TsvFile,
    /// Keep a locus when at least this fraction of cells has a read there.
    pub min_cell_fraction: Option<f64>,
}

/// The Martian stage outputs.
#[derive(Clone, Serialize, Deserialize, MartianStruct)]
pub struct AddSnpsStageOutputs {
    /// The dataset with its SNP counts.
    pub dataset: DatasetFile,
}

/// Martian stage ADD_SNPS
pub struct AddSnps;

#[make_mro(mem_gb = 8, volatile = strict)]
impl MartianMain for AddSnps {
    type StageInputs = AddSnpsStageInputs;
    type StageOutputs = AddSnpsStageOutputs;

    fn main(&self, args: Self::StageInputs, rover: MartianRover) -> Result<Self::StageOutputs> {
        let params = SnpFilterParams {
            min_cell_fraction: args
                .min_cell_fraction
                .unwrap_or(SnpFilterParams::default().min_cell_fraction),
        };
        params.validate()?;

        let dataset = args.dataset.read()?;
        let matrix = read_snp_matrix(
            args.snp_matrix.as_ref(),
            args.snp_barcodes.as_ref(),
            args.snp_ids.as_ref(),
        )?;
        let dataset = add_snps(&dataset, &matrix, &params)?;

        let dataset_file: DatasetFile = rover.make_path("dataset");
        dataset_file.write(&dataset)?;
        Ok(AddSnpsStageOutputs {
            dataset: dataset_file,
        })
    }
}
