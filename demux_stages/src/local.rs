//! Run the three stages back to back on local files, without Martian.

use crate::io::{cell_call_rows, read_hto_csv, read_snp_matrix};
use crate::types::{CellCallsCsv, SummaryJson};
use anyhow::{Context, Result};
use log::info;
use martian::MartianFileType;
use martian_filetypes::FileTypeWrite;
use snp_demux::{add_snps, high_conf_calls, reassign, DemuxParams, DemuxSummary, GaussianTagMixture};
use std::path::{Path, PathBuf};

/// Input files of a local run.
#[derive(Debug, Clone)]
pub struct LocalInputs {
    /// Hashtag counts CSV.
    pub hto: PathBuf,
    /// SNPs x cells Matrix Market file.
    pub snp_matrix: PathBuf,
    /// Matrix column barcodes.
    pub snp_barcodes: PathBuf,
    /// Matrix row SNP ids.
    pub snp_ids: PathBuf,
}

/// Label every cell and write `cell_calls.csv` and `summary.json` to `out_dir`.
pub fn run_local(
    inputs: &LocalInputs,
    params: &DemuxParams,
    out_dir: &Path,
) -> Result<DemuxSummary> {
    params.validate()?;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let dataset = read_hto_csv(&inputs.hto)?;
    info!(
        "loaded {} cells and {} hashtags",
        dataset.num_cells(),
        dataset.num_groups()
    );
    let dataset = high_conf_calls(&dataset, &GaussianTagMixture::default(), &params.high_conf)?;

    let matrix = read_snp_matrix(&inputs.snp_matrix, &inputs.snp_barcodes, &inputs.snp_ids)?;
    let dataset = add_snps(&dataset, &matrix, &params.snp_filter)?;
    let dataset = reassign(&dataset, &params.reassign)?;

    let cell_calls = CellCallsCsv::new(out_dir, "cell_calls");
    cell_calls
        .write(&cell_call_rows(&dataset)?)
        .with_context(|| format!("failed to write {}", cell_calls.as_ref().display()))?;
    let summary = DemuxSummary::new(&dataset);
    summary.log();
    let summary_file = SummaryJson::new(out_dir, "summary");
    summary_file
        .write(&summary)
        .with_context(|| format!("failed to write {}", summary_file.as_ref().display()))?;
    Ok(summary)
}
