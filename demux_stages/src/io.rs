//! Reading the stage inputs and writing the per-cell calls.

use anyhow::{bail, ensure, Context, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use snp_demux::{Dataset, SnpMatrix};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const BARCODE_HEADER: &str = "barcode";

/// Load hashtag counts from a CSV with a `barcode` column followed by one
/// column per hashtag. The hashtag names become the sample group names.
pub fn read_hto_csv(path: &Path) -> Result<Dataset> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open HTO counts {}", path.display()))?;
    let mut headers = reader.headers()?.clone();
    headers.trim();
    ensure!(
        headers.get(0) == Some(BARCODE_HEADER),
        "{}: first column must be '{BARCODE_HEADER}'",
        path.display()
    );
    let groups: Vec<String> = headers.iter().skip(1).map(String::from).collect();

    let mut barcodes = Vec::new();
    let mut values = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let mut record =
            record.with_context(|| format!("{}: malformed row {}", path.display(), line + 2))?;
        record.trim();
        barcodes.push(record[0].to_string());
        for field in record.iter().skip(1) {
            let value: f64 = field.parse().with_context(|| {
                format!(
                    "{}: row {}: '{field}' is not a count",
                    path.display(),
                    line + 2
                )
            })?;
            values.push(value);
        }
    }
    let hto = Array2::from_shape_vec((barcodes.len(), groups.len()), values)?;
    Ok(Dataset::new(barcodes, groups, hto)
        .with_context(|| format!("invalid HTO counts in {}", path.display()))?)
}

/// Non-empty lines of a text file, such as a barcodes or SNP id list.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| path.display().to_string())?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    Ok(lines)
}

/// Load a SNPs x cells Matrix Market file with its row and column names.
pub fn read_snp_matrix(mtx: &Path, barcodes: &Path, snp_ids: &Path) -> Result<SnpMatrix> {
    let barcodes = read_lines(barcodes)?;
    let snp_ids = read_lines(snp_ids)?;
    let triplets = sprs::io::read_matrix_market::<f64, usize, _>(mtx)
        .with_context(|| format!("failed to read SNP matrix {}", mtx.display()))?;
    let (rows, cols) = triplets.shape();
    ensure!(
        rows == snp_ids.len() && cols == barcodes.len(),
        "{}: matrix is {rows} x {cols} but there are {} SNP ids and {} barcodes",
        mtx.display(),
        snp_ids.len(),
        barcodes.len()
    );

    let mut counts = Array2::<u32>::zeros((rows, cols));
    for (&value, (row, col)) in triplets.triplet_iter() {
        if value < 0.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
            bail!(
                "{}: entry ({}, {}) = {value} is not a read count",
                mtx.display(),
                row + 1,
                col + 1
            );
        }
        // coordinate files may repeat an entry; repeats add up
        counts[[row, col]] = counts[[row, col]].saturating_add(value as u32);
    }
    Ok(SnpMatrix::new(snp_ids, barcodes, counts)?)
}

/// One row of the cell calls CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellCallRow {
    /// Cell barcode.
    pub barcode: String,
    /// Trusted for training.
    pub train: bool,
    /// Hashtag call.
    pub labels: String,
    /// Probability of the hashtag call, empty when a hashtag could not be fit.
    pub acceptance_probability: Option<f64>,
    /// SNP classifier label, empty for cells that were not predicted.
    pub knn: Option<String>,
}

/// The calls of every cell, in dataset order.
pub fn cell_call_rows(dataset: &Dataset) -> Result<Vec<CellCallRow>> {
    let Some(calls) = dataset.hto_calls() else {
        bail!("the dataset has no hashtag calls");
    };
    let groups = dataset.groups();
    let final_calls = dataset.final_calls();
    Ok(dataset
        .barcodes()
        .iter()
        .zip(calls)
        .enumerate()
        .map(|(cell, (barcode, call))| CellCallRow {
            barcode: barcode.clone(),
            train: call.trusted,
            labels: call.label.name(groups).to_string(),
            acceptance_probability: call.acceptance_probability,
            knn: final_calls
                .and_then(|f| f[cell])
                .map(|label| label.name(groups).to_string()),
        })
        .collect())
}
