//! Merging an externally computed SNP count matrix into the dataset.

use crate::config::SnpFilterParams;
use crate::dataset::{Dataset, SnpTable};
use crate::error::DemuxError;
use fxhash::FxHashMap;
use log::info;
use ndarray::{Array2, ArrayView1};

/// SNP read counts as produced by the genotyping tool: one row per SNP
/// locus, one column per cell barcode.
#[derive(Debug, Clone, PartialEq)]
pub struct SnpMatrix {
    snp_ids: Vec<String>,
    barcodes: Vec<String>,
    // snps x cells
    counts: Array2<u32>,
}

impl SnpMatrix {
    /// Wrap a SNPs x cells matrix with its row and column names.
    pub fn new(
        snp_ids: Vec<String>,
        barcodes: Vec<String>,
        counts: Array2<u32>,
    ) -> Result<Self, DemuxError> {
        let (rows, cols) = counts.dim();
        if rows != snp_ids.len() {
            return Err(DemuxError::ShapeMismatch {
                what: "SNP matrix rows (loci)",
                expected: snp_ids.len(),
                found: rows,
            });
        }
        if cols != barcodes.len() {
            return Err(DemuxError::ShapeMismatch {
                what: "SNP matrix columns (cells)",
                expected: barcodes.len(),
                found: cols,
            });
        }
        let mut seen = FxHashMap::default();
        for (i, barcode) in barcodes.iter().enumerate() {
            if seen.insert(barcode.as_str(), i).is_some() {
                return Err(DemuxError::DuplicateBarcode(barcode.clone()));
            }
        }
        Ok(SnpMatrix {
            snp_ids,
            barcodes,
            counts,
        })
    }

    /// Locus identifiers, one per row.
    pub fn snp_ids(&self) -> &[String] {
        &self.snp_ids
    }

    /// Cell barcodes, one per column.
    pub fn barcodes(&self) -> &[String] {
        &self.barcodes
    }

    /// SNPs x cells counts.
    pub fn counts(&self) -> &Array2<u32> {
        &self.counts
    }
}

/// Fraction of cells with at least one read at a locus.
pub fn nonzero_fraction(row: ArrayView1<'_, u32>) -> f64 {
    if row.is_empty() {
        return 0.0;
    }
    row.iter().filter(|&&c| c > 0).count() as f64 / row.len() as f64
}

/// Attach the SNP counts to the dataset, keeping only loci with reads in at
/// least `min_cell_fraction` of the cells.
///
/// Cells are matched by barcode. The matrix may list them in any order, but
/// it must hold exactly the cells of the dataset.
pub fn add_snps(
    dataset: &Dataset,
    matrix: &SnpMatrix,
    params: &SnpFilterParams,
) -> Result<Dataset, DemuxError> {
    params.validate()?;
    let columns = align_cells(dataset, matrix)?;

    let keep: Vec<usize> = matrix
        .counts
        .outer_iter()
        .enumerate()
        .filter(|(_, row)| nonzero_fraction(row.view()) >= params.min_cell_fraction)
        .map(|(snp, _)| snp)
        .collect();

    let mut counts = Array2::<u32>::zeros((dataset.num_cells(), keep.len()));
    for (j, &snp) in keep.iter().enumerate() {
        let row = matrix.counts.row(snp);
        for (cell, &col) in columns.iter().enumerate() {
            counts[[cell, j]] = row[col];
        }
    }
    let snp_ids = keep.iter().map(|&snp| matrix.snp_ids[snp].clone()).collect();

    info!(
        "retained {} of {} SNP loci observed in at least {:.1}% of cells",
        keep.len(),
        matrix.snp_ids.len(),
        100.0 * params.min_cell_fraction
    );
    Ok(dataset.with_snps(SnpTable::new(snp_ids, counts)))
}

/// For every dataset cell, the matrix column holding it.
fn align_cells(dataset: &Dataset, matrix: &SnpMatrix) -> Result<Vec<usize>, DemuxError> {
    if matrix.barcodes == dataset.barcodes() {
        return Ok((0..dataset.num_cells()).collect());
    }
    let column_of: FxHashMap<&str, usize> = matrix
        .barcodes
        .iter()
        .enumerate()
        .map(|(i, b)| (b.as_str(), i))
        .collect();
    let dataset_index = dataset.barcode_index();

    let missing: Vec<&String> = dataset
        .barcodes()
        .iter()
        .filter(|b| !column_of.contains_key(b.as_str()))
        .collect();
    let unexpected: Vec<&String> = matrix
        .barcodes
        .iter()
        .filter(|b| !dataset_index.contains_key(b.as_str()))
        .collect();
    if let Some(example) = missing.first().or(unexpected.first()) {
        return Err(DemuxError::BarcodeMismatch {
            missing: missing.len(),
            unexpected: unexpected.len(),
            example: (*example).clone(),
        });
    }
    Ok(dataset
        .barcodes()
        .iter()
        .map(|b| column_of[b.as_str()])
        .collect())
}
