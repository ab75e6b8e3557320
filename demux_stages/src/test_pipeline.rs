//! Demultiplexing pipeline for testing

use crate::stage_testing::run_stage;
use crate::stages::add_snps::{AddSnps, AddSnpsStageInputs};
use crate::stages::high_conf_calls::{HighConfCalls, HighConfCallsStageInputs};
use crate::stages::reassign_cells::{ReassignCells, ReassignCellsStageInputs};
use crate::types::{CellCallsCsv, Mtx, SummaryJson, TsvFile};
use anyhow::Result;
use martian::prelude::*;
use martian_derive::{make_mro, MartianStruct};
use martian_filetypes::tabular_file::CsvFile;
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, MartianStruct)]
struct DemuxTestInputs {
    hto_counts: CsvFile<()>,
    snp_matrix: Mtx,
    snp_barcodes: TsvFile,
    snp_ids: TsvFile,
    k: Option<usize>,
}

#[derive(Clone, Serialize, Deserialize, MartianStruct)]
struct DemuxTestOutputs {
    cell_calls: CellCallsCsv,
    summary: SummaryJson,
}

struct DemuxTest;

#[make_mro]
impl MartianMain for DemuxTest {
    type StageInputs = DemuxTestInputs;
    type StageOutputs = DemuxTestOutputs;
    fn main(&self, args: Self::StageInputs, rover: MartianRover) -> Result<Self::StageOutputs> {
        let high_conf_outs = run_stage(
            HighConfCalls,
            HighConfCallsStageInputs {
                hto_counts: args.hto_counts,
                acceptance_probability: None,
                detection_threshold: None,
            },
            &rover,
        )?;

        let add_snps_outs = run_stage(
            AddSnps,
            AddSnpsStageInputs {
                dataset: high_conf_outs.dataset,
                snp_matrix: args.snp_matrix,
                snp_barcodes: args.snp_barcodes,
                snp_ids: args.snp_ids,
                min_cell_fraction: None,
            },
            &rover,
        )?;

        let reassign_outs = run_stage(
            ReassignCells,
            ReassignCellsStageInputs {
                dataset: add_snps_outs.dataset,
                k: args.k,
                doublets_per_pair: None,
                seed: Some(11),
                normalization: None,
                doublet_policy: None,
                train_barcodes: None,
                predict_barcodes: None,
            },
            &rover,
        )?;

        Ok(DemuxTestOutputs {
            cell_calls: reassign_outs.cell_calls,
            summary: reassign_outs.summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::CellCallRow;
    use martian_filetypes::FileTypeRead;
    use sprs::TriMat;
    use std::fmt::Write as _;
    use std::path::Path;

    const GROUPS: usize = 3;
    const CELLS_PER_GROUP: usize = 25;
    // the last cells of each group carry weak, overlapping hashtags
    const AMBIGUOUS_PER_GROUP: usize = 3;
    const SNPS: usize = 9;

    fn group_of(cell: usize) -> usize {
        cell / CELLS_PER_GROUP
    }

    fn barcode(cell: usize) -> String {
        format!("AC{cell:04}-1")
    }

    fn write_inputs(dir: &Path) -> DemuxTestInputs {
        let n = GROUPS * CELLS_PER_GROUP;

        let mut hto = String::from("barcode,HTO_A,HTO_B,HTO_C\n");
        for cell in 0..n {
            let ambiguous = cell % CELLS_PER_GROUP >= CELLS_PER_GROUP - AMBIGUOUS_PER_GROUP;
            let counts: Vec<String> = (0..GROUPS)
                .map(|tag| {
                    let count = match (ambiguous, tag == group_of(cell)) {
                        (false, true) => 250 + (cell * 13) % 60,
                        (false, false) => 1 + (cell * 7 + tag) % 5,
                        (true, true) => 45 + cell % 4,
                        (true, false) => 25 + (cell + tag) % 6,
                    };
                    count.to_string()
                })
                .collect();
            writeln!(hto, "{},{}", barcode(cell), counts.join(",")).unwrap();
        }
        let hto_counts: CsvFile<()> = CsvFile::new(dir, "hto_counts");
        std::fs::write(&hto_counts, hto).unwrap();

        // matrix columns run in reverse barcode order
        let mut triplets = TriMat::new((SNPS, n));
        for cell in 0..n {
            for snp in 0..SNPS {
                let value = if snp % GROUPS == group_of(cell) {
                    12 + (cell * 5) % 6
                } else {
                    1 + cell % 3
                };
                triplets.add_triplet(snp, n - 1 - cell, value as f64);
            }
        }
        let snp_matrix = Mtx::new(dir, "snps");
        sprs::io::write_matrix_market(&snp_matrix, &triplets).unwrap();
        let barcodes: Vec<String> = (0..n).rev().map(barcode).collect();
        let snp_barcodes = TsvFile::new(dir, "barcodes");
        std::fs::write(&snp_barcodes, barcodes.join("\n")).unwrap();
        let snp_ids = TsvFile::new(dir, "snp_ids");
        let ids: Vec<String> = (0..SNPS).map(|s| format!("chr7_{}", 500 + 37 * s)).collect();
        std::fs::write(&snp_ids, ids.join("\n")).unwrap();

        DemuxTestInputs {
            hto_counts,
            snp_matrix,
            snp_barcodes,
            snp_ids,
            k: Some(5),
        }
    }

    #[test]
    fn test_pipeline_labels_every_cell() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let outs = DemuxTest.test_run_tmpdir(write_inputs(dir.path()))?;

        let rows: Vec<CellCallRow> = outs.cell_calls.read()?;
        assert_eq!(rows.len(), GROUPS * CELLS_PER_GROUP);
        let names = ["HTO_A", "HTO_B", "HTO_C"];
        for (cell, row) in rows.iter().enumerate() {
            assert_eq!(row.barcode, barcode(cell));
            assert_eq!(
                row.knn.as_deref(),
                Some(names[group_of(cell)]),
                "cell {}",
                row.barcode
            );
        }

        let summary = outs.summary.read()?;
        assert_eq!(summary.cells, GROUPS * CELLS_PER_GROUP);
        assert!(summary.trusted_cells >= 60);
        assert_eq!(
            summary.reassigned_untrusted,
            summary.cells - summary.trusted_cells
        );
        assert_eq!(summary.trusted_agreement, Some(1.0));
        Ok(())
    }

    #[test]
    fn test_pipeline_rejects_oversized_k() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = write_inputs(dir.path());
        args.k = Some(10_000);
        assert!(DemuxTest.test_run_tmpdir(args).is_err());
    }
}
