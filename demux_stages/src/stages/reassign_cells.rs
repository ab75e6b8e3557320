//! Martian stage REASSIGN_CELLS
//! Label cells with a KNN classifier trained on the SNP profiles of the
//! trusted cells and synthetic doublets.

use crate::io::cell_call_rows;
use crate::types::{CellCallsCsv, DatasetFile, DoubletHandling, SnpNormalization, SummaryJson};
use anyhow::Result;
use martian::prelude::*;
use martian_derive::{make_mro, MartianStruct};
use martian_filetypes::{FileTypeRead, FileTypeWrite};
use serde::{Deserialize, Serialize};
use snp_demux::{reassign, DemuxSummary, DoubletCount, ReassignParams};

/// The Martian stage inputs.
#[derive(Clone, Serialize, Deserialize, MartianStruct)]
pub struct ReassignCellsStageInputs {
    /// Dataset with hashtag calls and SNP counts.
    pub dataset: DatasetFile,
    /// Number of neighbors voting on each cell.
    pub k: Option<usize>,
    /// Synthetic doublets per pair of sample groups, sized to the classes when null.
    pub doublets_per_pair: Option<usize>,
    /// Seed of the doublet sampler.
    pub seed: Option<u64>,
    /// Count transformation before distances, raw when null.
    pub normalization: Option<SnpNormalization>,
    /// Whether doublet is a reachable prediction, spoiler when null.
    pub doublet_policy: Option<DoubletHandling>,
    /// Barcodes to train on, the trusted cells when null.
    pub train_barcodes: Option<Vec<String>>,
    /// Barcodes to label, every cell when null.
    pub predict_barcodes: Option<Vec<String>>,
}

/// The Martian stage outputs.
#[derive(Clone, Serialize, Deserialize, MartianStruct)]
pub struct ReassignCellsStageOutputs {
    /// The dataset with its final labels.
    pub dataset: DatasetFile,
    /// Hashtag call and final label of every cell.
    pub cell_calls: CellCallsCsv,
    /// Counts of the hashtag calls and final labels.
    pub summary: SummaryJson,
}

/// Martian stage REASSIGN_CELLS
pub struct ReassignCells;

#[make_mro(mem_gb = 8, threads = 4, volatile = strict)]
impl MartianMain for ReassignCells {
    type StageInputs = ReassignCellsStageInputs;
    type StageOutputs = ReassignCellsStageOutputs;

    fn main(&self, args: Self::StageInputs, rover: MartianRover) -> Result<Self::StageOutputs> {
        let dataset = args.dataset.read()?;

        let defaults = ReassignParams::default();
        let params = ReassignParams {
            k: args.k.unwrap_or(defaults.k),
            doublets: args
                .doublets_per_pair
                .map_or(DoubletCount::Auto, DoubletCount::PerPair),
            seed: args.seed.unwrap_or(defaults.seed),
            normalization: args
                .normalization
                .map_or(defaults.normalization, Into::into),
            doublet_policy: args
                .doublet_policy
                .map_or(defaults.doublet_policy, Into::into),
            train_cells: args
                .train_barcodes
                .map(|b| dataset.cell_indices(&b))
                .transpose()?,
            predict_cells: args
                .predict_barcodes
                .map(|b| dataset.cell_indices(&b))
                .transpose()?,
        };
        let dataset = reassign(&dataset, &params)?;

        let summary = DemuxSummary::new(&dataset);
        summary.log();
        let summary_file: SummaryJson = rover.make_path("summary");
        summary_file.write(&summary)?;
        let cell_calls: CellCallsCsv = rover.make_path("cell_calls");
        cell_calls.write(&cell_call_rows(&dataset)?)?;
        let dataset_file: DatasetFile = rover.make_path("dataset");
        dataset_file.write(&dataset)?;

        Ok(ReassignCellsStageOutputs {
            dataset: dataset_file,
            cell_calls,
            summary: summary_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::CellCallRow;
    use ndarray::Array2;
    use snp_demux::{add_snps, Dataset, HtoCall, MixtureLabel, SnpFilterParams, SnpMatrix};
    use std::path::Path;

    /// Eight trusted cells per group and two untrusted ones, with SNP
    /// profiles that separate the groups.
    fn write_dataset(dir: &Path) -> DatasetFile {
        let n = 20;
        let barcodes: Vec<String> = (0..n).map(|i| format!("C{i:02}")).collect();
        let group_of = |i: usize| i % 2;
        let dataset = Dataset::new(
            barcodes.clone(),
            vec!["A".into(), "B".into()],
            Array2::zeros((n, 2)),
        )
        .unwrap();
        let calls = (0..n)
            .map(|i| {
                let trusted = i < 16;
                HtoCall {
                    label: if trusted {
                        MixtureLabel::Singlet(group_of(i))
                    } else {
                        MixtureLabel::Uncertain
                    },
                    acceptance_probability: None,
                    posteriors: vec![None, None],
                    trusted,
                }
            })
            .collect();
        let dataset = dataset.with_hto_calls(calls).unwrap();

        let counts = Array2::from_shape_fn((4, n), |(snp, cell)| {
            let jitter = (cell % 3) as u32;
            if snp % 2 == group_of(cell) {
                20 + jitter
            } else {
                1 + jitter
            }
        });
        let matrix = SnpMatrix::new(
            (0..4).map(|s| format!("snp{s}")).collect(),
            barcodes,
            counts,
        )
        .unwrap();
        let dataset = add_snps(&dataset, &matrix, &SnpFilterParams::default()).unwrap();

        let file = DatasetFile::new(dir, "dataset");
        file.write(&dataset).unwrap();
        file
    }

    fn inputs(dataset: DatasetFile) -> ReassignCellsStageInputs {
        ReassignCellsStageInputs {
            dataset,
            k: Some(3),
            doublets_per_pair: None,
            seed: Some(7),
            normalization: None,
            doublet_policy: None,
            train_barcodes: None,
            predict_barcodes: None,
        }
    }

    #[test]
    fn test_reassign_cells_stage() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let args = inputs(write_dataset(dir.path()));
        let outs = ReassignCells.test_run_tmpdir(args)?;

        let rows: Vec<CellCallRow> = outs.cell_calls.read()?;
        assert_eq!(rows.len(), 20);
        for (i, row) in rows.iter().enumerate() {
            let expected = if i % 2 == 0 { "A" } else { "B" };
            assert_eq!(row.knn.as_deref(), Some(expected), "cell {}", row.barcode);
        }
        assert_eq!(rows[18].labels, "uncertain");
        assert!(!rows[18].train);

        let summary = outs.summary.read()?;
        assert_eq!(summary.reassigned_untrusted, 4);
        assert_eq!(summary.trusted_agreement, Some(1.0));
        Ok(())
    }

    #[test]
    fn test_predict_barcodes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut args = inputs(write_dataset(dir.path()));
        args.predict_barcodes = Some(vec!["C17".into(), "C19".into()]);
        let outs = ReassignCells.test_run_tmpdir(args)?;
        let dataset = outs.dataset.read()?;
        let labeled: Vec<usize> = dataset
            .final_calls()
            .unwrap()
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.map(|_| i))
            .collect();
        assert_eq!(labeled, vec![17, 19]);
        Ok(())
    }

    #[test]
    fn test_unknown_train_barcode() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = inputs(write_dataset(dir.path()));
        args.train_barcodes = Some(vec!["C00".into(), "nope".into()]);
        assert!(ReassignCells.test_run_tmpdir(args).is_err());
    }
}
