//! Reassignment of cells by their SNP profiles.

use crate::config::{Normalization, ReassignParams};
use crate::dataset::{Dataset, FinalLabel, GroupIdx, MixtureLabel, SnpTable};
use crate::doublets::synthesize_doublets;
use crate::error::DemuxError;
use crate::knn::KnnClassifier;
use itertools::Itertools;
use log::info;
use ndarray::{Array2, ArrayView1};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use std::collections::BTreeMap;

/// Label cells with a KNN classifier trained on SNP profiles.
///
/// The training set holds the profiles of `params.train_cells` (the trusted
/// cells by default), labeled by their sample group, plus synthetic doublets
/// drawn from those same cells. Every cell of `params.predict_cells` (all
/// cells by default) gets a final label; all other cells get none.
///
/// A sample group without training cells cannot be predicted. The doublet
/// sampler, seeded by `params.seed`, is the only source of randomness.
pub fn reassign(dataset: &Dataset, params: &ReassignParams) -> Result<Dataset, DemuxError> {
    params.validate()?;
    let calls = dataset
        .hto_calls()
        .ok_or(DemuxError::MissingStage("high-confidence calls"))?;
    let snps = dataset
        .snps()
        .ok_or(DemuxError::MissingStage("SNP matrix"))?;
    if snps.num_snps() == 0 {
        return Err(DemuxError::NoSnpFeatures);
    }

    let train_cells = match &params.train_cells {
        Some(cells) => {
            check_range(cells, dataset.num_cells())?;
            cells.clone()
        }
        None => dataset.trusted_cells(),
    };
    let predict_cells = match &params.predict_cells {
        Some(cells) => {
            check_range(cells, dataset.num_cells())?;
            cells.clone()
        }
        None => (0..dataset.num_cells()).collect(),
    };

    let mut pools: BTreeMap<GroupIdx, Vec<usize>> = BTreeMap::new();
    let mut classes = Vec::with_capacity(train_cells.len());
    for &cell in &train_cells {
        match calls[cell].label {
            MixtureLabel::Singlet(g) => {
                pools.entry(g).or_default().push(cell);
                classes.push(FinalLabel::Group(g));
            }
            label => {
                return Err(DemuxError::UntrainableCell {
                    barcode: dataset.barcodes()[cell].clone(),
                    label: label.name(dataset.groups()).to_string(),
                })
            }
        }
    }
    for g in 0..dataset.num_groups() {
        if !pools.contains_key(&g) {
            info!(
                "sample group {} has no training cells and cannot be predicted",
                dataset.groups()[g]
            );
        }
    }

    let class_sizes = pools.values().map(Vec::len).collect_vec();
    let num_pairs = class_sizes.len() * class_sizes.len().saturating_sub(1) / 2;
    let per_pair = params.doublets.per_pair(&class_sizes, num_pairs);
    let mut rng = Xoshiro256StarStar::seed_from_u64(params.seed);
    let doublets = synthesize_doublets(snps, &pools, per_pair, &mut rng);

    let norm = params.normalization;
    let mut profiles = Array2::<f64>::zeros((train_cells.len() + doublets.len(), snps.num_snps()));
    let sources = train_cells
        .iter()
        .map(|&cell| snps.profile(cell))
        .chain(doublets.profiles.outer_iter());
    for (mut row, source) in profiles.outer_iter_mut().zip(sources) {
        row.assign(&normalize(source, norm));
    }
    classes.extend(std::iter::repeat(FinalLabel::Doublet).take(doublets.len()));
    info!(
        "training on {} cells and {} synthetic doublets with k = {}, {} distance, doublets as {}",
        train_cells.len(),
        doublets.len(),
        params.k,
        norm,
        params.doublet_policy
    );
    let knn = KnnClassifier::fit(profiles, classes, params.k, params.doublet_policy)?;

    let queries = query_matrix(snps, &predict_cells, norm);
    let predictions = knn.predict_many(queries.view())?;
    let mut final_calls = vec![None; dataset.num_cells()];
    for (&cell, prediction) in predict_cells.iter().zip(&predictions) {
        final_calls[cell] = Some(prediction.label);
    }

    info!(
        "reassigned {} cells: {}",
        predict_cells.len(),
        predictions
            .iter()
            .counts_by(|p| p.label.name(dataset.groups()).to_string())
            .into_iter()
            .sorted()
            .map(|(label, n)| format!("{label}={n}"))
            .join(", ")
    );
    Ok(dataset.with_final_calls(final_calls))
}

fn check_range(cells: &[usize], num_cells: usize) -> Result<(), DemuxError> {
    match cells.iter().find(|&&cell| cell >= num_cells) {
        Some(&cell) => Err(DemuxError::CellOutOfRange { cell, num_cells }),
        None => Ok(()),
    }
}

fn normalize(counts: ArrayView1<'_, u32>, norm: Normalization) -> ndarray::Array1<f64> {
    counts.mapv(|c| norm.apply(c))
}

fn query_matrix(snps: &SnpTable, cells: &[usize], norm: Normalization) -> Array2<f64> {
    let mut queries = Array2::<f64>::zeros((cells.len(), snps.num_snps()));
    for (mut row, &cell) in queries.outer_iter_mut().zip(cells) {
        row.assign(&normalize(snps.profile(cell), norm));
    }
    queries
}
