//! End to end runs of the three stages on simulated pools.

use crate::config::{HighConfParams, ReassignParams, SnpFilterParams};
use crate::dataset::{Dataset, FinalLabel, GroupIdx, HtoCall, MixtureLabel};
use crate::high_conf::high_conf_calls;
use crate::reassign::reassign;
use crate::snp_matrix::{add_snps, SnpMatrix};
use crate::summary::DemuxSummary;
use hto_mixture::{Component, GaussianTagMixture, MixtureFitError, TagFit, TagMixtureModel};
use ndarray::{Array2, ArrayView1};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};
use rand_xoshiro::Xoshiro256StarStar;

const NUM_GROUPS: usize = 4;
const INFORMATIVE_SNPS: usize = 60;
const SPARSE_SNPS: usize = 5;
/// Hashtag count of a cell the hashtags cannot resolve.
const AMBIGUOUS_TAG: f64 = 50.0;

/// Posterior rising smoothly around a fixed count.
struct LogisticModel;

impl TagMixtureModel for LogisticModel {
    fn fit(&self, counts: ArrayView1<'_, f64>) -> Result<TagFit, MixtureFitError> {
        let component = |mean| Component {
            mean,
            std_dev: 5.0,
            weight: 0.5,
        };
        Ok(TagFit {
            posterior: counts.mapv(|c| 1.0 / (1.0 + (-(c - AMBIGUOUS_TAG) / 5.0).exp())),
            background: component(0.0),
            signal: component(2.0 * AMBIGUOUS_TAG),
            log_likelihood: 0.0,
            iterations: 1,
        })
    }
}

struct Simulation {
    dataset: Dataset,
    snps: SnpMatrix,
    truth: Vec<GroupIdx>,
}

/// Pool `clear` well tagged and `ambiguous` poorly tagged cells per group.
/// Every group has its own genotype over the informative loci; the sparse
/// loci are rarely covered and should be filtered out.
fn simulate(clear: &[usize], ambiguous: &[usize], seed: u64) -> Simulation {
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    let mut cells: Vec<(GroupIdx, bool)> = Vec::new();
    for g in 0..NUM_GROUPS {
        cells.extend(std::iter::repeat((g, true)).take(clear[g]));
        cells.extend(std::iter::repeat((g, false)).take(ambiguous[g]));
    }
    cells.shuffle(&mut rng);
    let num_cells = cells.len();

    let background = Poisson::new(3.0).unwrap();
    let signal = Poisson::new(300.0).unwrap();
    let mut hto = Array2::<f64>::zeros((num_cells, NUM_GROUPS));
    for (mut row, &(group, clear)) in hto.outer_iter_mut().zip(&cells) {
        for (tag, value) in row.iter_mut().enumerate() {
            *value = match (tag == group, clear) {
                (true, true) => signal.sample(&mut rng),
                (true, false) => AMBIGUOUS_TAG,
                (false, _) => background.sample(&mut rng),
            };
        }
    }

    // expected reads per locus: 4, 10 or 16 depending on the genotype
    let genotypes: Vec<Vec<f64>> = (0..NUM_GROUPS)
        .map(|_| {
            (0..INFORMATIVE_SNPS)
                .map(|_| 4.0 + 6.0 * rng.gen_range(0..3) as f64)
                .collect()
        })
        .collect();
    let sparse = Poisson::new(0.05).unwrap();
    let num_snps = INFORMATIVE_SNPS + SPARSE_SNPS;
    let mut counts = Array2::<u32>::zeros((num_snps, num_cells));
    for (cell, &(group, _)) in cells.iter().enumerate() {
        for snp in 0..num_snps {
            let draw = if snp < INFORMATIVE_SNPS {
                Poisson::new(genotypes[group][snp]).unwrap().sample(&mut rng)
            } else {
                sparse.sample(&mut rng)
            };
            counts[[snp, cell]] = draw as u32;
        }
    }

    let barcodes: Vec<String> = (0..num_cells).map(|i| format!("CELL{i:05}-1")).collect();
    let groups = (0..NUM_GROUPS).map(|g| format!("HTO_{g}")).collect();
    let snp_ids = (0..num_snps).map(|s| format!("chr1_{}", 1000 + 37 * s)).collect();
    Simulation {
        dataset: Dataset::new(barcodes.clone(), groups, hto).unwrap(),
        snps: SnpMatrix::new(snp_ids, barcodes, counts).unwrap(),
        truth: cells.iter().map(|&(g, _)| g).collect(),
    }
}

/// The worked example: 1,045 cells the hashtags call and 608 they cannot.
fn worked_example() -> Simulation {
    simulate(&[262, 261, 261, 261], &[152, 152, 152, 152], 17)
}

fn prepare<M: TagMixtureModel>(sim: &Simulation, model: &M) -> Dataset {
    let ds = high_conf_calls(&sim.dataset, model, &HighConfParams::default()).unwrap();
    add_snps(&ds, &sim.snps, &SnpFilterParams::default()).unwrap()
}

fn agreement(ds: &Dataset, cells: &[usize], truth: &[GroupIdx]) -> f64 {
    let calls = ds.final_calls().unwrap();
    let correct = cells
        .iter()
        .filter(|&&cell| calls[cell] == Some(FinalLabel::Group(truth[cell])))
        .count();
    correct as f64 / cells.len() as f64
}

#[test]
fn test_worked_example() {
    let sim = worked_example();
    let ds = prepare(&sim, &LogisticModel);
    assert_eq!(ds.trusted_cells().len(), 1045);
    assert_eq!(ds.snps().unwrap().num_snps(), INFORMATIVE_SNPS);

    let params = ReassignParams {
        k: 5,
        ..Default::default()
    };
    let ds = reassign(&ds, &params).unwrap();
    let calls = ds.hto_calls().unwrap();
    let untrusted: Vec<usize> = (0..ds.num_cells()).filter(|&c| !calls[c].trusted).collect();
    assert_eq!(untrusted.len(), 608);
    for &cell in &untrusted {
        assert_eq!(calls[cell].label, MixtureLabel::Uncertain);
        assert!(matches!(
            ds.final_calls().unwrap()[cell],
            Some(FinalLabel::Group(_))
        ));
    }
    assert!(agreement(&ds, &untrusted, &sim.truth) > 0.98);

    let summary = DemuxSummary::new(&ds);
    assert_eq!(summary.trusted_cells, 1045);
    assert_eq!(summary.reassigned_untrusted, 608);
    assert_eq!(summary.final_labels.get("doublet"), None);
    assert!(summary.trusted_agreement.unwrap() > 0.98);
}

#[test]
fn test_held_out_trusted_cells() {
    let sim = worked_example();
    let ds = prepare(&sim, &LogisticModel);
    let trusted = ds.trusted_cells();
    let (train, test) = trusted.split_at(500);
    let params = ReassignParams {
        train_cells: Some(train.to_vec()),
        predict_cells: Some(test.to_vec()),
        ..Default::default()
    };
    let ds = reassign(&ds, &params).unwrap();
    assert!(agreement(&ds, test, &sim.truth) > 0.98);
    let calls = ds.final_calls().unwrap();
    assert!(train.iter().all(|&cell| calls[cell].is_none()));
}

#[test]
fn test_mislabeled_training_cells_are_recovered() {
    let sim = worked_example();
    let ds = prepare(&sim, &LogisticModel);
    let mut calls = ds.hto_calls().unwrap().to_vec();
    let mislabeled: Vec<usize> = ds
        .trusted_cells()
        .into_iter()
        .filter(|&cell| sim.truth[cell] == 0)
        .take(20)
        .collect();
    for &cell in &mislabeled {
        calls[cell].label = MixtureLabel::Singlet(1);
    }
    let ds = ds.with_hto_calls(calls).unwrap();
    let params = ReassignParams {
        predict_cells: Some(ds.trusted_cells()),
        ..Default::default()
    };
    let ds = reassign(&ds, &params).unwrap();
    assert!(agreement(&ds, &mislabeled, &sim.truth) >= 0.8);
}

#[test]
fn test_reassign_is_idempotent() {
    let sim = simulate(&[60, 60, 60, 60], &[20, 20, 20, 20], 3);
    let ds = prepare(&sim, &LogisticModel);
    let params = ReassignParams {
        seed: 99,
        ..Default::default()
    };
    let first = reassign(&ds, &params).unwrap();
    let second = reassign(&ds, &params).unwrap();
    assert_eq!(first.final_calls(), second.final_calls());
    assert_eq!(first.snps(), ds.snps());
    assert_eq!(first.hto_counts(), sim.dataset.hto_counts());
}

#[test]
fn test_group_without_trusted_cells_is_never_predicted() {
    let sim = simulate(&[60, 60, 60, 0], &[20, 20, 20, 40], 5);
    let ds = prepare(&sim, &LogisticModel);
    assert!(ds
        .trusted_cells()
        .iter()
        .all(|&cell| sim.truth[cell] != 3));
    let ds = reassign(&ds, &ReassignParams::default()).unwrap();
    assert!(ds
        .final_calls()
        .unwrap()
        .iter()
        .all(|call| *call != Some(FinalLabel::Group(3))));
}

#[test]
fn test_untrusting_a_group_by_hand() {
    let sim = simulate(&[60, 60, 60, 60], &[0, 0, 0, 0], 11);
    let ds = prepare(&sim, &LogisticModel);
    let calls: Vec<HtoCall> = ds
        .hto_calls()
        .unwrap()
        .iter()
        .map(|call| match call.label {
            MixtureLabel::Singlet(3) => HtoCall {
                label: MixtureLabel::Uncertain,
                trusted: false,
                ..call.clone()
            },
            _ => call.clone(),
        })
        .collect();
    let ds = reassign(&ds.with_hto_calls(calls).unwrap(), &ReassignParams::default()).unwrap();
    let summary = DemuxSummary::new(&ds);
    assert_eq!(summary.final_labels.get("HTO_3"), None);
    assert_eq!(summary.reassigned_untrusted, 60);
}

#[test]
fn test_gaussian_mixture_end_to_end() {
    let sim = simulate(&[100, 100, 100, 100], &[0, 0, 0, 0], 23);
    let ds = prepare(&sim, &GaussianTagMixture::default());
    assert!(ds.trusted_cells().len() >= 360);
    let ds = reassign(&ds, &ReassignParams::default()).unwrap();
    let all: Vec<usize> = (0..ds.num_cells()).collect();
    assert!(agreement(&ds, &all, &sim.truth) > 0.98);
}
