//! Synthetic doublet profiles.
//!
//! A doublet droplet holds two cells, so its SNP counts are modeled as the
//! sum of the profiles of one cell from each of two sample groups.

use crate::dataset::{GroupIdx, SnpTable};
use itertools::Itertools;
use log::{debug, info};
use ndarray::{s, Array2};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Synthetic doublet profiles, grouped by the pair of sample groups they mix.
#[derive(Debug, Clone, PartialEq)]
pub struct DoubletProfiles {
    /// The pair each row was drawn from, lower group index first.
    pub pairs: Vec<(GroupIdx, GroupIdx)>,
    /// Doublets x SNPs summed counts.
    pub profiles: Array2<u32>,
}

impl DoubletProfiles {
    /// Number of synthetic doublets.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when no pair had cells on both sides.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Draw `per_pair` doublets for every unordered pair of groups in `pools`.
///
/// Each doublet sums the profile of a cell drawn uniformly, with replacement,
/// from each group's pool. Pairs where a pool is empty are skipped. One seed is
/// drawn from `rng` per eligible pair, in pair order, so the result depends on
/// the state of `rng` only and not on thread scheduling.
pub fn synthesize_doublets<R: Rng>(
    snps: &SnpTable,
    pools: &BTreeMap<GroupIdx, Vec<usize>>,
    per_pair: usize,
    rng: &mut R,
) -> DoubletProfiles {
    let eligible: Vec<((GroupIdx, GroupIdx), u64)> = pools
        .iter()
        .tuple_combinations()
        .filter_map(|((a, pool_a), (b, pool_b))| {
            if pool_a.is_empty() || pool_b.is_empty() {
                debug!("no doublets for groups {a} and {b}: a pool is empty");
                None
            } else {
                Some((*a, *b))
            }
        })
        .map(|pair| (pair, rng.gen::<u64>()))
        .collect();

    let counts = snps.counts();
    let blocks: Vec<Array2<u32>> = eligible
        .par_iter()
        .map(|&((a, b), seed)| {
            let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
            let (pool_a, pool_b) = (&pools[&a], &pools[&b]);
            let mut block = Array2::<u32>::zeros((per_pair, snps.num_snps()));
            for mut row in block.outer_iter_mut() {
                let x = pool_a[rng.gen_range(0..pool_a.len())];
                let y = pool_b[rng.gen_range(0..pool_b.len())];
                row.iter_mut()
                    .zip(counts.row(x))
                    .zip(counts.row(y))
                    .for_each(|((out, &cx), &cy)| *out = cx.saturating_add(cy));
            }
            block
        })
        .collect();

    let pairs = eligible
        .iter()
        .flat_map(|&(pair, _)| std::iter::repeat(pair).take(per_pair))
        .collect_vec();
    let mut profiles = Array2::<u32>::zeros((pairs.len(), snps.num_snps()));
    for (i, block) in blocks.iter().enumerate() {
        profiles
            .slice_mut(s![i * per_pair..(i + 1) * per_pair, ..])
            .assign(block);
    }
    info!(
        "synthesized {} doublets from {} group pairs",
        pairs.len(),
        eligible.len()
    );
    DoubletProfiles { pairs, profiles }
}
