//! Brute-force k-nearest-neighbor classifier over SNP profiles.
//!
//! Distances are Euclidean. Among profiles at the same distance the lower
//! training index is the nearer one, so the neighbor set of a query is
//! always the same. A vote tie goes to the tied class holding the nearest
//! neighbor.

use crate::config::DoubletPolicy;
use crate::dataset::FinalLabel;
use crate::error::DemuxError;
use ndarray::{Array2, ArrayView1, ArrayView2};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use std::collections::BinaryHeap;

/// Label of a query and the neighborhood that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Predicted class.
    pub label: FinalLabel,
    /// Neighbors among the k nearest voting for `label`. Zero when the
    /// spoiler fallback picked the label.
    pub votes: usize,
    /// Distance to the nearest training profile of class `label`.
    pub nearest_distance: f64,
}

#[derive(Debug, Clone, Copy)]
struct Tally {
    label: FinalLabel,
    votes: usize,
    // rank of the nearest neighbor of this class
    first_rank: usize,
    first_distance: f64,
}

/// A fitted classifier. Training profiles are rows of `profiles`.
#[derive(Debug, Clone)]
pub struct KnnClassifier {
    profiles: Array2<f64>,
    classes: Vec<FinalLabel>,
    k: usize,
    policy: DoubletPolicy,
}

impl KnnClassifier {
    /// Store the training profiles after checking that the problem is well posed:
    /// at least one feature, at least two distinct classes and more than
    /// `k` training profiles.
    pub fn fit(
        profiles: Array2<f64>,
        classes: Vec<FinalLabel>,
        k: usize,
        policy: DoubletPolicy,
    ) -> Result<Self, DemuxError> {
        if profiles.nrows() != classes.len() {
            return Err(DemuxError::ShapeMismatch {
                what: "training classes",
                expected: profiles.nrows(),
                found: classes.len(),
            });
        }
        if k == 0 {
            return Err(DemuxError::invalid("k", k, "must be at least 1"));
        }
        if profiles.ncols() == 0 {
            return Err(DemuxError::NoSnpFeatures);
        }
        let mut distinct = classes.clone();
        distinct.sort();
        distinct.dedup();
        if distinct.len() < 2 {
            return Err(DemuxError::TooFewClasses {
                found: distinct.len(),
            });
        }
        if k >= classes.len() {
            return Err(DemuxError::KTooLarge {
                k,
                training_size: classes.len(),
            });
        }
        Ok(KnnClassifier {
            profiles,
            classes,
            k,
            policy,
        })
    }

    /// Number of neighbors voting.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of training profiles.
    pub fn training_size(&self) -> usize {
        self.classes.len()
    }

    /// Number of features per profile.
    pub fn num_features(&self) -> usize {
        self.profiles.ncols()
    }

    fn squared_distance(&self, row: usize, query: ArrayView1<'_, f64>) -> f64 {
        self.profiles
            .row(row)
            .iter()
            .zip(query)
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }

    /// Indices of the k nearest training profiles, nearest first.
    fn neighbors(&self, query: ArrayView1<'_, f64>) -> Vec<(OrderedFloat<f64>, usize)> {
        let mut heap = BinaryHeap::with_capacity(self.k + 1);
        for row in 0..self.classes.len() {
            heap.push((OrderedFloat(self.squared_distance(row, query)), row));
            if heap.len() > self.k {
                heap.pop();
            }
        }
        heap.into_sorted_vec()
    }

    /// Classify one profile.
    pub fn predict(&self, query: ArrayView1<'_, f64>) -> Result<Prediction, DemuxError> {
        if query.len() != self.num_features() {
            return Err(DemuxError::ShapeMismatch {
                what: "query profile",
                expected: self.num_features(),
                found: query.len(),
            });
        }

        let mut tallies: Vec<Tally> = Vec::with_capacity(self.k);
        for (rank, &(distance, row)) in self.neighbors(query).iter().enumerate() {
            let label = self.classes[row];
            if label == FinalLabel::Doublet && self.policy == DoubletPolicy::Spoiler {
                continue;
            }
            match tallies.iter_mut().find(|t| t.label == label) {
                Some(tally) => tally.votes += 1,
                None => tallies.push(Tally {
                    label,
                    votes: 1,
                    first_rank: rank,
                    first_distance: distance.0,
                }),
            }
        }

        let winner = tallies
            .iter()
            .max_by_key(|t| (t.votes, std::cmp::Reverse(t.first_rank)));
        Ok(match winner {
            Some(t) => Prediction {
                label: t.label,
                votes: t.votes,
                nearest_distance: t.first_distance.sqrt(),
            },
            None => self.nearest_group(query),
        })
    }

    /// Every neighbor was a doublet: fall back to the nearest sample group profile.
    fn nearest_group(&self, query: ArrayView1<'_, f64>) -> Prediction {
        let nearest = self
            .classes
            .iter()
            .enumerate()
            .filter(|(_, label)| matches!(label, FinalLabel::Group(_)))
            .map(|(row, label)| (OrderedFloat(self.squared_distance(row, query)), row, *label))
            .min_by_key(|&(distance, row, _)| (distance, row));
        match nearest {
            Some((distance, _, label)) => Prediction {
                label,
                votes: 0,
                nearest_distance: distance.0.sqrt(),
            },
            // fit() guarantees two distinct classes, so one of them is a group
            None => Prediction {
                label: FinalLabel::Doublet,
                votes: 0,
                nearest_distance: f64::INFINITY,
            },
        }
    }

    /// Classify every row of `queries` in parallel.
    pub fn predict_many(
        &self,
        queries: ArrayView2<'_, f64>,
    ) -> Result<Vec<Prediction>, DemuxError> {
        (0..queries.nrows())
            .into_par_iter()
            .map(|i| self.predict(queries.row(i)))
            .collect()
    }
}
