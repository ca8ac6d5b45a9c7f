//! Cluster quality scores.
//!
//! - [`silhouette_score`]: internal score used to rank grid search candidates.
//! - [`external_metrics`]: agreement between a partition and ground-truth
//!   labels. All five external scores are invariant under any relabelling of
//!   the predicted clusters, so they always take the raw partition.

use std::{collections::HashMap, hash::Hash};

use ndarray::{Array2, ArrayBase, Data, Ix2};
use serde::{Deserialize, Serialize};

use super::{
    error::{AnalysisError, Result},
    model::{ClusterId, NoisePolicy, Partition, SilhouetteScore},
};

/// Exhaustive Euclidean distances between every pair of rows. O(n²) in time
/// and memory.
pub fn pairwise_distances<S>(x: &ArrayBase<S, Ix2>) -> Array2<f64>
where
    S: Data<Elem = f64>,
{
    let n = x.nrows();
    let mut distances = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let diff = &x.row(i) - &x.row(j);
            let d = diff.dot(&diff).sqrt();
            distances[[i, j]] = d;
            distances[[j, i]] = d;
        }
    }
    distances
}

/// Mean silhouette coefficient of `partition` over the rows of `x`.
pub fn silhouette_score<S>(
    x: &ArrayBase<S, Ix2>,
    partition: &Partition,
    policy: NoisePolicy,
) -> Result<SilhouetteScore>
where
    S: Data<Elem = f64>,
{
    if x.nrows() != partition.len() {
        return Err(AnalysisError::LengthMismatch {
            expected: x.nrows(),
            found: partition.len(),
        });
    }
    silhouette_from_distances(&pairwise_distances(x), partition, policy)
}

/// Mean silhouette coefficient given a precomputed distance matrix.
///
/// Undefined when there are fewer than two non-noise clusters, or when the
/// number of labels scored is not smaller than the number of points scored.
/// Members of singleton clusters contribute 0.
pub fn silhouette_from_distances(
    distances: &Array2<f64>,
    partition: &Partition,
    policy: NoisePolicy,
) -> Result<SilhouetteScore> {
    if distances.nrows() != partition.len() || distances.ncols() != partition.len() {
        return Err(AnalysisError::LengthMismatch {
            expected: partition.len(),
            found: distances.nrows(),
        });
    }
    if partition.n_clusters() < 2 {
        return Ok(SilhouetteScore::Undefined);
    }

    let scored: Vec<usize> = partition
        .iter()
        .enumerate()
        .filter(|(_, c)| policy == NoisePolicy::AsCluster || c.is_signal())
        .map(|(i, _)| i)
        .collect();

    let label_order = first_appearance_index(scored.iter().map(|&i| partition[i]));
    let n_labels = label_order.len();
    if n_labels >= scored.len() {
        return Ok(SilhouetteScore::Undefined);
    }

    let label_of: Vec<usize> = scored.iter().map(|&i| label_order[&partition[i]]).collect();
    let mut sizes = vec![0usize; n_labels];
    for &l in &label_of {
        sizes[l] += 1;
    }

    let mut total = 0.0;
    let mut sums = vec![0.0f64; n_labels];
    for (a_pos, &i) in scored.iter().enumerate() {
        sums.iter_mut().for_each(|s| *s = 0.0);
        for (b_pos, &j) in scored.iter().enumerate() {
            if a_pos != b_pos {
                sums[label_of[b_pos]] += distances[[i, j]];
            }
        }

        let own = label_of[a_pos];
        if sizes[own] < 2 {
            continue;
        }
        let a = sums[own] / (sizes[own] - 1) as f64;
        let b = (0..n_labels)
            .filter(|&l| l != own)
            .map(|l| sums[l] / sizes[l] as f64)
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }

    Ok(SilhouetteScore::Defined(total / scored.len() as f64))
}

/// External validation scores for one partition against ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExternalMetrics {
    pub homogeneity: f64,
    pub completeness: f64,
    pub v_measure: f64,
    pub adjusted_rand_index: f64,
    pub adjusted_mutual_information: f64,
}

/// Compare the raw `partition` against `true_labels`. Noise is treated as an
/// ordinary label.
pub fn external_metrics<L>(true_labels: &[L], partition: &Partition) -> Result<ExternalMetrics>
where
    L: Eq + Hash + Clone,
{
    if true_labels.len() != partition.len() {
        return Err(AnalysisError::LengthMismatch {
            expected: true_labels.len(),
            found: partition.len(),
        });
    }

    let table = Contingency::new(true_labels, partition);
    let h_true = entropy(&table.class_sizes, table.n);
    let h_pred = entropy(&table.cluster_sizes, table.n);
    let mi = table.mutual_information();

    let homogeneity = if h_true == 0.0 { 1.0 } else { mi / h_true };
    let completeness = if h_pred == 0.0 { 1.0 } else { mi / h_pred };
    let v_measure = if homogeneity + completeness == 0.0 {
        0.0
    } else {
        2.0 * homogeneity * completeness / (homogeneity + completeness)
    };

    Ok(ExternalMetrics {
        homogeneity,
        completeness,
        v_measure,
        adjusted_rand_index: table.adjusted_rand_index(),
        adjusted_mutual_information: table.adjusted_mutual_information(mi, h_true, h_pred),
    })
}

/// Maps each distinct value to its rank of first appearance. Invariant under
/// relabelling, which keeps every downstream float sum in the same order.
fn first_appearance_index<T, I>(values: I) -> HashMap<T, usize>
where
    T: Eq + Hash,
    I: IntoIterator<Item = T>,
{
    let mut index = HashMap::new();
    for v in values {
        let next = index.len();
        index.entry(v).or_insert(next);
    }
    index
}

fn entropy(sizes: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    sizes
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.ln()
        })
        .sum()
}

fn comb2(k: usize) -> f64 {
    let k = k as f64;
    k * (k - 1.0) / 2.0
}

struct Contingency {
    n: usize,
    counts: Vec<Vec<usize>>,
    class_sizes: Vec<usize>,
    cluster_sizes: Vec<usize>,
}

impl Contingency {
    fn new<L>(true_labels: &[L], partition: &Partition) -> Self
    where
        L: Eq + Hash + Clone,
    {
        let classes = first_appearance_index(true_labels.iter().cloned());
        let clusters = first_appearance_index::<ClusterId, _>(partition.iter().copied());
        let mut counts = vec![vec![0usize; clusters.len()]; classes.len()];
        for (label, cluster) in true_labels.iter().zip(partition.iter()) {
            counts[classes[label]][clusters[cluster]] += 1;
        }
        let class_sizes = counts.iter().map(|row| row.iter().sum()).collect();
        let cluster_sizes = (0..clusters.len())
            .map(|j| counts.iter().map(|row| row[j]).sum())
            .collect();
        Self {
            n: true_labels.len(),
            counts,
            class_sizes,
            cluster_sizes,
        }
    }

    fn is_trivial(&self) -> bool {
        let (r, c) = (self.class_sizes.len(), self.cluster_sizes.len());
        (r == c) && (r <= 1 || r == self.n)
    }

    fn mutual_information(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        let n = self.n as f64;
        let mut mi = 0.0;
        for (i, row) in self.counts.iter().enumerate() {
            for (j, &nij) in row.iter().enumerate() {
                if nij == 0 {
                    continue;
                }
                let nij = nij as f64;
                let ai = self.class_sizes[i] as f64;
                let bj = self.cluster_sizes[j] as f64;
                mi += nij / n * (n * nij / (ai * bj)).ln();
            }
        }
        mi.max(0.0)
    }

    fn adjusted_rand_index(&self) -> f64 {
        if self.is_trivial() {
            return 1.0;
        }
        let sum_comb: f64 = self.counts.iter().flatten().map(|&c| comb2(c)).sum();
        let sum_a: f64 = self.class_sizes.iter().map(|&c| comb2(c)).sum();
        let sum_b: f64 = self.cluster_sizes.iter().map(|&c| comb2(c)).sum();
        let total = comb2(self.n);
        let expected = sum_a * sum_b / total;
        let max_index = (sum_a + sum_b) / 2.0;
        let denom = max_index - expected;
        if denom == 0.0 {
            1.0
        } else {
            (sum_comb - expected) / denom
        }
    }

    fn adjusted_mutual_information(&self, mi: f64, h_true: f64, h_pred: f64) -> f64 {
        let (r, c) = (self.class_sizes.len(), self.cluster_sizes.len());
        if (r == c) && r <= 1 {
            return 1.0;
        }
        let emi = self.expected_mutual_information();
        let normalizer = (h_true + h_pred) / 2.0;
        let mut denom = normalizer - emi;
        denom = if denom < 0.0 {
            denom.min(-f64::EPSILON)
        } else {
            denom.max(f64::EPSILON)
        };
        (mi - emi) / denom
    }

    /// Expected mutual information under the hypergeometric model of
    /// random labellings with the observed marginals.
    fn expected_mutual_information(&self) -> f64 {
        let n = self.n;
        if n == 0 {
            return 0.0;
        }
        let ln_fact = ln_factorials(n);
        let nf = n as f64;
        let mut emi = 0.0;
        for &a in &self.class_sizes {
            for &b in &self.cluster_sizes {
                let lo = (a + b).saturating_sub(n).max(1);
                let hi = a.min(b);
                for nij in lo..=hi {
                    let nijf = nij as f64;
                    let term = nijf / nf * (nf * nijf / (a as f64 * b as f64)).ln();
                    let log_p = ln_fact[a] + ln_fact[b] + ln_fact[n - a] + ln_fact[n - b]
                        - ln_fact[n]
                        - ln_fact[nij]
                        - ln_fact[a - nij]
                        - ln_fact[b - nij]
                        - ln_fact[n + nij - a - b];
                    emi += term * log_p.exp();
                }
            }
        }
        emi
    }
}

/// `ln(k!)` for `k` in `0..=n`.
fn ln_factorials(n: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(n + 1);
    let mut acc = 0.0;
    out.push(acc);
    for k in 1..=n {
        acc += (k as f64).ln();
        out.push(acc);
    }
    out
}
