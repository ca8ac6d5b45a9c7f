//! Grid search over DBSCAN hyperparameters.
//!
//! Every `(eps, min_samples)` pair is clustered and scored by mean silhouette.
//! The best defined score wins, earliest combination first on ties. When no
//! combination yields a defined score the first one is returned anyway.
//! See: https://rust-ml.github.io/book/4_dbscan.html

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use linfa::prelude::*;
use linfa_clustering::Dbscan;
use ndarray::{Array1, Array2};
use tracing::{debug, info, instrument};

use super::{
    error::{AnalysisError, Result},
    metrics::{pairwise_distances, silhouette_from_distances},
    model::{
        ClusterId, ClusterSize, CombinationResult, DbscanEpsilon, FeatureMatrix, NoisePolicy,
        ParamCombination, Partition, SearchOutcome, SilhouetteScore,
    },
};

/// Cloneable flag a caller flips to abandon a running search.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Keep only the first `n` combinations in enumeration order.
    pub max_combinations: Option<usize>,
    pub noise_policy: NoisePolicy,
    pub cancel: Option<CancelToken>,
}

/// Run the grid search with default options apart from the cap.
pub fn search_best_clustering(
    matrix: &FeatureMatrix,
    eps_range: &[f64],
    min_samples_range: &[usize],
    max_combinations: Option<usize>,
) -> Result<SearchOutcome> {
    search_best_clustering_with(
        matrix,
        eps_range,
        min_samples_range,
        &SearchOptions {
            max_combinations,
            ..Default::default()
        },
    )
}

#[instrument(skip_all, fields(rows = matrix.n_samples(), columns = matrix.n_features()))]
pub fn search_best_clustering_with(
    matrix: &FeatureMatrix,
    eps_range: &[f64],
    min_samples_range: &[usize],
    options: &SearchOptions,
) -> Result<SearchOutcome> {
    let combinations =
        enumerate_combinations(eps_range, min_samples_range, options.max_combinations)?;
    if matrix.n_samples() < 2 {
        return Err(AnalysisError::InsufficientData {
            required: 2,
            actual: matrix.n_samples(),
        });
    }
    info!(combinations = combinations.len(), "starting DBSCAN grid search");

    // Shared by every combination's silhouette, built on first use.
    let mut distances = None;

    let mut results = Vec::with_capacity(combinations.len());
    for combination in combinations {
        if options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            info!(evaluated = results.len(), "grid search cancelled");
            return Err(AnalysisError::Cancelled);
        }
        let partition = cluster(matrix, combination)?;
        let result = score(matrix, &mut distances, combination, partition, options.noise_policy)?;
        debug!(
            params = %result.params,
            clusters = result.n_clusters,
            noise = result.noise_points,
            score = %result.score,
            "evaluated combination"
        );
        results.push(result);
    }

    let best_index = select_best(&results);
    let outcome = SearchOutcome::new(results, best_index);
    info!(
        best = %outcome.best_params(),
        score = %outcome.best_score(),
        "grid search finished"
    );
    Ok(outcome)
}

/// Cluster and score a single combination in isolation.
pub fn evaluate_combination(
    matrix: &FeatureMatrix,
    combination: ParamCombination,
    policy: NoisePolicy,
) -> Result<CombinationResult> {
    let partition = cluster(matrix, combination)?;
    score(matrix, &mut None, combination, partition, policy)
}

/// Cartesian product of the ranges, `eps` outermost, truncated to the first
/// `max_combinations` pairs. All values are validated before anything runs.
pub fn enumerate_combinations(
    eps_range: &[f64],
    min_samples_range: &[usize],
    max_combinations: Option<usize>,
) -> Result<Vec<ParamCombination>> {
    if eps_range.is_empty() || min_samples_range.is_empty() {
        return Err(AnalysisError::InvalidSearchSpace(
            "eps_range and min_samples_range must both be non-empty".into(),
        ));
    }
    if max_combinations == Some(0) {
        return Err(AnalysisError::InvalidSearchSpace(
            "max_combinations must be at least 1".into(),
        ));
    }

    let eps_values = eps_range
        .iter()
        .map(|&e| DbscanEpsilon::try_new(e))
        .collect::<Result<Vec<_>>>()
        .map_err(|e| AnalysisError::InvalidSearchSpace(e.to_string()))?;
    let min_samples_values = min_samples_range
        .iter()
        .map(|&m| ClusterSize::try_new(m))
        .collect::<Result<Vec<_>>>()
        .map_err(|e| AnalysisError::InvalidSearchSpace(e.to_string()))?;

    let cap = max_combinations.unwrap_or(usize::MAX);
    Ok(eps_values
        .iter()
        .flat_map(|&eps| {
            min_samples_values
                .iter()
                .map(move |&min_samples| ParamCombination::new(eps, min_samples))
        })
        .take(cap)
        .collect())
}

/// Stable argmax: a later result only wins with a strictly better score.
/// Falls back to index 0 when every score is undefined.
fn select_best(results: &[CombinationResult]) -> usize {
    let mut best = 0;
    for (i, result) in results.iter().enumerate().skip(1) {
        if result.score > results[best].score {
            best = i;
        }
    }
    best
}

/// linfa requires `min_points >= 2`. At `min_samples == 1` every point is a
/// core point, which is the same as running at 2 and then giving each point
/// left isolated its own cluster.
fn cluster(matrix: &FeatureMatrix, combination: ParamCombination) -> Result<Partition> {
    let records: &Array2<f64> = matrix.as_array();
    let min_samples: usize = combination.min_samples.into();
    let memberships = Dbscan::params(min_samples.max(2))
        .tolerance(combination.eps.into())
        .transform(records)
        .map_err(|e| AnalysisError::Clustering(format!("{}: {}", combination, e)))?;
    let partition = partition_from_memberships(&memberships);
    if min_samples == 1 {
        Ok(isolated_points_as_singletons(partition))
    } else {
        Ok(partition)
    }
}

/// Number every noise point as a new cluster, after the existing ones.
fn isolated_points_as_singletons(partition: Partition) -> Partition {
    let mut next = partition
        .iter()
        .map(ClusterId::value)
        .max()
        .map_or(0, |m| m + 1)
        .max(0);
    partition
        .into_iter()
        .map(|id| {
            if id.is_noise() {
                next += 1;
                ClusterId::from(next - 1)
            } else {
                id
            }
        })
        .collect()
}

fn partition_from_memberships(memberships: &Array1<Option<usize>>) -> Partition {
    memberships
        .iter()
        .map(|m| match m {
            Some(id) => ClusterId::from(*id as i64),
            None => ClusterId::NOISE,
        })
        .collect()
}

/// Partitions with fewer than two clusters are undefined without looking at
/// distances, so `distances` is only filled once a partition needs it.
fn score(
    matrix: &FeatureMatrix,
    distances: &mut Option<Array2<f64>>,
    params: ParamCombination,
    partition: Partition,
    policy: NoisePolicy,
) -> Result<CombinationResult> {
    let score = if partition.n_clusters() < 2 {
        SilhouetteScore::Undefined
    } else {
        let distances = distances.get_or_insert_with(|| {
            debug!(rows = matrix.n_samples(), "computing pairwise distances");
            pairwise_distances(matrix.as_array())
        });
        silhouette_from_distances(distances, &partition, policy)?
    };
    Ok(CombinationResult {
        params,
        n_clusters: partition.n_clusters(),
        noise_points: partition.noise_count(),
        partition,
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two groups of five points around (0,0) and (10,10).
    fn two_blobs() -> FeatureMatrix {
        let jitter = [(0.0, 0.0), (0.1, 0.0), (0.0, 0.1), (-0.1, 0.05), (0.05, -0.1)];
        let rows = [(0.0, 0.0), (10.0, 10.0)]
            .iter()
            .flat_map(|&(cx, cy)| jitter.iter().map(move |&(dx, dy)| vec![cx + dx, cy + dy]))
            .collect();
        FeatureMatrix::from_rows(rows).unwrap()
    }

    fn fake_result(score: SilhouetteScore) -> CombinationResult {
        CombinationResult {
            params: ParamCombination::new(
                DbscanEpsilon::try_new(1.0).unwrap(),
                ClusterSize::try_new(2).unwrap(),
            ),
            partition: Partition::default(),
            n_clusters: 0,
            noise_points: 0,
            score,
        }
    }

    #[test]
    fn test_two_blobs() {
        let outcome =
            search_best_clustering(&two_blobs(), &[0.5, 1.0, 5.0], &[2, 3], None).unwrap();
        assert_eq!(outcome.len(), 6);

        let best = outcome.best();
        assert_eq!(best.n_clusters, 2);
        assert_eq!(best.noise_points, 0);
        assert!(best.score.value().unwrap() > 0.95);
        // Every combination separates the blobs equally well, so the first wins.
        assert_eq!(outcome.best_index(), 0);
    }

    #[test]
    fn test_all_noise_falls_back_to_first() {
        let rows = (0..5).map(|i| vec![100.0 * i as f64, 0.0]).collect();
        let matrix = FeatureMatrix::from_rows(rows).unwrap();
        let outcome = search_best_clustering(&matrix, &[0.5, 1.0], &[2, 3], None).unwrap();

        assert_eq!(outcome.len(), 4);
        for result in outcome.results() {
            assert_eq!(result.n_clusters, 0);
            assert_eq!(result.noise_points, 5);
            assert_eq!(result.score, SilhouetteScore::Undefined);
        }
        assert_eq!(outcome.best_index(), 0);
        assert_eq!(*outcome.best_params().eps, 0.5);
        assert_eq!(*outcome.best_params().min_samples, 2);
        assert!(outcome.best_partition().iter().all(ClusterId::is_noise));
    }

    #[test]
    fn test_truncation_keeps_enumeration_order() {
        let combos = enumerate_combinations(&[0.1, 0.2, 0.3], &[2, 4], Some(3)).unwrap();
        let pairs: Vec<(f64, usize)> = combos
            .iter()
            .map(|c| (*c.eps, *c.min_samples))
            .collect();
        assert_eq!(pairs, vec![(0.1, 2), (0.1, 4), (0.2, 2)]);

        let all = enumerate_combinations(&[0.1, 0.2, 0.3], &[2, 4], Some(100)).unwrap();
        assert_eq!(all.len(), 6);
    }

    #[test]
    fn test_invalid_search_space() {
        let m = two_blobs();
        for (eps, min) in [(vec![], vec![2]), (vec![0.5], vec![]), (vec![-1.0], vec![2]), (vec![0.5], vec![0])] {
            assert!(matches!(
                search_best_clustering(&m, &eps, &min, None),
                Err(AnalysisError::InvalidSearchSpace(_))
            ));
        }
        assert!(matches!(
            search_best_clustering(&m, &[0.5], &[2], Some(0)),
            Err(AnalysisError::InvalidSearchSpace(_))
        ));
    }

    #[test]
    fn test_insufficient_data() {
        let m = FeatureMatrix::from_rows(vec![vec![1.0, 2.0]]).unwrap();
        assert!(matches!(
            search_best_clustering(&m, &[0.5], &[2], None),
            Err(AnalysisError::InsufficientData {
                required: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_select_best_is_stable() {
        use SilhouetteScore::*;
        let results = vec![
            fake_result(Undefined),
            fake_result(Defined(0.4)),
            fake_result(Defined(0.7)),
            fake_result(Defined(0.7)),
            fake_result(Defined(-0.2)),
        ];
        assert_eq!(select_best(&results), 2);
        assert_eq!(select_best(&[fake_result(Undefined), fake_result(Undefined)]), 0);
    }

    #[test]
    fn test_cancelled_search() {
        let token = CancelToken::new();
        token.cancel();
        let options = SearchOptions {
            cancel: Some(token),
            ..Default::default()
        };
        let result = search_best_clustering_with(&two_blobs(), &[0.5], &[2], &options);
        assert!(matches!(result, Err(AnalysisError::Cancelled)));
    }

    #[test]
    fn test_min_samples_one_makes_singletons() {
        let matrix = FeatureMatrix::from_rows(vec![
            vec![0.0],
            vec![0.1],
            vec![5.0],
            vec![0.2],
            vec![9.0],
        ])
        .unwrap();
        let combination = ParamCombination::new(
            DbscanEpsilon::try_new(0.5).unwrap(),
            ClusterSize::try_new(1).unwrap(),
        );
        let result = evaluate_combination(&matrix, combination, NoisePolicy::Exclude).unwrap();
        assert_eq!(result.partition.labels(), vec![0, 0, 1, 0, 2]);
        assert_eq!(result.n_clusters, 3);
        assert_eq!(result.noise_points, 0);

        let outcome = search_best_clustering(&matrix, &[0.5], &[1, 2], None).unwrap();
        assert_eq!(outcome.len(), 2);
        assert_eq!(outcome.results()[1].noise_points, 2);
    }

    #[test]
    fn test_isolated_points_as_singletons() {
        let p = Partition::from_labels([-1, 0, -1, 1, 0]);
        assert_eq!(isolated_points_as_singletons(p).labels(), vec![2, 0, 3, 1, 0]);
        let all_noise = Partition::from_labels([-1, -1]);
        assert_eq!(isolated_points_as_singletons(all_noise).labels(), vec![0, 1]);
    }

    #[test]
    fn test_distances_built_only_when_needed() {
        let matrix = two_blobs();
        let combination = ParamCombination::new(
            DbscanEpsilon::try_new(1.0).unwrap(),
            ClusterSize::try_new(2).unwrap(),
        );
        let mut cache = None;

        let degenerate = Partition::from_labels(vec![-1; 10]);
        let result = score(&matrix, &mut cache, combination, degenerate, NoisePolicy::Exclude).unwrap();
        assert_eq!(result.score, SilhouetteScore::Undefined);
        assert!(cache.is_none());

        let split = Partition::from_labels([0, 0, 0, 0, 0, 1, 1, 1, 1, 1]);
        let result = score(&matrix, &mut cache, combination, split, NoisePolicy::Exclude).unwrap();
        assert!(result.score.value().unwrap() > 0.95);
        assert_eq!(cache.as_ref().map(|d| d.dim()), Some((10, 10)));
    }

    #[test]
    fn test_evaluate_combination() {
        let combination = ParamCombination::new(
            DbscanEpsilon::try_new(1.0).unwrap(),
            ClusterSize::try_new(3).unwrap(),
        );
        let result = evaluate_combination(&two_blobs(), combination, NoisePolicy::Exclude).unwrap();
        assert_eq!(result.n_clusters, 2);
        assert_eq!(result.partition.len(), 10);
    }
}
