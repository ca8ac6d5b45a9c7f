use std::{cmp::Ordering, collections::BTreeSet, fmt};

use derive_more::{AsRef, Deref, Display, From, Into, IntoIterator};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};

use super::error::{AnalysisError, Result};

// ========================================================================
// Feature matrix

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, From, Into, Display)]
#[display("{{ rows:{} columns:{} }}", self.0.0, self.0.1)]
pub struct Shape((usize, usize));

/// Dense (n_samples, n_features) matrix handed to the clustering core.
/// Rows map 1:1 to input records; column order is fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From, Into, Deref, AsRef)]
#[serde(transparent)]
pub struct FeatureMatrix(Array2<f64>);

impl FeatureMatrix {
    pub fn new(values: Array2<f64>) -> Self {
        Self(values)
    }

    /// Build a matrix from row vectors, which must all share one length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some(bad) = rows.iter().find(|r| r.len() != n_cols) {
            return Err(AnalysisError::LengthMismatch {
                expected: n_cols,
                found: bad.len(),
            });
        }
        let shape: Shape = (rows.len(), n_cols).into();
        let flattened = rows.into_iter().flatten().collect::<Vec<f64>>();
        Ok(Self(Array2::from_shape_vec(shape.0, flattened)?))
    }

    pub fn shape(&self) -> Shape {
        self.0.dim().into()
    }

    pub fn n_samples(&self) -> usize {
        self.0.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.0.ncols()
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.0
    }
}

// ========================================================================
// Partitions

/// A cluster identifier. Non-noise clusters are numbered from 0.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    From,
    Into,
    Display,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ClusterId(i64);

impl ClusterId {
    /// The identifier reserved for points that belong to no dense region.
    pub const NOISE: Self = ClusterId(-1);

    pub fn is_noise(&self) -> bool {
        *self == Self::NOISE
    }

    pub fn is_signal(&self) -> bool {
        !self.is_noise()
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

/// Assignment of every row to a [`ClusterId`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, From, Into, Deref, IntoIterator, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Partition(#[into_iterator(owned, ref)] Vec<ClusterId>);

impl FromIterator<ClusterId> for Partition {
    fn from_iter<T: IntoIterator<Item = ClusterId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Partition {
    pub fn from_labels<I: IntoIterator<Item = i64>>(labels: I) -> Self {
        labels.into_iter().map(ClusterId::from).collect()
    }

    /// Plain integer labels, noise as -1.
    pub fn labels(&self) -> Vec<i64> {
        self.0.iter().map(ClusterId::value).collect()
    }

    /// Distinct non-noise identifiers, ascending.
    pub fn signal_ids(&self) -> BTreeSet<ClusterId> {
        self.0.iter().filter(|c| c.is_signal()).copied().collect()
    }

    pub fn n_clusters(&self) -> usize {
        self.signal_ids().len()
    }

    pub fn noise_count(&self) -> usize {
        self.0.iter().filter(|c| c.is_noise()).count()
    }

    /// Percentage of rows labelled noise; 0 for an empty partition.
    pub fn noise_percentage(&self) -> f64 {
        if self.0.is_empty() {
            0.0
        } else {
            self.noise_count() as f64 / self.0.len() as f64 * 100.0
        }
    }
}

// ========================================================================
// Search parameters

/// Newtype for `min_samples`, the number of points (the point itself
/// included) a neighbourhood must hold to be dense. Enforces `>= 1`; at 1
/// every point is a core point.
#[derive(
    Debug, Copy, Clone, Hash, PartialEq, Eq, Into, AsRef, Deref, Serialize, Deserialize, Display,
)]
#[serde(try_from = "usize", into = "usize")]
pub struct ClusterSize(usize);

impl ClusterSize {
    pub const MIN: ClusterSize = ClusterSize(1);
    pub const MAX: ClusterSize = ClusterSize(usize::MAX);

    /// Panics if `size` is outside `MIN..=MAX`.
    fn new_unchecked(size: usize) -> Self {
        assert!(
            (Self::MIN.0 <= size) && (size <= Self::MAX.0),
            "Invalid value {}; must be {} ≤ N ≤ {}.",
            size,
            Self::MIN,
            Self::MAX
        );
        Self(size)
    }

    pub fn try_new(size: usize) -> Result<Self> {
        if (size < ClusterSize::MIN.0) || (ClusterSize::MAX.0 < size) {
            Err(AnalysisError::InvalidParameter {
                name: "min_samples",
                message: format!("{} must be {} ≤ N ≤ {}", size, Self::MIN, Self::MAX),
            })
        } else {
            Ok(Self::new_unchecked(size))
        }
    }
}

impl TryFrom<usize> for ClusterSize {
    type Error = AnalysisError;

    fn try_from(value: usize) -> std::result::Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

/// Newtype for the DBSCAN neighbourhood radius. Must be finite and > 0.
#[derive(
    Debug, Copy, Clone, PartialEq, PartialOrd, Into, AsRef, Deref, Serialize, Deserialize, Display,
)]
#[serde(try_from = "f64", into = "f64")]
pub struct DbscanEpsilon(f64);

impl DbscanEpsilon {
    /// Panics if `value` is not a finite positive number.
    fn new_unchecked(value: f64) -> Self {
        assert!(
            value.is_finite() && value > 0.0,
            "invalid value {}; must be finite and > 0",
            value
        );
        Self(value)
    }

    pub fn try_new(epsilon: f64) -> Result<Self> {
        match epsilon {
            _ if epsilon.is_finite() && epsilon > 0.0 => Ok(Self::new_unchecked(epsilon)),
            _ => Err(AnalysisError::InvalidParameter {
                name: "eps",
                message: format!("{} must be finite and > 0", epsilon),
            }),
        }
    }
}

impl TryFrom<f64> for DbscanEpsilon {
    type Error = AnalysisError;

    fn try_from(value: f64) -> std::result::Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

/// One point of the search grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Display)]
#[display("eps={} min_samples={}", eps, min_samples)]
pub struct ParamCombination {
    pub eps: DbscanEpsilon,
    pub min_samples: ClusterSize,
}

impl ParamCombination {
    pub fn new(eps: DbscanEpsilon, min_samples: ClusterSize) -> Self {
        Self { eps, min_samples }
    }
}

/// How noise points take part in the silhouette computation.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoStaticStr,
    EnumString,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NoisePolicy {
    /// Noise points are left out of the score entirely.
    #[default]
    Exclude,
    /// Noise is scored as if it were one more cluster.
    AsCluster,
}

// ========================================================================
// Scores and results

/// Mean silhouette coefficient, or `Undefined` when it cannot be computed.
/// `Undefined` orders below every defined score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SilhouetteScore {
    Defined(f64),
    Undefined,
}

impl SilhouetteScore {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Defined(v) => Some(*v),
            Self::Undefined => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Self::Defined(_))
    }
}

impl PartialOrd for SilhouetteScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Undefined, Self::Undefined) => Some(Ordering::Equal),
            (Self::Undefined, Self::Defined(_)) => Some(Ordering::Less),
            (Self::Defined(_), Self::Undefined) => Some(Ordering::Greater),
            (Self::Defined(a), Self::Defined(b)) => a.partial_cmp(b),
        }
    }
}

impl fmt::Display for SilhouetteScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defined(v) => write!(f, "{:.4}", v),
            Self::Undefined => write!(f, "undefined"),
        }
    }
}

/// Outcome of clustering with a single [`ParamCombination`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinationResult {
    pub params: ParamCombination,
    pub partition: Partition,
    pub n_clusters: usize,
    pub noise_points: usize,
    pub score: SilhouetteScore,
}

/// Every evaluated combination in search order, plus the winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    results: Vec<CombinationResult>,
    best_index: usize,
}

impl SearchOutcome {
    /// `best_index` must point into `results`.
    pub(crate) fn new(results: Vec<CombinationResult>, best_index: usize) -> Self {
        debug_assert!(best_index < results.len());
        Self {
            results,
            best_index,
        }
    }

    pub fn results(&self) -> &[CombinationResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn best_index(&self) -> usize {
        self.best_index
    }

    pub fn best(&self) -> &CombinationResult {
        &self.results[self.best_index]
    }

    pub fn best_params(&self) -> ParamCombination {
        self.best().params
    }

    pub fn best_partition(&self) -> &Partition {
        &self.best().partition
    }

    pub fn best_score(&self) -> SilhouetteScore {
        self.best().score
    }

    pub fn into_results(self) -> Vec<CombinationResult> {
        self.results
    }
}
