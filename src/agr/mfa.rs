//! Multiple factor analysis.
//!
//! Each column group is weighted by `1 / sqrt(λ₁)`, where `λ₁` is the leading
//! eigenvalue of a PCA on that group alone, so that no block dominates the
//! shared space through its width or variance. A global PCA over the
//! concatenated weighted blocks then produces the factors.

use std::collections::BTreeSet;

use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2, concatenate};
use ndarray_linalg::{Eigh, UPLO};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{
    error::{AnalysisError, Result},
    model::FeatureMatrix,
};

/// Eigenvalues at or below this are treated as zero variance.
const MIN_EIGENVALUE: f64 = 1e-12;

/// Principal component analysis fitted on centered data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pca {
    mean: Array1<f64>,
    /// (n_features, n_components), one component per column.
    components: Array2<f64>,
    explained_variance: Array1<f64>,
}

impl Pca {
    /// Fit the leading `n_components` components of `x`.
    pub fn fit<S>(x: &ArrayBase<S, Ix2>, n_components: usize) -> Result<Self>
    where
        S: Data<Elem = f64>,
    {
        let (n_samples, n_features) = x.dim();
        if n_samples < 2 {
            return Err(AnalysisError::InsufficientData {
                required: 2,
                actual: n_samples,
            });
        }
        if n_components == 0 || n_components > n_features {
            return Err(AnalysisError::InvalidComponentCount {
                requested: n_components,
                available: n_features,
            });
        }

        let mean = x.mean_axis(Axis(0)).ok_or(AnalysisError::InsufficientData {
            required: 2,
            actual: n_samples,
        })?;
        let centered = x - &mean;
        let covariance = centered.t().dot(&centered) / (n_samples - 1) as f64;

        // Eigh returns eigenvalues ascending.
        let (eigenvalues, eigenvectors) = covariance.eigh(UPLO::Lower)?;
        let mut order: Vec<usize> = (0..n_features).collect();
        order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]));
        order.truncate(n_components);

        let mut components = eigenvectors.select(Axis(1), &order);
        for mut column in components.columns_mut() {
            let pivot = column
                .iter()
                .copied()
                .fold(0.0f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
            if pivot < 0.0 {
                column.mapv_inplace(|v| -v);
            }
        }
        let explained_variance = order.iter().map(|&i| eigenvalues[i].max(0.0)).collect();

        Ok(Self {
            mean,
            components,
            explained_variance,
        })
    }

    pub fn transform<S>(&self, x: &ArrayBase<S, Ix2>) -> Result<Array2<f64>>
    where
        S: Data<Elem = f64>,
    {
        if x.ncols() != self.mean.len() {
            return Err(AnalysisError::LengthMismatch {
                expected: self.mean.len(),
                found: x.ncols(),
            });
        }
        Ok((x - &self.mean).dot(&self.components))
    }

    pub fn components(&self) -> &Array2<f64> {
        &self.components
    }

    /// Variance along each retained component, descending.
    pub fn explained_variance(&self) -> &Array1<f64> {
        &self.explained_variance
    }

    pub fn leading_eigenvalue(&self) -> f64 {
        self.explained_variance[0]
    }
}

/// Disjoint, non-empty, ordered groups of column indices covering every
/// column exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupSpec(Vec<Vec<usize>>);

impl GroupSpec {
    pub fn try_new(groups: Vec<Vec<usize>>, n_columns: usize) -> Result<Self> {
        if groups.is_empty() {
            return Err(AnalysisError::InvalidGroupSpecification(
                "at least one group is required".into(),
            ));
        }
        let mut seen = BTreeSet::new();
        for (g, group) in groups.iter().enumerate() {
            if group.is_empty() {
                return Err(AnalysisError::InvalidGroupSpecification(format!(
                    "group {} is empty",
                    g
                )));
            }
            for &column in group {
                if column >= n_columns {
                    return Err(AnalysisError::InvalidGroupSpecification(format!(
                        "group {} names column {}, but the matrix has {} columns",
                        g, column, n_columns
                    )));
                }
                if !seen.insert(column) {
                    return Err(AnalysisError::InvalidGroupSpecification(format!(
                        "column {} appears in more than one group",
                        column
                    )));
                }
            }
        }
        if seen.len() != n_columns {
            return Err(AnalysisError::InvalidGroupSpecification(format!(
                "groups cover {} of {} columns",
                seen.len(),
                n_columns
            )));
        }
        Ok(Self(groups))
    }

    /// A single group holding every column.
    pub fn whole(n_columns: usize) -> Result<Self> {
        Self::try_new(vec![(0..n_columns).collect()], n_columns)
    }

    pub fn groups(&self) -> &[Vec<usize>] {
        &self.0
    }

    pub fn n_columns(&self) -> usize {
        self.0.iter().map(Vec::len).sum()
    }
}

/// The MFA output, (n_samples, n_components_global).
pub type GlobalFactors = FeatureMatrix;

/// Fitted group weights and global projection, reusable on new rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedMfa {
    groups: GroupSpec,
    group_eigenvalues: Vec<f64>,
    global: Pca,
}

impl FittedMfa {
    #[instrument(skip_all, fields(rows = matrix.n_samples(), groups = groups.groups().len()))]
    pub fn fit(
        matrix: &FeatureMatrix,
        groups: &GroupSpec,
        n_components_global: usize,
    ) -> Result<Self> {
        if groups.n_columns() != matrix.n_features() {
            return Err(AnalysisError::InvalidGroupSpecification(format!(
                "groups cover {} columns, but the matrix has {}",
                groups.n_columns(),
                matrix.n_features()
            )));
        }
        if n_components_global == 0 || n_components_global > matrix.n_features() {
            return Err(AnalysisError::InvalidComponentCount {
                requested: n_components_global,
                available: matrix.n_features(),
            });
        }
        if matrix.n_samples() < 2 {
            return Err(AnalysisError::InsufficientData {
                required: 2,
                actual: matrix.n_samples(),
            });
        }

        let group_eigenvalues = groups
            .groups()
            .iter()
            .map(|columns| {
                let block = matrix.select(Axis(1), columns);
                Pca::fit(&block, 1).map(|pca| pca.leading_eigenvalue())
            })
            .collect::<Result<Vec<f64>>>()?;
        debug!(?group_eigenvalues, "fitted group weights");

        let weights = weights_from_eigenvalues(&group_eigenvalues);
        let weighted = weight_blocks(matrix.as_array(), groups, &weights)?;
        let global = Pca::fit(&weighted, n_components_global)?;
        Ok(Self {
            groups: groups.clone(),
            group_eigenvalues,
            global,
        })
    }

    /// Project rows with the same column layout as the fitted matrix.
    pub fn transform(&self, matrix: &FeatureMatrix) -> Result<GlobalFactors> {
        if matrix.n_features() != self.groups.n_columns() {
            return Err(AnalysisError::LengthMismatch {
                expected: self.groups.n_columns(),
                found: matrix.n_features(),
            });
        }
        let weighted = self.weighted_blocks(matrix.as_array())?;
        let factors = self.global.transform(&weighted)?;
        if factors.iter().any(|v| !v.is_finite()) {
            warn!("MFA produced non-finite factors");
        }
        Ok(FeatureMatrix::new(factors))
    }

    fn weighted_blocks(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        weight_blocks(x, &self.groups, &self.group_weights())
    }

    /// `1 / sqrt(λ₁)` per group, or 1 for a group without variance.
    pub fn group_weights(&self) -> Vec<f64> {
        weights_from_eigenvalues(&self.group_eigenvalues)
    }

    pub fn group_eigenvalues(&self) -> &[f64] {
        &self.group_eigenvalues
    }

    pub fn explained_variance(&self) -> &Array1<f64> {
        self.global.explained_variance()
    }

    pub fn global_components(&self) -> &Array2<f64> {
        self.global.components()
    }

    pub fn groups(&self) -> &GroupSpec {
        &self.groups
    }
}

fn weights_from_eigenvalues(eigenvalues: &[f64]) -> Vec<f64> {
    eigenvalues
        .iter()
        .map(|&l| if l > MIN_EIGENVALUE { 1.0 / l.sqrt() } else { 1.0 })
        .collect()
}

/// Each group's columns scaled by its weight, concatenated in group order.
fn weight_blocks(x: &Array2<f64>, groups: &GroupSpec, weights: &[f64]) -> Result<Array2<f64>> {
    let blocks: Vec<Array2<f64>> = groups
        .groups()
        .iter()
        .zip(weights)
        .map(|(columns, &weight)| x.select(Axis(1), columns) * weight)
        .collect();
    let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
    Ok(concatenate(Axis(1), &views)?)
}

/// Fit MFA on `matrix` and project it onto `n_components_global` factors.
pub fn reduce_mfa(
    matrix: &FeatureMatrix,
    groups: &GroupSpec,
    n_components_global: usize,
) -> Result<GlobalFactors> {
    FittedMfa::fit(matrix, groups, n_components_global)?.transform(matrix)
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn six_by_five() -> FeatureMatrix {
        FeatureMatrix::new(array![
            [1.2, -0.3, 0.5, 1.0, 0.0],
            [-0.7, 0.8, -1.1, 0.0, 1.0],
            [0.3, 1.5, 0.9, 1.0, 0.0],
            [-1.4, -0.6, 0.2, 0.0, 1.0],
            [0.9, -1.2, -0.8, 1.0, 0.0],
            [-0.3, -0.2, 0.3, 0.0, 0.0],
        ])
    }

    #[test]
    fn test_pca_recovers_dominant_axis() {
        let x = array![[-2.0, 0.1], [-1.0, -0.1], [0.0, 0.05], [1.0, -0.05], [2.0, 0.0]];
        let pca = Pca::fit(&x, 1).unwrap();
        let c = pca.components();
        assert!((c[[0, 0]].abs() - 1.0).abs() < 1e-3);
        assert!(c[[0, 0]] > 0.0);
        assert!((pca.leading_eigenvalue() - 2.5).abs() < 1e-2);
    }

    #[test]
    fn test_two_group_shape() {
        let m = six_by_five();
        let groups = GroupSpec::try_new(vec![vec![0, 1], vec![2, 3, 4]], 5).unwrap();
        let factors = reduce_mfa(&m, &groups, 2).unwrap();
        assert_eq!(factors.dim(), (6, 2));
        assert!(factors.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_single_group_matches_pca_directions() {
        let m = six_by_five();
        let fitted = FittedMfa::fit(&m, &GroupSpec::whole(5).unwrap(), 5).unwrap();
        let factors = fitted.transform(&m).unwrap();
        let pca_scores = Pca::fit(m.as_array(), 5).unwrap().transform(m.as_array()).unwrap();

        // The single weight only rescales the projection.
        let scale = fitted.group_eigenvalues()[0].sqrt();
        for (col_mfa, col_pca) in factors.columns().into_iter().zip(pca_scores.columns()) {
            let same = col_mfa
                .iter()
                .zip(col_pca.iter())
                .all(|(a, b)| (a * scale - b).abs() < 1e-6);
            let flipped = col_mfa
                .iter()
                .zip(col_pca.iter())
                .all(|(a, b)| (a * scale + b).abs() < 1e-6);
            assert!(same || flipped);
        }
    }

    #[test]
    fn test_weights_equalize_blocks() {
        // Second block is the first scaled by 100; after weighting both lead
        // with unit eigenvalue.
        let base = six_by_five().as_array().select(Axis(1), &[0, 1]);
        let wide = concatenate(Axis(1), &[base.view(), (&base * 100.0).view()]).unwrap();
        let m = FeatureMatrix::new(wide);
        let groups = GroupSpec::try_new(vec![vec![0, 1], vec![2, 3]], 4).unwrap();
        let fitted = FittedMfa::fit(&m, &groups, 2).unwrap();
        let eig = fitted.group_eigenvalues();
        assert!((eig[1] / eig[0] - 10_000.0).abs() < 1e-6);

        let weighted = fitted.weighted_blocks(m.as_array()).unwrap();
        let left = weighted.select(Axis(1), &[0, 1]);
        let right = weighted.select(Axis(1), &[2, 3]);
        assert!((&left - &right).iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_constant_group_does_not_divide_by_zero() {
        let m = FeatureMatrix::new(array![[1.0, 5.0], [2.0, 5.0], [3.0, 5.0]]);
        let groups = GroupSpec::try_new(vec![vec![0], vec![1]], 2).unwrap();
        let fitted = FittedMfa::fit(&m, &groups, 1).unwrap();
        assert_eq!(fitted.group_weights()[1], 1.0);
        assert!(fitted.transform(&m).unwrap().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_invalid_component_count() {
        let m = six_by_five();
        let groups = GroupSpec::try_new(vec![vec![0, 1], vec![2, 3, 4]], 5).unwrap();
        for n in [0, 6] {
            assert!(matches!(
                reduce_mfa(&m, &groups, n),
                Err(AnalysisError::InvalidComponentCount { .. })
            ));
        }
    }

    #[test]
    fn test_group_spec_validation() {
        assert!(GroupSpec::try_new(vec![], 2).is_err());
        assert!(GroupSpec::try_new(vec![vec![0], vec![]], 1).is_err());
        assert!(GroupSpec::try_new(vec![vec![0, 1], vec![1]], 2).is_err());
        assert!(GroupSpec::try_new(vec![vec![0]], 2).is_err());
        assert!(GroupSpec::try_new(vec![vec![0, 2]], 2).is_err());
        assert!(GroupSpec::try_new(vec![vec![1], vec![0]], 2).is_ok());
    }

    #[test]
    fn test_transform_new_rows() {
        let m = six_by_five();
        let groups = GroupSpec::try_new(vec![vec![0, 1], vec![2, 3, 4]], 5).unwrap();
        let fitted = FittedMfa::fit(&m, &groups, 2).unwrap();
        let fresh = FeatureMatrix::new(array![[0.0, 0.0, 0.0, 0.5, 0.5]]);
        assert_eq!(fitted.transform(&fresh).unwrap().dim(), (1, 2));
        let wrong = FeatureMatrix::new(array![[0.0, 0.0]]);
        assert!(fitted.transform(&wrong).is_err());
    }
}
