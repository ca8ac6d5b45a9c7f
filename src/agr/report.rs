//! End-to-end clustering of a raw table: label extraction, preprocessing,
//! optional MFA, grid search, and evaluation against the label column.

use std::fmt::Display;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{
    align::align_labels_with_categories,
    error::AnalysisError,
    metrics::{ExternalMetrics, external_metrics},
    model::{NoisePolicy, ParamCombination, Partition, SearchOutcome, SilhouetteScore},
    preprocess::{ColumnKind, Frame, Pipeline, RawTable, TypedTable},
    search::{CancelToken, SearchOptions, search_best_clustering_with},
};

/// Knobs for one clustering run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringParams {
    pub eps_range: Vec<f64>,
    pub min_samples_range: Vec<usize>,
    /// Column holding ground-truth labels. Negative values count from the
    /// end, so -1 is the last column. `None` means there is no label column.
    pub label_column_index: Option<isize>,
    pub max_combinations: Option<usize>,
    pub noise_policy: NoisePolicy,
    /// Project onto this many MFA factors before clustering.
    pub mfa_components: Option<usize>,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            eps_range: vec![0.1, 0.5, 1.0],
            min_samples_range: vec![5, 10, 15],
            label_column_index: Some(-1),
            max_combinations: Some(9),
            noise_policy: NoisePolicy::default(),
            mfa_components: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingSummary {
    pub rows_before_processing: usize,
    pub numeric_columns: Vec<String>,
    pub categorical_columns: Vec<String>,
    pub label_column: Option<String>,
    /// Width of the matrix handed to the grid search.
    pub feature_dimensions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinationSummary {
    pub params: ParamCombination,
    pub n_clusters: usize,
    pub noise_points: usize,
    pub silhouette_score: SilhouetteScore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSearchSummary {
    pub parameter_combinations_tested: usize,
    pub best_parameters: ParamCombination,
    pub all_results: Vec<CombinationSummary>,
}

impl From<&SearchOutcome> for GridSearchSummary {
    fn from(outcome: &SearchOutcome) -> Self {
        Self {
            parameter_combinations_tested: outcome.len(),
            best_parameters: outcome.best_params(),
            all_results: outcome
                .results()
                .iter()
                .map(|r| CombinationSummary {
                    params: r.params,
                    n_clusters: r.n_clusters,
                    noise_points: r.noise_points,
                    silhouette_score: r.score,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringSummary {
    pub number_of_clusters: usize,
    pub noise_points: usize,
    pub noise_percentage: f64,
    pub silhouette_coefficient: SilhouetteScore,
    /// Computed on the raw partition; present when a label column was given.
    pub external_metrics: Option<ExternalMetrics>,
    /// Best partition expressed as majority true labels, `None` for noise.
    pub aligned_labels: Option<Vec<Option<String>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringReport {
    pub preprocessing: PreprocessingSummary,
    pub grid_search: GridSearchSummary,
    pub clustering: ClusteringSummary,
    /// The winning partition, one identifier per input row.
    pub labels: Partition,
}

impl Display for ClusteringReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let p = &self.preprocessing;
        writeln!(
            f,
            "rows: {}  numeric: [{}]  categorical: [{}]  label: {}",
            p.rows_before_processing,
            p.numeric_columns.join(", "),
            p.categorical_columns.join(", "),
            p.label_column.as_deref().unwrap_or("-"),
        )?;
        writeln!(
            f,
            "grid search: {} combinations, best {}",
            self.grid_search.parameter_combinations_tested, self.grid_search.best_parameters
        )?;
        for r in &self.grid_search.all_results {
            writeln!(
                f,
                "  |__ {}: {} clusters, {} noise, silhouette {}",
                r.params, r.n_clusters, r.noise_points, r.silhouette_score
            )?;
        }
        let c = &self.clustering;
        writeln!(
            f,
            "clusters: {}  noise: {} ({:.1}%)  silhouette: {}",
            c.number_of_clusters, c.noise_points, c.noise_percentage, c.silhouette_coefficient
        )?;
        if let Some(m) = &c.external_metrics {
            writeln!(
                f,
                "homogeneity: {:.4}  completeness: {:.4}  v-measure: {:.4}  ARI: {:.4}  AMI: {:.4}",
                m.homogeneity,
                m.completeness,
                m.v_measure,
                m.adjusted_rand_index,
                m.adjusted_mutual_information
            )?;
        }
        Ok(())
    }
}

/// Resolve a possibly negative column index against `n_columns`.
fn resolve_label_column(index: isize, n_columns: usize) -> Result<usize, AnalysisError> {
    let resolved = if index < 0 {
        n_columns as isize + index
    } else {
        index
    };
    if resolved < 0 || resolved as usize >= n_columns {
        return Err(AnalysisError::InvalidLabelColumn { index, n_columns });
    }
    Ok(resolved as usize)
}

/// Cluster `table` with the given parameters.
pub fn run_clustering(table: RawTable, params: &ClusteringParams) -> Result<ClusteringReport> {
    run_clustering_with_cancel(table, params, None)
}

#[instrument(skip_all, fields(rows = table.n_rows(), columns = table.columns().len()))]
pub fn run_clustering_with_cancel(
    mut table: RawTable,
    params: &ClusteringParams,
    cancel: Option<CancelToken>,
) -> Result<ClusteringReport> {
    let (label_column, true_labels) = match params.label_column_index {
        Some(index) => {
            let column = resolve_label_column(index, table.columns().len())?;
            let (name, values) = table
                .remove_column(column)
                .context("run_clustering(): remove label column")?;
            let labels: Vec<String> = values
                .into_iter()
                .map(|v| v.map(|s| s.trim().to_owned()).unwrap_or_default())
                .collect();
            (Some(name), Some(labels))
        }
        None => (None, None),
    };

    let typed = TypedTable::from_raw(&table);
    let numeric_columns = typed.names_of(ColumnKind::Numeric);
    let categorical_columns = typed.names_of(ColumnKind::Categorical);
    if numeric_columns.is_empty() && categorical_columns.is_empty() {
        bail!("run_clustering(): no feature columns left to cluster");
    }

    let pipeline = match params.mfa_components {
        Some(n) => Pipeline::with_mfa(n),
        None => Pipeline::default(),
    };
    let (_, frame) = pipeline
        .fit_transform(Frame::Table(typed))
        .context("run_clustering(): preprocessing")?;
    let encoded = frame.into_matrix()?;

    let options = SearchOptions {
        max_combinations: params.max_combinations,
        noise_policy: params.noise_policy,
        cancel,
    };
    let outcome = search_best_clustering_with(
        &encoded.matrix,
        &params.eps_range,
        &params.min_samples_range,
        &options,
    )
    .context("run_clustering(): grid search")?;
    let best = outcome.best();

    let (metrics, aligned) = match &true_labels {
        Some(labels) => {
            let metrics = external_metrics(labels, &best.partition)?;
            let alignment = align_labels_with_categories(labels, &best.partition)?;
            let aligned = (0..labels.len())
                .map(|row| alignment.label_of(row).cloned())
                .collect();
            (Some(metrics), Some(aligned))
        }
        None => (None, None),
    };

    info!(
        clusters = best.n_clusters,
        noise = best.noise_points,
        score = %best.score,
        "clustering finished"
    );

    Ok(ClusteringReport {
        preprocessing: PreprocessingSummary {
            rows_before_processing: table.n_rows(),
            numeric_columns,
            categorical_columns,
            label_column,
            feature_dimensions: encoded.matrix.n_features(),
        },
        grid_search: GridSearchSummary::from(&outcome),
        clustering: ClusteringSummary {
            number_of_clusters: best.n_clusters,
            noise_points: best.noise_points,
            noise_percentage: best.partition.noise_percentage(),
            silhouette_coefficient: best.score,
            external_metrics: metrics,
            aligned_labels: aligned,
        },
        labels: best.partition.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_label_column() {
        assert_eq!(resolve_label_column(-1, 4).unwrap(), 3);
        assert_eq!(resolve_label_column(0, 4).unwrap(), 0);
        assert_eq!(resolve_label_column(-4, 4).unwrap(), 0);
        assert!(resolve_label_column(4, 4).is_err());
        assert!(resolve_label_column(-5, 4).is_err());
    }

    #[test]
    fn test_label_column_out_of_range() {
        let table = RawTable::new(vec!["a".into()], vec![vec![Some("1".into())]]).unwrap();
        let params = ClusteringParams {
            label_column_index: Some(3),
            ..Default::default()
        };
        let err = run_clustering(table, &params).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::InvalidLabelColumn { index: 3, .. })
        ));
    }

    #[test]
    fn test_only_label_column() {
        let table = RawTable::new(
            vec!["label".into()],
            vec![vec![Some("x".into())], vec![Some("y".into())]],
        )
        .unwrap();
        assert!(run_clustering(table, &ClusteringParams::default()).is_err());
    }

    #[test]
    fn test_display_ends_with_last_section() {
        let table = RawTable::new(
            vec!["v".into(), "label".into()],
            ["0", "0.1", "5", "5.1"]
                .iter()
                .zip(["a", "a", "b", "b"])
                .map(|(v, l)| vec![Some(v.to_string()), Some(l.to_string())])
                .collect(),
        )
        .unwrap();
        let params = ClusteringParams {
            eps_range: vec![0.5],
            min_samples_range: vec![2],
            ..Default::default()
        };
        let text = run_clustering(table, &params).unwrap().to_string();
        assert!(text.ends_with('\n'));
        assert!(!text.ends_with("\n\n"));
        assert!(text.lines().last().unwrap().starts_with("homogeneity: 1.0000"));
    }
}
