//! Tabular preprocessing.
//!
//! Columns are classified as numeric or categorical, then a [`Pipeline`] of
//! [`Stage`]s turns the table into a [`FeatureMatrix`]. Each stage is fitted
//! on the output of the stage before it; the fitted pipeline can replay the
//! same transformation on other rows.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
};

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};
use tracing::{debug, instrument, warn};

use super::{
    error::{AnalysisError, Result},
    mfa::{FittedMfa, GroupSpec},
    model::FeatureMatrix,
};

// ========================================================================
// Raw and typed tables

/// Rows of optional cell strings under named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    /// Every row must have one cell per column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Result<Self> {
        if let Some(bad) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(AnalysisError::LengthMismatch {
                expected: columns.len(),
                found: bad.len(),
            });
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    /// Cells of one column, blanks reported as missing.
    pub fn column_values(&self, index: usize) -> Vec<Option<&str>> {
        self.rows
            .iter()
            .map(|r| r.get(index).and_then(|c| present(c.as_deref())))
            .collect()
    }

    /// Detach a column, returning its name and cells.
    pub fn remove_column(&mut self, index: usize) -> Option<(String, Vec<Option<String>>)> {
        if index >= self.columns.len() {
            return None;
        }
        let name = self.columns.remove(index);
        let values = self.rows.iter_mut().map(|r| r.remove(index)).collect();
        Some((name, values))
    }
}

fn present(cell: Option<&str>) -> Option<&str> {
    cell.filter(|c| !c.trim().is_empty())
}

fn parse_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok()
}

#[derive(
    Debug,
    Clone,
    Copy,
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
pub enum ColumnKind {
    Numeric,
    Categorical,
}

/// Numeric iff every present value parses as a float.
pub fn classify_column<S: AsRef<str>>(values: &[Option<S>]) -> ColumnKind {
    let all_numeric = values
        .iter()
        .filter_map(|v| present(v.as_ref().map(AsRef::as_ref)))
        .all(|v| parse_number(v).is_some());
    if all_numeric {
        ColumnKind::Numeric
    } else {
        ColumnKind::Categorical
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    /// `NaN` cells count as missing.
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

impl ColumnData {
    pub fn kind(&self) -> ColumnKind {
        match self {
            Self::Numeric(_) => ColumnKind::Numeric,
            Self::Categorical(_) => ColumnKind::Categorical,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(v) => v.len(),
            Self::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn missing_count(&self) -> usize {
        match self {
            Self::Numeric(v) => v.iter().filter(|c| c.is_none()).count(),
            Self::Categorical(v) => v.iter().filter(|c| c.is_none()).count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedColumn {
    pub name: String,
    pub data: ColumnData,
}

/// A table whose columns have been classified and parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedTable {
    n_rows: usize,
    columns: Vec<TypedColumn>,
}

impl TypedTable {
    pub fn from_raw(raw: &RawTable) -> Self {
        let columns = raw
            .columns()
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let values = raw.column_values(i);
                let data = match classify_column(&values) {
                    ColumnKind::Numeric => ColumnData::Numeric(
                        values
                            .iter()
                            .map(|v| v.and_then(parse_number).filter(|n| !n.is_nan()))
                            .collect(),
                    ),
                    ColumnKind::Categorical => ColumnData::Categorical(
                        values.iter().map(|v| v.map(|s| s.trim().to_owned())).collect(),
                    ),
                };
                TypedColumn {
                    name: name.clone(),
                    data,
                }
            })
            .collect();
        Self {
            n_rows: raw.n_rows(),
            columns,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn columns(&self) -> &[TypedColumn] {
        &self.columns
    }

    pub fn names_of(&self, kind: ColumnKind) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.data.kind() == kind)
            .map(|c| c.name.clone())
            .collect()
    }
}

// ========================================================================
// Encoded matrices

/// A named run of columns treated as one MFA group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureBlock {
    pub name: String,
    pub columns: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedMatrix {
    pub matrix: FeatureMatrix,
    pub column_names: Vec<String>,
    pub blocks: Vec<FeatureBlock>,
}

impl EncodedMatrix {
    pub fn block(&self, name: &str) -> Option<&FeatureBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// The blocks as an MFA group specification.
    pub fn group_spec(&self) -> Result<GroupSpec> {
        GroupSpec::try_new(
            self.blocks.iter().map(|b| b.columns.clone()).collect(),
            self.matrix.n_features(),
        )
    }
}

/// Data flowing between pipeline stages.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Table(TypedTable),
    Matrix(EncodedMatrix),
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table(t) => write!(f, "table {{ rows:{} columns:{} }}", t.n_rows(), t.columns().len()),
            Self::Matrix(m) => write!(f, "matrix {}", m.matrix.shape()),
        }
    }
}

impl Frame {
    fn as_table(&self, stage: &'static str) -> Result<&TypedTable> {
        match self {
            Self::Table(t) => Ok(t),
            Self::Matrix(_) => Err(AnalysisError::StageInputMismatch {
                stage,
                expected: "table",
            }),
        }
    }

    fn as_matrix(&self, stage: &'static str) -> Result<&EncodedMatrix> {
        match self {
            Self::Matrix(m) => Ok(m),
            Self::Table(_) => Err(AnalysisError::StageInputMismatch {
                stage,
                expected: "matrix",
            }),
        }
    }

    pub fn into_matrix(self) -> Result<EncodedMatrix> {
        match self {
            Self::Matrix(m) => Ok(m),
            Self::Table(_) => Err(AnalysisError::StageInputMismatch {
                stage: "output",
                expected: "matrix",
            }),
        }
    }
}

// ========================================================================
// Stages

pub const NUMERIC_BLOCK: &str = "numeric";
pub const CATEGORICAL_BLOCK: &str = "categorical";
pub const GLOBAL_BLOCK: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// Fill numeric gaps with the column mean, categorical gaps with the mode.
    Impute,
    /// Numeric columns first, then one-hot categorical columns.
    Encode,
    /// Standardize the numeric block.
    Scale,
    /// Project the blocks onto `n_components` MFA factors.
    ReduceMfa { n_components: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Fill {
    Numeric(f64),
    Categorical(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputeRule {
    column: String,
    /// `None` drops the column: it had no observed values when fitted.
    fill: Option<Fill>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EncodeRule {
    Numeric { column: String },
    OneHot { column: String, categories: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleRule {
    column: usize,
    mean: f64,
    std: f64,
}

/// A stage with its learned parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FittedStage {
    Impute(Vec<ImputeRule>),
    Encode(Vec<EncodeRule>),
    Scale(Vec<ScaleRule>),
    ReduceMfa(FittedMfa),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn fit(&self, frame: &Frame) -> Result<FittedStage> {
        match self {
            Stage::Impute => fit_impute(frame.as_table(self.name())?).map(FittedStage::Impute),
            Stage::Encode => fit_encode(frame.as_table(self.name())?).map(FittedStage::Encode),
            Stage::Scale => fit_scale(frame.as_matrix(self.name())?).map(FittedStage::Scale),
            Stage::ReduceMfa { n_components } => {
                let encoded = frame.as_matrix(self.name())?;
                FittedMfa::fit(&encoded.matrix, &encoded.group_spec()?, *n_components)
                    .map(FittedStage::ReduceMfa)
            }
        }
    }
}

impl FittedStage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Impute(_) => Stage::Impute.name(),
            Self::Encode(_) => Stage::Encode.name(),
            Self::Scale(_) => Stage::Scale.name(),
            Self::ReduceMfa(_) => "reduce_mfa",
        }
    }

    pub fn transform(&self, frame: Frame) -> Result<Frame> {
        match self {
            Self::Impute(rules) => apply_impute(rules, frame.as_table(self.name())?).map(Frame::Table),
            Self::Encode(rules) => apply_encode(rules, frame.as_table(self.name())?).map(Frame::Matrix),
            Self::Scale(rules) => apply_scale(rules, frame.as_matrix(self.name())?).map(Frame::Matrix),
            Self::ReduceMfa(mfa) => {
                let encoded = frame.as_matrix(self.name())?;
                let factors = mfa.transform(&encoded.matrix)?;
                let n = factors.n_features();
                Ok(Frame::Matrix(EncodedMatrix {
                    matrix: factors,
                    column_names: (0..n).map(|i| format!("factor_{}", i)).collect(),
                    blocks: vec![FeatureBlock {
                        name: GLOBAL_BLOCK.into(),
                        columns: (0..n).collect(),
                    }],
                }))
            }
        }
    }
}

fn fit_impute(table: &TypedTable) -> Result<Vec<ImputeRule>> {
    Ok(table
        .columns()
        .iter()
        .map(|c| {
            let fill = match &c.data {
                ColumnData::Numeric(values) => {
                    let observed: Vec<f64> = values.iter().flatten().copied().collect();
                    (!observed.is_empty())
                        .then(|| Fill::Numeric(observed.iter().sum::<f64>() / observed.len() as f64))
                }
                ColumnData::Categorical(values) => most_frequent(values).map(Fill::Categorical),
            };
            if fill.is_none() {
                warn!(column = %c.name, "dropping column without observed values");
            }
            ImputeRule {
                column: c.name.clone(),
                fill,
            }
        })
        .collect())
}

/// Most common present value; ties go to the smallest.
fn most_frequent(values: &[Option<String>]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for v in values.iter().flatten() {
        *counts.entry(v.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(&str, usize)>, (v, n)| match best {
            Some((_, best_n)) if best_n >= n => best,
            _ => Some((v, n)),
        })
        .map(|(v, _)| v.to_owned())
}

fn check_columns<'a, I>(table: &TypedTable, fitted: I) -> Result<()>
where
    I: ExactSizeIterator<Item = &'a str>,
{
    if fitted.len() != table.columns().len() {
        return Err(AnalysisError::LengthMismatch {
            expected: fitted.len(),
            found: table.columns().len(),
        });
    }
    for (name, column) in fitted.zip(table.columns()) {
        if name != column.name {
            return Err(AnalysisError::InvalidParameter {
                name: "columns",
                message: format!("expected column {}, found {}", name, column.name),
            });
        }
    }
    Ok(())
}

fn apply_impute(rules: &[ImputeRule], table: &TypedTable) -> Result<TypedTable> {
    check_columns(table, rules.iter().map(|r| r.column.as_str()))?;
    let columns = rules
        .iter()
        .zip(table.columns())
        .filter_map(|(rule, column)| {
            let data = match (&rule.fill, &column.data) {
                (Some(Fill::Numeric(mean)), ColumnData::Numeric(values)) => {
                    ColumnData::Numeric(values.iter().map(|v| Some(v.unwrap_or(*mean))).collect())
                }
                (Some(Fill::Categorical(mode)), ColumnData::Categorical(values)) => {
                    ColumnData::Categorical(
                        values
                            .iter()
                            .map(|v| Some(v.clone().unwrap_or_else(|| mode.clone())))
                            .collect(),
                    )
                }
                (None, _) => return None,
                (Some(_), data) => {
                    return Some(Err(AnalysisError::InvalidParameter {
                        name: "columns",
                        message: format!(
                            "column {} changed kind to {} since fitting",
                            column.name,
                            data.kind()
                        ),
                    }));
                }
            };
            Some(Ok(TypedColumn {
                name: column.name.clone(),
                data,
            }))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(TypedTable {
        n_rows: table.n_rows(),
        columns,
    })
}

fn fit_encode(table: &TypedTable) -> Result<Vec<EncodeRule>> {
    let numeric = table.columns().iter().filter_map(|c| match c.data {
        ColumnData::Numeric(_) => Some(EncodeRule::Numeric {
            column: c.name.clone(),
        }),
        ColumnData::Categorical(_) => None,
    });
    let categorical = table.columns().iter().filter_map(|c| match &c.data {
        ColumnData::Categorical(values) => {
            let categories = values
                .iter()
                .flatten()
                .cloned()
                .collect::<BTreeSet<String>>()
                .into_iter()
                .collect();
            Some(EncodeRule::OneHot {
                column: c.name.clone(),
                categories,
            })
        }
        ColumnData::Numeric(_) => None,
    });
    Ok(numeric.chain(categorical).collect())
}

fn apply_encode(rules: &[EncodeRule], table: &TypedTable) -> Result<EncodedMatrix> {
    let by_name: HashMap<&str, &TypedColumn> =
        table.columns().iter().map(|c| (c.name.as_str(), c)).collect();
    if by_name.len() != rules.len() {
        return Err(AnalysisError::LengthMismatch {
            expected: rules.len(),
            found: by_name.len(),
        });
    }

    let n_rows = table.n_rows();
    let mut columns: Vec<Vec<f64>> = Vec::new();
    let mut column_names = Vec::new();
    let mut numeric_block = Vec::new();
    let mut categorical_block = Vec::new();

    for rule in rules {
        let (name, kind) = match rule {
            EncodeRule::Numeric { column } => (column, ColumnKind::Numeric),
            EncodeRule::OneHot { column, .. } => (column, ColumnKind::Categorical),
        };
        let source = by_name.get(name.as_str()).ok_or_else(|| AnalysisError::InvalidParameter {
            name: "columns",
            message: format!("column {} is missing", name),
        })?;
        if source.data.missing_count() > 0 {
            return Err(AnalysisError::InvalidParameter {
                name: "columns",
                message: format!("column {} has missing values; impute before encoding", name),
            });
        }
        match (rule, &source.data) {
            (EncodeRule::Numeric { column }, ColumnData::Numeric(values)) => {
                numeric_block.push(columns.len());
                columns.push(values.iter().flatten().copied().collect());
                column_names.push(column.clone());
            }
            (EncodeRule::OneHot { column, categories }, ColumnData::Categorical(values)) => {
                for category in categories {
                    categorical_block.push(columns.len());
                    columns.push(
                        values
                            .iter()
                            .flatten()
                            .map(|v| if v == category { 1.0 } else { 0.0 })
                            .collect(),
                    );
                    column_names.push(format!("{}={}", column, category));
                }
            }
            _ => {
                return Err(AnalysisError::InvalidParameter {
                    name: "columns",
                    message: format!("column {} is no longer {}", name, kind),
                });
            }
        }
    }

    let mut matrix = Array2::zeros((n_rows, columns.len()));
    for (j, values) in columns.into_iter().enumerate() {
        for (i, v) in values.into_iter().enumerate() {
            matrix[[i, j]] = v;
        }
    }
    let blocks = [(NUMERIC_BLOCK, numeric_block), (CATEGORICAL_BLOCK, categorical_block)]
        .into_iter()
        .filter(|(_, cols)| !cols.is_empty())
        .map(|(name, columns)| FeatureBlock {
            name: name.into(),
            columns,
        })
        .collect();
    debug!(rows = n_rows, columns = column_names.len(), "encoded table");

    Ok(EncodedMatrix {
        matrix: FeatureMatrix::new(matrix),
        column_names,
        blocks,
    })
}

fn fit_scale(encoded: &EncodedMatrix) -> Result<Vec<ScaleRule>> {
    let Some(block) = encoded.block(NUMERIC_BLOCK) else {
        return Ok(vec![]);
    };
    Ok(block
        .columns
        .iter()
        .map(|&j| {
            let column = encoded.matrix.column(j);
            let mean = column.mean().unwrap_or(0.0);
            let std = column.std(0.0);
            ScaleRule {
                column: j,
                mean,
                std: if std > 0.0 { std } else { 1.0 },
            }
        })
        .collect())
}

fn apply_scale(rules: &[ScaleRule], encoded: &EncodedMatrix) -> Result<EncodedMatrix> {
    let mut matrix = encoded.matrix.as_array().clone();
    for rule in rules {
        if rule.column >= matrix.ncols() {
            return Err(AnalysisError::LengthMismatch {
                expected: rule.column + 1,
                found: matrix.ncols(),
            });
        }
        matrix
            .index_axis_mut(Axis(1), rule.column)
            .mapv_inplace(|v| (v - rule.mean) / rule.std);
    }
    Ok(EncodedMatrix {
        matrix: FeatureMatrix::new(matrix),
        ..encoded.clone()
    })
}

// ========================================================================
// Pipeline

/// An ordered list of stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(vec![Stage::Impute, Stage::Encode, Stage::Scale])
    }
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// The default stages followed by an MFA projection.
    pub fn with_mfa(n_components: usize) -> Self {
        let mut pipeline = Self::default();
        pipeline.stages.push(Stage::ReduceMfa { n_components });
        pipeline
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    #[instrument(skip_all, fields(stages = self.stages.len()))]
    pub fn fit_transform(&self, frame: Frame) -> Result<(FittedPipeline, Frame)> {
        let mut fitted = Vec::with_capacity(self.stages.len());
        let mut frame = frame;
        for stage in &self.stages {
            let state = stage.fit(&frame)?;
            frame = state.transform(frame)?;
            debug!(stage = stage.name(), output = %frame, "stage fitted");
            fitted.push(state);
        }
        Ok((FittedPipeline { stages: fitted }, frame))
    }

    pub fn fit(&self, frame: Frame) -> Result<FittedPipeline> {
        self.fit_transform(frame).map(|(fitted, _)| fitted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPipeline {
    stages: Vec<FittedStage>,
}

impl FittedPipeline {
    pub fn stages(&self) -> &[FittedStage] {
        &self.stages
    }

    pub fn transform(&self, frame: Frame) -> Result<Frame> {
        self.stages.iter().try_fold(frame, |f, stage| stage.transform(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(s: &str) -> Option<String> {
        Some(s.to_owned())
    }

    fn sample_table() -> RawTable {
        RawTable::new(
            vec!["height".into(), "colour".into(), "weight".into()],
            vec![
                vec![cell("1.0"), cell("red"), cell("10")],
                vec![cell("3.0"), cell("blue"), None],
                vec![None, cell("red"), cell("30")],
                vec![cell("2.0"), None, cell(" 20 ")],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_classify_column() {
        assert_eq!(
            classify_column(&[Some("1"), None, Some(" 2.5e3 "), Some("")]),
            ColumnKind::Numeric
        );
        assert_eq!(
            classify_column(&[Some("1"), Some("two")]),
            ColumnKind::Categorical
        );
        assert_eq!(classify_column::<&str>(&[None, None]), ColumnKind::Numeric);
    }

    #[test]
    fn test_most_frequent_tie_breaks_low() {
        let values = vec![cell("b"), cell("a"), None, cell("b"), cell("a")];
        assert_eq!(most_frequent(&values), Some("a".to_owned()));
        assert_eq!(most_frequent(&[None]), None);
    }

    #[test]
    fn test_default_pipeline() {
        let table = TypedTable::from_raw(&sample_table());
        assert_eq!(table.names_of(ColumnKind::Numeric), vec!["height", "weight"]);
        assert_eq!(table.names_of(ColumnKind::Categorical), vec!["colour"]);

        let (_, frame) = Pipeline::default().fit_transform(Frame::Table(table)).unwrap();
        let encoded = frame.into_matrix().unwrap();
        assert_eq!(
            encoded.column_names,
            vec!["height", "weight", "colour=blue", "colour=red"]
        );
        assert_eq!(encoded.block(NUMERIC_BLOCK).unwrap().columns, vec![0, 1]);
        assert_eq!(encoded.block(CATEGORICAL_BLOCK).unwrap().columns, vec![2, 3]);

        let m = encoded.matrix.as_array();
        // Numeric columns are standardized.
        for j in 0..2 {
            let col = m.column(j);
            assert!(col.mean().unwrap().abs() < 1e-12);
            assert!((col.std(0.0) - 1.0).abs() < 1e-12);
        }
        // Missing colour imputed with the mode, "red".
        assert_eq!(m.row(3).to_vec(), vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_fitted_pipeline_replays_on_new_rows() {
        let table = TypedTable::from_raw(&sample_table());
        let fitted = Pipeline::default().fit(Frame::Table(table)).unwrap();

        let fresh = RawTable::new(
            vec!["height".into(), "colour".into(), "weight".into()],
            vec![vec![cell("2.0"), cell("green"), cell("20")]],
        )
        .unwrap();
        let out = fitted
            .transform(Frame::Table(TypedTable::from_raw(&fresh)))
            .unwrap()
            .into_matrix()
            .unwrap();
        // Training means; unknown category encodes as zeros.
        assert_eq!(out.matrix.row(0).to_vec(), vec![0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_mfa_stage() {
        let table = TypedTable::from_raw(&sample_table());
        let (_, frame) = Pipeline::with_mfa(2).fit_transform(Frame::Table(table)).unwrap();
        let encoded = frame.into_matrix().unwrap();
        assert_eq!(encoded.matrix.dim(), (4, 2));
        assert_eq!(encoded.blocks.len(), 1);
        assert_eq!(encoded.column_names, vec!["factor_0", "factor_1"]);
    }

    #[test]
    fn test_empty_column_is_dropped() {
        let raw = RawTable::new(
            vec!["a".into(), "empty".into()],
            vec![vec![cell("1"), None], vec![cell("2"), cell("  ")]],
        )
        .unwrap();
        let (_, frame) = Pipeline::default()
            .fit_transform(Frame::Table(TypedTable::from_raw(&raw)))
            .unwrap();
        assert_eq!(frame.into_matrix().unwrap().column_names, vec!["a"]);
    }

    #[test]
    fn test_stage_input_mismatch() {
        let table = Frame::Table(TypedTable::from_raw(&sample_table()));
        assert!(matches!(
            Stage::Scale.fit(&table),
            Err(AnalysisError::StageInputMismatch { stage: "scale", .. })
        ));
    }

    #[test]
    fn test_encode_requires_imputation() {
        let table = Frame::Table(TypedTable::from_raw(&sample_table()));
        let state = Stage::Encode.fit(&table).unwrap();
        assert!(state.transform(table).is_err());
    }

    #[test]
    fn test_ragged_rows_rejected() {
        assert!(RawTable::new(vec!["a".into()], vec![vec![None, None]]).is_err());
    }

    #[test]
    fn test_remove_column() {
        let mut raw = sample_table();
        let (name, values) = raw.remove_column(1).unwrap();
        assert_eq!(name, "colour");
        assert_eq!(values[0], cell("red"));
        assert_eq!(raw.columns(), ["height", "weight"]);
        assert!(raw.remove_column(5).is_none());
    }
}
