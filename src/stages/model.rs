//! Preprocessing and the linear regression model.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use super::dataset::{Schema, Table, parse_number};

/// Ridge term added to the normal equations; keeps one-hot columns solvable.
const RIDGE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericFeature {
    pub name: String,
    /// Imputed for missing cells.
    pub median: f64,
    pub mean: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalFeature {
    pub name: String,
    pub categories: Vec<String>,
}

/// Median imputation, standardisation and one-hot encoding, fitted on the
/// training split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    pub numerical: Vec<NumericFeature>,
    pub categorical: Vec<CategoricalFeature>,
    pub target_column: String,
}

impl Preprocessor {
    pub fn fit(table: &Table, schema: &Schema) -> Result<Self> {
        let mut numerical = Vec::with_capacity(schema.numerical_columns.len());
        for name in &schema.numerical_columns {
            let idx = table.require_column(name)?;
            let mut values: Vec<f64> = table.numeric_values(idx).into_iter().flatten().collect();
            if values.is_empty() {
                bail!("Column '{name}' has no numeric values");
            }
            let median = median(&mut values);
            let n = table.len() as f64;
            let imputed: Vec<f64> = table
                .numeric_values(idx)
                .into_iter()
                .map(|v| v.unwrap_or(median))
                .collect();
            let mean = imputed.iter().sum::<f64>() / n;
            let var = imputed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std_dev = if var > 0.0 { var.sqrt() } else { 1.0 };
            numerical.push(NumericFeature {
                name: name.clone(),
                median,
                mean,
                std_dev,
            });
        }

        let mut categorical = Vec::with_capacity(schema.categorical_columns.len());
        for name in &schema.categorical_columns {
            let idx = table.require_column(name)?;
            let categories = match schema.domain_value.get(name) {
                Some(domain) => domain.clone(),
                None => table.distinct(idx),
            };
            categorical.push(CategoricalFeature {
                name: name.clone(),
                categories,
            });
        }

        table.require_column(&schema.target_column)?;
        Ok(Self {
            numerical,
            categorical,
            target_column: schema.target_column.clone(),
        })
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.numerical.iter().map(|f| f.name.clone()).collect();
        for feature in &self.categorical {
            for category in &feature.categories {
                names.push(format!("{}_{}", feature.name, category));
            }
        }
        names
    }

    /// Feature matrix for every row of a raw table.
    pub fn transform_features(&self, table: &Table) -> Result<Vec<Vec<f64>>> {
        let numeric_idx = self
            .numerical
            .iter()
            .map(|f| table.require_column(&f.name))
            .collect::<Result<Vec<_>>>()?;
        let categorical_idx = self
            .categorical
            .iter()
            .map(|f| table.require_column(&f.name))
            .collect::<Result<Vec<_>>>()?;

        let mut matrix = Vec::with_capacity(table.len());
        for row in &table.rows {
            let mut features = Vec::with_capacity(self.numerical.len());
            for (feature, &idx) in self.numerical.iter().zip(&numeric_idx) {
                let value = row
                    .get(idx)
                    .and_then(|v| parse_number(v))
                    .unwrap_or(feature.median);
                features.push((value - feature.mean) / feature.std_dev);
            }
            // Unknown categories encode as all zeros.
            for (feature, &idx) in self.categorical.iter().zip(&categorical_idx) {
                let value = row.get(idx).map(String::as_str).unwrap_or("");
                features.extend(
                    feature
                        .categories
                        .iter()
                        .map(|c| if c == value { 1.0 } else { 0.0 }),
                );
            }
            matrix.push(features);
        }
        Ok(matrix)
    }

    /// Target values of a raw table; every row must have one.
    pub fn target(&self, table: &Table) -> Result<Vec<f64>> {
        let idx = table.require_column(&self.target_column)?;
        table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.get(idx)
                    .and_then(|v| parse_number(v))
                    .with_context(|| format!("Row {} has no {} value", i + 1, self.target_column))
            })
            .collect()
    }

    /// Transformed table: one column per feature followed by the target.
    pub fn transform(&self, table: &Table) -> Result<Table> {
        let features = self.transform_features(table)?;
        let target = self.target(table)?;
        let mut headers = self.feature_names();
        headers.push(self.target_column.clone());
        let rows = features
            .into_iter()
            .zip(target)
            .map(|(mut row, y)| {
                row.push(y);
                row.into_iter().map(|v| v.to_string()).collect()
            })
            .collect();
        Ok(Table { headers, rows })
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Split a transformed table into features and the trailing target column.
pub fn split_transformed(table: &Table) -> Result<(Vec<Vec<f64>>, Vec<f64>)> {
    if table.headers.len() < 2 {
        bail!("Transformed data needs at least one feature and a target");
    }
    let mut features = Vec::with_capacity(table.len());
    let mut target = Vec::with_capacity(table.len());
    for (i, row) in table.rows.iter().enumerate() {
        let mut values = row
            .iter()
            .map(|v| parse_number(v).with_context(|| format!("Row {} has a non-numeric cell", i + 1)))
            .collect::<Result<Vec<f64>>>()?;
        let y = values.pop().context("Empty row")?;
        features.push(values);
        target.push(y);
    }
    Ok((features, target))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl LinearModel {
    /// Least squares fit through the normal equations.
    pub fn fit(features: &[Vec<f64>], target: &[f64]) -> Result<Self> {
        if features.is_empty() || features.len() != target.len() {
            bail!(
                "Cannot fit on {} rows with {} targets",
                features.len(),
                target.len()
            );
        }
        let p = features[0].len();
        let dim = p + 1;

        // [intercept, w_1..w_p]
        let mut xtx = vec![vec![0.0; dim]; dim];
        let mut xty = vec![0.0; dim];
        for (row, &y) in features.iter().zip(target) {
            if row.len() != p {
                bail!("Ragged feature matrix");
            }
            let x: Vec<f64> = std::iter::once(1.0).chain(row.iter().copied()).collect();
            for i in 0..dim {
                xty[i] += x[i] * y;
                for j in 0..dim {
                    xtx[i][j] += x[i] * x[j];
                }
            }
        }
        for (i, row) in xtx.iter_mut().enumerate().skip(1) {
            row[i] += RIDGE;
        }

        let beta = solve(xtx, xty).context("Normal equations are singular")?;
        Ok(Self {
            intercept: beta[0],
            weights: beta[1..].to_vec(),
        })
    }

    pub fn predict_row(&self, features: &[f64]) -> f64 {
        self.intercept
            + self
                .weights
                .iter()
                .zip(features)
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }

    pub fn predict(&self, features: &[Vec<f64>]) -> Vec<f64> {
        features.iter().map(|row| self.predict_row(row)).collect()
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

/// Coefficient of determination.
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean = actual.iter().sum::<f64>() / n;
    let ss_tot: f64 = actual.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    (ss_res / actual.len() as f64).sqrt()
}

/// A servable model: the preprocessor it was trained behind plus the fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub preprocessor: Preprocessor,
    pub model: LinearModel,
    pub feature_names: Vec<String>,
    pub trained_at: String,
}

impl TrainedModel {
    /// Predictions for every row of a raw (untransformed) table.
    pub fn predict_table(&self, table: &Table) -> Result<Vec<f64>> {
        let features = self.preprocessor.transform_features(table)?;
        Ok(self.model.predict(&features))
    }

    /// R² on a raw table that includes the target column.
    pub fn score_table(&self, table: &Table) -> Result<f64> {
        let predicted = self.predict_table(table)?;
        let actual = self.preprocessor.target(table)?;
        Ok(r2_score(&actual, &predicted))
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::dataset::fixtures;

    #[test]
    fn test_preprocessor_imputes_median() {
        let table = fixtures::linear_table(9);
        let pre = Preprocessor::fit(&table, &fixtures::schema()).unwrap();
        let x2 = &pre.numerical[1];
        assert_eq!(x2.name, "x2");

        let mut present: Vec<f64> = table
            .rows
            .iter()
            .filter(|r| !r[1].is_empty())
            .map(|r| r[1].parse().unwrap())
            .collect();
        present.sort_by(f64::total_cmp);
        assert_eq!(x2.median, (present[3] + present[4]) / 2.0);
    }

    #[test]
    fn test_transform_standardizes_and_one_hot_encodes() {
        let table = fixtures::linear_table(12);
        let pre = Preprocessor::fit(&table, &fixtures::schema()).unwrap();
        assert_eq!(pre.feature_names(), vec!["x1", "x2", "zone_a", "zone_b"]);

        let out = pre.transform(&table).unwrap();
        assert_eq!(out.headers.last().unwrap(), "y");
        let (features, target) = split_transformed(&out).unwrap();
        assert_eq!(features.len(), 12);
        assert_eq!(target.len(), 12);

        let mean_x1: f64 = features.iter().map(|r| r[0]).sum::<f64>() / 12.0;
        assert!(mean_x1.abs() < 1e-9);
        // row 0 is zone b
        assert_eq!(&features[0][2..], &[0.0, 1.0]);
        assert_eq!(&features[1][2..], &[1.0, 0.0]);
    }

    #[test]
    fn test_unknown_category_encodes_as_zeros() {
        let table = fixtures::linear_table(6);
        let pre = Preprocessor::fit(&table, &fixtures::schema()).unwrap();
        let mut other = table.clone();
        other.rows[0][2] = "c".into();
        let features = pre.transform_features(&other).unwrap();
        assert_eq!(&features[0][2..], &[0.0, 0.0]);
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let mut table = fixtures::linear_table(6);
        table.headers[0] = "renamed".into();
        assert!(Preprocessor::fit(&table, &fixtures::schema()).is_err());
    }

    #[test]
    fn test_linear_fit_recovers_exact_relationship() {
        let table = fixtures::linear_table(40);
        let mut clean = table.clone();
        clean.rows.retain(|r| !r[1].is_empty());
        let pre = Preprocessor::fit(&clean, &fixtures::schema()).unwrap();
        let features = pre.transform_features(&clean).unwrap();
        let target = pre.target(&clean).unwrap();

        let model = LinearModel::fit(&features, &target).unwrap();
        let predicted = model.predict(&features);
        assert!(r2_score(&target, &predicted) > 0.9999);
        assert!(rmse(&target, &predicted) < 1e-2);
    }

    #[test]
    fn test_fit_rejects_empty_input() {
        assert!(LinearModel::fit(&[], &[]).is_err());
    }

    #[test]
    fn test_r2_of_mean_prediction_is_zero() {
        let actual = [1.0, 2.0, 3.0];
        assert!((r2_score(&actual, &[2.0, 2.0, 2.0])).abs() < 1e-12);
        assert_eq!(r2_score(&actual, &actual), 1.0);
    }

    #[test]
    fn test_solve_simple_system() {
        // 2x + y = 5, x + 3y = 10
        let x = solve(vec![vec![2.0, 1.0], vec![1.0, 3.0]], vec![5.0, 10.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_solve_singular_is_none() {
        assert!(solve(vec![vec![1.0, 2.0], vec![2.0, 4.0]], vec![1.0, 2.0]).is_none());
    }
}
