//! In-memory CSV tables and the dataset schema.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A CSV file held as raw strings. Empty cells are missing values.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read header of {}", path.display()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.with_context(|| format!("Malformed row in {}", path.display()))?;
            rows.push(record.iter().map(|v| v.trim().to_string()).collect());
        }
        Ok(Self { headers, rows })
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .with_context(|| format!("Column '{name}' not found"))
    }

    /// True when every present value in the column parses as a number.
    pub fn is_numeric_column(&self, idx: usize) -> bool {
        let mut seen = false;
        for row in &self.rows {
            let value = row.get(idx).map(String::as_str).unwrap_or("");
            if value.is_empty() {
                continue;
            }
            if parse_number(value).is_none() {
                return false;
            }
            seen = true;
        }
        seen
    }

    /// Distinct non-empty values of a column, sorted.
    pub fn distinct(&self, idx: usize) -> Vec<String> {
        let mut values: Vec<String> = self
            .rows
            .iter()
            .filter_map(|row| row.get(idx))
            .filter(|v| !v.is_empty())
            .cloned()
            .collect();
        values.sort();
        values.dedup();
        values
    }

    pub fn numeric_values(&self, idx: usize) -> Vec<Option<f64>> {
        self.rows
            .iter()
            .map(|row| row.get(idx).and_then(|v| parse_number(v)))
            .collect()
    }

    /// A new table with the rows at `indices`, in that order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            headers: self.headers.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }
}

/// Parse a cell as a number; empty and non-numeric cells are `None`.
pub fn parse_number(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// First `.csv` file in `dir`, by name.
pub fn first_csv_in(dir: &Path) -> Result<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();
    files
        .into_iter()
        .next()
        .with_context(|| format!("No CSV file found in {}", dir.display()))
}

/// Expected shape of the dataset, read from `schema.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Every column of the raw dataset and its declared type.
    pub columns: BTreeMap<String, String>,
    /// Numeric feature columns; the target is listed separately.
    pub numerical_columns: Vec<String>,
    pub categorical_columns: Vec<String>,
    pub target_column: String,
    /// Allowed values per categorical column.
    #[serde(default)]
    pub domain_value: BTreeMap<String, Vec<String>>,
}

impl Schema {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse schema file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write schema file {}", path.display()))
    }

    /// Schema of the California housing dataset.
    pub fn housing() -> Self {
        let numerical = [
            "longitude",
            "latitude",
            "housing_median_age",
            "total_rooms",
            "total_bedrooms",
            "population",
            "households",
            "median_income",
        ];
        let mut columns: BTreeMap<String, String> = numerical
            .iter()
            .map(|c| (c.to_string(), "float".to_string()))
            .collect();
        columns.insert("median_house_value".into(), "float".into());
        columns.insert("ocean_proximity".into(), "category".into());

        Self {
            columns,
            numerical_columns: numerical.iter().map(|c| c.to_string()).collect(),
            categorical_columns: vec!["ocean_proximity".into()],
            target_column: "median_house_value".into(),
            domain_value: BTreeMap::from([(
                "ocean_proximity".to_string(),
                ["<1H OCEAN", "INLAND", "ISLAND", "NEAR BAY", "NEAR OCEAN"]
                    .iter()
                    .map(|v| v.to_string())
                    .collect(),
            )]),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::pipeline::{IngestionArtifact, TransformationInput, ValidationArtifact};

    /// A small schema with one categorical column.
    pub fn schema() -> Schema {
        Schema {
            columns: BTreeMap::from([
                ("x1".to_string(), "float".to_string()),
                ("x2".to_string(), "float".to_string()),
                ("zone".to_string(), "category".to_string()),
                ("y".to_string(), "float".to_string()),
            ]),
            numerical_columns: vec!["x1".into(), "x2".into()],
            categorical_columns: vec!["zone".into()],
            target_column: "y".into(),
            domain_value: BTreeMap::from([(
                "zone".to_string(),
                vec!["a".to_string(), "b".to_string()],
            )]),
        }
    }

    /// `rows` rows of `y = 3*x1 - 2*x2 + 10*[zone=b] + 5`, with one missing x2.
    pub fn linear_table(rows: usize) -> Table {
        let mut data = Vec::with_capacity(rows);
        for i in 0..rows {
            let x1 = i as f64 * 0.5;
            let x2 = ((i * 7) % 11) as f64;
            let zone = if i % 3 == 0 { "b" } else { "a" };
            let bump = if zone == "b" { 10.0 } else { 0.0 };
            let y = 3.0 * x1 - 2.0 * x2 + bump + 5.0;
            let x2_cell = if i == 4 { String::new() } else { x2.to_string() };
            data.push(vec![x1.to_string(), x2_cell, zone.to_string(), y.to_string()]);
        }
        Table {
            headers: vec!["x1".into(), "x2".into(), "zone".into(), "y".into()],
            rows: data,
        }
    }

    /// Schema and ingested splits written under `dir`.
    pub fn transformation_input(
        dir: &Path,
        train_rows: usize,
        test_rows: usize,
    ) -> TransformationInput {
        let schema_file_path = dir.join("schema.json");
        schema().save(&schema_file_path).unwrap();
        let train_file_path = dir.join("ingested").join("train").join("data.csv");
        let test_file_path = dir.join("ingested").join("test").join("data.csv");
        linear_table(train_rows).write_csv(&train_file_path).unwrap();
        linear_table(test_rows).write_csv(&test_file_path).unwrap();
        TransformationInput {
            ingestion: IngestionArtifact {
                train_file_path,
                test_file_path,
                is_ingested: true,
                message: String::new(),
            },
            validation: ValidationArtifact {
                schema_file_path,
                report_file_path: dir.join("report.json"),
                is_validated: true,
                message: String::new(),
            },
        }
    }
}
