use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::dataset::{Schema, Table};
use super::model::write_json;
use crate::config::{RunConfig, ValidationConfig};
use crate::pipeline::{IngestionArtifact, Stage, ValidationArtifact};

/// Schema checks for one split of the dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitReport {
    pub file_path: PathBuf,
    pub rows: usize,
    pub missing_columns: Vec<String>,
    pub unexpected_columns: Vec<String>,
    pub numerical_columns_found: usize,
    pub categorical_columns_found: usize,
    /// Values outside the schema domain, per categorical column.
    pub unknown_categories: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub schema_file_path: PathBuf,
    pub train: SplitReport,
    pub test: SplitReport,
    pub problems: Vec<String>,
    pub is_validated: bool,
}

/// Checks the ingested splits against `schema.json` and writes a report.
#[derive(Debug, Default)]
pub struct DataValidation;

impl DataValidation {
    pub fn new() -> Self {
        Self
    }
}

fn check_split(
    label: &str,
    path: &Path,
    schema: &Schema,
    problems: &mut Vec<String>,
) -> Result<SplitReport> {
    let table = Table::read_csv(path)?;
    let mut report = SplitReport {
        file_path: path.to_path_buf(),
        rows: table.len(),
        ..SplitReport::default()
    };

    if table.is_empty() {
        problems.push(format!("{label} split has no rows"));
    }

    report.missing_columns = schema
        .columns
        .keys()
        .filter(|c| table.column_index(c).is_none())
        .cloned()
        .collect();
    report.unexpected_columns = table
        .headers
        .iter()
        .filter(|h| !schema.columns.contains_key(*h))
        .cloned()
        .collect();
    if !report.missing_columns.is_empty() {
        problems.push(format!(
            "{label} split is missing columns: {}",
            report.missing_columns.join(", ")
        ));
    }
    if !report.unexpected_columns.is_empty() {
        problems.push(format!(
            "{label} split has unexpected columns: {}",
            report.unexpected_columns.join(", ")
        ));
    }

    for (idx, header) in table.headers.iter().enumerate() {
        if *header == schema.target_column {
            continue;
        }
        if table.is_numeric_column(idx) {
            report.numerical_columns_found += 1;
        } else {
            report.categorical_columns_found += 1;
        }
    }
    if report.numerical_columns_found != schema.numerical_columns.len() {
        problems.push(format!(
            "{label} split has {} numerical columns, schema declares {}",
            report.numerical_columns_found,
            schema.numerical_columns.len()
        ));
    }
    if report.categorical_columns_found != schema.categorical_columns.len() {
        problems.push(format!(
            "{label} split has {} categorical columns, schema declares {}",
            report.categorical_columns_found,
            schema.categorical_columns.len()
        ));
    }

    for (column, domain) in &schema.domain_value {
        let Some(idx) = table.column_index(column) else {
            continue;
        };
        let unknown: Vec<String> = table
            .distinct(idx)
            .into_iter()
            .filter(|v| !domain.contains(v))
            .collect();
        if !unknown.is_empty() {
            problems.push(format!(
                "{label} split has values outside the domain of {column}: {}",
                unknown.join(", ")
            ));
            report.unknown_categories.insert(column.clone(), unknown);
        }
    }

    Ok(report)
}

/// Validate both splits; the report is written even when validation fails.
pub fn validate(
    config: &ValidationConfig,
    ingestion: &IngestionArtifact,
) -> Result<ValidationArtifact> {
    for path in [&ingestion.train_file_path, &ingestion.test_file_path] {
        if !path.is_file() {
            bail!(
                "Training file {} or test file {} is not present",
                ingestion.train_file_path.display(),
                ingestion.test_file_path.display()
            );
        }
    }

    let schema = Schema::load(&config.schema_file_path)?;
    let mut problems = Vec::new();
    let train = check_split("train", &ingestion.train_file_path, &schema, &mut problems)?;
    let test = check_split("test", &ingestion.test_file_path, &schema, &mut problems)?;

    let report = ValidationReport {
        schema_file_path: config.schema_file_path.clone(),
        train,
        test,
        is_validated: problems.is_empty(),
        problems,
    };
    write_json(&config.report_file_path, &report).context("Failed to write validation report")?;

    if !report.is_validated {
        for problem in &report.problems {
            warn!(problem = %problem, "Schema check failed");
        }
        bail!("Data validation failed: {}", report.problems.join("; "));
    }

    info!(report = %config.report_file_path.display(), "Data validation passed");
    Ok(ValidationArtifact {
        schema_file_path: config.schema_file_path.clone(),
        report_file_path: config.report_file_path.clone(),
        is_validated: true,
        message: "Data validation performed successfully.".to_string(),
    })
}

#[async_trait]
impl Stage for DataValidation {
    type Input = IngestionArtifact;
    type Output = ValidationArtifact;

    async fn initiate(
        &self,
        config: &RunConfig,
        input: IngestionArtifact,
    ) -> Result<ValidationArtifact> {
        let validation = config.validation.clone();
        tokio::task::spawn_blocking(move || validate(&validation, &input))
            .await
            .context("Validation task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::dataset::fixtures;
    use tempfile::{TempDir, tempdir};

    struct Setup {
        _dir: TempDir,
        config: ValidationConfig,
        ingestion: IngestionArtifact,
    }

    fn setup(train: Table, test: Table) -> Setup {
        let dir = tempdir().unwrap();
        let schema_file_path = dir.path().join("config").join("schema.json");
        fixtures::schema().save(&schema_file_path).unwrap();

        let train_file_path = dir.path().join("train").join("data.csv");
        let test_file_path = dir.path().join("test").join("data.csv");
        train.write_csv(&train_file_path).unwrap();
        test.write_csv(&test_file_path).unwrap();

        Setup {
            config: ValidationConfig {
                schema_file_path,
                report_file_path: dir.path().join("validation").join("report.json"),
            },
            ingestion: IngestionArtifact {
                train_file_path,
                test_file_path,
                is_ingested: true,
                message: String::new(),
            },
            _dir: dir,
        }
    }

    fn read_report(path: &Path) -> ValidationReport {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_valid_dataset_passes() {
        let s = setup(fixtures::linear_table(20), fixtures::linear_table(5));
        let artifact = validate(&s.config, &s.ingestion).unwrap();
        assert!(artifact.is_validated);

        let report = read_report(&s.config.report_file_path);
        assert!(report.is_validated);
        assert_eq!(report.train.rows, 20);
        assert_eq!(report.train.numerical_columns_found, 2);
        assert_eq!(report.train.categorical_columns_found, 1);
    }

    #[test]
    fn test_missing_column_fails_and_writes_report() {
        let mut train = fixtures::linear_table(10);
        train.headers[1] = "x3".into();
        let s = setup(train, fixtures::linear_table(5));

        let err = validate(&s.config, &s.ingestion).unwrap_err();
        assert!(err.to_string().contains("missing columns: x2"), "{err}");

        let report = read_report(&s.config.report_file_path);
        assert!(!report.is_validated);
        assert_eq!(report.train.missing_columns, vec!["x2".to_string()]);
        assert_eq!(report.train.unexpected_columns, vec!["x3".to_string()]);
        assert!(report.test.missing_columns.is_empty());
    }

    #[test]
    fn test_unknown_category_fails() {
        let mut test = fixtures::linear_table(5);
        test.rows[2][2] = "z".into();
        let s = setup(fixtures::linear_table(10), test);

        let err = validate(&s.config, &s.ingestion).unwrap_err();
        assert!(err.to_string().contains("domain of zone"), "{err}");
        let report = read_report(&s.config.report_file_path);
        assert_eq!(report.test.unknown_categories["zone"], vec!["z".to_string()]);
    }

    #[test]
    fn test_numeric_column_with_text_is_counted_categorical() {
        let mut train = fixtures::linear_table(10);
        train.rows[3][0] = "n/a".into();
        let s = setup(train, fixtures::linear_table(5));

        let err = validate(&s.config, &s.ingestion).unwrap_err();
        assert!(err.to_string().contains("numerical columns"), "{err}");
    }

    #[test]
    fn test_absent_split_file_fails() {
        let s = setup(fixtures::linear_table(10), fixtures::linear_table(5));
        std::fs::remove_file(&s.ingestion.test_file_path).unwrap();
        let err = validate(&s.config, &s.ingestion).unwrap_err();
        assert!(err.to_string().contains("not present"));
    }
}
