use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::info;

use super::dataset::{Table, first_csv_in, parse_number};
use crate::config::{IngestionConfig, RunConfig};
use crate::pipeline::{IngestionArtifact, Stage};

/// Rows are stratified on this column when it is present.
const STRATIFY_COLUMN: &str = "median_income";
/// Upper bounds of the income categories; the last one is open.
const STRATIFY_BINS: [f64; 4] = [1.5, 3.0, 4.5, 6.0];

/// Fetches the dataset, unpacks it and writes a seeded train/test split.
pub struct DataIngestion {
    client: reqwest::Client,
}

impl DataIngestion {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn fetch(&self, config: &IngestionConfig) -> Result<PathBuf> {
        let source = config.dataset_download_url.as_str();
        tokio::fs::create_dir_all(&config.tgz_download_dir)
            .await
            .with_context(|| format!("Failed to create {}", config.tgz_download_dir.display()))?;

        if source.starts_with("http://") || source.starts_with("https://") {
            let target = config.tgz_download_dir.join(file_name_of(source));
            info!(url = %source, path = %target.display(), "Downloading dataset");
            let response = self
                .client
                .get(source)
                .send()
                .await
                .with_context(|| format!("Failed to download {source}"))?
                .error_for_status()
                .with_context(|| format!("Dataset server rejected {source}"))?;
            let bytes = response
                .bytes()
                .await
                .with_context(|| format!("Failed to read body of {source}"))?;
            tokio::fs::write(&target, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", target.display()))?;
            Ok(target)
        } else {
            let local = PathBuf::from(source.strip_prefix("file://").unwrap_or(source));
            let target = config.tgz_download_dir.join(file_name_of(source));
            info!(path = %local.display(), "Copying local dataset");
            tokio::fs::copy(&local, &target)
                .await
                .with_context(|| format!("Failed to copy dataset from {}", local.display()))?;
            Ok(target)
        }
    }
}

impl Default for DataIngestion {
    fn default() -> Self {
        Self::new()
    }
}

fn file_name_of(source: &str) -> String {
    source
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .map(|name| name.split(['?', '#']).next().unwrap_or(name).to_string())
        .unwrap_or_else(|| "dataset.tgz".to_string())
}

fn is_archive(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(".tgz") || name.ends_with(".tar.gz")
}

/// Unpack (or copy) the downloaded file into a fresh raw data directory.
pub fn extract(downloaded: &Path, raw_data_dir: &Path) -> Result<()> {
    if raw_data_dir.exists() {
        std::fs::remove_dir_all(raw_data_dir)
            .with_context(|| format!("Failed to clear {}", raw_data_dir.display()))?;
    }
    std::fs::create_dir_all(raw_data_dir)
        .with_context(|| format!("Failed to create {}", raw_data_dir.display()))?;

    if is_archive(downloaded) {
        info!(archive = %downloaded.display(), dir = %raw_data_dir.display(), "Extracting dataset");
        let file = File::open(downloaded)
            .with_context(|| format!("Failed to open {}", downloaded.display()))?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive
            .unpack(raw_data_dir)
            .with_context(|| format!("Failed to extract {}", downloaded.display()))?;
    } else {
        let name = downloaded
            .file_name()
            .context("Downloaded dataset has no file name")?;
        std::fs::copy(downloaded, raw_data_dir.join(name))
            .with_context(|| format!("Failed to copy {}", downloaded.display()))?;
    }
    Ok(())
}

fn income_category(value: Option<f64>) -> usize {
    match value {
        Some(v) => STRATIFY_BINS.iter().take_while(|&&bound| v > bound).count(),
        None => STRATIFY_BINS.len() + 1,
    }
}

/// Shuffle row indices with a fixed seed and hold out `test_ratio` of each
/// stratum. Returns `(train, test)`.
pub fn split_indices(table: &Table, test_ratio: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if table.len() < 2 {
        bail!("Dataset needs at least 2 rows to split, found {}", table.len());
    }

    let mut strata: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    match table.column_index(STRATIFY_COLUMN) {
        Some(idx) => {
            for (i, row) in table.rows.iter().enumerate() {
                let value = row.get(idx).and_then(|v| parse_number(v));
                strata.entry(income_category(value)).or_default().push(i);
            }
        }
        None => {
            strata.insert(0, (0..table.len()).collect());
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for (_, mut rows) in strata {
        rows.shuffle(&mut rng);
        let n_test = (rows.len() as f64 * test_ratio).round() as usize;
        test.extend_from_slice(&rows[..n_test]);
        train.extend_from_slice(&rows[n_test..]);
    }

    if test.is_empty() {
        let moved = train.pop().context("Dataset is empty")?;
        test.push(moved);
    }
    if train.is_empty() {
        let moved = test.pop().context("Dataset is empty")?;
        train.push(moved);
    }
    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    Ok((train, test))
}

/// Read the raw CSV, split it and write both halves.
pub fn split_dataset(config: &IngestionConfig) -> Result<IngestionArtifact> {
    let raw_file = first_csv_in(&config.raw_data_dir)?;
    let file_name = raw_file
        .file_name()
        .context("Raw dataset has no file name")?
        .to_owned();
    info!(path = %raw_file.display(), "Reading raw dataset");
    let table = Table::read_csv(&raw_file)?;

    let (train_idx, test_idx) = split_indices(&table, config.test_ratio, config.split_seed)?;
    let train_file_path = config.ingested_train_dir.join(&file_name);
    let test_file_path = config.ingested_test_dir.join(&file_name);
    table.select_rows(&train_idx).write_csv(&train_file_path)?;
    table.select_rows(&test_idx).write_csv(&test_file_path)?;

    info!(
        train_rows = train_idx.len(),
        test_rows = test_idx.len(),
        "Dataset split into train and test"
    );
    Ok(IngestionArtifact {
        train_file_path,
        test_file_path,
        is_ingested: true,
        message: "Data ingestion completed successfully.".to_string(),
    })
}

#[async_trait]
impl Stage for DataIngestion {
    type Input = ();
    type Output = IngestionArtifact;

    async fn initiate(&self, config: &RunConfig, _input: ()) -> Result<IngestionArtifact> {
        let downloaded = self.fetch(&config.ingestion).await?;
        let ingestion = config.ingestion.clone();
        tokio::task::spawn_blocking(move || {
            extract(&downloaded, &ingestion.raw_data_dir)?;
            split_dataset(&ingestion)
        })
        .await
        .context("Ingestion task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::stages::dataset::fixtures;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::tempdir;

    fn income_table(rows: usize) -> Table {
        Table {
            headers: vec!["median_income".into(), "y".into()],
            rows: (0..rows)
                .map(|i| vec![format!("{}", (i % 8) as f64), i.to_string()])
                .collect(),
        }
    }

    #[test]
    fn test_file_name_of() {
        assert_eq!(file_name_of("https://host/data/housing.tgz"), "housing.tgz");
        assert_eq!(file_name_of("https://host/h.tgz?raw=true"), "h.tgz");
        assert_eq!(file_name_of("/tmp/housing.csv"), "housing.csv");
        assert_eq!(file_name_of("https://host/"), "dataset.tgz");
    }

    #[test]
    fn test_split_sizes_follow_ratio() {
        let table = fixtures::linear_table(100);
        let (train, test) = split_indices(&table, 0.2, 42).unwrap();
        assert_eq!(test.len(), 20);
        assert_eq!(train.len(), 80);

        let mut all: Vec<_> = train.iter().chain(&test).copied().collect();
        all.sort();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_is_deterministic_per_seed() {
        let table = income_table(50);
        let a = split_indices(&table, 0.2, 7).unwrap();
        let b = split_indices(&table, 0.2, 7).unwrap();
        let c = split_indices(&table, 0.2, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_split_is_stratified_on_income() {
        let table = income_table(80);
        let (_, test) = split_indices(&table, 0.25, 1).unwrap();
        // categories: <=1.5 has 0,1 -> 20 rows; (1.5,3] has 2,3 -> 20; (3,4.5] 4 -> 10;
        // (4.5,6] 5,6 -> 20; >6 has 7 -> 10
        let count = |lo: f64, hi: f64| {
            test.iter()
                .filter(|&&i| {
                    let v: f64 = table.rows[i][0].parse().unwrap();
                    v > lo && v <= hi
                })
                .count()
        };
        assert_eq!(count(-1.0, 1.5), 5);
        assert_eq!(count(1.5, 3.0), 5);
        assert_eq!(count(4.5, 6.0), 5);
    }

    #[test]
    fn test_split_rejects_tiny_dataset() {
        let table = fixtures::linear_table(1);
        assert!(split_indices(&table, 0.2, 42).is_err());
    }

    #[test]
    fn test_split_keeps_both_sides_nonempty() {
        let table = fixtures::linear_table(2);
        let (train, test) = split_indices(&table, 0.2, 42).unwrap();
        assert_eq!(train.len(), 1);
        assert_eq!(test.len(), 1);
    }

    #[test]
    fn test_extract_tgz_archive() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("housing.csv");
        fixtures::linear_table(5).write_csv(&csv_path).unwrap();

        let archive_path = dir.path().join("housing.tgz");
        let enc = GzEncoder::new(File::create(&archive_path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(enc);
        builder.append_path_with_name(&csv_path, "housing.csv").unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let raw = dir.path().join("raw");
        extract(&archive_path, &raw).unwrap();
        let table = Table::read_csv(&raw.join("housing.csv")).unwrap();
        assert_eq!(table.len(), 5);
    }

    #[tokio::test]
    async fn test_initiate_from_local_csv() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.csv");
        fixtures::linear_table(30).write_csv(&source).unwrap();

        let mut config = PipelineConfig::default();
        config.data_ingestion.dataset_download_url = source.display().to_string();
        let run = RunConfig::resolve(dir.path(), &config, "2024-01-01-00-00-00").unwrap();

        let artifact = DataIngestion::new().initiate(&run, ()).await.unwrap();
        assert!(artifact.is_ingested);
        assert!(artifact.train_file_path.starts_with(&run.ingestion.ingested_train_dir));
        assert_eq!(Table::read_csv(&artifact.train_file_path).unwrap().len(), 24);
        assert_eq!(Table::read_csv(&artifact.test_file_path).unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_initiate_missing_source_fails() {
        let dir = tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.data_ingestion.dataset_download_url =
            dir.path().join("absent.tgz").display().to_string();
        let run = RunConfig::resolve(dir.path(), &config, "ts").unwrap();

        assert!(DataIngestion::new().initiate(&run, ()).await.is_err());
    }
}
