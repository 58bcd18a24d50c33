//! Labelled celebrity image sources.
//!
//! Listing is cheap (labels and locations only) and image bytes are fetched
//! per entry, so a sampled run never downloads rows it will not embed.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SAMPLE_SIZE: usize = 3000;
pub const DEFAULT_SEED: u64 = 42;

const HUB_ROWS_URL: &str = "https://datasets-server.huggingface.co";
/// The rows endpoint refuses pages larger than this.
const HUB_PAGE_SIZE: usize = 100;
const HUB_CONFIG: &str = "default";
const HUB_SPLIT: &str = "train";
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("http: {0}")]
    Http(String),
    #[error("{url} returned {status}")]
    Status { url: String, status: u16 },
    #[error("unexpected dataset format: {0}")]
    Format(String),
    #[error("dataset {0} has no rows")]
    Empty(String),
}

/// A row as listed, before its image is fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetEntry {
    pub index: usize,
    pub label: String,
    /// File path or image URL.
    pub location: String,
}

/// A labelled image ready to embed.
#[derive(Debug, Clone)]
pub struct DatasetRow {
    pub index: usize,
    pub label: String,
    pub bytes: Vec<u8>,
    /// Human-readable provenance, stored in the point payload.
    pub origin: String,
}

pub trait DatasetSource: Send + Sync {
    fn name(&self) -> &str;

    /// Every row's label and location, in a stable order.
    fn list(&self) -> impl Future<Output = Result<Vec<DatasetEntry>, DatasetError>> + Send;

    fn fetch(&self, entry: &DatasetEntry) -> impl Future<Output = Result<DatasetRow, DatasetError>> + Send;
}

/// Seeded shuffle, then keep the first `sample_size` rows.
///
/// Smaller datasets are returned whole (shuffled).
pub fn sample<T>(mut rows: Vec<T>, sample_size: usize, seed: u64) -> Vec<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    rows.shuffle(&mut rng);
    if rows.len() < sample_size {
        tracing::warn!(
            available = rows.len(),
            requested = sample_size,
            "dataset smaller than sample size, using every row"
        );
    }
    rows.truncate(sample_size);
    rows
}

// ── Image folder ─────────────────────────────────────────────────────────────

/// `root/<label>/<image>`; underscores in directory names become spaces.
pub struct FolderDataset {
    root: PathBuf,
    name: String,
}

impl FolderDataset {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = root.display().to_string();
        Self { root, name }
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> DatasetError + '_ {
    move |source| DatasetError::Io { path: path.to_path_buf(), source }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let mut paths = std::fs::read_dir(dir)
        .map_err(io_err(dir))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err(dir))?;
    paths.sort();
    Ok(paths)
}

impl DatasetSource for FolderDataset {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> Result<Vec<DatasetEntry>, DatasetError> {
        let mut entries = Vec::new();
        for dir in sorted_children(&self.root)? {
            if !dir.is_dir() {
                continue;
            }
            let Some(dir_name) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let label = dir_name.replace('_', " ");
            for file in sorted_children(&dir)? {
                if file.is_file() && is_image(&file) {
                    entries.push(DatasetEntry {
                        index: entries.len(),
                        label: label.clone(),
                        location: file.display().to_string(),
                    });
                }
            }
        }

        if entries.is_empty() {
            return Err(DatasetError::Empty(self.name.clone()));
        }
        tracing::info!(root = %self.root.display(), rows = entries.len(), "listed image folder");
        Ok(entries)
    }

    async fn fetch(&self, entry: &DatasetEntry) -> Result<DatasetRow, DatasetError> {
        let path = Path::new(&entry.location);
        let bytes = tokio::fs::read(path).await.map_err(io_err(path))?;
        Ok(DatasetRow {
            index: entry.index,
            label: entry.label.clone(),
            bytes,
            origin: entry.location.clone(),
        })
    }
}

// ── Hugging Face Hub ─────────────────────────────────────────────────────────

/// A Hub image-classification dataset read through the dataset-viewer rows API.
pub struct HubDataset {
    dataset: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct RowsPage {
    features: Vec<Feature>,
    rows: Vec<RowEntry>,
    num_rows_total: usize,
}

#[derive(Deserialize)]
struct Feature {
    name: String,
    #[serde(rename = "type")]
    kind: Value,
}

#[derive(Deserialize)]
struct RowEntry {
    row_idx: usize,
    row: serde_json::Map<String, Value>,
}

/// Which columns hold the image and the label, and the class names if any.
struct Columns {
    image: String,
    label: String,
    class_names: Vec<String>,
}

impl Columns {
    fn from_features(features: &[Feature]) -> Result<Self, DatasetError> {
        let type_of = |f: &Feature| f.kind.get("_type").and_then(Value::as_str).unwrap_or("").to_string();

        let image = features
            .iter()
            .find(|f| type_of(f) == "Image")
            .map(|f| f.name.clone())
            .ok_or_else(|| DatasetError::Format("no Image column".into()))?;

        let class_label = features.iter().find(|f| type_of(f) == "ClassLabel");
        let (label, class_names) = match class_label {
            Some(f) => {
                let names = f
                    .kind
                    .get("names")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default();
                (f.name.clone(), names)
            }
            None => {
                let f = features
                    .iter()
                    .find(|f| f.name == "label")
                    .ok_or_else(|| DatasetError::Format("no label column".into()))?;
                (f.name.clone(), Vec::new())
            }
        };

        Ok(Self { image, label, class_names })
    }

    fn entry(&self, row: &RowEntry) -> Result<DatasetEntry, DatasetError> {
        let label = match row.row.get(&self.label) {
            Some(Value::Number(n)) => {
                let i = n
                    .as_u64()
                    .ok_or_else(|| DatasetError::Format(format!("row {}: negative class id", row.row_idx)))?;
                self.class_names
                    .get(i as usize)
                    .cloned()
                    .unwrap_or_else(|| i.to_string())
            }
            Some(Value::String(s)) => s.clone(),
            _ => return Err(DatasetError::Format(format!("row {}: missing label", row.row_idx))),
        };

        let src = row
            .row
            .get(&self.image)
            .and_then(|v| v.get("src"))
            .and_then(Value::as_str)
            .ok_or_else(|| DatasetError::Format(format!("row {}: missing image src", row.row_idx)))?;

        Ok(DatasetEntry { index: row.row_idx, label, location: src.to_string() })
    }
}

impl HubDataset {
    pub fn new(dataset: impl Into<String>, timeout_secs: u64) -> Result<Self, DatasetError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DatasetError::Http(e.to_string()))?;
        Ok(Self {
            dataset: dataset.into(),
            base_url: HUB_ROWS_URL.into(),
            client,
        })
    }

    /// Point at another rows server (mirrors, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response, DatasetError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| DatasetError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DatasetError::Status { url: url.to_string(), status: response.status().as_u16() });
        }
        Ok(response)
    }

    async fn page(&self, offset: usize) -> Result<RowsPage, DatasetError> {
        let url = format!("{}/rows", self.base_url);
        let query = [
            ("dataset", self.dataset.clone()),
            ("config", HUB_CONFIG.to_string()),
            ("split", HUB_SPLIT.to_string()),
            ("offset", offset.to_string()),
            ("length", HUB_PAGE_SIZE.to_string()),
        ];
        self.get(&url, &query)
            .await?
            .json()
            .await
            .map_err(|e| DatasetError::Format(e.to_string()))
    }
}

impl DatasetSource for HubDataset {
    fn name(&self) -> &str {
        &self.dataset
    }

    async fn list(&self) -> Result<Vec<DatasetEntry>, DatasetError> {
        let first = self.page(0).await?;
        let columns = Columns::from_features(&first.features)?;
        let total = first.num_rows_total;
        tracing::info!(
            dataset = %self.dataset,
            split = HUB_SPLIT,
            rows = total,
            image_column = %columns.image,
            label_column = %columns.label,
            classes = columns.class_names.len(),
            "loaded dataset metadata"
        );

        let mut entries = Vec::with_capacity(total);
        let mut page = first;
        loop {
            if page.rows.is_empty() {
                break;
            }
            for row in &page.rows {
                entries.push(columns.entry(row)?);
            }
            if entries.len() >= total {
                break;
            }
            page = self.page(entries.len()).await?;
        }

        if entries.is_empty() {
            return Err(DatasetError::Empty(self.dataset.clone()));
        }
        Ok(entries)
    }

    async fn fetch(&self, entry: &DatasetEntry) -> Result<DatasetRow, DatasetError> {
        let bytes = self
            .get(&entry.location, &[])
            .await?
            .bytes()
            .await
            .map_err(|e| DatasetError::Http(e.to_string()))?;
        Ok(DatasetRow {
            index: entry.index,
            label: entry.label.clone(),
            bytes: bytes.to_vec(),
            origin: format!("{}#{}", self.dataset, entry.index),
        })
    }
}
