//! Shared configuration for every CelebTwin binary.
//!
//! Layered as: built-in defaults → optional TOML file → environment variables.
//! Environment names match the ones the ingestion and UI deployments already
//! export (`QDRANT_*`, `DATASET_NAME`) plus `TWIN_*` for everything new.

use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("reading config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("QDRANT_URL must be set to use Qdrant Cloud")]
    MissingCloudUrl,
    #[error("invalid bind address {0:?}")]
    InvalidBindAddr(String),
}

/// Resolved vector-database endpoint.
#[derive(Clone, PartialEq)]
pub struct Endpoint {
    pub url: String,
    pub api_key: Option<String>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub qdrant_host: String,
    pub qdrant_url: String,
    pub qdrant_port: u16,
    pub qdrant_api_key: Option<String>,
    pub collection_name: String,
    pub vector_dimensions: usize,
    pub dataset_name: String,
    pub model_dir: PathBuf,
    pub assets_dir: PathBuf,
    pub bind_addr: String,
    pub top_k: usize,
    pub min_score: Option<f32>,
    pub upsert_batch_size: usize,
    pub upsert_max_retries: u32,
    pub upsert_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            qdrant_host: "localhost".to_string(),
            qdrant_url: String::new(),
            qdrant_port: 6333,
            qdrant_api_key: None,
            collection_name: "celebrities".to_string(),
            vector_dimensions: 512,
            dataset_name: "lansinuote/simple_facenet".to_string(),
            model_dir: default_model_dir(),
            assets_dir: PathBuf::from("assets"),
            bind_addr: "127.0.0.1:8501".to_string(),
            top_k: 1,
            min_score: None,
            upsert_batch_size: 64,
            upsert_max_retries: 3,
            upsert_backoff_ms: 250,
            request_timeout_secs: 30,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("qdrant_host", &self.qdrant_host)
            .field("qdrant_url", &self.qdrant_url)
            .field("qdrant_port", &self.qdrant_port)
            .field("qdrant_api_key", &self.qdrant_api_key.as_ref().map(|_| "<redacted>"))
            .field("collection_name", &self.collection_name)
            .field("vector_dimensions", &self.vector_dimensions)
            .field("dataset_name", &self.dataset_name)
            .field("model_dir", &self.model_dir)
            .field("assets_dir", &self.assets_dir)
            .field("bind_addr", &self.bind_addr)
            .field("top_k", &self.top_k)
            .field("min_score", &self.min_score)
            .field("upsert_batch_size", &self.upsert_batch_size)
            .field("upsert_max_retries", &self.upsert_max_retries)
            .field("upsert_backoff_ms", &self.upsert_backoff_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Default model directory: `$XDG_DATA_HOME/celebtwin/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("celebtwin/models")
}

impl Settings {
    /// Load settings: defaults, then `path` (or `TWIN_CONFIG`) if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// [`Settings::load`] against an arbitrary environment lookup.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| lookup("TWIN_CONFIG").filter(|v| !v.is_empty()).map(PathBuf::from));

        let mut settings = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        settings.apply_env(lookup);
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from an environment lookup. Unset variables leave the field alone.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("QDRANT_HOST") {
            self.qdrant_host = v;
        }
        if let Some(v) = get("QDRANT_URL") {
            self.qdrant_url = v;
        }
        if let Some(v) = get("QDRANT_API_KEY") {
            self.qdrant_api_key = Some(v);
        }
        if let Some(v) = get("QDRANT_COLLECTION_NAME") {
            self.collection_name = v;
        }
        if let Some(v) = get("DATASET_NAME") {
            self.dataset_name = v;
        }
        if let Some(v) = get("TWIN_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = get("TWIN_ASSETS_DIR") {
            self.assets_dir = PathBuf::from(v);
        }
        if let Some(v) = get("TWIN_BIND_ADDR") {
            self.bind_addr = v;
        }

        parse_into(&get, "QDRANT_PORT", &mut self.qdrant_port);
        parse_into(&get, "QDRANT_VECTOR_DIMENSIONS", &mut self.vector_dimensions);
        parse_into(&get, "TWIN_TOP_K", &mut self.top_k);
        parse_into(&get, "TWIN_UPSERT_BATCH_SIZE", &mut self.upsert_batch_size);
        parse_into(&get, "TWIN_UPSERT_MAX_RETRIES", &mut self.upsert_max_retries);
        parse_into(&get, "TWIN_UPSERT_BACKOFF_MS", &mut self.upsert_backoff_ms);
        parse_into(&get, "TWIN_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);

        if let Some(raw) = get("TWIN_MIN_SCORE") {
            match raw.trim().parse::<f32>() {
                Ok(v) => self.min_score = Some(v),
                Err(_) => tracing::warn!(key = "TWIN_MIN_SCORE", value = %raw, "ignoring unparsable environment value"),
            }
        }
    }

    /// Resolve the vector-database endpoint.
    ///
    /// Cloud uses `QDRANT_URL` (adding `QDRANT_PORT` when the URL has none) and the API key;
    /// local uses `http://{QDRANT_HOST}:{QDRANT_PORT}` without a key.
    pub fn endpoint(&self, use_cloud: bool) -> Result<Endpoint, SettingsError> {
        if !use_cloud {
            return Ok(Endpoint {
                url: format!("http://{}:{}", self.qdrant_host, self.qdrant_port),
                api_key: None,
            });
        }

        let url = self.qdrant_url.trim().trim_end_matches('/');
        if url.is_empty() {
            return Err(SettingsError::MissingCloudUrl);
        }

        let url = if has_explicit_port(url) {
            url.to_string()
        } else {
            format!("{url}:{}", self.qdrant_port)
        };

        Ok(Endpoint {
            url,
            api_key: self.qdrant_api_key.clone(),
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, SettingsError> {
        self.bind_addr
            .parse()
            .map_err(|_| SettingsError::InvalidBindAddr(self.bind_addr.clone()))
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir.join("det_10g.onnx").to_string_lossy().into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir.join("w600k_r50.onnx").to_string_lossy().into_owned()
    }

    /// Directory holding display photos for the matched celebrity.
    pub fn celebrities_dir(&self) -> PathBuf {
        self.assets_dir.join("celebrities")
    }
}

fn parse_into<T, G>(get: &G, key: &str, slot: &mut T)
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment value"),
        }
    }
}

/// True when the authority part of `url` already names a port.
fn has_explicit_port(url: &str) -> bool {
    let authority = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = authority.split('/').next().unwrap_or(authority);
    match authority.rsplit_once(':') {
        Some((_, port)) => !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}
