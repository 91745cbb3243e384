use std::path::{Path, PathBuf};

use rollcall_core::{AnalyzerConfig, EmbeddingConfig, MatchConfig};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Tuning sections accepted in the optional TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub analyzer: AnalyzerConfig,
    pub embedding: EmbeddingConfig,
    pub matching: MatchConfig,
}

/// Daemon configuration: defaults, then the optional `ROLLCALL_CONFIG` TOML
/// file, then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Embedding model file name inside `model_dir`.
    pub model_file: String,
    /// Pinned SHA-256 of the model; falls back to the `.sha256` sidecar.
    pub model_sha256: Option<String>,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Seconds between enrolled-set reloads during a session (0 disables).
    pub gallery_refresh_secs: u64,
    pub analyzer: AnalyzerConfig,
    pub embedding: EmbeddingConfig,
    pub matching: MatchConfig,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` in place of the environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let file = match lookup("ROLLCALL_CONFIG") {
            Some(path) => load_file(Path::new(&path))?,
            None => FileConfig::default(),
        };

        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let mut config = Self {
            model_dir: lookup("ROLLCALL_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("models")),
            model_file: lookup("ROLLCALL_MODEL_FILE")
                .unwrap_or_else(|| rollcall_models::DEFAULT_EMBEDDING_MODEL.to_string()),
            model_sha256: lookup("ROLLCALL_MODEL_SHA256"),
            db_path: lookup("ROLLCALL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("identities.db")),
            gallery_refresh_secs: 30,
            analyzer: file.analyzer,
            embedding: file.embedding,
            matching: file.matching,
        };
        config.apply_overrides(&lookup);
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        self.gallery_refresh_secs =
            parsed(lookup, "ROLLCALL_GALLERY_REFRESH_SECS", self.gallery_refresh_secs);

        let m = &mut self.matching;
        m.attendance_threshold = parsed(lookup, "ROLLCALL_ATTENDANCE_THRESHOLD", m.attendance_threshold);
        m.duplicate_threshold = parsed(lookup, "ROLLCALL_DUPLICATE_THRESHOLD", m.duplicate_threshold);

        let a = &mut self.analyzer;
        a.preview_width = parsed(lookup, "ROLLCALL_PREVIEW_WIDTH", a.preview_width);
        a.preview_height = parsed(lookup, "ROLLCALL_PREVIEW_HEIGHT", a.preview_height);
        a.checking_timeout_ms = parsed(lookup, "ROLLCALL_CHECKING_TIMEOUT_MS", a.checking_timeout_ms);
        a.required_live_frames = parsed(lookup, "ROLLCALL_REQUIRED_LIVE_FRAMES", a.required_live_frames);
        if let Some(v) = lookup("ROLLCALL_LIVENESS_GATING") {
            a.enable_liveness_gating = v != "0";
        }

        let e = &mut self.embedding;
        e.input_size = parsed(lookup, "ROLLCALL_INPUT_SIZE", e.input_size);
        e.embedding_dim = parsed(lookup, "ROLLCALL_EMBEDDING_DIM", e.embedding_dim);
    }

    /// Path to the embedding model.
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_file)
    }
}

fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(file)
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable environment value");
            default
        }),
        None => default,
    }
}
