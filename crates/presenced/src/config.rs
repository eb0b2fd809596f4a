use std::path::{Path, PathBuf};
use std::str::FromStr;

use presence_core::Comparison;
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_BIND: &str = "127.0.0.1:8000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_QUEUE_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("unknown match metric {0:?} (expected \"cosine\" or \"euclidean\")")]
    UnknownMetric(String),
    #[error("match threshold {value} out of range for {metric} (expected {expected})")]
    InvalidThreshold {
        metric: &'static str,
        value: f32,
        expected: &'static str,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Daemon configuration.
///
/// Resolved from an optional TOML file named by `PRESENCE_CONFIG`, then
/// overridden by `PRESENCE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address the HTTP server listens on.
    pub bind: String,
    /// Embedding store directory (reference images and embeddings).
    pub db_dir: PathBuf,
    /// Directory of per-day attendance CSV files.
    pub log_dir: PathBuf,
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// Same-person rule used by the matcher.
    pub comparison: Comparison,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
    /// Requests that may wait for the engine thread before callers block.
    pub queue_depth: usize,
}

/// Keys accepted in the TOML config file. All optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub db_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub match_metric: Option<String>,
    pub match_threshold: Option<f32>,
    pub max_upload_bytes: Option<usize>,
    pub queue_depth: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Config {
    /// Load from `PRESENCE_CONFIG` (if set) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match std::env::var("PRESENCE_CONFIG") {
            Ok(path) => FileConfig::load(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge file values with environment overrides looked up through `env`.
    pub fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let path = |key: &str, from_file: Option<PathBuf>, default: &str| {
            env(key)
                .map(PathBuf::from)
                .or(from_file)
                .unwrap_or_else(|| PathBuf::from(default))
        };

        let metric = env("PRESENCE_MATCH_METRIC")
            .or(file.match_metric)
            .unwrap_or_else(|| "cosine".to_string());
        let threshold = env_parsed(&env, "PRESENCE_MATCH_THRESHOLD").or(file.match_threshold);
        let comparison = comparison_from(&metric, threshold)?;

        let max_upload_bytes = env_parsed(&env, "PRESENCE_MAX_UPLOAD_BYTES")
            .or(file.max_upload_bytes)
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        if max_upload_bytes == 0 {
            return Err(ConfigError::Zero("max_upload_bytes"));
        }
        let queue_depth = env_parsed(&env, "PRESENCE_QUEUE_DEPTH")
            .or(file.queue_depth)
            .unwrap_or(DEFAULT_QUEUE_DEPTH);
        if queue_depth == 0 {
            return Err(ConfigError::Zero("queue_depth"));
        }

        Ok(Self {
            bind: env("PRESENCE_BIND")
                .or(file.bind)
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
            db_dir: path("PRESENCE_DB_DIR", file.db_dir, "./db"),
            log_dir: path("PRESENCE_LOG_DIR", file.log_dir, "./logs"),
            model_dir: path("PRESENCE_MODEL_DIR", file.model_dir, "./models"),
            comparison,
            max_upload_bytes,
            queue_depth,
        })
    }
}

/// Cosine similarity lies in [-1, 1]; a distance is never negative.
fn comparison_from(metric: &str, threshold: Option<f32>) -> Result<Comparison, ConfigError> {
    match metric.to_ascii_lowercase().as_str() {
        "cosine" => {
            let min_similarity = threshold.unwrap_or(Comparison::DEFAULT_COSINE);
            if !(-1.0..=1.0).contains(&min_similarity) {
                return Err(ConfigError::InvalidThreshold {
                    metric: "cosine",
                    value: min_similarity,
                    expected: "-1.0 to 1.0",
                });
            }
            Ok(Comparison::Cosine { min_similarity })
        }
        "euclidean" => {
            let max_distance = threshold.unwrap_or(Comparison::DEFAULT_EUCLIDEAN);
            if !max_distance.is_finite() || max_distance < 0.0 {
                return Err(ConfigError::InvalidThreshold {
                    metric: "euclidean",
                    value: max_distance,
                    expected: "a finite number >= 0",
                });
            }
            Ok(Comparison::Euclidean { max_distance })
        }
        other => Err(ConfigError::UnknownMetric(other.to_string())),
    }
}

/// Malformed values fall back to the next source, with a warning.
fn env_parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring malformed environment value");
            None
        }
    }
}
