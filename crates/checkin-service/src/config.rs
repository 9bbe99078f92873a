use std::path::{Path, PathBuf};
use std::time::Duration;

use checkin_core::{EmbedderConfig, EmbedderError, FaceEmbedder, PipelineConfig, TensorLayout};
use checkin_models::{InputLayout, ModelFile, ModelIntegrityError};
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
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Model(#[from] ModelIntegrityError),
}

/// Service configuration.
///
/// Built from defaults, then an optional TOML file, then `CHECKIN_*`
/// environment variables, each layer overriding the previous one.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing the embedding model files.
    pub model_dir: PathBuf,
    /// `mobilefacenet` or `facenet`.
    pub model_variant: String,
    /// Pinned SHA-256 of the model file; unchecked when absent.
    pub model_sha256: Option<String>,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    pub pipeline: PipelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            model_dir: data_dir.join("models"),
            model_variant: checkin_models::DEFAULT_VARIANT.to_string(),
            model_sha256: None,
            db_path: data_dir.join("checkin.db"),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `CHECKIN_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read a TOML file, then apply environment overrides on top.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("CHECKIN_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CHECKIN_MODEL_VARIANT") {
            self.model_variant = v;
        }
        if let Ok(v) = std::env::var("CHECKIN_MODEL_SHA256") {
            self.model_sha256 = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = std::env::var("CHECKIN_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }

        let p = &mut self.pipeline;
        p.accept_distance = env_f32("CHECKIN_ACCEPT_DISTANCE", p.accept_distance);
        p.required_matches = env_u32("CHECKIN_REQUIRED_MATCHES", p.required_matches);
        p.frame_interval = env_millis("CHECKIN_FRAME_INTERVAL_MS", p.frame_interval);
        p.challenge_timeout = env_millis("CHECKIN_CHALLENGE_TIMEOUT_MS", p.challenge_timeout);
        p.min_face_ratio = env_f32("CHECKIN_MIN_FACE_RATIO", p.min_face_ratio);
        p.zoom_face_ratio = env_f32("CHECKIN_ZOOM_FACE_RATIO", p.zoom_face_ratio);
        p.crop_margin = env_f32("CHECKIN_CROP_MARGIN", p.crop_margin);
    }

    pub fn model(&self) -> Result<&'static ModelFile, ConfigError> {
        Ok(checkin_models::find(&self.model_variant)?)
    }

    /// Path of the configured model file, after existence and checksum checks.
    pub fn model_path(&self) -> Result<PathBuf, ConfigError> {
        let model = self.model()?;
        Ok(checkin_models::verify_model(
            model,
            &self.model_dir,
            self.model_sha256.as_deref(),
        )?)
    }

    pub fn embedder_config(&self) -> Result<EmbedderConfig, ConfigError> {
        Ok(embedder_config_for(self.model()?))
    }

    /// Verify and load the embedding model.
    ///
    /// Every failure here is reported as [`EmbedderError::ModelUnavailable`],
    /// the fatal configuration error of a session.
    pub fn load_embedder(&self) -> Result<FaceEmbedder, EmbedderError> {
        let unavailable = |e: ConfigError| EmbedderError::ModelUnavailable(e.to_string());
        let config = self.embedder_config().map_err(unavailable)?;
        let path = self.model_path().map_err(unavailable)?;

        let embedder = FaceEmbedder::load_onnx(&path.to_string_lossy(), config)?;
        tracing::info!(
            path = %path.display(),
            variant = %self.model_variant,
            "embedding model loaded"
        );
        Ok(embedder)
    }
}

/// Embedder geometry for a manifest entry.
pub fn embedder_config_for(model: &ModelFile) -> EmbedderConfig {
    EmbedderConfig {
        input_size: model.input_size,
        embedding_dim: model.embedding_dim,
        mean: model.mean,
        std: model.std,
        layout: match model.layout {
            InputLayout::Nhwc => TensorLayout::Nhwc,
            InputLayout::Nchw => TensorLayout::Nchw,
        },
        model_version: model.variant.to_string(),
    }
}

/// `$XDG_DATA_HOME/checkin`, falling back to `~/.local/share/checkin`.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("checkin")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
