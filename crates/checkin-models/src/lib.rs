use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Memory layout the model expects for its input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    Nhwc,
    Nchw,
}

/// Embedding model descriptor: variant name, expected filename and input/output geometry.
#[derive(Debug)]
pub struct ModelFile {
    pub variant: &'static str,
    pub name: &'static str,
    /// Square input side in pixels.
    pub input_size: u32,
    pub embedding_dim: usize,
    pub mean: f32,
    pub std: f32,
    pub layout: InputLayout,
}

// Expected digests are supplied by configuration, none are bundled.
pub const MODELS: &[ModelFile] = &[
    ModelFile {
        variant: "mobilefacenet",
        name: "mobilefacenet.onnx",
        input_size: 112,
        embedding_dim: 192,
        mean: 127.5,
        std: 128.0,
        layout: InputLayout::Nhwc,
    },
    ModelFile {
        variant: "facenet",
        name: "facenet.onnx",
        input_size: 160,
        embedding_dim: 128,
        mean: 127.5,
        std: 127.5,
        layout: InputLayout::Nhwc,
    },
];

pub const DEFAULT_VARIANT: &str = "mobilefacenet";

/// Look up a variant by name (case-insensitive).
pub fn find(variant: &str) -> Result<&'static ModelFile, ModelIntegrityError> {
    MODELS
        .iter()
        .find(|m| m.variant.eq_ignore_ascii_case(variant))
        .ok_or_else(|| ModelIntegrityError::UnknownVariant(variant.to_string()))
}

#[derive(Error, Debug)]
pub enum ModelIntegrityError {
    #[error("unknown model variant: {0}")]
    UnknownVariant(String),

    #[error("model file not found: {name} ({path})")]
    MissingModel { name: &'static str, path: PathBuf },

    #[error("failed to open model file: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read model file: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "model checksum mismatch for {name} ({path})\n  expected: {expected}\n  got:      {got}"
    )]
    ChecksumMismatch {
        name: &'static str,
        path: PathBuf,
        expected: String,
        got: String,
    },
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file_hex(path: &Path) -> Result<String, ModelIntegrityError> {
    let mut file = fs::File::open(path).map_err(|source| ModelIntegrityError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file
            .read(&mut buf)
            .map_err(|source| ModelIntegrityError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn verify_file_sha256(
    name: &'static str,
    path: &Path,
    expected_sha256: &str,
) -> Result<(), ModelIntegrityError> {
    if !path.exists() {
        return Err(ModelIntegrityError::MissingModel {
            name,
            path: path.to_path_buf(),
        });
    }

    let digest = sha256_file_hex(path)?;
    if !digest.eq_ignore_ascii_case(expected_sha256.trim()) {
        return Err(ModelIntegrityError::ChecksumMismatch {
            name,
            path: path.to_path_buf(),
            expected: expected_sha256.to_string(),
            got: digest,
        });
    }

    Ok(())
}

/// Resolve `model` inside `model_dir`, check it exists and, when a digest is
/// pinned, that it matches. Returns the model path.
pub fn verify_model(
    model: &'static ModelFile,
    model_dir: &Path,
    pinned_sha256: Option<&str>,
) -> Result<PathBuf, ModelIntegrityError> {
    let path = model_dir.join(model.name);
    match pinned_sha256 {
        Some(expected) => verify_file_sha256(model.name, &path, expected)?,
        None if !path.exists() => {
            return Err(ModelIntegrityError::MissingModel {
                name: model.name,
                path,
            })
        }
        None => {}
    }
    Ok(path)
}
