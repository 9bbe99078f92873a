//! Face embedding extraction.
//!
//! Turns a cropped face into a unit-norm vector. Model geometry (input size,
//! output dimension, normalisation constants and tensor layout) is supplied
//! through [`EmbedderConfig`] so model variants can be swapped without
//! touching the pipeline.

use std::path::Path;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Embedding;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("expected {expected}-dim embedding, got {got}")]
    UnexpectedDim { expected: usize, got: usize },
    #[error("embedding dimensions differ: {0} vs {1}")]
    DimensionMismatch(usize, usize),
    #[error("empty face crop")]
    EmptyInput,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Memory layout of the model's input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, H, W, 3]`, the usual layout for models converted from TFLite.
    Nhwc,
    /// `[1, 3, H, W]`.
    Nchw,
}

/// Geometry and normalisation of an embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// Side of the square input image, in pixels.
    pub input_size: u32,
    pub embedding_dim: usize,
    /// Pixel values are mapped through `(p - mean) / std`.
    pub mean: f32,
    pub std: f32,
    pub layout: TensorLayout,
    pub model_version: String,
}

/// Inference backend. Receives a preprocessed tensor and returns the raw
/// (un-normalised) output vector.
pub trait EmbeddingModel: Send {
    fn infer(&mut self, input: Array4<f32>) -> Result<Vec<f32>, EmbedderError>;
}

/// ONNX Runtime backend.
pub struct OnnxEmbeddingModel {
    session: Session,
}

impl OnnxEmbeddingModel {
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelUnavailable(format!(
                "model file not found: {model_path}"
            )));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .map_err(|e| EmbedderError::ModelUnavailable(format!("{model_path}: {e}")))?;

        tracing::info!(path = model_path, "loaded embedding model");

        Ok(Self { session })
    }
}

impl EmbeddingModel for OnnxEmbeddingModel {
    fn infer(&mut self, input: Array4<f32>) -> Result<Vec<f32>, EmbedderError> {
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        Ok(raw.to_vec())
    }
}

/// Cropped face in, unit-norm [`Embedding`] out.
pub struct FaceEmbedder {
    model: Box<dyn EmbeddingModel>,
    config: EmbedderConfig,
}

impl FaceEmbedder {
    pub fn new(model: Box<dyn EmbeddingModel>, config: EmbedderConfig) -> Self {
        Self { model, config }
    }

    /// Load an ONNX model. Any failure here is fatal for the session.
    pub fn load_onnx(model_path: &str, config: EmbedderConfig) -> Result<Self, EmbedderError> {
        let model = OnnxEmbeddingModel::load(model_path).map_err(|e| match e {
            EmbedderError::ModelUnavailable(msg) => EmbedderError::ModelUnavailable(msg),
            other => EmbedderError::ModelUnavailable(other.to_string()),
        })?;
        Ok(Self::new(Box::new(model), config))
    }

    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    /// Deterministic for a fixed model and input.
    pub fn embed(&mut self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(EmbedderError::EmptyInput);
        }

        let input = self.preprocess(face);
        let raw = self.model.infer(input)?;

        if raw.len() != self.config.embedding_dim {
            return Err(EmbedderError::UnexpectedDim {
                expected: self.config.embedding_dim,
                got: raw.len(),
            });
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(self.config.model_version.clone()),
        })
    }

    /// Resize to the model's square input (bilinear) and normalise into a float tensor.
    fn preprocess(&self, face: &RgbImage) -> Array4<f32> {
        let size = self.config.input_size;
        let resized = image::imageops::resize(face, size, size, FilterType::Triangle);
        let side = size as usize;

        let mut tensor = match self.config.layout {
            TensorLayout::Nhwc => Array4::<f32>::zeros((1, side, side, 3)),
            TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, side, side)),
        };

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let v = (pixel[c] as f32 - self.config.mean) / self.config.std;
                match self.config.layout {
                    TensorLayout::Nhwc => tensor[[0, y, x, c]] = v,
                    TensorLayout::Nchw => tensor[[0, c, y, x]] = v,
                }
            }
        }

        tensor
    }
}

/// Scale to unit length. A zero vector is returned unchanged.
pub fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}

/// Euclidean distance between two embeddings of equal length.
pub fn distance(a: &Embedding, b: &Embedding) -> Result<f32, EmbedderError> {
    euclidean(&a.values, &b.values)
}

pub fn euclidean(a: &[f32], b: &[f32]) -> Result<f32, EmbedderError> {
    if a.len() != b.len() {
        return Err(EmbedderError::DimensionMismatch(a.len(), b.len()));
    }
    Ok(a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Puts the tensor mean in slot 0 and ones elsewhere, so the output
    /// depends on the input.
    struct EchoModel {
        dim: usize,
    }

    impl EmbeddingModel for EchoModel {
        fn infer(&mut self, input: Array4<f32>) -> Result<Vec<f32>, EmbedderError> {
            let mean = input.mean().unwrap_or(0.0);
            let mut out = vec![1.0; self.dim];
            out[0] = mean;
            Ok(out)
        }
    }

    fn config(layout: TensorLayout) -> EmbedderConfig {
        EmbedderConfig {
            input_size: 112,
            embedding_dim: 192,
            mean: 127.5,
            std: 128.0,
            layout,
            model_version: "test".to_string(),
        }
    }

    #[test]
    fn test_embed_is_unit_norm() {
        let mut embedder = FaceEmbedder::new(
            Box::new(EchoModel { dim: 192 }),
            config(TensorLayout::Nhwc),
        );
        let face = RgbImage::from_pixel(64, 80, image::Rgb([200, 100, 50]));
        let emb = embedder.embed(&face).unwrap();
        assert_eq!(emb.dim(), 192);
        let norm: f32 = emb.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm = {norm}");
        assert_eq!(emb.model_version.as_deref(), Some("test"));
    }

    #[test]
    fn test_embed_is_deterministic() {
        let mut embedder = FaceEmbedder::new(
            Box::new(EchoModel { dim: 192 }),
            config(TensorLayout::Nhwc),
        );
        let face = RgbImage::from_fn(50, 50, |x, y| image::Rgb([(x * 5) as u8, (y * 5) as u8, 7]));
        let a = embedder.embed(&face).unwrap();
        let b = embedder.embed(&face).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_preprocess_shapes_follow_layout() {
        let face = RgbImage::from_pixel(30, 30, image::Rgb([128, 128, 128]));

        let nhwc = FaceEmbedder::new(
            Box::new(EchoModel { dim: 192 }),
            config(TensorLayout::Nhwc),
        );
        assert_eq!(nhwc.preprocess(&face).shape(), &[1, 112, 112, 3]);

        let nchw = FaceEmbedder::new(
            Box::new(EchoModel { dim: 192 }),
            EmbedderConfig {
                input_size: 160,
                ..config(TensorLayout::Nchw)
            },
        );
        assert_eq!(nchw.preprocess(&face).shape(), &[1, 3, 160, 160]);
    }

    #[test]
    fn test_preprocess_normalisation() {
        let face = RgbImage::from_pixel(112, 112, image::Rgb([255, 0, 128]));
        let embedder = FaceEmbedder::new(
            Box::new(EchoModel { dim: 192 }),
            config(TensorLayout::Nhwc),
        );
        let t = embedder.preprocess(&face);
        assert!((t[[0, 5, 5, 0]] - (255.0 - 127.5) / 128.0).abs() < 1e-6);
        assert!((t[[0, 5, 5, 1]] - (0.0 - 127.5) / 128.0).abs() < 1e-6);
        assert!((t[[0, 5, 5, 2]] - (128.0 - 127.5) / 128.0).abs() < 1e-6);
    }

    #[test]
    fn test_wrong_output_dim_is_error() {
        let mut embedder = FaceEmbedder::new(
            Box::new(EchoModel { dim: 128 }),
            config(TensorLayout::Nhwc),
        );
        let face = RgbImage::from_pixel(20, 20, image::Rgb([1, 2, 3]));
        let err = embedder.embed(&face).unwrap_err();
        assert!(matches!(
            err,
            EmbedderError::UnexpectedDim { expected: 192, got: 128 }
        ));
    }

    #[test]
    fn test_empty_crop_is_error() {
        let mut embedder = FaceEmbedder::new(
            Box::new(EchoModel { dim: 192 }),
            config(TensorLayout::Nhwc),
        );
        let err = embedder.embed(&RgbImage::new(0, 0)).unwrap_err();
        assert!(matches!(err, EmbedderError::EmptyInput));
    }

    #[test]
    fn test_missing_model_file_is_unavailable() {
        let err = FaceEmbedder::load_onnx("/nonexistent/model.onnx", config(TensorLayout::Nhwc))
            .err()
            .unwrap();
        assert!(matches!(err, EmbedderError::ModelUnavailable(_)));
    }

    #[test]
    fn test_distance_is_symmetric_and_zero_on_self() {
        let a = Embedding {
            values: l2_normalize(vec![0.3, -1.2, 4.0, 0.0]),
            model_version: None,
        };
        let b = Embedding {
            values: l2_normalize(vec![1.0, 2.0, -3.0, 0.5]),
            model_version: None,
        };
        assert_eq!(distance(&a, &b).unwrap(), distance(&b, &a).unwrap());
        assert_eq!(distance(&a, &a).unwrap(), 0.0);
    }

    #[test]
    fn test_distance_known_value() {
        let d = euclidean(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!((d - std::f32::consts::SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_distance_rejects_mismatched_lengths() {
        let err = euclidean(&[1.0, 0.0], &[1.0]).unwrap_err();
        assert!(matches!(err, EmbedderError::DimensionMismatch(2, 1)));
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}
