//! Face crop → embedding pipeline.
//!
//! The pipeline owns the model handle and applies the steps around it:
//! crop the face box out of the captured frame, reject crops too small to
//! embed reliably, resize to the model input, scale every channel to [0,1],
//! invoke the model and L2-normalize the result. Diagnostics about the
//! produced vector are computed alongside but never gate acceptance.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use thiserror::Error;

use crate::capture;
use crate::config::EmbeddingConfig;
use crate::types::{Embedding, FaceBox};

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding model is not loaded")]
    ModelNotLoaded,
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("face crop too small: {width}x{height} (minimum {min}px)")]
    PoorQuality { width: u32, height: u32, min: u32 },
    #[error("embedding extraction failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// External embedding network: NCHW `[1, 3, S, S]` input in [0,1], flat output.
pub trait EmbeddingModel: Send {
    fn embed(&mut self, input: &Array4<f32>) -> Result<Vec<f32>, EmbeddingError>;

    fn model_version(&self) -> Option<&str> {
        None
    }
}

/// Diagnostics about an extracted embedding.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct EmbeddingQuality {
    pub norm: f32,
    /// Norm within 10% of 1.0.
    pub is_normalized: bool,
    /// Every component within [-2, 2].
    pub has_valid_range: bool,
    pub non_zero_ratio: f32,
    pub std_dev: f32,
    /// Weighted composite in [0,1].
    pub score: f32,
}

/// Embedding plus its diagnostics.
#[derive(Debug, Clone)]
pub struct ExtractedEmbedding {
    pub embedding: Embedding,
    pub quality: EmbeddingQuality,
}

pub struct EmbeddingPipeline {
    model: Option<Box<dyn EmbeddingModel>>,
    config: EmbeddingConfig,
}

impl EmbeddingPipeline {
    pub fn new(model: Box<dyn EmbeddingModel>, config: EmbeddingConfig) -> Self {
        Self {
            model: Some(model),
            config,
        }
    }

    /// A pipeline with no model; every extraction fails with `ModelNotLoaded`.
    pub fn unloaded(config: EmbeddingConfig) -> Self {
        Self {
            model: None,
            config,
        }
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Drop the model handle.
    pub fn release(&mut self) {
        if self.model.take().is_some() {
            tracing::debug!("embedding model released");
        }
    }

    /// Crop `face` (preview coordinates) out of `frame` and embed it.
    pub fn extract_from_frame(
        &mut self,
        frame: &RgbImage,
        face: &FaceBox,
        preview_width: f32,
        preview_height: f32,
    ) -> Result<ExtractedEmbedding, EmbeddingError> {
        let rect = capture::crop_rect(face, preview_width, preview_height, frame.width(), frame.height())
            .ok_or_else(|| EmbeddingError::Inference("face box lies outside the frame".to_string()))?;
        let crop = imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image();
        self.extract(&crop)
    }

    /// Embed an already cropped face.
    pub fn extract(&mut self, face: &RgbImage) -> Result<ExtractedEmbedding, EmbeddingError> {
        let model = self.model.as_mut().ok_or(EmbeddingError::ModelNotLoaded)?;

        let (width, height) = face.dimensions();
        if width.min(height) < self.config.min_face_size {
            return Err(EmbeddingError::PoorQuality {
                width,
                height,
                min: self.config.min_face_size,
            });
        }

        let size = self.config.input_size;
        let resized = imageops::resize(face, size, size, FilterType::Triangle);
        let input = preprocess(&resized);

        let raw = model.embed(&input)?;
        if raw.len() != self.config.embedding_dim {
            return Err(EmbeddingError::Inference(format!(
                "expected {}-dim embedding, got {}",
                self.config.embedding_dim,
                raw.len()
            )));
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::Inference(
                "model produced non-finite values".to_string(),
            ));
        }

        let values = l2_normalize(raw);
        let quality = embedding_quality(&values);
        tracing::debug!(
            crop_width = width,
            crop_height = height,
            norm = quality.norm,
            quality = quality.score,
            "embedding extracted"
        );

        Ok(ExtractedEmbedding {
            embedding: Embedding {
                values,
                model_version: model.model_version().map(str::to_string),
            },
            quality,
        })
    }
}

/// Square RGB image into a `[1, 3, S, S]` tensor with channels scaled to [0,1].
pub fn preprocess(image: &RgbImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
        tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
        tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }

    tensor
}

/// Divide by the Euclidean norm. An all-zero vector is returned unchanged.
pub fn l2_normalize(values: Vec<f32>) -> Vec<f32> {
    let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter().map(|x| x / norm).collect()
    } else {
        values
    }
}

/// Composite quality: 30% normalization, 20% range validity, 30% non-zero
/// ratio, 20% spread (standard deviation scaled by √D, capped at 1).
pub fn embedding_quality(values: &[f32]) -> EmbeddingQuality {
    if values.is_empty() {
        return EmbeddingQuality {
            norm: 0.0,
            is_normalized: false,
            has_valid_range: false,
            non_zero_ratio: 0.0,
            std_dev: 0.0,
            score: 0.0,
        };
    }

    let n = values.len() as f32;
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    let is_normalized = (norm - 1.0).abs() <= 0.1;
    let has_valid_range = values.iter().all(|v| (-2.0..=2.0).contains(v));
    let non_zero_ratio = values.iter().filter(|v| v.abs() > 1e-6).count() as f32 / n;

    let mean = values.iter().sum::<f32>() / n;
    let std_dev = (values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt();
    let spread = (std_dev * n.sqrt()).min(1.0);

    let score = (0.3 * is_normalized as u8 as f32
        + 0.2 * has_valid_range as u8 as f32
        + 0.3 * non_zero_ratio
        + 0.2 * spread)
        .clamp(0.0, 1.0);

    EmbeddingQuality {
        norm,
        is_normalized,
        has_valid_range,
        non_zero_ratio,
        std_dev,
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const DIM: usize = 8;

    /// Deterministic stand-in: channel means followed by fixed components.
    struct ChannelMeanModel;

    impl EmbeddingModel for ChannelMeanModel {
        fn embed(&mut self, input: &Array4<f32>) -> Result<Vec<f32>, EmbeddingError> {
            let mut out = Vec::with_capacity(DIM);
            for c in 0..3 {
                out.push(input.index_axis(ndarray::Axis(1), c).mean().unwrap_or(0.0));
            }
            out.extend_from_slice(&[0.5, -0.5, 0.25, -0.25, 1.0]);
            Ok(out)
        }

        fn model_version(&self) -> Option<&str> {
            Some("channel-mean")
        }
    }

    struct FailingModel;

    impl EmbeddingModel for FailingModel {
        fn embed(&mut self, _input: &Array4<f32>) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Inference("delegate crashed".to_string()))
        }
    }

    struct WrongDimModel;

    impl EmbeddingModel for WrongDimModel {
        fn embed(&mut self, _input: &Array4<f32>) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0; DIM + 1])
        }
    }

    fn config() -> EmbeddingConfig {
        EmbeddingConfig {
            input_size: 32,
            embedding_dim: DIM,
            min_face_size: 80,
        }
    }

    fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(color))
    }

    #[test]
    fn test_l2_normalize_unit_norm() {
        let v = l2_normalize(vec![3.0, 4.0, 0.0, -12.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!((v[0] - 3.0 / 13.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_is_noop() {
        let zero = vec![0.0f32; 16];
        assert_eq!(l2_normalize(zero.clone()), zero);
    }

    #[test]
    fn test_l2_normalize_idempotent() {
        let once = l2_normalize(vec![0.2, -0.7, 1.3, 0.05]);
        let twice = l2_normalize(once.clone());
        for (a, b) in once.iter().zip(&twice) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let img = solid(32, 32, [255, 0, 51]);
        let tensor = preprocess(&img);
        assert_eq!(tensor.shape(), &[1, 3, 32, 32]);
        assert_eq!(tensor[[0, 0, 5, 7]], 1.0);
        assert_eq!(tensor[[0, 1, 5, 7]], 0.0);
        assert!((tensor[[0, 2, 5, 7]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_extract_produces_normalized_embedding() {
        let mut pipeline = EmbeddingPipeline::new(Box::new(ChannelMeanModel), config());
        let out = pipeline.extract(&solid(120, 100, [255, 128, 0])).unwrap();
        assert_eq!(out.embedding.dim(), DIM);
        assert_eq!(out.embedding.model_version.as_deref(), Some("channel-mean"));
        assert!((out.quality.norm - 1.0).abs() < 1e-5);
        assert!(out.quality.is_normalized);
        assert!(out.quality.has_valid_range);
        assert!(out.quality.score > 0.5 && out.quality.score <= 1.0);
    }

    #[test]
    fn test_small_crop_rejected() {
        let mut pipeline = EmbeddingPipeline::new(Box::new(ChannelMeanModel), config());
        let err = pipeline.extract(&solid(200, 79, [10, 10, 10])).unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::PoorQuality {
                width: 200,
                height: 79,
                min: 80
            }
        ));
    }

    #[test]
    fn test_unloaded_and_released_models_fail() {
        let mut pipeline = EmbeddingPipeline::unloaded(config());
        assert!(matches!(
            pipeline.extract(&solid(100, 100, [0, 0, 0])),
            Err(EmbeddingError::ModelNotLoaded)
        ));

        let mut pipeline = EmbeddingPipeline::new(Box::new(ChannelMeanModel), config());
        assert!(pipeline.is_loaded());
        pipeline.release();
        assert!(!pipeline.is_loaded());
        assert!(matches!(
            pipeline.extract(&solid(100, 100, [0, 0, 0])),
            Err(EmbeddingError::ModelNotLoaded)
        ));
    }

    #[test]
    fn test_model_failures_surface_as_errors() {
        let mut failing = EmbeddingPipeline::new(Box::new(FailingModel), config());
        let err = failing.extract(&solid(100, 100, [0, 0, 0])).unwrap_err();
        assert_eq!(err.to_string(), "embedding extraction failed: delegate crashed");

        let mut wrong = EmbeddingPipeline::new(Box::new(WrongDimModel), config());
        assert!(matches!(
            wrong.extract(&solid(100, 100, [0, 0, 0])),
            Err(EmbeddingError::Inference(_))
        ));
    }

    #[test]
    fn test_extract_from_frame_crops_face_box() {
        let mut pipeline = EmbeddingPipeline::new(Box::new(ChannelMeanModel), config());
        // Red face region on a blue frame; the preview is half the frame size.
        let mut frame = solid(400, 400, [0, 0, 255]);
        for y in 100..300 {
            for x in 100..300 {
                frame.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }
        let face = FaceBox {
            left: 50.0,
            top: 50.0,
            right: 150.0,
            bottom: 150.0,
        };
        let out = pipeline.extract_from_frame(&frame, &face, 200.0, 200.0).unwrap();
        // Red channel dominates, blue absent.
        assert!(out.embedding.values[0] > 0.0);
        assert_eq!(out.embedding.values[2], 0.0);

        let outside = FaceBox {
            left: 300.0,
            top: 300.0,
            right: 400.0,
            bottom: 400.0,
        };
        assert!(pipeline.extract_from_frame(&frame, &outside, 200.0, 200.0).is_err());
    }

    #[test]
    fn test_quality_of_zero_vector() {
        let q = embedding_quality(&[0.0; 8]);
        assert!(!q.is_normalized);
        assert!(q.has_valid_range);
        assert_eq!(q.non_zero_ratio, 0.0);
        assert!((q.score - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_quality_flags_out_of_range() {
        let q = embedding_quality(&[3.0, 0.0, 0.0, 0.0]);
        assert!(!q.has_valid_range);
        assert!(!q.is_normalized);
        assert_eq!(q.non_zero_ratio, 0.25);
    }
}
