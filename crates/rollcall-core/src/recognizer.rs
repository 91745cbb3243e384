//! ONNX Runtime backed face embedding model.
//!
//! Takes the NCHW `[1, 3, S, S]` tensor prepared by the embedding pipeline
//! and returns the raw network output; normalization happens in the
//! pipeline.

use std::path::Path;

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;

use crate::embedding::{EmbeddingError, EmbeddingModel};

/// Embedding network loaded into an ort session.
pub struct OnnxEmbeddingModel {
    session: Session,
    version: String,
    embedding_dim: usize,
}

impl OnnxEmbeddingModel {
    /// Load the model from `model_path`. The file stem becomes the model
    /// version recorded on every embedding it produces.
    pub fn load(model_path: &str, embedding_dim: usize) -> Result<Self, EmbeddingError> {
        let path = Path::new(model_path);
        if !path.exists() {
            return Err(EmbeddingError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        let version = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            session,
            version,
            embedding_dim,
        })
    }
}

impl EmbeddingModel for OnnxEmbeddingModel {
    fn embed(&mut self, input: &Array4<f32>) -> Result<Vec<f32>, EmbeddingError> {
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::Inference(format!("embedding extraction: {e}")))?;

        if raw.len() != self.embedding_dim {
            return Err(EmbeddingError::Inference(format!(
                "expected {}-dim embedding, got {}",
                self.embedding_dim,
                raw.len()
            )));
        }

        Ok(raw.to_vec())
    }

    fn model_version(&self) -> Option<&str> {
        Some(&self.version)
    }
}
