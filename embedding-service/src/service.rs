use image::RgbImage;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::model::{Device, VisualEncoder};
use crate::preprocess::decode_base64_image;

/// Application context for the embedding API.
///
/// Holds the loaded encoder, or nothing when startup failed to load one, in
/// which case the service runs degraded and every embedding call answers 503.
pub struct EmbeddingService {
    encoder: Option<Arc<dyn VisualEncoder>>,
    model_name: String,
    max_image_bytes: usize,
}

impl EmbeddingService {
    pub fn new(config: &EmbeddingConfig, encoder: Option<Arc<dyn VisualEncoder>>) -> Self {
        Self {
            encoder,
            model_name: config.model_name.clone(),
            max_image_bytes: config.max_image_bytes,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_loaded(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn device(&self) -> Option<Device> {
        self.encoder.as_ref().map(|e| e.device())
    }

    pub fn dimension(&self) -> Option<usize> {
        self.encoder.as_ref().map(|e| e.dimension())
    }

    fn encoder(&self) -> ServiceResult<Arc<dyn VisualEncoder>> {
        self.encoder.clone().ok_or(ServiceError::ModelNotLoaded)
    }

    fn decode(&self, encoded: &str) -> ServiceResult<RgbImage> {
        decode_base64_image(encoded, self.max_image_bytes).map_err(|e| {
            counter!("embedding_invalid_input_total").increment(1);
            ServiceError::InvalidImage(e)
        })
    }

    /// Embed one base64-encoded image.
    pub async fn embed(&self, encoded: &str) -> ServiceResult<Vec<f32>> {
        let encoder = self.encoder()?;
        let image = self.decode(encoded)?;

        let mut embeddings = run_encoder(encoder, vec![image]).await?;
        embeddings.pop().ok_or_else(|| ServiceError::Internal {
            message: "encoder returned no embedding".to_string(),
        })
    }

    /// Embed a batch of base64-encoded images.
    ///
    /// All images are decoded before inference starts; the first invalid one
    /// rejects the whole batch.
    pub async fn embed_batch(&self, encoded: &[String]) -> ServiceResult<Vec<Vec<f32>>> {
        let encoder = self.encoder()?;
        if encoded.is_empty() {
            return Ok(Vec::new());
        }

        let images = encoded
            .iter()
            .map(|e| self.decode(e))
            .collect::<ServiceResult<Vec<_>>>()?;

        run_encoder(encoder, images).await
    }
}

/// Run the encoder over `images` on the blocking pool, preserving order.
async fn run_encoder(
    encoder: Arc<dyn VisualEncoder>,
    images: Vec<RgbImage>,
) -> ServiceResult<Vec<Vec<f32>>> {
    let count = images.len();
    let started = Instant::now();

    let embeddings = tokio::task::spawn_blocking(move || {
        images
            .iter()
            .map(|image| encoder.encode(image))
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .map_err(|e| ServiceError::Internal {
        message: format!("inference task failed: {e}"),
    })??;

    let elapsed = started.elapsed();
    histogram!("embedding_inference_seconds").record(elapsed.as_secs_f64());
    counter!("embedding_images_total").increment(count as u64);
    debug!(count, elapsed_ms = elapsed.as_millis() as u64, "Embedded images");

    Ok(embeddings)
}
