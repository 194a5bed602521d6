//! Visual encoder abstraction and the ONNX Runtime backend.
//!
//! The encoder turns one RGB page image into a single pooled embedding.
//! Multi-vector models emit `[batch, tokens, dim]`; those are mean-pooled over
//! the token axis so callers always receive a fixed-length vector.

use image::RgbImage;
use serde::Serialize;
use std::fmt;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::ModelError;

/// Execution device reported by the loaded encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded image embedding model.
///
/// `encode` is blocking and CPU/GPU bound; call it from `spawn_blocking`.
pub trait VisualEncoder: Send + Sync {
    fn encode(&self, image: &RgbImage) -> Result<Vec<f32>, ModelError>;

    fn device(&self) -> Device;

    fn dimension(&self) -> usize;
}

/// Average token vectors into one vector.
///
/// `tokens` is a row-major `[n_tokens, dim]` buffer.
pub fn mean_pool(tokens: &[f32], dim: usize) -> Result<Vec<f32>, ModelError> {
    if dim == 0 || tokens.is_empty() || tokens.len() % dim != 0 {
        return Err(ModelError::OutputShape {
            shape: vec![tokens.len(), dim],
        });
    }

    let count = tokens.len() / dim;
    let mut pooled = vec![0.0f32; dim];
    for row in tokens.chunks_exact(dim) {
        for (acc, value) in pooled.iter_mut().zip(row) {
            *acc += value;
        }
    }
    for value in &mut pooled {
        *value /= count as f32;
    }

    Ok(pooled)
}

/// Open a session on the device named by `DEVICE`.
///
/// `auto` tries CUDA and falls back to CPU, `cuda` fails without a GPU and
/// `cpu` never tries CUDA.
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
fn select_device<S>(
    requested: &str,
    cuda: impl FnOnce() -> Result<S, ModelError>,
    cpu: impl FnOnce() -> Result<S, ModelError>,
) -> Result<(S, Device), ModelError> {
    let requested = requested.to_ascii_lowercase();
    if requested != "cpu" {
        match cuda() {
            Ok(session) => return Ok((session, Device::Cuda)),
            Err(e) if requested == "cuda" => return Err(e),
            Err(e) => {
                warn!(error = %e, "CUDA execution provider failed, falling back to CPU");
            }
        }
    }

    Ok((cpu()?, Device::Cpu))
}

/// Load the encoder described by the configuration.
#[cfg(feature = "onnx")]
pub fn load_encoder(config: &EmbeddingConfig) -> Result<Box<dyn VisualEncoder>, ModelError> {
    Ok(Box::new(onnx::OnnxVisualEncoder::load(config)?))
}

#[cfg(not(feature = "onnx"))]
pub fn load_encoder(_config: &EmbeddingConfig) -> Result<Box<dyn VisualEncoder>, ModelError> {
    Err(ModelError::Unavailable {
        message: "built without the `onnx` feature".to_string(),
    })
}

#[cfg(feature = "onnx")]
mod onnx {
    use image::{Rgb, RgbImage};
    use ndarray::Array4;
    use ort::execution_providers::{
        CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    };
    use ort::session::Session;
    use ort::session::builder::GraphOptimizationLevel;
    use ort::value::Value;
    use std::path::Path;
    use std::sync::Mutex;
    use tracing::info;

    use super::{Device, VisualEncoder, mean_pool, select_device};
    use crate::config::EmbeddingConfig;
    use crate::error::ModelError;
    use crate::preprocess::to_chw_tensor;

    fn runtime_error(e: impl std::fmt::Display) -> ModelError {
        ModelError::Runtime {
            message: e.to_string(),
        }
    }

    /// ONNX export of a visual document retriever
    pub struct OnnxVisualEncoder {
        session: Mutex<Session>,
        input_name: String,
        image_size: u32,
        device: Device,
        dimension: usize,
    }

    impl OnnxVisualEncoder {
        pub fn load(config: &EmbeddingConfig) -> Result<Self, ModelError> {
            let model_path = config.model_path();
            if !model_path.exists() {
                return Err(ModelError::NotFound {
                    path: model_path.display().to_string(),
                });
            }

            let (session, device) = build_session(&model_path, config)?;
            let mut encoder = Self {
                session: Mutex::new(session),
                input_name: config.model_input_name.clone(),
                image_size: config.image_size,
                device,
                dimension: 0,
            };

            // Validate the graph and learn the embedding width
            let probe = RgbImage::from_pixel(config.image_size, config.image_size, Rgb([255; 3]));
            encoder.dimension = encoder.encode(&probe)?.len();

            info!(
                path = %model_path.display(),
                device = %device,
                dim = encoder.dimension,
                "Visual encoder loaded"
            );
            Ok(encoder)
        }
    }

    fn build_session(
        model_path: &Path,
        config: &EmbeddingConfig,
    ) -> Result<(Session, Device), ModelError> {
        // Registration failures must surface, or a CPU session would be
        // reported as CUDA
        let cuda = || {
            commit_session(
                model_path,
                config,
                CUDAExecutionProvider::default().build().error_on_failure(),
            )
        };
        let cpu = || {
            commit_session(
                model_path,
                config,
                CPUExecutionProvider::default().build(),
            )
        };

        select_device(&config.device, cuda, cpu)
    }

    fn commit_session(
        model_path: &Path,
        config: &EmbeddingConfig,
        provider: ExecutionProviderDispatch,
    ) -> Result<Session, ModelError> {
        Session::builder()
            .map_err(runtime_error)?
            .with_execution_providers([provider])
            .map_err(runtime_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(runtime_error)?
            .with_intra_threads(config.intra_threads)
            .map_err(runtime_error)?
            .commit_from_file(model_path)
            .map_err(runtime_error)
    }

    impl VisualEncoder for OnnxVisualEncoder {
        fn encode(&self, image: &RgbImage) -> Result<Vec<f32>, ModelError> {
            let size = self.image_size as usize;
            let pixels = Array4::from_shape_vec((1, 3, size, size), to_chw_tensor(image, self.image_size))
                .map_err(runtime_error)?;
            let input = Value::from_array(pixels).map_err(runtime_error)?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| runtime_error("session lock poisoned"))?;
            let outputs = session
                .run(ort::inputs![self.input_name.as_str() => input])
                .map_err(runtime_error)?;

            let output = outputs[0]
                .try_extract_array::<f32>()
                .map_err(runtime_error)?;
            let shape = output.shape().to_vec();
            let values: Vec<f32> = output.iter().copied().collect();

            match shape.as_slice() {
                // [batch, tokens, dim]: pool the first batch entry
                [_, tokens, dim] if *tokens > 0 => mean_pool(&values[..tokens * dim], *dim),
                // Already pooled
                [_, dim] if *dim > 0 => Ok(values[..*dim].to_vec()),
                _ => Err(ModelError::OutputShape { shape }),
            }
        }

        fn device(&self) -> Device {
            self.device
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }
}
