use config::{Config, Environment};
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{ServiceError, ServiceResult};

/// Service configuration, read from the process environment at startup.
///
/// Keys are the upper-case variable names (`MODEL_NAME`, `SERVER_PORT`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_model_name")]
    pub model_name: String,

    #[serde(default = "default_model_cache_dir")]
    pub model_cache_dir: PathBuf,

    /// Explicit model file name inside the model directory. Overrides the
    /// quantization-derived default.
    #[serde(default)]
    pub model_file: Option<String>,

    #[serde(default)]
    pub use_quantization: bool,

    #[serde(default = "default_quantization_type")]
    pub quantization_type: String,

    #[serde(default = "default_model_input_name")]
    pub model_input_name: String,

    /// Square edge length images are resized to before inference
    #[serde(default = "default_image_size")]
    pub image_size: u32,

    /// `auto`, `cuda` or `cpu`
    #[serde(default = "default_device")]
    pub device: String,

    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    #[serde(default = "default_host")]
    pub server_host: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_model_name() -> String {
    "vidore/colqwen2-v1.0".to_string()
}

fn default_model_cache_dir() -> PathBuf {
    PathBuf::from("/models")
}

fn default_quantization_type() -> String {
    "int8".to_string()
}

fn default_model_input_name() -> String {
    "pixel_values".to_string()
}

fn default_image_size() -> u32 {
    448
}

fn default_device() -> String {
    "auto".to_string()
}

fn default_intra_threads() -> usize {
    4
}

fn default_max_image_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EmbeddingConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> ServiceResult<Self> {
        Self::from_source(Environment::default().try_parsing(true))
    }

    fn from_source(source: Environment) -> ServiceResult<Self> {
        Config::builder()
            .add_source(source)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ServiceError::Config {
                message: e.to_string(),
            })
    }

    /// Model file name inside the model directory
    pub fn model_file_name(&self) -> String {
        if let Some(file) = &self.model_file {
            return file.clone();
        }
        if !self.use_quantization {
            return "model.onnx".to_string();
        }
        match self.quantization_type.to_ascii_lowercase().as_str() {
            "int4" | "4bit" | "q4" => "model_q4.onnx".to_string(),
            _ => "model_int8.onnx".to_string(),
        }
    }

    /// Full path to the ONNX model file
    pub fn model_path(&self) -> PathBuf {
        self.model_cache_dir
            .join(&self.model_name)
            .join(self.model_file_name())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
