//! Parameters of the post-training quantization call.

use serde::{Deserialize, Serialize};

/// Number of calibration samples used when none is requested
pub const DEFAULT_SUBSET_SIZE: usize = 300;

/// Model family hint for the quantization algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// Transformer architecture (attention-aware quantization scheme)
    #[default]
    Transformer,
    /// No architecture-specific handling
    Generic,
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelType::Transformer => write!(f, "transformer"),
            ModelType::Generic => write!(f, "generic"),
        }
    }
}

/// Arguments of `CompressionBackend::quantize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizeParams {
    pub model_type: ModelType,
    /// Faster, less exact bias correction
    pub fast_bias_correction: bool,
    /// Number of samples drawn from the dataset
    pub subset_size: usize,
    /// Backend-specific options passed through untouched
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for QuantizeParams {
    fn default() -> Self {
        Self {
            model_type: ModelType::Transformer,
            fast_bias_correction: true,
            subset_size: DEFAULT_SUBSET_SIZE,
            extra: serde_json::Map::new(),
        }
    }
}
