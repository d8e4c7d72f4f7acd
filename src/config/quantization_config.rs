//! Quantization configuration attached to the trainable-model path.

use std::path::Path;

use candle_core::DType;
use serde::{Deserialize, Serialize};

use crate::compression::ModelType;
use crate::data::Features;

/// File name the quantization configuration is saved under
pub const QUANTIZATION_CONFIG_NAME: &str = "quantization_config.json";

/// Parameters of the post-training quantization run.
///
/// Serialized as-is into the compression framework's configuration and
/// next to the quantized artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Compression algorithm section
    #[serde(default)]
    pub compression: CompressionSection,

    /// Shape and type of every model input, derived from a calibration batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_info: Option<Vec<InputInfo>>,

    /// Keep the intermediate interchange graph on disk
    #[serde(default)]
    pub save_onnx_model: bool,

    /// Model type hint forwarded to the quantization routine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<ModelType>,

    /// Version of this crate that produced the configuration
    #[serde(default = "crate_version")]
    pub ptq_version: String,
}

/// Compression algorithm description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionSection {
    pub algorithm: String,
    pub preset: String,
    pub overflow_fix: String,
    pub initializer: InitializerSection,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored_scopes: Vec<String>,
    /// Backend-specific keys not modelled here
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializerSection {
    pub range: RangeInit,
    pub batchnorm_adaptation: BatchnormAdaptation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeInit {
    pub num_init_samples: usize,
    #[serde(rename = "type")]
    pub init_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchnormAdaptation {
    pub num_bn_adaptation_samples: usize,
}

/// Description of a single model input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputInfo {
    pub sample_size: Vec<usize>,
    #[serde(rename = "type")]
    pub input_type: String,
    pub keyword: String,
}

fn crate_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for CompressionSection {
    fn default() -> Self {
        Self {
            algorithm: "quantization".to_string(),
            preset: "mixed".to_string(),
            overflow_fix: "disable".to_string(),
            initializer: InitializerSection {
                range: RangeInit {
                    num_init_samples: 300,
                    init_type: "mean_min_max".to_string(),
                },
                batchnorm_adaptation: BatchnormAdaptation {
                    num_bn_adaptation_samples: 0,
                },
            },
            ignored_scopes: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            compression: CompressionSection::default(),
            input_info: None,
            save_onnx_model: false,
            model_type: None,
            ptq_version: crate_version(),
        }
    }
}

impl QuantizationConfig {
    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Record the shape and type of every input of a calibration batch
    pub fn add_input_info(&mut self, model_inputs: &Features) {
        let info = model_inputs
            .iter()
            .map(|(name, value)| InputInfo {
                sample_size: value.dims().to_vec(),
                input_type: if value.dtype() == DType::I64 { "long" } else { "float" }.to_string(),
                keyword: name.clone(),
            })
            .collect();
        self.input_info = Some(info);
    }

    /// Set the model type hint
    pub fn with_model_type(mut self, model_type: ModelType) -> Self {
        self.model_type = Some(model_type);
        self
    }

    /// Keep the interchange graph next to the artifact
    pub fn with_save_onnx_model(mut self, save: bool) -> Self {
        self.save_onnx_model = save;
        self
    }

    /// Plain mapping form consumed by the compression framework
    pub fn to_value(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Write the configuration into `save_directory`
    pub fn save_pretrained(&self, save_directory: impl AsRef<Path>) -> crate::Result<()> {
        let save_directory = save_directory.as_ref();
        std::fs::create_dir_all(save_directory)?;
        let path = save_directory.join(QUANTIZATION_CONFIG_NAME);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        tracing::debug!("Saved quantization config to {:?}", path);
        Ok(())
    }
}
