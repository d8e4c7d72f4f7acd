//! Configuration module for model and quantization settings.

mod model_config;
mod quantization_config;

pub use model_config::{ModelConfig, CONFIG_NAME};
pub use quantization_config::{
    CompressionSection, InitializerSection, InputInfo, QuantizationConfig, RangeInit,
    QUANTIZATION_CONFIG_NAME,
};
