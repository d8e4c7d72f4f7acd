//! # rs-ptq
//!
//! Post-training static quantization of pretrained models using a small
//! calibration dataset.
//!
//! ## Core Concept
//!
//! The [`Quantizer`] owns a model handle and picks one quantization path
//! from the model's representation:
//! - **Runtime graph**: the model already lives in the inference runtime's
//!   graph form and is quantized in place
//! - **Decoder with cached state**: generation runs over the calibration
//!   batches while every inference input is captured, then the captured
//!   inputs drive quantization
//! - **Trainable model**: the compression framework compresses the model,
//!   which is exported to an interchange graph, read back into the runtime,
//!   weight-compressed and serialized
//!
//! The numerical work is delegated to the collaborators in [`compression`],
//! [`export`] and [`runtime`].
//!
//! ## Example
//!
//! ```ignore
//! use rs_ptq::{QuantizeOptions, QuantizerBuilder};
//!
//! fn run(model: rs_ptq::QuantizableModel, backend: Box<dyn rs_ptq::CompressionBackend>,
//!        dataset: rs_ptq::CalibrationDataset) -> rs_ptq::Result<()> {
//!     let mut quantizer = QuantizerBuilder::new(model)
//!         .task("text-classification")
//!         .compression(backend)
//!         .build()?;
//!     quantizer.quantize(dataset, "./quantized", QuantizeOptions::default())
//! }
//! ```

pub mod compression;
pub mod config;
pub mod data;
pub mod export;
pub mod model;
pub mod quantization;
pub mod quantizer;
pub mod runtime;
pub mod utils;

// Re-exports for convenience
pub use compression::{CompressionBackend, ModelType, QuantizationDataset, QuantizeParams};
pub use config::{ModelConfig, QuantizationConfig};
pub use data::{CalibrationDataLoader, CalibrationDataset, CalibrationLoader, Features};
pub use model::{DecoderModel, GraphModel, QuantizableModel, RuntimeModel, TrainableModel};
pub use quantization::{Int8Quantizer, QuantizedTensor};
pub use quantizer::{QuantizeOptions, Quantizer, QuantizerBuilder};
pub use runtime::{
    DataCache, InferRequest, InferRequestWrapper, InferenceRuntime, InterchangeGraph, RuntimeGraph,
};

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum PtqError {
    #[error("Unsupported model type: {0}")]
    UnsupportedModelType(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unsupported task: {0}")]
    UnsupportedTask(String),

    #[error("Dataset error: {0}")]
    DatasetError(String),

    #[error("Collation error: {0}")]
    CollationError(String),

    #[error("Quantization error: {0}")]
    QuantizationError(String),

    #[error("Export error: {0}")]
    ExportError(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Generation error: {0}")]
    GenerationError(String),

    #[error("Metadata lookup failed: {0}")]
    MetadataError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Candle error: {0}")]
    CandleError(#[from] candle_core::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PtqError>;
