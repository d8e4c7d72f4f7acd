//! Contracts of the compression framework that performs the numerical
//! quantization.
//!
//! Two entry points are used:
//! - `quantize`: post-training quantization of a runtime graph from a stream
//!   of calibration samples
//! - `create_compressed_model`: wraps a trainable model with compression
//!   operations initialized from a calibration loader

mod dataset;
mod params;

pub use dataset::QuantizationDataset;
pub use params::{ModelType, QuantizeParams, DEFAULT_SUBSET_SIZE};

use candle_core::Tensor;

use crate::config::QuantizationConfig;
use crate::data::Features;
use crate::model::{CompressedModel, TrainableModel};
use crate::runtime::RuntimeGraph;

/// Arguments a batch is passed to the model with
#[derive(Debug, Clone)]
pub struct ModelInputs {
    /// Positional arguments
    pub args: Vec<Tensor>,
    /// Keyword arguments
    pub kwargs: Features,
}

/// Data loader the compression framework initializes quantizer ranges from
pub trait InitializingDataLoader {
    fn batch_size(&self) -> usize;

    /// Start a new pass over the calibration batches
    fn batches(&mut self) -> Box<dyn Iterator<Item = crate::Result<Features>> + '_>;

    /// Split a batch into model call arguments
    fn get_inputs(&self, batch: Features) -> ModelInputs;
}

/// Compression framework configuration in its native form
pub struct CompressionConfig {
    params: serde_json::Value,
    init_loader: Option<Box<dyn InitializingDataLoader>>,
}

impl CompressionConfig {
    /// Build from a plain mapping
    pub fn from_value(params: serde_json::Value) -> Self {
        Self {
            params,
            init_loader: None,
        }
    }

    pub fn from_quantization_config(config: &QuantizationConfig) -> crate::Result<Self> {
        Ok(Self::from_value(config.to_value()?))
    }

    /// Attach the calibration loader used to initialize the compression
    pub fn register_default_init_args(mut self, loader: Box<dyn InitializingDataLoader>) -> Self {
        self.init_loader = Some(loader);
        self
    }

    pub fn params(&self) -> &serde_json::Value {
        &self.params
    }

    pub fn init_loader(&mut self) -> Option<&mut (dyn InitializingDataLoader + 'static)> {
        self.init_loader.as_deref_mut()
    }

    pub fn has_init_loader(&self) -> bool {
        self.init_loader.is_some()
    }
}

impl std::fmt::Debug for CompressionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionConfig")
            .field("params", &self.params)
            .field("has_init_loader", &self.init_loader.is_some())
            .finish()
    }
}

/// Handle on the compression algorithm applied to a model
pub trait CompressionController {
    /// Freeze compression parameters so the model can be exported
    fn prepare_for_export(&mut self) -> crate::Result<()>;
}

/// Controller and compressed model returned by `create_compressed_model`
pub type CompressedParts = (Box<dyn CompressionController>, Box<dyn CompressedModel>);

/// The compression framework
pub trait CompressionBackend {
    /// Quantize a runtime graph from calibration samples.
    ///
    /// The returned graph has the same representation as the input.
    fn quantize(
        &self,
        graph: &RuntimeGraph,
        dataset: QuantizationDataset<'_>,
        params: &QuantizeParams,
    ) -> crate::Result<RuntimeGraph>;

    /// Insert compression operations into a trainable model
    fn create_compressed_model(
        &self,
        model: &mut dyn TrainableModel,
        config: CompressionConfig,
    ) -> crate::Result<CompressedParts>;
}
