//! Model traits and the representation the quantizer dispatches on.

use std::path::Path;

use candle_core::{Device, Tensor};

use crate::config::ModelConfig;
use crate::data::Features;
use crate::runtime::{InferRequest, RuntimeGraph, GRAPH_FILE_NAME};

/// Behaviour shared by every model representation
pub trait PreTrainedModel {
    /// Parameter names of the model's forward call, in order
    fn forward_signature(&self) -> Vec<String>;

    /// Model configuration
    fn config(&self) -> &ModelConfig;
}

/// Model held as an inference-runtime graph.
pub trait RuntimeModel: PreTrainedModel {
    fn graph(&self) -> &RuntimeGraph;

    /// Replace the graph, e.g. with its quantized version
    fn set_graph(&mut self, graph: RuntimeGraph);

    /// Save configuration and graph into `save_directory`
    fn save_pretrained(&self, save_directory: &Path) -> crate::Result<()> {
        std::fs::create_dir_all(save_directory)?;
        self.config().save_pretrained(save_directory)?;
        let definition = save_directory.join(GRAPH_FILE_NAME);
        self.graph()
            .serialize(&definition, &definition.with_extension("safetensors"))
    }
}

/// Autoregressive decoder held as a runtime graph.
///
/// Generation goes through the model's inference request, which the
/// quantizer temporarily swaps for a capturing wrapper.
pub trait DecoderModel: RuntimeModel {
    /// Whether past key/values are fed back between generation steps
    fn use_cache(&self) -> bool;

    /// Compile the graph and create the inference request
    fn compile(&mut self) -> crate::Result<()>;

    /// Remove the inference request from the model
    fn take_request(&mut self) -> Option<Box<dyn InferRequest>>;

    /// Install an inference request
    fn set_request(&mut self, request: Box<dyn InferRequest>);

    /// Generate up to `max_new_tokens` tokens for a batch of prompts
    fn generate(&mut self, inputs: &Features, max_new_tokens: usize) -> crate::Result<Tensor>;
}

/// Full-precision model the compression framework can wrap.
pub trait TrainableModel: PreTrainedModel {
    fn num_parameters(&self) -> usize;
}

/// Model with compression operations inserted, ready for export.
pub trait CompressedModel {
    /// Parameter names of the forward call, in order
    fn forward_signature(&self) -> Vec<String>;

    /// Switch to inference mode
    fn eval(&mut self);

    fn num_parameters(&self) -> usize;

    /// Device the model parameters live on
    fn device(&self) -> Device;

    /// Stop recording new graph nodes while tracing for export
    fn disable_dynamic_graph_building(&mut self);

    fn enable_dynamic_graph_building(&mut self);
}

/// A model handle, tagged with its representation.
///
/// Exactly one quantization path exists per variant; `Unsupported` carries
/// the type name of a model no path accepts.
pub enum QuantizableModel {
    Runtime(Box<dyn RuntimeModel>),
    Decoder(Box<dyn DecoderModel>),
    Trainable(Box<dyn TrainableModel>),
    Unsupported(String),
}

impl QuantizableModel {
    pub fn runtime(model: impl RuntimeModel + 'static) -> Self {
        QuantizableModel::Runtime(Box::new(model))
    }

    pub fn decoder(model: impl DecoderModel + 'static) -> Self {
        QuantizableModel::Decoder(Box::new(model))
    }

    pub fn trainable(model: impl TrainableModel + 'static) -> Self {
        QuantizableModel::Trainable(Box::new(model))
    }

    /// Handle for a model of a type no quantization path supports
    pub fn unsupported(type_name: impl Into<String>) -> Self {
        QuantizableModel::Unsupported(type_name.into())
    }

    /// Short name of the representation
    pub fn kind(&self) -> &str {
        match self {
            QuantizableModel::Runtime(_) => "runtime graph",
            QuantizableModel::Decoder(_) => "runtime decoder",
            QuantizableModel::Trainable(_) => "trainable",
            QuantizableModel::Unsupported(type_name) => type_name,
        }
    }

    pub fn forward_signature(&self) -> Vec<String> {
        match self {
            QuantizableModel::Runtime(m) => m.forward_signature(),
            QuantizableModel::Decoder(m) => m.forward_signature(),
            QuantizableModel::Trainable(m) => m.forward_signature(),
            QuantizableModel::Unsupported(_) => Vec::new(),
        }
    }

    pub fn config(&self) -> Option<&ModelConfig> {
        match self {
            QuantizableModel::Runtime(m) => Some(m.config()),
            QuantizableModel::Decoder(m) => Some(m.config()),
            QuantizableModel::Trainable(m) => Some(m.config()),
            QuantizableModel::Unsupported(_) => None,
        }
    }

    /// Current runtime graph, for representations that have one
    pub fn graph(&self) -> Option<&RuntimeGraph> {
        match self {
            QuantizableModel::Runtime(m) => Some(m.graph()),
            QuantizableModel::Decoder(m) => Some(m.graph()),
            QuantizableModel::Trainable(_) | QuantizableModel::Unsupported(_) => None,
        }
    }
}

impl std::fmt::Debug for QuantizableModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuantizableModel")
            .field("kind", &self.kind())
            .field("name_or_path", &self.config().map(|c| c.name_or_path.as_str()))
            .finish()
    }
}
