//! Model handles the quantizer operates on.

mod base;
mod graph_model;

pub use base::{
    CompressedModel, DecoderModel, PreTrainedModel, QuantizableModel, RuntimeModel, TrainableModel,
};
pub use graph_model::GraphModel;
