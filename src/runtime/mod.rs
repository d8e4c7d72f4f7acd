//! Inference runtime: graphs, inference requests and the runtime contract.

mod graph;
mod request;

pub use graph::{parse_dtype, Port, RuntimeGraph};
pub use request::{DataCache, InferRequest, InferRequestWrapper};

use std::path::{Path, PathBuf};

use crate::quantization::Int8Quantizer;

/// Default file name of a serialized runtime graph definition.
///
/// The weight blob sits next to it with the `safetensors` extension.
pub const GRAPH_FILE_NAME: &str = "runtime_model.json";

/// Interchange graph produced by the exporter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterchangeGraph {
    /// Graph with inlined weights, kept in memory
    Bytes(Vec<u8>),
    /// Graph on disk, weights possibly stored in external files next to it
    File(PathBuf),
}

/// The inference runtime library.
///
/// Reading an interchange graph is runtime specific. Weight compression and
/// serialization have default implementations over [`RuntimeGraph`].
pub trait InferenceRuntime {
    /// Read an interchange graph into the runtime representation
    fn read_model(&self, graph: &InterchangeGraph) -> crate::Result<RuntimeGraph>;

    /// Store quantized weights as int8
    fn compress_quantize_weights(&self, graph: &mut RuntimeGraph) -> crate::Result<()> {
        graph.compress_quantize_weights(&Int8Quantizer::new())?;
        Ok(())
    }

    /// Write the graph definition and weights as a pair of files
    fn serialize(&self, graph: &RuntimeGraph, definition_path: &Path, weights_path: &Path) -> crate::Result<()> {
        graph.serialize(definition_path, weights_path)
    }
}
