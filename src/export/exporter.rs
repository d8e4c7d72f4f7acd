//! Interchange-graph export of a compressed model.

use std::path::PathBuf;

use candle_core::Tensor;

use super::config::{DynamicAxes, ExportConfig};
use crate::model::CompressedModel;
use crate::runtime::InterchangeGraph;

/// Highest opset the exporter is asked for
pub const MAX_ONNX_OPSET: u32 = 16;

/// Lowest opset with quantize/dequantize operator pairs
pub const MIN_ONNX_QDQ_OPSET: u32 = 13;

/// File name of an interchange graph written to disk
pub const ONNX_WEIGHTS_NAME: &str = "model.onnx";

/// Serialized models at or above this size must keep weights external
pub const EXTERNAL_DATA_FORMAT_SIZE_LIMIT: u64 = 2 * 1024 * 1024 * 1024;

/// Whether a model with `num_parameters` fp32 parameters needs external weights
pub fn use_external_data_format(num_parameters: usize) -> bool {
    (num_parameters as u64) * 4 >= EXTERNAL_DATA_FORMAT_SIZE_LIMIT
}

/// Opset to export with.
///
/// Capped at [`MAX_ONNX_OPSET`]; raised to [`MIN_ONNX_QDQ_OPSET`] when the
/// interchange graph is kept, so quantize/dequantize pairs are expressible.
pub fn export_opset(default_opset: u32, save_onnx_model: bool) -> u32 {
    let opset = default_opset.min(MAX_ONNX_OPSET);
    if save_onnx_model {
        opset.max(MIN_ONNX_QDQ_OPSET)
    } else {
        opset
    }
}

/// Where the exported graph goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    /// Keep the serialized graph in memory
    Memory,
    /// Write the graph (and external weights) to a file
    File(PathBuf),
}

/// Everything the exporter needs besides the model
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Positional inputs in forward-signature order; `None` where the
    /// signature has a parameter without a dummy input
    pub inputs: Vec<Option<Tensor>>,
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,
    /// Dynamic axes of inputs followed by outputs
    pub dynamic_axes: Vec<(String, DynamicAxes)>,
    pub opset: u32,
    pub do_constant_folding: bool,
    pub target: ExportTarget,
}

/// Traces a compressed model into an interchange graph
pub trait GraphExporter {
    fn export(
        &self,
        model: &mut dyn CompressedModel,
        request: ExportRequest,
    ) -> crate::Result<InterchangeGraph>;
}

/// Order dummy inputs by the model's forward signature.
///
/// Walks the signature until every dummy input is placed; names without a
/// dummy input become `None`.
fn order_inputs(signature: &[String], mut dummy_inputs: crate::data::Features) -> Vec<Option<Tensor>> {
    let mut ordered = Vec::new();
    for name in signature {
        if dummy_inputs.is_empty() {
            break;
        }
        ordered.push(dummy_inputs.remove(name));
    }

    if !dummy_inputs.is_empty() {
        tracing::debug!(
            "Dummy inputs not in forward signature: {:?}",
            dummy_inputs.keys().collect::<Vec<_>>()
        );
    }
    ordered
}

/// Export a compressed model with the given export configuration.
///
/// Dummy inputs are moved to the model's device. The model is patched and
/// dynamic graph building is disabled for the duration of the export; both
/// are undone whether or not the export succeeds.
pub fn export_compressed_model(
    exporter: &dyn GraphExporter,
    model: &mut dyn CompressedModel,
    export_config: &dyn ExportConfig,
    opset: u32,
    target: ExportTarget,
) -> crate::Result<InterchangeGraph> {
    let device = model.device();
    let dummy_inputs = export_config.generate_dummy_inputs()?;
    let inputs = order_inputs(&model.forward_signature(), dummy_inputs)
        .into_iter()
        .map(|input| input.map(|t| t.to_device(&device)).transpose())
        .collect::<candle_core::Result<Vec<_>>>()?;

    let model_inputs = export_config.inputs();
    let model_outputs = export_config.outputs();
    let request = ExportRequest {
        inputs,
        input_names: model_inputs.iter().map(|(name, _)| name.clone()).collect(),
        output_names: model_outputs.iter().map(|(name, _)| name.clone()).collect(),
        dynamic_axes: model_inputs.into_iter().chain(model_outputs).collect(),
        opset,
        do_constant_folding: true,
        target,
    };

    export_config.patch_model(model)?;
    model.disable_dynamic_graph_building();
    let exported = exporter.export(model, request);
    model.enable_dynamic_graph_building();
    let restored = export_config.restore_model(model);

    let graph = exported?;
    restored?;
    Ok(graph)
}
