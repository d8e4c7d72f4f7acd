//! Export of compressed models to an interchange graph.

mod config;
mod exporter;

pub use config::{DynamicAxes, ExportConfig, ExportConfigResolver};
pub use exporter::{
    export_compressed_model, export_opset, use_external_data_format, ExportRequest, ExportTarget,
    GraphExporter, EXTERNAL_DATA_FORMAT_SIZE_LIMIT, MAX_ONNX_OPSET, MIN_ONNX_QDQ_OPSET,
    ONNX_WEIGHTS_NAME,
};
