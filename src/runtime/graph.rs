//! Inference-runtime graph and its (definition, weights) serialization.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};

use crate::quantization::{QuantizedTensor, WeightQuantizer};

/// Named graph input or output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    /// Dimensions, `None` for dynamic ones
    pub shape: Vec<Option<usize>>,
    pub element_type: String,
}

impl Port {
    pub fn new(name: impl Into<String>, shape: Vec<Option<usize>>, element_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape,
            element_type: element_type.into(),
        }
    }
}

/// Model graph as held by the inference runtime.
///
/// Float weights live in `weights`; the compression framework marks the ones
/// it quantized, and the weight compression transform turns marked weights
/// into int8 storage.
#[derive(Debug, Clone, Default)]
pub struct RuntimeGraph {
    pub name: String,
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
    /// Free-form runtime information (e.g. quantization metadata)
    pub rt_info: BTreeMap<String, String>,
    weights: BTreeMap<String, Tensor>,
    fake_quantized: BTreeSet<String>,
    compressed: BTreeMap<String, QuantizedTensor>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphDefinition {
    name: String,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    #[serde(default)]
    rt_info: BTreeMap<String, String>,
    weights_file: String,
    weights: Vec<WeightEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WeightEntry {
    name: String,
    shape: Vec<usize>,
    dtype: String,
    #[serde(flatten)]
    layout: WeightLayout,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
enum WeightLayout {
    Dense { fake_quantized: bool },
    Int8Blockwise { block_size: usize },
}

fn scales_key(name: &str) -> String {
    format!("{}.scales", name)
}

impl RuntimeGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, port: Port) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn with_output(mut self, port: Port) -> Self {
        self.outputs.push(port);
        self
    }

    /// Add or replace a float weight
    pub fn add_weight(&mut self, name: impl Into<String>, tensor: Tensor) {
        let name = name.into();
        self.compressed.remove(&name);
        self.weights.insert(name, tensor);
    }

    pub fn weight(&self, name: &str) -> Option<&Tensor> {
        self.weights.get(name)
    }

    pub fn weights(&self) -> &BTreeMap<String, Tensor> {
        &self.weights
    }

    pub fn compressed_weights(&self) -> &BTreeMap<String, QuantizedTensor> {
        &self.compressed
    }

    /// Mark a float weight as quantized by the compression framework
    pub fn mark_fake_quantized(&mut self, name: &str) -> crate::Result<()> {
        if !self.weights.contains_key(name) {
            return Err(crate::PtqError::RuntimeError(format!(
                "Unknown weight '{}'",
                name
            )));
        }
        self.fake_quantized.insert(name.to_string());
        Ok(())
    }

    pub fn is_fake_quantized(&self, name: &str) -> bool {
        self.fake_quantized.contains(name)
    }

    pub fn num_fake_quantized(&self) -> usize {
        self.fake_quantized.len()
    }

    /// Total number of weight elements, compressed or not
    pub fn num_parameters(&self) -> usize {
        self.weights.values().map(|t| t.elem_count()).sum::<usize>()
            + self.compressed.values().map(|q| q.numel()).sum::<usize>()
    }

    /// Store every fake-quantized weight in compressed form.
    ///
    /// Returns the number of weights compressed.
    pub fn compress_quantize_weights(&mut self, quantizer: &dyn WeightQuantizer) -> crate::Result<usize> {
        let marked: Vec<String> = std::mem::take(&mut self.fake_quantized).into_iter().collect();

        for name in &marked {
            if let Some(weight) = self.weights.remove(name) {
                let quantized = quantizer.quantize(&weight)?;
                self.compressed.insert(name.clone(), quantized);
            }
        }

        tracing::debug!("Compressed {} quantized weights in graph '{}'", marked.len(), self.name);
        Ok(marked.len())
    }

    /// Float view of a weight, dequantizing compressed storage
    pub fn dequantized_weight(&self, name: &str, quantizer: &dyn WeightQuantizer) -> crate::Result<Option<Tensor>> {
        if let Some(weight) = self.weights.get(name) {
            return Ok(Some(weight.clone()));
        }
        self.compressed
            .get(name)
            .map(|q| quantizer.dequantize(q))
            .transpose()
    }

    /// Write the graph definition and its weight blob as a matched pair
    pub fn serialize(&self, definition_path: &Path, weights_path: &Path) -> crate::Result<()> {
        if let Some(parent) = definition_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut blob: HashMap<String, Tensor> = HashMap::new();
        let mut entries = Vec::with_capacity(self.weights.len() + self.compressed.len());

        for (name, tensor) in &self.weights {
            entries.push(WeightEntry {
                name: name.clone(),
                shape: tensor.dims().to_vec(),
                dtype: dtype_name(tensor.dtype()).to_string(),
                layout: WeightLayout::Dense {
                    fake_quantized: self.fake_quantized.contains(name),
                },
            });
            blob.insert(name.clone(), tensor.to_device(&Device::Cpu)?);
        }

        for (name, quantized) in &self.compressed {
            entries.push(WeightEntry {
                name: name.clone(),
                shape: quantized.shape.clone(),
                dtype: dtype_name(quantized.dtype).to_string(),
                layout: WeightLayout::Int8Blockwise {
                    block_size: quantized.block_size,
                },
            });
            let len = quantized.data.len();
            blob.insert(name.clone(), Tensor::from_vec(quantized.data.clone(), len, &Device::Cpu)?);
            let num_scales = quantized.scales.len();
            blob.insert(
                scales_key(name),
                Tensor::from_vec(quantized.scales.clone(), num_scales, &Device::Cpu)?,
            );
        }

        let weights_file = weights_path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .ok_or_else(|| crate::PtqError::RuntimeError(format!("Invalid weights path {:?}", weights_path)))?;

        let definition = GraphDefinition {
            name: self.name.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            rt_info: self.rt_info.clone(),
            weights_file,
            weights: entries,
        };

        std::fs::write(definition_path, serde_json::to_string_pretty(&definition)?)?;
        candle_core::safetensors::save(&blob, weights_path)?;

        tracing::info!(
            "Serialized graph '{}' to {:?} ({} weights)",
            self.name,
            definition_path,
            definition.weights.len()
        );
        Ok(())
    }

    /// Read a graph written by [`serialize`](Self::serialize).
    ///
    /// The weight blob is looked up next to the definition file.
    pub fn read(definition_path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(definition_path)?;
        let definition: GraphDefinition = serde_json::from_str(&content)?;

        let weights_path = definition_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&definition.weights_file);

        let file = std::fs::File::open(&weights_path)?;
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        let blob = SafeTensors::deserialize(&mmap)
            .map_err(|e| crate::PtqError::RuntimeError(e.to_string()))?;

        let mut graph = RuntimeGraph {
            name: definition.name,
            inputs: definition.inputs,
            outputs: definition.outputs,
            rt_info: definition.rt_info,
            ..Default::default()
        };

        for entry in definition.weights {
            let dtype = parse_dtype(&entry.dtype)?;
            match entry.layout {
                WeightLayout::Dense { fake_quantized } => {
                    let tensor = load_tensor(&blob, &entry.name)?;
                    graph.weights.insert(entry.name.clone(), tensor.to_dtype(dtype)?);
                    if fake_quantized {
                        graph.fake_quantized.insert(entry.name);
                    }
                }
                WeightLayout::Int8Blockwise { block_size } => {
                    let data: Vec<u8> = load_tensor(&blob, &entry.name)?.to_vec1()?;
                    let scales: Vec<f32> = load_tensor(&blob, &scales_key(&entry.name))?.to_vec1()?;
                    let quantized = QuantizedTensor::new(data, scales, entry.shape, dtype, block_size);
                    quantized.validate()?;
                    graph.compressed.insert(entry.name, quantized);
                }
            }
        }

        Ok(graph)
    }
}

fn load_tensor(blob: &SafeTensors<'_>, name: &str) -> crate::Result<Tensor> {
    let view = blob
        .tensor(name)
        .map_err(|e| crate::PtqError::RuntimeError(format!("Weight '{}': {}", name, e)))?;
    let dtype = convert_safetensor_dtype(view.dtype())?;
    Tensor::from_raw_buffer(view.data(), dtype, view.shape(), &Device::Cpu).map_err(Into::into)
}

/// Convert safetensor dtype to candle dtype
fn convert_safetensor_dtype(dtype: safetensors::Dtype) -> crate::Result<DType> {
    match dtype {
        safetensors::Dtype::F16 => Ok(DType::F16),
        safetensors::Dtype::BF16 => Ok(DType::BF16),
        safetensors::Dtype::F32 => Ok(DType::F32),
        safetensors::Dtype::F64 => Ok(DType::F64),
        safetensors::Dtype::I64 => Ok(DType::I64),
        safetensors::Dtype::U8 => Ok(DType::U8),
        safetensors::Dtype::U32 => Ok(DType::U32),
        other => Err(crate::PtqError::RuntimeError(format!(
            "Unsupported weight dtype {:?}",
            other
        ))),
    }
}

fn dtype_name(dtype: DType) -> &'static str {
    match dtype {
        DType::U8 => "u8",
        DType::U32 => "u32",
        DType::I64 => "i64",
        DType::BF16 => "bf16",
        DType::F16 => "f16",
        DType::F32 => "f32",
        DType::F64 => "f64",
        #[allow(unreachable_patterns)]
        _ => "f32",
    }
}

/// Parse dtype string to candle DType
pub fn parse_dtype(dtype_str: &str) -> crate::Result<DType> {
    match dtype_str.to_lowercase().as_str() {
        "u8" | "uint8" => Ok(DType::U8),
        "u32" | "uint32" => Ok(DType::U32),
        "i64" | "int64" | "long" => Ok(DType::I64),
        "f32" | "float32" | "float" => Ok(DType::F32),
        "f16" | "float16" | "half" => Ok(DType::F16),
        "bf16" | "bfloat16" => Ok(DType::BF16),
        "f64" | "float64" | "double" => Ok(DType::F64),
        other => Err(crate::PtqError::RuntimeError(format!("Unknown dtype '{}'", other))),
    }
}
