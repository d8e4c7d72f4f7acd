//! 8-bit blockwise quantization.
//!
//! Implements symmetric 8-bit quantization with per-block scaling factors.

use candle_core::{DType, Device, Tensor};
use super::{QuantizedTensor, WeightQuantizer};

/// Int8 blockwise quantizer
#[derive(Debug, Clone, Copy)]
pub struct Int8Quantizer {
    /// Block size for quantization
    block_size: usize,
}

impl Int8Quantizer {
    /// Create a new Int8 quantizer with default block size
    pub fn new() -> Self {
        Self { block_size: 64 }
    }

    /// Create with custom block size
    pub fn with_block_size(block_size: usize) -> crate::Result<Self> {
        if block_size == 0 {
            return Err(crate::PtqError::ConfigError(
                "Block size must be positive".to_string(),
            ));
        }
        Ok(Self { block_size })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Default for Int8Quantizer {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightQuantizer for Int8Quantizer {
    fn quantize(&self, tensor: &Tensor) -> crate::Result<QuantizedTensor> {
        let shape: Vec<usize> = tensor.dims().to_vec();
        let flat = tensor.flatten_all()?.to_dtype(DType::F32)?;
        let data: Vec<f32> = flat.to_vec1()?;

        let mut scales = Vec::with_capacity(data.len().div_ceil(self.block_size));
        let mut quantized_data = Vec::with_capacity(data.len());

        for block in data.chunks(self.block_size) {
            let absmax = block.iter()
                .map(|x| x.abs())
                .fold(0.0f32, f32::max)
                .max(1e-10);

            // Symmetric int8 range is -127 to 127
            let scale = absmax / 127.0;
            scales.push(scale);

            for &val in block {
                let quantized = (val / scale).round().clamp(-127.0, 127.0) as i8;
                quantized_data.push(quantized as u8);
            }
        }

        Ok(QuantizedTensor::new(
            quantized_data,
            scales,
            shape,
            tensor.dtype(),
            self.block_size,
        ))
    }

    fn dequantize(&self, quantized: &QuantizedTensor) -> crate::Result<Tensor> {
        quantized.validate()?;

        let output: Vec<f32> = quantized
            .data
            .chunks(quantized.block_size)
            .zip(quantized.scales.iter())
            .flat_map(|(block, &scale)| block.iter().map(move |&q| (q as i8) as f32 * scale))
            .collect();

        let tensor = Tensor::from_vec(output, quantized.shape.as_slice(), &Device::Cpu)?;
        tensor.to_dtype(quantized.dtype).map_err(Into::into)
    }
}
