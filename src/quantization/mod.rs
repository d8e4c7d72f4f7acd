//! Weight compression used by the runtime graph transform.
//!
//! Weights the compression framework marked as fake-quantized are stored as
//! symmetric 8-bit blockwise integers with one scale per block.

mod int8;
mod tensor;

pub use int8::Int8Quantizer;
pub use tensor::QuantizedTensor;

/// Trait for weight compression schemes
pub trait WeightQuantizer {
    /// Quantize a tensor to compressed format
    fn quantize(&self, tensor: &candle_core::Tensor) -> crate::Result<QuantizedTensor>;

    /// Dequantize back to full precision
    fn dequantize(&self, quantized: &QuantizedTensor) -> crate::Result<candle_core::Tensor>;
}
