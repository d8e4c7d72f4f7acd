//! Quantized tensor representation.

use candle_core::DType;

/// A weight stored as 8-bit integers with per-block scales.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    /// Quantized values, two's complement int8 stored as bytes
    pub data: Vec<u8>,

    /// Scale factor per block
    pub scales: Vec<f32>,

    /// Original tensor shape
    pub shape: Vec<usize>,

    /// Original dtype
    pub dtype: DType,

    /// Number of consecutive elements sharing one scale
    pub block_size: usize,
}

impl QuantizedTensor {
    /// Create a new quantized tensor
    pub fn new(
        data: Vec<u8>,
        scales: Vec<f32>,
        shape: Vec<usize>,
        dtype: DType,
        block_size: usize,
    ) -> Self {
        Self {
            data,
            scales,
            shape,
            dtype,
            block_size,
        }
    }

    /// Get the number of elements in the original tensor
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Get compressed size in bytes
    pub fn compressed_size(&self) -> usize {
        self.data.len() + self.scales.len() * 4
    }

    /// Get original size in bytes
    pub fn original_size(&self) -> usize {
        self.numel() * self.dtype.size_in_bytes()
    }

    /// Get compression ratio
    pub fn compression_ratio(&self) -> f32 {
        self.compressed_size() as f32 / self.original_size().max(1) as f32
    }

    /// Check that data and scales agree with shape and block size
    pub fn validate(&self) -> crate::Result<()> {
        let numel = self.numel();
        if self.block_size == 0 {
            return Err(crate::PtqError::QuantizationError(
                "Block size must be positive".to_string(),
            ));
        }
        if self.data.len() != numel {
            return Err(crate::PtqError::QuantizationError(format!(
                "Expected {} quantized values, found {}",
                numel,
                self.data.len()
            )));
        }
        let expected_blocks = numel.div_ceil(self.block_size);
        if self.scales.len() != expected_blocks {
            return Err(crate::PtqError::QuantizationError(format!(
                "Expected {} scales, found {}",
                expected_blocks,
                self.scales.len()
            )));
        }
        Ok(())
    }
}
