//! Stream of calibration samples handed to the quantization routine.

use crate::data::Features;

type Transform<'a> = Box<dyn Fn(Features) -> crate::Result<Features> + 'a>;

/// Lazily yields transformed calibration samples.
///
/// The backend pulls at most as many samples as it needs; nothing is read
/// ahead.
pub struct QuantizationDataset<'a> {
    source: Box<dyn Iterator<Item = crate::Result<Features>> + 'a>,
    transform: Transform<'a>,
    drawn: usize,
}

impl<'a> QuantizationDataset<'a> {
    /// Wrap a sample iterator with a transform
    pub fn new<I, F>(source: I, transform: F) -> Self
    where
        I: Iterator<Item = crate::Result<Features>> + 'a,
        F: Fn(Features) -> crate::Result<Features> + 'a,
    {
        Self {
            source: Box::new(source),
            transform: Box::new(transform),
            drawn: 0,
        }
    }

    /// Wrap a sample iterator, passing samples through unchanged
    pub fn identity<I>(source: I) -> Self
    where
        I: Iterator<Item = crate::Result<Features>> + 'a,
    {
        Self::new(source, Ok)
    }

    /// Samples captured ahead of time
    pub fn from_samples(samples: Vec<Features>) -> Self {
        Self::identity(samples.into_iter().map(Ok))
    }

    /// Number of samples drawn so far
    pub fn drawn(&self) -> usize {
        self.drawn
    }
}

impl Iterator for QuantizationDataset<'_> {
    type Item = crate::Result<Features>;

    fn next(&mut self) -> Option<Self::Item> {
        let sample = self.source.next()?;
        self.drawn += 1;
        Some(sample.and_then(|s| (self.transform)(s)))
    }
}
