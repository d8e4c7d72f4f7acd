//! Seeded batch loading over a calibration dataset.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::collator::{DataCollator, DefaultDataCollator};
use super::dataset::{CalibrationDataset, Example, Features};
use crate::compression::{InitializingDataLoader, ModelInputs};

/// Batches a calibration dataset in a random but reproducible order.
///
/// Every call to [`iter`](Self::iter) draws a fresh permutation from the
/// generator seeded at construction, so two loaders built with the same
/// seed yield the same sequence of epochs. The trailing partial batch is
/// always kept.
pub struct CalibrationDataLoader {
    dataset: CalibrationDataset,
    batch_size: usize,
    collator: Box<dyn DataCollator>,
    rng: StdRng,
}

impl CalibrationDataLoader {
    /// Create a loader using the default collator
    pub fn new(dataset: CalibrationDataset, batch_size: usize, seed: u64) -> crate::Result<Self> {
        if batch_size == 0 {
            return Err(crate::PtqError::ConfigError(
                "Batch size must be positive".to_string(),
            ));
        }

        Ok(Self {
            dataset,
            batch_size,
            collator: Box::new(DefaultDataCollator),
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Replace the collation function
    pub fn with_collator(mut self, collator: Box<dyn DataCollator>) -> Self {
        self.collator = collator;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches per epoch
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn dataset(&self) -> &CalibrationDataset {
        &self.dataset
    }

    /// Start a new epoch
    pub fn iter(&mut self) -> Batches<'_> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        order.shuffle(&mut self.rng);

        Batches {
            dataset: &self.dataset,
            collator: self.collator.as_ref(),
            order,
            batch_size: self.batch_size,
            position: 0,
        }
    }
}

impl std::fmt::Debug for CalibrationDataLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationDataLoader")
            .field("num_examples", &self.dataset.len())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

/// One epoch over a [`CalibrationDataLoader`]
pub struct Batches<'a> {
    dataset: &'a CalibrationDataset,
    collator: &'a dyn DataCollator,
    order: Vec<usize>,
    batch_size: usize,
    position: usize,
}

impl Iterator for Batches<'_> {
    type Item = crate::Result<Features>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }

        let end = (self.position + self.batch_size).min(self.order.len());
        let examples: Vec<&Example> = self.order[self.position..end]
            .iter()
            .filter_map(|&idx| self.dataset.get(idx))
            .collect();
        self.position = end;

        Some(self.collator.collate(&examples))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.position).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

/// Calibration loader in the shape the compression framework initializes from.
///
/// A batch is passed to the model as keyword arguments only.
#[derive(Debug)]
pub struct CalibrationLoader {
    inner: CalibrationDataLoader,
}

impl CalibrationLoader {
    pub fn new(inner: CalibrationDataLoader) -> Self {
        Self { inner }
    }

    pub fn loader(&self) -> &CalibrationDataLoader {
        &self.inner
    }

    pub fn loader_mut(&mut self) -> &mut CalibrationDataLoader {
        &mut self.inner
    }

    pub fn into_inner(self) -> CalibrationDataLoader {
        self.inner
    }
}

impl InitializingDataLoader for CalibrationLoader {
    fn batch_size(&self) -> usize {
        self.inner.batch_size()
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = crate::Result<Features>> + '_> {
        Box::new(self.inner.iter())
    }

    fn get_inputs(&self, batch: Features) -> ModelInputs {
        ModelInputs {
            args: Vec::new(),
            kwargs: batch,
        }
    }
}
