//! Calibration data: datasets, collation, seeded batch loading and sources.
//!
//! This module provides:
//! - `CalibrationDataset`: ordered examples with column filtering, shuffling and mapping
//! - `CalibrationDataLoader`: reproducible random batching without dropping the last batch
//! - `CalibrationLoader`: the loader in the compression framework's initialization shape
//! - `CalibrationSource`: where calibration examples come from

mod collator;
mod dataset;
mod loader;
mod source;

pub use collator::{DataCollator, DefaultDataCollator};
pub use dataset::{CalibrationDataset, Example, FieldValue, Features};
pub use loader::{Batches, CalibrationDataLoader, CalibrationLoader};
pub use source::{
    load_calibration_dataset, CalibrationSource, DatasetRequest, JsonLinesSource, Preprocess,
};
