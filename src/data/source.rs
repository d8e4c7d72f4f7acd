//! Calibration dataset sources.

use std::path::{Path, PathBuf};

use super::dataset::{CalibrationDataset, Example};

/// What to load from a calibration source
#[derive(Debug, Clone)]
pub struct DatasetRequest {
    /// Dataset repository name or local path
    pub dataset_name: String,
    /// Dataset configuration name
    pub config_name: Option<String>,
    /// Split to read
    pub split: String,
    /// Maximum number of examples kept after shuffling (None keeps all)
    pub num_samples: Option<usize>,
    /// Cache directory for downloaded data
    pub cache_dir: Option<PathBuf>,
    /// Access token for private datasets
    pub token: Option<String>,
}

impl DatasetRequest {
    pub fn new(dataset_name: impl Into<String>) -> Self {
        Self {
            dataset_name: dataset_name.into(),
            config_name: None,
            split: "train".to_string(),
            num_samples: Some(100),
            cache_dir: None,
            token: None,
        }
    }

    pub fn config_name(mut self, name: impl Into<String>) -> Self {
        self.config_name = Some(name.into());
        self
    }

    pub fn split(mut self, split: impl Into<String>) -> Self {
        self.split = split.into();
        self
    }

    pub fn num_samples(mut self, num_samples: Option<usize>) -> Self {
        self.num_samples = num_samples;
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Preprocessing applied after loading
pub enum Preprocess {
    /// Called once per example
    PerExample(Box<dyn Fn(Example) -> crate::Result<Example>>),
    /// Called on chunks of up to `batch_size` examples
    Batched {
        batch_size: usize,
        f: Box<dyn Fn(Vec<Example>) -> crate::Result<Vec<Example>>>,
    },
}

impl Preprocess {
    /// Batched preprocessing with the default chunk size of 1000
    pub fn batched<F>(f: F) -> Self
    where
        F: Fn(Vec<Example>) -> crate::Result<Vec<Example>> + 'static,
    {
        Preprocess::Batched {
            batch_size: 1000,
            f: Box::new(f),
        }
    }

    pub fn per_example<F>(f: F) -> Self
    where
        F: Fn(Example) -> crate::Result<Example> + 'static,
    {
        Preprocess::PerExample(Box::new(f))
    }

    fn apply(&self, dataset: CalibrationDataset) -> crate::Result<CalibrationDataset> {
        match self {
            Preprocess::PerExample(f) => dataset.map(f),
            Preprocess::Batched { batch_size, f } => dataset.map_batched(*batch_size, f),
        }
    }
}

/// Provides labeled examples for calibration
pub trait CalibrationSource {
    fn load(&self, request: &DatasetRequest) -> crate::Result<CalibrationDataset>;
}

/// Load, cap and preprocess a calibration dataset.
///
/// When `num_samples` is set the dataset is shuffled with `seed` before the
/// first `min(num_samples, len)` examples are kept.
pub fn load_calibration_dataset(
    source: &dyn CalibrationSource,
    request: &DatasetRequest,
    preprocess: Option<&Preprocess>,
    seed: u64,
) -> crate::Result<CalibrationDataset> {
    let mut dataset = source.load(request)?;

    if let Some(num_samples) = request.num_samples {
        let num_samples = num_samples.min(dataset.len());
        dataset = dataset.shuffle(seed).select(0..num_samples)?;
    }

    if let Some(preprocess) = preprocess {
        dataset = preprocess.apply(dataset)?;
    }

    tracing::info!(
        "Prepared calibration dataset '{}' ({} examples, split {})",
        request.dataset_name,
        dataset.len(),
        request.split
    );
    Ok(dataset)
}

/// Reads `<root>/<dataset>[/<config>]/<split>.jsonl`.
///
/// A `dataset_name` pointing at an existing `.jsonl` file is read directly.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    root: PathBuf,
}

impl JsonLinesSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, request: &DatasetRequest) -> PathBuf {
        let direct = self.root.join(&request.dataset_name);
        if direct.is_file() {
            return direct;
        }

        let mut dir = direct;
        if let Some(config) = &request.config_name {
            dir = dir.join(config);
        }
        dir.join(format!("{}.jsonl", request.split))
    }
}

impl CalibrationSource for JsonLinesSource {
    fn load(&self, request: &DatasetRequest) -> crate::Result<CalibrationDataset> {
        let path = self.resolve(request);
        if !path.exists() {
            return Err(crate::PtqError::DatasetError(format!(
                "Calibration data not found: {:?}",
                path
            )));
        }
        CalibrationDataset::from_json_lines(path)
    }
}
