//! In-memory calibration dataset.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Batch of model inputs keyed by input name
pub type Features = BTreeMap<String, Tensor>;

/// A single calibration example keyed by column name
pub type Example = BTreeMap<String, FieldValue>;

/// Value of one column of an example
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// Numeric field
    Tensor(Tensor),
    /// Raw text, typically consumed by a preprocessing function
    Text(String),
}

impl FieldValue {
    /// Borrow the tensor, if this is a numeric field
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            FieldValue::Tensor(t) => Some(t),
            FieldValue::Text(_) => None,
        }
    }

    /// Borrow the text, if this is a text field
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Tensor(_) => None,
        }
    }

    /// Convert a JSON value into a field.
    ///
    /// Integer (nested) arrays become `i64` tensors, any float makes the
    /// whole array `f32`. Nested arrays must be rectangular.
    pub fn from_json(value: &serde_json::Value) -> crate::Result<Self> {
        use serde_json::Value;

        match value {
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Bool(b) => Ok(FieldValue::Tensor(Tensor::new(*b as i64, &Device::Cpu)?)),
            Value::Number(_) | Value::Array(_) => {
                let mut shape = Vec::new();
                let mut ints = Vec::new();
                let mut floats = Vec::new();
                let mut all_ints = true;
                collect_numbers(value, 0, &mut shape, &mut ints, &mut floats, &mut all_ints)?;

                let tensor = if all_ints {
                    Tensor::from_vec(ints, shape.as_slice(), &Device::Cpu)?
                } else {
                    Tensor::from_vec(floats, shape.as_slice(), &Device::Cpu)?
                };
                Ok(FieldValue::Tensor(tensor))
            }
            other => Err(crate::PtqError::DatasetError(format!(
                "Unsupported field value: {}",
                other
            ))),
        }
    }

    /// Convert the field back into JSON
    pub fn to_json(&self) -> crate::Result<serde_json::Value> {
        match self {
            FieldValue::Text(s) => Ok(serde_json::Value::String(s.clone())),
            FieldValue::Tensor(t) => tensor_to_json(t),
        }
    }
}

fn collect_numbers(
    value: &serde_json::Value,
    depth: usize,
    shape: &mut Vec<usize>,
    ints: &mut Vec<i64>,
    floats: &mut Vec<f32>,
    all_ints: &mut bool,
) -> crate::Result<()> {
    use serde_json::Value;

    match value {
        Value::Number(n) => {
            if depth != shape.len() {
                return Err(crate::PtqError::DatasetError("Ragged numeric array".to_string()));
            }
            match n.as_i64() {
                Some(i) => {
                    ints.push(i);
                    floats.push(i as f32);
                }
                None => {
                    *all_ints = false;
                    ints.push(0);
                    floats.push(n.as_f64().unwrap_or(f64::NAN) as f32);
                }
            }
            Ok(())
        }
        Value::Array(items) => {
            if depth == shape.len() {
                if ints.is_empty() {
                    shape.push(items.len());
                } else {
                    return Err(crate::PtqError::DatasetError("Ragged numeric array".to_string()));
                }
            } else if shape[depth] != items.len() {
                return Err(crate::PtqError::DatasetError("Ragged numeric array".to_string()));
            }
            for item in items {
                collect_numbers(item, depth + 1, shape, ints, floats, all_ints)?;
            }
            Ok(())
        }
        other => Err(crate::PtqError::DatasetError(format!(
            "Expected a number, found {}",
            other
        ))),
    }
}

fn tensor_to_json(tensor: &Tensor) -> crate::Result<serde_json::Value> {
    let dims = tensor.dims().to_vec();
    let flat: Vec<serde_json::Value> = match tensor.dtype() {
        DType::I64 | DType::U32 | DType::U8 => tensor
            .flatten_all()?
            .to_dtype(DType::I64)?
            .to_vec1::<i64>()?
            .into_iter()
            .map(serde_json::Value::from)
            .collect(),
        _ => tensor
            .flatten_all()?
            .to_dtype(DType::F64)?
            .to_vec1::<f64>()?
            .into_iter()
            .map(serde_json::Value::from)
            .collect(),
    };

    if dims.is_empty() {
        return Ok(flat.into_iter().next().unwrap_or(serde_json::Value::Null));
    }
    Ok(nest(&flat, &dims))
}

fn nest(flat: &[serde_json::Value], dims: &[usize]) -> serde_json::Value {
    if dims.len() <= 1 {
        return serde_json::Value::Array(flat.to_vec());
    }
    let stride: usize = dims[1..].iter().product();
    if stride == 0 {
        return serde_json::Value::Array(vec![serde_json::Value::Array(Vec::new()); dims[0]]);
    }
    serde_json::Value::Array(
        flat.chunks(stride)
            .map(|chunk| nest(chunk, &dims[1..]))
            .collect(),
    )
}

/// Ordered collection of examples sharing one column set.
#[derive(Debug, Clone, Default)]
pub struct CalibrationDataset {
    column_names: Vec<String>,
    examples: Vec<Example>,
}

impl CalibrationDataset {
    /// Build a dataset, checking that every example has the same columns
    pub fn from_examples(examples: Vec<Example>) -> crate::Result<Self> {
        let column_names: Vec<String> = examples
            .first()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default();

        for (idx, example) in examples.iter().enumerate() {
            if !example.keys().eq(column_names.iter()) {
                return Err(crate::PtqError::DatasetError(format!(
                    "Example {} has columns {:?}, expected {:?}",
                    idx,
                    example.keys().collect::<Vec<_>>(),
                    column_names
                )));
            }
        }

        Ok(Self {
            column_names,
            examples,
        })
    }

    /// Load a dataset from a JSON-lines file, one object per line
    pub fn from_json_lines(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(std::fs::File::open(path)?);
        let mut examples = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value: serde_json::Value = serde_json::from_str(&line)?;
            let object = value.as_object().ok_or_else(|| {
                crate::PtqError::DatasetError(format!(
                    "{}:{}: expected a JSON object",
                    path.display(),
                    line_no + 1
                ))
            })?;

            let mut example = Example::new();
            for (name, field) in object {
                example.insert(name.clone(), FieldValue::from_json(field)?);
            }
            examples.push(example);
        }

        tracing::debug!("Loaded {} examples from {:?}", examples.len(), path);
        Self::from_examples(examples)
    }

    /// Write the dataset as JSON lines
    pub fn to_json_lines(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        for example in &self.examples {
            let mut object = serde_json::Map::new();
            for (name, field) in example {
                object.insert(name.clone(), field.to_json()?);
            }
            serde_json::to_writer(&mut file, &serde_json::Value::Object(object))?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        Ok(())
    }

    /// Column names, sorted
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Get an example by index
    pub fn get(&self, index: usize) -> Option<&Example> {
        self.examples.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Example> {
        self.examples.iter()
    }

    /// Drop the given columns; unknown names are ignored
    pub fn remove_columns(mut self, columns: &[String]) -> Self {
        let drop: BTreeSet<&String> = columns.iter().collect();
        for example in &mut self.examples {
            example.retain(|name, _| !drop.contains(name));
        }
        self.column_names.retain(|name| !drop.contains(name));
        self
    }

    /// Keep only the columns named in `accepted`
    pub fn retain_columns(self, accepted: &[String]) -> Self {
        let accepted: BTreeSet<&String> = accepted.iter().collect();
        let ignored: Vec<String> = self
            .column_names
            .iter()
            .filter(|name| !accepted.contains(name))
            .cloned()
            .collect();

        if !ignored.is_empty() {
            tracing::debug!("Removing columns not accepted by the model: {:?}", ignored);
        }
        self.remove_columns(&ignored)
    }

    /// Select examples by index, in the given order
    pub fn select(self, indices: impl IntoIterator<Item = usize>) -> crate::Result<Self> {
        let len = self.examples.len();
        let mut selected = Vec::new();
        for idx in indices {
            let example = self.examples.get(idx).ok_or_else(|| {
                crate::PtqError::DatasetError(format!(
                    "Index {} out of range for dataset of size {}",
                    idx, len
                ))
            })?;
            selected.push(example.clone());
        }

        Ok(Self {
            column_names: self.column_names,
            examples: selected,
        })
    }

    /// Shuffle examples with a seeded generator
    pub fn shuffle(mut self, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        self.examples.shuffle(&mut rng);
        self
    }

    /// Apply a function to every example
    pub fn map<F>(self, mut f: F) -> crate::Result<Self>
    where
        F: FnMut(Example) -> crate::Result<Example>,
    {
        let examples = self
            .examples
            .into_iter()
            .map(&mut f)
            .collect::<crate::Result<Vec<_>>>()?;
        Self::from_examples(examples)
    }

    /// Apply a function to consecutive chunks of examples.
    ///
    /// The function may change the number of examples per chunk.
    pub fn map_batched<F>(self, batch_size: usize, mut f: F) -> crate::Result<Self>
    where
        F: FnMut(Vec<Example>) -> crate::Result<Vec<Example>>,
    {
        let batch_size = batch_size.max(1);
        let mut examples = Vec::with_capacity(self.examples.len());
        let mut remaining = self.examples.into_iter().peekable();

        while remaining.peek().is_some() {
            let chunk: Vec<Example> = remaining.by_ref().take(batch_size).collect();
            examples.extend(f(chunk)?);
        }

        Self::from_examples(examples)
    }
}

impl<'a> IntoIterator for &'a CalibrationDataset {
    type Item = &'a Example;
    type IntoIter = std::slice::Iter<'a, Example>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
