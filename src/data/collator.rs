//! Collation of calibration examples into batches.

use candle_core::Tensor;

use super::dataset::{Example, FieldValue, Features};

/// Forms a batch from a list of examples
pub trait DataCollator {
    fn collate(&self, examples: &[&Example]) -> crate::Result<Features>;
}

impl<F> DataCollator for F
where
    F: Fn(&[&Example]) -> crate::Result<Features>,
{
    fn collate(&self, examples: &[&Example]) -> crate::Result<Features> {
        self(examples)
    }
}

/// Stacks every numeric field along a new leading batch axis.
///
/// `label` and `label_ids` are emitted as `labels`; text fields are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDataCollator;

impl DataCollator for DefaultDataCollator {
    fn collate(&self, examples: &[&Example]) -> crate::Result<Features> {
        let first = examples
            .first()
            .ok_or_else(|| crate::PtqError::CollationError("Cannot collate an empty batch".to_string()))?;

        let mut batch = Features::new();
        for (name, value) in first.iter() {
            if matches!(value, FieldValue::Text(_)) {
                continue;
            }

            let column: Vec<&Tensor> = examples
                .iter()
                .map(|example| {
                    example
                        .get(name)
                        .and_then(FieldValue::as_tensor)
                        .ok_or_else(|| {
                            crate::PtqError::CollationError(format!(
                                "Field '{}' missing or not numeric in batch",
                                name
                            ))
                        })
                })
                .collect::<crate::Result<_>>()?;

            let stacked = Tensor::stack(&column, 0).map_err(|e| {
                crate::PtqError::CollationError(format!("Cannot stack field '{}': {}", name, e))
            })?;

            let key = match name.as_str() {
                "label" | "label_ids" => "labels".to_string(),
                _ => name.clone(),
            };
            batch.insert(key, stacked);
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn example(ids: &[i64], label: i64) -> Example {
        let mut e = Example::new();
        e.insert(
            "input_ids".to_string(),
            FieldValue::Tensor(Tensor::new(ids, &Device::Cpu).unwrap()),
        );
        e.insert(
            "label".to_string(),
            FieldValue::Tensor(Tensor::new(label, &Device::Cpu).unwrap()),
        );
        e.insert("sentence".to_string(), FieldValue::Text("skip me".to_string()));
        e
    }

    #[test]
    fn test_default_collator_stacks_fields() {
        let a = example(&[1, 2, 3], 0);
        let b = example(&[4, 5, 6], 1);
        let batch = DefaultDataCollator.collate(&[&a, &b]).unwrap();

        assert_eq!(batch["input_ids"].dims(), &[2, 3]);
        assert_eq!(batch["labels"].to_vec1::<i64>().unwrap(), vec![0, 1]);
        assert!(!batch.contains_key("label"));
        assert!(!batch.contains_key("sentence"));
    }

    #[test]
    fn test_shape_mismatch_is_collation_error() {
        let a = example(&[1, 2, 3], 0);
        let b = example(&[4, 5], 1);
        let err = DefaultDataCollator.collate(&[&a, &b]).unwrap_err();
        assert!(matches!(err, crate::PtqError::CollationError(_)));
    }

    #[test]
    fn test_closure_collator() {
        let only_first = |examples: &[&Example]| -> crate::Result<Features> {
            DefaultDataCollator.collate(&examples[..1])
        };
        let a = example(&[1, 2], 0);
        let b = example(&[3, 4], 1);
        let batch = only_first.collate(&[&a, &b]).unwrap();
        assert_eq!(batch["input_ids"].dims(), &[1, 2]);
    }
}
