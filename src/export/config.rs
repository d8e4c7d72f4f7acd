//! Per-architecture export configuration.

use std::collections::BTreeMap;

use crate::config::ModelConfig;
use crate::data::Features;
use crate::model::CompressedModel;

/// Axis index to symbolic dimension name
pub type DynamicAxes = BTreeMap<usize, String>;

/// Describes how one architecture and task is exported.
pub trait ExportConfig {
    /// Opset the architecture is exported with by default
    fn default_opset(&self) -> u32;

    /// Model inputs in export order, with their dynamic axes
    fn inputs(&self) -> Vec<(String, DynamicAxes)>;

    /// Model outputs in export order, with their dynamic axes
    fn outputs(&self) -> Vec<(String, DynamicAxes)>;

    /// Inputs used to trace the model
    fn generate_dummy_inputs(&self) -> crate::Result<Features>;

    /// Apply export-time changes to the model
    fn patch_model(&self, _model: &mut dyn CompressedModel) -> crate::Result<()> {
        Ok(())
    }

    /// Undo `patch_model`
    fn restore_model(&self, _model: &mut dyn CompressedModel) -> crate::Result<()> {
        Ok(())
    }
}

/// Looks up the export configuration of a model type and task
pub trait ExportConfigResolver {
    fn resolve(
        &self,
        model_type: &str,
        task: &str,
        config: &ModelConfig,
        use_past: bool,
    ) -> crate::Result<Box<dyn ExportConfig>>;
}
