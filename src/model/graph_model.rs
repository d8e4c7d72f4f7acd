//! Runtime-graph model loaded from a model directory.

use std::path::Path;

use crate::config::{ModelConfig, CONFIG_NAME};
use crate::runtime::{RuntimeGraph, GRAPH_FILE_NAME};
use super::base::{PreTrainedModel, RuntimeModel};

/// Model directory holding `config.json` and a serialized runtime graph.
#[derive(Debug, Clone)]
pub struct GraphModel {
    config: ModelConfig,
    graph: RuntimeGraph,
}

impl GraphModel {
    pub fn new(config: ModelConfig, graph: RuntimeGraph) -> Self {
        Self { config, graph }
    }

    /// Load from a directory written by `save_pretrained`
    pub fn from_pretrained(model_dir: impl AsRef<Path>) -> crate::Result<Self> {
        let model_dir = model_dir.as_ref();
        if !model_dir.is_dir() {
            return Err(crate::PtqError::ConfigError(format!(
                "Model directory not found: {:?}",
                model_dir
            )));
        }

        let config = ModelConfig::from_file(model_dir.join(CONFIG_NAME))?;
        let graph = RuntimeGraph::read(&model_dir.join(GRAPH_FILE_NAME))?;
        tracing::info!("Loaded runtime graph '{}' from {:?}", graph.name, model_dir);

        Ok(Self { config, graph })
    }
}

impl PreTrainedModel for GraphModel {
    fn forward_signature(&self) -> Vec<String> {
        self.graph.inputs.iter().map(|p| p.name.clone()).collect()
    }

    fn config(&self) -> &ModelConfig {
        &self.config
    }
}

impl RuntimeModel for GraphModel {
    fn graph(&self) -> &RuntimeGraph {
        &self.graph
    }

    fn set_graph(&mut self, graph: RuntimeGraph) {
        self.graph = graph;
    }
}
