//! Model configuration loaded from and saved to `config.json`.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the model configuration inside a model directory
pub const CONFIG_NAME: &str = "config.json";

/// Model configuration as stored in `config.json`.
///
/// Only the keys the quantizer reads are typed; every other key is kept in
/// `extra` so that `save_pretrained` writes back what was loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Hub identifier or local path the model was loaded from
    #[serde(rename = "_name_or_path", default)]
    pub name_or_path: String,

    /// Architecture family (e.g. "bert", "gpt_neox")
    #[serde(default)]
    pub model_type: String,

    /// Model class name(s)
    #[serde(default)]
    pub architectures: Vec<String>,

    /// Whether the model reuses past key/values during generation
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,

    /// Remaining configuration keys
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_use_cache() -> bool {
    true
}

impl ModelConfig {
    /// Create a minimal configuration
    pub fn new(name_or_path: impl Into<String>, model_type: impl Into<String>) -> Self {
        Self {
            name_or_path: name_or_path.into(),
            model_type: model_type.into(),
            architectures: Vec::new(),
            use_cache: default_use_cache(),
            extra: serde_json::Map::new(),
        }
    }

    /// Load configuration from a config.json file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ModelConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Write `config.json` into `save_directory`
    pub fn save_pretrained(&self, save_directory: impl AsRef<Path>) -> crate::Result<()> {
        let save_directory = save_directory.as_ref();
        std::fs::create_dir_all(save_directory)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(save_directory.join(CONFIG_NAME), content)?;
        Ok(())
    }

    /// Model type in the dashed form used to look up export configurations
    pub fn export_model_type(&self) -> String {
        self.model_type.replace('_', "-")
    }
}
