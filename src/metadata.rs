//! Model metadata written by the training step.

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Contents of `model_metadata.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Validation accuracy of the last trained model, in percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl ModelMetadata {
    /// Read the metadata file. A missing file yields empty metadata.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Model(format!("Failed to read {path:?}: {e}")))?;
        serde_json::from_str(&content)
            .map_err(|e| AgentError::Model(format!("Failed to parse {path:?}: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<(), AgentError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AgentError::Model(format!("Failed to serialize metadata: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| AgentError::Model(format!("Failed to write {path:?}: {e}")))
    }
}

/// Last-known model accuracy, `None` when the file or field is absent.
pub fn last_accuracy(path: &Path) -> Result<Option<f64>, AgentError> {
    Ok(ModelMetadata::load(path)?.accuracy)
}
