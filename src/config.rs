//! Run configuration: input/output paths, transplant policy, layer mapping.
//!
//! Loaded from JSON; missing fields fall back to [`SurgeryConfig::default`],
//! which reproduces the VGG-16 fc -> reduced conversion.

use crate::errors::SurgeryError;
use crate::surgery::{LayerMapping, TransplantPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MODEL_DIR: &str = "models/VGGNet";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurgeryConfig {
    /// Topology of the network weights are taken from.
    pub source_topology: PathBuf,
    /// Checkpoint for the source. Without one the source is all zeros.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_weights: Option<PathBuf>,
    /// Topology of the network weights are written into.
    pub target_topology: PathBuf,
    /// Checkpoint written for the target.
    pub output: PathBuf,
    /// Optional JSON file receiving the per-layer report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PathBuf>,
    pub policy: TransplantPolicy,
    pub mapping: LayerMapping,
}

impl Default for SurgeryConfig {
    fn default() -> Self {
        let dir = Path::new(MODEL_DIR);
        Self {
            source_topology: dir.join("VGG_ILSVRC_16_layers_fc_deploy.json"),
            source_weights: Some(dir.join("VGG_ILSVRC_16_layers_fc.gguf")),
            target_topology: dir.join("VGG_ILSVRC_16_layers_fc_reduced_deploy.json"),
            output: dir.join("VGG_ILSVRC_16_layers_fc_reduced.gguf"),
            report: None,
            policy: TransplantPolicy::vgg16_reduced(),
            mapping: LayerMapping::identity(),
        }
    }
}

impl SurgeryConfig {
    pub fn from_json_str(s: &str) -> Result<Self, SurgeryError> {
        let config: SurgeryConfig = serde_json::from_str(s)?;
        config.policy.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SurgeryError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), SurgeryError> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
