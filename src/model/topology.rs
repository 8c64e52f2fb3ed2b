//! Topology description: ordered layer specs loaded from JSON.
//!
//! A topology carries layer names and parameter shapes only; weights come
//! from a checkpoint (see [`crate::model::checkpoint`]).

use crate::errors::SurgeryError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Parameterised layer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerKind {
    /// Weight `[num_output, channels, kernel_h, kernel_w]`.
    Convolution {
        num_output: usize,
        channels: usize,
        kernel_h: usize,
        kernel_w: usize,
    },
    /// Fully-connected. Weight `[num_output, num_input]`.
    InnerProduct { num_output: usize, num_input: usize },
}

/// One named layer in a topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: LayerKind,
}

impl LayerSpec {
    pub fn convolution(
        name: impl Into<String>,
        num_output: usize,
        channels: usize,
        kernel_h: usize,
        kernel_w: usize,
    ) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::Convolution {
                num_output,
                channels,
                kernel_h,
                kernel_w,
            },
        }
    }

    pub fn inner_product(name: impl Into<String>, num_output: usize, num_input: usize) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::InnerProduct {
                num_output,
                num_input,
            },
        }
    }

    pub fn weight_shape(&self) -> Vec<usize> {
        match self.kind {
            LayerKind::Convolution {
                num_output,
                channels,
                kernel_h,
                kernel_w,
            } => vec![num_output, channels, kernel_h, kernel_w],
            LayerKind::InnerProduct {
                num_output,
                num_input,
            } => vec![num_output, num_input],
        }
    }

    pub fn bias_shape(&self) -> Vec<usize> {
        match self.kind {
            LayerKind::Convolution { num_output, .. }
            | LayerKind::InnerProduct { num_output, .. } => vec![num_output],
        }
    }
}

/// Named, ordered list of layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub name: String,
    pub layers: Vec<LayerSpec>,
}

impl Topology {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layers: Vec::new(),
        }
    }

    pub fn with_layer(mut self, layer: LayerSpec) -> Self {
        self.layers.push(layer);
        self
    }

    /// Parse and validate a topology from JSON text.
    pub fn from_json_str(s: &str) -> Result<Self, SurgeryError> {
        let topology: Topology = serde_json::from_str(s)?;
        topology.validate()?;
        Ok(topology)
    }

    /// Read and validate a topology file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SurgeryError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), SurgeryError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Names must be non-empty and unique; every dimension must be positive.
    pub fn validate(&self) -> Result<(), SurgeryError> {
        let mut seen = HashSet::new();
        for layer in &self.layers {
            if layer.name.trim().is_empty() {
                return Err(SurgeryError::InvalidFormat(format!(
                    "topology '{}': layer with empty name",
                    self.name
                )));
            }
            if !seen.insert(layer.name.as_str()) {
                return Err(SurgeryError::InvalidFormat(format!(
                    "topology '{}': duplicate layer '{}'",
                    self.name, layer.name
                )));
            }
            if layer.weight_shape().contains(&0) {
                return Err(SurgeryError::InvalidFormat(format!(
                    "topology '{}': layer '{}' has a zero-sized dimension",
                    self.name, layer.name
                )));
            }
        }
        Ok(())
    }
}
