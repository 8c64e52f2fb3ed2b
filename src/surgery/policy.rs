//! Declarative transplant policy and layer-name mapping.
//!
//! A [`TransplantPolicy`] maps layer names to a [`LayerTransform`]; layers it
//! does not name are copied unchanged. A [`LayerMapping`] says which target
//! layer receives each source layer.

use crate::errors::SurgeryError;
use crate::surgery::subsample::{view_dims, SubsampleSpec};
use crate::tensor::{ShapeDisplay, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// How a source weight tensor becomes the target's flat weight sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WeightTransform {
    /// Row-major copy of every element.
    #[default]
    Copy,
    /// Strided selection; `view` optionally reinterprets the source as 4-D.
    Subsample {
        strides: SubsampleSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        view: Option<[usize; 4]>,
    },
}

impl WeightTransform {
    /// Element count produced from `source`.
    pub fn output_len(&self, source: &Tensor) -> Result<usize, SurgeryError> {
        match self {
            WeightTransform::Copy => Ok(source.len()),
            WeightTransform::Subsample { strides, view } => {
                strides.validate()?;
                Ok(strides.output_len(view_dims(source, *view)?))
            }
        }
    }
}

impl fmt::Display for WeightTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightTransform::Copy => write!(f, "copy"),
            WeightTransform::Subsample {
                strides,
                view: None,
            } => write!(f, "subsample{}", strides),
            WeightTransform::Subsample {
                strides,
                view: Some(v),
            } => write!(f, "subsample{} of view {}", strides, ShapeDisplay(v)),
        }
    }
}

/// How a source bias vector becomes the target's bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BiasTransform {
    #[default]
    Copy,
    /// Every `step`-th element starting at 0.
    Stride { step: usize },
}

impl BiasTransform {
    pub fn output_len(&self, source_len: usize) -> Result<usize, SurgeryError> {
        match self {
            BiasTransform::Copy => Ok(source_len),
            BiasTransform::Stride { step: 0 } => Err(SurgeryError::Configuration(
                "bias stride must be positive".into(),
            )),
            BiasTransform::Stride { step } => Ok(source_len.div_ceil(*step)),
        }
    }
}

impl fmt::Display for BiasTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BiasTransform::Copy => write!(f, "copy"),
            BiasTransform::Stride { step } => write!(f, "every {}th", step),
        }
    }
}

/// Weight and bias handling for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LayerTransform {
    #[serde(default)]
    pub weight: WeightTransform,
    #[serde(default)]
    pub bias: BiasTransform,
}

impl LayerTransform {
    pub const COPY: LayerTransform = LayerTransform {
        weight: WeightTransform::Copy,
        bias: BiasTransform::Copy,
    };

    pub fn subsample(strides: SubsampleSpec, bias_step: Option<usize>) -> Self {
        Self {
            weight: WeightTransform::Subsample {
                strides,
                view: None,
            },
            bias: match bias_step {
                Some(step) => BiasTransform::Stride { step },
                None => BiasTransform::Copy,
            },
        }
    }

    /// Read the source weights through `view` before subsampling. No effect on `Copy`.
    pub fn with_view(mut self, dims: [usize; 4]) -> Self {
        if let WeightTransform::Subsample { ref mut view, .. } = self.weight {
            *view = Some(dims);
        }
        self
    }
}

/// Layer name -> transform. Unlisted layers use [`LayerTransform::COPY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransplantPolicy {
    layers: BTreeMap<String, LayerTransform>,
}

impl TransplantPolicy {
    /// Empty policy: every layer is copied.
    pub fn new() -> Self {
        Self::default()
    }

    /// VGG-16 to reduced fully convolutional VGG-16:
    ///
    /// | layer | weight strides | bias |
    /// |---|---|---|
    /// | `fc6` | (4, 1, 3, 3) | every 4th |
    /// | `fc7` | (4, 4, 1, 1) | every 4th |
    /// | `fc8` | (1, 4, 1, 1) | copy |
    pub fn vgg16_reduced() -> Self {
        Self::new()
            .with_layer(
                "fc6",
                LayerTransform::subsample(SubsampleSpec::new(4, 1, 3, 3), Some(4)),
            )
            .with_layer(
                "fc7",
                LayerTransform::subsample(SubsampleSpec::new(4, 4, 1, 1), Some(4)),
            )
            .with_layer(
                "fc8",
                LayerTransform::subsample(SubsampleSpec::new(1, 4, 1, 1), None),
            )
    }

    /// Insert or replace the transform for `name`.
    pub fn with_layer(mut self, name: impl Into<String>, transform: LayerTransform) -> Self {
        self.layers.insert(name.into(), transform);
        self
    }

    pub fn transform_for(&self, name: &str) -> LayerTransform {
        self.layers.get(name).copied().unwrap_or(LayerTransform::COPY)
    }

    /// Explicitly listed layers, by name.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &LayerTransform)> {
        self.layers.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Reject zero strides and zero bias steps.
    pub fn validate(&self) -> Result<(), SurgeryError> {
        for (name, t) in &self.layers {
            let check = || -> Result<(), SurgeryError> {
                if let WeightTransform::Subsample { strides, .. } = t.weight {
                    strides.validate()?;
                }
                t.bias.output_len(1)?;
                Ok(())
            };
            check().map_err(|e| {
                SurgeryError::Configuration(format!("policy for {}: {}", name, e))
            })?;
        }
        Ok(())
    }
}

/// Source layer name -> target layer name. Unlisted names map to themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerMapping {
    renames: BTreeMap<String, String>,
}

impl LayerMapping {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn with_rename(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.renames.insert(source.into(), target.into());
        self
    }

    pub fn target_for<'a>(&'a self, source: &'a str) -> &'a str {
        self.renames
            .get(source)
            .map(String::as_str)
            .unwrap_or(source)
    }

    /// Pair every source layer with its target layer, in source order.
    ///
    /// Fails if a target does not exist, if two source layers share one, or if
    /// a target layer is left without a source.
    pub fn resolve<'a, S, T>(
        &'a self,
        source_names: S,
        target_names: T,
    ) -> Result<Vec<(&'a str, &'a str)>, SurgeryError>
    where
        S: IntoIterator<Item = &'a str>,
        T: IntoIterator<Item = &'a str>,
    {
        let mut claimed: HashMap<&str, Option<&str>> =
            target_names.into_iter().map(|t| (t, None)).collect();
        let mut pairs = Vec::new();
        for source in source_names {
            let target = self.target_for(source);
            match claimed.get_mut(target) {
                None => {
                    return Err(SurgeryError::Configuration(format!(
                        "source layer '{}' maps to '{}', which the target network does not have",
                        source, target
                    )))
                }
                Some(Some(previous)) => {
                    return Err(SurgeryError::Configuration(format!(
                        "source layers '{}' and '{}' both map to target layer '{}'",
                        previous, source, target
                    )))
                }
                Some(slot) => *slot = Some(source),
            }
            pairs.push((source, target));
        }
        let mut unclaimed: Vec<&str> = claimed
            .into_iter()
            .filter_map(|(t, s)| s.is_none().then_some(t))
            .collect();
        if !unclaimed.is_empty() {
            unclaimed.sort_unstable();
            return Err(SurgeryError::Configuration(format!(
                "target layers [{}] receive no source layer",
                unclaimed.join(", ")
            )));
        }
        Ok(pairs)
    }
}
