//! Network: ordered, name-addressable layers with weight and bias tensors.

use crate::errors::SurgeryError;
use crate::model::checkpoint::{bias_key, load_checkpoint, weight_key, Checkpoint};
use crate::model::Topology;
use crate::tensor::{ShapeDisplay, Tensor};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

/// Parameters of one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    pub weights: Tensor,
    pub bias: Tensor,
}

/// Layers in declared order plus a name index.
#[derive(Debug, Clone)]
pub struct Network {
    name: String,
    layers: Vec<Layer>,
    index: HashMap<String, usize>,
}

impl Network {
    /// Allocate zero-filled parameters for every layer of `topology`.
    pub fn from_topology(topology: &Topology) -> Self {
        let layers: Vec<Layer> = topology
            .layers
            .iter()
            .map(|spec| Layer {
                name: spec.name.clone(),
                weights: Tensor::zeros(spec.weight_shape()),
                bias: Tensor::zeros(spec.bias_shape()),
            })
            .collect();
        let index = layers
            .iter()
            .enumerate()
            .map(|(i, l)| (l.name.clone(), i))
            .collect();
        Self {
            name: topology.name.clone(),
            layers,
            index,
        }
    }

    /// Load a topology file and, if given, fill parameters from a checkpoint.
    pub fn load(
        topology_path: impl AsRef<Path>,
        weights_path: Option<&Path>,
    ) -> Result<Self, SurgeryError> {
        let topology_path = topology_path.as_ref();
        info!("Loading topology from {:?}...", topology_path);
        let topology = Topology::from_file(topology_path)?;
        let mut network = Network::from_topology(&topology);
        if let Some(weights_path) = weights_path {
            info!("Loading weights from {:?}...", weights_path);
            let checkpoint = load_checkpoint(weights_path)?;
            network.load_weights(&checkpoint)?;
        }
        Ok(network)
    }

    /// Copy every layer's parameters out of `checkpoint`.
    ///
    /// Each layer needs both tensors with exactly the declared shape. Tensors
    /// that belong to no layer are ignored.
    pub fn load_weights(&mut self, checkpoint: &Checkpoint) -> Result<(), SurgeryError> {
        let mut used = HashSet::new();
        for layer in &mut self.layers {
            for (key, dst) in [
                (weight_key(&layer.name), &mut layer.weights),
                (bias_key(&layer.name), &mut layer.bias),
            ] {
                let src = checkpoint.tensor(&key).ok_or_else(|| {
                    SurgeryError::InvalidFormat(format!("checkpoint has no tensor {}", key))
                })?;
                if src.shape() != dst.shape() {
                    return Err(SurgeryError::InvalidFormat(format!(
                        "tensor {}: checkpoint shape {} does not match topology shape {}",
                        key,
                        ShapeDisplay(src.shape()),
                        ShapeDisplay(dst.shape())
                    )));
                }
                dst.assign_flat(&layer.name, src.data().iter().copied())?;
                used.insert(key);
            }
        }
        for t in &checkpoint.tensors {
            if !used.contains(&t.name) {
                warn!("checkpoint tensor {} matches no layer of {}", t.name, self.name);
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Layers in declared order.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.index.get(name).map(|&i| &self.layers[i])
    }

    pub fn layer_mut(&mut self, name: &str) -> Option<&mut Layer> {
        match self.index.get(name) {
            Some(&i) => Some(&mut self.layers[i]),
            None => None,
        }
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|l| l.name.as_str())
    }

    /// Total weight and bias element count.
    pub fn num_parameters(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.weights.len() + l.bias.len())
            .sum()
    }
}
