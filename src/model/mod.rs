//! Network topologies, parameters, and checkpoint I/O.

pub mod checkpoint;
pub mod demo;
pub mod network;
pub mod topology;

pub use checkpoint::{
    inspect_checkpoint, load_checkpoint, save_checkpoint, tensor_type_name, Checkpoint,
    CheckpointTensor, InspectResult, MetadataValue, TensorInfoInspect,
};
pub use demo::{
    random_network, vgg16_dense_policy, vgg16_dense_topology, vgg16_fc_topology,
    vgg16_reduced_topology, VggDims,
};
pub use network::{Layer, Network};
pub use topology::{LayerKind, LayerSpec, Topology};
