//! # net-surgery
//!
//! Convert the fully-connected layers of a trained classifier into equivalent
//! convolutional layers so the network runs in fully convolutional
//! (sliding-window) mode.
//!
//! ## Pipeline
//!
//! - **Load**: two topologies (JSON) and the source checkpoint (GGUF, F32)
//! - **Plan**: pair layers by name, check every element count up front
//! - **Transplant**: copy or strided-subsample weights and biases per layer policy
//! - **Save**: write the target parameters to a new checkpoint

pub mod config;
pub mod errors;
pub mod model;
pub mod surgery;
pub mod tensor;

pub use config::SurgeryConfig;
pub use errors::SurgeryError;
pub use model::{
    inspect_checkpoint, load_checkpoint, save_checkpoint, Layer, LayerSpec, Network, Topology,
};
pub use surgery::{
    subsample, transplant, transplant_layer, LayerMapping, LayerTransform, SubsampleSpec,
    TransplantPolicy, TransplantReport,
};
pub use tensor::Tensor;
