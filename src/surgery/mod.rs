//! Fully-connected to convolutional parameter transplant.
//!
//! - [`subsample`]: strided selection over 4-D weights
//! - [`policy`]: per-layer transform table and source -> target name mapping
//! - [`transplant`]: eager planning, checked writes, per-layer report

pub mod policy;
pub mod subsample;
pub mod transplant;

pub use policy::{BiasTransform, LayerMapping, LayerTransform, TransplantPolicy, WeightTransform};
pub use subsample::{subsample, Subsample, SubsampleSpec};
pub use transplant::{transplant, transplant_layer, LayerReport, TransplantReport};

use crate::config::SurgeryConfig;
use crate::errors::SurgeryError;
use crate::model::{save_checkpoint, Network};
use tracing::info;

/// Load both networks, transplant, and save the target checkpoint.
///
/// The output file is only written when every layer transplanted cleanly.
pub fn run(config: &SurgeryConfig) -> Result<TransplantReport, SurgeryError> {
    let source = Network::load(&config.source_topology, config.source_weights.as_deref())?;
    let mut target = Network::load(&config.target_topology, None)?;
    info!(
        "Source {}: {} layers, {} parameters; target {}: {} layers, {} parameters",
        source.name(),
        source.layers().len(),
        source.num_parameters(),
        target.name(),
        target.layers().len(),
        target.num_parameters()
    );

    let report = transplant(&source, &mut target, &config.policy, &config.mapping)?;

    info!("Saving {:?}...", config.output);
    save_checkpoint(&target, &config.output)?;
    if let Some(path) = &config.report {
        report.export_to_file(path)?;
        info!("Report written to {:?}", path);
    }
    Ok(report)
}
