//! Parameter copy driver.
//!
//! [`transplant`] plans every layer first (mapping, element counts) and only
//! then writes into the target, so a rejected plan leaves the target as it was.

use crate::errors::SurgeryError;
use crate::model::{Layer, Network};
use crate::surgery::policy::{
    BiasTransform, LayerMapping, LayerTransform, TransplantPolicy, WeightTransform,
};
use crate::surgery::subsample::subsample;
use crate::tensor::ShapeDisplay;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

/// Diagnostic record for one transplanted layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerReport {
    pub source_layer: String,
    pub target_layer: String,
    pub source_weight_shape: Vec<usize>,
    pub source_bias_shape: Vec<usize>,
    pub target_weight_shape: Vec<usize>,
    pub target_bias_shape: Vec<usize>,
    pub weight_transform: String,
    pub bias_transform: String,
}

/// All layer records of one transplant, in source layer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransplantReport {
    pub source_network: String,
    pub target_network: String,
    pub layers: Vec<LayerReport>,
}

impl TransplantReport {
    /// Elements written into the target (weights plus biases).
    pub fn parameters_written(&self) -> usize {
        self.layers
            .iter()
            .map(|l| {
                l.target_weight_shape.iter().product::<usize>()
                    + l.target_bias_shape.iter().product::<usize>()
            })
            .sum()
    }

    pub fn export_to_file(&self, path: &Path) -> Result<(), SurgeryError> {
        let w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(w, self)?;
        Ok(())
    }
}

/// One checked source -> target pairing.
struct PlannedLayer<'s> {
    source: &'s Layer,
    target_name: String,
    transform: LayerTransform,
}

/// Check counts of a single pairing without writing.
fn check_layer(
    source: &Layer,
    target: &Layer,
    transform: &LayerTransform,
) -> Result<(), SurgeryError> {
    let weight_len = transform.weight.output_len(&source.weights)?;
    if weight_len != target.weights.len() {
        return Err(SurgeryError::ShapeMismatch {
            layer: source.name.clone(),
            expected: target.weights.len(),
            actual: weight_len,
        });
    }
    let bias_len = transform.bias.output_len(source.bias.len())?;
    if bias_len != target.bias.len() {
        return Err(SurgeryError::ShapeMismatch {
            layer: source.name.clone(),
            expected: target.bias.len(),
            actual: bias_len,
        });
    }
    Ok(())
}

fn plan<'s>(
    source: &'s Network,
    target: &Network,
    policy: &TransplantPolicy,
    mapping: &LayerMapping,
) -> Result<Vec<PlannedLayer<'s>>, SurgeryError> {
    policy.validate()?;
    let pairs = mapping.resolve(source.layer_names(), target.layer_names())?;
    let mut planned = Vec::with_capacity(pairs.len());
    for (source_name, target_name) in pairs {
        let src = source
            .layer(source_name)
            .ok_or_else(|| SurgeryError::MissingLayer(source_name.to_string()))?;
        let dst = target
            .layer(target_name)
            .ok_or_else(|| SurgeryError::MissingLayer(target_name.to_string()))?;
        let transform = policy.transform_for(source_name);
        check_layer(src, dst, &transform)?;
        planned.push(PlannedLayer {
            source: src,
            target_name: target_name.to_string(),
            transform,
        });
    }
    Ok(planned)
}

/// Write one layer's transformed parameters into `target`.
///
/// Every write is count-checked; on error `target` is unchanged.
pub fn transplant_layer(
    source: &Layer,
    target: &mut Layer,
    transform: &LayerTransform,
) -> Result<(), SurgeryError> {
    check_layer(source, target, transform)?;
    match transform.weight {
        WeightTransform::Copy => target
            .weights
            .assign_flat(&source.name, source.weights.data().iter().copied())?,
        WeightTransform::Subsample { strides, view } => target
            .weights
            .assign_flat(&source.name, subsample(&source.weights, strides, view)?)?,
    }
    match transform.bias {
        BiasTransform::Copy => target
            .bias
            .assign_flat(&source.name, source.bias.data().iter().copied())?,
        BiasTransform::Stride { step } => target
            .bias
            .assign_flat(&source.name, source.bias.data().iter().step_by(step).copied())?,
    }
    Ok(())
}

/// Copy parameters of every `source` layer into its mapped `target` layer.
///
/// Nothing is written unless every layer passes planning.
pub fn transplant(
    source: &Network,
    target: &mut Network,
    policy: &TransplantPolicy,
    mapping: &LayerMapping,
) -> Result<TransplantReport, SurgeryError> {
    let planned = plan(source, target, policy, mapping)?;

    let mut layers = Vec::with_capacity(planned.len());
    for PlannedLayer {
        source: src,
        target_name,
        transform,
    } in planned
    {
        let dst = target
            .layer_mut(&target_name)
            .ok_or(SurgeryError::MissingLayer(target_name))?;
        transplant_layer(src, dst, &transform)?;

        info!(
            "{} weights are {} dimensional and biases are {} dimensional",
            src.name,
            ShapeDisplay(src.weights.shape()),
            ShapeDisplay(src.bias.shape())
        );
        info!(
            "{} -> {}: weights are {} dimensional and biases are {} dimensional ({}, bias {})",
            src.name,
            dst.name,
            ShapeDisplay(dst.weights.shape()),
            ShapeDisplay(dst.bias.shape()),
            transform.weight,
            transform.bias
        );
        layers.push(LayerReport {
            source_layer: src.name.clone(),
            target_layer: dst.name.clone(),
            source_weight_shape: src.weights.shape().to_vec(),
            source_bias_shape: src.bias.shape().to_vec(),
            target_weight_shape: dst.weights.shape().to_vec(),
            target_bias_shape: dst.bias.shape().to_vec(),
            weight_transform: transform.weight.to_string(),
            bias_transform: transform.bias.to_string(),
        });
    }

    Ok(TransplantReport {
        source_network: source.name().to_string(),
        target_network: target.name().to_string(),
        layers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LayerSpec, Topology};
    use crate::surgery::subsample::SubsampleSpec;
    use crate::tensor::Tensor;

    fn arange_layer(name: &str, weight_shape: Vec<usize>, bias_len: usize) -> Layer {
        let n: usize = weight_shape.iter().product();
        Layer {
            name: name.to_string(),
            weights: Tensor::from_vec(weight_shape, (0..n).map(|x| x as f32).collect()).unwrap(),
            bias: Tensor::from_vec(vec![bias_len], (0..bias_len).map(|x| x as f32 * 10.0).collect())
                .unwrap(),
        }
    }

    fn zero_layer(name: &str, weight_shape: Vec<usize>, bias_len: usize) -> Layer {
        Layer {
            name: name.to_string(),
            weights: Tensor::zeros(weight_shape),
            bias: Tensor::zeros(vec![bias_len]),
        }
    }

    #[test]
    fn direct_copy_reshapes_row_major() {
        let src = arange_layer("conv5_3", vec![2, 12], 2);
        let mut dst = zero_layer("conv5_3", vec![2, 3, 2, 2], 2);
        transplant_layer(&src, &mut dst, &LayerTransform::COPY).unwrap();
        assert_eq!(dst.weights.data(), src.weights.data());
        assert_eq!(dst.weights, src.weights.reshape(vec![2, 3, 2, 2]).unwrap());
        assert_eq!(dst.bias.data(), src.bias.data());
    }

    #[test]
    fn direct_copy_is_idempotent() {
        let src = arange_layer("conv1_1", vec![4, 3, 3, 3], 4);
        let mut once = zero_layer("conv1_1", vec![4, 3, 3, 3], 4);
        transplant_layer(&src, &mut once, &LayerTransform::COPY).unwrap();
        let mut twice = once.clone();
        transplant_layer(&src, &mut twice, &LayerTransform::COPY).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn fc6_subsample_selects_expected_indices() {
        let src = arange_layer("fc6", vec![8, 2, 3, 3], 8);
        let mut dst = zero_layer("fc6", vec![2, 2, 1, 1], 2);
        let policy = TransplantPolicy::vgg16_reduced();
        transplant_layer(&src, &mut dst, &policy.transform_for("fc6")).unwrap();
        // n in {0, 4}, every c, h = w = 0
        let mut expected = Vec::new();
        for n in [0usize, 4] {
            for c in 0..2 {
                expected.push(src.weights.data()[(n * 2 + c) * 9]);
            }
        }
        assert_eq!(dst.weights.data(), expected.as_slice());
        assert_eq!(dst.bias.data(), &[0.0, 40.0]);
    }

    #[test]
    fn fc7_bias_every_fourth_with_ceil_len() {
        let src = arange_layer("fc7", vec![10, 8], 10);
        let mut dst = zero_layer("fc7", vec![3, 2, 1, 1], 3);
        let policy = TransplantPolicy::vgg16_reduced();
        transplant_layer(&src, &mut dst, &policy.transform_for("fc7")).unwrap();
        assert_eq!(dst.bias.data(), &[0.0, 40.0, 80.0]);
        assert_eq!(dst.weights.data(), &[0.0, 4.0, 32.0, 36.0, 64.0, 68.0]);
    }

    #[test]
    fn fc8_bias_passes_through() {
        let src = arange_layer("fc8", vec![5, 8], 5);
        let mut dst = zero_layer("fc8", vec![5, 2, 1, 1], 5);
        let policy = TransplantPolicy::vgg16_reduced();
        transplant_layer(&src, &mut dst, &policy.transform_for("fc8")).unwrap();
        assert_eq!(dst.bias.data(), src.bias.data());
        assert_eq!(dst.weights.data()[..2], [0.0, 4.0]);
    }

    #[test]
    fn layer_mismatch_is_reported_and_target_untouched() {
        let src = arange_layer("fc6", vec![8, 2, 3, 3], 8);
        let mut dst = zero_layer("fc6", vec![2, 2, 3, 3], 2);
        let err = transplant_layer(
            &src,
            &mut dst,
            &LayerTransform::subsample(SubsampleSpec::new(4, 1, 3, 3), Some(4)),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SurgeryError::ShapeMismatch { ref layer, expected: 36, actual: 4 } if layer == "fc6"
        ));
        assert!(dst.weights.data().iter().all(|&x| x == 0.0));
    }

    fn pair() -> (Network, Network) {
        let source = Topology::new("src")
            .with_layer(LayerSpec::convolution("conv1", 2, 1, 2, 2))
            .with_layer(LayerSpec::inner_product("fc7", 8, 8))
            .with_layer(LayerSpec::inner_product("fc8", 3, 8));
        let target = Topology::new("dst")
            .with_layer(LayerSpec::convolution("fc8", 3, 2, 1, 1))
            .with_layer(LayerSpec::convolution("conv1", 2, 1, 2, 2))
            .with_layer(LayerSpec::convolution("fc7", 2, 2, 1, 1));
        let mut src = Network::from_topology(&source);
        for layer in src.layers_mut() {
            for (i, w) in layer.weights.data_mut().iter_mut().enumerate() {
                *w = i as f32 + 1.0;
            }
            for (i, b) in layer.bias.data_mut().iter_mut().enumerate() {
                *b = -(i as f32) - 1.0;
            }
        }
        (src, Network::from_topology(&target))
    }

    #[test]
    fn transplant_pairs_by_name() {
        let (src, mut dst) = pair();
        let report = transplant(
            &src,
            &mut dst,
            &TransplantPolicy::vgg16_reduced(),
            &LayerMapping::identity(),
        )
        .unwrap();
        let order: Vec<&str> = report.layers.iter().map(|l| l.source_layer.as_str()).collect();
        assert_eq!(order, ["conv1", "fc7", "fc8"]);
        assert_eq!(
            dst.layer("conv1").unwrap().weights.data(),
            src.layer("conv1").unwrap().weights.data()
        );
        assert_eq!(dst.layer("fc7").unwrap().bias.data(), &[-1.0, -5.0]);
        assert_eq!(dst.layer("fc8").unwrap().bias.data(), &[-1.0, -2.0, -3.0]);
        assert_eq!(report.layers[1].target_weight_shape, vec![2, 2, 1, 1]);
        assert_eq!(report.layers[1].weight_transform, "subsample(4, 4, 1, 1)");
        assert_eq!(report.parameters_written(), (8 + 2) + (4 + 2) + (6 + 3));
    }

    #[test]
    fn transplant_fails_eagerly_without_writing() {
        let (src, mut dst) = pair();
        // fc8 left unsubsampled: 24 elements into a 6-element target
        let policy = TransplantPolicy::vgg16_reduced().with_layer("fc8", LayerTransform::COPY);
        let err = transplant(&src, &mut dst, &policy, &LayerMapping::identity()).unwrap_err();
        assert!(matches!(err, SurgeryError::ShapeMismatch { ref layer, .. } if layer == "fc8"));
        assert!(dst
            .layers()
            .iter()
            .all(|l| l.weights.data().iter().all(|&x| x == 0.0)));
    }

    #[test]
    fn transplant_rejects_unmapped_layer() {
        let (src, mut dst) = pair();
        let mapping = LayerMapping::identity().with_rename("fc7", "fc7_conv");
        let err = transplant(&src, &mut dst, &TransplantPolicy::vgg16_reduced(), &mapping)
            .unwrap_err();
        assert!(matches!(err, SurgeryError::Configuration(_)));
    }

    #[test]
    fn transplant_rejects_unclaimed_target_layer() {
        let source = Topology::new("src").with_layer(LayerSpec::convolution("conv1", 2, 1, 2, 2));
        let target = Topology::new("dst")
            .with_layer(LayerSpec::convolution("conv1", 2, 1, 2, 2))
            .with_layer(LayerSpec::convolution("conv2", 2, 2, 2, 2));
        let mut src = Network::from_topology(&source);
        for w in src.layers_mut()[0].weights.data_mut() {
            *w = 1.0;
        }
        let mut dst = Network::from_topology(&target);
        let err = transplant(
            &src,
            &mut dst,
            &TransplantPolicy::new(),
            &LayerMapping::identity(),
        )
        .unwrap_err();
        assert!(matches!(err, SurgeryError::Configuration(ref msg) if msg.contains("conv2")));
        // planning failed, so conv1 was not written either
        assert!(dst.layer("conv1").unwrap().weights.data().iter().all(|&x| x == 0.0));
    }
}
