//! Integration tests: file-based pipeline, checkpoint round trip, VGG shapes.

use net_surgery::model::{
    load_checkpoint, random_network, save_checkpoint, vgg16_dense_policy, vgg16_dense_topology,
    vgg16_fc_topology, vgg16_reduced_topology, LayerSpec, Topology, VggDims,
};
use net_surgery::{
    surgery, LayerMapping, Network, SubsampleSpec, SurgeryConfig, SurgeryError, TransplantPolicy,
};
use std::path::Path;

const SEED: u64 = 42;

fn write_inputs(dir: &Path, dims: VggDims) -> SurgeryConfig {
    write_inputs_from(dir, &vgg16_fc_topology(dims), dims)
}

/// Writes `source`, the reduced target, and seeded source weights under `dir`.
fn write_inputs_from(dir: &Path, source: &Topology, dims: VggDims) -> SurgeryConfig {
    let target = vgg16_reduced_topology(dims);
    let cfg = SurgeryConfig {
        source_topology: dir.join("fc_deploy.json"),
        source_weights: Some(dir.join("fc.gguf")),
        target_topology: dir.join("fc_reduced_deploy.json"),
        output: dir.join("fc_reduced.gguf"),
        report: Some(dir.join("report.json")),
        policy: TransplantPolicy::vgg16_reduced(),
        mapping: LayerMapping::identity(),
    };
    source.to_file(&cfg.source_topology).unwrap();
    target.to_file(&cfg.target_topology).unwrap();
    save_checkpoint(
        &random_network(source, SEED),
        cfg.source_weights.as_ref().unwrap(),
    )
    .unwrap();
    cfg
}

#[test]
fn pipeline_writes_reduced_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let dims = VggDims::tiny();
    let cfg = write_inputs(dir.path(), dims);

    let report = surgery::run(&cfg).unwrap();
    assert_eq!(report.layers.len(), 16);
    assert!(cfg.report.as_ref().unwrap().exists());

    let source = random_network(&vgg16_fc_topology(dims), SEED);
    let reduced = Network::load(&cfg.target_topology, Some(cfg.output.as_path())).unwrap();

    // convolutions are copied untouched
    for name in ["conv1_1", "conv3_2", "conv5_3"] {
        assert_eq!(reduced.layer(name), source.layer(name));
    }

    // fc8 bias is passed through, fc6/fc7 biases keep every 4th element
    let fc8 = reduced.layer("fc8").unwrap();
    assert_eq!(fc8.bias.data(), source.layer("fc8").unwrap().bias.data());
    for name in ["fc6", "fc7"] {
        let src_bias = source.layer(name).unwrap().bias.data();
        let expected: Vec<f32> = src_bias.iter().step_by(4).copied().collect();
        assert_eq!(reduced.layer(name).unwrap().bias.data(), expected.as_slice());
        assert_eq!(expected.len(), src_bias.len().div_ceil(4));
    }

    // fc6 element (n, c, h, w) comes from source element (4n, c, 3h, 3w) of the 7x7 kernel
    let src_fc6 = &source.layer("fc6").unwrap().weights;
    assert_eq!(src_fc6.rank(), 4);
    let dst_fc6 = &reduced.layer("fc6").unwrap().weights;
    let [n_out, c_out, h_out, w_out] = [
        dst_fc6.shape()[0],
        dst_fc6.shape()[1],
        dst_fc6.shape()[2],
        dst_fc6.shape()[3],
    ];
    let in_cols = src_fc6.len() / src_fc6.shape()[0];
    for n in 0..n_out {
        for c in 0..c_out {
            for h in 0..h_out {
                for w in 0..w_out {
                    let dst_idx = ((n * c_out + c) * h_out + h) * w_out + w;
                    let src_idx = (4 * n) * in_cols + c * 49 + (3 * h) * 7 + 3 * w;
                    assert_eq!(dst_fc6.data()[dst_idx], src_fc6.data()[src_idx]);
                }
            }
        }
    }
}

#[test]
fn saved_target_reloads_bit_exact() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_inputs(dir.path(), VggDims::tiny());
    surgery::run(&cfg).unwrap();

    let reduced = Network::load(&cfg.target_topology, Some(cfg.output.as_path())).unwrap();
    let again = dir.path().join("again.gguf");
    save_checkpoint(&reduced, &again).unwrap();
    assert_eq!(
        std::fs::read(&cfg.output).unwrap(),
        std::fs::read(&again).unwrap()
    );
    let ckpt = load_checkpoint(&again).unwrap();
    assert_eq!(ckpt.network_name(), Some("VGG_ILSVRC_16_layers_fc_reduced"));
}

#[test]
fn default_policy_rejects_dense_fc6_before_saving() {
    let dir = tempfile::tempdir().unwrap();
    let dims = VggDims::tiny();
    let cfg = write_inputs_from(dir.path(), &vgg16_dense_topology(dims), dims);

    let err = surgery::run(&cfg).unwrap_err();
    assert!(
        matches!(err, SurgeryError::ShapeMismatch { ref layer, .. } if layer == "fc6"),
        "unexpected error: {err}"
    );
    assert!(!cfg.output.exists());
}

#[test]
fn dense_source_with_view_matches_conv_source() {
    let dims = VggDims::tiny();
    let conv_dir = tempfile::tempdir().unwrap();
    let conv_cfg = write_inputs(conv_dir.path(), dims);
    surgery::run(&conv_cfg).unwrap();

    let dense_dir = tempfile::tempdir().unwrap();
    let mut dense_cfg = write_inputs_from(dense_dir.path(), &vgg16_dense_topology(dims), dims);
    dense_cfg.policy = vgg16_dense_policy(dims);
    surgery::run(&dense_cfg).unwrap();

    // same seeded values in the same row-major order, so the outputs agree byte for byte
    assert_eq!(
        std::fs::read(&conv_cfg.output).unwrap(),
        std::fs::read(&dense_cfg.output).unwrap()
    );
}

#[test]
fn unmapped_target_layer_fails_before_saving() {
    let dir = tempfile::tempdir().unwrap();
    let dims = VggDims::tiny();
    let cfg = write_inputs(dir.path(), dims);
    let target = vgg16_reduced_topology(dims).with_layer(LayerSpec::convolution("fc9", 4, 4, 1, 1));
    target.to_file(&cfg.target_topology).unwrap();

    let err = surgery::run(&cfg).unwrap_err();
    assert!(
        matches!(err, SurgeryError::Configuration(ref msg) if msg.contains("fc9")),
        "unexpected error: {err}"
    );
    assert!(!cfg.output.exists());
}

#[test]
fn missing_weights_file_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = write_inputs(dir.path(), VggDims::tiny());
    cfg.source_weights = Some(dir.path().join("absent.gguf"));
    assert!(matches!(surgery::run(&cfg), Err(SurgeryError::Io(_))));
}

#[test]
fn vgg_fc6_conv_source_reduces_to_1x1() {
    // [4096, 512, 3, 3] with strides (4, 1, 3, 3) keeps 1024 * 512 * 1 * 1 elements
    let spec = SubsampleSpec::new(4, 1, 3, 3);
    assert_eq!(spec.output_len([4096, 512, 3, 3]), 524_288);

    let source = Topology::new("fc").with_layer(LayerSpec::convolution("fc6", 16, 8, 3, 3));
    let target = Topology::new("reduced").with_layer(LayerSpec::convolution("fc6", 4, 8, 1, 1));
    let src = random_network(&source, SEED);
    let mut dst = Network::from_topology(&target);
    net_surgery::transplant(
        &src,
        &mut dst,
        &TransplantPolicy::vgg16_reduced(),
        &LayerMapping::identity(),
    )
    .unwrap();
    let w = &dst.layer("fc6").unwrap().weights;
    assert_eq!(w.len(), 4 * 8);
    let src_w = src.layer("fc6").unwrap().weights.data();
    assert_eq!(w.data()[0], src_w[0]);
    // n = 1 reads source filter 4, channel 0, top-left tap
    assert_eq!(w.data()[8], src_w[4 * 8 * 9]);
}
