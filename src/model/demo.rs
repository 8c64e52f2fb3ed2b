//! VGG-16 style topology pairs and seeded random weights for demos and tests.

use super::{LayerSpec, Network, Topology};
use crate::surgery::{LayerTransform, SubsampleSpec, TransplantPolicy};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Output channels of the 13 VGG-16 convolutions.
const VGG16_CONVS: [(&str, usize); 13] = [
    ("conv1_1", 64),
    ("conv1_2", 64),
    ("conv2_1", 128),
    ("conv2_2", 128),
    ("conv3_1", 256),
    ("conv3_2", 256),
    ("conv3_3", 256),
    ("conv4_1", 512),
    ("conv4_2", 512),
    ("conv4_3", 512),
    ("conv5_1", 512),
    ("conv5_2", 512),
    ("conv5_3", 512),
];
const FC_WIDTH: usize = 4096;
const NUM_CLASSES: usize = 1000;
/// Spatial size of the last pooled feature map (224 / 32).
const POOL5_SIZE: usize = 7;

/// Sizes of a (possibly shrunk) VGG-16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VggDims {
    /// Every convolution width and the fc width are divided by this.
    pub width_divisor: usize,
    pub num_classes: usize,
}

impl VggDims {
    /// Full-size VGG-16 (ImageNet, 1000 classes).
    pub fn full() -> Self {
        Self {
            width_divisor: 1,
            num_classes: NUM_CLASSES,
        }
    }

    /// Small enough to build and transplant in milliseconds.
    pub fn tiny() -> Self {
        Self {
            width_divisor: 32,
            num_classes: 10,
        }
    }

    fn conv_width(&self, full: usize) -> usize {
        (full / self.width_divisor).max(1)
    }

    fn fc_width(&self) -> usize {
        // keep divisible by the fc6/fc7 output stride
        ((FC_WIDTH / self.width_divisor).max(4) / 4) * 4
    }

    fn pool5_channels(&self) -> usize {
        self.conv_width(512)
    }
}

fn conv_stack(dims: VggDims, mut topology: Topology) -> Topology {
    let mut channels = 3;
    for (name, width) in VGG16_CONVS {
        let out = dims.conv_width(width);
        topology = topology.with_layer(LayerSpec::convolution(name, out, channels, 3, 3));
        channels = out;
    }
    topology
}

/// Fully convolutional VGG-16: `fc6` is a 7x7 convolution over pool5, `fc7`
/// and `fc8` are 1x1 convolutions. Same parameters as the dense classifier.
pub fn vgg16_fc_topology(dims: VggDims) -> Topology {
    let fc = dims.fc_width();
    let c5 = dims.pool5_channels();
    conv_stack(dims, Topology::new("VGG_ILSVRC_16_layers_fc"))
        .with_layer(LayerSpec::convolution("fc6", fc, c5, POOL5_SIZE, POOL5_SIZE))
        .with_layer(LayerSpec::convolution("fc7", fc, fc, 1, 1))
        .with_layer(LayerSpec::convolution("fc8", dims.num_classes, fc, 1, 1))
}

/// Classification VGG-16 with dense `fc6`, `fc7`, `fc8`. Transplant it with
/// [`vgg16_dense_policy`].
pub fn vgg16_dense_topology(dims: VggDims) -> Topology {
    let fc = dims.fc_width();
    let c5 = dims.pool5_channels();
    conv_stack(dims, Topology::new("VGG_ILSVRC_16_layers"))
        .with_layer(LayerSpec::inner_product("fc6", fc, c5 * POOL5_SIZE * POOL5_SIZE))
        .with_layer(LayerSpec::inner_product("fc7", fc, fc))
        .with_layer(LayerSpec::inner_product("fc8", dims.num_classes, fc))
}

/// Fully convolutional VGG-16 with 4x thinner `fc6`/`fc7` and a 3x3 `fc6` kernel.
pub fn vgg16_reduced_topology(dims: VggDims) -> Topology {
    let fc = dims.fc_width() / 4;
    let c5 = dims.pool5_channels();
    conv_stack(dims, Topology::new("VGG_ILSVRC_16_layers_fc_reduced"))
        .with_layer(LayerSpec::convolution("fc6", fc, c5, 3, 3))
        .with_layer(LayerSpec::convolution("fc7", fc, fc, 1, 1))
        .with_layer(LayerSpec::convolution("fc8", dims.num_classes, fc, 1, 1))
}

/// [`TransplantPolicy::vgg16_reduced`] with `fc6` read through its pooled 7x7 layout,
/// for sources whose `fc6` is stored dense.
pub fn vgg16_dense_policy(dims: VggDims) -> TransplantPolicy {
    let fc6_view = [dims.fc_width(), dims.pool5_channels(), POOL5_SIZE, POOL5_SIZE];
    TransplantPolicy::vgg16_reduced().with_layer(
        "fc6",
        LayerTransform::subsample(SubsampleSpec::new(4, 1, 3, 3), Some(4)).with_view(fc6_view),
    )
}

/// Network for `topology` with weights drawn from a seeded RNG.
pub fn random_network(topology: &Topology, seed: u64) -> Network {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut network = Network::from_topology(topology);
    for layer in network.layers_mut() {
        for w in layer.weights.data_mut() {
            *w = rng.gen_range(-0.1f32..0.1f32);
        }
        for b in layer.bias.data_mut() {
            *b = rng.gen_range(-0.01f32..0.01f32);
        }
    }
    network
}
