use super::{
    inception::{Inception, InceptionConfig},
    layer::{Conv2, Dense, GlobalAvgPool, MaxPool2, Relu, Sequential},
};
use crate::error::Error;
use anyhow::Result;
use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

/// Output channels of the first two stages.
pub const STEM_CHANNELS: [usize; 2] = [64, 192];

/// Stage 3 blocks, 192 -> 480 channels.
pub const B3: [(&str, InceptionConfig); 2] = [
    ("inception3a", InceptionConfig::new(192, 64, (96, 128), (16, 32), 32)),
    ("inception3b", InceptionConfig::new(256, 128, (128, 192), (32, 96), 64)),
];

/// Stage 4 blocks, 480 -> 832 channels.
pub const B4: [(&str, InceptionConfig); 5] = [
    ("inception4a", InceptionConfig::new(480, 192, (96, 208), (16, 48), 64)),
    ("inception4b", InceptionConfig::new(512, 160, (112, 224), (24, 64), 64)),
    ("inception4c", InceptionConfig::new(512, 128, (128, 256), (24, 64), 64)),
    ("inception4d", InceptionConfig::new(512, 112, (144, 288), (32, 64), 64)),
    ("inception4e", InceptionConfig::new(528, 256, (160, 320), (32, 128), 128)),
];

/// Stage 5 blocks, 832 -> 1024 channels.
pub const B5: [(&str, InceptionConfig); 2] = [
    ("inception5a", InceptionConfig::new(832, 256, (160, 320), (32, 128), 128)),
    ("inception5b", InceptionConfig::new(832, 384, (192, 384), (48, 128), 128)),
];

/// Every Inception block, in order.
pub fn inception_configs() -> impl Iterator<Item = (&'static str, InceptionConfig)> {
    B3.into_iter().chain(B4).chain(B5)
}

/// Checks that each block consumes the channels produced by the one before it.
///
/// Returns the output channels of the last block.
pub fn check_chain<'a>(
    inputs: usize,
    blocks: impl IntoIterator<Item = (&'a str, InceptionConfig)>,
) -> Result<usize, Error> {
    blocks.into_iter().try_fold(inputs, |found, (name, config)| {
        if config.inputs == found {
            Ok(config.outputs())
        } else {
            Err(Error::ChannelMismatch {
                block: name.to_string(),
                expected: config.inputs,
                found,
            })
        }
    })
}

fn pool_3x3_s2() -> Result<MaxPool2> {
    MaxPool2::builder().size(3).strides(2).padding(1).build()
}

fn inception_stage<'a>(
    mut stage: Sequential,
    blocks: impl IntoIterator<Item = (&'a str, InceptionConfig)>,
    var_builder: &VarBuilder,
) -> Result<Sequential> {
    for (name, config) in blocks {
        stage = stage.push(name, Inception::new(config, var_builder.pp(name))?);
    }
    Ok(stage)
}

/// GoogLeNet.
///
/// | stage | layers                                          | channels    |
/// |-------|-------------------------------------------------|-------------|
/// | b1    | 7x7 conv /2, 3x3 max pool /2                    | 64          |
/// | b2    | 1x1 conv, 3x3 conv, 3x3 max pool /2             | 192         |
/// | b3    | inception 3a, 3b, 3x3 max pool /2               | 480         |
/// | b4    | inception 4a .. 4e, 3x3 max pool /2             | 832         |
/// | b5    | inception 5a, 5b, global average pool           | 1024        |
/// | dense | fully connected                                 | classes     |
///
/// With a 96 x 96 input the stages halve the spatial size down to 3 x 3 before pooling.
#[derive(Debug)]
pub struct GoogLeNet {
    net: Sequential,
    inputs: usize,
    classes: usize,
}

impl GoogLeNet {
    /// Creates the network for images with `inputs` channels and `classes` outputs.
    ///
    /// Variables are created under "b1" .. "b5" and "dense" in `var_builder`.
    ///
    /// **Errors**
    /// - `inputs` or `classes` are 0.
    /// - The blocks do not chain (see [`check_chain()`]).
    /// - The variables could not be created.
    pub fn new(var_builder: VarBuilder, inputs: usize, classes: usize) -> Result<Self> {
        let [c1, c2] = STEM_CHANNELS;
        let b3_inputs = check_chain(c2, B3)?;
        let b4_inputs = check_chain(b3_inputs, B4)?;
        let features = check_chain(b4_inputs, B5)?;
        let vb = var_builder.pp("b1");
        let b1 = Sequential::new()
            .push(
                "conv",
                Conv2::builder()
                    .inputs(inputs)
                    .outputs(c1)
                    .filter(7)
                    .strides(2)
                    .padding(3)
                    .activation(Relu)
                    .build(vb.pp("conv"))?,
            )
            .push("pool", pool_3x3_s2()?);
        let vb = var_builder.pp("b2");
        let b2 = Sequential::new()
            .push(
                "conv1",
                Conv2::builder()
                    .inputs(c1)
                    .outputs(c1)
                    .activation(Relu)
                    .build(vb.pp("conv1"))?,
            )
            .push(
                "conv2",
                Conv2::builder()
                    .inputs(c1)
                    .outputs(c2)
                    .filter(3)
                    .padding(1)
                    .activation(Relu)
                    .build(vb.pp("conv2"))?,
            )
            .push("pool", pool_3x3_s2()?);
        let b3 = inception_stage(Sequential::new(), B3, &var_builder.pp("b3"))?
            .push("pool", pool_3x3_s2()?);
        let b4 = inception_stage(Sequential::new(), B4, &var_builder.pp("b4"))?
            .push("pool", pool_3x3_s2()?);
        let b5 = inception_stage(Sequential::new(), B5, &var_builder.pp("b5"))?
            .push("pool", GlobalAvgPool);
        let dense = Dense::builder()
            .inputs(features)
            .outputs(classes)
            .build(var_builder.pp("dense"))?;
        let net = Sequential::new()
            .push("b1", b1)
            .push("b2", b2)
            .push("b3", b3)
            .push("b4", b4)
            .push("b5", b5)
            .push("dense", dense);
        Ok(Self {
            net,
            inputs,
            classes,
        })
    }
    /// Input channels.
    pub fn inputs(&self) -> usize {
        self.inputs
    }
    /// Output classes.
    pub fn classes(&self) -> usize {
        self.classes
    }
    /// Runs the network, returning the output shape of each stage.
    ///
    /// **Errors**
    ///
    /// The input is not `[n, inputs, h, w]` or is too small to survive the strided stages.
    pub fn forward_shapes(&self, xs: &Tensor) -> Result<Vec<(String, Vec<usize>)>> {
        self.net.forward_shapes(xs)
    }
}

impl Module for GoogLeNet {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.net.forward(xs)
    }
}
