use super::layer::{Conv2, MaxPool2, Relu};
use crate::error::Error;
use anyhow::Result;
use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Channels of an [`Inception`] block.
///
/// Branches 2 and 3 are (reduce, output) pairs: a 1x1 convolution to `reduce` channels
/// followed by a 3x3 (branch 2) or 5x5 (branch 3) convolution to `output` channels.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InceptionConfig {
    /// Input channels.
    pub inputs: usize,
    /// 1x1 convolution.
    pub c1: usize,
    /// 1x1 reduce, 3x3 convolution.
    pub c2: (usize, usize),
    /// 1x1 reduce, 5x5 convolution.
    pub c3: (usize, usize),
    /// 3x3 max pool, 1x1 projection.
    pub c4: usize,
}

impl InceptionConfig {
    /// Creates a new [`InceptionConfig`].
    pub const fn new(
        inputs: usize,
        c1: usize,
        c2: (usize, usize),
        c3: (usize, usize),
        c4: usize,
    ) -> Self {
        Self {
            inputs,
            c1,
            c2,
            c3,
            c4,
        }
    }
    /// The output channels of each branch, in concatenation order.
    pub const fn branch_outputs(&self) -> [usize; 4] {
        [self.c1, self.c2.1, self.c3.1, self.c4]
    }
    /// The output channels, the sum of the branch outputs.
    pub const fn outputs(&self) -> usize {
        self.c1 + self.c2.1 + self.c3.1 + self.c4
    }
    fn validate(&self) -> Result<(), Error> {
        let Self {
            inputs,
            c1,
            c2,
            c3,
            c4,
        } = *self;
        if [inputs, c1, c2.0, c2.1, c3.0, c3.1, c4].contains(&0) {
            return Err(Error::invalid_layer(
                "Inception",
                format!("channels must be positive, found {self}"),
            ));
        }
        Ok(())
    }
}

impl Display for InceptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [c1, c2, c3, c4] = self.branch_outputs();
        write!(
            f,
            "{} -> {c1} + {c2} + {c3} + {c4} = {}",
            self.inputs,
            self.outputs()
        )
    }
}

/// Inception block.
///
/// Four branches see the same input:
/// 1. 1x1 convolution
/// 2. 1x1 convolution, 3x3 convolution
/// 3. 1x1 convolution, 5x5 convolution
/// 4. 3x3 max pool, 1x1 convolution
///
/// Each convolution is followed by a ReLU. Padding keeps the spatial size, so the
/// branch outputs are concatenated along the channel axis.
#[derive(Debug)]
pub struct Inception {
    config: InceptionConfig,
    p1_1: Conv2<Relu>,
    p2_1: Conv2<Relu>,
    p2_2: Conv2<Relu>,
    p3_1: Conv2<Relu>,
    p3_2: Conv2<Relu>,
    p4_1: MaxPool2,
    p4_2: Conv2<Relu>,
}

impl Inception {
    /// Creates the block, with variables in `var_builder`.
    ///
    /// **Errors**
    /// - Any channel count is 0.
    /// - The variables could not be created.
    pub fn new(config: InceptionConfig, var_builder: VarBuilder) -> Result<Self> {
        config.validate()?;
        let InceptionConfig {
            inputs,
            c1,
            c2,
            c3,
            c4,
        } = config;
        let conv = |inputs, outputs, filter, padding, name: &str| {
            Conv2::builder()
                .inputs(inputs)
                .outputs(outputs)
                .filter(filter)
                .padding(padding)
                .activation(Relu)
                .build(var_builder.pp(name))
        };
        Ok(Self {
            config,
            p1_1: conv(inputs, c1, 1, 0, "p1_1")?,
            p2_1: conv(inputs, c2.0, 1, 0, "p2_1")?,
            p2_2: conv(c2.0, c2.1, 3, 1, "p2_2")?,
            p3_1: conv(inputs, c3.0, 1, 0, "p3_1")?,
            p3_2: conv(c3.0, c3.1, 5, 2, "p3_2")?,
            p4_1: MaxPool2::builder().size(3).strides(1).padding(1).build()?,
            p4_2: conv(inputs, c4, 1, 0, "p4_2")?,
        })
    }
    /// The config.
    pub fn config(&self) -> &InceptionConfig {
        &self.config
    }
}

impl Module for Inception {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let p1 = self.p1_1.forward(xs)?;
        let p2 = self.p2_2.forward(&self.p2_1.forward(xs)?)?;
        let p3 = self.p3_2.forward(&self.p3_1.forward(xs)?)?;
        let p4 = self.p4_2.forward(&self.p4_1.forward(xs)?)?;
        Tensor::cat(&[p1, p2, p3, p4], 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn outputs_sum_branches() {
        let config = InceptionConfig::new(192, 64, (96, 128), (16, 32), 32);
        assert_eq!(config.branch_outputs(), [64, 128, 32, 32]);
        assert_eq!(config.outputs(), 256);
        assert_eq!(config.to_string(), "192 -> 64 + 128 + 32 + 32 = 256");
    }

    #[test]
    fn forward_concatenates_channels() -> Result<()> {
        let varmap = VarMap::new();
        let var_builder = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = InceptionConfig::new(8, 4, (3, 6), (2, 5), 7);
        let inception = Inception::new(config, var_builder)?;
        let x = Tensor::rand(0f32, 1f32, (2, 8, 7, 7), &Device::Cpu)?;
        let y = inception.forward(&x)?;
        assert_eq!(y.dims(), &[2, 22, 7, 7]);
        // ReLU on every branch.
        let min = y.flatten_all()?.min(0)?.to_scalar::<f32>()?;
        assert!(min >= 0.);
        Ok(())
    }

    #[test]
    fn rejects_zero_channels() {
        let varmap = VarMap::new();
        let var_builder = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = InceptionConfig::new(8, 4, (0, 6), (2, 5), 7);
        let error = Inception::new(config, var_builder).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::InvalidLayer {
                layer: "Inception",
                ..
            })
        ));
    }

    #[test]
    fn variables_are_named_per_branch() -> Result<()> {
        let varmap = VarMap::new();
        let var_builder = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Inception::new(
            InceptionConfig::new(4, 1, (1, 1), (1, 1), 1),
            var_builder.pp("block"),
        )?;
        let data = varmap.data().lock().unwrap();
        let mut names: Vec<_> = data.keys().cloned().collect();
        names.sort();
        assert_eq!(names.len(), 12);
        assert!(names.contains(&"block.p3_2.weight".to_string()));
        assert_eq!(data["block.p3_2.weight"].dims(), &[1, 1, 5, 5]);
        Ok(())
    }
}
