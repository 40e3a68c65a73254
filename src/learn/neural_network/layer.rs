use crate::error::Error;
use anyhow::Result;
use candle_core::{Module, Tensor, D};
use candle_nn::{Conv2d, Conv2dConfig, Init, Linear, VarBuilder, VarMap};
use std::fmt::{self, Debug};

/// A [`Module`] that can be boxed into a [`Sequential`].
///
/// Implemented for every [`Module`] that is [`Debug`], [`Send`] and [`Sync`].
pub trait Layer: Module + Debug + Send + Sync {}

impl<T: Module + Debug + Send + Sync> Layer for T {}

fn xavier(fan_in: usize, fan_out: usize) -> Init {
    let a = (6. / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform { lo: -a, up: a }
}

/// Passes the input through unchanged.
#[derive(Default, Clone, Copy, Debug)]
pub struct Identity;

impl Module for Identity {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        Ok(xs.clone())
    }
}

/// ReLU activation.
#[derive(Default, Clone, Copy, Debug)]
pub struct Relu;

impl Module for Relu {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        xs.relu()
    }
}

/// Layer builders.
pub mod builders {
    use super::*;

    /// Builder for [`Conv2`].
    #[derive(Debug, Clone)]
    pub struct Conv2Builder<A = Identity> {
        pub(super) inputs: usize,
        pub(super) outputs: usize,
        pub(super) filter: usize,
        pub(super) padding: usize,
        pub(super) strides: usize,
        pub(super) bias: bool,
        pub(super) activation: A,
    }

    impl Default for Conv2Builder {
        fn default() -> Self {
            Self {
                inputs: 0,
                outputs: 0,
                filter: 1,
                padding: 0,
                strides: 1,
                bias: true,
                activation: Identity,
            }
        }
    }

    impl<A> Conv2Builder<A> {
        /// Input channels.
        pub fn inputs(self, inputs: usize) -> Self {
            Self { inputs, ..self }
        }
        /// Output channels.
        pub fn outputs(self, outputs: usize) -> Self {
            Self { outputs, ..self }
        }
        /// Square filter size. Defaults to 1.
        pub fn filter(self, filter: usize) -> Self {
            Self { filter, ..self }
        }
        /// Zero padding on every spatial edge. Defaults to 0.
        pub fn padding(self, padding: usize) -> Self {
            Self { padding, ..self }
        }
        /// Strides. Defaults to 1.
        pub fn strides(self, strides: usize) -> Self {
            Self { strides, ..self }
        }
        /// Whether to add a bias. Defaults to true.
        pub fn bias(self, bias: bool) -> Self {
            Self { bias, ..self }
        }
        /// Applies `activation` to the output.
        pub fn activation<A2>(self, activation: A2) -> Conv2Builder<A2> {
            Conv2Builder {
                inputs: self.inputs,
                outputs: self.outputs,
                filter: self.filter,
                padding: self.padding,
                strides: self.strides,
                bias: self.bias,
                activation,
            }
        }
        /// Builds the layer, creating "weight" and "bias" in `var_builder`.
        ///
        /// The weight is initialized with a uniform distribution of (-a, a) where
        /// a = sqrt(6 / (fan_in + fan_out)). The bias is initialized with 0's.
        ///
        /// **Errors**
        /// - Inputs, outputs, filter or strides are 0.
        /// - The variables could not be created.
        pub fn build(self, var_builder: VarBuilder) -> Result<Conv2<A>> {
            let Self {
                inputs,
                outputs,
                filter,
                padding,
                strides,
                bias,
                activation,
            } = self;
            if inputs == 0 || outputs == 0 {
                return Err(Error::invalid_layer(
                    "Conv2",
                    format!("inputs ({inputs}) and outputs ({outputs}) must be positive"),
                )
                .into());
            }
            if filter == 0 || strides == 0 {
                return Err(Error::invalid_layer(
                    "Conv2",
                    format!("filter ({filter}) and strides ({strides}) must be positive"),
                )
                .into());
            }
            let area = filter * filter;
            let weight = var_builder.get_with_hints(
                (outputs, inputs, filter, filter),
                "weight",
                xavier(inputs * area, outputs * area),
            )?;
            let bias = if bias {
                Some(var_builder.get_with_hints(outputs, "bias", Init::Const(0.))?)
            } else {
                None
            };
            let config = Conv2dConfig {
                padding,
                stride: strides,
                ..Default::default()
            };
            Ok(Conv2 {
                conv: Conv2d::new(weight, bias, config),
                inputs,
                outputs,
                filter,
                activation,
            })
        }
    }

    /// Builder for [`Dense`].
    #[derive(Debug, Clone)]
    pub struct DenseBuilder<A = Identity> {
        pub(super) inputs: usize,
        pub(super) outputs: usize,
        pub(super) activation: A,
    }

    impl Default for DenseBuilder {
        fn default() -> Self {
            Self {
                inputs: 0,
                outputs: 0,
                activation: Identity,
            }
        }
    }

    impl<A> DenseBuilder<A> {
        /// Input features.
        pub fn inputs(self, inputs: usize) -> Self {
            Self { inputs, ..self }
        }
        /// Output features.
        pub fn outputs(self, outputs: usize) -> Self {
            Self { outputs, ..self }
        }
        /// Applies `activation` to the output.
        pub fn activation<A2>(self, activation: A2) -> DenseBuilder<A2> {
            DenseBuilder {
                inputs: self.inputs,
                outputs: self.outputs,
                activation,
            }
        }
        /// Builds the layer, creating "weight" and "bias" in `var_builder`.
        ///
        /// **Errors**
        /// - Inputs or outputs are 0.
        /// - The variables could not be created.
        pub fn build(self, var_builder: VarBuilder) -> Result<Dense<A>> {
            let Self {
                inputs,
                outputs,
                activation,
            } = self;
            if inputs == 0 || outputs == 0 {
                return Err(Error::invalid_layer(
                    "Dense",
                    format!("inputs ({inputs}) and outputs ({outputs}) must be positive"),
                )
                .into());
            }
            let weight =
                var_builder.get_with_hints((outputs, inputs), "weight", xavier(inputs, outputs))?;
            let bias = var_builder.get_with_hints(outputs, "bias", Init::Const(0.))?;
            Ok(Dense {
                linear: Linear::new(weight, Some(bias)),
                inputs,
                outputs,
                activation,
            })
        }
    }

    /// Builder for [`MaxPool2`].
    #[derive(Debug, Clone)]
    pub struct MaxPool2Builder {
        pub(super) size: usize,
        pub(super) strides: Option<usize>,
        pub(super) padding: usize,
    }

    impl Default for MaxPool2Builder {
        fn default() -> Self {
            Self {
                size: 2,
                strides: None,
                padding: 0,
            }
        }
    }

    impl MaxPool2Builder {
        /// Square window size. Defaults to 2.
        pub fn size(self, size: usize) -> Self {
            Self { size, ..self }
        }
        /// Strides. Defaults to the window size.
        pub fn strides(self, strides: usize) -> Self {
            Self {
                strides: Some(strides),
                ..self
            }
        }
        /// Padding on every spatial edge. Defaults to 0.
        pub fn padding(self, padding: usize) -> Self {
            Self { padding, ..self }
        }
        /// Builds the layer.
        ///
        /// **Errors**
        /// - Size or strides are 0.
        /// - Padding is not smaller than the window.
        pub fn build(self) -> Result<MaxPool2> {
            let size = self.size;
            let strides = self.strides.unwrap_or(size);
            let padding = self.padding;
            if size == 0 || strides == 0 {
                return Err(Error::invalid_layer(
                    "MaxPool2",
                    format!("size ({size}) and strides ({strides}) must be positive"),
                )
                .into());
            }
            if padding >= size {
                return Err(Error::invalid_layer(
                    "MaxPool2",
                    format!("padding ({padding}) must be smaller than size ({size})"),
                )
                .into());
            }
            Ok(MaxPool2 {
                size,
                strides,
                padding,
            })
        }
    }
}
use builders::{Conv2Builder, DenseBuilder, MaxPool2Builder};

/// Convolutional layer.
#[derive(Clone)]
pub struct Conv2<A = Identity> {
    conv: Conv2d,
    inputs: usize,
    outputs: usize,
    filter: usize,
    activation: A,
}

impl Conv2 {
    /// Returns a builder.
    pub fn builder() -> Conv2Builder {
        Conv2Builder::default()
    }
}

impl<A> Conv2<A> {
    /// Input channels.
    pub fn inputs(&self) -> usize {
        self.inputs
    }
    /// Output channels.
    pub fn outputs(&self) -> usize {
        self.outputs
    }
}

impl<A: Debug> Debug for Conv2<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let config = self.conv.config();
        let mut builder = f.debug_struct("Conv2");
        builder
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("filter", &[self.filter, self.filter]);
        if config.stride != 1 {
            builder.field("strides", &config.stride);
        }
        if config.padding != 0 {
            builder.field("padding", &config.padding);
        }
        builder.field("activation", &self.activation).finish()
    }
}

impl<A: Module> Module for Conv2<A> {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.activation.forward(&self.conv.forward(xs)?)
    }
}

/// Dense / fully connected layer.
#[derive(Clone)]
pub struct Dense<A = Identity> {
    linear: Linear,
    inputs: usize,
    outputs: usize,
    activation: A,
}

impl Dense {
    /// Returns a builder.
    pub fn builder() -> DenseBuilder {
        DenseBuilder::default()
    }
}

impl<A: Debug> Debug for Dense<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Dense")
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("activation", &self.activation)
            .finish()
    }
}

impl<A: Module> Module for Dense<A> {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.activation.forward(&self.linear.forward(xs)?)
    }
}

/// Max pooling.
///
/// The input is padded by replicating its edges, so a padded cell never holds a value
/// larger than the window's in-bounds cells. This matches padding with -inf.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MaxPool2 {
    size: usize,
    strides: usize,
    padding: usize,
}

impl MaxPool2 {
    /// Returns a builder.
    pub fn builder() -> MaxPool2Builder {
        MaxPool2Builder::default()
    }
}

impl Module for MaxPool2 {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let p = self.padding;
        let xs = if p > 0 {
            xs.pad_with_same(D::Minus2, p, p)?
                .pad_with_same(D::Minus1, p, p)?
        } else {
            xs.clone()
        };
        xs.max_pool2d_with_stride(self.size, self.strides)
    }
}

/// Global average pooling.
///
/// Averages the spatial extent of each channel, `[n, c, h, w] -> [n, c]`.
#[derive(Default, Clone, Copy, Debug)]
pub struct GlobalAvgPool;

impl Module for GlobalAvgPool {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        xs.flatten_from(2)?.mean(D::Minus1)
    }
}

/// Layers applied in order.
#[derive(Default, Debug)]
pub struct Sequential {
    layers: Vec<(String, Box<dyn Layer>)>,
}

impl Sequential {
    /// An empty [`Sequential`].
    pub fn new() -> Self {
        Self::default()
    }
    /// Appends `layer` under `name`.
    pub fn push(mut self, name: impl Into<String>, layer: impl Layer + 'static) -> Self {
        self.layers.push((name.into(), Box::new(layer)));
        self
    }
    /// The number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }
    /// Whether there are no layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
    /// The layer names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|(name, _)| name.as_str())
    }
    /// Runs the layers in order, recording the output shape after each one.
    ///
    /// **Errors**
    ///
    /// A layer failed, typically due to a shape mismatch.
    pub fn forward_shapes(&self, xs: &Tensor) -> Result<Vec<(String, Vec<usize>)>> {
        let mut shapes = Vec::with_capacity(self.layers.len());
        let mut xs = xs.clone();
        for (name, layer) in self.layers.iter() {
            xs = layer.forward(&xs)?;
            shapes.push((name.clone(), xs.dims().to_vec()));
        }
        Ok(shapes)
    }
}

impl Module for Sequential {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut xs = xs.clone();
        for (_, layer) in self.layers.iter() {
            xs = layer.forward(&xs)?;
        }
        Ok(xs)
    }
}

/// The number of trainable scalars in `varmap`.
pub fn parameter_count(varmap: &VarMap) -> usize {
    varmap.all_vars().iter().map(|var| var.elem_count()).sum()
}
