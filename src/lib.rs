/*!
# GoogLeNet
[GoogLeNet](<https://arxiv.org/abs/1409.4842>) (Inception v1) for Fashion-MNIST.

The network is built from [candle](<https://github.com/huggingface/candle>) primitives. An
[`Inception`](learn::neural_network::inception::Inception) block runs four branches over the
same input, each with a different receptive field, and concatenates their outputs along the
channel axis. Five stages of convolutions, Inception blocks and pooling are followed by global
average pooling and a dense classifier.

```no_run
# use googlenet::{Result, learn::neural_network::googlenet::GoogLeNet};
# use candle_core::{DType, Device, Tensor};
# use candle_nn::{VarBuilder, VarMap};
# fn main() -> Result<()> {
let device = Device::Cpu;
let varmap = VarMap::new();
let var_builder = VarBuilder::from_varmap(&varmap, DType::F32, &device);
let model = GoogLeNet::new(var_builder, 1, 10)?;
let x = Tensor::rand(0f32, 1f32, (1, 1, 96, 96), &device)?;
for (name, shape) in model.forward_shapes(&x)? {
    println!("{name} output shape:\t{shape:?}");
}
# Ok(())
# }
```
*/
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Datasets.
pub mod dataset;
/// Devices.
pub mod device;
/// Errors.
pub mod error;
/// Machine learning.
pub mod learn;

pub use anyhow::Result;
pub use error::Error;

#[doc(hidden)]
pub use candle_core;
#[doc(hidden)]
pub use candle_nn;
