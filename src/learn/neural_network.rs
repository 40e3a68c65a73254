/*!
# Example
Build [GoogLeNet](googlenet::GoogLeNet) and train it with a [`ClassificationTrainer`](trainer::ClassificationTrainer):
```no_run
# use googlenet::{
#     Result,
#     dataset::{BatchOptions, fashion_mnist::FashionMnist},
#     learn::neural_network::{googlenet::GoogLeNet, trainer::{ClassificationTrainer, TrainConfig}},
# };
# use candle_core::{DType, Device};
# use candle_nn::{VarBuilder, VarMap};
# fn main() -> Result<()> {
let device = Device::Cpu;
let config = TrainConfig::default();
let varmap = VarMap::new();
let model = GoogLeNet::new(VarBuilder::from_varmap(&varmap, DType::F32, &device), 1, 10)?;
let mut trainer = ClassificationTrainer::new(model, varmap, config.learning_rate)?;
let data = FashionMnist::builder().download(true).build()?;
trainer.fit(
    config.epochs,
    || data.train_batches(&device, BatchOptions::train(&config)),
    || data.test_batches(&device, BatchOptions::test(&config)),
    |_trainer, summary| {
        println!("{summary:?}");
        Ok(true)
    },
)?;
# Ok(())
# }
```
*/

/// GoogLeNet.
pub mod googlenet;
/// Inception block.
pub mod inception;
/// Layers.
pub mod layer;
/// Trainer.
pub mod trainer;
