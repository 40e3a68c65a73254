use crate::{
    error::Error,
    learn::{
        criterion::{Accuracy, Criterion, CrossEntropyLoss},
        Stats, Summarize, Summary, Test, Train,
    },
};
use anyhow::{ensure, Context, Result};
use candle_core::{Module, Tensor};
use candle_nn::{Optimizer, VarMap, SGD};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Hyperparameters for training.
///
/// Missing fields take their default when deserialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Epochs to train for. Defaults to 10.
    pub epochs: usize,
    /// SGD learning rate. Defaults to 0.1.
    pub learning_rate: f64,
    /// Training batch size. Defaults to 128.
    pub train_batch_size: usize,
    /// Test batch size. Defaults to 256.
    pub test_batch_size: usize,
    /// Images are resized to `resize x resize`. Defaults to 96.
    pub resize: Option<usize>,
    /// Shuffle the training set each epoch. Defaults to true.
    pub shuffle: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            learning_rate: 0.1,
            train_batch_size: 128,
            test_batch_size: 256,
            resize: Some(96),
            shuffle: true,
        }
    }
}

impl TrainConfig {
    /// Loads a config from a json file.
    ///
    /// **Errors**
    /// - The file could not be read or parsed.
    /// - The config is invalid, see [`.validate()`](Self::validate()).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
        let config: Self =
            serde_json::from_str(&json).with_context(|| format!("parsing {path:?}"))?;
        config.validate()?;
        Ok(config)
    }
    /// Checks that the learning rate is positive and the batch sizes are non zero.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.learning_rate > 0. && self.learning_rate.is_finite(),
            "learning_rate must be positive, found {}!",
            self.learning_rate
        );
        ensure!(
            self.train_batch_size > 0 && self.test_batch_size > 0,
            "batch sizes must be positive!"
        );
        ensure!(self.resize != Some(0), "resize must be positive!");
        Ok(())
    }
}

/// Summaries of each epoch.
#[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// One summary per epoch, in order.
    pub epochs: Vec<Summary>,
}

impl History {
    /// Appends a summary.
    pub fn push(&mut self, summary: Summary) {
        self.epochs.push(summary);
    }
    /// The last summary.
    pub fn last(&self) -> Option<&Summary> {
        self.epochs.last()
    }
    /// Writes the history as json.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing {path:?}"))?;
        Ok(())
    }
}

/// Trains a classifier with minibatch SGD and cross entropy loss.
///
/// The model's variables must live in the [`VarMap`] passed to [`ClassificationTrainer::new()`].
pub struct ClassificationTrainer<M> {
    model: M,
    varmap: VarMap,
    optimizer: SGD,
    summary: Summary,
}

impl<M: Module> ClassificationTrainer<M> {
    /// Creates a new trainer.
    ///
    /// **Errors**
    ///
    /// The learning rate is not positive.
    pub fn new(model: M, varmap: VarMap, learning_rate: f64) -> Result<Self> {
        ensure!(
            learning_rate > 0. && learning_rate.is_finite(),
            "learning_rate must be positive, found {learning_rate}!"
        );
        let optimizer = SGD::new(varmap.all_vars(), learning_rate)?;
        Ok(Self {
            model,
            varmap,
            optimizer,
            summary: Summary::default(),
        })
    }
    /// The model.
    pub fn model(&self) -> &M {
        &self.model
    }
    /// The variables of the model.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }
    /// The learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }
    /// Sets the learning rate.
    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.optimizer.set_learning_rate(learning_rate);
    }
    /// Saves the variables as safetensors.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }
    /// Loads variables saved with [`.save()`](Self::save()) into the model.
    ///
    /// **Errors**
    ///
    /// The file could not be read, or a variable is missing or has a different shape.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.varmap
            .load(path)
            .with_context(|| format!("loading {path:?}"))?;
        Ok(())
    }
    /// Trains until `epochs` epochs have completed.
    ///
    /// `train` and `test` are called each epoch for fresh batch iterators. After each
    /// epoch `callback` receives the trainer and the summary, and returns whether to
    /// continue.
    ///
    /// **Errors**
    /// - Creating or reading batches failed.
    /// - The loss is not finite ([`Error::Diverged`]).
    /// - The callback returned an error.
    pub fn fit<I1, I2, F1, F2, C>(
        &mut self,
        epochs: usize,
        mut train: F1,
        mut test: F2,
        mut callback: C,
    ) -> Result<History>
    where
        I1: IntoIterator<Item = Result<(Tensor, Tensor)>>,
        I2: IntoIterator<Item = Result<(Tensor, Tensor)>>,
        F1: FnMut() -> Result<I1>,
        F2: FnMut() -> Result<I2>,
        C: FnMut(&Self, &Summary) -> Result<bool>,
    {
        let mut history = History::default();
        while self.summary.epoch < epochs {
            self.train_test(train()?, test()?)?;
            let summary = self.summarize();
            history.push(summary.clone());
            if !callback(&*self, &summary)? {
                break;
            }
        }
        Ok(history)
    }
}

fn test_stats<M, I>(model: &M, test_iter: I) -> Result<Stats>
where
    M: Module,
    I: IntoIterator<Item = Result<(Tensor, Tensor)>>,
{
    let mut stats = Stats::default();
    for batch in test_iter {
        let (x, t) = batch?;
        let y = model.forward(&x)?;
        let loss = CrossEntropyLoss.eval(&y, &t)?.to_scalar::<f32>()?;
        let correct = Accuracy.eval(&y, &t)?;
        stats.push_batch(t.dims1()?, Some(loss), Some(correct));
    }
    Ok(stats)
}

impl<M: Module> Train<Result<(Tensor, Tensor)>> for ClassificationTrainer<M> {
    fn train_test<I1, I2>(&mut self, train_iter: I1, test_iter: I2) -> Result<(Stats, Stats)>
    where
        I1: IntoIterator<Item = Result<(Tensor, Tensor)>>,
        I2: IntoIterator<Item = Result<(Tensor, Tensor)>>,
    {
        let Self {
            model,
            optimizer,
            summary,
            ..
        } = self;
        summary.run_epoch(|summary| {
            let epoch = summary.epoch + 1;
            let mut train = Stats::default();
            for batch in train_iter {
                let (x, t) = batch?;
                let y = model.forward(&x)?;
                let loss = CrossEntropyLoss.eval(&y, &t)?;
                let loss_value = loss.to_scalar::<f32>()?;
                if !loss_value.is_finite() {
                    return Err(Error::Diverged {
                        epoch,
                        loss: loss_value,
                    }
                    .into());
                }
                optimizer.backward_step(&loss)?;
                let correct = Accuracy.eval(&y, &t)?;
                train.push_batch(t.dims1()?, Some(loss_value), Some(correct));
            }
            let test = test_stats(&*model, test_iter)?;
            Ok((train, test))
        })
    }
}

impl<M: Module> Test<Result<(Tensor, Tensor)>> for ClassificationTrainer<M> {
    fn test<I>(&self, test_iter: I) -> Result<Stats>
    where
        I: IntoIterator<Item = Result<(Tensor, Tensor)>>,
    {
        test_stats(&self.model, test_iter)
    }
}

impl<M> Summarize for ClassificationTrainer<M> {
    fn summarize(&self) -> Summary {
        self.summary.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learn::neural_network::layer::Dense;
    use candle_core::{DType, Device};
    use candle_nn::VarBuilder;
    use std::iter::once;

    fn separable(device: &Device) -> Result<(Tensor, Tensor)> {
        let x = Tensor::new(
            &[[-1f32, -1.], [-1., -0.5], [-0.5, -1.], [1., 1.], [0.5, 1.], [1., 0.5]],
            device,
        )?;
        let t = Tensor::new(&[0u8, 0, 0, 1, 1, 1], device)?;
        Ok((x, t))
    }

    fn dense_trainer(learning_rate: f64) -> Result<ClassificationTrainer<impl Module>> {
        let varmap = VarMap::new();
        let var_builder = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = Dense::builder().inputs(2).outputs(2).build(var_builder)?;
        ClassificationTrainer::new(model, varmap, learning_rate)
    }

    #[test]
    fn fit_lowers_loss() -> Result<()> {
        let device = Device::Cpu;
        let data = separable(&device)?;
        let mut trainer = dense_trainer(0.5)?;
        let history = trainer.fit(
            100,
            || Ok(once(Ok(data.clone()))),
            || Ok(once(Ok(data.clone()))),
            |_, _| Ok(true),
        )?;
        assert_eq!(history.epochs.len(), 100);
        let first = history.epochs[0].train.mean_loss().unwrap();
        let last = history.last().unwrap();
        assert!(last.train.mean_loss().unwrap() < first);
        assert_eq!(last.test.accuracy(), Some(1.));
        assert_eq!(last.train.count, 6);
        assert_eq!(trainer.test(once(Ok(data)))?.correct, Some(6));
        Ok(())
    }

    #[test]
    fn callback_stops_early() -> Result<()> {
        let data = separable(&Device::Cpu)?;
        let mut trainer = dense_trainer(0.1)?;
        let history = trainer.fit(
            10,
            || Ok(once(Ok(data.clone()))),
            || Ok(std::iter::empty()),
            |_, summary| Ok(summary.epoch < 3),
        )?;
        assert_eq!(history.epochs.len(), 3);
        assert_eq!(trainer.summarize().epoch, 3);
        assert_eq!(trainer.summarize().test.count, 0);
        Ok(())
    }

    #[test]
    fn nan_loss_diverges() -> Result<()> {
        let data = separable(&Device::Cpu)?;
        let model = |xs: &Tensor| xs.affine(f64::NAN, 0.);
        let mut trainer = ClassificationTrainer::new(model, VarMap::new(), 0.1)?;
        let error = trainer.train(once(Ok(data))).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::Diverged { epoch: 1, .. })
        ));
        assert_eq!(trainer.summarize().epoch, 0);
        Ok(())
    }

    #[test]
    fn save_then_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("weights.safetensors");
        let (x, _) = separable(&Device::Cpu)?;
        let trainer = dense_trainer(0.1)?;
        trainer.save(&path)?;
        let expected = trainer.model().forward(&x)?.to_vec2::<f32>()?;
        let mut loaded = dense_trainer(0.1)?;
        assert_ne!(loaded.model().forward(&x)?.to_vec2::<f32>()?, expected);
        loaded.load(&path)?;
        assert_eq!(loaded.model().forward(&x)?.to_vec2::<f32>()?, expected);
        assert!(loaded.load(dir.path().join("missing.safetensors")).is_err());
        Ok(())
    }

    #[test]
    fn zero_learning_rate_freezes_weights() -> Result<()> {
        let data = separable(&Device::Cpu)?;
        let mut trainer = dense_trainer(0.5)?;
        trainer.set_learning_rate(0.);
        assert_eq!(trainer.learning_rate(), 0.);
        let before = trainer.model().forward(&data.0)?.to_vec2::<f32>()?;
        trainer.train(once(Ok(data.clone())))?;
        let after = trainer.model().forward(&data.0)?.to_vec2::<f32>()?;
        assert_eq!(before, after);
        trainer.set_learning_rate(0.5);
        trainer.train(once(Ok(data.clone())))?;
        assert_ne!(trainer.model().forward(&data.0)?.to_vec2::<f32>()?, after);
        Ok(())
    }

    #[test]
    fn rejects_bad_learning_rate() {
        assert!(dense_trainer(0.).is_err());
        assert!(dense_trainer(f64::NAN).is_err());
    }

    #[test]
    fn config_defaults() -> Result<()> {
        let config: TrainConfig = serde_json::from_str(r#"{ "epochs": 2, "resize": null }"#)?;
        assert_eq!(config.epochs, 2);
        assert_eq!(config.resize, None);
        assert_eq!(config.learning_rate, 0.1);
        assert_eq!(config.train_batch_size, 128);
        config.validate()?;
        let bad = TrainConfig {
            train_batch_size: 0,
            ..TrainConfig::default()
        };
        assert!(bad.validate().is_err());
        Ok(())
    }

    #[test]
    fn config_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "learning_rate": 0.05 }"#)?;
        let config = TrainConfig::from_json_file(&path)?;
        assert_eq!(config.learning_rate, 0.05);
        fs::write(&path, r#"{ "learning_rate": -1 }"#)?;
        assert!(TrainConfig::from_json_file(&path).is_err());
        Ok(())
    }

    #[test]
    fn history_json() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("history.json");
        let mut history = History::default();
        history.push(Summary {
            epoch: 1,
            ..Summary::default()
        });
        history.save_json(&path)?;
        let loaded: History = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(loaded, history);
        Ok(())
    }
}
