use anyhow::Result;
use candle_core::{DType, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::{Args, Parser, Subcommand};
use googlenet::{
    dataset::{
        fashion_mnist::{self, FashionMnist, CLASS_NAMES},
        BatchOptions,
    },
    device::DeviceKind,
    learn::neural_network::{
        googlenet::{inception_configs, GoogLeNet},
        layer::parameter_count,
        trainer::{ClassificationTrainer, TrainConfig},
    },
};
use indicatif::{ProgressBar, ProgressFinish, ProgressIterator, ProgressStyle};
use num_format::{Locale, ToFormattedString};
use std::path::PathBuf;

#[cfg(feature = "plot")]
mod plot;

#[derive(Parser)]
#[command(name = "googlenet", version, about = "GoogLeNet (Inception v1) on Fashion-MNIST.")]
struct Cli {
    /// cpu, cuda[:N] or metal[:N].
    #[arg(long, env = "GOOGLENET_DEVICE", default_value = "cpu")]
    device: DeviceKind,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Prints the branch channels of every Inception block.
    Channels,
    /// Prints the output shape of each stage for a random single channel image.
    Shapes {
        /// Height and width of the image.
        #[arg(long, default_value_t = 96)]
        size: usize,
    },
    /// Trains on Fashion-MNIST.
    Train(TrainArgs),
}

#[derive(Args)]
struct TrainArgs {
    /// Json file with a training config. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Epochs to train for.
    #[arg(long)]
    epochs: Option<usize>,
    /// SGD learning rate.
    #[arg(long)]
    lr: Option<f64>,
    /// Training batch size.
    #[arg(long)]
    batch_size: Option<usize>,
    /// Resize images to SIZE x SIZE.
    #[arg(long, value_name = "SIZE")]
    resize: Option<usize>,
    /// Keep images at 28 x 28.
    #[arg(long, conflicts_with = "resize")]
    no_resize: bool,
    /// Folder with the dataset files.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Fail instead of downloading missing files.
    #[arg(long)]
    no_download: bool,
    /// Load weights (safetensors) before training.
    #[arg(long)]
    resume: Option<PathBuf>,
    /// Save the weights (safetensors) after training.
    #[arg(long)]
    save: Option<PathBuf>,
    /// Write the per epoch summaries as json.
    #[arg(long)]
    history: Option<PathBuf>,
    /// Plot loss and accuracy to a png.
    #[cfg(feature = "plot")]
    #[arg(long)]
    plot: Option<PathBuf>,
}

impl TrainArgs {
    fn config(&self) -> Result<TrainConfig> {
        let mut config = match self.config.as_ref() {
            Some(path) => TrainConfig::from_json_file(path)?,
            None => TrainConfig::default(),
        };
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(lr) = self.lr {
            config.learning_rate = lr;
        }
        if let Some(batch_size) = self.batch_size {
            config.train_batch_size = batch_size;
        }
        if self.resize.is_some() {
            config.resize = self.resize;
        }
        if self.no_resize {
            config.resize = None;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Channels => channels(),
        Command::Shapes { size } => shapes(cli.device, size),
        Command::Train(args) => train(cli.device, &args),
    }
}

fn channels() -> Result<()> {
    for (name, config) in inception_configs() {
        println!("{name}: {config}");
    }
    Ok(())
}

fn shapes(device_kind: DeviceKind, size: usize) -> Result<()> {
    let device = device_kind.device()?;
    let varmap = VarMap::new();
    let model = GoogLeNet::new(
        VarBuilder::from_varmap(&varmap, DType::F32, &device),
        1,
        CLASS_NAMES.len(),
    )?;
    let x = Tensor::rand(0f32, 1f32, (1, 1, size, size), &device)?;
    for (name, shape) in model.forward_shapes(&x)? {
        println!("{name} output shape:\t{shape:?}");
    }
    println!(
        "{} trainable parameters.",
        parameter_count(&varmap).to_formatted_string(&Locale::en)
    );
    Ok(())
}

fn train(device_kind: DeviceKind, args: &TrainArgs) -> Result<()> {
    let config = args.config()?;
    println!("{config:#?}");
    let device = device_kind.device()?;
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(fashion_mnist::default_path);
    println!("Loading Fashion-MNIST from {data_dir:?}.");
    let data = FashionMnist::builder()
        .path(&data_dir)
        .download(!args.no_download)
        .build()?;
    let varmap = VarMap::new();
    let model = GoogLeNet::new(
        VarBuilder::from_varmap(&varmap, DType::F32, &device),
        1,
        CLASS_NAMES.len(),
    )?;
    println!(
        "{} trainable parameters.",
        parameter_count(&varmap).to_formatted_string(&Locale::en)
    );
    let mut trainer = ClassificationTrainer::new(model, varmap, config.learning_rate)?;
    if let Some(path) = args.resume.as_ref() {
        trainer.load(path)?;
        println!("Loaded weights from {path:?}.");
    }
    let train_options = BatchOptions::train(&config);
    let test_options = BatchOptions::test(&config);
    let style = ProgressStyle::default_bar()
        .template("{msg} [{bar:40}] {pos:>5}/{len:5} [eta: {eta}]")?
        .progress_chars("=> ");
    let history = trainer.fit(
        config.epochs,
        || {
            let batches = data.train_batches(&device, train_options)?;
            let bar = ProgressBar::new(batches.len() as u64)
                .with_style(style.clone())
                .with_message("train")
                .with_finish(ProgressFinish::AndClear);
            Ok(batches.progress_with(bar))
        },
        || data.test_batches(&device, test_options),
        |_trainer, summary| {
            println!(
                "epoch {}: loss {:.3}, train acc {:.3}, test acc {:.3}, elapsed {:.2?}",
                summary.epoch,
                summary.train.mean_loss().unwrap_or(f32::NAN),
                summary.train.accuracy().unwrap_or(f32::NAN),
                summary.test.accuracy().unwrap_or(f32::NAN),
                summary.epoch_time,
            );
            Ok(true)
        },
    )?;
    if let Some(last) = history.last() {
        println!(
            "{:.1} examples/sec on {device_kind}",
            last.examples_per_sec()
        );
    }
    if let Some(path) = args.history.as_ref() {
        history.save_json(path)?;
        println!("History saved to {path:?}.");
    }
    if let Some(path) = args.save.as_ref() {
        trainer.save(path)?;
        println!("Weights saved to {path:?}.");
    }
    #[cfg(feature = "plot")]
    if let Some(path) = args.plot.as_ref() {
        plot::plot(path, &history)?;
        println!("Plot saved to {path:?}.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() -> Result<()> {
        let cli = Cli::try_parse_from([
            "googlenet",
            "--device",
            "cpu",
            "train",
            "--epochs",
            "3",
            "--lr",
            "0.05",
            "--no-resize",
        ])?;
        let Command::Train(args) = cli.command else {
            panic!("expected train");
        };
        let config = args.config()?;
        assert_eq!(config.epochs, 3);
        assert_eq!(config.learning_rate, 0.05);
        assert_eq!(config.resize, None);
        assert_eq!(config.train_batch_size, 128);
        Ok(())
    }

    #[test]
    fn rejects_bad_device() {
        assert!(Cli::try_parse_from(["googlenet", "--device", "tpu", "channels"]).is_err());
    }
}
