use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    iter::empty,
    time::{Duration, Instant},
};

/// Criterion.
pub mod criterion;
/// Neural networks.
pub mod neural_network;

/// Training / Testing statistics.
#[derive(Default, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// The number of samples.
    pub count: usize,
    /// The sum of the per sample loss.
    pub loss: Option<f32>,
    /// The number of correct predictions.
    pub correct: Option<usize>,
}

impl Stats {
    /// Adds a batch of `count` samples with mean loss `loss` and `correct` hits.
    pub fn push_batch(&mut self, count: usize, loss: Option<f32>, correct: Option<usize>) {
        self.count += count;
        if let Some(loss) = loss {
            *self.loss.get_or_insert(0.) += loss * count as f32;
        }
        if let Some(correct) = correct {
            *self.correct.get_or_insert(0) += correct;
        }
    }
    /// The mean loss.
    pub fn mean_loss(&self) -> Option<f32> {
        let count = self.count.max(1) as f32;
        self.loss.map(|loss| loss / count)
    }
    /// The fraction of correct predictions.
    pub fn accuracy(&self) -> Option<f32> {
        let count = self.count.max(1) as f32;
        self.correct.map(|correct| correct as f32 / count)
    }
}

/// Summary of training.
#[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// The number of completed epochs.
    pub epoch: usize,
    /// The duration of the last epoch.
    pub epoch_time: Duration,
    /// The duration of all epochs.
    pub total_time: Duration,
    /// Stats of the last training pass.
    pub train: Stats,
    /// Stats of the last test pass.
    pub test: Stats,
}

impl Summary {
    /// Runs an epoch with `f`.
    ///
    /// Times `f`. If `f` returns `Ok`, updates the epoch time and accumulates the total time and the epoch. Otherwise returns the error.
    pub fn run_epoch<F>(&mut self, f: F) -> Result<(Stats, Stats)>
    where
        F: FnOnce(&Self) -> Result<(Stats, Stats)>,
    {
        let start = Instant::now();
        let (train, test) = f(self)?;
        self.epoch_time = start.elapsed();
        self.total_time += self.epoch_time;
        self.epoch += 1;
        self.train = train;
        self.test = test;
        Ok((train, test))
    }
    /// Training throughput of the last epoch.
    pub fn examples_per_sec(&self) -> f32 {
        let secs = self.epoch_time.as_secs_f32();
        if secs > 0. {
            self.train.count as f32 / secs
        } else {
            0.
        }
    }
}

/// Summerizes the trainer.
pub trait Summarize {
    /// Returns a summary.
    fn summarize(&self) -> Summary;
}

/// Training.
///
/// [`Train`] is a general purpose trait for trainers that train a model over several epochs.
///
/// # Summary
/// Implement [`Summarize`], as the trainer is expected to compute a summary on each call to [`.train_test()`](Train::train_test()). Use [`Summary::run_epoch()`] to compute the next summary.
pub trait Train<X> {
    /// Trains the model with the training and testing sets.
    ///
    /// Returns (`train_stats`, `test_stats`).
    ///
    /// **Errors**
    /// Returns an error if training / testing could not be performed. The trainer may be modified even when returning an error.
    fn train_test<I1, I2>(&mut self, train_iter: I1, test_iter: I2) -> Result<(Stats, Stats)>
    where
        I1: IntoIterator<Item = X>,
        I2: IntoIterator<Item = X>;
    /// Trains the model with the training set.
    ///
    /// Returns the training stats.
    fn train<I>(&mut self, train_iter: I) -> Result<Stats>
    where
        I: IntoIterator<Item = X>,
    {
        Ok(self.train_test(train_iter, empty())?.0)
    }
}

/// Testing / Evaluation.
///
/// Unlike [`Train::train_test()`], testing does not require mutable (exclusive) access.
pub trait Test<X> {
    /// Tests the model with the test data.
    ///
    /// **Errors**
    /// Returns an error if testing could not be performed.
    fn test<I>(&self, test_iter: I) -> Result<Stats>
    where
        I: IntoIterator<Item = X>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn stats_weighted_by_batch() {
        let mut stats = Stats::default();
        assert_eq!(stats.mean_loss(), None);
        stats.push_batch(3, Some(1.), Some(3));
        stats.push_batch(1, Some(5.), Some(0));
        assert_eq!(stats.count, 4);
        assert_relative_eq!(stats.mean_loss().unwrap(), 2.);
        assert_relative_eq!(stats.accuracy().unwrap(), 0.75);
    }

    #[test]
    fn run_epoch_accumulates() -> Result<()> {
        let mut summary = Summary::default();
        for epoch in 0..2 {
            summary.run_epoch(|summary| {
                assert_eq!(summary.epoch, epoch);
                let mut train = Stats::default();
                train.push_batch(10, Some(0.5), None);
                Ok((train, Stats::default()))
            })?;
        }
        assert_eq!(summary.epoch, 2);
        assert_eq!(summary.train.count, 10);
        assert!(summary.total_time >= summary.epoch_time);
        Ok(())
    }

    #[test]
    fn failed_epoch_is_not_counted() {
        let mut summary = Summary::default();
        assert!(summary
            .run_epoch(|_| anyhow::bail!("out of memory"))
            .is_err());
        assert_eq!(summary.epoch, 0);
    }
}
