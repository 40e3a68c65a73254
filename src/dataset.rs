use crate::learn::neural_network::trainer::TrainConfig;
use anyhow::{ensure, Result};
use candle_core::{Device, Tensor};
use ndarray::{ArrayView1, ArrayView4, Axis};
use rand::seq::SliceRandom;
use rayon::prelude::*;

/// Fashion-MNIST.
pub mod fashion_mnist;

/// How to batch a dataset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BatchOptions {
    /// Samples per batch. The last batch may be smaller.
    pub batch_size: usize,
    /// Visit the samples in a random order.
    pub shuffle: bool,
    /// Resize images to `resize x resize` with nearest neighbour sampling.
    pub resize: Option<usize>,
}

impl BatchOptions {
    /// Options for the training set of `config`.
    pub fn train(config: &TrainConfig) -> Self {
        Self {
            batch_size: config.train_batch_size,
            shuffle: config.shuffle,
            resize: config.resize,
        }
    }
    /// Options for the test set of `config`, never shuffled.
    pub fn test(config: &TrainConfig) -> Self {
        Self {
            batch_size: config.test_batch_size,
            shuffle: false,
            resize: config.resize,
        }
    }
}

/// Iterator over `(images, labels)` batches.
///
/// Images are `[n, c, h, w]` f32 tensors scaled to \[0, 1\], labels are `[n]` u8 tensors.
pub struct Batches<'a> {
    images: ArrayView4<'a, u8>,
    labels: ArrayView1<'a, u8>,
    device: Device,
    indices: Vec<usize>,
    offset: usize,
    options: BatchOptions,
}

impl<'a> Batches<'a> {
    /// Creates batches of `images` and `labels`, with tensors created on `device`.
    ///
    /// **Errors**
    /// - The batch size or the resize is 0.
    /// - The channel, height or width of the images is 0.
    /// - The number of images and labels differ.
    pub fn new(
        images: ArrayView4<'a, u8>,
        labels: ArrayView1<'a, u8>,
        device: &Device,
        options: BatchOptions,
    ) -> Result<Self> {
        ensure!(options.batch_size > 0, "batch_size must be positive!");
        ensure!(options.resize != Some(0), "resize must be positive!");
        let (_, c, h, w) = images.dim();
        ensure!(
            c * h * w > 0,
            "images must not be empty, found [{c}, {h}, {w}]!"
        );
        ensure!(
            images.len_of(Axis(0)) == labels.len(),
            "{} images but {} labels!",
            images.len_of(Axis(0)),
            labels.len()
        );
        let mut indices: Vec<usize> = (0..labels.len()).collect();
        if options.shuffle {
            indices.shuffle(&mut rand::thread_rng());
        }
        Ok(Self {
            images,
            labels,
            device: device.clone(),
            indices,
            offset: 0,
            options,
        })
    }
    fn batch(&self, indices: &[usize]) -> Result<(Tensor, Tensor)> {
        let (_, c, h, w) = self.images.dim();
        let sample_len = c * h * w;
        let images = &self.images;
        let mut data = vec![0f32; indices.len() * sample_len];
        data.par_chunks_mut(sample_len)
            .zip(indices.par_iter())
            .for_each(|(y, i)| {
                for (y, x) in y.iter_mut().zip(images.index_axis(Axis(0), *i).iter()) {
                    *y = *x as f32 / 255.;
                }
            });
        let mut x = Tensor::from_vec(data, (indices.len(), c, h, w), &self.device)?;
        if let Some(size) = self.options.resize {
            if (h, w) != (size, size) {
                x = x.upsample_nearest2d(size, size)?;
            }
        }
        let labels: Vec<u8> = indices.iter().map(|i| self.labels[*i]).collect();
        let t = Tensor::from_vec(labels, indices.len(), &self.device)?;
        Ok((x, t))
    }
}

impl Iterator for Batches<'_> {
    type Item = Result<(Tensor, Tensor)>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.indices.len() {
            return None;
        }
        let end = (self.offset + self.options.batch_size).min(self.indices.len());
        let batch = self.batch(&self.indices[self.offset..end]);
        self.offset = end;
        Some(batch)
    }
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.indices.len() - self.offset;
        let batches = (remaining + self.options.batch_size - 1) / self.options.batch_size;
        (batches, Some(batches))
    }
}

impl ExactSizeIterator for Batches<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, Array1};

    fn fixture(n: usize) -> (Array<u8, ndarray::Ix4>, Array1<u8>) {
        let images = Array::from_shape_fn([n, 1, 2, 2], |(i, _, _, _)| i as u8);
        let labels = Array::from_shape_fn(n, |i| i as u8);
        (images, labels)
    }

    #[test]
    fn covers_every_sample_once() -> Result<()> {
        let (images, labels) = fixture(10);
        let options = BatchOptions {
            batch_size: 4,
            shuffle: true,
            resize: None,
        };
        let batches = Batches::new(images.view(), labels.view(), &Device::Cpu, options)?;
        assert_eq!(batches.len(), 3);
        let mut seen = Vec::new();
        let mut sizes = Vec::new();
        for batch in batches {
            let (x, t) = batch?;
            sizes.push(t.dims1()?);
            let t = t.to_vec1::<u8>()?;
            // every pixel of image i is i / 255
            let x = x.flatten_from(1)?.max(1)?.to_vec1::<f32>()?;
            for (x, t) in x.iter().zip(t.iter()) {
                assert_eq!(*x, *t as f32 / 255.);
            }
            seen.extend(t);
        }
        assert_eq!(sizes, [4, 4, 2]);
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<u8>>());
        Ok(())
    }

    #[test]
    fn in_order_without_shuffle() -> Result<()> {
        let (images, labels) = fixture(5);
        let options = BatchOptions {
            batch_size: 5,
            shuffle: false,
            resize: Some(6),
        };
        let mut batches = Batches::new(images.view(), labels.view(), &Device::Cpu, options)?;
        let (x, t) = batches.next().unwrap()?;
        assert!(batches.next().is_none());
        assert_eq!(x.dims(), &[5, 1, 6, 6]);
        assert_eq!(t.to_vec1::<u8>()?, vec![0, 1, 2, 3, 4]);
        // image i is filled with i / 255 before and after upsampling
        let x = x.flatten_from(1)?;
        let expected: Vec<f32> = (0..5).map(|i| i as f32 / 255.).collect();
        assert_eq!(x.min(1)?.to_vec1::<f32>()?, expected);
        assert_eq!(x.max(1)?.to_vec1::<f32>()?, expected);
        Ok(())
    }

    #[test]
    fn rejects_empty_images() {
        let images = Array::<u8, ndarray::Ix4>::zeros([3, 0, 2, 2]);
        let labels = Array1::<u8>::zeros(3);
        let options = BatchOptions {
            batch_size: 1,
            shuffle: false,
            resize: None,
        };
        assert!(Batches::new(images.view(), labels.view(), &Device::Cpu, options).is_err());
    }

    #[test]
    fn rejects_mismatched_labels() {
        let (images, _) = fixture(3);
        let labels = Array1::<u8>::zeros(2);
        let options = BatchOptions {
            batch_size: 1,
            shuffle: false,
            resize: None,
        };
        assert!(Batches::new(images.view(), labels.view(), &Device::Cpu, options).is_err());
    }

    #[test]
    fn options_from_config() {
        let config = TrainConfig::default();
        let train = BatchOptions::train(&config);
        assert_eq!(train.batch_size, 128);
        assert!(train.shuffle);
        let test = BatchOptions::test(&config);
        assert!(!test.shuffle);
        assert_eq!(test.resize, Some(96));
    }
}
