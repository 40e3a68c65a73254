use super::{BatchOptions, Batches};
use crate::error::Error;
use anyhow::Result;
use byteorder::{BigEndian, ReadBytesExt};
use candle_core::Device;
use flate2::read::GzDecoder;
use ndarray::{ArcArray, ArcArray1, ArrayView1, ArrayView4, Ix4};
use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

/// Where the files are downloaded from.
pub const MIRROR: &str = "http://fashion-mnist.s3-website.eu-central-1.amazonaws.com";

/// Image height and width.
pub const IMAGE_SIZE: usize = 28;

/// The names of the classes, indexed by label.
pub const CLASS_NAMES: [&str; 10] = [
    "t-shirt",
    "trouser",
    "pullover",
    "dress",
    "coat",
    "sandal",
    "shirt",
    "sneaker",
    "bag",
    "ankle boot",
];

const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";
const NAMES: [&str; 4] = [TRAIN_IMAGES, TRAIN_LABELS, TEST_IMAGES, TEST_LABELS];

/// Maps labels to class names.
///
/// **Errors**
///
/// A label is 10 or more.
pub fn text_labels(labels: &[u8]) -> Result<Vec<&'static str>, Error> {
    labels
        .iter()
        .map(|label| {
            CLASS_NAMES
                .get(*label as usize)
                .copied()
                .ok_or(Error::Label(*label))
        })
        .collect()
}

/// FashionMnist builder.
pub mod builders {
    use super::{FashionMnist, Result};
    use std::path::{Path, PathBuf};

    /// FashionMnist builder.
    #[derive(Debug, Clone)]
    pub struct FashionMnistBuilder {
        pub(super) path: Option<PathBuf>,
        pub(super) download: bool,
        pub(super) retries: usize,
    }

    impl Default for FashionMnistBuilder {
        fn default() -> Self {
            Self {
                path: None,
                download: false,
                retries: 10,
            }
        }
    }

    impl FashionMnistBuilder {
        /// The folder the files are downloaded to / loaded from.
        ///
        /// If not specified, uses "fashion-mnist" in the OS specific "Downloads" directory or the "Temp" directory.
        pub fn path(self, path: impl AsRef<Path>) -> Self {
            Self {
                path: Some(path.as_ref().to_owned()),
                ..self
            }
        }
        /// Whether to download missing files. Defaults to false.
        pub fn download(self, download: bool) -> Self {
            Self { download, ..self }
        }
        /// Download attempts per file after the first. Defaults to 10.
        pub fn retries(self, retries: usize) -> Self {
            Self { retries, ..self }
        }
        /// Builds the dataset.
        ///
        /// **Errors**
        /// - The download failed.
        /// - The files were not found.
        /// - Decompressing / loading the data failed.
        pub fn build(&self) -> Result<FashionMnist> {
            FashionMnist::build(self)
        }
    }
}
use builders::FashionMnistBuilder;

/// The [Fashion-MNIST](<https://github.com/zalandoresearch/fashion-mnist>) dataset.
///
/// 28 x 28 grayscale images of clothing in 10 classes, 60_000 for training and 10_000 for testing.
#[derive(Clone, Debug)]
pub struct FashionMnist {
    train_images: ArcArray<u8, Ix4>,
    train_labels: ArcArray1<u8>,
    test_images: ArcArray<u8, Ix4>,
    test_labels: ArcArray1<u8>,
}

impl FashionMnist {
    /// Returns a [`FashionMnistBuilder`] used to specify options.
    pub fn builder() -> FashionMnistBuilder {
        FashionMnistBuilder::default()
    }
    fn build(builder: &FashionMnistBuilder) -> Result<Self> {
        let path = builder.path.clone().unwrap_or_else(default_path);
        if builder.download {
            download_missing(&path, builder.retries)?;
        }
        let gz_path = |name: &str| path.join(name).with_extension("gz");
        let train_images = read_images(&gz_path(TRAIN_IMAGES))?;
        let train_labels = read_labels(&gz_path(TRAIN_LABELS))?;
        let test_images = read_images(&gz_path(TEST_IMAGES))?;
        let test_labels = read_labels(&gz_path(TEST_LABELS))?;
        for (images, labels, name) in [
            (&train_images, &train_labels, TRAIN_LABELS),
            (&test_images, &test_labels, TEST_LABELS),
        ] {
            if images.dim().0 != labels.len() {
                return Err(Error::idx(
                    gz_path(name),
                    format!("{} labels for {} images", labels.len(), images.dim().0),
                )
                .into());
            }
        }
        Ok(Self {
            train_images,
            train_labels,
            test_images,
            test_labels,
        })
    }
    /// The training images.
    ///
    /// Shape = \[60_000, 1, 28, 28\].
    pub fn train_images(&self) -> ArrayView4<u8> {
        self.train_images.view()
    }
    /// The training labels, 0 to 9 inclusive.
    pub fn train_labels(&self) -> ArrayView1<u8> {
        self.train_labels.view()
    }
    /// The test images.
    ///
    /// Shape = \[10_000, 1, 28, 28\].
    pub fn test_images(&self) -> ArrayView4<u8> {
        self.test_images.view()
    }
    /// The test labels, 0 to 9 inclusive.
    pub fn test_labels(&self) -> ArrayView1<u8> {
        self.test_labels.view()
    }
    /// Batches of the training set.
    pub fn train_batches(&self, device: &Device, options: BatchOptions) -> Result<Batches> {
        Batches::new(self.train_images(), self.train_labels(), device, options)
    }
    /// Batches of the test set.
    pub fn test_batches(&self, device: &Device, options: BatchOptions) -> Result<Batches> {
        Batches::new(self.test_images(), self.test_labels(), device, options)
    }
}

fn missing_files(path: &Path) -> Vec<&'static str> {
    NAMES
        .into_iter()
        .filter(|name| !path.join(name).with_extension("gz").exists())
        .collect()
}

#[cfg(feature = "download")]
fn download_missing(path: &Path, retries: usize) -> Result<()> {
    let names = missing_files(path);
    if names.is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(path)?;
    for name in names {
        let url = format!("{MIRROR}/{name}.gz");
        download::download(&url, &path.join(name).with_extension("gz"), retries)?;
    }
    Ok(())
}

#[cfg(not(feature = "download"))]
fn download_missing(path: &Path, _retries: usize) -> Result<()> {
    let names = missing_files(path);
    anyhow::ensure!(
        names.is_empty(),
        "{names:?} not found in {path:?}, downloading requires the \"download\" feature!"
    );
    Ok(())
}

#[cfg(feature = "download")]
mod download {
    use crate::error::Error;
    use anyhow::Result;
    use curl::easy::Easy;
    use indicatif::{ProgressBar, ProgressStyle};
    use std::{fs, io::Write, path::Path};

    pub(super) fn download(url: &str, path: &Path, retries: usize) -> Result<()> {
        let mut reason = String::new();
        for _ in 0..=retries {
            match download_once(url, path) {
                Ok(()) => return Ok(()),
                Err(e) => reason = e.to_string(),
            }
        }
        Err(Error::Download {
            url: url.to_string(),
            reason,
        }
        .into())
    }

    fn download_once(url: &str, path: &Path) -> Result<()> {
        let part = path.with_extension("gz.part");
        let mut file = fs::File::create(&part)?;
        let style = ProgressStyle::default_bar()
            .template("{msg} [{bar:40}] {bytes:>10}/{total_bytes:10} [eta: {eta}]")?
            .progress_chars("=> ");
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bar = ProgressBar::new(0).with_style(style).with_message(name);
        let mut easy = Easy::new();
        easy.url(url)?;
        easy.follow_location(true)?;
        easy.fail_on_error(true)?;
        easy.progress(true)?;
        {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| {
                // Returning fewer bytes than received aborts the transfer.
                Ok(file.write_all(data).map_or(0, |()| data.len()))
            })?;
            transfer.progress_function(|total, done, _, _| {
                bar.set_length(total as u64);
                bar.set_position(done as u64);
                true
            })?;
            transfer.perform()?;
        }
        bar.finish();
        file.flush()?;
        fs::rename(&part, path)?;
        Ok(())
    }
}

fn read_header(decoder: &mut impl Read, path: &Path, magic: i32) -> Result<usize> {
    let found = decoder.read_i32::<BigEndian>()?;
    if found != magic {
        return Err(Error::idx(path, format!("magic {found}, expected {magic}")).into());
    }
    let n = decoder.read_i32::<BigEndian>()?;
    usize::try_from(n).map_err(|_| Error::idx(path, format!("negative count {n}")).into())
}

/// Reads at most `len + 1` bytes, never reserving space from an untrusted count.
fn read_data(decoder: impl Read, len: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    decoder.take(len as u64 + 1).read_to_end(&mut data)?;
    Ok(data)
}

fn read_images(path: &Path) -> Result<ArcArray<u8, Ix4>> {
    let mut decoder = GzDecoder::new(File::open(path).map_err(|e| Error::idx(path, e.to_string()))?);
    let n = read_header(&mut decoder, path, 2_051)?;
    for _ in 0..2 {
        let dim = decoder.read_i32::<BigEndian>()?;
        if dim != IMAGE_SIZE as i32 {
            return Err(Error::idx(path, format!("image size {dim}, expected {IMAGE_SIZE}")).into());
        }
    }
    let len = n * IMAGE_SIZE * IMAGE_SIZE;
    let data = read_data(decoder, len)?;
    if data.len() != len {
        return Err(Error::idx(
            path,
            format!("{} bytes for {n} images", data.len()),
        )
        .into());
    }
    Ok(ArcArray::from_shape_vec([n, 1, IMAGE_SIZE, IMAGE_SIZE], data)?)
}

fn read_labels(path: &Path) -> Result<ArcArray1<u8>> {
    let mut decoder = GzDecoder::new(File::open(path).map_err(|e| Error::idx(path, e.to_string()))?);
    let n = read_header(&mut decoder, path, 2_049)?;
    let data = read_data(decoder, n)?;
    if data.len() != n {
        return Err(Error::idx(path, format!("{} bytes for {n} labels", data.len())).into());
    }
    if let Some(label) = data.iter().copied().find(|label| *label as usize >= CLASS_NAMES.len()) {
        return Err(Error::Label(label).into());
    }
    Ok(ArcArray::from_shape_vec(n, data)?)
}

/// The folder used when no path is given.
pub fn default_path() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("fashion-mnist")
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    fn write_idx(path: &Path, magic: i32, dims: &[i32], data: &[u8]) -> Result<()> {
        let mut encoder = GzEncoder::new(File::create(path)?, Compression::default());
        encoder.write_i32::<BigEndian>(magic)?;
        for dim in dims {
            encoder.write_i32::<BigEndian>(*dim)?;
        }
        encoder.write_all(data)?;
        encoder.finish()?;
        Ok(())
    }

    fn write_split(dir: &Path, images: &str, labels: &str, n: usize) -> Result<()> {
        let pixels: Vec<u8> = (0..n * 28 * 28).map(|i| (i % 256) as u8).collect();
        write_idx(
            &dir.join(images).with_extension("gz"),
            2_051,
            &[n as i32, 28, 28],
            &pixels,
        )?;
        let classes: Vec<u8> = (0..n).map(|i| (i % 10) as u8).collect();
        write_idx(
            &dir.join(labels).with_extension("gz"),
            2_049,
            &[n as i32],
            &classes,
        )
    }

    #[test]
    fn loads_idx_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_split(dir.path(), TRAIN_IMAGES, TRAIN_LABELS, 12)?;
        write_split(dir.path(), TEST_IMAGES, TEST_LABELS, 3)?;
        let data = FashionMnist::builder().path(dir.path()).build()?;
        assert_eq!(data.train_images().dim(), (12, 1, 28, 28));
        assert_eq!(data.test_images().dim(), (3, 1, 28, 28));
        assert_eq!(data.train_labels()[11], 1);
        assert_eq!(data.train_images()[[0, 0, 0, 5]], 5);
        let batches = data.test_batches(
            &Device::Cpu,
            BatchOptions {
                batch_size: 2,
                shuffle: false,
                resize: Some(96),
            },
        )?;
        assert_eq!(batches.len(), 2);
        for batch in batches {
            let (x, _) = batch?;
            assert_eq!(&x.dims()[1..], &[1, 96, 96]);
        }
        Ok(())
    }

    #[test]
    fn rejects_bad_magic() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_split(dir.path(), TRAIN_IMAGES, TRAIN_LABELS, 2)?;
        write_split(dir.path(), TEST_IMAGES, TEST_LABELS, 2)?;
        write_idx(
            &dir.path().join(TEST_LABELS).with_extension("gz"),
            2_051,
            &[2],
            &[0, 1],
        )?;
        let error = FashionMnist::builder().path(dir.path()).build().unwrap_err();
        assert!(matches!(error.downcast_ref::<Error>(), Some(Error::Idx { .. })));
        Ok(())
    }

    #[test]
    fn rejects_truncated_images() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("images.gz");
        write_idx(&path, 2_051, &[2, 28, 28], &[0; 28 * 28])?;
        let error = read_images(&path).unwrap_err();
        assert!(matches!(error.downcast_ref::<Error>(), Some(Error::Idx { .. })));
        Ok(())
    }

    #[test]
    fn rejects_oversized_count() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let images = dir.path().join("images.gz");
        write_idx(&images, 2_051, &[i32::MAX, 28, 28], &[0; 28 * 28])?;
        let error = read_images(&images).unwrap_err();
        assert!(matches!(error.downcast_ref::<Error>(), Some(Error::Idx { .. })));
        let labels = dir.path().join("labels.gz");
        write_idx(&labels, 2_049, &[i32::MAX], &[0; 4])?;
        let error = read_labels(&labels).unwrap_err();
        assert!(matches!(error.downcast_ref::<Error>(), Some(Error::Idx { .. })));
        Ok(())
    }

    #[test]
    fn rejects_mismatched_counts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_split(dir.path(), TRAIN_IMAGES, TRAIN_LABELS, 4)?;
        write_split(dir.path(), TEST_IMAGES, TEST_LABELS, 2)?;
        write_idx(
            &dir.path().join(TRAIN_LABELS).with_extension("gz"),
            2_049,
            &[3],
            &[0, 1, 2],
        )?;
        assert!(FashionMnist::builder().path(dir.path()).build().is_err());
        Ok(())
    }

    #[test]
    fn missing_files_without_download() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(missing_files(dir.path()).len(), 4);
        assert!(FashionMnist::builder().path(dir.path()).build().is_err());
    }

    #[test]
    fn text_labels_by_class() {
        assert_eq!(
            text_labels(&[0, 9, 5]).unwrap(),
            ["t-shirt", "ankle boot", "sandal"]
        );
        assert!(matches!(text_labels(&[10]), Err(Error::Label(10))));
    }
}
