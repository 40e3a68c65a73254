use std::path::PathBuf;

/// Errors raised by this crate.
///
/// Framework failures (shape mismatches in a kernel, out of memory) surface as
/// [`candle_core::Error`] wrapped in [`anyhow::Error`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A layer was configured with an invalid hyperparameter.
    #[error("invalid {layer}: {reason}")]
    InvalidLayer {
        /// The layer kind.
        layer: &'static str,
        /// What was wrong.
        reason: String,
    },
    /// Consecutive blocks do not agree on the channel count.
    #[error("{block} expects {expected} input channels, previous block outputs {found}")]
    ChannelMismatch {
        /// The block that received the wrong channels.
        block: String,
        /// The channels it was configured with.
        expected: usize,
        /// The channels produced upstream.
        found: usize,
    },
    /// An IDX file is malformed.
    #[error("{path:?}: {reason}")]
    Idx {
        /// The offending file.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },
    /// A label is outside of the known classes.
    #[error("label {0} is out of range")]
    Label(u8),
    /// A download failed after all retries.
    #[error("downloading {url} failed: {reason}")]
    Download {
        /// The url.
        url: String,
        /// The last failure.
        reason: String,
    },
    /// The loss became NaN or infinite.
    #[error("training diverged at epoch {epoch} (loss = {loss})")]
    Diverged {
        /// The epoch, starting at 1.
        epoch: usize,
        /// The offending loss.
        loss: f32,
    },
}

impl Error {
    pub(crate) fn invalid_layer(layer: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidLayer {
            layer,
            reason: reason.into(),
        }
    }
    pub(crate) fn idx(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Idx {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
