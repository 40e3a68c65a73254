use anyhow::{bail, Result};
use candle_core::Device;
use derive_more::Display;
use std::str::FromStr;

/// Environment variable read by [`DeviceKind::from_env()`].
pub const DEVICE_ENV: &str = "GOOGLENET_DEVICE";

/// Where the network runs.
///
/// Parsed from `cpu`, `cuda`, `cuda:N`, `metal` or `metal:N`.
#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq)]
pub enum DeviceKind {
    /// The host.
    #[default]
    #[display(fmt = "cpu")]
    Cpu,
    /// A CUDA gpu (requires `--features cuda`).
    #[display(fmt = "cuda:{}", _0)]
    Cuda(usize),
    /// A Metal gpu (requires `--features metal`).
    #[display(fmt = "metal:{}", _0)]
    Metal(usize),
}

impl DeviceKind {
    /// Reads [`DEVICE_ENV`], defaulting to [`DeviceKind::Cpu`] when unset.
    ///
    /// **Errors**
    ///
    /// The variable is set but can not be parsed.
    pub fn from_env() -> Result<Self> {
        match std::env::var(DEVICE_ENV) {
            Ok(value) => value.parse(),
            Err(_) => Ok(Self::Cpu),
        }
    }
    /// Creates the device.
    ///
    /// **Errors**
    ///
    /// The backend was not compiled in or no such device exists.
    pub fn device(self) -> Result<Device> {
        let device = match self {
            Self::Cpu => Device::Cpu,
            Self::Cuda(index) => Device::new_cuda(index)?,
            Self::Metal(index) => Device::new_metal(index)?,
        };
        Ok(device)
    }
    /// The devices available to this build, host first.
    pub fn list() -> Vec<Self> {
        let mut kinds = vec![Self::Cpu];
        if cfg!(feature = "cuda") {
            kinds.extend(
                (0..)
                    .map(Self::Cuda)
                    .take_while(|kind| kind.device().is_ok()),
            );
        }
        if cfg!(feature = "metal") {
            kinds.extend(
                (0..)
                    .map(Self::Metal)
                    .take_while(|kind| kind.device().is_ok()),
            );
        }
        kinds
    }
}

impl FromStr for DeviceKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        let (name, index) = match s.split_once(':') {
            Some((name, index)) => (name, index.parse::<usize>()?),
            None => (s.as_str(), 0),
        };
        match name {
            "cpu" | "host" if index == 0 => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(index)),
            "metal" => Ok(Self::Metal(index)),
            _ => bail!("Unknown device {s:?}, expected cpu, cuda[:N] or metal[:N]!"),
        }
    }
}
