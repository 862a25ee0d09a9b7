//! Error types
use std::{fmt, io, net::IpAddr, result, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything that can go wrong talking to a single device.
#[derive(Debug, Error)]
pub enum Error {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("error connecting to the device: {0}")]
    Unreachable(#[from] io::Error),
    #[error("could not parse the response received from the device: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("response data error: {0}")]
    Device(SectionError),
    #[error("device {0} is busy with another operation")]
    Busy(IpAddr),
    #[error("another batch operation is already running")]
    BatchInProgress,
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Short name used in status lines, where the full message would not fit.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Timeout(_) => "Timeout",
            Error::Unreachable(_) => "Unreachable",
            Error::Serde(_) => "ProtocolError",
            Error::Device(_) => "DeviceError",
            Error::Busy(_) | Error::BatchInProgress => "Busy",
            Error::Other(_) => "Error",
        }
    }
}

impl From<SectionError> for Error {
    fn from(error: SectionError) -> Self {
        Error::Device(error)
    }
}

pub type Result<T> = result::Result<T, Error>;

/// A module-level error reported by the device itself, e.g. `-2001 Module not support`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SectionError {
    pub err_code: i16,
    #[serde(default)]
    pub err_msg: String,
}

impl fmt::Display for SectionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}) {}", self.err_code, self.err_msg)
    }
}

impl std::error::Error for SectionError {}
