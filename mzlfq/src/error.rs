use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The ways quantification can fail.
///
/// Only [`LfqError::QuantificationFailed`] is fatal to a whole run, the other variants
/// describe failures scoped to a single spectra file or input record.
#[derive(Debug, Error)]
pub enum LfqError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to read spectra from {}: {reason}", .path.display())]
    SpectraFileError { path: PathBuf, reason: String },
    #[error("Failed to encode the peak index: {0}")]
    IndexEncodeError(
        #[source]
        #[from]
        bincode::error::EncodeError,
    ),
    #[error("Failed to decode the peak index: {0}")]
    IndexDecodeError(
        #[source]
        #[from]
        bincode::error::DecodeError,
    ),
    #[error("A tabular IO error occurred: {0}")]
    CSVError(
        #[source]
        #[from]
        csv::Error,
    ),
    #[error("Invalid identification: {0}")]
    IdentificationError(String),
    #[error("Quantification failed: {0}")]
    QuantificationFailed(String),
}

impl LfqError {
    pub fn spectra_file<P: Into<PathBuf>, S: ToString>(path: P, reason: S) -> Self {
        Self::SpectraFileError {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
