//! Label-free quantification of identified peptides across LC-MS runs.
//!
//! Each identification anchors a search for its analyte's chromatographic peak in the
//! MS1 scans of its run. Isotopic envelopes are validated against a theoretical isotope
//! distribution, peaks spanning more than one eluting species are split, and peaks
//! sharing an apex are reconciled. Optionally, identifications are transferred between
//! runs using a retention time calibration built from peptides identified in both.
pub mod error;
pub mod identification;
pub mod index;
pub mod isotopic_fit;
pub mod isotopic_model;
pub mod peaks;
pub mod scorer;
pub mod spectra;

pub mod chromatographic_peak;
pub mod peak_finding;
pub mod rt_calibration;

pub mod api;
pub mod engine;
pub mod mbr;
pub mod results;

pub use crate::api::{quantify, quantify_spectra_files};
pub use crate::chromatographic_peak::{ChromatographicPeak, DetectionType, IntensityMode};
pub use crate::engine::{LfqEngine, LfqParams};
pub use crate::error::LfqError;
pub use crate::identification::{Identification, ProteinGroup, SpectraFileInfo};
pub use crate::isotopic_model::{
    IsotopeDistribution, IsotopeDistributionProvider, PeptideIsotopeModel,
};
pub use crate::results::LfqResults;
pub use crate::spectra::{InMemorySpectrumSource, Ms1Scan, MzDataSpectrumSource, SpectrumSource};
