//! Sources of MS1 scans to build peak indices from.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use mzdata::prelude::*;
use mzdata::spectrum::SignalContinuity;
use mzpeaks::{CentroidLike, IntensityMeasurement};
use tracing::{debug, trace};

use crate::error::LfqError;

/// A centroided MS1 scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ms1Scan {
    pub one_based_scan_number: usize,
    /// In minutes
    pub retention_time: f64,
    pub mz_array: Vec<f64>,
    pub intensity_array: Vec<f32>,
}

impl Ms1Scan {
    pub fn new(
        one_based_scan_number: usize,
        retention_time: f64,
        mz_array: Vec<f64>,
        intensity_array: Vec<f32>,
    ) -> Self {
        Self {
            one_based_scan_number,
            retention_time,
            mz_array,
            intensity_array,
        }
    }

    pub fn len(&self) -> usize {
        self.mz_array.len().min(self.intensity_array.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f32)> + '_ {
        self.mz_array
            .iter()
            .copied()
            .zip(self.intensity_array.iter().copied())
    }
}

/// Reads the MS1 scans of a spectra file in acquisition order
pub trait SpectrumSource: Send + Sync {
    fn read_ms1_scans(&self, path: &Path) -> Result<Vec<Ms1Scan>, LfqError>;
}

/// Read MS1 scans from any format [`mzdata::MZReader`] can open, centroiding
/// profile spectra along the way.
#[derive(Debug, Clone, Copy)]
pub struct MzDataSpectrumSource {
    /// The minimum signal-to-noise ratio used when picking peaks from profile spectra
    pub signal_to_noise_threshold: f32,
}

impl Default for MzDataSpectrumSource {
    fn default() -> Self {
        Self {
            signal_to_noise_threshold: 1.0,
        }
    }
}

fn scan_number_from_id(id: &str) -> Option<usize> {
    id.split_ascii_whitespace()
        .find_map(|token| token.strip_prefix("scan="))
        .and_then(|v| v.parse().ok())
}

impl SpectrumSource for MzDataSpectrumSource {
    fn read_ms1_scans(&self, path: &Path) -> Result<Vec<Ms1Scan>, LfqError> {
        let reader =
            mzdata::MZReader::open_path(path).map_err(|e| LfqError::spectra_file(path, e))?;
        let mut scans = Vec::new();
        for mut spectrum in reader {
            if spectrum.ms_level() != 1 {
                continue;
            }
            let scan_number =
                scan_number_from_id(spectrum.id()).unwrap_or_else(|| spectrum.index() + 1);
            let retention_time = spectrum.start_time();
            let peaks = match spectrum.signal_continuity() {
                SignalContinuity::Profile => {
                    trace!("Picking peaks for {}", spectrum.id());
                    spectrum
                        .pick_peaks(self.signal_to_noise_threshold)
                        .map_err(|e| LfqError::spectra_file(path, format!("{e:?}")))?;
                    spectrum.description_mut().signal_continuity = SignalContinuity::Centroid;
                    match spectrum.peaks.as_ref() {
                        Some(peaks) => peaks,
                        None => continue,
                    }
                }
                _ => spectrum
                    .try_build_centroids()
                    .map_err(|e| LfqError::spectra_file(path, format!("{e:?}")))?,
            };
            let (mz_array, intensity_array) =
                peaks.iter().map(|p| (p.mz(), p.intensity())).unzip();
            scans.push(Ms1Scan::new(
                scan_number,
                retention_time,
                mz_array,
                intensity_array,
            ));
        }
        debug!("Read {} MS1 scans from {}", scans.len(), path.display());
        Ok(scans)
    }
}

/// Scans held in memory, keyed by the path they stand in for
#[derive(Debug, Clone, Default)]
pub struct InMemorySpectrumSource {
    files: HashMap<PathBuf, Vec<Ms1Scan>>,
}

impl InMemorySpectrumSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<P: Into<PathBuf>>(&mut self, path: P, scans: Vec<Ms1Scan>) {
        self.files.insert(path.into(), scans);
    }
}

impl SpectrumSource for InMemorySpectrumSource {
    fn read_ms1_scans(&self, path: &Path) -> Result<Vec<Ms1Scan>, LfqError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| LfqError::spectra_file(path, "no such file"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_scan_number() {
        assert_eq!(
            scan_number_from_id("controllerType=0 controllerNumber=1 scan=25"),
            Some(25)
        );
        assert_eq!(scan_number_from_id("index=3"), None);
    }

    #[test]
    fn test_in_memory() {
        let mut source = InMemorySpectrumSource::new();
        source.insert(
            "a.mzML",
            vec![Ms1Scan::new(1, 0.5, vec![100.0, 200.0], vec![5.0, 6.0])],
        );
        let scans = source.read_ms1_scans(Path::new("a.mzML")).unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].iter().collect::<Vec<_>>(), [(100.0, 5.0), (200.0, 6.0)]);
        assert!(source.read_ms1_scans(Path::new("b.mzML")).is_err());
    }
}
