//! Peaks pulled out of MS1 spectra and the isotopic envelopes assembled from them.
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::isotopic_model::PROTON;

/// Convert an m/z to a neutral mass at `charge`
#[inline]
pub fn to_mass(mz: f64, charge: i32) -> f64 {
    mz * (charge.abs() as f64) - (charge as f64) * PROTON
}

/// Convert a neutral mass to an m/z at `charge`
#[inline]
pub fn to_mz(mass: f64, charge: i32) -> f64 {
    (mass + (charge as f64) * PROTON) / (charge.abs() as f64)
}

/// A single centroid from an MS1 scan, located by its position in the run.
///
/// Two peaks are the same peak when they share an m/z and a scan index, regardless
/// of intensity or retention time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndexedPeak {
    pub mz: f64,
    pub intensity: f32,
    /// The zero-based position of the scan among the MS1 scans of the run
    pub scan_index: u32,
    pub retention_time: f64,
}

impl IndexedPeak {
    pub fn new(mz: f64, intensity: f32, scan_index: u32, retention_time: f64) -> Self {
        Self {
            mz,
            intensity,
            scan_index,
            retention_time,
        }
    }

    #[inline]
    pub fn neutral_mass(&self, charge: i32) -> f64 {
        to_mass(self.mz, charge)
    }
}

impl PartialEq for IndexedPeak {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.mz.to_bits() == other.mz.to_bits() && self.scan_index == other.scan_index
    }
}

impl Eq for IndexedPeak {}

impl Hash for IndexedPeak {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.mz.to_bits().hash(state);
        self.scan_index.hash(state);
    }
}

/// The isotopic peaks of one analyte at one charge state in one scan, represented
/// by the peak used to find it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsotopicEnvelope {
    pub indexed_peak: IndexedPeak,
    pub charge: i32,
    intensity: f64,
}

impl IsotopicEnvelope {
    /// Create an envelope from the summed intensity of its isotopic peaks. The stored
    /// intensity is normalized by the charge state.
    pub fn new(indexed_peak: IndexedPeak, charge: i32, summed_intensity: f64) -> Self {
        Self {
            indexed_peak,
            charge,
            intensity: summed_intensity / charge as f64,
        }
    }

    #[inline]
    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    #[inline]
    pub fn retention_time(&self) -> f64 {
        self.indexed_peak.retention_time
    }

    #[inline]
    pub fn scan_index(&self) -> u32 {
        self.indexed_peak.scan_index
    }

    /// Rescale the envelope's intensity, e.g. when normalizing between runs
    pub fn normalize(&mut self, normalization_factor: f64) {
        self.intensity *= normalization_factor;
    }
}
