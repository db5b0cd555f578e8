//! A per-file index over every MS1 peak, binned by m/z, for fast lookup of a
//! mass in a given scan.
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use mzpeaks::Tolerance;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::LfqError;
use crate::identification::SpectraFileInfo;
use crate::peaks::{to_mz, IndexedPeak};
use crate::spectra::{Ms1Scan, SpectrumSource};

/// The number of m/z bins per Dalton. Each bin holds the peaks of all scans whose
/// m/z rounds to it.
pub const BINS_PER_DALTON: f64 = 100.0;

/// The location of one MS1 scan within its run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ms1ScanInfo {
    pub one_based_scan_number: usize,
    pub zero_based_ms1_index: usize,
    pub retention_time: f64,
}

impl Ms1ScanInfo {
    pub fn new(one_based_scan_number: usize, zero_based_ms1_index: usize, retention_time: f64) -> Self {
        Self {
            one_based_scan_number,
            zero_based_ms1_index,
            retention_time,
        }
    }
}

#[derive(Serialize)]
struct PersistedIndexRef<'a> {
    bins: &'a [Vec<IndexedPeak>],
    scans: &'a [Ms1ScanInfo],
}

#[derive(Deserialize)]
struct PersistedIndex {
    bins: Vec<Vec<IndexedPeak>>,
    scans: Vec<Ms1ScanInfo>,
}

/// Holds the peaks of at most one spectra file at a time, and the MS1 scan
/// tables of every file that has been indexed.
///
/// The index is built single-threaded and is only read while quantification runs
/// in parallel, so lookups take `&self`.
#[derive(Debug, Default)]
pub struct PeakIndexingEngine {
    bins: Vec<Vec<IndexedPeak>>,
    scan_tables: HashMap<Arc<SpectraFileInfo>, Vec<Ms1ScanInfo>>,
}

impl PeakIndexingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read all MS1 scans of `file` from `source` and index their peaks, replacing
    /// whatever was indexed before.
    ///
    /// Returns `false` if the file could not be read or held no MS1 peaks. The
    /// failure is logged and the caller should skip the file.
    pub fn index_mass_spectral_peaks<S: SpectrumSource + ?Sized>(
        &mut self,
        file: &Arc<SpectraFileInfo>,
        source: &S,
    ) -> bool {
        match source.read_ms1_scans(&file.full_file_path) {
            Ok(scans) => self.index_scans(file, scans),
            Err(e) => {
                error!(
                    "Could not read {}, it will not be quantified: {e}",
                    file.full_file_path.display()
                );
                false
            }
        }
    }

    /// Index an already loaded set of MS1 scans for `file`
    pub fn index_scans(&mut self, file: &Arc<SpectraFileInfo>, scans: Vec<Ms1Scan>) -> bool {
        self.clear_index();
        if scans.is_empty() {
            error!(
                "{} contained no MS1 scans, it will not be quantified",
                file.full_file_path.display()
            );
            return false;
        }

        let mut table = Vec::with_capacity(scans.len());
        let mut n_peaks = 0usize;
        for (scan_index, scan) in scans.into_iter().enumerate() {
            for (mz, intensity) in scan.iter() {
                if !mz.is_finite() || mz < 0.0 {
                    continue;
                }
                let bin = (mz * BINS_PER_DALTON).round() as usize;
                if bin >= self.bins.len() {
                    self.bins.resize_with(bin + 1, Vec::new);
                }
                self.bins[bin].push(IndexedPeak::new(
                    mz,
                    intensity,
                    scan_index as u32,
                    scan.retention_time,
                ));
                n_peaks += 1;
            }
            table.push(Ms1ScanInfo::new(
                scan.one_based_scan_number,
                scan_index,
                scan.retention_time,
            ));
        }
        self.scan_tables.insert(file.clone(), table);

        if n_peaks == 0 {
            error!(
                "{} contained no MS1 peaks, it will not be quantified",
                file.full_file_path.display()
            );
            self.clear_index();
            return false;
        }
        debug!(
            "Indexed {n_peaks} peaks from {}",
            file.filename_without_extension
        );
        true
    }

    /// Whether any peaks are currently indexed
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Find the peak in scan `scan_index` whose neutral mass at `charge` is closest to
    /// `theoretical_mass` and within `tolerance` of it.
    pub fn get_indexed_peak(
        &self,
        theoretical_mass: f64,
        scan_index: usize,
        tolerance: Tolerance,
        charge: i32,
    ) -> Option<IndexedPeak> {
        let (low_mass, high_mass) = tolerance.bounds(theoretical_mass);
        let floor_bin = (to_mz(low_mass, charge) * BINS_PER_DALTON).floor().max(0.0) as usize;
        let ceiling_bin = (to_mz(high_mass, charge) * BINS_PER_DALTON).ceil().max(0.0) as usize;

        let mut best: Option<(IndexedPeak, f64)> = None;
        for bin in self
            .bins
            .iter()
            .take(ceiling_bin.saturating_add(1))
            .skip(floor_bin)
        {
            let start = bin.partition_point(|p| (p.scan_index as usize) < scan_index);
            for peak in bin[start..]
                .iter()
                .take_while(|p| p.scan_index as usize == scan_index)
            {
                let mass = peak.neutral_mass(charge);
                if mass < low_mass || mass > high_mass {
                    continue;
                }
                let err = (mass - theoretical_mass).abs();
                if best.is_none_or(|(_, best_err)| err < best_err) {
                    best = Some((*peak, err));
                }
            }
        }
        best.map(|(p, _)| p)
    }

    /// Release the peaks of the currently indexed file. Scan tables are kept.
    pub fn clear_index(&mut self) {
        self.bins = Vec::new();
    }

    /// The MS1 scans of `file`, in acquisition order.
    ///
    /// # Panics
    /// If `file` was never indexed.
    pub fn ms1_scans(&self, file: &SpectraFileInfo) -> &[Ms1ScanInfo] {
        match self.scan_tables.get(file) {
            Some(table) => table,
            None => panic!(
                "No MS1 scan table for {}, it was never indexed",
                file.full_file_path.display()
            ),
        }
    }

    pub fn has_scan_table(&self, file: &SpectraFileInfo) -> bool {
        self.scan_tables.contains_key(file)
    }

    /// Write the current index out to `file`'s index artifact
    pub fn serialize_index(&self, file: &SpectraFileInfo) -> Result<(), LfqError> {
        let path = file.index_artifact_path();
        self.write_index(&path, self.ms1_scans(file))
    }

    fn write_index(&self, path: &Path, scans: &[Ms1ScanInfo]) -> Result<(), LfqError> {
        let handle = io::BufWriter::new(fs::File::create(path)?);
        let mut encoder = GzEncoder::new(handle, Compression::fast());
        let n_bytes = bincode::serde::encode_into_std_write(
            PersistedIndexRef {
                bins: &self.bins,
                scans,
            },
            &mut encoder,
            bincode::config::standard(),
        )?;
        encoder.finish()?;
        debug!("Wrote {n_bytes} bytes of index to {}", path.display());
        Ok(())
    }

    /// Load `file`'s index from its artifact, replacing the current index, and delete
    /// the artifact.
    pub fn deserialize_index(&mut self, file: &Arc<SpectraFileInfo>) -> Result<(), LfqError> {
        let path = file.index_artifact_path();
        let handle = io::BufReader::new(fs::File::open(&path)?);
        let mut decoder = GzDecoder::new(handle);
        let persisted: PersistedIndex =
            bincode::serde::decode_from_std_read(&mut decoder, bincode::config::standard())?;
        self.bins = persisted.bins;
        self.scan_tables.insert(file.clone(), persisted.scans);
        if let Err(e) = fs::remove_file(&path) {
            warn!("Failed to remove index artifact {}: {e}", path.display());
        }
        info!("Restored peak index for {}", file.filename_without_extension);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peaks::to_mass;

    fn make_scans() -> Vec<Ms1Scan> {
        (0..5)
            .map(|i| {
                let shift = i as f64 * 1e-4;
                Ms1Scan::new(
                    i * 2 + 1,
                    1.0 + i as f64 * 0.1,
                    vec![400.1234 + shift, 401.1267 + shift, 800.5],
                    vec![1e4, 5e3, 1e3],
                )
            })
            .collect()
    }

    #[test]
    fn test_exact_lookup() {
        let file = Arc::new(SpectraFileInfo::from_path("test_exact_lookup.mzML"));
        let mut index = PeakIndexingEngine::new();
        assert!(index.index_scans(&file, make_scans()));
        for (scan_index, scan) in make_scans().iter().enumerate() {
            for (mz, _) in scan.iter() {
                for z in 1..4 {
                    let mass = to_mass(mz, z);
                    let peak = index
                        .get_indexed_peak(mass, scan_index, Tolerance::PPM(0.0), z)
                        .unwrap();
                    assert_eq!(peak.mz, mz);
                    assert_eq!(peak.scan_index as usize, scan_index);
                }
            }
        }
    }

    #[test]
    fn test_out_of_tolerance() {
        let file = Arc::new(SpectraFileInfo::from_path("test_out_of_tolerance.mzML"));
        let mut index = PeakIndexingEngine::new();
        assert!(index.index_scans(&file, make_scans()));
        let mass = to_mass(400.1234, 2);
        assert!(index
            .get_indexed_peak(mass * (1.0 + 20e-6), 0, Tolerance::PPM(10.0), 2)
            .is_none());
        assert!(index
            .get_indexed_peak(mass * (1.0 + 5e-6), 0, Tolerance::PPM(10.0), 2)
            .is_some());
        assert!(index
            .get_indexed_peak(mass, 7, Tolerance::PPM(10.0), 2)
            .is_none());
    }

    #[test]
    fn test_closest_peak_wins() {
        let file = Arc::new(SpectraFileInfo::from_path("test_closest_peak_wins.mzML"));
        let mut index = PeakIndexingEngine::new();
        let scans = vec![Ms1Scan::new(
            1,
            1.0,
            vec![500.000, 500.002, 500.004],
            vec![1.0, 2.0, 3.0],
        )];
        assert!(index.index_scans(&file, scans));
        let peak = index
            .get_indexed_peak(to_mass(500.0035, 1), 0, Tolerance::PPM(20.0), 1)
            .unwrap();
        assert_eq!(peak.mz, 500.004);
    }

    #[test]
    fn test_empty_files_fail() {
        let file = Arc::new(SpectraFileInfo::from_path("test_empty_files_fail.mzML"));
        let mut index = PeakIndexingEngine::new();
        assert!(!index.index_scans(&file, Vec::new()));
        assert!(!index.index_scans(&file, vec![Ms1Scan::new(1, 1.0, vec![], vec![])]));
        assert!(index.is_empty());
    }

    #[test]
    fn test_persist_restore() {
        let dir = std::env::temp_dir().join("mzlfq_test_persist_restore");
        fs::create_dir_all(&dir).unwrap();
        let file = Arc::new(SpectraFileInfo::from_path(dir.join("run.mzML")));
        let mut index = PeakIndexingEngine::new();
        assert!(index.index_scans(&file, make_scans()));
        let mass = to_mass(401.1267, 1);
        let before = index.get_indexed_peak(mass, 0, Tolerance::PPM(5.0), 1);
        assert!(before.is_some());

        index.serialize_index(&file).unwrap();
        assert!(file.index_artifact_path().exists());
        index.clear_index();
        assert!(index.get_indexed_peak(mass, 0, Tolerance::PPM(5.0), 1).is_none());
        assert_eq!(index.ms1_scans(&file).len(), 5);

        index.deserialize_index(&file).unwrap();
        assert!(!file.index_artifact_path().exists());
        let after = index.get_indexed_peak(mass, 0, Tolerance::PPM(5.0), 1);
        assert_eq!(before, after);
        assert_eq!(index.ms1_scans(&file)[4].one_based_scan_number, 9);
        fs::remove_dir_all(&dir).ok();
    }
}
