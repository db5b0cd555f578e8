//! Identification records produced by an upstream search engine, and the
//! spectra files and protein groups they refer to.
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::peaks::to_mz;

/// A spectra file and its place in the experimental design.
///
/// Files are identified by their full path, the design fields only control
/// ordering and which files are comparable during match-between-runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectraFileInfo {
    pub full_file_path: PathBuf,
    pub filename_without_extension: String,
    pub condition: String,
    pub biological_replicate: i32,
    pub fraction: i32,
    pub technical_replicate: i32,
}

impl SpectraFileInfo {
    pub const DEFAULT_CONDITION: &'static str = "Default";

    pub fn new<P: Into<PathBuf>>(
        full_file_path: P,
        condition: impl Into<String>,
        biological_replicate: i32,
        fraction: i32,
        technical_replicate: i32,
    ) -> Self {
        let full_file_path = full_file_path.into();
        let filename_without_extension = file_stem(&full_file_path);
        Self {
            full_file_path,
            filename_without_extension,
            condition: condition.into(),
            biological_replicate,
            fraction,
            technical_replicate,
        }
    }

    /// Create a file record with no experimental design information
    pub fn from_path<P: Into<PathBuf>>(full_file_path: P) -> Self {
        Self::new(full_file_path, Self::DEFAULT_CONDITION, 0, 0, 0)
    }

    /// Where the peak index for this file is written between passes
    pub fn index_artifact_path(&self) -> PathBuf {
        let dir = self
            .full_file_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        dir.join(format!("{}.ind", self.filename_without_extension))
    }

    /// Whether this file and `other` come from the same biological sample
    pub fn same_sample(&self, other: &Self) -> bool {
        self.condition == other.condition && self.biological_replicate == other.biological_replicate
    }
}

fn file_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let is_compressed = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"));
    if is_compressed {
        file_stem(Path::new(&stem))
    } else {
        stem
    }
}

impl PartialEq for SpectraFileInfo {
    fn eq(&self, other: &Self) -> bool {
        self.full_file_path == other.full_file_path
    }
}

impl Eq for SpectraFileInfo {}

impl Hash for SpectraFileInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full_file_path.hash(state);
    }
}

impl PartialOrd for SpectraFileInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SpectraFileInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.condition
            .cmp(&other.condition)
            .then(self.biological_replicate.cmp(&other.biological_replicate))
            .then(self.fraction.cmp(&other.fraction))
            .then(self.technical_replicate.cmp(&other.technical_replicate))
            .then_with(|| self.full_file_path.cmp(&other.full_file_path))
    }
}

/// A named group of proteins that peptides map to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProteinGroup {
    pub name: String,
    pub gene_name: String,
    pub organism: String,
}

impl ProteinGroup {
    pub fn new(
        name: impl Into<String>,
        gene_name: impl Into<String>,
        organism: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            gene_name: gene_name.into(),
            organism: organism.into(),
        }
    }
}

impl PartialEq for ProteinGroup {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ProteinGroup {}

impl Hash for ProteinGroup {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// A peptide-spectrum match from an upstream search, the anchor for quantification.
#[derive(Debug, Clone)]
pub struct Identification {
    pub base_sequence: String,
    pub modified_sequence: String,
    pub monoisotopic_mass: f64,
    pub precursor_charge: i32,
    /// The MS2 scan's retention time, in minutes
    pub ms2_retention_time: f64,
    pub file_info: Arc<SpectraFileInfo>,
    pub protein_groups: Vec<Arc<ProteinGroup>>,
    pub use_for_protein_quant: bool,
    peakfinding_mass: f64,
}

impl Identification {
    pub fn new(
        base_sequence: impl Into<String>,
        modified_sequence: impl Into<String>,
        monoisotopic_mass: f64,
        precursor_charge: i32,
        ms2_retention_time: f64,
        file_info: Arc<SpectraFileInfo>,
        protein_groups: Vec<Arc<ProteinGroup>>,
    ) -> Self {
        Self {
            base_sequence: base_sequence.into(),
            modified_sequence: modified_sequence.into(),
            monoisotopic_mass,
            precursor_charge,
            ms2_retention_time,
            file_info,
            protein_groups,
            use_for_protein_quant: true,
            peakfinding_mass: monoisotopic_mass,
        }
    }

    /// The mass of the most abundant isotope, the mass used to build
    /// extracted ion chromatograms. Equal to the monoisotopic mass until the
    /// engine has computed isotope distributions.
    #[inline]
    pub fn peakfinding_mass(&self) -> f64 {
        self.peakfinding_mass
    }

    pub(crate) fn set_peakfinding_mass(&mut self, mass: f64) {
        self.peakfinding_mass = mass;
    }

    pub fn theoretical_mz(&self) -> f64 {
        to_mz(self.monoisotopic_mass, self.precursor_charge)
    }
}
