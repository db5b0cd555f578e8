//! Reading identifications, experimental designs and locating spectra files
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use mzlfq::{Identification, ProteinGroup, SpectraFileInfo};

pub const EXPERIMENTAL_DESIGN_FILE: &str = "ExperimentalDesign.tsv";

const SPECTRA_EXTENSIONS: &[&str] = &["mzml", "mgf"];

/// One row of a generic tab-separated identification file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IdentificationRecord {
    #[serde(rename = "File Name")]
    pub file_name: String,
    #[serde(rename = "Base Sequence")]
    pub base_sequence: String,
    #[serde(rename = "Full Sequence")]
    pub full_sequence: String,
    #[serde(rename = "Peptide Monoisotopic Mass")]
    pub monoisotopic_mass: f64,
    /// In minutes
    #[serde(rename = "Scan Retention Time")]
    pub retention_time: f64,
    #[serde(rename = "Precursor Charge")]
    pub precursor_charge: i32,
    #[serde(rename = "Protein Accession", default)]
    pub protein_accession: String,
    #[serde(rename = "Gene Name", default)]
    pub gene_name: Option<String>,
    #[serde(rename = "Organism", default)]
    pub organism: Option<String>,
}

impl IdentificationRecord {
    /// The name of the spectra file without directories or extensions
    pub fn file_stem(&self) -> String {
        SpectraFileInfo::from_path(&self.file_name).filename_without_extension
    }

    /// The protein groups this identification maps to, shared through `registry` so
    /// every identification of a protein holds the same group
    pub fn protein_groups(
        &self,
        registry: &mut HashMap<String, Arc<ProteinGroup>>,
    ) -> Vec<Arc<ProteinGroup>> {
        let genes: Vec<&str> = self
            .gene_name
            .as_deref()
            .map(|s| s.split(';').map(str::trim).collect())
            .unwrap_or_default();
        let organisms: Vec<&str> = self
            .organism
            .as_deref()
            .map(|s| s.split(';').map(str::trim).collect())
            .unwrap_or_default();

        let mut groups: Vec<Arc<ProteinGroup>> = Vec::new();
        for (i, accession) in self
            .protein_accession
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .enumerate()
        {
            let group = registry
                .entry(accession.to_string())
                .or_insert_with(|| {
                    Arc::new(ProteinGroup::new(
                        accession,
                        genes.get(i).copied().unwrap_or_default(),
                        organisms.get(i).copied().unwrap_or_default(),
                    ))
                })
                .clone();
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        groups
    }

    pub fn to_identification(
        &self,
        file_info: Arc<SpectraFileInfo>,
        protein_groups: Vec<Arc<ProteinGroup>>,
    ) -> Identification {
        Identification::new(
            self.base_sequence.as_str(),
            self.full_sequence.as_str(),
            self.monoisotopic_mass,
            self.precursor_charge,
            self.retention_time,
            file_info,
            protein_groups,
        )
    }
}

fn tsv_reader<R: io::Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader)
}

/// Read identification rows, skipping rows that cannot be parsed
pub fn read_identification_records<R: io::Read>(
    reader: R,
) -> Result<Vec<IdentificationRecord>, csv::Error> {
    let mut reader = tsv_reader(reader);
    let mut records = Vec::new();
    for (i, row) in reader.deserialize::<IdentificationRecord>().enumerate() {
        match row {
            Ok(record) => records.push(record),
            Err(e) if e.is_io_error() => return Err(e),
            Err(e) => {
                warn!("Skipping malformed identification on row {}: {e}", i + 1);
            }
        }
    }
    debug!("Read {} identifications", records.len());
    Ok(records)
}

/// One row of an experimental design file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DesignRecord {
    #[serde(rename = "FileName")]
    pub file_name: String,
    #[serde(rename = "Condition")]
    pub condition: String,
    #[serde(rename = "Biorep")]
    pub biological_replicate: i32,
    #[serde(rename = "Fraction")]
    pub fraction: i32,
    #[serde(rename = "Techrep")]
    pub technical_replicate: i32,
}

impl DesignRecord {
    pub fn file_info(&self, path: PathBuf) -> SpectraFileInfo {
        SpectraFileInfo::new(
            path,
            self.condition.as_str(),
            self.biological_replicate,
            self.fraction,
            self.technical_replicate,
        )
    }
}

/// Read an experimental design, keyed by file name without extension
pub fn read_experimental_design<R: io::Read>(
    reader: R,
) -> Result<HashMap<String, DesignRecord>, csv::Error> {
    let mut reader = tsv_reader(reader);
    let mut design = HashMap::new();
    for row in reader.deserialize::<DesignRecord>() {
        let record = row?;
        let stem = SpectraFileInfo::from_path(&record.file_name).filename_without_extension;
        design.insert(stem, record);
    }
    Ok(design)
}

fn is_spectra_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    SPECTRA_EXTENSIONS
        .iter()
        .any(|ext| name.ends_with(&format!(".{ext}")))
}

/// Find the readable spectra files in `directory` whose names, without extension, are
/// in `stems`
pub fn locate_spectra_files(
    directory: &Path,
    stems: &HashSet<String>,
) -> io::Result<HashMap<String, PathBuf>> {
    let mut found = HashMap::new();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if !path.is_file() || !is_spectra_file(&path) {
            continue;
        }
        let stem = SpectraFileInfo::from_path(&path).filename_without_extension;
        if stems.contains(&stem) {
            if let Some(prior) = found.insert(stem, path.clone()) {
                warn!(
                    "Both {} and {} match the same identifications, using the latter",
                    prior.display(),
                    path.display()
                );
            }
        }
    }
    Ok(found)
}
