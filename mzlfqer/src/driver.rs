use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use mzlfq::{quantify_spectra_files, Identification, LfqError, LfqParams, SpectraFileInfo};

use crate::args::{non_negative_float_f64, positive_float_f64, ArgIntensityMode};
use crate::input::{
    locate_spectra_files, read_experimental_design, read_identification_records, DesignRecord,
    EXPERIMENTAL_DESIGN_FILE,
};
use crate::write::write_results;

#[derive(Debug, Error)]
pub enum MzLfqerError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("A tabular IO error occurred: {0}")]
    CSVError(
        #[source]
        #[from]
        csv::Error,
    ),
    #[error("Failed to read identifications from {path}: {1}", path = .0.display())]
    IdentificationFileError(PathBuf, #[source] csv::Error),
    #[error("Failed to read the experimental design from {path}: {1}", path = .0.display())]
    ExperimentalDesignError(PathBuf, #[source] csv::Error),
    #[error("No spectra files for the identifications were found in {}", .0.display())]
    NoSpectraFiles(PathBuf),
    #[error("Quantification failed: {0}")]
    LfqError(
        #[source]
        #[from]
        LfqError,
    ),
    #[error("Failed to read the configuration: {0}")]
    ConfigError(
        #[source]
        #[from]
        figment::Error,
    ),
    #[error("Failed to write the configuration: {0}")]
    ConfigWriteError(
        #[source]
        #[from]
        toml::ser::Error,
    ),
}

/// Label-free quantification of peptides and proteins from identified LC-MS/MS runs.
///
/// Read identifications from a tab-separated file, find each run's MS1 peaks, and
/// write quantified peaks, peptides and proteins as tab-separated tables.
#[derive(Parser, Debug, Clone, PartialEq, Deserialize, Serialize)]
#[command(author, version)]
#[serde(default)]
pub struct MzLfqer {
    /// The tab-separated identification file to quantify
    #[arg()]
    pub identifications: PathBuf,

    /// The directory holding the spectra files, defaulting to the directory of the
    /// identification file.
    ///
    /// An `ExperimentalDesign.tsv` file in this directory assigns conditions,
    /// replicates and fractions to each spectra file.
    #[arg(short = 's', long = "spectra-dir")]
    pub spectra_dir: Option<PathBuf>,

    /// The directory to write the result tables to
    #[arg(short = 'o', long = "output-dir", default_value = ".")]
    pub output_dir: PathBuf,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mzlfqer.toml` in the working directory.
    /// Environment variables prefixed with `MZLFQER_` will be read too.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// Write the effective configuration to this path as TOML
    #[arg(long = "write-config")]
    pub write_config: Option<PathBuf>,

    /// The number of threads to use, passing a value < 1 to use one fewer than all available threads
    #[arg(
        short='t',
        long="threads",
        default_value_t=-1,
    )]
    pub threads: i32,

    /// The mass accuracy required of a chromatographic peak, in PPM
    #[arg(long = "ppm", default_value_t = 10.0, value_parser = positive_float_f64)]
    pub ppm_tolerance: f64,

    /// The mass accuracy required of the peaks within an isotopic envelope, in PPM
    #[arg(long = "isotope-ppm", default_value_t = 5.0, value_parser = positive_float_f64)]
    pub isotope_ppm_tolerance: f64,

    /// The number of isotopic peaks an envelope must match
    #[arg(
        short = 'n',
        long = "num-isotopes-required",
        default_value_t = 2,
        value_parser = clap::value_parser!(u32).range(1..),
    )]
    pub num_isotopes_required: u32,

    /// The number of consecutive MS1 scans a peak may be missing from
    #[arg(short = 'm', long = "missed-scans", default_value_t = 1)]
    pub missed_scans_allowed: usize,

    /// How a peak's intensity is computed
    #[arg(short = 'i', long = "intensity-mode", default_value = "apex")]
    pub intensity_mode: ArgIntensityMode,

    /// Only look for peaks at the charge state each peptide was identified at
    #[arg(long = "id-specific-charge")]
    pub id_specific_charge_state: bool,

    /// Transfer identifications between runs by retention time alignment
    #[arg(long = "mbr")]
    pub match_between_runs: bool,

    /// The largest mass error match-between-runs will accept, in PPM
    #[arg(long = "mbr-ppm", default_value_t = 10.0, value_parser = positive_float_f64)]
    pub mbr_ppm_tolerance: f64,

    /// The widest retention time window match-between-runs will search, in minutes
    #[arg(long = "mbr-rt-window", default_value_t = 2.5, value_parser = non_negative_float_f64)]
    pub mbr_rt_window: f64,

    /// Only transfer peptides from proteins identified by MS/MS in the acceptor's condition
    #[arg(long = "require-msms-in-condition")]
    pub require_msms_id_in_condition: bool,

    /// Report intensities for peaks shared by several peptides
    #[arg(long = "quantify-ambiguous")]
    pub quantify_ambiguous_peptides: bool,

    /// Use peptides shared between protein groups for protein quantification
    #[arg(long = "shared-peptides")]
    pub use_shared_peptides_for_protein_quant: bool,
}

impl Default for MzLfqer {
    fn default() -> Self {
        Self {
            identifications: PathBuf::new(),
            spectra_dir: None,
            output_dir: PathBuf::from("."),
            log_file: None,
            config_file: None,
            write_config: None,
            threads: -1,
            ppm_tolerance: 10.0,
            isotope_ppm_tolerance: 5.0,
            num_isotopes_required: 2,
            missed_scans_allowed: 1,
            intensity_mode: ArgIntensityMode::Apex,
            id_specific_charge_state: false,
            match_between_runs: false,
            mbr_ppm_tolerance: 10.0,
            mbr_rt_window: 2.5,
            require_msms_id_in_condition: false,
            quantify_ambiguous_peptides: false,
            use_shared_peptides_for_protein_quant: false,
        }
    }
}

impl MzLfqer {
    pub fn params(&self) -> LfqParams {
        LfqParams {
            ppm_tolerance: self.ppm_tolerance,
            isotope_ppm_tolerance: self.isotope_ppm_tolerance,
            mbr_ppm_tolerance: self.mbr_ppm_tolerance,
            num_isotopes_required: self.num_isotopes_required as usize,
            missed_scans_allowed: self.missed_scans_allowed,
            mbr_rt_window: self.mbr_rt_window,
            integrate: self.intensity_mode.integrate(),
            id_specific_charge_state: self.id_specific_charge_state,
            match_between_runs: self.match_between_runs,
            require_msms_id_in_condition: self.require_msms_id_in_condition,
            quantify_ambiguous_peptides: self.quantify_ambiguous_peptides,
            use_shared_peptides_for_protein_quant: self.use_shared_peptides_for_protein_quant,
            max_threads: self.threads,
            ..Default::default()
        }
    }

    /// The directory spectra files and the experimental design are read from
    pub fn spectra_directory(&self) -> PathBuf {
        self.spectra_dir.clone().unwrap_or_else(|| {
            self.identifications
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }

    /// Write this configuration to `path` as TOML
    pub fn write_config_to(&self, path: &Path) -> Result<(), MzLfqerError> {
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text)?;
        info!("Wrote configuration to {}", path.display());
        Ok(())
    }

    fn read_design(
        &self,
        directory: &Path,
    ) -> Result<HashMap<String, DesignRecord>, MzLfqerError> {
        let path = directory.join(EXPERIMENTAL_DESIGN_FILE);
        if !path.exists() {
            debug!("No experimental design found at {}", path.display());
            return Ok(HashMap::new());
        }
        let handle = io::BufReader::new(fs::File::open(&path)?);
        let design = read_experimental_design(handle)
            .map_err(|e| MzLfqerError::ExperimentalDesignError(path.clone(), e))?;
        info!("Read experimental design for {} files", design.len());
        Ok(design)
    }

    /// Read the identification file and resolve the spectra file of each identification.
    ///
    /// Identifications whose spectra file cannot be found are dropped.
    pub fn load_identifications(
        &self,
    ) -> Result<(Vec<Identification>, Vec<Arc<SpectraFileInfo>>), MzLfqerError> {
        let handle = fs::File::open(&self.identifications).map_err(|e| {
            MzLfqerError::IdentificationFileError(self.identifications.clone(), e.into())
        })?;
        let records = read_identification_records(io::BufReader::new(handle))
            .map_err(|e| MzLfqerError::IdentificationFileError(self.identifications.clone(), e))?;

        let directory = self.spectra_directory();
        let stems: HashSet<String> = records.iter().map(|r| r.file_stem()).collect();
        let paths = locate_spectra_files(&directory, &stems)?;
        if paths.is_empty() {
            return Err(MzLfqerError::NoSpectraFiles(directory));
        }
        for missing in stems.iter().filter(|s| !paths.contains_key(*s)).sorted() {
            warn!(
                "No spectra file for {missing} in {}, its identifications will be skipped",
                directory.display()
            );
        }

        let design = self.read_design(&directory)?;
        let files: HashMap<&String, Arc<SpectraFileInfo>> = paths
            .iter()
            .map(|(stem, path)| {
                let info = match design.get(stem) {
                    Some(record) => record.file_info(path.clone()),
                    None => {
                        if !design.is_empty() {
                            warn!("{stem} is missing from the experimental design");
                        }
                        SpectraFileInfo::from_path(path.clone())
                    }
                };
                (stem, Arc::new(info))
            })
            .collect();

        let mut registry = HashMap::new();
        let identifications: Vec<Identification> = records
            .iter()
            .filter_map(|record| {
                let file = files.get(&record.file_stem())?;
                let groups = record.protein_groups(&mut registry);
                Some(record.to_identification(file.clone(), groups))
            })
            .collect();
        let spectra_files: Vec<Arc<SpectraFileInfo>> = files.into_values().sorted().collect();
        info!(
            "Loaded {} identifications over {} spectra files and {} protein groups",
            identifications.len(),
            spectra_files.len(),
            registry.len()
        );
        Ok((identifications, spectra_files))
    }

    pub fn main(&self) -> Result<(), MzLfqerError> {
        info!(
            "mzlfqer v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        info!("Identifications: {}", self.identifications.display());
        info!("Output: {}", self.output_dir.display());
        info!(
            "Intensity mode: {} | Match between runs: {}",
            self.intensity_mode, self.match_between_runs
        );
        let params = self.params();
        debug!("{params:?}");
        let start = Instant::now();

        let (identifications, spectra_files) = self.load_identifications()?;
        let results = quantify_spectra_files(identifications, spectra_files, params)?;
        write_results(&results, &self.output_dir)?;

        info!("Total Elapsed Time: {:0.3?}", start.elapsed());
        Ok(())
    }
}
