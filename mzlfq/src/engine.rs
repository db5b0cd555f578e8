//! High level orchestration of label-free quantification over a set of runs
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use std::thread;

use mzpeaks::Tolerance;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chromatographic_peak::{ChromatographicPeak, IntensityMode};
use crate::error::LfqError;
use crate::identification::{Identification, SpectraFileInfo};
use crate::index::{Ms1ScanInfo, PeakIndexingEngine};
use crate::isotopic_fit::IsotopicEnvelopeFitter;
use crate::isotopic_model::{IsotopeDistribution, IsotopeDistributionProvider};
use crate::mbr::{mbr_ppm_tolerance, MatchBetweenRuns};
use crate::peak_finding::{cut_peak, peakfind, within_tolerance};
use crate::peaks::IndexedPeak;
use crate::results::LfqResults;
use crate::scorer::{DecoyAwareFitFilter, PearsonCorrelationScorer};
use crate::spectra::SpectrumSource;

/// The parameters controlling peak detection, isotope validation and match-between-runs.
///
/// All tolerances are in parts-per-million and all times are in minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LfqParams {
    /// The mass accuracy required of the peaks making up a chromatographic peak
    pub ppm_tolerance: f64,
    /// The wider tolerance used to build extracted ion chromatograms before they are
    /// narrowed to `ppm_tolerance`
    pub peakfinding_ppm_tolerance: f64,
    /// The mass accuracy required of isotopic peaks within an envelope
    pub isotope_ppm_tolerance: f64,
    /// The largest tolerance match-between-runs will use, it is narrowed per run
    pub mbr_ppm_tolerance: f64,
    pub num_isotopes_required: usize,
    /// The number of consecutive scans without a peak an extracted ion chromatogram may bridge
    pub missed_scans_allowed: usize,
    /// How deep a valley must be, relative to the intensity on either side of it, to
    /// split a chromatographic peak
    pub discrimination_factor_to_cut_peak: f64,
    /// The widest retention time window match-between-runs will search
    pub mbr_rt_window: f64,
    /// Sum envelope intensities instead of taking the apex
    pub integrate: bool,
    /// Only search for an identification at its own precursor charge state
    pub id_specific_charge_state: bool,
    pub match_between_runs: bool,
    /// Only transfer peptides whose proteins were identified by MS/MS in the acceptor's condition
    pub require_msms_id_in_condition: bool,
    /// Report the intensity of peaks shared by several sequences
    pub quantify_ambiguous_peptides: bool,
    /// Count peptides shared between protein groups towards protein intensity
    pub use_shared_peptides_for_protein_quant: bool,
    /// The number of worker threads. Values below 1, or at least the number of
    /// processors, mean one fewer than the number of processors.
    pub max_threads: i32,
}

impl Default for LfqParams {
    fn default() -> Self {
        Self {
            ppm_tolerance: 10.0,
            peakfinding_ppm_tolerance: 20.0,
            isotope_ppm_tolerance: 5.0,
            mbr_ppm_tolerance: 10.0,
            num_isotopes_required: 2,
            missed_scans_allowed: 1,
            discrimination_factor_to_cut_peak: 0.6,
            mbr_rt_window: 2.5,
            integrate: false,
            id_specific_charge_state: false,
            match_between_runs: false,
            require_msms_id_in_condition: false,
            quantify_ambiguous_peptides: false,
            use_shared_peptides_for_protein_quant: false,
            max_threads: -1,
        }
    }
}

impl LfqParams {
    pub fn intensity_mode(&self) -> IntensityMode {
        self.integrate.into()
    }

    /// Resolve [`LfqParams::max_threads`] against the number of available processors
    pub fn num_threads(&self) -> usize {
        let processors = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let requested = self.max_threads;
        if requested < 1 || requested as usize >= processors {
            processors.saturating_sub(1).max(1)
        } else {
            requested as usize
        }
    }
}

/// The pieces of state needed to quantify identifications in one run, shared
/// read-only between worker threads.
#[derive(Clone, Copy)]
pub(crate) struct QuantificationContext<'a> {
    pub params: &'a LfqParams,
    pub index: &'a PeakIndexingEngine,
    pub scans: &'a [Ms1ScanInfo],
    pub distributions: &'a HashMap<String, IsotopeDistribution>,
    pub file: &'a Arc<SpectraFileInfo>,
}

impl<'a> QuantificationContext<'a> {
    pub fn fitter(&self) -> IsotopicEnvelopeFitter<'a, PearsonCorrelationScorer, DecoyAwareFitFilter> {
        IsotopicEnvelopeFitter::new(
            self.index,
            Tolerance::PPM(self.params.isotope_ppm_tolerance),
            self.params.num_isotopes_required,
        )
    }

    /// Build the chromatographic peak for an MS/MS identification in this run
    pub fn quantify_identification(
        &self,
        identification: &Arc<Identification>,
        charge_states: &[i32],
    ) -> ChromatographicPeak {
        let params = self.params;
        let mut peak = ChromatographicPeak::new(
            identification.clone(),
            false,
            self.file.clone(),
            params.intensity_mode(),
        );
        let Some(distribution) = self.distributions.get(&identification.modified_sequence) else {
            return peak;
        };

        let fitter = self.fitter();
        let peakfinding_mass = identification.peakfinding_mass();
        let ppm_tolerance = Tolerance::PPM(params.ppm_tolerance);
        for &charge in charge_states {
            if params.id_specific_charge_state && charge != identification.precursor_charge {
                continue;
            }
            let xic: Vec<IndexedPeak> = peakfind(
                self.index,
                self.scans,
                identification.ms2_retention_time,
                peakfinding_mass,
                charge,
                Tolerance::PPM(params.peakfinding_ppm_tolerance),
                params.missed_scans_allowed,
            )
            .into_iter()
            .filter(|p| within_tolerance(ppm_tolerance, p.neutral_mass(charge), peakfinding_mass))
            .collect();
            peak.extend_envelopes(fitter.get_isotopic_envelopes(
                &xic,
                identification,
                distribution,
                charge,
            ));
        }

        peak.calculate_intensity();
        cut_peak(
            &mut peak,
            identification.ms2_retention_time,
            params.discrimination_factor_to_cut_peak,
        );
        if peak.is_empty() {
            return peak;
        }

        // Other charge states only count where the precursor charge state was seen
        let precursor_scans = peak
            .isotopic_envelopes()
            .iter()
            .filter(|e| e.charge == identification.precursor_charge)
            .map(|e| e.scan_index())
            .fold(None, |acc: Option<(u32, u32)>, s| match acc {
                None => Some((s, s)),
                Some((lo, hi)) => Some((lo.min(s), hi.max(s))),
            });
        match precursor_scans {
            Some((lo, hi)) => {
                peak.retain_envelopes(|e| e.scan_index() >= lo && e.scan_index() <= hi);
            }
            None => {
                peak.set_envelopes(Vec::new());
            }
        }
        peak
    }
}

/// Resolve peaks that share an apex peak, merging or discarding duplicates.
///
/// MS/MS peaks sharing an apex merge. A match-between-runs peak sharing an apex with
/// an MS/MS peak is dropped. Two match-between-runs peaks sharing an apex merge if
/// they are for the same sequence, otherwise the higher scoring one is kept.
/// Match-between-runs peaks without any envelopes are dropped.
pub fn run_error_checking(peaks: Vec<ChromatographicPeak>) -> Vec<ChromatographicPeak> {
    let mut peaks = peaks;
    peaks.retain(|p| !(p.is_mbr_peak && p.is_empty()));
    peaks.sort_by_key(|p| p.is_mbr_peak);

    let mut checked = Vec::new();
    let mut kept: Vec<ChromatographicPeak> = Vec::with_capacity(peaks.len());
    let mut apex_to_peak: HashMap<IndexedPeak, usize> = HashMap::with_capacity(peaks.len());
    for mut peak in peaks {
        peak.calculate_intensity();
        peak.resolve_identifications();
        let Some(apex) = peak.apex().map(|a| a.indexed_peak) else {
            if !peak.is_mbr_peak {
                checked.push(peak);
            }
            continue;
        };
        let Some(&i) = apex_to_peak.get(&apex) else {
            apex_to_peak.insert(apex, kept.len());
            kept.push(peak);
            continue;
        };
        let stored = &mut kept[i];
        match (peak.is_mbr_peak, stored.is_mbr_peak) {
            (false, false) => stored.merge_feature(&peak),
            (true, true) => {
                if peak.identification().modified_sequence
                    == stored.identification().modified_sequence
                {
                    stored.merge_feature(&peak);
                } else if peak.mbr_score > stored.mbr_score {
                    *stored = peak;
                }
            }
            _ => {}
        }
    }
    checked.extend(kept.into_iter().filter(|p| p.apex().is_some()));
    checked
}

/// Quantifies identified peptides across a set of runs.
///
/// The engine holds at most one run's peak index in memory at a time. When
/// match-between-runs is enabled, each run's index is written next to its spectra
/// file after the MS/MS-driven pass and read back when that run accepts transfers.
pub struct LfqEngine<S: SpectrumSource, P: IsotopeDistributionProvider> {
    pub params: LfqParams,
    spectrum_source: S,
    isotope_model: P,
    identifications: Vec<Arc<Identification>>,
    spectra_files: Vec<Arc<SpectraFileInfo>>,
    distributions: HashMap<String, IsotopeDistribution>,
    index: PeakIndexingEngine,
    thread_pool: rayon::ThreadPool,
}

impl<S: SpectrumSource, P: IsotopeDistributionProvider> LfqEngine<S, P> {
    /// Create an engine over `identifications`. The runs to quantify are the distinct
    /// spectra files the identifications refer to.
    pub fn new(
        params: LfqParams,
        identifications: Vec<Identification>,
        spectrum_source: S,
        isotope_model: P,
    ) -> Result<Self, LfqError> {
        let mut spectra_files: Vec<Arc<SpectraFileInfo>> = identifications
            .iter()
            .map(|id| id.file_info.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        spectra_files.sort();
        Self::with_spectra_files(params, identifications, spectra_files, spectrum_source, isotope_model)
    }

    /// Create an engine over `identifications` and an explicit list of runs, which may
    /// include runs without any identifications.
    pub fn with_spectra_files(
        params: LfqParams,
        identifications: Vec<Identification>,
        spectra_files: Vec<Arc<SpectraFileInfo>>,
        spectrum_source: S,
        isotope_model: P,
    ) -> Result<Self, LfqError> {
        let num_threads = params.num_threads();
        debug!("Using {num_threads} threads");
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| LfqError::QuantificationFailed(e.to_string()))?;
        let mut this = Self {
            params,
            spectrum_source,
            isotope_model,
            identifications: Vec::new(),
            spectra_files,
            distributions: HashMap::new(),
            index: PeakIndexingEngine::new(),
            thread_pool,
        };
        this.identifications = this.calculate_theoretical_isotope_distributions(identifications);
        Ok(this)
    }

    pub fn spectra_files(&self) -> &[Arc<SpectraFileInfo>] {
        &self.spectra_files
    }

    pub fn identifications(&self) -> &[Arc<Identification>] {
        &self.identifications
    }

    /// Compute the isotope distribution of each distinct modified sequence and set
    /// every identification's peak finding mass from it
    fn calculate_theoretical_isotope_distributions(
        &mut self,
        identifications: Vec<Identification>,
    ) -> Vec<Arc<Identification>> {
        let num_isotopes_required = self.params.num_isotopes_required;
        let mut failed: HashSet<String> = HashSet::new();
        let mut out = Vec::with_capacity(identifications.len());
        for mut id in identifications {
            if !self.distributions.contains_key(&id.modified_sequence)
                && !failed.contains(&id.modified_sequence)
            {
                match self
                    .isotope_model
                    .isotope_distribution(&id, num_isotopes_required)
                {
                    Some(dist) => {
                        self.distributions.insert(id.modified_sequence.clone(), dist);
                    }
                    None => {
                        warn!(
                            "No isotope distribution for {}, it will not be quantified",
                            id.modified_sequence
                        );
                        failed.insert(id.modified_sequence.clone());
                    }
                }
            }
            if let Some(dist) = self.distributions.get(&id.modified_sequence) {
                id.set_peakfinding_mass(id.monoisotopic_mass + dist.most_abundant_shift());
            }
            out.push(Arc::new(id));
        }
        debug!(
            "Computed {} isotope distributions",
            self.distributions.len()
        );
        out
    }

    /// The range of charge states to search, over all identifications
    fn charge_states(&self) -> Vec<i32> {
        let lo = self.identifications.iter().map(|id| id.precursor_charge).min();
        let hi = self.identifications.iter().map(|id| id.precursor_charge).max();
        match (lo, hi) {
            (Some(lo), Some(hi)) => (lo..=hi).collect(),
            _ => Vec::new(),
        }
    }

    /// Find the chromatographic peak of every MS/MS identification in `file`, in parallel.
    /// The run's index must already be built.
    fn quantify_ms2_identified_peptides(
        &self,
        file: &Arc<SpectraFileInfo>,
        charge_states: &[i32],
    ) -> Vec<ChromatographicPeak> {
        let identifications: Vec<&Arc<Identification>> = self
            .identifications
            .iter()
            .filter(|id| id.file_info == *file)
            .collect();
        let context = QuantificationContext {
            params: &self.params,
            index: &self.index,
            scans: self.index.ms1_scans(file),
            distributions: &self.distributions,
            file,
        };
        self.thread_pool.install(|| {
            identifications
                .par_iter()
                .map(|id| context.quantify_identification(id, charge_states))
                .collect()
        })
    }

    /// Run quantification over every run, then match-between-runs if enabled, and
    /// summarize the results by peptide and protein
    pub fn run(&mut self) -> Result<LfqResults, LfqError> {
        if self.identifications.is_empty() {
            return Err(LfqError::IdentificationError(
                "No identifications to quantify".into(),
            ));
        }
        info!(
            "Quantifying {} identifications across {} spectra files",
            self.identifications.len(),
            self.spectra_files.len()
        );
        let mut results = LfqResults::new(self.spectra_files.clone(), &self.identifications);
        let charge_states = self.charge_states();
        let mut indexed_files = Vec::with_capacity(self.spectra_files.len());

        for file in self.spectra_files.clone() {
            info!("Quantifying {}", file.filename_without_extension);
            if !self
                .index
                .index_mass_spectral_peaks(&file, &self.spectrum_source)
            {
                warn!(
                    "Skipping {}, it could not be indexed",
                    file.filename_without_extension
                );
                continue;
            }
            let peaks = self.quantify_ms2_identified_peptides(&file, &charge_states);
            if self.params.match_between_runs {
                self.index.serialize_index(&file)?;
            }
            self.index.clear_index();
            let peaks = run_error_checking(peaks);
            info!(
                "Found {} peaks in {}",
                peaks.len(),
                file.filename_without_extension
            );
            results.peaks.insert(file.clone(), peaks);
            indexed_files.push(file);
        }

        if self.params.match_between_runs {
            for acceptor in indexed_files.iter() {
                self.quantify_match_between_runs_peaks(acceptor, &mut results)?;
            }
        }

        results.calculate_peptide_results(self.params.quantify_ambiguous_peptides);
        results.calculate_protein_results_top3(self.params.use_shared_peptides_for_protein_quant);
        info!("Quantification complete");
        Ok(results)
    }

    /// Transfer identifications from every other run onto `acceptor`
    fn quantify_match_between_runs_peaks(
        &mut self,
        acceptor: &Arc<SpectraFileInfo>,
        results: &mut LfqResults,
    ) -> Result<(), LfqError> {
        let acceptor_peaks = results.peaks.get(acceptor).map(Vec::as_slice).unwrap_or_default();
        let Some(mbr_tolerance) = mbr_ppm_tolerance(acceptor_peaks, self.params.mbr_ppm_tolerance)
        else {
            debug!(
                "Too few quantified peaks in {} for match-between-runs",
                acceptor.filename_without_extension
            );
            let path = acceptor.index_artifact_path();
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove index artifact {}: {e}", path.display());
            }
            return Ok(());
        };
        info!(
            "Matching between runs into {} at {mbr_tolerance:0.2} ppm",
            acceptor.filename_without_extension
        );
        self.index.deserialize_index(acceptor)?;

        let mbr = MatchBetweenRuns {
            context: QuantificationContext {
                params: &self.params,
                index: &self.index,
                scans: self.index.ms1_scans(acceptor),
                distributions: &self.distributions,
                file: acceptor,
            },
            mbr_tolerance: Tolerance::PPM(mbr_tolerance),
            spectra_files: &self.spectra_files,
            peaks: &results.peaks,
        };
        let new_peaks = self.thread_pool.install(|| mbr.run());
        self.index.clear_index();

        debug!(
            "Transferred {} peaks into {}",
            new_peaks.len(),
            acceptor.filename_without_extension
        );
        let peaks = results.peaks.remove(acceptor).unwrap_or_default();
        let peaks = run_error_checking(peaks.into_iter().chain(new_peaks).collect());
        results.peaks.insert(acceptor.clone(), peaks);
        Ok(())
    }
}
