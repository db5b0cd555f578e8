//! Match-between-runs: transfer identifications from runs where an analyte was
//! identified by MS/MS onto runs where it was not, guided by a retention time
//! calibration between each pair of runs.
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mzpeaks::Tolerance;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::chromatographic_peak::ChromatographicPeak;
use crate::engine::QuantificationContext;
use crate::identification::{ProteinGroup, SpectraFileInfo};
use crate::index::Ms1ScanInfo;
use crate::peak_finding::{cut_peak, peakfind};
use crate::peaks::IndexedPeak;
use crate::rt_calibration::{
    interquartile_range, median, standard_deviation, RetentionTimeCalibDataPoint,
    RetentionTimeCalibration,
};

/// How far in donor retention time a calibration point may be from a donor peak to
/// inform where that peak should elute in the acceptor
pub const CALIBRATION_NEIGHBOR_WIDTH: f64 = 0.5;

/// Candidate acceptor peaks, by modified sequence and then by apex peak
pub type HypothesisMap = HashMap<String, HashMap<IndexedPeak, ChromatographicPeak>>;

/// The mass accuracy to search an acceptor run with, derived from the mass errors of
/// its MS/MS-identified peaks and capped at `max_ppm_tolerance`.
///
/// Returns `None` when fewer than three peaks have an apex, in which case the run
/// should not accept transfers.
pub fn mbr_ppm_tolerance(acceptor_peaks: &[ChromatographicPeak], max_ppm_tolerance: f64) -> Option<f64> {
    let ppm_errors: Vec<f64> = acceptor_peaks
        .iter()
        .filter(|p| p.apex().is_some())
        .map(|p| p.mass_error())
        .collect();
    if ppm_errors.len() < 3 {
        return None;
    }
    let spread = if ppm_errors.len() > 30 {
        interquartile_range(&ppm_errors) / 1.36
    } else {
        standard_deviation(&ppm_errors)
    };
    Some((median(&ppm_errors).abs() + 4.0 * spread).min(max_ppm_tolerance))
}

/// The score of an acceptor peak hypothesis from its distance to the expected
/// retention time and log2 intensity. Larger is better.
#[inline]
pub fn mbr_score(rt_error: f64, log2_intensity_error: f64) -> f64 {
    1.0 / rt_error.hypot(log2_intensity_error).max(f64::EPSILON)
}

/// Where an analyte is expected to elute in the acceptor run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionTimeWindow {
    pub center: f64,
    pub width: f64,
}

impl RetentionTimeWindow {
    /// Project `donor_rt` onto the acceptor run through the median shift of `neighbors`.
    ///
    /// The window is `max_width` wide unless the neighbors agree closely enough to
    /// narrow it: six standard deviations for two to five neighbors, or four and a half
    /// interquartile ranges for six or more. Returns `None` without neighbors.
    pub fn from_neighbors(
        donor_rt: f64,
        neighbors: &[RetentionTimeCalibDataPoint<'_>],
        max_width: f64,
    ) -> Option<Self> {
        if neighbors.is_empty() {
            return None;
        }
        let rt_differences: Vec<f64> = neighbors.iter().map(|p| p.rt_difference).collect();
        let mut width = max_width;
        if (2..6).contains(&rt_differences.len()) {
            let sd = standard_deviation(&rt_differences);
            if sd > 0.0 {
                width = sd * 6.0;
            }
        } else if rt_differences.len() >= 6 {
            let iqr = interquartile_range(&rt_differences);
            if iqr > 0.0 {
                width = iqr * 4.5;
            }
        }
        Some(Self {
            center: donor_rt + median(&rt_differences),
            width: width.min(max_width),
        })
    }

    pub fn lower(&self) -> f64 {
        self.center - self.width / 2.0
    }

    pub fn upper(&self) -> f64 {
        self.center + self.width / 2.0
    }
}

/// The inclusive range of scan indices covering `lower` to `upper`: from the last
/// scan at or before `lower` to the first scan at or after `upper`, defaulting to the
/// first and last scans.
pub fn scan_range(scans: &[Ms1ScanInfo], lower: f64, upper: f64) -> Option<(usize, usize)> {
    if scans.is_empty() {
        return None;
    }
    let mut start = 0;
    let mut end = scans.len() - 1;
    for (j, scan) in scans.iter().enumerate() {
        if scan.retention_time <= lower {
            start = j;
        }
        if scan.retention_time >= upper {
            end = j;
            break;
        }
    }
    Some((start, end))
}

/// Record `peak` as a hypothesis. A hypothesis for the same sequence with the same apex
/// absorbs it, summing scores and taking on its identifications.
pub fn insert_hypothesis(hypotheses: &mut HypothesisMap, peak: ChromatographicPeak) {
    let Some(apex) = peak.apex().map(|a| a.indexed_peak) else {
        return;
    };
    let by_apex = hypotheses
        .entry(peak.identification().modified_sequence.clone())
        .or_default();
    match by_apex.entry(apex) {
        Entry::Occupied(mut entry) => {
            let stored = entry.get_mut();
            stored.mbr_score += peak.mbr_score;
            for id in peak.identifications {
                stored.add_identification(id);
            }
        }
        Entry::Vacant(entry) => {
            entry.insert(peak);
        }
    }
}

/// Combine two hypothesis collections
pub fn merge_hypotheses(mut into: HypothesisMap, from: HypothesisMap) -> HypothesisMap {
    for peak in from.into_values().flat_map(|by_apex| by_apex.into_values()) {
        insert_hypothesis(&mut into, peak);
    }
    into
}

/// Pick the highest scoring hypothesis for each sequence not in `identified_sequences`,
/// folding in hypotheses at other charge states that peak inside it.
pub fn select_best_hypotheses(
    hypotheses: HypothesisMap,
    identified_sequences: &HashSet<&str>,
) -> Vec<ChromatographicPeak> {
    let mut by_sequence: Vec<_> = hypotheses
        .into_iter()
        .filter(|(seq, _)| !identified_sequences.contains(seq.as_str()))
        .collect();
    by_sequence.sort_by(|a, b| a.0.cmp(&b.0));

    let mut selected = Vec::with_capacity(by_sequence.len());
    for (_, by_apex) in by_sequence {
        let mut candidates: Vec<ChromatographicPeak> = by_apex.into_values().collect();
        candidates.sort_by(|a, b| {
            b.mbr_score
                .total_cmp(&a.mbr_score)
                .then_with(|| a.apex_retention_time().total_cmp(&b.apex_retention_time()))
        });
        let mut candidates = candidates.into_iter();
        let Some(mut best) = candidates.next() else {
            continue;
        };
        if let (Some((start, end)), Some(best_charge)) =
            (best.rt_span(), best.apex().map(|a| a.charge))
        {
            for other in candidates {
                let Some(apex) = other.apex() else {
                    continue;
                };
                let rt = apex.retention_time();
                if apex.charge != best_charge && rt > start && rt < end {
                    best.merge_feature(&other);
                }
            }
        }
        selected.push(best);
    }
    selected
}

/// Whether the sample `file` belongs to was split into more than one fraction
fn is_fractionated(spectra_files: &[Arc<SpectraFileInfo>], file: &SpectraFileInfo) -> bool {
    spectra_files
        .iter()
        .filter(|f| f.same_sample(file))
        .map(|f| f.fraction)
        .collect::<HashSet<_>>()
        .len()
        > 1
}

/// Match-between-runs onto the acceptor run in `context`, whose index must be loaded.
pub(crate) struct MatchBetweenRuns<'a> {
    pub context: QuantificationContext<'a>,
    pub mbr_tolerance: Tolerance,
    /// Every run in the experiment
    pub spectra_files: &'a [Arc<SpectraFileInfo>],
    /// The peaks found in every run so far
    pub peaks: &'a HashMap<Arc<SpectraFileInfo>, Vec<ChromatographicPeak>>,
}

impl MatchBetweenRuns<'_> {
    /// The protein groups with an MS/MS-identified peptide in any run of the acceptor's condition
    fn msms_identified_proteins(&self) -> HashSet<&ProteinGroup> {
        let acceptor = self.context.file;
        self.peaks
            .iter()
            .filter(|(file, _)| file.condition == acceptor.condition)
            .flat_map(|(_, peaks)| peaks.iter().filter(|p| !p.is_mbr_peak))
            .flat_map(|p| p.identifications.iter())
            .flat_map(|id| id.protein_groups.iter().map(|g| g.as_ref()))
            .collect()
    }

    /// Build the acceptor peaks the analyte of `donor_peak` may correspond to and add
    /// them to `hypotheses`
    fn match_donor_peak(
        &self,
        donor_peak: &ChromatographicPeak,
        curve: &RetentionTimeCalibration<'_>,
        acceptor_apexes: &HashSet<IndexedPeak>,
        same_sample: bool,
        hypotheses: &mut HypothesisMap,
    ) {
        let context = &self.context;
        let params = context.params;
        let Some(donor_apex) = donor_peak.apex().copied() else {
            return;
        };
        let donor_id = donor_peak.identification();
        let Some(distribution) = context.distributions.get(&donor_id.modified_sequence) else {
            return;
        };

        let neighbors = curve.neighbors(donor_apex.retention_time(), CALIBRATION_NEIGHBOR_WIDTH);
        let Some(window) = RetentionTimeWindow::from_neighbors(
            donor_apex.retention_time(),
            &neighbors,
            params.mbr_rt_window,
        ) else {
            return;
        };
        let predicted_log2_intensity = same_sample.then(|| {
            let differences: Vec<f64> = neighbors
                .iter()
                .map(|p| p.log2_intensity_difference())
                .collect();
            donor_peak.intensity().log2() + median(&differences)
        });
        let Some((start, end)) = scan_range(context.scans, window.lower(), window.upper()) else {
            return;
        };

        let mut charges: Vec<i32> = donor_peak
            .identifications
            .iter()
            .map(|id| id.precursor_charge)
            .chain([donor_apex.charge])
            .collect();
        charges.sort_unstable();
        charges.dedup();

        let fitter = context.fitter();
        let mass = donor_id.peakfinding_mass();
        for charge in charges {
            let xic: Vec<IndexedPeak> = (start..=end)
                .filter_map(|j| {
                    context
                        .index
                        .get_indexed_peak(mass, j, self.mbr_tolerance, charge)
                })
                .collect();
            if xic.is_empty() {
                continue;
            }

            // Each envelope in the window seeds a peak, which claims the envelopes it covers
            let mut seeds = fitter.get_isotopic_envelopes(&xic, donor_id, distribution, charge);
            while let Some(seed) = seeds.first().copied() {
                let mut peak = ChromatographicPeak::new(
                    donor_id.clone(),
                    true,
                    context.file.clone(),
                    params.intensity_mode(),
                );
                let seed_xic = peakfind(
                    context.index,
                    context.scans,
                    seed.retention_time(),
                    mass,
                    charge,
                    self.mbr_tolerance,
                    params.missed_scans_allowed,
                );
                peak.set_envelopes(fitter.get_isotopic_envelopes(
                    &seed_xic,
                    donor_id,
                    distribution,
                    charge,
                ));
                cut_peak(
                    &mut peak,
                    seed.retention_time(),
                    params.discrimination_factor_to_cut_peak,
                );

                let mut claimed: HashSet<IndexedPeak> = peak
                    .isotopic_envelopes()
                    .iter()
                    .map(|e| e.indexed_peak)
                    .collect();
                claimed.insert(seed.indexed_peak);
                seeds.retain(|e| !claimed.contains(&e.indexed_peak));

                if acceptor_apexes.contains(&seed.indexed_peak) {
                    continue;
                }
                let Some(apex) = peak.apex().copied() else {
                    continue;
                };
                let rt_error = window.center - apex.retention_time();
                let intensity_error = predicted_log2_intensity
                    .map(|predicted| predicted - peak.intensity().log2())
                    .unwrap_or(1.0);
                peak.mbr_score = mbr_score(rt_error, intensity_error);
                trace!(
                    "Hypothesis for {} at {:0.3} scored {:0.3}",
                    donor_id.modified_sequence,
                    apex.retention_time(),
                    peak.mbr_score
                );
                insert_hypothesis(hypotheses, peak);
            }
        }
    }

    /// Find transferred peaks from every donor run, returning the best hypothesis for
    /// each sequence the acceptor run did not identify by MS/MS
    pub fn run(&self) -> Vec<ChromatographicPeak> {
        let acceptor = self.context.file;
        let acceptor_peaks = self
            .peaks
            .get(acceptor)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let acceptor_apexes: HashSet<IndexedPeak> = acceptor_peaks
            .iter()
            .filter_map(|p| p.apex().map(|a| a.indexed_peak))
            .collect();
        let identified_sequences: HashSet<&str> = acceptor_peaks
            .iter()
            .filter(|p| !p.is_empty())
            .flat_map(|p| p.identifications.iter())
            .map(|id| id.modified_sequence.as_str())
            .collect();
        let msms_proteins = self
            .context
            .params
            .require_msms_id_in_condition
            .then(|| self.msms_identified_proteins());
        let acceptor_fractionated = is_fractionated(self.spectra_files, acceptor);

        let mut hypotheses = HypothesisMap::new();
        for donor in self.spectra_files.iter() {
            if donor == acceptor {
                continue;
            }
            let Some(donor_peaks) = self.peaks.get(donor) else {
                continue;
            };
            if acceptor_fractionated
                && is_fractionated(self.spectra_files, donor)
                && (acceptor.fraction - donor.fraction).abs() > 1
            {
                continue;
            }

            let candidates: Vec<&ChromatographicPeak> = donor_peaks
                .iter()
                .filter(|p| {
                    !p.is_mbr_peak
                        && p.num_identifications_by_full_seq() == 1
                        && !p.is_empty()
                        && !identified_sequences
                            .contains(p.identification().modified_sequence.as_str())
                        && msms_proteins.as_ref().is_none_or(|proteins| {
                            p.identifications
                                .iter()
                                .flat_map(|id| id.protein_groups.iter())
                                .any(|g| proteins.contains(g.as_ref()))
                        })
                })
                .collect();
            if candidates.is_empty() {
                continue;
            }

            let curve = RetentionTimeCalibration::new(donor_peaks, acceptor_peaks);
            if curve.is_empty() {
                debug!(
                    "No shared peptides to align {} onto {}",
                    donor.filename_without_extension, acceptor.filename_without_extension
                );
                continue;
            }
            debug!(
                "Aligning {} candidates from {} with {} calibration points",
                candidates.len(),
                donor.filename_without_extension,
                curve.len()
            );

            let same_sample = donor.same_sample(acceptor);
            let from_donor = candidates
                .par_iter()
                .fold(HypothesisMap::new, |mut local, donor_peak| {
                    self.match_donor_peak(donor_peak, &curve, &acceptor_apexes, same_sample, &mut local);
                    local
                })
                .reduce(HypothesisMap::new, merge_hypotheses);
            hypotheses = merge_hypotheses(hypotheses, from_donor);
        }

        select_best_hypotheses(hypotheses, &identified_sequences)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chromatographic_peak::IntensityMode;
    use crate::identification::Identification;
    use crate::peaks::{to_mz, IsotopicEnvelope};

    macro_rules! assert_is_close {
        ($t1:expr, $t2:expr, $tol:expr, $label:literal) => {
            assert!(
                ($t1 - $t2).abs() < $tol,
                "Observed {} {}, expected {}, difference {}",
                $label,
                $t1,
                $t2,
                $t1 - $t2,
            );
        };
    }

    fn make_hypothesis(
        donor: &Arc<SpectraFileInfo>,
        acceptor: &Arc<SpectraFileInfo>,
        sequence: &str,
        charge: i32,
        scans: &[(u32, f64)],
        score: f64,
    ) -> ChromatographicPeak {
        let id = Arc::new(Identification::new(
            sequence,
            sequence,
            1000.0,
            charge,
            1.0,
            donor.clone(),
            Vec::new(),
        ));
        let mut peak = ChromatographicPeak::new(id, true, acceptor.clone(), IntensityMode::Apex);
        peak.set_envelopes(
            scans
                .iter()
                .map(|(s, i)| {
                    let p = IndexedPeak::new(to_mz(1000.0, charge), *i as f32, *s, *s as f64 / 10.0);
                    IsotopicEnvelope::new(p, charge, *i * charge as f64)
                })
                .collect(),
        );
        peak.mbr_score = score;
        peak
    }

    fn make_scans(n: usize) -> Vec<Ms1ScanInfo> {
        (0..n)
            .map(|i| Ms1ScanInfo::new(i + 1, i, i as f64 * 0.5))
            .collect()
    }

    #[test]
    fn test_score() {
        assert_is_close!(mbr_score(3.0, 4.0), 0.2, 1e-12, "score");
        assert_is_close!(mbr_score(0.0, 1.0), 1.0, 1e-12, "score");
        assert!(mbr_score(0.0, 0.0).is_finite());
        assert!(mbr_score(0.1, 0.0) > mbr_score(0.2, 0.0));
    }

    #[test]
    fn test_scan_range() {
        let scans = make_scans(10);
        assert_eq!(scan_range(&scans, 1.2, 2.6), Some((2, 6)));
        assert_eq!(scan_range(&scans, 1.0, 2.5), Some((2, 5)));
        assert_eq!(scan_range(&scans, -1.0, 100.0), Some((0, 9)));
        assert_eq!(scan_range(&[], 0.0, 1.0), None);
    }

    #[test]
    fn test_ppm_tolerance() {
        let file = Arc::new(SpectraFileInfo::from_path("tolerance.mzML"));
        let mut peaks: Vec<_> = (0..2)
            .map(|i| make_hypothesis(&file, &file, "AAA", 2, &[(i, 100.0)], 0.0))
            .collect();
        assert_eq!(mbr_ppm_tolerance(&peaks, 10.0), None);
        peaks.push(make_hypothesis(&file, &file, "CCC", 2, &[(5, 100.0)], 0.0));
        // Every apex sits at the theoretical mass
        let tol = mbr_ppm_tolerance(&peaks, 10.0).unwrap();
        assert!(tol < 1e-3);
        assert_eq!(mbr_ppm_tolerance(&peaks, 0.0), Some(0.0));
    }

    #[test]
    fn test_colliding_hypotheses_sum() {
        let donor_a = Arc::new(SpectraFileInfo::from_path("donor_a.mzML"));
        let donor_b = Arc::new(SpectraFileInfo::from_path("donor_b.mzML"));
        let acceptor = Arc::new(SpectraFileInfo::from_path("acceptor.mzML"));

        let from_a = make_hypothesis(&donor_a, &acceptor, "PEPTIDE", 2, &[(4, 10.0), (5, 100.0)], 1.5);
        let from_b = make_hypothesis(&donor_b, &acceptor, "PEPTIDE", 2, &[(5, 100.0), (6, 20.0)], 2.0);

        let mut left = HypothesisMap::new();
        insert_hypothesis(&mut left, from_a);
        let mut right = HypothesisMap::new();
        insert_hypothesis(&mut right, from_b);
        let merged = merge_hypotheses(left, right);

        assert_eq!(merged.len(), 1);
        let by_apex = &merged["PEPTIDE"];
        assert_eq!(by_apex.len(), 1);
        let peak = by_apex.values().next().unwrap();
        assert_is_close!(peak.mbr_score, 3.5, 1e-12, "summed score");
        let files: HashSet<_> = peak
            .identifications
            .iter()
            .map(|id| id.file_info.filename_without_extension.clone())
            .collect();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_select_best_hypotheses() {
        let donor = Arc::new(SpectraFileInfo::from_path("donor.mzML"));
        let acceptor = Arc::new(SpectraFileInfo::from_path("acceptor.mzML"));
        let mut hypotheses = HypothesisMap::new();
        for peak in [
            make_hypothesis(&donor, &acceptor, "PEPTIDE", 2, &[(10, 50.0), (12, 100.0), (14, 50.0)], 3.0),
            // Other charge, apex inside the best peak
            make_hypothesis(&donor, &acceptor, "PEPTIDE", 3, &[(11, 30.0), (13, 60.0)], 1.0),
            // Same charge elsewhere
            make_hypothesis(&donor, &acceptor, "PEPTIDE", 2, &[(40, 500.0)], 0.5),
            make_hypothesis(&donor, &acceptor, "KNOWN", 2, &[(20, 500.0)], 9.0),
            make_hypothesis(&donor, &acceptor, "ANOTHER", 2, &[(30, 80.0)], 0.1),
        ] {
            insert_hypothesis(&mut hypotheses, peak);
        }
        let identified: HashSet<&str> = ["KNOWN"].into_iter().collect();
        let selected = select_best_hypotheses(hypotheses, &identified);
        let sequences: Vec<_> = selected
            .iter()
            .map(|p| p.identification().modified_sequence.as_str())
            .collect();
        assert_eq!(sequences, ["ANOTHER", "PEPTIDE"]);
        let best = &selected[1];
        assert_eq!(best.mbr_score, 3.0);
        assert_eq!(best.isotopic_envelopes().len(), 5);
        assert_eq!(best.num_charge_states_observed(), 2);
        assert_eq!(best.apex().unwrap().scan_index(), 12);
    }

    #[test]
    fn test_fractionation() {
        let files: Vec<_> = [
            SpectraFileInfo::new("a_1.mzML", "A", 1, 1, 1),
            SpectraFileInfo::new("a_2.mzML", "A", 1, 2, 1),
            SpectraFileInfo::new("b_1.mzML", "B", 1, 1, 1),
        ]
        .into_iter()
        .map(Arc::new)
        .collect();
        assert!(is_fractionated(&files, &files[0]));
        assert!(!is_fractionated(&files, &files[2]));
    }
}
