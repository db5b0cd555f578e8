//! Extracted ion chromatogram construction and splitting of chromatographic peaks
//! that span more than one eluting species.
use mzpeaks::Tolerance;
use tracing::trace;

use crate::chromatographic_peak::ChromatographicPeak;
use crate::index::{Ms1ScanInfo, PeakIndexingEngine};
use crate::peaks::{IndexedPeak, IsotopicEnvelope};

/// Check whether `experimental` falls within `tolerance` of `theoretical`, inclusive
#[inline]
pub fn within_tolerance(tolerance: Tolerance, experimental: f64, theoretical: f64) -> bool {
    let (lo, hi) = tolerance.bounds(theoretical);
    lo <= experimental && experimental <= hi
}

/// The index of the last MS1 scan eluting strictly before `retention_time`, if any
pub fn scan_index_before(scans: &[Ms1ScanInfo], retention_time: f64) -> Option<usize> {
    scans
        .partition_point(|s| s.retention_time < retention_time)
        .checked_sub(1)
}

/// Build the extracted ion chromatogram of `mass` at `charge` around `anchor_rt`.
///
/// Starting from the last scan before `anchor_rt`, walks forward and then backward
/// through `scans`, stopping a direction once more than `missed_scans_allowed`
/// consecutive scans have no matching peak. The result is sorted by retention time.
pub fn peakfind(
    index: &PeakIndexingEngine,
    scans: &[Ms1ScanInfo],
    anchor_rt: f64,
    mass: f64,
    charge: i32,
    tolerance: Tolerance,
    missed_scans_allowed: usize,
) -> Vec<IndexedPeak> {
    let mut xic = Vec::new();
    let start = scan_index_before(scans, anchor_rt);

    let mut missed_scans = 0;
    for t in start.unwrap_or_default()..scans.len() {
        match index.get_indexed_peak(mass, t, tolerance, charge) {
            Some(peak) => {
                missed_scans = 0;
                xic.push(peak);
            }
            // The anchor scan is not counted against the walk
            None if Some(t) != start => missed_scans += 1,
            None => {}
        }
        if missed_scans > missed_scans_allowed {
            break;
        }
    }

    if let Some(start) = start {
        let mut missed_scans = 0;
        for t in (0..start).rev() {
            match index.get_indexed_peak(mass, t, tolerance, charge) {
                Some(peak) => {
                    missed_scans = 0;
                    xic.push(peak);
                }
                None => missed_scans += 1,
            }
            if missed_scans > missed_scans_allowed {
                break;
            }
        }
    }

    xic.sort_by(|a, b| a.retention_time.total_cmp(&b.retention_time));
    xic
}

/// Find the valley to split at, if any, among `time_points` moving away from
/// `apex_index` in `direction`
fn find_valley(
    time_points: &[IsotopicEnvelope],
    apex_index: usize,
    direction: isize,
    discrimination_factor_to_cut_peak: f64,
) -> Option<IsotopicEnvelope> {
    let n = time_points.len() as isize;
    let mut valley: Option<(usize, IsotopicEnvelope)> = None;
    let mut i = apex_index as isize + direction;
    while i >= 0 && i < n {
        let time_point = time_points[i as usize];
        if valley.is_none_or(|(_, v)| time_point.intensity() < v.intensity()) {
            valley = Some((i as usize, time_point));
        }
        let Some((valley_index, valley_envelope)) = valley else {
            break;
        };

        let discrimination_factor =
            (time_point.intensity() - valley_envelope.intensity()) / time_point.intensity();
        let next = valley_index as isize + direction;
        if discrimination_factor > discrimination_factor_to_cut_peak && next >= 0 && next < n {
            // The intensity must already rise steeply at the point just past the valley,
            // so a slow noisy climb does not split the peak
            let second_valley = time_points[next as usize];
            let discrimination_factor = (second_valley.intensity() - valley_envelope.intensity())
                / second_valley.intensity();
            if discrimination_factor > discrimination_factor_to_cut_peak {
                return Some(valley_envelope);
            }
        }
        i += direction;
    }
    None
}

/// Split `peak` at the first chromatographic valley deep enough to suggest a second
/// eluting species, keeping the side that contains `identification_rt`, and repeat
/// until no such valley remains.
///
/// Only the envelopes at the apex charge state are examined, and at least five are
/// required.
pub fn cut_peak(
    peak: &mut ChromatographicPeak,
    identification_rt: f64,
    discrimination_factor_to_cut_peak: f64,
) {
    loop {
        let Some(apex) = peak.apex().copied() else {
            return;
        };
        let mut time_points: Vec<IsotopicEnvelope> = peak
            .isotopic_envelopes()
            .iter()
            .filter(|e| e.charge == apex.charge)
            .copied()
            .collect();
        if time_points.len() < 5 {
            return;
        }
        time_points.sort_by(|a, b| a.retention_time().total_cmp(&b.retention_time()));
        let Some(apex_index) = time_points.iter().position(|e| e.indexed_peak == apex.indexed_peak)
        else {
            return;
        };

        let valley = [1, -1].into_iter().find_map(|direction| {
            find_valley(
                &time_points,
                apex_index,
                direction,
                discrimination_factor_to_cut_peak,
            )
        });
        let Some(valley) = valley else {
            return;
        };

        let valley_rt = valley.retention_time();
        trace!(
            "Splitting peak for {} at {valley_rt:0.3}",
            peak.identification().modified_sequence
        );
        if identification_rt > valley_rt {
            peak.retain_envelopes(|e| e.retention_time() > valley_rt);
        } else {
            peak.retain_envelopes(|e| e.retention_time() < valley_rt);
        }
        peak.split_rt = valley_rt;
    }
}
