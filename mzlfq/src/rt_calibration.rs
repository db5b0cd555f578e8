//! Retention time alignment between pairs of runs, and the summary statistics
//! used to derive search windows from it.
use std::collections::HashMap;

use num_traits::Float;

use crate::chromatographic_peak::ChromatographicPeak;

/// The median of `values`, the mean of the middle two for an even count. `NaN` when empty.
pub fn median<T: Float>(values: &[T]) -> T {
    if values.is_empty() {
        return T::nan();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / T::from(2.0).unwrap()
    } else {
        sorted[mid]
    }
}

/// The sample standard deviation of `values`. `NaN` for fewer than two values.
pub fn standard_deviation<T: Float>(values: &[T]) -> T {
    let n = values.len();
    if n < 2 {
        return T::nan();
    }
    let nf = T::from(n).unwrap();
    let mean = values.iter().fold(T::zero(), |acc, v| acc + *v) / nf;
    let ss = values
        .iter()
        .fold(T::zero(), |acc, v| (*v - mean).mul_add(*v - mean, acc));
    (ss / (nf - T::one())).sqrt()
}

/// The `tau` quantile of already sorted `values` using the approximately median-unbiased
/// estimator (Hyndman & Fan type 8).
fn sorted_quantile<T: Float>(sorted: &[T], tau: T) -> T {
    let n = T::from(sorted.len()).unwrap();
    let third = T::one() / T::from(3.0).unwrap();
    if tau <= (T::from(2.0).unwrap() * third) / (n + third) {
        return sorted[0];
    }
    if tau >= (n - third) / (n + third) {
        return sorted[sorted.len() - 1];
    }
    let h = (n + third) * tau + third;
    let hf = h.floor();
    let i = hf.to_usize().unwrap_or(1).max(1);
    sorted[i - 1] + (h - hf) * (sorted[i] - sorted[i - 1])
}

/// The distance between the upper and lower quartiles of `values`. `NaN` when empty.
pub fn interquartile_range<T: Float>(values: &[T]) -> T {
    if values.is_empty() {
        return T::nan();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let q1 = sorted_quantile(&sorted, T::from(0.25).unwrap());
    let q3 = sorted_quantile(&sorted, T::from(0.75).unwrap());
    q3 - q1
}

/// The same analyte observed confidently in a donor run and an acceptor run
#[derive(Debug, Clone, Copy)]
pub struct RetentionTimeCalibDataPoint<'a> {
    pub donor: &'a ChromatographicPeak,
    pub acceptor: &'a ChromatographicPeak,
    donor_rt: f64,
    /// The acceptor apex time minus the donor apex time
    pub rt_difference: f64,
}

impl<'a> RetentionTimeCalibDataPoint<'a> {
    /// Pair two peaks, returning `None` if either lacks an apex
    pub fn new(donor: &'a ChromatographicPeak, acceptor: &'a ChromatographicPeak) -> Option<Self> {
        let donor_rt = donor.apex()?.retention_time();
        let acceptor_rt = acceptor.apex()?.retention_time();
        Some(Self {
            donor,
            acceptor,
            donor_rt,
            rt_difference: acceptor_rt - donor_rt,
        })
    }

    #[inline]
    pub fn donor_rt(&self) -> f64 {
        self.donor_rt
    }

    /// The log2 intensity of the acceptor peak minus that of the donor peak
    pub fn log2_intensity_difference(&self) -> f64 {
        self.acceptor.intensity().log2() - self.donor.intensity().log2()
    }
}

/// The most intense unambiguous, MS/MS-identified peak for each sequence in `peaks`
fn best_peaks_by_sequence(peaks: &[ChromatographicPeak]) -> HashMap<&str, &ChromatographicPeak> {
    let mut best: HashMap<&str, &ChromatographicPeak> = HashMap::new();
    for peak in peaks.iter().filter(|p| {
        p.apex().is_some() && !p.is_mbr_peak && p.num_identifications_by_full_seq() == 1
    }) {
        let key = peak.identification().modified_sequence.as_str();
        best.entry(key)
            .and_modify(|current| {
                if peak.intensity() > current.intensity() {
                    *current = peak;
                }
            })
            .or_insert(peak);
    }
    best
}

/// The retention time mapping from one run onto another, built from analytes
/// identified in both and sorted by donor apex time.
#[derive(Debug, Clone, Default)]
pub struct RetentionTimeCalibration<'a> {
    points: Vec<RetentionTimeCalibDataPoint<'a>>,
}

impl<'a> RetentionTimeCalibration<'a> {
    /// Pair the most intense confident peak of each sequence found in both runs
    pub fn new(donor_peaks: &'a [ChromatographicPeak], acceptor_peaks: &'a [ChromatographicPeak]) -> Self {
        let donor_best = best_peaks_by_sequence(donor_peaks);
        let acceptor_best = best_peaks_by_sequence(acceptor_peaks);
        let mut points: Vec<_> = acceptor_best
            .iter()
            .filter_map(|(seq, acceptor)| {
                donor_best
                    .get(seq)
                    .and_then(|donor| RetentionTimeCalibDataPoint::new(*donor, *acceptor))
            })
            .collect();
        points.sort_by(|a, b| a.donor_rt.total_cmp(&b.donor_rt));
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[RetentionTimeCalibDataPoint<'a>] {
        &self.points
    }

    /// The position of the first point at or after `donor_rt`, clamped to the last point
    pub fn search(&self, donor_rt: f64) -> usize {
        let index = self.points.partition_point(|p| p.donor_rt < donor_rt);
        index.min(self.points.len().saturating_sub(1))
    }

    /// All points whose donor apex time is within `width` of `donor_rt`, walking out
    /// from the search position in both directions
    pub fn neighbors(&self, donor_rt: f64, width: f64) -> Vec<RetentionTimeCalibDataPoint<'a>> {
        let index = self.search(donor_rt);
        let within = |p: &&RetentionTimeCalibDataPoint<'a>| (p.donor_rt - donor_rt).abs() < width;
        let forward = self.points.iter().skip(index).take_while(within);
        let backward = self.points[..index.min(self.points.len())]
            .iter()
            .rev()
            .take_while(within);
        forward.chain(backward).copied().collect()
    }
}
