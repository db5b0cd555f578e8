/*! Description of isotopic pattern fits, and the machinery to find them in an indexed run */
use mzpeaks::Tolerance;

use crate::identification::Identification;
use crate::index::PeakIndexingEngine;
use crate::isotopic_model::{IsotopeDistribution, NEUTRON_SHIFT};
use crate::peaks::{IndexedPeak, IsotopicEnvelope};
use crate::scorer::{
    DecoyAwareFitFilter, IsotopicFitFilter, IsotopicPatternScorer, PearsonCorrelationScorer,
    ScoreType,
};

/// Describes how well the isotopic peaks around a seed peak follow an expected
/// isotope distribution.
#[derive(Debug, Clone)]
pub struct IsotopicFit {
    /// The peak that was used to seed the isotopic pattern
    pub seed_peak: IndexedPeak,
    /// The charge state of the isotopic pattern fitted
    pub charge: i32,
    /// The observed intensity of each theoretical isotope, `0.0` where none was found
    pub experimental: Vec<f64>,
    /// The score of the isotopes that were found
    pub score: ScoreType,
    /// The score of the isotopes that were found, plus the position one isotope
    /// below the lightest of them
    pub padded_score: ScoreType,
    /// The score of the same walk done one neutron lighter
    pub shifted_left_score: ScoreType,
    /// The score of the same walk done one neutron heavier
    pub shifted_right_score: ScoreType,
}

impl IsotopicFit {
    /// The number of theoretical isotopes that were observed
    #[inline]
    pub fn num_matched_peaks(&self) -> usize {
        self.experimental.iter().filter(|i| **i > 0.0).count()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.experimental.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.experimental.is_empty()
    }

    /// Build the envelope, filling in each missing isotope from the theoretical
    /// abundance and the intensity of the isotope at `reference_index`
    pub fn into_envelope(
        mut self,
        distribution: &IsotopeDistribution,
        reference_index: usize,
    ) -> IsotopicEnvelope {
        let reference = self.experimental[reference_index];
        for (i, intensity) in self.experimental.iter_mut().enumerate() {
            if *intensity == 0.0 {
                *intensity = distribution.abundance(i) * reference;
            }
        }
        IsotopicEnvelope::new(self.seed_peak, self.charge, self.experimental.iter().sum())
    }
}

/// The paired observed and theoretical intensities of one isotope walk
#[derive(Debug, Default, Clone)]
struct IsotopeSeries {
    experimental: Vec<f64>,
    theoretical: Vec<f64>,
    lightest_mass: f64,
}

impl IsotopeSeries {
    fn push(&mut self, experimental: f64, theoretical: f64, mass: f64) {
        if self.experimental.is_empty() || mass < self.lightest_mass {
            self.lightest_mass = mass;
        }
        self.experimental.push(experimental);
        self.theoretical.push(theoretical);
    }

    fn is_empty(&self) -> bool {
        self.experimental.is_empty()
    }
}

/// Finds the isotopic envelopes of an identified analyte among the peaks of a
/// candidate extracted ion chromatogram, verifying each against the analyte's
/// theoretical isotope distribution.
#[derive(Debug, Clone, Copy)]
pub struct IsotopicEnvelopeFitter<'a, S: IsotopicPatternScorer, F: IsotopicFitFilter> {
    pub index: &'a PeakIndexingEngine,
    pub isotope_tolerance: Tolerance,
    pub num_isotopes_required: usize,
    pub scorer: S,
    pub fit_filter: F,
}

impl<'a> IsotopicEnvelopeFitter<'a, PearsonCorrelationScorer, DecoyAwareFitFilter> {
    pub fn new(
        index: &'a PeakIndexingEngine,
        isotope_tolerance: Tolerance,
        num_isotopes_required: usize,
    ) -> Self {
        Self {
            index,
            isotope_tolerance,
            num_isotopes_required,
            scorer: PearsonCorrelationScorer::default(),
            fit_filter: DecoyAwareFitFilter::default(),
        }
    }
}

impl<S: IsotopicPatternScorer, F: IsotopicFitFilter> IsotopicEnvelopeFitter<'_, S, F> {
    /// The position of the isotope used for peak finding within `distribution`
    pub fn peakfinding_index(
        identification: &Identification,
        distribution: &IsotopeDistribution,
    ) -> usize {
        let idx = (identification.peakfinding_mass() - identification.monoisotopic_mass)
            .round()
            .max(0.0) as usize;
        idx.min(distribution.len().saturating_sub(1))
    }

    /// Walk the isotopes of `distribution` away from `peakfinding_index` in one
    /// direction, with every expected mass offset by `shift` neutrons.
    #[allow(clippy::too_many_arguments)]
    fn walk_isotopes(
        &self,
        seed: &IndexedPeak,
        identification: &Identification,
        distribution: &IsotopeDistribution,
        charge: i32,
        mass_error: f64,
        shift: f64,
        start: isize,
        direction: isize,
        series: &mut IsotopeSeries,
        found: Option<&mut Vec<f64>>,
    ) {
        let mut found = found;
        let mut i = start;
        while i >= 0 && (i as usize) < distribution.len() {
            let iu = i as usize;
            let isotope_mass = identification.monoisotopic_mass
                + mass_error
                + distribution.mass_shift(iu)
                + shift * NEUTRON_SHIFT;
            let theoretical = distribution.abundance(iu) * seed.intensity as f64;
            let Some(peak) = self.index.get_indexed_peak(
                isotope_mass,
                seed.scan_index as usize,
                self.isotope_tolerance,
                charge,
            ) else {
                break;
            };
            let observed = peak.intensity as f64;
            if observed < theoretical / 4.0 || observed > theoretical * 4.0 {
                break;
            }
            series.push(observed, theoretical, isotope_mass);
            if let Some(found) = found.as_deref_mut() {
                found[iu] = observed;
            }
            i += direction;
        }
    }

    /// Evaluate the isotopic pattern seeded at `seed`, returning `None` when too few
    /// of the expected isotopes were found.
    pub fn fit_seed(
        &self,
        seed: &IndexedPeak,
        identification: &Identification,
        distribution: &IsotopeDistribution,
        charge: i32,
    ) -> Option<IsotopicFit> {
        let peakfinding_index = Self::peakfinding_index(identification, distribution) as isize;
        let mass_error = seed.neutral_mass(charge) - identification.peakfinding_mass();

        let mut experimental = vec![0.0; distribution.len()];
        let mut series: [IsotopeSeries; 3] = Default::default();
        for (series, shift) in series.iter_mut().zip([-1.0, 0.0, 1.0]) {
            for direction in [-1isize, 1] {
                let start = if direction < 0 {
                    peakfinding_index - 1
                } else {
                    peakfinding_index
                };
                let found = if shift == 0.0 {
                    Some(&mut experimental)
                } else {
                    None
                };
                self.walk_isotopes(
                    seed,
                    identification,
                    distribution,
                    charge,
                    mass_error,
                    shift,
                    start,
                    direction,
                    series,
                    found,
                );
            }
        }

        let matched = experimental.iter().filter(|i| **i > 0.0).count();
        if matched < self.num_isotopes_required {
            return None;
        }

        let score = self
            .scorer
            .score(&series[1].experimental, &series[1].theoretical);

        // Something observed just below the lightest isotope of a series argues that
        // the series belongs to a heavier envelope
        for series in series.iter_mut().filter(|s| !s.is_empty()) {
            let unexpected_mass = series.lightest_mass - NEUTRON_SHIFT;
            let unexpected = self
                .index
                .get_indexed_peak(
                    unexpected_mass,
                    seed.scan_index as usize,
                    self.isotope_tolerance,
                    charge,
                )
                .map(|p| p.intensity as f64)
                .unwrap_or_default();
            series.experimental.push(unexpected);
            series.theoretical.push(0.0);
        }

        let [left, real, right] = &series;
        Some(IsotopicFit {
            seed_peak: *seed,
            charge,
            experimental,
            score,
            padded_score: self.scorer.score(&real.experimental, &real.theoretical),
            shifted_left_score: self.scorer.score(&left.experimental, &left.theoretical),
            shifted_right_score: self.scorer.score(&right.experimental, &right.theoretical),
        })
    }

    /// Find the isotopic envelopes of `identification` at `charge` among the peaks of `xic`.
    pub fn get_isotopic_envelopes(
        &self,
        xic: &[IndexedPeak],
        identification: &Identification,
        distribution: &IsotopeDistribution,
        charge: i32,
    ) -> Vec<IsotopicEnvelope> {
        if distribution.len() < self.num_isotopes_required {
            return Vec::new();
        }
        let reference_index = Self::peakfinding_index(identification, distribution);
        xic.iter()
            .filter_map(|seed| self.fit_seed(seed, identification, distribution, charge))
            .filter(|fit| self.fit_filter.test(fit))
            .map(|fit| fit.into_envelope(distribution, reference_index))
            .collect()
    }
}
