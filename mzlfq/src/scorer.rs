//! Isotopic pattern evaluation tools
use num_traits::Float;

use crate::isotopic_fit::IsotopicFit;

pub type ScoreType = f64;

#[derive(Debug, Clone, Copy)]
pub enum ScoreInterpretation {
    HigherIsBetter,
    LowerIsBetter,
}

/// Scores how well a series of observed isotope intensities follows the
/// theoretical intensities at the same positions.
pub trait IsotopicPatternScorer {
    fn score(&self, experimental: &[f64], theoretical: &[f64]) -> ScoreType;

    fn interpretation(&self) -> ScoreInterpretation {
        ScoreInterpretation::HigherIsBetter
    }
}

/// Compute the [Pearson correlation coefficient](https://en.wikipedia.org/wiki/Pearson_correlation_coefficient)
/// of two equal length series.
///
/// Returns `NaN` when either series has fewer than two points or no variance.
pub fn pearson<T: Float>(x: &[T], y: &[T]) -> T {
    let n = x.len().min(y.len());
    if n < 2 {
        return T::nan();
    }
    let nf = T::from(n).unwrap();
    let mean_x = x[..n].iter().fold(T::zero(), |acc, v| acc + *v) / nf;
    let mean_y = y[..n].iter().fold(T::zero(), |acc, v| acc + *v) / nf;

    let mut cov = T::zero();
    let mut var_x = T::zero();
    let mut var_y = T::zero();
    for (xi, yi) in x.iter().zip(y.iter()) {
        let dx = *xi - mean_x;
        let dy = *yi - mean_y;
        cov = dx.mul_add(dy, cov);
        var_x = dx.mul_add(dx, var_x);
        var_y = dy.mul_add(dy, var_y);
    }
    cov / (var_x * var_y).sqrt()
}

/// Evaluate an isotopic pattern by the linear correlation of observed and expected
/// intensities
///
/// ```math
/// r = \frac{\sum_i (o_i - \bar{o})(e_i - \bar{e})}{\sqrt{\sum_i (o_i - \bar{o})^2 \sum_i (e_i - \bar{e})^2}}
/// ```
///
/// where $`o_i`$ is the intensity of the ith experimental peak
/// and $`e_i`$ is the intensity of the ith theoretical peak.
#[derive(Debug, Default, Clone, Copy)]
pub struct PearsonCorrelationScorer {}

impl IsotopicPatternScorer for PearsonCorrelationScorer {
    #[inline]
    fn score(&self, experimental: &[f64], theoretical: &[f64]) -> ScoreType {
        pearson(experimental, theoretical)
    }
}

/// A type that decides whether an [`IsotopicFit`] is a real isotopic envelope.
pub trait IsotopicFitFilter {
    /// Test if an [`IsotopicFit`] passes the required score threshold, though
    /// it may perform other checks in addition to testing the score.
    fn test(&self, fit: &IsotopicFit) -> bool {
        self.test_score(fit.score)
    }

    /// Test if a score is good enough to satisfy the filter.
    fn test_score(&self, score: ScoreType) -> bool;
}

/// A [`IsotopicFitFilter`] that requires the fit's correlation to exceed `threshold`
/// and to not be beaten by more than `decoy_margin` by either the series shifted
/// down or the series shifted up by one isotope.
///
/// A shifted series fitting as well as the real one means the seed peak could
/// belong to a different isotopic envelope.
#[derive(Debug, Clone, Copy)]
pub struct DecoyAwareFitFilter {
    pub threshold: ScoreType,
    pub decoy_margin: ScoreType,
}

impl DecoyAwareFitFilter {
    pub fn new(threshold: ScoreType, decoy_margin: ScoreType) -> Self {
        Self {
            threshold,
            decoy_margin,
        }
    }
}

impl Default for DecoyAwareFitFilter {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            decoy_margin: 0.1,
        }
    }
}

impl IsotopicFitFilter for DecoyAwareFitFilter {
    fn test(&self, fit: &IsotopicFit) -> bool {
        // A decoy series that cannot be correlated counts as uncorrelated
        let as_decoy = |s: ScoreType| if s.is_nan() { -1.0 } else { s };
        self.test_score(fit.score)
            && as_decoy(fit.shifted_left_score) - fit.padded_score < self.decoy_margin
            && as_decoy(fit.shifted_right_score) - fit.padded_score < self.decoy_margin
    }

    #[inline]
    fn test_score(&self, score: ScoreType) -> bool {
        score > self.threshold
    }
}
