/*! Theoretical isotope distributions for identified peptides */
use std::collections::hash_map::{self, HashMap};

#[doc(hidden)]
pub use chemical_elements::isotopic_pattern::{
    BafflingRecursiveIsotopicPatternGenerator, TheoreticalIsotopicPattern,
};

use chemical_elements::{ChemicalComposition, ElementSpecification, PROTON as _PROTON};

use mzpeaks::{CentroidLike, IntensityMeasurement};
use num_traits::Float;
use tracing::{trace, warn};

use crate::identification::Identification;

pub(crate) fn isclose<T: Float>(a: T, b: T, delta: T) -> bool {
    (a - b).abs() < delta
}

/// The mass of H+, a hydrogen atom minus an electron
pub const PROTON: f64 = _PROTON;

/// The mass difference between isotopes `C[13]` and `C[12]`
pub const NEUTRON_SHIFT: f64 = 1.0033548378;

/// Isotope distributions are truncated to the first isotopes plus any isotope
/// more abundant than this fraction of the most abundant isotope
pub const MINIMUM_RELATIVE_ABUNDANCE: f64 = 0.1;

/// A mass difference from the sequence's mass beyond which the remainder is treated
/// as an unknown modification and filled in with averagine
const UNKNOWN_MASS_DIFFERENCE: f64 = 20.0;

const AVERAGINE: [(&str, f64); 5] = [
    ("C", 4.9384),
    ("H", 7.7583),
    ("N", 1.3577),
    ("O", 1.4773),
    ("S", 0.0417),
];

/// Elemental counts in C, H, N, O, S order
type ElementCounts = [i32; 5];

const WATER: ElementCounts = [0, 2, 0, 1, 0];

fn residue_counts(residue: char) -> Option<ElementCounts> {
    let counts = match residue {
        'G' => [2, 3, 1, 1, 0],
        'A' => [3, 5, 1, 1, 0],
        'S' => [3, 5, 1, 2, 0],
        'P' => [5, 7, 1, 1, 0],
        'V' => [5, 9, 1, 1, 0],
        'T' => [4, 7, 1, 2, 0],
        'C' => [3, 5, 1, 1, 1],
        'L' | 'I' => [6, 11, 1, 1, 0],
        'N' => [4, 6, 2, 2, 0],
        'D' => [4, 5, 1, 3, 0],
        'Q' => [5, 8, 2, 2, 0],
        'K' => [6, 12, 2, 1, 0],
        'E' => [5, 7, 1, 3, 0],
        'M' => [5, 9, 1, 1, 1],
        'H' => [6, 7, 3, 1, 0],
        'F' => [9, 9, 1, 1, 0],
        'R' => [6, 12, 4, 1, 0],
        'Y' => [9, 9, 1, 2, 0],
        'W' => [11, 10, 2, 1, 0],
        _ => return None,
    };
    Some(counts)
}

/// A fractional elemental composition with non-ordinal element counts used to represent
/// "averaged" chemical compositions.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FractionalComposition<'a>(HashMap<ElementSpecification<'a>, f64>);

impl<'a> FromIterator<(ElementSpecification<'a>, f64)> for FractionalComposition<'a> {
    fn from_iter<T: IntoIterator<Item = (ElementSpecification<'a>, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FractionalComposition<'a> {
    #[inline]
    pub fn iter(&self) -> hash_map::Iter<'_, ElementSpecification<'a>, f64> {
        self.0.iter()
    }

    #[inline]
    pub fn mass(&self) -> f64 {
        self.iter()
            .map(|(e, c)| e.element.most_abundant_mass * *c)
            .sum()
    }

    pub fn get(&self, element: &ElementSpecification<'a>) -> f64 {
        self.0.get(element).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The expected isotopes of an analyte as (mass shift from the monoisotopic mass,
/// abundance relative to the most abundant isotope) pairs, in increasing mass order.
///
/// Exactly one entry has an abundance of `1.0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IsotopeDistribution {
    entries: Vec<(f64, f64)>,
}

impl IsotopeDistribution {
    /// Build a distribution from raw (mass shift, abundance) pairs, normalizing the
    /// abundances to the most abundant entry and truncating it to the isotopes worth
    /// searching for.
    pub fn from_raw<I: IntoIterator<Item = (f64, f64)>>(
        raw: I,
        num_isotopes_required: usize,
    ) -> Self {
        let raw: Vec<(f64, f64)> = raw.into_iter().collect();
        let highest = raw.iter().map(|(_, a)| *a).fold(0.0, f64::max);
        if highest <= 0.0 {
            return Self::default();
        }
        let mut entries = Vec::with_capacity(raw.len());
        for (shift, abundance) in raw {
            let abundance = abundance / highest;
            if entries.len() < num_isotopes_required || abundance > MINIMUM_RELATIVE_ABUNDANCE {
                entries.push((shift, abundance));
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (f64, f64)> {
        self.entries.iter()
    }

    pub fn mass_shift(&self, i: usize) -> f64 {
        self.entries[i].0
    }

    pub fn abundance(&self, i: usize) -> f64 {
        self.entries[i].1
    }

    /// The mass shift of the isotope with abundance `1.0`
    pub fn most_abundant_shift(&self) -> f64 {
        self.entries
            .iter()
            .find(|(_, a)| isclose(*a, 1.0, 1e-12))
            .map(|(s, _)| *s)
            .unwrap_or_default()
    }
}

/// The capability to produce a theoretical isotope distribution for an identified analyte
pub trait IsotopeDistributionProvider {
    /// Compute the isotope distribution for `identification`, returning `None` if no
    /// distribution can be produced for it.
    ///
    /// # Arguments
    /// - `identification`: The identified analyte
    /// - `num_isotopes_required`: The minimum number of isotopes the distribution must list
    ///   before low abundance isotopes are dropped
    fn isotope_distribution(
        &mut self,
        identification: &Identification,
        num_isotopes_required: usize,
    ) -> Option<IsotopeDistribution>;
}

/// Pre-computed distributions keyed by modified sequence
impl IsotopeDistributionProvider for HashMap<String, IsotopeDistribution> {
    fn isotope_distribution(
        &mut self,
        identification: &Identification,
        _num_isotopes_required: usize,
    ) -> Option<IsotopeDistribution> {
        self.get(&identification.modified_sequence).cloned()
    }
}

/// Generates isotope distributions for peptides from the elemental composition of
/// their base sequence, filling in any unexplained mass with averagine.
///
/// Sequences with residues outside the twenty standard amino acids are modeled with
/// averagine alone, scaled to the identification's monoisotopic mass. This is the
/// averagine model of Senko [^1].
///
/// # References
/// [^1]: Senko M, Beu S, McLafferty F: Determination of Monoisotopic Masses and Ion
///       Populations for Large Biomolecules from Resolved Isotopic Distributions.
///       Journal of the American Society for Mass Spectrometry 1995, 6:229-233
///       <https://doi.org/10.1016/1044-0305(95)00017-8>
#[derive(Debug, Clone)]
pub struct PeptideIsotopeModel<'lifespan> {
    /// The "average" amino acid composition
    pub averagine: FractionalComposition<'lifespan>,
    /// The mass of the average amino acid
    pub averagine_mass: f64,
    elements: [ElementSpecification<'lifespan>; 5],
    generator: BafflingRecursiveIsotopicPatternGenerator<'lifespan>,
}

impl Default for PeptideIsotopeModel<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'lifespan> PeptideIsotopeModel<'lifespan> {
    pub fn new() -> Self {
        let elements = AVERAGINE.map(|(symbol, _)| {
            ElementSpecification::parse(symbol).expect("Failed to parse element specification")
        });
        let averagine: FractionalComposition = elements
            .iter()
            .zip(AVERAGINE.iter())
            .map(|(e, (_, c))| (*e, *c))
            .collect();
        Self {
            averagine_mass: averagine.mass(),
            averagine,
            elements,
            generator: BafflingRecursiveIsotopicPatternGenerator::new(),
        }
    }

    fn to_composition(&self, counts: &ElementCounts) -> ChemicalComposition<'lifespan> {
        let mut composition = ChemicalComposition::new();
        for (e, c) in self.elements.iter().zip(counts.iter()) {
            composition.set(*e, (*c).max(0));
        }
        composition
    }

    /// The number of each element in `averagines` average amino acids, rounded
    fn averagine_counts(&self, averagines: f64) -> ElementCounts {
        let mut counts = [0; 5];
        for (i, e) in self.elements.iter().enumerate() {
            counts[i] = (self.averagine.get(e) * averagines).round() as i32;
        }
        counts
    }

    /// Scale averagine to `neutral_mass`, correcting the hydrogen count for rounding error
    pub fn scale(&self, neutral_mass: f64) -> ChemicalComposition<'lifespan> {
        let scale = neutral_mass / self.averagine_mass;
        let mut counts = self.averagine_counts(scale);
        let scaled_mass = self.to_composition(&counts).mass();
        let delta = (scaled_mass - neutral_mass).round() as i32;
        let hydrogens = counts[1];
        counts[1] = if hydrogens > delta { hydrogens - delta } else { 0 };
        self.to_composition(&counts)
    }

    /// The elemental composition of `base_sequence` as a free peptide, or `None` if it
    /// contains a non-standard residue
    pub fn sequence_composition(&self, base_sequence: &str) -> Option<ChemicalComposition<'lifespan>> {
        self.sequence_counts(base_sequence)
            .map(|counts| self.to_composition(&counts))
    }

    fn sequence_counts(&self, base_sequence: &str) -> Option<ElementCounts> {
        if base_sequence.is_empty() {
            return None;
        }
        let mut counts = WATER;
        for residue in base_sequence.chars() {
            let rc = residue_counts(residue.to_ascii_uppercase())?;
            counts.iter_mut().zip(rc).for_each(|(a, b)| *a += b);
        }
        Some(counts)
    }

    /// Choose the composition used to model an identification with `monoisotopic_mass`
    pub fn composition_for(
        &self,
        base_sequence: &str,
        monoisotopic_mass: f64,
    ) -> ChemicalComposition<'lifespan> {
        match self.sequence_counts(base_sequence) {
            Some(mut counts) => {
                let mass_diff = monoisotopic_mass - self.to_composition(&counts).mass();
                if mass_diff.abs() > UNKNOWN_MASS_DIFFERENCE {
                    let fill = self.averagine_counts(mass_diff / self.averagine_mass);
                    counts.iter_mut().zip(fill).for_each(|(a, b)| *a += b);
                }
                self.to_composition(&counts)
            }
            None => {
                trace!("Modeling {base_sequence} with averagine");
                self.scale(monoisotopic_mass)
            }
        }
    }

    /// Generate the isotope distribution of `composition`, with mass shifts relative to
    /// its monoisotopic peak
    pub fn distribution_of(
        &mut self,
        composition: ChemicalComposition<'lifespan>,
        num_isotopes_required: usize,
    ) -> IsotopeDistribution {
        let peaks = self
            .generator
            .isotopic_variants(composition, 0, 1, PROTON);
        let pattern = TheoreticalIsotopicPattern::from(peaks);
        let origin = match pattern.iter().next() {
            Some(p) => p.mz(),
            None => return IsotopeDistribution::default(),
        };
        IsotopeDistribution::from_raw(
            pattern
                .iter()
                .map(|p| (p.mz() - origin, p.intensity() as f64)),
            num_isotopes_required,
        )
    }
}

impl IsotopeDistributionProvider for PeptideIsotopeModel<'_> {
    fn isotope_distribution(
        &mut self,
        identification: &Identification,
        num_isotopes_required: usize,
    ) -> Option<IsotopeDistribution> {
        if identification.monoisotopic_mass <= 0.0 {
            warn!(
                "Cannot model the isotopes of {} with mass {}",
                identification.modified_sequence, identification.monoisotopic_mass
            );
            return None;
        }
        let composition = self.composition_for(
            &identification.base_sequence,
            identification.monoisotopic_mass,
        );
        let dist = self.distribution_of(composition, num_isotopes_required);
        if dist.is_empty() {
            None
        } else {
            Some(dist)
        }
    }
}
