//! The elution profile of an identified analyte in one run.
use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;

use crate::identification::{Identification, SpectraFileInfo};
use crate::peaks::{to_mass, IsotopicEnvelope};

/// How a [`ChromatographicPeak`] aggregates the intensity of its envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntensityMode {
    /// Use the intensity of the most intense envelope
    #[default]
    Apex,
    /// Sum the intensity of all envelopes
    Integrate,
}

impl From<bool> for IntensityMode {
    fn from(integrate: bool) -> Self {
        if integrate {
            Self::Integrate
        } else {
            Self::Apex
        }
    }
}

/// How an analyte's quantity in a run was arrived at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DetectionType {
    /// Identified by MS/MS in the run and quantified
    MSMS,
    /// Transferred from another run by match-between-runs
    MBR,
    /// Identified by MS/MS but no isotopic envelope was found
    MSMSIdentifiedButNotQuantified,
    /// Identified by MS/MS but the peak is shared with other sequences
    MSMSAmbiguousPeakfinding,
    #[default]
    NotDetected,
}

impl Display for DetectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A collection of isotopic envelopes over retention time attributed to one or more
/// identifications in a single spectra file.
///
/// The derived quantities (intensity, apex, mass error, charge states) are updated
/// every time the envelope list is changed through this type's methods.
#[derive(Debug, Clone)]
pub struct ChromatographicPeak {
    pub identifications: Vec<Arc<Identification>>,
    pub spectra_file_info: Arc<SpectraFileInfo>,
    pub is_mbr_peak: bool,
    /// The match-between-runs score, larger is better. Always `0.0` for peaks found by MS/MS
    pub mbr_score: f64,
    /// The retention time of the valley this peak was last split at, `0.0` if it never was
    pub split_rt: f64,
    pub intensity_mode: IntensityMode,
    isotopic_envelopes: Vec<IsotopicEnvelope>,
    intensity: f64,
    apex: Option<IsotopicEnvelope>,
    mass_error: f64,
    num_charge_states_observed: usize,
    num_identifications_by_base_seq: usize,
    num_identifications_by_full_seq: usize,
}

impl ChromatographicPeak {
    pub fn new(
        identification: Arc<Identification>,
        is_mbr_peak: bool,
        spectra_file_info: Arc<SpectraFileInfo>,
        intensity_mode: IntensityMode,
    ) -> Self {
        Self {
            identifications: vec![identification],
            spectra_file_info,
            is_mbr_peak,
            mbr_score: 0.0,
            split_rt: 0.0,
            intensity_mode,
            isotopic_envelopes: Vec::new(),
            intensity: 0.0,
            apex: None,
            mass_error: f64::NAN,
            num_charge_states_observed: 0,
            num_identifications_by_base_seq: 1,
            num_identifications_by_full_seq: 1,
        }
    }

    #[inline]
    pub fn isotopic_envelopes(&self) -> &[IsotopicEnvelope] {
        &self.isotopic_envelopes
    }

    #[inline]
    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    /// The most intense envelope, `None` if the peak has no envelopes
    #[inline]
    pub fn apex(&self) -> Option<&IsotopicEnvelope> {
        self.apex.as_ref()
    }

    /// The apex mass error in PPM against the closest identification, `NaN` without an apex
    #[inline]
    pub fn mass_error(&self) -> f64 {
        self.mass_error
    }

    #[inline]
    pub fn num_charge_states_observed(&self) -> usize {
        self.num_charge_states_observed
    }

    #[inline]
    pub fn num_identifications_by_base_seq(&self) -> usize {
        self.num_identifications_by_base_seq
    }

    #[inline]
    pub fn num_identifications_by_full_seq(&self) -> usize {
        self.num_identifications_by_full_seq
    }

    /// The first identification, the one the peak was created for
    #[inline]
    pub fn identification(&self) -> &Arc<Identification> {
        &self.identifications[0]
    }

    pub fn detection_type(&self) -> DetectionType {
        if self.is_mbr_peak {
            DetectionType::MBR
        } else if self.intensity > 0.0 {
            DetectionType::MSMS
        } else {
            DetectionType::MSMSIdentifiedButNotQuantified
        }
    }

    /// The retention time of the apex, `0.0` without one
    pub fn apex_retention_time(&self) -> f64 {
        self.apex.map(|a| a.retention_time()).unwrap_or_default()
    }

    /// The first and last retention time of the peak's envelopes
    pub fn rt_span(&self) -> Option<(f64, f64)> {
        self.isotopic_envelopes.iter().fold(None, |acc, e| {
            let rt = e.retention_time();
            match acc {
                None => Some((rt, rt)),
                Some((lo, hi)) => Some((lo.min(rt), hi.max(rt))),
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.isotopic_envelopes.is_empty()
    }

    /// Add envelopes to the peak without updating the derived quantities, for use while
    /// collecting envelopes across several charge states. Callers must follow up with
    /// [`ChromatographicPeak::calculate_intensity`].
    pub(crate) fn extend_envelopes<I: IntoIterator<Item = IsotopicEnvelope>>(&mut self, envelopes: I) {
        self.isotopic_envelopes.extend(envelopes);
    }

    /// Replace the peak's envelopes and update the derived quantities
    pub fn set_envelopes(&mut self, envelopes: Vec<IsotopicEnvelope>) {
        self.isotopic_envelopes = envelopes;
        self.calculate_intensity();
    }

    /// Keep only the envelopes matching `predicate` and update the derived quantities
    pub fn retain_envelopes<F: FnMut(&IsotopicEnvelope) -> bool>(&mut self, predicate: F) {
        self.isotopic_envelopes.retain(predicate);
        self.calculate_intensity();
    }

    /// Scale every envelope's intensity by `normalization_factor` and update the derived
    /// quantities
    pub fn normalize(&mut self, normalization_factor: f64) {
        for envelope in self.isotopic_envelopes.iter_mut() {
            envelope.normalize(normalization_factor);
        }
        self.calculate_intensity();
    }

    /// Recompute the intensity, apex, mass error and number of charge states from the
    /// current envelopes.
    pub fn calculate_intensity(&mut self) {
        self.apex = None;
        for env in self.isotopic_envelopes.iter() {
            if self.apex.is_none_or(|apex| env.intensity() > apex.intensity()) {
                self.apex = Some(*env);
            }
        }

        let Some(apex) = self.apex else {
            self.intensity = 0.0;
            self.mass_error = f64::NAN;
            self.num_charge_states_observed = 0;
            return;
        };

        self.intensity = match self.intensity_mode {
            IntensityMode::Integrate => self.isotopic_envelopes.iter().map(|e| e.intensity()).sum(),
            IntensityMode::Apex => apex.intensity(),
        };

        let apex_mass = to_mass(apex.indexed_peak.mz, apex.charge);
        self.mass_error = self
            .identifications
            .iter()
            .map(|id| {
                let expected = id.peakfinding_mass();
                (apex_mass - expected) / expected * 1e6
            })
            .min_by(|a, b| a.abs().total_cmp(&b.abs()))
            .unwrap_or(f64::NAN);

        self.num_charge_states_observed = self
            .isotopic_envelopes
            .iter()
            .map(|e| e.charge)
            .collect::<HashSet<_>>()
            .len();
    }

    /// Count the distinct sequences this peak is attributed to
    pub fn resolve_identifications(&mut self) {
        self.num_identifications_by_base_seq = self
            .identifications
            .iter()
            .map(|id| id.base_sequence.as_str())
            .collect::<HashSet<_>>()
            .len();
        self.num_identifications_by_full_seq = self
            .identifications
            .iter()
            .map(|id| id.modified_sequence.as_str())
            .collect::<HashSet<_>>()
            .len();
    }

    /// Add an identification unless this exact record is already attributed to the peak
    pub fn add_identification(&mut self, identification: Arc<Identification>) {
        if !self
            .identifications
            .iter()
            .any(|id| Arc::ptr_eq(id, &identification))
        {
            self.identifications.push(identification);
        }
    }

    /// Absorb `other`'s identifications and any of its envelopes whose peaks this peak
    /// does not already contain.
    pub fn merge_feature(&mut self, other: &ChromatographicPeak) {
        for id in other.identifications.iter() {
            self.add_identification(id.clone());
        }
        let known: HashSet<_> = self
            .isotopic_envelopes
            .iter()
            .map(|e| e.indexed_peak)
            .collect();
        self.isotopic_envelopes.extend(
            other
                .isotopic_envelopes
                .iter()
                .filter(|e| !known.contains(&e.indexed_peak))
                .copied(),
        );
        self.resolve_identifications();
        self.calculate_intensity();
    }
}
