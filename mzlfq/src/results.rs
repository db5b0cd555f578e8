//! The peaks found in each run, summarized by peptide and by protein group, and
//! their tab-separated renderings.
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;

use itertools::Itertools;

use crate::chromatographic_peak::{ChromatographicPeak, DetectionType};
use crate::error::LfqError;
use crate::identification::{Identification, ProteinGroup, SpectraFileInfo};

/// The share of a peptide's intensity an ambiguous peak must hold to mark it ambiguous
const AMBIGUOUS_FRACTION_THRESHOLD: f64 = 0.3;

/// The number of most intense peptides summed into a protein group's intensity
const TOP_N_PEPTIDES: usize = 3;

/// A peptide's quantity in one run
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PeptideQuantity {
    pub intensity: f64,
    pub retention_time: f64,
    pub detection_type: DetectionType,
}

/// A modified sequence and its quantity in each run
#[derive(Debug, Clone)]
pub struct Peptide {
    pub sequence: String,
    pub base_sequence: String,
    pub protein_groups: Vec<Arc<ProteinGroup>>,
    pub use_for_protein_quant: bool,
    quantities: HashMap<Arc<SpectraFileInfo>, PeptideQuantity>,
}

impl Peptide {
    pub fn new(identification: &Identification) -> Self {
        Self {
            sequence: identification.modified_sequence.clone(),
            base_sequence: identification.base_sequence.clone(),
            protein_groups: identification.protein_groups.iter().unique().cloned().collect(),
            use_for_protein_quant: identification.use_for_protein_quant,
            quantities: HashMap::new(),
        }
    }

    fn add_protein_groups(&mut self, protein_groups: &[Arc<ProteinGroup>]) {
        for group in protein_groups {
            if !self.protein_groups.contains(group) {
                self.protein_groups.push(group.clone());
            }
        }
    }

    /// The peptide's quantity in `file`, not detected if it was never set
    pub fn quantity(&self, file: &SpectraFileInfo) -> PeptideQuantity {
        self.quantities.get(file).copied().unwrap_or_default()
    }

    pub fn intensity(&self, file: &SpectraFileInfo) -> f64 {
        self.quantity(file).intensity
    }

    pub fn detection_type(&self, file: &SpectraFileInfo) -> DetectionType {
        self.quantity(file).detection_type
    }

    fn quantity_mut(&mut self, file: &Arc<SpectraFileInfo>) -> &mut PeptideQuantity {
        self.quantities.entry(file.clone()).or_default()
    }

    /// Whether the peptide was quantified somewhere and was not ambiguous everywhere
    pub fn unambiguous_peptide_quant(&self) -> bool {
        self.quantities.values().any(|q| q.intensity > 0.0)
            && self
                .quantities
                .values()
                .any(|q| q.detection_type != DetectionType::MSMSAmbiguousPeakfinding)
    }
}

/// A protein group and its quantity in each run
#[derive(Debug, Clone)]
pub struct ProteinQuantity {
    pub protein_group: Arc<ProteinGroup>,
    intensities: HashMap<Arc<SpectraFileInfo>, f64>,
}

impl ProteinQuantity {
    pub fn new(protein_group: Arc<ProteinGroup>) -> Self {
        Self {
            protein_group,
            intensities: HashMap::new(),
        }
    }

    pub fn intensity(&self, file: &SpectraFileInfo) -> f64 {
        self.intensities.get(file).copied().unwrap_or_default()
    }
}

/// Join the distinct values of `values` with `separator`, or take the only one
fn join_if_many<'a, I: Iterator<Item = &'a str> + Clone>(mut values: I, separator: &str) -> String {
    if values.clone().unique().count() > 1 {
        values.join(separator)
    } else {
        values.take(1).collect()
    }
}

fn tsv_writer<W: io::Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .flexible(false)
        .from_writer(writer)
}

/// The outcome of quantifying a set of runs.
#[derive(Debug, Clone, Default)]
pub struct LfqResults {
    pub spectra_files: Vec<Arc<SpectraFileInfo>>,
    pub peaks: HashMap<Arc<SpectraFileInfo>, Vec<ChromatographicPeak>>,
    /// By modified sequence
    pub peptides: BTreeMap<String, Peptide>,
    /// By protein group name
    pub protein_groups: BTreeMap<String, ProteinQuantity>,
}

impl LfqResults {
    pub fn new(spectra_files: Vec<Arc<SpectraFileInfo>>, identifications: &[Arc<Identification>]) -> Self {
        let peaks = spectra_files
            .iter()
            .map(|f| (f.clone(), Vec::new()))
            .collect();
        let mut peptides: BTreeMap<String, Peptide> = BTreeMap::new();
        let mut protein_groups = BTreeMap::new();
        for id in identifications {
            peptides
                .entry(id.modified_sequence.clone())
                .and_modify(|p| p.add_protein_groups(&id.protein_groups))
                .or_insert_with(|| Peptide::new(id));
            for group in id.protein_groups.iter() {
                protein_groups
                    .entry(group.name.clone())
                    .or_insert_with(|| ProteinQuantity::new(group.clone()));
            }
        }
        Self {
            spectra_files,
            peaks,
            peptides,
            protein_groups,
        }
    }

    /// Set each peptide's intensity, apex time and detection type in each run from
    /// the peaks attributed to it.
    ///
    /// The most intense peak attributed only to a sequence decides its quantity. A peak
    /// shared with other sequences holding a large enough share of a sequence's
    /// intensity marks it ambiguous, zeroing its intensity unless
    /// `quantify_ambiguous_peptides` is set.
    pub fn calculate_peptide_results(&mut self, quantify_ambiguous_peptides: bool) {
        for peptide in self.peptides.values_mut() {
            for file in self.spectra_files.iter() {
                *peptide.quantity_mut(file) = PeptideQuantity::default();
            }
        }

        for file in self.spectra_files.iter() {
            let Some(peaks) = self.peaks.get(file) else {
                continue;
            };

            let mut by_sequence: HashMap<&str, &ChromatographicPeak> = HashMap::new();
            for peak in peaks.iter().filter(|p| p.num_identifications_by_full_seq() == 1) {
                by_sequence
                    .entry(peak.identification().modified_sequence.as_str())
                    .and_modify(|best| {
                        if peak.intensity() > best.intensity() {
                            *best = peak;
                        }
                    })
                    .or_insert(peak);
            }

            for (sequence, best) in by_sequence {
                let Some(peptide) = self.peptides.get_mut(sequence) else {
                    continue;
                };
                let intensity = best.intensity();
                let detection_type = match (best.is_mbr_peak, intensity > 0.0) {
                    (true, true) => DetectionType::MBR,
                    (false, true) => DetectionType::MSMS,
                    (false, false) => DetectionType::MSMSIdentifiedButNotQuantified,
                    (true, false) => DetectionType::NotDetected,
                };
                *peptide.quantity_mut(file) = PeptideQuantity {
                    intensity,
                    retention_time: best.apex_retention_time(),
                    detection_type,
                };
            }

            for peak in peaks.iter().filter(|p| p.num_identifications_by_full_seq() > 1) {
                for id in peak.identifications.iter() {
                    let Some(peptide) = self.peptides.get_mut(&id.modified_sequence) else {
                        continue;
                    };
                    let quantity = peptide.quantity_mut(file);
                    let fraction_ambiguous = peak.intensity() / (quantity.intensity + peak.intensity());
                    if quantify_ambiguous_peptides {
                        if quantity.intensity.abs() < 0.01 {
                            *quantity = PeptideQuantity {
                                intensity: peak.intensity(),
                                retention_time: peak.apex_retention_time(),
                                detection_type: DetectionType::MSMSAmbiguousPeakfinding,
                            };
                        } else if fraction_ambiguous > AMBIGUOUS_FRACTION_THRESHOLD {
                            quantity.detection_type = DetectionType::MSMSAmbiguousPeakfinding;
                        }
                    } else if fraction_ambiguous > AMBIGUOUS_FRACTION_THRESHOLD {
                        *quantity = PeptideQuantity {
                            intensity: 0.0,
                            retention_time: peak.apex_retention_time(),
                            detection_type: DetectionType::MSMSAmbiguousPeakfinding,
                        };
                    }
                }
            }
        }

        if !quantify_ambiguous_peptides {
            self.handle_ambiguity_in_fractions();
        }
    }

    /// In fractionated samples, zero every fraction of a peptide whose most intense
    /// fraction is ambiguous
    fn handle_ambiguity_in_fractions(&mut self) {
        let samples = self
            .spectra_files
            .iter()
            .into_group_map_by(|f| (f.condition.clone(), f.biological_replicate));

        for files in samples.into_values() {
            if files.iter().map(|f| f.fraction).unique().count() == 1 {
                continue;
            }

            // By position in `files` and modified sequence
            let mut summed_intensity: HashMap<(usize, &str), f64> = HashMap::new();
            for (i, file) in files.iter().enumerate() {
                for peak in self.peaks.get(*file).into_iter().flatten() {
                    for id in peak.identifications.iter() {
                        *summed_intensity
                            .entry((i, id.modified_sequence.as_str()))
                            .or_default() += peak.intensity();
                    }
                }
            }

            for peptide in self.peptides.values_mut() {
                let mut ambiguity_observed = false;
                let fractions: Vec<(f64, DetectionType)> = files
                    .iter()
                    .enumerate()
                    .map(|(i, file)| {
                        let quantity = peptide.quantity(file);
                        if quantity.detection_type == DetectionType::MSMSAmbiguousPeakfinding {
                            ambiguity_observed = true;
                            let summed = summed_intensity
                                .get(&(i, peptide.sequence.as_str()))
                                .copied()
                                .unwrap_or_default();
                            (summed, quantity.detection_type)
                        } else {
                            (quantity.intensity, quantity.detection_type)
                        }
                    })
                    .collect();
                if !ambiguity_observed {
                    continue;
                }
                let most_intense = fractions
                    .iter()
                    .fold(None, |best: Option<&(f64, DetectionType)>, current| match best {
                        Some(b) if b.0 >= current.0 => Some(b),
                        _ => Some(current),
                    });
                if most_intense.is_some_and(|(_, t)| *t == DetectionType::MSMSAmbiguousPeakfinding) {
                    for file in files.iter() {
                        peptide.quantity_mut(file).intensity = 0.0;
                    }
                }
            }
        }
    }

    /// Set each protein group's intensity in each run to the sum of its three most
    /// intense peptides there.
    ///
    /// Only peptides flagged for protein quantification whose quantity is not wholly
    /// ambiguous contribute. Peptides shared between protein groups contribute only if
    /// `use_shared_peptides` is set.
    pub fn calculate_protein_results_top3(&mut self, use_shared_peptides: bool) {
        let mut peptides_by_protein: HashMap<&str, Vec<&Peptide>> = HashMap::new();
        for peptide in self
            .peptides
            .values()
            .filter(|p| p.unambiguous_peptide_quant() && p.use_for_protein_quant)
        {
            for group in peptide.protein_groups.iter() {
                peptides_by_protein
                    .entry(group.name.as_str())
                    .or_default()
                    .push(peptide);
            }
        }

        for (name, protein) in self.protein_groups.iter_mut() {
            let peptides = peptides_by_protein.get(name.as_str());
            for file in self.spectra_files.iter() {
                let intensity: f64 = peptides
                    .into_iter()
                    .flatten()
                    .filter(|p| p.protein_groups.len() == 1 || use_shared_peptides)
                    .map(|p| p.intensity(file))
                    .sorted_by(|a, b| b.total_cmp(a))
                    .take(TOP_N_PEPTIDES)
                    .fold(0.0, |acc, x| acc + x);
                protein.intensities.insert(file.clone(), intensity);
            }
        }
    }

    /// Write one row per chromatographic peak, ordered by file name and then by
    /// decreasing intensity
    pub fn write_peaks<W: io::Write>(&self, writer: W) -> Result<(), LfqError> {
        let mut writer = tsv_writer(writer);
        writer.write_record([
            "File Name",
            "Base Sequence",
            "Full Sequence",
            "Protein Group",
            "Peptide Monoisotopic Mass",
            "MS2 Retention Time",
            "Precursor Charge",
            "Theoretical MZ",
            "Peak intensity",
            "Peak RT Start",
            "Peak RT Apex",
            "Peak RT End",
            "Peak MZ",
            "Peak Charge",
            "Num Charge States Observed",
            "Peak Detection Type",
            "MBR Score",
            "PSMs Mapped",
            "Base Sequences Mapped",
            "Full Sequences Mapped",
            "Peak Split Valley RT",
            "Peak Apex Mass Error (ppm)",
        ])?;

        let peaks = self
            .peaks
            .values()
            .flatten()
            .sorted_by(|a, b| {
                a.spectra_file_info
                    .filename_without_extension
                    .cmp(&b.spectra_file_info.filename_without_extension)
                    .then_with(|| b.intensity().total_cmp(&a.intensity()))
            });
        for peak in peaks {
            writer.write_record(peak_record(peak))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write one row per peptide with its intensity, apex time and detection type in
    /// each run
    pub fn write_peptides<W: io::Write>(&self, writer: W) -> Result<(), LfqError> {
        let mut writer = tsv_writer(writer);
        let mut header: Vec<String> = ["Sequence", "Base Sequence", "Protein Groups", "Gene Names", "Organism"]
            .into_iter()
            .map(String::from)
            .collect();
        for prefix in ["Intensity_", "RetentionTime (min)_", "Detection Type_"] {
            header.extend(
                self.spectra_files
                    .iter()
                    .map(|f| format!("{prefix}{}", f.filename_without_extension)),
            );
        }
        writer.write_record(&header)?;

        for peptide in self.peptides.values() {
            let groups: Vec<&ProteinGroup> = peptide
                .protein_groups
                .iter()
                .map(|g| g.as_ref())
                .sorted_by(|a, b| a.name.cmp(&b.name))
                .collect();
            let mut record = vec![
                peptide.sequence.clone(),
                peptide.base_sequence.clone(),
                join_if_many(groups.iter().map(|g| g.name.as_str()), ";"),
                join_if_many(groups.iter().map(|g| g.gene_name.as_str()), ";"),
                join_if_many(groups.iter().map(|g| g.organism.as_str()), ";"),
            ];
            let quantities: Vec<PeptideQuantity> = self
                .spectra_files
                .iter()
                .map(|f| peptide.quantity(f))
                .collect();
            record.extend(quantities.iter().map(|q| q.intensity.to_string()));
            record.extend(quantities.iter().map(|q| q.retention_time.to_string()));
            record.extend(quantities.iter().map(|q| q.detection_type.to_string()));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write one row per protein group with its intensity in each run
    pub fn write_proteins<W: io::Write>(&self, writer: W) -> Result<(), LfqError> {
        let mut writer = tsv_writer(writer);
        let mut header: Vec<String> = vec!["Protein Groups".into(), "Gene Name".into(), "Organism".into()];
        header.extend(
            self.spectra_files
                .iter()
                .map(|f| format!("Intensity_{}", f.filename_without_extension)),
        );
        writer.write_record(&header)?;

        for protein in self.protein_groups.values() {
            let group = &protein.protein_group;
            let mut record = vec![
                group.name.clone(),
                group.gene_name.clone(),
                group.organism.clone(),
            ];
            record.extend(
                self.spectra_files
                    .iter()
                    .map(|f| protein.intensity(f).to_string()),
            );
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn peak_record(peak: &ChromatographicPeak) -> Vec<String> {
    let id = peak.identification();
    let mut record = Vec::with_capacity(22);
    record.push(peak.spectra_file_info.filename_without_extension.clone());
    record.push(
        peak.identifications
            .iter()
            .map(|i| i.base_sequence.as_str())
            .unique()
            .join("|"),
    );
    record.push(
        peak.identifications
            .iter()
            .map(|i| i.modified_sequence.as_str())
            .unique()
            .join("|"),
    );
    record.push(
        peak.identifications
            .iter()
            .flat_map(|i| i.protein_groups.iter().map(|g| g.name.as_str()))
            .unique()
            .sorted()
            .join(";"),
    );
    record.push(id.monoisotopic_mass.to_string());
    record.push(if peak.is_mbr_peak {
        String::new()
    } else {
        id.ms2_retention_time.to_string()
    });
    record.push(id.precursor_charge.to_string());
    record.push(id.theoretical_mz().to_string());
    record.push(peak.intensity().to_string());
    match (peak.apex(), peak.rt_span()) {
        (Some(apex), Some((start, end))) => {
            record.push(start.to_string());
            record.push(apex.retention_time().to_string());
            record.push(end.to_string());
            record.push(apex.indexed_peak.mz.to_string());
            record.push(apex.charge.to_string());
        }
        _ => record.extend(std::iter::repeat_n("-".to_string(), 5)),
    }
    record.push(peak.num_charge_states_observed().to_string());
    record.push(peak.detection_type().to_string());
    record.push(if peak.is_mbr_peak {
        peak.mbr_score.to_string()
    } else {
        String::new()
    });
    record.push(peak.identifications.len().to_string());
    record.push(peak.num_identifications_by_base_seq().to_string());
    record.push(peak.num_identifications_by_full_seq().to_string());
    record.push(peak.split_rt.to_string());
    record.push(peak.mass_error().to_string());
    record
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chromatographic_peak::IntensityMode;
    use crate::peaks::{to_mz, IndexedPeak, IsotopicEnvelope};

    struct Fixture {
        files: Vec<Arc<SpectraFileInfo>>,
        groups: Vec<Arc<ProteinGroup>>,
    }

    impl Fixture {
        fn new(files: Vec<SpectraFileInfo>) -> Self {
            Self {
                files: files.into_iter().map(Arc::new).collect(),
                groups: vec![
                    Arc::new(ProteinGroup::new("P1", "GENE1", "Homo sapiens")),
                    Arc::new(ProteinGroup::new("P2", "GENE2", "Homo sapiens")),
                ],
            }
        }

        fn id(&self, file: usize, sequence: &str, groups: &[usize]) -> Arc<Identification> {
            Arc::new(Identification::new(
                sequence,
                sequence,
                1000.0,
                2,
                10.0,
                self.files[file].clone(),
                groups.iter().map(|i| self.groups[*i].clone()).collect(),
            ))
        }

        fn peak(
            &self,
            ids: &[Arc<Identification>],
            is_mbr: bool,
            scan: u32,
            intensity: f64,
        ) -> ChromatographicPeak {
            let file = ids[0].file_info.clone();
            let mut peak = ChromatographicPeak::new(ids[0].clone(), is_mbr, file, IntensityMode::Apex);
            for id in &ids[1..] {
                peak.add_identification(id.clone());
            }
            peak.resolve_identifications();
            if intensity > 0.0 {
                let p = IndexedPeak::new(to_mz(1000.0, 2), intensity as f32, scan, 10.0 + scan as f64 / 10.0);
                peak.set_envelopes(vec![IsotopicEnvelope::new(p, 2, intensity * 2.0)]);
            }
            peak
        }
    }

    #[test]
    fn test_peptide_results() {
        let fx = Fixture::new(vec![
            SpectraFileInfo::from_path("a.mzML"),
            SpectraFileInfo::from_path("b.mzML"),
        ]);
        let aaa_a = fx.id(0, "AAA", &[0]);
        let ccc_a = fx.id(0, "CCC", &[0]);
        let ddd_a = fx.id(0, "DDD", &[1]);
        let aaa_b = fx.id(1, "AAA", &[0]);
        let ids = vec![aaa_a.clone(), ccc_a.clone(), ddd_a.clone(), aaa_b.clone()];
        let mut results = LfqResults::new(fx.files.clone(), &ids);

        results.peaks.insert(
            fx.files[0].clone(),
            vec![
                fx.peak(&[aaa_a.clone()], false, 1, 100.0),
                fx.peak(&[aaa_a.clone()], false, 2, 300.0),
                fx.peak(&[ccc_a.clone()], false, 3, 0.0),
                // Shared between CCC and DDD
                fx.peak(&[ccc_a.clone(), ddd_a.clone()], false, 4, 50.0),
            ],
        );
        results.peaks.insert(
            fx.files[1].clone(),
            vec![fx.peak(&[aaa_a.clone()], true, 5, 80.0)],
        );
        results.calculate_peptide_results(false);

        let (a, b) = (&fx.files[0], &fx.files[1]);
        let aaa = &results.peptides["AAA"];
        assert_eq!(aaa.intensity(a), 300.0);
        assert_eq!(aaa.detection_type(a), DetectionType::MSMS);
        assert_eq!(aaa.quantity(a).retention_time, 10.2);
        assert_eq!(aaa.intensity(b), 80.0);
        assert_eq!(aaa.detection_type(b), DetectionType::MBR);

        let ccc = &results.peptides["CCC"];
        assert_eq!(ccc.detection_type(a), DetectionType::MSMSAmbiguousPeakfinding);
        assert_eq!(ccc.intensity(a), 0.0);
        let ddd = &results.peptides["DDD"];
        assert_eq!(ddd.detection_type(a), DetectionType::MSMSAmbiguousPeakfinding);
        assert_eq!(ddd.detection_type(b), DetectionType::NotDetected);

        results.calculate_peptide_results(true);
        let ccc = &results.peptides["CCC"];
        assert_eq!(ccc.detection_type(a), DetectionType::MSMSAmbiguousPeakfinding);
        assert_eq!(ccc.intensity(a), 50.0);

        results.calculate_protein_results_top3(false);
        let p1 = &results.protein_groups["P1"];
        // AAA plus the ambiguous CCC which still has intensity here
        assert_eq!(p1.intensity(a), 350.0);
        assert_eq!(p1.intensity(b), 80.0);
        // DDD is ambiguous in one run and absent from the other, which still counts
        let p2 = &results.protein_groups["P2"];
        assert_eq!(p2.intensity(a), 50.0);
    }

    #[test]
    fn test_top3_proteins() {
        let fx = Fixture::new(vec![SpectraFileInfo::from_path("top3.mzML")]);
        let sequences = ["AAA", "CCC", "DDD", "EEE"];
        let mut ids: Vec<_> = sequences.iter().map(|s| fx.id(0, s, &[0])).collect();
        ids.push(fx.id(0, "SHARED", &[0, 1]));
        let mut results = LfqResults::new(fx.files.clone(), &ids);
        let peaks = ids
            .iter()
            .enumerate()
            .map(|(i, id)| fx.peak(&[id.clone()], false, i as u32, 100.0 * (i + 1) as f64))
            .collect();
        results.peaks.insert(fx.files[0].clone(), peaks);
        results.calculate_peptide_results(false);

        results.calculate_protein_results_top3(false);
        let file = &fx.files[0];
        assert_eq!(results.protein_groups["P1"].intensity(file), 400.0 + 300.0 + 200.0);
        assert_eq!(results.protein_groups["P2"].intensity(file), 0.0);

        results.calculate_protein_results_top3(true);
        assert_eq!(results.protein_groups["P1"].intensity(file), 500.0 + 400.0 + 300.0);
        assert_eq!(results.protein_groups["P2"].intensity(file), 500.0);
    }

    #[test]
    fn test_fraction_ambiguity() {
        let fx = Fixture::new(vec![
            SpectraFileInfo::new("f1.mzML", "A", 0, 0, 0),
            SpectraFileInfo::new("f2.mzML", "A", 0, 1, 0),
        ]);
        let aaa_1 = fx.id(0, "AAA", &[0]);
        let ccc_1 = fx.id(0, "CCC", &[0]);
        let aaa_2 = fx.id(1, "AAA", &[0]);
        let ids = vec![aaa_1.clone(), ccc_1.clone(), aaa_2.clone()];
        let mut results = LfqResults::new(fx.files.clone(), &ids);
        results.peaks.insert(
            fx.files[0].clone(),
            vec![fx.peak(&[aaa_1.clone(), ccc_1.clone()], false, 1, 1000.0)],
        );
        results.peaks.insert(
            fx.files[1].clone(),
            vec![fx.peak(&[aaa_2.clone()], false, 1, 100.0)],
        );
        results.calculate_peptide_results(false);
        let aaa = &results.peptides["AAA"];
        assert_eq!(aaa.detection_type(&fx.files[0]), DetectionType::MSMSAmbiguousPeakfinding);
        assert_eq!(aaa.detection_type(&fx.files[1]), DetectionType::MSMS);
        assert_eq!(aaa.intensity(&fx.files[1]), 0.0);
    }

    #[test]
    fn test_write_tables() {
        let fx = Fixture::new(vec![
            SpectraFileInfo::from_path("b.mzML"),
            SpectraFileInfo::from_path("a.mzML"),
        ]);
        let aaa = fx.id(0, "AAA", &[1, 0]);
        let ccc = fx.id(1, "CCC", &[0]);
        let ids = vec![aaa.clone(), ccc.clone()];
        let mut results = LfqResults::new(fx.files.clone(), &ids);
        results.peaks.insert(
            fx.files[0].clone(),
            vec![
                fx.peak(&[aaa.clone()], false, 1, 10.0),
                fx.peak(&[aaa.clone()], false, 2, 20.0),
            ],
        );
        let mut mbr = fx.peak(&[ccc.clone()], true, 3, 30.0);
        mbr.mbr_score = 2.5;
        results.peaks.insert(fx.files[1].clone(), vec![mbr, fx.peak(&[ccc.clone()], false, 0, 0.0)]);
        results.calculate_peptide_results(false);
        results.calculate_protein_results_top3(false);

        let mut buf = Vec::new();
        results.write_peaks(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<Vec<&str>> = text.lines().map(|l| l.split('\t').collect()).collect();
        assert_eq!(lines.len(), 5);
        assert!(lines.iter().all(|l| l.len() == 22));
        assert_eq!(lines[0][0], "File Name");
        assert_eq!(lines[1][0], "a");
        assert_eq!(lines[1][5], "");
        assert_eq!(lines[1][15], "MBR");
        assert_eq!(lines[1][16], "2.5");
        assert_eq!(lines[2][9], "-");
        assert_eq!(lines[2][15], "MSMSIdentifiedButNotQuantified");
        assert_eq!(lines[3][0], "b");
        assert_eq!(lines[3][3], "P1;P2");
        assert_eq!(lines[3][8], "20");
        assert_eq!(lines[4][8], "10");

        let mut buf = Vec::new();
        results.write_peptides(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<Vec<&str>> = text.lines().map(|l| l.split('\t').collect()).collect();
        assert_eq!(
            lines[0],
            [
                "Sequence",
                "Base Sequence",
                "Protein Groups",
                "Gene Names",
                "Organism",
                "Intensity_b",
                "Intensity_a",
                "RetentionTime (min)_b",
                "RetentionTime (min)_a",
                "Detection Type_b",
                "Detection Type_a",
            ]
        );
        assert_eq!(lines[1][..5], ["AAA", "AAA", "P1;P2", "GENE1;GENE2", "Homo sapiens"]);
        assert_eq!(lines[1][5], "20");
        assert_eq!(lines[1][10], "NotDetected");
        assert_eq!(lines[2][6], "30");
        assert_eq!(lines[2][10], "MBR");

        let mut buf = Vec::new();
        results.write_proteins(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<Vec<&str>> = text.lines().map(|l| l.split('\t').collect()).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], ["Protein Groups", "Gene Name", "Organism", "Intensity_b", "Intensity_a"]);
        assert_eq!(lines[1], ["P1", "GENE1", "Homo sapiens", "0", "30"]);
        assert_eq!(lines[2], ["P2", "GENE2", "Homo sapiens", "0", "0"]);
        assert!(!text.contains("-0"));
        assert!(results.protein_groups["P2"].intensity(&fx.files[0]).is_sign_positive());
    }

    #[test]
    fn test_join_if_many() {
        assert_eq!(join_if_many(["P1", "P2", "P1"].into_iter(), ";"), "P1;P2;P1");
        assert_eq!(join_if_many(["P1", "P1"].into_iter(), ";"), "P1");
        assert_eq!(join_if_many(std::iter::empty(), ";"), "");
    }
}
