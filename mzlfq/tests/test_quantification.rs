use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use mzlfq::isotopic_model::NEUTRON_SHIFT;
use mzlfq::peaks::to_mz;
use mzlfq::{
    DetectionType, Identification, InMemorySpectrumSource, IsotopeDistribution, LfqEngine,
    LfqParams, LfqResults, Ms1Scan, ProteinGroup, SpectraFileInfo,
};

const CHARGE: i32 = 2;
const ISOTOPES: [f32; 3] = [1.0, 0.6, 0.2];
const ELUTION: [f32; 7] = [0.1, 0.3, 0.6, 1.0, 0.6, 0.3, 0.1];

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

/// An analyte eluting over consecutive scans starting at `first_scan`
#[derive(Debug, Clone)]
struct Analyte {
    mass: f64,
    first_scan: usize,
    elution: Vec<f32>,
}

impl Analyte {
    fn eluting(mass: f64, apex_scan: usize, scale: f32) -> Self {
        Self {
            mass,
            first_scan: apex_scan - ELUTION.len() / 2,
            elution: ELUTION.iter().map(|f| f * scale).collect(),
        }
    }

    fn with_ppm_offset(mut self, ppm: f64) -> Self {
        self.mass += self.mass * ppm * 1e-6;
        self
    }
}

fn scan_rt(i: usize) -> f64 {
    4.0 + 0.05 * i as f64
}

fn make_scans(n: usize, analytes: &[Analyte]) -> Vec<Ms1Scan> {
    (0..n)
        .map(|i| {
            let mut points: Vec<(f64, f32)> = Vec::new();
            for analyte in analytes {
                let Some(level) = i
                    .checked_sub(analyte.first_scan)
                    .and_then(|k| analyte.elution.get(k))
                else {
                    continue;
                };
                for (k, ratio) in ISOTOPES.iter().enumerate() {
                    points.push((
                        to_mz(analyte.mass + k as f64 * NEUTRON_SHIFT, CHARGE),
                        level * ratio,
                    ));
                }
            }
            points.sort_by(|a, b| a.0.total_cmp(&b.0));
            let (mzs, intensities) = points.into_iter().unzip();
            Ms1Scan::new(i + 1, scan_rt(i), mzs, intensities)
        })
        .collect()
}

fn distributions(sequences: &[&str]) -> HashMap<String, IsotopeDistribution> {
    sequences
        .iter()
        .map(|s| {
            (
                s.to_string(),
                IsotopeDistribution::from_raw(
                    [(0.0, 1.0), (NEUTRON_SHIFT, 0.6), (2.0 * NEUTRON_SHIFT, 0.2)],
                    2,
                ),
            )
        })
        .collect()
}

fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("mzlfq_{name}.mzML"))
}

fn identify(
    sequence: &str,
    mass: f64,
    scan: usize,
    file: &Arc<SpectraFileInfo>,
    proteins: &[&Arc<ProteinGroup>],
) -> Identification {
    Identification::new(
        sequence,
        sequence,
        mass,
        CHARGE,
        scan_rt(scan),
        file.clone(),
        proteins.iter().map(|p| Arc::clone(*p)).collect(),
    )
}

fn single_run(params: LfqParams) -> (Arc<SpectraFileInfo>, LfqResults) {
    let file = Arc::new(SpectraFileInfo::from_path(scratch_path(&format!(
        "single_run_{}",
        params.integrate
    ))));
    let mut source = InMemorySpectrumSource::new();
    source.insert(
        file.full_file_path.clone(),
        make_scans(12, &[Analyte::eluting(1000.0, 5, 1e5)]),
    );
    let ids = vec![identify("PEPTIDE", 1000.0, 5, &file, &[])];
    let mut engine = LfqEngine::new(params, ids, source, distributions(&["PEPTIDE"])).unwrap();
    let results = engine.run().unwrap();
    (file, results)
}

#[test_log::test]
fn test_apex_intensity() {
    let (file, results) = single_run(LfqParams::default());
    let peaks = &results.peaks[&file];
    assert_eq!(peaks.len(), 1);
    let peak = &peaks[0];
    assert!(!peak.is_mbr_peak);
    assert_eq!(peak.detection_type(), DetectionType::MSMS);
    assert_eq!(peak.isotopic_envelopes().len(), ELUTION.len());
    // Summed isotopes over the charge state
    assert_is_close!(peak.intensity(), 0.9e5, 0.1, "apex intensity");
    assert_is_close!(peak.apex_retention_time(), scan_rt(5), 1e-9, "apex time");
    assert!(peak.mass_error().abs() < 1.0, "{}", peak.mass_error());

    let peptide = &results.peptides["PEPTIDE"];
    assert_is_close!(peptide.intensity(&file), 0.9e5, 0.1, "peptide intensity");
    assert_eq!(peptide.detection_type(&file), DetectionType::MSMS);
}

#[test]
fn test_integrated_intensity() {
    let params = LfqParams {
        integrate: true,
        ..Default::default()
    };
    let (file, results) = single_run(params);
    let peaks = &results.peaks[&file];
    assert_eq!(peaks.len(), 1);
    let total: f32 = ELUTION.iter().sum();
    assert_is_close!(peaks[0].intensity(), 0.9e5 * total as f64, 1.0, "integrated intensity");
}

#[test]
fn test_unquantified_identification() {
    let file = Arc::new(SpectraFileInfo::from_path(scratch_path("unquantified")));
    let mut source = InMemorySpectrumSource::new();
    source.insert(
        file.full_file_path.clone(),
        make_scans(12, &[Analyte::eluting(1000.0, 5, 1e5)]),
    );
    let ids = vec![
        identify("PEPTIDE", 1000.0, 5, &file, &[]),
        identify("MISSING", 1500.0, 5, &file, &[]),
    ];
    let mut engine = LfqEngine::new(
        LfqParams::default(),
        ids,
        source,
        distributions(&["PEPTIDE", "MISSING"]),
    )
    .unwrap();
    let results = engine.run().unwrap();

    let missing = &results.peptides["MISSING"];
    assert_eq!(missing.intensity(&file), 0.0);
    assert_eq!(
        missing.detection_type(&file),
        DetectionType::MSMSIdentifiedButNotQuantified
    );
    assert_eq!(
        results.peptides["PEPTIDE"].detection_type(&file),
        DetectionType::MSMS
    );
}

#[test]
fn test_no_identifications() {
    let mut engine = LfqEngine::new(
        LfqParams::default(),
        Vec::new(),
        InMemorySpectrumSource::new(),
        distributions(&[]),
    )
    .unwrap();
    assert!(engine.run().is_err());
}

#[test_log::test]
fn test_valley_splits_peak() {
    let file = Arc::new(SpectraFileInfo::from_path(scratch_path("valley")));
    let profile: Vec<f32> = [
        0.1, 0.3, 0.6, 1.0, 0.6, 0.3, 0.1, 0.3, 0.6, 0.9, 0.6, 0.3, 0.1,
    ]
    .iter()
    .map(|f| f * 1e5)
    .collect();
    let valley_scan = 6;
    let analyte = Analyte {
        mass: 1000.0,
        first_scan: 0,
        elution: profile.clone(),
    };
    let mut source = InMemorySpectrumSource::new();
    source.insert(file.full_file_path.clone(), make_scans(profile.len(), &[analyte]));

    let ids = vec![
        identify("PEPTIDE", 1000.0, 3, &file, &[]),
        identify("PEPTIDE", 1000.0, 9, &file, &[]),
    ];
    let mut engine =
        LfqEngine::new(LfqParams::default(), ids, source, distributions(&["PEPTIDE"])).unwrap();
    let results = engine.run().unwrap();

    let mut peaks: Vec<_> = results.peaks[&file].iter().collect();
    assert_eq!(peaks.len(), 2);
    peaks.sort_by(|a, b| a.apex_retention_time().total_cmp(&b.apex_retention_time()));

    let scans_of = |i: usize| -> Vec<u32> {
        let mut scans: Vec<u32> = peaks[i]
            .isotopic_envelopes()
            .iter()
            .map(|e| e.scan_index())
            .collect();
        scans.sort_unstable();
        scans
    };
    let early = scans_of(0);
    let late = scans_of(1);
    assert_eq!(early, (0..valley_scan as u32).collect::<Vec<_>>());
    assert_eq!(late, (valley_scan as u32 + 1..profile.len() as u32).collect::<Vec<_>>());
    assert!(early.iter().all(|s| !late.contains(s)));

    for peak in peaks {
        assert_is_close!(peak.split_rt, scan_rt(valley_scan), 1e-9, "split time");
        assert_eq!(peak.identifications.len(), 1);
    }
}

const TARGET: &str = "TARGETPEPTIDE";
const ANCHORS: [(&str, f64); 4] = [
    ("ANCHORA", 1100.0),
    ("ANCHORB", 1200.0),
    ("ANCHORC", 1300.0),
    ("ANCHORD", 1400.0),
];
const ANCHOR_PPM_OFFSETS: [f64; 4] = [2.0, -2.0, 1.0, -1.0];
const ACCEPTOR_RT_SHIFT_SCANS: usize = 4;

/// A run with all the anchors identified and, when `target_scale` is given, the
/// target identified too, eluting at scan 20. The acceptor run elutes everything
/// four scans later and never identifies the target.
fn donor_run(
    name: &str,
    target_scale: f32,
    protein: &Arc<ProteinGroup>,
) -> (Arc<SpectraFileInfo>, Vec<Ms1Scan>, Vec<Identification>) {
    let file = Arc::new(SpectraFileInfo::from_path(scratch_path(name)));
    let mut analytes = vec![Analyte::eluting(1000.0, 20, target_scale)];
    let mut ids = vec![identify(TARGET, 1000.0, 20, &file, &[protein])];
    for (i, (sequence, mass)) in ANCHORS.iter().enumerate() {
        let apex = 14 + 4 * i;
        analytes.push(Analyte::eluting(*mass, apex, 1e5));
        ids.push(identify(sequence, *mass, apex, &file, &[protein]));
    }
    (file, make_scans(40, &analytes), ids)
}

fn acceptor_run(name: &str, protein: &Arc<ProteinGroup>) -> (Arc<SpectraFileInfo>, Vec<Ms1Scan>, Vec<Identification>) {
    let file = Arc::new(SpectraFileInfo::from_path(scratch_path(name)));
    let mut analytes = vec![Analyte::eluting(1000.0, 20 + ACCEPTOR_RT_SHIFT_SCANS, 5e4)];
    let mut ids = Vec::new();
    for (i, ((sequence, mass), ppm)) in ANCHORS.iter().zip(ANCHOR_PPM_OFFSETS).enumerate() {
        let apex = 14 + 4 * i + ACCEPTOR_RT_SHIFT_SCANS;
        analytes.push(Analyte::eluting(*mass, apex, 1e5).with_ppm_offset(ppm));
        ids.push(identify(sequence, *mass, apex, &file, &[protein]));
    }
    (file, make_scans(40, &analytes), ids)
}

fn match_between_runs(
    runs: Vec<(Arc<SpectraFileInfo>, Vec<Ms1Scan>, Vec<Identification>)>,
) -> LfqResults {
    let mut source = InMemorySpectrumSource::new();
    let mut ids = Vec::new();
    for (file, scans, file_ids) in runs {
        source.insert(file.full_file_path.clone(), scans);
        ids.extend(file_ids);
    }
    let params = LfqParams {
        match_between_runs: true,
        ..Default::default()
    };
    let mut sequences: Vec<&str> = ANCHORS.iter().map(|(s, _)| *s).collect();
    sequences.push(TARGET);
    let mut engine = LfqEngine::new(params, ids, source, distributions(&sequences)).unwrap();
    engine.run().unwrap()
}

fn transferred_peaks<'a>(
    results: &'a LfqResults,
    file: &SpectraFileInfo,
) -> Vec<&'a mzlfq::ChromatographicPeak> {
    results.peaks[file].iter().filter(|p| p.is_mbr_peak).collect()
}

#[test_log::test]
fn test_match_between_runs() {
    let protein = Arc::new(ProteinGroup::new("P00001", "GENE1", "Homo sapiens"));
    let donor = donor_run("mbr_donor", 1e5, &protein);
    let acceptor = acceptor_run("mbr_acceptor", &protein);
    let (donor_file, acceptor_file) = (donor.0.clone(), acceptor.0.clone());
    let results = match_between_runs(vec![donor, acceptor]);

    assert!(transferred_peaks(&results, &donor_file).is_empty());
    let transferred = transferred_peaks(&results, &acceptor_file);
    assert_eq!(transferred.len(), 1);
    let peak = transferred[0];
    assert_eq!(peak.identification().modified_sequence, TARGET);
    assert_eq!(peak.detection_type(), DetectionType::MBR);
    assert_is_close!(
        peak.apex_retention_time(),
        scan_rt(20 + ACCEPTOR_RT_SHIFT_SCANS),
        1e-9,
        "transferred apex time"
    );
    // Half the donor's intensity against anchors of equal intensity is one log2 unit off
    assert_is_close!(peak.mbr_score, 1.0, 1e-4, "score");
    assert_is_close!(peak.intensity(), 0.45e5, 0.1, "transferred intensity");

    let target = &results.peptides[TARGET];
    assert_eq!(target.detection_type(&acceptor_file), DetectionType::MBR);
    assert_eq!(target.detection_type(&donor_file), DetectionType::MSMS);

    // The three most intense peptides are the anchors in both runs
    let protein = &results.protein_groups["P00001"];
    assert_is_close!(protein.intensity(&donor_file), 3.0 * 0.9e5, 1.0, "donor protein");
    assert_is_close!(protein.intensity(&acceptor_file), 3.0 * 0.9e5, 1.0, "acceptor protein");

    // Indices written for the transfer are cleaned up
    assert!(!donor_file.index_artifact_path().exists());
    assert!(!acceptor_file.index_artifact_path().exists());
}

#[test]
fn test_match_between_runs_donors_accumulate() {
    let protein = Arc::new(ProteinGroup::new("P00001", "GENE1", "Homo sapiens"));

    let pair = |donor_scale: f32, donor: &str, acceptor: &str| {
        let donor = donor_run(donor, donor_scale, &protein);
        let acceptor = acceptor_run(acceptor, &protein);
        let acceptor_file = acceptor.0.clone();
        let results = match_between_runs(vec![donor, acceptor]);
        let transferred = transferred_peaks(&results, &acceptor_file);
        assert_eq!(transferred.len(), 1);
        transferred[0].mbr_score
    };
    let from_a = pair(1e5, "accumulate_a1", "accumulate_b1");
    let from_c = pair(2e5, "accumulate_c2", "accumulate_b2");
    assert_is_close!(from_a, 1.0, 1e-4, "score from a");
    assert_is_close!(from_c, 0.5, 1e-4, "score from c");

    let acceptor = acceptor_run("accumulate_b3", &protein);
    let acceptor_file = acceptor.0.clone();
    let results = match_between_runs(vec![
        donor_run("accumulate_a3", 1e5, &protein),
        donor_run("accumulate_c3", 2e5, &protein),
        acceptor,
    ]);
    let transferred = transferred_peaks(&results, &acceptor_file);
    assert_eq!(transferred.len(), 1);
    assert_is_close!(transferred[0].mbr_score, from_a + from_c, 1e-4, "summed score");
    assert_eq!(transferred[0].identifications.len(), 2);
}

#[test]
fn test_write_outputs() {
    let (_, results) = single_run(LfqParams {
        max_threads: 1,
        ..Default::default()
    });
    let mut buffer = Vec::new();
    results.write_peptides(&mut buffer).unwrap();
    let text = String::from_utf8(buffer).unwrap();
    let mut lines = text.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("Sequence\tBase Sequence\tProtein Groups"));
    assert!(header.contains("Intensity_mzlfq_single_run_false"));
    let row: Vec<&str> = lines.next().unwrap().split('\t').collect();
    assert_eq!(row[0], "PEPTIDE");
    assert_eq!(row.last().copied(), Some("MSMS"));

    let mut buffer = Vec::new();
    results.write_peaks(&mut buffer).unwrap();
    let text = String::from_utf8(buffer).unwrap();
    assert_eq!(text.lines().count(), 2);
}
