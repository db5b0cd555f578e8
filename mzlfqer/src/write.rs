use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info};

use mzlfq::LfqResults;

use crate::driver::MzLfqerError;

pub const PEAKS_FILE: &str = "QuantifiedPeaks.tsv";
pub const PEPTIDES_FILE: &str = "QuantifiedPeptides.tsv";
pub const PROTEINS_FILE: &str = "QuantifiedProteins.tsv";

fn create(path: &Path) -> io::Result<io::BufWriter<fs::File>> {
    debug!("Writing {}", path.display());
    Ok(io::BufWriter::new(fs::File::create(path)?))
}

/// Write the peak, peptide and protein tables to `output_dir`, creating it if needed.
/// Returns the paths written.
pub fn write_results(results: &LfqResults, output_dir: &Path) -> Result<Vec<PathBuf>, MzLfqerError> {
    let start = Instant::now();
    fs::create_dir_all(output_dir)?;

    let peaks_path = output_dir.join(PEAKS_FILE);
    results.write_peaks(create(&peaks_path)?)?;

    let peptides_path = output_dir.join(PEPTIDES_FILE);
    results.write_peptides(create(&peptides_path)?)?;

    let proteins_path = output_dir.join(PROTEINS_FILE);
    results.write_proteins(create(&proteins_path)?)?;

    info!(
        "Wrote {} peaks, {} peptides and {} protein groups in {:0.3?}",
        results.peaks.values().map(Vec::len).sum::<usize>(),
        results.peptides.len(),
        results.protein_groups.len(),
        start.elapsed()
    );
    Ok(vec![peaks_path, peptides_path, proteins_path])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_write_empty_results() {
        let dir = std::env::temp_dir().join("mzlfqer_write_empty_results");
        let results = LfqResults::new(Vec::new(), &[]);
        let paths = write_results(&results, &dir).unwrap();
        assert_eq!(paths.len(), 3);
        let peptides = fs::read_to_string(&paths[1]).unwrap();
        assert!(peptides.starts_with("Sequence\tBase Sequence"));
        assert_eq!(peptides.lines().count(), 1);
        fs::remove_dir_all(&dir).unwrap();
    }
}
