use std::sync::Arc;

use crate::engine::{LfqEngine, LfqParams};
use crate::error::LfqError;
use crate::identification::{Identification, SpectraFileInfo};
use crate::isotopic_model::{IsotopeDistributionProvider, PeptideIsotopeModel};
use crate::results::LfqResults;
use crate::spectra::{MzDataSpectrumSource, SpectrumSource};

/// Quantify `identifications` over the runs they were made in, reading spectra with
/// `spectrum_source` and modeling isotope patterns with `isotope_model`.
pub fn quantify<S: SpectrumSource, P: IsotopeDistributionProvider>(
    identifications: Vec<Identification>,
    spectrum_source: S,
    isotope_model: P,
    params: LfqParams,
) -> Result<LfqResults, LfqError> {
    let mut engine = LfqEngine::new(params, identifications, spectrum_source, isotope_model)?;
    engine.run()
}

/// Quantify `identifications` over `spectra_files`, reading spectra files from disk
/// with [`mzdata`] and modeling isotope patterns from peptide composition.
///
/// Runs in `spectra_files` without any identifications may still receive
/// match-between-runs transfers.
pub fn quantify_spectra_files(
    identifications: Vec<Identification>,
    spectra_files: Vec<Arc<SpectraFileInfo>>,
    params: LfqParams,
) -> Result<LfqResults, LfqError> {
    let mut engine = LfqEngine::with_spectra_files(
        params,
        identifications,
        spectra_files,
        MzDataSpectrumSource::default(),
        PeptideIsotopeModel::new(),
    )?;
    engine.run()
}
