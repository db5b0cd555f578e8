mod args;
mod driver;
mod input;
mod write;

pub use args::ArgIntensityMode;
pub use driver::{MzLfqer, MzLfqerError};
pub use input::{
    locate_spectra_files, read_experimental_design, read_identification_records, DesignRecord,
    IdentificationRecord, EXPERIMENTAL_DESIGN_FILE,
};
pub use write::{write_results, PEAKS_FILE, PEPTIDES_FILE, PROTEINS_FILE};
