use std::{io, path::PathBuf};

use pcd_exporter::ExportError;
use pcd_parser::ParseError;

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("No .npy files found in {directory:?}")]
    NoCandidates { directory: PathBuf },

    #[error("Failed to read samples directory {directory:?}: {source}")]
    ReadDir {
        directory: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to load sample: {0}")]
    Parse(#[from] ParseError),

    #[error("Failed to write point table: {0}")]
    Export(#[from] ExportError),
}
