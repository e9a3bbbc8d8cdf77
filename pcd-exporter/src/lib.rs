pub mod csv;
pub mod error;

pub use error::ExportError;
