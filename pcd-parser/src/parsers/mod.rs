use pcd_core::pointcloud::point::PointCloud;

use crate::ParseError;

pub mod csv;
pub mod npy;

pub trait ParserProvider {
    fn get_parser(&self) -> Box<dyn Parser>;
}

pub trait Parser {
    fn parse(&self) -> Result<PointCloud, ParseError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    Npy,
    Csv,
}

impl Extension {
    pub fn suffix(self) -> &'static str {
        match self {
            Extension::Npy => ".npy",
            Extension::Csv => ".csv",
        }
    }
}

/// Classifies a file name by its suffix. Matching is case-sensitive and a bare
/// suffix (".npy") still counts.
pub fn get_extension(file_name: &str) -> Option<Extension> {
    [Extension::Npy, Extension::Csv]
        .into_iter()
        .find(|extension| file_name.ends_with(extension.suffix()))
}
