pub mod error;
pub mod parsers;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use error::ParseError;
