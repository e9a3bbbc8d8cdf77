pub mod cli;
pub mod error;
pub mod sampler;

pub use error::SampleError;
