pub mod point;
pub mod scalar;
