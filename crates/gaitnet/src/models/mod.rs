//! Complete model families.
pub mod pyramid;
