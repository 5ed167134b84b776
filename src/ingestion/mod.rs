//! Tracing pipeline - paginated fetch, normalization, attribution and CSV export

pub mod driver;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod parse;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;
pub mod utils;
pub mod write;

pub use error::*;
pub use types::*;
