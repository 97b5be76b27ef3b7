pub mod errors;
pub mod logger;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::*;
pub use types::*;
