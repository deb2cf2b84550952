pub mod executor;
pub mod types;

pub use executor::*;
pub use types::*;
