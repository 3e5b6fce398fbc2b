pub mod error;
pub mod nn;
pub mod utils;

pub use error::{Error, Result};
