use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("aggregation function must be either 'mean' or 'sum' (got '{0}')")]
    InvalidAggregation(String),

    /// Malformed graph or feature tensors caught before reaching the kernel.
    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("aggregation kernel '{0}' is not available")]
    MissingKernel(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

macro_rules! shape_bail {
    ($($arg:tt)*) => {
        return Err($crate::error::Error::Shape(format!($($arg)*)))
    };
}
pub(crate) use shape_bail;
