use thiserror::Error;

use crate::store::StoreError;
use crate::store::encdec::DecodingError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("decoding error: {0}")]
    Decoding(#[from] DecodingError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("walker error: {0}")]
    Walker(String),
}

impl Error {
    pub fn config(error: impl ToString) -> Error {
        Error::Config(error.to_string())
    }
}
