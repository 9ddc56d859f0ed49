//! Store error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The store is unreachable; `orchestra doctor` explains setup
    #[error("Cannot connect to CXDB at {url}: {detail}")]
    Connection { url: String, detail: String },

    /// The server answered with an error frame
    #[error("CXDB error {code}: {detail}")]
    Server { code: u32, detail: String },

    /// Unexpected frame or malformed response
    #[error("CXDB protocol error: {0}")]
    Protocol(String),

    #[error("CXDB request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
