// src/error.rs
//! Error taxonomy for the collector.
//!
//! Entry-level (`MissingField`) and feed-level (`Network`, `Timeout`,
//! `HttpStatus`, `Parse`) errors are isolated by the pipeline and only
//! logged. Store-level errors (`Io` on the store, `CorruptStore`) and
//! `InvalidInterval` are fatal and surface to the binary.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration '{}': {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("entry store '{}' exists but cannot be read back: {reason}", path.display())]
    CorruptStore { path: PathBuf, reason: String },

    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("unexpected HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("failed to parse feed: {0}")]
    Parse(String),

    #[error("entry is missing mandatory field '{0}'")]
    MissingField(&'static str),

    #[error("entry ({source_url}, {id}) is already in the store")]
    DuplicateKey { source_url: String, id: String },

    #[error("invalid interval '{0}': expected an integer followed by one of s, m, h, d")]
    InvalidInterval(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
