//! Error types shared across the MailChat crates.

use std::io;

use thiserror::Error;

/// Errors that can occur while reading a configuration file.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("Failed to read {file}: {source}")]
    Read {
        file: String,
        #[source]
        source: io::Error,
    },

    /// The file is not a valid directive list.
    #[error("Failed to parse {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: ron::error::SpannedError,
    },
}

/// Errors that can occur while parsing a mail address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address is empty")]
    Empty,

    #[error("Missing local part in {0}")]
    MissingLocalPart(String),

    #[error("Missing domain in {0}")]
    MissingDomain(String),

    #[error("Invalid character in {0}")]
    InvalidCharacter(String),
}
