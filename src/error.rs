use std::path::PathBuf;

use thiserror::Error;

/// Main library error type: document-level, collection and storage failures.
///
/// Per-schema retrieval problems are not represented here; they are recorded
/// as data on the schema's record (see [`FetchError`]).
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML document {uri} was empty")]
    EmptyDocument { uri: String },

    #[error("This service only supports XML version 1.0; document {uri} is XML version {version}")]
    UnsupportedXmlVersion { uri: String, version: String },

    #[error("The XML document {uri} had too many errors: {details}")]
    UnparseableDocument { uri: String, details: String },

    #[error("Too many schemas ({count}) encountered for {uri}")]
    TooManySchemas { uri: String, count: usize },

    #[error("Invalid collection identifier '{0}'")]
    BadCollectionId(String),

    #[error("Collection '{0}' does not exist; create it first")]
    UnknownCollection(String),

    #[error("Timed out waiting {timeout_seconds} seconds for {kind} lock to {path}")]
    LockTimeout {
        path: PathBuf,
        kind: &'static str,
        timeout_seconds: u64,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Corrupt resolution record {source_name}: {details}")]
    CorruptRecord {
        source_name: String,
        details: String,
    },

    #[error("XML writing error: {0}")]
    Xml(String),

    #[error("Internal resolver error: {0}")]
    Internal(String),
}

impl ResolutionError {
    /// True when the caller supplied bad input, false when the service itself failed.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ResolutionError::EmptyDocument { .. }
                | ResolutionError::UnsupportedXmlVersion { .. }
                | ResolutionError::UnparseableDocument { .. }
                | ResolutionError::TooManySchemas { .. }
                | ResolutionError::BadCollectionId(_)
                | ResolutionError::UnknownCollection(_)
        )
    }

    /// HTTP status a front end should answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ResolutionError::EmptyDocument { .. }
            | ResolutionError::TooManySchemas { .. }
            | ResolutionError::BadCollectionId(_) => 400,
            ResolutionError::UnknownCollection(_) => 404,
            ResolutionError::UnsupportedXmlVersion { .. }
            | ResolutionError::UnparseableDocument { .. } => 415,
            _ => 500,
        }
    }
}

/// Why a single schema location could not be retrieved.
///
/// These never escape the catalog: the message becomes the `Failure` record's
/// error text so one broken link cannot abort the rest of a resolution.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{scheme} is not a supported protocol - {location} not retrieved")]
    UnsupportedScheme { scheme: String, location: String },

    #[error("{location} can't be retrieved, there were too many redirects")]
    TooManyRedirects { location: String },

    #[error("Invalid schema location {location}: {details}")]
    InvalidLocation { location: String, details: String },

    #[error("Redirect from {location} did not say where to go")]
    MissingRedirectTarget { location: String },

    #[error("HTTP {status} {reason} for {location}")]
    HttpStatus {
        location: String,
        status: u16,
        reason: String,
    },

    #[error("Request timeout: {location} after {timeout_seconds} seconds")]
    Timeout {
        location: String,
        timeout_seconds: u64,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Could not store {location} in the schema cache: {details}")]
    Cache { location: String, details: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ResolutionError>;

/// Fetch result type alias
pub type FetchResult<T> = std::result::Result<T, FetchError>;
