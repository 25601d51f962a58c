//! Error types for ascmonitor-rs.

use thiserror::Error;

use crate::log::EventId;

#[derive(Debug, Error)]
pub enum Error {
    /// A required key is absent from a document or a stored record.
    #[error("missing field: {0}")]
    MissingField(String),

    /// A key is present but its value has the wrong shape.
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("unknown event variant: {0}")]
    UnknownVariant(String),

    #[error("invalid event kind: {0}")]
    InvalidKind(String),

    #[error("event kind {kind} does not match variant {variant}")]
    KindMismatch { variant: String, kind: String },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// A stored record that could not be decoded. Reported per item by bulk reads.
    #[error("corrupt record {id}: {source}")]
    Corrupt {
        id: EventId,
        #[source]
        source: Box<Error>,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Error::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Was this raised while decoding a single stored record?
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::Corrupt { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
