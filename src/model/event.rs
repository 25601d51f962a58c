//! The closed set of event variants.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::DocumentRef;
use crate::error::Error;

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// What happened. Used for external-facing filtering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewDocument,
    UpdatedDocument,
    DeletedDocument,
    PostStart,
    PostSuccess,
    PostFailure,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::NewDocument,
        EventKind::UpdatedDocument,
        EventKind::DeletedDocument,
        EventKind::PostStart,
        EventKind::PostSuccess,
        EventKind::PostFailure,
    ];

    /// Symbolic name, as stored and as shown to users.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::NewDocument => "new_document",
            EventKind::UpdatedDocument => "updated_document",
            EventKind::DeletedDocument => "deleted_document",
            EventKind::PostStart => "post_start",
            EventKind::PostSuccess => "post_success",
            EventKind::PostFailure => "post_failure",
        }
    }

    /// Does this kind describe a posting attempt rather than a document change?
    pub fn is_post(self) -> bool {
        matches!(
            self,
            EventKind::PostStart | EventKind::PostSuccess | EventKind::PostFailure
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidKind(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Variant payloads
// ---------------------------------------------------------------------------

/// A document added to, changed in, or removed from the bibliography.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    document: DocumentRef,
    timestamp: DateTime<Utc>,
}

impl DocumentChange {
    fn now(document: DocumentRef) -> Self {
        Self {
            document,
            timestamp: now(),
        }
    }

    pub fn document(&self) -> &DocumentRef {
        &self.document
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// A post about a document is about to be sent to a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PostStart {
    document: Option<DocumentRef>,
    channel: String,
    timestamp: DateTime<Utc>,
}

impl PostStart {
    pub fn document(&self) -> Option<&DocumentRef> {
        self.document.as_ref()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// The channel accepted the post.
#[derive(Debug, Clone, PartialEq)]
pub struct PostSuccess {
    document: Option<DocumentRef>,
    channel: String,
    /// The channel's response, opaque to the log.
    post: Map<String, Value>,
    timestamp: DateTime<Utc>,
}

impl PostSuccess {
    pub fn document(&self) -> Option<&DocumentRef> {
        self.document.as_ref()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn post(&self) -> &Map<String, Value> {
        &self.post
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// The channel rejected the post, or sending it failed.
#[derive(Debug, Clone, PartialEq)]
pub struct PostFailure {
    document: Option<DocumentRef>,
    channel: String,
    error: String,
    /// Whether the poster may attempt this post again.
    allow_retry: bool,
    timestamp: DateTime<Utc>,
}

impl PostFailure {
    pub fn document(&self) -> Option<&DocumentRef> {
        self.document.as_ref()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn allow_retry(&self) -> bool {
        self.allow_retry
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An immutable record of one observed state change.
///
/// The kind is a function of the variant, so the two can never disagree.
/// Timestamps default to the current UTC instant for every variant and are
/// kept at microsecond precision, the resolution of Postgres `timestamptz`.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NewDocument(DocumentChange),
    UpdatedDocument(DocumentChange),
    DeletedDocument(DocumentChange),
    PostStart(PostStart),
    PostSuccess(PostSuccess),
    PostFailure(PostFailure),
}

impl Event {
    pub fn new_document(document: DocumentRef) -> Self {
        Event::NewDocument(DocumentChange::now(document))
    }

    pub fn updated_document(document: DocumentRef) -> Self {
        Event::UpdatedDocument(DocumentChange::now(document))
    }

    pub fn deleted_document(document: DocumentRef) -> Self {
        Event::DeletedDocument(DocumentChange::now(document))
    }

    pub fn post_start(document: Option<DocumentRef>, channel: impl Into<String>) -> Self {
        Event::PostStart(PostStart {
            document,
            channel: channel.into(),
            timestamp: now(),
        })
    }

    pub fn post_success(
        document: Option<DocumentRef>,
        channel: impl Into<String>,
        post: Map<String, Value>,
    ) -> Self {
        Event::PostSuccess(PostSuccess {
            document,
            channel: channel.into(),
            post,
            timestamp: now(),
        })
    }

    pub fn post_failure(
        document: Option<DocumentRef>,
        channel: impl Into<String>,
        error: impl Into<String>,
        allow_retry: bool,
    ) -> Self {
        Event::PostFailure(PostFailure {
            document,
            channel: channel.into(),
            error: error.into(),
            allow_retry,
            timestamp: now(),
        })
    }

    /// The same event, observed at `timestamp` instead of now.
    ///
    /// Truncated to whole microseconds, like every event timestamp.
    pub fn at(self, timestamp: DateTime<Utc>) -> Self {
        let timestamp = truncate(timestamp);
        match self {
            Event::NewDocument(e) => Event::NewDocument(DocumentChange { timestamp, ..e }),
            Event::UpdatedDocument(e) => Event::UpdatedDocument(DocumentChange { timestamp, ..e }),
            Event::DeletedDocument(e) => Event::DeletedDocument(DocumentChange { timestamp, ..e }),
            Event::PostStart(e) => Event::PostStart(PostStart { timestamp, ..e }),
            Event::PostSuccess(e) => Event::PostSuccess(PostSuccess { timestamp, ..e }),
            Event::PostFailure(e) => Event::PostFailure(PostFailure { timestamp, ..e }),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::NewDocument(_) => EventKind::NewDocument,
            Event::UpdatedDocument(_) => EventKind::UpdatedDocument,
            Event::DeletedDocument(_) => EventKind::DeletedDocument,
            Event::PostStart(_) => EventKind::PostStart,
            Event::PostSuccess(_) => EventKind::PostSuccess,
            Event::PostFailure(_) => EventKind::PostFailure,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::NewDocument(e) | Event::UpdatedDocument(e) | Event::DeletedDocument(e) => {
                e.timestamp
            }
            Event::PostStart(e) => e.timestamp,
            Event::PostSuccess(e) => e.timestamp,
            Event::PostFailure(e) => e.timestamp,
        }
    }

    /// The document this event is about. Only post events may lack one.
    pub fn document(&self) -> Option<&DocumentRef> {
        match self {
            Event::NewDocument(e) | Event::UpdatedDocument(e) | Event::DeletedDocument(e) => {
                Some(&e.document)
            }
            Event::PostStart(e) => e.document.as_ref(),
            Event::PostSuccess(e) => e.document.as_ref(),
            Event::PostFailure(e) => e.document.as_ref(),
        }
    }

    /// The posting channel, for post events.
    pub fn channel(&self) -> Option<&str> {
        match self {
            Event::PostStart(e) => Some(&e.channel),
            Event::PostSuccess(e) => Some(&e.channel),
            Event::PostFailure(e) => Some(&e.channel),
            _ => None,
        }
    }
}

/// Event timestamps carry no sub-microsecond part.
pub(crate) fn truncate(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(6)
}

fn now() -> DateTime<Utc> {
    truncate(Utc::now())
}
