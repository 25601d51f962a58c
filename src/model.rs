//! Core data model.
//!
//! An event is an immutable record of one observed state change: a document
//! appearing in, changing in, or leaving the bibliography, or a post about a
//! document being attempted on a channel. Events are never mutated; an
//! "update" is a new event appended to the log.

pub mod document;
pub mod event;

pub use document::{DOCUMENT_KEYS, DocumentRef, make_document_ref};
pub use event::{DocumentChange, Event, EventKind, PostFailure, PostStart, PostSuccess};
