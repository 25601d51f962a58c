//! Span helpers for event log operations.

use tracing::Span;

use crate::error::Error;
use crate::log::{EventFilter, EventId, Order};
use crate::model::EventKind;

/// Start a span for appending one event.
///
/// The `event.id` field is declared empty and filled by [`record_appended`].
pub fn append_span(kind: EventKind) -> Span {
    tracing::info_span!(
        "log.append",
        "event.kind" = kind.as_str(),
        "event.id" = tracing::field::Empty,
    )
}

pub fn record_appended(span: &Span, id: EventId) {
    span.record("event.id", id.0);
    span.in_scope(|| tracing::debug!(id = id.0, "event appended"));
}

/// Start a span covering one query stream.
pub fn query_span(filter: &EventFilter, order: Order, limit: Option<usize>) -> Span {
    tracing::debug_span!(
        "log.query",
        "filter.kind" = filter.kind.map(EventKind::as_str),
        "filter.document_id" = filter.document_id.as_deref(),
        "filter.channel" = filter.channel.as_deref(),
        "filter.allow_retry" = filter.allow_retry,
        order = ?order,
        limit = limit,
    )
}

/// A stored record could not be decoded; the read continues without it.
pub fn record_corrupt(span: &Span, error: &Error) {
    span.in_scope(|| tracing::warn!(error = %error, "skipping corrupt event record"));
}
