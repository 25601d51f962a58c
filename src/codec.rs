//! Lossless mapping between events and flat storable records.
//!
//! A record is a single-level JSON object. The nested document reference is
//! the only nested record, under `document`. `variant_tag` is authoritative
//! for reconstruction; `kind` is kept for filtering and must agree with it.
//!
//! Records written before `variant_tag` existed carry `class_name` instead,
//! a storage identity under `_id`, and naive timestamps. Those still decode.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::model::{DocumentRef, Event, EventKind, make_document_ref};

/// Flat storable form of an event.
pub type Record = Map<String, Value>;

pub const VARIANT_TAG: &str = "variant_tag";
const LEGACY_CLASS_NAME: &str = "class_name";

/// Keys a store may attach for its own identity. Never part of an event.
pub const IDENTITY_FIELDS: [&str; 2] = ["storage_identity", "_id"];

// ---------------------------------------------------------------------------
// Variant tag
// ---------------------------------------------------------------------------

/// Which of the six concrete variants a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantTag {
    NewDocument,
    UpdatedDocument,
    DeletedDocument,
    PostStart,
    PostSuccess,
    PostFailure,
}

impl VariantTag {
    pub const ALL: [VariantTag; 6] = [
        VariantTag::NewDocument,
        VariantTag::UpdatedDocument,
        VariantTag::DeletedDocument,
        VariantTag::PostStart,
        VariantTag::PostSuccess,
        VariantTag::PostFailure,
    ];

    pub fn of(event: &Event) -> Self {
        match event {
            Event::NewDocument(_) => VariantTag::NewDocument,
            Event::UpdatedDocument(_) => VariantTag::UpdatedDocument,
            Event::DeletedDocument(_) => VariantTag::DeletedDocument,
            Event::PostStart(_) => VariantTag::PostStart,
            Event::PostSuccess(_) => VariantTag::PostSuccess,
            Event::PostFailure(_) => VariantTag::PostFailure,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VariantTag::NewDocument => "NewDocument",
            VariantTag::UpdatedDocument => "UpdatedDocument",
            VariantTag::DeletedDocument => "DeletedDocument",
            VariantTag::PostStart => "PostStart",
            VariantTag::PostSuccess => "PostSuccess",
            VariantTag::PostFailure => "PostFailure",
        }
    }

    /// Name written under `class_name` by the first generation of the log.
    fn legacy_name(self) -> &'static str {
        match self {
            VariantTag::NewDocument => "NewDocEvent",
            VariantTag::UpdatedDocument => "UpdatedDocEvent",
            VariantTag::DeletedDocument => "DeletedDocEvent",
            VariantTag::PostStart => "PostStartEvent",
            VariantTag::PostSuccess => "PostSuccessEvent",
            VariantTag::PostFailure => "PostFailureEvent",
        }
    }

    /// The only kind a record with this tag may carry.
    pub fn kind(self) -> EventKind {
        match self {
            VariantTag::NewDocument => EventKind::NewDocument,
            VariantTag::UpdatedDocument => EventKind::UpdatedDocument,
            VariantTag::DeletedDocument => EventKind::DeletedDocument,
            VariantTag::PostStart => EventKind::PostStart,
            VariantTag::PostSuccess => EventKind::PostSuccess,
            VariantTag::PostFailure => EventKind::PostFailure,
        }
    }

    fn from_legacy(name: &str) -> Result<Self> {
        VariantTag::ALL
            .into_iter()
            .find(|tag| tag.legacy_name() == name)
            .ok_or_else(|| Error::UnknownVariant(name.to_string()))
    }
}

impl std::fmt::Display for VariantTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VariantTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        VariantTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| Error::UnknownVariant(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Flatten an event into a storable record.
pub fn encode(event: &Event) -> Record {
    let mut record = Record::new();

    if let Some(document) = event.document() {
        record.insert("document".into(), Value::Object(document.to_record()));
    }
    record.insert("kind".into(), Value::String(event.kind().as_str().into()));
    record.insert(
        "timestamp".into(),
        Value::String(format_timestamp(event.timestamp())),
    );

    match event {
        Event::PostStart(e) => {
            record.insert("channel".into(), Value::String(e.channel().into()));
        }
        Event::PostSuccess(e) => {
            record.insert("channel".into(), Value::String(e.channel().into()));
            record.insert("post".into(), Value::Object(e.post().clone()));
        }
        Event::PostFailure(e) => {
            record.insert("channel".into(), Value::String(e.channel().into()));
            record.insert("error".into(), Value::String(e.error().into()));
            record.insert("allow_retry".into(), Value::Bool(e.allow_retry()));
        }
        Event::NewDocument(_) | Event::UpdatedDocument(_) | Event::DeletedDocument(_) => {}
    }

    record.insert(
        VARIANT_TAG.into(),
        Value::String(VariantTag::of(event).as_str().into()),
    );
    record
}

/// RFC 3339 in UTC with as many fractional digits as the instant needs.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Reconstruct the exact variant a record was encoded from.
pub fn decode(mut record: Record) -> Result<Event> {
    let tag = take_variant_tag(&mut record)?;
    for key in IDENTITY_FIELDS {
        record.remove(key);
    }

    let kind = match record.remove("kind") {
        None => return Err(Error::MissingField("kind".into())),
        Some(Value::String(s)) => s.parse::<EventKind>()?,
        Some(other) => return Err(Error::InvalidKind(other.to_string())),
    };
    if kind != tag.kind() {
        return Err(Error::KindMismatch {
            variant: tag.as_str().into(),
            kind: kind.as_str().into(),
        });
    }

    let timestamp = parse_timestamp(&take(&mut record, "timestamp")?)?;

    let event = match tag {
        VariantTag::NewDocument => Event::new_document(take_document(&mut record)?),
        VariantTag::UpdatedDocument => Event::updated_document(take_document(&mut record)?),
        VariantTag::DeletedDocument => Event::deleted_document(take_document(&mut record)?),
        VariantTag::PostStart => {
            let document = take_optional_document(&mut record)?;
            Event::post_start(document, take_string(&mut record, "channel")?)
        }
        VariantTag::PostSuccess => {
            let document = take_optional_document(&mut record)?;
            let channel = take_string(&mut record, "channel")?;
            let post = match take(&mut record, "post")? {
                Value::Object(post) => post,
                other => {
                    return Err(Error::invalid(
                        "post",
                        format!("expected a record, got {other}"),
                    ));
                }
            };
            Event::post_success(document, channel, post)
        }
        VariantTag::PostFailure => {
            let document = take_optional_document(&mut record)?;
            let channel = take_string(&mut record, "channel")?;
            let error = take_string(&mut record, "error")?;
            let allow_retry = match take(&mut record, "allow_retry")? {
                Value::Bool(b) => b,
                other => {
                    return Err(Error::invalid(
                        "allow_retry",
                        format!("expected a boolean, got {other}"),
                    ));
                }
            };
            Event::post_failure(document, channel, error, allow_retry)
        }
    };

    if !record.is_empty() {
        tracing::debug!(
            variant = tag.as_str(),
            ignored = ?record.keys().collect::<Vec<_>>(),
            "ignoring unrecognized record fields"
        );
    }

    Ok(event.at(timestamp))
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339, naive ISO 8601 (read as UTC), and extended-JSON
/// `{"$date": ...}` wrappers holding either form or epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Object(wrapper) => match wrapper.get("$date") {
            Some(Value::String(s)) => parse_timestamp_str(s),
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(DateTime::from_timestamp_millis)
                .ok_or_else(|| Error::invalid("timestamp", format!("out of range: {n}"))),
            _ => Err(Error::invalid("timestamp", format!("unrecognized value {value}"))),
        },
        other => Err(Error::invalid("timestamp", format!("unrecognized value {other}"))),
    }
}

fn parse_timestamp_str(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::invalid("timestamp", format!("{s:?}: {e}")))
}

fn take_variant_tag(record: &mut Record) -> Result<VariantTag> {
    if let Some(value) = record.remove(VARIANT_TAG) {
        record.remove(LEGACY_CLASS_NAME);
        return match value {
            Value::String(s) => s.parse(),
            other => Err(Error::UnknownVariant(other.to_string())),
        };
    }
    match record.remove(LEGACY_CLASS_NAME) {
        Some(Value::String(s)) => VariantTag::from_legacy(&s),
        Some(other) => Err(Error::UnknownVariant(other.to_string())),
        None => Err(Error::MissingField(VARIANT_TAG.into())),
    }
}

fn take(record: &mut Record, key: &str) -> Result<Value> {
    record
        .remove(key)
        .ok_or_else(|| Error::MissingField(key.to_string()))
}

fn take_string(record: &mut Record, key: &str) -> Result<String> {
    match take(record, key)? {
        Value::String(s) => Ok(s),
        other => Err(Error::invalid(key, format!("expected a string, got {other}"))),
    }
}

fn take_document(record: &mut Record) -> Result<DocumentRef> {
    take_optional_document(record)?.ok_or_else(|| Error::MissingField("document".into()))
}

fn take_optional_document(record: &mut Record) -> Result<Option<DocumentRef>> {
    match record.remove("document") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(document)) => make_document_ref(&document).map(Some),
        Some(other) => Err(Error::invalid(
            "document",
            format!("expected a record, got {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_tag_round_trips_through_its_name() {
        for tag in VariantTag::ALL {
            assert_eq!(tag.as_str().parse::<VariantTag>().unwrap(), tag);
            assert_eq!(VariantTag::from_legacy(tag.legacy_name()).unwrap(), tag);
        }
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let ts = parse_timestamp(&json!("2020-03-01T12:30:00.250000")).unwrap();
        assert_eq!(format_timestamp(ts), "2020-03-01T12:30:00.250Z");
    }

    #[test]
    fn extended_json_dates_are_accepted() {
        let millis = parse_timestamp(&json!({"$date": 1_583_065_800_000_i64})).unwrap();
        let text = parse_timestamp(&json!({"$date": "2020-03-01T12:30:00Z"})).unwrap();
        assert_eq!(millis, text);
    }

    #[test]
    fn garbage_timestamp_is_invalid_field() {
        let err = parse_timestamp(&json!("yesterday")).unwrap_err();
        assert!(matches!(err, Error::InvalidField { ref field, .. } if field == "timestamp"));
    }
}
