//! Object-created events.
//!
//! The storage platform delivers one notification per upload, at least once.
//! The `(bucket, key, event_id)` triple identifies a delivery: re-deliveries
//! of the same upload carry the same event id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One object-creation event in the landing zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectCreatedEvent {
    /// Delivery-stable event identifier.
    pub event_id: String,
    /// Zone (bucket) the object landed in.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// When the object was created.
    pub event_time: DateTime<Utc>,
}

impl ObjectCreatedEvent {
    /// Creates an event for a fresh upload.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            bucket: bucket.into(),
            key: key.into(),
            size,
            event_time: Utc::now(),
        }
    }

    /// Final path segment of the key.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Extension of the file name including the dot (`.MF4`), if any.
    #[must_use]
    pub fn suffix(&self) -> Option<&str> {
        let name = self.file_name();
        name.rfind('.').map(|idx| &name[idx..])
    }

    /// File name without its extension.
    #[must_use]
    pub fn stem(&self) -> &str {
        let name = self.file_name();
        name.rfind('.').map_or(name, |idx| &name[..idx])
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Notification {
    #[serde(default)]
    records: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationRecord {
    event_time: DateTime<Utc>,
    s3: NotificationEntity,
}

#[derive(Debug, Deserialize)]
struct NotificationEntity {
    bucket: NotificationBucket,
    object: NotificationObject,
}

#[derive(Debug, Deserialize)]
struct NotificationBucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NotificationObject {
    key: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    sequencer: Option<String>,
}

/// Parses an S3-style bucket notification document.
///
/// Returns one entry per `ObjectCreated:*` record, in document order; other
/// records are skipped. Each record is decoded on its own, so a bad record
/// yields an error entry without hiding its neighbours. Keys arrive
/// URL-encoded with `+` for spaces. The record's `sequencer` is the
/// delivery-stable event id; when absent, the event time stands in for it.
///
/// # Errors
///
/// Returns [`Error::InvalidEvent`] if the document is not a notification.
/// Records that cannot be decoded appear as [`Error::InvalidEvent`] entries.
pub fn parse_notification(payload: &[u8]) -> Result<Vec<Result<ObjectCreatedEvent>>> {
    let notification: Notification =
        serde_json::from_slice(payload).map_err(|e| Error::InvalidEvent {
            message: format!("malformed notification: {e}"),
        })?;

    Ok(notification
        .records
        .into_iter()
        .filter(|value| {
            value
                .get("eventName")
                .and_then(serde_json::Value::as_str)
                .is_some_and(|name| name.starts_with("ObjectCreated:"))
        })
        .map(decode_record)
        .collect())
}

fn decode_record(value: serde_json::Value) -> Result<ObjectCreatedEvent> {
    let record: NotificationRecord =
        serde_json::from_value(value).map_err(|e| Error::InvalidEvent {
            message: format!("malformed record: {e}"),
        })?;
    let raw = record.s3.object.key.replace('+', " ");
    let key = urlencoding::decode(&raw)
        .map_err(|e| Error::InvalidEvent {
            message: format!("undecodable key '{}': {e}", record.s3.object.key),
        })?
        .into_owned();
    let event_id = record
        .s3
        .object
        .sequencer
        .unwrap_or_else(|| record.event_time.to_rfc3339());
    Ok(ObjectCreatedEvent {
        event_id,
        bucket: record.s3.bucket.name,
        key,
        size: record.s3.object.size,
        event_time: record.event_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTIFICATION: &str = r#"{
        "Records": [
            {
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "eventName": "ObjectCreated:Put",
                "eventTime": "2024-03-01T12:00:00.000Z",
                "s3": {
                    "bucket": { "name": "strata-dev-raw-data" },
                    "object": {
                        "key": "logger+01/session-001.MF4",
                        "size": 2048,
                        "sequencer": "0055AED6DCD90281E5"
                    }
                }
            },
            {
                "eventName": "ObjectRemoved:Delete",
                "eventTime": "2024-03-01T12:00:01.000Z",
                "s3": {
                    "bucket": { "name": "strata-dev-raw-data" },
                    "object": { "key": "old.MF4" }
                }
            },
            {
                "eventName": "ObjectCreated:CompleteMultipartUpload",
                "eventTime": "2024-03-01T12:00:02.000Z",
                "s3": {
                    "bucket": { "name": "strata-dev-raw-data" },
                    "object": { "key": "dir%2Fnotes.txt", "size": 3 }
                }
            }
        ]
    }"#;

    #[test]
    fn parses_created_records_only() {
        let events: Vec<ObjectCreatedEvent> = parse_notification(NOTIFICATION.as_bytes())
            .expect("parse")
            .into_iter()
            .collect::<Result<_>>()
            .expect("records");
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].bucket, "strata-dev-raw-data");
        assert_eq!(events[0].key, "logger 01/session-001.MF4");
        assert_eq!(events[0].size, 2048);
        assert_eq!(events[0].event_id, "0055AED6DCD90281E5");

        assert_eq!(events[1].key, "dir/notes.txt");
        assert_eq!(events[1].event_id, "2024-03-01T12:00:02+00:00");
    }

    #[test]
    fn malformed_payload_is_invalid_event() {
        let err = parse_notification(b"not json").expect_err("should fail");
        assert!(matches!(err, Error::InvalidEvent { .. }));
    }

    #[test]
    fn bad_record_does_not_hide_its_neighbours() {
        let payload = r#"{"Records":[
            {"eventName":"ObjectCreated:Put","eventTime":"2024-03-01T12:00:00Z",
             "s3":{"bucket":{"name":"raw"},"object":{"key":"bad%FFkey.MF4"}}},
            {"eventName":"ObjectCreated:Put","eventTime":"2024-03-01T12:00:01Z",
             "s3":{"bucket":{"name":"raw"}}},
            {"eventName":"ObjectCreated:Put","eventTime":"2024-03-01T12:00:02Z",
             "s3":{"bucket":{"name":"raw"},"object":{"key":"session-009.MF4","size":7}}}
        ]}"#;

        let entries = parse_notification(payload.as_bytes()).expect("parse");
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[0], Err(Error::InvalidEvent { .. })));
        assert!(matches!(entries[1], Err(Error::InvalidEvent { .. })));
        let event = entries[2].as_ref().expect("valid record");
        assert_eq!(event.key, "session-009.MF4");
        assert_eq!(event.size, 7);
    }

    #[test]
    fn suffix_and_stem_use_the_file_name() {
        let event = ObjectCreatedEvent::new("e1", "raw", "a.b/session-001.MF4", 1);
        assert_eq!(event.file_name(), "session-001.MF4");
        assert_eq!(event.suffix(), Some(".MF4"));
        assert_eq!(event.stem(), "session-001");

        let bare = ObjectCreatedEvent::new("e2", "raw", "dir.d/README", 1);
        assert_eq!(bare.suffix(), None);
        assert_eq!(bare.stem(), "README");
    }
}
