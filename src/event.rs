use chrono::DateTime;
use serde_json::Value;
use tracing::warn;

/// Record fields that are transport metadata rather than log content. They
/// are stripped when a record has no `message` field and the remainder is
/// promoted to the message.
const TRANSPORT_METADATA_FIELDS: [&str; 7] = [
    "cluster_id",
    "namespace",
    "application",
    "pod_name",
    "ingest_timestamp",
    "timestamp",
    "kubernetes",
];

/// Timestamps larger than this are already in milliseconds; anything at or
/// below it is seconds. Shared by every timestamp comparison in the crate.
const MILLIS_THRESHOLD: f64 = 1_000_000_000_000.0;

/// A normalized log event. `message` keeps its structure: a JSON object stays
/// a JSON object until the delivery engine serializes it for transport.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub timestamp_ms: i64,
    pub message: Value,
}

impl LogEvent {
    /// The message as it goes on the wire: strings verbatim, structured
    /// values as JSON text (not escaped into a JSON string).
    pub fn message_text(&self) -> String {
        match &self.message {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Interpret a raw timestamp value as epoch milliseconds, or `None` when it
/// cannot be parsed.
///
/// Strings are parsed as ISO-8601; numbers above the millisecond threshold
/// pass through, the rest are seconds and get scaled. Clamped at zero.
pub fn timestamp_to_millis(value: &Value) -> Option<i64> {
    let millis = match value {
        Value::String(text) => match DateTime::parse_from_rfc3339(text) {
            Ok(parsed) => parsed.timestamp_millis(),
            Err(error) => {
                warn!(message = "Failed to parse timestamp string.", timestamp = %text, %error);
                return None;
            }
        },
        Value::Number(number) => {
            let value = number.as_f64()?;
            if value > MILLIS_THRESHOLD {
                value as i64
            } else {
                (value * 1000.0) as i64
            }
        }
        other => {
            warn!(message = "Unknown timestamp type.", value = %other);
            return None;
        }
    };
    Some(millis.max(0))
}

/// Convert a parsed record into a [`LogEvent`], or `None` when the record is
/// not an object and carries nothing deliverable. `fallback_ms` (normally
/// the source object's modification time) stands in for absent or
/// unparseable timestamps.
pub fn normalize_record(record: Value, fallback_ms: i64) -> Option<LogEvent> {
    let Value::Object(mut fields) = record else {
        warn!(message = "Dropping non-object log record.", record = %record);
        return None;
    };

    let timestamp_ms = fields
        .get("timestamp")
        .and_then(timestamp_to_millis)
        .unwrap_or(fallback_ms)
        .max(0);

    let message = match fields.get("message") {
        Some(Value::Null) | None => None,
        Some(Value::String(text)) if text.is_empty() => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(Value::Array(items)) if items.is_empty() => None,
        Some(_) => fields.remove("message"),
    };

    let message = message.unwrap_or_else(|| {
        // No usable message field: deliver the record itself, minus the
        // transport metadata.
        for field in TRANSPORT_METADATA_FIELDS {
            fields.remove(field);
        }
        Value::Object(fields)
    });

    Some(LogEvent {
        timestamp_ms,
        message,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const FALLBACK_MS: i64 = 1_700_000_000_000;

    #[test]
    fn iso_timestamps_become_millis() {
        let cases = [
            ("2024-01-01T00:00:00Z", 1_704_067_200_000),
            ("2024-01-01T00:00:01Z", 1_704_067_201_000),
            ("2024-01-01T00:00:00+02:00", 1_704_060_000_000),
        ];
        for (text, expected) in cases {
            assert_eq!(timestamp_to_millis(&json!(text)), Some(expected), "{text}");
        }
    }

    #[test]
    fn numeric_timestamps_detect_seconds_vs_millis() {
        // Above 10^12 the value is already milliseconds.
        assert_eq!(
            timestamp_to_millis(&json!(1_704_067_200_000_i64)),
            Some(1_704_067_200_000)
        );
        // At or below, it is seconds.
        assert_eq!(
            timestamp_to_millis(&json!(1_704_067_200_i64)),
            Some(1_704_067_200_000)
        );
        assert_eq!(
            timestamp_to_millis(&json!(1_704_067_200.5)),
            Some(1_704_067_200_500)
        );
    }

    #[test]
    fn pre_epoch_timestamps_clamp_to_zero() {
        assert_eq!(timestamp_to_millis(&json!("1969-12-31T00:00:00Z")), Some(0));
    }

    #[test]
    fn unparseable_timestamps_yield_none() {
        assert_eq!(timestamp_to_millis(&json!("not-a-timestamp")), None);
        assert_eq!(timestamp_to_millis(&json!(["nested"])), None);
    }

    #[test]
    fn absent_or_unparseable_timestamp_uses_the_fallback() {
        let event = normalize_record(json!({"message": "no timestamp"}), FALLBACK_MS).unwrap();
        assert_eq!(event.timestamp_ms, FALLBACK_MS);

        let event = normalize_record(
            json!({"timestamp": "garbage", "message": "bad timestamp"}),
            FALLBACK_MS,
        )
        .unwrap();
        assert_eq!(event.timestamp_ms, FALLBACK_MS);
    }

    #[test]
    fn message_field_is_used_verbatim() {
        let event = normalize_record(
            json!({
                "timestamp": "2024-01-01T00:00:00Z",
                "message": "plain text line",
            }),
            FALLBACK_MS,
        )
        .unwrap();
        assert_eq!(event.timestamp_ms, 1_704_067_200_000);
        assert_eq!(event.message, json!("plain text line"));
        assert_eq!(event.message_text(), "plain text line");
    }

    #[test]
    fn structured_message_stays_structured() {
        let event = normalize_record(
            json!({
                "timestamp": 1_704_067_200_i64,
                "message": {"level": "info", "msg": "started"},
            }),
            FALLBACK_MS,
        )
        .unwrap();
        assert_eq!(event.message, json!({"level": "info", "msg": "started"}));
        // Serialized as JSON text at transport, not escaped into a string.
        assert_eq!(event.message_text(), r#"{"level":"info","msg":"started"}"#);
    }

    #[test]
    fn missing_message_strips_transport_metadata() {
        let event = normalize_record(
            json!({
                "timestamp": "2024-01-01T00:00:00Z",
                "cluster_id": "prod-c1",
                "namespace": "acme",
                "application": "payment",
                "pod_name": "pod-1",
                "ingest_timestamp": "2024-01-01T00:00:02Z",
                "kubernetes": {"labels": {}},
                "level": "error",
                "detail": "boom",
            }),
            FALLBACK_MS,
        )
        .unwrap();
        assert_eq!(event.message, json!({"level": "error", "detail": "boom"}));
    }

    #[test]
    fn empty_message_falls_back_to_record() {
        let event = normalize_record(
            json!({
                "message": "",
                "level": "warn",
            }),
            FALLBACK_MS,
        )
        .unwrap();
        assert_eq!(event.message, json!({"message": "", "level": "warn"}));
    }

    #[test]
    fn non_object_records_are_dropped() {
        assert_eq!(normalize_record(json!("bare string"), FALLBACK_MS), None);
        assert_eq!(normalize_record(json!(42), FALLBACK_MS), None);
    }

    #[test]
    fn normalization_is_a_fixed_point() {
        let once = normalize_record(
            json!({
                "timestamp": 1_704_067_200_i64,
                "message": {"a": 1},
            }),
            FALLBACK_MS,
        )
        .unwrap();

        let again = normalize_record(
            json!({
                "timestamp": once.timestamp_ms,
                "message": once.message.clone(),
            }),
            FALLBACK_MS,
        )
        .unwrap();

        assert_eq!(once, again);
    }
}
