use std::io::Read;

use aws_sdk_s3::{error::SdkError, operation::get_object::GetObjectError};
use chrono::Utc;
use flate2::read::MultiGzDecoder;
use snafu::{ResultExt, Snafu};
use tracing::{debug, info, warn};

use crate::{
    event::{normalize_record, LogEvent},
    Classification,
};

#[derive(Debug, Snafu)]
pub enum FetchError {
    #[snafu(display("Failed to fetch s3://{bucket}/{key}: {source}"))]
    GetObject {
        bucket: String,
        key: String,
        source: SdkError<GetObjectError>,
    },
    #[snafu(display("Failed to read all of s3://{bucket}/{key}: {source}"))]
    ReadBody {
        bucket: String,
        key: String,
        source: aws_smithy_types::byte_stream::error::Error,
    },
    #[snafu(display("Failed to decompress s3://{bucket}/{key}: {source}"))]
    Decompress {
        bucket: String,
        key: String,
        source: std::io::Error,
    },
    #[snafu(display("Log file s3://{bucket}/{key} is not valid UTF-8: {source}"))]
    NotUtf8 {
        bucket: String,
        key: String,
        source: std::string::FromUtf8Error,
    },
}

impl FetchError {
    pub fn classification(&self) -> Classification {
        match self {
            // A notification for an object that no longer exists will never
            // succeed.
            FetchError::GetObject { source, .. }
                if source
                    .as_service_error()
                    .is_some_and(GetObjectError::is_no_such_key) =>
            {
                Classification::Poison
            }
            _ => Classification::Retryable,
        }
    }
}

/// Fetch a log file and parse it into normalized events, returning the
/// object's server-recorded modification time in epoch milliseconds as a
/// fallback timestamp.
pub async fn fetch_and_parse(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
) -> Result<(Vec<LogEvent>, i64), FetchError> {
    let response = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .context(GetObjectSnafu { bucket, key })?;

    let source_mtime_ms = response
        .last_modified()
        .and_then(|modified| modified.to_millis().ok())
        .unwrap_or_else(|| Utc::now().timestamp_millis());

    let body = response
        .body
        .collect()
        .await
        .context(ReadBodySnafu { bucket, key })?
        .into_bytes();

    debug!(
        message = "Fetched log object.",
        bucket = %bucket,
        key = %key,
        bytes = body.len(),
    );

    let content = if key.ends_with(".gz") {
        let mut decompressed = Vec::new();
        MultiGzDecoder::new(body.as_ref())
            .read_to_end(&mut decompressed)
            .context(DecompressSnafu { bucket, key })?;
        decompressed
    } else {
        body.to_vec()
    };

    let content = String::from_utf8(content).context(NotUtf8Snafu { bucket, key })?;
    let events = parse_log_records(&content, source_mtime_ms);

    info!(
        message = "Parsed log object.",
        bucket = %bucket,
        key = %key,
        events = events.len(),
    );

    Ok((events, source_mtime_ms))
}

/// Parse file content into events: line-delimited JSON first, falling back
/// to a single JSON document only when no line parsed. Records that yield no
/// event are dropped with a warning inside the normalizer; `fallback_ms`
/// stands in for missing timestamps.
pub fn parse_log_records(content: &str, fallback_ms: i64) -> Vec<LogEvent> {
    let mut events = Vec::new();
    let mut line_errors = 0usize;

    for line in content.lines().filter(|line| !line.trim().is_empty()) {
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(serde_json::Value::Array(records)) => {
                events.extend(
                    records
                        .into_iter()
                        .filter_map(|record| normalize_record(record, fallback_ms)),
                );
            }
            Ok(record) => events.extend(normalize_record(record, fallback_ms)),
            Err(error) => {
                line_errors += 1;
                if line_errors <= 3 {
                    warn!(
                        message = "Log line is not valid JSON.",
                        %error,
                        line = %line.chars().take(100).collect::<String>(),
                    );
                }
            }
        }
    }

    if events.is_empty() && line_errors > 0 {
        debug!(message = "No events from line parsing, trying whole-document parse.");
        match serde_json::from_str::<serde_json::Value>(content) {
            Ok(serde_json::Value::Array(records)) => {
                events.extend(
                    records
                        .into_iter()
                        .filter_map(|record| normalize_record(record, fallback_ms)),
                );
            }
            Ok(record) => events.extend(normalize_record(record, fallback_ms)),
            Err(error) => warn!(message = "Fallback JSON parsing failed.", %error),
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_ndjson_lines_in_order() {
        let content = concat!(
            "{\"timestamp\": \"2024-01-01T00:00:00Z\", \"message\": \"first\"}\n",
            "{\"timestamp\": \"2024-01-01T00:00:01Z\", \"message\": \"second\"}\n",
        );
        let events = parse_log_records(content, 0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp_ms, 1_704_067_200_000);
        assert_eq!(events[0].message, json!("first"));
        assert_eq!(events[1].timestamp_ms, 1_704_067_201_000);
    }

    #[test]
    fn expands_array_lines() {
        let content = r#"[{"timestamp": 1704067200, "message": "a"}, {"timestamp": 1704067201, "message": "b"}]"#;
        let events = parse_log_records(content, 0);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn skips_blank_lines_and_drops_unparseable_records() {
        let content = "\n{\"timestamp\": 1704067200, \"message\": \"ok\"}\n\n\"just a string\"\n";
        let events = parse_log_records(content, 0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, json!("ok"));
    }

    #[test]
    fn falls_back_to_whole_document_when_lines_fail() {
        // Pretty-printed JSON: every line fails individually, the document
        // parses as a whole.
        let content = "[\n  {\"timestamp\": 1704067200,\n   \"message\": \"pretty\"}\n]\n";
        let events = parse_log_records(content, 0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, json!("pretty"));
    }

    #[test]
    fn no_fallback_when_lines_parse_but_yield_nothing() {
        let content = "42\n7\n";
        assert!(parse_log_records(content, 0).is_empty());
    }
}
