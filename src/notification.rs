use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

/// Decode failures name the envelope layer that did not parse; all of them
/// are poison (the message can never become well-formed on redelivery).
#[derive(Debug, Snafu)]
pub enum DecodeError {
    #[snafu(display("Invalid SQS message body: {source}"))]
    Body { source: serde_json::Error },
    #[snafu(display("SQS message body has no \"Message\" field"))]
    MissingMessage,
    #[snafu(display("Invalid S3 event in notification message: {source}"))]
    Records { source: serde_json::Error },
}

/// Replay state threaded through self-reinjected messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProcessingMetadata {
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_receipt_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requeued_at: Option<String>,
}

// https://docs.aws.amazon.com/AmazonS3/latest/dev/notification-content-structure.html
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
struct S3Event {
    records: Vec<S3EventRecord>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct S3EventRecord {
    s3: S3Message,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct S3Message {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct S3Bucket {
    name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct S3Object {
    key: String,
}

/// One `(bucket, key)` announced by a notification, with the key already
/// percent-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

/// The decoded notification: every object it announces plus any replay state
/// a previous attempt attached.
#[derive(Debug, Clone)]
pub struct Notification {
    pub objects: Vec<ObjectRef>,
    pub metadata: ProcessingMetadata,
}

/// Peel the envelopes: the queue message body is the JSON of an SNS
/// notification whose `Message` string is itself the JSON of an S3 record
/// set. `processing_metadata` rides at the top level of the body, next to
/// `Message`.
pub fn decode(body: &str) -> Result<Notification, DecodeError> {
    let envelope: serde_json::Value = serde_json::from_str(body).context(BodySnafu)?;

    let message = envelope
        .get("Message")
        .and_then(serde_json::Value::as_str)
        .ok_or(DecodeError::MissingMessage)?;

    let event: S3Event = serde_json::from_str(message).context(RecordsSnafu)?;

    let metadata = envelope
        .get("processing_metadata")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .context(BodySnafu)?
        .unwrap_or_default();

    let objects = event
        .records
        .into_iter()
        .map(|record| ObjectRef {
            bucket: record.s3.bucket.name,
            key: decode_object_key(&record.s3.object.key),
        })
        .collect();

    Ok(Notification { objects, metadata })
}

/// S3 notifications URL-encode object keys with `+` for spaces.
pub fn decode_object_key(raw: &str) -> String {
    let plus_decoded = raw.replace('+', " ");
    percent_decode_str(&plus_decoded)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .unwrap_or(plus_decoded)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn wrap(records_json: &str) -> String {
        serde_json::json!({ "Message": records_json }).to_string()
    }

    fn records(key: &str) -> String {
        serde_json::json!({
            "Records": [
                { "s3": { "bucket": { "name": "central-logs" }, "object": { "key": key } } }
            ]
        })
        .to_string()
    }

    #[test]
    fn decodes_nested_envelopes() {
        let body = wrap(&records("prod-c1/acme/payment/pod-1/file.json.gz"));
        let notification = decode(&body).unwrap();
        assert_eq!(
            notification.objects,
            vec![ObjectRef {
                bucket: "central-logs".into(),
                key: "prod-c1/acme/payment/pod-1/file.json.gz".into(),
            }]
        );
        assert_eq!(notification.metadata, ProcessingMetadata::default());
    }

    #[test]
    fn percent_decodes_object_keys() {
        let body = wrap(&records("prod-c1/acme/payment/pod-1/file+with%3Dspace.json.gz"));
        let notification = decode(&body).unwrap();
        assert_eq!(
            notification.objects[0].key,
            "prod-c1/acme/payment/pod-1/file with=space.json.gz"
        );
    }

    #[test]
    fn surfaces_processing_metadata() {
        let body = serde_json::json!({
            "Message": records("c/acme/app/pod/f.gz"),
            "processing_metadata": {
                "offset": 1000,
                "retry_count": 2,
                "original_receipt_handle": "rh-1",
                "requeued_at": "2024-01-01T00:00:00+00:00",
            },
        })
        .to_string();

        let notification = decode(&body).unwrap();
        assert_eq!(notification.metadata.offset, 1000);
        assert_eq!(notification.metadata.retry_count, 2);
        assert_eq!(
            notification.metadata.original_receipt_handle.as_deref(),
            Some("rh-1")
        );
    }

    #[test]
    fn rejects_non_json_body() {
        assert!(matches!(decode("not json"), Err(DecodeError::Body { .. })));
    }

    #[test]
    fn rejects_body_without_message() {
        let body = indoc! {r#"
            {"Subject": "hello"}
        "#};
        assert!(matches!(decode(body), Err(DecodeError::MissingMessage)));
    }

    #[test]
    fn rejects_malformed_record_set() {
        let body = wrap(r#"{"Records": "nope"}"#);
        assert!(matches!(decode(&body), Err(DecodeError::Records { .. })));
    }
}
