use aws_sdk_s3::{
    error::{ProvideErrorMetadata, SdkError},
    operation::copy_object::CopyObjectError,
    types::{MetadataDirective, ObjectCannedAcl},
    Client,
};
use chrono::Utc;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use snafu::{ResultExt, Snafu};
use tracing::info;

use crate::{path::LogObjectPath, tenant::BucketTarget, Classification};

// Everything except unreserved characters and the path separator gets
// escaped in the copy-source header.
const COPY_SOURCE_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Snafu)]
pub enum BucketDeliveryError {
    #[snafu(display(
        "Failed to copy s3://{source_bucket}/{source_key} to s3://{bucket}/{key}: {source}"
    ))]
    Copy {
        source_bucket: String,
        source_key: String,
        bucket: String,
        key: String,
        source: SdkError<CopyObjectError>,
    },
}

impl BucketDeliveryError {
    pub fn classification(&self) -> Classification {
        let BucketDeliveryError::Copy { source, .. } = self;
        match source.code() {
            // Missing destination bucket, closed-off bucket policy, or a
            // vanished source object cannot be retried into existence.
            Some("NoSuchBucket" | "AccessDenied" | "NoSuchKey") => Classification::Poison,
            _ => Classification::Retryable,
        }
    }
}

/// Destination key: `{prefix}{tenant_id}/{application}/{pod_name}/{basename}`.
/// The cluster id segment is deliberately absent from customer-visible keys.
pub fn destination_key(target: &BucketTarget, path: &LogObjectPath) -> String {
    format!(
        "{}{}/{}/{}/{}",
        target.bucket_prefix,
        path.tenant_id(),
        path.application,
        path.pod_name,
        path.file_name,
    )
}

/// Copy one source object into the customer bucket in a single server-side
/// operation, granting the bucket owner full control and stamping
/// provenance metadata.
pub async fn deliver(
    client: &Client,
    source_bucket: &str,
    source_key: &str,
    target: &BucketTarget,
    path: &LogObjectPath,
) -> Result<String, BucketDeliveryError> {
    let key = destination_key(target, path);
    let copy_source =
        utf8_percent_encode(&format!("{source_bucket}/{source_key}"), COPY_SOURCE_ENCODE)
            .to_string();

    info!(
        message = "Starting server-side object copy.",
        tenant_id = %path.tenant_id(),
        source = %format!("s3://{source_bucket}/{source_key}"),
        destination = %format!("s3://{}/{key}", target.bucket_name),
    );

    client
        .copy_object()
        .bucket(&target.bucket_name)
        .key(&key)
        .copy_source(copy_source)
        .acl(ObjectCannedAcl::BucketOwnerFullControl)
        .metadata_directive(MetadataDirective::Replace)
        .metadata("source-bucket", source_bucket)
        .metadata("source-key", source_key)
        .metadata("tenant-id", path.tenant_id())
        .metadata("application", &path.application)
        .metadata("pod-name", &path.pod_name)
        .metadata("delivery-timestamp", Utc::now().timestamp().to_string())
        .send()
        .await
        .context(CopySnafu {
            source_bucket,
            source_key,
            bucket: target.bucket_name.clone(),
            key: key.clone(),
        })?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::LogObjectPath;

    fn target(prefix: &str) -> BucketTarget {
        BucketTarget {
            bucket_name: "customer-logs".into(),
            bucket_prefix: crate::tenant::normalize_bucket_prefix(prefix.to_owned()),
        }
    }

    #[test]
    fn destination_key_strips_the_cluster_id() {
        let path = LogObjectPath::parse("c1/acme/payment/pod-1/2024-file.json.gz").unwrap();
        assert_eq!(
            destination_key(&target("logs"), &path),
            "logs/acme/payment/pod-1/2024-file.json.gz"
        );
    }

    #[test]
    fn destination_key_uses_the_basename_of_deep_source_keys() {
        let path = LogObjectPath::parse("c1/acme/payment/pod-1/2024/06/01/file.gz").unwrap();
        assert_eq!(
            destination_key(&target("ROSA/cluster-logs/"), &path),
            "ROSA/cluster-logs/acme/payment/pod-1/file.gz"
        );
    }

    #[test]
    fn destination_key_is_deterministic() {
        let path = LogObjectPath::parse("c1/acme/payment/pod-1/file.gz").unwrap();
        assert_eq!(
            destination_key(&target("logs/"), &path),
            destination_key(&target("logs"), &path)
        );
    }

    #[test]
    fn copy_source_escapes_reserved_characters_but_not_slashes() {
        let encoded = utf8_percent_encode(
            "central-logs/c1/acme/app/pod/file with=chars.json.gz",
            COPY_SOURCE_ENCODE,
        )
        .to_string();
        assert_eq!(
            encoded,
            "central-logs/c1/acme/app/pod/file%20with%3Dchars.json.gz"
        );
    }
}
