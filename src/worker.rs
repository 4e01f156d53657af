use std::{collections::HashSet, time::Duration};

use aws_config::BehaviorVersion;
use aws_sdk_sqs::{
    error::SdkError, operation::receive_message::ReceiveMessageError,
    types::MessageAttributeValue,
};
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_types::region::Region;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use snafu::Snafu;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::Options,
    credentials::{CredentialBroker, CredentialsError},
    event::LogEvent,
    fetch::{self, FetchError},
    metrics::{
        Metrics, FAILED_DELIVERY, FAILED_EVENTS, SUCCESSFUL_DELIVERY, SUCCESSFUL_EVENTS,
    },
    notification::{self, ObjectRef, ProcessingMetadata},
    path::LogObjectPath,
    sinks::{
        cloudwatch_logs::{CloudWatchLogsSink, DeliveryStats, StreamDeliveryError},
        s3::{self as s3_sink, BucketDeliveryError},
    },
    tenant::{BucketTarget, ConfigStore, DeliveryKind, DeliveryTarget, StreamTarget, TenantConfig},
    Classification,
};

/// Ceiling on self-reinjections per message before the replay is abandoned.
pub const MAX_REINJECTION_RETRIES: u32 = 3;
const MAX_REINJECTION_DELAY_SECS: u64 = 900;

const RECEIVE_MAX_MESSAGES: i32 = 10;
const RECEIVE_WAIT_TIME_SECS: i32 = 20;
const VISIBILITY_TIMEOUT_SECS: i32 = 300;
/// A record's wall-clock budget is bounded by the queue visibility timeout.
const RECORD_DEADLINE: Duration = Duration::from_secs(300);
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// One queue record as handed to the worker: poll-mode receives these from
/// SQS, batch-mode reads them from a JSON record batch.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueRecord {
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "receiptHandle", default)]
    pub receipt_handle: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<QueueRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// Every non-skipped dispatch succeeded (or was poison); acknowledge.
    Success,
    /// Nothing succeeded and nothing is retryable; acknowledge to stop the
    /// redelivery loop.
    Poison,
    /// At least one delivery hit a transient failure; leave on the queue.
    Retry,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryTally {
    pub successful_deliveries: usize,
    pub failed_deliveries: usize,
    pub poisoned: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RecordOutcome {
    pub status: RecordStatus,
    pub tally: DeliveryTally,
}

/// Per-delivery failure, unified across the pipeline stages so the loop can
/// dispatch on classification without knowing which stage failed.
#[derive(Debug, Snafu)]
pub enum DeliveryError {
    #[snafu(transparent)]
    Fetch { source: FetchError },
    #[snafu(transparent)]
    Credentials { source: CredentialsError },
    #[snafu(transparent)]
    Stream { source: StreamDeliveryError },
    #[snafu(transparent)]
    Bucket { source: BucketDeliveryError },
}

impl DeliveryError {
    pub fn classification(&self) -> Classification {
        match self {
            DeliveryError::Fetch { source } => source.classification(),
            DeliveryError::Credentials { source } => source.classification(),
            DeliveryError::Stream { source } => source.classification(),
            DeliveryError::Bucket { source } => source.classification(),
        }
    }

    fn stats(&self) -> Option<DeliveryStats> {
        match self {
            DeliveryError::Stream { source } => source.stats(),
            _ => None,
        }
    }
}

/// Owns every typed client the worker needs. Components receive it by
/// reference; there is no process-global state.
pub struct WorkerContext {
    pub options: Options,
    pub s3: aws_sdk_s3::Client,
    pub sqs: aws_sdk_sqs::Client,
    pub config_store: ConfigStore,
    pub broker: CredentialBroker,
    pub metrics: Metrics,
}

impl WorkerContext {
    pub async fn new(options: Options) -> crate::Result<Self> {
        let central_role_arn = options
            .central_role_arn
            .clone()
            .ok_or("CENTRAL_LOG_DISTRIBUTION_ROLE is not set")?;

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(options.region.clone()))
            .load()
            .await;

        let config_store = ConfigStore::new(
            aws_sdk_dynamodb::Client::new(&sdk_config),
            options.tenant_config_table.clone(),
        );
        let metrics = Metrics::new(aws_sdk_cloudwatch::Client::new(&sdk_config));
        let broker = CredentialBroker::new(sdk_config.clone(), central_role_arn);

        Ok(Self {
            s3: aws_sdk_s3::Client::new(&sdk_config),
            sqs: aws_sdk_sqs::Client::new(&sdk_config),
            config_store,
            broker,
            metrics,
            options,
        })
    }
}

pub struct Worker {
    ctx: WorkerContext,
}

impl Worker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Batch-mode entry point: process a batch of records concurrently and
    /// return the identifiers of records that must go back to the queue.
    pub async fn process_batch(&self, records: Vec<QueueRecord>) -> Vec<String> {
        info!(message = "Processing notification records.", count = records.len());

        let outcomes = futures::future::join_all(
            records
                .iter()
                .map(|record| self.process_record_with_deadline(record)),
        )
        .await;

        let mut failures = Vec::new();
        let mut tally = DeliveryTally::default();
        for (record, outcome) in records.iter().zip(outcomes) {
            tally.successful_deliveries += outcome.tally.successful_deliveries;
            tally.failed_deliveries += outcome.tally.failed_deliveries;
            tally.poisoned += outcome.tally.poisoned;
            if outcome.status == RecordStatus::Retry {
                failures.push(record.message_id.clone());
            }
        }

        info!(
            message = "Batch processing complete.",
            records = records.len(),
            failed_records = failures.len(),
            successful_deliveries = tally.successful_deliveries,
            failed_deliveries = tally.failed_deliveries,
            poisoned = tally.poisoned,
        );

        failures
    }

    /// Batch mode over stdin: read one JSON record batch, emit the failed
    /// record identifiers as JSON on stdout.
    pub async fn run_batch_stdin(&self) -> crate::Result<()> {
        let mut input = String::new();
        tokio::io::stdin().read_to_string(&mut input).await?;
        if input.trim().is_empty() {
            return Err("no record batch provided on stdin".into());
        }

        let batch: RecordBatch = serde_json::from_str(&input)?;
        let failures = self.process_batch(batch.records).await;

        let response = serde_json::json!({
            "batchItemFailures": failures
                .iter()
                .map(|id| serde_json::json!({ "itemIdentifier": id }))
                .collect::<Vec<_>>(),
        });
        println!("{response}");
        Ok(())
    }

    /// Poll-mode entry point: receive, process, delete. Runs until
    /// interrupted.
    pub async fn run_poll(&self) -> crate::Result<()> {
        let queue_url = self
            .ctx
            .options
            .queue_url
            .clone()
            .ok_or("SQS_QUEUE_URL is not set")?;

        info!(message = "Starting poll mode.", queue_url = %queue_url);

        loop {
            let received = tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!(message = "Received interrupt signal, shutting down.");
                    return Ok(());
                }
                result = self.receive_messages(&queue_url) => result,
            };

            let records = match received {
                Ok(records) => records,
                Err(error) => {
                    error!(
                        message = "Failed to receive messages.",
                        error = %DisplayErrorContext(&error),
                    );
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    continue;
                }
            };

            if records.is_empty() {
                debug!(message = "No messages received, continuing to poll.");
                continue;
            }

            info!(message = "Received messages from queue.", count = records.len());

            let outcomes = futures::future::join_all(
                records
                    .iter()
                    .map(|record| self.process_record_with_deadline(record)),
            )
            .await;

            for (record, outcome) in records.iter().zip(outcomes) {
                match outcome.status {
                    RecordStatus::Retry => {
                        info!(
                            message = "Leaving message in flight for redelivery.",
                            message_id = %record.message_id,
                        );
                    }
                    RecordStatus::Success | RecordStatus::Poison => {
                        self.delete_message(&queue_url, record).await;
                    }
                }
            }
        }
    }

    /// Scan-mode entry point: periodically list the source bucket and run
    /// unseen log files through the normal record path.
    pub async fn run_scan(&self) -> crate::Result<()> {
        let bucket = self.ctx.options.source_bucket.clone();
        let interval = self.ctx.options.scan_interval;

        info!(
            message = "Starting scan mode.",
            bucket = %bucket,
            interval_secs = interval.as_secs(),
        );

        let mut processed = HashSet::new();
        loop {
            if let Err(error) = self.scan_once(&bucket, &mut processed).await {
                error!(message = "Bucket scan failed.", %error);
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!(message = "Received interrupt signal, shutting down.");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn scan_once(
        &self,
        bucket: &str,
        processed: &mut HashSet<String>,
    ) -> crate::Result<()> {
        let response = self.ctx.s3.list_objects_v2().bucket(bucket).send().await?;

        for object in response.contents() {
            let Some(key) = object.key() else { continue };
            if !key.ends_with(".json.gz") || processed.contains(key) {
                continue;
            }

            info!(message = "Processing new object from scan.", key = %key);
            let record = synthesize_record(bucket, key);
            let outcome = self.process_record_with_deadline(&record).await;
            if outcome.status != RecordStatus::Retry {
                processed.insert(key.to_owned());
            }
        }

        Ok(())
    }

    async fn process_record_with_deadline(&self, record: &QueueRecord) -> RecordOutcome {
        match tokio::time::timeout(RECORD_DEADLINE, self.process_record(record)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    message = "Record processing exceeded the visibility deadline.",
                    message_id = %record.message_id,
                );
                RecordOutcome {
                    status: RecordStatus::Retry,
                    tally: DeliveryTally::default(),
                }
            }
        }
    }

    /// Process one queue record: decode, fan out to every enabled delivery
    /// configuration, classify failures, and report the aggregate.
    pub async fn process_record(&self, record: &QueueRecord) -> RecordOutcome {
        let mut tally = DeliveryTally::default();

        let notification = match notification::decode(&record.body) {
            Ok(notification) => notification,
            Err(error) => {
                warn!(
                    message = "Invalid notification, removing from queue.",
                    message_id = %record.message_id,
                    %error,
                );
                tally.poisoned += 1;
                return RecordOutcome {
                    status: RecordStatus::Poison,
                    tally,
                };
            }
        };

        let mut retryable = false;

        'objects: for object in &notification.objects {
            info!(
                message = "Processing log object.",
                bucket = %object.bucket,
                key = %object.key,
            );

            let path = match LogObjectPath::parse(&object.key) {
                Ok(path) => path,
                Err(error) => {
                    warn!(
                        message = "Unresolvable object key, removing from queue.",
                        key = %object.key,
                        %error,
                    );
                    tally.poisoned += 1;
                    continue;
                }
            };

            let configs = match self
                .ctx
                .config_store
                .get_enabled_configs(path.tenant_id())
                .await
            {
                Ok(configs) => configs,
                Err(error) => match error.classification() {
                    Classification::Poison => {
                        warn!(
                            message = "Tenant not found, removing from queue.",
                            tenant_id = %path.tenant_id(),
                            key = %object.key,
                            %error,
                        );
                        tally.poisoned += 1;
                        continue;
                    }
                    Classification::Retryable => {
                        error!(
                            message = "Failed to read delivery configurations, will retry.",
                            tenant_id = %path.tenant_id(),
                            %error,
                        );
                        retryable = true;
                        break 'objects;
                    }
                },
            };

            for config in &configs {
                if !config.allows_application(&path.application) {
                    info!(
                        message = "Skipping delivery, application filtered out.",
                        tenant_id = %config.tenant_id,
                        delivery_kind = %config.kind(),
                        application = %path.application,
                    );
                    continue;
                }

                info!(
                    message = "Dispatching delivery.",
                    tenant_id = %config.tenant_id,
                    delivery_kind = %config.kind(),
                    application = %path.application,
                    environment = path.environment.as_str(),
                );

                match &config.target {
                    DeliveryTarget::Stream(target) => {
                        self.dispatch_stream(
                            record,
                            &notification.metadata,
                            object,
                            &path,
                            config,
                            target,
                            &mut tally,
                            &mut retryable,
                        )
                        .await;
                    }
                    DeliveryTarget::Bucket(target) => {
                        self.dispatch_bucket(object, &path, config, target, &mut tally, &mut retryable)
                            .await;
                    }
                }
            }
        }

        let status = if retryable {
            RecordStatus::Retry
        } else if tally.poisoned > 0
            && tally.successful_deliveries == 0
            && tally.failed_deliveries == 0
        {
            RecordStatus::Poison
        } else {
            RecordStatus::Success
        };

        RecordOutcome { status, tally }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_stream(
        &self,
        record: &QueueRecord,
        metadata: &ProcessingMetadata,
        object: &ObjectRef,
        path: &LogObjectPath,
        config: &TenantConfig,
        target: &StreamTarget,
        tally: &mut DeliveryTally,
        retryable: &mut bool,
    ) {
        match self.deliver_stream(metadata, object, path, config, target).await {
            Ok(stats) => {
                tally.successful_deliveries += 1;
                info!(
                    message = "Stream delivery complete.",
                    tenant_id = %config.tenant_id,
                    successful_events = stats.successful_events,
                    total_processed = stats.total_processed,
                );
                self.ctx
                    .metrics
                    .push_delivery(
                        path.tenant_id(),
                        DeliveryKind::Stream,
                        &[
                            (SUCCESSFUL_EVENTS, stats.successful_events),
                            (FAILED_EVENTS, stats.failed_events),
                            (SUCCESSFUL_DELIVERY, 1),
                        ],
                    )
                    .await;
            }
            Err(error) => {
                let mut counters = vec![(FAILED_DELIVERY, 1)];
                if let Some(stats) = error.stats() {
                    counters.push((SUCCESSFUL_EVENTS, stats.successful_events));
                    counters.push((FAILED_EVENTS, stats.failed_events));
                }

                match error.classification() {
                    Classification::Poison => {
                        warn!(
                            message = "Stream delivery failed permanently, removing from queue.",
                            tenant_id = %config.tenant_id,
                            %error,
                        );
                        tally.poisoned += 1;
                    }
                    Classification::Retryable => {
                        error!(
                            message = "Stream delivery failed, will retry.",
                            tenant_id = %config.tenant_id,
                            %error,
                        );
                        tally.failed_deliveries += 1;
                        *retryable = true;

                        if let Some(receipt_handle) = &record.receipt_handle {
                            self.reinject(&record.body, receipt_handle, metadata.offset)
                                .await;
                        }
                    }
                }

                self.ctx
                    .metrics
                    .push_delivery(path.tenant_id(), DeliveryKind::Stream, &counters)
                    .await;
            }
        }
    }

    async fn deliver_stream(
        &self,
        metadata: &ProcessingMetadata,
        object: &ObjectRef,
        path: &LogObjectPath,
        config: &TenantConfig,
        target: &StreamTarget,
    ) -> Result<DeliveryStats, DeliveryError> {
        let (events, _source_mtime_ms) =
            fetch::fetch_and_parse(&self.ctx.s3, &object.bucket, &object.key).await?;

        let events = skip_processed_events(events, metadata.offset);
        if events.is_empty() {
            info!(
                message = "All events already processed, skipping delivery.",
                key = %object.key,
                offset = metadata.offset,
            );
            return Ok(DeliveryStats::default());
        }

        let region = config
            .target_region
            .as_deref()
            .unwrap_or(&self.ctx.options.region);
        let session_id = Uuid::new_v4().to_string();
        let credentials = self
            .ctx
            .broker
            .chained_credentials(&target.log_distribution_role, region, &session_id)
            .await?;

        // The stream name is the source pod name, verbatim.
        let sink = CloudWatchLogsSink::new(
            self.ctx.broker.logs_client(region, credentials),
            target.log_group_name.clone(),
            path.pod_name.clone(),
            self.ctx.options.retry_attempts,
            self.ctx.options.max_batch_size,
        );

        sink.ensure_destination().await?;
        Ok(sink.deliver(&events).await?)
    }

    async fn dispatch_bucket(
        &self,
        object: &ObjectRef,
        path: &LogObjectPath,
        config: &TenantConfig,
        target: &BucketTarget,
        tally: &mut DeliveryTally,
        retryable: &mut bool,
    ) {
        match self.deliver_bucket(object, path, config, target).await {
            Ok(destination_key) => {
                tally.successful_deliveries += 1;
                info!(
                    message = "Bucket delivery complete.",
                    tenant_id = %config.tenant_id,
                    destination_key = %destination_key,
                );
                self.ctx
                    .metrics
                    .push_delivery(
                        path.tenant_id(),
                        DeliveryKind::Bucket,
                        &[(SUCCESSFUL_DELIVERY, 1)],
                    )
                    .await;
            }
            Err(error) => {
                match error.classification() {
                    Classification::Poison => {
                        warn!(
                            message = "Bucket delivery failed permanently, removing from queue.",
                            tenant_id = %config.tenant_id,
                            %error,
                        );
                        tally.poisoned += 1;
                    }
                    Classification::Retryable => {
                        error!(
                            message = "Bucket delivery failed, will retry.",
                            tenant_id = %config.tenant_id,
                            %error,
                        );
                        tally.failed_deliveries += 1;
                        *retryable = true;
                    }
                }
                self.ctx
                    .metrics
                    .push_delivery(
                        path.tenant_id(),
                        DeliveryKind::Bucket,
                        &[(FAILED_DELIVERY, 1)],
                    )
                    .await;
            }
        }
    }

    async fn deliver_bucket(
        &self,
        object: &ObjectRef,
        path: &LogObjectPath,
        config: &TenantConfig,
        target: &BucketTarget,
    ) -> Result<String, DeliveryError> {
        // One hop only: the central role has been granted write access to
        // the destination bucket out-of-band.
        let credentials = self.ctx.broker.central_credentials("S3LogDelivery").await?;
        let region = config
            .target_region
            .as_deref()
            .unwrap_or(&self.ctx.options.region);
        let client = self.ctx.broker.s3_client(region, credentials);

        Ok(s3_sink::deliver(&client, &object.bucket, &object.key, target, path).await?)
    }

    /// Publish a modified copy of the failed message back to the queue with
    /// an updated offset and retry counter. Best-effort: every failure here
    /// is logged and swallowed, the original message is still in flight.
    async fn reinject(&self, body: &str, receipt_handle: &str, current_offset: usize) {
        let Some(queue_url) = &self.ctx.options.queue_url else {
            warn!(message = "SQS_QUEUE_URL not configured, cannot requeue message.");
            return;
        };

        let mut message: serde_json::Value = match serde_json::from_str(body) {
            Ok(message) => message,
            Err(error) => {
                error!(message = "Failed to parse message body for requeuing.", %error);
                return;
            }
        };
        let Some(fields) = message.as_object_mut() else {
            error!(message = "Message body is not a JSON object, cannot requeue.");
            return;
        };

        let existing = fields
            .get("processing_metadata")
            .and_then(|value| {
                serde_json::from_value::<ProcessingMetadata>(value.clone()).ok()
            })
            .unwrap_or_default();

        let Some((updated, delay_secs)) = next_reinjection(
            &existing,
            current_offset,
            receipt_handle,
            Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        ) else {
            error!(
                message = "Message exceeded the maximum reinjection count, discarding.",
                max_retries = MAX_REINJECTION_RETRIES,
            );
            return;
        };

        info!(
            message = "Requeuing message for replay.",
            offset = updated.offset,
            retry_count = updated.retry_count,
            delay_secs,
        );

        let retry_count = updated.retry_count;
        fields.insert("processing_metadata".into(), serde_json::json!(updated));

        let attributes = [
            ("ProcessingOffset", current_offset.to_string()),
            ("RetryCount", retry_count.to_string()),
        ];
        let mut request = self
            .ctx
            .sqs
            .send_message()
            .queue_url(queue_url)
            .message_body(message.to_string())
            .delay_seconds(delay_secs as i32);
        for (name, value) in attributes {
            let attribute = match MessageAttributeValue::builder()
                .data_type("Number")
                .string_value(value)
                .build()
            {
                Ok(attribute) => attribute,
                Err(error) => {
                    error!(message = "Failed to build message attribute.", %error);
                    return;
                }
            };
            request = request.message_attributes(name, attribute);
        }

        match request.send().await {
            Ok(response) => {
                info!(
                    message = "Successfully requeued message.",
                    message_id = response.message_id().unwrap_or("<unknown>"),
                );
            }
            Err(error) => {
                error!(
                    message = "Failed to requeue message.",
                    error = %DisplayErrorContext(&error),
                );
            }
        }
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
    ) -> Result<Vec<QueueRecord>, SdkError<ReceiveMessageError>> {
        let response = self
            .ctx
            .sqs
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(RECEIVE_MAX_MESSAGES)
            .wait_time_seconds(RECEIVE_WAIT_TIME_SECS)
            .visibility_timeout(VISIBILITY_TIMEOUT_SECS)
            .send()
            .await?;

        let records = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|message| {
                let message_id = message
                    .message_id
                    .unwrap_or_else(|| "<unknown>".to_owned());
                let Some(receipt_handle) = message.receipt_handle else {
                    warn!(
                        message = "Refusing to process message with no receipt handle.",
                        message_id = %message_id,
                    );
                    return None;
                };
                let Some(body) = message.body else {
                    warn!(
                        message = "Refusing to process message with no body.",
                        message_id = %message_id,
                    );
                    return None;
                };
                Some(QueueRecord {
                    message_id,
                    receipt_handle: Some(receipt_handle),
                    body,
                })
            })
            .collect();

        Ok(records)
    }

    async fn delete_message(&self, queue_url: &str, record: &QueueRecord) {
        let Some(receipt_handle) = &record.receipt_handle else {
            return;
        };

        match self
            .ctx
            .sqs
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
        {
            Ok(_) => {
                debug!(message = "Deleted message.", message_id = %record.message_id);
            }
            Err(error) => {
                // Keep going; the message will be redelivered and its
                // deliveries are idempotent enough under at-least-once.
                error!(
                    message = "Failed to delete message.",
                    message_id = %record.message_id,
                    error = %DisplayErrorContext(&error),
                );
            }
        }
    }
}

/// Drop the leading events a previous attempt already handled.
fn skip_processed_events(mut events: Vec<LogEvent>, offset: usize) -> Vec<LogEvent> {
    if offset == 0 {
        return events;
    }
    if offset >= events.len() {
        warn!(
            message = "Offset is at or past the event count, nothing left to process.",
            offset,
            events = events.len(),
        );
        return Vec::new();
    }
    info!(
        message = "Skipping already-processed events.",
        offset,
        remaining = events.len() - offset,
    );
    events.split_off(offset)
}

/// Compute the next replay state, or `None` once the retry budget is spent.
/// The delay doubles per retry and is capped by the queue's maximum.
fn next_reinjection(
    existing: &ProcessingMetadata,
    current_offset: usize,
    receipt_handle: &str,
    requeued_at: String,
) -> Option<(ProcessingMetadata, u64)> {
    let retry_count = existing.retry_count + 1;
    if retry_count > MAX_REINJECTION_RETRIES {
        return None;
    }

    let delay_secs = 2u64
        .saturating_pow(retry_count + 1)
        .min(MAX_REINJECTION_DELAY_SECS);

    let updated = ProcessingMetadata {
        offset: current_offset,
        retry_count,
        original_receipt_handle: existing
            .original_receipt_handle
            .clone()
            .or_else(|| Some(receipt_handle.to_owned())),
        requeued_at: Some(requeued_at),
    };

    Some((updated, delay_secs))
}

fn synthesize_record(bucket: &str, key: &str) -> QueueRecord {
    let records = serde_json::json!({
        "Records": [
            { "s3": { "bucket": { "name": bucket }, "object": { "key": key } } }
        ]
    });
    let body = serde_json::json!({ "Message": records.to_string() }).to_string();

    QueueRecord {
        message_id: format!("scan-{}", key.replace('/', "-")),
        receipt_handle: None,
        body,
    }
}
