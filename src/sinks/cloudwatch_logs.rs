use std::time::{Duration, Instant};

use aws_sdk_cloudwatchlogs::{
    error::{ProvideErrorMetadata, SdkError},
    operation::{
        create_log_group::CreateLogGroupError, create_log_stream::CreateLogStreamError,
        describe_log_groups::DescribeLogGroupsError,
        describe_log_streams::DescribeLogStreamsError, put_log_events::PutLogEventsError,
    },
    types::{InputLogEvent, RejectedLogEventsInfo},
    Client,
};
use aws_smithy_types::error::display::DisplayErrorContext;
use snafu::{ResultExt, Snafu};
use tracing::{info, warn};

use crate::{
    event::{timestamp_to_millis, LogEvent},
    Classification,
};

pub const MAX_EVENTS_PER_BATCH: usize = 1000;
/// The downstream API's hard batch limit: 1 MiB plus a little slack.
pub const MAX_BATCH_BYTES: usize = 1_047_576;
/// Fixed accounting overhead the API charges per event.
pub const PER_EVENT_OVERHEAD: usize = 26;
pub const BATCH_TIME_WINDOW: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Outcome of one stream delivery attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub successful_events: usize,
    pub failed_events: usize,
    pub total_processed: usize,
}

#[derive(Debug, Snafu)]
pub enum StreamDeliveryError {
    #[snafu(display("Failed to describe log groups for {log_group}: {source}"))]
    DescribeGroups {
        log_group: String,
        source: SdkError<DescribeLogGroupsError>,
    },
    #[snafu(display("Failed to create log group {log_group}: {source}"))]
    CreateGroup {
        log_group: String,
        source: SdkError<CreateLogGroupError>,
    },
    #[snafu(display("Failed to describe log streams in {log_group}: {source}"))]
    DescribeStreams {
        log_group: String,
        source: SdkError<DescribeLogStreamsError>,
    },
    #[snafu(display("Failed to create log stream {log_stream} in {log_group}: {source}"))]
    CreateStream {
        log_group: String,
        log_stream: String,
        source: SdkError<CreateLogStreamError>,
    },
    #[snafu(display("Failed to put log events to {log_group}/{log_stream}: {source}"))]
    PutEvents {
        log_group: String,
        log_stream: String,
        source: SdkError<PutLogEventsError>,
    },
    #[snafu(display("Invalid log event for the downstream API: {source}"))]
    BuildEvent {
        source: aws_smithy_types::error::operation::BuildError,
    },
    #[snafu(display(
        "Failed to deliver {} out of {} events",
        stats.failed_events,
        stats.total_processed
    ))]
    Partial { stats: DeliveryStats },
}

impl StreamDeliveryError {
    pub fn classification(&self) -> Classification {
        match self {
            StreamDeliveryError::DescribeGroups { source, .. } => classify_code(source.code()),
            StreamDeliveryError::CreateGroup { source, .. } => classify_code(source.code()),
            StreamDeliveryError::DescribeStreams { source, .. } => classify_code(source.code()),
            StreamDeliveryError::CreateStream { source, .. } => classify_code(source.code()),
            StreamDeliveryError::PutEvents { source, .. } => classify_code(source.code()),
            StreamDeliveryError::BuildEvent { .. } => Classification::Retryable,
            StreamDeliveryError::Partial { .. } => Classification::Retryable,
        }
    }

    /// Event accounting for the attempt, when the failure shape provides it.
    pub fn stats(&self) -> Option<DeliveryStats> {
        match self {
            StreamDeliveryError::Partial { stats } => Some(*stats),
            _ => None,
        }
    }
}

fn classify_code(code: Option<&str>) -> Classification {
    match code {
        // The destination container is gone or we are not allowed in; no
        // amount of retrying fixes either.
        Some("AccessDeniedException" | "AccessDenied" | "ResourceNotFoundException") => {
            Classification::Poison
        }
        _ => Classification::Retryable,
    }
}

/// An event ready for the wire: structured messages already serialized to
/// text, timestamp normalized to epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedEvent {
    pub timestamp_ms: i64,
    pub message: String,
}

impl PreparedEvent {
    fn from_log_event(event: &LogEvent) -> Self {
        // Re-run the shared seconds/millis detector so second-scale values
        // that slipped through normalization still land on the right scale.
        Self {
            timestamp_ms: timestamp_to_millis(&serde_json::Value::from(event.timestamp_ms))
                .unwrap_or(event.timestamp_ms),
            message: event.message_text(),
        }
    }

    fn wire_bytes(&self) -> usize {
        self.message.len() + PER_EVENT_OVERHEAD
    }
}

/// Groups events into flush-sized batches under the downstream count, byte,
/// and time limits.
///
/// The count and time rules append first and flush after; the byte rule
/// flushes *before* an append that would overflow, so no emitted batch ever
/// exceeds [`MAX_BATCH_BYTES`] (a single event bigger than the whole budget
/// still goes out alone and is the downstream's to reject).
#[derive(Debug)]
pub struct EventBatcher {
    batch: Vec<PreparedEvent>,
    batch_bytes: usize,
    max_events: usize,
    started: Instant,
}

impl EventBatcher {
    pub fn new() -> Self {
        Self::with_max_events(MAX_EVENTS_PER_BATCH)
    }

    /// A batcher with a smaller in-memory bound; the downstream count limit
    /// still applies as the ceiling.
    pub fn with_max_events(max_events: usize) -> Self {
        Self {
            batch: Vec::new(),
            batch_bytes: 0,
            max_events: max_events.clamp(1, MAX_EVENTS_PER_BATCH),
            started: Instant::now(),
        }
    }

    pub fn push(&mut self, event: PreparedEvent) -> Option<Vec<PreparedEvent>> {
        self.push_at(event, Instant::now())
    }

    fn push_at(&mut self, event: PreparedEvent, now: Instant) -> Option<Vec<PreparedEvent>> {
        let event_bytes = event.wire_bytes();

        let mut flushed = None;
        if !self.batch.is_empty() && self.batch_bytes + event_bytes > MAX_BATCH_BYTES {
            flushed = self.take(now);
        }

        self.batch.push(event);
        self.batch_bytes += event_bytes;

        if self.batch.len() >= self.max_events
            || now.duration_since(self.started) >= BATCH_TIME_WINDOW
        {
            // A byte-rule flush and a count/time flush cannot coincide: the
            // byte rule leaves a single freshly-appended event behind.
            debug_assert!(flushed.is_none() || self.batch.len() == 1);
            flushed = flushed.or_else(|| self.take(now));
        }

        flushed
    }

    pub fn finish(&mut self) -> Option<Vec<PreparedEvent>> {
        self.take(Instant::now())
    }

    fn take(&mut self, now: Instant) -> Option<Vec<PreparedEvent>> {
        self.batch_bytes = 0;
        self.started = now;
        if self.batch.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.batch))
        }
    }
}

impl Default for EventBatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Delivers normalized events to one `(log_group, log_stream)` pair in the
/// customer's account, honoring the downstream batch constraints.
pub struct CloudWatchLogsSink {
    client: Client,
    log_group: String,
    log_stream: String,
    retry_attempts: u32,
    max_batch_events: usize,
}

impl CloudWatchLogsSink {
    pub fn new(
        client: Client,
        log_group: String,
        log_stream: String,
        retry_attempts: u32,
        max_batch_events: usize,
    ) -> Self {
        Self {
            client,
            log_group,
            log_stream,
            retry_attempts: retry_attempts.max(1),
            max_batch_events,
        }
    }

    /// Create the log group and stream if they do not exist yet;
    /// pre-existence is success.
    pub async fn ensure_destination(&self) -> Result<(), StreamDeliveryError> {
        let groups = self
            .client
            .describe_log_groups()
            .log_group_name_prefix(&self.log_group)
            .send()
            .await
            .context(DescribeGroupsSnafu {
                log_group: self.log_group.clone(),
            })?;

        let group_exists = groups
            .log_groups()
            .iter()
            .any(|group| group.log_group_name() == Some(self.log_group.as_str()));

        if !group_exists {
            info!(message = "Creating log group.", log_group = %self.log_group);
            if let Err(source) = self
                .client
                .create_log_group()
                .log_group_name(&self.log_group)
                .send()
                .await
            {
                if !source
                    .as_service_error()
                    .is_some_and(CreateLogGroupError::is_resource_already_exists_exception)
                {
                    return Err(StreamDeliveryError::CreateGroup {
                        log_group: self.log_group.clone(),
                        source,
                    });
                }
            }
        }

        let streams = self
            .client
            .describe_log_streams()
            .log_group_name(&self.log_group)
            .log_stream_name_prefix(&self.log_stream)
            .send()
            .await
            .context(DescribeStreamsSnafu {
                log_group: self.log_group.clone(),
            })?;

        let stream_exists = streams
            .log_streams()
            .iter()
            .any(|stream| stream.log_stream_name() == Some(self.log_stream.as_str()));

        if !stream_exists {
            info!(
                message = "Creating log stream.",
                log_group = %self.log_group,
                log_stream = %self.log_stream,
            );
            if let Err(source) = self
                .client
                .create_log_stream()
                .log_group_name(&self.log_group)
                .log_stream_name(&self.log_stream)
                .send()
                .await
            {
                if !source
                    .as_service_error()
                    .is_some_and(CreateLogStreamError::is_resource_already_exists_exception)
                {
                    return Err(StreamDeliveryError::CreateStream {
                        log_group: self.log_group.clone(),
                        log_stream: self.log_stream.clone(),
                        source,
                    });
                }
            }
        }

        Ok(())
    }

    /// Sort, batch, and flush events. Returns the final accounting, or a
    /// `Partial` error carrying it when any event was rejected so the caller
    /// can replay the message with an offset.
    pub async fn deliver(&self, events: &[LogEvent]) -> Result<DeliveryStats, StreamDeliveryError> {
        let mut prepared: Vec<PreparedEvent> =
            events.iter().map(PreparedEvent::from_log_event).collect();
        // The downstream API requires chronological order within a batch.
        prepared.sort_by_key(|event| event.timestamp_ms);

        let mut stats = DeliveryStats {
            total_processed: prepared.len(),
            ..DeliveryStats::default()
        };

        let mut batcher = EventBatcher::with_max_events(self.max_batch_events);
        for event in prepared {
            if let Some(batch) = batcher.push(event) {
                self.flush(&mut stats, batch).await?;
            }
        }
        if let Some(batch) = batcher.finish() {
            self.flush(&mut stats, batch).await?;
        }

        if stats.failed_events > 0 {
            return Err(StreamDeliveryError::Partial { stats });
        }

        Ok(stats)
    }

    async fn flush(
        &self,
        stats: &mut DeliveryStats,
        batch: Vec<PreparedEvent>,
    ) -> Result<(), StreamDeliveryError> {
        let batch_len = batch.len();
        match self.send_batch(batch).await {
            Ok(rejected) => {
                stats.successful_events += batch_len - rejected;
                stats.failed_events += rejected;
                Ok(())
            }
            Err(error) => {
                stats.failed_events += batch_len;
                Err(error)
            }
        }
    }

    /// One flush: a `put-events` call with local retries for transient
    /// faults. Returns how many events the API rejected.
    async fn send_batch(&self, batch: Vec<PreparedEvent>) -> Result<usize, StreamDeliveryError> {
        let batch_len = batch.len();
        let events = batch
            .into_iter()
            .map(|event| {
                InputLogEvent::builder()
                    .timestamp(event.timestamp_ms)
                    .message(event.message)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .context(BuildEventSnafu)?;

        let mut delay = Duration::from_secs(1);
        let mut attempt = 1u32;

        loop {
            let result = self
                .client
                .put_log_events()
                .log_group_name(&self.log_group)
                .log_stream_name(&self.log_stream)
                .set_log_events(Some(events.clone()))
                .send()
                .await;

            match result {
                Ok(response) => {
                    let rejected = count_rejected(batch_len, response.rejected_log_events_info());
                    if rejected > 0 {
                        warn!(
                            message = "Downstream rejected part of the batch.",
                            log_group = %self.log_group,
                            log_stream = %self.log_stream,
                            rejected,
                            batch_len,
                        );
                    }
                    return Ok(rejected);
                }
                Err(source) => {
                    let code = source.code();

                    // Sequence tokens are ignored by the API these days;
                    // retry the call unchanged if one is ever reported.
                    let sequence_token = code == Some("InvalidSequenceTokenException");
                    let throttled = matches!(
                        code,
                        Some(
                            "ThrottlingException"
                                | "Throttling"
                                | "ServiceUnavailableException"
                                | "ServiceUnavailable"
                        )
                    );
                    let transport = source.as_service_error().is_none();

                    if (sequence_token || throttled || transport) && attempt < self.retry_attempts
                    {
                        warn!(
                            message = "Transient put failure, will retry flush.",
                            log_group = %self.log_group,
                            log_stream = %self.log_stream,
                            attempt,
                            max_attempts = self.retry_attempts,
                            error = %DisplayErrorContext(&source),
                        );
                        if !sequence_token {
                            tokio::time::sleep(delay).await;
                            delay = (delay * 2).min(MAX_BACKOFF);
                        }
                        attempt += 1;
                        continue;
                    }

                    return Err(StreamDeliveryError::PutEvents {
                        log_group: self.log_group.clone(),
                        log_stream: self.log_stream.clone(),
                        source,
                    });
                }
            }
        }
    }
}

/// The API reports rejections as a too-new suffix, a too-old prefix, and an
/// expired prefix of the (chronologically sorted) batch.
fn count_rejected(batch_len: usize, info: Option<&RejectedLogEventsInfo>) -> usize {
    let Some(info) = info else { return 0 };

    let mut rejected = 0usize;
    if let Some(start) = info.too_new_log_event_start_index() {
        rejected += batch_len.saturating_sub(start.max(0) as usize);
    }
    if let Some(end) = info.too_old_log_event_end_index() {
        rejected += (end.max(-1) + 1) as usize;
    }
    if let Some(end) = info.expired_log_event_end_index() {
        rejected += (end.max(-1) + 1) as usize;
    }

    rejected.min(batch_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(message: &str) -> PreparedEvent {
        PreparedEvent {
            timestamp_ms: 1_704_067_200_000,
            message: message.to_owned(),
        }
    }

    fn batch_bytes(batch: &[PreparedEvent]) -> usize {
        batch.iter().map(PreparedEvent::wire_bytes).sum()
    }

    #[test]
    fn count_rule_flushes_at_exactly_max_events() {
        let mut batcher = EventBatcher::new();
        for i in 0..MAX_EVENTS_PER_BATCH - 1 {
            assert!(batcher.push(event("x")).is_none(), "premature flush at {i}");
        }
        let batch = batcher.push(event("x")).expect("flush at the count cap");
        assert_eq!(batch.len(), MAX_EVENTS_PER_BATCH);
        assert!(batcher.finish().is_none());
    }

    #[test]
    fn byte_rule_never_emits_an_oversized_batch() {
        // 10 KiB messages; the byte rule kicks in long before the count rule.
        let message = "m".repeat(10 * 1024);
        let mut batcher = EventBatcher::new();
        let mut batches = Vec::new();
        for _ in 0..300 {
            if let Some(batch) = batcher.push(event(&message)) {
                batches.push(batch);
            }
        }
        batches.extend(batcher.finish());

        assert!(batches.len() > 1);
        let mut total = 0;
        for batch in &batches {
            assert!(batch.len() <= MAX_EVENTS_PER_BATCH);
            assert!(batch_bytes(batch) <= MAX_BATCH_BYTES);
            total += batch.len();
        }
        assert_eq!(total, 300);
    }

    #[test]
    fn single_event_at_exactly_the_byte_limit_fits_in_one_flush() {
        let message = "m".repeat(MAX_BATCH_BYTES - PER_EVENT_OVERHEAD);
        let mut batcher = EventBatcher::new();
        assert!(batcher.push(event(&message)).is_none());
        let batch = batcher.finish().expect("remainder flush");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch_bytes(&batch), MAX_BATCH_BYTES);
    }

    #[test]
    fn empty_message_still_costs_the_overhead() {
        assert_eq!(event("").wire_bytes(), PER_EVENT_OVERHEAD);
    }

    #[test]
    fn one_byte_messages_flush_by_the_larger_of_the_two_rules() {
        // 27 bytes per event: 1000 of them is 27,000 bytes, nowhere near the
        // byte limit, so the count rule dominates and the flush count is
        // ceil(n / 1000).
        let n = 2500usize;
        let mut batcher = EventBatcher::new();
        let mut flushes = 0usize;
        for _ in 0..n {
            if batcher.push(event("x")).is_some() {
                flushes += 1;
            }
        }
        if batcher.finish().is_some() {
            flushes += 1;
        }
        assert_eq!(flushes, n.div_ceil(MAX_EVENTS_PER_BATCH));
    }

    #[test]
    fn time_window_flushes_a_stale_batch() {
        let mut batcher = EventBatcher::new();
        let t0 = Instant::now();
        assert!(batcher.push_at(event("a"), t0).is_none());
        let batch = batcher
            .push_at(event("b"), t0 + BATCH_TIME_WINDOW)
            .expect("window flush");
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn batches_preserve_chronological_order() {
        let mut batcher = EventBatcher::new();
        let mut out = Vec::new();
        for ts in [1, 2, 3, 4, 5] {
            let prepared = PreparedEvent {
                timestamp_ms: 1_704_067_200_000 + ts,
                message: "x".into(),
            };
            out.extend(batcher.push(prepared).into_iter().flatten());
        }
        out.extend(batcher.finish().into_iter().flatten());
        let timestamps: Vec<i64> = out.iter().map(|event| event.timestamp_ms).collect();
        let mut sorted = timestamps.clone();
        sorted.sort_unstable();
        assert_eq!(timestamps, sorted);
    }

    #[test]
    fn prepared_events_serialize_structured_messages_once() {
        let log_event = LogEvent {
            timestamp_ms: 1_704_067_200_000,
            message: serde_json::json!({"a": 1}),
        };
        let prepared = PreparedEvent::from_log_event(&log_event);
        assert_eq!(prepared.timestamp_ms, 1_704_067_200_000);
        assert_eq!(prepared.message, r#"{"a":1}"#);
    }

    #[test]
    fn second_scale_timestamps_get_rescaled_at_preparation() {
        let log_event = LogEvent {
            timestamp_ms: 1_704_067_200,
            message: serde_json::json!("old"),
        };
        let prepared = PreparedEvent::from_log_event(&log_event);
        assert_eq!(prepared.timestamp_ms, 1_704_067_200_000);
    }

    #[test]
    fn rejected_event_accounting() {
        let info = RejectedLogEventsInfo::builder()
            .too_new_log_event_start_index(90)
            .build();
        assert_eq!(count_rejected(100, Some(&info)), 10);

        let info = RejectedLogEventsInfo::builder()
            .too_old_log_event_end_index(4)
            .build();
        assert_eq!(count_rejected(100, Some(&info)), 5);

        let info = RejectedLogEventsInfo::builder()
            .expired_log_event_end_index(9)
            .too_new_log_event_start_index(95)
            .build();
        assert_eq!(count_rejected(100, Some(&info)), 15);

        assert_eq!(count_rejected(100, None), 0);
    }
}
