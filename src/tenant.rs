use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use aws_sdk_dynamodb::{
    error::{ProvideErrorMetadata, SdkError},
    operation::query::QueryError,
    types::AttributeValue,
};
use snafu::Snafu;
use tracing::{debug, info, warn};

use crate::Classification;

/// Named application bundles. A configuration's `groups` expand through this
/// dictionary into concrete application names.
pub const APPLICATION_GROUPS: &[(&str, &[&str])] = &[
    ("API", &["kube-apiserver", "openshift-apiserver"]),
    ("Authentication", &["oauth-server", "oauth-apiserver"]),
    (
        "Controller Manager",
        &[
            "kube-controller-manager",
            "openshift-controller-manager",
            "openshift-route-controller-manager",
        ],
    ),
    ("Scheduler", &["kube-scheduler"]),
];

pub const DEFAULT_BUCKET_PREFIX: &str = "ROSA/cluster-logs/";

/// Positive lookups are cached this long; invalidation is time-only.
pub const CONFIG_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryKind {
    Stream,
    Bucket,
}

impl DeliveryKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            DeliveryKind::Stream => "stream",
            DeliveryKind::Bucket => "bucket",
        }
    }
}

impl std::fmt::Display for DeliveryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    /// Principal ARN of the customer's assumable role.
    pub log_distribution_role: String,
    pub log_group_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketTarget {
    pub bucket_name: String,
    /// Always normalized to end with `/`.
    pub bucket_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTarget {
    Stream(StreamTarget),
    Bucket(BucketTarget),
}

/// One tenant delivery configuration row, already validated: a value of this
/// type always carries the required fields of its variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub enabled: bool,
    pub desired_logs: Vec<String>,
    pub groups: Vec<String>,
    pub target_region: Option<String>,
    pub target: DeliveryTarget,
}

#[derive(Debug, Snafu)]
pub enum ConfigValidationError {
    #[snafu(display("delivery configuration missing required field '{field}'"))]
    MissingField { field: &'static str },
    #[snafu(display("delivery configuration has empty value for required field '{field}'"))]
    EmptyField { field: &'static str },
    #[snafu(display("invalid delivery type {value:?}"))]
    InvalidType { value: String },
}

impl TenantConfig {
    pub fn kind(&self) -> DeliveryKind {
        match self.target {
            DeliveryTarget::Stream(_) => DeliveryKind::Stream,
            DeliveryTarget::Bucket(_) => DeliveryKind::Bucket,
        }
    }

    /// Decode and validate one configuration table row. The only constructor
    /// outside of tests; a row missing a variant-required field never becomes
    /// a `TenantConfig`.
    pub fn from_item(
        item: &HashMap<String, AttributeValue>,
    ) -> Result<Self, ConfigValidationError> {
        let tenant_id = required_string(item, "tenant_id")?;
        let kind = required_string(item, "type")?;

        let target = match kind.as_str() {
            "stream" => DeliveryTarget::Stream(StreamTarget {
                log_distribution_role: required_string(item, "log_distribution_role")?,
                log_group_name: required_string(item, "log_group_name")?,
            }),
            "bucket" => DeliveryTarget::Bucket(BucketTarget {
                bucket_name: required_string(item, "bucket_name")?,
                bucket_prefix: normalize_bucket_prefix(
                    optional_string(item, "bucket_prefix")
                        .unwrap_or_else(|| DEFAULT_BUCKET_PREFIX.to_owned()),
                ),
            }),
            other => {
                return Err(ConfigValidationError::InvalidType {
                    value: other.to_owned(),
                })
            }
        };

        Ok(Self {
            tenant_id,
            enabled: decode_enabled(item.get("enabled")),
            desired_logs: string_list(item.get("desired_logs")),
            groups: string_list(item.get("groups")),
            target_region: optional_string(item, "target_region"),
            target,
        })
    }

    /// Apply the per-config application filter: the effective allow-list is
    /// `desired_logs` united with the expansion of `groups`; an empty
    /// effective list accepts everything. Matching is case-sensitive.
    pub fn allows_application(&self, application: &str) -> bool {
        if self.desired_logs.is_empty() && self.groups.is_empty() {
            return true;
        }

        let mut allowed: Vec<&str> = self.desired_logs.iter().map(String::as_str).collect();
        allowed.extend(expand_groups(&self.groups));

        if allowed.is_empty() {
            warn!(
                message = "No valid applications in desired_logs or groups, accepting all.",
                tenant_id = %self.tenant_id,
            );
            return true;
        }

        allowed.iter().any(|candidate| *candidate == application)
    }
}

/// Look up each group name case-insensitively in the bundle dictionary.
/// Unknown names are logged and ignored.
fn expand_groups(groups: &[String]) -> Vec<&'static str> {
    let mut applications = Vec::new();
    for group in groups {
        match APPLICATION_GROUPS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(group))
        {
            Some((_, members)) => applications.extend_from_slice(members),
            None => warn!(message = "Unknown application group.", group = %group),
        }
    }
    applications
}

/// Ensure a bucket prefix ends with `/`. Idempotent; empty prefixes stay
/// empty.
pub fn normalize_bucket_prefix(prefix: String) -> String {
    if !prefix.is_empty() && !prefix.ends_with('/') {
        prefix + "/"
    } else {
        prefix
    }
}

fn decode_enabled(value: Option<&AttributeValue>) -> bool {
    match value {
        None | Some(AttributeValue::Null(_)) => true,
        Some(AttributeValue::Bool(enabled)) => *enabled,
        // Legacy rows carry string-encoded booleans; collapse them here.
        Some(AttributeValue::S(text)) => !text.eq_ignore_ascii_case("false"),
        Some(AttributeValue::N(number)) => number != "0",
        Some(_) => true,
    }
}

fn string_list(value: Option<&AttributeValue>) -> Vec<String> {
    match value {
        Some(AttributeValue::L(items)) => items
            .iter()
            .filter_map(|item| match item {
                AttributeValue::S(text) => Some(text.clone()),
                _ => None,
            })
            .collect(),
        Some(AttributeValue::Ss(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn optional_string(item: &HashMap<String, AttributeValue>, field: &'static str) -> Option<String> {
    match item.get(field) {
        Some(AttributeValue::S(text)) if !text.trim().is_empty() => Some(text.clone()),
        _ => None,
    }
}

fn required_string(
    item: &HashMap<String, AttributeValue>,
    field: &'static str,
) -> Result<String, ConfigValidationError> {
    match item.get(field) {
        None => Err(ConfigValidationError::MissingField { field }),
        Some(AttributeValue::S(text)) if !text.trim().is_empty() => Ok(text.clone()),
        Some(_) => Err(ConfigValidationError::EmptyField { field }),
    }
}

#[derive(Debug, Snafu)]
pub enum ConfigStoreError {
    #[snafu(display("No enabled delivery configurations found for tenant {tenant_id}"))]
    TenantNotFound { tenant_id: String },
    #[snafu(display("Failed to query delivery configurations for {tenant_id}: {source}"))]
    Query {
        tenant_id: String,
        source: SdkError<QueryError>,
    },
}

impl ConfigStoreError {
    pub fn classification(&self) -> Classification {
        match self {
            ConfigStoreError::TenantNotFound { .. } => Classification::Poison,
            ConfigStoreError::Query { .. } => Classification::Retryable,
        }
    }
}

#[derive(Debug, Default)]
struct ConfigCache {
    entries: HashMap<String, (Vec<TenantConfig>, Instant)>,
}

impl ConfigCache {
    fn get(&self, tenant_id: &str, now: Instant) -> Option<Vec<TenantConfig>> {
        self.entries
            .get(tenant_id)
            .filter(|(_, fetched_at)| now.duration_since(*fetched_at) < CONFIG_CACHE_TTL)
            .map(|(configs, _)| configs.clone())
    }

    fn insert(&mut self, tenant_id: String, configs: Vec<TenantConfig>, now: Instant) {
        self.entries.insert(tenant_id, (configs, now));
    }
}

/// Read-only accessor over the tenant configuration table.
pub struct ConfigStore {
    client: aws_sdk_dynamodb::Client,
    table: String,
    cache: Mutex<ConfigCache>,
}

impl ConfigStore {
    pub fn new(client: aws_sdk_dynamodb::Client, table: String) -> Self {
        Self {
            client,
            table,
            cache: Mutex::new(ConfigCache::default()),
        }
    }

    /// Fetch the enabled, validated delivery configurations for a tenant.
    ///
    /// Fails closed: any enabled row that does not validate makes the whole
    /// tenant unresolvable, and the backend's empty-string-key validation
    /// error (the fingerprint of a malformed source path) maps to
    /// `TenantNotFound` as well.
    pub async fn get_enabled_configs(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<TenantConfig>, ConfigStoreError> {
        if let Some(cached) = self
            .cache
            .lock()
            .expect("config cache lock poisoned")
            .get(tenant_id, Instant::now())
        {
            debug!(message = "Using cached delivery configurations.", tenant_id = %tenant_id);
            return Ok(cached);
        }

        let response = self
            .client
            .query()
            .table_name(&self.table)
            .key_condition_expression("tenant_id = :tenant_id")
            .expression_attribute_values(":tenant_id", AttributeValue::S(tenant_id.to_owned()))
            .send()
            .await
            .map_err(|source| classify_query_error(tenant_id, source))?;

        let items = response.items();
        if items.is_empty() {
            return Err(ConfigStoreError::TenantNotFound {
                tenant_id: tenant_id.to_owned(),
            });
        }

        let mut configs = Vec::new();
        for item in items {
            if !decode_enabled(item.get("enabled")) {
                continue;
            }
            match TenantConfig::from_item(item) {
                Ok(config) => configs.push(config),
                Err(error) => {
                    warn!(
                        message = "Rejecting invalid delivery configuration.",
                        tenant_id = %tenant_id,
                        %error,
                    );
                    return Err(ConfigStoreError::TenantNotFound {
                        tenant_id: tenant_id.to_owned(),
                    });
                }
            }
        }

        if configs.is_empty() {
            return Err(ConfigStoreError::TenantNotFound {
                tenant_id: tenant_id.to_owned(),
            });
        }

        let kinds: Vec<&str> = configs.iter().map(|config| config.kind().as_str()).collect();
        info!(
            message = "Retrieved enabled delivery configurations.",
            tenant_id = %tenant_id,
            count = configs.len(),
            kinds = ?kinds,
        );

        self.cache
            .lock()
            .expect("config cache lock poisoned")
            .insert(tenant_id.to_owned(), configs.clone(), Instant::now());

        Ok(configs)
    }
}

fn classify_query_error(tenant_id: &str, source: SdkError<QueryError>) -> ConfigStoreError {
    // DynamoDB rejects empty-string key values with a ValidationException;
    // that only happens when a malformed source path leaked through.
    let is_empty_key = source.code() == Some("ValidationException")
        && source
            .message()
            .is_some_and(|message| message.contains("empty string value"));

    if is_empty_key {
        warn!(
            message = "Invalid tenant_id for configuration lookup, treating as not found.",
            tenant_id = %tenant_id,
        );
        ConfigStoreError::TenantNotFound {
            tenant_id: tenant_id.to_owned(),
        }
    } else {
        ConfigStoreError::Query {
            tenant_id: tenant_id.to_owned(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_item(tenant_id: &str) -> HashMap<String, AttributeValue> {
        HashMap::from([
            ("tenant_id".into(), AttributeValue::S(tenant_id.into())),
            ("type".into(), AttributeValue::S("stream".into())),
            (
                "log_distribution_role".into(),
                AttributeValue::S("arn:aws:iam::123456789012:role/log-delivery".into()),
            ),
            (
                "log_group_name".into(),
                AttributeValue::S("/aws/logs/acme".into()),
            ),
        ])
    }

    fn bucket_item(tenant_id: &str) -> HashMap<String, AttributeValue> {
        HashMap::from([
            ("tenant_id".into(), AttributeValue::S(tenant_id.into())),
            ("type".into(), AttributeValue::S("bucket".into())),
            (
                "bucket_name".into(),
                AttributeValue::S("customer-logs".into()),
            ),
        ])
    }

    #[test]
    fn decodes_stream_variant() {
        let config = TenantConfig::from_item(&stream_item("acme")).unwrap();
        assert_eq!(config.tenant_id, "acme");
        assert!(config.enabled);
        assert_eq!(config.kind(), DeliveryKind::Stream);
        match &config.target {
            DeliveryTarget::Stream(target) => {
                assert_eq!(target.log_group_name, "/aws/logs/acme");
            }
            other => panic!("expected stream target, got {other:?}"),
        }
    }

    #[test]
    fn bucket_variant_defaults_and_normalizes_prefix() {
        let config = TenantConfig::from_item(&bucket_item("acme")).unwrap();
        match &config.target {
            DeliveryTarget::Bucket(target) => {
                assert_eq!(target.bucket_prefix, DEFAULT_BUCKET_PREFIX);
            }
            other => panic!("expected bucket target, got {other:?}"),
        }

        let mut item = bucket_item("acme");
        item.insert("bucket_prefix".into(), AttributeValue::S("logs".into()));
        let config = TenantConfig::from_item(&item).unwrap();
        match &config.target {
            DeliveryTarget::Bucket(target) => assert_eq!(target.bucket_prefix, "logs/"),
            other => panic!("expected bucket target, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_fields_rejected() {
        let mut item = stream_item("acme");
        item.remove("log_group_name");
        assert!(matches!(
            TenantConfig::from_item(&item),
            Err(ConfigValidationError::MissingField {
                field: "log_group_name"
            })
        ));

        let mut item = stream_item("acme");
        item.insert("log_group_name".into(), AttributeValue::S("   ".into()));
        assert!(matches!(
            TenantConfig::from_item(&item),
            Err(ConfigValidationError::EmptyField {
                field: "log_group_name"
            })
        ));
    }

    #[test]
    fn unknown_delivery_type_rejected() {
        let mut item = stream_item("acme");
        item.insert("type".into(), AttributeValue::S("pigeon".into()));
        assert!(matches!(
            TenantConfig::from_item(&item),
            Err(ConfigValidationError::InvalidType { .. })
        ));
    }

    #[test]
    fn enabled_collapses_to_boolean_at_the_boundary() {
        let cases = [
            (None, true),
            (Some(AttributeValue::Bool(false)), false),
            (Some(AttributeValue::Bool(true)), true),
            (Some(AttributeValue::S("false".into())), false),
            (Some(AttributeValue::S("False".into())), false),
            (Some(AttributeValue::S("true".into())), true),
            (Some(AttributeValue::N("0".into())), false),
            (Some(AttributeValue::N("1".into())), true),
        ];
        for (value, expected) in cases {
            assert_eq!(decode_enabled(value.as_ref()), expected, "{value:?}");
        }
    }

    #[test]
    fn prefix_normalization_is_idempotent() {
        let cases = [("logs", "logs/"), ("logs/", "logs/"), ("", "")];
        for (input, expected) in cases {
            let once = normalize_bucket_prefix(input.to_owned());
            assert_eq!(once, expected);
            assert_eq!(normalize_bucket_prefix(once.clone()), once);
        }
    }

    fn config_with_filters(desired_logs: &[&str], groups: &[&str]) -> TenantConfig {
        let mut config = TenantConfig::from_item(&stream_item("acme")).unwrap();
        config.desired_logs = desired_logs.iter().map(|s| s.to_string()).collect();
        config.groups = groups.iter().map(|s| s.to_string()).collect();
        config
    }

    #[test]
    fn empty_filters_accept_all_applications() {
        let config = config_with_filters(&[], &[]);
        assert!(config.allows_application("anything"));
    }

    #[test]
    fn desired_logs_match_case_sensitively() {
        let config = config_with_filters(&["payment"], &[]);
        assert!(config.allows_application("payment"));
        assert!(!config.allows_application("Payment"));
        assert!(!config.allows_application("audit"));
    }

    #[test]
    fn groups_expand_case_insensitively() {
        let config = config_with_filters(&[], &["api", "SCHEDULER"]);
        assert!(config.allows_application("kube-apiserver"));
        assert!(config.allows_application("kube-scheduler"));
        assert!(!config.allows_application("oauth-server"));
    }

    #[test]
    fn desired_logs_and_groups_union() {
        let config = config_with_filters(&["payment"], &["Authentication"]);
        assert!(config.allows_application("payment"));
        assert!(config.allows_application("oauth-server"));
        assert!(!config.allows_application("kube-scheduler"));
    }

    #[test]
    fn unknown_groups_alone_accept_all() {
        let config = config_with_filters(&[], &["no-such-group"]);
        assert!(config.allows_application("anything"));
    }

    #[test]
    fn cache_honors_ttl() {
        let mut cache = ConfigCache::default();
        let config = TenantConfig::from_item(&stream_item("acme")).unwrap();
        let fetched_at = Instant::now();
        cache.insert("acme".into(), vec![config.clone()], fetched_at);

        assert_eq!(cache.get("acme", fetched_at), Some(vec![config]));
        assert_eq!(cache.get("other", fetched_at), None);
        assert_eq!(cache.get("acme", fetched_at + CONFIG_CACHE_TTL), None);
    }
}
