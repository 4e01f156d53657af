use aws_sdk_cloudwatch::types::{Dimension, MetricDatum, StandardUnit};
use tracing::error;

use crate::tenant::DeliveryKind;

const NAMESPACE: &str = "LogDelivery";

pub const SUCCESSFUL_DELIVERY: &str = "successful_delivery";
pub const FAILED_DELIVERY: &str = "failed_delivery";
pub const SUCCESSFUL_EVENTS: &str = "successful_events";
pub const FAILED_EVENTS: &str = "failed_events";

/// Best-effort per-tenant delivery counters. Emission failures are logged
/// and swallowed; a metric outage must never fail a delivery.
pub struct Metrics {
    client: aws_sdk_cloudwatch::Client,
}

impl Metrics {
    pub fn new(client: aws_sdk_cloudwatch::Client) -> Self {
        Self { client }
    }

    pub async fn push_delivery(
        &self,
        tenant_id: &str,
        kind: DeliveryKind,
        counters: &[(&str, usize)],
    ) {
        let data: Vec<MetricDatum> = counters
            .iter()
            .map(|(name, count)| {
                MetricDatum::builder()
                    .metric_name(format!("LogCount/{kind}/{name}"))
                    .dimensions(
                        Dimension::builder()
                            .name("Tenant")
                            .value(tenant_id)
                            .build(),
                    )
                    .value(*count as f64)
                    .unit(StandardUnit::Count)
                    .build()
            })
            .collect();

        if let Err(err) = self
            .client
            .put_metric_data()
            .namespace(NAMESPACE)
            .set_metric_data(Some(data))
            .send()
            .await
        {
            error!(
                message = "Failed to publish delivery metrics.",
                tenant_id = %tenant_id,
                delivery_kind = %kind,
                error = %aws_smithy_types::error::display::DisplayErrorContext(&err),
            );
        }
    }
}
