use aws_config::SdkConfig;
use aws_credential_types::Credentials;
use aws_sdk_sts::{
    error::SdkError,
    operation::{
        assume_role::AssumeRoleError, get_caller_identity::GetCallerIdentityError,
    },
};
use aws_types::region::Region;
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

use crate::Classification;

#[derive(Debug, Snafu)]
pub enum CredentialsError {
    #[snafu(display("Failed to assume central role {role_arn}: {source}"))]
    AssumeCentral {
        role_arn: String,
        source: SdkError<AssumeRoleError>,
    },
    #[snafu(display("Failed to assume customer role {role_arn}: {source}"))]
    AssumeCustomer {
        role_arn: String,
        source: SdkError<AssumeRoleError>,
    },
    #[snafu(display("Failed to resolve the worker's account identity: {source}"))]
    CallerIdentity {
        source: SdkError<GetCallerIdentityError>,
    },
    #[snafu(display("Role assumption for {role_arn} returned no credentials"))]
    NoCredentials { role_arn: String },
    #[snafu(display("Caller identity response carried no account id"))]
    NoAccountId,
}

impl CredentialsError {
    /// Credential-service faults are transient as far as the worker can
    /// tell; the queue redelivery path owns giving up.
    pub fn classification(&self) -> Classification {
        Classification::Retryable
    }
}

/// Performs the identity hops for deliveries: central role for bucket
/// copies, central role chained into the customer role for stream
/// deliveries. Every delivery gets fresh credentials bound to its own
/// session id; nothing here is cached across tenants.
pub struct CredentialBroker {
    sdk_config: SdkConfig,
    sts: aws_sdk_sts::Client,
    central_role_arn: String,
    account_id: OnceCell<String>,
}

impl CredentialBroker {
    pub fn new(sdk_config: SdkConfig, central_role_arn: String) -> Self {
        let sts = aws_sdk_sts::Client::new(&sdk_config);
        Self {
            sdk_config,
            sts,
            central_role_arn,
            account_id: OnceCell::new(),
        }
    }

    /// One-hop credentials for the central role.
    pub async fn central_credentials(
        &self,
        session_prefix: &str,
    ) -> Result<Credentials, CredentialsError> {
        let session_name = format!("{session_prefix}-{}", Uuid::new_v4());
        let response = self
            .sts
            .assume_role()
            .role_arn(&self.central_role_arn)
            .role_session_name(session_name)
            .send()
            .await
            .context(AssumeCentralSnafu {
                role_arn: self.central_role_arn.clone(),
            })?;

        let credentials = response.credentials().context(NoCredentialsSnafu {
            role_arn: self.central_role_arn.clone(),
        })?;

        Ok(Credentials::from_keys(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            Some(credentials.session_token().to_owned()),
        ))
    }

    /// Two-hop credentials: central role first, then the customer's role in
    /// the target region, with the worker's account id as the external
    /// identifier on the second hop.
    pub async fn chained_credentials(
        &self,
        customer_role_arn: &str,
        region: &str,
        session_id: &str,
    ) -> Result<Credentials, CredentialsError> {
        let central = self.central_credentials("CentralLogDistribution").await?;
        let external_id = self.caller_account_id().await?.to_owned();

        debug!(message = "Assuming customer role.", role_arn = %customer_role_arn, region = %region);

        let sts = aws_sdk_sts::Client::from_conf(
            aws_sdk_sts::config::Builder::from(&self.sdk_config)
                .region(Region::new(region.to_owned()))
                .credentials_provider(central)
                .build(),
        );

        let response = sts
            .assume_role()
            .role_arn(customer_role_arn)
            .role_session_name(format!("CloudWatchLogDelivery-{session_id}"))
            .external_id(external_id)
            .send()
            .await
            .context(AssumeCustomerSnafu {
                role_arn: customer_role_arn.to_owned(),
            })?;

        let credentials = response.credentials().context(NoCredentialsSnafu {
            role_arn: customer_role_arn.to_owned(),
        })?;

        Ok(Credentials::from_keys(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            Some(credentials.session_token().to_owned()),
        ))
    }

    /// A CloudWatch Logs client in the given region using already-assumed
    /// credentials.
    pub fn logs_client(
        &self,
        region: &str,
        credentials: Credentials,
    ) -> aws_sdk_cloudwatchlogs::Client {
        aws_sdk_cloudwatchlogs::Client::from_conf(
            aws_sdk_cloudwatchlogs::config::Builder::from(&self.sdk_config)
                .region(Region::new(region.to_owned()))
                .credentials_provider(credentials)
                .build(),
        )
    }

    /// An S3 client in the given region using already-assumed credentials.
    pub fn s3_client(&self, region: &str, credentials: Credentials) -> aws_sdk_s3::Client {
        aws_sdk_s3::Client::from_conf(
            aws_sdk_s3::config::Builder::from(&self.sdk_config)
                .region(Region::new(region.to_owned()))
                .credentials_provider(credentials)
                .build(),
        )
    }

    async fn caller_account_id(&self) -> Result<&str, CredentialsError> {
        self.account_id
            .get_or_try_init(|| async {
                let identity = self
                    .sts
                    .get_caller_identity()
                    .send()
                    .await
                    .context(CallerIdentitySnafu)?;
                identity
                    .account()
                    .map(str::to_owned)
                    .context(NoAccountIdSnafu)
            })
            .await
            .map(String::as_str)
    }
}
