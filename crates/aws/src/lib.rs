use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{Region, SdkConfig};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::Client;
use cfwall_core::BucketStore;
use tracing::{debug, instrument};

/// Region S3 reports as an empty location constraint.
pub const DEFAULT_REGION: &str = "us-east-1";

const NO_SUCH_BUCKET_POLICY: &str = "NoSuchBucketPolicy";

/// Shared SDK config for the home region. Calls time out after `timeout` and
/// are never retried; a failed run is retried by running it again.
pub async fn load_sdk_config(region: &str, timeout: Duration) -> SdkConfig {
    aws_config::from_env()
        .region(Region::new(region.to_string()))
        .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build())
        .retry_config(RetryConfig::disabled())
        .load()
        .await
}

/// Account id of the current credentials, used as the expected bucket owner.
pub async fn caller_account(sdk_config: &SdkConfig) -> Result<String> {
    let sts = aws_sdk_sts::Client::new(sdk_config);
    let out = sts.get_caller_identity().send().await.context("STS GetCallerIdentity")?;
    out.account().map(str::to_string).context("GetCallerIdentity returned no account id")
}

/// Map a `LocationConstraint` to a region name.
pub fn location_to_region(constraint: Option<&str>) -> String {
    match constraint {
        None | Some("") => DEFAULT_REGION.to_string(),
        Some("EU") => "eu-west-1".to_string(),
        Some(region) => region.to_string(),
    }
}

fn is_missing_policy(code: Option<&str>) -> bool {
    code == Some(NO_SUCH_BUCKET_POLICY)
}

/// [`BucketStore`] backed by the S3 control API.
///
/// Every request carries `ExpectedBucketOwner`. Clients are created per region
/// on first use and reused afterwards.
pub struct S3BucketStore {
    sdk_config: SdkConfig,
    home_region: String,
    expected_owner: String,
    force_path_style: bool,
    clients: Mutex<HashMap<String, Client>>,
}

impl S3BucketStore {
    pub fn new(sdk_config: SdkConfig, home_region: impl Into<String>, expected_owner: impl Into<String>) -> Self {
        Self {
            sdk_config,
            home_region: home_region.into(),
            expected_owner: expected_owner.into(),
            force_path_style: false,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Address buckets as `endpoint/bucket`, for S3-compatible endpoints.
    pub fn with_path_style(mut self, force_path_style: bool) -> Self {
        self.force_path_style = force_path_style;
        self
    }

    pub fn expected_owner(&self) -> &str {
        &self.expected_owner
    }

    fn client(&self, region: &str) -> Client {
        let mut clients = self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        clients
            .entry(region.to_string())
            .or_insert_with(|| {
                debug!(region, home = %self.home_region, "creating S3 client");
                let conf = aws_sdk_s3::config::Builder::from(&self.sdk_config)
                    .region(Region::new(region.to_string()))
                    .force_path_style(self.force_path_style)
                    .build();
                Client::from_conf(conf)
            })
            .clone()
    }
}

#[async_trait]
impl BucketStore for S3BucketStore {
    #[instrument(skip(self))]
    async fn bucket_region(&self, bucket: &str) -> Result<String> {
        let out = self
            .client(&self.home_region)
            .get_bucket_location()
            .bucket(bucket)
            .expected_bucket_owner(&self.expected_owner)
            .send()
            .await
            .context("S3 GetBucketLocation")?;
        Ok(location_to_region(out.location_constraint().map(|c| c.as_str())))
    }

    #[instrument(skip(self))]
    async fn get_bucket_policy(&self, region: &str, bucket: &str) -> Result<Option<String>> {
        let resp = self
            .client(region)
            .get_bucket_policy()
            .bucket(bucket)
            .expected_bucket_owner(&self.expected_owner)
            .send()
            .await;
        match resp {
            Ok(out) => Ok(out.policy().map(str::to_string)),
            Err(err) if is_missing_policy(err.as_service_error().and_then(|e| e.code())) => {
                debug!("no bucket policy");
                Ok(None)
            }
            Err(err) => Err(err).context("S3 GetBucketPolicy"),
        }
    }

    #[instrument(skip(self, policy), fields(bytes = policy.len()))]
    async fn put_bucket_policy(&self, region: &str, bucket: &str, policy: &str) -> Result<()> {
        self.client(region)
            .put_bucket_policy()
            .bucket(bucket)
            .expected_bucket_owner(&self.expected_owner)
            .policy(policy)
            .send()
            .await
            .context("S3 PutBucketPolicy")?;
        Ok(())
    }
}
