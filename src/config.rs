use crate::{aws::session, catalog::source};
use config::{ConfigError, Environment};
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    pub log_level: String,
    pub key_id: Option<String>,
    pub secret_key: Option<String>,
    pub profile: Option<String>,
    pub region: String,
    pub table_name: String,
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_key: String,
    pub template_filter: String,
    pub broker_id: String,
    pub role_arn: Option<String>,
    pub prescribe_overrides: bool,
    #[serde(default)]
    pub global_overrides: HashMap<String, String>,
    pub catalog_poll_interval_secs: u64,
    pub catalog_cache_ttl_secs: u64,
    pub aws_max_attempts: u32,
    pub aws_operation_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_builder(config::Config::builder())
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let s = with_defaults(builder)?
            .add_source(
                Environment::with_prefix("BROKER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        s.try_deserialize()
    }

    pub fn bucket_details(&self) -> source::BucketDetails {
        source::BucketDetails {
            bucket: self.s3_bucket.clone(),
            prefix: self.s3_key.clone(),
            suffix: self.template_filter.clone(),
            region: self.s3_region.clone(),
        }
    }

    pub fn credential_inputs(&self, account_id: Option<&str>) -> session::CredentialInputs {
        session::CredentialInputs {
            access_key_id: self.key_id.clone(),
            secret_access_key: self.secret_key.clone(),
            region: self.region.clone(),
            account_id: account_id.map(str::to_string),
            profile: self.profile.clone(),
            role_arn: self.role_arn.clone(),
        }
    }

    pub fn retry_settings(&self) -> session::RetrySettings {
        session::RetrySettings {
            max_attempts: self.aws_max_attempts,
            operation_timeout: Duration::from_secs(self.aws_operation_timeout_secs),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.catalog_poll_interval_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_cache_ttl_secs)
    }
}

pub(crate) fn with_defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    builder
        .set_default("log_level", "info")?
        .set_default("region", "us-east-1")?
        .set_default("table_name", "awssb")?
        .set_default("s3_bucket", "awsservicebroker")?
        .set_default("s3_region", "us-east-1")?
        .set_default("s3_key", "templates/latest/")?
        .set_default("template_filter", "-main.yaml")?
        .set_default("broker_id", "awsservicebroker")?
        .set_default("prescribe_overrides", true)?
        .set_default("catalog_poll_interval_secs", 60)?
        .set_default("catalog_cache_ttl_secs", 3600)?
        .set_default("aws_max_attempts", 3)?
        .set_default("aws_operation_timeout_secs", 60)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
