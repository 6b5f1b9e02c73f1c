use crate::{
    errors::{BrokerError, Result},
    models::{ServiceLastUpdate, TemplateRef},
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Where templates live in object storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketDetails {
    pub bucket: String,
    pub prefix: String,
    pub suffix: String,
    pub region: String,
}

impl BucketDetails {
    pub fn object_key(&self, name: &str) -> String {
        format!("{}{}{}", self.prefix, name, self.suffix)
    }

    /// Template name for `key`, if the key passes the prefix/suffix filter.
    pub fn template_name<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())
            .filter(|name| !name.is_empty() && !name.contains('/'))
    }

    pub fn template_ref(&self, name: &str) -> TemplateRef {
        TemplateRef {
            bucket: self.bucket.clone(),
            key: self.object_key(name),
            region: self.region.clone(),
        }
    }
}

/// Object-storage side of catalog synchronization.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    fn bucket(&self) -> &BucketDetails;
    async fn list_templates(&self) -> Result<Vec<ServiceLastUpdate>>;
    async fn fetch_template(&self, name: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct S3TemplateSource {
    client: aws_sdk_s3::Client,
    bucket: BucketDetails,
}

impl S3TemplateSource {
    pub fn new(client: aws_sdk_s3::Client, bucket: BucketDetails) -> Self {
        Self { client, bucket }
    }
}

fn to_chrono(timestamp: &aws_smithy_types::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

#[async_trait]
impl TemplateSource for S3TemplateSource {
    fn bucket(&self) -> &BucketDetails {
        &self.bucket
    }

    async fn list_templates(&self) -> Result<Vec<ServiceLastUpdate>> {
        let mut listed = Vec::new();
        let mut continuation_token = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket.bucket)
                .prefix(&self.bucket.prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .context(format!(
                    "Failed to list templates in s3://{}/{}",
                    self.bucket.bucket, self.bucket.prefix
                ))
                .map_err(BrokerError::catalog_fetch)?;

            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                let Some(name) = self.bucket.template_name(key) else {
                    continue;
                };
                let date = object
                    .last_modified()
                    .and_then(to_chrono)
                    .ok_or_else(|| {
                        BrokerError::catalog_fetch(anyhow::anyhow!(
                            "Object {} has no last-modified timestamp",
                            key
                        ))
                    })?;

                listed.push(ServiceLastUpdate {
                    name: name.to_string(),
                    date,
                });
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated() == Some(true) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(listed)
    }

    async fn fetch_template(&self, name: &str) -> Result<String> {
        let key = self.bucket.object_key(name);
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket.bucket)
            .key(&key)
            .send()
            .await
            .context(format!("Failed to get template {} from S3", key))
            .map_err(BrokerError::catalog_fetch)?;
        let bytes = response
            .body
            .collect()
            .await
            .context("Failed to read template stream")
            .map_err(BrokerError::catalog_fetch)?
            .into_bytes();

        String::from_utf8(bytes.to_vec())
            .map_err(|_| BrokerError::template_parse(name, "template is not valid UTF-8"))
    }
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
