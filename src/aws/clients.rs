use crate::{
    aws::{session::Session, stack::StackStatus},
    catalog::source::{BucketDetails, S3TemplateSource, TemplateSource},
    errors::{BrokerError, Result},
    storage::{dynamodb::DynamoDbStore, DataStore},
};
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_cloudformation::{
    error::DisplayErrorContext,
    types::{Capability, Parameter},
};
use std::{collections::BTreeMap, sync::Arc};

const SSM_MAX_NAMES_PER_CALL: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateStackRequest {
    pub stack_name: String,
    pub template_url: String,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDescription {
    pub stack_id: String,
    pub status: StackStatus,
    pub status_reason: Option<String>,
    pub outputs: BTreeMap<String, String>,
}

/// Stack-based infrastructure orchestration.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn create_stack(&self, request: &CreateStackRequest) -> Result<String>;
    async fn describe_stack(&self, stack_id: &str) -> Result<StackDescription>;
    async fn delete_stack(&self, stack_id: &str) -> Result<()>;
}

#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn get_parameters(&self, names: &[String]) -> Result<BTreeMap<String, String>>;
}

#[async_trait]
pub trait CallerIdentity: Send + Sync {
    async fn account_id(&self) -> Result<String>;
}

/// Maps a session to each typed client the broker needs.
///
/// No retries happen here; clients inherit the retry and timeout settings
/// of the session they are built from.
pub trait ClientFactory: Send + Sync {
    fn orchestrator(&self, session: &Session) -> Arc<dyn Orchestrator>;
    fn template_source(&self, session: &Session, bucket: &BucketDetails)
        -> Arc<dyn TemplateSource>;
    fn parameter_store(&self, session: &Session) -> Arc<dyn ParameterStore>;
    fn identity(&self, session: &Session) -> Arc<dyn CallerIdentity>;
    fn data_store(&self, session: &Session, table_name: &str, namespace: &str)
        -> Arc<dyn DataStore>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AwsClientFactory;

impl ClientFactory for AwsClientFactory {
    fn orchestrator(&self, session: &Session) -> Arc<dyn Orchestrator> {
        Arc::new(CloudFormationOrchestrator::new(
            aws_sdk_cloudformation::Client::new(session.config()),
        ))
    }

    fn template_source(
        &self,
        session: &Session,
        bucket: &BucketDetails,
    ) -> Arc<dyn TemplateSource> {
        let s3_config = aws_sdk_s3::config::Builder::from(session.config())
            .region(aws_sdk_s3::config::Region::new(bucket.region.clone()))
            .build();

        Arc::new(S3TemplateSource::new(
            aws_sdk_s3::Client::from_conf(s3_config),
            bucket.clone(),
        ))
    }

    fn parameter_store(&self, session: &Session) -> Arc<dyn ParameterStore> {
        Arc::new(SsmParameterStore::new(aws_sdk_ssm::Client::new(
            session.config(),
        )))
    }

    fn identity(&self, session: &Session) -> Arc<dyn CallerIdentity> {
        Arc::new(StsCallerIdentity::new(aws_sdk_sts::Client::new(
            session.config(),
        )))
    }

    fn data_store(
        &self,
        session: &Session,
        table_name: &str,
        namespace: &str,
    ) -> Arc<dyn DataStore> {
        Arc::new(DynamoDbStore::new(
            aws_sdk_dynamodb::Client::new(session.config()),
            table_name,
            namespace,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct CloudFormationOrchestrator {
    client: aws_sdk_cloudformation::Client,
}

impl CloudFormationOrchestrator {
    pub fn new(client: aws_sdk_cloudformation::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Orchestrator for CloudFormationOrchestrator {
    async fn create_stack(&self, request: &CreateStackRequest) -> Result<String> {
        let parameters = request
            .parameters
            .iter()
            .map(|(key, value)| {
                Parameter::builder()
                    .parameter_key(key)
                    .parameter_value(value)
                    .build()
            })
            .collect::<Vec<_>>();

        let output = self
            .client
            .create_stack()
            .stack_name(&request.stack_name)
            .template_url(&request.template_url)
            .set_parameters(Some(parameters))
            .capabilities(Capability::CapabilityIam)
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityAutoExpand)
            .send()
            .await
            .context(format!("Failed to create stack {}", request.stack_name))
            .map_err(BrokerError::cloud)?;

        output
            .stack_id()
            .map(str::to_string)
            .ok_or_else(|| {
                BrokerError::cloud(anyhow::anyhow!("create-stack returned no stack id"))
            })
    }

    async fn describe_stack(&self, stack_id: &str) -> Result<StackDescription> {
        let output = match self.client.describe_stacks().stack_name(stack_id).send().await {
            Ok(output) => output,
            Err(err) if DisplayErrorContext(&err).to_string().contains("does not exist") => {
                return Err(BrokerError::not_found(format!("stack {}", stack_id)))
            }
            Err(err) => {
                return Err(BrokerError::cloud(
                    anyhow::Error::new(err)
                        .context(format!("Failed to describe stack {}", stack_id)),
                ))
            }
        };

        let stack = output
            .stacks()
            .first()
            .ok_or_else(|| BrokerError::not_found(format!("stack {}", stack_id)))?;
        let status = stack
            .stack_status()
            .map(|status| StackStatus::from(status.as_str()))
            .unwrap_or_else(|| StackStatus::Other("UNKNOWN".to_string()));
        let outputs = stack
            .outputs()
            .iter()
            .filter_map(|output| {
                Some((
                    output.output_key()?.to_string(),
                    output.output_value()?.to_string(),
                ))
            })
            .collect();

        Ok(StackDescription {
            stack_id: stack.stack_id().unwrap_or(stack_id).to_string(),
            status,
            status_reason: stack.stack_status_reason().map(str::to_string),
            outputs,
        })
    }

    async fn delete_stack(&self, stack_id: &str) -> Result<()> {
        self.client
            .delete_stack()
            .stack_name(stack_id)
            .send()
            .await
            .context(format!("Failed to delete stack {}", stack_id))
            .map_err(BrokerError::cloud)?;

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SsmParameterStore {
    client: aws_sdk_ssm::Client,
}

impl SsmParameterStore {
    pub fn new(client: aws_sdk_ssm::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ParameterStore for SsmParameterStore {
    async fn get_parameters(&self, names: &[String]) -> Result<BTreeMap<String, String>> {
        if names.is_empty() {
            return Ok(BTreeMap::new());
        }

        let mut values = BTreeMap::new();
        for chunk in names.chunks(SSM_MAX_NAMES_PER_CALL) {
            let output = self
                .client
                .get_parameters()
                .set_names(Some(chunk.to_vec()))
                .with_decryption(true)
                .send()
                .await
                .context("Failed to read SSM parameters")
                .map_err(BrokerError::cloud)?;

            if !output.invalid_parameters().is_empty() {
                return Err(BrokerError::not_found(format!(
                    "SSM parameters {}",
                    output.invalid_parameters().join(", ")
                )));
            }

            values.extend(output.parameters().iter().filter_map(|param| {
                Some((param.name()?.to_string(), param.value()?.to_string()))
            }));
        }

        Ok(values)
    }
}

#[derive(Debug, Clone)]
pub struct StsCallerIdentity {
    client: aws_sdk_sts::Client,
}

impl StsCallerIdentity {
    pub fn new(client: aws_sdk_sts::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CallerIdentity for StsCallerIdentity {
    async fn account_id(&self) -> Result<String> {
        let output = self
            .client
            .get_caller_identity()
            .send()
            .await
            .context("Failed to get caller identity")
            .map_err(BrokerError::cloud)?;

        output
            .account()
            .map(str::to_string)
            .ok_or_else(|| {
                BrokerError::cloud(anyhow::anyhow!("caller identity has no account"))
            })
    }
}
