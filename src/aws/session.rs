use crate::errors::{BrokerError, Result};
use async_trait::async_trait;
use aws_config::{
    retry::RetryConfig, sts::AssumeRoleProvider, timeout::TimeoutConfig, BehaviorVersion,
    ConfigLoader, Region, SdkConfig,
};
use aws_sdk_sts::config::Credentials;
use std::{collections::HashMap, fmt, time::Duration};

const ROLE_SESSION_NAME: &str = "aws-service-broker";
const STATIC_PROVIDER_NAME: &str = "broker-static";

#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialInputs {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: String,
    pub account_id: Option<String>,
    pub profile: Option<String>,
    pub role_arn: Option<String>,
}

impl fmt::Debug for CredentialInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialInputs")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "** redacted **"))
            .field("region", &self.region)
            .field("account_id", &self.account_id)
            .field("profile", &self.profile)
            .field("role_arn", &self.role_arn)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Static {
        access_key_id: String,
        secret_access_key: String,
    },
    Profile(String),
    Environment,
}

impl CredentialSource {
    pub fn label(&self) -> &'static str {
        match self {
            CredentialSource::Static { .. } => "static",
            CredentialSource::Profile(_) => "profile",
            CredentialSource::Environment => "environment",
        }
    }
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Static { access_key_id, .. } => f
                .debug_struct("Static")
                .field("access_key_id", access_key_id)
                .finish_non_exhaustive(),
            CredentialSource::Profile(name) => f.debug_tuple("Profile").field(name).finish(),
            CredentialSource::Environment => f.write_str("Environment"),
        }
    }
}

/// Fully resolved session inputs, before any credentials are loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    pub source: CredentialSource,
    pub region: String,
    pub assume_role: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub operation_timeout: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            operation_timeout: Duration::from_secs(60),
        }
    }
}

type SourceResolver = fn(&CredentialInputs) -> Option<Result<CredentialSource>>;

/// Tried in order, first match wins.
const CREDENTIAL_CHAIN: [SourceResolver; 3] = [static_keys, named_profile, environment];

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn static_keys(inputs: &CredentialInputs) -> Option<Result<CredentialSource>> {
    match (
        non_empty(&inputs.access_key_id),
        non_empty(&inputs.secret_access_key),
    ) {
        (Some(key), Some(secret)) => Some(Ok(CredentialSource::Static {
            access_key_id: key.to_string(),
            secret_access_key: secret.to_string(),
        })),
        (Some(_), None) | (None, Some(_)) => Some(Err(BrokerError::credential_resolution(
            "access key id and secret access key must be supplied together",
        ))),
        (None, None) => None,
    }
}

fn named_profile(inputs: &CredentialInputs) -> Option<Result<CredentialSource>> {
    non_empty(&inputs.profile).map(|name| Ok(CredentialSource::Profile(name.to_string())))
}

fn environment(_: &CredentialInputs) -> Option<Result<CredentialSource>> {
    Some(Ok(CredentialSource::Environment))
}

fn resolve_role(
    inputs: &CredentialInputs,
    overrides: &HashMap<String, String>,
) -> Result<Option<String>> {
    let lookup = |key: &str| {
        overrides
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    };

    let role = match (
        lookup("role_arn"),
        lookup("target_role_name"),
        lookup("target_account_id"),
    ) {
        (Some(arn), _, _) => Some(arn.to_string()),
        (None, Some(role_name), account) => {
            let account = account
                .or_else(|| non_empty(&inputs.account_id))
                .ok_or_else(|| {
                    BrokerError::credential_resolution(format!(
                        "target role '{}' requires an account id",
                        role_name
                    ))
                })?;
            Some(format!("arn:aws:iam::{}:role/{}", account, role_name))
        }
        (None, None, Some(account)) => {
            return Err(BrokerError::credential_resolution(format!(
                "target account '{}' requires a target role name",
                account
            )))
        }
        (None, None, None) => non_empty(&inputs.role_arn).map(str::to_string),
    };

    match role {
        Some(arn) if !arn.starts_with("arn:") => Err(BrokerError::credential_resolution(
            format!("'{}' is not a role ARN", arn),
        )),
        role => Ok(role),
    }
}

/// Resolves credential inputs and per-request overrides into a session spec.
///
/// Credential source priority is static keys, then a named profile, then the
/// ambient environment chain. Any source may be further scoped by assuming a
/// role taken from the overrides or the broker-wide `role_arn`.
pub fn resolve(
    inputs: &CredentialInputs,
    overrides: &HashMap<String, String>,
) -> Result<SessionSpec> {
    let source = CREDENTIAL_CHAIN
        .iter()
        .find_map(|resolver| resolver(inputs))
        .unwrap_or_else(|| {
            Err(BrokerError::credential_resolution(
                "no usable credential source",
            ))
        })?;

    let region = overrides
        .get("region")
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .unwrap_or(inputs.region.trim());
    if region.is_empty() {
        return Err(BrokerError::credential_resolution("no region configured"));
    }

    Ok(SessionSpec {
        source,
        region: region.to_string(),
        assume_role: resolve_role(inputs, overrides)?,
    })
}

#[derive(Debug, Clone)]
pub struct Session {
    spec: SessionSpec,
    config: SdkConfig,
}

impl Session {
    /// Builds a session without touching any credential provider.
    pub fn unloaded(spec: SessionSpec, retry: RetrySettings) -> Self {
        let config = SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(spec.region.clone()))
            .retry_config(RetryConfig::standard().with_max_attempts(retry.max_attempts))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(retry.operation_timeout)
                    .build(),
            )
            .build();

        Self { spec, config }
    }

    pub async fn load(spec: SessionSpec, retry: RetrySettings) -> Result<Self> {
        let base_loader = match &spec.source {
            CredentialSource::Static {
                access_key_id,
                secret_access_key,
            } => loader(&spec, retry).credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                STATIC_PROVIDER_NAME,
            )),
            CredentialSource::Profile(name) => loader(&spec, retry).profile_name(name),
            CredentialSource::Environment => loader(&spec, retry),
        };
        let base = base_loader.load().await;

        let config = match &spec.assume_role {
            None => base,
            Some(role_arn) => {
                let provider = AssumeRoleProvider::builder(role_arn)
                    .session_name(ROLE_SESSION_NAME)
                    .region(Region::new(spec.region.clone()))
                    .configure(&base)
                    .build()
                    .await;

                loader(&spec, retry)
                    .credentials_provider(provider)
                    .load()
                    .await
            }
        };

        if config.credentials_provider().is_none() {
            return Err(BrokerError::credential_resolution(format!(
                "no credentials provider for {} source",
                spec.source.label()
            )));
        }

        Ok(Self { spec, config })
    }

    pub fn spec(&self) -> &SessionSpec {
        &self.spec
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn region(&self) -> &str {
        &self.spec.region
    }
}

fn loader(spec: &SessionSpec, retry: RetrySettings) -> ConfigLoader {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(spec.region.clone()))
        .retry_config(RetryConfig::standard().with_max_attempts(retry.max_attempts))
        .timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(retry.operation_timeout)
                .build(),
        )
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn session(
        &self,
        inputs: &CredentialInputs,
        overrides: &HashMap<String, String>,
    ) -> Result<Session>;
}

#[derive(Debug, Clone, Default)]
pub struct AwsSessionFactory {
    retry: RetrySettings,
}

impl AwsSessionFactory {
    pub fn new(retry: RetrySettings) -> Self {
        Self { retry }
    }
}

#[async_trait]
impl SessionFactory for AwsSessionFactory {
    async fn session(
        &self,
        inputs: &CredentialInputs,
        overrides: &HashMap<String, String>,
    ) -> Result<Session> {
        let spec = resolve(inputs, overrides)?;
        tracing::debug!(
            source = spec.source.label(),
            region = %spec.region,
            assume_role = ?spec.assume_role,
            "Deriving AWS session"
        );

        Session::load(spec, self.retry).await
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
