use thiserror::Error;
use validator::ValidationErrors;

pub type Result<T, E = BrokerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BrokerError {
    // request-scoped, returned synchronously
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Dependency violation: {0}")]
    DependencyViolation(String),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Not found: {0}")]
    NotFound(String),

    // session and cloud
    #[error("Credential resolution failed: {0}")]
    CredentialResolution(String),
    #[error("Provisioning failed: {0}")]
    ProvisioningFailed(String),
    #[error("Cloud request failed: {source:#}")]
    Cloud {
        #[source]
        source: anyhow::Error,
    },

    // catalog synchronizer, never escape to request handling
    #[error("Catalog fetch failed: {source:#}")]
    CatalogFetch {
        #[source]
        source: anyhow::Error,
    },
    #[error("Template '{name}' is malformed: {reason}")]
    TemplateParse { name: String, reason: String },

    #[error("Storage error: {source:#}")]
    Storage {
        #[source]
        source: anyhow::Error,
    },
    #[error("Internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for BrokerError {
    fn from(err: anyhow::Error) -> Self {
        BrokerError::Internal(err)
    }
}

impl BrokerError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        BrokerError::Conflict(msg.into())
    }

    pub fn dependency_violation(msg: impl Into<String>) -> Self {
        BrokerError::DependencyViolation(msg.into())
    }

    pub fn invalid_parameters(msg: impl Into<String>) -> Self {
        BrokerError::InvalidParameters(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        BrokerError::NotFound(msg.into())
    }

    pub fn credential_resolution(msg: impl Into<String>) -> Self {
        BrokerError::CredentialResolution(msg.into())
    }

    pub fn provisioning_failed(msg: impl Into<String>) -> Self {
        BrokerError::ProvisioningFailed(msg.into())
    }

    pub fn cloud(err: impl Into<anyhow::Error>) -> Self {
        BrokerError::Cloud { source: err.into() }
    }

    pub fn catalog_fetch(err: impl Into<anyhow::Error>) -> Self {
        BrokerError::CatalogFetch { source: err.into() }
    }

    pub fn template_parse(name: impl Into<String>, reason: impl Into<String>) -> Self {
        BrokerError::TemplateParse {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        BrokerError::Storage { source: err.into() }
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        BrokerError::Internal(err.into())
    }

    pub fn from_validation(name: &str, errors: &ValidationErrors) -> Self {
        BrokerError::template_parse(name, format_validation_errors(errors))
    }

    /// Stable tag used by protocol adapters to pick a status code.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::Conflict(_) => "conflict",
            BrokerError::DependencyViolation(_) => "dependency_violation",
            BrokerError::InvalidParameters(_) => "invalid_parameters",
            BrokerError::NotFound(_) => "not_found",
            BrokerError::CredentialResolution(_) => "credential_resolution",
            BrokerError::ProvisioningFailed(_) => "provisioning_failed",
            BrokerError::Cloud { .. } => "cloud_error",
            BrokerError::CatalogFetch { .. } => "catalog_fetch",
            BrokerError::TemplateParse { .. } => "template_parse",
            BrokerError::Storage { .. } => "storage_error",
            BrokerError::Internal(_) => "internal_error",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BrokerError::NotFound(_))
    }

    /// Validation failures the caller can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BrokerError::Conflict(_)
                | BrokerError::DependencyViolation(_)
                | BrokerError::InvalidParameters(_)
                | BrokerError::NotFound(_)
        )
    }
}

fn format_validation_errors(errors: &ValidationErrors) -> String {
    let mut messages = Vec::new();

    for (field, field_errors) in errors.field_errors() {
        for error in field_errors {
            let message = error
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("invalid value for field '{}'", field));

            messages.push(message);
        }
    }

    if messages.is_empty() {
        return errors.to_string();
    }

    messages.sort();
    messages.join(", ")
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
