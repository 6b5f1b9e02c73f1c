use crate::{models::OperationKind, utils};
use sha2::{Digest, Sha256};

const MAX_STACK_NAME_LEN: usize = 128;
const INSTANCE_DIGEST_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackStatus {
    CreateInProgress,
    CreateComplete,
    CreateFailed,
    RollbackInProgress,
    RollbackComplete,
    RollbackFailed,
    DeleteInProgress,
    DeleteComplete,
    DeleteFailed,
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOutcome {
    InProgress,
    Succeeded,
    Failed,
}

impl From<&str> for StackStatus {
    fn from(status: &str) -> Self {
        match status {
            "CREATE_IN_PROGRESS" => StackStatus::CreateInProgress,
            "CREATE_COMPLETE" => StackStatus::CreateComplete,
            "CREATE_FAILED" => StackStatus::CreateFailed,
            "ROLLBACK_IN_PROGRESS" => StackStatus::RollbackInProgress,
            "ROLLBACK_COMPLETE" => StackStatus::RollbackComplete,
            "ROLLBACK_FAILED" => StackStatus::RollbackFailed,
            "DELETE_IN_PROGRESS" => StackStatus::DeleteInProgress,
            "DELETE_COMPLETE" => StackStatus::DeleteComplete,
            "DELETE_FAILED" => StackStatus::DeleteFailed,
            other => StackStatus::Other(other.to_string()),
        }
    }
}

impl StackStatus {
    pub fn as_str(&self) -> &str {
        match self {
            StackStatus::CreateInProgress => "CREATE_IN_PROGRESS",
            StackStatus::CreateComplete => "CREATE_COMPLETE",
            StackStatus::CreateFailed => "CREATE_FAILED",
            StackStatus::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            StackStatus::RollbackComplete => "ROLLBACK_COMPLETE",
            StackStatus::RollbackFailed => "ROLLBACK_FAILED",
            StackStatus::DeleteInProgress => "DELETE_IN_PROGRESS",
            StackStatus::DeleteComplete => "DELETE_COMPLETE",
            StackStatus::DeleteFailed => "DELETE_FAILED",
            StackStatus::Other(status) => status,
        }
    }

    /// Maps a provider status onto the outcome of the operation in flight.
    ///
    /// A rollback still in progress is reported as in progress; the stack
    /// only counts as failed once the provider settles.
    pub fn outcome(&self, operation: OperationKind) -> StackOutcome {
        match (operation, self) {
            (OperationKind::Provision, StackStatus::CreateComplete) => StackOutcome::Succeeded,
            (
                OperationKind::Provision,
                StackStatus::CreateFailed
                | StackStatus::RollbackComplete
                | StackStatus::RollbackFailed
                | StackStatus::DeleteComplete
                | StackStatus::DeleteFailed,
            ) => StackOutcome::Failed,
            (OperationKind::Provision, StackStatus::Other(status)) if status.ends_with("_FAILED") => {
                StackOutcome::Failed
            }
            (OperationKind::Provision, StackStatus::Other(status))
                if status.ends_with("_COMPLETE") =>
            {
                StackOutcome::Succeeded
            }
            (OperationKind::Provision, _) => StackOutcome::InProgress,

            (OperationKind::Deprovision, StackStatus::DeleteComplete) => StackOutcome::Succeeded,
            (OperationKind::Deprovision, StackStatus::DeleteFailed) => StackOutcome::Failed,
            (OperationKind::Deprovision, _) => StackOutcome::InProgress,
        }
    }
}

/// Provider-safe stack name: letters, digits and hyphens, starting with a letter.
/// Names over the provider limit are cut short and end in a digest of the
/// instance id, so distinct instances keep distinct names.
pub fn stack_name(prefix: &str, service_id: &str, instance_id: &str) -> String {
    let raw = format!("{}-{}-{}", prefix, service_id, instance_id);
    let mut name = utils::regex::STACK_NAME_INVALID
        .replace_all(&raw, "-")
        .trim_matches('-')
        .to_string();

    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        name.insert_str(0, "sb-");
    }
    if name.len() <= MAX_STACK_NAME_LEN {
        return name;
    }

    let digest = format!("{:x}", Sha256::digest(instance_id.as_bytes()));
    name.truncate(MAX_STACK_NAME_LEN - INSTANCE_DIGEST_LEN - 1);
    format!(
        "{}-{}",
        name.trim_end_matches('-'),
        &digest[..INSTANCE_DIGEST_LEN]
    )
}

#[cfg(test)]
#[path = "stack_tests.rs"]
mod tests;
