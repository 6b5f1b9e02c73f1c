use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ACCOUNT_UUID_PARAM: &str = "accountuuid";

/// Established once at startup, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerIdentity {
    pub account_id: String,
    pub broker_id: String,
    pub account_uuid: Uuid,
}

impl BrokerIdentity {
    /// Tag that keeps stacks of separate broker deployments apart.
    pub fn stack_prefix(&self) -> String {
        let uuid = self.account_uuid.simple().to_string();
        format!("{}-{}", self.broker_id, &uuid[..8])
    }
}
