use crate::{
    aws::{ClientFactory, Session},
    config::Config,
    errors::{BrokerError, Result},
    models::{broker::ACCOUNT_UUID_PARAM, BrokerIdentity},
    storage::DataStore,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Identity and durable store established once at startup.
pub struct Bootstrap {
    pub identity: BrokerIdentity,
    pub store: Arc<dyn DataStore>,
}

/// Storage namespace shared by every broker of `broker_id` in one account.
pub fn store_namespace(account_id: &str, broker_id: &str) -> String {
    format!("{}-{}", account_id, broker_id)
}

/// Reads the account correlation id, generating and persisting it on first
/// start.
pub async fn account_uuid(store: &dyn DataStore) -> Result<Uuid> {
    match store.get_param(ACCOUNT_UUID_PARAM).await {
        Ok(value) => Uuid::parse_str(value.trim()).map_err(|err| {
            BrokerError::internal(anyhow::anyhow!(
                "stored {} '{}' is not a UUID: {}",
                ACCOUNT_UUID_PARAM,
                value,
                err
            ))
        }),
        Err(err) if err.is_not_found() => {
            let generated = Uuid::new_v4();
            store
                .put_param(ACCOUNT_UUID_PARAM, &generated.to_string())
                .await?;
            info!("Generated {} {}", ACCOUNT_UUID_PARAM, generated);
            Ok(generated)
        }
        Err(err) => Err(err),
    }
}

pub async fn bootstrap(
    config: &Config,
    session: &Session,
    clients: &dyn ClientFactory,
) -> Result<Bootstrap> {
    let account_id = clients.identity(session).account_id().await?;
    let store = clients.data_store(
        session,
        &config.table_name,
        &store_namespace(&account_id, &config.broker_id),
    );
    let account_uuid = account_uuid(store.as_ref()).await?;

    let identity = BrokerIdentity {
        account_id,
        broker_id: config.broker_id.clone(),
        account_uuid,
    };
    info!(
        "Broker {} running in account {}",
        identity.broker_id, identity.account_id
    );

    Ok(Bootstrap { identity, store })
}

#[cfg(test)]
#[path = "bootstrap_tests.rs"]
mod tests;
