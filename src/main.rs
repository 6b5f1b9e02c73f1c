use anyhow::Context;
use broker::{
    aws::{AwsClientFactory, AwsSessionFactory, ClientFactory, SessionFactory},
    catalog::{CatalogCache, Synchronizer},
    config::Config,
    services::{bootstrap, Broker, BrokerSettings},
};
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .init();

    let sessions = Arc::new(AwsSessionFactory::new(config.retry_settings()));
    let clients = Arc::new(AwsClientFactory);

    let session = sessions
        .session(&config.credential_inputs(None), &HashMap::new())
        .await?;
    let started = bootstrap(&config, &session, clients.as_ref()).await?;

    let cache = Arc::new(CatalogCache::new(config.cache_ttl()));
    let source = clients.template_source(&session, &config.bucket_details());
    let synchronizer = Arc::new(Synchronizer::new(
        source,
        started.store.clone(),
        cache.clone(),
    ));

    let broker = Broker::new(
        BrokerSettings::from_config(&config, &started.identity),
        started.identity,
        cache,
        started.store,
        sessions,
        clients,
    );
    tracing::info!(
        "Stack prefix {}, polling templates every {:?}",
        broker.identity().stack_prefix(),
        config.poll_interval()
    );

    let shutdown = CancellationToken::new();
    let poller = tokio::spawn({
        let synchronizer = synchronizer.clone();
        let shutdown = shutdown.clone();
        let period = config.poll_interval();
        async move { synchronizer.run(period, shutdown).await }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    shutdown.cancel();
    poller.await.context("Catalog synchronizer panicked")?;

    Ok(())
}
