use crate::{
    catalog::{
        cache::{CatalogCache, TtlCache},
        source::TemplateSource,
        template::parse_template,
    },
    errors::{BrokerError, Result},
    models::{ServiceDefinition, ServiceLastUpdate, ServiceNeedsUpdate},
    storage::DataStore,
};
use chrono::{DateTime, Utc};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one synchronizer pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub listed: usize,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<String>,
    pub evicted: Vec<String>,
}

/// Marks each listed template that is new, strictly newer than the cached
/// timestamp, or missing its parsed definition.
pub fn needs_update(
    listing: &TtlCache<DateTime<Utc>>,
    metadata: &TtlCache<Arc<ServiceDefinition>>,
    listed: &[ServiceLastUpdate],
) -> Vec<ServiceNeedsUpdate> {
    listed
        .iter()
        .map(|entry| {
            let update = match listing.get(&entry.name) {
                Some(known) => entry.date > known || !metadata.contains(&entry.name),
                None => true,
            };
            ServiceNeedsUpdate {
                name: entry.name.clone(),
                update,
            }
        })
        .collect()
}

/// Keeps the catalog cache consistent with the template source.
pub struct Synchronizer {
    source: Arc<dyn TemplateSource>,
    sink: Arc<dyn DataStore>,
    cache: Arc<CatalogCache>,
    pass_lock: tokio::sync::Mutex<()>,
}

impl Synchronizer {
    pub fn new(
        source: Arc<dyn TemplateSource>,
        sink: Arc<dyn DataStore>,
        cache: Arc<CatalogCache>,
    ) -> Self {
        Self {
            source,
            sink,
            cache,
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &Arc<CatalogCache> {
        &self.cache
    }

    /// Runs one pass. A list or fetch failure aborts the pass before any
    /// cache write; a template that fails to decode, parse or persist is
    /// skipped.
    #[tracing::instrument(skip(self), fields(bucket = %self.source.bucket().bucket))]
    pub async fn run_pass(&self) -> Result<PassReport> {
        let _pass = self.pass_lock.lock().await;
        let ttl = self.cache.ttl();

        let listed = self.source.list_templates().await?;
        let decisions = needs_update(&self.cache.listing, &self.cache.metadata, &listed);

        let mut report = PassReport {
            listed: listed.len(),
            ..PassReport::default()
        };

        let mut fetched = Vec::new();
        for decision in decisions.iter().filter(|d| d.update) {
            match self.source.fetch_template(&decision.name).await {
                Ok(body) => fetched.push((decision.name.clone(), body)),
                Err(err @ BrokerError::TemplateParse { .. }) => {
                    warn!("Skipping template {}: {}", decision.name, err);
                    report.failed.push(decision.name.clone());
                }
                Err(err) => return Err(err),
            }
        }
        let mut staged: HashMap<String, Arc<ServiceDefinition>> = HashMap::new();

        for (name, body) in fetched {
            let template = self.source.bucket().template_ref(&name);
            let definition = match parse_template(&name, &body, template) {
                Ok(definition) => definition,
                Err(err) => {
                    warn!("Skipping template {}: {}", name, err);
                    report.failed.push(name);
                    continue;
                }
            };

            if let Err(err) = self.sink.put_service_definition(&definition).await {
                error!("Failed to persist service definition {}: {}", name, err);
                report.failed.push(name);
                continue;
            }

            debug!("Refreshed template {}", name);
            staged.insert(name, Arc::new(definition));
        }

        let mut listing = Vec::with_capacity(listed.len());
        for entry in &listed {
            if let Some(definition) = staged.remove(&entry.name) {
                self.cache.metadata.set(entry.name.clone(), definition, ttl);
                report.updated.push(entry.name.clone());
                listing.push((entry.name.clone(), entry.date));
            } else if report.failed.contains(&entry.name) {
                // keep advertising the last good version until a retry succeeds
                if let Some(known) = self.cache.listing.get(&entry.name) {
                    if self.cache.metadata.touch(&entry.name, ttl) {
                        listing.push((entry.name.clone(), known));
                    }
                }
            } else if self.cache.metadata.touch(&entry.name, ttl) {
                report.unchanged.push(entry.name.clone());
                listing.push((entry.name.clone(), entry.date));
            }
        }

        let advertised: HashSet<String> = listing.iter().map(|(name, _)| name.clone()).collect();
        self.cache.listing.replace_all(listing, ttl);
        report.evicted = self
            .cache
            .metadata
            .evict_expired_unless(|name| advertised.contains(name));

        info!(
            "Catalog pass complete: {} listed, {} updated, {} failed, {} evicted",
            report.listed,
            report.updated.len(),
            report.failed.len(),
            report.evicted.len()
        );
        Ok(report)
    }

    /// Runs a pass immediately and then once per `period` until `shutdown`
    /// is cancelled.
    pub async fn run(&self, period: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Catalog synchronizer stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.run_pass().await {
                        error!("Catalog pass aborted: {}", err);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
