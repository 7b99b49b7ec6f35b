//! Per-site scan context
//!
//! Owns everything a scan of one site shares between VMs: the gateway, the
//! optional directory, the metadata cache and the single reference time all
//! ages are measured against.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::cache::{EmailCache, MetadataCache};
use crate::directory::DirectoryLookup;
use crate::error::GatewayError;
use crate::gateway::{decode, Operation, ProviderGateway, Scope};
use crate::models::Site;
use crate::observability::{MonitorMetrics, ScanLogger};
use crate::probe::{ProbeConfig, Prober};

pub struct ScanContext {
    site: Site,
    gateway: Arc<dyn ProviderGateway>,
    directory: Option<Arc<dyn DirectoryLookup>>,
    prober: Prober,
    cache: MetadataCache,
    now: DateTime<Utc>,
    metrics: MonitorMetrics,
    logger: ScanLogger,
}

impl ScanContext {
    pub fn new(site: Site, gateway: Arc<dyn ProviderGateway>) -> Self {
        Self {
            logger: ScanLogger::new(&site.name, &site.vo),
            site,
            gateway,
            directory: None,
            prober: Prober::new(ProbeConfig::default()),
            cache: MetadataCache::new(),
            now: Utc::now(),
            metrics: MonitorMetrics::new(),
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn DirectoryLookup>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Share e-mail lookups with the other sites of the run
    pub fn with_email_cache(mut self, emails: Arc<EmailCache>) -> Self {
        self.cache = MetadataCache::with_email_cache(emails);
        self
    }

    pub fn with_probes(mut self, config: ProbeConfig) -> Self {
        self.prober = Prober::new(config);
        self
    }

    /// Fix the reference time, e.g. to one value for a whole federation run
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn gateway(&self) -> &Arc<dyn ProviderGateway> {
        &self.gateway
    }

    pub fn directory(&self) -> Option<&Arc<dyn DirectoryLookup>> {
        self.directory.as_ref()
    }

    pub fn prober(&self) -> &Prober {
        &self.prober
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn metrics(&self) -> &MonitorMetrics {
        &self.metrics
    }

    pub fn logger(&self) -> &ScanLogger {
        &self.logger
    }

    /// Run one provider operation against this site, recording its outcome
    pub async fn call(&self, operation: &Operation, scope: Scope) -> Result<Value, GatewayError> {
        let started = Instant::now();
        let result = self.gateway.execute(&self.site, operation, scope).await;
        self.metrics.observe_gateway_call(
            operation.name(),
            started.elapsed().as_secs_f64(),
            result.is_ok(),
        );
        if let Err(e) = &result {
            warn!(
                site = %self.site.name,
                operation = operation.name(),
                error = %e,
                "Provider operation failed"
            );
        }
        result
    }

    /// Run an operation and decode its reply
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        operation: Operation,
        scope: Scope,
    ) -> Result<T, GatewayError> {
        let reply = self.call(&operation, scope).await?;
        decode(&operation, reply)
    }
}
