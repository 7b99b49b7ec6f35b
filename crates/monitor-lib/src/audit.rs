//! Site audits
//!
//! An audit inventories a site, evaluates every policy and collects the
//! findings into one report. Several sites can be audited concurrently;
//! reports come back in the order the sites were given.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use crate::cache::EmailCache;
use crate::config::MonitorConfig;
use crate::context::ScanContext;
use crate::directory::DirectoryLookup;
use crate::error::{GatewayError, ScanError};
use crate::gateway::{Operation, ProviderGateway, Scope};
use crate::inventory::{self, VmOutcome};
use crate::models::{
    Finding, FloatingIp, QuotaRow, QuotaSnapshot, Rule, SecurityGroup, Site, Subject, VmFacts,
    Volume,
};
use crate::policy::{
    unused_floating_ips, unused_security_groups, unused_volumes, PolicyEvaluator,
};
use crate::probe::ProbeConfig;

/// Outcome of auditing one site
#[derive(Debug, Clone, Serialize)]
pub struct SiteReport {
    pub site: String,
    pub vo: String,
    pub scanned_at: DateTime<Utc>,
    pub listed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Reconciled VMs in listing order
    pub vms: Vec<VmFacts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaSnapshot>,
    /// VM findings in listing order, then site findings
    pub findings: Vec<Finding>,
}

impl SiteReport {
    /// Findings for VMs that may be deleted after confirmation
    pub fn deletion_candidates(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.deletion_eligible)
    }

    pub fn vm(&self, id: &str) -> Option<&VmFacts> {
        self.vms.iter().find(|vm| vm.id == id)
    }

    /// Findings about one VM
    pub fn findings_for<'a>(&'a self, vm_id: &'a str) -> impl Iterator<Item = &'a Finding> {
        self.findings
            .iter()
            .filter(move |f| f.vm_id() == Some(vm_id))
    }
}

/// Result of one site in a federation run
#[derive(Debug)]
pub struct SiteOutcome {
    pub site: String,
    pub result: Result<SiteReport, ScanError>,
}

/// Audits sites with one gateway, policy set and optional directory
pub struct Monitor {
    gateway: Arc<dyn ProviderGateway>,
    directory: Option<Arc<dyn DirectoryLookup>>,
    evaluator: PolicyEvaluator,
    probes: ProbeConfig,
    check_quotas: bool,
    vm_concurrency: usize,
    site_concurrency: usize,
}

impl Monitor {
    pub fn new(gateway: Arc<dyn ProviderGateway>, config: &MonitorConfig) -> Self {
        Self {
            gateway,
            directory: None,
            evaluator: PolicyEvaluator::new(&config.policy),
            probes: config.probes.clone(),
            check_quotas: config.policy.check_quotas,
            vm_concurrency: config.scan.vm_concurrency,
            site_concurrency: config.scan.site_concurrency,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn DirectoryLookup>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn gateway(&self) -> &Arc<dyn ProviderGateway> {
        &self.gateway
    }

    pub fn evaluator(&self) -> &PolicyEvaluator {
        &self.evaluator
    }

    /// Scan context for one site of a run
    pub fn context(&self, site: Site, emails: Arc<EmailCache>, now: DateTime<Utc>) -> ScanContext {
        let ctx = ScanContext::new(site, Arc::clone(&self.gateway))
            .with_email_cache(emails)
            .with_probes(self.probes.clone())
            .with_now(now);
        match &self.directory {
            Some(directory) => ctx.with_directory(Arc::clone(directory)),
            None => ctx,
        }
    }

    /// Inventory the site and evaluate every policy against it
    pub async fn audit_site(
        &self,
        ctx: &ScanContext,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SiteReport, ScanError> {
        let started = Instant::now();
        let site = ctx.site().name.clone();
        let inventory = inventory::scan(ctx, self.vm_concurrency, shutdown).await?;

        let mut findings = Vec::new();
        for outcome in &inventory.outcomes {
            match outcome {
                VmOutcome::Reconciled(vm) => findings.extend(self.evaluator.evaluate_vm(vm)),
                VmOutcome::Failed { vm_id, name, error } => findings.push(Finding::error(
                    Subject::Vm(vm_id.clone()),
                    Rule::ReconcileFailed,
                    format!("Unable to reconcile VM {}: {}", name, error),
                )),
            }
        }

        let groups_in_use: BTreeSet<String> = inventory
            .facts()
            .flat_map(|vm| vm.security_groups.iter().cloned())
            .collect();

        let (quota, floating_ips, volumes, groups) = tokio::join!(
            self.fetch_quota(ctx),
            ctx.fetch::<Vec<FloatingIp>>(Operation::FloatingIpList, Scope::Vo),
            ctx.fetch::<Vec<Volume>>(Operation::VolumeList, Scope::Vo),
            ctx.fetch::<Vec<SecurityGroup>>(Operation::SecurityGroupList, Scope::Vo),
        );

        let quota = match quota {
            Some(Ok(snapshot)) => {
                findings.extend(self.evaluator.quota().evaluate(&site, &snapshot));
                Some(snapshot)
            }
            Some(Err(e)) => {
                findings.push(check_failed(&site, "quotas", &e));
                None
            }
            None => None,
        };
        match floating_ips {
            Ok(ips) => findings.extend(unused_floating_ips(&site, &ips)),
            Err(e) => findings.push(check_failed(&site, "floating IPs", &e)),
        }
        match groups {
            // Groups of unreconciled VMs are unknown, so nothing can be called unused
            Ok(_) if inventory.failed() > 0 => findings.push(Finding::info(
                Subject::Site(site.clone()),
                Rule::UnusedSecurityGroups,
                format!(
                    "Unused security groups not checked: {} VM(s) could not be reconciled",
                    inventory.failed()
                ),
            )),
            Ok(groups) => findings.extend(unused_security_groups(&site, &groups, &groups_in_use)),
            Err(e) => findings.push(check_failed(&site, "security groups", &e)),
        }
        match volumes {
            Ok(volumes) => findings.extend(unused_volumes(&site, &volumes)),
            Err(e) => findings.push(check_failed(&site, "volumes", &e)),
        }

        for finding in &findings {
            ctx.logger().log_finding(finding);
        }
        let reconciled = inventory.reconciled();
        let failed = inventory.failed();
        ctx.metrics().record_site_scan(
            &site,
            reconciled,
            failed,
            &findings,
            started.elapsed().as_secs_f64(),
        );
        ctx.logger()
            .log_scan_finished(reconciled, failed, findings.len());

        Ok(SiteReport {
            site,
            vo: ctx.site().vo.clone(),
            scanned_at: ctx.now(),
            listed: inventory.listed,
            skipped: inventory.skipped,
            failed,
            vms: inventory.facts().cloned().collect(),
            quota,
            findings,
        })
    }

    async fn fetch_quota(&self, ctx: &ScanContext) -> Option<Result<QuotaSnapshot, GatewayError>> {
        if !self.check_quotas {
            return None;
        }
        let rows = ctx.fetch::<Vec<QuotaRow>>(Operation::QuotaShow, Scope::Vo).await;
        Some(rows.map(|rows| QuotaSnapshot::from_rows(&rows)))
    }

    /// Audit several sites concurrently. Every site is measured against the
    /// same reference time and shares one e-mail cache; a failing site does
    /// not affect the others.
    pub async fn monitor_sites(
        &self,
        sites: Vec<Site>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<SiteOutcome> {
        let emails = Arc::new(EmailCache::new());
        let now = Utc::now();

        stream::iter(sites)
            .map(|site| {
                let ctx = self.context(site, Arc::clone(&emails), now);
                let shutdown = shutdown.clone();
                async move {
                    let result = self.audit_site(&ctx, shutdown).await;
                    SiteOutcome {
                        site: ctx.site().name.clone(),
                        result,
                    }
                }
            })
            .buffered(self.site_concurrency.max(1))
            .collect()
            .await
    }
}

fn check_failed(site: &str, what: &str, error: &GatewayError) -> Finding {
    Finding::error(
        Subject::Site(site.to_string()),
        Rule::CheckFailed,
        format!("Unable to check {}: {}", what, error),
    )
}
