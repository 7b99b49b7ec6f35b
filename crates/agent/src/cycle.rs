//! Periodic report-only monitoring cycles

use monitor_lib::{
    health::{components, HealthRegistry},
    EmailStatus, Monitor, ScanError, Site, SiteOutcome,
};
use tokio::sync::watch;
use tracing::{info, warn};

/// Summary of one cycle
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub sites_ok: usize,
    pub sites_failed: usize,
    pub findings: usize,
    pub stale_vms: usize,
}

/// Audit every site once and publish component health. Never deletes.
pub async fn run_cycle(
    monitor: &Monitor,
    sites: &[Site],
    health: &HealthRegistry,
    directory_enabled: bool,
    shutdown: watch::Receiver<bool>,
) -> CycleSummary {
    let outcomes = monitor.monitor_sites(sites.to_vec(), shutdown).await;
    let summary = publish(&outcomes, health, directory_enabled).await;

    info!(
        event = "cycle_finished",
        sites_ok = summary.sites_ok,
        sites_failed = summary.sites_failed,
        findings = summary.findings,
        stale_vms = summary.stale_vms,
        "Monitoring cycle finished"
    );
    summary
}

async fn publish(
    outcomes: &[SiteOutcome],
    health: &HealthRegistry,
    directory_enabled: bool,
) -> CycleSummary {
    let mut summary = CycleSummary::default();
    let mut directory_errors = 0;

    for outcome in outcomes {
        let component = components::site(&outcome.site);
        match &outcome.result {
            Ok(report) => {
                summary.sites_ok += 1;
                summary.findings += report.findings.len();
                summary.stale_vms += report.deletion_candidates().count();
                directory_errors += report
                    .vms
                    .iter()
                    .filter_map(|vm| vm.owner.as_ref())
                    .filter(|owner| owner.email == Some(EmailStatus::Unavailable))
                    .count();
                if report.failed > 0 {
                    health
                        .set_degraded(
                            &component,
                            format!("{} VM(s) failed to reconcile", report.failed),
                        )
                        .await;
                } else {
                    health.set_healthy(&component).await;
                }
            }
            Err(ScanError::Cancelled { .. }) => {}
            Err(e) => {
                summary.sites_failed += 1;
                warn!(site = %outcome.site, error = %e, "Site audit failed");
                health.set_unhealthy(&component, e.to_string()).await;
            }
        }
    }

    if summary.sites_ok == 0 && summary.sites_failed > 0 {
        health
            .set_unhealthy(components::GATEWAY, "No site could be listed")
            .await;
    } else {
        health.set_healthy(components::GATEWAY).await;
    }

    if directory_enabled {
        if directory_errors > 0 {
            health
                .set_degraded(
                    components::DIRECTORY,
                    format!("{} e-mail lookup(s) failed", directory_errors),
                )
                .await;
        } else {
            health.set_healthy(components::DIRECTORY).await;
        }
    }

    summary
}
