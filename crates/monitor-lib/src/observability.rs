//! Observability infrastructure for the monitoring engine
//!
//! Provides:
//! - Prometheus metrics (gateway calls and latency, cache efficiency, scan results)
//! - Structured logging of scan events with tracing

use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, register_int_gauge_vec,
    Encoder, Histogram, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::models::{Finding, Severity};

/// Histogram buckets for provider calls (in seconds)
const GATEWAY_LATENCY_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Histogram buckets for whole-site scans (in seconds)
const SCAN_DURATION_BUCKETS: &[f64] = &[1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    gateway_calls: IntCounterVec,
    gateway_failures: IntCounterVec,
    gateway_latency_seconds: HistogramVec,
    cache_lookups: IntCounterVec,
    vms_reconciled: IntGaugeVec,
    vms_failed: IntGaugeVec,
    stale_vms: IntGaugeVec,
    findings: IntGaugeVec,
    scan_duration_seconds: Histogram,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            gateway_calls: register_int_counter_vec!(
                "fedmon_gateway_calls_total",
                "Provider operations issued",
                &["operation"]
            )
            .expect("Failed to register gateway_calls"),

            gateway_failures: register_int_counter_vec!(
                "fedmon_gateway_failures_total",
                "Provider operations that returned an error",
                &["operation"]
            )
            .expect("Failed to register gateway_failures"),

            gateway_latency_seconds: register_histogram_vec!(
                "fedmon_gateway_latency_seconds",
                "Time spent waiting for provider operations",
                &["operation"],
                GATEWAY_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register gateway_latency_seconds"),

            cache_lookups: register_int_counter_vec!(
                "fedmon_cache_lookups_total",
                "Metadata cache lookups by cache and outcome",
                &["cache", "outcome"]
            )
            .expect("Failed to register cache_lookups"),

            vms_reconciled: register_int_gauge_vec!(
                "fedmon_vms_reconciled",
                "VMs reconciled in the last scan of a site",
                &["site"]
            )
            .expect("Failed to register vms_reconciled"),

            vms_failed: register_int_gauge_vec!(
                "fedmon_vms_failed",
                "VMs whose reconciliation failed in the last scan of a site",
                &["site"]
            )
            .expect("Failed to register vms_failed"),

            stale_vms: register_int_gauge_vec!(
                "fedmon_stale_vms",
                "VMs eligible for deletion in the last scan of a site",
                &["site"]
            )
            .expect("Failed to register stale_vms"),

            findings: register_int_gauge_vec!(
                "fedmon_findings",
                "Findings produced by the last scan of a site",
                &["site", "severity"]
            )
            .expect("Failed to register findings"),

            scan_duration_seconds: register_histogram!(
                "fedmon_scan_duration_seconds",
                "Wall time of a complete site audit",
                SCAN_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register scan_duration_seconds"),
        }
    }
}

/// Handle to the process-wide monitoring metrics
///
/// Clones share the same underlying Prometheus collectors.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_gateway_call(&self, operation: &str, duration_secs: f64, success: bool) {
        let inner = self.inner();
        inner.gateway_calls.with_label_values(&[operation]).inc();
        inner
            .gateway_latency_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
        if !success {
            inner.gateway_failures.with_label_values(&[operation]).inc();
        }
    }

    pub fn record_cache_lookup(&self, cache: &str, hit: bool) {
        let outcome = if hit { "hit" } else { "miss" };
        self.inner()
            .cache_lookups
            .with_label_values(&[cache, outcome])
            .inc();
    }

    /// Publish the results of one site audit
    pub fn record_site_scan(
        &self,
        site: &str,
        reconciled: usize,
        failed: usize,
        findings: &[Finding],
        duration_secs: f64,
    ) {
        let inner = self.inner();
        inner
            .vms_reconciled
            .with_label_values(&[site])
            .set(reconciled as i64);
        inner.vms_failed.with_label_values(&[site]).set(failed as i64);
        inner
            .stale_vms
            .with_label_values(&[site])
            .set(findings.iter().filter(|f| f.deletion_eligible).count() as i64);
        for severity in [Severity::Info, Severity::Warning, Severity::Error] {
            let count = findings.iter().filter(|f| f.severity == severity).count();
            inner
                .findings
                .with_label_values(&[site, &severity.to_string()])
                .set(count as i64);
        }
        inner.scan_duration_seconds.observe(duration_secs);
    }

    /// Render every registered metric in the text exposition format
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Structured logger for scan events of one site
#[derive(Clone)]
pub struct ScanLogger {
    site: String,
    vo: String,
}

impl ScanLogger {
    pub fn new(site: impl Into<String>, vo: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            vo: vo.into(),
        }
    }

    pub fn log_scan_started(&self, instances: usize) {
        info!(
            event = "scan_started",
            site = %self.site,
            vo = %self.vo,
            instances = instances,
            "Scanning VM instances"
        );
    }

    pub fn log_vm_reconciled(&self, vm_id: &str, status: &str, image: &str) {
        debug!(
            event = "vm_reconciled",
            site = %self.site,
            vm_id = %vm_id,
            status = %status,
            image = %image,
            "Reconciled VM"
        );
    }

    pub fn log_vm_skipped(&self, name: &str) {
        debug!(
            event = "vm_skipped",
            site = %self.site,
            name = %name,
            "Skipping VM without a provider reference"
        );
    }

    pub fn log_vm_failed(&self, vm_id: &str, error: &str) {
        warn!(
            event = "vm_failed",
            site = %self.site,
            vm_id = %vm_id,
            error = %error,
            "Failed to reconcile VM"
        );
    }

    pub fn log_finding(&self, finding: &Finding) {
        match finding.severity {
            Severity::Info => debug!(
                event = "finding",
                site = %self.site,
                rule = %finding.rule,
                subject = %finding.subject,
                message = %finding.message,
                "Finding"
            ),
            _ => info!(
                event = "finding",
                site = %self.site,
                severity = %finding.severity,
                rule = %finding.rule,
                subject = %finding.subject,
                deletion_eligible = finding.deletion_eligible,
                message = %finding.message,
                "Finding"
            ),
        }
    }

    pub fn log_deletion(&self, vm_id: &str, success: bool, detail: &str) {
        if success {
            info!(
                event = "vm_deleted",
                site = %self.site,
                vm_id = %vm_id,
                "Deletion requested"
            );
        } else {
            warn!(
                event = "vm_delete_failed",
                site = %self.site,
                vm_id = %vm_id,
                error = %detail,
                "Deletion request failed"
            );
        }
    }

    pub fn log_scan_finished(&self, reconciled: usize, failed: usize, findings: usize) {
        info!(
            event = "scan_finished",
            site = %self.site,
            vo = %self.vo,
            reconciled = reconciled,
            failed = failed,
            findings = findings,
            "Site scan complete"
        );
    }
}
