//! Site audit command

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Args;
use colored::Colorize;
use monitor_lib::cache::EmailCache;
use monitor_lib::gateway::OpenStackCli;
use monitor_lib::{
    execute_deletions, AccessToken, Confirmer, DeletionRequest, DeletionStatus, EmailStatus,
    MaxAge, Monitor, MonitorConfig, MonitorMetrics, ScanError, Site, SiteOutcome, SiteReport,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::Tabled;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::{watch, Mutex};

use crate::output::{
    color_severity, color_status, print_error, print_info, print_success, print_warning,
    truncate, OutputFormat,
};

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Site to scan (repeatable); every configured site hosting the VO when omitted
    #[arg(long = "site")]
    pub sites: Vec<String>,

    /// Virtual organisation
    #[arg(long)]
    pub vo: Option<String>,

    /// OIDC access token
    #[arg(long, env = "FEDMON_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: String,

    /// Maximum VM age, e.g. 90d or 72h
    #[arg(long)]
    pub max_age: Option<MaxAge>,

    /// Offer to delete stale VMs after the report
    #[arg(long)]
    pub delete: bool,

    /// Skip quota checks
    #[arg(long)]
    pub no_quotas: bool,

    /// Read the SSH banner of VMs with a public address
    #[arg(long)]
    pub check_ssh: bool,

    /// Probe the CUPS port of VMs with a public address
    #[arg(long)]
    pub check_cups: bool,

    /// Bind DN for owner e-mail lookups
    #[arg(long, requires = "ldap_password")]
    pub ldap_user: Option<String>,

    /// Bind password for owner e-mail lookups
    #[arg(long, env = "FEDMON_LDAP_PASSWORD", hide_env_values = true)]
    pub ldap_password: Option<String>,

    /// Write Prometheus metrics to this file after the scan
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

impl ScanArgs {
    /// Command-line flags take precedence over file and environment values
    pub fn apply_to(&self, config: &mut MonitorConfig) {
        if let Some(vo) = &self.vo {
            config.vo = vo.clone();
        }
        if let Some(max_age) = self.max_age {
            config.policy.max_age = max_age;
        }
        if self.no_quotas {
            config.policy.check_quotas = false;
        }
        config.probes.check_ssh |= self.check_ssh;
        config.probes.check_cups |= self.check_cups;
        if let Some(user) = &self.ldap_user {
            config.directory.bind_dn = Some(user.clone());
        }
        if let Some(password) = &self.ldap_password {
            config.directory.bind_password = Some(password.clone());
        }
    }
}

/// Asks on the terminal before each deletion
pub struct TerminalConfirmer {
    input: Mutex<BufReader<Stdin>>,
}

impl TerminalConfirmer {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl Confirmer for TerminalConfirmer {
    async fn confirm(&self, request: &DeletionRequest) -> bool {
        eprint!(
            "{} Delete VM {} ({}) at {}? [y/N] ",
            request.reason.yellow(),
            request.vm_id.cyan(),
            request.vm_name.as_deref().unwrap_or("-"),
            request.site
        );
        let _ = std::io::stderr().flush();

        let mut answer = String::new();
        let mut input = self.input.lock().await;
        match input.read_line(&mut answer).await {
            Ok(_) => is_yes(&answer),
            Err(_) => false,
        }
    }
}

/// Row for VMs table
#[derive(Tabled)]
struct VmRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Flavor")]
    flavor: String,
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Findings")]
    findings: usize,
}

/// Row for network probe results
#[derive(Tabled)]
struct ProbeRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "SSH")]
    ssh: String,
    #[tabled(rename = "CUPS")]
    cups: String,
}

/// Row for findings table
#[derive(Tabled)]
struct FindingRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Subject")]
    subject: String,
    #[tabled(rename = "Rule")]
    rule: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Delete")]
    delete: String,
}

#[derive(Serialize)]
struct SiteResult<'a> {
    site: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a SiteReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn owner_cell(report: &SiteReport, index: usize) -> String {
    match &report.vms[index].owner {
        None => "-".to_string(),
        Some(owner) => match &owner.email {
            Some(EmailStatus::Found(address)) => format!("{} <{}>", owner.label(), address),
            Some(EmailStatus::NotFound { .. }) => format!("{} (no e-mail)", owner.label()),
            _ => owner.label().to_string(),
        },
    }
}

fn print_report(report: &SiteReport) {
    println!();
    println!("{}", format!("{} ({})", report.site, report.vo).bold());
    println!("{}", "=".repeat(60));

    if report.vms.is_empty() {
        print_info("No VMs found");
    } else {
        let rows: Vec<VmRow> = report
            .vms
            .iter()
            .enumerate()
            .map(|(i, vm)| VmRow {
                id: vm.id.clone(),
                name: truncate(&vm.name, 30),
                status: color_status(vm.status.as_str()),
                flavor: vm
                    .flavor
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |f| f.name.clone()),
                image: truncate(&vm.image, 30),
                owner: owner_cell(report, i),
                age: vm.age.to_string(),
                findings: report.findings_for(&vm.id).count(),
            })
            .collect();
        let table = tabled::Table::new(rows)
            .with(tabled::settings::Style::rounded())
            .to_string();
        println!("{}", table);

        let probes: Vec<ProbeRow> = report
            .vms
            .iter()
            .filter(|vm| vm.ssh.is_some() || vm.cups.is_some())
            .map(|vm| ProbeRow {
                id: vm.id.clone(),
                ssh: vm.ssh.as_ref().map_or_else(|| "-".to_string(), |s| s.to_string()),
                cups: vm.cups.as_ref().map_or_else(|| "-".to_string(), |c| c.to_string()),
            })
            .collect();
        if !probes.is_empty() {
            let table = tabled::Table::new(probes)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
        }
    }

    if !report.findings.is_empty() {
        let rows: Vec<FindingRow> = report
            .findings
            .iter()
            .map(|f| FindingRow {
                severity: color_severity(f.severity),
                subject: f.subject.to_string(),
                rule: f.rule.to_string(),
                message: f.message.clone(),
                delete: if f.deletion_eligible {
                    "yes".red().to_string()
                } else {
                    String::new()
                },
            })
            .collect();
        let table = tabled::Table::new(rows)
            .with(tabled::settings::Style::rounded())
            .to_string();
        println!("{}", table);
    }

    println!(
        "\nListed: {}, reconciled: {}, skipped: {}, failed: {}, findings: {}",
        report.listed,
        report.vms.len(),
        report.skipped,
        report.failed,
        report.findings.len()
    );
}

fn render(outcomes: &[SiteOutcome], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let results: Vec<SiteResult> = outcomes
                .iter()
                .map(|o| SiteResult {
                    site: &o.site,
                    report: o.result.as_ref().ok(),
                    error: o.result.as_ref().err().map(|e| e.to_string()),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        OutputFormat::Table => {
            for outcome in outcomes {
                match &outcome.result {
                    Ok(report) => print_report(report),
                    Err(e) => print_error(&format!("{}: {}", outcome.site, e)),
                }
            }
        }
    }
    Ok(())
}

/// Sites to scan: the requested ones, which must be configured for the VO,
/// or every configured site hosting the VO
fn select_sites(gateway: &OpenStackCli, requested: &[String], vo: &str) -> Result<Vec<String>> {
    if requested.is_empty() {
        let names = gateway.sites_for_vo(vo);
        if names.is_empty() {
            bail!("No configured site hosts VO {}", vo);
        }
        return Ok(names);
    }
    for name in requested {
        match gateway.endpoint(name) {
            None => bail!("Site {} is not configured", name),
            Some(endpoint) if endpoint.project_for(vo).is_none() => {
                bail!("Site {} has no project for VO {}", name, vo)
            }
            Some(_) => {}
        }
    }
    Ok(requested.to_vec())
}

/// Scan the selected sites, print the reports and optionally delete stale VMs
pub async fn run(
    mut config: MonitorConfig,
    args: ScanArgs,
    format: OutputFormat,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    args.apply_to(&mut config);

    let gateway = Arc::new(config.gateway());
    let names = select_sites(&gateway, &args.sites, &config.vo)?;

    let token = AccessToken::new(args.access_token.clone());
    let sites: Vec<Site> = names
        .iter()
        .map(|name| Site::new(name.clone(), config.vo.clone(), token.clone()))
        .collect();

    let mut monitor = Monitor::new(gateway, &config);
    if let Some(directory) = config.ldap_directory() {
        monitor = monitor.with_directory(Arc::new(directory));
    }

    if matches!(format, OutputFormat::Table) {
        print_info(&format!(
            "Scanning {} site(s) of {}, maximum VM age {}",
            sites.len(),
            config.vo,
            monitor.evaluator().age().max_age()
        ));
    }

    let outcomes = monitor.monitor_sites(sites.clone(), shutdown.clone()).await;
    render(&outcomes, format)?;

    if let Some(path) = &args.metrics_file {
        let metrics = MonitorMetrics::new().render()?;
        std::fs::write(path, metrics)
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }

    let cancelled = *shutdown.borrow()
        || outcomes
            .iter()
            .any(|o| matches!(o.result, Err(ScanError::Cancelled { .. })));
    if cancelled {
        print_warning("Scan interrupted, no VM was deleted");
        return Ok(());
    }

    let reports: Vec<&SiteReport> = outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok())
        .collect();
    let candidates: usize = reports.iter().map(|r| r.deletion_candidates().count()).sum();

    if args.delete && candidates > 0 {
        let confirmer = TerminalConfirmer::new();
        for report in &reports {
            let Some(site) = sites.iter().find(|s| s.name == report.site) else {
                continue;
            };
            let ctx = monitor.context(site.clone(), Arc::new(EmailCache::new()), report.scanned_at);
            for outcome in execute_deletions(&ctx, report, &confirmer).await {
                let vm = &outcome.request.vm_id;
                match outcome.status {
                    DeletionStatus::Deleted => print_success(&format!("Deleted VM {}", vm)),
                    DeletionStatus::Declined => print_info(&format!("Kept VM {}", vm)),
                    DeletionStatus::Failed(detail) => {
                        print_error(&format!("Failed to delete VM {}: {}", vm, detail))
                    }
                }
            }
        }
    } else if candidates > 0 {
        print_info(&format!(
            "{} VM(s) eligible for deletion, rerun with --delete to remove them",
            candidates
        ));
    }

    if reports.is_empty() {
        bail!("Every site scan failed");
    }
    Ok(())
}
