//! Policy evaluation output

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// What a finding is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Subject {
    Site(String),
    Vm(String),
    Resource(String),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Site(name) => write!(f, "site {}", name),
            Subject::Vm(id) => write!(f, "vm {}", id),
            Subject::Resource(id) => write!(f, "resource {}", id),
        }
    }
}

/// Rule that produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    StaleVm,
    InvalidCreationTime,
    ReconcileFailed,
    CupsExposed,
    QuotaUsage,
    RamPerCore,
    SecurityGroupsPerInstance,
    FloatingIpsPerInstance,
    UnusedFloatingIps,
    UnusedVolumes,
    UnusedSecurityGroups,
    CheckFailed,
}

impl Rule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::StaleVm => "stale_vm",
            Rule::InvalidCreationTime => "invalid_creation_time",
            Rule::ReconcileFailed => "reconcile_failed",
            Rule::CupsExposed => "cups_exposed",
            Rule::QuotaUsage => "quota_usage",
            Rule::RamPerCore => "ram_per_core",
            Rule::SecurityGroupsPerInstance => "secgroups_per_instance",
            Rule::FloatingIpsPerInstance => "floating_ips_per_instance",
            Rule::UnusedFloatingIps => "unused_floating_ips",
            Rule::UnusedVolumes => "unused_volumes",
            Rule::UnusedSecurityGroups => "unused_security_groups",
            Rule::CheckFailed => "check_failed",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub subject: Subject,
    pub rule: Rule,
    pub message: String,
    /// Only set by the age policy
    pub deletion_eligible: bool,
}

impl Finding {
    pub fn new(
        severity: Severity,
        subject: Subject,
        rule: Rule,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            subject,
            rule,
            message: message.into(),
            deletion_eligible: false,
        }
    }

    pub fn info(subject: Subject, rule: Rule, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, subject, rule, message)
    }

    pub fn warning(subject: Subject, rule: Rule, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, subject, rule, message)
    }

    pub fn error(subject: Subject, rule: Rule, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, subject, rule, message)
    }

    pub fn eligible_for_deletion(mut self) -> Self {
        self.deletion_eligible = true;
        self
    }

    /// VM id when the finding is about a VM
    pub fn vm_id(&self) -> Option<&str> {
        match &self.subject {
            Subject::Vm(id) => Some(id),
            _ => None,
        }
    }
}
