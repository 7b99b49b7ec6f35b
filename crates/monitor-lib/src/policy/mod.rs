//! Policy evaluator
//!
//! Stateless checks over reconciled VM facts and site-wide listings. Only
//! the age policy ever marks a finding eligible for deletion.

mod age;
mod quota;
mod unused;

pub use age::{AgePolicy, MaxAge};
pub use quota::{QuotaPolicy, RatioOutcome};
pub use unused::{
    unused_floating_ips, unused_security_group_names, unused_security_groups, unused_volumes,
};

use serde::{Deserialize, Serialize};

use crate::models::{CupsStatus, Finding, Rule, Subject, VmFacts};

fn default_min_ram_gib_per_core() -> f64 {
    1.0
}

fn default_min_secgroups_per_instance() -> f64 {
    3.0
}

fn default_min_floating_ips_per_instance() -> f64 {
    1.0
}

fn default_check_quotas() -> bool {
    true
}

/// Policy thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub max_age: MaxAge,
    #[serde(default = "default_min_ram_gib_per_core")]
    pub min_ram_gib_per_core: f64,
    #[serde(default = "default_min_secgroups_per_instance")]
    pub min_secgroups_per_instance: f64,
    #[serde(default = "default_min_floating_ips_per_instance")]
    pub min_floating_ips_per_instance: f64,
    #[serde(default = "default_check_quotas")]
    pub check_quotas: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_age: MaxAge::default(),
            min_ram_gib_per_core: default_min_ram_gib_per_core(),
            min_secgroups_per_instance: default_min_secgroups_per_instance(),
            min_floating_ips_per_instance: default_min_floating_ips_per_instance(),
            check_quotas: default_check_quotas(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    age: AgePolicy,
    quota: QuotaPolicy,
}

impl PolicyEvaluator {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            age: AgePolicy::new(config.max_age),
            quota: QuotaPolicy {
                min_ram_gib_per_core: config.min_ram_gib_per_core,
                min_secgroups_per_instance: config.min_secgroups_per_instance,
                min_floating_ips_per_instance: config.min_floating_ips_per_instance,
            },
        }
    }

    pub fn age(&self) -> &AgePolicy {
        &self.age
    }

    pub fn quota(&self) -> &QuotaPolicy {
        &self.quota
    }

    /// Per-VM findings: staleness, then an exposed CUPS port
    pub fn evaluate_vm(&self, vm: &VmFacts) -> Vec<Finding> {
        let mut findings: Vec<Finding> = self.age.evaluate(vm).into_iter().collect();
        if vm.cups == Some(CupsStatus::Open) {
            findings.push(Finding::warning(
                Subject::Vm(vm.id.clone()),
                Rule::CupsExposed,
                "CUPS port 631 is reachable from the internet",
            ));
        }
        findings
    }
}

impl Default for PolicyEvaluator {
    fn default() -> Self {
        Self::new(&PolicyConfig::default())
    }
}
