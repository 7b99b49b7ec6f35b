//! Monitor configuration
//!
//! An optional TOML file is layered under `FEDMON__*` environment variables,
//! e.g. `FEDMON__POLICY__MAX_AGE=72h` or `FEDMON__SCAN__VM_CONCURRENCY=4`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::directory::{DirectoryConfig, LdapDirectory};
use crate::gateway::{OpenStackCli, SiteEndpoint};
use crate::policy::PolicyConfig;
use crate::probe::ProbeConfig;

fn default_vo() -> String {
    "vo.access.egi.eu".to_string()
}

fn default_program() -> String {
    "openstack".to_string()
}

fn default_command_timeout() -> u64 {
    120
}

fn default_vm_concurrency() -> usize {
    8
}

fn default_site_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Provider command-line client
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// VMs reconciled concurrently within one site
    #[serde(default = "default_vm_concurrency")]
    pub vm_concurrency: usize,
    /// Sites audited concurrently
    #[serde(default = "default_site_concurrency")]
    pub site_concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            vm_concurrency: default_vm_concurrency(),
            site_concurrency: default_site_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// VO scanned when none is given explicitly
    #[serde(default = "default_vo")]
    pub vo: String,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub probes: ProbeConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub sites: Vec<SiteEndpoint>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            vo: default_vo(),
            policy: PolicyConfig::default(),
            probes: ProbeConfig::default(),
            directory: DirectoryConfig::default(),
            gateway: GatewayConfig::default(),
            scan: ScanConfig::default(),
            sites: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// Load from an optional file plus the environment. A missing file is
    /// not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("FEDMON")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to read monitor configuration")?;

        config
            .try_deserialize()
            .context("Invalid monitor configuration")
    }

    pub fn gateway(&self) -> OpenStackCli {
        OpenStackCli::new(
            self.gateway.program.clone(),
            Duration::from_secs(self.gateway.command_timeout_secs),
            self.sites.clone(),
        )
    }

    /// LDAP directory, when bind credentials are configured
    pub fn ldap_directory(&self) -> Option<LdapDirectory> {
        LdapDirectory::from_config(self.directory.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgeUnit;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.vo, "vo.access.egi.eu");
        assert_eq!(config.policy.max_age.value, 90);
        assert_eq!(config.gateway.command_timeout_secs, 120);
        assert_eq!(config.scan.vm_concurrency, 8);
        assert!(config.ldap_directory().is_none());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = MonitorConfig::load(Some(Path::new("/nonexistent/fedmon.toml"))).unwrap();
        assert_eq!(config.scan.site_concurrency, 4);
        assert!(config.sites.is_empty());
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
vo = "vo.example.eu"

[policy]
max_age = "72h"
min_ram_gib_per_core = 2.0

[probes]
check_ssh = true

[[sites]]
name = "IFCA-LCG2"
auth_url = "https://api.cloud.ifca.es:5000/v3/"

[[sites.projects]]
vo = "vo.example.eu"
project_id = "p-123"
"#
        )
        .unwrap();

        let config = MonitorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.vo, "vo.example.eu");
        assert_eq!(config.policy.max_age.unit, AgeUnit::Hours);
        assert_eq!(config.policy.min_ram_gib_per_core, 2.0);
        assert_eq!(config.policy.min_secgroups_per_instance, 3.0);
        assert!(config.probes.check_ssh);
        assert_eq!(config.sites[0].identity_provider, "egi.eu");
        assert_eq!(config.gateway().sites_for_vo("vo.example.eu"), vec!["IFCA-LCG2"]);
    }
}
