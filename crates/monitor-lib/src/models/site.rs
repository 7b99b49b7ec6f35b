//! Site identity and site-wide provider records

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Opaque bearer token; never printed
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// A federation member scanned under one VO with one token
#[derive(Debug, Clone, Serialize)]
pub struct Site {
    pub name: String,
    pub vo: String,
    #[serde(skip)]
    pub token: AccessToken,
}

impl Site {
    pub fn new(name: impl Into<String>, vo: impl Into<String>, token: AccessToken) -> Self {
        Self {
            name: name.into(),
            vo: vo.into(),
            token,
        }
    }
}

/// Compute shape (`flavor list --long` row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flavor {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "VCPUs", default)]
    pub vcpus: u32,
    /// RAM in MiB, as the compute service reports it
    #[serde(rename = "RAM", default)]
    pub ram_mb: u64,
    #[serde(rename = "Disk", default)]
    pub disk_gb: u64,
}

impl Flavor {
    pub fn ram_bytes(&self) -> u64 {
        self.ram_mb * 1024 * 1024
    }

    pub fn ram_gib(&self) -> u64 {
        self.ram_mb / 1024
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} with {} vCPU cores, {} GB of RAM and {} GB of local disk",
            self.name,
            self.vcpus,
            self.ram_gib(),
            self.disk_gb
        )
    }
}

/// Identity record (`user list` row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "ID", alias = "id")]
    pub id: String,
    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,
}

/// Limit and usage of one quota resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaEntry {
    /// `None` when the provider reports the resource as unlimited
    pub limit: Option<u64>,
    pub in_use: u64,
}

impl QuotaEntry {
    /// Usage as a percentage of the limit, undefined for zero/unlimited limits
    pub fn usage_percent(&self) -> Option<f64> {
        match self.limit {
            Some(limit) if limit > 0 => Some(self.in_use as f64 / limit as f64 * 100.0),
            _ => None,
        }
    }
}

/// One row of `quota show --usage`
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaRow {
    #[serde(rename = "Resource")]
    pub resource: String,
    /// Negative when unlimited, `None` when the provider reports no limit
    #[serde(rename = "Limit", default)]
    pub limit: Option<i64>,
    #[serde(rename = "In Use", default, deserialize_with = "null_as_zero")]
    pub in_use: i64,
}

/// Per-site quota limits and usage
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuotaSnapshot {
    pub cores: Option<QuotaEntry>,
    pub instances: Option<QuotaEntry>,
    pub ram_mb: Option<QuotaEntry>,
    pub floating_ips: Option<QuotaEntry>,
    pub secgroups: Option<QuotaEntry>,
    pub secgroup_rules: Option<QuotaEntry>,
}

impl QuotaSnapshot {
    pub fn from_rows(rows: &[QuotaRow]) -> Self {
        let mut snapshot = QuotaSnapshot::default();
        for row in rows {
            let Some(limit) = row.limit else {
                continue;
            };
            let entry = QuotaEntry {
                limit: u64::try_from(limit).ok(),
                in_use: u64::try_from(row.in_use).unwrap_or(0),
            };
            let slot = match row.resource.as_str() {
                "cores" => &mut snapshot.cores,
                "instances" => &mut snapshot.instances,
                "ram" => &mut snapshot.ram_mb,
                "floating-ips" | "floating_ips" | "floatingip" => &mut snapshot.floating_ips,
                "secgroups" | "secgroup" | "security_groups" | "security_group" => {
                    &mut snapshot.secgroups
                }
                "secgroup-rules" | "security_group_rules" | "security_group_rule" => {
                    &mut snapshot.secgroup_rules
                }
                _ => continue,
            };
            *slot = Some(entry);
        }
        snapshot
    }

    /// Entries in display order, RAM converted to GiB
    pub fn display_entries(&self) -> Vec<(&'static str, QuotaEntry)> {
        let ram_gib = self.ram_mb.map(|e| QuotaEntry {
            limit: e.limit.map(|l| l / 1024),
            in_use: e.in_use / 1024,
        });
        [
            ("cores", self.cores),
            ("instances", self.instances),
            ("ram (GB)", ram_gib),
            ("floating-ips", self.floating_ips),
            ("secgroup-rules", self.secgroup_rules),
            ("secgroups", self.secgroups),
        ]
        .into_iter()
        .filter_map(|(name, entry)| entry.map(|e| (name, e)))
        .collect()
    }
}

/// `floating ip list --long` row
#[derive(Debug, Clone, Deserialize)]
pub struct FloatingIp {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "Floating IP Address", default)]
    pub address: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

impl FloatingIp {
    pub fn is_down(&self) -> bool {
        self.status.eq_ignore_ascii_case("DOWN")
    }
}

/// `volume list --long` row
#[derive(Debug, Clone, Deserialize)]
pub struct Volume {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "Name", default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    /// Size in GB
    #[serde(rename = "Size", default)]
    pub size_gb: u64,
}

impl Volume {
    pub fn is_available(&self) -> bool {
        self.status.eq_ignore_ascii_case("available")
    }

    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// `security group list` row
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityGroup {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(resource: &str, limit: i64, in_use: i64) -> QuotaRow {
        QuotaRow {
            resource: resource.to_string(),
            limit: Some(limit),
            in_use,
        }
    }

    #[test]
    fn test_token_is_redacted() {
        let site = Site::new("CESGA", "vo.access.egi.eu", AccessToken::new("secret"));
        assert!(!format!("{:?}", site).contains("secret"));
        assert_eq!(site.token.expose(), "secret");
    }

    #[test]
    fn test_flavor_display() {
        let flavor = Flavor {
            id: None,
            name: "m1.medium".to_string(),
            vcpus: 2,
            ram_mb: 4096,
            disk_gb: 40,
        };
        assert_eq!(flavor.ram_bytes(), 4096 * 1024 * 1024);
        assert_eq!(
            flavor.to_string(),
            "m1.medium with 2 vCPU cores, 4 GB of RAM and 40 GB of local disk"
        );
    }

    #[test]
    fn test_quota_from_rows() {
        let snapshot = QuotaSnapshot::from_rows(&[
            row("cores", 20, 4),
            row("ram", 51200, 8192),
            row("instances", -1, 3),
            row("secgroups", 10, 2),
            row("gigabytes", 1000, 10),
        ]);

        assert_eq!(snapshot.cores.unwrap().limit, Some(20));
        assert_eq!(snapshot.instances.unwrap().limit, None);
        assert!(snapshot.floating_ips.is_none());

        let entries = snapshot.display_entries();
        let ram = entries.iter().find(|(name, _)| *name == "ram (GB)").unwrap().1;
        assert_eq!(ram.limit, Some(50));
        assert_eq!(ram.in_use, 8);
    }

    #[test]
    fn test_quota_rows_with_null_values() {
        let rows: Vec<QuotaRow> = serde_json::from_value(serde_json::json!([
            {"Resource": "cores", "Limit": null, "In Use": null},
            {"Resource": "instances", "Limit": 10, "In Use": null},
            {"Resource": "ram", "Limit": 4096}
        ]))
        .unwrap();
        assert_eq!(rows[0].limit, None);
        assert_eq!(rows[0].in_use, 0);

        let snapshot = QuotaSnapshot::from_rows(&rows);
        assert!(snapshot.cores.is_none());
        assert_eq!(
            snapshot.instances,
            Some(QuotaEntry {
                limit: Some(10),
                in_use: 0
            })
        );
        assert_eq!(snapshot.ram_mb.unwrap().limit, Some(4096));
    }

    #[test]
    fn test_usage_percent_undefined_for_zero_limit() {
        let entry = QuotaEntry {
            limit: Some(0),
            in_use: 0,
        };
        assert!(entry.usage_percent().is_none());
        let entry = QuotaEntry {
            limit: Some(4),
            in_use: 1,
        };
        assert_eq!(entry.usage_percent(), Some(25.0));
    }

    #[test]
    fn test_volume_label_falls_back_to_id() {
        let volume: Volume = serde_json::from_value(serde_json::json!({
            "ID": "vol-9", "Name": null, "Status": "available", "Size": 20
        }))
        .unwrap();
        assert!(volume.is_available());
        assert_eq!(volume.label(), "vol-9");
    }
}
