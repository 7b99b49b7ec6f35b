//! VM instance records: list view, detail view and reconciled facts

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::fields;
use super::site::Flavor;

/// Property marking the orchestrator that deployed a VM
pub const ORCHESTRATOR_PROPERTY: &str = "eu.egi.cloud.orchestrator";
/// Property carrying the orchestrator's deployment id
pub const ORCHESTRATOR_ID_PROPERTY: &str = "eu.egi.cloud.orchestrator.id";
/// Orchestrator value used by the Infrastructure Manager
pub const INFRASTRUCTURE_MANAGER: &str = "es.upv.grycap.im";

/// Instance lifecycle status as reported by the compute service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VmStatus {
    Active,
    Build,
    Shutoff,
    Error,
    Other(String),
}

impl VmStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, VmStatus::Active)
    }

    pub fn as_str(&self) -> &str {
        match self {
            VmStatus::Active => "ACTIVE",
            VmStatus::Build => "BUILD",
            VmStatus::Shutoff => "SHUTOFF",
            VmStatus::Error => "ERROR",
            VmStatus::Other(raw) => raw,
        }
    }
}

impl Default for VmStatus {
    fn default() -> Self {
        VmStatus::Other("UNKNOWN".to_string())
    }
}

impl From<String> for VmStatus {
    fn from(raw: String) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "ACTIVE" => VmStatus::Active,
            "BUILD" => VmStatus::Build,
            "SHUTOFF" => VmStatus::Shutoff,
            "ERROR" => VmStatus::Error,
            _ => VmStatus::Other(raw),
        }
    }
}

impl From<VmStatus> for String {
    fn from(status: VmStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// List-view record for one instance (`server list --long`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmSummary {
    #[serde(rename = "ID", default, deserialize_with = "fields::optional_text")]
    pub id: Option<String>,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Status", default)]
    pub status: VmStatus,
    #[serde(rename = "Flavor", default, deserialize_with = "fields::flavor_reference")]
    pub flavor: Option<String>,
    #[serde(rename = "Image Name", default, deserialize_with = "fields::optional_text")]
    pub image_name: Option<String>,
    #[serde(rename = "Image ID", default, deserialize_with = "fields::optional_text")]
    pub image_id: Option<String>,
    #[serde(rename = "Networks", default, deserialize_with = "fields::networks")]
    pub networks: BTreeMap<String, Vec<String>>,
}

impl VmSummary {
    /// Provider id used to fetch the detail record; `None` means the VM
    /// cannot be navigated to and is skipped
    pub fn reference(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.trim().is_empty())
    }

    /// All addresses across networks, in network order then listing order
    pub fn addresses(&self) -> Vec<String> {
        self.networks.values().flatten().cloned().collect()
    }
}

/// Detail-view record for one instance (`server show <id>`)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "DetailColumns")]
pub struct VmDetail {
    pub created_at: Option<String>,
    pub user_id: Option<String>,
    pub security_groups: BTreeSet<String>,
    pub properties: BTreeMap<String, String>,
    pub attached_volumes: Vec<String>,
}

/// Raw `server show` columns. SDK-based clients print several fields under
/// both their legacy and their new name.
#[derive(Deserialize)]
struct DetailColumns {
    #[serde(default, deserialize_with = "fields::optional_text")]
    created_at: Option<String>,
    #[serde(default, deserialize_with = "fields::optional_text")]
    created: Option<String>,
    #[serde(default, deserialize_with = "fields::optional_text")]
    user_id: Option<String>,
    #[serde(default, deserialize_with = "fields::security_group_names")]
    security_groups: BTreeSet<String>,
    #[serde(default, deserialize_with = "fields::properties")]
    properties: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "fields::volume_ids")]
    attached_volumes: Vec<String>,
    #[serde(default, deserialize_with = "fields::volume_ids")]
    volumes_attached: Vec<String>,
}

impl From<DetailColumns> for VmDetail {
    fn from(columns: DetailColumns) -> Self {
        let attached_volumes = if columns.attached_volumes.is_empty() {
            columns.volumes_attached
        } else {
            columns.attached_volumes
        };
        Self {
            created_at: columns.created_at.or(columns.created),
            user_id: columns.user_id,
            security_groups: columns.security_groups,
            properties: columns.properties,
            attached_volumes,
        }
    }
}

impl VmDetail {
    /// Deployment id when the VM was created through the Infrastructure Manager
    pub fn orchestrator_id(&self) -> Option<String> {
        match self.properties.get(ORCHESTRATOR_PROPERTY) {
            Some(orchestrator) if orchestrator == INFRASTRUCTURE_MANAGER => Some(
                self.properties
                    .get(ORCHESTRATOR_ID_PROPERTY)
                    .cloned()
                    .unwrap_or_default(),
            ),
            _ => None,
        }
    }
}

/// Unit used by the age policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeUnit {
    Hours,
    Days,
}

impl AgeUnit {
    pub fn seconds(&self) -> u64 {
        match self {
            AgeUnit::Hours => 3600,
            AgeUnit::Days => 86_400,
        }
    }
}

impl fmt::Display for AgeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgeUnit::Hours => write!(f, "hours"),
            AgeUnit::Days => write!(f, "days"),
        }
    }
}

/// Why a creation timestamp could not produce an elapsed duration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "fault", content = "raw", rename_all = "snake_case")]
pub enum AgeFault {
    Missing,
    Unparseable(String),
    InFuture,
}

impl fmt::Display for AgeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgeFault::Missing => write!(f, "no creation timestamp"),
            AgeFault::Unparseable(raw) => write!(f, "unparseable creation timestamp '{}'", raw),
            AgeFault::InFuture => write!(f, "creation timestamp lies in the future"),
        }
    }
}

/// Time elapsed since creation, measured against the scan's single `now`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Age {
    Elapsed { seconds: u64 },
    Invalid(AgeFault),
}

impl Age {
    pub fn since(created_at: Option<&str>, now: DateTime<Utc>) -> Self {
        let Some(raw) = created_at.map(str::trim).filter(|s| !s.is_empty()) else {
            return Age::Invalid(AgeFault::Missing);
        };
        let Some(created) = parse_timestamp(raw) else {
            return Age::Invalid(AgeFault::Unparseable(raw.to_string()));
        };
        match u64::try_from((now - created).num_seconds()) {
            Ok(seconds) => Age::Elapsed { seconds },
            Err(_) => Age::Invalid(AgeFault::InFuture),
        }
    }

    /// Whole elapsed units (floored); `None` for invalid ages
    pub fn whole(&self, unit: AgeUnit) -> Option<u64> {
        match self {
            Age::Elapsed { seconds } => Some(seconds / unit.seconds()),
            Age::Invalid(_) => None,
        }
    }
}

impl fmt::Display for Age {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Age::Elapsed { seconds } => {
                let days = seconds / 86_400;
                let hours = (seconds % 86_400) / 3600;
                let minutes = (seconds % 3600) / 60;
                write!(f, "{} days, {:02}:{:02}", days, hours, minutes)
            }
            Age::Invalid(fault) => write!(f, "unknown ({})", fault),
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Result of the lazy directory e-mail lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum EmailStatus {
    /// No directory configured for this run
    Disabled,
    Found(String),
    NotFound { subject: String },
    /// The directory could not be queried
    Unavailable,
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmailStatus::Disabled => write!(f, "directory lookup disabled"),
            EmailStatus::Found(address) => f.write_str(address),
            EmailStatus::NotFound { subject } => write!(
                f,
                "{} not found in directory, has VO membership expired?",
                subject
            ),
            EmailStatus::Unavailable => write!(f, "directory unavailable"),
        }
    }
}

/// Resolved owner of a VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerFacts {
    pub user_id: String,
    pub display_name: Option<String>,
    pub email: Option<EmailStatus>,
}

impl OwnerFacts {
    /// Display name, or the raw user id when the owner could not be resolved
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.user_id)
    }
}

/// Outcome of the SSH banner probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum SshBanner {
    Banner(String),
    NoPublicAddress,
    Unreachable,
}

impl fmt::Display for SshBanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshBanner::Banner(banner) => f.write_str(banner),
            SshBanner::NoPublicAddress => write!(f, "No public IP available to check SSH version"),
            SshBanner::Unreachable => write!(f, "could not retrieve SSH version"),
        }
    }
}

/// Outcome of the CUPS (port 631) probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CupsStatus {
    Open,
    Closed,
    ToolMissing,
    NoPublicAddress,
    Inconclusive { tcp: Option<i32>, udp: Option<i32> },
}

impl fmt::Display for CupsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CupsStatus::Open => write!(f, "WARNING: CUPS port is open"),
            CupsStatus::Closed => write!(f, "CUPS port is closed"),
            CupsStatus::ToolMissing => write!(f, "ncat ( https://nmap.org/ncat ) is not installed"),
            CupsStatus::NoPublicAddress => write!(f, "No public IP available to check CUPS port"),
            CupsStatus::Inconclusive { tcp, udp } => write!(
                f,
                "Error checking CUPS port (tcp exit: {:?}, udp exit: {:?})",
                tcp, udp
            ),
        }
    }
}

/// Reconciled view of one VM consumed by policy evaluation
#[derive(Debug, Clone, Serialize)]
pub struct VmFacts {
    pub id: String,
    pub name: String,
    pub status: VmStatus,
    pub addresses: Vec<String>,
    pub security_groups: BTreeSet<String>,
    pub flavor: Option<Flavor>,
    pub image: String,
    pub owner: Option<OwnerFacts>,
    pub created_at: Option<String>,
    pub age: Age,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestrator_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshBanner>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cups: Option<CupsStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(VmStatus::from("ACTIVE".to_string()), VmStatus::Active);
        assert_eq!(VmStatus::from("shutoff".to_string()), VmStatus::Shutoff);
        assert_eq!(
            VmStatus::from("PAUSED".to_string()),
            VmStatus::Other("PAUSED".to_string())
        );
    }

    #[test]
    fn test_summary_from_cli_json() {
        let row = serde_json::json!({
            "ID": "vm-1",
            "Name": "worker",
            "Status": "ACTIVE",
            "Flavor": "m1.small",
            "Image Name": "N/A (booted from volume)",
            "Image ID": "",
            "Networks": {"public": ["10.0.0.4", "193.1.2.3"], "private": ["192.168.1.2"]}
        });
        let summary: VmSummary = serde_json::from_value(row).unwrap();

        assert_eq!(summary.reference(), Some("vm-1"));
        assert_eq!(summary.status, VmStatus::Active);
        assert_eq!(summary.image_id, None);
        assert_eq!(
            summary.addresses(),
            vec!["192.168.1.2", "10.0.0.4", "193.1.2.3"]
        );
    }

    #[test]
    fn test_summary_networks_text_form() {
        let row = serde_json::json!({
            "ID": "vm-2",
            "Networks": "public=10.0.0.4, 193.1.2.3; private=192.168.1.2"
        });
        let summary: VmSummary = serde_json::from_value(row).unwrap();
        assert_eq!(summary.networks["public"], vec!["10.0.0.4", "193.1.2.3"]);
        assert_eq!(summary.networks["private"], vec!["192.168.1.2"]);
    }

    #[test]
    fn test_summary_without_id_has_no_reference() {
        let summary: VmSummary =
            serde_json::from_value(serde_json::json!({"Name": "ghost"})).unwrap();
        assert!(summary.reference().is_none());
    }

    #[test]
    fn test_detail_from_cli_json() {
        let row = serde_json::json!({
            "created_at": "2024-05-01T10:00:00Z",
            "user_id": "u-1",
            "security_groups": [{"name": "default"}, {"name": "ssh"}],
            "properties": {
                "eu.egi.cloud.orchestrator": "es.upv.grycap.im",
                "eu.egi.cloud.orchestrator.id": "inf-42"
            },
            "volumes_attached": [{"id": "vol-1"}]
        });
        let detail: VmDetail = serde_json::from_value(row).unwrap();

        assert_eq!(detail.security_groups.len(), 2);
        assert_eq!(detail.attached_volumes, vec!["vol-1"]);
        assert_eq!(detail.orchestrator_id(), Some("inf-42".to_string()));
    }

    #[test]
    fn test_detail_with_legacy_and_sdk_columns() {
        let row = serde_json::json!({
            "created": "2024-05-01T10:00:00Z",
            "created_at": "2024-05-01T10:00:00Z",
            "user_id": "u-1",
            "security_groups": [{"name": "default"}],
            "properties": {},
            "attached_volumes": [{"id": "vol-1"}],
            "volumes_attached": [{"id": "vol-1"}]
        });
        let detail: VmDetail = serde_json::from_value(row).unwrap();

        assert_eq!(detail.created_at.as_deref(), Some("2024-05-01T10:00:00Z"));
        assert_eq!(detail.user_id.as_deref(), Some("u-1"));
        assert_eq!(detail.attached_volumes, vec!["vol-1"]);
    }

    #[test]
    fn test_detail_legacy_created_column() {
        let row = serde_json::json!({"created": "2024-05-01T10:00:00Z", "created_at": null});
        let detail: VmDetail = serde_json::from_value(row).unwrap();
        assert_eq!(detail.created_at.as_deref(), Some("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn test_detail_without_orchestrator() {
        let detail = VmDetail::default();
        assert!(detail.orchestrator_id().is_none());
    }

    #[test]
    fn test_age_elapsed() {
        let age = Age::since(Some("2024-06-01T08:00:00Z"), now());
        assert_eq!(age, Age::Elapsed { seconds: 4 * 3600 });
        assert_eq!(age.whole(AgeUnit::Hours), Some(4));
        assert_eq!(age.whole(AgeUnit::Days), Some(0));
    }

    #[test]
    fn test_age_naive_timestamp_is_utc() {
        let age = Age::since(Some("2024-05-31T12:00:00.000000"), now());
        assert_eq!(age.whole(AgeUnit::Days), Some(1));
    }

    #[test]
    fn test_age_faults() {
        assert_eq!(Age::since(None, now()), Age::Invalid(AgeFault::Missing));
        assert_eq!(
            Age::since(Some("yesterday"), now()),
            Age::Invalid(AgeFault::Unparseable("yesterday".to_string()))
        );
        assert_eq!(
            Age::since(Some("2024-06-02T00:00:00Z"), now()),
            Age::Invalid(AgeFault::InFuture)
        );
        assert_eq!(Age::Invalid(AgeFault::InFuture).whole(AgeUnit::Hours), None);
    }

    #[test]
    fn test_owner_label_falls_back_to_id() {
        let owner = OwnerFacts {
            user_id: "abc123".to_string(),
            display_name: None,
            email: None,
        };
        assert_eq!(owner.label(), "abc123");
    }

    #[test]
    fn test_email_not_found_message() {
        let status = EmailStatus::NotFound {
            subject: "jdoe".to_string(),
        };
        assert_eq!(
            status.to_string(),
            "jdoe not found in directory, has VO membership expired?"
        );
    }
}
