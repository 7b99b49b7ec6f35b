//! Gateway backed by the `openstack` command-line client
//!
//! Credentials travel through `OS_*` environment variables so the token
//! never shows up in the process list. Every invocation is bounded by a
//! timeout and the child is killed when it expires.

use super::{Operation, ProviderGateway, Scope};
use crate::error::GatewayError;
use crate::models::Site;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;
use url::Url;

/// Markers the client prints when the provider answers 403
const FORBIDDEN_MARKERS: &[&str] = &["HTTP 403", "(403)", "Forbidden"];

fn default_identity_provider() -> String {
    "egi.eu".to_string()
}

fn default_protocol() -> String {
    "openid".to_string()
}

/// Project hosting a VO at a site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoProject {
    pub vo: String,
    pub project_id: String,
}

/// Identity endpoint and VO projects of one site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteEndpoint {
    pub name: String,
    pub auth_url: Url,
    #[serde(default = "default_identity_provider")]
    pub identity_provider: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub projects: Vec<VoProject>,
}

impl SiteEndpoint {
    pub fn project_for(&self, vo: &str) -> Option<&str> {
        self.projects
            .iter()
            .find(|p| p.vo == vo)
            .map(|p| p.project_id.as_str())
    }
}

/// Runs provider operations through the `openstack` client
pub struct OpenStackCli {
    program: String,
    timeout: Duration,
    endpoints: HashMap<String, SiteEndpoint>,
}

impl OpenStackCli {
    pub fn new(
        program: impl Into<String>,
        timeout: Duration,
        endpoints: Vec<SiteEndpoint>,
    ) -> Self {
        Self {
            program: program.into(),
            timeout,
            endpoints: endpoints
                .into_iter()
                .map(|e| (e.name.clone(), e))
                .collect(),
        }
    }

    pub fn endpoint(&self, site: &str) -> Option<&SiteEndpoint> {
        self.endpoints.get(site)
    }

    /// Names of configured sites hosting the VO, sorted
    pub fn sites_for_vo(&self, vo: &str) -> Vec<String> {
        let mut sites: Vec<String> = self
            .endpoints
            .values()
            .filter(|e| e.project_for(vo).is_some())
            .map(|e| e.name.clone())
            .collect();
        sites.sort();
        sites
    }

    /// Client arguments for an operation
    fn command_args(operation: &Operation, project_id: &str) -> Vec<String> {
        let mut args: Vec<String> = match operation {
            Operation::ServerList => vec!["server".into(), "list".into(), "--long".into()],
            Operation::ServerShow { id } => vec!["server".into(), "show".into(), id.clone()],
            Operation::ServerDelete { id } => vec!["server".into(), "delete".into(), id.clone()],
            Operation::FlavorList => vec!["flavor".into(), "list".into(), "--long".into()],
            Operation::ImageShow { id } => vec!["image".into(), "show".into(), id.clone()],
            Operation::VolumeShow { id } => vec!["volume".into(), "show".into(), id.clone()],
            Operation::VolumeList => vec!["volume".into(), "list".into(), "--long".into()],
            Operation::UserList { domain_id } => {
                let mut args = vec!["user".into(), "list".into()];
                if let Some(domain) = domain_id {
                    args.push("--domain".into());
                    args.push(domain.clone());
                }
                args
            }
            Operation::UserShow { id } => vec!["user".into(), "show".into(), id.clone()],
            Operation::TokenIssue => vec!["token".into(), "issue".into()],
            Operation::QuotaShow => vec!["quota".into(), "show".into(), "--usage".into()],
            Operation::SecurityGroupList => vec![
                "security".into(),
                "group".into(),
                "list".into(),
                "--project".into(),
                project_id.to_string(),
            ],
            Operation::FloatingIpList => {
                vec!["floating".into(), "ip".into(), "list".into(), "--long".into()]
            }
        };
        if operation.returns_data() {
            args.push("--format".into());
            args.push("json".into());
        }
        args
    }
}

/// Map a failed invocation to the error taxonomy
fn classify_failure(operation: &'static str, code: i32, stderr: &str) -> GatewayError {
    let message = stderr.trim().to_string();
    if FORBIDDEN_MARKERS.iter().any(|m| message.contains(m)) {
        GatewayError::Forbidden { operation, message }
    } else {
        GatewayError::Unavailable {
            operation,
            code,
            message,
        }
    }
}

#[async_trait]
impl ProviderGateway for OpenStackCli {
    async fn execute(
        &self,
        site: &Site,
        operation: &Operation,
        scope: Scope,
    ) -> Result<Value, GatewayError> {
        let unknown = || GatewayError::UnknownSite {
            site: site.name.clone(),
            vo: site.vo.clone(),
        };
        let endpoint = self.endpoints.get(&site.name).ok_or_else(unknown)?;
        let project_id = endpoint.project_for(&site.vo).ok_or_else(unknown)?;

        let mut command = Command::new(&self.program);
        command
            .args(Self::command_args(operation, project_id))
            .env("OS_AUTH_URL", endpoint.auth_url.as_str())
            .env("OS_AUTH_TYPE", "v3oidcaccesstoken")
            .env("OS_IDENTITY_PROVIDER", &endpoint.identity_provider)
            .env("OS_PROTOCOL", &endpoint.protocol)
            .env("OS_ACCESS_TOKEN", site.token.expose())
            .env_remove("OS_PROJECT_ID")
            .env_remove("OS_PROJECT_NAME")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if scope == Scope::Vo {
            command.env("OS_PROJECT_ID", project_id);
        }

        debug!(
            site = %site.name,
            operation = operation.name(),
            scoped = scope == Scope::Vo,
            "Running provider command"
        );

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => {
                return Err(GatewayError::Timeout {
                    operation: operation.name(),
                    timeout: self.timeout,
                })
            }
            Ok(Err(source)) => {
                return Err(GatewayError::Launch {
                    operation: operation.name(),
                    source,
                })
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(classify_failure(
                operation.name(),
                output.status.code().unwrap_or(-1),
                &String::from_utf8_lossy(&output.stderr),
            ));
        }

        if !operation.returns_data() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&output.stdout).map_err(|source| GatewayError::Decode {
            operation: operation.name(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccessToken;

    fn endpoint() -> SiteEndpoint {
        SiteEndpoint {
            name: "IFCA-LCG2".to_string(),
            auth_url: Url::parse("https://api.cloud.ifca.es:5000/v3/").unwrap(),
            identity_provider: default_identity_provider(),
            protocol: default_protocol(),
            projects: vec![VoProject {
                vo: "vo.access.egi.eu".to_string(),
                project_id: "p-123".to_string(),
            }],
        }
    }

    #[test]
    fn test_command_args_add_json_format() {
        let args = OpenStackCli::command_args(&Operation::ServerList, "p-123");
        assert_eq!(args, vec!["server", "list", "--long", "--format", "json"]);
    }

    #[test]
    fn test_command_args_delete_has_no_format() {
        let args = OpenStackCli::command_args(&Operation::ServerDelete { id: "vm-1".into() }, "p");
        assert_eq!(args, vec!["server", "delete", "vm-1"]);
    }

    #[test]
    fn test_command_args_security_groups_scoped_to_project() {
        let args = OpenStackCli::command_args(&Operation::SecurityGroupList, "p-123");
        assert_eq!(&args[..5], &["security", "group", "list", "--project", "p-123"]);
    }

    #[test]
    fn test_command_args_user_list_by_domain() {
        let args = OpenStackCli::command_args(
            &Operation::UserList {
                domain_id: Some("d-1".into()),
            },
            "p",
        );
        assert_eq!(&args[..4], &["user", "list", "--domain", "d-1"]);
    }

    #[test]
    fn test_classify_forbidden() {
        let err = classify_failure("user list", 1, "You are not authorized (HTTP 403)");
        assert!(err.is_forbidden());
        let err = classify_failure("user list", 1, "Connection refused");
        assert!(!err.is_forbidden());
    }

    #[test]
    fn test_sites_for_vo() {
        let cli = OpenStackCli::new("openstack", Duration::from_secs(5), vec![endpoint()]);
        assert_eq!(cli.sites_for_vo("vo.access.egi.eu"), vec!["IFCA-LCG2"]);
        assert!(cli.sites_for_vo("other.vo").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_site_rejected_before_running() {
        let cli = OpenStackCli::new("openstack", Duration::from_secs(5), vec![endpoint()]);
        let site = Site::new("NOWHERE", "vo.access.egi.eu", AccessToken::new("t"));
        let err = cli
            .execute(&site, &Operation::ServerList, Scope::Vo)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownSite { .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let cli = OpenStackCli::new(
            "/nonexistent/openstack-client",
            Duration::from_secs(5),
            vec![endpoint()],
        );
        let site = Site::new("IFCA-LCG2", "vo.access.egi.eu", AccessToken::new("t"));
        let err = cli
            .execute(&site, &Operation::ServerList, Scope::Vo)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Launch { .. }));
    }
}
