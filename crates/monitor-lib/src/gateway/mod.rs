//! Provider command gateway
//!
//! The single point of provider-specific translation. The engine names an
//! [`Operation`] and a [`Scope`]; the gateway turns that into whatever the
//! provider speaks and returns the structured reply.

mod openstack;

pub use openstack::{OpenStackCli, SiteEndpoint, VoProject};

use crate::error::GatewayError;
use crate::models::Site;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Whether a call is scoped to the VO's project at the site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Vo,
    Unscoped,
}

/// Provider operations the engine issues
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    ServerList,
    ServerShow { id: String },
    ServerDelete { id: String },
    FlavorList,
    ImageShow { id: String },
    VolumeShow { id: String },
    VolumeList,
    UserList { domain_id: Option<String> },
    UserShow { id: String },
    TokenIssue,
    QuotaShow,
    SecurityGroupList,
    FloatingIpList,
}

impl Operation {
    /// Stable name used in logs, metrics and errors
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ServerList => "server list",
            Operation::ServerShow { .. } => "server show",
            Operation::ServerDelete { .. } => "server delete",
            Operation::FlavorList => "flavor list",
            Operation::ImageShow { .. } => "image show",
            Operation::VolumeShow { .. } => "volume show",
            Operation::VolumeList => "volume list",
            Operation::UserList { .. } => "user list",
            Operation::UserShow { .. } => "user show",
            Operation::TokenIssue => "token issue",
            Operation::QuotaShow => "quota show",
            Operation::SecurityGroupList => "security group list",
            Operation::FloatingIpList => "floating ip list",
        }
    }

    /// Whether the reply is structured data
    pub fn returns_data(&self) -> bool {
        !matches!(self, Operation::ServerDelete { .. })
    }
}

/// Executes provider operations on behalf of the engine
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Run one operation against a site. Non-data operations reply `Null`.
    async fn execute(&self, site: &Site, operation: &Operation, scope: Scope)
        -> Result<Value, GatewayError>;
}

/// Decode a gateway reply into a typed record
pub fn decode<T: DeserializeOwned>(operation: &Operation, reply: Value) -> Result<T, GatewayError> {
    serde_json::from_value(reply).map_err(|source| GatewayError::Decode {
        operation: operation.name(),
        source,
    })
}
