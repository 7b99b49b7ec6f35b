//! VM lifecycle monitoring for federated cloud sites
//!
//! This crate provides the core functionality for:
//! - Inventorying the VMs a VO runs at a site through a provider gateway
//! - Resolving flavor, image and owner metadata with cached fallback chains
//! - Evaluating age, quota and unused-resource policies into findings
//! - Deleting stale VMs after operator confirmation
//! - Health checks and observability

pub mod action;
pub mod audit;
pub mod cache;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod health;
pub mod inventory;
pub mod models;
pub mod observability;
pub mod policy;
pub mod probe;
pub mod resolve;

#[cfg(test)]
mod testing;

pub use action::{
    execute_deletions, Confirmer, DeletionOutcome, DeletionRequest, DeletionStatus, NeverConfirm,
};
pub use audit::{Monitor, SiteOutcome, SiteReport};
pub use config::MonitorConfig;
pub use context::ScanContext;
pub use error::{DirectoryError, GatewayError, ScanError};
pub use gateway::{Operation, ProviderGateway, Scope};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, ScanLogger};
pub use policy::{MaxAge, PolicyConfig, PolicyEvaluator};
