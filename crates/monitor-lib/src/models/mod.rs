//! Core data models for the monitoring engine
//!
//! Provider replies are decoded into explicit typed records; optional
//! columns are `Option`s with documented defaults instead of free-form maps.

mod fields;
mod finding;
mod instance;
mod records;
mod site;

pub use finding::{Finding, Rule, Severity, Subject};
pub use instance::{
    Age, AgeFault, AgeUnit, CupsStatus, EmailStatus, OwnerFacts, SshBanner, VmDetail, VmFacts,
    VmStatus, VmSummary, INFRASTRUCTURE_MANAGER, ORCHESTRATOR_ID_PROPERTY, ORCHESTRATOR_PROPERTY,
};
pub use records::{ImageDetail, IssuedToken, UserDetail, VolumeDetail};
pub use site::{
    AccessToken, Flavor, FloatingIp, QuotaEntry, QuotaRow, QuotaSnapshot, SecurityGroup, Site,
    User, Volume,
};
