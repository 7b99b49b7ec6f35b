//! Error types for the monitoring engine

use std::time::Duration;
use thiserror::Error;

/// Failure of a single provider call.
///
/// Every variant is recoverable at the call site: resolution steps turn it
/// into "no data" and move on. Only a failed instance listing aborts a site.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The provider command returned a non-success exit status
    #[error("`{operation}` failed with exit code {code}: {message}")]
    Unavailable {
        operation: &'static str,
        code: i32,
        message: String,
    },

    /// The provider rejected the call as not authorized (403-class)
    #[error("`{operation}` was denied by the provider: {message}")]
    Forbidden {
        operation: &'static str,
        message: String,
    },

    /// The provider command did not finish in time
    #[error("`{operation}` timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The provider command could not be started
    #[error("failed to launch provider command for `{operation}`: {source}")]
    Launch {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The reply did not have the expected shape
    #[error("unexpected reply to `{operation}`: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// No endpoint/project is configured for the site and VO
    #[error("site {site} has no endpoint configured for VO {vo}")]
    UnknownSite { site: String, vo: String },
}

impl GatewayError {
    /// True for 403-class rejections
    pub fn is_forbidden(&self) -> bool {
        matches!(self, GatewayError::Forbidden { .. })
    }
}

/// Site-level scan failure
#[derive(Debug, Error)]
pub enum ScanError {
    /// Listing instances failed, so nothing at the site can be inventoried
    #[error("site {site} is unavailable: {source}")]
    ProviderUnavailable {
        site: String,
        #[source]
        source: GatewayError,
    },

    /// The operator interrupted the scan between VMs
    #[error("scan of site {site} was cancelled")]
    Cancelled { site: String },
}

/// Directory (LDAP) lookup failure
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory error: {0}")]
    Ldap(#[from] ldap3::LdapError),

    #[error("directory lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Rejected maximum-age setting
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid maximum age '{0}', expected a whole number of days or hours such as 90d or 72h")]
pub struct InvalidMaxAge(pub String);
