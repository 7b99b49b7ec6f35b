//! Directory lookup of owner e-mail addresses
//!
//! The directory is searched for one subject at a time; a missing entry is a
//! valid answer, not an error.

use async_trait::async_trait;
use ldap3::{ldap_escape, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::DirectoryError;

fn default_server() -> String {
    "ldaps://ldap.aai.egi.eu:636".to_string()
}

fn default_base_dn() -> String {
    "ou=people,dc=ldap,dc=aai,dc=egi,dc=eu".to_string()
}

fn default_search_filter() -> String {
    "(isMemberOf=CO:COU:vo.access.egi.eu:members)".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Connection and search settings for the membership directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_server")]
    pub server: String,
    #[serde(default = "default_base_dn")]
    pub base_dn: String,
    /// Bind DN; lookups are disabled without credentials
    #[serde(default)]
    pub bind_dn: Option<String>,
    #[serde(default, skip_serializing)]
    pub bind_password: Option<String>,
    /// Membership filter, combined with the subject's `voPersonID`
    #[serde(default = "default_search_filter")]
    pub search_filter: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            base_dn: default_base_dn(),
            bind_dn: None,
            bind_password: None,
            search_filter: default_search_filter(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl DirectoryConfig {
    pub fn is_enabled(&self) -> bool {
        self.bind_dn.is_some() && self.bind_password.is_some()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Looks up a subject's e-mail address
#[async_trait]
pub trait DirectoryLookup: Send + Sync {
    /// `Ok(None)` when the directory has no entry for the subject
    async fn find_email(&self, subject: &str) -> Result<Option<String>, DirectoryError>;
}

/// LDAP-backed directory
pub struct LdapDirectory {
    config: DirectoryConfig,
}

impl LdapDirectory {
    /// `None` when the configuration carries no bind credentials
    pub fn from_config(config: DirectoryConfig) -> Option<Self> {
        config.is_enabled().then_some(Self { config })
    }

    fn filter_for(&self, subject: &str) -> String {
        format!(
            "(&{}(voPersonID={}))",
            self.config.search_filter,
            ldap_escape(subject)
        )
    }

    async fn search(&self, subject: &str) -> Result<Option<String>, DirectoryError> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.config.timeout());
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.config.server).await?;
        ldap3::drive!(conn);

        let bind_dn = self.config.bind_dn.as_deref().unwrap_or_default();
        let password = self.config.bind_password.as_deref().unwrap_or_default();
        ldap.simple_bind(bind_dn, password).await?.success()?;

        let (entries, _) = ldap
            .search(
                &self.config.base_dn,
                Scope::Subtree,
                &self.filter_for(subject),
                vec!["voPersonID", "mail"],
            )
            .await?
            .success()?;

        let email = entries.into_iter().find_map(|entry| {
            SearchEntry::construct(entry)
                .attrs
                .get("mail")
                .and_then(|values| values.first().cloned())
        });

        if let Err(e) = ldap.unbind().await {
            debug!(error = %e, "Directory unbind failed");
        }
        Ok(email)
    }
}

#[async_trait]
impl DirectoryLookup for LdapDirectory {
    async fn find_email(&self, subject: &str) -> Result<Option<String>, DirectoryError> {
        let timeout = self.config.timeout();
        tokio::time::timeout(timeout, self.search(subject))
            .await
            .map_err(|_| DirectoryError::Timeout(timeout))?
    }
}
