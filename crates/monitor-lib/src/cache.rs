//! Per-run metadata cache
//!
//! The flavor catalogue and the user directory are loaded at most once per
//! site scan. Concurrent first lookups join the same load instead of
//! issuing duplicate provider calls. E-mail lookups are cached per subject
//! and the cache may be shared by every site of one run.

use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::models::{EmailStatus, Flavor, User};

/// Flavors of one site keyed by name
pub type FlavorCatalog = HashMap<String, Flavor>;

/// Users of one site keyed by provider user id
pub type UserDirectory = HashMap<String, User>;

/// Single-flight cache of directory e-mail lookups
#[derive(Debug, Default)]
pub struct EmailCache {
    entries: DashMap<String, Arc<OnceCell<EmailStatus>>>,
}

impl EmailCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached status for `subject`, running `lookup` only for the first caller
    pub async fn get_or_lookup<F, Fut>(&self, subject: &str, lookup: F) -> EmailStatus
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EmailStatus>,
    {
        // The shard guard must not be held across the await.
        let cell = Arc::clone(&self.entries.entry(subject.to_string()).or_default());
        cell.get_or_init(lookup).await.clone()
    }

    pub fn contains(&self, subject: &str) -> bool {
        self.entries
            .get(subject)
            .is_some_and(|cell| cell.initialized())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Caches owned by one site scan
#[derive(Debug, Default)]
pub struct MetadataCache {
    flavors: OnceCell<FlavorCatalog>,
    users: OnceCell<UserDirectory>,
    emails: Arc<EmailCache>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache whose e-mail lookups are shared with other sites
    pub fn with_email_cache(emails: Arc<EmailCache>) -> Self {
        Self {
            emails,
            ..Self::default()
        }
    }

    /// Flavor catalogue, loaded on first use. A failed load should yield an
    /// empty catalogue so the site is not asked again during the run.
    pub async fn flavors<F, Fut>(&self, load: F) -> &FlavorCatalog
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FlavorCatalog>,
    {
        self.flavors.get_or_init(load).await
    }

    pub fn flavors_loaded(&self) -> bool {
        self.flavors.initialized()
    }

    /// User directory, loaded on first use
    pub async fn users<F, Fut>(&self, load: F) -> &UserDirectory
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = UserDirectory>,
    {
        self.users.get_or_init(load).await
    }

    pub fn users_loaded(&self) -> bool {
        self.users.initialized()
    }

    pub fn emails(&self) -> &Arc<EmailCache> {
        &self.emails
    }
}
