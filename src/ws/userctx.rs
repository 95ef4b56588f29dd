use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;
use tracing::info;

use crate::models::{CollabError, UserProfile};
use crate::services::ports::UserDirectory;

/// Caches profiles of another directory so repeated snapshots of the same
/// room do not hit the app service every time.
pub struct CachedUserDirectory<D> {
    inner: D,
    cache: Cache<String, UserProfile>,
}

impl<D: UserDirectory> CachedUserDirectory<D> {
    pub fn new(inner: D) -> Self {
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(Duration::from_secs(5 * 60))
            .build();
        info!("User cache initialized");
        Self { inner, cache }
    }
}

#[async_trait]
impl<D: UserDirectory> UserDirectory for CachedUserDirectory<D> {
    async fn resolve_users(&self, ids: &[String]) -> Result<Vec<UserProfile>, CollabError> {
        let mut profiles = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match self.cache.get(id).await {
                Some(profile) => profiles.push(profile),
                None => missing.push(id.clone()),
            }
        }

        if !missing.is_empty() {
            info!("User cache miss for {} ids. Refreshing from directory.", missing.len());
            for profile in self.inner.resolve_users(&missing).await? {
                self.cache.insert(profile.id.clone(), profile.clone()).await;
                profiles.push(profile);
            }
        }
        Ok(profiles)
    }
}

/// Directory that knows nobody; contributors keep their ids as names.
pub struct NoopDirectory;

#[async_trait]
impl UserDirectory for NoopDirectory {
    async fn resolve_users(&self, _ids: &[String]) -> Result<Vec<UserProfile>, CollabError> {
        Ok(Vec::new())
    }
}
