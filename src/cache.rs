//! Vault base-URL cache.
//!
//! Resolving a vault's data-plane URL from its resource ID (and back) costs a
//! management-plane call, so resolutions are memoised here. The cache is an
//! explicit object owned by the [`Provider`](crate::Provider); nothing is global.

use crate::ids::normalize_base_url;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CacheEntry {
    resource_id: String,
    base_url: String,
}

/// Maps vault and managed HSM resource IDs to their data-plane base URLs.
///
/// Keys are compared case-insensitively, base URLs after normalisation to
/// `https://host/`.
///
/// # Example
///
/// ```
/// use vaultwright::cache::BaseUrlCache;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = BaseUrlCache::new();
/// let id = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv1";
///
/// cache.insert(id, "https://kv1.vault.azure.net").await;
/// assert_eq!(cache.base_url(id).await.as_deref(), Some("https://kv1.vault.azure.net/"));
/// assert_eq!(
///     cache.resource_id("https://KV1.vault.azure.net/").await.as_deref(),
///     Some(id)
/// );
/// # }
/// ```
#[derive(Debug, Default)]
pub struct BaseUrlCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl BaseUrlCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached base URL of a vault.
    pub async fn base_url(&self, resource_id: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(&resource_id.to_ascii_lowercase())
            .map(|entry| entry.base_url.clone())
    }

    /// Cached resource ID of the vault serving `base_url`.
    pub async fn resource_id(&self, base_url: &str) -> Option<String> {
        let wanted = normalize(base_url);
        let entries = self.entries.read().await;
        entries
            .values()
            .find(|entry| entry.base_url.eq_ignore_ascii_case(&wanted))
            .map(|entry| entry.resource_id.clone())
    }

    /// Records a resolution.
    pub async fn insert(&self, resource_id: &str, base_url: &str) {
        let entry = CacheEntry {
            resource_id: resource_id.to_string(),
            base_url: normalize(base_url),
        };
        let mut entries = self.entries.write().await;
        entries.insert(resource_id.to_ascii_lowercase(), entry);
    }

    /// Forgets a vault (after it has been deleted).
    pub async fn remove(&self, resource_id: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(&resource_id.to_ascii_lowercase());
    }

    /// Number of cached vaults.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn normalize(base_url: &str) -> String {
    normalize_base_url(base_url)
        .unwrap_or_else(|_| format!("{}/", base_url.trim_end_matches('/')))
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv1";

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let cache = BaseUrlCache::new();
        cache.insert(ID, "https://kv1.vault.azure.net/").await;

        assert_eq!(
            cache.base_url(&ID.to_uppercase()).await.as_deref(),
            Some("https://kv1.vault.azure.net/")
        );
        assert_eq!(cache.resource_id("https://kv1.vault.azure.net").await.as_deref(), Some(ID));
        assert_eq!(cache.resource_id("https://kv2.vault.azure.net").await, None);
    }

    #[tokio::test]
    async fn test_remove() {
        let cache = BaseUrlCache::new();
        cache.insert(ID, "https://kv1.vault.azure.net/").await;
        assert_eq!(cache.len().await, 1);

        cache.remove(ID).await;
        assert!(cache.is_empty().await);
        assert_eq!(cache.base_url(ID).await, None);
    }

    #[tokio::test]
    async fn test_insert_overwrites() {
        let cache = BaseUrlCache::new();
        cache.insert(ID, "https://old.vault.azure.net/").await;
        cache.insert(ID, "https://new.vault.azure.net/").await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.base_url(ID).await.as_deref(), Some("https://new.vault.azure.net/"));
    }
}
