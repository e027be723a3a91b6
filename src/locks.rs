//! Named async locks.
//!
//! Azure rejects concurrent writes to one vault's access policy list and to one
//! virtual network, so operations touching them are serialised by name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lock namespace for vaults.
pub const VAULT_RESOURCE: &str = "key_vault";

/// Lock namespace for virtual networks.
pub const VIRTUAL_NETWORK_RESOURCE: &str = "virtual_network";

/// A set of held locks; released on drop.
#[derive(Debug)]
pub struct NamedGuards {
    _guards: Vec<OwnedMutexGuard<()>>,
}

/// Registry of named mutexes.
///
/// # Example
///
/// ```
/// use vaultwright::locks::{NamedLocks, VAULT_RESOURCE};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let locks = NamedLocks::new();
/// {
///     let _guard = locks.lock(VAULT_RESOURCE, "kv1").await;
///     // ... modify kv1's access policies
/// }
/// let _both = locks.lock_many("virtual_network", &["vnet-b", "vnet-a", "vnet-b"]).await;
/// # }
/// ```
#[derive(Debug, Default)]
pub struct NamedLocks {
    mutexes: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl NamedLocks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex(&self, namespace: &str, name: &str) -> Arc<AsyncMutex<()>> {
        let key = format!("{namespace}.{name}");
        let mut mutexes = self.mutexes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        mutexes.entry(key).or_default().clone()
    }

    /// Locks one name.
    pub async fn lock(&self, namespace: &str, name: &str) -> NamedGuards {
        let guard = self.mutex(namespace, name).lock_owned().await;
        NamedGuards { _guards: vec![guard] }
    }

    /// Locks several names, sorted and de-duplicated so two callers can never
    /// wait on each other in opposite order.
    pub async fn lock_many<S: AsRef<str>>(&self, namespace: &str, names: &[S]) -> NamedGuards {
        let mut sorted: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for name in sorted {
            guards.push(self.mutex(namespace, name).lock_owned().await);
        }
        NamedGuards { _guards: guards }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_name_is_exclusive() {
        let locks = Arc::new(NamedLocks::new());
        let guard = locks.lock(VAULT_RESOURCE, "kv1").await;

        let contender = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = contender.lock(VAULT_RESOURCE, "kv1").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_names_and_namespaces_are_independent() {
        let locks = NamedLocks::new();
        let _a = locks.lock(VAULT_RESOURCE, "kv1").await;
        let _b = locks.lock(VAULT_RESOURCE, "kv2").await;
        let _c = locks.lock(VIRTUAL_NETWORK_RESOURCE, "kv1").await;
    }

    #[tokio::test]
    async fn test_lock_many_deduplicates() {
        let locks = NamedLocks::new();
        let guards = locks
            .lock_many(VIRTUAL_NETWORK_RESOURCE, &["b", "a", "b"])
            .await;
        assert_eq!(guards._guards.len(), 2);

        let empty: [&str; 0] = [];
        let none = locks.lock_many(VIRTUAL_NETWORK_RESOURCE, &empty).await;
        assert!(none._guards.is_empty());
    }
}
