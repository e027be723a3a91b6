//! Delete, then optionally purge.
//!
//! Keys, secrets, certificates, managed storage accounts, vaults and managed
//! HSMs all share the same destroy sequence: delete, wait until the live object
//! is gone, and when purging is enabled, purge the soft-deleted copy and wait
//! until that is gone too. Each kind supplies the four calls through
//! [`DeleteAndPurge`].

use crate::client::KeyVaultClient;
use crate::ids::{DeletedVaultId, ManagedHsmId, NestedItemType, VaultId};
use crate::poll::{Deadline, Observation, StateWait};
use crate::{Result, VaultwrightError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

const PURGE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const PURGE_CONSECUTIVE_READS: usize = 3;

/// The calls needed to delete and purge one object.
#[async_trait]
pub trait DeleteAndPurge: Send + Sync {
    /// Human readable name for logs and errors, e.g. `Secret "s1" (Key Vault "https://kv1.vault.azure.net/")`.
    fn describe(&self) -> String;

    /// Deletes the live object.
    async fn delete(&self) -> Result<()>;

    /// True once the live object no longer reads back.
    async fn is_deleted(&self) -> Result<bool>;

    /// Purges the soft-deleted copy.
    async fn purge(&self) -> Result<()>;

    /// True once the soft-deleted copy no longer reads back.
    async fn is_purged(&self) -> Result<bool>;
}

/// Deletes through `deleter`, waits for the deletion, then purges when asked.
///
/// A 404 on delete means the object is already gone and ends the sequence.
pub async fn delete_and_optionally_purge(
    deleter: &dyn DeleteAndPurge,
    purge: bool,
    deadline: Deadline,
) -> Result<()> {
    let description = deleter.describe();

    debug!(item = %description, "deleting");
    match deleter.delete().await {
        Ok(()) => {}
        Err(err) if err.is_not_found() => {
            debug!(item = %description, "already deleted");
            return Ok(());
        }
        Err(err) => return Err(VaultwrightError::op("deleting", &description, err)),
    }

    wait_until_gone(deadline, || deleter.is_deleted())
        .await
        .map_err(|e| VaultwrightError::op("waiting for deletion of", &description, e))?;

    if !purge {
        return Ok(());
    }

    info!(item = %description, "purging");
    deleter
        .purge()
        .await
        .map_err(|e| VaultwrightError::op("purging", &description, e))?;

    wait_until_gone(deadline, || deleter.is_purged())
        .await
        .map_err(|e| VaultwrightError::op("waiting for purge of", &description, e))?;

    debug!(item = %description, "purged");
    Ok(())
}

async fn wait_until_gone<F, Fut>(deadline: Deadline, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    StateWait::new(&["InProgress"], &["NotFound"], deadline)
        .with_poll_interval(PURGE_POLL_INTERVAL)
        .with_continuous_target_occurrence(PURGE_CONSECUTIVE_READS)
        .wait(|| {
            let gone = check();
            async move {
                let state = if gone.await? { "NotFound" } else { "InProgress" };
                Ok(Observation::found((), state))
            }
        })
        .await
}

fn gone(result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(false),
        Err(err) if err.is_not_found() => Ok(true),
        Err(err) => Err(err),
    }
}

/// Deletes and purges a key, secret, certificate or managed storage account.
pub struct NestedItemDeleter<'a> {
    client: &'a KeyVaultClient,
    base_url: String,
    item_type: NestedItemType,
    name: String,
}

impl<'a> NestedItemDeleter<'a> {
    /// Creates a deleter for one item of a vault.
    pub fn new(
        client: &'a KeyVaultClient,
        base_url: impl Into<String>,
        item_type: NestedItemType,
        name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            item_type,
            name: name.into(),
        }
    }
}

#[async_trait]
impl DeleteAndPurge for NestedItemDeleter<'_> {
    fn describe(&self) -> String {
        format!("{} {:?} (Key Vault {:?})", self.item_type, self.name, self.base_url)
    }

    async fn delete(&self) -> Result<()> {
        self.client
            .delete_nested_item(&self.base_url, self.item_type, &self.name)
            .await
    }

    async fn is_deleted(&self) -> Result<bool> {
        let url = self
            .client
            .nested_item_url(&self.base_url, self.item_type, &self.name);
        gone(
            self.client
                .probe(&url, self.client.data_plane_audience(&self.base_url))
                .await,
        )
    }

    async fn purge(&self) -> Result<()> {
        self.client
            .purge_deleted_nested_item(&self.base_url, self.item_type, &self.name)
            .await
    }

    async fn is_purged(&self) -> Result<bool> {
        gone(
            self.client
                .get_deleted_nested_item(&self.base_url, self.item_type, &self.name)
                .await
                .map(|_| ()),
        )
    }
}

/// Deletes and purges a vault.
pub struct VaultDeleter<'a> {
    client: &'a KeyVaultClient,
    id: VaultId,
    deleted_id: DeletedVaultId,
}

impl<'a> VaultDeleter<'a> {
    /// Creates a deleter for a vault in `location`.
    pub fn new(client: &'a KeyVaultClient, id: VaultId, location: &str) -> Self {
        let deleted_id = DeletedVaultId::vault(&id.subscription_id, location, &id.name);
        Self {
            client,
            id,
            deleted_id,
        }
    }
}

#[async_trait]
impl DeleteAndPurge for VaultDeleter<'_> {
    fn describe(&self) -> String {
        format!("Key Vault {:?}", self.id.to_string())
    }

    async fn delete(&self) -> Result<()> {
        self.client.delete_vault(&self.id).await
    }

    async fn is_deleted(&self) -> Result<bool> {
        gone(self.client.get_vault(&self.id).await.map(|_| ()))
    }

    async fn purge(&self) -> Result<()> {
        self.client.purge_deleted_vault(&self.deleted_id).await
    }

    async fn is_purged(&self) -> Result<bool> {
        gone(self.client.get_deleted_vault(&self.deleted_id).await.map(|_| ()))
    }
}

/// Deletes and purges a managed HSM.
pub struct ManagedHsmDeleter<'a> {
    client: &'a KeyVaultClient,
    id: ManagedHsmId,
    deleted_id: DeletedVaultId,
}

impl<'a> ManagedHsmDeleter<'a> {
    /// Creates a deleter for a managed HSM in `location`.
    pub fn new(client: &'a KeyVaultClient, id: ManagedHsmId, location: &str) -> Self {
        let deleted_id = DeletedVaultId::managed_hsm(&id.subscription_id, location, &id.name);
        Self {
            client,
            id,
            deleted_id,
        }
    }
}

#[async_trait]
impl DeleteAndPurge for ManagedHsmDeleter<'_> {
    fn describe(&self) -> String {
        format!("Managed HSM {:?}", self.id.to_string())
    }

    async fn delete(&self) -> Result<()> {
        self.client.delete_managed_hsm(&self.id).await
    }

    async fn is_deleted(&self) -> Result<bool> {
        gone(self.client.get_managed_hsm(&self.id).await.map(|_| ()))
    }

    async fn purge(&self) -> Result<()> {
        self.client.purge_deleted_vault(&self.deleted_id).await
    }

    async fn is_purged(&self) -> Result<bool> {
        gone(self.client.get_deleted_vault(&self.deleted_id).await.map(|_| ()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
        delete_missing: bool,
        deleted_after: usize,
        checks: AtomicUsize,
    }

    impl Recorder {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeleteAndPurge for Recorder {
        fn describe(&self) -> String {
            "Secret \"s1\"".to_string()
        }

        async fn delete(&self) -> Result<()> {
            self.calls.lock().unwrap().push("delete");
            if self.delete_missing {
                return Err(VaultwrightError::NotFound("s1".into()));
            }
            Ok(())
        }

        async fn is_deleted(&self) -> Result<bool> {
            self.calls.lock().unwrap().push("is_deleted");
            Ok(self.checks.fetch_add(1, Ordering::SeqCst) >= self.deleted_after)
        }

        async fn purge(&self) -> Result<()> {
            self.calls.lock().unwrap().push("purge");
            Ok(())
        }

        async fn is_purged(&self) -> Result<bool> {
            self.calls.lock().unwrap().push("is_purged");
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_without_purge() {
        let recorder = Recorder::default();
        delete_and_optionally_purge(&recorder, false, Deadline::after(Duration::from_secs(300)))
            .await
            .unwrap();

        assert_eq!(recorder.calls(), vec!["delete", "is_deleted", "is_deleted", "is_deleted"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_then_purge_waits_for_both() {
        let recorder = Recorder {
            deleted_after: 2,
            ..Default::default()
        };
        delete_and_optionally_purge(&recorder, true, Deadline::after(Duration::from_secs(300)))
            .await
            .unwrap();

        let calls = recorder.calls();
        assert_eq!(calls.iter().filter(|c| **c == "is_deleted").count(), 5);
        assert_eq!(calls.iter().filter(|c| **c == "purge").count(), 1);
        assert_eq!(calls.iter().filter(|c| **c == "is_purged").count(), 3);
        let purge_at = calls.iter().position(|c| *c == "purge").unwrap();
        assert!(calls[..purge_at].iter().all(|c| *c != "is_purged"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_item_is_already_deleted() {
        let recorder = Recorder {
            delete_missing: true,
            ..Default::default()
        };
        delete_and_optionally_purge(&recorder, true, Deadline::after(Duration::from_secs(300)))
            .await
            .unwrap();

        assert_eq!(recorder.calls(), vec!["delete"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletion_that_never_lands_times_out() {
        let recorder = Recorder {
            deleted_after: usize::MAX,
            ..Default::default()
        };
        let err = delete_and_optionally_purge(&recorder, false, Deadline::after(Duration::from_secs(60)))
            .await
            .unwrap_err();

        assert!(matches!(err.root(), VaultwrightError::WaitTimeout { .. }));
        assert!(err.to_string().starts_with("waiting for deletion of Secret \"s1\""));
    }
}
