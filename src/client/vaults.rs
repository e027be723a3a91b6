//! Management-plane calls: vaults, access policies, managed HSMs, deleted vaults.

use super::models::{
    AccessPolicyEntry, AccessPolicyUpdate, AccessPolicyUpdateKind, AccessPolicyUpdateProperties,
    DeletedVault, ManagedHsm, Vault, VaultList,
};
use super::{to_body, KeyVaultClient};
use crate::ids::{DeletedVaultId, ManagedHsmId, VaultId};
use crate::transport::{Audience, Method};
use crate::Result;

impl KeyVaultClient {
    fn vault_url(&self, id: &VaultId, suffix: &str) -> String {
        self.arm_url(&format!("{id}{suffix}"), &self.vaults_api_version)
    }

    fn managed_hsm_url(&self, id: &ManagedHsmId, suffix: &str) -> String {
        self.arm_url(&format!("{id}{suffix}"), &self.managed_hsms_api_version)
    }

    fn deleted_url(&self, id: &DeletedVaultId, suffix: &str) -> String {
        let version = if id.managed_hsm {
            &self.managed_hsms_api_version
        } else {
            &self.vaults_api_version
        };
        self.arm_url(&format!("{id}{suffix}"), version)
    }

    /// Retrieves a vault.
    pub async fn get_vault(&self, id: &VaultId) -> Result<Vault> {
        self.call(Method::Get, self.vault_url(id, ""), Audience::ResourceManager, None)
            .await
    }

    /// Creates or replaces a vault.
    pub async fn create_or_update_vault(&self, id: &VaultId, vault: &Vault) -> Result<Vault> {
        self.call(
            Method::Put,
            self.vault_url(id, ""),
            Audience::ResourceManager,
            to_body(vault)?,
        )
        .await
    }

    /// Patches a vault.
    pub async fn update_vault(&self, id: &VaultId, patch: serde_json::Value) -> Result<Vault> {
        self.call(
            Method::Patch,
            self.vault_url(id, ""),
            Audience::ResourceManager,
            Some(patch),
        )
        .await
    }

    /// Deletes a vault (it becomes soft-deleted when soft delete is on).
    pub async fn delete_vault(&self, id: &VaultId) -> Result<()> {
        self.call_no_content(Method::Delete, self.vault_url(id, ""), Audience::ResourceManager, None)
            .await
    }

    /// Lists every vault of the subscription, following `nextLink`.
    pub async fn list_vaults(&self) -> Result<Vec<Vault>> {
        let mut url = Some(self.arm_url(
            &format!(
                "/subscriptions/{}/providers/Microsoft.KeyVault/vaults",
                self.subscription_id
            ),
            &self.vaults_api_version,
        ));

        let mut vaults = Vec::new();
        while let Some(next) = url.take() {
            let page: VaultList = self
                .call(Method::Get, next, Audience::ResourceManager, None)
                .await?;
            vaults.extend(page.value);
            url = page.next_link.filter(|link| !link.is_empty());
        }
        Ok(vaults)
    }

    /// Adds, replaces or removes access policy entries.
    pub async fn update_access_policy(
        &self,
        id: &VaultId,
        kind: AccessPolicyUpdateKind,
        entries: Vec<AccessPolicyEntry>,
    ) -> Result<()> {
        let body = AccessPolicyUpdate {
            properties: AccessPolicyUpdateProperties {
                access_policies: entries,
            },
        };
        self.call_no_content(
            Method::Put,
            self.vault_url(id, &format!("/accessPolicies/{}", kind.as_str())),
            Audience::ResourceManager,
            to_body(&body)?,
        )
        .await
    }

    /// Retrieves a soft-deleted vault or managed HSM.
    pub async fn get_deleted_vault(&self, id: &DeletedVaultId) -> Result<DeletedVault> {
        self.call(Method::Get, self.deleted_url(id, ""), Audience::ResourceManager, None)
            .await
    }

    /// Purges a soft-deleted vault or managed HSM.
    pub async fn purge_deleted_vault(&self, id: &DeletedVaultId) -> Result<()> {
        self.call_no_content(
            Method::Post,
            self.deleted_url(id, "/purge"),
            Audience::ResourceManager,
            None,
        )
        .await
    }

    /// Retrieves a managed HSM.
    pub async fn get_managed_hsm(&self, id: &ManagedHsmId) -> Result<ManagedHsm> {
        self.call(Method::Get, self.managed_hsm_url(id, ""), Audience::ResourceManager, None)
            .await
    }

    /// Creates or replaces a managed HSM.
    pub async fn create_or_update_managed_hsm(&self, id: &ManagedHsmId, hsm: &ManagedHsm) -> Result<ManagedHsm> {
        self.call(
            Method::Put,
            self.managed_hsm_url(id, ""),
            Audience::ResourceManager,
            to_body(hsm)?,
        )
        .await
    }

    /// Patches a managed HSM.
    pub async fn update_managed_hsm(&self, id: &ManagedHsmId, patch: serde_json::Value) -> Result<ManagedHsm> {
        self.call(
            Method::Patch,
            self.managed_hsm_url(id, ""),
            Audience::ResourceManager,
            Some(patch),
        )
        .await
    }

    /// Deletes a managed HSM.
    pub async fn delete_managed_hsm(&self, id: &ManagedHsmId) -> Result<()> {
        self.call_no_content(
            Method::Delete,
            self.managed_hsm_url(id, ""),
            Audience::ResourceManager,
            None,
        )
        .await
    }
}
