//! Access policy entries of a vault.
//!
//! An entry is keyed by its object ID and, for compound identities, its
//! application ID. Changes go through the `accessPolicies/{add|replace|remove}`
//! endpoint under the vault's lock, then we wait until the vault reports them.

use super::Resource;
use crate::client::models::{AccessPolicyEntry, AccessPolicyUpdateKind, Permissions};
use crate::config::{Operation, OperationTimeouts};
use crate::ids::{AccessPolicyId, VaultId};
use crate::locks::VAULT_RESOURCE;
use crate::poll::{Deadline, Observation, StateWait};
use crate::validation::{validate_permissions, validate_uuid};
use crate::{Provider, Result, VaultwrightError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Timeouts of the access policy handler.
pub const ACCESS_POLICY_TIMEOUTS: OperationTimeouts = OperationTimeouts::minutes(30, 5, 30, 30);

const VISIBILITY_DELAY: Duration = Duration::from_secs(5);
const VISIBILITY_CONSECUTIVE_READS: usize = 3;

/// Key permissions accepted by the API.
pub const KEY_PERMISSIONS: &[&str] = &[
    "Backup", "Create", "Decrypt", "Delete", "Encrypt", "Get", "Import", "List", "Purge",
    "Recover", "Restore", "Sign", "UnwrapKey", "Update", "Verify", "WrapKey", "Release",
    "Rotate", "GetRotationPolicy", "SetRotationPolicy",
];

/// Secret permissions accepted by the API.
pub const SECRET_PERMISSIONS: &[&str] = &[
    "Backup", "Delete", "Get", "List", "Purge", "Recover", "Restore", "Set",
];

/// Certificate permissions accepted by the API.
pub const CERTIFICATE_PERMISSIONS: &[&str] = &[
    "Backup", "Create", "Delete", "DeleteIssuers", "Get", "GetIssuers", "Import", "List",
    "ListIssuers", "ManageContacts", "ManageIssuers", "Purge", "Recover", "Restore",
    "SetIssuers", "Update",
];

/// Storage permissions accepted by the API.
pub const STORAGE_PERMISSIONS: &[&str] = &[
    "Backup", "Delete", "DeleteSAS", "Get", "GetSAS", "List", "ListSAS", "Purge", "Recover",
    "RegenerateKey", "Restore", "Set", "SetSAS", "Update",
];

/// One access policy entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Tenant of the principal
    pub tenant_id: String,
    /// Principal object ID
    pub object_id: String,
    /// Application ID of a compound identity
    pub application_id: Option<String>,
    /// Key permissions
    pub key_permissions: Vec<String>,
    /// Secret permissions
    pub secret_permissions: Vec<String>,
    /// Certificate permissions
    pub certificate_permissions: Vec<String>,
    /// Storage permissions
    pub storage_permissions: Vec<String>,
}

impl AccessPolicy {
    /// Checks IDs and permission names.
    pub fn validate(&self) -> Result<()> {
        validate_uuid("tenant_id", &self.tenant_id)?;
        if self.object_id.is_empty() {
            return Err(VaultwrightError::InvalidConfig("object_id must not be empty".into()));
        }
        if let Some(application_id) = &self.application_id {
            validate_uuid("application_id", application_id)?;
        }
        validate_permissions("key_permissions", &self.key_permissions, KEY_PERMISSIONS)?;
        validate_permissions("secret_permissions", &self.secret_permissions, SECRET_PERMISSIONS)?;
        validate_permissions(
            "certificate_permissions",
            &self.certificate_permissions,
            CERTIFICATE_PERMISSIONS,
        )?;
        validate_permissions("storage_permissions", &self.storage_permissions, STORAGE_PERMISSIONS)
    }

    /// True when `entry` belongs to the same principal.
    pub fn matches(&self, entry: &AccessPolicyEntry) -> bool {
        entry.object_id.eq_ignore_ascii_case(&self.object_id)
            && match (&self.application_id, &entry.application_id) {
                (None, None) => true,
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            }
    }

    pub(crate) fn to_entry(&self) -> AccessPolicyEntry {
        AccessPolicyEntry {
            tenant_id: self.tenant_id.clone(),
            object_id: self.object_id.clone(),
            application_id: self.application_id.clone(),
            permissions: Permissions {
                keys: self.key_permissions.clone(),
                secrets: self.secret_permissions.clone(),
                certificates: self.certificate_permissions.clone(),
                storage: self.storage_permissions.clone(),
            },
        }
    }

    pub(crate) fn from_entry(entry: &AccessPolicyEntry) -> Self {
        Self {
            tenant_id: entry.tenant_id.clone(),
            object_id: entry.object_id.clone(),
            application_id: entry.application_id.clone().filter(|a| !a.is_empty()),
            key_permissions: entry.permissions.keys.clone(),
            secret_permissions: entry.permissions.secrets.clone(),
            certificate_permissions: entry.permissions.certificates.clone(),
            storage_permissions: entry.permissions.storage.clone(),
        }
    }
}

/// Permissions of a built-in access policy template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionPreset {
    /// Key permissions
    pub key_permissions: Vec<String>,
    /// Secret permissions
    pub secret_permissions: Vec<String>,
    /// Certificate permissions
    pub certificate_permissions: Vec<String>,
}

const PRESET_KEYS: &[&str] = &[
    "Get", "List", "Update", "Create", "Import", "Delete", "Recover", "Backup", "Restore",
];
const PRESET_SECRETS: &[&str] = &["Get", "List", "Set", "Delete", "Recover", "Backup", "Restore"];
const PRESET_CERTIFICATES: &[&str] = &[
    "Get", "List", "Update", "Create", "Import", "Delete", "Recover", "Backup", "Restore",
    "ManageContacts", "ManageIssuers", "GetIssuers", "ListIssuers", "SetIssuers", "DeleteIssuers",
];

/// Looks up a portal access policy template by name.
///
/// # Example
///
/// ```
/// use vaultwright::resources::access_policy::builtin_permissions;
///
/// let preset = builtin_permissions("Key & Secret Management").unwrap();
/// assert!(preset.certificate_permissions.is_empty());
/// assert!(builtin_permissions("Everything").is_none());
/// ```
pub fn builtin_permissions(name: &str) -> Option<PermissionPreset> {
    let (keys, secrets, certificates) = match name {
        "Key Management" => (true, false, false),
        "Secret Management" => (false, true, false),
        "Certificate Management" => (false, false, true),
        "Key & Secret Management" => (true, true, false),
        "Key & Certificate Management" => (true, false, true),
        "Secret & Certificate Management" => (false, true, true),
        "Key, Secret, & Certificate Management" => (true, true, true),
        _ => return None,
    };

    let pick = |on: bool, list: &[&str]| -> Vec<String> {
        if on {
            list.iter().map(|p| p.to_string()).collect()
        } else {
            Vec::new()
        }
    };
    Some(PermissionPreset {
        key_permissions: pick(keys, PRESET_KEYS),
        secret_permissions: pick(secrets, PRESET_SECRETS),
        certificate_permissions: pick(certificates, PRESET_CERTIFICATES),
    })
}

/// Desired access policy entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicyConfig {
    /// Resource ID of the vault
    pub key_vault_id: String,
    /// The entry
    pub policy: AccessPolicy,
}

/// Observed access policy entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicyState {
    /// `{vault id}/objectId/{oid}[/applicationId/{aid}]`
    pub id: String,
    /// Resource ID of the vault
    pub key_vault_id: String,
    /// The entry as the vault reports it
    pub policy: AccessPolicy,
}

/// Access policy entry handler.
pub struct AccessPolicyResource {
    provider: Arc<Provider>,
}

impl AccessPolicyResource {
    /// Creates the handler.
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }

    async fn find(&self, vault_id: &VaultId, policy: &AccessPolicy) -> Result<Option<AccessPolicyEntry>> {
        let vault = self.provider.client().get_vault(vault_id).await?;
        Ok(vault
            .properties
            .access_policies
            .into_iter()
            .find(|entry| policy.matches(entry)))
    }

    async fn wait_for(&self, vault_id: &VaultId, policy: &AccessPolicy, present: bool, deadline: Deadline) -> Result<()> {
        let (pending, target) = if present {
            (["notfound", "vaultnotfound"], ["found"])
        } else {
            (["found", "vaultnotfound"], ["notfound"])
        };

        StateWait::new(&pending, &target, deadline)
            .with_delay(VISIBILITY_DELAY)
            .with_continuous_target_occurrence(VISIBILITY_CONSECUTIVE_READS)
            .wait(|| async move {
                let state = match self.find(vault_id, policy).await {
                    Ok(Some(_)) => "found",
                    Ok(None) => "notfound",
                    Err(err) if err.is_not_found() => "vaultnotfound",
                    Err(err) => return Err(err),
                };
                Ok(Observation::found((), state))
            })
            .await
    }

    fn policy_id(vault_id: &VaultId, policy: &AccessPolicy) -> AccessPolicyId {
        AccessPolicyId {
            vault_id: vault_id.clone(),
            object_id: policy.object_id.clone(),
            application_id: policy.application_id.clone(),
        }
    }

    async fn apply(
        &self,
        config: &AccessPolicyConfig,
        kind: AccessPolicyUpdateKind,
        operation: Operation,
    ) -> Result<AccessPolicyState> {
        config.policy.validate()?;
        let vault_id = VaultId::parse(&config.key_vault_id)?;
        let id = Self::policy_id(&vault_id, &config.policy);
        let deadline = self.deadline(operation);

        let guard = self.provider.locks().lock(VAULT_RESOURCE, &vault_id.name).await;

        let existing = self
            .find(&vault_id, &config.policy)
            .await
            .map_err(|e| VaultwrightError::op("retrieving parent", format!("Key Vault {:?}", vault_id.to_string()), e))?;
        if kind == AccessPolicyUpdateKind::Add && existing.is_some() {
            return Err(VaultwrightError::already_exists(self.kind(), id.to_string()));
        }

        self.provider
            .client()
            .update_access_policy(&vault_id, kind, vec![config.policy.to_entry()])
            .await
            .map_err(|e| VaultwrightError::op("updating", format!("Access Policy {:?}", id.to_string()), e))?;

        self.wait_for(&vault_id, &config.policy, true, deadline)
            .await
            .map_err(|e| VaultwrightError::op("waiting for", format!("Access Policy {:?}", id.to_string()), e))?;

        drop(guard);
        self.read(&id.to_string())
            .await?
            .ok_or_else(|| VaultwrightError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl Resource for AccessPolicyResource {
    type Config = AccessPolicyConfig;
    type State = AccessPolicyState;

    fn kind(&self) -> &'static str {
        "key_vault_access_policy"
    }

    fn default_timeouts(&self) -> OperationTimeouts {
        ACCESS_POLICY_TIMEOUTS
    }

    fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn create(&self, config: &AccessPolicyConfig) -> Result<AccessPolicyState> {
        self.apply(config, AccessPolicyUpdateKind::Add, Operation::Create).await
    }

    async fn read(&self, id: &str) -> Result<Option<AccessPolicyState>> {
        let id = AccessPolicyId::parse(id)?;
        let policy = AccessPolicy {
            object_id: id.object_id.clone(),
            application_id: id.application_id.clone(),
            ..Default::default()
        };

        match self.find(&id.vault_id, &policy).await {
            Ok(Some(entry)) => Ok(Some(AccessPolicyState {
                id: id.to_string(),
                key_vault_id: id.vault_id.to_string(),
                policy: AccessPolicy::from_entry(&entry),
            })),
            Ok(None) => {
                debug!(%id, "access policy was not found - removing from state");
                Ok(None)
            }
            Err(err) if err.is_not_found() => {
                debug!(vault = %id.vault_id, "parent Key Vault was not found - removing from state");
                Ok(None)
            }
            Err(err) => Err(VaultwrightError::op("retrieving", format!("Access Policy {:?}", id.to_string()), err)),
        }
    }

    async fn update(
        &self,
        _id: &str,
        prior: &AccessPolicyConfig,
        desired: &AccessPolicyConfig,
    ) -> Result<AccessPolicyState> {
        if prior.key_vault_id != desired.key_vault_id
            || prior.policy.object_id != desired.policy.object_id
            || prior.policy.application_id != desired.policy.application_id
        {
            return Err(VaultwrightError::InvalidConfig(
                "changing key_vault_id, object_id or application_id requires replacing the access policy".into(),
            ));
        }
        self.apply(desired, AccessPolicyUpdateKind::Replace, Operation::Update)
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = AccessPolicyId::parse(id)?;
        let deadline = self.deadline(Operation::Delete);
        let lookup = AccessPolicy {
            object_id: id.object_id.clone(),
            application_id: id.application_id.clone(),
            ..Default::default()
        };

        let _guard = self.provider.locks().lock(VAULT_RESOURCE, &id.vault_id.name).await;

        let entry = match self.find(&id.vault_id, &lookup).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(()),
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(VaultwrightError::op("retrieving", format!("Access Policy {:?}", id.to_string()), err)),
        };

        self.provider
            .client()
            .update_access_policy(&id.vault_id, AccessPolicyUpdateKind::Remove, vec![entry])
            .await
            .map_err(|e| VaultwrightError::op("removing", format!("Access Policy {:?}", id.to_string()), e))?;

        self.wait_for(&id.vault_id, &lookup, false, deadline)
            .await
            .map_err(|e| VaultwrightError::op("waiting for removal of", format!("Access Policy {:?}", id.to_string()), e))
    }
}
