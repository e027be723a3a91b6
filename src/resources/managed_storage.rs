//! Managed storage accounts and their SAS token definitions.
//!
//! The vault holds the storage account keys, optionally regenerates them on a
//! schedule, and issues SAS tokens from the definitions through a backing
//! secret.

use super::{owning_vault, should_purge, vault_for_delete, Resource, NESTED_ITEM_TIMEOUTS};
use crate::client::models::{SasDefinitionBundle, StorageBundle, Tags};
use crate::config::{Operation, OperationTimeouts};
use crate::ids::{NestedItemId, NestedItemType, SasDefinitionId, VaultId};
use crate::purge::{delete_and_optionally_purge, NestedItemDeleter};
use crate::recovery::{create_with_recovery, recover_and_wait};
use crate::validation::{validate_iso8601_duration, validate_storage_item_name};
use crate::{Provider, Result, VaultwrightError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const STORAGE_ACCOUNT_KEYS: &[&str] = &["key1", "key2"];
const SAS_TYPES: &[&str] = &["account", "service"];

/// Desired managed storage account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedStorageAccountConfig {
    /// Resource ID of the owning vault
    pub key_vault_id: String,
    /// Name inside the vault
    pub name: String,
    /// Resource ID of the storage account
    pub storage_account_id: String,
    /// Active key, `key1` or `key2`
    pub storage_account_key: String,
    /// Regenerate keys on a schedule
    pub regenerate_key_automatically: bool,
    /// ISO-8601 duration; required exactly when regenerating automatically
    pub regeneration_period: Option<String>,
    /// Tags
    pub tags: Tags,
}

impl ManagedStorageAccountConfig {
    fn validate(&self) -> Result<()> {
        validate_storage_item_name(&self.name)?;
        if !STORAGE_ACCOUNT_KEYS.contains(&self.storage_account_key.as_str()) {
            return Err(VaultwrightError::InvalidConfig(format!(
                "storage_account_key must be key1 or key2, got {:?}",
                self.storage_account_key
            )));
        }
        match (self.regenerate_key_automatically, self.regeneration_period.as_deref()) {
            (true, Some(period)) => validate_iso8601_duration(period),
            (false, None) => Ok(()),
            (true, None) => Err(VaultwrightError::InvalidConfig(
                "regeneration_period is required when regenerate_key_automatically is true".into(),
            )),
            (false, Some(_)) => Err(VaultwrightError::InvalidConfig(
                "regeneration_period can only be set when regenerate_key_automatically is true".into(),
            )),
        }
    }

    fn to_bundle(&self) -> StorageBundle {
        StorageBundle {
            resource_id: Some(self.storage_account_id.clone()),
            active_key_name: Some(self.storage_account_key.clone()),
            auto_regenerate_key: Some(self.regenerate_key_automatically),
            regeneration_period: self.regeneration_period.clone(),
            tags: Some(self.tags.clone()),
            ..Default::default()
        }
    }
}

/// Observed managed storage account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedStorageAccountState {
    /// Item ID
    pub id: String,
    /// Resource ID of the owning vault
    pub key_vault_id: String,
    /// Name inside the vault
    pub name: String,
    /// Resource ID of the storage account
    pub storage_account_id: String,
    /// Active key
    pub storage_account_key: String,
    /// Regenerates keys on a schedule
    pub regenerate_key_automatically: bool,
    /// Regeneration period
    pub regeneration_period: Option<String>,
    /// Tags
    pub tags: Tags,
}

fn flatten_account(id: &NestedItemId, vault_id: &VaultId, account: StorageBundle) -> ManagedStorageAccountState {
    ManagedStorageAccountState {
        id: id.versionless_id(),
        key_vault_id: vault_id.to_string(),
        name: id.name.clone(),
        storage_account_id: account.resource_id.unwrap_or_default(),
        storage_account_key: account.active_key_name.unwrap_or_default(),
        regenerate_key_automatically: account.auto_regenerate_key.unwrap_or(false),
        regeneration_period: account.regeneration_period,
        tags: account.tags.unwrap_or_default(),
    }
}

/// Managed storage account handler.
pub struct ManagedStorageAccountResource {
    provider: Arc<Provider>,
}

impl ManagedStorageAccountResource {
    /// Creates the handler.
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Resource for ManagedStorageAccountResource {
    type Config = ManagedStorageAccountConfig;
    type State = ManagedStorageAccountState;

    fn kind(&self) -> &'static str {
        "key_vault_managed_storage_account"
    }

    fn default_timeouts(&self) -> OperationTimeouts {
        NESTED_ITEM_TIMEOUTS
    }

    fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn create(&self, config: &ManagedStorageAccountConfig) -> Result<ManagedStorageAccountState> {
        config.validate()?;
        let vault_id = VaultId::parse(&config.key_vault_id)?;
        let base_url = self.provider.base_url_for_vault(&vault_id).await?;
        let id = NestedItemId::new(&base_url, NestedItemType::StorageAccount, &config.name, None)?;
        let base_url = id.base_url.as_str();
        let client = self.provider.client();
        let item = format!("Managed Storage Account {:?} (Key Vault {base_url:?})", config.name);

        match client.get_storage_account(base_url, &config.name).await {
            Ok(_) => return Err(VaultwrightError::already_exists(self.kind(), id.versionless_id())),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(VaultwrightError::op("checking for presence of existing", &item, err)),
        }

        let bundle = config.to_bundle();
        let recovery_deadline = self.deadline(Operation::Create);
        let account = create_with_recovery(
            &item,
            self.provider.features().recover_soft_deleted_storage_accounts,
            || client.set_storage_account(base_url, &config.name, &bundle),
            || {
                recover_and_wait(
                    &item,
                    || client.recover_deleted_nested_item(base_url, NestedItemType::StorageAccount, &config.name),
                    || {
                        let url = client.nested_item_url(base_url, NestedItemType::StorageAccount, &config.name);
                        async move { client.probe(&url, client.data_plane_audience(base_url)).await }
                    },
                    recovery_deadline,
                )
            },
        )
        .await?;

        Ok(flatten_account(&id, &vault_id, account))
    }

    async fn read(&self, id: &str) -> Result<Option<ManagedStorageAccountState>> {
        let id = NestedItemId::parse(id, NestedItemType::StorageAccount)?;
        let Some((vault_id, _)) = owning_vault(&self.provider, &id.base_url).await? else {
            return Ok(None);
        };

        match self.provider.client().get_storage_account(&id.base_url, &id.name).await {
            Ok(account) => Ok(Some(flatten_account(&id, &vault_id, account))),
            Err(err) if err.is_not_found() => {
                debug!(account = %id.name, base_url = %id.base_url, "Managed Storage Account was not found - removing from state");
                Ok(None)
            }
            Err(err) => Err(VaultwrightError::op(
                "retrieving",
                format!("Managed Storage Account {:?}", id.to_string()),
                err,
            )),
        }
    }

    async fn update(
        &self,
        id: &str,
        prior: &ManagedStorageAccountConfig,
        desired: &ManagedStorageAccountConfig,
    ) -> Result<ManagedStorageAccountState> {
        desired.validate()?;
        let id = NestedItemId::parse(id, NestedItemType::StorageAccount)?;
        let vault_id = VaultId::parse(&desired.key_vault_id)?;
        let target = format!("Managed Storage Account {:?} (Key Vault {:?})", id.name, id.base_url);

        if prior.name != desired.name
            || !prior.key_vault_id.eq_ignore_ascii_case(&desired.key_vault_id)
            || !prior.storage_account_id.eq_ignore_ascii_case(&desired.storage_account_id)
        {
            return Err(VaultwrightError::InvalidConfig(format!(
                "{target}: changing the name, vault or storage account requires replacing it"
            )));
        }

        let patch = StorageBundle {
            resource_id: None,
            ..desired.to_bundle()
        };
        let account = self
            .provider
            .client()
            .update_storage_account(&id.base_url, &id.name, &patch)
            .await
            .map_err(|e| VaultwrightError::op("updating", &target, e))?;
        Ok(flatten_account(&id, &vault_id, account))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = NestedItemId::parse(id, NestedItemType::StorageAccount)?;
        let description = format!("Managed Storage Account {:?} (Key Vault {:?})", id.name, id.base_url);

        let Some(vault) = vault_for_delete(&self.provider, &id.base_url).await? else {
            return Ok(());
        };
        let purge = should_purge(
            self.provider.features().purge_soft_deleted_storage_accounts_on_destroy,
            &vault,
            &description,
        );
        let deleter = NestedItemDeleter::new(
            self.provider.client(),
            &id.base_url,
            NestedItemType::StorageAccount,
            &id.name,
        );
        delete_and_optionally_purge(&deleter, purge, self.deadline(Operation::Delete)).await
    }
}

/// Desired SAS token definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasDefinitionConfig {
    /// ID of the managed storage account
    pub managed_storage_account_id: String,
    /// Definition name
    pub name: String,
    /// `account` or `service`
    pub sas_type: String,
    /// Template SAS token the issued tokens are modelled on
    pub sas_template_uri: String,
    /// Validity of issued tokens, ISO-8601 duration
    pub validity_period: String,
    /// Tags
    pub tags: Tags,
}

impl SasDefinitionConfig {
    fn validate(&self) -> Result<()> {
        validate_storage_item_name(&self.name)?;
        validate_iso8601_duration(&self.validity_period)?;
        if !SAS_TYPES.contains(&self.sas_type.as_str()) {
            return Err(VaultwrightError::InvalidConfig(format!(
                "sas_type must be account or service, got {:?}",
                self.sas_type
            )));
        }
        if self.sas_template_uri.is_empty() {
            return Err(VaultwrightError::InvalidConfig("sas_template_uri must not be empty".into()));
        }
        Ok(())
    }

    fn to_bundle(&self) -> SasDefinitionBundle {
        SasDefinitionBundle {
            template_uri: Some(self.sas_template_uri.clone()),
            sas_type: Some(self.sas_type.clone()),
            validity_period: Some(self.validity_period.clone()),
            tags: Some(self.tags.clone()),
            ..Default::default()
        }
    }
}

/// Observed SAS token definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasDefinitionState {
    /// Definition ID
    pub id: String,
    /// ID of the managed storage account
    pub managed_storage_account_id: String,
    /// Definition name
    pub name: String,
    /// Secret through which tokens are read
    pub secret_id: String,
    /// `account` or `service`
    pub sas_type: String,
    /// Template SAS token
    pub sas_template_uri: String,
    /// Validity of issued tokens
    pub validity_period: String,
    /// Tags
    pub tags: Tags,
}

fn flatten_definition(id: &SasDefinitionId, definition: SasDefinitionBundle) -> SasDefinitionState {
    SasDefinitionState {
        id: id.to_string(),
        managed_storage_account_id: format!("{}storage/{}", id.base_url, id.storage_account),
        name: id.name.clone(),
        secret_id: definition.sid.unwrap_or_default(),
        sas_type: definition.sas_type.unwrap_or_default(),
        sas_template_uri: definition.template_uri.unwrap_or_default(),
        validity_period: definition.validity_period.unwrap_or_default(),
        tags: definition.tags.unwrap_or_default(),
    }
}

/// SAS definition handler.
pub struct SasDefinitionResource {
    provider: Arc<Provider>,
}

impl SasDefinitionResource {
    /// Creates the handler.
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Resource for SasDefinitionResource {
    type Config = SasDefinitionConfig;
    type State = SasDefinitionState;

    fn kind(&self) -> &'static str {
        "key_vault_managed_storage_account_sas_token_definition"
    }

    fn default_timeouts(&self) -> OperationTimeouts {
        NESTED_ITEM_TIMEOUTS
    }

    fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn create(&self, config: &SasDefinitionConfig) -> Result<SasDefinitionState> {
        config.validate()?;
        let account = NestedItemId::parse(&config.managed_storage_account_id, NestedItemType::StorageAccount)?;
        let id = SasDefinitionId {
            base_url: account.base_url,
            storage_account: account.name,
            name: config.name.clone(),
        };
        let base_url = id.base_url.as_str();
        let client = self.provider.client();
        let item = format!("SAS Definition {:?} (Storage Account {:?})", id.name, id.storage_account);

        match client.get_sas_definition(base_url, &id.storage_account, &id.name).await {
            Ok(_) => return Err(VaultwrightError::already_exists(self.kind(), id.to_string())),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(VaultwrightError::op("checking for presence of existing", &item, err)),
        }

        let bundle = config.to_bundle();
        let probe_url = client.data_plane_url(base_url, &format!("storage/{}/sas/{}", id.storage_account, id.name));
        let recovery_deadline = self.deadline(Operation::Create);
        let definition = create_with_recovery(
            &item,
            self.provider.features().recover_soft_deleted_storage_accounts,
            || client.set_sas_definition(base_url, &id.storage_account, &id.name, &bundle),
            || {
                recover_and_wait(
                    &item,
                    || client.recover_deleted_sas_definition(base_url, &id.storage_account, &id.name),
                    || client.probe(&probe_url, client.data_plane_audience(base_url)),
                    recovery_deadline,
                )
            },
        )
        .await?;

        Ok(flatten_definition(&id, definition))
    }

    async fn read(&self, id: &str) -> Result<Option<SasDefinitionState>> {
        let id = SasDefinitionId::parse(id)?;
        if owning_vault(&self.provider, &id.base_url).await?.is_none() {
            return Ok(None);
        }

        match self
            .provider
            .client()
            .get_sas_definition(&id.base_url, &id.storage_account, &id.name)
            .await
        {
            Ok(definition) => Ok(Some(flatten_definition(&id, definition))),
            Err(err) if err.is_not_found() => {
                debug!(definition = %id, "SAS Definition was not found - removing from state");
                Ok(None)
            }
            Err(err) => Err(VaultwrightError::op(
                "retrieving",
                format!("SAS Definition {:?}", id.to_string()),
                err,
            )),
        }
    }

    async fn update(
        &self,
        id: &str,
        prior: &SasDefinitionConfig,
        desired: &SasDefinitionConfig,
    ) -> Result<SasDefinitionState> {
        desired.validate()?;
        let id = SasDefinitionId::parse(id)?;
        if prior.name != desired.name || prior.managed_storage_account_id != desired.managed_storage_account_id {
            return Err(VaultwrightError::InvalidConfig(format!(
                "SAS Definition {:?}: changing the name or storage account requires replacing it",
                id.to_string()
            )));
        }

        let definition = self
            .provider
            .client()
            .set_sas_definition(&id.base_url, &id.storage_account, &id.name, &desired.to_bundle())
            .await
            .map_err(|e| VaultwrightError::op("updating", format!("SAS Definition {:?}", id.to_string()), e))?;
        Ok(flatten_definition(&id, definition))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = SasDefinitionId::parse(id)?;
        match self
            .provider
            .client()
            .delete_sas_definition(&id.base_url, &id.storage_account, &id.name)
            .await
        {
            Err(err) if !err.is_not_found() => Err(VaultwrightError::op(
                "deleting",
                format!("SAS Definition {:?}", id.to_string()),
                err,
            )),
            _ => Ok(()),
        }
    }
}
