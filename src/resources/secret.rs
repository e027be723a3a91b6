//! Secrets.

use super::{
    item_attributes, owning_vault, should_purge, unix_to_rfc3339, vault_for_delete, Resource, NESTED_ITEM_TIMEOUTS,
};
use crate::client::models::{SecretBundle, Tags};
use crate::config::{Operation, OperationTimeouts};
use crate::ids::{NestedItemId, NestedItemType, VaultId};
use crate::purge::{delete_and_optionally_purge, NestedItemDeleter};
use crate::recovery::{create_with_recovery, recover_and_wait};
use crate::validation::validate_nested_item_name;
use crate::{Provider, Result, VaultwrightError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Desired secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretConfig {
    /// Resource ID of the owning vault
    pub key_vault_id: String,
    /// Secret name
    pub name: String,
    /// Secret value
    pub value: String,
    /// Content type hint
    pub content_type: Option<String>,
    /// Enabled
    pub enabled: bool,
    /// Not usable before, RFC 3339
    pub not_before_date: Option<String>,
    /// Expires, RFC 3339
    pub expiration_date: Option<String>,
    /// Tags
    pub tags: Tags,
}

impl SecretConfig {
    /// An enabled secret with no dates, content type or tags.
    pub fn new(key_vault_id: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key_vault_id: key_vault_id.into(),
            name: name.into(),
            value: value.into(),
            content_type: None,
            enabled: true,
            not_before_date: None,
            expiration_date: None,
            tags: Tags::new(),
        }
    }

    fn to_bundle(&self) -> Result<SecretBundle> {
        Ok(SecretBundle {
            value: Some(self.value.clone()),
            content_type: self.content_type.clone(),
            attributes: Some(item_attributes(
                self.enabled,
                self.not_before_date.as_deref(),
                self.expiration_date.as_deref(),
            )?),
            tags: Some(self.tags.clone()),
            ..Default::default()
        })
    }
}

/// Observed secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretState {
    /// Versioned ID
    pub id: String,
    /// ID without version
    pub versionless_id: String,
    /// Current version
    pub version: String,
    /// Secret name
    pub name: String,
    /// Resource ID of the owning vault
    pub key_vault_id: String,
    /// Secret value
    pub value: String,
    /// Content type
    pub content_type: Option<String>,
    /// Enabled
    pub enabled: bool,
    /// Not usable before, RFC 3339
    pub not_before_date: Option<String>,
    /// Expires, RFC 3339
    pub expiration_date: Option<String>,
    /// Tags
    pub tags: Tags,
}

/// Secret handler.
pub struct SecretResource {
    provider: Arc<Provider>,
}

impl SecretResource {
    /// Creates the handler.
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }

    /// Reads the latest version of a secret by name.
    pub async fn lookup(&self, key_vault_id: &str, name: &str) -> Result<SecretState> {
        let vault_id = VaultId::parse(key_vault_id)?;
        let base_url = self.provider.base_url_for_vault(&vault_id).await?;
        let secret = self
            .provider
            .client()
            .get_secret(&base_url, name, None)
            .await
            .map_err(|e| VaultwrightError::op("retrieving", format!("Secret {name:?} (Key Vault {base_url:?})"), e))?;
        flatten(&vault_id, secret)
    }

    async fn set(&self, base_url: &str, config: &SecretConfig) -> Result<SecretBundle> {
        let client = self.provider.client();
        let bundle = config.to_bundle()?;
        let item = format!("Secret {:?} (Key Vault {base_url:?})", config.name);
        let recovery_deadline = self.deadline(Operation::Create);

        create_with_recovery(
            &item,
            self.provider.features().recover_soft_deleted_secrets,
            || client.set_secret(base_url, &config.name, &bundle),
            || {
                recover_and_wait(
                    &item,
                    || client.recover_deleted_nested_item(base_url, NestedItemType::Secret, &config.name),
                    || {
                        let url = client.nested_item_url(base_url, NestedItemType::Secret, &config.name);
                        async move { client.probe(&url, client.data_plane_audience(base_url)).await }
                    },
                    recovery_deadline,
                )
            },
        )
        .await
    }
}

fn flatten(vault_id: &VaultId, secret: SecretBundle) -> Result<SecretState> {
    let raw_id = secret.id.clone().unwrap_or_default();
    let id = NestedItemId::parse(&raw_id, NestedItemType::Secret)?;
    let attributes = secret.attributes.unwrap_or_default();

    Ok(SecretState {
        id: id.to_string(),
        versionless_id: id.versionless_id(),
        version: id.version.clone().unwrap_or_default(),
        name: id.name,
        key_vault_id: vault_id.to_string(),
        value: secret.value.unwrap_or_default(),
        content_type: secret.content_type,
        enabled: attributes.enabled.unwrap_or(true),
        not_before_date: unix_to_rfc3339(attributes.nbf),
        expiration_date: unix_to_rfc3339(attributes.exp),
        tags: secret.tags.unwrap_or_default(),
    })
}

#[async_trait]
impl Resource for SecretResource {
    type Config = SecretConfig;
    type State = SecretState;

    fn kind(&self) -> &'static str {
        "key_vault_secret"
    }

    fn default_timeouts(&self) -> OperationTimeouts {
        NESTED_ITEM_TIMEOUTS
    }

    fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn create(&self, config: &SecretConfig) -> Result<SecretState> {
        validate_nested_item_name(&config.name)?;
        let vault_id = VaultId::parse(&config.key_vault_id)?;
        let client = self.provider.client();

        let base_url = self.provider.base_url_for_vault(&vault_id).await.map_err(|e| {
            VaultwrightError::op("looking up Base URI for", format!("Secret {:?} in {vault_id}", config.name), e)
        })?;

        match client.get_secret(&base_url, &config.name, None).await {
            Ok(existing) => {
                let id = existing.id.unwrap_or_default();
                if !id.is_empty() {
                    return Err(VaultwrightError::already_exists(self.kind(), id));
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                return Err(VaultwrightError::op(
                    "checking for presence of existing",
                    format!("Secret {:?} (Key Vault {base_url:?})", config.name),
                    err,
                ))
            }
        }

        let created = self.set(&base_url, config).await?;
        let id = created.id.unwrap_or_default();
        debug!(secret = %config.name, %id, "created secret");

        self.read(&id)
            .await?
            .ok_or_else(|| VaultwrightError::NotFound(format!("Secret {:?}", config.name)))
    }

    async fn read(&self, id: &str) -> Result<Option<SecretState>> {
        let id = NestedItemId::parse(id, NestedItemType::Secret)?;
        let Some((vault_id, _)) = owning_vault(&self.provider, &id.base_url).await? else {
            return Ok(None);
        };

        // the latest version, so versions created outside this handler show up as drift
        match self.provider.client().get_secret(&id.base_url, &id.name, None).await {
            Ok(secret) => flatten(&vault_id, secret).map(Some),
            Err(err) if err.is_not_found() => {
                debug!(secret = %id.name, base_url = %id.base_url, "Secret was not found - removing from state");
                Ok(None)
            }
            Err(err) => Err(VaultwrightError::op("retrieving", format!("Secret {:?}", id.to_string()), err)),
        }
    }

    async fn update(&self, id: &str, prior: &SecretConfig, desired: &SecretConfig) -> Result<SecretState> {
        let id = NestedItemId::parse(id, NestedItemType::Secret)?;
        let vault_id = VaultId::parse(&desired.key_vault_id)?;
        self.provider.cache().insert(&vault_id.to_string(), &id.base_url).await;
        let client = self.provider.client();
        let target = format!("Secret {:?} (Key Vault {:?})", id.name, id.base_url);

        if prior.name != desired.name || !prior.key_vault_id.eq_ignore_ascii_case(&desired.key_vault_id) {
            return Err(VaultwrightError::InvalidConfig(format!(
                "{target}: changing the name or vault requires replacing the secret"
            )));
        }

        let new_id = if prior.value != desired.value || prior.content_type != desired.content_type {
            let created = client
                .set_secret(&id.base_url, &id.name, &desired.to_bundle()?)
                .await
                .map_err(|e| VaultwrightError::op("updating", &target, e))?;
            created.id.unwrap_or_else(|| id.to_string())
        } else {
            let patch = SecretBundle {
                content_type: desired.content_type.clone(),
                attributes: Some(item_attributes(
                    desired.enabled,
                    desired.not_before_date.as_deref(),
                    desired.expiration_date.as_deref(),
                )?),
                tags: Some(desired.tags.clone()),
                ..Default::default()
            };
            client
                .update_secret(&id.base_url, &id.name, "", &patch)
                .await
                .map_err(|e| VaultwrightError::op("updating", &target, e))?;
            id.to_string()
        };

        self.read(&new_id)
            .await?
            .ok_or_else(|| VaultwrightError::NotFound(target))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = NestedItemId::parse(id, NestedItemType::Secret)?;
        let description = format!("Secret {:?} (Key Vault {:?})", id.name, id.base_url);

        let Some(vault) = vault_for_delete(&self.provider, &id.base_url).await? else {
            return Ok(());
        };

        let purge = should_purge(
            self.provider.features().purge_soft_deleted_secrets_on_destroy,
            &vault,
            &description,
        );
        let deleter = NestedItemDeleter::new(self.provider.client(), &id.base_url, NestedItemType::Secret, &id.name);
        delete_and_optionally_purge(&deleter, purge, self.deadline(Operation::Delete)).await
    }
}
