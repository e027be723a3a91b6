//! Resource handlers.
//!
//! Each handler maps a configuration struct onto the Key Vault APIs and flattens
//! the responses back into a state struct. All handlers implement [`Resource`].
//!
//! | Handler | Kind | Plane |
//! |---------|------|-------|
//! | [`VaultResource`] | `key_vault` | management |
//! | [`AccessPolicyResource`] | `key_vault_access_policy` | management |
//! | [`ManagedHsmResource`] | `key_vault_managed_hardware_security_module` | management |
//! | [`SecretResource`] | `key_vault_secret` | data |
//! | [`KeyResource`] | `key_vault_key` | data |
//! | [`CertificateResource`] | `key_vault_certificate` | data |
//! | [`CertificateIssuerResource`] | `key_vault_certificate_issuer` | data |
//! | [`ManagedStorageAccountResource`] | `key_vault_managed_storage_account` | data |
//! | [`SasDefinitionResource`] | `key_vault_managed_storage_account_sas_token_definition` | data |
//! | [`HsmRoleDefinitionResource`] | `key_vault_managed_hardware_security_module_role_definition` | data |
//! | [`HsmRoleAssignmentResource`] | `key_vault_managed_hardware_security_module_role_assignment` | data |

use crate::client::models::{ItemAttributes, Vault};
use crate::config::{Operation, OperationTimeouts};
use crate::ids::VaultId;
use crate::poll::Deadline;
use crate::{Provider, Result, VaultwrightError};
use async_trait::async_trait;
use tracing::debug;

pub mod access_policy;
pub mod certificate;
pub mod certificate_issuer;
pub mod hsm_role;
pub mod key;
pub mod managed_hsm;
pub mod managed_storage;
pub mod secret;
pub mod vault;

pub use access_policy::AccessPolicyResource;
pub use certificate::CertificateResource;
pub use certificate_issuer::CertificateIssuerResource;
pub use hsm_role::{HsmRoleAssignmentResource, HsmRoleDefinitionResource};
pub use key::KeyResource;
pub use managed_hsm::ManagedHsmResource;
pub use managed_storage::{ManagedStorageAccountResource, SasDefinitionResource};
pub use secret::SecretResource;
pub use vault::VaultResource;

/// Timeouts of the data-plane item handlers.
pub const NESTED_ITEM_TIMEOUTS: OperationTimeouts = OperationTimeouts::minutes(30, 30, 30, 30);

/// Lifecycle of one kind of Key Vault resource.
///
/// `read` answers `Ok(None)` when the resource is gone, so the caller can drop
/// it from its state instead of failing. `create` refuses to adopt a resource
/// that already exists.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use vaultwright::resources::secret::{SecretConfig, SecretResource};
/// use vaultwright::resources::Resource;
/// use vaultwright::{Config, Provider};
///
/// #[tokio::main]
/// async fn main() -> vaultwright::Result<()> {
///     let provider = Arc::new(Provider::new(Config::from_env()?)?);
///     let secrets = SecretResource::new(provider);
///
///     let key_vault_id = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv1";
///     let state = secrets
///         .create(&SecretConfig::new(key_vault_id, "db-password", "hunter2"))
///         .await?;
///     println!("created {}", state.id);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait Resource: Send + Sync {
    /// Desired configuration.
    type Config: Send + Sync;

    /// Observed state.
    type State: Send + Sync;

    /// Resource kind, also the key of per-kind timeout overrides.
    fn kind(&self) -> &'static str;

    /// Timeouts used when the configuration does not override them.
    fn default_timeouts(&self) -> OperationTimeouts;

    /// Provider the handler works through.
    fn provider(&self) -> &Provider;

    /// Deadline for one operation, measured from now.
    fn deadline(&self, operation: Operation) -> Deadline {
        let timeouts = self.provider().timeouts(self.kind(), self.default_timeouts());
        Deadline::after(timeouts.get(operation))
    }

    /// Creates the resource and returns its state.
    async fn create(&self, config: &Self::Config) -> Result<Self::State>;

    /// Reads the resource; `None` when it no longer exists.
    async fn read(&self, id: &str) -> Result<Option<Self::State>>;

    /// Moves the resource from `prior` to `desired`.
    async fn update(&self, id: &str, prior: &Self::Config, desired: &Self::Config) -> Result<Self::State>;

    /// Deletes the resource.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Vault serving a data-plane base URL, with its current definition.
///
/// `None` when no vault in the subscription serves the URL, or the vault is gone.
pub(crate) async fn owning_vault(provider: &Provider, base_url: &str) -> Result<Option<(VaultId, Vault)>> {
    let vault_id = provider.vault_id_from_base_url(base_url).await.map_err(|e| {
        VaultwrightError::op(
            "retrieving the Resource ID of",
            format!("the Key Vault at URL {base_url:?}"),
            e,
        )
    })?;
    let Some(vault_id) = vault_id else {
        debug!(%base_url, "unable to determine the Resource ID for the Key Vault - removing from state");
        return Ok(None);
    };

    match provider.client().get_vault(&vault_id).await {
        Ok(vault) => Ok(Some((vault_id, vault))),
        Err(err) if err.is_not_found() => {
            debug!(vault = %vault_id, "Key Vault was not found - removing from state");
            Ok(None)
        }
        Err(err) => Err(VaultwrightError::op(
            "checking if",
            format!("Key Vault {:?} exists", vault_id.to_string()),
            err,
        )),
    }
}

/// Vault owning an item about to be deleted; `None` when the vault is already gone.
///
/// Unlike [`owning_vault`], a base URL no vault in the subscription serves is an error.
pub(crate) async fn vault_for_delete(provider: &Provider, base_url: &str) -> Result<Option<Vault>> {
    let vault_id = provider.vault_id_from_base_url(base_url).await?.ok_or_else(|| {
        VaultwrightError::InvalidConfig(format!(
            "unable to determine the Resource ID for the Key Vault at URL {base_url:?}"
        ))
    })?;
    match provider.client().get_vault(&vault_id).await {
        Ok(vault) => Ok(Some(vault)),
        Err(err) if err.is_not_found() => {
            debug!(vault = %vault_id, "Key Vault was not found - nothing to delete");
            Ok(None)
        }
        Err(err) => Err(VaultwrightError::op(
            "checking if",
            format!("Key Vault {:?} exists", vault_id.to_string()),
            err,
        )),
    }
}

/// Purges only when asked to and the vault has no purge protection.
pub(crate) fn should_purge(requested: bool, vault: &Vault, item: &str) -> bool {
    let protected = vault.properties.enable_purge_protection.unwrap_or(false);
    if requested && protected {
        debug!(%item, "cannot purge because the vault has purge protection enabled");
    }
    requested && !protected
}

/// Attributes of a data-plane item from its enabled flag and RFC 3339 dates.
pub(crate) fn item_attributes(
    enabled: bool,
    not_before_date: Option<&str>,
    expiration_date: Option<&str>,
) -> Result<ItemAttributes> {
    Ok(ItemAttributes {
        enabled: Some(enabled),
        nbf: rfc3339_to_unix("not_before_date", not_before_date)?,
        exp: rfc3339_to_unix("expiration_date", expiration_date)?,
        ..Default::default()
    })
}

/// Unix seconds to RFC 3339, as the API reports item dates.
pub(crate) fn unix_to_rfc3339(seconds: Option<i64>) -> Option<String> {
    seconds
        .and_then(|s| chrono::DateTime::from_timestamp(s, 0))
        .map(|d| d.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}

/// RFC 3339 to Unix seconds.
pub(crate) fn rfc3339_to_unix(field: &str, value: Option<&str>) -> Result<Option<i64>> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| {
            chrono::DateTime::parse_from_rfc3339(v)
                .map(|d| d.timestamp())
                .map_err(|_| {
                    crate::VaultwrightError::InvalidConfig(format!(
                        "{field} must be an RFC 3339 timestamp, got {v:?}"
                    ))
                })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_conversion() {
        assert_eq!(
            unix_to_rfc3339(Some(1_700_000_000)).as_deref(),
            Some("2023-11-14T22:13:20Z")
        );
        assert_eq!(
            rfc3339_to_unix("expiration_date", Some("2023-11-14T22:13:20Z")).unwrap(),
            Some(1_700_000_000)
        );
        assert_eq!(rfc3339_to_unix("expiration_date", None).unwrap(), None);
        assert!(rfc3339_to_unix("expiration_date", Some("tomorrow")).is_err());
    }

    #[test]
    fn test_purge_protection_blocks_purge() {
        let mut vault = Vault::default();
        assert!(should_purge(true, &vault, "Secret \"s1\""));
        vault.properties.enable_purge_protection = Some(true);
        assert!(!should_purge(true, &vault, "Secret \"s1\""));
        assert!(!should_purge(false, &Vault::default(), "Secret \"s1\""));
    }

    #[test]
    fn test_item_attributes() {
        let attributes = item_attributes(false, None, Some("2030-01-01T00:00:00Z")).unwrap();
        assert_eq!(attributes.enabled, Some(false));
        assert_eq!(attributes.nbf, None);
        assert_eq!(attributes.exp, Some(1_893_456_000));
    }
}
