//! The provider: one client, one cache and one lock registry shared by every
//! resource handler.

use crate::cache::BaseUrlCache;
use crate::client::KeyVaultClient;
use crate::config::{Config, KeyVaultFeatures, OperationTimeouts};
use crate::factory;
use crate::ids::{normalize_base_url, VaultId};
use crate::locks::NamedLocks;
use crate::transport::Transport;
use crate::{Result, VaultwrightError};
use std::sync::Arc;
use tracing::debug;

/// Shared state of the resource handlers.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use vaultwright::transport::mock::MockTransport;
/// use vaultwright::{Config, Provider, TransportType};
///
/// let config = Config::new(TransportType::Mock).with_subscription_id("sub-1");
/// let provider = Provider::with_transport(config, Arc::new(MockTransport::new()));
/// assert_eq!(provider.client().subscription_id(), "sub-1");
/// ```
#[derive(Debug)]
pub struct Provider {
    config: Config,
    client: KeyVaultClient,
    cache: BaseUrlCache,
    locks: NamedLocks,
}

impl Provider {
    /// Creates a provider, building the transport named by `config.transport`.
    pub fn new(config: Config) -> Result<Self> {
        crate::init();
        let transport = factory::new_transport(config.clone())?;
        Ok(Self::with_transport(config, transport))
    }

    /// Creates a provider on an existing transport.
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        let client = KeyVaultClient::new(transport, &config);
        Self {
            config,
            client,
            cache: BaseUrlCache::new(),
            locks: NamedLocks::new(),
        }
    }

    /// Typed API client.
    pub fn client(&self) -> &KeyVaultClient {
        &self.client
    }

    /// Vault base-URL cache.
    pub fn cache(&self) -> &BaseUrlCache {
        &self.cache
    }

    /// Named locks.
    pub fn locks(&self) -> &NamedLocks {
        &self.locks
    }

    /// Soft-delete behaviour.
    pub fn features(&self) -> &KeyVaultFeatures {
        &self.config.features
    }

    /// Configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Timeouts for a resource kind.
    pub fn timeouts(&self, kind: &str, defaults: OperationTimeouts) -> OperationTimeouts {
        self.config.timeouts_for(kind, defaults)
    }

    /// Data-plane base URL of a vault, from the cache or the management API.
    pub async fn base_url_for_vault(&self, id: &VaultId) -> Result<String> {
        let resource_id = id.to_string();
        if let Some(base_url) = self.cache.base_url(&resource_id).await {
            return Ok(base_url);
        }

        let vault = self
            .client
            .get_vault(id)
            .await
            .map_err(|e| VaultwrightError::op("retrieving", format!("Key Vault {resource_id:?}"), e))?;
        let vault_uri = vault.properties.vault_uri.ok_or_else(|| {
            VaultwrightError::InvalidConfig(format!("Key Vault {resource_id:?} has no vault URI"))
        })?;

        self.cache.insert(&resource_id, &vault_uri).await;
        normalize_base_url(&vault_uri)
    }

    /// Resource ID of the vault serving `base_url`, from the cache or by listing
    /// the subscription's vaults. `None` when no vault matches.
    pub async fn vault_id_from_base_url(&self, base_url: &str) -> Result<Option<VaultId>> {
        if let Some(resource_id) = self.cache.resource_id(base_url).await {
            return VaultId::parse(&resource_id).map(Some);
        }

        let wanted = normalize_base_url(base_url)?.to_ascii_lowercase();
        debug!(%base_url, "resolving vault by listing the subscription");

        let vaults = self
            .client
            .list_vaults()
            .await
            .map_err(|e| VaultwrightError::op("listing", "Key Vaults", e))?;

        for vault in vaults {
            let (Some(resource_id), Some(vault_uri)) = (vault.id, vault.properties.vault_uri) else {
                continue;
            };
            self.cache.insert(&resource_id, &vault_uri).await;

            let matches = normalize_base_url(&vault_uri)
                .map(|uri| uri.to_ascii_lowercase() == wanted)
                .unwrap_or(false);
            if matches {
                return VaultId::parse(&resource_id).map(Some);
            }
        }

        Ok(None)
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::Method;
    use crate::TransportType;
    use serde_json::json;

    const ARM: &str = "https://management.azure.com";

    fn provider(transport: Arc<MockTransport>) -> Provider {
        Provider::with_transport(
            Config::new(TransportType::Mock).with_subscription_id("sub-1"),
            transport,
        )
    }

    #[tokio::test]
    async fn test_base_url_is_cached() {
        let transport = Arc::new(MockTransport::new());
        let id = VaultId::new("sub-1", "rg", "kv1");
        transport
            .on(
                Method::Get,
                &format!("{ARM}{id}"),
                200,
                json!({"id": id.to_string(), "location": "westeurope", "properties": {"vaultUri": "https://kv1.vault.azure.net"}}),
            )
            .await;
        let provider = provider(transport.clone());

        assert_eq!(provider.base_url_for_vault(&id).await.unwrap(), "https://kv1.vault.azure.net/");
        assert_eq!(provider.base_url_for_vault(&id).await.unwrap(), "https://kv1.vault.azure.net/");
        assert_eq!(transport.count(Method::Get, &format!("{ARM}{id}")).await, 1);
    }

    #[tokio::test]
    async fn test_vault_id_from_base_url_lists_once() {
        let transport = Arc::new(MockTransport::new());
        let list = format!("{ARM}/subscriptions/sub-1/providers/Microsoft.KeyVault/vaults");
        let kv1 = VaultId::new("sub-1", "rg", "kv1");
        let kv2 = VaultId::new("sub-1", "rg", "kv2");
        transport
            .on(
                Method::Get,
                &list,
                200,
                json!({"value": [
                    {"id": kv1.to_string(), "location": "westeurope", "properties": {"vaultUri": "https://kv1.vault.azure.net/"}},
                    {"id": kv2.to_string(), "location": "westeurope", "properties": {"vaultUri": "https://kv2.vault.azure.net/"}}
                ]}),
            )
            .await;
        let provider = provider(transport.clone());

        let found = provider
            .vault_id_from_base_url("https://KV2.vault.azure.net")
            .await
            .unwrap();
        assert_eq!(found, Some(kv2));

        let cached = provider
            .vault_id_from_base_url("https://kv1.vault.azure.net/")
            .await
            .unwrap();
        assert_eq!(cached, Some(kv1));
        assert_eq!(transport.count(Method::Get, &list).await, 1);

        assert!(provider.vault_id_from_base_url("https://kv9.vault.azure.net/").await.unwrap().is_none());
    }
}
