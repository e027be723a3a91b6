//! End-to-end handler flows against the scripted mock transport.

#![cfg(feature = "mock")]

use serde_json::{json, Value};
use std::sync::Arc;
use vaultwright::ids::VaultId;
use vaultwright::resources::key::KeyConfig;
use vaultwright::resources::secret::SecretConfig;
use vaultwright::resources::{KeyResource, Resource, SecretResource};
use vaultwright::transport::mock::MockTransport;
use vaultwright::transport::Method;
use vaultwright::{Config, KeyVaultFeatures, Provider, TransportType, VaultwrightError};

const ARM: &str = "https://management.azure.com";
const BASE: &str = "https://kv1.vault.azure.net/";
const SECRET_URL: &str = "https://kv1.vault.azure.net/secrets/api-key";

fn vault_id() -> VaultId {
    VaultId::new("sub-1", "rg", "kv1")
}

fn vault_url() -> String {
    format!("{ARM}{}", vault_id())
}

fn vault_body(purge_protection: bool) -> Value {
    json!({
        "id": vault_id().to_string(),
        "name": "kv1",
        "location": "westeurope",
        "properties": {
            "tenantId": "00000000-0000-0000-0000-000000000001",
            "vaultUri": BASE,
            "enableSoftDelete": true,
            "enablePurgeProtection": purge_protection
        }
    })
}

fn secret_body() -> Value {
    json!({
        "id": format!("{SECRET_URL}/0123456789abcdef"),
        "value": "sk-secret123",
        "attributes": {"enabled": true}
    })
}

fn provider(transport: Arc<MockTransport>) -> Arc<Provider> {
    let config = Config::new(TransportType::Mock)
        .with_subscription_id("sub-1")
        .with_features(KeyVaultFeatures::default());
    Arc::new(Provider::with_transport(config, transport))
}

#[tokio::test]
async fn test_create_resolves_vault_uri_once() {
    let transport = Arc::new(MockTransport::new());
    transport.on(Method::Get, &vault_url(), 200, vault_body(false)).await;
    transport.on_empty(Method::Get, SECRET_URL, 404).await;
    transport.on(Method::Get, SECRET_URL, 200, secret_body()).await;
    transport.on(Method::Put, SECRET_URL, 200, secret_body()).await;

    let provider = provider(transport.clone());
    let secrets = SecretResource::new(provider.clone());
    let state = secrets
        .create(&SecretConfig::new(vault_id().to_string(), "api-key", "sk-secret123"))
        .await
        .unwrap();

    assert_eq!(state.versionless_id, SECRET_URL);
    assert_eq!(state.value, "sk-secret123");
    assert_eq!(state.key_vault_id, vault_id().to_string());
    assert_eq!(provider.cache().base_url(&vault_id().to_string()).await.as_deref(), Some(BASE));

    let put = transport.requests_to(Method::Put, SECRET_URL).await;
    assert_eq!(put[0].body.as_ref().unwrap()["value"], "sk-secret123");
}

#[tokio::test]
async fn test_read_resolves_vault_by_listing_subscription() {
    let transport = Arc::new(MockTransport::new());
    transport
        .on(
            Method::Get,
            &format!("{ARM}/subscriptions/sub-1/providers/Microsoft.KeyVault/vaults"),
            200,
            json!({"value": [vault_body(false)]}),
        )
        .await;
    transport.on(Method::Get, &vault_url(), 200, vault_body(false)).await;
    transport.on(Method::Get, SECRET_URL, 200, secret_body()).await;

    let secrets = SecretResource::new(provider(transport));
    let state = secrets.read(SECRET_URL).await.unwrap().unwrap();
    assert_eq!(state.key_vault_id, vault_id().to_string());
    assert_eq!(state.version, "0123456789abcdef");
}

#[tokio::test]
async fn test_read_of_item_in_deleted_vault_is_absent() {
    let transport = Arc::new(MockTransport::new());
    transport
        .on(
            Method::Get,
            &format!("{ARM}/subscriptions/sub-1/providers/Microsoft.KeyVault/vaults"),
            200,
            json!({"value": []}),
        )
        .await;

    let secrets = SecretResource::new(provider(transport));
    assert!(secrets.read(SECRET_URL).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_delete_purges_when_vault_allows_it() {
    let transport = Arc::new(MockTransport::new());
    transport.on(Method::Get, &vault_url(), 200, vault_body(false)).await;
    transport.on_empty(Method::Delete, SECRET_URL, 200).await;
    transport.on_empty(Method::Get, SECRET_URL, 404).await;
    let deleted = "https://kv1.vault.azure.net/deletedsecrets/api-key";
    transport.on_empty(Method::Delete, deleted, 204).await;
    transport.on_empty(Method::Get, deleted, 404).await;

    let provider = provider(transport.clone());
    provider.cache().insert(&vault_id().to_string(), BASE).await;
    SecretResource::new(provider).delete(SECRET_URL).await.unwrap();

    assert_eq!(transport.count(Method::Delete, SECRET_URL).await, 1);
    assert_eq!(transport.count(Method::Delete, deleted).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_delete_skips_purge_under_purge_protection() {
    let transport = Arc::new(MockTransport::new());
    transport.on(Method::Get, &vault_url(), 200, vault_body(true)).await;
    transport.on_empty(Method::Delete, SECRET_URL, 200).await;
    transport.on_empty(Method::Get, SECRET_URL, 404).await;

    let provider = provider(transport.clone());
    provider.cache().insert(&vault_id().to_string(), BASE).await;
    SecretResource::new(provider).delete(SECRET_URL).await.unwrap();

    assert_eq!(
        transport
            .count(Method::Delete, "https://kv1.vault.azure.net/deletedsecrets/api-key")
            .await,
        0
    );
}

#[tokio::test]
async fn test_existing_key_is_refused() {
    let transport = Arc::new(MockTransport::new());
    transport.on(Method::Get, &vault_url(), 200, vault_body(false)).await;
    transport
        .on(
            Method::Get,
            "https://kv1.vault.azure.net/keys/signing",
            200,
            json!({"key": {"kid": "https://kv1.vault.azure.net/keys/signing/abc", "kty": "RSA"}}),
        )
        .await;

    let mut config = KeyConfig::new(vault_id().to_string(), "signing", "RSA");
    config.key_size = Some(2048);
    let keys = KeyResource::new(provider(transport.clone()));
    let err = keys.create(&config).await.unwrap_err();

    assert!(matches!(err, VaultwrightError::AlreadyExists { .. }));
    assert_eq!(transport.count(Method::Post, "https://kv1.vault.azure.net/keys/signing/create").await, 0);
}
