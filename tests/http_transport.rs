//! The reqwest transport against a local wiremock server standing in for both
//! Azure AD, the management API and the vault's data plane.

#![cfg(feature = "http")]

use serde_json::json;
use std::sync::Arc;
use vaultwright::config::{AuthMode, ClientCredentials, CloudEnvironment};
use vaultwright::ids::VaultId;
use vaultwright::resources::secret::SecretConfig;
use vaultwright::resources::{Resource, SecretResource};
use vaultwright::{Config, KeyVaultFeatures, Provider, TransportType, VaultwrightError};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn vault_id() -> VaultId {
    VaultId::new("sub-1", "rg", "kv1")
}

fn config(server: &MockServer, auth: AuthMode) -> Config {
    let environment = CloudEnvironment {
        name: "local".to_string(),
        resource_manager_endpoint: server.uri(),
        active_directory_endpoint: server.uri(),
        key_vault_dns_suffix: "vault.azure.net".to_string(),
        managed_hsm_dns_suffix: "managedhsm.azure.net".to_string(),
    };
    Config::new(TransportType::Http)
        .with_subscription_id("sub-1")
        .with_environment(environment)
        .with_auth(auth)
        .with_features(KeyVaultFeatures::default())
}

async fn mount_vault(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(vault_id().to_string()))
        .and(query_param("api-version", "2023-07-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": vault_id().to_string(),
            "location": "westeurope",
            "properties": {"vaultUri": format!("{}/", server.uri()), "enableSoftDelete": true}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_secret_create_with_client_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-1",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;
    mount_vault(&server).await;

    let secret_id = format!("{}/secrets/api-key/0123456789abcdef", server.uri());
    let secret_body = json!({"id": secret_id, "value": "sk-secret123", "attributes": {"enabled": true}});
    Mock::given(method("GET"))
        .and(path("/secrets/api-key"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": "SecretNotFound", "message": "A secret with (name/id) api-key was not found"}
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/secrets/api-key"))
        .and(query_param("api-version", "7.4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(secret_body.clone()))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/secrets/api-key"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(secret_body))
        .expect(1)
        .mount(&server)
        .await;

    let auth = AuthMode::ClientCredentials(ClientCredentials {
        tenant_id: "tenant-1".to_string(),
        client_id: "client-1".to_string(),
        client_secret: "shh".to_string(),
    });
    let provider = Arc::new(Provider::new(config(&server, auth)).unwrap());
    let state = SecretResource::new(provider)
        .create(&SecretConfig::new(vault_id().to_string(), "api-key", "sk-secret123"))
        .await
        .unwrap();

    assert_eq!(state.version, "0123456789abcdef");
    assert_eq!(state.value, "sk-secret123");
}

#[tokio::test]
async fn test_api_errors_keep_status_and_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(vault_id().to_string()))
        .and(header("authorization", "Bearer static-token"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"code": "AuthorizationFailed", "message": "no access"}
        })))
        .mount(&server)
        .await;

    let provider = Provider::new(config(&server, AuthMode::StaticToken("static-token".into()))).unwrap();
    let err = provider.base_url_for_vault(&vault_id()).await.unwrap_err();

    assert!(err.is_forbidden());
    assert!(matches!(
        err.root(),
        VaultwrightError::Api { status: 403, code, .. } if code == "AuthorizationFailed"
    ));
}

#[tokio::test]
async fn test_rejected_credentials_are_transport_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
        .mount(&server)
        .await;

    let auth = AuthMode::ClientCredentials(ClientCredentials {
        tenant_id: "tenant-1".to_string(),
        client_id: "client-1".to_string(),
        client_secret: "wrong".to_string(),
    });
    let provider = Provider::new(config(&server, auth)).unwrap();
    let err = provider.base_url_for_vault(&vault_id()).await.unwrap_err();

    assert!(matches!(err.root(), VaultwrightError::Transport(msg) if msg.contains("invalid_client")));
}
