//! Typed Key Vault client.
//!
//! [`KeyVaultClient`] builds management-plane and data-plane URLs, sends them
//! through a [`Transport`] and turns HTTP statuses into typed errors: 404 is
//! [`VaultwrightError::NotFound`], 409 is [`VaultwrightError::Conflict`], any
//! other non-2xx is [`VaultwrightError::Api`] carrying Azure's error code and
//! message.

pub mod models;

mod items;
mod vaults;

use crate::config::{CloudEnvironment, Config};
use crate::ids::normalize_base_url;
use crate::transport::{ApiRequest, ApiResponse, Audience, Method, Transport};
use crate::{Result, VaultwrightError};
use models::ErrorResponse;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::trace;

/// Default management API version for vaults.
pub const DEFAULT_VAULTS_API_VERSION: &str = "2023-07-01";
/// Default management API version for managed HSMs.
pub const DEFAULT_MANAGED_HSMS_API_VERSION: &str = "2023-07-01";
/// Default data-plane API version.
pub const DEFAULT_DATA_PLANE_API_VERSION: &str = "7.4";

/// Client for the Key Vault REST APIs.
#[derive(Clone)]
pub struct KeyVaultClient {
    transport: Arc<dyn Transport>,
    environment: CloudEnvironment,
    subscription_id: String,
    vaults_api_version: String,
    managed_hsms_api_version: String,
    data_plane_api_version: String,
}

impl std::fmt::Debug for KeyVaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVaultClient")
            .field("transport", &self.transport.name())
            .field("environment", &self.environment.name)
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

impl KeyVaultClient {
    /// Creates a client; API versions can be overridden through config options.
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Self {
        let option = |key: &str, default: &str| {
            config
                .get_option(key)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            transport,
            environment: config.environment.clone(),
            subscription_id: config.subscription_id.clone(),
            vaults_api_version: option("api_version.vaults", DEFAULT_VAULTS_API_VERSION),
            managed_hsms_api_version: option("api_version.managed_hsms", DEFAULT_MANAGED_HSMS_API_VERSION),
            data_plane_api_version: option("api_version.data_plane", DEFAULT_DATA_PLANE_API_VERSION),
        }
    }

    /// Subscription the client manages.
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Cloud endpoints.
    pub fn environment(&self) -> &CloudEnvironment {
        &self.environment
    }

    /// Underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn arm_url(&self, path: &str, api_version: &str) -> String {
        format!(
            "{}{}?api-version={}",
            self.environment.resource_manager_endpoint.trim_end_matches('/'),
            path,
            api_version
        )
    }

    /// Data-plane URL without query string.
    pub fn data_plane_url(&self, base_url: &str, path: &str) -> String {
        let base = normalize_base_url(base_url)
            .unwrap_or_else(|_| format!("{}/", base_url.trim_end_matches('/')));
        format!("{}{}", base, path.trim_start_matches('/'))
    }

    pub(crate) fn data_url(&self, base_url: &str, path: &str) -> String {
        format!(
            "{}?api-version={}",
            self.data_plane_url(base_url, path),
            self.data_plane_api_version
        )
    }

    /// Token audience of a data-plane host.
    pub(crate) fn data_plane_audience(&self, base_url: &str) -> Audience {
        let host = url::Url::parse(base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_default();
        if host.ends_with(&self.environment.managed_hsm_dns_suffix.to_ascii_lowercase()) {
            Audience::ManagedHsm
        } else {
            Audience::KeyVault
        }
    }

    /// Sends a request and maps non-2xx statuses to errors.
    pub async fn execute(
        &self,
        method: Method,
        url: String,
        audience: Audience,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse> {
        trace!(%method, %url, "sending request");
        let response = self
            .transport
            .send(ApiRequest {
                method,
                url,
                audience,
                body,
            })
            .await?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(error_from_response(&response))
        }
    }

    pub(crate) async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        url: String,
        audience: Audience,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let response = self.execute(method, url, audience, body).await?;
        let text = if response.body.trim().is_empty() {
            "{}"
        } else {
            response.body.as_str()
        };
        Ok(serde_json::from_str(text)?)
    }

    pub(crate) async fn call_no_content(
        &self,
        method: Method,
        url: String,
        audience: Audience,
        body: Option<serde_json::Value>,
    ) -> Result<()> {
        self.execute(method, url, audience, body).await.map(|_| ())
    }

    /// GETs a URL and succeeds on any 2xx; used to check that an item is readable.
    pub async fn probe(&self, url: &str, audience: Audience) -> Result<()> {
        let url = if url.contains("api-version=") {
            url.to_string()
        } else {
            format!("{url}?api-version={}", self.data_plane_api_version)
        };
        self.call_no_content(Method::Get, url, audience, None).await
    }
}

pub(crate) fn to_body<T: Serialize>(value: &T) -> Result<Option<serde_json::Value>> {
    Ok(Some(serde_json::to_value(value)?))
}

fn error_from_response(response: &ApiResponse) -> VaultwrightError {
    let detail = serde_json::from_str::<ErrorResponse>(&response.body)
        .ok()
        .and_then(|r| r.error);

    let (code, message) = match detail {
        Some(detail) => (detail.code, detail.message),
        None => (String::new(), response.body.trim().to_string()),
    };
    let message = if message.is_empty() {
        format!("status {}", response.status)
    } else {
        message
    };

    match response.status {
        404 => VaultwrightError::NotFound(message),
        409 => VaultwrightError::Conflict(message),
        status => VaultwrightError::Api {
            status,
            code,
            message,
        },
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::TransportType;
    use serde_json::json;

    fn client(transport: Arc<MockTransport>) -> KeyVaultClient {
        let config = Config::new(TransportType::Mock)
            .with_subscription_id("sub-1")
            .with_option("api_version.data_plane", "7.5");
        KeyVaultClient::new(transport, &config)
    }

    #[test]
    fn test_error_mapping() {
        let not_found = error_from_response(&ApiResponse {
            status: 404,
            body: json!({"error": {"code": "SecretNotFound", "message": "A secret with (name/id) s1 was not found"}}).to_string(),
        });
        assert!(matches!(not_found, VaultwrightError::NotFound(ref m) if m.contains("s1 was not found")));

        let conflict = error_from_response(&ApiResponse {
            status: 409,
            body: json!({"error": {"code": "Conflict", "message": "deleted but recoverable"}}).to_string(),
        });
        assert!(conflict.is_conflict());

        let api = error_from_response(&ApiResponse {
            status: 400,
            body: json!({"error": {"code": "BadParameter", "message": "bad"}}).to_string(),
        });
        assert!(matches!(api, VaultwrightError::Api { status: 400, ref code, .. } if code == "BadParameter"));

        let bare = error_from_response(&ApiResponse {
            status: 503,
            body: String::new(),
        });
        assert_eq!(bare.to_string(), "unexpected status 503 (): status 503");
    }

    #[test]
    fn test_urls() {
        let client = client(Arc::new(MockTransport::new()));
        assert_eq!(
            client.data_url("https://kv1.vault.azure.net", "secrets/s1"),
            "https://kv1.vault.azure.net/secrets/s1?api-version=7.5"
        );
        assert_eq!(
            client.arm_url("/subscriptions/sub-1/providers/Microsoft.KeyVault/vaults", "2023-07-01"),
            "https://management.azure.com/subscriptions/sub-1/providers/Microsoft.KeyVault/vaults?api-version=2023-07-01"
        );
        assert_eq!(
            client.data_plane_audience("https://hsm1.managedhsm.azure.net/"),
            Audience::ManagedHsm
        );
        assert_eq!(client.data_plane_audience("https://kv1.vault.azure.net/"), Audience::KeyVault);
    }

    #[tokio::test]
    async fn test_call_parses_body_and_empty_body() {
        let transport = Arc::new(MockTransport::new());
        transport
            .on(Method::Get, "https://kv1.vault.azure.net/secrets/s1", 200, json!({"value": "v"}))
            .await;
        transport
            .on_empty(Method::Delete, "https://kv1.vault.azure.net/secrets/s1", 200)
            .await;
        let client = client(transport.clone());

        let secret: models::SecretBundle = client
            .call(
                Method::Get,
                client.data_url("https://kv1.vault.azure.net/", "secrets/s1"),
                Audience::KeyVault,
                None,
            )
            .await
            .unwrap();
        assert_eq!(secret.value.as_deref(), Some("v"));

        let deleted: models::DeletedItem = client
            .call(
                Method::Delete,
                client.data_url("https://kv1.vault.azure.net/", "secrets/s1"),
                Audience::KeyVault,
                None,
            )
            .await
            .unwrap();
        assert_eq!(deleted, models::DeletedItem::default());
    }

    #[tokio::test]
    async fn test_probe() {
        let transport = Arc::new(MockTransport::new());
        transport
            .on_empty(Method::Get, "https://kv1.vault.azure.net/secrets/s1", 200)
            .await;
        let client = client(transport.clone());

        client
            .probe("https://kv1.vault.azure.net/secrets/s1", Audience::KeyVault)
            .await
            .unwrap();
        let err = client
            .probe("https://kv1.vault.azure.net/secrets/s2", Audience::KeyVault)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let sent = transport.requests().await;
        assert!(sent[0].url.ends_with("?api-version=7.5"));
    }
}
