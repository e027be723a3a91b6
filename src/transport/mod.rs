//! HTTP transports.
//!
//! A [`Transport`] moves one request to Azure and hands back the raw status and
//! body. Status interpretation (404, 409, error payloads) lives in
//! [`KeyVaultClient`](crate::client::KeyVaultClient), so every transport behaves
//! the same way towards the resource handlers.

use crate::Result;
use async_trait::async_trait;
use std::fmt;

#[cfg(feature = "http")]
pub mod auth;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "mock")]
pub mod mock;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// PUT
    Put,
    /// POST
    Post,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Token audience a request must be authorised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    /// Azure Resource Manager (vaults, managed HSMs, deleted vaults)
    ResourceManager,
    /// Key Vault data plane
    KeyVault,
    /// Managed HSM data plane
    ManagedHsm,
    /// Unauthenticated request
    None,
}

/// One outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Method
    pub method: Method,
    /// Absolute URL, including the `api-version` query
    pub url: String,
    /// Token audience
    pub audience: Audience,
    /// JSON body
    pub body: Option<serde_json::Value>,
}

/// Raw response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status
    pub status: u16,
    /// Response body (may be empty)
    pub body: String,
}

impl ApiResponse {
    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests to Azure.
///
/// Implementations must be `Send + Sync`; one transport is shared by every
/// resource handler of a [`Provider`](crate::Provider).
///
/// Only failures to complete the exchange (DNS, TLS, timeouts, token
/// acquisition) are errors; any HTTP status, including 4xx and 5xx, is returned
/// as an [`ApiResponse`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name ("http", "mock").
    fn name(&self) -> &str;

    /// Sends one request.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// Registers all compiled transports with the factory.
pub fn register_all() {
    #[cfg(feature = "mock")]
    mock::register();

    #[cfg(feature = "http")]
    http::register();
}
