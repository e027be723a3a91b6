//! Azure AD bearer tokens.

use super::Audience;
use crate::config::{AuthMode, ClientCredentials, CloudEnvironment};
use crate::{Result, VaultwrightError};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

#[derive(Debug)]
enum Strategy {
    Anonymous,
    StaticToken { header: String },
    ClientCredentials { credentials: ClientCredentials },
}

#[derive(Debug)]
struct CachedToken {
    header: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Hands out `Authorization` header values, caching one token per audience.
#[derive(Debug)]
pub struct TokenSource {
    http: reqwest::Client,
    environment: CloudEnvironment,
    strategy: Strategy,
    cache: Mutex<HashMap<Audience, CachedToken>>,
}

impl TokenSource {
    /// Creates a token source for the configured authentication mode.
    pub fn new(http: reqwest::Client, environment: CloudEnvironment, auth: &AuthMode) -> Self {
        let strategy = match auth {
            AuthMode::None => Strategy::Anonymous,
            AuthMode::StaticToken(token) => {
                info!("azure credential: static bearer token");
                let trimmed = token.trim();
                let header = if trimmed.to_ascii_lowercase().starts_with("bearer ") {
                    trimmed.to_string()
                } else {
                    format!("Bearer {trimmed}")
                };
                Strategy::StaticToken { header }
            }
            AuthMode::ClientCredentials(credentials) => {
                info!(
                    tenant_id = %credentials.tenant_id,
                    client_id = %credentials.client_id,
                    "azure credential: client secret"
                );
                Strategy::ClientCredentials {
                    credentials: credentials.clone(),
                }
            }
        };

        Self {
            http,
            environment,
            strategy,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// OAuth2 scope of an audience in this cloud.
    pub fn scope(&self, audience: Audience) -> Option<String> {
        match audience {
            Audience::ResourceManager => Some(format!(
                "{}/.default",
                self.environment.resource_manager_endpoint.trim_end_matches('/')
            )),
            Audience::KeyVault => Some(format!("https://{}/.default", self.environment.key_vault_dns_suffix)),
            Audience::ManagedHsm => Some(format!(
                "https://{}/.default",
                self.environment.managed_hsm_dns_suffix
            )),
            Audience::None => None,
        }
    }

    /// The `Authorization` header for a request, if any.
    pub async fn authorization(&self, audience: Audience) -> Result<Option<String>> {
        let Some(scope) = self.scope(audience) else {
            return Ok(None);
        };

        match &self.strategy {
            Strategy::Anonymous => Ok(None),
            Strategy::StaticToken { header } => Ok(Some(header.clone())),
            Strategy::ClientCredentials { credentials } => {
                let mut cache = self.cache.lock().await;
                if let Some(cached) = cache.get(&audience) {
                    if Instant::now() < cached.expires_at {
                        return Ok(Some(cached.header.clone()));
                    }
                }

                let (token, expires_in) = self.request_token(credentials, &scope).await?;
                let header = format!("Bearer {token}");
                cache.insert(
                    audience,
                    CachedToken {
                        header: header.clone(),
                        expires_at: Instant::now() + expires_in,
                    },
                );
                Ok(Some(header))
            }
        }
    }

    async fn request_token(&self, credentials: &ClientCredentials, scope: &str) -> Result<(String, Duration)> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.environment.active_directory_endpoint.trim_end_matches('/'),
            credentials.tenant_id
        );
        let params = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("scope", scope),
            ("grant_type", "client_credentials"),
        ];

        debug!(%scope, "requesting access token");
        let response = self
            .http
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| VaultwrightError::Transport(format!("failed to request token: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VaultwrightError::Transport(format!(
                "Azure AD rejected client credentials ({status}): {body}"
            )));
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|e| VaultwrightError::Transport(format!("failed to parse token response: {e}")))?;

        // Refresh a minute early.
        let expires_in = payload
            .expires_in
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
            .saturating_sub(60)
            .max(60);

        Ok((payload.access_token, Duration::from_secs(expires_in)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(auth: AuthMode) -> TokenSource {
        TokenSource::new(reqwest::Client::new(), CloudEnvironment::china(), &auth)
    }

    #[test]
    fn test_scopes_follow_environment() {
        let tokens = source(AuthMode::None);
        assert_eq!(
            tokens.scope(Audience::ResourceManager).as_deref(),
            Some("https://management.chinacloudapi.cn/.default")
        );
        assert_eq!(
            tokens.scope(Audience::KeyVault).as_deref(),
            Some("https://vault.azure.cn/.default")
        );
        assert_eq!(tokens.scope(Audience::None), None);
    }

    #[tokio::test]
    async fn test_static_token_gets_bearer_prefix() {
        let tokens = source(AuthMode::StaticToken("abc".into()));
        assert_eq!(
            tokens.authorization(Audience::KeyVault).await.unwrap().as_deref(),
            Some("Bearer abc")
        );

        let prefixed = source(AuthMode::StaticToken("Bearer xyz".into()));
        assert_eq!(
            prefixed.authorization(Audience::ManagedHsm).await.unwrap().as_deref(),
            Some("Bearer xyz")
        );
        assert_eq!(prefixed.authorization(Audience::None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_anonymous() {
        let tokens = source(AuthMode::None);
        assert_eq!(tokens.authorization(Audience::ResourceManager).await.unwrap(), None);
    }
}
