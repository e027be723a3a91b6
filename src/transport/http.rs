//! reqwest-based transport.

use super::auth::TokenSource;
use super::{ApiRequest, ApiResponse, Method, Transport};
use crate::{Config, Result, VaultwrightError};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use std::sync::Arc;
use tracing::debug;

/// HTTPS transport authenticating against Azure AD.
///
/// # Example
///
/// ```no_run
/// use vaultwright::transport::http::HttpTransport;
/// use vaultwright::Config;
///
/// # fn main() -> vaultwright::Result<()> {
/// let config = Config::from_env()?;
/// let transport = HttpTransport::new(&config)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    tokens: TokenSource,
}

impl HttpTransport {
    /// Builds the transport from the provider configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| VaultwrightError::Transport(format!("failed to build HTTP client: {e}")))?;
        let tokens = TokenSource::new(client.clone(), config.environment.clone(), &config.auth);

        Ok(Self { client, tokens })
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Put => reqwest::Method::PUT,
        Method::Post => reqwest::Method::POST,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut builder = self
            .client
            .request(reqwest_method(request.method), &request.url)
            .header(ACCEPT, "application/json");

        if let Some(header) = self.tokens.authorization(request.audience).await? {
            builder = builder.header(AUTHORIZATION, header);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            VaultwrightError::Transport(format!("{} {}: {e}", request.method, request.url))
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            VaultwrightError::Transport(format!("reading response of {} {}: {e}", request.method, request.url))
        })?;

        debug!(method = %request.method, url = %request.url, status, "azure request");
        Ok(ApiResponse { status, body })
    }
}

/// Registers the HTTP transport with the factory.
pub fn register() {
    crate::factory::register_transport("http", |cfg| {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&cfg)?);
        Ok(transport)
    });
}
