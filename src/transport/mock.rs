//! Mock transport for testing.
//!
//! Replies are scripted per `(method, url)`; the query string is ignored when
//! matching, so scripts do not need to spell out `api-version`. Each scripted
//! reply is used once, except the last one for a route, which repeats. A
//! request with no script gets a 404.

use super::{ApiRequest, ApiResponse, Method, Transport};
use crate::{Result, VaultwrightError};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
enum MockReply {
    Response(ApiResponse),
    TransportError(String),
}

/// In-memory transport with scripted replies, error injection and a request log.
///
/// # Example
///
/// ```
/// use vaultwright::transport::mock::MockTransport;
/// use vaultwright::transport::{ApiRequest, Audience, Method, Transport};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> vaultwright::Result<()> {
///     let transport = MockTransport::new();
///     transport
///         .on(Method::Get, "https://kv1.vault.azure.net/secrets/s1", 200, json!({"value": "v"}))
///         .await;
///
///     let response = transport
///         .send(ApiRequest {
///             method: Method::Get,
///             url: "https://kv1.vault.azure.net/secrets/s1?api-version=7.4".into(),
///             audience: Audience::KeyVault,
///             body: None,
///         })
///         .await?;
///     assert_eq!(response.status, 200);
///     assert_eq!(transport.count(Method::Get, "https://kv1.vault.azure.net/secrets/s1").await, 1);
///     Ok(())
/// }
/// ```
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<MockReply>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

fn route_key(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}

impl MockTransport {
    /// Creates a transport with no scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a JSON reply.
    pub async fn on(&self, method: Method, url: &str, status: u16, body: impl Serialize) {
        let body = serde_json::to_string(&body).unwrap_or_default();
        self.push(method, url, MockReply::Response(ApiResponse { status, body }))
            .await;
    }

    /// Scripts a reply with an empty body.
    pub async fn on_empty(&self, method: Method, url: &str, status: u16) {
        self.push(
            method,
            url,
            MockReply::Response(ApiResponse {
                status,
                body: String::new(),
            }),
        )
        .await;
    }

    /// Scripts an Azure error reply (`{"error": {"code", "message"}}`).
    pub async fn on_api_error(&self, method: Method, url: &str, status: u16, code: &str, message: &str) {
        self.on(method, url, status, json!({"error": {"code": code, "message": message}}))
            .await;
    }

    /// Scripts a transport failure (the request never completes).
    pub async fn on_transport_error(&self, method: Method, url: &str, message: &str) {
        self.push(method, url, MockReply::TransportError(message.to_string()))
            .await;
    }

    async fn push(&self, method: Method, url: &str, reply: MockReply) {
        let mut routes = self.routes.lock().await;
        routes
            .entry((method, route_key(url)))
            .or_default()
            .push_back(reply);
    }

    /// Every request sent so far, in order.
    pub async fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().await.clone()
    }

    /// Requests sent to one route.
    pub async fn requests_to(&self, method: Method, url: &str) -> Vec<ApiRequest> {
        let key = route_key(url);
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.method == method && route_key(&r.url) == key)
            .cloned()
            .collect()
    }

    /// Number of requests sent to one route.
    pub async fn count(&self, method: Method, url: &str) -> usize {
        self.requests_to(method, url).await.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let key = (request.method, route_key(&request.url));
        self.requests.lock().await.push(request);

        let reply = {
            let mut routes = self.routes.lock().await;
            match routes.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(MockReply::Response(response)) => Ok(response),
            Some(MockReply::TransportError(message)) => Err(VaultwrightError::Transport(message)),
            None => Ok(ApiResponse {
                status: 404,
                body: json!({"error": {"code": "NotFound", "message": format!("no mock reply for {} {}", key.0, key.1)}})
                    .to_string(),
            }),
        }
    }
}

/// Registers the mock transport with the factory.
pub fn register() {
    crate::factory::register_transport("mock", |_cfg| {
        let transport: Arc<dyn Transport> = Arc::new(MockTransport::new());
        Ok(transport)
    });
}
