//! Registry mapping a [`TransportType`](crate::TransportType) name to the
//! function that builds it.
//!
//! [`crate::init`] fills it with the transports compiled in (`mock`, `http`);
//! [`Provider::new`](crate::Provider::new) reads it. Tests and embedders can
//! add their own, e.g. a recording transport wrapped around `http`.

use crate::transport::Transport;
use crate::{Config, Result, VaultwrightError};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;

/// Builds a transport from the provider configuration.
pub type TransportFactory = fn(Config) -> Result<Arc<dyn Transport>>;

static TRANSPORT_REGISTRY: OnceLock<RwLock<HashMap<String, TransportFactory>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, TransportFactory>> {
    TRANSPORT_REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers `factory` under `name`, replacing an earlier registration.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use vaultwright::factory::register_transport;
/// use vaultwright::transport::http::HttpTransport;
/// use vaultwright::transport::Transport;
/// use vaultwright::{Config, Result};
///
/// // same wire behaviour as "http", registered under another name
/// fn pinned_http(config: Config) -> Result<Arc<dyn Transport>> {
///     Ok(Arc::new(HttpTransport::new(&config)?))
/// }
///
/// register_transport("pinned-http", pinned_http);
/// ```
pub fn register_transport(name: &str, factory: TransportFactory) {
    let mut reg = registry().write().unwrap_or_else(|poisoned| poisoned.into_inner());
    reg.insert(name.to_string(), factory);
}

/// Names of the registered transports, sorted.
pub fn registered_transports() -> Vec<String> {
    let reg = registry().read().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut names: Vec<String> = reg.keys().cloned().collect();
    names.sort();
    names
}

/// Builds the transport named by `config.transport`.
///
/// # Errors
///
/// - the name is not registered; the message lists what is, which is empty
///   when neither `init()` nor `Provider::new` has run, and lacks `http` when
///   the `http` feature is off
/// - the factory itself fails, e.g. the reqwest client cannot be built
pub fn new_transport(config: Config) -> Result<Arc<dyn Transport>> {
    let name = config.transport.to_string();

    let factory = {
        let reg = registry().read().unwrap_or_else(|poisoned| poisoned.into_inner());
        reg.get(&name).copied()
    };
    let Some(factory) = factory else {
        return Err(VaultwrightError::InvalidConfig(format!(
            "unknown transport {name:?} (registered: [{}]); is the '{name}' feature enabled?",
            registered_transports().join(", ")
        )));
    };

    debug!(transport = %name, "building transport");
    factory(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportType;

    fn failing_factory(_cfg: Config) -> Result<Arc<dyn Transport>> {
        Err(VaultwrightError::Transport("no network in tests".into()))
    }

    #[test]
    fn test_registration_is_listed() {
        register_transport("failing", failing_factory);
        assert!(registered_transports().contains(&"failing".to_string()));
    }

    #[test]
    #[cfg(feature = "mock")]
    fn test_registered_mock_transport() {
        crate::init();
        let transport = new_transport(Config::new(TransportType::Mock)).unwrap();
        assert_eq!(transport.name(), "mock");
    }

    #[test]
    #[cfg(not(feature = "http"))]
    fn test_unknown_transport_names_feature() {
        let err = new_transport(Config::new(TransportType::Http)).err().unwrap();

        assert!(matches!(err, VaultwrightError::InvalidConfig(_)));
        let message = err.to_string();
        assert!(message.contains("unknown transport \"http\""));
        assert!(message.contains("'http' feature"));
    }
}
