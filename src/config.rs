//! Configuration types for provider initialization.

use crate::{Result, VaultwrightError};
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Transport type identifier.
///
/// Each variant corresponds to a transport registered with the
/// [`factory`](crate::factory). Transports must be enabled via Cargo feature flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// reqwest-based HTTPS transport with Azure AD authentication
    Http,
    /// In-memory scripted transport for tests
    Mock,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

/// Endpoints of an Azure cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudEnvironment {
    /// Environment name
    pub name: String,
    /// Azure Resource Manager endpoint, without trailing slash
    pub resource_manager_endpoint: String,
    /// Azure AD authority, without trailing slash
    pub active_directory_endpoint: String,
    /// DNS suffix of Key Vault data-plane hosts
    pub key_vault_dns_suffix: String,
    /// DNS suffix of managed HSM data-plane hosts
    pub managed_hsm_dns_suffix: String,
}

impl CloudEnvironment {
    /// Azure public cloud.
    pub fn public() -> Self {
        Self {
            name: "public".to_string(),
            resource_manager_endpoint: "https://management.azure.com".to_string(),
            active_directory_endpoint: "https://login.microsoftonline.com".to_string(),
            key_vault_dns_suffix: "vault.azure.net".to_string(),
            managed_hsm_dns_suffix: "managedhsm.azure.net".to_string(),
        }
    }

    /// Azure China cloud.
    pub fn china() -> Self {
        Self {
            name: "china".to_string(),
            resource_manager_endpoint: "https://management.chinacloudapi.cn".to_string(),
            active_directory_endpoint: "https://login.chinacloudapi.cn".to_string(),
            key_vault_dns_suffix: "vault.azure.cn".to_string(),
            managed_hsm_dns_suffix: "managedhsm.azure.cn".to_string(),
        }
    }

    /// Azure US Government cloud.
    pub fn us_government() -> Self {
        Self {
            name: "usgovernment".to_string(),
            resource_manager_endpoint: "https://management.usgovcloudapi.net".to_string(),
            active_directory_endpoint: "https://login.microsoftonline.us".to_string(),
            key_vault_dns_suffix: "vault.usgovcloudapi.net".to_string(),
            managed_hsm_dns_suffix: "managedhsm.usgovcloudapi.net".to_string(),
        }
    }

    /// Looks up an environment by name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "public" | "azurecloud" => Ok(Self::public()),
            "china" | "azurechinacloud" => Ok(Self::china()),
            "usgovernment" | "azureusgovernmentcloud" => Ok(Self::us_government()),
            other => Err(VaultwrightError::InvalidConfig(format!(
                "unknown cloud environment {other:?} (expected public, china or usgovernment)"
            ))),
        }
    }
}

impl Default for CloudEnvironment {
    fn default() -> Self {
        Self::public()
    }
}

/// Soft-delete behaviour switches (the provider "features" block).
///
/// Every switch defaults to `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyVaultFeatures {
    /// Purge a soft-deleted vault when it is destroyed
    pub purge_soft_delete_on_destroy: bool,
    /// Recover a soft-deleted vault with the same name on create
    pub recover_soft_deleted_key_vaults: bool,
    /// Purge keys when they are destroyed
    pub purge_soft_deleted_keys_on_destroy: bool,
    /// Recover soft-deleted keys on conflict
    pub recover_soft_deleted_keys: bool,
    /// Purge secrets when they are destroyed
    pub purge_soft_deleted_secrets_on_destroy: bool,
    /// Recover soft-deleted secrets on conflict
    pub recover_soft_deleted_secrets: bool,
    /// Purge certificates when they are destroyed
    pub purge_soft_deleted_certificates_on_destroy: bool,
    /// Recover soft-deleted certificates on conflict
    pub recover_soft_deleted_certificates: bool,
    /// Purge managed HSMs when they are destroyed
    pub purge_soft_deleted_hsms_on_destroy: bool,
    /// Purge managed storage accounts when they are destroyed
    pub purge_soft_deleted_storage_accounts_on_destroy: bool,
    /// Recover soft-deleted managed storage accounts and SAS definitions on conflict
    pub recover_soft_deleted_storage_accounts: bool,
}

impl Default for KeyVaultFeatures {
    fn default() -> Self {
        Self {
            purge_soft_delete_on_destroy: true,
            recover_soft_deleted_key_vaults: true,
            purge_soft_deleted_keys_on_destroy: true,
            recover_soft_deleted_keys: true,
            purge_soft_deleted_secrets_on_destroy: true,
            recover_soft_deleted_secrets: true,
            purge_soft_deleted_certificates_on_destroy: true,
            recover_soft_deleted_certificates: true,
            purge_soft_deleted_hsms_on_destroy: true,
            purge_soft_deleted_storage_accounts_on_destroy: true,
            recover_soft_deleted_storage_accounts: true,
        }
    }
}

impl KeyVaultFeatures {
    /// All recovery and purge switches turned off.
    pub fn disabled() -> Self {
        Self {
            purge_soft_delete_on_destroy: false,
            recover_soft_deleted_key_vaults: false,
            purge_soft_deleted_keys_on_destroy: false,
            recover_soft_deleted_keys: false,
            purge_soft_deleted_secrets_on_destroy: false,
            recover_soft_deleted_secrets: false,
            purge_soft_deleted_certificates_on_destroy: false,
            recover_soft_deleted_certificates: false,
            purge_soft_deleted_hsms_on_destroy: false,
            purge_soft_deleted_storage_accounts_on_destroy: false,
            recover_soft_deleted_storage_accounts: false,
        }
    }
}

/// Lifecycle operation, used to pick a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Create
    Create,
    /// Read
    Read,
    /// Update
    Update,
    /// Delete
    Delete,
}

/// Per-operation timeouts of a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTimeouts {
    /// Create timeout
    pub create: Duration,
    /// Read timeout
    pub read: Duration,
    /// Update timeout
    pub update: Duration,
    /// Delete timeout
    pub delete: Duration,
}

impl OperationTimeouts {
    /// Builds timeouts from whole minutes.
    pub const fn minutes(create: u64, read: u64, update: u64, delete: u64) -> Self {
        Self {
            create: Duration::from_secs(create * 60),
            read: Duration::from_secs(read * 60),
            update: Duration::from_secs(update * 60),
            delete: Duration::from_secs(delete * 60),
        }
    }

    /// Timeout for a single operation.
    pub fn get(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Create => self.create,
            Operation::Read => self.read,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self::minutes(30, 5, 30, 30)
    }
}

/// Service principal credentials for the client-credentials flow.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Azure AD tenant
    pub tenant_id: String,
    /// Application (client) ID
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// How requests are authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// No authentication (emulators, tests)
    #[default]
    None,
    /// OAuth2 client-credentials flow
    ClientCredentials(ClientCredentials),
    /// Fixed bearer token used for every audience
    StaticToken(String),
}

/// Configuration for creating a [`Provider`](crate::Provider).
///
/// Use the builder pattern for ergonomic configuration:
///
/// ```
/// use vaultwright::{Config, TransportType, KeyVaultFeatures};
///
/// let config = Config::new(TransportType::Http)
///     .with_subscription_id("00000000-0000-0000-0000-000000000000")
///     .with_features(KeyVaultFeatures {
///         purge_soft_delete_on_destroy: false,
///         ..Default::default()
///     })
///     .with_option("api_version.vaults", "2023-07-01");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Transport type
    pub transport: TransportType,

    /// Subscription that owns the vaults
    pub subscription_id: String,

    /// Default tenant
    pub tenant_id: Option<String>,

    /// Cloud endpoints
    pub environment: CloudEnvironment,

    /// Authentication mode
    pub auth: AuthMode,

    /// Soft-delete behaviour
    pub features: KeyVaultFeatures,

    /// Per-request HTTP timeout (default: 60 seconds)
    pub http_timeout: Duration,

    /// Timeout overrides keyed by resource kind
    pub timeouts: HashMap<String, OperationTimeouts>,

    /// Transport-specific options
    pub options: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportType::Http,
            subscription_id: String::new(),
            tenant_id: None,
            environment: CloudEnvironment::public(),
            auth: AuthMode::None,
            features: KeyVaultFeatures::default(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            timeouts: HashMap::new(),
            options: HashMap::new(),
        }
    }
}

impl Config {
    /// Creates a new configuration for the specified transport.
    ///
    /// # Example
    ///
    /// ```
    /// use vaultwright::{Config, TransportType};
    ///
    /// let config = Config::new(TransportType::Mock);
    /// assert_eq!(config.transport, TransportType::Mock);
    /// ```
    pub fn new(transport: TransportType) -> Self {
        Self {
            transport,
            ..Default::default()
        }
    }

    /// Reads configuration from the environment.
    ///
    /// Recognised variables (the `ARM_*` name wins over the `AZURE_*` one):
    ///
    /// - `ARM_SUBSCRIPTION_ID` / `AZURE_SUBSCRIPTION_ID` (required)
    /// - `ARM_TENANT_ID` / `AZURE_TENANT_ID`
    /// - `ARM_CLIENT_ID` / `AZURE_CLIENT_ID`
    /// - `ARM_CLIENT_SECRET` / `AZURE_CLIENT_SECRET`
    /// - `ARM_ACCESS_TOKEN` (static bearer token)
    /// - `ARM_ENVIRONMENT` (`public`, `china`, `usgovernment`)
    /// - `VAULTWRIGHT_HTTP_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
        };

        let subscription_id = get(&["ARM_SUBSCRIPTION_ID", "AZURE_SUBSCRIPTION_ID"]).ok_or_else(|| {
            VaultwrightError::InvalidConfig(
                "set ARM_SUBSCRIPTION_ID (or AZURE_SUBSCRIPTION_ID) to the subscription that owns the vaults"
                    .to_string(),
            )
        })?;
        let tenant_id = get(&["ARM_TENANT_ID", "AZURE_TENANT_ID"]);
        let client_id = get(&["ARM_CLIENT_ID", "AZURE_CLIENT_ID"]);
        let client_secret = get(&["ARM_CLIENT_SECRET", "AZURE_CLIENT_SECRET"]);
        let static_token = get(&["ARM_ACCESS_TOKEN"]);

        let environment = match get(&["ARM_ENVIRONMENT"]) {
            Some(name) => CloudEnvironment::from_name(&name)?,
            None => CloudEnvironment::public(),
        };

        let auth = match (static_token, &tenant_id, client_id, client_secret) {
            (Some(token), _, _, _) => AuthMode::StaticToken(token),
            (None, Some(tenant), Some(client_id), Some(client_secret)) => {
                AuthMode::ClientCredentials(ClientCredentials {
                    tenant_id: tenant.clone(),
                    client_id,
                    client_secret,
                })
            }
            (None, _, Some(_), None) | (None, _, None, Some(_)) | (None, None, Some(_), Some(_)) => {
                return Err(VaultwrightError::InvalidConfig(
                    "set both ARM_CLIENT_ID and ARM_CLIENT_SECRET (and ARM_TENANT_ID) to authenticate with a service principal"
                        .to_string(),
                ))
            }
            _ => AuthMode::None,
        };

        let http_timeout = get(&["VAULTWRIGHT_HTTP_TIMEOUT_SECS"])
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS));

        Ok(Self {
            transport: TransportType::Http,
            subscription_id,
            tenant_id,
            environment,
            auth,
            features: KeyVaultFeatures::default(),
            http_timeout,
            timeouts: HashMap::new(),
            options: HashMap::new(),
        })
    }

    /// Sets the subscription ID.
    pub fn with_subscription_id(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = subscription_id.into();
        self
    }

    /// Sets the default tenant ID.
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the cloud environment.
    pub fn with_environment(mut self, environment: CloudEnvironment) -> Self {
        self.environment = environment;
        self
    }

    /// Sets the authentication mode.
    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    /// Sets the soft-delete behaviour.
    pub fn with_features(mut self, features: KeyVaultFeatures) -> Self {
        self.features = features;
        self
    }

    /// Sets the per-request HTTP timeout.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Overrides the timeouts of one resource kind (e.g. `"key_vault_certificate"`).
    pub fn with_timeouts(mut self, kind: impl Into<String>, timeouts: OperationTimeouts) -> Self {
        self.timeouts.insert(kind.into(), timeouts);
        self
    }

    /// Adds a transport-specific option.
    ///
    /// Options understood by the HTTP transport:
    ///
    /// - `api_version.vaults`: management API version for vaults
    /// - `api_version.managed_hsms`: management API version for managed HSMs
    /// - `api_version.data_plane`: data-plane API version
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Gets a transport-specific option value.
    pub fn get_option(&self, key: &str) -> Option<&String> {
        self.options.get(key)
    }

    /// Timeouts for a resource kind, falling back to the given defaults.
    pub fn timeouts_for(&self, kind: &str, defaults: OperationTimeouts) -> OperationTimeouts {
        self.timeouts.get(kind).copied().unwrap_or(defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new(TransportType::Mock)
            .with_subscription_id("sub-1")
            .with_tenant_id("tenant-1")
            .with_option("api_version.vaults", "2023-07-01")
            .with_timeouts("key_vault", OperationTimeouts::minutes(1, 1, 1, 1));

        assert_eq!(config.transport, TransportType::Mock);
        assert_eq!(config.subscription_id, "sub-1");
        assert_eq!(config.tenant_id.as_deref(), Some("tenant-1"));
        assert_eq!(
            config.get_option("api_version.vaults"),
            Some(&"2023-07-01".to_string())
        );
        assert_eq!(
            config
                .timeouts_for("key_vault", OperationTimeouts::default())
                .create,
            Duration::from_secs(60)
        );
        assert_eq!(
            config.timeouts_for("key_vault_key", OperationTimeouts::default()),
            OperationTimeouts::default()
        );
    }

    #[test]
    fn test_transport_type_display() {
        assert_eq!(TransportType::Http.to_string(), "http");
        assert_eq!(TransportType::Mock.to_string(), "mock");
    }

    #[test]
    fn test_default_features_enable_everything() {
        let features = KeyVaultFeatures::default();
        assert!(features.purge_soft_delete_on_destroy);
        assert!(features.recover_soft_deleted_secrets);
        assert!(!KeyVaultFeatures::disabled().recover_soft_deleted_keys);
    }

    #[test]
    fn test_from_lookup_client_credentials() {
        let config = Config::from_lookup(lookup_from(&[
            ("ARM_SUBSCRIPTION_ID", "sub"),
            ("AZURE_TENANT_ID", "tenant"),
            ("ARM_CLIENT_ID", "client"),
            ("ARM_CLIENT_SECRET", "secret"),
            ("ARM_ENVIRONMENT", "china"),
            ("VAULTWRIGHT_HTTP_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.subscription_id, "sub");
        assert_eq!(config.environment, CloudEnvironment::china());
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        match config.auth {
            AuthMode::ClientCredentials(creds) => {
                assert_eq!(creds.tenant_id, "tenant");
                assert_eq!(creds.client_id, "client");
            }
            other => panic!("unexpected auth mode: {other:?}"),
        }
    }

    #[test]
    fn test_from_lookup_requires_subscription() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("ARM_SUBSCRIPTION_ID"));
    }

    #[test]
    fn test_from_lookup_rejects_half_credentials() {
        let err = Config::from_lookup(lookup_from(&[
            ("ARM_SUBSCRIPTION_ID", "sub"),
            ("ARM_CLIENT_ID", "client"),
        ]))
        .unwrap_err();
        assert!(matches!(err, VaultwrightError::InvalidConfig(_)));
    }

    #[test]
    fn test_static_token_wins() {
        let config = Config::from_lookup(lookup_from(&[
            ("ARM_SUBSCRIPTION_ID", "sub"),
            ("ARM_ACCESS_TOKEN", "abc"),
            ("ARM_CLIENT_ID", "client"),
        ]))
        .unwrap();
        assert_eq!(config.auth, AuthMode::StaticToken("abc".to_string()));
    }

    #[test]
    fn test_client_secret_is_redacted() {
        let creds = ClientCredentials {
            tenant_id: "t".into(),
            client_id: "c".into(),
            client_secret: "hunter2".into(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn test_unknown_environment() {
        assert!(CloudEnvironment::from_name("moon").is_err());
        assert_eq!(
            CloudEnvironment::from_name("AzureUSGovernmentCloud").unwrap(),
            CloudEnvironment::us_government()
        );
    }
}
