//! Certificate issuers.

use super::{owning_vault, Resource, NESTED_ITEM_TIMEOUTS};
use crate::client::models::{AdministratorDetails, IssuerBundle, IssuerCredentials, OrganizationDetails};
use crate::config::OperationTimeouts;
use crate::ids::{normalize_base_url, CertificateIssuerId, VaultId};
use crate::validation::validate_nested_item_name;
use crate::{Provider, Result, VaultwrightError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Issuer providers the vault can enrol with.
pub const ISSUER_PROVIDERS: &[&str] = &[
    "DigiCert",
    "GlobalSign",
    "OneCertV2-PrivateCA",
    "OneCertV2-PublicCA",
    "SslAdminV2",
];

/// Issuer administrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Administrator {
    /// E-mail address
    pub email_address: String,
    /// First name
    pub first_name: Option<String>,
    /// Last name
    pub last_name: Option<String>,
    /// Phone
    pub phone: Option<String>,
}

/// Desired certificate issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateIssuerConfig {
    /// Resource ID of the owning vault
    pub key_vault_id: String,
    /// Issuer name
    pub name: String,
    /// One of [`ISSUER_PROVIDERS`]
    pub provider_name: String,
    /// Account at the provider
    pub account_id: Option<String>,
    /// Password of the account
    pub password: Option<String>,
    /// Organisation at the provider
    pub org_id: Option<String>,
    /// Administrators
    pub admins: Vec<Administrator>,
}

impl CertificateIssuerConfig {
    fn validate(&self) -> Result<()> {
        validate_nested_item_name(&self.name)?;
        if !ISSUER_PROVIDERS.contains(&self.provider_name.as_str()) {
            return Err(VaultwrightError::InvalidConfig(format!(
                "provider_name must be one of {}, got {:?}",
                ISSUER_PROVIDERS.join(", "),
                self.provider_name
            )));
        }
        if self.admins.iter().any(|a| a.email_address.is_empty()) {
            return Err(VaultwrightError::InvalidConfig(
                "admin.email_address must not be empty".into(),
            ));
        }
        Ok(())
    }

    fn to_bundle(&self) -> IssuerBundle {
        let credentials = (self.account_id.is_some() || self.password.is_some()).then(|| IssuerCredentials {
            account_id: self.account_id.clone(),
            pwd: self.password.clone(),
        });
        let org_details = (self.org_id.is_some() || !self.admins.is_empty()).then(|| OrganizationDetails {
            id: self.org_id.clone(),
            admin_details: self
                .admins
                .iter()
                .map(|admin| AdministratorDetails {
                    first_name: admin.first_name.clone(),
                    last_name: admin.last_name.clone(),
                    email: admin.email_address.clone(),
                    phone: admin.phone.clone(),
                })
                .collect(),
        });
        IssuerBundle {
            id: None,
            provider: self.provider_name.clone(),
            credentials,
            org_details,
        }
    }
}

/// Observed certificate issuer. The password is write-only and never read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateIssuerState {
    /// Issuer ID
    pub id: String,
    /// Resource ID of the owning vault
    pub key_vault_id: String,
    /// Issuer name
    pub name: String,
    /// Provider
    pub provider_name: String,
    /// Account at the provider
    pub account_id: Option<String>,
    /// Organisation at the provider
    pub org_id: Option<String>,
    /// Administrators
    pub admins: Vec<Administrator>,
}

fn flatten(id: &CertificateIssuerId, vault_id: &VaultId, issuer: IssuerBundle) -> CertificateIssuerState {
    let org = issuer.org_details.unwrap_or_default();
    CertificateIssuerState {
        id: id.to_string(),
        key_vault_id: vault_id.to_string(),
        name: id.name.clone(),
        provider_name: issuer.provider,
        account_id: issuer.credentials.and_then(|c| c.account_id),
        org_id: org.id,
        admins: org
            .admin_details
            .into_iter()
            .map(|admin| Administrator {
                email_address: admin.email,
                first_name: admin.first_name,
                last_name: admin.last_name,
                phone: admin.phone,
            })
            .collect(),
    }
}

/// Certificate issuer handler.
pub struct CertificateIssuerResource {
    provider: Arc<Provider>,
}

impl CertificateIssuerResource {
    /// Creates the handler.
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Resource for CertificateIssuerResource {
    type Config = CertificateIssuerConfig;
    type State = CertificateIssuerState;

    fn kind(&self) -> &'static str {
        "key_vault_certificate_issuer"
    }

    fn default_timeouts(&self) -> OperationTimeouts {
        NESTED_ITEM_TIMEOUTS
    }

    fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn create(&self, config: &CertificateIssuerConfig) -> Result<CertificateIssuerState> {
        config.validate()?;
        let vault_id = VaultId::parse(&config.key_vault_id)?;
        let base_url = self.provider.base_url_for_vault(&vault_id).await?;
        let id = CertificateIssuerId {
            base_url: normalize_base_url(&base_url)?,
            name: config.name.clone(),
        };
        let client = self.provider.client();

        match client.get_certificate_issuer(&id.base_url, &id.name).await {
            Ok(_) => return Err(VaultwrightError::already_exists(self.kind(), id.to_string())),
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                return Err(VaultwrightError::op(
                    "checking for presence of existing",
                    format!("Certificate Issuer {:?} (Key Vault {:?})", id.name, id.base_url),
                    err,
                ))
            }
        }

        let issuer = client
            .set_certificate_issuer(&id.base_url, &id.name, &config.to_bundle())
            .await
            .map_err(|e| VaultwrightError::op("creating", format!("Certificate Issuer {:?}", id.name), e))?;
        info!(issuer = %id, "created certificate issuer");
        Ok(flatten(&id, &vault_id, issuer))
    }

    async fn read(&self, id: &str) -> Result<Option<CertificateIssuerState>> {
        let id = CertificateIssuerId::parse(id)?;
        let Some((vault_id, _)) = owning_vault(&self.provider, &id.base_url).await? else {
            return Ok(None);
        };

        match self.provider.client().get_certificate_issuer(&id.base_url, &id.name).await {
            Ok(issuer) => Ok(Some(flatten(&id, &vault_id, issuer))),
            Err(err) if err.is_not_found() => {
                debug!(issuer = %id, "Certificate Issuer was not found - removing from state");
                Ok(None)
            }
            Err(err) => Err(VaultwrightError::op(
                "retrieving",
                format!("Certificate Issuer {:?}", id.to_string()),
                err,
            )),
        }
    }

    async fn update(
        &self,
        id: &str,
        prior: &CertificateIssuerConfig,
        desired: &CertificateIssuerConfig,
    ) -> Result<CertificateIssuerState> {
        desired.validate()?;
        let id = CertificateIssuerId::parse(id)?;
        if prior.name != desired.name || !prior.key_vault_id.eq_ignore_ascii_case(&desired.key_vault_id) {
            return Err(VaultwrightError::InvalidConfig(format!(
                "Certificate Issuer {:?}: changing the name or vault requires replacing the issuer",
                id.name
            )));
        }
        let vault_id = VaultId::parse(&desired.key_vault_id)?;

        let issuer = self
            .provider
            .client()
            .set_certificate_issuer(&id.base_url, &id.name, &desired.to_bundle())
            .await
            .map_err(|e| VaultwrightError::op("updating", format!("Certificate Issuer {:?}", id.name), e))?;
        Ok(flatten(&id, &vault_id, issuer))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = CertificateIssuerId::parse(id)?;
        match self.provider.client().delete_certificate_issuer(&id.base_url, &id.name).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(VaultwrightError::op(
                "deleting",
                format!("Certificate Issuer {:?}", id.to_string()),
                err,
            )),
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::Method;
    use crate::{Config, TransportType};
    use serde_json::json;

    const BASE: &str = "https://kv1.vault.azure.net/";
    const ISSUER_URL: &str = "https://kv1.vault.azure.net/certificates/issuers/digicert";

    fn vault_id() -> VaultId {
        VaultId::new("sub-1", "rg", "kv1")
    }

    fn config() -> CertificateIssuerConfig {
        CertificateIssuerConfig {
            key_vault_id: vault_id().to_string(),
            name: "digicert".into(),
            provider_name: "DigiCert".into(),
            account_id: Some("acct-1".into()),
            password: Some("p4ss".into()),
            org_id: Some("org-1".into()),
            admins: vec![Administrator {
                email_address: "admin@example.com".into(),
                first_name: Some("Ada".into()),
                last_name: None,
                phone: None,
            }],
        }
    }

    async fn setup() -> (Arc<MockTransport>, CertificateIssuerResource) {
        let transport = Arc::new(MockTransport::new());
        let provider = Arc::new(Provider::with_transport(
            Config::new(TransportType::Mock).with_subscription_id("sub-1"),
            transport.clone(),
        ));
        provider.cache().insert(&vault_id().to_string(), BASE).await;
        (transport, CertificateIssuerResource::new(provider))
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let mut config = config();
        config.provider_name = "LetsEncrypt".into();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_create_sends_credentials_and_admins() {
        let (transport, issuers) = setup().await;
        transport.on_empty(Method::Get, ISSUER_URL, 404).await;
        transport
            .on(
                Method::Put,
                ISSUER_URL,
                200,
                json!({
                    "id": ISSUER_URL,
                    "provider": "DigiCert",
                    "credentials": {"account_id": "acct-1"},
                    "org_details": {"id": "org-1", "admin_details": [{"first_name": "Ada", "email": "admin@example.com"}]}
                }),
            )
            .await;

        let state = issuers.create(&config()).await.unwrap();
        assert_eq!(state.id, ISSUER_URL);
        assert_eq!(state.account_id.as_deref(), Some("acct-1"));
        assert_eq!(state.admins[0].email_address, "admin@example.com");

        let put = transport.requests_to(Method::Put, ISSUER_URL).await;
        let body = put[0].body.clone().unwrap();
        assert_eq!(body["credentials"]["pwd"], "p4ss");
        assert_eq!(body["org_details"]["admin_details"][0]["email"], "admin@example.com");
    }

    #[tokio::test]
    async fn test_create_refuses_existing_issuer() {
        let (transport, issuers) = setup().await;
        transport
            .on(Method::Get, ISSUER_URL, 200, json!({"provider": "DigiCert"}))
            .await;

        let err = issuers.create(&config()).await.unwrap_err();
        assert!(matches!(err, VaultwrightError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_delete_of_missing_issuer_succeeds() {
        let (transport, issuers) = setup().await;
        transport.on_empty(Method::Delete, ISSUER_URL, 404).await;
        issuers.delete(ISSUER_URL).await.unwrap();
    }
}
