//! Certificates.
//!
//! A certificate is either generated by the vault from its policy, which is an
//! asynchronous operation polled through the pending-operation endpoint, or
//! imported from a base64 PFX/PEM bundle. The secret and key that back a
//! certificate are managed by the vault.

use super::{owning_vault, should_purge, unix_to_rfc3339, vault_for_delete, Resource};
use crate::client::models::{
    CertificateBundle, CertificateKeyProperties, CertificateLifetimeAction, CertificateLifetimeActionType,
    CertificateLifetimeTrigger, CertificateOperation, CertificatePolicy, CertificateSecretProperties,
    IssuerParameters, SubjectAlternativeNames, Tags, X509CertificateProperties,
};
use crate::client::KeyVaultClient;
use crate::config::{Operation, OperationTimeouts};
use crate::ids::{NestedItemId, NestedItemType, VaultId};
use crate::poll::{Deadline, Observation, StateWait};
use crate::purge::{delete_and_optionally_purge, NestedItemDeleter};
use crate::recovery::{create_with_recovery, recover_and_wait};
use crate::validation::{validate_nested_item_name, validate_permissions};
use crate::{Provider, Result, VaultwrightError};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Certificate issuance can involve manual review at the issuer.
pub const CERTIFICATE_TIMEOUTS: OperationTimeouts = OperationTimeouts::minutes(60, 30, 30, 30);

const CERTIFICATE_KEY_TYPES: &[&str] = &["EC", "EC-HSM", "RSA", "RSA-HSM"];
const CURVES: &[&str] = &["P-256", "P-256K", "P-384", "P-521"];
const RSA_KEY_SIZES: &[u32] = &[2048, 3072, 4096];
const EC_KEY_SIZES: &[u32] = &[256, 384, 521];
const ACTION_TYPES: &[&str] = &["AutoRenew", "EmailContacts"];
const KEY_USAGES: &[&str] = &[
    "cRLSign",
    "dataEncipherment",
    "decipherOnly",
    "digitalSignature",
    "encipherOnly",
    "keyAgreement",
    "keyCertSign",
    "keyEncipherment",
    "nonRepudiation",
];

const GENERATION_MIN_TIMEOUT: Duration = Duration::from_secs(15);
const EXTERNAL_ISSUER_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Certificate bundle to import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateContents {
    /// Base64-encoded PFX or PEM
    pub contents: String,
    /// Password of the PFX
    pub password: Option<String>,
}

/// Key properties of a certificate policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateKeyConfig {
    /// `EC`, `EC-HSM`, `RSA` or `RSA-HSM`
    pub key_type: String,
    /// Key size in bits; derived from the curve for EC keys when unset
    pub key_size: Option<u32>,
    /// EC curve
    pub curve: Option<String>,
    /// Private key may be exported
    pub exportable: bool,
    /// Reuse the key on renewal
    pub reuse_key: bool,
}

/// One lifetime action of a certificate policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifetimeActionConfig {
    /// `AutoRenew` or `EmailContacts`
    pub action_type: String,
    /// Trigger this many days before expiry
    pub days_before_expiry: Option<u32>,
    /// Trigger at this percentage of the lifetime
    pub lifetime_percentage: Option<u32>,
}

/// Subject alternative names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectAlternativeNamesConfig {
    /// E-mail addresses
    pub emails: Vec<String>,
    /// DNS names
    pub dns_names: Vec<String>,
    /// User principal names
    pub upns: Vec<String>,
}

/// X.509 properties of a certificate policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X509PropertiesConfig {
    /// Subject distinguished name
    pub subject: String,
    /// Extended key usage OIDs
    pub extended_key_usage: Vec<String>,
    /// Key usages
    pub key_usage: Vec<String>,
    /// Subject alternative names
    pub subject_alternative_names: Option<SubjectAlternativeNamesConfig>,
    /// Validity in months
    pub validity_in_months: u32,
}

/// Certificate policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePolicyConfig {
    /// `Self`, `Unknown` or the name of a configured issuer
    pub issuer_name: String,
    /// Key properties
    pub key_properties: CertificateKeyConfig,
    /// Lifetime actions
    pub lifetime_actions: Vec<LifetimeActionConfig>,
    /// Content type of the backing secret
    pub secret_content_type: String,
    /// X.509 properties; required when generating
    pub x509_properties: Option<X509PropertiesConfig>,
}

impl CertificatePolicyConfig {
    /// A self-signed RSA 2048 policy for `subject`, valid twelve months and
    /// renewed thirty days before expiry.
    pub fn self_signed(subject: impl Into<String>) -> Self {
        Self {
            issuer_name: "Self".into(),
            key_properties: CertificateKeyConfig {
                key_type: "RSA".into(),
                key_size: Some(2048),
                curve: None,
                exportable: true,
                reuse_key: true,
            },
            lifetime_actions: vec![LifetimeActionConfig {
                action_type: "AutoRenew".into(),
                days_before_expiry: Some(30),
                lifetime_percentage: None,
            }],
            secret_content_type: "application/x-pkcs12".into(),
            x509_properties: Some(X509PropertiesConfig {
                subject: subject.into(),
                extended_key_usage: vec!["1.3.6.1.5.5.7.3.1".into()],
                key_usage: vec!["digitalSignature".into(), "keyEncipherment".into()],
                subject_alternative_names: None,
                validity_in_months: 12,
            }),
        }
    }

    fn validate(&self) -> Result<()> {
        let key = &self.key_properties;
        if !CERTIFICATE_KEY_TYPES.contains(&key.key_type.as_str()) {
            return Err(VaultwrightError::InvalidConfig(format!(
                "key_properties.key_type must be one of {}, got {:?}",
                CERTIFICATE_KEY_TYPES.join(", "),
                key.key_type
            )));
        }
        if key.key_type.starts_with("EC") {
            match key.curve.as_deref() {
                Some(curve) if CURVES.contains(&curve) => {}
                _ => {
                    return Err(VaultwrightError::InvalidConfig(
                        "`curve` is required when creating an EC key".into(),
                    ))
                }
            }
            if let Some(size) = key.key_size.filter(|s| !EC_KEY_SIZES.contains(s)) {
                return Err(VaultwrightError::InvalidConfig(format!(
                    "an EC key_size must be 256, 384 or 521, got {size}"
                )));
            }
        } else {
            match key.key_size {
                Some(size) if RSA_KEY_SIZES.contains(&size) => {}
                Some(size) => {
                    return Err(VaultwrightError::InvalidConfig(format!(
                        "an RSA key_size must be 2048, 3072 or 4096, got {size}"
                    )))
                }
                None => {
                    return Err(VaultwrightError::InvalidConfig(
                        "`key_size` is required when creating an RSA key".into(),
                    ))
                }
            }
        }

        for action in &self.lifetime_actions {
            if !ACTION_TYPES.contains(&action.action_type.as_str()) {
                return Err(VaultwrightError::InvalidConfig(format!(
                    "lifetime_action.action_type must be AutoRenew or EmailContacts, got {:?}",
                    action.action_type
                )));
            }
            if let Some(percentage) = action.lifetime_percentage.filter(|p| !(1..=99).contains(p)) {
                return Err(VaultwrightError::InvalidConfig(format!(
                    "lifetime_percentage must be between 1 and 99, got {percentage}"
                )));
            }
        }

        if let Some(x509) = &self.x509_properties {
            validate_permissions("x509_certificate_properties.key_usage", &x509.key_usage, KEY_USAGES)?;
            if x509.validity_in_months == 0 {
                return Err(VaultwrightError::InvalidConfig(
                    "x509_certificate_properties.validity_in_months must be positive".into(),
                ));
            }
        }
        Ok(())
    }

    fn key_size(&self) -> Option<u32> {
        let key = &self.key_properties;
        key.key_size.or_else(|| match key.curve.as_deref() {
            Some("P-256") | Some("P-256K") => Some(256),
            Some("P-384") => Some(384),
            Some("P-521") => Some(521),
            _ => None,
        })
    }

    fn expand(&self) -> CertificatePolicy {
        let key = &self.key_properties;
        CertificatePolicy {
            key_props: Some(CertificateKeyProperties {
                exportable: Some(key.exportable),
                kty: Some(key.key_type.clone()),
                key_size: self.key_size(),
                reuse_key: Some(key.reuse_key),
                crv: key.curve.clone(),
            }),
            secret_props: Some(CertificateSecretProperties {
                content_type: Some(self.secret_content_type.clone()),
            }),
            x509_props: self.x509_properties.as_ref().map(|x509| X509CertificateProperties {
                subject: Some(x509.subject.clone()),
                ekus: x509.extended_key_usage.clone(),
                sans: x509.subject_alternative_names.as_ref().map(|sans| SubjectAlternativeNames {
                    emails: sans.emails.clone(),
                    dns_names: sans.dns_names.clone(),
                    upns: sans.upns.clone(),
                }),
                key_usage: x509.key_usage.clone(),
                validity_months: Some(x509.validity_in_months),
            }),
            lifetime_actions: expand_lifetime_actions(&self.lifetime_actions),
            issuer: Some(IssuerParameters {
                name: Some(self.issuer_name.clone()),
                cty: None,
            }),
        }
    }

    fn flatten(policy: CertificatePolicy) -> Self {
        let key = policy.key_props.unwrap_or_default();
        Self {
            issuer_name: policy.issuer.and_then(|i| i.name).unwrap_or_default(),
            key_properties: CertificateKeyConfig {
                key_type: key.kty.unwrap_or_default(),
                key_size: key.key_size,
                curve: key.crv,
                exportable: key.exportable.unwrap_or(false),
                reuse_key: key.reuse_key.unwrap_or(false),
            },
            lifetime_actions: policy
                .lifetime_actions
                .into_iter()
                .map(|action| LifetimeActionConfig {
                    action_type: action.action.action_type,
                    days_before_expiry: action.trigger.days_before_expiry,
                    lifetime_percentage: action.trigger.lifetime_percentage,
                })
                .collect(),
            secret_content_type: policy.secret_props.and_then(|s| s.content_type).unwrap_or_default(),
            x509_properties: policy.x509_props.map(|x509| X509PropertiesConfig {
                subject: x509.subject.unwrap_or_default(),
                extended_key_usage: x509.ekus,
                key_usage: x509.key_usage,
                subject_alternative_names: x509.sans.map(|sans| SubjectAlternativeNamesConfig {
                    emails: sans.emails,
                    dns_names: sans.dns_names,
                    upns: sans.upns,
                }),
                validity_in_months: x509.validity_months.unwrap_or_default(),
            }),
        }
    }

    /// Everything that requires a new certificate version when it changes.
    fn issuance_differs(&self, other: &Self) -> bool {
        let strip = |policy: &Self| Self {
            lifetime_actions: Vec::new(),
            ..policy.clone()
        };
        strip(self) != strip(other)
    }
}

fn expand_lifetime_actions(actions: &[LifetimeActionConfig]) -> Vec<CertificateLifetimeAction> {
    actions
        .iter()
        .map(|action| CertificateLifetimeAction {
            trigger: CertificateLifetimeTrigger {
                lifetime_percentage: action.lifetime_percentage.filter(|p| *p > 0),
                days_before_expiry: action.days_before_expiry.filter(|d| *d > 0),
            },
            action: CertificateLifetimeActionType {
                action_type: action.action_type.clone(),
            },
        })
        .collect()
}

/// Desired certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateConfig {
    /// Resource ID of the owning vault
    pub key_vault_id: String,
    /// Certificate name
    pub name: String,
    /// Bundle to import; the certificate is generated from the policy when unset
    pub certificate: Option<CertificateContents>,
    /// Policy
    pub policy: CertificatePolicyConfig,
    /// Tags
    pub tags: Tags,
}

impl CertificateConfig {
    /// A certificate generated from `policy`.
    pub fn generated(key_vault_id: impl Into<String>, name: impl Into<String>, policy: CertificatePolicyConfig) -> Self {
        Self {
            key_vault_id: key_vault_id.into(),
            name: name.into(),
            certificate: None,
            policy,
            tags: Tags::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        validate_nested_item_name(&self.name)?;
        self.policy.validate()?;
        match &self.certificate {
            Some(certificate) => {
                if certificate.contents.is_empty() {
                    return Err(VaultwrightError::InvalidConfig(
                        "certificate.contents must not be empty".into(),
                    ));
                }
            }
            None if self.policy.x509_properties.is_none() => {
                return Err(VaultwrightError::InvalidConfig(
                    "x509_certificate_properties is required when generating a certificate".into(),
                ))
            }
            None => {}
        }
        Ok(())
    }
}

/// Attributes of the current certificate version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateAttributes {
    /// Created, RFC 3339
    pub created: Option<String>,
    /// Enabled
    pub enabled: bool,
    /// Expires, RFC 3339
    pub expires: Option<String>,
    /// Not valid before, RFC 3339
    pub not_before: Option<String>,
    /// Deletion recovery level
    pub recovery_level: Option<String>,
    /// Updated, RFC 3339
    pub updated: Option<String>,
}

/// Observed certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateState {
    /// Versioned ID
    pub id: String,
    /// ID without version
    pub versionless_id: String,
    /// Current version
    pub version: String,
    /// Certificate name
    pub name: String,
    /// Resource ID of the owning vault
    pub key_vault_id: String,
    /// Versioned ID of the backing secret
    pub secret_id: String,
    /// ID of the backing secret without version
    pub versionless_secret_id: String,
    /// DER certificate as uppercase hex
    pub certificate_data: String,
    /// DER certificate as standard base64
    pub certificate_data_base64: String,
    /// SHA-1 thumbprint as uppercase hex
    pub thumbprint: String,
    /// Policy
    pub policy: Option<CertificatePolicyConfig>,
    /// Attributes of the current version
    pub attributes: CertificateAttributes,
    /// Tags
    pub tags: Tags,
}

fn flatten(vault_id: &VaultId, certificate: CertificateBundle) -> Result<CertificateState> {
    let id = NestedItemId::parse(certificate.id.as_deref().unwrap_or_default(), NestedItemType::Certificate)?;
    let secret_id = certificate.sid.unwrap_or_default();
    let versionless_secret_id = NestedItemId::parse(&secret_id, NestedItemType::Secret)
        .map(|sid| sid.versionless_id())
        .unwrap_or_default();

    let der = certificate
        .cer
        .as_deref()
        .map(|cer| STANDARD.decode(cer))
        .transpose()
        .map_err(|e| VaultwrightError::Other(anyhow::anyhow!("decoding certificate data of {id}: {e}")))?
        .unwrap_or_default();
    let thumbprint = certificate
        .x5t
        .as_deref()
        .map(|x5t| URL_SAFE_NO_PAD.decode(x5t.trim_end_matches('=')))
        .transpose()
        .map_err(|e| VaultwrightError::Other(anyhow::anyhow!("decoding thumbprint of {id}: {e}")))?
        .unwrap_or_default();

    let attributes = certificate.attributes.unwrap_or_default();
    Ok(CertificateState {
        id: id.to_string(),
        versionless_id: id.versionless_id(),
        version: id.version.clone().unwrap_or_default(),
        name: id.name,
        key_vault_id: vault_id.to_string(),
        secret_id,
        versionless_secret_id,
        certificate_data: hex::encode_upper(&der),
        certificate_data_base64: STANDARD.encode(&der),
        thumbprint: hex::encode_upper(thumbprint),
        policy: certificate.policy.map(CertificatePolicyConfig::flatten),
        attributes: CertificateAttributes {
            created: unix_to_rfc3339(attributes.created),
            enabled: attributes.enabled.unwrap_or(true),
            expires: unix_to_rfc3339(attributes.exp),
            not_before: unix_to_rfc3339(attributes.nbf),
            recovery_level: attributes.recovery_level,
            updated: unix_to_rfc3339(attributes.updated),
        },
        tags: certificate.tags.unwrap_or_default(),
    })
}

/// Maps the pending operation of a certificate onto `Provisioning` / `Ready`.
fn issuance_state(operation: &CertificateOperation) -> Result<Observation<()>> {
    let status = operation.status.as_deref().ok_or_else(|| {
        VaultwrightError::Other(anyhow::anyhow!("missing status in certificate operation"))
    })?;

    if status.eq_ignore_ascii_case("inProgress") {
        let unknown_issuer = operation
            .issuer
            .as_ref()
            .and_then(|i| i.name.as_deref())
            .is_some_and(|name| name.eq_ignore_ascii_case("unknown"));
        // an Unknown issuer completes outside the vault
        return Ok(Observation::found((), if unknown_issuer { "Ready" } else { "Provisioning" }));
    }
    if status.eq_ignore_ascii_case("completed") {
        return Ok(Observation::found((), "Ready"));
    }

    let details = operation
        .error
        .as_ref()
        .map(|e| format!("{}: {}", e.code, e.message))
        .or_else(|| operation.status_details.clone())
        .unwrap_or_default();
    Ok(Observation::Failed(format!(
        "certificate creation failed in state {status:?}: {details}"
    )))
}

/// Waits for a generated certificate to be issued.
async fn wait_for_issuance(
    client: &KeyVaultClient,
    base_url: &str,
    name: &str,
    issuer_name: &str,
    deadline: Deadline,
) -> Result<()> {
    let mut wait = StateWait::new(&["Provisioning"], &["Ready"], deadline).with_min_timeout(GENERATION_MIN_TIMEOUT);
    if issuer_name != "Self" {
        // whatever a preceding recovery left of the operation timeout
        let checks = deadline.remaining().as_secs() / EXTERNAL_ISSUER_POLL_INTERVAL.as_secs();
        wait = wait
            .with_poll_interval(EXTERNAL_ISSUER_POLL_INTERVAL)
            .with_not_found_checks(usize::try_from(checks).unwrap_or(usize::MAX));
    }

    debug!(certificate = %name, %base_url, "waiting for certificate to be provisioned");
    wait.wait(|| async move {
        match client.get_certificate_operation(base_url, name).await {
            Ok(operation) => issuance_state(&operation),
            Err(err) if err.is_not_found() => Ok(Observation::NotFound),
            Err(err) => Err(err),
        }
    })
    .await
    .map_err(|e| {
        VaultwrightError::op(
            "waiting for",
            format!("Certificate {name:?} in Vault {base_url:?} to become available"),
            e,
        )
    })
}

/// Certificate handler.
pub struct CertificateResource {
    provider: Arc<Provider>,
}

impl CertificateResource {
    /// Creates the handler.
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }

    /// Reads the latest version of a certificate by name.
    pub async fn lookup(&self, key_vault_id: &str, name: &str) -> Result<CertificateState> {
        let vault_id = VaultId::parse(key_vault_id)?;
        let base_url = self.provider.base_url_for_vault(&vault_id).await?;
        let certificate = self
            .provider
            .client()
            .get_certificate(&base_url, name, None)
            .await
            .map_err(|e| {
                VaultwrightError::op("retrieving", format!("Certificate {name:?} (Key Vault {base_url:?})"), e)
            })?;
        flatten(&vault_id, certificate)
    }

    /// Imports or generates a new version, recovering a soft-deleted
    /// certificate of the same name first when allowed. The recovery wait and
    /// the issuance wait share `deadline`.
    async fn issue(&self, base_url: &str, config: &CertificateConfig, deadline: Deadline) -> Result<()> {
        let client = self.provider.client();
        let item = format!("Certificate {:?} (Key Vault {base_url:?})", config.name);
        let policy = config.policy.expand();
        let recover_enabled = self.provider.features().recover_soft_deleted_certificates;
        let recover = || {
            recover_and_wait(
                &item,
                || client.recover_deleted_nested_item(base_url, NestedItemType::Certificate, &config.name),
                || {
                    let url = client.nested_item_url(base_url, NestedItemType::Certificate, &config.name);
                    async move { client.probe(&url, client.data_plane_audience(base_url)).await }
                },
                deadline,
            )
        };

        match &config.certificate {
            Some(certificate) => {
                create_with_recovery(
                    &item,
                    recover_enabled,
                    || {
                        client.import_certificate(
                            base_url,
                            &config.name,
                            &certificate.contents,
                            certificate.password.as_deref(),
                            &policy,
                            &config.tags,
                        )
                    },
                    recover,
                )
                .await?;
                info!(certificate = %config.name, %base_url, "imported certificate");
                Ok(())
            }
            None => {
                create_with_recovery(
                    &item,
                    recover_enabled,
                    || client.create_certificate(base_url, &config.name, &policy, &config.tags),
                    recover,
                )
                .await?;
                wait_for_issuance(
                    client,
                    base_url,
                    &config.name,
                    &config.policy.issuer_name,
                    deadline,
                )
                .await
            }
        }
    }
}

#[async_trait]
impl Resource for CertificateResource {
    type Config = CertificateConfig;
    type State = CertificateState;

    fn kind(&self) -> &'static str {
        "key_vault_certificate"
    }

    fn default_timeouts(&self) -> OperationTimeouts {
        CERTIFICATE_TIMEOUTS
    }

    fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn create(&self, config: &CertificateConfig) -> Result<CertificateState> {
        config.validate()?;
        let deadline = self.deadline(Operation::Create);
        let vault_id = VaultId::parse(&config.key_vault_id)?;
        let client = self.provider.client();
        let base_url = self.provider.base_url_for_vault(&vault_id).await.map_err(|e| {
            VaultwrightError::op(
                "looking up Base URI for",
                format!("Certificate {:?} in {vault_id}", config.name),
                e,
            )
        })?;

        match client.get_certificate(&base_url, &config.name, None).await {
            Ok(existing) => {
                if let Some(id) = existing.id.filter(|id| !id.is_empty()) {
                    return Err(VaultwrightError::already_exists(self.kind(), id));
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                return Err(VaultwrightError::op(
                    "checking for presence of existing",
                    format!("Certificate {:?} in {base_url:?}", config.name),
                    err,
                ))
            }
        }

        self.issue(&base_url, config, deadline).await?;

        let certificate = client
            .get_certificate(&base_url, &config.name, None)
            .await
            .map_err(|e| VaultwrightError::op("retrieving", format!("Certificate {:?}", config.name), e))?;
        flatten(&vault_id, certificate)
    }

    async fn read(&self, id: &str) -> Result<Option<CertificateState>> {
        let id = NestedItemId::parse(id, NestedItemType::Certificate)?;
        let Some((vault_id, _)) = owning_vault(&self.provider, &id.base_url).await? else {
            return Ok(None);
        };

        match self.provider.client().get_certificate(&id.base_url, &id.name, None).await {
            Ok(certificate) => flatten(&vault_id, certificate).map(Some),
            Err(err) if err.is_not_found() => {
                debug!(certificate = %id.name, base_url = %id.base_url, "Certificate was not found - removing from state");
                Ok(None)
            }
            Err(err) => Err(VaultwrightError::op(
                "retrieving",
                format!("Certificate {:?}", id.to_string()),
                err,
            )),
        }
    }

    async fn update(&self, id: &str, prior: &CertificateConfig, desired: &CertificateConfig) -> Result<CertificateState> {
        desired.validate()?;
        let deadline = self.deadline(Operation::Update);
        let id = NestedItemId::parse(id, NestedItemType::Certificate)?;
        let vault_id = VaultId::parse(&desired.key_vault_id)?;
        self.provider.cache().insert(&vault_id.to_string(), &id.base_url).await;
        let target = format!("Certificate {:?} (Key Vault {:?})", id.name, id.base_url);

        if prior.name != desired.name || !prior.key_vault_id.eq_ignore_ascii_case(&desired.key_vault_id) {
            return Err(VaultwrightError::InvalidConfig(format!(
                "{target}: changing the name or vault requires replacing the certificate"
            )));
        }

        // dropping the contents keeps the imported version
        let contents_changed = desired.certificate.is_some() && prior.certificate != desired.certificate;
        let reissue = contents_changed || prior.policy.issuance_differs(&desired.policy);
        if reissue {
            debug!(certificate = %id.name, "issuing a new certificate version");
            self.issue(&id.base_url, desired, deadline).await?;
        }

        if prior.tags != desired.tags || prior.policy.lifetime_actions != desired.policy.lifetime_actions {
            let patch = json!({
                "tags": desired.tags,
                "policy": { "lifetime_actions": expand_lifetime_actions(&desired.policy.lifetime_actions) },
            });
            self.provider
                .client()
                .update_certificate(&id.base_url, &id.name, "", patch)
                .await
                .map_err(|e| VaultwrightError::op("updating", &target, e))?;
        }

        self.read(&id.versionless_id())
            .await?
            .ok_or_else(|| VaultwrightError::NotFound(target))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = NestedItemId::parse(id, NestedItemType::Certificate)?;
        let description = format!("Certificate {:?} (Key Vault {:?})", id.name, id.base_url);

        let Some(vault) = vault_for_delete(&self.provider, &id.base_url).await? else {
            return Ok(());
        };
        let purge = should_purge(
            self.provider.features().purge_soft_deleted_certificates_on_destroy,
            &vault,
            &description,
        );
        let deleter = NestedItemDeleter::new(
            self.provider.client(),
            &id.base_url,
            NestedItemType::Certificate,
            &id.name,
        );
        delete_and_optionally_purge(&deleter, purge, self.deadline(Operation::Delete)).await
    }
}
