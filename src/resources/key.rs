//! Keys.
//!
//! RSA, EC and symmetric (`oct`) keys, software or HSM protected. The private
//! material never leaves the vault; state carries the public JSON Web Key
//! parameters.

use super::{
    item_attributes, owning_vault, should_purge, unix_to_rfc3339, vault_for_delete, Resource, NESTED_ITEM_TIMEOUTS,
};
use crate::client::models::{
    JsonWebKey, KeyBundle, KeyCreateParameters, KeyLifetimeAction, KeyLifetimeActionType, KeyLifetimeTrigger,
    KeyRotationPolicy, KeyRotationPolicyAttributes, KeyUpdateParameters, Tags,
};
use crate::config::{Operation, OperationTimeouts};
use crate::ids::{NestedItemId, NestedItemType, VaultId};
use crate::purge::{delete_and_optionally_purge, NestedItemDeleter};
use crate::recovery::{create_with_recovery, recover_and_wait};
use crate::validation::{validate_iso8601_duration, validate_nested_item_name, validate_permissions};
use crate::{Provider, Result, VaultwrightError};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::sync::Arc;
use tracing::debug;

/// Key types accepted by the API.
pub const KEY_TYPES: &[&str] = &["EC", "EC-HSM", "RSA", "RSA-HSM", "oct", "oct-HSM"];

/// Key operations accepted by the API.
pub const KEY_OPERATIONS: &[&str] = &["decrypt", "encrypt", "import", "sign", "unwrapKey", "verify", "wrapKey"];

const RSA_KEY_SIZES: &[u32] = &[2048, 3072, 4096];
const OCT_KEY_SIZES: &[u32] = &[128, 192, 256];
const CURVES: &[&str] = &["P-256", "P-256K", "P-384", "P-521"];

/// Automatic rotation trigger; exactly one field is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutomaticRotation {
    /// ISO-8601 duration after creation
    pub time_after_creation: Option<String>,
    /// ISO-8601 duration before expiry
    pub time_before_expiry: Option<String>,
}

/// Rotation policy of a key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Expiry of new versions, ISO-8601 duration
    pub expire_after: Option<String>,
    /// Notify this long before expiry, ISO-8601 duration
    pub notify_before_expiry: Option<String>,
    /// Automatic rotation
    pub automatic: Option<AutomaticRotation>,
}

impl RotationPolicy {
    fn validate(&self) -> Result<()> {
        for duration in [&self.expire_after, &self.notify_before_expiry].into_iter().flatten() {
            validate_iso8601_duration(duration)?;
        }
        if let Some(automatic) = &self.automatic {
            match (&automatic.time_after_creation, &automatic.time_before_expiry) {
                (Some(duration), None) | (None, Some(duration)) => validate_iso8601_duration(duration)?,
                _ => {
                    return Err(VaultwrightError::InvalidConfig(
                        "rotation_policy.automatic needs exactly one of time_after_creation and time_before_expiry"
                            .into(),
                    ))
                }
            }
        }
        if self.notify_before_expiry.is_some() && self.expire_after.is_none() {
            return Err(VaultwrightError::InvalidConfig(
                "rotation_policy.notify_before_expiry requires expire_after".into(),
            ));
        }
        Ok(())
    }

    fn expand(&self) -> KeyRotationPolicy {
        let mut lifetime_actions = Vec::new();
        if let Some(notify) = &self.notify_before_expiry {
            lifetime_actions.push(KeyLifetimeAction {
                trigger: KeyLifetimeTrigger {
                    time_before_expiry: Some(notify.clone()),
                    ..Default::default()
                },
                action: KeyLifetimeActionType { kind: "Notify".into() },
            });
        }
        if let Some(automatic) = &self.automatic {
            lifetime_actions.push(KeyLifetimeAction {
                trigger: KeyLifetimeTrigger {
                    time_after_create: automatic.time_after_creation.clone(),
                    time_before_expiry: automatic.time_before_expiry.clone(),
                },
                action: KeyLifetimeActionType { kind: "Rotate".into() },
            });
        }
        KeyRotationPolicy {
            lifetime_actions,
            attributes: Some(KeyRotationPolicyAttributes {
                expiry_time: self.expire_after.clone(),
            }),
        }
    }

    fn flatten(policy: &KeyRotationPolicy) -> Option<Self> {
        let mut flattened = Self {
            expire_after: policy.attributes.as_ref().and_then(|a| a.expiry_time.clone()),
            ..Default::default()
        };
        for action in &policy.lifetime_actions {
            if action.action.kind.eq_ignore_ascii_case("Notify") {
                flattened.notify_before_expiry = action.trigger.time_before_expiry.clone();
            } else if action.action.kind.eq_ignore_ascii_case("Rotate") {
                flattened.automatic = Some(AutomaticRotation {
                    time_after_creation: action.trigger.time_after_create.clone(),
                    time_before_expiry: action.trigger.time_before_expiry.clone(),
                });
            }
        }
        (flattened != Self::default()).then_some(flattened)
    }
}

/// Desired key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConfig {
    /// Resource ID of the owning vault
    pub key_vault_id: String,
    /// Key name
    pub name: String,
    /// One of [`KEY_TYPES`]
    pub key_type: String,
    /// RSA or symmetric key size in bits
    pub key_size: Option<u32>,
    /// EC curve
    pub curve: Option<String>,
    /// Permitted operations, from [`KEY_OPERATIONS`]
    pub key_opts: Vec<String>,
    /// Enabled
    pub enabled: bool,
    /// Not usable before, RFC 3339
    pub not_before_date: Option<String>,
    /// Expires, RFC 3339
    pub expiration_date: Option<String>,
    /// Rotation policy
    pub rotation_policy: Option<RotationPolicy>,
    /// Tags
    pub tags: Tags,
}

impl KeyConfig {
    /// An enabled key of the given type, permitted every operation.
    pub fn new(key_vault_id: impl Into<String>, name: impl Into<String>, key_type: impl Into<String>) -> Self {
        Self {
            key_vault_id: key_vault_id.into(),
            name: name.into(),
            key_type: key_type.into(),
            key_size: None,
            curve: None,
            key_opts: KEY_OPERATIONS.iter().map(|op| op.to_string()).collect(),
            enabled: true,
            not_before_date: None,
            expiration_date: None,
            rotation_policy: None,
            tags: Tags::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        validate_nested_item_name(&self.name)?;
        if !KEY_TYPES.contains(&self.key_type.as_str()) {
            return Err(VaultwrightError::InvalidConfig(format!(
                "key_type must be one of {}, got {:?}",
                KEY_TYPES.join(", "),
                self.key_type
            )));
        }
        validate_permissions("key_opts", &self.key_opts, KEY_OPERATIONS)?;

        let family = self.key_type.trim_end_matches("-HSM");
        match (family, self.key_size, self.curve.as_deref()) {
            ("RSA", Some(size), None) if RSA_KEY_SIZES.contains(&size) => {}
            ("RSA", _, _) => {
                return Err(VaultwrightError::InvalidConfig(format!(
                    "an RSA key needs key_size 2048, 3072 or 4096 and no curve (got key_size {:?}, curve {:?})",
                    self.key_size, self.curve
                )))
            }
            ("oct", Some(size), None) if OCT_KEY_SIZES.contains(&size) => {}
            ("oct", _, _) => {
                return Err(VaultwrightError::InvalidConfig(format!(
                    "an oct key needs key_size 128, 192 or 256 and no curve (got key_size {:?}, curve {:?})",
                    self.key_size, self.curve
                )))
            }
            ("EC", None, Some(curve)) if CURVES.contains(&curve) => {}
            _ => {
                return Err(VaultwrightError::InvalidConfig(format!(
                    "an EC key needs a curve ({}) and no key_size (got key_size {:?}, curve {:?})",
                    CURVES.join(", "),
                    self.key_size,
                    self.curve
                )))
            }
        }

        if let Some(policy) = &self.rotation_policy {
            policy.validate()?;
        }
        Ok(())
    }

    fn to_create_parameters(&self) -> Result<KeyCreateParameters> {
        Ok(KeyCreateParameters {
            kty: self.key_type.clone(),
            key_size: self.key_size,
            crv: self.curve.clone(),
            key_ops: self.key_opts.clone(),
            attributes: Some(item_attributes(
                self.enabled,
                self.not_before_date.as_deref(),
                self.expiration_date.as_deref(),
            )?),
            tags: Some(self.tags.clone()),
        })
    }
}

/// Observed key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyState {
    /// Versioned ID
    pub id: String,
    /// ID without version
    pub versionless_id: String,
    /// Current version
    pub version: String,
    /// Key name
    pub name: String,
    /// Resource ID of the owning vault
    pub key_vault_id: String,
    /// Key type
    pub key_type: String,
    /// RSA key size in bits, derived from the modulus
    pub key_size: Option<u32>,
    /// EC curve
    pub curve: Option<String>,
    /// Permitted operations
    pub key_opts: Vec<String>,
    /// RSA modulus (base64url)
    pub n: Option<String>,
    /// RSA public exponent (base64url)
    pub e: Option<String>,
    /// EC x coordinate (base64url)
    pub x: Option<String>,
    /// EC y coordinate (base64url)
    pub y: Option<String>,
    /// Enabled
    pub enabled: bool,
    /// Not usable before, RFC 3339
    pub not_before_date: Option<String>,
    /// Expires, RFC 3339
    pub expiration_date: Option<String>,
    /// Rotation policy
    pub rotation_policy: Option<RotationPolicy>,
    /// Tags
    pub tags: Tags,
}

/// Size in bits of an RSA modulus.
fn modulus_bits(n: &str) -> Option<u32> {
    let bytes = URL_SAFE_NO_PAD.decode(n.trim_end_matches('=')).ok()?;
    let significant = bytes.iter().skip_while(|b| **b == 0).count();
    u32::try_from(significant * 8).ok()
}

fn flatten(vault_id: &VaultId, key: KeyBundle, rotation_policy: Option<RotationPolicy>) -> Result<KeyState> {
    let JsonWebKey {
        kid,
        kty,
        key_ops,
        n,
        e,
        crv,
        x,
        y,
    } = key.key;
    let id = NestedItemId::parse(kid.as_deref().unwrap_or_default(), NestedItemType::Key)?;
    let attributes = key.attributes.unwrap_or_default();

    Ok(KeyState {
        id: id.to_string(),
        versionless_id: id.versionless_id(),
        version: id.version.clone().unwrap_or_default(),
        name: id.name,
        key_vault_id: vault_id.to_string(),
        key_type: kty.unwrap_or_default(),
        key_size: n.as_deref().and_then(modulus_bits),
        curve: crv,
        key_opts: key_ops,
        n,
        e,
        x,
        y,
        enabled: attributes.enabled.unwrap_or(true),
        not_before_date: unix_to_rfc3339(attributes.nbf),
        expiration_date: unix_to_rfc3339(attributes.exp),
        rotation_policy,
        tags: key.tags.unwrap_or_default(),
    })
}

/// Key handler.
pub struct KeyResource {
    provider: Arc<Provider>,
}

impl KeyResource {
    /// Creates the handler.
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }

    /// Reads the latest version of a key by name.
    pub async fn lookup(&self, key_vault_id: &str, name: &str) -> Result<KeyState> {
        let vault_id = VaultId::parse(key_vault_id)?;
        let base_url = self.provider.base_url_for_vault(&vault_id).await?;
        let key = self
            .provider
            .client()
            .get_key(&base_url, name, None)
            .await
            .map_err(|e| VaultwrightError::op("retrieving", format!("Key {name:?} (Key Vault {base_url:?})"), e))?;
        let rotation_policy = self.rotation_policy(&base_url, name).await?;
        flatten(&vault_id, key, rotation_policy)
    }

    /// Rotation policy of a key; `None` when the caller may not read it.
    async fn rotation_policy(&self, base_url: &str, name: &str) -> Result<Option<RotationPolicy>> {
        match self.provider.client().get_key_rotation_policy(base_url, name).await {
            Ok(policy) => Ok(RotationPolicy::flatten(&policy)),
            Err(err) if err.is_forbidden() || err.is_not_found() => {
                debug!(key = %name, error = %err, "rotation policy is not readable");
                Ok(None)
            }
            Err(err) => Err(VaultwrightError::op(
                "retrieving rotation policy of",
                format!("Key {name:?} (Key Vault {base_url:?})"),
                err,
            )),
        }
    }
}

#[async_trait]
impl Resource for KeyResource {
    type Config = KeyConfig;
    type State = KeyState;

    fn kind(&self) -> &'static str {
        "key_vault_key"
    }

    fn default_timeouts(&self) -> OperationTimeouts {
        NESTED_ITEM_TIMEOUTS
    }

    fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn create(&self, config: &KeyConfig) -> Result<KeyState> {
        config.validate()?;
        let vault_id = VaultId::parse(&config.key_vault_id)?;
        let client = self.provider.client();
        let base_url = self.provider.base_url_for_vault(&vault_id).await.map_err(|e| {
            VaultwrightError::op("looking up Base URI for", format!("Key {:?} in {vault_id}", config.name), e)
        })?;
        let base_url = base_url.as_str();
        let item = format!("Key {:?} (Key Vault {base_url:?})", config.name);

        match client.get_key(base_url, &config.name, None).await {
            Ok(existing) => {
                if let Some(kid) = existing.key.kid.filter(|k| !k.is_empty()) {
                    return Err(VaultwrightError::already_exists(self.kind(), kid));
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(VaultwrightError::op("checking for presence of existing", &item, err)),
        }

        let parameters = config.to_create_parameters()?;
        let recovery_deadline = self.deadline(Operation::Create);
        let created = create_with_recovery(
            &item,
            self.provider.features().recover_soft_deleted_keys,
            || client.create_key(base_url, &config.name, &parameters),
            || {
                recover_and_wait(
                    &item,
                    || client.recover_deleted_nested_item(base_url, NestedItemType::Key, &config.name),
                    || {
                        let url = client.nested_item_url(base_url, NestedItemType::Key, &config.name);
                        async move { client.probe(&url, client.data_plane_audience(base_url)).await }
                    },
                    recovery_deadline,
                )
            },
        )
        .await?;

        if let Some(policy) = &config.rotation_policy {
            client
                .update_key_rotation_policy(base_url, &config.name, &policy.expand())
                .await
                .map_err(|e| VaultwrightError::op("setting rotation policy of", &item, e))?;
        }

        let kid = created.key.kid.unwrap_or_default();
        self.read(&kid)
            .await?
            .ok_or_else(|| VaultwrightError::NotFound(item))
    }

    async fn read(&self, id: &str) -> Result<Option<KeyState>> {
        let id = NestedItemId::parse(id, NestedItemType::Key)?;
        let Some((vault_id, _)) = owning_vault(&self.provider, &id.base_url).await? else {
            return Ok(None);
        };

        let (key, rotation_policy) = futures::join!(
            self.provider.client().get_key(&id.base_url, &id.name, None),
            self.rotation_policy(&id.base_url, &id.name),
        );
        let key = match key {
            Ok(key) => key,
            Err(err) if err.is_not_found() => {
                debug!(key = %id.name, base_url = %id.base_url, "Key was not found - removing from state");
                return Ok(None);
            }
            Err(err) => return Err(VaultwrightError::op("retrieving", format!("Key {:?}", id.to_string()), err)),
        };
        flatten(&vault_id, key, rotation_policy?).map(Some)
    }

    async fn update(&self, id: &str, prior: &KeyConfig, desired: &KeyConfig) -> Result<KeyState> {
        desired.validate()?;
        let id = NestedItemId::parse(id, NestedItemType::Key)?;
        let vault_id = VaultId::parse(&desired.key_vault_id)?;
        self.provider.cache().insert(&vault_id.to_string(), &id.base_url).await;
        let client = self.provider.client();
        let target = format!("Key {:?} (Key Vault {:?})", id.name, id.base_url);

        if prior.name != desired.name
            || prior.key_type != desired.key_type
            || prior.key_size != desired.key_size
            || prior.curve != desired.curve
        {
            return Err(VaultwrightError::InvalidConfig(format!(
                "{target}: changing the name, key type, key size or curve requires replacing the key"
            )));
        }

        let parameters = KeyUpdateParameters {
            key_ops: desired.key_opts.clone(),
            attributes: Some(item_attributes(
                desired.enabled,
                desired.not_before_date.as_deref(),
                desired.expiration_date.as_deref(),
            )?),
            tags: Some(desired.tags.clone()),
        };
        client
            .update_key(&id.base_url, &id.name, "", &parameters)
            .await
            .map_err(|e| VaultwrightError::op("updating", &target, e))?;

        if prior.rotation_policy != desired.rotation_policy {
            let policy = desired
                .rotation_policy
                .as_ref()
                .map(RotationPolicy::expand)
                .unwrap_or_default();
            client
                .update_key_rotation_policy(&id.base_url, &id.name, &policy)
                .await
                .map_err(|e| VaultwrightError::op("updating rotation policy of", &target, e))?;
        }

        self.read(&id.versionless_id())
            .await?
            .ok_or_else(|| VaultwrightError::NotFound(target))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = NestedItemId::parse(id, NestedItemType::Key)?;
        let description = format!("Key {:?} (Key Vault {:?})", id.name, id.base_url);

        let Some(vault) = vault_for_delete(&self.provider, &id.base_url).await? else {
            return Ok(());
        };
        let purge = should_purge(
            self.provider.features().purge_soft_deleted_keys_on_destroy,
            &vault,
            &description,
        );
        let deleter = NestedItemDeleter::new(self.provider.client(), &id.base_url, NestedItemType::Key, &id.name);
        delete_and_optionally_purge(&deleter, purge, self.deadline(Operation::Delete)).await
    }
}
