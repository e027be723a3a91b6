//! Resource identifiers.
//!
//! Management-plane resources (vaults, managed HSMs) are identified by ARM
//! resource IDs; data-plane items (keys, secrets, certificates, managed storage
//! accounts, SAS definitions, issuers, HSM role objects) by their URL. Parsing is
//! purely local: a malformed ID never reaches the network.

use crate::{Result, VaultwrightError};
use std::fmt;
use url::Url;

const KEY_VAULT_PROVIDER: &str = "Microsoft.KeyVault";
const AUTHORIZATION_PROVIDER: &str = "Microsoft.Authorization";

fn invalid(input: &str, expected: &str) -> VaultwrightError {
    VaultwrightError::InvalidId(format!("{input:?} is not a valid {expected} ID"))
}

/// Parses `/subscriptions/{s}/resourceGroups/{rg}/providers/Microsoft.KeyVault/{type}/{name}`.
fn parse_arm_id(input: &str, resource_type: &str, expected: &str) -> Result<(String, String, String)> {
    let segments: Vec<&str> = input.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        [subs, sub, rgs, rg, providers, provider, kind, name]
            if subs.eq_ignore_ascii_case("subscriptions")
                && rgs.eq_ignore_ascii_case("resourceGroups")
                && providers.eq_ignore_ascii_case("providers")
                && provider.eq_ignore_ascii_case(KEY_VAULT_PROVIDER)
                && kind.eq_ignore_ascii_case(resource_type)
                && !sub.is_empty()
                && !rg.is_empty()
                && !name.is_empty() =>
        {
            Ok((sub.to_string(), rg.to_string(), name.to_string()))
        }
        _ => Err(invalid(input, expected)),
    }
}

/// ARM ID of a Key Vault.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VaultId {
    /// Subscription
    pub subscription_id: String,
    /// Resource group
    pub resource_group: String,
    /// Vault name
    pub name: String,
}

impl VaultId {
    /// Creates a vault ID from its parts.
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }

    /// Parses a vault ID.
    ///
    /// # Example
    ///
    /// ```
    /// use vaultwright::ids::VaultId;
    ///
    /// let id = VaultId::parse(
    ///     "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv1",
    /// ).unwrap();
    /// assert_eq!(id.name, "kv1");
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let (subscription_id, resource_group, name) = parse_arm_id(input, "vaults", "Key Vault")?;
        Ok(Self {
            subscription_id,
            resource_group,
            name,
        })
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/{}/vaults/{}",
            self.subscription_id, self.resource_group, KEY_VAULT_PROVIDER, self.name
        )
    }
}

/// ARM ID of a managed HSM.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagedHsmId {
    /// Subscription
    pub subscription_id: String,
    /// Resource group
    pub resource_group: String,
    /// HSM name
    pub name: String,
}

impl ManagedHsmId {
    /// Creates a managed HSM ID from its parts.
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }

    /// Parses a managed HSM ID.
    pub fn parse(input: &str) -> Result<Self> {
        let (subscription_id, resource_group, name) =
            parse_arm_id(input, "managedHSMs", "Managed HSM")?;
        Ok(Self {
            subscription_id,
            resource_group,
            name,
        })
    }
}

impl fmt::Display for ManagedHsmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/{}/managedHSMs/{}",
            self.subscription_id, self.resource_group, KEY_VAULT_PROVIDER, self.name
        )
    }
}

/// ARM ID of a soft-deleted vault or managed HSM.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeletedVaultId {
    /// Subscription
    pub subscription_id: String,
    /// Location the item was deleted in
    pub location: String,
    /// Vault or HSM name
    pub name: String,
    /// True for a deleted managed HSM
    pub managed_hsm: bool,
}

impl DeletedVaultId {
    /// ID of a soft-deleted vault.
    pub fn vault(subscription_id: &str, location: &str, name: &str) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            location: normalize_location(location),
            name: name.to_string(),
            managed_hsm: false,
        }
    }

    /// ID of a soft-deleted managed HSM.
    pub fn managed_hsm(subscription_id: &str, location: &str, name: &str) -> Self {
        Self {
            managed_hsm: true,
            ..Self::vault(subscription_id, location, name)
        }
    }

    /// Parses `/subscriptions/{s}/providers/Microsoft.KeyVault/locations/{l}/deletedVaults/{n}`
    /// (or `deletedManagedHSMs`).
    pub fn parse(input: &str) -> Result<Self> {
        let segments: Vec<&str> = input.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            [subs, sub, providers, provider, locations, location, kind, name]
                if subs.eq_ignore_ascii_case("subscriptions")
                    && providers.eq_ignore_ascii_case("providers")
                    && provider.eq_ignore_ascii_case(KEY_VAULT_PROVIDER)
                    && locations.eq_ignore_ascii_case("locations")
                    && !name.is_empty() =>
            {
                let managed_hsm = if kind.eq_ignore_ascii_case("deletedVaults") {
                    false
                } else if kind.eq_ignore_ascii_case("deletedManagedHSMs") {
                    true
                } else {
                    return Err(invalid(input, "deleted vault"));
                };
                Ok(Self {
                    subscription_id: sub.to_string(),
                    location: normalize_location(location),
                    name: name.to_string(),
                    managed_hsm,
                })
            }
            _ => Err(invalid(input, "deleted vault")),
        }
    }
}

impl fmt::Display for DeletedVaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.managed_hsm {
            "deletedManagedHSMs"
        } else {
            "deletedVaults"
        };
        write!(
            f,
            "/subscriptions/{}/providers/{}/locations/{}/{}/{}",
            self.subscription_id, KEY_VAULT_PROVIDER, self.location, kind, self.name
        )
    }
}

/// Normalises an Azure location: `West Europe` becomes `westeurope`.
pub fn normalize_location(location: &str) -> String {
    location.replace(' ', "").to_ascii_lowercase()
}

/// Normalises a data-plane base URL to `scheme://host[:port]/`.
pub fn normalize_base_url(input: &str) -> Result<String> {
    let url = Url::parse(input).map_err(|_| invalid(input, "data-plane base URL"))?;
    base_of(&url).ok_or_else(|| invalid(input, "data-plane base URL"))
}

fn base_of(url: &Url) -> Option<String> {
    if url.scheme() != "https" && url.scheme() != "http" {
        return None;
    }
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}/", url.scheme(), host, port),
        None => format!("{}://{}/", url.scheme(), host),
    })
}

/// Splits a data-plane URL into its base URL and non-empty path segments.
fn split_data_plane_url(input: &str, expected: &str) -> Result<(String, Vec<String>)> {
    let url = Url::parse(input).map_err(|_| invalid(input, expected))?;
    let base = base_of(&url).ok_or_else(|| invalid(input, expected))?;
    let segments = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    Ok((base, segments))
}

/// Kind of versioned data-plane item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NestedItemType {
    /// Cryptographic key
    Key,
    /// Secret
    Secret,
    /// Certificate
    Certificate,
    /// Managed storage account
    StorageAccount,
}

impl NestedItemType {
    /// URL collection segment (`keys`, `secrets`, ...).
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Key => "keys",
            Self::Secret => "secrets",
            Self::Certificate => "certificates",
            Self::StorageAccount => "storage",
        }
    }

    /// URL collection segment of the soft-deleted items.
    pub fn deleted_collection(&self) -> &'static str {
        match self {
            Self::Key => "deletedkeys",
            Self::Secret => "deletedsecrets",
            Self::Certificate => "deletedcertificates",
            Self::StorageAccount => "deletedstorage",
        }
    }

    fn from_collection(segment: &str) -> Option<Self> {
        [Self::Key, Self::Secret, Self::Certificate, Self::StorageAccount]
            .into_iter()
            .find(|t| t.collection().eq_ignore_ascii_case(segment))
    }
}

impl fmt::Display for NestedItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key => write!(f, "Key"),
            Self::Secret => write!(f, "Secret"),
            Self::Certificate => write!(f, "Certificate"),
            Self::StorageAccount => write!(f, "Managed Storage Account"),
        }
    }
}

/// URL of a key, secret, certificate or managed storage account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NestedItemId {
    /// Vault base URL, `https://{vault}.vault.azure.net/`
    pub base_url: String,
    /// Item kind
    pub item_type: NestedItemType,
    /// Item name
    pub name: String,
    /// Item version, when the ID is versioned
    pub version: Option<String>,
}

impl NestedItemId {
    /// Creates an item ID.
    pub fn new(
        base_url: &str,
        item_type: NestedItemType,
        name: impl Into<String>,
        version: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            item_type,
            name: name.into(),
            version: version.filter(|v| !v.is_empty()),
        })
    }

    /// Parses an item URL, requiring the given kind.
    ///
    /// # Example
    ///
    /// ```
    /// use vaultwright::ids::{NestedItemId, NestedItemType};
    ///
    /// let id = NestedItemId::parse(
    ///     "https://kv1.vault.azure.net/secrets/db-password/0123abcd",
    ///     NestedItemType::Secret,
    /// ).unwrap();
    /// assert_eq!(id.name, "db-password");
    /// assert_eq!(id.version.as_deref(), Some("0123abcd"));
    /// assert_eq!(id.versionless_id(), "https://kv1.vault.azure.net/secrets/db-password");
    /// ```
    pub fn parse(input: &str, expected: NestedItemType) -> Result<Self> {
        let id = Self::parse_any(input)?;
        if id.item_type != expected {
            return Err(VaultwrightError::InvalidId(format!(
                "{input:?} is a {} ID, expected a {expected} ID",
                id.item_type
            )));
        }
        Ok(id)
    }

    /// Parses an item URL of any kind.
    pub fn parse_any(input: &str) -> Result<Self> {
        let (base_url, segments) = split_data_plane_url(input, "nested item")?;
        let (collection, name, version) = match segments.as_slice() {
            [collection, name] => (collection, name, None),
            [collection, name, version] => (collection, name, Some(version.clone())),
            _ => return Err(invalid(input, "nested item")),
        };
        let item_type =
            NestedItemType::from_collection(collection).ok_or_else(|| invalid(input, "nested item"))?;
        Ok(Self {
            base_url,
            item_type,
            name: name.clone(),
            version,
        })
    }

    /// The ID without its version.
    pub fn versionless_id(&self) -> String {
        format!("{}{}/{}", self.base_url, self.item_type.collection(), self.name)
    }
}

impl fmt::Display for NestedItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}/{}", self.versionless_id(), version),
            None => write!(f, "{}", self.versionless_id()),
        }
    }
}

/// URL of a SAS definition of a managed storage account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SasDefinitionId {
    /// Vault base URL
    pub base_url: String,
    /// Managed storage account name
    pub storage_account: String,
    /// SAS definition name
    pub name: String,
}

impl SasDefinitionId {
    /// Parses `https://{vault}/storage/{account}/sas/{name}`.
    pub fn parse(input: &str) -> Result<Self> {
        let (base_url, segments) = split_data_plane_url(input, "SAS definition")?;
        match segments.as_slice() {
            [storage, account, sas, name]
                if storage.eq_ignore_ascii_case("storage") && sas.eq_ignore_ascii_case("sas") =>
            {
                Ok(Self {
                    base_url,
                    storage_account: account.clone(),
                    name: name.clone(),
                })
            }
            _ => Err(invalid(input, "SAS definition")),
        }
    }
}

impl fmt::Display for SasDefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}storage/{}/sas/{}", self.base_url, self.storage_account, self.name)
    }
}

/// URL of a certificate issuer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertificateIssuerId {
    /// Vault base URL
    pub base_url: String,
    /// Issuer name
    pub name: String,
}

impl CertificateIssuerId {
    /// Parses `https://{vault}/certificates/issuers/{name}`.
    pub fn parse(input: &str) -> Result<Self> {
        let (base_url, segments) = split_data_plane_url(input, "certificate issuer")?;
        match segments.as_slice() {
            [certificates, issuers, name]
                if certificates.eq_ignore_ascii_case("certificates")
                    && issuers.eq_ignore_ascii_case("issuers") =>
            {
                Ok(Self {
                    base_url,
                    name: name.clone(),
                })
            }
            _ => Err(invalid(input, "certificate issuer")),
        }
    }
}

impl fmt::Display for CertificateIssuerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}certificates/issuers/{}", self.base_url, self.name)
    }
}

/// ID of one access policy entry: `{vault id}/objectId/{oid}[/applicationId/{aid}]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessPolicyId {
    /// Owning vault
    pub vault_id: VaultId,
    /// Principal object ID
    pub object_id: String,
    /// Compound-identity application ID
    pub application_id: Option<String>,
}

impl AccessPolicyId {
    /// Parses an access policy ID.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim_end_matches('/');
        let lower = trimmed.to_ascii_lowercase();
        let object_at = lower
            .find("/objectid/")
            .ok_or_else(|| invalid(input, "access policy"))?;
        let vault_id = VaultId::parse(&trimmed[..object_at])?;

        let rest: Vec<&str> = trimmed[object_at + 1..].split('/').collect();
        let (object_id, application_id) = match rest.as_slice() {
            [_, oid] if !oid.is_empty() => (oid.to_string(), None),
            [_, oid, app, aid]
                if !oid.is_empty() && app.eq_ignore_ascii_case("applicationId") && !aid.is_empty() =>
            {
                (oid.to_string(), Some(aid.to_string()))
            }
            _ => return Err(invalid(input, "access policy")),
        };

        Ok(Self {
            vault_id,
            object_id,
            application_id,
        })
    }
}

impl fmt::Display for AccessPolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/objectId/{}", self.vault_id, self.object_id)?;
        if let Some(application_id) = &self.application_id {
            write!(f, "/applicationId/{application_id}")?;
        }
        Ok(())
    }
}

/// Kind of managed HSM RBAC object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HsmRoleKind {
    /// Role definition
    Definition,
    /// Role assignment
    Assignment,
}

impl HsmRoleKind {
    fn segment(&self) -> &'static str {
        match self {
            Self::Definition => "roleDefinitions",
            Self::Assignment => "roleAssignments",
        }
    }
}

/// URL of a managed HSM role definition or assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HsmRoleId {
    /// HSM base URL
    pub base_url: String,
    /// Scope, `/` or `/keys` or `/keys/{name}`
    pub scope: String,
    /// Object kind
    pub kind: HsmRoleKind,
    /// Object name (a UUID)
    pub name: String,
}

impl HsmRoleId {
    /// Creates a role object ID.
    pub fn new(base_url: &str, scope: &str, kind: HsmRoleKind, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            scope: normalize_scope(scope),
            kind,
            name: name.into(),
        })
    }

    /// Parses `https://{hsm}{scope}/providers/Microsoft.Authorization/{kind}/{name}`.
    pub fn parse(input: &str, expected: HsmRoleKind) -> Result<Self> {
        let (base_url, segments) = split_data_plane_url(input, "managed HSM role")?;
        let provider_at = segments
            .iter()
            .position(|s| s.eq_ignore_ascii_case("providers"))
            .ok_or_else(|| invalid(input, "managed HSM role"))?;

        match &segments[provider_at..] {
            [_, provider, kind, name]
                if provider.eq_ignore_ascii_case(AUTHORIZATION_PROVIDER)
                    && kind.eq_ignore_ascii_case(expected.segment()) =>
            {
                let scope = format!("/{}", segments[..provider_at].join("/"));
                Ok(Self {
                    base_url,
                    scope: normalize_scope(&scope),
                    kind: expected,
                    name: name.clone(),
                })
            }
            _ => Err(invalid(input, "managed HSM role")),
        }
    }
}

fn normalize_scope(scope: &str) -> String {
    let trimmed = scope.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

impl fmt::Display for HsmRoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = self.base_url.trim_end_matches('/');
        let scope = if self.scope == "/" { "" } else { self.scope.as_str() };
        write!(
            f,
            "{base}{scope}/providers/{AUTHORIZATION_PROVIDER}/{}/{}",
            self.kind.segment(),
            self.name
        )
    }
}
