//! Wire models of the Key Vault management and data-plane APIs.
//!
//! Field names follow the REST payloads (`camelCase`, except the JSON Web Key
//! fields). Optional fields are skipped when serialising so PATCH bodies only
//! carry what changes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Resource tags.
pub type Tags = HashMap<String, String>;

/// Azure error payload: `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

/// Azure error details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error code
    #[serde(default)]
    pub code: String,
    /// Error message
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Management plane: vaults
// ============================================================================

/// Key Vault SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sku {
    /// Always `A`
    pub family: String,
    /// `standard` or `premium`
    pub name: String,
}

/// Permissions of one access policy entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Key permissions
    #[serde(default)]
    pub keys: Vec<String>,
    /// Secret permissions
    #[serde(default)]
    pub secrets: Vec<String>,
    /// Certificate permissions
    #[serde(default)]
    pub certificates: Vec<String>,
    /// Storage permissions
    #[serde(default)]
    pub storage: Vec<String>,
}

/// One access policy entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicyEntry {
    /// Tenant of the principal
    pub tenant_id: String,
    /// Principal object ID
    pub object_id: String,
    /// Application ID of a compound identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    /// Granted permissions
    #[serde(default)]
    pub permissions: Permissions,
}

/// IP network rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRule {
    /// CIDR or address
    pub value: String,
}

/// Virtual network rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNetworkRule {
    /// Subnet resource ID
    pub id: String,
}

/// Network ACLs of a vault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRuleSet {
    /// `AzureServices` or `None`
    #[serde(default)]
    pub bypass: String,
    /// `Allow` or `Deny`
    #[serde(default)]
    pub default_action: String,
    /// IP rules
    #[serde(default)]
    pub ip_rules: Vec<IpRule>,
    /// Virtual network rules
    #[serde(default)]
    pub virtual_network_rules: Vec<VirtualNetworkRule>,
}

/// Vault properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultProperties {
    /// Tenant
    #[serde(default)]
    pub tenant_id: String,
    /// SKU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<Sku>,
    /// Access policies
    #[serde(default)]
    pub access_policies: Vec<AccessPolicyEntry>,
    /// Data-plane URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_uri: Option<String>,
    /// VMs may retrieve certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_for_deployment: Option<bool>,
    /// Disk encryption may retrieve secrets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_for_disk_encryption: Option<bool>,
    /// ARM may retrieve secrets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_for_template_deployment: Option<bool>,
    /// Azure RBAC instead of access policies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_rbac_authorization: Option<bool>,
    /// Soft delete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_soft_delete: Option<bool>,
    /// Soft-delete retention
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_delete_retention_in_days: Option<u32>,
    /// Purge protection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_purge_protection: Option<bool>,
    /// `default` or `recover`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_mode: Option<String>,
    /// Network ACLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_acls: Option<NetworkRuleSet>,
    /// `Enabled` or `Disabled`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_network_access: Option<String>,
    /// Provisioning state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

/// A Key Vault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// Resource ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Location
    #[serde(default)]
    pub location: String,
    /// Tags
    #[serde(default)]
    pub tags: Tags,
    /// Properties
    #[serde(default)]
    pub properties: VaultProperties,
}

/// Page of vaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultList {
    /// Vaults on this page
    #[serde(default)]
    pub value: Vec<Vault>,
    /// Next page
    #[serde(default)]
    pub next_link: Option<String>,
}

/// Properties of a soft-deleted vault or managed HSM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedVaultProperties {
    /// ID of the vault before deletion
    #[serde(default, alias = "mhsmId", skip_serializing_if = "Option::is_none")]
    pub vault_id: Option<String>,
    /// Location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// When it was deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_date: Option<String>,
    /// When Azure purges it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_purge_date: Option<String>,
    /// Purge protection was on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purge_protection_enabled: Option<bool>,
}

/// A soft-deleted vault or managed HSM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedVault {
    /// Deleted resource ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Properties
    #[serde(default)]
    pub properties: DeletedVaultProperties,
}

/// Body of the `accessPolicies/{add|replace|remove}` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPolicyUpdate {
    /// Policies to apply
    pub properties: AccessPolicyUpdateProperties,
}

/// Policies of an [`AccessPolicyUpdate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicyUpdateProperties {
    /// Entries
    pub access_policies: Vec<AccessPolicyEntry>,
}

/// Kind of access policy update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPolicyUpdateKind {
    /// Merge permissions into existing entries
    Add,
    /// Replace the permissions of matching entries
    Replace,
    /// Remove matching entries
    Remove,
}

impl AccessPolicyUpdateKind {
    /// URL segment of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Remove => "remove",
        }
    }
}

// ============================================================================
// Management plane: managed HSMs
// ============================================================================

/// Managed HSM SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedHsmSku {
    /// Always `B`
    pub family: String,
    /// `Standard_B1` or `Custom_B32`
    pub name: String,
}

/// Network ACLs of a managed HSM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedHsmNetworkRuleSet {
    /// `AzureServices` or `None`
    #[serde(default)]
    pub bypass: String,
    /// `Allow` or `Deny`
    #[serde(default)]
    pub default_action: String,
}

/// Managed HSM properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedHsmProperties {
    /// Tenant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Initial administrators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initial_admin_object_ids: Vec<String>,
    /// Data-plane URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hsm_uri: Option<String>,
    /// Soft delete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_soft_delete: Option<bool>,
    /// Soft-delete retention
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_delete_retention_in_days: Option<u32>,
    /// Purge protection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_purge_protection: Option<bool>,
    /// Network ACLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_acls: Option<ManagedHsmNetworkRuleSet>,
    /// `Enabled` or `Disabled`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_network_access: Option<String>,
    /// Provisioning state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
    /// Status message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

/// A managed HSM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedHsm {
    /// Resource ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Location
    #[serde(default)]
    pub location: String,
    /// SKU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<ManagedHsmSku>,
    /// Tags
    #[serde(default)]
    pub tags: Tags,
    /// Properties
    #[serde(default)]
    pub properties: ManagedHsmProperties,
}

// ============================================================================
// Data plane: shared
// ============================================================================

/// Attributes shared by keys, secrets, certificates and storage objects.
///
/// Timestamps are Unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemAttributes {
    /// Enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Not before
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Created (read-only)
    #[serde(default, skip_serializing)]
    pub created: Option<i64>,
    /// Updated (read-only)
    #[serde(default, skip_serializing)]
    pub updated: Option<i64>,
    /// Recovery level (read-only)
    #[serde(default, skip_serializing)]
    pub recovery_level: Option<String>,
}

/// A soft-deleted data-plane item (only the deletion metadata).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedItem {
    /// Item ID
    #[serde(default, alias = "kid")]
    pub id: Option<String>,
    /// Recovery ID
    #[serde(default)]
    pub recovery_id: Option<String>,
    /// Deleted at (Unix seconds)
    #[serde(default)]
    pub deleted_date: Option<i64>,
    /// Purged at (Unix seconds)
    #[serde(default)]
    pub scheduled_purge_date: Option<i64>,
}

// ============================================================================
// Data plane: secrets
// ============================================================================

/// A secret version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBundle {
    /// Versioned ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Content type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<ItemAttributes>,
    /// Tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    /// Backing key of a certificate secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Managed by a certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed: Option<bool>,
}

// ============================================================================
// Data plane: keys
// ============================================================================

/// Public part of a JSON Web Key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    /// Versioned key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Key type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kty: Option<String>,
    /// Permitted operations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_ops: Vec<String>,
    /// RSA modulus (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// EC curve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// A key version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBundle {
    /// Public key material
    #[serde(default)]
    pub key: JsonWebKey,
    /// Attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<ItemAttributes>,
    /// Tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    /// Managed by a certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed: Option<bool>,
}

/// Body of a key create call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCreateParameters {
    /// Key type
    pub kty: String,
    /// RSA key size
    #[serde(rename = "key_size", skip_serializing_if = "Option::is_none")]
    pub key_size: Option<u32>,
    /// EC curve
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// Permitted operations
    #[serde(rename = "key_ops")]
    pub key_ops: Vec<String>,
    /// Attributes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<ItemAttributes>,
    /// Tags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

/// Body of a key update call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUpdateParameters {
    /// Permitted operations
    #[serde(rename = "key_ops", skip_serializing_if = "Vec::is_empty")]
    pub key_ops: Vec<String>,
    /// Attributes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<ItemAttributes>,
    /// Tags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

/// Trigger of a key rotation lifetime action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyLifetimeTrigger {
    /// ISO-8601 duration after creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_after_create: Option<String>,
    /// ISO-8601 duration before expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_before_expiry: Option<String>,
}

/// Action of a key rotation lifetime action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyLifetimeActionType {
    /// `Rotate` or `Notify`
    #[serde(rename = "type")]
    pub kind: String,
}

/// One key rotation lifetime action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyLifetimeAction {
    /// Trigger
    pub trigger: KeyLifetimeTrigger,
    /// Action
    pub action: KeyLifetimeActionType,
}

/// Attributes of a rotation policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRotationPolicyAttributes {
    /// Expiry of new versions, ISO-8601 duration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<String>,
}

/// Key rotation policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRotationPolicy {
    /// Lifetime actions
    #[serde(default)]
    pub lifetime_actions: Vec<KeyLifetimeAction>,
    /// Attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<KeyRotationPolicyAttributes>,
}

// ============================================================================
// Data plane: certificates
// ============================================================================

/// Key properties of a certificate policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CertificateKeyProperties {
    /// Private key is exportable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exportable: Option<bool>,
    /// Key type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kty: Option<String>,
    /// RSA key size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_size: Option<u32>,
    /// Reuse the key on renewal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse_key: Option<bool>,
    /// EC curve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
}

/// Secret properties of a certificate policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSecretProperties {
    /// `application/x-pkcs12` or `application/x-pem-file`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Subject alternative names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SubjectAlternativeNames {
    /// E-mail addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
    /// DNS names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,
    /// User principal names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upns: Vec<String>,
}

/// X.509 properties of a certificate policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct X509CertificateProperties {
    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Extended key usages
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ekus: Vec<String>,
    /// Subject alternative names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sans: Option<SubjectAlternativeNames>,
    /// Key usages
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_usage: Vec<String>,
    /// Validity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_months: Option<u32>,
}

/// Trigger of a certificate lifetime action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CertificateLifetimeTrigger {
    /// Percentage of lifetime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime_percentage: Option<u32>,
    /// Days before expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_before_expiry: Option<u32>,
}

/// Action of a certificate lifetime action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CertificateLifetimeActionType {
    /// `AutoRenew` or `EmailContacts`
    pub action_type: String,
}

/// One certificate lifetime action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateLifetimeAction {
    /// Trigger
    pub trigger: CertificateLifetimeTrigger,
    /// Action
    pub action: CertificateLifetimeActionType,
}

/// Issuer reference of a certificate policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerParameters {
    /// `Self`, `Unknown` or an issuer name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Certificate type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cty: Option<String>,
}

/// Certificate policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CertificatePolicy {
    /// Key properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_props: Option<CertificateKeyProperties>,
    /// Secret properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_props: Option<CertificateSecretProperties>,
    /// X.509 properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x509_props: Option<X509CertificateProperties>,
    /// Lifetime actions
    #[serde(default)]
    pub lifetime_actions: Vec<CertificateLifetimeAction>,
    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<IssuerParameters>,
}

/// A certificate version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBundle {
    /// Versioned ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Backing key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Backing secret ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// SHA-1 thumbprint (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5t: Option<String>,
    /// DER certificate (base64)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cer: Option<String>,
    /// Policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<CertificatePolicy>,
    /// Attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<ItemAttributes>,
    /// Tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

/// Pending certificate operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CertificateOperation {
    /// Operation ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// `inProgress`, `completed`, `failed`, `cancelled`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Status details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_details: Option<String>,
    /// Issuer the request went to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<IssuerParameters>,
    /// Failure details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

/// Certificate contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// E-mail
    pub email: String,
    /// Name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Phone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Certificate contacts of a vault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contacts {
    /// Contacts
    #[serde(default, rename = "contacts")]
    pub contact_list: Vec<Contact>,
}

/// Issuer credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IssuerCredentials {
    /// Account ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Password (write-only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwd: Option<String>,
}

/// Issuer administrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AdministratorDetails {
    /// First name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Last name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// E-mail
    #[serde(default)]
    pub email: String,
    /// Phone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Issuer organisation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrganizationDetails {
    /// Organisation ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Administrators
    #[serde(default)]
    pub admin_details: Vec<AdministratorDetails>,
}

/// A certificate issuer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IssuerBundle {
    /// Issuer ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Provider (`DigiCert`, `GlobalSign`, `OneCertV2-PrivateCA`, ...)
    #[serde(default)]
    pub provider: String,
    /// Credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<IssuerCredentials>,
    /// Organisation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_details: Option<OrganizationDetails>,
}

// ============================================================================
// Data plane: managed storage
// ============================================================================

/// A managed storage account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageBundle {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Storage account resource ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Active key (`key1` or `key2`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_key_name: Option<String>,
    /// Regenerate keys automatically
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_regenerate_key: Option<bool>,
    /// Regeneration period, ISO-8601 duration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regeneration_period: Option<String>,
    /// Attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<ItemAttributes>,
    /// Tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

/// A SAS definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SasDefinitionBundle {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Secret holding generated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Template SAS token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_uri: Option<String>,
    /// `account` or `service`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sas_type: Option<String>,
    /// Validity, ISO-8601 duration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_period: Option<String>,
    /// Attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<ItemAttributes>,
    /// Tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

// ============================================================================
// Data plane: managed HSM RBAC
// ============================================================================

/// Permission block of a role definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePermission {
    /// Allowed control-plane actions
    #[serde(default)]
    pub actions: Vec<String>,
    /// Excluded control-plane actions
    #[serde(default)]
    pub not_actions: Vec<String>,
    /// Allowed data actions
    #[serde(default)]
    pub data_actions: Vec<String>,
    /// Excluded data actions
    #[serde(default)]
    pub not_data_actions: Vec<String>,
}

/// Role definition properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDefinitionProperties {
    /// Display name
    #[serde(default)]
    pub role_name: String,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `CustomRole` or `AKVBuiltInRole`
    #[serde(default, rename = "type")]
    pub role_type: String,
    /// Permissions
    #[serde(default)]
    pub permissions: Vec<RolePermission>,
    /// Scopes the role can be assigned at
    #[serde(default)]
    pub assignable_scopes: Vec<String>,
}

/// A role definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    /// ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name (UUID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Properties
    #[serde(default)]
    pub properties: RoleDefinitionProperties,
}

/// Role assignment properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignmentProperties {
    /// Scope (read-only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Assigned role definition ID
    #[serde(default)]
    pub role_definition_id: String,
    /// Principal object ID
    #[serde(default)]
    pub principal_id: String,
}

/// A role assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name (UUID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Properties
    #[serde(default)]
    pub properties: RoleAssignmentProperties,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vault_deserializes_from_arm_payload() {
        let vault: Vault = serde_json::from_value(json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv1",
            "name": "kv1",
            "location": "westeurope",
            "properties": {
                "tenantId": "t",
                "sku": {"family": "A", "name": "standard"},
                "vaultUri": "https://kv1.vault.azure.net/",
                "enableSoftDelete": true,
                "enablePurgeProtection": true,
                "networkAcls": {"bypass": "AzureServices", "defaultAction": "Deny", "ipRules": [{"value": "1.2.3.4/32"}]},
                "provisioningState": "Succeeded"
            }
        }))
        .unwrap();

        assert!(vault.tags.is_empty());
        assert_eq!(vault.properties.enable_purge_protection, Some(true));
        assert_eq!(vault.properties.network_acls.unwrap().ip_rules[0].value, "1.2.3.4/32");
    }

    #[test]
    fn test_key_create_uses_jwk_field_names() {
        let body = serde_json::to_value(KeyCreateParameters {
            kty: "RSA".into(),
            key_size: Some(2048),
            key_ops: vec!["sign".into()],
            ..Default::default()
        })
        .unwrap();

        assert_eq!(body, json!({"kty": "RSA", "key_size": 2048, "key_ops": ["sign"]}));
    }

    #[test]
    fn test_read_only_attributes_are_not_sent() {
        let attributes = ItemAttributes {
            enabled: Some(true),
            created: Some(1),
            recovery_level: Some("Recoverable".into()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(attributes).unwrap(), json!({"enabled": true}));
    }

    #[test]
    fn test_certificate_policy_shape() {
        let policy: CertificatePolicy = serde_json::from_value(json!({
            "key_props": {"exportable": true, "kty": "RSA", "key_size": 2048, "reuse_key": false},
            "secret_props": {"contentType": "application/x-pkcs12"},
            "x509_props": {"subject": "CN=example", "validity_months": 12, "sans": {"dns_names": ["a.example"]}},
            "lifetime_actions": [{"trigger": {"days_before_expiry": 30}, "action": {"action_type": "AutoRenew"}}],
            "issuer": {"name": "Self"}
        }))
        .unwrap();

        assert_eq!(policy.issuer.unwrap().name.as_deref(), Some("Self"));
        assert_eq!(
            policy.x509_props.unwrap().sans.unwrap().dns_names,
            vec!["a.example".to_string()]
        );
        assert_eq!(policy.lifetime_actions[0].trigger.days_before_expiry, Some(30));
    }

    #[test]
    fn test_deleted_hsm_alias() {
        let deleted: DeletedVault = serde_json::from_value(json!({
            "properties": {"mhsmId": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.KeyVault/managedHSMs/h1", "location": "eastus"}
        }))
        .unwrap();
        assert!(deleted.properties.vault_id.unwrap().ends_with("/h1"));
    }
}
