//! Key Vault handler.

use super::access_policy::AccessPolicy;
use super::Resource;
use crate::client::models::{
    Contact, Contacts, IpRule, NetworkRuleSet, Sku, Tags, Vault, VaultProperties, VirtualNetworkRule,
};
use crate::config::{Operation, OperationTimeouts};
use crate::ids::{normalize_location, DeletedVaultId, VaultId};
use crate::locks::{VAULT_RESOURCE, VIRTUAL_NETWORK_RESOURCE};
use crate::poll::{Deadline, Observation, StateWait};
use crate::purge::{delete_and_optionally_purge, VaultDeleter};
use crate::transport::{ApiRequest, Audience, Method};
use crate::validation::{validate_soft_delete_retention_days, validate_uuid, validate_vault_name};
use crate::{Provider, Result, VaultwrightError};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Timeouts of the vault handler.
pub const VAULT_TIMEOUTS: OperationTimeouts = OperationTimeouts::minutes(30, 5, 30, 30);

const DEFAULT_SOFT_DELETE_RETENTION_DAYS: u32 = 90;
const SKU_NAMES: &[&str] = &["standard", "premium"];

const AVAILABILITY_DELAY: Duration = Duration::from_secs(30);
const AVAILABILITY_POLL_INTERVAL: Duration = Duration::from_secs(10);
const AVAILABILITY_CONSECUTIVE_READS: usize = 10;
const PROVISIONING_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Network ACLs of a vault.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkAcls {
    /// `AzureServices` or `None`
    pub bypass: String,
    /// `Allow` or `Deny`
    pub default_action: String,
    /// Allowed addresses and CIDRs
    pub ip_rules: Vec<String>,
    /// Allowed subnet IDs
    pub virtual_network_subnet_ids: Vec<String>,
}

impl NetworkAcls {
    fn validate(&self) -> Result<()> {
        if !["AzureServices", "None"].contains(&self.bypass.as_str()) {
            return Err(VaultwrightError::InvalidConfig(format!(
                "network_acls.bypass must be AzureServices or None, got {:?}",
                self.bypass
            )));
        }
        if !["Allow", "Deny"].contains(&self.default_action.as_str()) {
            return Err(VaultwrightError::InvalidConfig(format!(
                "network_acls.default_action must be Allow or Deny, got {:?}",
                self.default_action
            )));
        }
        for subnet_id in &self.virtual_network_subnet_ids {
            virtual_network_name(subnet_id)?;
        }
        Ok(())
    }

    fn expand(&self) -> NetworkRuleSet {
        NetworkRuleSet {
            bypass: self.bypass.clone(),
            default_action: self.default_action.clone(),
            ip_rules: self.ip_rules.iter().map(|value| IpRule { value: value.clone() }).collect(),
            virtual_network_rules: self
                .virtual_network_subnet_ids
                .iter()
                .map(|id| VirtualNetworkRule { id: id.clone() })
                .collect(),
        }
    }

    fn flatten(input: &NetworkRuleSet) -> Self {
        Self {
            bypass: input.bypass.clone(),
            default_action: input.default_action.clone(),
            ip_rules: input.ip_rules.iter().map(|r| r.value.clone()).collect(),
            virtual_network_subnet_ids: input.virtual_network_rules.iter().map(|r| r.id.clone()).collect(),
        }
    }
}

/// Name of the virtual network a subnet ID belongs to.
fn virtual_network_name(subnet_id: &str) -> Result<String> {
    let segments: Vec<&str> = subnet_id.trim_matches('/').split('/').collect();
    let position = segments
        .iter()
        .position(|s| s.eq_ignore_ascii_case("virtualNetworks"));
    let name = position.and_then(|at| match (segments.get(at + 1), segments.get(at + 2), segments.get(at + 3)) {
        (Some(vnet), Some(subnets), Some(subnet))
            if !vnet.is_empty() && subnets.eq_ignore_ascii_case("subnets") && !subnet.is_empty() =>
        {
            Some(vnet.to_string())
        }
        _ => None,
    });
    match name {
        Some(name) => Ok(name),
        None => Err(VaultwrightError::InvalidId(format!(
            "{subnet_id:?} is not a valid subnet ID"
        ))),
    }
}

fn virtual_network_names(acls: Option<&NetworkRuleSet>) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for rule in acls.map(|a| a.virtual_network_rules.as_slice()).unwrap_or_default() {
        let name = virtual_network_name(&rule.id)?;
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Ok(names)
}

/// Certificate contact of a vault.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateContact {
    /// E-mail
    pub email: String,
    /// Name
    pub name: Option<String>,
    /// Phone
    pub phone: Option<String>,
}

fn expand_contacts(contacts: &[CertificateContact]) -> Contacts {
    Contacts {
        contact_list: contacts
            .iter()
            .map(|c| Contact {
                email: c.email.clone(),
                name: c.name.clone(),
                phone: c.phone.clone(),
            })
            .collect(),
    }
}

/// Desired vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    /// Vault name
    pub name: String,
    /// Resource group
    pub resource_group_name: String,
    /// Azure region
    pub location: String,
    /// Tenant that authenticates requests
    pub tenant_id: String,
    /// `standard` or `premium`
    pub sku_name: String,
    /// Inline access policies
    pub access_policies: Vec<AccessPolicy>,
    /// VMs may retrieve certificates
    pub enabled_for_deployment: bool,
    /// Disk encryption may retrieve secrets
    pub enabled_for_disk_encryption: bool,
    /// ARM may retrieve secrets
    pub enabled_for_template_deployment: bool,
    /// Azure RBAC instead of access policies
    pub enable_rbac_authorization: bool,
    /// Network ACLs
    pub network_acls: Option<NetworkAcls>,
    /// Purge protection (cannot be disabled once enabled)
    pub purge_protection_enabled: bool,
    /// Public network access
    pub public_network_access_enabled: bool,
    /// Soft-delete retention, 7 to 90 days
    pub soft_delete_retention_days: u32,
    /// Certificate contacts
    pub contacts: Vec<CertificateContact>,
    /// Tags
    pub tags: Tags,
}

impl VaultConfig {
    /// A standard-SKU, publicly reachable vault with 90 days of soft delete.
    pub fn new(
        name: impl Into<String>,
        resource_group_name: impl Into<String>,
        location: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            resource_group_name: resource_group_name.into(),
            location: location.into(),
            tenant_id: tenant_id.into(),
            sku_name: "standard".to_string(),
            access_policies: Vec::new(),
            enabled_for_deployment: false,
            enabled_for_disk_encryption: false,
            enabled_for_template_deployment: false,
            enable_rbac_authorization: false,
            network_acls: None,
            purge_protection_enabled: false,
            public_network_access_enabled: true,
            soft_delete_retention_days: DEFAULT_SOFT_DELETE_RETENTION_DAYS,
            contacts: Vec::new(),
            tags: Tags::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        validate_vault_name(&self.name)?;
        validate_uuid("tenant_id", &self.tenant_id)?;
        validate_soft_delete_retention_days(self.soft_delete_retention_days)?;
        if !SKU_NAMES.contains(&self.sku_name.as_str()) {
            return Err(VaultwrightError::InvalidConfig(format!(
                "sku_name must be standard or premium, got {:?}",
                self.sku_name
            )));
        }
        for policy in &self.access_policies {
            policy.validate()?;
        }
        if let Some(acls) = &self.network_acls {
            acls.validate()?;
        }
        Ok(())
    }

    fn public_network_access(&self) -> &'static str {
        if self.public_network_access_enabled {
            "Enabled"
        } else {
            "Disabled"
        }
    }
}

/// Observed vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultState {
    /// Resource ID
    pub id: String,
    /// Vault name
    pub name: String,
    /// Resource group
    pub resource_group_name: String,
    /// Azure region, normalised
    pub location: String,
    /// Tenant
    pub tenant_id: String,
    /// SKU name
    pub sku_name: String,
    /// Data-plane URL
    pub vault_uri: String,
    /// Access policies
    pub access_policies: Vec<AccessPolicy>,
    /// VMs may retrieve certificates
    pub enabled_for_deployment: bool,
    /// Disk encryption may retrieve secrets
    pub enabled_for_disk_encryption: bool,
    /// ARM may retrieve secrets
    pub enabled_for_template_deployment: bool,
    /// Azure RBAC instead of access policies
    pub enable_rbac_authorization: bool,
    /// Network ACLs
    pub network_acls: Option<NetworkAcls>,
    /// Purge protection
    pub purge_protection_enabled: bool,
    /// Public network access
    pub public_network_access_enabled: bool,
    /// Soft-delete retention (90 when the API omits it)
    pub soft_delete_retention_days: u32,
    /// Certificate contacts
    pub contacts: Vec<CertificateContact>,
    /// Tags
    pub tags: Tags,
}

/// Key Vault handler.
pub struct VaultResource {
    provider: Arc<Provider>,
}

impl VaultResource {
    /// Creates the handler.
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }

    /// Reads a vault by name, failing when it does not exist.
    pub async fn lookup(&self, name: &str, resource_group_name: &str) -> Result<VaultState> {
        let id = VaultId::new(self.provider.client().subscription_id(), resource_group_name, name);
        self.read(&id.to_string())
            .await?
            .ok_or_else(|| VaultwrightError::NotFound(format!("Key Vault {:?}", id.to_string())))
    }

    async fn soft_deleted_exists(&self, deleted_id: &DeletedVaultId) -> Result<bool> {
        match self.provider.client().get_deleted_vault(deleted_id).await {
            Ok(_) => Ok(true),
            // without subscription-level read access the API answers 403
            Err(err) if err.is_not_found() || err.is_forbidden() => Ok(false),
            Err(err) => Err(VaultwrightError::op(
                "checking for the presence of an existing soft-deleted",
                format!("Key Vault {:?} (location {:?})", deleted_id.name, deleted_id.location),
                err,
            )),
        }
    }

    async fn wait_for_provisioning(&self, id: &VaultId, deadline: Deadline) -> Result<Vault> {
        StateWait::new(
            &["Creating", "Updating", "RegisteringDns", "Provisioning"],
            &["Succeeded"],
            deadline,
        )
        .with_poll_interval(PROVISIONING_POLL_INTERVAL)
        .wait(|| async move {
            match self.provider.client().get_vault(id).await {
                Ok(vault) => {
                    let state = vault
                        .properties
                        .provisioning_state
                        .clone()
                        .unwrap_or_else(|| "Succeeded".to_string());
                    Ok(Observation::found(vault, state))
                }
                Err(err) if err.is_not_found() => Ok(Observation::NotFound),
                Err(err) => Err(err),
            }
        })
        .await
    }

    /// Polls the data-plane endpoint until it answers ten times in a row.
    ///
    /// Any HTTP response counts as available; only a failure to connect keeps
    /// the vault pending.
    async fn wait_for_availability(&self, vault_uri: &str, deadline: Deadline) -> Result<()> {
        let transport = self.provider.client().transport();
        StateWait::new(&["pending"], &["available"], deadline)
            .with_delay(AVAILABILITY_DELAY)
            .with_poll_interval(AVAILABILITY_POLL_INTERVAL)
            .with_continuous_target_occurrence(AVAILABILITY_CONSECUTIVE_READS)
            .wait(|| async move {
                let request = ApiRequest {
                    method: Method::Get,
                    url: vault_uri.to_string(),
                    audience: Audience::None,
                    body: None,
                };
                let state = match transport.send(request).await {
                    Ok(_) => "available",
                    Err(err) => {
                        debug!(%vault_uri, error = %err, "Key Vault is not reachable yet");
                        "pending"
                    }
                };
                Ok(Observation::found((), state))
            })
            .await
    }

    fn flatten(&self, id: &VaultId, vault: Vault, contacts: Vec<CertificateContact>) -> VaultState {
        let properties = vault.properties;
        let sku_name = properties
            .sku
            .map(|sku| {
                SKU_NAMES
                    .iter()
                    .find(|name| name.eq_ignore_ascii_case(&sku.name))
                    .map(|name| name.to_string())
                    .unwrap_or(sku.name)
            })
            .unwrap_or_default();

        VaultState {
            id: id.to_string(),
            name: id.name.clone(),
            resource_group_name: id.resource_group.clone(),
            location: normalize_location(&vault.location),
            tenant_id: properties.tenant_id,
            sku_name,
            vault_uri: properties.vault_uri.unwrap_or_default(),
            access_policies: properties.access_policies.iter().map(AccessPolicy::from_entry).collect(),
            enabled_for_deployment: properties.enabled_for_deployment.unwrap_or(false),
            enabled_for_disk_encryption: properties.enabled_for_disk_encryption.unwrap_or(false),
            enabled_for_template_deployment: properties.enabled_for_template_deployment.unwrap_or(false),
            enable_rbac_authorization: properties.enable_rbac_authorization.unwrap_or(false),
            network_acls: properties.network_acls.as_ref().map(NetworkAcls::flatten),
            purge_protection_enabled: properties.enable_purge_protection.unwrap_or(false),
            public_network_access_enabled: properties
                .public_network_access
                .map(|p| p.eq_ignore_ascii_case("Enabled"))
                .unwrap_or(true),
            soft_delete_retention_days: properties
                .soft_delete_retention_in_days
                .filter(|days| *days != 0)
                .unwrap_or(DEFAULT_SOFT_DELETE_RETENTION_DAYS),
            contacts,
            tags: vault.tags,
        }
    }

    fn build_patch(existing: &Vault, prior: &VaultConfig, desired: &VaultConfig) -> Result<Value> {
        let mut properties = Map::new();

        if prior.access_policies != desired.access_policies {
            let entries: Vec<_> = desired.access_policies.iter().map(AccessPolicy::to_entry).collect();
            properties.insert("accessPolicies".into(), serde_json::to_value(entries)?);
        }
        if prior.enabled_for_deployment != desired.enabled_for_deployment {
            properties.insert("enabledForDeployment".into(), json!(desired.enabled_for_deployment));
        }
        if prior.enabled_for_disk_encryption != desired.enabled_for_disk_encryption {
            properties.insert("enabledForDiskEncryption".into(), json!(desired.enabled_for_disk_encryption));
        }
        if prior.enabled_for_template_deployment != desired.enabled_for_template_deployment {
            properties.insert(
                "enabledForTemplateDeployment".into(),
                json!(desired.enabled_for_template_deployment),
            );
        }
        if prior.enable_rbac_authorization != desired.enable_rbac_authorization {
            properties.insert("enableRbacAuthorization".into(), json!(desired.enable_rbac_authorization));
        }
        if prior.network_acls != desired.network_acls {
            let acls = desired.network_acls.as_ref().map(NetworkAcls::expand);
            properties.insert("networkAcls".into(), serde_json::to_value(acls)?);
        }
        if prior.purge_protection_enabled != desired.purge_protection_enabled {
            let enabled = existing.properties.enable_purge_protection.unwrap_or(false);
            if enabled && !desired.purge_protection_enabled {
                return Err(VaultwrightError::InvalidConfig(
                    "once purge protection has been enabled it cannot be disabled".into(),
                ));
            }
            properties.insert("enablePurgeProtection".into(), json!(desired.purge_protection_enabled));
            if desired.purge_protection_enabled {
                properties.insert("enableSoftDelete".into(), json!(true));
            }
        }
        if prior.public_network_access_enabled != desired.public_network_access_enabled {
            properties.insert("publicNetworkAccess".into(), json!(desired.public_network_access()));
        }
        if prior.sku_name != desired.sku_name {
            properties.insert(
                "sku".into(),
                serde_json::to_value(Sku {
                    family: "A".into(),
                    name: desired.sku_name.clone(),
                })?,
            );
        }
        if prior.soft_delete_retention_days != desired.soft_delete_retention_days {
            if existing.properties.soft_delete_retention_in_days.unwrap_or(0) != 0 {
                return Err(VaultwrightError::InvalidConfig(
                    "once soft_delete_retention_days has been configured it cannot be modified".into(),
                ));
            }
            properties.insert("softDeleteRetentionInDays".into(), json!(desired.soft_delete_retention_days));
        }
        if prior.tenant_id != desired.tenant_id {
            properties.insert("tenantId".into(), json!(desired.tenant_id));
        }

        let mut patch = Map::new();
        if !properties.is_empty() {
            patch.insert("properties".into(), Value::Object(properties));
        }
        if prior.tags != desired.tags {
            patch.insert("tags".into(), serde_json::to_value(&desired.tags)?);
        }
        Ok(Value::Object(patch))
    }
}

#[async_trait]
impl Resource for VaultResource {
    type Config = VaultConfig;
    type State = VaultState;

    fn kind(&self) -> &'static str {
        "key_vault"
    }

    fn default_timeouts(&self) -> OperationTimeouts {
        VAULT_TIMEOUTS
    }

    fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn create(&self, config: &VaultConfig) -> Result<VaultState> {
        config.validate()?;
        let deadline = self.deadline(Operation::Create);
        let client = self.provider.client();
        let id = VaultId::new(client.subscription_id(), &config.resource_group_name, &config.name);
        let location = normalize_location(&config.location);
        let target = format!("Key Vault {:?}", id.to_string());

        if !config.contacts.is_empty() && !config.public_network_access_enabled {
            return Err(VaultwrightError::InvalidConfig(format!(
                "{target}: contacts cannot be set when public network access is disabled"
            )));
        }

        let _vault_guard = self.provider.locks().lock(VAULT_RESOURCE, &id.name).await;

        match client.get_vault(&id).await {
            Ok(_) => return Err(VaultwrightError::already_exists(self.kind(), id.to_string())),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(VaultwrightError::op("checking for presence of existing", &target, err)),
        }

        let deleted_id = DeletedVaultId::vault(&id.subscription_id, &location, &id.name);
        let recover = self.soft_deleted_exists(&deleted_id).await?;
        if recover && !self.provider.features().recover_soft_deleted_key_vaults {
            return Err(VaultwrightError::SoftDeleted {
                name: id.name.clone(),
                location,
            });
        }
        if recover {
            info!(vault = %id.name, %location, "recovering soft-deleted Key Vault");
        }

        let mut properties = VaultProperties {
            tenant_id: config.tenant_id.clone(),
            sku: Some(Sku {
                family: "A".into(),
                name: config.sku_name.clone(),
            }),
            access_policies: config.access_policies.iter().map(AccessPolicy::to_entry).collect(),
            enabled_for_deployment: Some(config.enabled_for_deployment),
            enabled_for_disk_encryption: Some(config.enabled_for_disk_encryption),
            enabled_for_template_deployment: Some(config.enabled_for_template_deployment),
            enable_rbac_authorization: Some(config.enable_rbac_authorization),
            enable_soft_delete: Some(true),
            network_acls: config.network_acls.as_ref().map(NetworkAcls::expand),
            public_network_access: Some(config.public_network_access().to_string()),
            create_mode: Some(if recover { "recover" } else { "default" }.to_string()),
            ..Default::default()
        };
        if config.purge_protection_enabled {
            properties.enable_purge_protection = Some(true);
        }
        if config.soft_delete_retention_days != DEFAULT_SOFT_DELETE_RETENTION_DAYS {
            properties.soft_delete_retention_in_days = Some(config.soft_delete_retention_days);
        }
        let body = Vault {
            location: location.clone(),
            tags: config.tags.clone(),
            properties,
            ..Default::default()
        };

        let vnets = virtual_network_names(body.properties.network_acls.as_ref())?;
        let _vnet_guards = self.provider.locks().lock_many(VIRTUAL_NETWORK_RESOURCE, &vnets).await;

        client
            .create_or_update_vault(&id, &body)
            .await
            .map_err(|e| VaultwrightError::op("creating", &target, e))?;

        let vault = self
            .wait_for_provisioning(&id, deadline)
            .await
            .map_err(|e| VaultwrightError::op("waiting for provisioning of", &target, e))?;
        let vault_uri = vault.properties.vault_uri.clone().ok_or_else(|| {
            VaultwrightError::op(
                "retrieving",
                &target,
                VaultwrightError::InvalidConfig("the API returned no vault URI".into()),
            )
        })?;
        self.provider.cache().insert(&id.to_string(), &vault_uri).await;

        if config.public_network_access_enabled {
            debug!(vault = %id.name, "waiting for Key Vault to become available");
            self.wait_for_availability(&vault_uri, deadline)
                .await
                .map_err(|e| VaultwrightError::op("waiting for availability of", &target, e))?;
        }

        if !config.contacts.is_empty() {
            client
                .set_certificate_contacts(&vault_uri, &expand_contacts(&config.contacts))
                .await
                .map_err(|e| VaultwrightError::op("setting contacts for", &target, e))?;
        }

        self.read(&id.to_string())
            .await?
            .ok_or_else(|| VaultwrightError::NotFound(target))
    }

    async fn read(&self, id: &str) -> Result<Option<VaultState>> {
        let id = VaultId::parse(id)?;
        let client = self.provider.client();

        let vault = match client.get_vault(&id).await {
            Ok(vault) => vault,
            Err(err) if err.is_not_found() => {
                debug!(%id, "Key Vault was not found - removing from state");
                return Ok(None);
            }
            Err(err) => return Err(VaultwrightError::op("retrieving", format!("Key Vault {:?}", id.to_string()), err)),
        };

        let vault_uri = vault.properties.vault_uri.clone().unwrap_or_default();
        if !vault_uri.is_empty() {
            self.provider.cache().insert(&id.to_string(), &vault_uri).await;
        }

        let public = vault
            .properties
            .public_network_access
            .as_deref()
            .map(|p| p.eq_ignore_ascii_case("Enabled"))
            .unwrap_or(true);

        // a private vault may not be reachable until its private endpoint exists
        let contacts = if vault_uri.is_empty() {
            Contacts::default()
        } else {
            match client.get_certificate_contacts(&vault_uri).await {
                Ok(contacts) => contacts,
                Err(err) if !public || err.is_forbidden() || err.is_not_found() => Contacts::default(),
                Err(err) => return Err(VaultwrightError::op("retrieving contacts for", format!("Key Vault {:?}", id.to_string()), err)),
            }
        };
        let contacts = contacts
            .contact_list
            .into_iter()
            .map(|c| CertificateContact {
                email: c.email,
                name: c.name,
                phone: c.phone,
            })
            .collect();

        Ok(Some(self.flatten(&id, vault, contacts)))
    }

    async fn update(&self, id: &str, prior: &VaultConfig, desired: &VaultConfig) -> Result<VaultState> {
        desired.validate()?;
        let id = VaultId::parse(id)?;
        let target = format!("Key Vault {:?}", id.to_string());
        let client = self.provider.client();

        if prior.name != desired.name
            || prior.resource_group_name != desired.resource_group_name
            || normalize_location(&prior.location) != normalize_location(&desired.location)
        {
            return Err(VaultwrightError::InvalidConfig(format!(
                "{target}: changing name, resource group or location requires replacing the vault"
            )));
        }

        let vault_guard = self.provider.locks().lock(VAULT_RESOURCE, &id.name).await;

        let existing = client
            .get_vault(&id)
            .await
            .map_err(|e| VaultwrightError::op("retrieving", &target, e))?;

        let patch = Self::build_patch(&existing, prior, desired)
            .map_err(|e| VaultwrightError::op("updating", &target, e))?;

        let vnets = if prior.network_acls != desired.network_acls {
            virtual_network_names(desired.network_acls.as_ref().map(NetworkAcls::expand).as_ref())?
        } else {
            Vec::new()
        };
        let vnet_guards = self.provider.locks().lock_many(VIRTUAL_NETWORK_RESOURCE, &vnets).await;

        client
            .update_vault(&id, patch)
            .await
            .map_err(|e| VaultwrightError::op("updating", &target, e))?;

        if prior.contacts != desired.contacts {
            let vault_uri = existing.properties.vault_uri.clone().ok_or_else(|| {
                VaultwrightError::op(
                    "updating contacts for",
                    &target,
                    VaultwrightError::InvalidConfig("the vault has no vault URI".into()),
                )
            })?;
            let result = if desired.contacts.is_empty() {
                client.delete_certificate_contacts(&vault_uri).await
            } else {
                client
                    .set_certificate_contacts(&vault_uri, &expand_contacts(&desired.contacts))
                    .await
                    .map(|_| ())
            };
            result.map_err(|e| VaultwrightError::op("updating contacts for", &target, e))?;
        }

        drop(vnet_guards);
        drop(vault_guard);
        self.read(&id.to_string())
            .await?
            .ok_or_else(|| VaultwrightError::NotFound(target))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = VaultId::parse(id)?;
        let deadline = self.deadline(Operation::Delete);
        let target = format!("Key Vault {:?}", id.to_string());
        let client = self.provider.client();

        let _vault_guard = self.provider.locks().lock(VAULT_RESOURCE, &id.name).await;

        let existing = match client.get_vault(&id).await {
            Ok(vault) => vault,
            Err(err) if err.is_not_found() => {
                self.provider.cache().remove(&id.to_string()).await;
                return Ok(());
            }
            Err(err) => return Err(VaultwrightError::op("retrieving", &target, err)),
        };

        let location = normalize_location(&existing.location);
        let soft_delete = existing.properties.enable_soft_delete.unwrap_or(false);
        let purge_protection = existing.properties.enable_purge_protection.unwrap_or(false);
        let purge_feature = self.provider.features().purge_soft_delete_on_destroy && soft_delete;

        let vnets = virtual_network_names(existing.properties.network_acls.as_ref())?;
        let _vnet_guards = self.provider.locks().lock_many(VIRTUAL_NETWORK_RESOURCE, &vnets).await;

        let deleter = VaultDeleter::new(client, id.clone(), &location);
        delete_and_optionally_purge(&deleter, purge_feature && !purge_protection, deadline).await?;

        if purge_feature && purge_protection {
            let deleted_id = DeletedVaultId::vault(&id.subscription_id, &location, &id.name);
            match client.get_deleted_vault(&deleted_id).await {
                Ok(deleted) => info!(
                    vault = %id.name,
                    deleted = ?deleted.properties.deletion_date,
                    scheduled_purge = ?deleted.properties.scheduled_purge_date,
                    "Key Vault has purge protection enabled; Azure will purge it on schedule"
                ),
                Err(err) => debug!(vault = %id.name, error = %err, "Key Vault has purge protection enabled and will be purged by Azure"),
            }
        }

        self.provider.cache().remove(&id.to_string()).await;
        Ok(())
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::{Config, KeyVaultFeatures, TransportType};

    const ARM: &str = "https://management.azure.com";
    const TENANT: &str = "00000000-0000-0000-0000-000000000001";

    fn handler_with(transport: Arc<MockTransport>, features: KeyVaultFeatures) -> VaultResource {
        let config = Config::new(TransportType::Mock)
            .with_subscription_id("sub-1")
            .with_features(features);
        VaultResource::new(Arc::new(Provider::with_transport(config, transport)))
    }

    fn handler(transport: Arc<MockTransport>) -> VaultResource {
        handler_with(transport, KeyVaultFeatures::default())
    }

    fn vault_url() -> String {
        format!("{ARM}{}", VaultId::new("sub-1", "rg", "kv1"))
    }

    fn deleted_url() -> String {
        format!("{ARM}{}", DeletedVaultId::vault("sub-1", "westeurope", "kv1"))
    }

    fn vault_body(extra: Value) -> Value {
        let mut body = json!({
            "id": VaultId::new("sub-1", "rg", "kv1").to_string(),
            "name": "kv1",
            "location": "West Europe",
            "properties": {
                "tenantId": TENANT,
                "sku": {"family": "A", "name": "Standard"},
                "vaultUri": "https://kv1.vault.azure.net/",
                "enableSoftDelete": true,
                "provisioningState": "Succeeded"
            }
        });
        if let (Some(props), Some(extra)) = (body["properties"].as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                props.insert(k.clone(), v.clone());
            }
        }
        body
    }

    #[test]
    fn test_virtual_network_name() {
        let subnet = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet1/subnets/default";
        assert_eq!(virtual_network_name(subnet).unwrap(), "vnet1");
        assert!(virtual_network_name("/subscriptions/s/resourceGroups/rg").is_err());
    }

    #[test]
    fn test_validation_runs_before_any_call() {
        let mut config = VaultConfig::new("kv1", "rg", "westeurope", TENANT);
        config.soft_delete_retention_days = 3;
        assert!(config.validate().is_err());

        let config = VaultConfig::new("1kv", "rg", "westeurope", TENANT);
        assert!(matches!(config.validate(), Err(VaultwrightError::InvalidName(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_and_reads_back() {
        let transport = Arc::new(MockTransport::new());
        transport.on_empty(Method::Get, &vault_url(), 404).await;
        transport.on(Method::Get, &vault_url(), 200, vault_body(json!({}))).await;
        transport.on(Method::Put, &vault_url(), 200, vault_body(json!({}))).await;
        transport
            .on(Method::Get, "https://kv1.vault.azure.net/certificates/contacts", 200, json!({"contacts": []}))
            .await;

        let mut config = VaultConfig::new("kv1", "rg", "West Europe", TENANT);
        config.tags.insert("env".into(), "test".into());
        let state = handler(transport.clone()).create(&config).await.unwrap();

        assert_eq!(state.vault_uri, "https://kv1.vault.azure.net/");
        assert_eq!(state.sku_name, "standard");
        assert_eq!(state.location, "westeurope");
        assert_eq!(state.soft_delete_retention_days, 90);

        let put = transport.requests_to(Method::Put, &vault_url()).await;
        let body = put[0].body.clone().unwrap();
        assert_eq!(body["properties"]["createMode"], "default");
        assert_eq!(body["properties"]["enableSoftDelete"], true);
        assert!(body["properties"].get("softDeleteRetentionInDays").is_none());
        assert!(body["properties"].get("enablePurgeProtection").is_none());

        // ten availability probes against the data plane
        assert_eq!(transport.count(Method::Get, "https://kv1.vault.azure.net/").await, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_availability_counts_any_status_but_not_unreachable() {
        let transport = Arc::new(MockTransport::new());
        transport.on_empty(Method::Get, &vault_url(), 404).await;
        transport.on(Method::Get, &vault_url(), 200, vault_body(json!({}))).await;
        transport.on(Method::Put, &vault_url(), 200, vault_body(json!({}))).await;
        transport
            .on(Method::Get, "https://kv1.vault.azure.net/certificates/contacts", 200, json!({"contacts": []}))
            .await;
        let data_plane = "https://kv1.vault.azure.net/";
        for _ in 0..3 {
            transport.on_transport_error(Method::Get, data_plane, "dns lookup failed").await;
        }
        transport
            .on_api_error(Method::Get, data_plane, 403, "Forbidden", "caller has no data-plane access")
            .await;

        handler(transport.clone())
            .create(&VaultConfig::new("kv1", "rg", "westeurope", TENANT))
            .await
            .unwrap();

        // three unreachable reads, then ten forbidden ones in a row
        assert_eq!(transport.count(Method::Get, data_plane).await, 13);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_refuses_live_vault() {
        let transport = Arc::new(MockTransport::new());
        transport.on(Method::Get, &vault_url(), 200, vault_body(json!({}))).await;

        let err = handler(transport)
            .create(&VaultConfig::new("kv1", "rg", "westeurope", TENANT))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultwrightError::AlreadyExists { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_deleted_vault_without_recovery() {
        let transport = Arc::new(MockTransport::new());
        transport.on_empty(Method::Get, &vault_url(), 404).await;
        transport.on(Method::Get, &deleted_url(), 200, json!({"name": "kv1"})).await;

        let err = handler_with(transport.clone(), KeyVaultFeatures::disabled())
            .create(&VaultConfig::new("kv1", "rg", "westeurope", TENANT))
            .await
            .unwrap_err();

        assert!(matches!(err, VaultwrightError::SoftDeleted { ref location, .. } if location == "westeurope"));
        assert_eq!(transport.count(Method::Put, &vault_url()).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_deleted_vault_is_recovered() {
        let transport = Arc::new(MockTransport::new());
        transport.on_empty(Method::Get, &vault_url(), 404).await;
        transport.on(Method::Get, &vault_url(), 200, vault_body(json!({}))).await;
        transport.on(Method::Get, &deleted_url(), 200, json!({"name": "kv1"})).await;
        transport.on(Method::Put, &vault_url(), 200, vault_body(json!({}))).await;

        let mut config = VaultConfig::new("kv1", "rg", "westeurope", TENANT);
        config.public_network_access_enabled = false;
        handler(transport.clone()).create(&config).await.unwrap();

        let put = transport.requests_to(Method::Put, &vault_url()).await;
        assert_eq!(put[0].body.as_ref().unwrap()["properties"]["createMode"], "recover");
        assert_eq!(transport.count(Method::Get, "https://kv1.vault.azure.net/").await, 0);
    }

    #[tokio::test]
    async fn test_update_cannot_disable_purge_protection() {
        let transport = Arc::new(MockTransport::new());
        transport
            .on(Method::Get, &vault_url(), 200, vault_body(json!({"enablePurgeProtection": true})))
            .await;

        let mut prior = VaultConfig::new("kv1", "rg", "westeurope", TENANT);
        prior.purge_protection_enabled = true;
        let desired = VaultConfig::new("kv1", "rg", "westeurope", TENANT);

        let err = handler(transport.clone())
            .update(&VaultId::new("sub-1", "rg", "kv1").to_string(), &prior, &desired)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot be disabled"));
        assert_eq!(transport.count(Method::Patch, &vault_url()).await, 0);
    }

    #[tokio::test]
    async fn test_update_patches_only_changes() {
        let transport = Arc::new(MockTransport::new());
        transport.on(Method::Get, &vault_url(), 200, vault_body(json!({}))).await;
        transport.on(Method::Patch, &vault_url(), 200, vault_body(json!({}))).await;
        transport
            .on_empty(Method::Delete, "https://kv1.vault.azure.net/certificates/contacts", 200)
            .await;

        let mut prior = VaultConfig::new("kv1", "rg", "westeurope", TENANT);
        prior.contacts.push(CertificateContact {
            email: "ops@example.com".into(),
            ..Default::default()
        });
        let mut desired = VaultConfig::new("kv1", "rg", "westeurope", TENANT);
        desired.enabled_for_deployment = true;
        desired.tags.insert("env".into(), "prod".into());

        handler(transport.clone())
            .update(&VaultId::new("sub-1", "rg", "kv1").to_string(), &prior, &desired)
            .await
            .unwrap();

        let patch = transport.requests_to(Method::Patch, &vault_url()).await[0].body.clone().unwrap();
        assert_eq!(patch, json!({"properties": {"enabledForDeployment": true}, "tags": {"env": "prod"}}));
        assert_eq!(
            transport
                .count(Method::Delete, "https://kv1.vault.azure.net/certificates/contacts")
                .await,
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_purges_when_allowed() {
        let transport = Arc::new(MockTransport::new());
        transport.on(Method::Get, &vault_url(), 200, vault_body(json!({}))).await;
        transport.on_empty(Method::Get, &vault_url(), 404).await;
        transport.on_empty(Method::Delete, &vault_url(), 200).await;
        transport.on_empty(Method::Post, &format!("{}/purge", deleted_url()), 202).await;
        transport.on_empty(Method::Get, &deleted_url(), 404).await;

        handler(transport.clone())
            .delete(&VaultId::new("sub-1", "rg", "kv1").to_string())
            .await
            .unwrap();

        assert_eq!(transport.count(Method::Delete, &vault_url()).await, 1);
        assert_eq!(transport.count(Method::Post, &format!("{}/purge", deleted_url())).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_skips_purge_under_purge_protection() {
        let transport = Arc::new(MockTransport::new());
        transport
            .on(Method::Get, &vault_url(), 200, vault_body(json!({"enablePurgeProtection": true})))
            .await;
        transport.on_empty(Method::Get, &vault_url(), 404).await;
        transport.on_empty(Method::Delete, &vault_url(), 200).await;
        transport
            .on(
                Method::Get,
                &deleted_url(),
                200,
                json!({"properties": {"deletionDate": "2024-01-01T00:00:00Z", "scheduledPurgeDate": "2024-04-01T00:00:00Z"}}),
            )
            .await;

        handler(transport.clone())
            .delete(&VaultId::new("sub-1", "rg", "kv1").to_string())
            .await
            .unwrap();

        assert_eq!(transport.count(Method::Post, &format!("{}/purge", deleted_url())).await, 0);
    }

    #[tokio::test]
    async fn test_read_missing_vault_is_none() {
        let transport = Arc::new(MockTransport::new());
        let state = handler(transport)
            .read(&VaultId::new("sub-1", "rg", "kv1").to_string())
            .await
            .unwrap();
        assert!(state.is_none());
    }
}
