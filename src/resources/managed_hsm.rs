//! Managed HSM handler.
//!
//! Provisioning a managed HSM pool takes tens of minutes; the create waits for
//! the provisioning state to settle. Security-domain activation is left to the
//! administrators named at creation.

use super::Resource;
use crate::client::models::{ManagedHsm, ManagedHsmNetworkRuleSet, ManagedHsmProperties, ManagedHsmSku, Tags};
use crate::config::{Operation, OperationTimeouts};
use crate::ids::{normalize_location, ManagedHsmId};
use crate::poll::{Deadline, Observation, StateWait};
use crate::purge::{delete_and_optionally_purge, ManagedHsmDeleter};
use crate::validation::{validate_managed_hsm_name, validate_soft_delete_retention_days, validate_uuid};
use crate::{Provider, Result, VaultwrightError};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Timeouts of the managed HSM handler.
pub const MANAGED_HSM_TIMEOUTS: OperationTimeouts = OperationTimeouts::minutes(60, 5, 30, 60);

const SKU_NAMES: &[&str] = &["Standard_B1", "Custom_B32", "Custom_B6"];
const DEFAULT_SOFT_DELETE_RETENTION_DAYS: u32 = 90;
const PROVISIONING_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Network ACLs of a managed HSM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsmNetworkAcls {
    /// `AzureServices` or `None`
    pub bypass: String,
    /// `Allow` or `Deny`
    pub default_action: String,
}

/// Desired managed HSM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedHsmConfig {
    /// HSM name
    pub name: String,
    /// Resource group
    pub resource_group_name: String,
    /// Azure region
    pub location: String,
    /// Entra tenant
    pub tenant_id: String,
    /// `Standard_B1`, `Custom_B32` or `Custom_B6`
    pub sku_name: String,
    /// Object IDs of the initial administrators
    pub admin_object_ids: Vec<String>,
    /// Purge protection; cannot be turned off once on
    pub purge_protection_enabled: bool,
    /// Soft-delete retention, 7 to 90 days
    pub soft_delete_retention_days: u32,
    /// Reachable from public networks
    pub public_network_access_enabled: bool,
    /// Network ACLs
    pub network_acls: Option<HsmNetworkAcls>,
    /// Tags
    pub tags: Tags,
}

impl ManagedHsmConfig {
    /// A `Standard_B1` HSM administered by `admin_object_ids`.
    pub fn new(
        name: impl Into<String>,
        resource_group_name: impl Into<String>,
        location: impl Into<String>,
        tenant_id: impl Into<String>,
        admin_object_ids: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            resource_group_name: resource_group_name.into(),
            location: location.into(),
            tenant_id: tenant_id.into(),
            sku_name: "Standard_B1".into(),
            admin_object_ids,
            purge_protection_enabled: false,
            soft_delete_retention_days: DEFAULT_SOFT_DELETE_RETENTION_DAYS,
            public_network_access_enabled: true,
            network_acls: None,
            tags: Tags::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        validate_managed_hsm_name(&self.name)?;
        validate_uuid("tenant_id", &self.tenant_id)?;
        validate_soft_delete_retention_days(self.soft_delete_retention_days)?;
        if !SKU_NAMES.contains(&self.sku_name.as_str()) {
            return Err(VaultwrightError::InvalidConfig(format!(
                "sku_name must be one of {}, got {:?}",
                SKU_NAMES.join(", "),
                self.sku_name
            )));
        }
        if self.admin_object_ids.is_empty() {
            return Err(VaultwrightError::InvalidConfig(
                "admin_object_ids must name at least one administrator".into(),
            ));
        }
        for object_id in &self.admin_object_ids {
            validate_uuid("admin_object_ids", object_id)?;
        }
        if let Some(acls) = &self.network_acls {
            if !["AzureServices", "None"].contains(&acls.bypass.as_str())
                || !["Allow", "Deny"].contains(&acls.default_action.as_str())
            {
                return Err(VaultwrightError::InvalidConfig(format!(
                    "network_acls must bypass AzureServices or None and default to Allow or Deny, got {acls:?}"
                )));
            }
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

    fn expand_network_acls(&self) -> Option<ManagedHsmNetworkRuleSet> {
        self.network_acls.as_ref().map(|acls| ManagedHsmNetworkRuleSet {
            bypass: acls.bypass.clone(),
            default_action: acls.default_action.clone(),
        })
    }
}

/// Observed managed HSM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedHsmState {
    /// Resource ID
    pub id: String,
    /// HSM name
    pub name: String,
    /// Resource group
    pub resource_group_name: String,
    /// Normalised region
    pub location: String,
    /// Entra tenant
    pub tenant_id: String,
    /// SKU
    pub sku_name: String,
    /// Initial administrators
    pub admin_object_ids: Vec<String>,
    /// Data-plane URI
    pub hsm_uri: String,
    /// Purge protection
    pub purge_protection_enabled: bool,
    /// Soft-delete retention
    pub soft_delete_retention_days: u32,
    /// Reachable from public networks
    pub public_network_access_enabled: bool,
    /// Network ACLs
    pub network_acls: Option<HsmNetworkAcls>,
    /// Tags
    pub tags: Tags,
}

fn flatten(id: &ManagedHsmId, hsm: ManagedHsm) -> ManagedHsmState {
    let properties = hsm.properties;
    ManagedHsmState {
        id: id.to_string(),
        name: id.name.clone(),
        resource_group_name: id.resource_group.clone(),
        location: normalize_location(&hsm.location),
        tenant_id: properties.tenant_id.unwrap_or_default(),
        sku_name: hsm.sku.map(|s| s.name).unwrap_or_default(),
        admin_object_ids: properties.initial_admin_object_ids,
        hsm_uri: properties.hsm_uri.unwrap_or_default(),
        purge_protection_enabled: properties.enable_purge_protection.unwrap_or(false),
        soft_delete_retention_days: properties
            .soft_delete_retention_in_days
            .unwrap_or(DEFAULT_SOFT_DELETE_RETENTION_DAYS),
        public_network_access_enabled: properties
            .public_network_access
            .as_deref()
            .map(|p| p.eq_ignore_ascii_case("Enabled"))
            .unwrap_or(true),
        network_acls: properties.network_acls.map(|acls| HsmNetworkAcls {
            bypass: acls.bypass,
            default_action: acls.default_action,
        }),
        tags: hsm.tags,
    }
}

/// Managed HSM handler.
pub struct ManagedHsmResource {
    provider: Arc<Provider>,
}

impl ManagedHsmResource {
    /// Creates the handler.
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }

    /// Reads a managed HSM by name, failing when it does not exist.
    pub async fn lookup(&self, name: &str, resource_group_name: &str) -> Result<ManagedHsmState> {
        let id = ManagedHsmId::new(self.provider.client().subscription_id(), resource_group_name, name);
        self.read(&id.to_string())
            .await?
            .ok_or_else(|| VaultwrightError::NotFound(format!("Managed HSM {:?}", id.to_string())))
    }

    async fn wait_for_provisioning(&self, id: &ManagedHsmId, deadline: Deadline) -> Result<ManagedHsm> {
        StateWait::new(
            &["Provisioning", "Updating", "Restoring", "SecurityDomainRestore"],
            &["Succeeded"],
            deadline,
        )
        .with_poll_interval(PROVISIONING_POLL_INTERVAL)
        .wait(|| async move {
            match self.provider.client().get_managed_hsm(id).await {
                Ok(hsm) => {
                    let state = hsm
                        .properties
                        .provisioning_state
                        .clone()
                        .unwrap_or_else(|| "Succeeded".to_string());
                    if state.eq_ignore_ascii_case("Failed") {
                        let message = hsm.properties.status_message.clone().unwrap_or_default();
                        return Ok(Observation::Failed(format!("provisioning failed: {message}")));
                    }
                    Ok(Observation::found(hsm, state))
                }
                Err(err) if err.is_not_found() => Ok(Observation::NotFound),
                Err(err) => Err(err),
            }
        })
        .await
    }

    fn build_patch(existing: &ManagedHsm, prior: &ManagedHsmConfig, desired: &ManagedHsmConfig) -> Result<Value> {
        let mut properties = Map::new();
        if prior.purge_protection_enabled != desired.purge_protection_enabled {
            if existing.properties.enable_purge_protection.unwrap_or(false) && !desired.purge_protection_enabled {
                return Err(VaultwrightError::InvalidConfig(
                    "once purge protection has been enabled it cannot be disabled".into(),
                ));
            }
            properties.insert("enablePurgeProtection".into(), json!(desired.purge_protection_enabled));
        }
        if prior.public_network_access_enabled != desired.public_network_access_enabled {
            properties.insert("publicNetworkAccess".into(), json!(desired.public_network_access()));
        }
        if prior.network_acls != desired.network_acls {
            properties.insert("networkAcls".into(), serde_json::to_value(desired.expand_network_acls())?);
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
impl Resource for ManagedHsmResource {
    type Config = ManagedHsmConfig;
    type State = ManagedHsmState;

    fn kind(&self) -> &'static str {
        "key_vault_managed_hardware_security_module"
    }

    fn default_timeouts(&self) -> OperationTimeouts {
        MANAGED_HSM_TIMEOUTS
    }

    fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn create(&self, config: &ManagedHsmConfig) -> Result<ManagedHsmState> {
        config.validate()?;
        let deadline = self.deadline(Operation::Create);
        let client = self.provider.client();
        let id = ManagedHsmId::new(client.subscription_id(), &config.resource_group_name, &config.name);
        let target = format!("Managed HSM {:?}", id.to_string());

        match client.get_managed_hsm(&id).await {
            Ok(_) => return Err(VaultwrightError::already_exists(self.kind(), id.to_string())),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(VaultwrightError::op("checking for presence of existing", &target, err)),
        }

        let body = ManagedHsm {
            location: normalize_location(&config.location),
            sku: Some(ManagedHsmSku {
                family: "B".into(),
                name: config.sku_name.clone(),
            }),
            tags: config.tags.clone(),
            properties: ManagedHsmProperties {
                tenant_id: Some(config.tenant_id.clone()),
                initial_admin_object_ids: config.admin_object_ids.clone(),
                enable_soft_delete: Some(true),
                soft_delete_retention_in_days: Some(config.soft_delete_retention_days),
                enable_purge_protection: Some(config.purge_protection_enabled),
                network_acls: config.expand_network_acls(),
                public_network_access: Some(config.public_network_access().to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        client
            .create_or_update_managed_hsm(&id, &body)
            .await
            .map_err(|e| VaultwrightError::op("creating", &target, e))?;
        let hsm = self
            .wait_for_provisioning(&id, deadline)
            .await
            .map_err(|e| VaultwrightError::op("waiting for provisioning of", &target, e))?;
        if let Some(hsm_uri) = hsm.properties.hsm_uri.as_deref() {
            self.provider.cache().insert(&id.to_string(), hsm_uri).await;
        }
        info!(hsm = %id.name, "managed HSM provisioned");

        Ok(flatten(&id, hsm))
    }

    async fn read(&self, id: &str) -> Result<Option<ManagedHsmState>> {
        let id = ManagedHsmId::parse(id)?;
        match self.provider.client().get_managed_hsm(&id).await {
            Ok(hsm) => {
                if let Some(hsm_uri) = hsm.properties.hsm_uri.as_deref() {
                    self.provider.cache().insert(&id.to_string(), hsm_uri).await;
                }
                Ok(Some(flatten(&id, hsm)))
            }
            Err(err) if err.is_not_found() => {
                debug!(%id, "Managed HSM was not found - removing from state");
                Ok(None)
            }
            Err(err) => Err(VaultwrightError::op(
                "retrieving",
                format!("Managed HSM {:?}", id.to_string()),
                err,
            )),
        }
    }

    async fn update(&self, id: &str, prior: &ManagedHsmConfig, desired: &ManagedHsmConfig) -> Result<ManagedHsmState> {
        desired.validate()?;
        let id = ManagedHsmId::parse(id)?;
        let target = format!("Managed HSM {:?}", id.to_string());
        let client = self.provider.client();

        if prior.name != desired.name
            || prior.resource_group_name != desired.resource_group_name
            || normalize_location(&prior.location) != normalize_location(&desired.location)
            || prior.tenant_id != desired.tenant_id
            || prior.sku_name != desired.sku_name
            || prior.admin_object_ids != desired.admin_object_ids
            || prior.soft_delete_retention_days != desired.soft_delete_retention_days
        {
            return Err(VaultwrightError::InvalidConfig(format!(
                "{target}: only tags, network ACLs, public network access and purge protection can change in place"
            )));
        }

        let existing = client
            .get_managed_hsm(&id)
            .await
            .map_err(|e| VaultwrightError::op("retrieving", &target, e))?;
        let patch = Self::build_patch(&existing, prior, desired).map_err(|e| VaultwrightError::op("updating", &target, e))?;

        if patch.as_object().is_some_and(|p| !p.is_empty()) {
            client
                .update_managed_hsm(&id, patch)
                .await
                .map_err(|e| VaultwrightError::op("updating", &target, e))?;
            self.wait_for_provisioning(&id, self.deadline(Operation::Update))
                .await
                .map_err(|e| VaultwrightError::op("waiting for update of", &target, e))?;
        }

        self.read(&id.to_string())
            .await?
            .ok_or_else(|| VaultwrightError::NotFound(target))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = ManagedHsmId::parse(id)?;
        let client = self.provider.client();

        let existing = match client.get_managed_hsm(&id).await {
            Ok(hsm) => hsm,
            Err(err) if err.is_not_found() => {
                self.provider.cache().remove(&id.to_string()).await;
                return Ok(());
            }
            Err(err) => {
                return Err(VaultwrightError::op(
                    "retrieving",
                    format!("Managed HSM {:?}", id.to_string()),
                    err,
                ))
            }
        };

        let purge_protection = existing.properties.enable_purge_protection.unwrap_or(false);
        let mut purge = self.provider.features().purge_soft_deleted_hsms_on_destroy;
        if purge && purge_protection {
            info!(hsm = %id.name, "Managed HSM has purge protection enabled; Azure will purge it on schedule");
            purge = false;
        }

        let location = normalize_location(&existing.location);
        let deleter = ManagedHsmDeleter::new(client, id.clone(), &location);
        delete_and_optionally_purge(&deleter, purge, self.deadline(Operation::Delete)).await?;

        self.provider.cache().remove(&id.to_string()).await;
        Ok(())
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::ids::DeletedVaultId;
    use crate::transport::mock::MockTransport;
    use crate::transport::Method;
    use crate::{Config, KeyVaultFeatures, TransportType};

    const ARM: &str = "https://management.azure.com";
    const TENANT: &str = "00000000-0000-0000-0000-000000000001";
    const ADMIN: &str = "00000000-0000-0000-0000-0000000000aa";

    fn handler(transport: Arc<MockTransport>) -> ManagedHsmResource {
        let config = Config::new(TransportType::Mock)
            .with_subscription_id("sub-1")
            .with_features(KeyVaultFeatures::default());
        ManagedHsmResource::new(Arc::new(Provider::with_transport(config, transport)))
    }

    fn hsm_url() -> String {
        format!("{ARM}{}", ManagedHsmId::new("sub-1", "rg", "hsm1"))
    }

    fn config() -> ManagedHsmConfig {
        ManagedHsmConfig::new("hsm1", "rg", "West Europe", TENANT, vec![ADMIN.into()])
    }

    fn hsm_body(state: &str, purge_protection: bool) -> Value {
        json!({
            "id": ManagedHsmId::new("sub-1", "rg", "hsm1").to_string(),
            "name": "hsm1",
            "location": "westeurope",
            "sku": {"family": "B", "name": "Standard_B1"},
            "properties": {
                "tenantId": TENANT,
                "initialAdminObjectIds": [ADMIN],
                "hsmUri": "https://hsm1.managedhsm.azure.net/",
                "enableSoftDelete": true,
                "softDeleteRetentionInDays": 90,
                "enablePurgeProtection": purge_protection,
                "provisioningState": state
            }
        })
    }

    #[test]
    fn test_validation() {
        assert!(config().validate().is_ok());

        let mut invalid = config();
        invalid.admin_object_ids.clear();
        assert!(invalid.validate().is_err());

        let mut invalid = config();
        invalid.sku_name = "Premium".into();
        assert!(invalid.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_for_provisioning() {
        let transport = Arc::new(MockTransport::new());
        transport.on_empty(Method::Get, &hsm_url(), 404).await;
        transport.on(Method::Get, &hsm_url(), 200, hsm_body("Provisioning", false)).await;
        transport.on(Method::Get, &hsm_url(), 200, hsm_body("Succeeded", false)).await;
        transport.on(Method::Put, &hsm_url(), 200, hsm_body("Provisioning", false)).await;

        let hsms = handler(transport.clone());
        let state = hsms.create(&config()).await.unwrap();

        assert_eq!(state.hsm_uri, "https://hsm1.managedhsm.azure.net/");
        assert_eq!(state.location, "westeurope");
        assert_eq!(transport.count(Method::Get, &hsm_url()).await, 3);
        assert_eq!(
            hsms.provider
                .cache()
                .base_url(&ManagedHsmId::new("sub-1", "rg", "hsm1").to_string())
                .await
                .as_deref(),
            Some("https://hsm1.managedhsm.azure.net/")
        );

        let put = transport.requests_to(Method::Put, &hsm_url()).await;
        let body = put[0].body.clone().unwrap();
        assert_eq!(body["properties"]["initialAdminObjectIds"][0], ADMIN);
        assert_eq!(body["sku"]["name"], "Standard_B1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_provisioning_is_terminal() {
        let transport = Arc::new(MockTransport::new());
        transport.on_empty(Method::Get, &hsm_url(), 404).await;
        let mut failed = hsm_body("Failed", false);
        failed["properties"]["statusMessage"] = json!("quota exceeded");
        transport.on(Method::Get, &hsm_url(), 200, failed).await;
        transport.on(Method::Put, &hsm_url(), 200, hsm_body("Provisioning", false)).await;

        let err = handler(transport).create(&config()).await.unwrap_err();
        assert!(matches!(err.root(), VaultwrightError::StateFailed(reason) if reason.contains("quota exceeded")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activated_is_not_a_provisioning_phase() {
        let transport = Arc::new(MockTransport::new());
        transport.on_empty(Method::Get, &hsm_url(), 404).await;
        transport.on(Method::Get, &hsm_url(), 200, hsm_body("Activated", false)).await;
        transport.on(Method::Put, &hsm_url(), 200, hsm_body("Provisioning", false)).await;

        let err = handler(transport.clone()).create(&config()).await.unwrap_err();

        assert!(matches!(err.root(), VaultwrightError::UnexpectedState { state, .. } if state == "Activated"));
        assert_eq!(transport.count(Method::Get, &hsm_url()).await, 2);
    }

    #[tokio::test]
    async fn test_update_refuses_disabling_purge_protection() {
        let transport = Arc::new(MockTransport::new());
        transport.on(Method::Get, &hsm_url(), 200, hsm_body("Succeeded", true)).await;

        let mut prior = config();
        prior.purge_protection_enabled = true;
        let desired = config();
        let err = handler(transport.clone())
            .update(&ManagedHsmId::new("sub-1", "rg", "hsm1").to_string(), &prior, &desired)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("cannot be disabled"));
        assert_eq!(transport.count(Method::Patch, &hsm_url()).await, 0);
    }

    #[tokio::test]
    async fn test_update_patches_tags() {
        let transport = Arc::new(MockTransport::new());
        transport.on(Method::Get, &hsm_url(), 200, hsm_body("Succeeded", false)).await;
        transport.on(Method::Patch, &hsm_url(), 200, hsm_body("Updating", false)).await;

        let prior = config();
        let mut desired = config();
        desired.tags.insert("env".into(), "prod".into());
        handler(transport.clone())
            .update(&ManagedHsmId::new("sub-1", "rg", "hsm1").to_string(), &prior, &desired)
            .await
            .unwrap();

        let patch = transport.requests_to(Method::Patch, &hsm_url()).await;
        assert_eq!(patch[0].body, Some(json!({"tags": {"env": "prod"}})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_purges_unprotected_hsm() {
        let transport = Arc::new(MockTransport::new());
        transport.on(Method::Get, &hsm_url(), 200, hsm_body("Succeeded", false)).await;
        transport.on_empty(Method::Get, &hsm_url(), 404).await;
        transport.on_empty(Method::Delete, &hsm_url(), 200).await;
        let deleted = DeletedVaultId::managed_hsm("sub-1", "westeurope", "hsm1");
        transport
            .on_empty(Method::Post, &format!("{ARM}{deleted}/purge"), 202)
            .await;

        handler(transport.clone())
            .delete(&ManagedHsmId::new("sub-1", "rg", "hsm1").to_string())
            .await
            .unwrap();

        assert_eq!(transport.count(Method::Delete, &hsm_url()).await, 1);
        assert_eq!(transport.count(Method::Post, &format!("{ARM}{deleted}/purge")).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_skips_purge_under_purge_protection() {
        let transport = Arc::new(MockTransport::new());
        transport.on(Method::Get, &hsm_url(), 200, hsm_body("Succeeded", true)).await;
        transport.on_empty(Method::Get, &hsm_url(), 404).await;
        transport.on_empty(Method::Delete, &hsm_url(), 200).await;

        handler(transport.clone())
            .delete(&ManagedHsmId::new("sub-1", "rg", "hsm1").to_string())
            .await
            .unwrap();

        let deleted = DeletedVaultId::managed_hsm("sub-1", "westeurope", "hsm1");
        assert_eq!(transport.count(Method::Post, &format!("{ARM}{deleted}/purge")).await, 0);
    }
}
