//! Managed HSM role definitions and role assignments.
//!
//! Both live on the HSM's own data plane under
//! `{scope}/providers/Microsoft.Authorization/...` and are named by UUIDs.

use super::{Resource, NESTED_ITEM_TIMEOUTS};
use crate::client::models::{RoleAssignment, RoleDefinition, RoleDefinitionProperties, RolePermission};
use crate::config::OperationTimeouts;
use crate::ids::{HsmRoleId, HsmRoleKind};
use crate::validation::validate_uuid;
use crate::{Provider, Result, VaultwrightError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const CUSTOM_ROLE: &str = "CustomRole";

fn name_or_generated(name: Option<&str>) -> Result<String> {
    match name {
        Some(name) => {
            validate_uuid("name", name)?;
            Ok(name.to_string())
        }
        None => Ok(Uuid::new_v4().to_string()),
    }
}

fn validate_scope(scope: &str) -> Result<()> {
    let scope = scope.trim_end_matches('/');
    if scope.is_empty() || scope == "/keys" || scope.starts_with("/keys/") {
        Ok(())
    } else {
        Err(VaultwrightError::InvalidConfig(format!(
            "scope must be \"/\", \"/keys\" or \"/keys/{{name}}\", got {scope:?}"
        )))
    }
}

/// Permission block of a custom role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolePermissionConfig {
    /// Allowed actions
    pub actions: Vec<String>,
    /// Excluded actions
    pub not_actions: Vec<String>,
    /// Allowed data actions
    pub data_actions: Vec<String>,
    /// Excluded data actions
    pub not_data_actions: Vec<String>,
}

/// Desired custom role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsmRoleDefinitionConfig {
    /// HSM base URL
    pub vault_base_url: String,
    /// Role UUID; generated when unset
    pub name: Option<String>,
    /// Display name
    pub role_name: String,
    /// Description
    pub description: Option<String>,
    /// Permissions
    pub permissions: Vec<RolePermissionConfig>,
}

impl HsmRoleDefinitionConfig {
    fn to_definition(&self) -> RoleDefinition {
        RoleDefinition {
            properties: RoleDefinitionProperties {
                role_name: self.role_name.clone(),
                description: self.description.clone(),
                role_type: CUSTOM_ROLE.into(),
                permissions: self
                    .permissions
                    .iter()
                    .map(|p| RolePermission {
                        actions: p.actions.clone(),
                        not_actions: p.not_actions.clone(),
                        data_actions: p.data_actions.clone(),
                        not_data_actions: p.not_data_actions.clone(),
                    })
                    .collect(),
                assignable_scopes: vec!["/".into()],
            },
            ..Default::default()
        }
    }
}

/// Observed role definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsmRoleDefinitionState {
    /// Role definition URL
    pub id: String,
    /// ID used when assigning the role: the scope-relative resource path
    pub resource_manager_id: String,
    /// HSM base URL
    pub vault_base_url: String,
    /// Role UUID
    pub name: String,
    /// Display name
    pub role_name: String,
    /// Description
    pub description: Option<String>,
    /// `CustomRole` or `AKVBuiltInRole`
    pub role_type: String,
    /// Permissions
    pub permissions: Vec<RolePermissionConfig>,
    /// Scopes the role can be assigned at
    pub assignable_scopes: Vec<String>,
}

fn flatten_definition(id: &HsmRoleId, definition: RoleDefinition) -> HsmRoleDefinitionState {
    let properties = definition.properties;
    HsmRoleDefinitionState {
        id: id.to_string(),
        resource_manager_id: definition.id.unwrap_or_default(),
        vault_base_url: id.base_url.clone(),
        name: id.name.clone(),
        role_name: properties.role_name,
        description: properties.description,
        role_type: properties.role_type,
        permissions: properties
            .permissions
            .into_iter()
            .map(|p| RolePermissionConfig {
                actions: p.actions,
                not_actions: p.not_actions,
                data_actions: p.data_actions,
                not_data_actions: p.not_data_actions,
            })
            .collect(),
        assignable_scopes: properties.assignable_scopes,
    }
}

/// Managed HSM role definition handler.
pub struct HsmRoleDefinitionResource {
    provider: Arc<Provider>,
}

impl HsmRoleDefinitionResource {
    /// Creates the handler.
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Resource for HsmRoleDefinitionResource {
    type Config = HsmRoleDefinitionConfig;
    type State = HsmRoleDefinitionState;

    fn kind(&self) -> &'static str {
        "key_vault_managed_hardware_security_module_role_definition"
    }

    fn default_timeouts(&self) -> OperationTimeouts {
        NESTED_ITEM_TIMEOUTS
    }

    fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn create(&self, config: &HsmRoleDefinitionConfig) -> Result<HsmRoleDefinitionState> {
        if config.role_name.is_empty() {
            return Err(VaultwrightError::InvalidConfig("role_name must not be empty".into()));
        }
        let name = name_or_generated(config.name.as_deref())?;
        let id = HsmRoleId::new(&config.vault_base_url, "/", HsmRoleKind::Definition, name)?;
        let client = self.provider.client();

        match client.get_role_definition(&id).await {
            Ok(_) => return Err(VaultwrightError::already_exists(self.kind(), id.to_string())),
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                return Err(VaultwrightError::op(
                    "checking for presence of existing",
                    format!("Role Definition {:?}", id.to_string()),
                    err,
                ))
            }
        }

        let definition = client
            .put_role_definition(&id, &config.to_definition())
            .await
            .map_err(|e| VaultwrightError::op("creating", format!("Role Definition {:?}", id.to_string()), e))?;
        info!(role = %config.role_name, id = %id, "created managed HSM role definition");
        Ok(flatten_definition(&id, definition))
    }

    async fn read(&self, id: &str) -> Result<Option<HsmRoleDefinitionState>> {
        let id = HsmRoleId::parse(id, HsmRoleKind::Definition)?;
        match self.provider.client().get_role_definition(&id).await {
            Ok(definition) => Ok(Some(flatten_definition(&id, definition))),
            Err(err) if err.is_not_found() => {
                debug!(%id, "Role Definition was not found - removing from state");
                Ok(None)
            }
            Err(err) => Err(VaultwrightError::op(
                "retrieving",
                format!("Role Definition {:?}", id.to_string()),
                err,
            )),
        }
    }

    async fn update(
        &self,
        id: &str,
        prior: &HsmRoleDefinitionConfig,
        desired: &HsmRoleDefinitionConfig,
    ) -> Result<HsmRoleDefinitionState> {
        let id = HsmRoleId::parse(id, HsmRoleKind::Definition)?;
        if prior.vault_base_url != desired.vault_base_url || prior.name != desired.name {
            return Err(VaultwrightError::InvalidConfig(format!(
                "Role Definition {:?}: changing the HSM or name requires replacing the role",
                id.to_string()
            )));
        }
        let definition = self
            .provider
            .client()
            .put_role_definition(&id, &desired.to_definition())
            .await
            .map_err(|e| VaultwrightError::op("updating", format!("Role Definition {:?}", id.to_string()), e))?;
        Ok(flatten_definition(&id, definition))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = HsmRoleId::parse(id, HsmRoleKind::Definition)?;
        match self.provider.client().delete_role_definition(&id).await {
            Err(err) if !err.is_not_found() => Err(VaultwrightError::op(
                "deleting",
                format!("Role Definition {:?}", id.to_string()),
                err,
            )),
            _ => Ok(()),
        }
    }
}

/// Desired role assignment. Every field forces a new assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsmRoleAssignmentConfig {
    /// HSM base URL
    pub vault_base_url: String,
    /// `/`, `/keys` or `/keys/{name}`
    pub scope: String,
    /// Assignment UUID; generated when unset
    pub name: Option<String>,
    /// Role definition to assign
    pub role_definition_id: String,
    /// Principal receiving the role
    pub principal_id: String,
}

/// Observed role assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsmRoleAssignmentState {
    /// Assignment URL
    pub id: String,
    /// HSM base URL
    pub vault_base_url: String,
    /// Scope
    pub scope: String,
    /// Assignment UUID
    pub name: String,
    /// Assigned role definition
    pub role_definition_id: String,
    /// Principal
    pub principal_id: String,
}

fn flatten_assignment(id: &HsmRoleId, assignment: RoleAssignment) -> HsmRoleAssignmentState {
    HsmRoleAssignmentState {
        id: id.to_string(),
        vault_base_url: id.base_url.clone(),
        scope: assignment.properties.scope.unwrap_or_else(|| id.scope.clone()),
        name: id.name.clone(),
        role_definition_id: assignment.properties.role_definition_id,
        principal_id: assignment.properties.principal_id,
    }
}

/// Managed HSM role assignment handler.
pub struct HsmRoleAssignmentResource {
    provider: Arc<Provider>,
}

impl HsmRoleAssignmentResource {
    /// Creates the handler.
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Resource for HsmRoleAssignmentResource {
    type Config = HsmRoleAssignmentConfig;
    type State = HsmRoleAssignmentState;

    fn kind(&self) -> &'static str {
        "key_vault_managed_hardware_security_module_role_assignment"
    }

    fn default_timeouts(&self) -> OperationTimeouts {
        NESTED_ITEM_TIMEOUTS
    }

    fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn create(&self, config: &HsmRoleAssignmentConfig) -> Result<HsmRoleAssignmentState> {
        validate_scope(&config.scope)?;
        validate_uuid("principal_id", &config.principal_id)?;
        if config.role_definition_id.is_empty() {
            return Err(VaultwrightError::InvalidConfig("role_definition_id must not be empty".into()));
        }
        let name = name_or_generated(config.name.as_deref())?;
        let id = HsmRoleId::new(&config.vault_base_url, &config.scope, HsmRoleKind::Assignment, name)?;
        let client = self.provider.client();

        match client.get_role_assignment(&id).await {
            Ok(_) => return Err(VaultwrightError::already_exists(self.kind(), id.to_string())),
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                return Err(VaultwrightError::op(
                    "checking for presence of existing",
                    format!("Role Assignment {:?}", id.to_string()),
                    err,
                ))
            }
        }

        let assignment = client
            .put_role_assignment(&id, &config.role_definition_id, &config.principal_id)
            .await
            .map_err(|e| VaultwrightError::op("creating", format!("Role Assignment {:?}", id.to_string()), e))?;
        info!(principal = %config.principal_id, id = %id, "created managed HSM role assignment");
        Ok(flatten_assignment(&id, assignment))
    }

    async fn read(&self, id: &str) -> Result<Option<HsmRoleAssignmentState>> {
        let id = HsmRoleId::parse(id, HsmRoleKind::Assignment)?;
        match self.provider.client().get_role_assignment(&id).await {
            Ok(assignment) => Ok(Some(flatten_assignment(&id, assignment))),
            Err(err) if err.is_not_found() => {
                debug!(%id, "Role Assignment was not found - removing from state");
                Ok(None)
            }
            Err(err) => Err(VaultwrightError::op(
                "retrieving",
                format!("Role Assignment {:?}", id.to_string()),
                err,
            )),
        }
    }

    async fn update(
        &self,
        id: &str,
        prior: &HsmRoleAssignmentConfig,
        desired: &HsmRoleAssignmentConfig,
    ) -> Result<HsmRoleAssignmentState> {
        if prior != desired {
            return Err(VaultwrightError::InvalidConfig(format!(
                "Role Assignment {id:?}: role assignments cannot be changed in place"
            )));
        }
        self.read(id)
            .await?
            .ok_or_else(|| VaultwrightError::NotFound(format!("Role Assignment {id:?}")))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = HsmRoleId::parse(id, HsmRoleKind::Assignment)?;
        match self.provider.client().delete_role_assignment(&id).await {
            Err(err) if !err.is_not_found() => Err(VaultwrightError::op(
                "deleting",
                format!("Role Assignment {:?}", id.to_string()),
                err,
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::{Audience, Method};
    use crate::{Config, TransportType};
    use serde_json::json;

    const HSM: &str = "https://hsm1.managedhsm.azure.net/";
    const ROLE: &str = "11111111-1111-1111-1111-111111111111";
    const PRINCIPAL: &str = "22222222-2222-2222-2222-222222222222";

    fn provider(transport: Arc<MockTransport>) -> Arc<Provider> {
        Arc::new(Provider::with_transport(Config::new(TransportType::Mock), transport))
    }

    fn definition_url(name: &str) -> String {
        format!("https://hsm1.managedhsm.azure.net/providers/Microsoft.Authorization/roleDefinitions/{name}")
    }

    #[test]
    fn test_scope_validation() {
        assert!(validate_scope("/").is_ok());
        assert!(validate_scope("/keys").is_ok());
        assert!(validate_scope("/keys/k1").is_ok());
        assert!(validate_scope("/secrets").is_err());
    }

    #[test]
    fn test_generated_names_are_uuids() {
        let name = name_or_generated(None).unwrap();
        assert!(validate_uuid("name", &name).is_ok());
        assert!(name_or_generated(Some("not-a-uuid")).is_err());
    }

    #[tokio::test]
    async fn test_create_role_definition() {
        let transport = Arc::new(MockTransport::new());
        let url = definition_url(ROLE);
        transport.on_empty(Method::Get, &url, 404).await;
        transport
            .on(
                Method::Put,
                &url,
                201,
                json!({
                    "id": format!("/providers/Microsoft.Authorization/roleDefinitions/{ROLE}"),
                    "name": ROLE,
                    "properties": {
                        "roleName": "key-reader",
                        "type": "CustomRole",
                        "permissions": [{"dataActions": ["Microsoft.KeyVault/managedHsm/keys/read/action"]}],
                        "assignableScopes": ["/"]
                    }
                }),
            )
            .await;

        let config = HsmRoleDefinitionConfig {
            vault_base_url: HSM.into(),
            name: Some(ROLE.into()),
            role_name: "key-reader".into(),
            description: None,
            permissions: vec![RolePermissionConfig {
                data_actions: vec!["Microsoft.KeyVault/managedHsm/keys/read/action".into()],
                ..Default::default()
            }],
        };
        let state = HsmRoleDefinitionResource::new(provider(transport.clone()))
            .create(&config)
            .await
            .unwrap();

        assert_eq!(state.id, url);
        assert_eq!(state.role_type, "CustomRole");
        assert_eq!(state.permissions[0].data_actions.len(), 1);

        let put = transport.requests_to(Method::Put, &url).await;
        assert_eq!(put[0].audience, Audience::ManagedHsm);
        assert_eq!(put[0].body.as_ref().unwrap()["properties"]["type"], "CustomRole");
    }

    #[tokio::test]
    async fn test_create_role_assignment_at_keys_scope() {
        let transport = Arc::new(MockTransport::new());
        transport
            .on(
                Method::Put,
                &format!("https://hsm1.managedhsm.azure.net/keys/providers/Microsoft.Authorization/roleAssignments/{ROLE}"),
                201,
                json!({
                    "name": ROLE,
                    "properties": {"scope": "/keys", "roleDefinitionId": "rd", "principalId": PRINCIPAL}
                }),
            )
            .await;

        let config = HsmRoleAssignmentConfig {
            vault_base_url: HSM.into(),
            scope: "/keys".into(),
            name: Some(ROLE.into()),
            role_definition_id: "rd".into(),
            principal_id: PRINCIPAL.into(),
        };
        let state = HsmRoleAssignmentResource::new(provider(transport))
            .create(&config)
            .await
            .unwrap();

        assert_eq!(state.scope, "/keys");
        assert_eq!(state.principal_id, PRINCIPAL);
    }

    #[tokio::test]
    async fn test_role_assignment_cannot_change_in_place() {
        let transport = Arc::new(MockTransport::new());
        let prior = HsmRoleAssignmentConfig {
            vault_base_url: HSM.into(),
            scope: "/".into(),
            name: Some(ROLE.into()),
            role_definition_id: "rd".into(),
            principal_id: PRINCIPAL.into(),
        };
        let mut desired = prior.clone();
        desired.role_definition_id = "other".into();

        let id = format!("https://hsm1.managedhsm.azure.net/providers/Microsoft.Authorization/roleAssignments/{ROLE}");
        let err = HsmRoleAssignmentResource::new(provider(transport))
            .update(&id, &prior, &desired)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultwrightError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_read_missing_definition_is_none() {
        let transport = Arc::new(MockTransport::new());
        let state = HsmRoleDefinitionResource::new(provider(transport))
            .read(&definition_url(ROLE))
            .await
            .unwrap();
        assert!(state.is_none());
    }
}
