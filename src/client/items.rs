//! Data-plane calls: keys, secrets, certificates, issuers, managed storage and
//! managed HSM role-based access control.

use super::models::{
    CertificateBundle, CertificateOperation, CertificatePolicy, Contacts, DeletedItem, IssuerBundle,
    KeyBundle, KeyCreateParameters, KeyRotationPolicy, KeyUpdateParameters, RoleAssignment,
    RoleDefinition, SasDefinitionBundle, SecretBundle, StorageBundle,
};
use super::{to_body, KeyVaultClient};
use crate::ids::{HsmRoleId, NestedItemType};
use crate::transport::Method;
use crate::Result;
use serde_json::json;

fn item_path(collection: &str, name: &str, version: Option<&str>) -> String {
    match version {
        Some(version) if !version.is_empty() => format!("{collection}/{name}/{version}"),
        _ => format!("{collection}/{name}"),
    }
}

impl KeyVaultClient {
    async fn data_get<T: serde::de::DeserializeOwned>(&self, base_url: &str, path: &str) -> Result<T> {
        self.call(
            Method::Get,
            self.data_url(base_url, path),
            self.data_plane_audience(base_url),
            None,
        )
        .await
    }

    async fn data_send<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        base_url: &str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        self.call(method, self.data_url(base_url, path), self.data_plane_audience(base_url), body)
            .await
    }

    async fn data_send_no_content(
        &self,
        method: Method,
        base_url: &str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<()> {
        self.call_no_content(method, self.data_url(base_url, path), self.data_plane_audience(base_url), body)
            .await
    }

    // ========================================================================
    // Soft delete, shared by every nested item type
    // ========================================================================

    /// Versionless URL of a nested item.
    pub fn nested_item_url(&self, base_url: &str, item_type: NestedItemType, name: &str) -> String {
        self.data_plane_url(base_url, &item_path(item_type.collection(), name, None))
    }

    /// Deletes a nested item (soft delete when the vault has it enabled).
    pub async fn delete_nested_item(&self, base_url: &str, item_type: NestedItemType, name: &str) -> Result<()> {
        self.data_send_no_content(
            Method::Delete,
            base_url,
            &item_path(item_type.collection(), name, None),
            None,
        )
        .await
    }

    /// Retrieves the soft-deleted copy of a nested item.
    pub async fn get_deleted_nested_item(
        &self,
        base_url: &str,
        item_type: NestedItemType,
        name: &str,
    ) -> Result<DeletedItem> {
        self.data_get(base_url, &item_path(item_type.deleted_collection(), name, None))
            .await
    }

    /// Recovers a soft-deleted nested item.
    pub async fn recover_deleted_nested_item(
        &self,
        base_url: &str,
        item_type: NestedItemType,
        name: &str,
    ) -> Result<()> {
        self.data_send_no_content(
            Method::Post,
            base_url,
            &format!("{}/{name}/recover", item_type.deleted_collection()),
            None,
        )
        .await
    }

    /// Permanently removes a soft-deleted nested item.
    pub async fn purge_deleted_nested_item(
        &self,
        base_url: &str,
        item_type: NestedItemType,
        name: &str,
    ) -> Result<()> {
        self.data_send_no_content(
            Method::Delete,
            base_url,
            &item_path(item_type.deleted_collection(), name, None),
            None,
        )
        .await
    }

    // ========================================================================
    // Secrets
    // ========================================================================

    /// Retrieves a secret (latest version when `version` is `None`).
    pub async fn get_secret(&self, base_url: &str, name: &str, version: Option<&str>) -> Result<SecretBundle> {
        self.data_get(base_url, &item_path("secrets", name, version)).await
    }

    /// Writes a new secret version.
    pub async fn set_secret(&self, base_url: &str, name: &str, secret: &SecretBundle) -> Result<SecretBundle> {
        self.data_send(Method::Put, base_url, &item_path("secrets", name, None), to_body(secret)?)
            .await
    }

    /// Patches the attributes of a secret version.
    pub async fn update_secret(
        &self,
        base_url: &str,
        name: &str,
        version: &str,
        patch: &SecretBundle,
    ) -> Result<SecretBundle> {
        self.data_send(
            Method::Patch,
            base_url,
            &item_path("secrets", name, Some(version)),
            to_body(patch)?,
        )
        .await
    }

    // ========================================================================
    // Keys
    // ========================================================================

    /// Retrieves a key (latest version when `version` is `None`).
    pub async fn get_key(&self, base_url: &str, name: &str, version: Option<&str>) -> Result<KeyBundle> {
        self.data_get(base_url, &item_path("keys", name, version)).await
    }

    /// Creates a key, or a new version of it.
    pub async fn create_key(&self, base_url: &str, name: &str, parameters: &KeyCreateParameters) -> Result<KeyBundle> {
        self.data_send(
            Method::Post,
            base_url,
            &format!("keys/{name}/create"),
            to_body(parameters)?,
        )
        .await
    }

    /// Patches a key version.
    pub async fn update_key(
        &self,
        base_url: &str,
        name: &str,
        version: &str,
        parameters: &KeyUpdateParameters,
    ) -> Result<KeyBundle> {
        self.data_send(
            Method::Patch,
            base_url,
            &item_path("keys", name, Some(version)),
            to_body(parameters)?,
        )
        .await
    }

    /// Retrieves a key's rotation policy.
    pub async fn get_key_rotation_policy(&self, base_url: &str, name: &str) -> Result<KeyRotationPolicy> {
        self.data_get(base_url, &format!("keys/{name}/rotationpolicy")).await
    }

    /// Replaces a key's rotation policy.
    pub async fn update_key_rotation_policy(
        &self,
        base_url: &str,
        name: &str,
        policy: &KeyRotationPolicy,
    ) -> Result<KeyRotationPolicy> {
        self.data_send(
            Method::Put,
            base_url,
            &format!("keys/{name}/rotationpolicy"),
            to_body(policy)?,
        )
        .await
    }

    // ========================================================================
    // Certificates
    // ========================================================================

    /// Retrieves a certificate (latest version when `version` is `None`).
    pub async fn get_certificate(
        &self,
        base_url: &str,
        name: &str,
        version: Option<&str>,
    ) -> Result<CertificateBundle> {
        self.data_get(base_url, &item_path("certificates", name, version)).await
    }

    /// Starts issuing a certificate from its policy.
    pub async fn create_certificate(
        &self,
        base_url: &str,
        name: &str,
        policy: &CertificatePolicy,
        tags: &super::models::Tags,
    ) -> Result<CertificateOperation> {
        self.data_send(
            Method::Post,
            base_url,
            &format!("certificates/{name}/create"),
            Some(json!({ "policy": policy, "tags": tags })),
        )
        .await
    }

    /// Imports a PFX or PEM certificate.
    pub async fn import_certificate(
        &self,
        base_url: &str,
        name: &str,
        contents: &str,
        password: Option<&str>,
        policy: &CertificatePolicy,
        tags: &super::models::Tags,
    ) -> Result<CertificateBundle> {
        let mut body = json!({ "value": contents, "policy": policy, "tags": tags });
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            body["pwd"] = json!(password);
        }
        self.data_send(Method::Post, base_url, &format!("certificates/{name}/import"), Some(body))
            .await
    }

    /// Patches a certificate version's attributes and tags.
    pub async fn update_certificate(
        &self,
        base_url: &str,
        name: &str,
        version: &str,
        patch: serde_json::Value,
    ) -> Result<CertificateBundle> {
        self.data_send(
            Method::Patch,
            base_url,
            &item_path("certificates", name, Some(version)),
            Some(patch),
        )
        .await
    }

    /// Retrieves a certificate's pending operation.
    pub async fn get_certificate_operation(&self, base_url: &str, name: &str) -> Result<CertificateOperation> {
        self.data_get(base_url, &format!("certificates/{name}/pending")).await
    }

    /// Retrieves the vault's certificate contacts.
    pub async fn get_certificate_contacts(&self, base_url: &str) -> Result<Contacts> {
        self.data_get(base_url, "certificates/contacts").await
    }

    /// Replaces the vault's certificate contacts.
    pub async fn set_certificate_contacts(&self, base_url: &str, contacts: &Contacts) -> Result<Contacts> {
        self.data_send(Method::Put, base_url, "certificates/contacts", to_body(contacts)?)
            .await
    }

    /// Removes all certificate contacts.
    pub async fn delete_certificate_contacts(&self, base_url: &str) -> Result<()> {
        self.data_send_no_content(Method::Delete, base_url, "certificates/contacts", None)
            .await
    }

    /// Retrieves a certificate issuer.
    pub async fn get_certificate_issuer(&self, base_url: &str, name: &str) -> Result<IssuerBundle> {
        self.data_get(base_url, &format!("certificates/issuers/{name}")).await
    }

    /// Creates or replaces a certificate issuer.
    pub async fn set_certificate_issuer(&self, base_url: &str, name: &str, issuer: &IssuerBundle) -> Result<IssuerBundle> {
        self.data_send(
            Method::Put,
            base_url,
            &format!("certificates/issuers/{name}"),
            to_body(issuer)?,
        )
        .await
    }

    /// Deletes a certificate issuer.
    pub async fn delete_certificate_issuer(&self, base_url: &str, name: &str) -> Result<()> {
        self.data_send_no_content(
            Method::Delete,
            base_url,
            &format!("certificates/issuers/{name}"),
            None,
        )
        .await
    }

    // ========================================================================
    // Managed storage
    // ========================================================================

    /// Retrieves a managed storage account.
    pub async fn get_storage_account(&self, base_url: &str, name: &str) -> Result<StorageBundle> {
        self.data_get(base_url, &format!("storage/{name}")).await
    }

    /// Creates or replaces a managed storage account.
    pub async fn set_storage_account(&self, base_url: &str, name: &str, account: &StorageBundle) -> Result<StorageBundle> {
        self.data_send(Method::Put, base_url, &format!("storage/{name}"), to_body(account)?)
            .await
    }

    /// Patches a managed storage account.
    pub async fn update_storage_account(
        &self,
        base_url: &str,
        name: &str,
        patch: &StorageBundle,
    ) -> Result<StorageBundle> {
        self.data_send(Method::Patch, base_url, &format!("storage/{name}"), to_body(patch)?)
            .await
    }

    /// Retrieves a SAS definition.
    pub async fn get_sas_definition(&self, base_url: &str, account: &str, name: &str) -> Result<SasDefinitionBundle> {
        self.data_get(base_url, &format!("storage/{account}/sas/{name}")).await
    }

    /// Creates or replaces a SAS definition.
    pub async fn set_sas_definition(
        &self,
        base_url: &str,
        account: &str,
        name: &str,
        definition: &SasDefinitionBundle,
    ) -> Result<SasDefinitionBundle> {
        self.data_send(
            Method::Put,
            base_url,
            &format!("storage/{account}/sas/{name}"),
            to_body(definition)?,
        )
        .await
    }

    /// Deletes a SAS definition.
    pub async fn delete_sas_definition(&self, base_url: &str, account: &str, name: &str) -> Result<()> {
        self.data_send_no_content(
            Method::Delete,
            base_url,
            &format!("storage/{account}/sas/{name}"),
            None,
        )
        .await
    }

    /// Recovers a soft-deleted SAS definition.
    pub async fn recover_deleted_sas_definition(&self, base_url: &str, account: &str, name: &str) -> Result<()> {
        self.data_send_no_content(
            Method::Post,
            base_url,
            &format!("deletedstorage/{account}/sas/{name}/recover"),
            None,
        )
        .await
    }

    // ========================================================================
    // Managed HSM role-based access control
    // ========================================================================

    fn role_path(id: &HsmRoleId) -> String {
        let full = id.to_string();
        full.strip_prefix(id.base_url.trim_end_matches('/'))
            .unwrap_or(&full)
            .to_string()
    }

    /// Retrieves a role definition.
    pub async fn get_role_definition(&self, id: &HsmRoleId) -> Result<RoleDefinition> {
        self.data_get(&id.base_url, &Self::role_path(id)).await
    }

    /// Creates or replaces a role definition.
    pub async fn put_role_definition(&self, id: &HsmRoleId, definition: &RoleDefinition) -> Result<RoleDefinition> {
        self.data_send(
            Method::Put,
            &id.base_url,
            &Self::role_path(id),
            Some(json!({ "properties": definition.properties })),
        )
        .await
    }

    /// Deletes a role definition.
    pub async fn delete_role_definition(&self, id: &HsmRoleId) -> Result<()> {
        self.data_send_no_content(Method::Delete, &id.base_url, &Self::role_path(id), None)
            .await
    }

    /// Retrieves a role assignment.
    pub async fn get_role_assignment(&self, id: &HsmRoleId) -> Result<RoleAssignment> {
        self.data_get(&id.base_url, &Self::role_path(id)).await
    }

    /// Creates a role assignment.
    pub async fn put_role_assignment(
        &self,
        id: &HsmRoleId,
        role_definition_id: &str,
        principal_id: &str,
    ) -> Result<RoleAssignment> {
        self.data_send(
            Method::Put,
            &id.base_url,
            &Self::role_path(id),
            Some(json!({
                "properties": {
                    "roleDefinitionId": role_definition_id,
                    "principalId": principal_id,
                }
            })),
        )
        .await
    }

    /// Deletes a role assignment.
    pub async fn delete_role_assignment(&self, id: &HsmRoleId) -> Result<()> {
        self.data_send_no_content(Method::Delete, &id.base_url, &Self::role_path(id), None)
            .await
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::ids::HsmRoleKind;
    use crate::transport::mock::MockTransport;
    use crate::transport::Audience;
    use crate::{Config, TransportType};
    use std::sync::Arc;

    const BASE: &str = "https://kv1.vault.azure.net/";

    fn client(transport: Arc<MockTransport>) -> KeyVaultClient {
        KeyVaultClient::new(transport, &Config::new(TransportType::Mock))
    }

    #[tokio::test]
    async fn test_nested_item_soft_delete_urls() {
        let transport = Arc::new(MockTransport::new());
        transport.on_empty(Method::Post, &format!("{BASE}deletedkeys/k1/recover"), 200).await;
        transport.on_empty(Method::Delete, &format!("{BASE}deletedkeys/k1"), 204).await;
        let client = client(transport.clone());

        client
            .recover_deleted_nested_item(BASE, NestedItemType::Key, "k1")
            .await
            .unwrap();
        client
            .purge_deleted_nested_item(BASE, NestedItemType::Key, "k1")
            .await
            .unwrap();
        assert_eq!(
            client.nested_item_url(BASE, NestedItemType::StorageAccount, "acct1"),
            "https://kv1.vault.azure.net/storage/acct1"
        );
    }

    #[tokio::test]
    async fn test_key_create_body() {
        let transport = Arc::new(MockTransport::new());
        let url = format!("{BASE}keys/k1/create");
        transport
            .on(Method::Post, &url, 200, json!({"key": {"kid": format!("{BASE}keys/k1/v1"), "kty": "EC", "crv": "P-256"}}))
            .await;

        let key = client(transport.clone())
            .create_key(
                BASE,
                "k1",
                &KeyCreateParameters {
                    kty: "EC".into(),
                    crv: Some("P-256".into()),
                    key_ops: vec!["sign".into(), "verify".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(key.key.crv.as_deref(), Some("P-256"));
        let sent = transport.requests_to(Method::Post, &url).await;
        assert_eq!(sent[0].body.as_ref().unwrap()["key_ops"], json!(["sign", "verify"]));
        assert_eq!(sent[0].audience, Audience::KeyVault);
    }

    #[tokio::test]
    async fn test_import_certificate_omits_empty_password() {
        let transport = Arc::new(MockTransport::new());
        let url = format!("{BASE}certificates/c1/import");
        transport.on(Method::Post, &url, 200, json!({"id": format!("{BASE}certificates/c1/v1")})).await;

        client(transport.clone())
            .import_certificate(BASE, "c1", "MIIB", Some(""), &CertificatePolicy::default(), &Default::default())
            .await
            .unwrap();

        let body = transport.requests_to(Method::Post, &url).await[0].body.clone().unwrap();
        assert!(body.get("pwd").is_none());
        assert_eq!(body["value"], "MIIB");
    }

    #[tokio::test]
    async fn test_role_assignment_on_hsm() {
        let transport = Arc::new(MockTransport::new());
        let id = HsmRoleId::new("https://hsm1.managedhsm.azure.net/", "/keys", HsmRoleKind::Assignment, "a1").unwrap();
        transport.on(Method::Put, &id.to_string(), 201, json!({"name": "a1"})).await;

        let assignment = client(transport.clone())
            .put_role_assignment(&id, "/providers/Microsoft.Authorization/roleDefinitions/d1", "p1")
            .await
            .unwrap();

        assert_eq!(assignment.name.as_deref(), Some("a1"));
        let sent = transport.requests().await;
        assert_eq!(sent[0].audience, Audience::ManagedHsm);
        assert!(sent[0]
            .url
            .starts_with("https://hsm1.managedhsm.azure.net/keys/providers/Microsoft.Authorization/roleAssignments/a1?"));
    }
}
