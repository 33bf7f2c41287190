//! # Secret Materialization
//!
//! Turns a declared secret object plus mounted provider files into a native
//! `Secret`, creating it when absent and overwriting only its data when it
//! already exists.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use thiserror::Error;
use tracing::info;

use crate::constants::{CREATED_BY, CREATED_BY_LABEL};
use crate::provider::MountedFile;
use crate::SecretObject;

/// Default secret type when a secret object declares none.
const SECRET_TYPE_OPAQUE: &str = "Opaque";

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("invalid secret object {name:?}: {reason}")]
    Validation { name: String, reason: String },
    #[error("failed to extract data for secret {name:?}: {reason}")]
    DataExtraction { name: String, reason: String },
    #[error("object store error for secret {name:?}: {source}")]
    Store {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Read and upsert capability of the object store, narrowed to what
/// materialization needs.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;
    async fn create(&self, namespace: &str, secret: Secret) -> Result<()>;
    /// Overwrite only the data field of an existing secret. Type and labels
    /// are left untouched.
    async fn update_data(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, ByteString>,
    ) -> Result<()>;
}

/// Secret store backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.api(namespace)
            .get_opt(name)
            .await
            .with_context(|| format!("failed to get secret {namespace}/{name}"))
    }

    async fn create(&self, namespace: &str, secret: Secret) -> Result<()> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.api(namespace)
            .create(&PostParams::default(), &secret)
            .await
            .with_context(|| format!("failed to create secret {namespace}/{name}"))?;
        Ok(())
    }

    async fn update_data(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, ByteString>,
    ) -> Result<()> {
        // Merge patch on data only, so type and labels of the existing
        // secret stay as they were.
        let patch = serde_json::json!({ "data": data });
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("failed to update secret {namespace}/{name}"))?;
        Ok(())
    }
}

/// Validate a declared secret object before touching the store.
pub fn validate_secret_object(secret_object: &SecretObject) -> Result<(), String> {
    if secret_object.secret_name.trim().is_empty() {
        return Err("secret name is empty".to_string());
    }
    if secret_object.data.is_empty() {
        return Err("data entry list is empty".to_string());
    }
    for entry in &secret_object.data {
        if entry.object_name.trim().is_empty() {
            return Err("data entry with empty objectName".to_string());
        }
        if entry.key.trim().is_empty() {
            return Err(format!(
                "data entry for objectName {:?} has an empty key",
                entry.object_name.trim()
            ));
        }
    }
    Ok(())
}

/// Resolve the effective secret type from the free-text type field.
/// Empty or blank resolves to `Opaque`; anything else passes through.
pub fn secret_type(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        SECRET_TYPE_OPAQUE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Build the byte-valued data map by resolving each declared entry against
/// the mounted files.
pub fn secret_data(
    secret_object: &SecretObject,
    files: &[MountedFile],
) -> Result<BTreeMap<String, ByteString>, String> {
    let mut data = BTreeMap::new();
    for entry in &secret_object.data {
        let object_name = entry.object_name.trim();
        let file = files
            .iter()
            .find(|file| file.path == object_name)
            .ok_or_else(|| format!("no mounted file matching objectName {object_name:?}"))?;
        data.insert(
            entry.key.trim().to_string(),
            ByteString(file.contents.clone()),
        );
    }
    Ok(data)
}

/// Materialize one declared secret object from the mounted files.
///
/// Safe to call repeatedly with identical inputs: re-running with unchanged
/// content re-applies the same bytes without further side effects.
pub async fn materialize(
    store: &dyn SecretStore,
    secret_object: &SecretObject,
    files: &[MountedFile],
    namespace: &str,
) -> Result<(), MaterializeError> {
    let name = secret_object.secret_name.trim().to_string();

    validate_secret_object(secret_object).map_err(|reason| MaterializeError::Validation {
        name: name.clone(),
        reason,
    })?;

    let resolved_type = secret_type(&secret_object.r#type);
    let data = secret_data(secret_object, files).map_err(|reason| {
        MaterializeError::DataExtraction {
            name: name.clone(),
            reason,
        }
    })?;

    let existing = store
        .get(namespace, &name)
        .await
        .map_err(|source| MaterializeError::Store {
            name: name.clone(),
            source,
        })?;

    match existing {
        None => {
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(namespace.to_string()),
                    labels: Some(BTreeMap::from([(
                        CREATED_BY_LABEL.to_string(),
                        CREATED_BY.to_string(),
                    )])),
                    ..Default::default()
                },
                type_: Some(resolved_type),
                data: Some(data),
                ..Default::default()
            };
            store
                .create(namespace, secret)
                .await
                .map_err(|source| MaterializeError::Store {
                    name: name.clone(),
                    source,
                })?;
            info!("created secret {}/{}", namespace, name);
        }
        Some(_) => {
            store
                .update_data(namespace, &name, &data)
                .await
                .map_err(|source| MaterializeError::Store {
                    name: name.clone(),
                    source,
                })?;
            info!("updated data of secret {}/{}", namespace, name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SecretObjectData;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySecretStore {
        secrets: Mutex<HashMap<(String, String), Secret>>,
    }

    #[async_trait]
    impl SecretStore for MemorySecretStore {
        async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
            Ok(self
                .secrets
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), name.to_string()))
                .cloned())
        }

        async fn create(&self, namespace: &str, secret: Secret) -> Result<()> {
            let name = secret.metadata.name.clone().unwrap_or_default();
            self.secrets
                .lock()
                .unwrap()
                .insert((namespace.to_string(), name), secret);
            Ok(())
        }

        async fn update_data(
            &self,
            namespace: &str,
            name: &str,
            data: &BTreeMap<String, ByteString>,
        ) -> Result<()> {
            let mut secrets = self.secrets.lock().unwrap();
            let secret = secrets
                .get_mut(&(namespace.to_string(), name.to_string()))
                .ok_or_else(|| anyhow::anyhow!("secret {namespace}/{name} not found"))?;
            secret.data = Some(data.clone());
            Ok(())
        }
    }

    fn secret_object(name: &str, r#type: &str, entries: &[(&str, &str)]) -> SecretObject {
        SecretObject {
            secret_name: name.to_string(),
            r#type: r#type.to_string(),
            data: entries
                .iter()
                .map(|(object_name, key)| SecretObjectData {
                    object_name: (*object_name).to_string(),
                    key: (*key).to_string(),
                })
                .collect(),
        }
    }

    fn mounted(path: &str, contents: &[u8]) -> MountedFile {
        MountedFile {
            path: path.to_string(),
            contents: contents.to_vec(),
        }
    }

    #[test]
    fn test_validate_secret_object() {
        assert!(validate_secret_object(&secret_object("db", "", &[("pw", "password")])).is_ok());
        assert!(validate_secret_object(&secret_object("", "", &[("pw", "password")])).is_err());
        assert!(validate_secret_object(&secret_object("  ", "", &[("pw", "password")])).is_err());
        assert!(validate_secret_object(&secret_object("db", "", &[])).is_err());
        assert!(validate_secret_object(&secret_object("db", "", &[("", "password")])).is_err());
        assert!(validate_secret_object(&secret_object("db", "", &[("pw", "")])).is_err());
    }

    #[test]
    fn test_secret_type_defaults_to_opaque() {
        assert_eq!(secret_type(""), "Opaque");
        assert_eq!(secret_type("   "), "Opaque");
        assert_eq!(secret_type("kubernetes.io/tls"), "kubernetes.io/tls");
        assert_eq!(secret_type(" Opaque "), "Opaque");
    }

    #[test]
    fn test_secret_data_missing_file() {
        let object = secret_object("db", "", &[("pw", "password")]);
        let err = secret_data(&object, &[mounted("other", b"x")]).unwrap_err();
        assert!(err.contains("pw"));
    }

    #[tokio::test]
    async fn test_materialize_creates_with_created_by_label() {
        let store = MemorySecretStore::default();
        let object = secret_object("db", "", &[("pw", "password")]);

        materialize(&store, &object, &[mounted("pw", b"hunter2")], "demo-ns")
            .await
            .unwrap();

        let secret = store.get("demo-ns", "db").await.unwrap().unwrap();
        assert_eq!(
            secret.metadata.labels.unwrap()["created-by"],
            "secret-provider-controller"
        );
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
        assert_eq!(
            secret.data.unwrap()["password"],
            ByteString(b"hunter2".to_vec())
        );
    }

    #[tokio::test]
    async fn test_materialize_update_overwrites_only_data() {
        let store = MemorySecretStore::default();
        let object = secret_object("db", "", &[("pw", "password")]);

        materialize(&store, &object, &[mounted("pw", b"one")], "demo-ns")
            .await
            .unwrap();

        // A later pass declares a different type; the existing secret keeps
        // the type and labels it was created with.
        let retyped = secret_object("db", "kubernetes.io/tls", &[("pw", "password")]);
        materialize(&store, &retyped, &[mounted("pw", b"two")], "demo-ns")
            .await
            .unwrap();

        let secret = store.get("demo-ns", "db").await.unwrap().unwrap();
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
        assert_eq!(
            secret.metadata.labels.unwrap()["created-by"],
            "secret-provider-controller"
        );
        assert_eq!(secret.data.unwrap()["password"], ByteString(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_materialize_is_idempotent() {
        let store = MemorySecretStore::default();
        let object = secret_object("db", "", &[("pw", "password")]);
        let files = [mounted("pw", b"hunter2")];

        materialize(&store, &object, &files, "demo-ns").await.unwrap();
        let first = store.get("demo-ns", "db").await.unwrap().unwrap();

        materialize(&store, &object, &files, "demo-ns").await.unwrap();
        let second = store.get("demo-ns", "db").await.unwrap().unwrap();

        assert_eq!(first.data, second.data);
        assert_eq!(first.type_, second.type_);
        assert_eq!(first.metadata.labels, second.metadata.labels);
    }

    #[tokio::test]
    async fn test_materialize_invalid_object_does_not_touch_store() {
        let store = MemorySecretStore::default();
        let object = secret_object("db", "", &[]);

        let err = materialize(&store, &object, &[], "demo-ns").await.unwrap_err();
        assert!(matches!(err, MaterializeError::Validation { .. }));
        assert!(store.secrets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_materialize_trims_secret_name() {
        let store = MemorySecretStore::default();
        let object = secret_object("  db  ", "", &[("pw", "password")]);

        materialize(&store, &object, &[mounted("pw", b"x")], "demo-ns")
            .await
            .unwrap();

        assert!(store.get("demo-ns", "db").await.unwrap().is_some());
    }
}
