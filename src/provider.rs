//! # Provider Clients
//!
//! Abstract interface to secrets-store provider plugins.
//!
//! The controller only depends on the `Mount` capability: given the assembled
//! parameter blob it returns the files the provider would have mounted. The
//! gRPC transport behind it is an external concern; tests and embedders
//! supply their own implementations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// One file returned by a provider mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedFile {
    /// Relative path of the file within the mount.
    pub path: String,
    /// Raw file contents.
    pub contents: Vec<u8>,
}

/// Result of a provider mount call.
#[derive(Debug, Clone, Default)]
pub struct MountResponse {
    /// Object versions reported by the provider. Version tracking across
    /// passes is not implemented; callers currently ignore these.
    pub object_versions: BTreeMap<String, String>,
    /// Files the provider mounted.
    pub files: Vec<MountedFile>,
}

/// Mount capability of a single provider plugin.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Fetch secret content from the provider.
    ///
    /// `attributes`, `secrets`, and `permission` are the JSON-serialized
    /// parameter blob, node-publish-secrets blob, and file permission the
    /// CSI driver contract defines. `object_versions` carries the versions
    /// from a previous pass; this controller always sends an empty map.
    async fn mount(
        &self,
        attributes: &str,
        secrets: &str,
        permission: &str,
        object_versions: &BTreeMap<String, String>,
    ) -> Result<MountResponse>;
}

impl std::fmt::Debug for dyn ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient").finish_non_exhaustive()
    }
}

/// Resolves a provider client by provider name.
#[async_trait]
pub trait ProviderClients: Send + Sync {
    async fn get(&self, provider_name: &str) -> Result<Arc<dyn ProviderClient>>;
}

/// In-memory provider registry keyed by provider name.
///
/// Embedders register a client per provider socket they discover; the
/// reconciler resolves by the name a `SecretProviderClass` declares.
#[derive(Default)]
pub struct ProviderRegistry {
    clients: RwLock<HashMap<String, Arc<dyn ProviderClient>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the client for a provider name.
    pub async fn register(&self, provider_name: impl Into<String>, client: Arc<dyn ProviderClient>) {
        self.clients.write().await.insert(provider_name.into(), client);
    }

    /// Remove the client for a provider name, e.g. when its socket goes away.
    pub async fn deregister(&self, provider_name: &str) {
        self.clients.write().await.remove(provider_name);
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry").finish_non_exhaustive()
    }
}

#[async_trait]
impl ProviderClients for ProviderRegistry {
    async fn get(&self, provider_name: &str) -> Result<Arc<dyn ProviderClient>> {
        self.clients
            .read()
            .await
            .get(provider_name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("provider {provider_name:?} is not registered"))
    }
}
