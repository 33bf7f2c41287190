//! # Reconciler
//!
//! Core reconciliation logic for `SecretProvider` resources.
//!
//! ## Reconciliation Flow
//!
//! 1. Re-read the `SecretProvider`; a concurrently deleted object is success
//! 2. Validate the spec (service account and class name must be set)
//! 3. Load the referenced `SecretProviderClass`
//! 4. Mint service account tokens for the declared audiences
//! 5. Assemble the provider parameter blob
//! 6. Resolve the provider client by name and invoke its mount capability
//! 7. Materialize each declared secret object, in order
//! 8. Report the rotation poll interval as the requeue delay
//!
//! Each pass is level-triggered and stateless: it recomputes the desired
//! secret content from scratch and converges the store toward it. There are
//! no internal retries; every failure is returned to the scheduler, which
//! applies its own backoff.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use thiserror::Error;
use tracing::{error, info};

use crate::constants::{
    DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS, DEFAULT_ROTATION_POLL_INTERVAL_SECS,
    FILE_PERMISSION,
};
use crate::duration::parse_kubernetes_duration;
use crate::metrics;
use crate::parameters;
use crate::provider::ProviderClients;
use crate::secrets::{self, KubeSecretStore, MaterializeError, SecretStore};
use crate::token::{self, KubeTokenIssuer, TokenIssuer};
use crate::{SecretProvider, SecretProviderClass, SecretProviderSpec};

#[derive(Debug, Error)]
pub enum Error {
    /// A required spec field is missing or malformed. Raised before any
    /// external call is attempted.
    #[error("invalid secret provider: {0}")]
    Validation(String),
    /// The referenced SecretProviderClass does not exist.
    #[error("secret provider class {0:?} not found")]
    ClassNotFound(String),
    /// No client could be resolved for the provider name.
    #[error("failed to resolve client for provider {provider:?}: {source}")]
    ClientResolution {
        provider: String,
        #[source]
        source: anyhow::Error,
    },
    /// The token issuance collaborator failed.
    #[error("token issuance failed: {0}")]
    TokenIssuance(#[source] anyhow::Error),
    /// The provider mount call failed; propagated verbatim.
    #[error("provider mount failed: {0}")]
    ProviderInvocation(#[source] anyhow::Error),
    /// A declared secret object failed validation, extraction, or upsert.
    /// Remaining secret objects of the same pass are not processed.
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    /// Internal marshal failure; should not occur under valid input.
    #[error("failed to serialize mount request blob: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Reading from the object store failed.
    #[error("object store error: {0}")]
    Store(#[source] anyhow::Error),
}

/// Read capability for the desired-state objects the engine consumes.
#[async_trait]
pub trait ResourceReader: Send + Sync {
    async fn secret_provider(&self, namespace: &str, name: &str)
        -> Result<Option<SecretProvider>>;
    async fn provider_class(&self, name: &str) -> Result<Option<SecretProviderClass>>;
}

/// Resource reader backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeResourceReader {
    client: Client,
}

impl KubeResourceReader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for KubeResourceReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceReader").finish_non_exhaustive()
    }
}

#[async_trait]
impl ResourceReader for KubeResourceReader {
    async fn secret_provider(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecretProvider>> {
        let api: Api<SecretProvider> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .with_context(|| format!("failed to get secret provider {namespace}/{name}"))
    }

    async fn provider_class(&self, name: &str) -> Result<Option<SecretProviderClass>> {
        let api: Api<SecretProviderClass> = Api::all(self.client.clone());
        api.get_opt(name)
            .await
            .with_context(|| format!("failed to get secret provider class {name}"))
    }
}

/// Reconciliation context: the collaborators every pass runs against.
///
/// All four seams are narrow capability traits so the engine can be driven
/// by in-memory fakes in tests. The context holds no mutable state; passes
/// for distinct objects may run concurrently on it.
pub struct Reconciler {
    resources: Arc<dyn ResourceReader>,
    tokens: Arc<dyn TokenIssuer>,
    providers: Arc<dyn ProviderClients>,
    secrets: Arc<dyn SecretStore>,
}

impl Reconciler {
    /// Wire the engine against a cluster, with provider clients supplied by
    /// the embedder's registry.
    pub fn new(client: Client, providers: Arc<dyn ProviderClients>) -> Self {
        Self {
            resources: Arc::new(KubeResourceReader::new(client.clone())),
            tokens: Arc::new(KubeTokenIssuer::new(client.clone())),
            providers,
            secrets: Arc::new(KubeSecretStore::new(client)),
        }
    }

    /// Wire the engine against explicit collaborators.
    pub fn with_collaborators(
        resources: Arc<dyn ResourceReader>,
        tokens: Arc<dyn TokenIssuer>,
        providers: Arc<dyn ProviderClients>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            resources,
            tokens,
            providers,
            secrets,
        }
    }

    /// Run one reconciliation pass for a `SecretProvider`.
    pub async fn reconcile(
        secret_provider: Arc<SecretProvider>,
        ctx: Arc<Reconciler>,
    ) -> Result<Action, Error> {
        let start = Instant::now();
        let namespace = secret_provider
            .namespace()
            .unwrap_or_else(|| "default".to_string());
        let name = secret_provider.name_any();

        info!("reconciling secret provider {}/{}", namespace, name);
        metrics::increment_reconciliations();

        // Re-read the desired state. Gone means deleted while queued; there
        // is nothing left to converge.
        let Some(secret_provider) = ctx
            .resources
            .secret_provider(&namespace, &name)
            .await
            .map_err(Error::Store)?
        else {
            info!(
                "secret provider {}/{} no longer exists, nothing to do",
                namespace, name
            );
            return Ok(Action::await_change());
        };
        let spec = &secret_provider.spec;

        if spec.service_account_name.is_empty() {
            return Err(Error::Validation("service account name is empty".to_string()));
        }
        if spec.secret_provider_class_name.is_empty() {
            return Err(Error::Validation(
                "secret provider class name is empty".to_string(),
            ));
        }
        let poll_interval = rotation_poll_interval(spec)?;

        let class = ctx
            .resources
            .provider_class(&spec.secret_provider_class_name)
            .await
            .map_err(Error::Store)?
            .ok_or_else(|| Error::ClassNotFound(spec.secret_provider_class_name.clone()))?;

        let token_attributes = token::build_token_attributes(
            ctx.tokens.as_ref(),
            &namespace,
            &spec.service_account_name,
            &spec.token_requests,
        )
        .await
        .map_err(Error::TokenIssuance)?;

        let attributes = parameters::assemble(
            class.spec.parameters.as_ref(),
            &namespace,
            &spec.service_account_name,
            &token_attributes,
        )?;

        // Node publish secrets are not wired up, but the provider contract
        // still expects the blob.
        let node_publish_secrets = serde_json::to_string(&BTreeMap::<String, String>::new())?;
        let permission = serde_json::to_string(&FILE_PERMISSION)?;

        let provider_name = class.spec.provider.clone();
        let provider_client =
            ctx.providers
                .get(&provider_name)
                .await
                .map_err(|source| Error::ClientResolution {
                    provider: provider_name.clone(),
                    source,
                })?;

        // Object versions are not tracked across passes: send an empty map
        // and drop what the provider reports back.
        let response = provider_client
            .mount(
                &attributes,
                &node_publish_secrets,
                &permission,
                &BTreeMap::new(),
            )
            .await
            .map_err(Error::ProviderInvocation)?;

        for secret_object in class.spec.secret_objects.as_deref().unwrap_or_default() {
            // The first failure ends the pass. Secrets already upserted in
            // this pass stay; later ones are untouched.
            secrets::materialize(
                ctx.secrets.as_ref(),
                secret_object,
                &response.files,
                &namespace,
            )
            .await?;
            metrics::increment_secrets_materialized();
        }

        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
        info!(
            "reconciled secret provider {}/{}, next poll in {:?}",
            namespace, name, poll_interval
        );
        Ok(Action::requeue(poll_interval))
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

/// Resolve the configured rotation poll interval, defaulting to 2 minutes.
/// A present-but-unparsable value is a validation failure of the pass.
fn rotation_poll_interval(spec: &SecretProviderSpec) -> Result<Duration, Error> {
    match spec.rotation_poll_interval.as_deref() {
        None => Ok(Duration::from_secs(DEFAULT_ROTATION_POLL_INTERVAL_SECS)),
        Some(raw) => parse_kubernetes_duration(raw)
            .map_err(|e| Error::Validation(format!("invalid rotationPollInterval: {e}"))),
    }
}

/// Error policy for the controller watch loop: log, count, and requeue after
/// a fixed delay. Backoff beyond that is the scheduler's concern.
pub fn error_policy(
    secret_provider: Arc<SecretProvider>,
    error: &Error,
    _ctx: Arc<Reconciler>,
) -> Action {
    error!(
        "reconciliation error for {}/{}: {}",
        secret_provider.namespace().unwrap_or_else(|| "default".to_string()),
        secret_provider.name_any(),
        error
    );
    metrics::increment_reconciliation_errors();
    Action::requeue(Duration::from_secs(DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS))
}
