//! # Secret Provider Controller Library
//!
//! Core functionality for the Secret Provider Controller: CRD types and the
//! reconciliation pipeline that turns a `SecretProvider` resource into native
//! `Secret` objects by calling a secrets-store CSI provider.
//!
//! Tests for the pipeline pieces live in the module files; the full engine is
//! exercised against in-memory collaborators in `tests/reconcile_flow.rs`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod constants;
pub mod duration;
pub mod metrics;
pub mod parameters;
pub mod provider;
pub mod reconciler;
pub mod secrets;
pub mod server;
pub mod token;

/// SecretProvider Custom Resource Definition
///
/// Declares which service account, provider class, and token requests the
/// controller should use when polling a secrets-store provider.
///
/// # Example
///
/// ```yaml
/// apiVersion: secrets-store.csi.x-k8s.io/v1
/// kind: SecretProvider
/// metadata:
///   name: my-app-secrets
///   namespace: default
/// spec:
///   serviceAccountName: my-app
///   secretProviderClassName: my-app-class
///   rotationPollInterval: 2m
///   tokenRequests:
///     - audience: vault
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "secrets-store.csi.x-k8s.io",
    version = "v1",
    kind = "SecretProvider",
    namespaced,
    status = "SecretProviderStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SecretProviderSpec {
    /// Name of the service account used to access the secret store.
    #[serde(default)]
    pub service_account_name: String,
    /// Name of the SecretProviderClass describing the provider to call and
    /// the secret objects to materialize.
    #[serde(default)]
    pub secret_provider_class_name: String,
    /// Interval at which the controller polls the provider for the latest
    /// secret versions. Kubernetes duration string, defaults to 2 minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_poll_interval: Option<String>,
    /// Service account tokens to mint and forward to the provider, in order.
    #[serde(default)]
    pub token_requests: Vec<TokenRequest>,
}

/// Parameters of a service account token to mint for the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    /// Intended audience of the token. The empty string is a valid, distinct
    /// audience: it defers to the kube-apiserver default audiences.
    pub audience: String,
    /// Validity of the token in seconds. Defaults to the apiserver's
    /// TokenRequest default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_seconds: Option<i64>,
}

/// Status of the SecretProvider resource.
///
/// Placeholder only: the engine does not report status yet.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretProviderStatus {
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// SecretProviderClass Custom Resource Definition
///
/// Names the secrets-store provider plugin, its parameters, and the secret
/// objects to materialize from the mounted content. Read-only to this
/// controller.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "secrets-store.csi.x-k8s.io",
    version = "v1",
    kind = "SecretProviderClass"
)]
#[serde(rename_all = "camelCase")]
pub struct SecretProviderClassSpec {
    /// Name of the provider plugin to resolve and invoke.
    #[serde(default)]
    pub provider: String,
    /// Provider-specific parameters, forwarded verbatim in the mount request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, String>>,
    /// Secret objects to materialize from the mounted files, in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_objects: Option<Vec<SecretObject>>,
}

/// A native Secret to materialize from mounted provider content.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretObject {
    /// Name of the Secret to create or update.
    #[serde(default)]
    pub secret_name: String,
    /// Secret type. Empty resolves to `Opaque`; any other value is used as-is.
    #[serde(default)]
    pub r#type: String,
    /// Mapping of mounted files into Secret data keys.
    #[serde(default)]
    pub data: Vec<SecretObjectData>,
}

/// One data entry of a [`SecretObject`].
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretObjectData {
    /// Relative path of the mounted file holding the value.
    #[serde(default)]
    pub object_name: String,
    /// Data key to store the value under in the Secret.
    #[serde(default)]
    pub key: String,
}
