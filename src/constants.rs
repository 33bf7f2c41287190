//! # Constants
//!
//! Fixed contract values shared throughout the controller.
//!
//! The `csi.storage.k8s.io/*` attribute keys must match the strings the
//! secrets-store CSI driver sends to providers; providers key off them when
//! reading the mount request.

/// Attribute key for the name of the pod the mount is created for.
pub const CSI_POD_NAME: &str = "csi.storage.k8s.io/pod.name";

/// Attribute key for the namespace of the pod the mount is created for.
pub const CSI_POD_NAMESPACE: &str = "csi.storage.k8s.io/pod.namespace";

/// Attribute key for the UID of the pod the mount is created for.
pub const CSI_POD_UID: &str = "csi.storage.k8s.io/pod.uid";

/// Attribute key for the pod service account name.
pub const CSI_POD_SERVICE_ACCOUNT_NAME: &str = "csi.storage.k8s.io/serviceAccount.name";

/// Attribute key for the pod service account tokens.
pub const CSI_POD_SERVICE_ACCOUNT_TOKENS: &str = "csi.storage.k8s.io/serviceAccount.tokens";

/// Placeholder for pod identity attributes. There is no pod in this context;
/// the controller mimics the CSI driver's mount request without one.
pub const UNKNOWN_POD_IDENTITY: &str = "unknown";

/// File permission sent to the provider for the staging target path.
/// Serialized as its integer form (`"420"`) in the mount request.
pub const FILE_PERMISSION: u32 = 0o644;

/// Value of the `created-by` label stamped on every Secret this controller
/// creates.
pub const CREATED_BY: &str = "secret-provider-controller";

/// Label key identifying the controller that created a Secret.
pub const CREATED_BY_LABEL: &str = "created-by";

/// Default rotation poll interval when `rotationPollInterval` is unset (seconds).
pub const DEFAULT_ROTATION_POLL_INTERVAL_SECS: u64 = 120;

/// Requeue interval applied by the error policy after a failed pass (seconds).
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Default HTTP server port for metrics and health probes.
pub const DEFAULT_METRICS_PORT: u16 = 8080;
