//! # Secret Provider Controller
//!
//! A Kubernetes controller that periodically pulls secret content from
//! secrets-store CSI providers and materializes it as native Secret objects.
//!
//! ## Overview
//!
//! 1. **Watching SecretProvider resources** - across all namespaces
//! 2. **Minting service account tokens** - one per declared audience, fresh
//!    on every poll so rotation guarantees hold
//! 3. **Invoking the provider** - with the same parameter contract the CSI
//!    driver uses for pod mounts
//! 4. **Materializing secrets** - creating Secrets with a `created-by` label,
//!    or overwriting only their data when they already exist
//! 5. **Polling** - requeueing each resource after its `rotationPollInterval`
//!
//! The kube-runtime controller is the scheduler here: it serializes passes
//! per object, applies the requeue delays the reconciler reports, and retries
//! failed passes via the error policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use kube::{Api, Client};
use kube_runtime::{watcher, Controller};
use tracing::{error, info};

use secret_provider_controller::constants::DEFAULT_METRICS_PORT;
use secret_provider_controller::provider::{ProviderClients, ProviderRegistry};
use secret_provider_controller::reconciler::{error_policy, Reconciler};
use secret_provider_controller::server::{start_server, ServerState};
use secret_provider_controller::{metrics, SecretProvider};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secret_provider_controller=info".into()),
        )
        .init();

    info!("Starting Secret Provider Controller");

    metrics::register_metrics()?;

    let server_state = Arc::new(ServerState {
        is_ready: AtomicBool::new(false),
    });

    let server_port = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(DEFAULT_METRICS_PORT);

    let probe_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, probe_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default().await?;

    // Provider transports register their clients here as plugin sockets are
    // discovered; the reconciler only resolves by name.
    let providers: Arc<dyn ProviderClients> = Arc::new(ProviderRegistry::new());

    let reconciler = Arc::new(Reconciler::new(client.clone(), providers));

    // Watch SecretProvider resources across all namespaces.
    let secret_providers: Api<SecretProvider> = Api::all(client);

    server_state.is_ready.store(true, Ordering::Relaxed);

    Controller::new(secret_providers, watcher::Config::default())
        .shutdown_on_signal()
        .run(Reconciler::reconcile, error_policy, reconciler)
        .for_each(|_| std::future::ready(()))
        .await;

    info!("Controller stopped");

    Ok(())
}
