//! # Token Attributes
//!
//! Mints service account tokens for the audiences a `SecretProvider` declares
//! and packs them into the `csi.storage.k8s.io/serviceAccount.tokens` mount
//! attribute the provider expects.
//!
//! Tokens are re-minted on every pass. Short-lived tokens must reflect
//! current validity each time secret content is materialized, so nothing is
//! cached between passes.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::authentication::v1 as authv1;
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::PostParams;
use kube::{Api, Client};
use serde::Serialize;

use crate::constants::CSI_POD_SERVICE_ACCOUNT_TOKENS;
use crate::TokenRequest;

/// A token minted for one audience.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expiration_timestamp: DateTime<Utc>,
}

/// Capability to mint a service account token.
///
/// Supplied to the reconciler at construction so tests can run against an
/// in-memory issuer.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_token(
        &self,
        namespace: &str,
        service_account_name: &str,
        audiences: Vec<String>,
        expiration_seconds: Option<i64>,
    ) -> Result<IssuedToken>;
}

/// Token issuer backed by the Kubernetes TokenRequest subresource.
#[derive(Clone)]
pub struct KubeTokenIssuer {
    client: Client,
}

impl KubeTokenIssuer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for KubeTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeTokenIssuer").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenIssuer for KubeTokenIssuer {
    async fn issue_token(
        &self,
        namespace: &str,
        service_account_name: &str,
        audiences: Vec<String>,
        expiration_seconds: Option<i64>,
    ) -> Result<IssuedToken> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let request = authv1::TokenRequest {
            spec: authv1::TokenRequestSpec {
                audiences,
                expiration_seconds,
                bound_object_ref: None,
            },
            ..Default::default()
        };

        let response = api
            .create_token_request(service_account_name, &PostParams::default(), &request)
            .await
            .with_context(|| {
                format!("failed to create token for service account {namespace}/{service_account_name}")
            })?;

        let status = response.status.with_context(|| {
            format!("token request for {namespace}/{service_account_name} returned no status")
        })?;

        Ok(IssuedToken {
            token: status.token,
            expiration_timestamp: status.expiration_timestamp.0,
        })
    }
}

/// Serialized form of one issued token inside the tokens attribute.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenAttribute {
    token: String,
    expiration_timestamp: String,
}

/// Mint one token per declared request and serialize the result under the
/// fixed tokens attribute key.
///
/// The attribute value is a JSON object keyed by audience; the empty string
/// is a valid key (the apiserver-default-audience case). An empty request
/// list yields `{}`.
pub async fn build_token_attributes(
    issuer: &dyn TokenIssuer,
    namespace: &str,
    service_account_name: &str,
    token_requests: &[TokenRequest],
) -> Result<BTreeMap<String, String>> {
    let mut tokens: BTreeMap<String, TokenAttribute> = BTreeMap::new();

    for request in token_requests {
        // An empty audience is forwarded as an empty audiences list so the
        // apiserver applies its default audiences.
        let audiences = if request.audience.is_empty() {
            Vec::new()
        } else {
            vec![request.audience.clone()]
        };

        let issued = issuer
            .issue_token(
                namespace,
                service_account_name,
                audiences,
                request.expiration_seconds,
            )
            .await
            .with_context(|| {
                format!(
                    "failed to issue token for audience {:?} of service account {}/{}",
                    request.audience, namespace, service_account_name
                )
            })?;

        tokens.insert(
            request.audience.clone(),
            TokenAttribute {
                token: issued.token,
                expiration_timestamp: issued
                    .expiration_timestamp
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            },
        );
    }

    let mut attributes = BTreeMap::new();
    attributes.insert(
        CSI_POD_SERVICE_ACCOUNT_TOKENS.to_string(),
        serde_json::to_string(&tokens)?,
    );
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Mirrors the apiserver defaulting behavior: empty audiences become the
    /// apiserver default audience and unset expirations become 3600 seconds.
    struct FakeIssuer;

    #[async_trait]
    impl TokenIssuer for FakeIssuer {
        async fn issue_token(
            &self,
            namespace: &str,
            service_account_name: &str,
            mut audiences: Vec<String>,
            expiration_seconds: Option<i64>,
        ) -> Result<IssuedToken> {
            if audiences.is_empty() {
                audiences = vec!["api".to_string()];
            }
            let expiration = expiration_seconds.unwrap_or(3600);
            Ok(IssuedToken {
                token: format!(
                    "{namespace}:{service_account_name}:{expiration}:[{}]",
                    audiences.join(" ")
                ),
                expiration_timestamp: Utc.timestamp_opt(1, 0).unwrap(),
            })
        }
    }

    async fn attrs_for(requests: &[TokenRequest]) -> BTreeMap<String, String> {
        build_token_attributes(&FakeIssuer, "test-ns", "test-service-account", requests)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_no_token_requests_yields_empty_object() {
        let attrs = attrs_for(&[]).await;
        assert_eq!(
            attrs.get("csi.storage.k8s.io/serviceAccount.tokens").map(String::as_str),
            Some("{}")
        );
        assert_eq!(attrs.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_string_audience_is_a_valid_key() {
        let attrs = attrs_for(&[TokenRequest {
            audience: String::new(),
            expiration_seconds: None,
        }])
        .await;
        assert_eq!(
            attrs.get("csi.storage.k8s.io/serviceAccount.tokens").map(String::as_str),
            Some(
                r#"{"":{"token":"test-ns:test-service-account:3600:[api]","expirationTimestamp":"1970-01-01T00:00:01Z"}}"#
            )
        );
    }

    #[tokio::test]
    async fn test_named_audience_keys_the_token() {
        let attrs = attrs_for(&[TokenRequest {
            audience: "aud".to_string(),
            expiration_seconds: None,
        }])
        .await;
        assert_eq!(
            attrs.get("csi.storage.k8s.io/serviceAccount.tokens").map(String::as_str),
            Some(
                r#"{"aud":{"token":"test-ns:test-service-account:3600:[aud]","expirationTimestamp":"1970-01-01T00:00:01Z"}}"#
            )
        );
    }

    #[tokio::test]
    async fn test_expiration_seconds_forwarded() {
        let attrs = attrs_for(&[TokenRequest {
            audience: "aud".to_string(),
            expiration_seconds: Some(600),
        }])
        .await;
        let value = attrs
            .get("csi.storage.k8s.io/serviceAccount.tokens")
            .unwrap();
        assert!(value.contains("test-ns:test-service-account:600:[aud]"));
    }
}
