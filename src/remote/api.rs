//! REST client for the remote photo service.
//!
//! Every call is a GET against one endpoint with the method name and the
//! API key as query parameters. The response envelope is `{"stat": "ok", ...}`
//! or `{"stat": "fail", "code": n, "message": "..."}`; failures with a vendor
//! code surface as [`ApiError::Vendor`] and are never retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::identity::{ClientCache, ClientProfile, IdentityError, IdentityPool};
use crate::retry::{retry_with_backoff, RetryAction, RetryConfig};

pub const DEFAULT_API_BASE_URL: &str = "https://api.flickr.com/services/rest";
const METHOD_NAMESPACE: &str = "flickr";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status} calling {method}")]
    Status { status: u16, method: String },

    #[error("Transport error calling {method}: {source}")]
    Transport {
        method: String,
        source: reqwest::Error,
    },

    #[error("Remote error {code} from {method}: {message}")]
    Vendor {
        code: i64,
        message: String,
        method: String,
    },

    #[error("Malformed response from {method}: {reason}")]
    Decode { method: String, reason: String },

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl ApiError {
    /// Whether a retry could plausibly succeed, given the transient status set.
    pub fn is_retryable(&self, policy: &RetryConfig) -> bool {
        match self {
            Self::Status { status, .. } => policy.is_transient_status(*status),
            Self::Transport { source, .. } => !source.is_builder(),
            Self::Vendor { .. } | Self::Decode { .. } | Self::Identity(_) => false,
        }
    }

    pub fn vendor_code(&self) -> Option<i64> {
        match self {
            Self::Vendor { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A single remote method call. The seam tests replace with a scripted fake.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Call `method` (without namespace) and return the parsed body of a
    /// successful envelope.
    async fn call(&self, method: &str, params: &[(String, String)]) -> Result<Value, ApiError>;
}

/// The production [`RemoteApi`] over reqwest.
pub struct HttpApi {
    base_url: String,
    identities: Arc<IdentityPool>,
    clients: Arc<ClientCache>,
    retry: RetryConfig,
    timeout: Duration,
}

impl HttpApi {
    pub fn new(
        base_url: impl Into<String>,
        identities: Arc<IdentityPool>,
        clients: Arc<ClientCache>,
        retry: RetryConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            identities,
            clients,
            retry,
            timeout,
        }
    }

    async fn call_once(&self, method: &str, params: &[(String, String)]) -> Result<Value, ApiError> {
        let identity = self.identities.next(ClientProfile::Api);
        let client = self.clients.get(&identity.http)?;
        let qualified = format!("{METHOD_NAMESPACE}.{method}");

        let mut query: Vec<(&str, &str)> = vec![
            ("method", qualified.as_str()),
            ("format", "json"),
            ("nojsoncallback", "1"),
        ];
        if let Some(key) = &identity.credential {
            query.push(("api_key", key.expose()));
        }
        query.extend(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        tracing::debug!(method = %qualified, ?params, "API call");

        let transport = |source| ApiError::Transport {
            method: method.to_string(),
            source,
        };
        let response = client
            .get(&self.base_url)
            .query(&query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                method: method.to_string(),
            });
        }
        let bytes = response.bytes().await.map_err(transport)?;
        let body: Value = serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode {
            method: method.to_string(),
            reason: e.to_string(),
        })?;
        parse_envelope(method, body)
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    async fn call(&self, method: &str, params: &[(String, String)]) -> Result<Value, ApiError> {
        retry_with_backoff(
            &self.retry,
            |e: &ApiError| {
                if e.is_retryable(&self.retry) {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || self.call_once(method, params),
        )
        .await
    }
}

/// Split a response envelope into its body or a vendor error.
pub fn parse_envelope(method: &str, body: Value) -> Result<Value, ApiError> {
    match body.get("stat").and_then(Value::as_str) {
        Some("ok") => Ok(body),
        Some("fail") => Err(ApiError::Vendor {
            code: body.get("code").and_then(Value::as_i64).unwrap_or(-1),
            message: body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            method: method.to_string(),
        }),
        other => Err(ApiError::Decode {
            method: method.to_string(),
            reason: format!("unexpected stat {other:?}"),
        }),
    }
}

/// Build an owned parameter list from string pairs.
pub fn params<const N: usize>(pairs: [(&str, &str); N]) -> Vec<(String, String)> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ApiKey, SelectionMode};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer, max_retries: u32) -> HttpApi {
        let key: ApiKey = "testkey".parse().unwrap();
        let pool = IdentityPool::new(vec![key], vec![], vec![], SelectionMode::Pinned).unwrap();
        HttpApi::new(
            format!("{}/rest", server.uri()),
            Arc::new(pool),
            Arc::new(ClientCache::new(Duration::from_secs(5))),
            RetryConfig {
                max_retries,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                ..RetryConfig::default()
            },
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_envelope_ok_and_fail() {
        let ok = parse_envelope("m", json!({"stat": "ok", "x": 1})).unwrap();
        assert_eq!(ok["x"], 1);

        let err = parse_envelope(
            "m",
            json!({"stat": "fail", "code": 1, "message": "User not found"}),
        )
        .unwrap_err();
        assert_eq!(err.vendor_code(), Some(1));
        assert!(!err.is_retryable(&RetryConfig::default()));

        assert!(matches!(
            parse_envelope("m", json!({"x": 1})),
            Err(ApiError::Decode { .. })
        ));
    }

    #[test]
    fn test_status_retryability_follows_policy() {
        let policy = RetryConfig::default();
        let e = ApiError::Status {
            status: 503,
            method: "m".into(),
        };
        assert!(e.is_retryable(&policy));
        let e = ApiError::Status {
            status: 404,
            method: "m".into(),
        };
        assert!(!e.is_retryable(&policy));
    }

    #[tokio::test]
    async fn test_sends_method_key_and_format() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest"))
            .and(query_param("method", "flickr.people.getInfo"))
            .and(query_param("api_key", "testkey"))
            .and(query_param("format", "json"))
            .and(query_param("nojsoncallback", "1"))
            .and(query_param("user_id", "1@N01"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"stat": "ok", "person": {"nsid": "1@N01"}})),
            )
            .mount(&server)
            .await;

        let api = api_for(&server, 0);
        let body = api
            .call("people.getInfo", &params([("user_id", "1@N01")]))
            .await
            .unwrap();
        assert_eq!(body["person"]["nsid"], "1@N01");
    }

    #[tokio::test]
    async fn test_retries_transient_status_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"stat": "ok"})))
            .mount(&server)
            .await;

        let api = api_for(&server, 3);
        api.call("test.echo", &[]).await.unwrap();
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_vendor_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"stat": "fail", "code": 2, "message": "Unknown user"}),
            ))
            .mount(&server)
            .await;

        let api = api_for(&server, 3);
        let err = api.call("people.getInfo", &[]).await.unwrap_err();
        assert_eq!(err.vendor_code(), Some(2));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_last_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let api = api_for(&server, 1);
        let err = api.call("test.echo", &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 502, .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_json_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let api = api_for(&server, 3);
        let err = api.call("test.echo", &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
