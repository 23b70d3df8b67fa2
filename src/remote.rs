//! Remote Operation Boundary
//!
//! The cache never looks inside remote results. A remote call either yields
//! an opaque JSON value or fails with a [`RemoteError`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::operation_key;
use crate::error::RemoteError;

// == Request ==
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRequest {
    pub category: String,
    pub operation: String,
    pub params: Value,
    /// Stable across retries and replays of the same write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl RemoteRequest {
    pub fn new(category: impl Into<String>, operation: impl Into<String>, params: Value) -> Self {
        Self {
            category: category.into(),
            operation: operation.into(),
            params,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn operation_key(&self) -> String {
        operation_key(&self.category, &self.operation)
    }
}

// == Remote Operation ==
#[async_trait]
pub trait RemoteOperation: Send + Sync {
    /// Performs the operation and returns its opaque result.
    async fn execute(&self, request: &RemoteRequest) -> Result<Value, RemoteError>;

    /// Cheap check whether a write carrying `request.idempotency_key` has
    /// already taken effect. Remotes without such a check report `false`.
    async fn already_applied(&self, _request: &RemoteRequest) -> Result<bool, RemoteError> {
        Ok(false)
    }
}

// == HTTP Remote ==
/// Remote reached over HTTP: `POST {base_url}/{category}/{operation}`.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    base_url: String,
    timeout: Duration,
    http_client: Client,
}

#[derive(Serialize)]
struct RemoteBody<'a> {
    params: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    idempotency_key: Option<&'a str>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, timeout: Duration, http_client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            http_client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, request: &RemoteRequest, suffix: Option<&str>) -> String {
        let mut url = format!("{}/{}/{}", self.base_url, request.category, request.operation);
        if let Some(suffix) = suffix {
            url.push('/');
            url.push_str(suffix);
        }
        url
    }

    async fn post(&self, url: String, request: &RemoteRequest) -> Result<Value, RemoteError> {
        let body = RemoteBody {
            params: &request.params,
            idempotency_key: request.idempotency_key.as_deref(),
        };

        debug!(url = %url, "Calling upstream");
        let response = self
            .http_client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| RemoteError::permanent("DECODE", format!("invalid response body: {}", e)));
        }

        let text = response.text().await.unwrap_or_default();
        Err(error_from_status(status, &text))
    }

    fn map_transport_error(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::timeout(self.timeout)
        } else if err.is_connect() {
            RemoteError::unavailable(format!("upstream unreachable: {}", err))
        } else {
            RemoteError::transient("NETWORK", format!("HTTP request failed: {}", err))
        }
    }
}

#[async_trait]
impl RemoteOperation for HttpRemote {
    async fn execute(&self, request: &RemoteRequest) -> Result<Value, RemoteError> {
        self.post(self.url_for(request, None), request).await
    }

    async fn already_applied(&self, request: &RemoteRequest) -> Result<bool, RemoteError> {
        if request.idempotency_key.is_none() {
            return Ok(false);
        }
        let body = self.post(self.url_for(request, Some("applied")), request).await?;
        Ok(match body {
            Value::Bool(applied) => applied,
            Value::Object(map) => map.get("applied").and_then(Value::as_bool).unwrap_or(false),
            _ => false,
        })
    }
}

/// Maps an upstream failure status to the remote error shape.
///
/// A body already shaped like `{code, retryable, message}` is taken as is.
fn error_from_status(status: StatusCode, body: &str) -> RemoteError {
    if let Ok(err) = serde_json::from_str::<RemoteError>(body) {
        return err;
    }

    let code = status.as_u16().to_string();
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("upstream error").to_string()
    } else {
        body.to_string()
    };

    let retryable = status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS;
    if retryable {
        RemoteError::transient(code, message)
    } else {
        RemoteError::permanent(code, message)
    }
}

// == Scripted Remote ==
pub mod testing {
    //! In-process remote with scripted answers, used by tests and local demos.

    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::{RemoteOperation, RemoteRequest};
    use crate::error::RemoteError;

    #[derive(Debug, Default)]
    struct Script {
        results: HashMap<String, Result<Value, RemoteError>>,
        /// Failures consumed before the scripted result
        upcoming: HashMap<String, VecDeque<RemoteError>>,
        /// Calls whose effect lands but whose response is lost
        lost_responses: HashMap<String, usize>,
        applied: HashSet<String>,
        log: Vec<String>,
        checks: usize,
    }

    /// Answers by `category.operation`. Unknown operations fail permanently.
    #[derive(Debug, Default)]
    pub struct ScriptedRemote {
        script: Mutex<Script>,
        latency: Duration,
    }

    impl ScriptedRemote {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every call sleeps this long before answering.
        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        pub fn respond(&self, operation_key: &str, value: Value) {
            self.script()
                .results
                .insert(operation_key.to_string(), Ok(value));
        }

        pub fn fail(&self, operation_key: &str, err: RemoteError) {
            self.script()
                .results
                .insert(operation_key.to_string(), Err(err));
        }

        /// Fails the next `times` calls before the scripted result applies.
        pub fn fail_next(&self, operation_key: &str, err: RemoteError, times: usize) {
            let mut script = self.script();
            let upcoming = script.upcoming.entry(operation_key.to_string()).or_default();
            upcoming.extend(std::iter::repeat(err).take(times));
        }

        /// The next `times` calls take effect but answer with a timeout.
        pub fn lose_responses(&self, operation_key: &str, times: usize) {
            self.script()
                .lost_responses
                .insert(operation_key.to_string(), times);
        }

        /// Records an idempotency key as already applied.
        pub fn mark_applied(&self, idempotency_key: &str) {
            self.script().applied.insert(idempotency_key.to_string());
        }

        pub fn calls(&self, operation_key: &str) -> usize {
            self.script()
                .log
                .iter()
                .filter(|entry| *entry == operation_key)
                .count()
        }

        pub fn total_calls(&self) -> usize {
            self.script().log.len()
        }

        /// Operation keys in call order.
        pub fn log(&self) -> Vec<String> {
            self.script().log.clone()
        }

        pub fn checks(&self) -> usize {
            self.script().checks
        }

        fn script(&self) -> MutexGuard<'_, Script> {
            self.script.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    #[async_trait]
    impl RemoteOperation for ScriptedRemote {
        async fn execute(&self, request: &RemoteRequest) -> Result<Value, RemoteError> {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            let key = request.operation_key();
            let mut script = self.script();
            script.log.push(key.clone());

            if let Some(err) = script.upcoming.get_mut(&key).and_then(VecDeque::pop_front) {
                return Err(err);
            }

            let result = script.results.get(&key).cloned().unwrap_or_else(|| {
                Err(RemoteError::permanent("NOT_FOUND", format!("no script for {}", key)))
            });

            if result.is_ok() {
                if let Some(idempotency_key) = &request.idempotency_key {
                    script.applied.insert(idempotency_key.clone());
                }
                if let Some(remaining) = script.lost_responses.get_mut(&key) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(RemoteError::timeout(Duration::from_millis(0)));
                    }
                }
            }
            result
        }

        async fn already_applied(&self, request: &RemoteRequest) -> Result<bool, RemoteError> {
            let mut script = self.script();
            script.checks += 1;
            Ok(request
                .idempotency_key
                .as_ref()
                .is_some_and(|key| script.applied.contains(key)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(error_from_status(StatusCode::BAD_GATEWAY, "").retryable);
        assert!(error_from_status(StatusCode::TOO_MANY_REQUESTS, "slow down").retryable);
        assert!(error_from_status(StatusCode::REQUEST_TIMEOUT, "").retryable);
    }

    #[test]
    fn test_client_errors_are_permanent() {
        let err = error_from_status(StatusCode::UNPROCESSABLE_ENTITY, "serial required");
        assert!(!err.retryable);
        assert_eq!(err.code, "422");
        assert_eq!(err.message, "serial required");
    }

    #[test]
    fn test_structured_error_body_is_preserved() {
        let body = r#"{"code":"LOCKED","retryable":true,"message":"database is locked"}"#;
        let err = error_from_status(StatusCode::CONFLICT, body);
        assert_eq!(err, RemoteError::transient("LOCKED", "database is locked"));
    }

    #[test]
    fn test_url_layout() {
        let remote = HttpRemote::new("http://localhost:8080/", Duration::from_secs(1), Client::new());
        let request = RemoteRequest::new("equipment", "getById", json!({"id": 4}));
        assert_eq!(remote.url_for(&request, None), "http://localhost:8080/equipment/getById");
        assert_eq!(
            remote.url_for(&request, Some("applied")),
            "http://localhost:8080/equipment/getById/applied"
        );
    }

    #[test]
    fn test_body_carries_idempotency_key() {
        let params = json!({"name": "pump"});
        let body = RemoteBody {
            params: &params,
            idempotency_key: Some("k-1"),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"params": {"name": "pump"}, "idempotency_key": "k-1"})
        );
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_retryable() {
        // Port 9 (discard) on loopback is closed in test environments
        let remote = HttpRemote::new("http://127.0.0.1:9", Duration::from_secs(2), Client::new());
        let err = remote
            .execute(&RemoteRequest::new("equipment", "getAll", Value::Null))
            .await
            .unwrap_err();
        assert!(err.retryable);
    }
}
