use axum::body::Bytes;
use axum::http::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use common::error::ApiError;

use crate::core::registry::Registry;

/// A peer's response, relayed verbatim. Callers can tell "peer answered
/// with an application error" apart from "peer unreachable" because the
/// latter never produces one of these.
#[derive(Clone, Debug)]
pub struct Relayed {
    pub status: StatusCode,
    pub body: Bytes,
    pub content_type: Option<String>,
}

impl Relayed {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::Any(anyhow::anyhow!("malformed peer response: {}", e)))
    }
}

/// Stateless pass-through to peer APIs, keyed only on registry lookups.
/// No retries, no caching; its own timeout is deliberately shorter than any
/// caller-side timeout so a hung peer cannot hang an operator request.
#[derive(Clone)]
pub struct Proxy {
    registry: Registry,
    http: reqwest::Client,
    timeout: Duration,
    forwarded: Arc<AtomicU64>,
}

impl Proxy {
    pub fn new(registry: Registry, timeout: Duration) -> Self {
        Self {
            registry,
            http: reqwest::Client::new(),
            timeout,
            forwarded: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of requests that actually left this process. Dispatches to
    /// the self node must never move it.
    pub fn forwarded_calls(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Forward a request to `node_id`'s native API path and relay the
    /// response unmodified. Network-level failure maps to
    /// `ProxyUnreachable`; an error status from the peer is not an error
    /// here — it is the peer's answer.
    pub async fn forward(
        &self,
        node_id: &str,
        method: Method,
        path_and_query: &str,
        body: Option<Bytes>,
        bearer: Option<&str>,
    ) -> Result<Relayed, ApiError> {
        self.forward_with_timeout(node_id, method, path_and_query, body, bearer, self.timeout)
            .await
    }

    /// `forward` with a caller-chosen timeout. Bulk payloads like migration
    /// archives outlive the control-plane timeout and have to pick their
    /// own.
    pub async fn forward_with_timeout(
        &self,
        node_id: &str,
        method: Method,
        path_and_query: &str,
        body: Option<Bytes>,
        bearer: Option<&str>,
        timeout: Duration,
    ) -> Result<Relayed, ApiError> {
        let node = self
            .registry
            .get(node_id)?
            .ok_or(ApiError::NodeNotFound)?;

        let url = format!("{}{}", node.base_url(), path_and_query);

        self.forwarded.fetch_add(1, Ordering::Relaxed);

        let mut req = self.http.request(method, &url).timeout(timeout);
        if let Some(body) = body {
            req = req
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(body);
        }
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        self.relay(node_id, &url, req).await
    }

    /// `forward` with a JSON payload.
    pub async fn forward_json<T: Serialize>(
        &self,
        node_id: &str,
        method: Method,
        path_and_query: &str,
        payload: &T,
        bearer: Option<&str>,
    ) -> Result<Relayed, ApiError> {
        self.forward_json_with_timeout(node_id, method, path_and_query, payload, bearer, self.timeout)
            .await
    }

    pub async fn forward_json_with_timeout<T: Serialize>(
        &self,
        node_id: &str,
        method: Method,
        path_and_query: &str,
        payload: &T,
        bearer: Option<&str>,
        timeout: Duration,
    ) -> Result<Relayed, ApiError> {
        let node = self
            .registry
            .get(node_id)?
            .ok_or(ApiError::NodeNotFound)?;

        let url = format!("{}{}", node.base_url(), path_and_query);

        self.forwarded.fetch_add(1, Ordering::Relaxed);

        let mut req = self
            .http
            .request(method, &url)
            .timeout(timeout)
            .json(payload);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        self.relay(node_id, &url, req).await
    }

    async fn relay(
        &self,
        node_id: &str,
        url: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<Relayed, ApiError> {
        let resp = req
            .send()
            .await
            .map_err(|e| ApiError::ProxyUnreachable(format!("{} ({}): {}", node_id, url, e)))?;

        let status = resp.status();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes().await.map_err(ApiError::UpstreamReq)?;

        Ok(Relayed {
            status,
            body,
            content_type,
        })
    }
}
