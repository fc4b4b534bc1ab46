// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The key–value store seam.
//!
//! [`KvStore`] is the narrow interface the reconciler and watchers depend on;
//! [`ConsulKv`] implements it against the Consul HTTP API. Blocking reads use
//! Consul's documented long-poll contract: pass the last seen index, let the
//! server hold the request until the prefix changes past it or the wait time
//! elapses, and read the new index from the `X-Consul-Index` header.
//!
//! Plain calls (put/delete/get/keys) carry a short per-request timeout so a
//! slow Consul cannot stall container-event intake.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::constants::{KV_CALL_TIMEOUT, KV_WAIT_SLACK};
use crate::errors::{Error, Result};

/// One key and its decoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
}

/// Outcome of one blocking list call.
#[derive(Debug, Clone)]
pub struct WatchResult {
    /// Every pair currently under the prefix.
    pub pairs: Vec<KvPair>,
    /// Index to pass on the next call.
    pub last_index: u64,
    /// Wall-clock time the call took; longer than the requested wait means
    /// the server returned on timeout, not on change.
    pub request_time: Duration,
}

/// What the agent needs from a consistent KV store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Write `value` at `key`, creating or overwriting.
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Read the value at `key`, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// List the key names under `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// List the pairs under `prefix`, blocking until the prefix changes past
    /// `wait_index` or `wait` elapses. `wait = None` returns immediately.
    async fn list(
        &self,
        prefix: &str,
        wait_index: u64,
        wait: Option<Duration>,
    ) -> Result<WatchResult>;
}

/// Consul KV pairs come back JSON-encoded with base64 values.
#[derive(Debug, Deserialize)]
struct RawKvPair {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

/// [`KvStore`] over the Consul HTTP API.
#[derive(Debug, Clone)]
pub struct ConsulKv {
    base: String,
    client: reqwest::Client,
}

impl ConsulKv {
    /// Build a client for `endpoint` (`host:port` or a full URL).
    ///
    /// Only the shape is validated here; reachability is the caller's
    /// [`status_leader`](Self::status_leader) startup probe.
    pub fn new(endpoint: &str) -> Result<Self> {
        let with_scheme = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };
        let url = Url::parse(&with_scheme)
            .map_err(|e| Error::Config(format!("invalid consul endpoint '{endpoint}': {e}")))?;
        if url.host_str().is_none() {
            return Err(Error::Config(format!(
                "invalid consul endpoint '{endpoint}': missing host"
            )));
        }

        Ok(Self {
            base: with_scheme.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        })
    }

    fn kv_url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}", self.base, key)
    }

    /// Ask for the current leader; any answer proves the store is reachable.
    pub async fn status_leader(&self) -> Result<String> {
        let url = format!("{}/v1/status/leader", self.base);
        let response = self
            .client
            .get(&url)
            .timeout(KV_CALL_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?.trim().trim_matches('"').to_string())
    }
}

/// Client-side timeout for a blocking list call.
///
/// Consul holds the request for the wait plus up to wait/16 of jitter before
/// returning on timeout; the client must outwait both, or every idle cycle
/// reads as a transport error instead of a clean long-poll timeout.
fn blocking_timeout(wait: Duration) -> Duration {
    wait + wait / 16 + KV_WAIT_SLACK
}

/// Read the `X-Consul-Index` header, falling back to the previous index when
/// the server omits it.
fn consul_index(response: &reqwest::Response, previous: u64) -> u64 {
    response
        .headers()
        .get("X-Consul-Index")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(previous)
}

#[async_trait]
impl KvStore for ConsulKv {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let response = self
            .client
            .put(self.kv_url(key))
            .timeout(KV_CALL_TIMEOUT)
            .body(value.to_vec())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::KvStatus {
                status,
                key: key.to_string(),
            });
        }
        debug!(key, "kv put");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.kv_url(key))
            .timeout(KV_CALL_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::KvStatus {
                status,
                key: key.to_string(),
            });
        }
        debug!(key, "kv delete");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get(self.kv_url(key))
            .query(&[("raw", "true")])
            .timeout(KV_CALL_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::KvStatus {
                status,
                key: key.to_string(),
            });
        }
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.kv_url(prefix))
            .query(&[("keys", "true")])
            .timeout(KV_CALL_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(Error::KvStatus {
                status,
                key: prefix.to_string(),
            });
        }
        Ok(response.json().await?)
    }

    async fn list(
        &self,
        prefix: &str,
        wait_index: u64,
        wait: Option<Duration>,
    ) -> Result<WatchResult> {
        let mut request = self
            .client
            .get(self.kv_url(prefix))
            .query(&[("recurse", "true"), ("stale", "true")]);
        let mut timeout = KV_CALL_TIMEOUT;
        if let Some(wait) = wait {
            request = request.query(&[
                ("index", wait_index.to_string()),
                ("wait", format!("{}s", wait.as_secs())),
            ]);
            timeout = blocking_timeout(wait);
        }

        let started = Instant::now();
        let response = request.timeout(timeout).send().await?;
        let request_time = started.elapsed();

        let last_index = consul_index(&response, wait_index);
        let status = response.status();
        let raw: Vec<RawKvPair> = if status == StatusCode::NOT_FOUND {
            Vec::new()
        } else if status.is_success() {
            response.json().await?
        } else {
            return Err(Error::KvStatus {
                status,
                key: prefix.to_string(),
            });
        };

        let mut pairs = Vec::with_capacity(raw.len());
        for pair in raw {
            let value = match &pair.value {
                Some(encoded) => BASE64.decode(encoded).map_err(|e| Error::KvDecode {
                    key: pair.key.clone(),
                    message: e.to_string(),
                })?,
                None => Vec::new(),
            };
            pairs.push(KvPair {
                key: pair.key,
                value,
            });
        }

        Ok(WatchResult {
            pairs,
            last_index,
            request_time,
        })
    }
}

#[cfg(test)]
#[path = "consul_tests.rs"]
mod consul_tests;
