// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error taxonomy for the sensedns agent.
//!
//! Startup paths bubble these up through `anyhow` and terminate the process;
//! everything past startup degrades instead: event handlers log and move on,
//! watchers back off and retry, responders translate failures into DNS
//! response codes.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the agent distinguishes.
#[derive(Debug, Error)]
pub enum Error {
    /// A flag or environment value failed validation at startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The container runtime refused or dropped a request.
    #[error("container runtime error: {0}")]
    Runtime(#[from] bollard::errors::Error),

    /// A KV request failed at the transport or HTTP level.
    #[error("kv store error: {0}")]
    Kv(#[from] reqwest::Error),

    /// The KV store answered with a status the client has no mapping for.
    #[error("kv store returned unexpected status {status} for {key}")]
    KvStatus {
        status: reqwest::StatusCode,
        key: String,
    },

    /// A KV value could not be decoded.
    #[error("undecodable kv value at {key}: {message}")]
    KvDecode { key: String, message: String },

    /// A delete found no inventory record to drive cleanup from.
    #[error("no inventory record for container {container} on node {node}")]
    InventoryMissing { node: String, container: String },

    /// An inbound query did not carry exactly one question.
    #[error("malformed query: expected exactly one question, got {0}")]
    QueryMalformed(usize),

    /// Every configured recursor failed for a query.
    #[error("all recursors failed")]
    RecursionFailed,

    /// DNS message encode/decode failure.
    #[error(transparent)]
    Proto(#[from] hickory_proto::error::ProtoError),

    /// Inventory record (de)serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
