// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # sensedns - Cluster-wide Container DNS
//!
//! sensedns is a per-node agent that makes every container on a cluster's
//! overlay networks resolvable by hostname from every other node, with
//! Consul as the shared source of truth.
//!
//! ## Overview
//!
//! Each node runs one agent that:
//!
//! - watches the local Docker engine for container lifecycle events
//! - publishes its own containers' hostname→IP facts into Consul KV
//! - long-polls Consul for the facts peers publish on networks of local
//!   interest, mirroring them into an in-memory zone store
//! - serves the configured network TLD authoritatively over UDP and TCP,
//!   forwarding everything else to an upstream recursor
//!
//! ## Modules
//!
//! - [`zone`] - the concurrently readable zone store with round-robin rotation
//! - [`server`] - the DNS responder
//! - [`recursor`] - upstream recursion with TCP retry on truncation
//! - [`watcher`] - per-network KV long-poll tasks
//! - [`reconciler`] - container events → KV writes, ref-counted watcher pool
//! - [`consul`] / [`runtime`] - the narrow seams to Consul and Docker
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sensedns::server::Handler;
//! use sensedns::zone::ZoneStore;
//!
//! // A handler serving an empty store with recursion disabled answers
//! // everything with SERVFAIL until watchers install zones.
//! let zones = Arc::new(ZoneStore::new());
//! let handler = Handler::new(zones, None);
//! # let _ = handler;
//! ```

pub mod config;
pub mod constants;
pub mod consul;
pub mod errors;
pub mod reconciler;
pub mod recursor;
pub mod runtime;
pub mod server;
pub mod watcher;
pub mod zone;

#[cfg(test)]
pub(crate) mod testutil;
