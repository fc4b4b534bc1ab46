// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the sensedns agent.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

use std::time::Duration;

// ============================================================================
// KV Store Layout
// ============================================================================

/// KV prefix under which per-network hostname records live.
///
/// Full keys are `sensedns/network/<network>/<hostname>/<containerId>` with the
/// container's IPv4 address as the value.
pub const NETWORK_STORE_ROOT: &str = "sensedns/network";

/// KV prefix under which per-node inventory records live.
///
/// Full keys are `sensedns/inventory/<nodeId>/<containerId>`; the value is a
/// JSON array of the network keys written for that container.
pub const INVENTORY_STORE_ROOT: &str = "sensedns/inventory";

// ============================================================================
// DNS Protocol Constants
// ============================================================================

/// Standard DNS port, used when a recursor endpoint omits one
pub const DNS_PORT: u16 = 53;

/// TTL for every A record this agent publishes (1 hour)
pub const RECORD_TTL_SECS: u32 = 3600;

/// Read/write timeout applied to DNS exchanges with recursors
pub const DNS_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle timeout for inbound TCP DNS connections
pub const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// KV Client Tunables
// ============================================================================

/// Timeout for non-blocking KV calls (put/delete/get/keys).
///
/// Event handling must never stall behind a slow Consul, so these calls are
/// bounded independently of the long-poll wait time.
pub const KV_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Flat slack added to a blocking list call's client-side timeout, on top of
/// the requested wait and Consul's wait/16 jitter allowance.
pub const KV_WAIT_SLACK: Duration = Duration::from_secs(5);

/// Flat back-off applied by watchers after a KV transport error
pub const WATCH_BACKOFF: Duration = Duration::from_secs(2);

// ============================================================================
// Configuration Defaults
// ============================================================================

/// Default Consul endpoint
pub const DEFAULT_CONSUL_URL: &str = "127.0.0.1:8500";

/// Default long-poll wait time for KV watches
pub const DEFAULT_CONSUL_TIMEOUT: &str = "5m";

/// Default DNS listener bind host
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0";

/// Default recursor consulted for names outside the network TLD
pub const DEFAULT_RECURSOR: &str = "8.8.8.8:53";

/// Default domain suffix appended after the network name
pub const DEFAULT_NETWORK_TLD: &str = "sensedns";

/// Network drivers that never need cross-node resolution.
///
/// Containers attached only to these get no watcher: their names are not
/// reachable from other nodes anyway.
pub const LOCAL_ONLY_DRIVERS: &[&str] = &["host", "null", "bridge"];
