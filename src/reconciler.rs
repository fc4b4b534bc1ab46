// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The inventory reconciler.
//!
//! [`Agent`] owns everything the original design kept in ambient globals: the
//! KV client, the runtime client, the zone store, and the per-network
//! bookkeeping. Container lifecycle events flow in one at a time (the event
//! channel serializes them), get translated into KV writes and deletes, and
//! drive the per-network watcher population through [`NetworkRegistry`].
//!
//! The registry holds the ref-counts and the set of live watchers under one
//! mutex, so "spawn on 0→1 only if no watcher is present" and the watcher's
//! retire-at-zero are decided against the same state and cannot race.
//!
//! KV failures never abort an event: each key is written or deleted on its
//! own, and whatever partial state a crash leaves behind is healed by the next
//! boot reconcile — a present inventory record drives full cleanup, an absent
//! one means there is nothing to undo.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::constants::{INVENTORY_STORE_ROOT, LOCAL_ONLY_DRIVERS, NETWORK_STORE_ROOT, WATCH_BACKOFF};
use crate::consul::KvStore;
use crate::errors::{Error, Result};
use crate::runtime::{short_id, ContainerEvent, ContainerRuntime};
use crate::watcher;
use crate::zone::ZoneStore;

/// Per-network bookkeeping: how many local containers sit on each network,
/// and which networks currently have a watcher task.
///
/// Everything lives under one lock on purpose — see the module docs.
#[derive(Debug, Default)]
pub struct NetworkRegistry {
    counts: HashMap<String, usize>,
    watchers: HashSet<String>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more container on `network`.
    ///
    /// Returns `true` when the caller must spawn a watcher: the count just
    /// left zero, the network is not local-only, and no watcher is present.
    /// The watcher registration happens here, under the same guard as the
    /// decision, so a second event cannot double-spawn.
    pub fn track(&mut self, network: &str, local_only: bool) -> bool {
        let count = self.counts.entry(network.to_string()).or_insert(0);
        *count += 1;
        if local_only || self.watchers.contains(network) {
            return false;
        }
        if *count == 1 {
            self.watchers.insert(network.to_string());
            return true;
        }
        false
    }

    /// Count one container down.
    ///
    /// A watched network keeps its zero-count entry — the watcher reads it as
    /// its stop condition and removes it when it retires. Entries for
    /// local-only networks have no watcher to do that, so they are dropped
    /// here.
    pub fn release(&mut self, network: &str) {
        if let Some(count) = self.counts.get_mut(network) {
            *count = count.saturating_sub(1);
            if *count == 0 && !self.watchers.contains(network) {
                self.counts.remove(network);
            }
        }
    }

    /// The watcher's stop check: when the count has reached zero, remove both
    /// the count entry and the watcher registration and report `true`.
    pub fn try_retire(&mut self, network: &str) -> bool {
        match self.counts.get(network) {
            Some(0) | None => {
                self.counts.remove(network);
                self.watchers.remove(network);
                true
            }
            Some(_) => false,
        }
    }

    /// Drop a watcher registration without touching counts; used when a
    /// watcher aborts before it can serve the network.
    pub fn forget_watcher(&mut self, network: &str) {
        self.watchers.remove(network);
    }

    pub fn count(&self, network: &str) -> usize {
        self.counts.get(network).copied().unwrap_or(0)
    }

    pub fn watched(&self, network: &str) -> bool {
        self.watchers.contains(network)
    }

    /// Networks with a non-zero count.
    pub fn known_networks(&self) -> Vec<String> {
        self.counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(network, _)| network.clone())
            .collect()
    }
}

/// Settings the agent threads through to its tasks.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// `"<advertise>-<hostname>"`, namespaces this node's inventory.
    pub node_id: String,
    /// Domain suffix for zone apexes.
    pub network_tld: String,
    /// Long-poll wait time for KV watches.
    pub consul_wait: Duration,
}

/// The node agent: couples the container runtime to the KV store and the
/// KV store back to the zone store.
pub struct Agent {
    pub(crate) config: AgentConfig,
    pub(crate) kv: Arc<dyn KvStore>,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) zones: Arc<ZoneStore>,
    pub(crate) networks: Arc<Mutex<NetworkRegistry>>,
    /// hostname by container id, so a delete (which arrives after the
    /// container is gone) can still be logged meaningfully.
    host_cache: Mutex<HashMap<String, String>>,
    /// local-only verdict by network name; drivers are immutable per network.
    drivers: Mutex<HashMap<String, bool>>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        kv: Arc<dyn KvStore>,
        runtime: Arc<dyn ContainerRuntime>,
        zones: Arc<ZoneStore>,
    ) -> Self {
        Self {
            config,
            kv,
            runtime,
            zones,
            networks: Arc::new(Mutex::new(NetworkRegistry::new())),
            host_cache: Mutex::new(HashMap::new()),
            drivers: Mutex::new(HashMap::new()),
        }
    }

    fn inventory_key(&self, container: &str) -> String {
        format!("{}/{}/{}", INVENTORY_STORE_ROOT, self.config.node_id, container)
    }

    /// Reconcile persisted inventory with what is actually running, then feed
    /// every live container through the regular add path.
    ///
    /// Stale entries are cleaned first so peers never observe leftovers from
    /// a previous life of this node next to its fresh state.
    pub async fn boot(self: &Arc<Self>) -> Result<()> {
        let live = self.runtime.running().await?;
        let live_set: HashSet<&str> = live.iter().map(String::as_str).collect();

        let prefix = format!("{}/{}/", INVENTORY_STORE_ROOT, self.config.node_id);
        let persisted = self.kv.keys(&prefix).await?;
        for key in &persisted {
            let Some(container) = key.rsplit('/').next().filter(|c| !c.is_empty()) else {
                continue;
            };
            if !live_set.contains(container) {
                info!(container = short_id(container), "cleaning stale inventory");
                self.delete_container(container, "stale", false).await;
            }
        }

        for id in &live {
            self.add_container(id, "existing").await;
        }

        info!(containers = live.len(), "boot reconcile complete");
        Ok(())
    }

    /// Pump container lifecycle events forever, resubscribing when the
    /// runtime drops the stream.
    pub async fn run_events(self: Arc<Self>) {
        loop {
            let runtime = Arc::clone(&self.runtime);
            let mut events = runtime.events();
            while let Some(item) = events.next().await {
                match item {
                    Ok(event) => self.handle_event(event).await,
                    Err(e) => warn!(error = %e, "container event stream error"),
                }
            }
            drop(events);
            warn!("container event stream ended, resubscribing");
            sleep(WATCH_BACKOFF).await;
        }
    }

    pub async fn handle_event(self: &Arc<Self>, event: ContainerEvent) {
        if event.status.is_up() {
            self.add_container(&event.id, event.status.as_str()).await;
        } else {
            self.delete_container(&event.id, event.status.as_str(), true)
                .await;
        }
    }

    /// Publish one container: a network key per attachment, then the
    /// inventory record listing exactly the keys that were written.
    pub async fn add_container(self: &Arc<Self>, id: &str, status: &str) {
        let facts = match self.runtime.inspect(id).await {
            Ok(facts) => facts,
            Err(e) => {
                warn!(container = short_id(id), error = %e, "cannot inspect container, skipping");
                return;
            }
        };
        info!(
            container = short_id(&facts.id),
            hostname = %facts.hostname,
            status,
            "container up"
        );

        let mut written = Vec::with_capacity(facts.networks.len());
        for attachment in &facts.networks {
            let local_only = self.local_only(&attachment.network).await;
            let spawn = {
                let mut registry = self.networks.lock().unwrap();
                registry.track(&attachment.network, local_only)
            };
            if spawn {
                self.spawn_watcher(attachment.network.clone());
            }

            let key = format!(
                "{}/{}/{}/{}",
                NETWORK_STORE_ROOT, attachment.network, facts.hostname, facts.id
            );
            match self.kv.put(&key, attachment.ip.to_string().as_bytes()).await {
                Ok(()) => written.push(key),
                Err(e) => warn!(key = %key, error = %e, "kv write failed, skipping key"),
            }
        }

        self.host_cache
            .lock()
            .unwrap()
            .insert(facts.id.clone(), facts.hostname.clone());

        let inventory_key = self.inventory_key(&facts.id);
        match serde_json::to_vec(&written) {
            Ok(body) => {
                if let Err(e) = self.kv.put(&inventory_key, &body).await {
                    warn!(key = %inventory_key, error = %e, "inventory write failed");
                }
            }
            Err(e) => warn!(key = %inventory_key, error = %e, "inventory encode failed"),
        }
    }

    /// Undo one container using its inventory record; the container itself is
    /// usually gone by now, so the record is the only source of truth.
    ///
    /// `from_event` decides whether ref-counts move: boot-time cleanup deletes
    /// keys for containers that were never counted into this process.
    pub async fn delete_container(&self, id: &str, status: &str, from_event: bool) {
        let hostname = self.host_cache.lock().unwrap().remove(id);
        info!(
            container = short_id(id),
            hostname = hostname.as_deref().unwrap_or("unknown"),
            status,
            "container down"
        );

        let inventory_key = self.inventory_key(id);
        let body = match self.kv.get(&inventory_key).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                warn!(
                    container = short_id(id),
                    error = %Error::InventoryMissing {
                        node: self.config.node_id.clone(),
                        container: id.to_string(),
                    },
                    "nothing to undo"
                );
                return;
            }
            Err(e) => {
                warn!(key = %inventory_key, error = %e, "cannot read inventory record");
                return;
            }
        };

        let keys: Vec<String> = match serde_json::from_slice(&body) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(key = %inventory_key, error = %e, "undecodable inventory record");
                return;
            }
        };

        let mut affected = Vec::new();
        for key in &keys {
            if let Err(e) = self.kv.delete(key).await {
                warn!(key = %key, error = %e, "kv delete failed");
            }
            if let Some(network) = network_of_key(key) {
                if !affected.iter().any(|n| n == network) {
                    affected.push(network.to_string());
                }
            }
        }

        if let Err(e) = self.kv.delete(&inventory_key).await {
            warn!(key = %inventory_key, error = %e, "inventory delete failed");
        }

        if from_event {
            let mut registry = self.networks.lock().unwrap();
            for network in &affected {
                registry.release(network);
            }
        }
    }

    /// Whether `network` is backed by a driver that never needs cross-node
    /// resolution. Verdicts are cached; lookup failures lean toward watching.
    async fn local_only(&self, network: &str) -> bool {
        if let Some(&cached) = self.drivers.lock().unwrap().get(network) {
            return cached;
        }
        let driver = match self.runtime.network_driver(network).await {
            Ok(driver) => driver,
            Err(e) => {
                warn!(network, error = %e, "cannot inspect network driver, assuming cluster-wide");
                return false;
            }
        };
        let local = LOCAL_ONLY_DRIVERS.contains(&driver.as_str());
        debug!(network, driver = %driver, local_only = local, "network driver resolved");
        self.drivers
            .lock()
            .unwrap()
            .insert(network.to_string(), local);
        local
    }

    fn spawn_watcher(self: &Arc<Self>, network: String) {
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            watcher::watch_network(agent, network).await;
        });
    }
}

/// Network name out of a `sensedns/network/<net>/<hostname>/<id>` key.
fn network_of_key(key: &str) -> Option<&str> {
    key.strip_prefix(NETWORK_STORE_ROOT)?
        .strip_prefix('/')?
        .split('/')
        .next()
        .filter(|network| !network.is_empty())
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod reconciler_tests;
