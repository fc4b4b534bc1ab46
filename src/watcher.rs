// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-network watch task.
//!
//! One task per watched network keeps the zone store's view of
//! `sensedns/network/<network>/` in sync through Consul blocking queries.
//! Every successful read rebuilds the whole zone and installs it atomically;
//! a watcher that dies and gets respawned therefore loses nothing.
//!
//! The task exits when the network's ref-count reaches zero, observed through
//! the shared [`NetworkRegistry`](crate::reconciler::NetworkRegistry) at the
//! top of every turn; at that point it also removes the zone it maintained.

use std::net::Ipv4Addr;
use std::sync::Arc;

use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::constants::{NETWORK_STORE_ROOT, RECORD_TTL_SECS, WATCH_BACKOFF};
use crate::consul::KvPair;
use crate::errors::Result;
use crate::reconciler::Agent;
use crate::zone::Zone;

/// Long-poll `network`'s KV prefix until the network loses its last local
/// container.
pub async fn watch_network(agent: Arc<Agent>, network: String) {
    let apex = match zone_apex(&network, &agent.config.network_tld) {
        Ok(apex) => apex,
        Err(e) => {
            error!(network = %network, error = %e, "network name does not form a zone apex");
            agent.networks.lock().unwrap().forget_watcher(&network);
            return;
        }
    };
    let prefix = format!("{NETWORK_STORE_ROOT}/{network}/");
    let wait = agent.config.consul_wait;

    info!(network = %network, "start watching");
    let mut index: u64 = 0;
    loop {
        let result = match agent.kv.list(&prefix, index, Some(wait)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(network = %network, error = %e, "watch list failed, backing off");
                sleep(WATCH_BACKOFF).await;
                continue;
            }
        };

        // Stop condition, checked under the same guard the reconciler uses
        // for its spawn decision.
        if agent.networks.lock().unwrap().try_retire(&network) {
            agent.zones.remove(&apex);
            info!(network = %network, "stop watching");
            return;
        }

        // The server held the call for the whole wait: nothing changed.
        if result.request_time > wait {
            debug!(network = %network, "watch timed out, re-polling");
            continue;
        }

        let zone = build_zone(&result.pairs, &network, &agent.config.network_tld);
        debug!(
            network = %network,
            records = zone.len(),
            index = result.last_index,
            "zone update"
        );
        agent.zones.replace(apex.clone(), zone);
        index = result.last_index;
    }
}

/// `<network>.<tld>.` as a store key.
pub(crate) fn zone_apex(network: &str, tld: &str) -> Result<LowerName> {
    let name = Name::from_utf8(format!("{network}.{tld}."))?;
    Ok(LowerName::from(name))
}

/// Translate the pairs under a network prefix into that network's zone.
///
/// Each `<prefix>/<hostname>/<containerId>` pair becomes one A record owned
/// by `<hostname>.<network>.<tld>.`; pairs sharing a hostname merge into one
/// multi-record list in key order. Malformed keys and unparseable addresses
/// are skipped, not fatal.
pub(crate) fn build_zone(pairs: &[KvPair], network: &str, tld: &str) -> Zone {
    let mut zone = Zone::new();
    for pair in pairs {
        let Some(hostname) = hostname_of_key(&pair.key) else {
            warn!(key = %pair.key, "skipping malformed network key");
            continue;
        };
        let value = String::from_utf8_lossy(&pair.value);
        let ip: Ipv4Addr = match value.trim().parse() {
            Ok(ip) => ip,
            Err(_) => {
                warn!(key = %pair.key, value = %value, "skipping unparseable address");
                continue;
            }
        };
        let owner = match Name::from_utf8(format!("{hostname}.{network}.{tld}.")) {
            Ok(owner) => owner,
            Err(e) => {
                warn!(key = %pair.key, error = %e, "skipping unrepresentable owner name");
                continue;
            }
        };
        let mut record = Record::from_rdata(owner, RECORD_TTL_SECS, RData::A(ip.into()));
        record.set_dns_class(DNSClass::IN);
        zone.push(record);
    }
    zone
}

/// Hostname segment of a `<prefix>/<hostname>/<containerId>` key.
fn hostname_of_key(key: &str) -> Option<&str> {
    let mut segments = key.rsplit('/');
    segments.next()?;
    segments.next().filter(|hostname| !hostname.is_empty())
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod watcher_tests;
