// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory authoritative zone data.
//!
//! A [`Zone`] maps a [`RecordKey`] (owner, type, class — TTL deliberately
//! excluded) to the ordered list of resource records sharing that identity.
//! The [`ZoneStore`] maps zone apexes to zones and answers the longest-suffix
//! question: which zone, if any, is authoritative for a queried name.
//!
//! Watchers atomically replace whole zones; the responder reads under a shared
//! guard and rotates answered record lists under the exclusive guard, so two
//! concurrent responders can never interleave rotations and starve a record.

use std::collections::HashMap;
use std::sync::RwLock;

use hickory_proto::rr::{DNSClass, LowerName, RData, Record, RecordType};

/// Identity of an RR set within a zone.
///
/// Records that differ only in TTL collapse onto the same key and therefore
/// into a single multi-record list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    name: LowerName,
    rtype: RecordType,
    class: DNSClass,
}

impl RecordKey {
    pub fn new(name: LowerName, rtype: RecordType, class: DNSClass) -> Self {
        Self { name, rtype, class }
    }

    /// Key under which `record` is filed.
    pub fn for_record(record: &Record) -> Self {
        Self {
            name: LowerName::from(record.name().clone()),
            rtype: record.record_type(),
            class: record.dns_class(),
        }
    }

    pub fn name(&self) -> &LowerName {
        &self.name
    }
}

/// The records one network's zone is authoritative for.
///
/// Insertion order within a key is preserved; the responder's round-robin
/// rotation depends on it.
#[derive(Debug, Default, Clone)]
pub struct Zone {
    records: HashMap<RecordKey, Vec<Record>>,
}

impl Zone {
    pub fn new() -> Self {
        Self::default()
    }

    /// File a record under its identity key, appending to any existing list.
    pub fn push(&mut self, record: Record) {
        self.records
            .entry(RecordKey::for_record(&record))
            .or_default()
            .push(record);
    }

    pub fn get(&self, key: &RecordKey) -> Option<&[Record]> {
        self.records.get(key).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Single-step cyclic rotation of the list at `key`: head becomes tail.
    ///
    /// No-op for absent keys and lists of one.
    fn rotate(&mut self, key: &RecordKey) {
        if let Some(list) = self.records.get_mut(key) {
            if list.len() > 1 {
                list.rotate_left(1);
            }
        }
    }
}

/// Everything the responder needs to assemble one authoritative reply.
#[derive(Debug, Default)]
pub struct ZoneAnswer {
    /// Records matching the question exactly.
    pub answers: Vec<Record>,
    /// The zone's apex NS records.
    pub name_servers: Vec<Record>,
    /// Best-effort A/AAAA glue for the NS targets.
    pub additionals: Vec<Record>,
}

/// Concurrently readable mapping from zone apex to [`Zone`].
///
/// Many readers, one writer. Guards are never held across await points.
#[derive(Debug, Default)]
pub struct ZoneStore {
    zones: RwLock<HashMap<LowerName, Zone>>,
}

impl ZoneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically install `zone` as the entire contents for `apex`.
    ///
    /// Readers observe either the previous zone or this one, never a mixture.
    pub fn replace(&self, apex: LowerName, zone: Zone) {
        let mut zones = self.zones.write().unwrap();
        zones.insert(apex, zone);
    }

    /// Drop `apex` and every record under it.
    pub fn remove(&self, apex: &LowerName) {
        let mut zones = self.zones.write().unwrap();
        zones.remove(apex);
    }

    /// Find the apex of the zone authoritative for `qname`.
    ///
    /// Walks the labels of `qname` from the full name toward the root and
    /// returns the first (deepest) apex present. DS is the exception: a DS
    /// query for a delegated name must be answered by the parent, so the walk
    /// continues and the shallowest matching apex wins.
    pub fn match_zone(&self, qname: &LowerName, qtype: RecordType) -> Option<LowerName> {
        let zones = self.zones.read().unwrap();
        let mut shallowest = None;
        let mut candidate = qname.clone();
        loop {
            if zones.contains_key(&candidate) {
                if qtype != RecordType::DS {
                    return Some(candidate);
                }
                shallowest = Some(candidate.clone());
            }
            if candidate.is_root() {
                break;
            }
            candidate = candidate.base_name();
        }
        shallowest
    }

    /// Collect the reply sections for `key` out of the zone at `apex` and
    /// rotate the answered list.
    ///
    /// Runs entirely under the exclusive guard: the read of the list and its
    /// rotation are one critical section, which keeps rotation fair under
    /// concurrent queries. Returns `None` when the apex vanished between the
    /// caller's [`match_zone`](Self::match_zone) and this call.
    pub fn answer(&self, apex: &LowerName, key: &RecordKey) -> Option<ZoneAnswer> {
        let mut zones = self.zones.write().unwrap();
        let zone = zones.get_mut(apex)?;

        let answers = zone.get(key).map(<[Record]>::to_vec).unwrap_or_default();
        zone.rotate(key);

        let ns_key = RecordKey::new(apex.clone(), RecordType::NS, DNSClass::IN);
        let name_servers = zone.get(&ns_key).map(<[Record]>::to_vec).unwrap_or_default();

        let mut additionals = Vec::new();
        for ns in &name_servers {
            let Some(RData::NS(target)) = ns.data() else {
                continue;
            };
            let target = LowerName::from(target.0.clone());
            for rtype in [RecordType::A, RecordType::AAAA] {
                let glue_key = RecordKey::new(target.clone(), rtype, DNSClass::IN);
                if let Some(glue) = zone.get(&glue_key) {
                    additionals.extend_from_slice(glue);
                }
            }
        }

        Some(ZoneAnswer {
            answers,
            name_servers,
            additionals,
        })
    }

    /// Number of zones currently installed.
    pub fn len(&self) -> usize {
        self.zones.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.read().unwrap().is_empty()
    }
}

#[cfg(test)]
#[path = "zone_tests.rs"]
mod zone_tests;
