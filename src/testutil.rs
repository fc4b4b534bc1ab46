// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory fakes for the two external seams, used by unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::consul::{KvPair, KvStore, WatchResult};
use crate::errors::Result;
use crate::runtime::{ContainerEvent, ContainerFacts, ContainerRuntime};

/// A [`KvStore`] over a plain map.
///
/// Mutations bump an internal index so blocking list calls behave like
/// Consul's: a call with a stale `wait_index` returns immediately with a
/// short request time, a call that is already up to date reports a request
/// time longer than the wait (the long-poll timeout signal).
#[derive(Debug, Default)]
pub(crate) struct MemoryKv {
    state: Mutex<MemoryKvState>,
}

#[derive(Debug, Default)]
struct MemoryKvState {
    data: BTreeMap<String, Vec<u8>>,
    index: u64,
}

impl MemoryKv {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Seed a key without bumping the index, as if it predated this process.
    pub(crate) fn seed(&self, key: &str, value: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .data
            .insert(key.to_string(), value.to_vec());
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.state.lock().unwrap().data.clone()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.state.lock().unwrap().data.contains_key(key)
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.data.insert(key.to_string(), value.to_vec());
        state.index += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.data.remove(key);
        state.index += 1;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().unwrap().data.get(key).cloned())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .data
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn list(
        &self,
        prefix: &str,
        wait_index: u64,
        wait: Option<Duration>,
    ) -> Result<WatchResult> {
        let wait = wait.unwrap_or(Duration::ZERO);
        let (pairs, index) = {
            let state = self.state.lock().unwrap();
            let pairs = state
                .data
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, value)| KvPair {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect();
            (pairs, state.index)
        };

        if index > wait_index {
            return Ok(WatchResult {
                pairs,
                last_index: index,
                request_time: Duration::ZERO,
            });
        }

        // Nothing new: emulate the server holding the call until timeout.
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(WatchResult {
            pairs,
            last_index: index,
            request_time: wait + Duration::from_millis(1),
        })
    }
}

/// A scripted [`ContainerRuntime`].
#[derive(Debug, Default)]
pub(crate) struct MockRuntime {
    pub(crate) facts: Mutex<HashMap<String, ContainerFacts>>,
    pub(crate) drivers: Mutex<HashMap<String, String>>,
    pub(crate) running: Mutex<Vec<String>>,
    pub(crate) node: String,
}

impl MockRuntime {
    pub(crate) fn new(node: &str) -> Self {
        Self {
            node: node.to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn add_container(&self, facts: ContainerFacts, running: bool) {
        if running {
            self.running.lock().unwrap().push(facts.id.clone());
        }
        self.facts.lock().unwrap().insert(facts.id.clone(), facts);
    }

    pub(crate) fn set_driver(&self, network: &str, driver: &str) {
        self.drivers
            .lock()
            .unwrap()
            .insert(network.to_string(), driver.to_string());
    }
}

fn missing(what: &str) -> crate::errors::Error {
    crate::errors::Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, what.to_string()))
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn inspect(&self, id: &str) -> Result<ContainerFacts> {
        self.facts
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| missing("no such container"))
    }

    async fn running(&self) -> Result<Vec<String>> {
        Ok(self.running.lock().unwrap().clone())
    }

    async fn network_driver(&self, name: &str) -> Result<String> {
        self.drivers
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| missing("no such network"))
    }

    async fn node_id(&self) -> Result<String> {
        Ok(self.node.clone())
    }

    fn events(&self) -> BoxStream<'_, Result<ContainerEvent>> {
        futures::stream::pending().boxed()
    }
}
