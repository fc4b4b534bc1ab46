// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The container runtime seam.
//!
//! [`ContainerRuntime`] is the narrow interface the reconciler depends on;
//! [`DockerRuntime`] implements it over the Docker engine API via bollard.
//! The reconciler only ever needs four questions answered — what does this
//! container look like, what is running, what kind of network is this, who am
//! I — plus the lifecycle event stream.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::{EventMessage, EventMessageTypeEnum};
use bollard::network::InspectNetworkOptions;
use bollard::system::EventsOptions;
use bollard::Docker;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::warn;

use crate::errors::{Error, Result};

/// Lifecycle transitions the agent reacts to. Anything else the engine emits
/// is dropped at the stream mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Start,
    Unpause,
    Die,
    Pause,
}

impl ContainerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Unpause => "unpause",
            Self::Die => "die",
            Self::Pause => "pause",
        }
    }

    /// Whether this transition adds the container to the cluster view.
    pub fn is_up(self) -> bool {
        matches!(self, Self::Start | Self::Unpause)
    }
}

/// One container lifecycle event.
#[derive(Debug, Clone)]
pub struct ContainerEvent {
    pub id: String,
    pub status: ContainerStatus,
}

/// A container's attachment to one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub network: String,
    pub ip: Ipv4Addr,
}

/// Everything the reconciler publishes about one container.
#[derive(Debug, Clone)]
pub struct ContainerFacts {
    pub id: String,
    pub hostname: String,
    pub networks: Vec<NetworkAttachment>,
}

/// What the agent needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Resolve a container's hostname and network attachments.
    async fn inspect(&self, id: &str) -> Result<ContainerFacts>;

    /// Ids of all currently running containers.
    async fn running(&self) -> Result<Vec<String>>;

    /// The driver backing a network, e.g. `overlay` or `bridge`.
    async fn network_driver(&self, name: &str) -> Result<String>;

    /// Stable identity of this node, `"<advertise>-<hostname>"`.
    async fn node_id(&self) -> Result<String>;

    /// Subscribe to container lifecycle events.
    fn events(&self) -> BoxStream<'_, Result<ContainerEvent>>;
}

/// Shorten a container id the way the engine CLI does.
pub fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}

/// [`ContainerRuntime`] over the local Docker engine.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the environment's defaults (unix socket, or
    /// `DOCKER_HOST` when set).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

/// Map an engine event onto the transitions the agent cares about.
fn map_event(message: EventMessage) -> Option<ContainerEvent> {
    if message.typ != Some(EventMessageTypeEnum::CONTAINER) {
        return None;
    }
    let status = match message.action.as_deref() {
        Some("start") => ContainerStatus::Start,
        Some("unpause") => ContainerStatus::Unpause,
        Some("die") => ContainerStatus::Die,
        Some("pause") => ContainerStatus::Pause,
        _ => return None,
    };
    let id = message.actor.and_then(|actor| actor.id)?;
    Some(ContainerEvent { id, status })
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn inspect(&self, id: &str) -> Result<ContainerFacts> {
        let details = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;

        let hostname = details
            .config
            .as_ref()
            .and_then(|config| config.hostname.clone())
            .filter(|hostname| !hostname.is_empty())
            .unwrap_or_else(|| short_id(id).to_string());

        let mut networks = Vec::new();
        if let Some(attached) = details.network_settings.and_then(|settings| settings.networks) {
            for (network, endpoint) in attached {
                let Some(address) = endpoint.ip_address.filter(|ip| !ip.is_empty()) else {
                    continue;
                };
                match address.parse::<Ipv4Addr>() {
                    Ok(ip) => networks.push(NetworkAttachment { network, ip }),
                    Err(_) => warn!(
                        container = short_id(id),
                        network = %network,
                        address = %address,
                        "skipping unparseable container address"
                    ),
                }
            }
        }

        Ok(ContainerFacts {
            id: details.id.unwrap_or_else(|| id.to_string()),
            hostname,
            networks,
        })
    }

    async fn running(&self) -> Result<Vec<String>> {
        let containers = self
            .docker
            .list_containers(None::<ListContainersOptions<String>>)
            .await?;
        Ok(containers
            .into_iter()
            .filter_map(|summary| summary.id)
            .collect())
    }

    async fn network_driver(&self, name: &str) -> Result<String> {
        let network = self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await?;
        Ok(network.driver.unwrap_or_default())
    }

    async fn node_id(&self) -> Result<String> {
        let info = self.docker.info().await?;
        let hostname = info.name.unwrap_or_else(|| "unknown".to_string());
        let advertise = info
            .swarm
            .and_then(|swarm| swarm.node_addr)
            .filter(|addr| !addr.is_empty())
            .unwrap_or_else(|| "local".to_string());
        Ok(format!("{advertise}-{hostname}"))
    }

    fn events(&self) -> BoxStream<'_, Result<ContainerEvent>> {
        let options = EventsOptions::<String> {
            filters: HashMap::from([("type".to_string(), vec!["container".to_string()])]),
            ..Default::default()
        };
        self.docker
            .events(Some(options))
            .filter_map(|event| async move {
                match event {
                    Ok(message) => map_event(message).map(Ok),
                    Err(e) => Some(Err(Error::Runtime(e))),
                }
            })
            .boxed()
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod runtime_tests;
