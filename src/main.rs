// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hickory_server::ServerFuture;
use tokio::net::{TcpListener, UdpSocket};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info};

use sensedns::config::Cli;
use sensedns::constants::TCP_IDLE_TIMEOUT;
use sensedns::consul::ConsulKv;
use sensedns::reconciler::{Agent, AgentConfig};
use sensedns::recursor::Recursor;
use sensedns::runtime::{ContainerRuntime, DockerRuntime};
use sensedns::server::Handler;
use sensedns::zone::ZoneStore;

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("sensedns-agent")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

/// Initialize logging with custom format
///
/// The verbosity comes from the `-l`/`LOG_LEVEL` flag as an `EnvFilter`
/// directive. `RUST_LOG_FORMAT` selects the output format (json or text).
fn initialize_logging(level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_new(level)
        .with_context(|| format!("invalid log level '{level}'"))?;

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!("starting sensedns agent");
    Ok(())
}

async fn async_main() -> Result<()> {
    let cli = Cli::parse();
    initialize_logging(&cli.log_level)?;

    // Everything in this block is fatal: a misconfigured or unreachable
    // collaborator means the node cannot do its job at all.
    let recursor =
        Recursor::from_flags(&cli.recursors).context("invalid recursor configuration")?;
    match &recursor {
        Some(recursor) => debug!(endpoints = ?recursor.endpoints(), "recursion enabled"),
        None => info!("recursion disabled"),
    }

    let consul = Arc::new(ConsulKv::new(&cli.consul_url)?);
    let leader = consul
        .status_leader()
        .await
        .with_context(|| format!("cannot reach consul at {}", cli.consul_url))?;
    debug!(leader = %leader, "consul reachable");

    let docker = DockerRuntime::connect().context("cannot connect to container runtime")?;
    let node_id = docker
        .node_id()
        .await
        .context("cannot identify node through container runtime")?;
    info!(node_id = %node_id, "container runtime connected");

    let zones = Arc::new(ZoneStore::new());
    let agent = Arc::new(Agent::new(
        AgentConfig {
            node_id,
            network_tld: cli.network_tld.clone(),
            consul_wait: cli.consul_timeout,
        },
        consul,
        Arc::new(docker),
        Arc::clone(&zones),
    ));

    agent.boot().await.context("boot reconcile failed")?;

    let handler = Handler::new(zones, recursor);
    let mut server = ServerFuture::new(handler);

    let listen = cli.listen_addr();
    let udp = UdpSocket::bind(listen)
        .await
        .with_context(|| format!("cannot bind udp listener on {listen}"))?;
    server.register_socket(udp);
    info!(%listen, "udp listener started");

    let tcp = TcpListener::bind(listen)
        .await
        .with_context(|| format!("cannot bind tcp listener on {listen}"))?;
    server.register_listener(tcp, TCP_IDLE_TIMEOUT);
    info!(%listen, "tcp listener started");

    let mut sigterm = signal(SignalKind::terminate())?;
    let events = Arc::clone(&agent);

    let interrupted = tokio::select! {
        result = server.block_until_done() => {
            result.context("dns server terminated")?;
            false
        }
        () = events.run_events() => false,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, stopping");
            true
        }
        _ = sigterm.recv() => {
            info!("terminate received, stopping");
            true
        }
    };

    if interrupted {
        if let Err(e) = server.shutdown_gracefully().await {
            debug!(error = %e, "listener shutdown");
        }
    }

    Ok(())
}
