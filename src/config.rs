// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command-line and environment configuration.
//!
//! Every flag has an environment fallback so the agent drops into a container
//! entrypoint without a wrapper script. Validation happens up front: a flag
//! that fails to parse aborts startup before any socket is opened.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;

use crate::constants::{
    DEFAULT_CONSUL_TIMEOUT, DEFAULT_CONSUL_URL, DEFAULT_LISTEN_ADDRESS, DEFAULT_NETWORK_TLD,
    DEFAULT_RECURSOR,
};

/// Cluster-wide container DNS served out of Consul.
#[derive(Parser, Debug, Clone)]
#[command(name = "sensedns", version, about)]
pub struct Cli {
    /// Consul endpoint, as host:port or a full URL
    #[arg(
        short = 'c',
        long = "consul",
        env = "CONSUL_URL",
        default_value = DEFAULT_CONSUL_URL
    )]
    pub consul_url: String,

    /// Long-poll wait time for KV watches (Go-style: 30s, 5m, 1h)
    #[arg(
        short = 't',
        long = "consul-timeout",
        env = "CONSUL_TIMEOUT",
        default_value = DEFAULT_CONSUL_TIMEOUT,
        value_parser = parse_duration
    )]
    pub consul_timeout: Duration,

    /// Bind host for the DNS listeners
    #[arg(
        short = 'a',
        long = "listen-address",
        env = "DNS_LISTEN_ADDRESS",
        default_value = DEFAULT_LISTEN_ADDRESS
    )]
    pub listen_address: IpAddr,

    /// Bind port for the DNS listeners
    #[arg(
        short = 'p',
        long = "listen-port",
        env = "DNS_LISTEN_PORT",
        default_value_t = 53
    )]
    pub listen_port: u16,

    /// Upstream recursor(s), host[:port]; tried in order. Pass `none` to
    /// disable recursion entirely.
    #[arg(
        short = 'r',
        long = "recursor",
        env = "REDIRECT_DNS",
        default_value = DEFAULT_RECURSOR,
        value_delimiter = ','
    )]
    pub recursors: Vec<String>,

    /// Domain suffix appended after the network name to form zone apexes
    #[arg(
        short = 'n',
        long = "network-tld",
        env = "NETWORK_TLD",
        default_value = DEFAULT_NETWORK_TLD
    )]
    pub network_tld: String,

    /// Log verbosity (an `EnvFilter` directive: error, warn, info, debug, trace)
    #[arg(
        short = 'l',
        long = "log-level",
        env = "LOG_LEVEL",
        default_value = "info"
    )]
    pub log_level: String,
}

impl Cli {
    /// Socket address both DNS listeners bind to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.listen_port)
    }
}

/// Parse a Go-style duration string (`30s`, `5m`, `1h`).
///
/// Single value and unit; zero is rejected because a zero wait turns the KV
/// long-poll into a busy loop.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    if value.is_empty() {
        return Err("duration cannot be empty".to_string());
    }

    let split_pos = value
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{value}' must end with a unit (s, m, or h)"))?;

    let (digits, unit) = value.split_at(split_pos);
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("duration '{value}' must start with an integer"))?;

    let seconds = match unit {
        "s" => Some(amount),
        "m" => amount.checked_mul(60),
        "h" => amount.checked_mul(3600),
        _ => {
            return Err(format!(
                "unsupported duration unit '{unit}' in '{value}': use 's', 'm', or 'h'"
            ))
        }
    }
    .ok_or_else(|| format!("duration '{value}' overflows"))?;

    if seconds == 0 {
        return Err(format!("duration '{value}' must be positive"));
    }

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
