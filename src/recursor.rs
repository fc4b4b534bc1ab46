// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Upstream recursion.
//!
//! Names the zone store cannot answer are forwarded to the configured
//! recursors, strictly in configuration order, first success wins. The query
//! travels verbatim: the exact message the client sent is re-encoded and
//! relayed, and the upstream's answer is handed back untouched. A truncated
//! UDP answer triggers a retry over TCP against the same recursor before the
//! next endpoint is considered.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use hickory_proto::op::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::constants::{DNS_EXCHANGE_TIMEOUT, DNS_PORT};
use crate::errors::{Error, Result};

/// Receive buffer for upstream UDP answers, sized for the largest message an
/// EDNS-negotiated upstream may send. Recv would silently cut a datagram that
/// outgrows the buffer, corrupting the reply instead of truncating it.
const UDP_RECV_BUFFER: usize = 65_535;

/// Client side of the recursion fallback.
#[derive(Debug, Clone)]
pub struct Recursor {
    endpoints: Vec<SocketAddr>,
    timeout: Duration,
}

impl Recursor {
    pub fn new(endpoints: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self { endpoints, timeout }
    }

    /// Build from the `-r` flag values.
    ///
    /// Endpoints missing a port default to 53; every endpoint must validate or
    /// configuration aborts. `none` (or an empty value) disables recursion,
    /// yielding `Ok(None)`.
    pub fn from_flags(specs: &[String]) -> Result<Option<Self>> {
        let mut endpoints = Vec::new();
        for spec in specs {
            let spec = spec.trim();
            if spec.is_empty() || spec.eq_ignore_ascii_case("none") {
                continue;
            }
            endpoints.push(parse_endpoint(spec)?);
        }
        if endpoints.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::new(endpoints, DNS_EXCHANGE_TIMEOUT)))
    }

    pub fn endpoints(&self) -> &[SocketAddr] {
        &self.endpoints
    }

    /// Forward `query` and return the first successful upstream response.
    ///
    /// `stream_transport` selects TCP outright (the inbound query arrived over
    /// TCP); otherwise UDP is tried first with the truncation retry.
    pub async fn exchange(&self, query: &Message, stream_transport: bool) -> Result<Message> {
        let payload = query.to_vec()?;

        for endpoint in &self.endpoints {
            let outcome = if stream_transport {
                self.exchange_tcp(*endpoint, &payload).await
            } else {
                match self.exchange_udp(*endpoint, &payload, query.id()).await {
                    Ok(response) if response.truncated() => {
                        debug!(recursor = %endpoint, "truncated answer, retrying over tcp");
                        self.exchange_tcp(*endpoint, &payload).await
                    }
                    other => other,
                }
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(e) => warn!(recursor = %endpoint, error = %e, "recursor exchange failed"),
            }
        }

        Err(Error::RecursionFailed)
    }

    async fn exchange_udp(
        &self,
        endpoint: SocketAddr,
        payload: &[u8],
        id: u16,
    ) -> Result<Message> {
        let bind: SocketAddr = if endpoint.is_ipv4() {
            (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).into()
        } else {
            (IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(endpoint).await?;
        socket.send(payload).await?;

        let receive = async {
            let mut buffer = vec![0u8; UDP_RECV_BUFFER];
            loop {
                let len = socket.recv(&mut buffer).await?;
                let response = Message::from_vec(&buffer[..len])?;
                // A stray datagram with a foreign id is not our answer.
                if response.id() == id {
                    return Ok::<Message, Error>(response);
                }
            }
        };
        timeout(self.timeout, receive)
            .await
            .map_err(|_| timeout_error())?
    }

    async fn exchange_tcp(&self, endpoint: SocketAddr, payload: &[u8]) -> Result<Message> {
        let length = u16::try_from(payload.len())
            .map_err(|_| Error::Config(format!("query of {} bytes exceeds tcp framing", payload.len())))?;

        let exchange = async {
            let mut stream = TcpStream::connect(endpoint).await?;
            stream.write_all(&length.to_be_bytes()).await?;
            stream.write_all(payload).await?;
            stream.flush().await?;

            let mut length_bytes = [0u8; 2];
            stream.read_exact(&mut length_bytes).await?;
            let mut body = vec![0u8; u16::from_be_bytes(length_bytes) as usize];
            stream.read_exact(&mut body).await?;
            Ok::<Message, Error>(Message::from_vec(&body)?)
        };
        timeout(self.timeout, exchange)
            .await
            .map_err(|_| timeout_error())?
    }
}

fn timeout_error() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::TimedOut,
        "dns exchange timed out",
    ))
}

/// Validate one recursor endpoint, defaulting the port to 53.
fn parse_endpoint(spec: &str) -> Result<SocketAddr> {
    if let Ok(addr) = spec.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = spec.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DNS_PORT));
    }

    // Hostname forms resolve once, at startup.
    let with_port = if spec.rfind(':').is_some_and(|i| i > spec.rfind(']').unwrap_or(0)) {
        spec.to_string()
    } else {
        format!("{spec}:{DNS_PORT}")
    };
    with_port
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| Error::Config(format!("invalid recursor address '{spec}'")))
}

#[cfg(test)]
#[path = "recursor_tests.rs"]
mod recursor_tests;
