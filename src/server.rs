// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The DNS responder.
//!
//! One [`Handler`] serves both transports; `hickory-server` drives it from the
//! UDP socket and the TCP listener alike, and the transport only matters for
//! picking the upstream leg of a recursion.
//!
//! Resolution policy, in order: a question that matches no zone is recursed
//! (SERVFAIL when recursion is disabled); a matched zone answers
//! authoritatively; a matched zone with nothing under the questioned key is
//! recursed when a recursor is configured, otherwise answered as an
//! authoritative no-answer carrying just the authority section.

use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::{Header, Message, MessageType, ResponseCode};
use hickory_proto::rr::{DNSClass, LowerName, RecordType};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Protocol, Request, RequestHandler, ResponseHandler, ResponseInfo};
use tracing::{debug, error, warn};

use crate::errors::Error;
use crate::recursor::Recursor;
use crate::zone::{RecordKey, ZoneAnswer, ZoneStore};

/// How a question gets answered.
#[derive(Debug)]
enum Resolution {
    /// A zone matched; serve these sections with the AA bit set.
    Authoritative(ZoneAnswer),
    /// Hand the question to a recursor.
    Recurse,
    /// Nothing matched and there is nowhere to forward: SERVFAIL.
    Fail,
}

/// Whether `protocol` carries messages as discrete datagrams (UDP/DTLS) as
/// opposed to a reliable, framed stream (TCP/TLS/HTTPS/QUIC/H3).
fn is_datagram(protocol: Protocol) -> bool {
    matches!(protocol, Protocol::Udp | Protocol::Dtls)
}

/// Serves the zone store over DNS, recursing on miss.
#[derive(Clone)]
pub struct Handler {
    zones: Arc<ZoneStore>,
    recursor: Option<Recursor>,
}

impl Handler {
    pub fn new(zones: Arc<ZoneStore>, recursor: Option<Recursor>) -> Self {
        Self { zones, recursor }
    }

    fn recursion_configured(&self) -> bool {
        self.recursor.is_some()
    }

    /// Decide how to answer one question against the zone store.
    fn resolve(&self, name: &LowerName, qtype: RecordType, qclass: DNSClass) -> Resolution {
        let Some(apex) = self.zones.match_zone(name, qtype) else {
            return if self.recursion_configured() {
                Resolution::Recurse
            } else {
                Resolution::Fail
            };
        };

        let key = RecordKey::new(name.clone(), qtype, qclass);
        let Some(answer) = self.zones.answer(&apex, &key) else {
            // The zone vanished between match and read; treat as no zone.
            return if self.recursion_configured() {
                Resolution::Recurse
            } else {
                Resolution::Fail
            };
        };

        if answer.answers.is_empty() && self.recursion_configured() {
            return Resolution::Recurse;
        }

        Resolution::Authoritative(answer)
    }

    async fn reply_authoritative<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        answer: ZoneAnswer,
    ) -> ResponseInfo {
        let mut header = Header::response_from_request(request.header());
        header.set_response_code(ResponseCode::NoError);
        header.set_authoritative(true);
        header.set_recursion_available(self.recursion_configured());

        let response = MessageResponseBuilder::from_message_request(request).build(
            header,
            answer.answers.iter(),
            answer.name_servers.iter(),
            &[],
            answer.additionals.iter(),
        );
        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, "failed to write dns response");
                ResponseInfo::from(*request.header())
            }
        }
    }

    /// Reply with only a response code; used for FORMERR and both SERVFAIL
    /// flavors (`ra` distinguishes "recursion tried and failed" from
    /// "recursion not offered").
    async fn reply_code<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        code: ResponseCode,
        ra: bool,
    ) -> ResponseInfo {
        let mut header = Header::response_from_request(request.header());
        header.set_response_code(code);
        header.set_authoritative(false);
        header.set_recursion_available(ra);

        let response =
            MessageResponseBuilder::from_message_request(request).build(header, &[], &[], &[], &[]);
        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, "failed to write dns response");
                ResponseInfo::from(*request.header())
            }
        }
    }

    async fn recurse<R: ResponseHandler>(
        &self,
        recursor: &Recursor,
        request: &Request,
        mut response_handle: R,
        stream_transport: bool,
    ) -> ResponseInfo {
        // Relay the question as the client asked it: same id, flags, and EDNS
        // negotiation. Dropping the OPT would pin upstreams to the 512-byte
        // floor and force needless truncation retries.
        let mut query = Message::new();
        query.set_id(request.id());
        query.set_message_type(MessageType::Query);
        query.set_op_code(request.header().op_code());
        query.set_recursion_desired(request.header().recursion_desired());
        query.set_checking_disabled(request.header().checking_disabled());
        query.add_query(request.request_info().query.original().clone());
        if let Some(edns) = request.edns() {
            *query.extensions_mut() = Some(edns.clone());
        }

        match recursor.exchange(&query, stream_transport).await {
            Ok(mut upstream) => {
                let mut header = Header::response_from_request(request.header());
                header.set_response_code(upstream.response_code());
                header.set_authoritative(false);
                header.set_recursion_available(true);
                header.set_truncated(upstream.truncated());

                let answers = upstream.take_answers();
                let name_servers = upstream.take_name_servers();
                let additionals = upstream.take_additionals();
                let response = MessageResponseBuilder::from_message_request(request).build(
                    header,
                    answers.iter(),
                    name_servers.iter(),
                    &[],
                    additionals.iter(),
                );
                match response_handle.send_response(response).await {
                    Ok(info) => info,
                    Err(e) => {
                        error!(error = %e, "failed to write dns response");
                        ResponseInfo::from(*request.header())
                    }
                }
            }
            Err(e) => {
                warn!(query = %query.queries().first().map(|q| q.name().to_string()).unwrap_or_default(),
                      error = %e, "recursion failed");
                self.reply_code(request, response_handle, ResponseCode::ServFail, true)
                    .await
            }
        }
    }
}

#[async_trait]
impl RequestHandler for Handler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        // Exactly one question or the message is malformed; checked before
        // request_info(), which requires one.
        let question_count = request.header().query_count() as usize;
        if question_count != 1 {
            warn!(
                error = %Error::QueryMalformed(question_count),
                "rejecting query"
            );
            return self
                .reply_code(
                    request,
                    response_handle,
                    ResponseCode::FormErr,
                    self.recursion_configured(),
                )
                .await;
        }

        let request_info = request.request_info();
        if request_info.header.message_type() == MessageType::Response {
            debug!("dropping unexpected response message");
            return ResponseInfo::from(*request.header());
        }

        let query = request_info.query;
        let name = query.name().clone();
        let qtype = query.query_type();
        let qclass = query.query_class();
        let stream_transport = !is_datagram(request_info.protocol);

        debug!(name = %name, %qtype, "query");

        match self.resolve(&name, qtype, qclass) {
            Resolution::Authoritative(answer) => {
                self.reply_authoritative(request, response_handle, answer)
                    .await
            }
            Resolution::Recurse => match &self.recursor {
                Some(recursor) => {
                    self.recurse(recursor, request, response_handle, stream_transport)
                        .await
                }
                None => {
                    self.reply_code(request, response_handle, ResponseCode::ServFail, false)
                        .await
                }
            },
            Resolution::Fail => {
                self.reply_code(request, response_handle, ResponseCode::ServFail, false)
                    .await
            }
        }
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod server_tests;
