// Copyright 2020 LEXUGE
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! A single in-flight query and the state machine that decides when it has
//! a "good enough" answer. Mirrors `CrSession`.

use bytes::{Bytes, BytesMut};
use duomatcher::hosts::{HostsRule, QueryType};
use std::net::SocketAddr;
use std::rc::Rc;

use crate::wire::{self, Answer, ParsedResponse};

/// Lifecycle state of a session. Destroyed exactly once: when `status`
/// reaches `Resolved`, when `outstanding_replies` hits zero, or when its
/// timer fires — whichever happens first (enforced by the session manager,
/// not this type).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    BadRequest,
    Init,
    WaitHealth,
    WaitFast,
    Resolved,
    Dedicated,
}

pub struct Session {
    pub status: Status,
    pub raw_id: u16,
    pub pipelined_id: u16,
    pub query_type: Option<QueryType>,
    pub query_name: String,
    pub outstanding_replies: u32,
    pub request_payload: Bytes,
    pub candidate_response: Option<Bytes>,
    pub matched_rule: Option<Rc<HostsRule>>,
    pub peer: SocketAddr,
}

impl Session {
    /// Build a session from a client datagram. `pipelined_id` is already
    /// allocated by the manager; the id field of `payload` is rewritten to
    /// it in place. Looks up the hosts engine with `(qname, qtype)` and
    /// starts `Dedicated` on a hit, `Init` otherwise, `BadRequest` if the
    /// packet doesn't parse or carries no interesting question.
    pub fn new(
        mut payload: BytesMut,
        peer: SocketAddr,
        pipelined_id: u16,
        hosts: &duomatcher::HostsIndex,
    ) -> Self {
        let parsed = match wire::parse_request(&payload) {
            Ok(p) => p,
            Err(_) => {
                return Self {
                    status: Status::BadRequest,
                    raw_id: 0,
                    pipelined_id,
                    query_type: None,
                    query_name: String::new(),
                    outstanding_replies: 0,
                    request_payload: payload.freeze(),
                    candidate_response: None,
                    matched_rule: None,
                    peer,
                };
            }
        };

        wire::write_id(&mut payload, pipelined_id);

        let matched_rule = hosts.lookup(&parsed.qname, parsed.qtype);
        let status = if matched_rule.is_some() { Status::Dedicated } else { Status::Init };

        Self {
            status,
            raw_id: parsed.raw_id,
            pipelined_id,
            query_type: Some(parsed.qtype),
            query_name: parsed.qname,
            outstanding_replies: 0,
            request_payload: payload.freeze(),
            candidate_response: None,
            matched_rule,
            peer,
        }
    }

    /// Apply one upstream reply. Returns `true` if the caller should finalise
    /// the session right away (either it just became `Resolved`, or this was
    /// the last outstanding reply).
    pub fn on_reply(&mut self, response: ParsedResponse, from_healthy: bool, trusted_net: &duomatcher::TrustedNet, payload: Bytes) -> bool {
        self.outstanding_replies = self.outstanding_replies.saturating_sub(1);

        if response.answers.is_empty() {
            self.candidate_response = Some(payload);
        } else {
            for answer in response.answers {
                match answer {
                    Answer::A(addr) => {
                        let in_trusted_net = trusted_net.contains(addr);
                        self.transit(in_trusted_net, from_healthy, payload.clone());
                    }
                    Answer::Other => {
                        if matches!(self.status, Status::Init | Status::WaitHealth) {
                            self.candidate_response = Some(payload.clone());
                        }
                    }
                }
            }
        }

        self.outstanding_replies == 0 || self.status == Status::Resolved
    }

    /// The session state transition table (`CrSession::Transit`).
    fn transit(&mut self, in_trusted_net: bool, from_healthy: bool, response: Bytes) {
        match self.status {
            Status::Init => {
                self.status = if !from_healthy && in_trusted_net {
                    Status::Resolved
                } else if !from_healthy && !in_trusted_net {
                    Status::WaitHealth
                } else {
                    Status::WaitFast
                };
                self.candidate_response = Some(response);
            }
            Status::WaitHealth => {
                if from_healthy || in_trusted_net {
                    self.candidate_response = Some(response);
                    self.status = Status::Resolved;
                }
            }
            Status::WaitFast => {
                if from_healthy && in_trusted_net {
                    self.candidate_response = Some(response);
                } else if !from_healthy && in_trusted_net {
                    self.candidate_response = Some(response);
                    self.status = Status::Resolved;
                }
            }
            Status::Dedicated => {
                self.candidate_response = Some(response);
                self.status = Status::Resolved;
            }
            Status::BadRequest | Status::Resolved => {}
        }
    }
}
