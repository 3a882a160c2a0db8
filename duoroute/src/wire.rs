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

//! Wire-level helpers: reading/rewriting the 16-bit DNS id in place, parsing
//! just enough of a request/response to drive the session state machine, and
//! assembling the hosts engine's synthetic answers.
//!
//! Parsing goes through the `domain` crate (the same one the request/reply
//! path elsewhere in the workspace uses); the synthetic-answer write path is
//! hand-assembled bytes, same as `CrappyHosts::AssemblePacket` in the
//! original — there is no builder API simple enough to beat a fixed 12-byte
//! header plus one "question back-reference" RR per address.

use crate::error::{Result, RouteError};
use bytes::{BufMut, Bytes, BytesMut};
use domain::base::iana::Rtype;
use domain::base::Message;
use domain::rdata::AllRecordData;
use duomatcher::hosts::QueryType;
use std::net::{IpAddr, Ipv4Addr};

/// Read the 16-bit DNS id (first two bytes, big-endian) out of a raw packet.
pub fn read_id(payload: &[u8]) -> Option<u16> {
    if payload.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([payload[0], payload[1]]))
}

/// Overwrite the 16-bit DNS id in place.
pub fn write_id(payload: &mut [u8], id: u16) {
    payload[0..2].copy_from_slice(&id.to_be_bytes());
}

/// The parts of an inbound client request the session state machine needs.
pub struct ParsedRequest {
    pub raw_id: u16,
    pub qname: String,
    pub qtype: QueryType,
}

/// Parse a client request far enough to extract its id and (qname, qtype).
/// Mirrors `ns_initparse` + the question-record check in `CrSession`'s
/// constructor: only a packet with no question section at all, or one the
/// parser rejects outright, is refused — any qtype is accepted.
pub fn parse_request(payload: &[u8]) -> Result<ParsedRequest> {
    let msg = Message::from_octets(payload).map_err(|e| RouteError::ParseError(e.to_string()))?;
    let raw_id = msg.header().id();

    let question = msg
        .first_question()
        .ok_or_else(|| RouteError::ParseError("no question section".into()))?;

    // Only A/AAAA participate in trusted-net matching; every other qtype
    // (MX, TXT, ...) still gets a session, it just passes straight through
    // on whichever upstream answers first.
    let qtype = match question.qtype() {
        Rtype::A => QueryType::A,
        Rtype::Aaaa => QueryType::Aaaa,
        _ => QueryType::Other,
    };

    Ok(ParsedRequest {
        raw_id,
        qname: question.qname().to_string(),
        qtype,
    })
}

/// One answer RR relevant to the session state machine: an A-record address
/// (checked against the trusted net), or anything else (CNAME, AAAA, ...)
/// which is only ever treated as a fallback candidate response.
pub enum Answer {
    A(Ipv4Addr),
    Other,
}

/// The parts of an upstream reply the session state machine needs: its id
/// (for demultiplexing) and its answer records.
pub struct ParsedResponse {
    pub id: u16,
    pub answers: Vec<Answer>,
}

/// Parse an upstream reply. Returns `Ok` with zero answers for a
/// zero-ANCOUNT message (handled by the caller, see
/// `CrSession::Resolve`'s `rrmax == 0` branch).
pub fn parse_response(payload: &[u8]) -> Result<ParsedResponse> {
    let msg = Message::from_octets(payload).map_err(|e| RouteError::ParseError(e.to_string()))?;
    let id = msg.header().id();

    let mut answers = Vec::new();
    let section = msg.answer().map_err(|e| RouteError::ParseError(e.to_string()))?;
    for item in section {
        let item = match item {
            Ok(item) => item,
            Err(_) => continue,
        };
        let rtype = item.rtype();
        if rtype == Rtype::A {
            if let Ok(Some(record)) = item.into_record::<AllRecordData<_, _>>() {
                if let AllRecordData::A(a) = record.data() {
                    answers.push(Answer::A(a.addr()));
                    continue;
                }
            }
            answers.push(Answer::Other);
        } else {
            answers.push(Answer::Other);
        }
    }

    Ok(ParsedResponse { id, answers })
}

/// Assemble a synthetic response: copy `request`'s id and question section,
/// set `flags = 0x8180`, `QDCOUNT=1`, `ANCOUNT=addresses.len()`,
/// `NSCOUNT=ARCOUNT=0`, then one answer RR per address with a name pointer
/// back to the question, TTL 7200, and RDATA = the raw address bytes.
///
/// `qtype` determines TYPE/RDLENGTH for every emitted RR; the caller is
/// expected to pass only the address family matching it (IPv4 list for `A`,
/// IPv6 for `Aaaa` — the hosts engine never mixes families in one answer).
pub fn assemble_answer(request: &[u8], qtype: QueryType, addresses: &[IpAddr]) -> Bytes {
    let question_end = question_section_end(request);

    let mut out = BytesMut::with_capacity(12 + (question_end - 12) + addresses.len() * 16);
    out.put_slice(&request[0..2]); // id
    out.put_slice(&[0x81, 0x80]); // flags
    out.put_u16(1); // QDCOUNT
    out.put_u16(addresses.len() as u16); // ANCOUNT
    out.put_u16(0); // NSCOUNT
    out.put_u16(0); // ARCOUNT
    out.put_slice(&request[12..question_end]); // QNAME/QTYPE/QCLASS

    let rtype: u16 = match qtype {
        QueryType::A => Rtype::A.into(),
        QueryType::Aaaa => Rtype::Aaaa.into(),
        QueryType::Other => unreachable!("the hosts engine only assembles synthetic answers for A/AAAA questions"),
    };

    for addr in addresses {
        out.put_slice(&[0xC0, 0x0C]); // name pointer to the question
        out.put_u16(rtype);
        out.put_u16(1); // CLASS IN
        out.put_u32(7200); // TTL
        match addr {
            IpAddr::V4(v4) => {
                out.put_u16(4);
                out.put_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                out.put_u16(16);
                out.put_slice(&v6.octets());
            }
        }
    }

    out.freeze()
}

/// Byte offset one past QCLASS: scan the QNAME's label sequence for its
/// zero terminator, same as `std::find(..., 0x00)` in the original, then
/// skip the 4 bytes of QTYPE/QCLASS.
fn question_section_end(request: &[u8]) -> usize {
    let mut i = 12;
    while i < request.len() && request[i] != 0 {
        i += 1;
    }
    (i + 1 + 4).min(request.len())
}
