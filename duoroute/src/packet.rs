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

//! `Packet` is the unit passed between the listening socket, the sender, the
//! workers, and the session manager (`CrPacket` in the original).

use bytes::Bytes;
use duomatcher::DnsServer;
use std::net::SocketAddr;

/// A DNS message in flight, tagged with where it came from (a worker's
/// upstream) and/or where it should be replied to (a client address).
#[derive(Debug, Clone)]
pub struct Packet {
    pub payload: Bytes,
    /// The upstream that produced this packet. `None` for a client-originated
    /// request or a synthetic hosts-engine answer.
    pub source: Option<DnsServer>,
    /// The client address to reply to. Only set on the inbound client
    /// datagram; worker replies carry `None` and are matched back to a
    /// session purely by pipelined id.
    pub peer: Option<SocketAddr>,
}

impl Packet {
    pub fn from_client(payload: Bytes, peer: SocketAddr) -> Self {
        Self {
            payload,
            source: None,
            peer: Some(peer),
        }
    }

    pub fn from_worker(payload: Bytes, source: DnsServer) -> Self {
        Self {
            payload,
            source: Some(source),
            peer: None,
        }
    }
}
