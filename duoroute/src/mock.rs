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

//! This module is NOT intended to be used by regular users. It is used for
//! mocking an upstream resolver in tests only.

use crate::wire;
use duomatcher::hosts::QueryType;
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;

/// A UDP upstream that answers every A query with a fixed set of
/// addresses, and ignores anything else it can't parse a question out of.
pub struct MockUpstream {
    socket: UdpSocket,
    addresses: Vec<IpAddr>,
}

impl MockUpstream {
    pub async fn bind(addr: SocketAddr, addresses: Vec<IpAddr>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket, addresses })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve forever: read one request, answer it, repeat.
    pub async fn run(self) -> std::io::Result<()> {
        let mut buf = vec![0u8; 65535];
        loop {
            let (n, peer) = self.socket.recv_from(&mut buf).await?;
            let request = &buf[..n];
            if let Ok(parsed) = wire::parse_request(request) {
                if parsed.qtype == QueryType::A {
                    let answer = wire::assemble_answer(request, QueryType::A, &self.addresses);
                    self.socket.send_to(&answer, peer).await?;
                }
            }
        }
    }
}
