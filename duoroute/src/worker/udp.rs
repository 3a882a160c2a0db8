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

//! UDP worker, mirrors `UDPWorker` in `worker/udp_worker.cc`.
//!
//! The original binds an unconnected socket and compares the sender address
//! of every inbound datagram against the remote it thinks it's talking to
//! (`cmp_sockaddr`), because libuv's UDP handle can receive from anyone.
//! `tokio::net::UdpSocket::connect` does that filtering for us at the
//! kernel level — a connected UDP socket only ever yields datagrams from
//! its connected peer — so there is no analogous comparison here.
//!
//! `UDP_PARTIAL` (a datagram larger than the supplied buffer) is avoided
//! rather than detected: the receive buffer is sized to the maximum
//! possible UDP payload, so no inbound DNS datagram can ever be truncated.

use bytes::BytesMut;
use duomatcher::DnsServer;
use std::rc::Rc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::{Outbound, WorkerEvent};
use crate::packet::Packet;

const MAX_DATAGRAM: usize = 65535;

pub(super) async fn run(
    server: DnsServer,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let mut socket: Option<Rc<UdpSocket>> = None;

    loop {
        let sock = match &socket {
            Some(s) => s.clone(),
            None => match connect(&server).await {
                Some(s) => {
                    socket = Some(s.clone());
                    s
                }
                None => {
                    // Couldn't (re)bind/connect at all; drain one queued send as
                    // a failure and keep trying rather than busy-loop.
                    if let Some(req) = outbound.recv().await {
                        let _ = events.send(WorkerEvent::SendResult {
                            id: req.id,
                            server: server.clone(),
                            ok: false,
                        });
                    }
                    continue;
                }
            },
        };

        let mut buf = BytesMut::with_capacity(MAX_DATAGRAM);
        buf.resize(MAX_DATAGRAM, 0);

        tokio::select! {
            req = outbound.recv() => {
                let Some(req) = req else { return };
                let ok = sock.send(&req.payload).await.is_ok();
                if !ok {
                    socket = None;
                }
                let _ = events.send(WorkerEvent::SendResult { id: req.id, server: server.clone(), ok });
            }
            recv = sock.recv(&mut buf) => {
                match recv {
                    Ok(n) => {
                        buf.truncate(n);
                        let _ = events.send(WorkerEvent::Recv(Packet::from_worker(buf.freeze(), server.clone())));
                    }
                    Err(_) => {
                        socket = None;
                    }
                }
            }
        }
    }
}

async fn connect(server: &DnsServer) -> Option<Rc<UdpSocket>> {
    let bind_addr: std::net::SocketAddr = if server.addr.is_ipv4() {
        ([0u8; 4], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let sock = UdpSocket::bind(bind_addr).await.ok()?;
    sock.connect(server.addr).await.ok()?;
    Some(Rc::new(sock))
}
