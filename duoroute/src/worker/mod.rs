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

//! Per-upstream workers (`CrWorker` and its UDP/TCP subclasses in the
//! original). Each worker owns one transport connection to exactly one
//! [`DnsServer`] and runs as its own `spawn_local` task driven by an
//! unbounded outbound queue; results are reported back to whoever created
//! it (the session manager, via [`Sender`](crate::sender::Sender)) over a
//! shared event channel.

mod tcp;
mod udp;

use bytes::Bytes;
use duomatcher::{DnsServer, Transport};
use tokio::sync::mpsc;

use crate::packet::Packet;

/// One queued outbound query: already has its id rewritten to the
/// session's pipelined id.
pub(crate) struct Outbound {
    pub id: u16,
    pub payload: Bytes,
}

/// Reported back to the manager for every send attempt and every inbound
/// reply, same two callbacks as `CrWorker::send_cb_`/`recv_cb_`.
pub enum WorkerEvent {
    SendResult { id: u16, server: DnsServer, ok: bool },
    Recv(Packet),
}

/// A handle to a spawned worker: just its outbound queue. Dropping it stops
/// the worker's task (the queue closes and the task's recv loop ends).
pub struct WorkerHandle {
    pub server: DnsServer,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl WorkerHandle {
    /// Queue `payload` (with `id` as its pipelined id) for delivery. Never
    /// blocks; failures show up asynchronously as a `SendResult{ok: false}`
    /// event.
    pub fn send(&self, id: u16, payload: Bytes) {
        let _ = self.outbound.send(Outbound { id, payload });
    }
}

/// Spawn the worker matching `server`'s transport onto the current
/// `LocalSet`.
pub fn spawn(server: DnsServer, events: mpsc::UnboundedSender<WorkerEvent>) -> WorkerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = WorkerHandle {
        server: server.clone(),
        outbound: tx,
    };
    match server.transport {
        Transport::Udp => {
            tokio::task::spawn_local(udp::run(server, rx, events));
        }
        Transport::Tcp => {
            tokio::task::spawn_local(tcp::run(server, rx, events));
        }
    }
    handle
}
