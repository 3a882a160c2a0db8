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

//! The session pool and the event loop that drives it. Mirrors
//! `CrSessionManager`: one `HashMap<u16, Session>` keyed by a pipelined id
//! that is generated, not copied, from the client's original query id (so
//! two clients can reuse the same 16-bit id without colliding upstream).

use bytes::{Bytes, BytesMut};
use duomatcher::{DnsServer, HostsIndex, TrustedNet};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::packet::Packet;
use crate::sender::Sender;
use crate::session::{Session, Status};
use crate::wire;
use crate::worker::WorkerEvent;

/// Number of riffle-shuffle rounds applied to a 16-bit counter, one per bit
/// but the last (`GenShuffleSequence`'s `kShuffleTimes`).
const SHUFFLE_ROUNDS: usize = 15;

/// Deterministically unpredictable (seeded once at startup) permutation of
/// the query-id space, ported from `GenShuffleSequence`/`GenPipelinedID`.
/// The original drives both the per-query counter step and the shuffle
/// indices off `std::minstd_rand`; `StdRng` plays the same role here — any
/// CSPRNG works, since all that's required is an unpredictable bijection on
/// `u16`, not bit-for-bit compatibility with a specific C++ standard
/// library's engine.
struct PipelinedIdGenerator {
    counter: u16,
    rng: StdRng,
    shuffle_seq: [u8; SHUFFLE_ROUNDS],
}

impl PipelinedIdGenerator {
    fn new() -> Self {
        let mut rng = StdRng::from_entropy();
        let counter = rng.gen();
        let mut shuffle_seq = [0u8; SHUFFLE_ROUNDS];
        for (i, slot) in shuffle_seq.iter_mut().enumerate() {
            *slot = rng.gen_range(i as u8..=(SHUFFLE_ROUNDS as u8));
        }
        Self { counter, rng, shuffle_seq }
    }

    fn next(&mut self) -> u16 {
        self.counter = self.counter.wrapping_add(self.rng.gen_range(0..97) + 1);
        let mut counter = self.counter;

        for (i, &j) in self.shuffle_seq.iter().enumerate() {
            let i = i as u16;
            let j = j as u16;
            let mask = ((counter >> i) & 1) ^ ((counter >> j) & 1);
            counter ^= (mask << i) | (mask << j);
        }

        counter
    }
}

/// How long a session waits for upstream replies before it is force-
/// resolved with whatever candidate it has (or dropped silently if it has
/// none), matching `CrConfig::timeout_in_ms`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

pub enum ManagerEvent {
    Worker(WorkerEvent),
    Client(Packet),
    TimedOut(u16),
}

/// A handle the listening socket's recv loop holds onto to push client
/// datagrams at the manager without needing a reference to it.
#[derive(Clone)]
pub struct ClientFeed(mpsc::UnboundedSender<ManagerEvent>);

impl ClientFeed {
    pub fn submit(&self, payload: Bytes, peer: SocketAddr) {
        let _ = self.0.send(ManagerEvent::Client(Packet::from_client(payload, peer)));
    }
}

/// Ties the session pool, the hosts/trusted-net tables, and the sender
/// together and drives the single-threaded event loop. Must run inside a
/// `LocalSet` (sessions and their timers are `!Send`).
pub struct SessionManager {
    pool: Rc<RefCell<HashMap<u16, Session>>>,
    id_gen: PipelinedIdGenerator,
    hosts: HostsIndex,
    trusted_net: TrustedNet,
    sender: Sender,
    timeout: Duration,
    events_tx: mpsc::UnboundedSender<ManagerEvent>,
    events_rx: mpsc::UnboundedReceiver<ManagerEvent>,
}

impl SessionManager {
    pub fn new(upstreams: &[DnsServer], hosts: HostsIndex, trusted_net: TrustedNet, timeout: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (worker_tx, mut worker_rx) = mpsc::unbounded_channel();

        let forward_tx = events_tx.clone();
        tokio::task::spawn_local(async move {
            while let Some(event) = worker_rx.recv().await {
                if forward_tx.send(ManagerEvent::Worker(event)).is_err() {
                    return;
                }
            }
        });

        Self {
            pool: Rc::new(RefCell::new(HashMap::new())),
            id_gen: PipelinedIdGenerator::new(),
            hosts,
            trusted_net,
            sender: Sender::new(upstreams, worker_tx),
            timeout,
            events_tx,
            events_rx,
        }
    }

    /// Feed in a client-originated datagram. Spawned as its own task so the
    /// listening socket's recv loop is never blocked by session bookkeeping.
    pub fn submit_client_packet(&self, payload: Bytes, peer: SocketAddr) {
        let _ = self.events_tx.send(ManagerEvent::Client(Packet::from_client(payload, peer)));
    }

    /// A cheaply-cloneable feed for the listening socket's recv loop to push
    /// client datagrams into, obtained before `run` takes ownership of
    /// `self`.
    pub fn client_feed(&self) -> ClientFeed {
        ClientFeed(self.events_tx.clone())
    }

    /// Drain `events_rx` forever, dispatching each to its handler. The
    /// caller owns replies: pass a sink that writes resolved sessions' final
    /// payload back out to the listening socket.
    pub async fn run(mut self, mut reply: impl FnMut(Bytes, SocketAddr)) {
        while let Some(event) = self.events_rx.recv().await {
            match event {
                ManagerEvent::Client(packet) => self.on_client_packet(packet),
                ManagerEvent::Worker(WorkerEvent::Recv(packet)) => self.on_remote_recv(packet),
                ManagerEvent::Worker(WorkerEvent::SendResult { id, server: _, ok }) => {
                    if !ok {
                        self.on_send_failed(id);
                    }
                }
                ManagerEvent::TimedOut(id) => self.resolve(id, &mut reply),
            }

            self.resolve_ready(&mut reply);
        }
    }

    fn on_client_packet(&mut self, packet: Packet) {
        let Some(peer) = packet.peer else { return };
        let pipelined_id = self.id_gen.next();
        let payload = BytesMut::from(&packet.payload[..]);

        let session = Session::new(payload, peer, pipelined_id, &self.hosts);
        if session.status == Status::BadRequest {
            return;
        }

        self.pool.borrow_mut().insert(pipelined_id, session);
        self.arm_timer(pipelined_id);
        self.dispatch(pipelined_id);
    }

    fn arm_timer(&self, pipelined_id: u16) {
        let tx = self.events_tx.clone();
        let timeout = self.timeout;
        tokio::task::spawn_local(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(ManagerEvent::TimedOut(pipelined_id));
        });
    }

    /// `CrSessionManager::Dispatch`. Dedicated sessions answer from the
    /// hosts engine (or its routed group) without ever touching the
    /// broadcast upstreams.
    fn dispatch(&mut self, pipelined_id: u16) {
        let mut pool = self.pool.borrow_mut();
        let Some(session) = pool.get_mut(&pipelined_id) else { return };

        if session.status == Status::Dedicated {
            if let Some(rule) = session.matched_rule.clone() {
                if let Some(group) = &rule.group {
                    let payload = session.request_payload.clone();
                    let mut outstanding = 0u32;
                    for server in group {
                        self.sender.send_to(pipelined_id, &payload, server);
                        outstanding += 1;
                    }
                    session.outstanding_replies = outstanding;
                    return;
                }

                let addresses: Vec<std::net::IpAddr> = match session.query_type {
                    Some(duomatcher::hosts::QueryType::A) => {
                        rule.ipv4.iter().copied().map(std::net::IpAddr::V4).collect()
                    }
                    Some(duomatcher::hosts::QueryType::Aaaa) => {
                        rule.ipv6.iter().copied().map(std::net::IpAddr::V6).collect()
                    }
                    // A non-A/AAAA dedicated hit with no group falls through to
                    // ordinary broadcast dispatch below, same as a RouteMiss.
                    Some(duomatcher::hosts::QueryType::Other) | None => Vec::new(),
                };

                if !addresses.is_empty() {
                    let qtype = session.query_type.unwrap();
                    let answer = wire::assemble_answer(&session.request_payload, qtype, &addresses);
                    session.candidate_response = Some(answer);
                    session.status = Status::Resolved;
                    return;
                }
            }
        }

        let outstanding = self.sender.send(pipelined_id, &session.request_payload);
        session.outstanding_replies = outstanding;
    }

    /// `CrSessionManager::OnRemoteRecv`: demultiplex a worker reply back to
    /// its session purely by the pipelined id carried in the packet.
    fn on_remote_recv(&mut self, packet: Packet) {
        let Ok(parsed) = wire::parse_response(&packet.payload) else {
            warn!("dropping unparsable upstream reply");
            return;
        };
        let Some(source) = packet.source else { return };

        let mut pool = self.pool.borrow_mut();
        let Some(session) = pool.get_mut(&parsed.id) else { return };

        use duomatcher::Health;
        let from_healthy = source.health == Health::Healthy;
        let _ = session.on_reply(parsed, from_healthy, &self.trusted_net, packet.payload);
    }

    fn on_send_failed(&mut self, pipelined_id: u16) {
        let mut pool = self.pool.borrow_mut();
        if let Some(session) = pool.get_mut(&pipelined_id) {
            session.outstanding_replies = session.outstanding_replies.saturating_sub(1);
        }
    }

    /// Finalise any session whose `outstanding_replies` has hit zero or
    /// which is already `Resolved`, mirroring the three original call sites
    /// of `CrSessionManager::Resolve` (this collapses them into one sweep
    /// per event, since Rust's borrow checker makes "resolve inline from
    /// three different call sites" unnecessarily awkward without losing the
    /// original's synchronous, same-tick finalisation).
    fn resolve_ready(&mut self, reply: &mut impl FnMut(Bytes, SocketAddr)) {
        let ready: Vec<u16> = self
            .pool
            .borrow()
            .iter()
            .filter(|(_, s)| s.outstanding_replies == 0 || s.status == Status::Resolved)
            .map(|(id, _)| *id)
            .collect();

        for id in ready {
            self.resolve(id, reply);
        }
    }

    /// `CrSessionManager::Resolve`: remove the session from the pool and, if
    /// it has a usable candidate response, rewrite its id back to the
    /// client's original and hand it to `reply`.
    fn resolve(&mut self, pipelined_id: u16, reply: &mut impl FnMut(Bytes, SocketAddr)) {
        let Some(session) = self.pool.borrow_mut().remove(&pipelined_id) else {
            return;
        };

        let Some(mut response) = session.candidate_response else {
            return;
        };
        if response.len() <= 2 {
            return;
        }

        let mut mutable = BytesMut::from(&response[..]);
        wire::write_id(&mut mutable, session.raw_id);
        response = mutable.freeze();

        info!("[{pipelined_id}] session resolved");
        reply(response, session.peer);
    }
}
