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

//! `Sender` fans a session's request out to every configured upstream
//! (`broadcast_list_`), or to one specific server on demand
//! (`on_demand_map_`, lazily populated). Mirrors `CrappySender`.

use bytes::Bytes;
use duomatcher::DnsServer;
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::worker::{self, WorkerEvent, WorkerHandle};

pub struct Sender {
    broadcast_list: Vec<WorkerHandle>,
    on_demand_map: HashMap<DnsServer, WorkerHandle>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Sender {
    /// Spawn one worker per server in `upstreams`, all reporting back
    /// through `events`.
    pub fn new(upstreams: &[DnsServer], events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        let broadcast_list = upstreams
            .iter()
            .map(|server| worker::spawn(server.clone(), events.clone()))
            .collect();
        Self {
            broadcast_list,
            on_demand_map: HashMap::new(),
            events,
        }
    }

    /// Broadcast `payload` (tagged with `id`) to every configured upstream.
    /// Returns how many sends were queued, so the caller can bump
    /// `outstanding_replies` by that amount.
    pub fn send(&self, id: u16, payload: &Bytes) -> u32 {
        for worker in &self.broadcast_list {
            worker.send(id, payload.clone());
        }
        self.broadcast_list.len() as u32
    }

    /// Send `payload` to exactly one server, creating its worker on first
    /// use.
    pub fn send_to(&mut self, id: u16, payload: &Bytes, server: &DnsServer) {
        let events = self.events.clone();
        let worker = self
            .on_demand_map
            .entry(server.clone())
            .or_insert_with(|| worker::spawn(server.clone(), events));
        worker.send(id, payload.clone());
    }
}
