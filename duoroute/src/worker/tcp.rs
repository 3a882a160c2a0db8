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

//! TCP worker, mirrors `TCPWorker` in `worker/tcp_worker.cc`: a
//! length-prefixed (2-byte big-endian) stream, one pipelined connection per
//! upstream, and an in-flight pool keyed by pipelined id so a dropped
//! connection can replay everything still outstanding on reconnect.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use duomatcher::DnsServer;
use log::error;
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::{Outbound, WorkerEvent};
use crate::error::RouteError;
use crate::packet::Packet;

/// A send is replayed at most this many times across reconnects before the
/// manager is told it failed for good.
const RETRY_THRESHOLD: u8 = 1;

struct Query {
    retry_count: u8,
    payload: Bytes,
}

const RECV_CHUNK: usize = 4096;

pub(super) async fn run(
    server: DnsServer,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let mut stream: Option<TcpStream> = None;
    let mut pool: HashMap<u16, Query> = HashMap::new();
    let mut recv_buf = BytesMut::new();

    loop {
        if stream.is_none() {
            match TcpStream::connect(server.addr).await {
                Ok(s) => {
                    let _ = s.set_nodelay(true);
                    stream = Some(s);
                    recv_buf.clear();
                    replay(&mut stream, &pool).await;
                }
                Err(_) => {
                    fail_pool(&mut pool, &server, &events);
                    // Anything still in the pool (below its retry threshold)
                    // needs a connection to replay onto — retry right away
                    // instead of waiting for a new send.
                    if !pool.is_empty() {
                        continue;
                    }
                    match outbound.recv().await {
                        Some(req) => {
                            enqueue(&mut pool, req, &server, &events);
                        }
                        None => return,
                    }
                    continue;
                }
            }
        }

        let conn = stream.as_mut().unwrap();
        let mut chunk = [0u8; RECV_CHUNK];

        tokio::select! {
            req = outbound.recv() => {
                let Some(req) = req else { return };
                let id = req.id;
                if enqueue(&mut pool, req, &server, &events) {
                    if let Some(query) = pool.get(&id) {
                        if write_framed(conn, &query.payload).await.is_err() {
                            fail_pool(&mut pool, &server, &events);
                            stream = None;
                        }
                    }
                }
            }
            n = conn.read(&mut chunk) => {
                match n {
                    Ok(0) | Err(_) => {
                        fail_pool(&mut pool, &server, &events);
                        stream = None;
                    }
                    Ok(n) => {
                        recv_buf.extend_from_slice(&chunk[..n]);
                        drain_frames(&mut recv_buf, &mut pool, &server, &events);
                    }
                }
            }
        }
    }
}

/// Insert a newly queued send into the in-flight pool. Returns `false`
/// (and reports the send as failed, without touching the pool) if
/// `req.id` is already outstanding on this worker — the session manager
/// must never reuse a pipelined id that hasn't been resolved yet, so
/// seeing one here is the caller-facing expression of an invariant the
/// original enforces with an assert.
fn enqueue(pool: &mut HashMap<u16, Query>, req: Outbound, server: &DnsServer, events: &mpsc::UnboundedSender<WorkerEvent>) -> bool {
    if pool.contains_key(&req.id) {
        error!("{}", RouteError::DuplicateInFlight(req.id));
        let _ = events.send(WorkerEvent::SendResult {
            id: req.id,
            server: server.clone(),
            ok: false,
        });
        return false;
    }
    pool.insert(
        req.id,
        Query {
            retry_count: 0,
            payload: req.payload,
        },
    );
    true
}

async fn write_framed(conn: &mut TcpStream, payload: &Bytes) -> std::io::Result<()> {
    let mut framed = BytesMut::with_capacity(2 + payload.len());
    framed.put_u16(payload.len() as u16);
    framed.put_slice(payload);
    conn.write_all(&framed).await
}

async fn replay(stream: &mut Option<TcpStream>, pool: &HashMap<u16, Query>) {
    let Some(conn) = stream.as_mut() else { return };
    for query in pool.values() {
        if write_framed(conn, &query.payload).await.is_err() {
            *stream = None;
            return;
        }
    }
}

/// Bump every in-flight query's retry count; anything over the threshold is
/// reported as failed and dropped from the pool, same as `InternalClose`.
fn fail_pool(pool: &mut HashMap<u16, Query>, server: &DnsServer, events: &mpsc::UnboundedSender<WorkerEvent>) {
    pool.retain(|id, query| {
        query.retry_count += 1;
        if query.retry_count > RETRY_THRESHOLD {
            let _ = events.send(WorkerEvent::SendResult {
                id: *id,
                server: server.clone(),
                ok: false,
            });
            false
        } else {
            true
        }
    });
}

fn drain_frames(buf: &mut BytesMut, pool: &mut HashMap<u16, Query>, server: &DnsServer, events: &mpsc::UnboundedSender<WorkerEvent>) {
    loop {
        if buf.len() < 2 {
            return;
        }
        let size = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        if buf.len() < 2 + size {
            return;
        }
        buf.advance(2);
        let frame = buf.split_to(size).freeze();

        let Some(id) = crate::wire::read_id(&frame) else {
            continue;
        };

        if pool.remove(&id).is_some() {
            let _ = events.send(WorkerEvent::SendResult {
                id,
                server: server.clone(),
                ok: true,
            });
            let _ = events.send(WorkerEvent::Recv(Packet::from_worker(frame, server.clone())));
        }
    }
}
