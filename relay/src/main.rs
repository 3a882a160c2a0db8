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

mod cli;
mod config;
#[cfg(unix)]
mod privdrop;

use anyhow::{bail, Result};
use cli::RelayOpt;
use duomatcher::{DnsServer, Health, HostsIndex, TrustedNet};
use duoroute::SessionManager;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;
use structopt::StructOpt;
use tokio::net::UdpSocket;

fn main() -> Result<()> {
    let opt = RelayOpt::from_args();

    if opt.version {
        println!("duorelay {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    SimpleLogger::new()
        .with_level(if opt.verbose { LevelFilter::Debug } else { LevelFilter::Warn })
        .init()?;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run(opt))
}

async fn run(opt: RelayOpt) -> Result<()> {
    if let Some(path) = &opt.optimize {
        let text = match config::read_to_string(path).await {
            Ok(t) => t,
            Err(e) => {
                error!("failed to read {path}: {e}");
                std::process::exit(-4);
            }
        };
        let net = TrustedNet::from_lines(&text, false);
        for line in net.canonical_lines() {
            println!("{line}");
        }
        std::process::exit(0);
    }

    let mut upstreams = Vec::new();
    if let Some(list) = &opt.good_dns {
        match DnsServer::parse_list(list, Health::Healthy) {
            Ok(mut servers) => upstreams.append(&mut servers),
            Err(e) => {
                error!("invalid -g/--good-dns list: {e}");
                std::process::exit(-1);
            }
        }
    }
    if let Some(list) = &opt.bad_dns {
        match DnsServer::parse_list(list, Health::Poisoned) {
            Ok(mut servers) => upstreams.append(&mut servers),
            Err(e) => {
                error!("invalid -b/--bad-dns list: {e}");
                std::process::exit(-1);
            }
        }
    }
    if upstreams.is_empty() {
        error!("no upstream DNS servers configured");
        std::process::exit(-2);
    }

    let trusted_net = match &opt.trusted_net {
        Some(path) => match config::read_to_string(path).await {
            Ok(text) => TrustedNet::from_lines(&text, true),
            Err(e) => {
                error!("failed to read {path}: {e}");
                std::process::exit(-3);
            }
        },
        None => TrustedNet::new(),
    };

    let hosts = match &opt.hosts {
        Some(path) => {
            let text = match config::read_to_string(path).await {
                Ok(t) => t,
                Err(e) => {
                    error!("failed to read {path}: {e}");
                    std::process::exit(-4);
                }
            };
            match HostsIndex::from_text(&text) {
                Ok(index) => index,
                Err(e) => {
                    error!("failed to parse hosts file {path}: {e}");
                    std::process::exit(-4);
                }
            }
        }
        None => HostsIndex::default(),
    };

    let listen_ip: IpAddr = match opt.listen.parse() {
        Ok(ip) => ip,
        Err(_) => {
            error!("invalid listen address: {}", opt.listen);
            std::process::exit(-1);
        }
    };
    let bind_addr = SocketAddr::new(listen_ip, opt.port);

    let socket = Rc::new(UdpSocket::bind(bind_addr).await?);
    info!("listening at {bind_addr}");

    #[cfg(unix)]
    if let Some(user) = &opt.user {
        privdrop::drop_to(user)?;
        info!("dropped privileges to {user}");
    }
    #[cfg(not(unix))]
    if opt.user.is_some() {
        bail!("privilege dropping is only supported on unix");
    }

    let manager = SessionManager::new(&upstreams, hosts, trusted_net, Duration::from_millis(opt.timeout_ms));
    let client_feed = manager.client_feed();

    let recv_socket = socket.clone();
    tokio::task::spawn_local(async move {
        let mut buf = vec![0u8; 65535];
        loop {
            match recv_socket.recv_from(&mut buf).await {
                Ok((n, peer)) => {
                    client_feed.submit(bytes::Bytes::copy_from_slice(&buf[..n]), peer);
                }
                Err(e) => warn!("recv failed: {e}"),
            }
        }
    });

    let reply_socket = socket.clone();
    manager
        .run(move |payload, peer| {
            let socket = reply_socket.clone();
            tokio::task::spawn_local(async move {
                if let Err(e) = socket.send_to(&payload, peer).await {
                    warn!("send failed: {e}");
                }
            });
        })
        .await;

    Ok(())
}
