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

use criterion::{criterion_group, criterion_main, Criterion};
use duomatcher::hosts::{HostsIndex, QueryType};
use duomatcher::TrustedNet;
use once_cell::sync::Lazy;
use std::net::Ipv4Addr;

static TRUSTED_NET: Lazy<TrustedNet> = Lazy::new(|| {
    TrustedNet::from_lines(
        "1.0.0.0/24\n1.0.1.0/24\n1.0.2.0/23\n1.0.4.0/22\n1.0.8.0/21\n8.8.8.8/32\n93.184.216.0/24\n",
        true,
    )
});

static HOSTS: Lazy<HostsIndex> = Lazy::new(|| {
    HostsIndex::from_text(
        "[hosts]\n\
         <1> 10.0.0.5 internal.lan\n\
         8.8.8.8 *.example.org\n\
         9.9.9.9 /^[a-z]+\\.example\\.org$/\n",
    )
    .unwrap()
});

fn bench_trustednet_contains(c: &mut Criterion) {
    let ip: Ipv4Addr = "93.184.216.34".parse().unwrap();
    c.bench_function("trustednet contains", |b| {
        b.iter(|| TRUSTED_NET.contains(ip));
    });
}

fn bench_hosts_match(c: &mut Criterion) {
    c.bench_function("hosts match", |b| {
        b.iter(|| HOSTS.lookup("www.example.org", QueryType::A));
    });
}

criterion_group!(benches, bench_trustednet_contains, bench_hosts_match);
criterion_main!(benches);
