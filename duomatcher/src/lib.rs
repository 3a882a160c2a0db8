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

//! Domain matching primitives shared by the duoroute DNS relay.
//!
//! This crate has no networking and no async runtime: it is the fast,
//! dependency-light leaf of the workspace, just like `dmatcher` is for
//! `droute`. It provides three things:
//!
//! - [`server`]: the `DnsServer` identity type (transport, health label,
//!   address) shared by every upstream-facing piece of the relay.
//! - [`trustednet`]: an IPv4 CIDR membership table built once at startup.
//! - [`hosts`]: the hosts-file rule engine (parsing, priority ordering,
//!   digest-based indexing, matching).

pub mod error;
pub mod hosts;
pub mod server;
pub mod trustednet;

pub use error::MatchError;
pub use hosts::{HostsIndex, HostsRule};
pub use server::{DnsServer, Health, Transport};
pub use trustednet::TrustedNet;
