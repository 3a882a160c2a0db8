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

//! Error types for domain/hosts/trusted-net parsing.

use std::io;
use thiserror::Error;

/// Errors that can occur while loading or parsing a hosts file, a trusted-net
/// file, or a `DnsServer` address list.
#[derive(Error, Debug)]
pub enum MatchError {
    /// I/O failure while reading a config file.
    #[error("failed to read `{0}`: {1}")]
    Io(String, #[source] io::Error),

    /// A `[(udp|tcp)://]addr[:port]` token could not be parsed.
    #[error("invalid DNS server address: `{0}`")]
    InvalidServer(String),

    /// A hosts rule's priority token (`<1>`..`<5>`) was malformed.
    #[error("invalid priority token in hosts rule: `{0}`")]
    InvalidPriority(String),

    /// A hosts rule names a DNS server group that was never defined.
    #[error("hosts rule references undefined DNS server group: `{0}`")]
    UnknownGroup(String),

    /// A `/.../ ` regex pattern failed to compile.
    #[error("invalid regex pattern `{0}`: {1}")]
    InvalidRegex(String, #[source] regex::Error),

    /// A `[DNS Config]` group line had no usable addresses.
    #[error("DNS server group `{0}` has no usable addresses")]
    EmptyGroup(String),
}

pub(crate) type Result<T> = std::result::Result<T, MatchError>;
