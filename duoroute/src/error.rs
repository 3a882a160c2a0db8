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

//! This module provides the universal error type used by the routing
//! library. The error type uses `thiserror`.

use duomatcher::MatchError;
use std::io;
use thiserror::Error;

pub(crate) type Result<T> = std::result::Result<T, RouteError>;

/// `RouteError` enumerates all possible errors returned by this library.
#[derive(Error, Debug)]
pub enum RouteError {
    /// A client datagram could not be parsed into a minimal DNS request
    /// (no question section, or the parser rejected it outright). The
    /// session is dropped without a reply.
    #[error("failed to parse inbound DNS packet: {0}")]
    ParseError(String),

    /// A socket-level failure on a worker (connect, send, or recv).
    #[error("transport error talking to {server:?}: {source}")]
    TransportError {
        server: String,
        #[source]
        source: io::Error,
    },

    /// A TCP worker was asked to pipeline a `pipelined_id` it already has
    /// outstanding. The caller (the session manager) must guarantee unique
    /// ids; hitting this is a programming error.
    #[error("pipelined id {0} already in flight on this worker")]
    DuplicateInFlight(u16),

    /// Error while loading the hosts file or the trusted-net file.
    #[error(transparent)]
    MatchError(#[from] MatchError),

    /// Error while reading a config file from disk.
    #[error("failed to read `{0}`: {1}")]
    Io(String, #[source] io::Error),
}
