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

//! The routing half of the relay: a single-threaded, cooperative event loop
//! (`LocalSet` + `spawn_local`) that races a client's query against every
//! configured upstream, picks the best answer via the session state
//! machine, and supports per-query dedicated routing from the hosts engine.
//!
//! Shaped after `droute`: `error` for the crate-wide error type, `wire` for
//! wire-format parsing/assembly, `session`/`session_manager` for the
//! per-query state machine and its pool, `sender`/`worker` for the
//! upstream-facing transport layer, and `mock` for test-only fixtures.

pub mod error;
pub mod mock;
pub mod packet;
pub mod sender;
pub mod session;
pub mod session_manager;
pub mod wire;
pub mod worker;

pub use error::RouteError;
pub use packet::Packet;
pub use session::{Session, Status};
pub use session_manager::{ClientFeed, SessionManager, DEFAULT_TIMEOUT};
