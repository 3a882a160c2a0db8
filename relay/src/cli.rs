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

//! Command-line flags, ported one-for-one from `cli.cc`'s `getopt_long`
//! table.

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "duorelay", about = "A crappy DNS repeater", no_version)]
pub struct RelayOpt {
    /// Print version and exit
    #[structopt(short = "v", long = "version")]
    pub version: bool,

    /// Comma separated healthy remote DNS server list
    #[structopt(short = "g", long = "good-dns")]
    pub good_dns: Option<String>,

    /// Comma separated poisoned remote DNS server list
    #[structopt(short = "b", long = "bad-dns")]
    pub bad_dns: Option<String>,

    /// Path to hosts file
    #[structopt(short = "s", long = "hosts")]
    pub hosts: Option<String>,

    /// Path to the file containing the trusted-net list
    #[structopt(short = "n", long = "trusted-net")]
    pub trusted_net: Option<String>,

    /// Load a trusted-net file, print the coalesced table to stdout, exit
    #[structopt(short = "o", long = "optimize")]
    pub optimize: Option<String>,

    /// Port number of the local server
    #[structopt(short = "p", long = "port", default_value = "53")]
    pub port: u16,

    /// Listen address of the local server
    #[structopt(short = "l", long = "listen", default_value = "127.0.0.1")]
    pub listen: String,

    /// Timeout for each session, in milliseconds
    #[structopt(short = "t", long = "timeout", default_value = "3000")]
    pub timeout_ms: u64,

    /// Verbose logging
    #[structopt(short = "V", long = "verbose")]
    pub verbose: bool,

    /// Drop privileges to this user after binding the listening socket
    #[structopt(long = "user")]
    pub user: Option<String>,
}
