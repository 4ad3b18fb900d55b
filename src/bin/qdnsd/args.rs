// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements command-line argument parsing.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// The quantum-dns authoritative responder
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    /// Load the zone from this file (default: standard input)
    #[clap(short = 'Z', value_name = "FILE")]
    pub zone: Option<PathBuf>,

    /// Bind to this address (ignored in capture mode)
    #[clap(short = 'l', value_name = "ADDR")]
    pub laddr: Option<IpAddr>,

    /// Bind to this port
    #[clap(short = 'p', value_name = "PORT", default_value_t = 53)]
    pub port: u16,

    /// Capture on this device instead of binding a socket, answering
    /// queries that were never addressed to this host
    #[clap(short = 'M', value_name = "DEV")]
    pub monitor: Option<String>,

    /// Also apply this filter in capture mode, on top of the built-in
    /// "udp and dst port 53"
    #[clap(short = 'f', value_name = "FILTER", requires = "monitor")]
    pub filter: Option<String>,

    /// Bind to an IPv6 address, or capture IPv6 frames with -M
    #[clap(short = '6')]
    pub ipv6: bool,

    /// Do not send NXDOMAIN when no record matches; drop the query
    #[clap(short = 'X')]
    pub no_nxdomain: bool,

    /// Resend unmatched queries rather than sending NXDOMAIN; only
    /// useful on a router with two NICs and a DROP FORWARD policy
    /// where the resent query is not seen on the input NIC again
    #[clap(short = 'R')]
    pub resend: bool,
}
