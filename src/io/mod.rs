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

//! Transports for running a [`Server`](crate::server::Server).
//!
//! The [`Server`](crate::server::Server) implements the responder's
//! processing logic abstracted from network I/O. A transport delivers
//! received datagram payloads to it and acts on the responses it
//! produces. Two transports exist: [`SocketTransport`] answers over a
//! bound UDP socket, and (on Linux) [`CaptureTransport`] answers over
//! a raw packet-capture socket on a named device, rewriting whole
//! frames so that it can speak for addresses the host does not own.

use std::io;
use std::net::IpAddr;
use std::time::Duration;

use cfg_if::cfg_if;

mod socket;
pub use socket::SocketTransport;

cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod capture;
        mod frame;
        pub use capture::{CaptureTransport, Filter, FilterError};
    }
}

/// How long a transport blocks in `recv` before returning
/// [`io::ErrorKind::WouldBlock`]. The receive loop checks for a
/// pending termination signal between receives, so this bounds the
/// time the process takes to notice one.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// A bidirectional datagram channel with a notion of "the sender of
/// the last received datagram".
pub trait Transport {
    /// Receives one DNS datagram payload into `buf`, returning its
    /// length and the printable identity of its sender.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, String)>;

    /// Sends a reply to the sender of the last received datagram.
    fn reply(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Retransmits the last received datagram toward its original
    /// destination, where the transport supports it. `buf` carries the
    /// received payload back in.
    fn resend(&mut self, buf: &[u8]) -> io::Result<()>;
}

/// Formats a source identity the way the request log prints it:
/// `address:port` for IPv4 and `address#port` for IPv6.
pub(crate) fn format_source(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(addr) => format!("{}:{}", addr, port),
        IpAddr::V6(addr) => format!("{}#{}", addr, port),
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_formatting_works() {
        assert_eq!(format_source("192.0.2.7".parse().unwrap(), 53), "192.0.2.7:53");
        assert_eq!(format_source("2001:db8::7".parse().unwrap(), 53), "2001:db8::7#53");
    }
}
