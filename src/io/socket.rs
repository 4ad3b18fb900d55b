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

//! The bound-UDP-socket transport.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use super::{format_source, Transport, RECV_TIMEOUT};

/// A transport answering over a UDP socket bound to a local address.
///
/// The peer of the last received datagram is remembered so that
/// [`Transport::reply`] knows where to send. Retransmission is
/// meaningless on a bound socket, so [`Transport::resend`] is a no-op.
pub struct SocketTransport {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
}

impl SocketTransport {
    /// Creates a new `SocketTransport` bound to `addr`.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        Ok(Self { socket, peer: None })
    }
}

impl Transport for SocketTransport {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, String)> {
        let (len, peer) = self.socket.recv_from(buf)?;
        self.peer = Some(peer);
        Ok((len, format_source(peer.ip(), peer.port())))
    }

    fn reply(&mut self, buf: &[u8]) -> io::Result<()> {
        let peer = self
            .peer
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no query received yet"))?;
        self.socket.send_to(buf, peer).map(|_| ())
    }

    fn resend(&mut self, _buf: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_go_back_to_the_last_peer() {
        let mut transport = SocketTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let server_addr = transport.socket.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"query", server_addr).unwrap();

        let mut buf = [0u8; 512];
        let (len, source) = transport.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"query");
        let client_addr = client.local_addr().unwrap();
        assert_eq!(source, format!("{}:{}", client_addr.ip(), client_addr.port()));

        transport.reply(b"reply").unwrap();
        let (len, from) = client.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"reply");
        assert_eq!(from, server_addr);
    }

    #[test]
    fn reply_without_a_peer_fails() {
        let mut transport = SocketTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(transport.reply(b"reply").is_err());
    }

    #[test]
    fn resend_is_a_no_op() {
        let mut transport = SocketTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(transport.resend(b"query").is_ok());
    }
}
