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

//! The packet-capture transport (Linux).
//!
//! This transport opens an `AF_PACKET` socket bound to a named device
//! and answers DNS queries seen on the wire, whether or not they were
//! addressed to this host. The kernel filters to the bound ethertype
//! (IPv4 or IPv6 per configuration) and the capture loop applies the
//! built-in `udp and dst port 53` condition, plus an optional
//! [`Filter`], to the parsed headers. Replies are whole rewritten
//! frames (see [`frame`]); retransmission injects the captured frame
//! byte-identical, which on a router pushes the query along to its
//! real destination.

use std::ffi::CString;
use std::fmt;
use std::io;
use std::mem;
use std::net::IpAddr;
use std::os::unix::io::RawFd;

use super::frame::{self, Frame};
use super::{format_source, Transport, RECV_TIMEOUT};

/// The port the capture loop answers on.
const DNS_PORT: u16 = 53;

/// The size of the frame receive buffer. Larger frames are truncated
/// by the kernel and discarded by the parser.
const FRAME_BUFFER_SIZE: usize = 2048;

/// The `sll_pkttype` of frames this host sent (from
/// `linux/if_packet.h`); receiving our own replies would be unhelpful.
const PACKET_OUTGOING: u8 = 4;

////////////////////////////////////////////////////////////////////////
// THE CAPTURE TRANSPORT                                              //
////////////////////////////////////////////////////////////////////////

/// A transport answering queries captured on a network device.
pub struct CaptureTransport {
    fd: RawFd,
    filter: Option<Filter>,
    frame_buf: Vec<u8>,
    last_frame: Option<Vec<u8>>,
}

impl CaptureTransport {
    /// Opens a capture on `device` for IPv4 (or, with `v6`, IPv6)
    /// traffic, answering only frames accepted by `filter` when one is
    /// given.
    pub fn open(device: &str, v6: bool, filter: Option<Filter>) -> io::Result<Self> {
        let protocol = if v6 { libc::ETH_P_IPV6 } else { libc::ETH_P_IP };
        let protocol = protocol as u16;

        // SAFETY: plain socket creation; the descriptor's ownership
        // passes to the CaptureTransport, whose Drop closes it.
        let fd = check(unsafe {
            libc::socket(libc::AF_PACKET, libc::SOCK_RAW, protocol.to_be() as i32)
        })?;
        let transport = Self {
            fd,
            filter,
            frame_buf: vec![0; FRAME_BUFFER_SIZE],
            last_frame: None,
        };

        let device = CString::new(device).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "device name contains a null")
        })?;
        // SAFETY: device is a valid C string.
        let ifindex = unsafe { libc::if_nametoindex(device.as_ptr()) };
        if ifindex == 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: sockaddr_ll is valid when zeroed, and the kernel
        // reads only the length we pass.
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = protocol.to_be();
        addr.sll_ifindex = ifindex as i32;
        check(unsafe {
            libc::bind(
                transport.fd,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        })?;

        let timeout = libc::timeval {
            tv_sec: RECV_TIMEOUT.as_secs() as libc::time_t,
            tv_usec: 0,
        };
        // SAFETY: the option value points at a live timeval of the
        // length we pass.
        check(unsafe {
            libc::setsockopt(
                transport.fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &timeout as *const libc::timeval as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        })?;

        Ok(transport)
    }

    /// Injects a frame on the bound device.
    fn inject(&self, frame_bytes: &[u8]) -> io::Result<()> {
        // SAFETY: the buffer pointer and length describe a live slice.
        let sent = unsafe {
            libc::send(
                self.fd,
                frame_bytes.as_ptr() as *const libc::c_void,
                frame_bytes.len(),
                0,
            )
        };
        if sent < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn no_frame() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "no frame captured yet")
    }
}

impl Transport for CaptureTransport {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, String)> {
        loop {
            // SAFETY: buffer and address structure are live for the
            // duration of the call, and addr_len tells the kernel how
            // much it may write.
            let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
            let mut addr_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
            let received = unsafe {
                libc::recvfrom(
                    self.fd,
                    self.frame_buf.as_mut_ptr() as *mut libc::c_void,
                    self.frame_buf.len(),
                    0,
                    &mut addr as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                    &mut addr_len,
                )
            };
            if received < 0 {
                return Err(io::Error::last_os_error());
            }
            if addr.sll_pkttype == PACKET_OUTGOING {
                continue;
            }

            let frame_bytes = &self.frame_buf[..received as usize];
            let parsed = match frame::parse(frame_bytes) {
                Some(parsed) => parsed,
                None => continue,
            };
            if parsed.dst_port != DNS_PORT {
                continue;
            }
            if let Some(ref filter) = self.filter {
                if !filter.matches(&parsed) {
                    continue;
                }
            }
            if parsed.payload.len() > buf.len() {
                continue;
            }

            buf[..parsed.payload.len()].copy_from_slice(parsed.payload);
            let len = parsed.payload.len();
            let source = format_source(parsed.src_ip, parsed.src_port);
            self.last_frame = Some(frame_bytes.to_vec());
            return Ok((len, source));
        }
    }

    fn reply(&mut self, buf: &[u8]) -> io::Result<()> {
        let last = self.last_frame.as_deref().ok_or_else(Self::no_frame)?;
        let reply = frame::build_reply(last, buf).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "captured frame cannot carry a reply")
        })?;
        self.inject(&reply)
    }

    fn resend(&mut self, _buf: &[u8]) -> io::Result<()> {
        let last = self.last_frame.as_deref().ok_or_else(Self::no_frame)?;
        self.inject(last)
    }
}

impl Drop for CaptureTransport {
    fn drop(&mut self) {
        // SAFETY: we own the descriptor and close it exactly once.
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Converts a negative syscall return into the current `errno`.
fn check(result: libc::c_int) -> io::Result<libc::c_int> {
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result)
    }
}

////////////////////////////////////////////////////////////////////////
// CAPTURE FILTERS                                                    //
////////////////////////////////////////////////////////////////////////

/// An extra condition applied to captured frames on top of the
/// built-in `udp and dst port 53`.
///
/// The expression grammar is a conjunction of primitives:
///
/// ```text
/// <primitive> [and <primitive>]*
/// primitive := (src|dst) (host <address> | port <port>)
/// ```
#[derive(Debug)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

#[derive(Debug)]
enum Predicate {
    SrcHost(IpAddr),
    DstHost(IpAddr),
    SrcPort(u16),
    DstPort(u16),
}

impl Filter {
    /// Parses a filter expression.
    pub fn parse(expression: &str) -> Result<Self, FilterError> {
        let mut predicates = Vec::new();
        let mut tokens = expression.split_whitespace();
        loop {
            let direction = match tokens.next() {
                Some(token) => token,
                None => break,
            };
            let src = match direction {
                "src" => true,
                "dst" => false,
                _ => return Err(FilterError::ExpectedDirection),
            };
            let kind = tokens.next().ok_or(FilterError::Truncated)?;
            let value = tokens.next().ok_or(FilterError::Truncated)?;
            let predicate = match kind {
                "host" => {
                    let addr = value.parse().or(Err(FilterError::BadAddress))?;
                    if src {
                        Predicate::SrcHost(addr)
                    } else {
                        Predicate::DstHost(addr)
                    }
                }
                "port" => {
                    let port = value.parse().or(Err(FilterError::BadPort))?;
                    if src {
                        Predicate::SrcPort(port)
                    } else {
                        Predicate::DstPort(port)
                    }
                }
                _ => return Err(FilterError::ExpectedKind),
            };
            predicates.push(predicate);
            match tokens.next() {
                None => break,
                Some("and") => continue,
                Some(_) => return Err(FilterError::ExpectedAnd),
            }
        }
        if predicates.is_empty() {
            return Err(FilterError::Empty);
        }
        Ok(Self { predicates })
    }

    /// Returns whether the parsed frame satisfies every predicate.
    fn matches(&self, frame: &Frame) -> bool {
        self.predicates.iter().all(|predicate| match *predicate {
            Predicate::SrcHost(addr) => frame.src_ip == addr,
            Predicate::DstHost(addr) => frame.dst_ip == addr,
            Predicate::SrcPort(port) => frame.src_port == port,
            Predicate::DstPort(port) => frame.dst_port == port,
        })
    }
}

/// An error reporting an unparsable filter expression.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FilterError {
    BadAddress,
    BadPort,
    Empty,
    ExpectedAnd,
    ExpectedDirection,
    ExpectedKind,
    Truncated,
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::BadAddress => f.write_str("invalid address in filter"),
            Self::BadPort => f.write_str("invalid port in filter"),
            Self::Empty => f.write_str("empty filter expression"),
            Self::ExpectedAnd => f.write_str("expected 'and' between primitives"),
            Self::ExpectedDirection => f.write_str("expected 'src' or 'dst'"),
            Self::ExpectedKind => f.write_str("expected 'host' or 'port'"),
            Self::Truncated => f.write_str("truncated filter expression"),
        }
    }
}

impl std::error::Error for FilterError {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
