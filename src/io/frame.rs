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

//! Parsing and rewriting of captured Ethernet/IP/UDP frames.
//!
//! The capture transport receives whole frames and must answer with
//! whole frames, speaking for destination addresses the host does not
//! own. [`parse`] extracts the addressing and the DNS payload from a
//! captured frame; [`build_reply`] produces the reply frame for it:
//! MAC and IP addresses swapped, the source port forced to 53, the
//! destination port taken from the query's source port, and all
//! lengths and checksums recomputed. Fragmented datagrams and IPv6
//! extension headers are not handled; such frames are ignored.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const ETHER_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const IPV4_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const UDP_HEADER_LEN: usize = 8;
const UDP_PROTOCOL: u8 = 17;

////////////////////////////////////////////////////////////////////////
// FRAME PARSING                                                      //
////////////////////////////////////////////////////////////////////////

/// The addressing and payload of a captured UDP frame.
#[derive(Debug)]
pub(super) struct Frame<'a> {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: &'a [u8],
}

/// Parses a captured Ethernet frame down to its UDP payload. Returns
/// `None` for anything that is not a complete, unfragmented UDP
/// datagram.
pub(super) fn parse(frame: &[u8]) -> Option<Frame<'_>> {
    if frame.len() < ETHER_HEADER_LEN {
        return None;
    }
    match u16::from_be_bytes([frame[12], frame[13]]) {
        ETHERTYPE_IPV4 => parse_ipv4(&frame[ETHER_HEADER_LEN..]),
        ETHERTYPE_IPV6 => parse_ipv6(&frame[ETHER_HEADER_LEN..]),
        _ => None,
    }
}

fn parse_ipv4(ip: &[u8]) -> Option<Frame<'_>> {
    if ip.len() < IPV4_HEADER_LEN || ip[0] >> 4 != 4 {
        return None;
    }
    let header_len = ((ip[0] & 0x0f) as usize) * 4;
    if header_len < IPV4_HEADER_LEN || ip.len() < header_len {
        return None;
    }
    if ip[9] != UDP_PROTOCOL {
        return None;
    }
    // Fragment offset or MF set: not a whole datagram.
    if u16::from_be_bytes([ip[6], ip[7]]) & 0x3fff != 0 {
        return None;
    }
    let src_ip = IpAddr::V4(Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]));
    let dst_ip = IpAddr::V4(Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]));
    parse_udp(ip.get(header_len..)?, src_ip, dst_ip)
}

fn parse_ipv6(ip: &[u8]) -> Option<Frame<'_>> {
    if ip.len() < IPV6_HEADER_LEN || ip[0] >> 4 != 6 {
        return None;
    }
    if ip[6] != UDP_PROTOCOL {
        return None;
    }
    let src_ip = IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(&ip[8..24]).unwrap()));
    let dst_ip = IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(&ip[24..40]).unwrap()));
    let payload_len = u16::from_be_bytes([ip[4], ip[5]]) as usize;
    let udp = ip.get(IPV6_HEADER_LEN..IPV6_HEADER_LEN + payload_len)?;
    parse_udp(udp, src_ip, dst_ip)
}

fn parse_udp<'a>(udp: &'a [u8], src_ip: IpAddr, dst_ip: IpAddr) -> Option<Frame<'a>> {
    if udp.len() < UDP_HEADER_LEN {
        return None;
    }
    let udp_len = u16::from_be_bytes([udp[4], udp[5]]) as usize;
    if udp_len < UDP_HEADER_LEN || udp_len > udp.len() {
        return None;
    }
    Some(Frame {
        src_ip,
        dst_ip,
        src_port: u16::from_be_bytes([udp[0], udp[1]]),
        dst_port: u16::from_be_bytes([udp[2], udp[3]]),
        payload: &udp[UDP_HEADER_LEN..udp_len],
    })
}

////////////////////////////////////////////////////////////////////////
// REPLY CONSTRUCTION                                                 //
////////////////////////////////////////////////////////////////////////

/// Builds the frame that carries `payload` back to the sender of the
/// captured frame `frame`. Returns `None` when `frame` does not parse
/// or the payload is too large for the UDP length field.
pub(super) fn build_reply(frame: &[u8], payload: &[u8]) -> Option<Vec<u8>> {
    let parsed = parse(frame)?;
    let udp_len = UDP_HEADER_LEN + payload.len();
    if udp_len > u16::MAX as usize {
        return None;
    }
    let ip = &frame[ETHER_HEADER_LEN..];

    let mut reply = Vec::with_capacity(ETHER_HEADER_LEN + IPV6_HEADER_LEN + udp_len);
    reply.extend_from_slice(&frame[6..12]); // destination MAC <- source MAC
    reply.extend_from_slice(&frame[0..6]); // source MAC <- destination MAC
    reply.extend_from_slice(&frame[12..14]);

    let pseudo_header;
    match parsed.src_ip {
        IpAddr::V4(_) => {
            let total_len = (IPV4_HEADER_LEN + udp_len) as u16;
            reply.push(0x45); // any options of the query are dropped
            reply.push(ip[1]);
            reply.extend_from_slice(&total_len.to_be_bytes());
            reply.extend_from_slice(&ip[4..8]); // identification, flags
            reply.push(ip[8]); // TTL
            reply.push(UDP_PROTOCOL);
            reply.extend_from_slice(&[0, 0]); // checksum, filled below
            reply.extend_from_slice(&ip[16..20]); // source <- destination
            reply.extend_from_slice(&ip[12..16]); // destination <- source
            let checksum = internet_checksum(&[&reply[ETHER_HEADER_LEN..]]);
            let start = ETHER_HEADER_LEN + 10;
            reply[start..start + 2].copy_from_slice(&checksum.to_be_bytes());

            let mut pseudo = Vec::with_capacity(12);
            pseudo.extend_from_slice(&ip[16..20]);
            pseudo.extend_from_slice(&ip[12..16]);
            pseudo.push(0);
            pseudo.push(UDP_PROTOCOL);
            pseudo.extend_from_slice(&(udp_len as u16).to_be_bytes());
            pseudo_header = pseudo;
        }
        IpAddr::V6(_) => {
            reply.extend_from_slice(&ip[0..4]); // version, class, flow
            reply.extend_from_slice(&(udp_len as u16).to_be_bytes());
            reply.push(UDP_PROTOCOL);
            reply.push(ip[7]); // hop limit
            reply.extend_from_slice(&ip[24..40]); // source <- destination
            reply.extend_from_slice(&ip[8..24]); // destination <- source

            let mut pseudo = Vec::with_capacity(40);
            pseudo.extend_from_slice(&ip[24..40]);
            pseudo.extend_from_slice(&ip[8..24]);
            pseudo.extend_from_slice(&(udp_len as u32).to_be_bytes());
            pseudo.extend_from_slice(&[0, 0, 0]);
            pseudo.push(UDP_PROTOCOL);
            pseudo_header = pseudo;
        }
    }

    let udp_start = reply.len();
    reply.extend_from_slice(&53u16.to_be_bytes()); // source port
    reply.extend_from_slice(&parsed.src_port.to_be_bytes()); // destination port
    reply.extend_from_slice(&(udp_len as u16).to_be_bytes());
    reply.extend_from_slice(&[0, 0]); // checksum, filled below
    reply.extend_from_slice(payload);
    let checksum = match internet_checksum(&[&pseudo_header[..], &reply[udp_start..]]) {
        // An all-zero checksum is transmitted as its complement.
        0 => 0xffff,
        sum => sum,
    };
    reply[udp_start + 6..udp_start + 8].copy_from_slice(&checksum.to_be_bytes());

    Some(reply)
}

/// Computes the Internet checksum (RFC 1071) over the concatenation of
/// `chunks`. Only the final chunk may have odd length.
fn internet_checksum(chunks: &[&[u8]]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in chunks {
        for pair in chunk.chunks(2) {
            let word = if pair.len() == 2 {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], 0])
            };
            sum += word as u32;
        }
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
